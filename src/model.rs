/// Core data types for the grid weather logger.
///
/// This module defines the shared domain model imported by all other modules.
/// It contains no I/O, only types and a few accessors on them.

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Coordinate ranges
// ---------------------------------------------------------------------------

/// Valid latitude range in decimal degrees.
pub const LAT_RANGE: (f64, f64) = (-90.0, 90.0);

/// Valid longitude range in decimal degrees.
pub const LON_RANGE: (f64, f64) = (-180.0, 180.0);

// ---------------------------------------------------------------------------
// Grid types
// ---------------------------------------------------------------------------

/// One cell of the fixed coordinate lattice.
///
/// Created once at setup time and never modified afterwards. Ids are never
/// reused, so an id is a stable handle for the cell's whole history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    pub id: i32,
    pub lat: f64,
    pub lon: f64,
}

/// Coordinates of the physical weather station the upstream provider uses
/// for a grid point. Usually a few kilometres away from the nominal cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StationMapping {
    pub id: i32,
    pub lat_station: f64,
    pub lon_station: f64,
}

// ---------------------------------------------------------------------------
// Observation types
// ---------------------------------------------------------------------------

/// The measured part of an observation. Every field may be absent when the
/// feed omits it; absence is `None`, never `0` or NaN.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherFields {
    pub temp: Option<f64>,      // degrees C
    pub humidity: Option<i32>,  // percent
    pub clouds: Option<i32>,    // cloud cover, percent
    pub rain: Option<f64>,      // mm
    pub wind: Option<f64>,      // km/h
    pub wind_dir: Option<i32>,  // degrees
    pub gusts: Option<f64>,     // km/h
}

/// One timestamped reading for a grid point, one row of the `data` table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: i32,
    pub time: NaiveDateTime,
    #[serde(flatten)]
    pub fields: WeatherFields,
}

impl Observation {
    pub fn new(id: i32, time: NaiveDateTime, fields: WeatherFields) -> Self {
        Self { id, time, fields }
    }
}

/// Truncates a timestamp to the start of its hour, the granularity at
/// which observations are keyed.
pub fn truncate_to_hour(time: NaiveDateTime) -> NaiveDateTime {
    time.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(time)
}

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

/// Selects one numeric column of an observation for analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variable {
    Temp,
    Humidity,
    Clouds,
    Rain,
    Wind,
    WindDir,
    Gusts,
}

impl Variable {
    pub const ALL: [Variable; 7] = [
        Variable::Temp,
        Variable::Humidity,
        Variable::Clouds,
        Variable::Rain,
        Variable::Wind,
        Variable::WindDir,
        Variable::Gusts,
    ];

    /// Column name in the `data` table.
    pub fn column(self) -> &'static str {
        match self {
            Variable::Temp => "temp",
            Variable::Humidity => "humidity",
            Variable::Clouds => "clouds",
            Variable::Rain => "rain",
            Variable::Wind => "wind",
            Variable::WindDir => "wind_dir",
            Variable::Gusts => "gusts",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Variable::Temp => "°C",
            Variable::Humidity | Variable::Clouds => "%",
            Variable::Rain => "mm",
            Variable::Wind | Variable::Gusts => "km/h",
            Variable::WindDir => "°",
        }
    }

    /// Reads this variable out of an observation as a float.
    pub fn value_of(self, obs: &Observation) -> Option<f64> {
        let f = &obs.fields;
        match self {
            Variable::Temp => f.temp,
            Variable::Humidity => f.humidity.map(f64::from),
            Variable::Clouds => f.clouds.map(f64::from),
            Variable::Rain => f.rain,
            Variable::Wind => f.wind,
            Variable::WindDir => f.wind_dir.map(f64::from),
            Variable::Gusts => f.gusts,
        }
    }
}

impl std::fmt::Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.column())
    }
}

impl std::str::FromStr for Variable {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Variable::ALL
            .into_iter()
            .find(|v| v.column() == name)
            .ok_or_else(|| format!("unknown variable '{}'", s))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
