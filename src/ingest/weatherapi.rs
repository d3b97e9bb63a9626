/// WeatherAPI.com client
///
/// Fetches current conditions for a coordinate from the `current.json`
/// endpoint. The same response also reports where the provider's backing
/// station is, which is how station mappings are discovered.
///
/// API Documentation: https://www.weatherapi.com/docs/

use serde_json::Value;
use std::time::Duration;

use crate::coerce;
use crate::config::ApiConfig;
use crate::error::IngestError;
use crate::model::WeatherFields;

// ============================================================================
// Source abstraction
// ============================================================================

/// Anything that can report current weather and station location for a
/// coordinate. Implemented by the HTTP client and by test doubles.
pub trait WeatherSource {
    fn current(&self, lat: f64, lon: f64) -> Result<WeatherFields, IngestError>;

    /// Latitude and longitude of the station that answers for `(lat, lon)`.
    fn station_location(&self, lat: f64, lon: f64) -> Result<(f64, f64), IngestError>;
}

// ============================================================================
// Response parsing
// ============================================================================

/// Extracts the weather fields from a `current.json` response.
///
/// A response without a `current` object is unusable. Individual fields
/// that are missing or not numeric are simply absent.
pub fn parse_current(body: &Value) -> Result<WeatherFields, IngestError> {
    let current = body
        .get("current")
        .filter(|c| c.is_object())
        .ok_or_else(|| IngestError::Parse(describe_missing(body, "current")))?;

    let num = |key: &str| current.get(key).and_then(coerce::from_json);
    let int = |key: &str| current.get(key).and_then(coerce::int_from_json);

    Ok(WeatherFields {
        temp: num("temp_c"),
        humidity: int("humidity"),
        clouds: int("cloud"),
        rain: num("precip_mm"),
        wind: num("wind_kph"),
        wind_dir: int("wind_degree"),
        gusts: num("gust_kph"),
    })
}

/// Extracts the station coordinates from the `location` object.
pub fn parse_location(body: &Value) -> Result<(f64, f64), IngestError> {
    let location = body
        .get("location")
        .ok_or_else(|| IngestError::Parse(describe_missing(body, "location")))?;
    let lat = location.get("lat").and_then(coerce::from_json);
    let lon = location.get("lon").and_then(coerce::from_json);
    match (lat, lon) {
        (Some(lat), Some(lon)) => Ok((lat, lon)),
        _ => Err(IngestError::Parse(format!("location without coordinates: {}", location))),
    }
}

/// The API reports problems as `{"error": {"code": .., "message": ..}}`.
fn describe_missing(body: &Value, key: &str) -> String {
    match body.pointer("/error/message").and_then(Value::as_str) {
        Some(message) => format!("missing '{}' ({})", key, message),
        None => format!("missing '{}'", key),
    }
}

// ============================================================================
// HTTP client
// ============================================================================

pub struct WeatherApiClient {
    http: reqwest::blocking::Client,
    base_url: String,
    key: String,
}

impl WeatherApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, IngestError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            key: config.key.clone(),
        })
    }

    fn current_json(&self, lat: f64, lon: f64) -> Result<Value, IngestError> {
        let url = format!("{}/current.json", self.base_url);
        let query = format!("{},{}", lat, lon);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("key", self.key.as_str()),
                ("q", query.as_str()),
                ("aqi", "no"),
            ])
            .header("Accept", "application/json")
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Status(status.as_u16()));
        }
        Ok(response.json()?)
    }
}

impl WeatherSource for WeatherApiClient {
    fn current(&self, lat: f64, lon: f64) -> Result<WeatherFields, IngestError> {
        parse_current(&self.current_json(lat, lon)?)
    }

    fn station_location(&self, lat: f64, lon: f64) -> Result<(f64, f64), IngestError> {
        parse_location(&self.current_json(lat, lon)?)
    }
}

// ============================================================================
// Tests
// ============================================================================
