/// Station mapping file and its join onto the grid.
///
/// The weather provider answers every grid query from its nearest physical
/// station, so each grid point has a "real" coordinate that usually differs
/// from its nominal one. Those are kept in `station_coords.csv`
/// (`id,lat_station,lon_station`, header optional) and joined to the grid
/// by id before resolving.
///
/// The station file is required input: without it there is no way to tell
/// which station backs a grid point, so loading fails instead of silently
/// continuing with an empty mapping.

use csv::StringRecord;
use log::{info, warn};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::error::InputError;
use crate::logging::DataSource;
use crate::model::{GridPoint, StationMapping};

const FILES: &str = DataSource::Files.target();

// ---------------------------------------------------------------------------
// Joined view
// ---------------------------------------------------------------------------

/// A grid point together with the station that backs it, if known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridCell {
    pub point: GridPoint,
    pub station: Option<StationMapping>,
}

impl From<GridPoint> for GridCell {
    fn from(point: GridPoint) -> Self {
        Self { point, station: None }
    }
}

/// Joins station mappings onto grid points by id.
///
/// Only grid points that have a station mapping take part; the rest are
/// logged and left out. The result keeps the grid's row order, which the
/// resolver relies on for its tie-break.
pub fn join_stations(points: &[GridPoint], mappings: &[StationMapping]) -> Vec<GridCell> {
    let by_id: HashMap<i32, StationMapping> = mappings.iter().map(|m| (m.id, *m)).collect();

    let mut cells = Vec::with_capacity(points.len());
    let mut unmapped = Vec::new();
    for point in points {
        match by_id.get(&point.id) {
            Some(station) => cells.push(GridCell {
                point: *point,
                station: Some(*station),
            }),
            None => unmapped.push(point.id),
        }
    }

    if !unmapped.is_empty() {
        warn!(target: FILES, "{} grid points have no station mapping and are skipped: {:?}", unmapped.len(), unmapped);
    }

    let grid_ids: HashSet<i32> = points.iter().map(|p| p.id).collect();
    let orphans: Vec<i32> = mappings
        .iter()
        .map(|m| m.id)
        .filter(|id| !grid_ids.contains(id))
        .collect();
    if !orphans.is_empty() {
        warn!(target: FILES, "{} station mappings reference unknown grid ids: {:?}", orphans.len(), orphans);
    }

    cells
}

// ---------------------------------------------------------------------------
// File I/O
// ---------------------------------------------------------------------------

fn parse_record(record: &StringRecord) -> Option<StationMapping> {
    if record.len() < 3 {
        return None;
    }
    Some(StationMapping {
        id: record[0].trim().parse().ok()?,
        lat_station: record[1].trim().parse().ok()?,
        lon_station: record[2].trim().parse().ok()?,
    })
}

/// Reads `id,lat_station,lon_station` rows. A leading header row is
/// detected and skipped; any other unparseable row is an error.
pub fn load_station_mappings(path: &Path) -> Result<Vec<StationMapping>, InputError> {
    if !path.is_file() {
        return Err(InputError::MissingInput(path.to_path_buf()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| InputError::Csv(path.to_path_buf(), e))?;

    let mut mappings = Vec::new();
    let mut record = StringRecord::new();
    let mut first = true;
    while reader
        .read_record(&mut record)
        .map_err(|e| InputError::Csv(path.to_path_buf(), e))?
    {
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let is_header = first && record.get(0).is_some_and(|v| v.trim().parse::<i32>().is_err());
        first = false;
        if is_header || record.iter().all(|v| v.trim().is_empty()) {
            continue;
        }
        let mapping = parse_record(&record).ok_or_else(|| InputError::InvalidRow {
            path: path.to_path_buf(),
            line,
            reason: format!("expected id,lat_station,lon_station, got {:?}", record),
        })?;
        mappings.push(mapping);
    }

    info!(target: FILES, "Loaded {} station mappings from {}", mappings.len(), path.display());
    Ok(mappings)
}

/// Writes station mappings with a header row.
pub fn write_station_mappings(path: &Path, mappings: &[StationMapping]) -> Result<(), InputError> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| InputError::Csv(path.to_path_buf(), e))?;
    for mapping in mappings {
        writer
            .serialize(mapping)
            .map_err(|e| InputError::Csv(path.to_path_buf(), e))?;
    }
    writer
        .flush()
        .map_err(|e| InputError::Write(path.to_path_buf(), e))?;
    info!(target: FILES, "Wrote {} station mappings to {}", mappings.len(), path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
