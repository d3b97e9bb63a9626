/// Grid lattice input file.
///
/// `grid.csv` lists the lattice in decimal degrees with a `lat,lon` header.
/// Ids are assigned from the row index starting at 0 unless the file
/// carries its own `id` column.

use log::info;
use serde::Deserialize;
use std::path::Path;

use crate::error::InputError;
use crate::logging::DataSource;
use crate::model::GridPoint;

#[derive(Debug, Deserialize)]
struct GridRow {
    #[serde(default)]
    id: Option<i32>,
    lat: f64,
    lon: f64,
}

/// Reads the grid lattice. A missing file is `InputError::MissingInput`;
/// there is no built-in default grid.
pub fn load_grid(path: &Path) -> Result<Vec<GridPoint>, InputError> {
    if !path.is_file() {
        return Err(InputError::MissingInput(path.to_path_buf()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| InputError::Csv(path.to_path_buf(), e))?;

    let mut points = Vec::new();
    for (index, result) in reader.deserialize::<GridRow>().enumerate() {
        let row = result.map_err(|e| InputError::InvalidRow {
            path: path.to_path_buf(),
            line: e.position().map(|p| p.line()).unwrap_or(index as u64 + 2),
            reason: e.to_string(),
        })?;
        let id = match row.id {
            Some(id) => id,
            None => i32::try_from(index).map_err(|_| InputError::InvalidRow {
                path: path.to_path_buf(),
                line: index as u64 + 2,
                reason: "too many rows for an integer id".to_string(),
            })?,
        };
        points.push(GridPoint {
            id,
            lat: row.lat,
            lon: row.lon,
        });
    }

    info!(target: DataSource::Files.target(), "Loaded {} grid points from {}", points.len(), path.display());
    Ok(points)
}
