/// Nearest grid point lookup.
///
/// Resolution works per axis rather than by distance: take the grid points
/// whose latitude is closest to the query latitude, separately take those
/// whose longitude is closest to the query longitude, and intersect the two
/// sets in grid row order. The first point of the intersection wins.
///
/// On a regular lattice this is the true nearest cell. On an irregular grid
/// the two sets can be disjoint even though each axis has a minimum; that
/// case is reported as no match. Switching to a distance metric would change
/// which id historical queries resolve to, so the per-axis rule is kept as is.

use log::{debug, info};
use serde::Serialize;

use crate::logging::DataSource;
use crate::model::{GridPoint, StationMapping};
use crate::stations::GridCell;

const ANALYSIS: &str = DataSource::Analysis.target();

/// The winning grid point for a query coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Resolution {
    pub id: i32,
    pub lat: f64,
    pub lon: f64,
    pub station: Option<StationMapping>,
}

/// Index of the per-axis nearest point in `points`, or `None` if the two
/// axis minima don't share a point (or there is nothing to compare).
pub fn nearest_index<'a, I>(points: I, lat: f64, lon: f64) -> Option<usize>
where
    I: IntoIterator<Item = &'a GridPoint>,
    I::IntoIter: Clone,
{
    if !lat.is_finite() || !lon.is_finite() {
        return None;
    }
    let points = points.into_iter();

    let lat_diff = |p: &GridPoint| (p.lat - lat).abs();
    let lon_diff = |p: &GridPoint| (p.lon - lon).abs();

    // NaN diffs (unparseable coordinates) never win either axis
    let min_lat = points.clone().map(lat_diff).filter(|d| !d.is_nan()).reduce(f64::min)?;
    let min_lon = points.clone().map(lon_diff).filter(|d| !d.is_nan()).reduce(f64::min)?;

    points
        .enumerate()
        .find(|&(_, p)| lat_diff(p) == min_lat && lon_diff(p) == min_lon)
        .map(|(i, _)| i)
}

/// Per-axis nearest point among `points`.
pub fn nearest(points: &[GridPoint], lat: f64, lon: f64) -> Option<&GridPoint> {
    nearest_index(points, lat, lon).map(|i| &points[i])
}

/// Resolver over a fixed, ordered set of grid cells.
#[derive(Debug, Clone)]
pub struct GridResolver {
    cells: Vec<GridCell>,
    points: Vec<GridPoint>,
}

impl GridResolver {
    pub fn new(cells: Vec<GridCell>) -> Self {
        let points = cells.iter().map(|c| c.point).collect();
        Self { cells, points }
    }

    /// Resolver without station data.
    pub fn from_points(points: Vec<GridPoint>) -> Self {
        Self::new(points.into_iter().map(GridCell::from).collect())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Maps a coordinate to its grid point. `None` means no match, which is
    /// a normal outcome on an irregular grid and must not be read as id 0.
    pub fn resolve(&self, lat: f64, lon: f64) -> Option<Resolution> {
        let Some(index) = nearest_index(&self.points, lat, lon) else {
            info!(target: ANALYSIS, "No nearest grid point found for ({:.2}, {:.2})", lat, lon);
            return None;
        };
        let cell = &self.cells[index];
        debug!(target: ANALYSIS, "({:.4}, {:.4}) resolved to grid point {}", lat, lon, cell.point.id);
        Some(Resolution {
            id: cell.point.id,
            lat: cell.point.lat,
            lon: cell.point.lon,
            station: cell.station,
        })
    }
}
