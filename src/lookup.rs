/// End-to-end lookup for one query coordinate.
///
/// resolve to a grid point → fetch its observation series → reduce the
/// series into the requested curves. The result is plain data for a map or
/// chart renderer; nothing here draws.

use chrono::NaiveDateTime;
use log::{debug, info, warn};
use serde::Serialize;

use crate::analysis::resample::{Frequency, Reducer};
use crate::analysis::{SummaryCurve, summarize_with_config};
use crate::config::AnalysisConfig;
use crate::db::{ObservationFilter, Store};
use crate::error::StoreError;
use crate::logging::DataSource;
use crate::model::Variable;
use crate::resolver::{GridResolver, Resolution};

const ANALYSIS: &str = DataSource::Analysis.target();

/// One curve to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CurveRequest {
    pub variable: Variable,
    pub frequency: Frequency,
    pub reducer: Reducer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointReport {
    pub query_lat: f64,
    pub query_lon: f64,
    /// `None` when the resolver found no grid point.
    pub resolution: Option<Resolution>,
    pub observation_count: usize,
    pub first_observation: Option<NaiveDateTime>,
    pub last_observation: Option<NaiveDateTime>,
    pub curves: Vec<SummaryCurve>,
}

/// Builds the report for `(lat, lon)`. No match is not an error; the report
/// just has no resolution and no curves.
pub fn point_report(
    store: &mut Store,
    resolver: &GridResolver,
    lat: f64,
    lon: f64,
    requests: &[CurveRequest],
    config: &AnalysisConfig,
) -> Result<PointReport, StoreError> {
    let mut report = PointReport {
        query_lat: lat,
        query_lon: lon,
        resolution: None,
        observation_count: 0,
        first_observation: None,
        last_observation: None,
        curves: Vec::new(),
    };

    if resolver.is_empty() {
        warn!(target: ANALYSIS, "No grid point has a station mapping, nothing can be resolved");
        return Ok(report);
    }
    debug!(target: ANALYSIS, "Resolving against {} grid points", resolver.len());

    let Some(resolution) = resolver.resolve(lat, lon) else {
        return Ok(report);
    };
    report.resolution = Some(resolution);

    let observations = store.query_observations(&ObservationFilter::for_id(resolution.id))?;
    info!(target: ANALYSIS, "Grid point {} has {} observations", resolution.id, observations.len());

    report.observation_count = observations.len();
    report.first_observation = observations.iter().map(|o| o.time).min();
    report.last_observation = observations.iter().map(|o| o.time).max();
    report.curves = requests
        .iter()
        .map(|r| summarize_with_config(&observations, r.variable, r.frequency, r.reducer, config))
        .collect();
    Ok(report)
}
