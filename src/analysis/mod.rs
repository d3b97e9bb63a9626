/// Time-series summaries for a single grid point.
///
/// Turns the observation rows fetched from the store into derived curves
/// (weekly median, monthly mean, ...) that a chart can draw directly.
/// Drawing itself happens elsewhere; everything here is plain data.
///
/// Submodules:
/// - `resample`: calendar bucketing and per-bucket reduction.
/// - `outliers`: high-quantile spike filter applied before bucketing.

pub mod outliers;
pub mod resample;

use serde::Serialize;

use crate::config::AnalysisConfig;
use crate::model::{Observation, Variable};
use outliers::filter_above_quantile;
use resample::{Bucket, Frequency, Reducer, SeriesPoint, resample};

/// A derived curve for one variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryCurve {
    pub variable: Variable,
    pub frequency: Frequency,
    pub reducer: Reducer,
    /// Quantile used to blank spikes before bucketing, if any.
    pub outlier_quantile: Option<f64>,
    pub buckets: Vec<Bucket>,
}

/// Pulls one variable out of a set of observations, sorted by time.
pub fn extract_series(observations: &[Observation], variable: Variable) -> Vec<SeriesPoint> {
    let mut series: Vec<SeriesPoint> = observations
        .iter()
        .map(|obs| (obs.time, variable.value_of(obs)))
        .collect();
    series.sort_by_key(|(t, _)| *t);
    series
}

/// Summarizes `variable` into calendar buckets, blanking values above
/// `outlier_quantile` first when one is given.
pub fn summarize(
    observations: &[Observation],
    variable: Variable,
    frequency: Frequency,
    reducer: Reducer,
    outlier_quantile: Option<f64>,
) -> SummaryCurve {
    let mut series = extract_series(observations, variable);
    if let Some(q) = outlier_quantile {
        series = filter_above_quantile(&series, q);
    }
    SummaryCurve {
        variable,
        frequency,
        reducer,
        outlier_quantile,
        buckets: resample(&series, frequency, reducer),
    }
}

/// Like `summarize`, with the spike filter switched on for precipitation
/// at the configured quantile.
pub fn summarize_with_config(
    observations: &[Observation],
    variable: Variable,
    frequency: Frequency,
    reducer: Reducer,
    config: &AnalysisConfig,
) -> SummaryCurve {
    let quantile = (variable == Variable::Rain).then_some(config.rain_quantile);
    summarize(observations, variable, frequency, reducer, quantile)
}
