/// High-quantile spike filter.
///
/// Rain gauges occasionally report single absurd values. Values above a very
/// high quantile of the series are blanked out before resampling. The point
/// stays in the series with no value, so bucket boundaries don't move.

use super::resample::SeriesPoint;

/// Quantile of `values` with linear interpolation between closest ranks.
/// NaNs are ignored; `None` for an empty input or `q` outside [0, 1].
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if !(0.0..=1.0).contains(&q) {
        return None;
    }
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

/// Blanks every value strictly above the `q` quantile of the present values.
pub fn filter_above_quantile(series: &[SeriesPoint], q: f64) -> Vec<SeriesPoint> {
    let present: Vec<f64> = series.iter().filter_map(|(_, v)| *v).collect();
    let Some(threshold) = quantile(&present, q) else {
        return series.to_vec();
    };
    series
        .iter()
        .map(|&(t, v)| (t, v.filter(|x| *x <= threshold)))
        .collect()
}
