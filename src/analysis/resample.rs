/// Calendar resampling of an observation series.
///
/// Buckets are labelled by their last day: weeks end on Sunday, months on
/// their last calendar day. Every bucket between the first and the last
/// observation is produced, so a gap in collection shows up as a bucket
/// with no value instead of disappearing from the curve.

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeMap;

/// One point of a series; `None` is a missing reading.
pub type SeriesPoint = (NaiveDateTime, Option<f64>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    /// ISO week, Monday through Sunday, labelled by the Sunday.
    Weekly,
    /// Calendar month, labelled by its last day.
    Monthly,
}

impl Frequency {
    /// Label of the bucket containing `date`.
    pub fn bucket_end(self, date: NaiveDate) -> NaiveDate {
        match self {
            Frequency::Weekly => {
                let to_sunday = 6 - date.weekday().num_days_from_monday();
                date + Days::new(u64::from(to_sunday))
            }
            Frequency::Monthly => {
                let (y, m) = if date.month() == 12 {
                    (date.year() + 1, 1)
                } else {
                    (date.year(), date.month() + 1)
                };
                NaiveDate::from_ymd_opt(y, m, 1)
                    .and_then(|first| first.pred_opt())
                    .unwrap_or(date)
            }
        }
    }

    /// Label of the bucket after the one labelled `end`.
    fn next_end(self, end: NaiveDate) -> Option<NaiveDate> {
        end.succ_opt().map(|d| self.bucket_end(d))
    }
}

impl std::str::FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "w" | "week" | "weekly" => Ok(Frequency::Weekly),
            "m" | "month" | "monthly" => Ok(Frequency::Monthly),
            other => Err(format!("unknown frequency '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    Median,
    Mean,
}

impl Reducer {
    /// Reduces a non-empty slice; `None` for an empty one.
    pub fn apply(self, values: &mut [f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        match self {
            Reducer::Mean => Some(values.iter().sum::<f64>() / values.len() as f64),
            Reducer::Median => {
                values.sort_by(f64::total_cmp);
                let mid = values.len() / 2;
                if values.len() % 2 == 0 {
                    Some((values[mid - 1] + values[mid]) / 2.0)
                } else {
                    Some(values[mid])
                }
            }
        }
    }
}

impl std::str::FromStr for Reducer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "median" => Ok(Reducer::Median),
            "mean" | "avg" => Ok(Reducer::Mean),
            other => Err(format!("unknown reducer '{}'", other)),
        }
    }
}

/// One resampled value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bucket {
    pub end: NaiveDate,
    /// `None` when the bucket holds no present values.
    pub value: Option<f64>,
    /// Number of present values that went into `value`.
    pub count: usize,
}

/// Resamples `series` into calendar buckets and reduces each one over its
/// present values. The input need not be sorted.
pub fn resample(series: &[SeriesPoint], frequency: Frequency, reducer: Reducer) -> Vec<Bucket> {
    let Some(first) = series.iter().map(|(t, _)| t.date()).min() else {
        return Vec::new();
    };
    let last = series.iter().map(|(t, _)| t.date()).max().unwrap_or(first);

    let mut grouped: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for (time, value) in series {
        let values = grouped.entry(frequency.bucket_end(time.date())).or_default();
        if let Some(v) = value.filter(|v| !v.is_nan()) {
            values.push(v);
        }
    }

    let last_end = frequency.bucket_end(last);
    let mut buckets = Vec::new();
    let mut end = frequency.bucket_end(first);
    loop {
        let mut values = grouped.remove(&end).unwrap_or_default();
        buckets.push(Bucket {
            end,
            value: reducer.apply(&mut values),
            count: values.len(),
        });
        if end >= last_end {
            break;
        }
        match frequency.next_end(end) {
            Some(next) => end = next,
            None => break,
        }
    }
    buckets
}
