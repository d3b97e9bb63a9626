/// Batch collection from the weather API.
///
/// One run walks every grid point, asks the API about it, and hands the
/// result on. A failure for one point (network, bad response, rejected
/// insert) is logged and the loop moves on, so a run always makes as much
/// progress as it can. Each stored observation commits on its own.

pub mod weatherapi;

use chrono::NaiveDateTime;
use log::info;

use crate::db::Store;
use crate::error::Error;
use crate::logging::{DataSource, log_batch_summary, log_point_failure};
use crate::model::{GridPoint, Observation, StationMapping, truncate_to_hour};
use weatherapi::WeatherSource;

/// Counts for one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed_ids: Vec<i32>,
}

impl BatchReport {
    fn record(&mut self, id: i32, ok: bool) {
        self.total += 1;
        if ok {
            self.succeeded += 1;
        } else {
            self.failed_ids.push(id);
        }
    }
}

/// Fetches current weather for every point and passes each observation,
/// stamped with `time` truncated to the hour, to `sink`.
pub fn collect_with<S, F>(source: &S, points: &[GridPoint], time: NaiveDateTime, mut sink: F) -> BatchReport
where
    S: WeatherSource + ?Sized,
    F: FnMut(Observation) -> Result<(), Error>,
{
    let time = truncate_to_hour(time);
    let mut report = BatchReport::default();

    for point in points {
        let result = source
            .current(point.lat, point.lon)
            .map_err(Error::from)
            .and_then(|fields| sink(Observation::new(point.id, time, fields)));

        if let Err(ref e) = result {
            log_point_failure(DataSource::Api, point.id, "collect", e);
        }
        report.record(point.id, result.is_ok());
    }

    log_batch_summary(DataSource::Api, report.total, report.succeeded, &report.failed_ids);
    report
}

/// One collection cycle: every stored grid point gets one observation for
/// the current hour.
pub fn collect_into_store<S>(store: &mut Store, source: &S, now: NaiveDateTime) -> Result<BatchReport, Error>
where
    S: WeatherSource + ?Sized,
{
    let points = store.query_grid_points(None)?;
    info!(target: DataSource::Api.target(), "Collecting weather for {} grid points, this might take several minutes", points.len());
    Ok(collect_with(source, &points, now, |obs| {
        store.insert_observation(&obs).map_err(Error::from)
    }))
}

/// Asks the API which station answers for each grid point. Points the API
/// can't place are logged and left out of the result.
pub fn discover_stations<S>(source: &S, points: &[GridPoint]) -> (Vec<StationMapping>, BatchReport)
where
    S: WeatherSource + ?Sized,
{
    let mut mappings = Vec::with_capacity(points.len());
    let mut report = BatchReport::default();

    for point in points {
        match source.station_location(point.lat, point.lon) {
            Ok((lat_station, lon_station)) => {
                mappings.push(StationMapping {
                    id: point.id,
                    lat_station,
                    lon_station,
                });
                report.record(point.id, true);
            }
            Err(e) => {
                log_point_failure(DataSource::Api, point.id, "station lookup", &e);
                report.record(point.id, false);
            }
        }
    }

    log_batch_summary(DataSource::Api, report.total, report.succeeded, &report.failed_ids);
    (mappings, report)
}
