/// Integration tests for the PostgreSQL observation store
///
/// Tests verify:
/// 1. Grid point round trips and range/duplicate constraints
/// 2. Batch inserts are all-or-nothing
/// 3. Observations keep absent values absent
/// 4. Referential integrity on observation inserts
/// 5. Query filters and the closed-store state
/// 6. Duplicate policy enforced on writes, whatever the schema history
/// 7. Scoped use releases the connection even when the work fails
/// 8. Point reports for matched and unmatched query coordinates
///
/// Prerequisites:
/// - A PostgreSQL database the test user may create schemas in
/// - DATABASE_URL set in .env
///
/// Every test works in its own throwaway schema.
/// Run with: cargo test --test store_integration -- --ignored

use chrono::{NaiveDate, NaiveDateTime};
use postgres::{Client, NoTls};
use std::env;
use std::thread;
use std::time::Duration;

use wxgrid_service::analysis::resample::{Frequency, Reducer};
use wxgrid_service::config::{AnalysisConfig, DuplicatePolicy};
use wxgrid_service::db::{ObservationFilter, Store};
use wxgrid_service::error::StoreError;
use wxgrid_service::lookup::{CurveRequest, point_report};
use wxgrid_service::model::{GridPoint, Observation, Variable, WeatherFields};
use wxgrid_service::resolver::GridResolver;

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn schema_name(name: &str) -> String {
    format!("wxgrid_test_{}_{}", name, std::process::id())
}

fn raw_client() -> Client {
    dotenv::dotenv().ok();
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    Client::connect(&database_url, NoTls).expect("Failed to connect to test database")
}

/// Connection whose search path points at the test schema. `fresh` drops
/// and recreates the schema first.
fn schema_client(name: &str, fresh: bool) -> Client {
    let mut client = raw_client();
    let schema = schema_name(name);
    let setup = if fresh {
        format!("DROP SCHEMA IF EXISTS {s} CASCADE; CREATE SCHEMA {s}; SET search_path TO {s};", s = schema)
    } else {
        format!("SET search_path TO {};", schema)
    };
    client.batch_execute(&setup).expect("Failed to prepare test schema");
    client
}

fn setup_store(name: &str, duplicates: DuplicatePolicy) -> Store {
    let mut store = Store::from_client(schema_client(name, true), duplicates);
    store.ensure_schema().expect("Failed to create tables");
    store
}

/// Waits until the server no longer lists a session with `app_name`.
fn session_gone(app_name: &str) -> bool {
    let mut observer = raw_client();
    for _ in 0..50 {
        let row = observer
            .query_one(
                "SELECT COUNT(*) FROM pg_stat_activity WHERE application_name = $1",
                &[&app_name],
            )
            .unwrap();
        let count: i64 = row.get(0);
        if count == 0 {
            return true;
        }
        thread::sleep(Duration::from_millis(100));
    }
    false
}

fn hour(day: u32, h: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, day)
        .unwrap()
        .and_hms_opt(h, 0, 0)
        .unwrap()
}

fn small_grid() -> Vec<GridPoint> {
    vec![
        GridPoint { id: 0, lat: 52.0, lon: 13.0 },
        GridPoint { id: 1, lat: 52.0, lon: 13.5 },
        GridPoint { id: 2, lat: 52.5, lon: 13.0 },
    ]
}

fn sample_fields() -> WeatherFields {
    WeatherFields {
        temp: Some(17.5),
        humidity: Some(60),
        clouds: Some(25),
        rain: Some(0.0),
        wind: Some(11.2),
        wind_dir: Some(270),
        gusts: Some(19.8),
    }
}

// ---------------------------------------------------------------------------
// Grid points
// ---------------------------------------------------------------------------

#[test]
#[ignore] // requires DATABASE_URL
fn test_grid_point_round_trip() {
    let mut store = setup_store("grid_round_trip", DuplicatePolicy::Keep);
    store.insert_grid_points(&small_grid()).unwrap();

    for point in small_grid() {
        assert_eq!(store.query_grid_points(Some(point.id)).unwrap(), vec![point]);
    }
    assert_eq!(store.query_grid_points(None).unwrap(), small_grid());
    assert!(store.query_grid_points(Some(99)).unwrap().is_empty());
}

#[test]
#[ignore] // requires DATABASE_URL
fn test_single_insert_rejects_duplicate_id() {
    let mut store = setup_store("grid_duplicate", DuplicatePolicy::Keep);
    store.insert_grid_point(GridPoint { id: 5, lat: 1.0, lon: 2.0 }).unwrap();

    let err = store
        .insert_grid_point(GridPoint { id: 5, lat: 3.0, lon: 4.0 })
        .unwrap_err();
    assert!(matches!(err, StoreError::Constraint(_)));
    assert_eq!(store.query_grid_points(Some(5)).unwrap()[0].lat, 1.0);
}

#[test]
#[ignore] // requires DATABASE_URL
fn test_batch_with_bad_latitude_stores_nothing() {
    let mut store = setup_store("grid_batch_range", DuplicatePolicy::Keep);
    let mut batch = small_grid();
    batch.push(GridPoint { id: 3, lat: 91.0, lon: 13.0 });

    let err = store.insert_grid_points(&batch).unwrap_err();
    assert!(matches!(err, StoreError::Constraint(_)));
    assert!(store.query_grid_points(None).unwrap().is_empty());
}

#[test]
#[ignore] // requires DATABASE_URL
fn test_batch_colliding_with_existing_id_rolls_back() {
    let mut store = setup_store("grid_batch_collision", DuplicatePolicy::Keep);
    store.insert_grid_point(GridPoint { id: 2, lat: 0.0, lon: 0.0 }).unwrap();

    let err = store.insert_grid_points(&small_grid()).unwrap_err();
    assert!(matches!(err, StoreError::Constraint(_)));
    // Only the pre-existing row remains; ids 0 and 1 were not committed
    let stored = store.query_grid_points(None).unwrap();
    assert_eq!(stored, vec![GridPoint { id: 2, lat: 0.0, lon: 0.0 }]);
}

// ---------------------------------------------------------------------------
// Observations
// ---------------------------------------------------------------------------

#[test]
#[ignore] // requires DATABASE_URL
fn test_absent_fields_come_back_absent() {
    let mut store = setup_store("obs_absent", DuplicatePolicy::Keep);
    store.insert_grid_points(&small_grid()).unwrap();

    let obs = Observation::new(
        1,
        hour(1, 12),
        WeatherFields {
            temp: Some(f64::NAN),
            humidity: None,
            clouds: Some(0),
            rain: None,
            wind: Some(0.0),
            wind_dir: None,
            gusts: Some(f64::INFINITY),
        },
    );
    store.insert_observation(&obs).unwrap();

    let rows = store.query_observations(&ObservationFilter::for_id(1)).unwrap();
    assert_eq!(rows.len(), 1);
    let f = rows[0].fields;
    assert_eq!(f.temp, None);
    assert_eq!(f.humidity, None);
    assert_eq!(f.clouds, Some(0));
    assert_eq!(f.rain, None);
    assert_eq!(f.wind, Some(0.0));
    assert_eq!(f.wind_dir, None);
    assert_eq!(f.gusts, None);
}

#[test]
#[ignore] // requires DATABASE_URL
fn test_unknown_grid_id_is_referential_error_and_adds_nothing() {
    let mut store = setup_store("obs_referential", DuplicatePolicy::Keep);
    store.insert_grid_points(&small_grid()).unwrap();

    let err = store
        .insert_observation(&Observation::new(42, hour(1, 0), sample_fields()))
        .unwrap_err();
    assert!(matches!(err, StoreError::Referential(42)));

    let batch = [
        Observation::new(0, hour(1, 0), sample_fields()),
        Observation::new(43, hour(1, 0), sample_fields()),
    ];
    let err = store.insert_observations(&batch).unwrap_err();
    assert!(matches!(err, StoreError::Referential(43)));

    assert!(store.query_observations(&ObservationFilter::all()).unwrap().is_empty());
}

#[test]
#[ignore] // requires DATABASE_URL
fn test_query_filters() {
    let mut store = setup_store("obs_filters", DuplicatePolicy::Keep);
    store.insert_grid_points(&small_grid()).unwrap();

    let mut batch = Vec::new();
    for day in 1..=3 {
        for id in 0..3 {
            batch.push(Observation::new(id, hour(day, 6), sample_fields()));
        }
    }
    store.insert_observations(&batch).unwrap();

    let all = store.query_observations(&ObservationFilter::all()).unwrap();
    assert_eq!(all.len(), 9);
    assert!(all.windows(2).all(|w| (w[0].time, w[0].id) <= (w[1].time, w[1].id)));

    let by_id = store.query_observations(&ObservationFilter::for_id(2)).unwrap();
    assert_eq!(by_id.len(), 3);
    assert!(by_id.iter().all(|o| o.id == 2));

    let at = store
        .query_observations(&ObservationFilter::all().at(hour(2, 6)))
        .unwrap();
    assert_eq!(at.len(), 3);

    let range = store
        .query_observations(&ObservationFilter::for_id(0).between(hour(2, 0), hour(3, 6)))
        .unwrap();
    assert_eq!(range.iter().map(|o| o.time).collect::<Vec<_>>(), vec![hour(2, 6), hour(3, 6)]);

    assert_eq!(store.observation_span(1).unwrap(), Some((hour(1, 6), hour(3, 6))));
    assert_eq!(store.observation_span(99).unwrap(), None);
}

#[test]
#[ignore] // requires DATABASE_URL
fn test_duplicate_observation_policy() {
    let mut keep = setup_store("obs_dup_keep", DuplicatePolicy::Keep);
    keep.insert_grid_points(&small_grid()).unwrap();
    let obs = Observation::new(0, hour(1, 0), sample_fields());
    keep.insert_observation(&obs).unwrap();
    keep.insert_observation(&obs).unwrap();
    assert_eq!(keep.query_observations(&ObservationFilter::for_id(0)).unwrap().len(), 2);

    let mut reject = setup_store("obs_dup_reject", DuplicatePolicy::Reject);
    reject.insert_grid_points(&small_grid()).unwrap();
    reject.insert_observation(&obs).unwrap();
    let err = reject.insert_observation(&obs).unwrap_err();
    assert!(matches!(err, StoreError::Constraint(_)));
    assert_eq!(reject.query_observations(&ObservationFilter::for_id(0)).unwrap().len(), 1);

    // A repeat inside one batch rolls the whole batch back
    let batch = [
        Observation::new(1, hour(2, 0), sample_fields()),
        Observation::new(2, hour(2, 0), sample_fields()),
        Observation::new(1, hour(2, 0), sample_fields()),
    ];
    let err = reject.insert_observations(&batch).unwrap_err();
    assert!(matches!(err, StoreError::Constraint(_)));
    assert!(reject
        .query_observations(&ObservationFilter::all().at(hour(2, 0)))
        .unwrap()
        .is_empty());
}

#[test]
#[ignore] // requires DATABASE_URL
fn test_reject_applies_to_schema_created_under_keep() {
    let mut keep = setup_store("dup_switch", DuplicatePolicy::Keep);
    keep.insert_grid_points(&small_grid()).unwrap();
    let obs = Observation::new(0, hour(1, 0), sample_fields());
    keep.insert_observation(&obs).unwrap();
    keep.close().unwrap();

    // Same tables, policy switched in config, schema step not rerun
    let mut reject = Store::from_client(schema_client("dup_switch", false), DuplicatePolicy::Reject);
    let err = reject.insert_observation(&obs).unwrap_err();
    assert!(matches!(err, StoreError::Constraint(_)));

    let err = reject.insert_observations(&[obs]).unwrap_err();
    assert!(matches!(err, StoreError::Constraint(_)));
    assert_eq!(reject.query_observations(&ObservationFilter::for_id(0)).unwrap().len(), 1);

    reject
        .insert_observation(&Observation::new(0, hour(1, 1), sample_fields()))
        .unwrap();
}

#[test]
#[ignore] // requires DATABASE_URL
fn test_ensure_schema_keeps_existing_unique_index() {
    let mut store = setup_store("dup_index", DuplicatePolicy::Reject);
    store.close().unwrap();

    let mut admin = schema_client("dup_index", false);
    admin
        .batch_execute("CREATE UNIQUE INDEX data_id_time_key ON data (id, time)")
        .unwrap();

    let mut keep = Store::from_client(schema_client("dup_index", false), DuplicatePolicy::Keep);
    keep.ensure_schema().unwrap();

    let row = admin
        .query_one(
            "SELECT COUNT(*) FROM pg_indexes WHERE schemaname = $1 AND indexname = 'data_id_time_key'",
            &[&schema_name("dup_index")],
        )
        .unwrap();
    let count: i64 = row.get(0);
    assert_eq!(count, 1);
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[test]
#[ignore] // requires DATABASE_URL
fn test_calls_after_close_fail() {
    let mut store = setup_store("closed", DuplicatePolicy::Keep);
    store.close().unwrap();

    assert!(store.is_closed());
    assert!(matches!(store.query_grid_points(None), Err(StoreError::Closed)));
    assert!(matches!(
        store.insert_grid_point(GridPoint { id: 1, lat: 0.0, lon: 0.0 }),
        Err(StoreError::Closed)
    ));
    assert!(matches!(
        store.query_observations(&ObservationFilter::all()),
        Err(StoreError::Closed)
    ));
    assert!(matches!(store.close(), Err(StoreError::Closed)));
}

#[test]
#[ignore] // requires DATABASE_URL
fn test_scoped_work_that_fails_still_releases_connection() {
    let app_name = format!("wxgrid_scoped_err_{}", std::process::id());
    let mut client = schema_client("scoped_err", true);
    client
        .batch_execute(&format!("SET application_name = '{}'", app_name))
        .unwrap();
    let mut store = Store::from_client(client, DuplicatePolicy::Keep);
    store.ensure_schema().unwrap();

    let mut batch = small_grid();
    batch.push(GridPoint { id: 9, lat: -95.0, lon: 0.0 });
    let result: Result<(), StoreError> = store.run_scoped(|s| s.insert_grid_points(&batch));

    assert!(matches!(result, Err(StoreError::Constraint(_))));
    assert!(session_gone(&app_name), "connection still open after failed scoped work");

    let mut check = Store::from_client(schema_client("scoped_err", false), DuplicatePolicy::Keep);
    assert!(check.query_grid_points(None).unwrap().is_empty());
}

#[test]
#[ignore] // requires DATABASE_URL
fn test_scoped_work_returns_value_and_releases_connection() {
    let app_name = format!("wxgrid_scoped_ok_{}", std::process::id());
    let mut client = schema_client("scoped_ok", true);
    client
        .batch_execute(&format!("SET application_name = '{}'", app_name))
        .unwrap();
    let store = Store::from_client(client, DuplicatePolicy::Keep);

    let points = store
        .run_scoped::<_, StoreError, _>(|s| {
            s.ensure_schema()?;
            s.insert_grid_points(&small_grid())?;
            s.query_grid_points(None)
        })
        .unwrap();

    assert_eq!(points, small_grid());
    assert!(session_gone(&app_name), "connection still open after scoped work");
}

// ---------------------------------------------------------------------------
// Point reports
// ---------------------------------------------------------------------------

fn temp_curve() -> CurveRequest {
    CurveRequest {
        variable: Variable::Temp,
        frequency: Frequency::Weekly,
        reducer: Reducer::Median,
    }
}

#[test]
#[ignore] // requires DATABASE_URL
fn test_point_report_without_match_has_no_curves() {
    let mut store = setup_store("report_none", DuplicatePolicy::Keep);
    store.insert_grid_points(&small_grid()).unwrap();
    store
        .insert_observation(&Observation::new(2, hour(1, 6), sample_fields()))
        .unwrap();
    let resolver = GridResolver::from_points(small_grid());

    // Nearest latitude is point 2, nearest longitude is point 1
    let report = point_report(&mut store, &resolver, 52.5, 13.5, &[temp_curve()], &AnalysisConfig::default()).unwrap();

    assert!(report.resolution.is_none());
    assert!(report.curves.is_empty());
    assert_eq!(report.observation_count, 0);
    assert_eq!(report.first_observation, None);
}

#[test]
#[ignore] // requires DATABASE_URL
fn test_point_report_for_matched_point() {
    let mut store = setup_store("report_match", DuplicatePolicy::Keep);
    store.insert_grid_points(&small_grid()).unwrap();

    let batch: Vec<Observation> = [(1, 10.0), (2, 30.0), (3, 20.0)]
        .into_iter()
        .map(|(day, temp)| {
            Observation::new(
                2,
                hour(day, 6),
                WeatherFields {
                    temp: Some(temp),
                    ..Default::default()
                },
            )
        })
        .chain([Observation::new(0, hour(1, 6), sample_fields())])
        .collect();
    store.insert_observations(&batch).unwrap();
    let resolver = GridResolver::from_points(small_grid());

    let report = point_report(&mut store, &resolver, 52.49, 13.02, &[temp_curve()], &AnalysisConfig::default()).unwrap();

    let resolution = report.resolution.expect("grid point 2");
    assert_eq!(resolution.id, 2);
    assert_eq!(report.observation_count, 3);
    assert_eq!(report.first_observation, Some(hour(1, 6)));
    assert_eq!(report.last_observation, Some(hour(3, 6)));

    assert_eq!(report.curves.len(), 1);
    let buckets = &report.curves[0].buckets;
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].end, NaiveDate::from_ymd_opt(2024, 5, 5).unwrap());
    assert_eq!(buckets[0].value, Some(20.0));
    assert_eq!(buckets[0].count, 3);
}
