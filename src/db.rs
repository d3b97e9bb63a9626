/// Observation store backed by PostgreSQL.
///
/// Two tables: `coords` holds the immutable grid lattice and `data` holds
/// one row per grid point per collection cycle (see `sql/001_schema.sql`).
///
/// The client runs in autocommit mode, so every single-row write and every
/// read commits as soon as it returns. The batch forms stage all rows in one
/// transaction and commit once; a failure anywhere in the batch leaves the
/// tables untouched.
///
/// The store exclusively owns its connection. `close` releases it, and any
/// call afterwards fails with `StoreError::Closed`. Dropping an open store
/// closes it as well, so early returns with `?` never leak the connection.

use chrono::NaiveDateTime;
use log::{debug, info, warn};
use postgres::error::SqlState;
use postgres::types::ToSql;
use postgres::{Client, GenericClient, NoTls, Row};
use std::collections::HashSet;

use crate::coerce;
use crate::config::{Config, DuplicatePolicy};
use crate::error::StoreError;
use crate::logging::DataSource;
use crate::model::{GridPoint, LAT_RANGE, LON_RANGE, Observation, WeatherFields};

const SCHEMA: &str = include_str!("../sql/001_schema.sql");

const DB: &str = DataSource::Database.target();

const INSERT_COORDS: &str = "INSERT INTO coords (id, lat, lon) VALUES ($1, $2, $3)";

const INSERT_DATA: &str = "
    INSERT INTO data (id, time, temp, humidity, clouds, rain, wind, wind_dir, gusts)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)";

/// Insert used under `DuplicatePolicy::Reject`: writes nothing when a row
/// for the same (id, time) already exists, which shows up as zero rows
/// affected.
const INSERT_DATA_UNIQUE: &str = "
    INSERT INTO data (id, time, temp, humidity, clouds, rain, wind, wind_dir, gusts)
    SELECT $1::INTEGER, $2::TIMESTAMP, $3::DOUBLE PRECISION, $4::INTEGER, $5::INTEGER,
           $6::DOUBLE PRECISION, $7::DOUBLE PRECISION, $8::INTEGER, $9::DOUBLE PRECISION
    WHERE NOT EXISTS (SELECT 1 FROM data WHERE id = $1::INTEGER AND time = $2::TIMESTAMP)";

const SELECT_DATA: &str =
    "SELECT id, time, temp, humidity, clouds, rain, wind, wind_dir, gusts FROM data";

// ---------------------------------------------------------------------------
// Query filter
// ---------------------------------------------------------------------------

/// Predicates for `Store::query_observations`. All set predicates must hold.
/// The default (nothing set) is a full table scan.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ObservationFilter {
    pub id: Option<i32>,
    pub time: Option<NaiveDateTime>,
    /// Inclusive on both ends.
    pub range: Option<(NaiveDateTime, NaiveDateTime)>,
}

impl ObservationFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_id(id: i32) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn at(mut self, time: NaiveDateTime) -> Self {
        self.time = Some(time);
        self
    }

    pub fn between(mut self, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        self.range = Some((start, end));
        self
    }

    pub fn is_unfiltered(&self) -> bool {
        self.id.is_none() && self.time.is_none() && self.range.is_none()
    }

    /// Builds the WHERE clause (possibly empty) and its positional parameters.
    fn where_clause(&self) -> (String, Vec<&(dyn ToSql + Sync)>) {
        let mut clauses = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();

        if let Some(ref id) = self.id {
            params.push(id);
            clauses.push(format!("id = ${}", params.len()));
        }
        if let Some(ref time) = self.time {
            params.push(time);
            clauses.push(format!("time = ${}", params.len()));
        }
        if let Some((ref start, ref end)) = self.range {
            params.push(start);
            clauses.push(format!("time >= ${}", params.len()));
            params.push(end);
            clauses.push(format!("time <= ${}", params.len()));
        }

        if clauses.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), params)
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Checks a grid point's coordinates against the valid ranges.
pub fn validate_grid_point(point: &GridPoint) -> Result<(), StoreError> {
    let in_range = |v: f64, (lo, hi): (f64, f64)| v.is_finite() && v >= lo && v <= hi;
    if !in_range(point.lat, LAT_RANGE) {
        return Err(StoreError::Constraint(format!(
            "grid point {} latitude {} outside [{}, {}]",
            point.id, point.lat, LAT_RANGE.0, LAT_RANGE.1
        )));
    }
    if !in_range(point.lon, LON_RANGE) {
        return Err(StoreError::Constraint(format!(
            "grid point {} longitude {} outside [{}, {}]",
            point.id, point.lon, LON_RANGE.0, LON_RANGE.1
        )));
    }
    Ok(())
}

/// Validates a whole batch before anything is staged, including ids
/// repeated within the batch itself.
pub fn validate_grid_batch(points: &[GridPoint]) -> Result<(), StoreError> {
    let mut seen = HashSet::with_capacity(points.len());
    for point in points {
        validate_grid_point(point)?;
        if !seen.insert(point.id) {
            return Err(StoreError::Constraint(format!(
                "grid point id {} appears more than once in batch",
                point.id
            )));
        }
    }
    Ok(())
}

/// Maps database errors for writes onto the store's taxonomy.
fn classify_write_error(err: postgres::Error, context: impl FnOnce() -> String, id: i32) -> StoreError {
    match err.code() {
        Some(code) if *code == SqlState::UNIQUE_VIOLATION => {
            StoreError::Constraint(format!("{}: duplicate key", context()))
        }
        Some(code) if *code == SqlState::CHECK_VIOLATION => {
            StoreError::Constraint(format!("{}: check constraint failed", context()))
        }
        Some(code) if *code == SqlState::FOREIGN_KEY_VIOLATION => StoreError::Referential(id),
        _ => StoreError::Database(err),
    }
}

fn duplicate_observation(obs: &Observation) -> StoreError {
    StoreError::Constraint(format!(
        "observation ({}, {}): duplicate key",
        obs.id, obs.time
    ))
}

/// Runs one observation insert under `policy`.
fn write_observation<C: GenericClient>(
    client: &mut C,
    statement: &postgres::Statement,
    policy: DuplicatePolicy,
    obs: &Observation,
) -> Result<(), StoreError> {
    let written = client.execute(statement, &observation_params(obs)).map_err(|e| {
        classify_write_error(e, || format!("observation ({}, {})", obs.id, obs.time), obs.id)
    })?;
    if written == 0 && policy == DuplicatePolicy::Reject {
        return Err(duplicate_observation(obs));
    }
    Ok(())
}

fn observation_params(obs: &Observation) -> [&(dyn ToSql + Sync); 9] {
    let f = &obs.fields;
    [
        &obs.id,
        &obs.time,
        &f.temp,
        &f.humidity,
        &f.clouds,
        &f.rain,
        &f.wind,
        &f.wind_dir,
        &f.gusts,
    ]
}

fn row_to_grid_point(row: &Row) -> GridPoint {
    GridPoint {
        id: row.get("id"),
        lat: row.get("lat"),
        lon: row.get("lon"),
    }
}

fn row_to_observation(row: &Row) -> Observation {
    Observation {
        id: row.get("id"),
        time: row.get("time"),
        fields: WeatherFields {
            temp: row.get("temp"),
            humidity: row.get("humidity"),
            clouds: row.get("clouds"),
            rain: row.get("rain"),
            wind: row.get("wind"),
            wind_dir: row.get("wind_dir"),
            gusts: row.get("gusts"),
        },
    }
}

/// Returns the first id in `ids` that has no row in `coords`.
fn first_unknown_id<C: GenericClient>(client: &mut C, ids: &[i32]) -> Result<Option<i32>, StoreError> {
    let unique: Vec<i32> = ids.iter().copied().collect::<HashSet<_>>().into_iter().collect();
    let rows = client.query("SELECT id FROM coords WHERE id = ANY($1)", &[&unique])?;
    let known: HashSet<i32> = rows.iter().map(|r| r.get(0)).collect();
    Ok(ids.iter().copied().find(|id| !known.contains(id)))
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct Store {
    client: Option<Client>,
    duplicates: DuplicatePolicy,
}

impl Store {
    /// Opens a connection using the `[database]` section of the config.
    pub fn connect(config: &Config) -> Result<Self, StoreError> {
        debug!(target: DB, "Connecting to {}:{}/{}", config.database.host, config.database.port, config.database.name);
        let client = config.database.pg_config().connect(NoTls)?;
        Ok(Self::from_client(client, config.store.duplicates))
    }

    /// Wraps an already connected client (e.g. one built from `DATABASE_URL`).
    pub fn from_client(client: Client, duplicates: DuplicatePolicy) -> Self {
        Self {
            client: Some(client),
            duplicates,
        }
    }

    /// Connects, runs `f`, and closes the store whether `f` succeeded or not.
    pub fn scoped<T, E, F>(config: &Config, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Store) -> Result<T, E>,
        E: From<StoreError>,
    {
        Store::connect(config)?.run_scoped(f)
    }

    /// Runs `f` and then closes the store, whether `f` succeeded or not.
    ///
    /// An error from `f` takes precedence over an error from closing.
    pub fn run_scoped<T, E, F>(mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Store) -> Result<T, E>,
        E: From<StoreError>,
    {
        let result = f(&mut self);
        let closed = self.close();
        let value = result?;
        closed?;
        Ok(value)
    }

    fn client(&mut self) -> Result<&mut Client, StoreError> {
        self.client.as_mut().ok_or(StoreError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.client.is_none()
    }

    /// Creates the tables and indexes if they don't exist.
    ///
    /// Existing indexes are never dropped. The duplicate policy is enforced
    /// by the observation writes themselves, so a schema created under one
    /// policy works under the other.
    pub fn ensure_schema(&mut self) -> Result<(), StoreError> {
        let policy = self.duplicates;
        self.client()?.batch_execute(SCHEMA)?;
        debug!(target: DB, "Schema ready (duplicates: {:?})", policy);
        Ok(())
    }

    fn insert_data_sql(&self) -> &'static str {
        match self.duplicates {
            DuplicatePolicy::Keep => INSERT_DATA,
            DuplicatePolicy::Reject => INSERT_DATA_UNIQUE,
        }
    }

    // -----------------------------------------------------------------------
    // Grid points
    // -----------------------------------------------------------------------

    /// Inserts one grid point and commits.
    pub fn insert_grid_point(&mut self, point: GridPoint) -> Result<(), StoreError> {
        validate_grid_point(&point)?;
        let client = self.client()?;
        client
            .execute(INSERT_COORDS, &[&point.id, &point.lat, &point.lon])
            .map_err(|e| classify_write_error(e, || format!("grid point {}", point.id), point.id))?;
        debug!(target: DB, "Inserted grid point {} ({}, {})", point.id, point.lat, point.lon);
        Ok(())
    }

    /// Inserts all points in one transaction. Either every row is stored or
    /// none is.
    pub fn insert_grid_points(&mut self, points: &[GridPoint]) -> Result<(), StoreError> {
        validate_grid_batch(points)?;
        let client = self.client()?;
        let mut tx = client.transaction()?;
        {
            let stmt = tx.prepare(INSERT_COORDS)?;
            for point in points {
                tx.execute(&stmt, &[&point.id, &point.lat, &point.lon])
                    .map_err(|e| {
                        classify_write_error(e, || format!("grid point {}", point.id), point.id)
                    })?;
            }
        }
        tx.commit()?;
        info!(target: DB, "Inserted {} grid points", points.len());
        Ok(())
    }

    /// All grid points ordered by id, or the single point with `id`.
    /// An empty result is not an error.
    pub fn query_grid_points(&mut self, id: Option<i32>) -> Result<Vec<GridPoint>, StoreError> {
        let client = self.client()?;
        let rows = match id {
            Some(id) => client.query("SELECT id, lat, lon FROM coords WHERE id = $1", &[&id])?,
            None => client.query("SELECT id, lat, lon FROM coords ORDER BY id", &[])?,
        };
        Ok(rows.iter().map(row_to_grid_point).collect())
    }

    // -----------------------------------------------------------------------
    // Observations
    // -----------------------------------------------------------------------

    /// Inserts one observation and commits. Numeric fields are coerced first.
    /// Under `DuplicatePolicy::Reject` a second row for the same (id, time)
    /// fails with `StoreError::Constraint`.
    pub fn insert_observation(&mut self, obs: &Observation) -> Result<(), StoreError> {
        let obs = Observation {
            fields: coerce::fields(obs.fields),
            ..*obs
        };
        let policy = self.duplicates;
        let sql = self.insert_data_sql();
        let client = self.client()?;
        let stmt = client.prepare(sql)?;
        write_observation(client, &stmt, policy, &obs)?;
        debug!(target: DB, "Inserted observation for id {} at {}", obs.id, obs.time);
        Ok(())
    }

    /// Inserts all observations in one transaction. Every referenced grid id
    /// is checked before anything is staged. Under `DuplicatePolicy::Reject`
    /// a repeat (id, time), whether already stored or repeated within the
    /// batch, rolls the whole batch back.
    pub fn insert_observations(&mut self, observations: &[Observation]) -> Result<(), StoreError> {
        if observations.is_empty() {
            return Ok(());
        }
        let cleaned: Vec<Observation> = observations
            .iter()
            .map(|o| Observation {
                fields: coerce::fields(o.fields),
                ..*o
            })
            .collect();

        let policy = self.duplicates;
        let sql = self.insert_data_sql();
        let client = self.client()?;
        let mut tx = client.transaction()?;
        let ids: Vec<i32> = cleaned.iter().map(|o| o.id).collect();
        if let Some(unknown) = first_unknown_id(&mut tx, &ids)? {
            return Err(StoreError::Referential(unknown));
        }
        {
            let stmt = tx.prepare(sql)?;
            for obs in &cleaned {
                write_observation(&mut tx, &stmt, policy, obs)?;
            }
        }
        tx.commit()?;
        info!(target: DB, "Inserted {} observations", cleaned.len());
        Ok(())
    }

    /// Observations matching `filter`, ordered by time then id. Absent
    /// numeric values stay `None`.
    pub fn query_observations(&mut self, filter: &ObservationFilter) -> Result<Vec<Observation>, StoreError> {
        if filter.is_unfiltered() {
            warn!(target: DB, "Reading the whole data table, this might take a while");
        }
        let (clause, params) = filter.where_clause();
        let sql = format!("{}{} ORDER BY time, id", SELECT_DATA, clause);
        let client = self.client()?;
        let rows = client.query(sql.as_str(), &params)?;
        debug!(target: DB, "Fetched {} observations", rows.len());
        Ok(rows.iter().map(row_to_observation).collect())
    }

    /// First and last observation time stored for a grid point.
    pub fn observation_span(
        &mut self,
        id: i32,
    ) -> Result<Option<(NaiveDateTime, NaiveDateTime)>, StoreError> {
        let client = self.client()?;
        let row = client.query_one("SELECT MIN(time), MAX(time) FROM data WHERE id = $1", &[&id])?;
        let min: Option<NaiveDateTime> = row.get(0);
        let max: Option<NaiveDateTime> = row.get(1);
        Ok(min.zip(max))
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Releases the connection. Every write has already committed by the
    /// time it returned, so nothing is pending here.
    pub fn close(&mut self) -> Result<(), StoreError> {
        let client = self.client.take().ok_or(StoreError::Closed)?;
        client.close()?;
        debug!(target: DB, "Connection closed");
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.close() {
                warn!(target: DB, "Error closing connection on drop: {}", e);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_validate_grid_point_bounds_are_inclusive() {
        for (lat, lon) in [(90.0, 180.0), (-90.0, -180.0), (52.52, 13.40)] {
            assert!(validate_grid_point(&GridPoint { id: 1, lat, lon }).is_ok());
        }
    }

    #[test]
    fn test_validate_grid_point_rejects_out_of_range_and_nan() {
        for (lat, lon) in [(90.01, 0.0), (-91.0, 0.0), (0.0, 180.5), (0.0, -181.0), (f64::NAN, 0.0)] {
            let err = validate_grid_point(&GridPoint { id: 7, lat, lon }).unwrap_err();
            assert!(matches!(err, StoreError::Constraint(_)), "({}, {}) accepted", lat, lon);
        }
    }

    #[test]
    fn test_validate_grid_batch_rejects_repeated_ids() {
        let points = [
            GridPoint { id: 1, lat: 50.0, lon: 10.0 },
            GridPoint { id: 2, lat: 50.0, lon: 11.0 },
            GridPoint { id: 1, lat: 51.0, lon: 10.0 },
        ];
        assert!(matches!(validate_grid_batch(&points), Err(StoreError::Constraint(_))));
    }

    #[test]
    fn test_validate_grid_batch_fails_before_any_row_on_bad_latitude() {
        let points = [
            GridPoint { id: 1, lat: 50.0, lon: 10.0 },
            GridPoint { id: 2, lat: 95.0, lon: 11.0 },
        ];
        let err = validate_grid_batch(&points).unwrap_err();
        assert!(err.to_string().contains("latitude 95"));
    }

    #[test]
    fn test_filter_without_predicates_has_no_where_clause() {
        let filter = ObservationFilter::all();
        let (clause, params) = filter.where_clause();
        assert!(clause.is_empty());
        assert!(params.is_empty());
        assert!(ObservationFilter::all().is_unfiltered());
    }

    #[test]
    fn test_filter_numbers_parameters_in_order() {
        let filter = ObservationFilter::for_id(4).at(t(1, 12)).between(t(1, 0), t(2, 0));
        let (clause, params) = filter.where_clause();
        assert_eq!(
            clause,
            " WHERE id = $1 AND time = $2 AND time >= $3 AND time <= $4"
        );
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_filter_range_only() {
        let filter = ObservationFilter::all().between(t(1, 0), t(3, 0));
        let (clause, params) = filter.where_clause();
        assert_eq!(clause, " WHERE time >= $1 AND time <= $2");
        assert_eq!(params.len(), 2);
    }
}
