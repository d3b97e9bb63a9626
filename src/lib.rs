//! Grid weather logger.
//!
//! Logs periodic weather observations for a fixed lattice of coordinates
//! into PostgreSQL and answers "what has the weather been like here?" by
//! resolving an arbitrary coordinate to its grid point and summarizing the
//! stored series.
//!
//! - `db`: observation store (grid points and observations).
//! - `resolver`: per-axis nearest grid point lookup.
//! - `analysis`: calendar resampling and spike filtering.
//! - `ingest`: weather API client and batch collection.
//! - `grid`, `stations`: lattice and station coordinate files.
//! - `lookup`: resolver + store + analysis for one query point.

pub mod analysis;
pub mod coerce;
pub mod config;
pub mod db;
pub mod error;
pub mod grid;
pub mod ingest;
pub mod logging;
pub mod lookup;
pub mod model;
pub mod resolver;
pub mod stations;
