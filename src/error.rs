use std::path::PathBuf;

use thiserror::Error;

/// Failures of the observation store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Bad coordinate range, duplicate grid id, or (with the `reject`
    /// duplicate policy) a repeated (id, time) observation.
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// An observation referenced a grid id that does not exist.
    #[error("observation references unknown grid point id {0}")]
    Referential(i32),

    #[error("store is closed")]
    Closed,

    #[error("database error")]
    Database(#[from] postgres::Error),
}

/// Failures reading the grid and station coordinate files.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("required input file '{0}' not found")]
    MissingInput(PathBuf),

    #[error("failed to read '{0}'")]
    Csv(PathBuf, #[source] csv::Error),

    #[error("'{path}' line {line}: {reason}")]
    InvalidRow {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    #[error("failed to write '{0}'")]
    Write(PathBuf, #[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file '{0}' was missing or unreadable; a placeholder was written, edit it and retry")]
    Missing(PathBuf),

    #[error("config file '{0}' could not be parsed; a placeholder was written, edit it and retry")]
    Malformed(PathBuf, #[source] toml::de::Error),

    #[error("config file '{0}' still contains placeholder credentials")]
    Placeholder(PathBuf),

    #[error("invalid config value for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("failed to write config file '{0}'")]
    Write(PathBuf, #[source] std::io::Error),
}

/// Failures talking to the weather API.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("request to weather API failed")]
    Http(#[from] reqwest::Error),

    #[error("weather API returned HTTP {0}")]
    Status(u16),

    #[error("weather API response could not be used: {0}")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
