/// Runtime configuration.
///
/// Loaded once from a TOML file (default `wxgrid.toml`) and then passed by
/// reference to whatever needs it. Credentials may also come from the
/// environment (or a `.env` file) so they don't have to live in the file.
///
/// A missing or broken file is replaced by a placeholder and loading fails,
/// forcing the operator to fill in real values before anything runs.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "wxgrid.toml";

/// Default high quantile above which rain values are treated as sensor spikes.
pub const DEFAULT_RAIN_QUANTILE: f64 = 0.99999;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
}

impl DatabaseConfig {
    /// Connection parameters for `postgres`. Values are passed through as
    /// given, so passwords with spaces or quotes need no escaping.
    pub fn pg_config(&self) -> postgres::Config {
        let mut pg = postgres::Config::new();
        pg.host(&self.host)
            .port(self.port)
            .user(&self.user)
            .password(&self.password)
            .dbname(&self.name);
        pg
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    pub key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilesConfig {
    #[serde(default = "default_grid_file")]
    pub grid: PathBuf,
    #[serde(default = "default_station_file")]
    pub station_coords: PathBuf,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            grid: default_grid_file(),
            station_coords: default_station_file(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            timestamps: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_rain_quantile")]
    pub rain_quantile: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            rain_quantile: DEFAULT_RAIN_QUANTILE,
        }
    }
}

/// What to do with a second observation for an (id, time) pair that is
/// already stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Accept it; both rows persist.
    #[default]
    Keep,
    /// Refuse it with a constraint error.
    Reject,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub duplicates: DuplicatePolicy,
}

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl Config {
    /// The values written when no usable config exists. A config equal to
    /// these is never accepted.
    pub fn placeholder() -> Self {
        Self {
            database: DatabaseConfig {
                host: "localhost".to_string(),
                port: default_port(),
                user: "user".to_string(),
                password: "1234".to_string(),
                name: "database".to_string(),
            },
            api: ApiConfig {
                key: "1234abcd".to_string(),
                base_url: default_base_url(),
                timeout_secs: default_timeout_secs(),
            },
            files: FilesConfig::default(),
            logging: LoggingConfig::default(),
            analysis: AnalysisConfig::default(),
            store: StoreConfig::default(),
        }
    }

    /// Loads, overrides from the environment, and validates.
    ///
    /// If the file is missing or cannot be parsed, a placeholder file is
    /// written in its place and an error is returned.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(_) => {
                Self::write_placeholder(path)?;
                return Err(ConfigError::Missing(path.to_path_buf()));
            }
        };

        let mut config = match Self::parse(&text) {
            Ok(config) => config,
            Err(e) => {
                Self::write_placeholder(path)?;
                return Err(ConfigError::Malformed(path.to_path_buf(), e));
            }
        };

        config.apply_env_overrides();
        config.validate(path)?;
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    fn write_placeholder(path: &Path) -> Result<(), ConfigError> {
        let body = toml::to_string_pretty(&Self::placeholder())
            .map_err(|e| ConfigError::Write(path.to_path_buf(), std::io::Error::other(e)))?;
        fs::write(path, body).map_err(|e| ConfigError::Write(path.to_path_buf(), e))
    }

    /// Environment variables win over the file.
    pub fn apply_env_overrides(&mut self) {
        let overrides: [(&str, &mut String); 5] = [
            ("WXGRID_DB_HOST", &mut self.database.host),
            ("WXGRID_DB_USER", &mut self.database.user),
            ("WXGRID_DB_PASSWORD", &mut self.database.password),
            ("WXGRID_DB_NAME", &mut self.database.name),
            ("WXGRID_API_KEY", &mut self.api.key),
        ];
        for (var, slot) in overrides {
            if let Ok(value) = env::var(var) {
                if !value.is_empty() {
                    *slot = value;
                }
            }
        }
    }

    pub fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        let placeholder = Self::placeholder();
        if self.database == placeholder.database && self.api.key == placeholder.api.key {
            return Err(ConfigError::Placeholder(path.to_path_buf()));
        }

        let q = self.analysis.rain_quantile;
        if !(q > 0.0 && q <= 1.0) {
            return Err(ConfigError::Invalid {
                key: "analysis.rain_quantile",
                reason: format!("{} is not in (0, 1]", q),
            });
        }

        for (key, value) in [
            ("database.host", &self.database.host),
            ("database.user", &self.database.user),
            ("database.name", &self.database.name),
            ("api.key", &self.api.key),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn default_port() -> u16 {
    5432
}

fn default_base_url() -> String {
    "https://api.weatherapi.com/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_grid_file() -> PathBuf {
    PathBuf::from("grid.csv")
}

fn default_station_file() -> PathBuf {
    PathBuf::from("station_coords.csv")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rain_quantile() -> f64 {
    DEFAULT_RAIN_QUANTILE
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
