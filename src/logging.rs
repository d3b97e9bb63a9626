/// Structured logging for the grid weather logger
///
/// Installs a `log` backend that tags each entry with its data source and
/// severity, writes to the console, and optionally appends timestamped
/// entries to a file for unattended batch runs. Modules log through the
/// usual `log::{debug, info, warn, error}` macros, using one of the
/// `DataSource` targets below.

use chrono::Utc;
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Data Source Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Api,
    Database,
    Files,
    Analysis,
    System,
}

impl DataSource {
    /// The `log` target used for entries from this source.
    pub const fn target(self) -> &'static str {
        match self {
            DataSource::Api => "wxgrid::api",
            DataSource::Database => "wxgrid::db",
            DataSource::Files => "wxgrid::files",
            DataSource::Analysis => "wxgrid::analysis",
            DataSource::System => "wxgrid::sys",
        }
    }

    fn from_target(target: &str) -> Option<Self> {
        [
            DataSource::Api,
            DataSource::Database,
            DataSource::Files,
            DataSource::Analysis,
            DataSource::System,
        ]
        .into_iter()
        .find(|s| s.target() == target)
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Api => write!(f, "API"),
            DataSource::Database => write!(f, "DB"),
            DataSource::Files => write!(f, "FILES"),
            DataSource::Analysis => write!(f, "ANALYSIS"),
            DataSource::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - the provider has no data for this point right now
    Expected,
    /// Unexpected failure - indicates service degradation or configuration issue
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger
// ---------------------------------------------------------------------------

pub struct Logger {
    /// Minimum level to display
    min_level: LevelFilter,
    /// Optional file path for logging
    log_file: Option<PathBuf>,
    /// Whether to include timestamps in console output
    console_timestamps: bool,
    /// Serializes appends to the log file
    file_lock: Mutex<()>,
}

impl Logger {
    pub fn new(min_level: LevelFilter, log_file: Option<PathBuf>, console_timestamps: bool) -> Self {
        Self {
            min_level,
            log_file,
            console_timestamps,
            file_lock: Mutex::new(()),
        }
    }

    /// Formats the line written to the log file.
    fn file_entry(level: Level, source: &str, message: &fmt::Arguments<'_>) -> String {
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        format!("{} {:<5} {}: {}", timestamp, level, source, message)
    }

    fn source_label(target: &str) -> String {
        DataSource::from_target(target)
            .map(|s| s.to_string())
            .unwrap_or_else(|| target.to_string())
    }

    fn append_to_file(&self, path: &Path, entry: &str) -> std::io::Result<()> {
        let _guard = self.file_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", entry)
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.min_level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let level = record.level();
        let source = Self::source_label(record.target());
        let message = record.args();
        let entry = Self::file_entry(level, &source, message);

        if self.console_timestamps {
            match level {
                Level::Error => eprintln!("{}", entry),
                Level::Warn => eprintln!("   {}", entry),
                Level::Info => println!("   {}", message),
                Level::Debug | Level::Trace => println!("   [DEBUG] {}", message),
            }
        } else {
            match level {
                Level::Error => eprintln!("   ✗ {}: {}", source, message),
                Level::Warn => eprintln!("   ⚠ {}: {}", source, message),
                Level::Info => println!("   {}", message),
                Level::Debug | Level::Trace => {} // Skip debug in non-timestamp mode
            }
        }

        if let Some(ref path) = self.log_file {
            if let Err(e) = self.append_to_file(path, &entry) {
                eprintln!("Failed to write to log file {}: {}", path.display(), e);
            }
        }
    }

    fn flush(&self) {}
}

/// Parses a level name from config ("debug", "info", "warn", "error").
/// Unknown names fall back to `Info`.
pub fn parse_level(name: &str) -> LevelFilter {
    name.trim().parse().unwrap_or(LevelFilter::Info)
}

/// Installs the global logger. Fails if a logger is already installed.
pub fn init_logger(
    min_level: LevelFilter,
    log_file: Option<&Path>,
    console_timestamps: bool,
) -> Result<(), SetLoggerError> {
    let logger = Logger::new(min_level, log_file.map(Path::to_path_buf), console_timestamps);
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(min_level);
    Ok(())
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Classify a per-point weather API failure from its error text.
pub fn classify_api_failure(error_message: &str) -> FailureType {
    let msg = error_message.to_ascii_lowercase();
    // The provider answers 400 when it has no location match for a point
    if msg.contains("http 400") || msg.contains("no matching location") {
        FailureType::Expected
    } else if msg.contains("http") || msg.contains("timed out") || msg.contains("request") {
        FailureType::Unexpected
    } else if msg.contains("could not be used") {
        FailureType::Unexpected
    } else {
        FailureType::Unknown
    }
}

/// Renders an error with its whole source chain on one line.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a per-grid-point failure with automatic classification.
pub fn log_point_failure(source: DataSource, point_id: i32, operation: &str, err: &dyn std::error::Error) {
    let error_msg = error_chain(err);
    let failure_type = classify_api_failure(&error_msg);

    let message = format!(
        "[id {}] {} failed [{}]: {}",
        point_id, operation, failure_type, error_msg
    );

    log::log!(target: source.target(), failure_level(failure_type), "{}", message);
}

/// Expected failures still name the point, so they stay visible at the
/// default `info` level.
fn failure_level(failure_type: FailureType) -> Level {
    match failure_type {
        FailureType::Expected => Level::Info,
        FailureType::Unexpected => Level::Error,
        FailureType::Unknown => Level::Warn,
    }
}

// ---------------------------------------------------------------------------
// Batch Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of a per-point batch run, naming the points that failed.
pub fn log_batch_summary(source: DataSource, total: usize, successful: usize, failed_ids: &[i32]) {
    let message = batch_summary_message(total, successful, failed_ids);

    if failed_ids.is_empty() {
        log::info!(target: source.target(), "{}", message);
    } else if successful == 0 {
        log::error!(target: source.target(), "{}", message);
    } else {
        log::warn!(target: source.target(), "{}", message);
    }
}

fn batch_summary_message(total: usize, successful: usize, failed_ids: &[i32]) -> String {
    let mut message = format!(
        "Batch complete: {}/{} successful, {} failed",
        successful,
        total,
        failed_ids.len()
    );
    if !failed_ids.is_empty() {
        message.push_str(&format!(" (ids {:?})", failed_ids));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing() {
        assert_eq!(parse_level("debug"), LevelFilter::Debug);
        assert_eq!(parse_level("WARN"), LevelFilter::Warn);
        assert_eq!(parse_level("nonsense"), LevelFilter::Info);
    }

    #[test]
    fn test_failure_classification() {
        assert_eq!(
            classify_api_failure("weather API returned HTTP 400"),
            FailureType::Expected
        );
        assert_eq!(
            classify_api_failure("weather API returned HTTP 503"),
            FailureType::Unexpected
        );
        assert_eq!(
            classify_api_failure("weather API response could not be used: missing 'current'"),
            FailureType::Unexpected
        );
        assert_eq!(classify_api_failure("something odd"), FailureType::Unknown);
    }

    #[test]
    fn test_expected_failures_are_logged_at_info() {
        assert_eq!(failure_level(FailureType::Expected), Level::Info);
        assert!(failure_level(FailureType::Expected) <= LevelFilter::Info);
        assert_eq!(failure_level(FailureType::Unexpected), Level::Error);
        assert_eq!(failure_level(FailureType::Unknown), Level::Warn);
    }

    #[test]
    fn test_batch_summary_names_failed_ids() {
        assert_eq!(
            batch_summary_message(3, 1, &[4, 17]),
            "Batch complete: 1/3 successful, 2 failed (ids [4, 17])"
        );
        assert_eq!(
            batch_summary_message(2, 2, &[]),
            "Batch complete: 2/2 successful, 0 failed"
        );
    }

    #[test]
    fn test_source_label_round_trips_targets() {
        assert_eq!(Logger::source_label(DataSource::Database.target()), "DB");
        assert_eq!(Logger::source_label("some::other"), "some::other");
    }

    #[test]
    fn test_logger_appends_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wxgrid.log");
        let logger = Logger::new(LevelFilter::Info, Some(path.clone()), false);

        logger.log(
            &Record::builder()
                .args(format_args!("stored 12 rows"))
                .level(Level::Info)
                .target(DataSource::Database.target())
                .build(),
        );
        logger.log(
            &Record::builder()
                .args(format_args!("hidden"))
                .level(Level::Debug)
                .target(DataSource::Database.target())
                .build(),
        );

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("INFO  DB: stored 12 rows"));
    }
}
