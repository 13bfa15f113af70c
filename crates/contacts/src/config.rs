//! Application configuration loaded from environment variables.

use domain::SnapshotPolicy;

const DEFAULT_SNAPSHOT_EVERY: u64 = 50;

/// Output format of the log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Some(LogFormat::Text),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Runtime configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `DATABASE_URL`: PostgreSQL connection string; unset or empty selects the
///   in-memory store
/// - `SNAPSHOT_EVERY`: snapshot after this many events (default: `50`, `0`
///   disables snapshots)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub snapshot_every: u64,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            snapshot_every: lookup("SNAPSHOT_EVERY")
                .and_then(|n| n.trim().parse().ok())
                .unwrap_or(defaults.snapshot_every),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .and_then(|f| LogFormat::parse(&f))
                .unwrap_or(defaults.log_format),
        }
    }

    pub fn snapshot_policy(&self) -> SnapshotPolicy {
        SnapshotPolicy::every(self.snapshot_every)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            snapshot_every: DEFAULT_SNAPSHOT_EVERY,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}
