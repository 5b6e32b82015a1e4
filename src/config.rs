use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_POLL_SECS: u64 = 15;

/// Process configuration loaded from environment variables.
///
/// User-editable settings (cloud sync, credentials) are not here; they live
/// in the local store.
pub struct Config {
    pub data_dir: PathBuf,
    pub connectivity_poll: Duration,
    pub sentry_dsn: Option<String>,
    pub environment: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_raw_values(
            std::env::var("PROMPTKEEP_DATA_DIR").ok().as_deref(),
            std::env::var("PROMPTKEEP_CONNECTIVITY_POLL_SECS").ok().as_deref(),
            std::env::var("SENTRY_DSN").ok().as_deref(),
            std::env::var("ENVIRONMENT").ok().as_deref(),
        )
    }

    /// Build a Config from raw string values (as they would come from env vars).
    /// Used directly in tests to avoid mutating process-global environment.
    pub fn from_raw_values(
        data_dir: Option<&str>,
        poll_secs: Option<&str>,
        sentry_dsn: Option<&str>,
        environment: Option<&str>,
    ) -> Self {
        let data_dir = data_dir
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let poll_secs = poll_secs
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_POLL_SECS);

        let sentry_dsn = sentry_dsn.filter(|s| !s.is_empty()).map(String::from);

        let environment = environment
            .filter(|s| !s.is_empty())
            .map(String::from)
            .unwrap_or_else(|| "local".to_string());

        Config {
            data_dir,
            connectivity_poll: Duration::from_secs(poll_secs),
            sentry_dsn,
            environment,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".promptkeep")
}
