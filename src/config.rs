use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "care-queue";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long a temporary claim lasts before the sweeper may release it.
pub const DEFAULT_CLAIM_DURATION_SECS: u64 = 15 * 60;

/// Service level for reviewing a submitted visit.
pub const DEFAULT_SERVICE_LEVEL_SECS: u64 = 24 * 60 * 60;

/// Sweeps run this many times per claim duration.
pub const SWEEPS_PER_CLAIM_DURATION: u64 = 5;

pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Largest duration, in seconds, that a chrono duration can hold.
pub const MAX_DURATION_SECS: u64 = i64::MAX as u64 / 1_000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Runtime settings for the claim queue, work queue and feed.
///
/// `provider_role_type_id` is the role-type id stored on assignment and
/// eligibility rows. It is injected here rather than looked up from a
/// process-wide mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub provider_role_type_id: i64,
    pub claim_duration_secs: u64,
    pub service_level_secs: u64,
    pub sweep_interval_secs: u64,
    pub action_url_scheme: String,
    pub busy_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            provider_role_type_id: 1,
            claim_duration_secs: DEFAULT_CLAIM_DURATION_SECS,
            service_level_secs: DEFAULT_SERVICE_LEVEL_SECS,
            sweep_interval_secs: DEFAULT_CLAIM_DURATION_SECS / SWEEPS_PER_CLAIM_DURATION,
            action_url_scheme: "carequeue".into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl QueueConfig {
    /// Load from a JSON file; absent fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.claim_duration_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "claim_duration_secs",
                reason: "must be greater than zero".into(),
            });
        }
        for (field, secs) in [
            ("claim_duration_secs", self.claim_duration_secs),
            ("service_level_secs", self.service_level_secs),
        ] {
            if secs > MAX_DURATION_SECS {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be at most {MAX_DURATION_SECS}"),
                });
            }
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "sweep_interval_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if self.action_url_scheme.is_empty() {
            return Err(ConfigError::Invalid {
                field: "action_url_scheme",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Out-of-range values saturate; `validate` rejects them.
    pub fn claim_duration(&self) -> chrono::Duration {
        duration_from_secs(self.claim_duration_secs)
    }

    pub fn service_level(&self) -> chrono::Duration {
        duration_from_secs(self.service_level_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn duration_from_secs(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

/// Get the application data directory (~/.local/share/care-queue on Linux)
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Default location of the queue database
pub fn default_database_path() -> PathBuf {
    app_data_dir().join("queue.db")
}

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "care_queue=info,warn"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_sweep_five_times_per_claim() {
        let config = QueueConfig::default();
        assert_eq!(config.claim_duration_secs, 900);
        assert_eq!(config.sweep_interval_secs, 180);
        assert_eq!(config.service_level(), chrono::Duration::hours(24));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, r#"{{"provider_role_type_id": 4, "claim_duration_secs": 300}}"#).unwrap();

        let config = QueueConfig::from_json_file(&path).unwrap();
        assert_eq!(config.provider_role_type_id, 4);
        assert_eq!(config.claim_duration(), chrono::Duration::minutes(5));
        assert_eq!(config.action_url_scheme, "carequeue");
    }

    #[test]
    fn zero_claim_duration_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        std::fs::write(&path, r#"{"claim_duration_secs": 0}"#).unwrap();

        let err = QueueConfig::from_json_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "claim_duration_secs", .. }));
    }

    #[test]
    fn oversized_durations_rejected() {
        let config = QueueConfig {
            claim_duration_secs: u64::MAX,
            ..QueueConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "claim_duration_secs", .. }));
        assert_eq!(config.claim_duration(), chrono::Duration::MAX);

        let config = QueueConfig {
            service_level_secs: 10_000_000_000_000_000,
            ..QueueConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "service_level_secs", .. }));
        assert_eq!(config.service_level(), chrono::Duration::MAX);

        let config = QueueConfig {
            claim_duration_secs: MAX_DURATION_SECS,
            ..QueueConfig::default()
        };
        assert!(config.validate().is_ok());
        assert!(config.claim_duration() > chrono::Duration::zero());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = QueueConfig::from_json_file(Path::new("/nonexistent/queue.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn database_path_under_app_data() {
        let db = default_database_path();
        assert!(db.starts_with(app_data_dir()));
        assert!(db.ends_with("queue.db"));
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.1.0");
    }
}
