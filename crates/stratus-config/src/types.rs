//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [session]                # repository settings
//! [logging]                # console filter
//! [logging.file]           # rolling JSON log file
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stratus_session::{
    DEFAULT_CACHE_NAME, DEFAULT_LOCK_RETRY_INTERVAL, DEFAULT_MAX_INACTIVE_INTERVAL,
    DEFAULT_REMOTE_READ_PENDING_INTERVAL, DEFAULT_REMOTE_READ_PENDING_RETRIES, DEFAULT_USE_LOCKING,
    RepositoryConfig,
};

use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StratusConfig {
    /// Session repository configuration.
    pub session: Option<SessionConfig>,

    /// Log output configuration.
    pub logging: Option<LoggingConfig>,
}

impl StratusConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced whole, not field by field.
    pub fn merge(&mut self, other: StratusConfig) {
        if other.session.is_some() {
            self.session = other.session;
        }

        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// The `[session]` section, or its defaults when absent.
    pub fn session_or_default(&self) -> SessionConfig {
        self.session.clone().unwrap_or_default()
    }

    /// The `[logging]` section, or its defaults when absent.
    pub fn logging_or_default(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Build the repository configuration described by `[session]`.
    pub fn repository_config(&self) -> Result<RepositoryConfig> {
        self.session_or_default().to_repository_config()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Session repository configuration.
///
/// ```toml
/// [session]
/// cache_name = "SessionRepo"
/// max_inactive_interval_secs = 1800
/// use_locking = true
/// remote_store = "dc-west"
/// remote_read_pending_interval_ms = 10
/// remote_read_pending_retries = 2400
/// lock_retry_interval_ms = 10
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Store namespace holding the sessions.
    pub cache_name: String,
    /// Default inactivity timeout for new sessions, in seconds.
    pub max_inactive_interval_secs: u64,
    /// Lock entries on read so concurrent requests are serialized.
    pub use_locking: bool,
    /// Remote replica store to attach, if any.
    pub remote_store: Option<String>,
    /// Wait between reads while a replica pull is pending, in milliseconds.
    pub remote_read_pending_interval_ms: u64,
    /// Pending reads tolerated before a read gives up.
    pub remote_read_pending_retries: u32,
    /// Wait between attempts on a locked entry, in milliseconds.
    pub lock_retry_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            max_inactive_interval_secs: DEFAULT_MAX_INACTIVE_INTERVAL.as_secs(),
            use_locking: DEFAULT_USE_LOCKING,
            remote_store: None,
            remote_read_pending_interval_ms: DEFAULT_REMOTE_READ_PENDING_INTERVAL.as_millis()
                as u64,
            remote_read_pending_retries: DEFAULT_REMOTE_READ_PENDING_RETRIES,
            lock_retry_interval_ms: DEFAULT_LOCK_RETRY_INTERVAL.as_millis() as u64,
        }
    }
}

impl SessionConfig {
    pub fn max_inactive_interval(&self) -> Duration {
        Duration::from_secs(self.max_inactive_interval_secs)
    }

    pub fn remote_read_pending_interval(&self) -> Duration {
        Duration::from_millis(self.remote_read_pending_interval_ms)
    }

    pub fn lock_retry_interval(&self) -> Duration {
        Duration::from_millis(self.lock_retry_interval_ms)
    }

    /// Check the values and convert into a [`RepositoryConfig`].
    pub fn to_repository_config(&self) -> Result<RepositoryConfig> {
        if self.cache_name.trim().is_empty() {
            return Err(invalid("session.cache_name", "must not be empty"));
        }
        if self.max_inactive_interval_secs == 0 {
            return Err(invalid(
                "session.max_inactive_interval_secs",
                "must be at least 1 second",
            ));
        }

        let mut config = RepositoryConfig::new()
            .with_cache_name(self.cache_name.clone())
            .with_max_inactive_interval(self.max_inactive_interval())
            .with_locking(self.use_locking)
            .with_remote_read_pending(
                self.remote_read_pending_interval(),
                self.remote_read_pending_retries,
            )
            .with_lock_retry_interval(self.lock_retry_interval());

        match self.remote_store.as_deref() {
            Some(name) if name.trim().is_empty() => {
                return Err(invalid("session.remote_store", "must not be empty when set"));
            }
            Some(name) => config = config.with_remote_store(name),
            None => {}
        }

        Ok(config)
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Console filter directive (e.g. `"info"`, `"stratus_session=debug"`).
    pub level: String,
    /// Rolling JSON log file settings.
    pub file: FileLogConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: FileLogConfig::default(),
        }
    }
}

/// Settings for the daily-rotated JSON log file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLogConfig {
    /// Whether file logging is enabled.
    pub enabled: bool,
    /// Directory for log files. Defaults to `logs/` under the config dir.
    pub path: Option<PathBuf>,
}

impl Default for FileLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config() {
        let config = StratusConfig::new();
        assert!(config.session.is_none());
        assert!(config.logging.is_none());
        assert_eq!(config.session_or_default(), SessionConfig::default());
    }

    #[test]
    fn test_defaults_match_repository_defaults() {
        let repo = StratusConfig::new().repository_config().unwrap();
        assert_eq!(repo.cache_name, "SessionRepo");
        assert_eq!(repo.max_inactive_interval, Duration::from_secs(1800));
        assert!(repo.use_locking);
        assert!(repo.remote_store_name.is_none());
        assert_eq!(repo.remote_read_pending_interval, Duration::from_millis(10));
        assert_eq!(repo.remote_read_pending_retries, 2400);
    }

    #[test]
    fn test_parse_session_section() {
        let toml = r#"
[session]
cache_name = "web"
max_inactive_interval_secs = 300
use_locking = false
remote_store = "dc-west"
remote_read_pending_retries = 5
"#;
        let config = StratusConfig::from_toml(toml).unwrap();
        let session = config.session.as_ref().unwrap();
        assert_eq!(session.cache_name, "web");
        // Unset fields keep their defaults.
        assert_eq!(session.remote_read_pending_interval_ms, 10);

        let repo = config.repository_config().unwrap();
        assert_eq!(repo.cache_name, "web");
        assert_eq!(repo.max_inactive_interval, Duration::from_secs(300));
        assert!(!repo.use_locking);
        assert_eq!(repo.remote_store_name.as_deref(), Some("dc-west"));
        assert_eq!(repo.remote_read_pending_retries, 5);
        assert!(repo.read_options().read_remote);
    }

    #[test]
    fn test_parse_logging_section() {
        let toml = r#"
[logging]
level = "debug"

[logging.file]
enabled = false
path = "/var/log/stratus"
"#;
        let config = StratusConfig::from_toml(toml).unwrap();
        let logging = config.logging_or_default();
        assert_eq!(logging.level, "debug");
        assert!(!logging.file.enabled);
        assert_eq!(logging.file.path, Some(PathBuf::from("/var/log/stratus")));
    }

    #[test]
    fn test_merge_replaces_sections() {
        let mut base = StratusConfig::from_toml(
            r#"
[session]
cache_name = "base"

[logging]
level = "warn"
"#,
        )
        .unwrap();
        let overlay = StratusConfig::from_toml(
            r#"
[session]
cache_name = "overlay"
"#,
        )
        .unwrap();

        base.merge(overlay);
        assert_eq!(base.session_or_default().cache_name, "overlay");
        assert_eq!(base.logging_or_default().level, "warn");
    }

    #[test]
    fn test_toml_roundtrip_keeps_values() {
        let mut config = StratusConfig::new();
        config.session = Some(SessionConfig {
            remote_store: Some("dc-east".to_string()),
            ..Default::default()
        });
        let text = config.to_toml().unwrap();
        assert!(text.contains("[session]"));
        assert_eq!(StratusConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let empty_name = SessionConfig {
            cache_name: "  ".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            empty_name.to_repository_config(),
            Err(ConfigError::Invalid { field, .. }) if field == "session.cache_name"
        ));

        let zero_timeout = SessionConfig {
            max_inactive_interval_secs: 0,
            ..Default::default()
        };
        assert!(zero_timeout.to_repository_config().is_err());

        let blank_remote = SessionConfig {
            remote_store: Some(String::new()),
            ..Default::default()
        };
        assert!(blank_remote.to_repository_config().is_err());
    }

    #[test]
    fn test_unknown_section_is_ignored() {
        let config = StratusConfig::from_toml("[server]\nport = 80\n").unwrap();
        assert_eq!(config, StratusConfig::new());
    }
}
