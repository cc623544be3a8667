//! Configuration for the session repository.

use std::time::Duration;

use crate::store::{CreatePolicy, ReadOptions};

/// Default namespace sessions are stored under.
pub const DEFAULT_CACHE_NAME: &str = "SessionRepo";

/// Default inactivity timeout for new sessions (30 minutes).
pub const DEFAULT_MAX_INACTIVE_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Sessions are locked on read unless configured otherwise.
pub const DEFAULT_USE_LOCKING: bool = true;

/// Default wait between reads while a replica pull is in flight.
pub const DEFAULT_REMOTE_READ_PENDING_INTERVAL: Duration = Duration::from_millis(10);

/// Default number of pending replica reads tolerated before giving up.
pub const DEFAULT_REMOTE_READ_PENDING_RETRIES: u32 = 2400;

/// Default wait before retrying an access that hit a lock held elsewhere.
pub const DEFAULT_LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration for a [`SessionRepository`](crate::SessionRepository).
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Namespace (named cache) holding the sessions.
    pub cache_name: String,

    /// Inactivity timeout given to sessions created by the repository.
    pub max_inactive_interval: Duration,

    /// Whether reads take an exclusive lock that the next save releases.
    ///
    /// Without locking, concurrent writers are last-write-wins.
    pub use_locking: bool,

    /// Remote replica store to pull from and notify on update.
    pub remote_store_name: Option<String>,

    /// Wait between reads while the entry is being pulled from a replica.
    pub remote_read_pending_interval: Duration,

    /// Pending reads tolerated before the read is treated as timed out.
    pub remote_read_pending_retries: u32,

    /// Wait before retrying a read or update that found the entry locked.
    pub lock_retry_interval: Duration,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            max_inactive_interval: DEFAULT_MAX_INACTIVE_INTERVAL,
            use_locking: DEFAULT_USE_LOCKING,
            remote_store_name: None,
            remote_read_pending_interval: DEFAULT_REMOTE_READ_PENDING_INTERVAL,
            remote_read_pending_retries: DEFAULT_REMOTE_READ_PENDING_RETRIES,
            lock_retry_interval: DEFAULT_LOCK_RETRY_INTERVAL,
        }
    }
}

impl RepositoryConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the namespace name.
    pub fn with_cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = name.into();
        self
    }

    /// Set the inactivity timeout for new sessions.
    pub fn with_max_inactive_interval(mut self, interval: Duration) -> Self {
        self.max_inactive_interval = interval;
        self
    }

    /// Enable or disable locking on read.
    pub fn with_locking(mut self, enabled: bool) -> Self {
        self.use_locking = enabled;
        self
    }

    /// Configure a remote replica store.
    pub fn with_remote_store(mut self, name: impl Into<String>) -> Self {
        self.remote_store_name = Some(name.into());
        self
    }

    /// Set the pending-read retry interval and ceiling.
    pub fn with_remote_read_pending(mut self, interval: Duration, retries: u32) -> Self {
        self.remote_read_pending_interval = interval;
        self.remote_read_pending_retries = retries;
        self
    }

    /// Set the wait used when an entry is locked by someone else.
    pub fn with_lock_retry_interval(mut self, interval: Duration) -> Self {
        self.lock_retry_interval = interval;
        self
    }

    /// Options for every session read issued by the repository.
    pub fn read_options(&self) -> ReadOptions {
        ReadOptions {
            object_may_not_exist: true,
            return_cached_if_valid: true,
            read_remote: self.remote_store_name.is_some(),
            lock: self.use_locking,
        }
    }

    /// Creation policy for an entry with the given inactivity timeout.
    pub fn create_policy(&self, ttl: Duration) -> CreatePolicy {
        CreatePolicy {
            ttl,
            notify_replica_on_update: self.remote_store_name.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RepositoryConfig::new();
        assert_eq!(config.cache_name, "SessionRepo");
        assert_eq!(config.max_inactive_interval, Duration::from_secs(1800));
        assert!(config.use_locking);
        assert!(config.remote_store_name.is_none());
        assert_eq!(config.remote_read_pending_retries, 2400);
    }

    #[test]
    fn test_read_options_follow_config() {
        let opts = RepositoryConfig::new().read_options();
        assert!(opts.object_may_not_exist);
        assert!(opts.return_cached_if_valid);
        assert!(opts.lock);
        assert!(!opts.read_remote);

        let opts = RepositoryConfig::new()
            .with_locking(false)
            .with_remote_store("west")
            .read_options();
        assert!(!opts.lock);
        assert!(opts.read_remote);
    }

    #[test]
    fn test_create_policy_notifies_replica_only_when_configured() {
        let ttl = Duration::from_secs(300);
        let policy = RepositoryConfig::new().create_policy(ttl);
        assert_eq!(policy.ttl, ttl);
        assert!(!policy.notify_replica_on_update);

        let policy = RepositoryConfig::new()
            .with_remote_store("west")
            .create_policy(ttl);
        assert!(policy.notify_replica_on_update);
    }
}
