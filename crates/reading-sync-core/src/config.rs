//! Coordination configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("{name} ({value} ms) must be shorter than the lock TTL ({ttl} ms)")]
    NotBelowTtl {
        name: &'static str,
        value: u64,
        ttl: u64,
    },
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Keys, lease timing and tick intervals shared by every tab.
///
/// All tabs of one origin must agree on the key and channel names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Storage key holding the controller lease.
    pub lock_key: String,
    /// Lease lifetime.
    pub lock_ttl_ms: u64,
    /// How often the controller renews its lease.
    pub heartbeat_interval_ms: u64,
    /// How often every tab re-reads the lease.
    pub check_interval_ms: u64,
    /// Elapsed-time refresh period while a session is active.
    pub tick_interval_ms: u64,
    /// Broadcast topic for session change notifications.
    pub channel_name: String,
    /// Prefix of the per-session pause hint keys.
    pub pause_hint_prefix: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lock_key: "reading_session_controller_lock".to_string(),
            lock_ttl_ms: 5_000,
            heartbeat_interval_ms: 2_000,
            check_interval_ms: 1_000,
            tick_interval_ms: 1_000,
            channel_name: "reading_session_sync".to_string(),
            pause_hint_prefix: "reading_session_pause_".to_string(),
        }
    }
}

impl SyncConfig {
    /// Parse from JSON; missing fields take their defaults.
    ///
    /// # Errors
    /// Returns error if the JSON is malformed or the result fails validation.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check timing invariants.
    ///
    /// The heartbeat and check intervals must both be shorter than the TTL,
    /// otherwise a live controller would lose its lease between renewals.
    ///
    /// # Errors
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_key.is_empty() {
            return Err(ConfigError::Empty("lockKey"));
        }
        if self.channel_name.is_empty() {
            return Err(ConfigError::Empty("channelName"));
        }
        for (name, value) in [
            ("lockTtlMs", self.lock_ttl_ms),
            ("heartbeatIntervalMs", self.heartbeat_interval_ms),
            ("checkIntervalMs", self.check_interval_ms),
            ("tickIntervalMs", self.tick_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        for (name, value) in [
            ("heartbeatIntervalMs", self.heartbeat_interval_ms),
            ("checkIntervalMs", self.check_interval_ms),
        ] {
            if value >= self.lock_ttl_ms {
                return Err(ConfigError::NotBelowTtl {
                    name,
                    value,
                    ttl: self.lock_ttl_ms,
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub const fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    #[must_use]
    pub const fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Storage key of the pause hint for one session.
    #[must_use]
    pub fn pause_hint_key(&self, session_id: i64) -> String {
        format!("{}{session_id}", self.pause_hint_prefix)
    }
}
