//! The persisted lease.

use reading_sync_core::{SharedStorage, TabId};
use serde::{Deserialize, Serialize};

/// The controller lease, stored as JSON under the lock key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    /// Tab holding the lease.
    pub controller_id: TabId,
    /// Epoch milliseconds after which the lease is void.
    pub expires_at: i64,
}

impl LockRecord {
    /// A lease for `holder` valid for `ttl_ms` from `now_ms`.
    #[must_use]
    pub const fn new(holder: TabId, now_ms: i64, ttl_ms: i64) -> Self {
        Self {
            controller_id: holder,
            expires_at: now_ms.saturating_add(ttl_ms),
        }
    }

    /// Whether the lease has lapsed as seen from `now_ms`.
    #[must_use]
    pub const fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at <= now_ms
    }

    #[must_use]
    pub fn is_held_by(&self, tab: &TabId) -> bool {
        &self.controller_id == tab
    }
}

/// Outcome of reading the lock key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseRead {
    /// Nothing stored.
    Absent,
    /// Something stored that is not a lease, or the read itself failed.
    Corrupt,
    /// A decoded lease, expired or not.
    Present(LockRecord),
}

impl LeaseRead {
    /// Read and decode the lease. Never fails; problems collapse into `Corrupt`.
    pub fn load(storage: &dyn SharedStorage, key: &str) -> Self {
        match storage.get(key) {
            Ok(None) => Self::Absent,
            Ok(Some(raw)) => Self::decode(&raw),
            Err(e) => {
                tracing::warn!(key, "failed to read lease: {e}");
                Self::Corrupt
            }
        }
    }

    #[must_use]
    pub fn decode(raw: &str) -> Self {
        serde_json::from_str(raw).map_or(Self::Corrupt, Self::Present)
    }
}
