//! Same-device pause snapshot.
//!
//! A best-effort hint written when a session is paused. It keeps the exact
//! time the controller displayed at that moment, keyed by session id, so a
//! tab that already knows the session id can draw the frozen time while its
//! first fetch is still in flight. Never authoritative.

use std::sync::Arc;

use reading_sync_core::{SessionId, SharedStorage, SyncConfig};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Persisted pause snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseSnapshot {
    pub is_paused: bool,
    /// When the pause happened, RFC 3339.
    pub paused_at: String,
    /// Formatted elapsed time at the moment of pausing.
    pub frozen_time: String,
}

/// Reads and writes pause snapshots, one key per session.
pub struct PauseHintStore {
    storage: Arc<dyn SharedStorage>,
    config: SyncConfig,
}

impl PauseHintStore {
    #[must_use]
    pub fn new(storage: Arc<dyn SharedStorage>, config: &SyncConfig) -> Self {
        Self {
            storage,
            config: config.clone(),
        }
    }

    /// Store the snapshot for `session_id`. Failures are logged and dropped.
    pub fn save(&self, session_id: SessionId, snapshot: &PauseSnapshot) {
        let key = self.config.pause_hint_key(session_id);
        let result = serde_json::to_string(snapshot)
            .map_err(|e| e.to_string())
            .and_then(|raw| self.storage.set(&key, &raw).map_err(|e| e.to_string()));
        if let Err(e) = result {
            warn!(key, "failed to save pause hint: {e}");
        }
    }

    /// Read the snapshot for `session_id`; missing or unreadable hints are `None`.
    #[must_use]
    pub fn load(&self, session_id: SessionId) -> Option<PauseSnapshot> {
        let raw = self
            .storage
            .get(&self.config.pause_hint_key(session_id))
            .ok()
            .flatten()?;
        serde_json::from_str(&raw).ok()
    }

    pub fn clear(&self, session_id: SessionId) {
        let key = self.config.pause_hint_key(session_id);
        if let Err(e) = self.storage.remove(&key) {
            warn!(key, "failed to clear pause hint: {e}");
        }
    }
}
