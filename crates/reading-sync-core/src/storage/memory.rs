//! In-memory shared storage.

use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::sync::broadcast;

use super::{SharedStorage, StorageError, StorageEvent};
use crate::TabId;

/// In-memory storage implementation.
///
/// One instance shared behind an `Arc` stands in for the storage of a single
/// origin. Writes made directly on it carry no writer; simulated tabs should
/// go through [`MemoryStorage::for_tab`] so their events are attributed.
/// Data is lost on restart.
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
    read_only: AtomicBool,
}

impl MemoryStorage {
    /// Create a new in-memory storage.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            entries: RwLock::new(HashMap::new()),
            events,
            read_only: AtomicBool::new(false),
        }
    }

    /// Reject every subsequent write, as a full or disabled store would.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    fn check_writable(&self, key: &str) -> Result<(), StorageError> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StorageError::QuotaExceeded(key.to_string()));
        }
        Ok(())
    }

    /// A view of this store that writes on behalf of `tab`.
    #[must_use]
    pub fn for_tab(self: &Arc<Self>, tab: TabId) -> TabStorage {
        TabStorage {
            shared: Arc::clone(self),
            tab,
        }
    }

    fn notify(&self, key: &str, new_value: Option<String>, writer: Option<&TabId>) {
        // No subscribers is fine.
        let _ = self.events.send(StorageEvent {
            key: key.to_string(),
            new_value,
            writer: writer.cloned(),
        });
    }

    fn write(&self, key: &str, value: &str, writer: Option<&TabId>) -> Result<(), StorageError> {
        self.check_writable(key)?;
        self.entries
            .write()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?
            .insert(key.to_string(), value.to_string());
        self.notify(key, Some(value.to_string()), writer);
        Ok(())
    }

    fn delete(&self, key: &str, writer: Option<&TabId>) -> Result<(), StorageError> {
        self.check_writable(key)?;
        let removed = self
            .entries
            .write()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?
            .remove(key);
        if removed.is_some() {
            self.notify(key, None, writer);
        }
        Ok(())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .entries
            .read()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.write(key, value, None)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.delete(key, None)
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}

/// One tab's handle on a shared [`MemoryStorage`].
///
/// Reads and subscriptions see the whole origin; writes are tagged with the
/// tab so it can recognise its own events.
#[derive(Clone)]
pub struct TabStorage {
    shared: Arc<MemoryStorage>,
    tab: TabId,
}

impl TabStorage {
    #[must_use]
    pub const fn tab(&self) -> &TabId {
        &self.tab
    }
}

impl SharedStorage for TabStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.shared.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.shared.write(key, value, Some(&self.tab))
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.shared.delete(key, Some(&self.tab))
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.shared.subscribe()
    }
}
