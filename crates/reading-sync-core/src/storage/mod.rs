//! Origin-wide shared key-value storage.
//!
//! Every tab of the same origin sees the same keys. Writes are unconditional
//! last-writer-wins overwrites; there is no compare-and-swap.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::{MemoryStorage, TabStorage};

use thiserror::Error;
use tokio::sync::broadcast;

use crate::TabId;

/// Change notification emitted after a key is written or removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    /// Key that changed.
    pub key: String,
    /// New value, `None` when the key was removed.
    pub new_value: Option<String>,
    /// Tab that made the change, when the backend knows it.
    ///
    /// Browsers never deliver a storage event to the tab that wrote the key;
    /// consumers use this to drop their own writes the same way.
    pub writer: Option<TabId>,
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage quota exceeded writing {0}")]
    QuotaExceeded(String),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Trait for shared storage backends.
pub trait SharedStorage: Send + Sync {
    /// Read a key.
    ///
    /// # Errors
    /// Returns error if the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Overwrite a key.
    ///
    /// # Errors
    /// Returns error if the write is rejected (quota, disabled storage).
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a key.
    ///
    /// # Errors
    /// Returns error if the backend cannot be written.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Subscribe to change events for all keys.
    fn subscribe(&self) -> broadcast::Receiver<StorageEvent>;
}
