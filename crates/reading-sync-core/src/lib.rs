//! Core abstractions for cross-tab reading session coordination.
//!
//! This crate provides the fundamental building blocks:
//! - `TabId` - Per-context random identity
//! - `Clock` - Injectable wall clock (system or manual)
//! - `SharedStorage` - Origin-wide key-value store with change events
//! - `EventBus` - Broadcast channel plus storage-event fallback
//! - `SessionApi` - The server-side session collaborator
//! - `SyncConfig` - Keys, lease timing and tick intervals

pub mod bus;
pub mod clock;
pub mod config;
pub mod storage;
pub mod tab;
pub mod task;
pub mod traits;

pub use bus::{BroadcastHub, BusMessage, EventBus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, SyncConfig};
pub use storage::{SharedStorage, StorageError, StorageEvent};
#[cfg(feature = "memory")]
pub use storage::{MemoryStorage, TabStorage};
pub use tab::TabId;
pub use task::TaskHandle;
pub use traits::{ApiError, BookId, SessionApi, SessionId, SessionRecord, SessionStatus};
