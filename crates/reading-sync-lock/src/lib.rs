//! Lease-based controller lock over shared tab storage.
//!
//! Provides:
//! - `LockRecord` - The lease persisted under the lock key
//! - `ControllerLock` - Take/check/renew the controller role for one tab

pub mod controller;
pub mod record;

pub use controller::{ControlStatus, ControllerLock, LockState};
pub use record::{LeaseRead, LockRecord};
