//! Replicated reading session state and controller-gated session commands.
//!
//! Provides:
//! - `elapsed` - Elapsed-time computation and formatting
//! - `SessionReplica` - Per-tab mirror of the server's session record
//! - `ReadingSessionManager` - Start/stop/pause/resume/exclude-time
//! - `PauseHintStore` - Same-device pause snapshot
//! - Session API implementations (memory)

pub mod api;
pub mod elapsed;
pub mod manager;
pub mod pause_hint;
pub mod replica;

pub use elapsed::{elapsed_seconds, format_elapsed};
pub use manager::{MountedSession, ReadingSessionManager};
pub use pause_hint::{PauseHintStore, PauseSnapshot};
pub use replica::{ReplicaState, SessionReplica};
