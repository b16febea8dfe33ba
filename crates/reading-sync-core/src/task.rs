//! Owned background tasks.

use std::future::Future;

use tokio::task::JoinHandle;

/// A spawned recurring task that is aborted when the handle is dropped.
///
/// Heartbeats, lock checks, elapsed ticks and bus listeners are all owned
/// this way so that tearing down a component can never leak an interval.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl TaskHandle {
    /// Spawn `future` on the current runtime.
    pub fn spawn<F>(name: &'static str, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::debug!(task = name, "spawning background task");
        Self {
            name,
            handle: tokio::spawn(future),
        }
    }

    /// Task name, for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the task has exited or been aborted.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Abort the task now.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
