//! Session commands for the UI layer.
//!
//! Every mutating command calls the server first and only touches local state
//! once the server has answered. Pause and resume are additionally gated on
//! this tab holding the controller lock.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use reading_sync_core::{
    ApiError, BookId, BusMessage, Clock, EventBus, SessionApi, SessionId, SessionRecord,
    SessionStatus, SharedStorage, SyncConfig, TabId, TaskHandle,
};
use reading_sync_lock::{ControllerLock, LockState};
use tracing::{debug, error, info, warn};

use crate::{
    pause_hint::{PauseHintStore, PauseSnapshot},
    replica::{ReplicaState, SessionReplica},
};

/// Background tasks of a mounted manager.
///
/// Dropping this stops the lock heartbeat and poll, the elapsed ticker and
/// the bus listener.
pub struct MountedSession {
    tasks: Vec<TaskHandle>,
}

impl MountedSession {
    /// Names of the running tasks.
    #[must_use]
    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(TaskHandle::name).collect()
    }

    /// Stop everything now.
    pub fn unmount(self) {
        drop(self);
    }
}

/// Reading session manager for one tab.
pub struct ReadingSessionManager<A>
where
    A: SessionApi,
{
    api: Arc<A>,
    replica: Arc<SessionReplica<A>>,
    lock: Arc<ControllerLock>,
    bus: EventBus,
    hints: PauseHintStore,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
}

impl<A> ReadingSessionManager<A>
where
    A: SessionApi + 'static,
{
    /// Create a new session manager.
    #[must_use]
    pub fn new(
        api: Arc<A>,
        lock: Arc<ControllerLock>,
        bus: EventBus,
        storage: Arc<dyn SharedStorage>,
        clock: Arc<dyn Clock>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            replica: Arc::new(SessionReplica::new(Arc::clone(&api), Arc::clone(&clock))),
            api,
            lock,
            bus,
            hints: PauseHintStore::new(storage, config),
            clock,
            tick_interval: config.tick_interval(),
        }
    }

    /// Bring the tab up: read the lock, subscribe to other tabs, fetch the
    /// session with the loading flag shown, then start the elapsed ticker.
    pub async fn mount(self: &Arc<Self>) -> MountedSession {
        self.lock.check_lock();
        let lock_task = self.lock.spawn();

        let replica = Arc::clone(&self.replica);
        let tab = self.lock.tab_id().clone();
        let bus_task = self.bus.spawn_listener(move |message| {
            let replica = Arc::clone(&replica);
            let tab = tab.clone();
            async move {
                debug!(tab = %tab, %message, "session changed in another tab");
                replica.refresh().await;
            }
        });

        self.replica.load().await;
        let ticker = self.replica.spawn_ticker(self.tick_interval);

        info!(tab = %self.lock.tab_id(), controller = self.lock.is_controller(), "session manager mounted");
        MountedSession {
            tasks: vec![lock_task, bus_task, ticker],
        }
    }

    /// Start reading `book_id` and take control of the new session.
    pub async fn start_session(&self, book_id: BookId) -> bool {
        match self.api.start(book_id).await {
            Ok(session) => {
                info!(tab = %self.tab_id(), session = session.id, book_id, "reading session started");
                self.hints.clear(session.id);
                self.replica.replace(Some(session));
                self.bus.publish(BusMessage::RefreshSession);
                self.lock.take_control();
                true
            }
            Err(e) => {
                self.report_failure("start", &e);
                false
            }
        }
    }

    /// End the open session.
    ///
    /// Always asks the server, even if this tab has no local record; the server
    /// decides whether there was anything to stop.
    pub async fn stop_session(&self, end_time: Option<DateTime<Utc>>, end_page: Option<u32>) -> bool {
        let local = self.replica.session().map(|s| s.id);
        match self.api.stop(end_time, end_page).await {
            Ok(stopped) => {
                info!(tab = %self.tab_id(), session = ?stopped.as_ref().map(|s| s.id), "reading session stopped");
                for id in local.into_iter().chain(stopped.map(|s| s.id)) {
                    self.hints.clear(id);
                }
                self.replica.replace(None);
                self.bus.publish(BusMessage::RefreshSession);
                true
            }
            Err(e) => {
                self.report_failure("stop", &e);
                false
            }
        }
    }

    /// Pause the session. No-op returning `false` unless this tab is controller.
    pub async fn pause_session(&self) -> bool {
        if !self.lock.is_controller() {
            debug!(tab = %self.tab_id(), "pause ignored: not the controller");
            return false;
        }
        match self.api.pause().await {
            Ok(session) => {
                self.replica.replace(Some(session.clone()));
                self.hints.save(
                    session.id,
                    &PauseSnapshot {
                        is_paused: true,
                        paused_at: session.paused_at.clone().unwrap_or_else(|| {
                            self.clock.now().to_rfc3339_opts(SecondsFormat::Millis, true)
                        }),
                        frozen_time: self.replica.formatted_time(),
                    },
                );
                self.bus.publish(BusMessage::RefreshSession);
                true
            }
            Err(e) => {
                self.report_failure("pause", &e);
                false
            }
        }
    }

    /// Resume the session. No-op returning `false` unless this tab is controller.
    pub async fn resume_session(&self) -> bool {
        if !self.lock.is_controller() {
            debug!(tab = %self.tab_id(), "resume ignored: not the controller");
            return false;
        }
        match self.api.resume().await {
            Ok(session) => {
                self.hints.clear(session.id);
                self.replica.replace(Some(session));
                self.bus.publish(BusMessage::RefreshSession);
                true
            }
            Err(e) => {
                self.report_failure("resume", &e);
                false
            }
        }
    }

    /// Exclude `millis` of wall-clock time from the session.
    ///
    /// Shifts the local start time forward immediately so the display does
    /// not jump, then replaces the record with the server's answer. If the
    /// server call fails the shift is undone.
    pub async fn exclude_time(&self, millis: i64) -> bool {
        let provisional = self.replica.shift_start_provisionally(millis);
        match self.api.exclude_time(millis).await {
            Ok(session) => {
                self.replica.replace(Some(session));
                self.bus.publish(BusMessage::RefreshSession);
                true
            }
            Err(e) => {
                if let Some(provisional) = provisional {
                    self.replica.revert(provisional);
                }
                self.report_failure("exclude time from", &e);
                false
            }
        }
    }

    /// Re-fetch the session without showing the loading flag.
    pub async fn refresh(&self) -> bool {
        self.replica.refresh().await
    }

    /// All sessions recorded for `book_id`, `None` if the server call failed.
    pub async fn sessions_for_book(&self, book_id: BookId) -> Option<Vec<SessionRecord>> {
        match self.api.get_by_book_id(book_id).await {
            Ok(sessions) => Some(sessions),
            Err(e) => {
                self.report_failure("list", &e);
                None
            }
        }
    }

    /// Steal the controller role for this tab.
    pub fn take_control(&self) -> bool {
        self.lock.take_control()
    }

    #[must_use]
    pub fn is_controller(&self) -> bool {
        self.lock.is_controller()
    }

    #[must_use]
    pub fn lock_state(&self) -> LockState {
        self.lock.state()
    }

    #[must_use]
    pub fn tab_id(&self) -> &TabId {
        self.lock.tab_id()
    }

    #[must_use]
    pub fn active_session(&self) -> Option<SessionRecord> {
        self.replica.session()
    }

    #[must_use]
    pub fn state(&self) -> ReplicaState {
        self.replica.snapshot()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.replica.is_loading()
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.replica
            .session()
            .is_some_and(|s| s.status == SessionStatus::Paused)
    }

    #[must_use]
    pub fn elapsed_seconds(&self) -> u64 {
        self.replica.elapsed_seconds()
    }

    #[must_use]
    pub fn formatted_time(&self) -> String {
        self.replica.formatted_time()
    }

    /// The same-device pause snapshot for the current session, if one exists.
    #[must_use]
    pub fn pause_hint(&self) -> Option<PauseSnapshot> {
        self.replica.session().and_then(|s| self.hints.load(s.id))
    }

    /// The pause snapshot for `session_id`, without waiting for the server.
    ///
    /// For callers that already know which session they are showing, e.g. a
    /// reloaded reading page, so the frozen time can be drawn while `mount`
    /// is still loading.
    #[must_use]
    pub fn pause_hint_for(&self, session_id: SessionId) -> Option<PauseSnapshot> {
        self.hints.load(session_id)
    }

    #[must_use]
    pub const fn replica(&self) -> &Arc<SessionReplica<A>> {
        &self.replica
    }

    fn report_failure(&self, operation: &str, e: &ApiError) {
        match e {
            ApiError::Unauthorized => {
                warn!(tab = %self.tab_id(), "failed to {operation} session: credential rejected");
            }
            _ => error!(tab = %self.tab_id(), "failed to {operation} session: {e}"),
        }
    }
}
