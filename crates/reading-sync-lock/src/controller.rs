//! Controller election among tabs sharing one storage.
//!
//! Exactly one tab should hold the controller role for the active reading
//! session. The role is a lease: `take_control` overwrites the lock key
//! unconditionally, the holder renews it on a heartbeat, and every tab
//! re-reads it on a poll and on storage change events.
//!
//! Control is only lost involuntarily when another tab steals it. An expired
//! lease held by someone else is never auto-claimed; a tab must call
//! `take_control` explicitly.

use std::{sync::Arc, time::Duration};

use reading_sync_core::{Clock, SharedStorage, SyncConfig, TabId, TaskHandle};
use tokio::{
    sync::{broadcast::error::RecvError, watch},
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use crate::record::{LeaseRead, LockRecord};

/// This tab's view of the controller role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStatus {
    /// No lease has been read or written yet.
    Unknown,
    NotController,
    Controller,
}

/// Observable lock state for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockState {
    pub status: ControlStatus,
    /// Holder of a valid lease, if any.
    pub controller_id: Option<TabId>,
}

impl LockState {
    #[must_use]
    pub fn is_controller(&self) -> bool {
        self.status == ControlStatus::Controller
    }
}

/// Lease-based controller lock for one tab.
pub struct ControllerLock {
    tab_id: TabId,
    storage: Arc<dyn SharedStorage>,
    clock: Arc<dyn Clock>,
    key: String,
    ttl_ms: i64,
    heartbeat_interval: Duration,
    check_interval: Duration,
    state: watch::Sender<LockState>,
}

impl ControllerLock {
    /// Create the lock for `tab_id`. Nothing is read or written until the
    /// first `check_lock` or `take_control`.
    #[must_use]
    pub fn new(
        tab_id: TabId,
        storage: Arc<dyn SharedStorage>,
        clock: Arc<dyn Clock>,
        config: &SyncConfig,
    ) -> Self {
        let (state, _) = watch::channel(LockState {
            status: ControlStatus::Unknown,
            controller_id: None,
        });
        Self {
            tab_id,
            storage,
            clock,
            key: config.lock_key.clone(),
            ttl_ms: i64::try_from(config.lock_ttl_ms).unwrap_or(i64::MAX),
            heartbeat_interval: config.heartbeat_interval(),
            check_interval: config.check_interval(),
            state,
        }
    }

    #[must_use]
    pub const fn tab_id(&self) -> &TabId {
        &self.tab_id
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> LockState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn is_controller(&self) -> bool {
        self.state.borrow().is_controller()
    }

    #[must_use]
    pub fn controller_id(&self) -> Option<TabId> {
        self.state.borrow().controller_id.clone()
    }

    /// Observe state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LockState> {
        self.state.subscribe()
    }

    /// Steal the controller role.
    ///
    /// Overwrites whatever lease is stored. Returns `false` only if storage
    /// rejected the write, in which case this tab is marked non-controller.
    pub fn take_control(&self) -> bool {
        info!(tab = %self.tab_id, "taking control");
        self.write_lease()
    }

    /// Renew the lease if this tab holds it.
    ///
    /// If another tab has written a valid lease since our last check, the
    /// steal is honoured instead of being overwritten.
    pub fn heartbeat(&self) -> bool {
        if !self.is_controller() {
            return false;
        }
        if let LeaseRead::Present(record) = LeaseRead::load(self.storage.as_ref(), &self.key) {
            if !record.is_held_by(&self.tab_id) && !record.is_expired(self.clock.now_millis()) {
                self.set_state(ControlStatus::NotController, Some(record.controller_id));
                return false;
            }
        }
        self.write_lease()
    }

    /// Re-read the lease and update local state.
    pub fn check_lock(&self) {
        let now = self.clock.now_millis();
        match LeaseRead::load(self.storage.as_ref(), &self.key) {
            LeaseRead::Absent => {
                if self.is_controller() {
                    debug!(tab = %self.tab_id, "lease key cleared, re-acquiring");
                    self.write_lease();
                } else {
                    self.set_state(ControlStatus::NotController, None);
                }
            }
            LeaseRead::Corrupt => self.set_state(ControlStatus::NotController, None),
            LeaseRead::Present(record) if !record.is_expired(now) => {
                let status = if record.is_held_by(&self.tab_id) {
                    ControlStatus::Controller
                } else {
                    ControlStatus::NotController
                };
                self.set_state(status, Some(record.controller_id));
            }
            LeaseRead::Present(record) => {
                if record.is_held_by(&self.tab_id) {
                    debug!(tab = %self.tab_id, "own lease lapsed, renewing");
                    self.write_lease();
                } else {
                    self.set_state(ControlStatus::NotController, None);
                }
            }
        }
    }

    /// Start the check poll, the heartbeat and the storage-event watcher.
    ///
    /// All three stop when the returned handle is dropped. The lease itself
    /// is left to expire; a closed tab never deletes it.
    pub fn spawn(self: &Arc<Self>) -> TaskHandle {
        let lock = Arc::clone(self);
        let mut events = self.storage.subscribe();
        TaskHandle::spawn("controller-lock", async move {
            info!(
                tab = %lock.tab_id,
                ttl_ms = lock.ttl_ms,
                heartbeat_ms = lock.heartbeat_interval.as_millis(),
                "controller lock started"
            );

            let mut check = tokio::time::interval(lock.check_interval);
            check.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut heartbeat = tokio::time::interval(lock.heartbeat_interval);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut events_open = true;

            loop {
                tokio::select! {
                    _ = check.tick() => lock.check_lock(),
                    _ = heartbeat.tick() => {
                        lock.heartbeat();
                    }
                    event = events.recv(), if events_open => match event {
                        Ok(event) if event.key == lock.key => lock.check_lock(),
                        Ok(_) => {}
                        Err(RecvError::Lagged(_)) => lock.check_lock(),
                        Err(RecvError::Closed) => events_open = false,
                    },
                }
            }
        })
    }

    fn write_lease(&self) -> bool {
        let record = LockRecord::new(self.tab_id.clone(), self.clock.now_millis(), self.ttl_ms);
        let written = serde_json::to_string(&record)
            .map_err(|e| e.to_string())
            .and_then(|raw| self.storage.set(&self.key, &raw).map_err(|e| e.to_string()));

        match written {
            Ok(()) => {
                self.set_state(ControlStatus::Controller, Some(self.tab_id.clone()));
                true
            }
            Err(e) => {
                warn!(tab = %self.tab_id, "failed to write lease: {e}");
                self.set_state(ControlStatus::NotController, None);
                false
            }
        }
    }

    fn set_state(&self, status: ControlStatus, controller_id: Option<TabId>) {
        let next = LockState {
            status,
            controller_id,
        };
        let tab = &self.tab_id;
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            match (current.status, next.status) {
                (ControlStatus::Controller, ControlStatus::Controller) => {}
                (_, ControlStatus::Controller) => info!(tab = %tab, "this tab is now the controller"),
                (ControlStatus::Controller, _) => warn!(
                    tab = %tab,
                    controller = ?next.controller_id,
                    "control lost to another tab"
                ),
                _ => {}
            }
            *current = next;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use reading_sync_core::{ManualClock, MemoryStorage};

    use super::*;

    const START: i64 = 1_700_000_000_000;

    struct Origin {
        storage: Arc<MemoryStorage>,
        clock: Arc<ManualClock>,
        config: SyncConfig,
    }

    impl Origin {
        fn new() -> Self {
            Self {
                storage: Arc::new(MemoryStorage::new()),
                clock: Arc::new(ManualClock::new(START)),
                config: SyncConfig::default(),
            }
        }

        fn tab(&self, id: &str) -> ControllerLock {
            ControllerLock::new(
                TabId::from_raw(id),
                Arc::clone(&self.storage) as Arc<dyn SharedStorage>,
                Arc::clone(&self.clock) as Arc<dyn Clock>,
                &self.config,
            )
        }

        fn stored(&self) -> LeaseRead {
            LeaseRead::load(self.storage.as_ref(), &self.config.lock_key)
        }
    }

    fn controllers(tabs: &[ControllerLock]) -> usize {
        tabs.iter().filter(|t| t.is_controller()).count()
    }

    #[test]
    fn test_starts_unknown() {
        let origin = Origin::new();
        let a = origin.tab("tab_a");
        assert_eq!(a.state().status, ControlStatus::Unknown);
        a.check_lock();
        assert_eq!(a.state().status, ControlStatus::NotController);
        assert_eq!(a.controller_id(), None);
    }

    #[test]
    fn test_take_control_writes_lease() {
        let origin = Origin::new();
        let a = origin.tab("tab_a");
        assert!(a.take_control());
        assert!(a.is_controller());
        assert_eq!(
            origin.stored(),
            LeaseRead::Present(LockRecord::new(TabId::from_raw("tab_a"), START, 5_000))
        );
    }

    #[test]
    fn test_mutual_exclusion_after_poll() {
        let origin = Origin::new();
        let tabs: Vec<_> = (0..5).map(|i| origin.tab(&format!("tab_{i}"))).collect();

        for &i in &[3, 1, 4, 1, 0, 2, 4, 2] {
            tabs[i].take_control();
            origin.clock.advance(137);
        }
        // Before polling, several tabs may still believe they hold control.
        for tab in &tabs {
            tab.check_lock();
        }

        assert_eq!(controllers(&tabs), 1);
        assert!(tabs[2].is_controller());
        for tab in &tabs {
            assert_eq!(tab.controller_id(), Some(TabId::from_raw("tab_2")));
        }
    }

    #[test]
    fn test_heartbeat_keeps_lease_alive() {
        let origin = Origin::new();
        let a = origin.tab("tab_a");
        let b = origin.tab("tab_b");
        a.take_control();

        for _ in 0..50 {
            origin.clock.advance(4_999);
            assert!(a.heartbeat());
            a.check_lock();
            b.check_lock();
            assert!(a.is_controller());
            assert!(!b.is_controller());
        }
    }

    #[test]
    fn test_no_takeover_without_explicit_action() {
        let origin = Origin::new();
        let a = origin.tab("tab_a");
        let b = origin.tab("tab_b");
        a.take_control();
        b.check_lock();
        assert_eq!(b.controller_id(), Some(TabId::from_raw("tab_a")));

        // Tab A crashes: no more heartbeats.
        for _ in 0..100 {
            origin.clock.advance(60_000);
            b.check_lock();
            assert!(!b.is_controller());
        }
        assert_eq!(b.controller_id(), None);
    }

    #[test]
    fn test_own_expired_lease_is_renewed() {
        let origin = Origin::new();
        let a = origin.tab("tab_a");
        a.take_control();

        origin.clock.advance(30_000);
        a.check_lock();

        assert!(a.is_controller());
        assert_eq!(
            origin.stored(),
            LeaseRead::Present(LockRecord::new(
                TabId::from_raw("tab_a"),
                START + 30_000,
                5_000
            ))
        );
    }

    #[test]
    fn test_corrupt_lease_is_no_controller() {
        let origin = Origin::new();
        origin
            .storage
            .set(&origin.config.lock_key, "{not json")
            .unwrap();

        let a = origin.tab("tab_a");
        a.check_lock();
        assert_eq!(
            a.state(),
            LockState {
                status: ControlStatus::NotController,
                controller_id: None
            }
        );
    }

    #[test]
    fn test_cleared_key_is_reacquired_by_holder() {
        let origin = Origin::new();
        let a = origin.tab("tab_a");
        let b = origin.tab("tab_b");
        a.take_control();

        origin.storage.remove(&origin.config.lock_key).unwrap();
        b.check_lock();
        a.check_lock();

        assert!(a.is_controller());
        assert!(!b.is_controller());
        assert!(matches!(origin.stored(), LeaseRead::Present(_)));
    }

    #[test]
    fn test_stolen_control_detected_on_next_check() {
        let origin = Origin::new();
        let a = origin.tab("tab_a");
        let b = origin.tab("tab_b");
        a.take_control();
        b.take_control();

        assert!(a.is_controller(), "A has not polled yet");
        a.check_lock();
        assert!(!a.is_controller());
        assert_eq!(a.controller_id(), Some(TabId::from_raw("tab_b")));
    }

    #[test]
    fn test_heartbeat_does_not_overwrite_a_steal() {
        let origin = Origin::new();
        let a = origin.tab("tab_a");
        let b = origin.tab("tab_b");
        a.take_control();
        b.take_control();

        assert!(!a.heartbeat());
        assert!(!a.is_controller());
        b.check_lock();
        assert!(b.is_controller());
    }

    #[test]
    fn test_simultaneous_expired_holders_converge() {
        let origin = Origin::new();
        let a = origin.tab("tab_a");
        let b = origin.tab("tab_b");

        // Both steal in the same tick; last write wins once both have polled.
        a.take_control();
        b.take_control();
        let tabs = [a, b];
        assert_eq!(controllers(&tabs), 2);

        for tab in &tabs {
            tab.check_lock();
        }
        assert_eq!(controllers(&tabs), 1);
        assert!(tabs[1].is_controller());
    }

    #[test]
    fn test_simultaneous_expired_holders_single_winner() {
        let origin = Origin::new();
        let a = origin.tab("tab_a");
        let b = origin.tab("tab_b");
        a.take_control();
        b.take_control();

        // Both heartbeats stall past the TTL; both still believe they are holders.
        origin.clock.advance(10_000);
        a.check_lock();
        b.check_lock();
        assert!(!a.is_controller());
        assert!(b.is_controller());

        // And in the other poll order.
        let c = origin.tab("tab_c");
        let d = origin.tab("tab_d");
        c.take_control();
        d.take_control();
        origin.clock.advance(10_000);
        d.check_lock();
        c.check_lock();
        assert!(!c.is_controller());
        assert!(d.is_controller());
    }

    #[test]
    fn test_write_failure_fails_open() {
        let origin = Origin::new();
        let a = origin.tab("tab_a");
        origin.storage.set_read_only(true);

        assert!(!a.take_control());
        assert!(!a.is_controller());
        assert_eq!(a.controller_id(), None);
    }

    #[test]
    fn test_lost_write_access_drops_control_on_renewal() {
        let origin = Origin::new();
        let a = origin.tab("tab_a");
        a.take_control();
        origin.storage.set_read_only(true);

        assert!(!a.heartbeat());
        assert!(!a.is_controller());
    }

    async fn step(clock: &ManualClock, millis: u64) {
        clock.advance(i64::try_from(millis).unwrap());
        tokio::time::advance(Duration::from_millis(millis)).await;
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_tasks_renew_and_observe_steal() {
        let origin = Origin::new();
        let a = Arc::new(origin.tab("tab_a"));
        let b = Arc::new(origin.tab("tab_b"));
        let _a_tasks = a.spawn();
        let _b_tasks = b.spawn();
        step(&origin.clock, 0).await;

        a.take_control();
        for _ in 0..60 {
            step(&origin.clock, 250).await;
            assert!(a.is_controller());
            assert!(!b.is_controller());
        }

        b.take_control();
        step(&origin.clock, 1_000).await;
        assert!(!a.is_controller());
        assert!(b.is_controller());
        assert_eq!(a.controller_id(), Some(TabId::from_raw("tab_b")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_tasks_let_lease_expire() {
        let origin = Origin::new();
        let a = Arc::new(origin.tab("tab_a"));
        let b = Arc::new(origin.tab("tab_b"));
        let a_tasks = a.spawn();
        let _b_tasks = b.spawn();
        a.take_control();
        step(&origin.clock, 1_000).await;
        assert_eq!(b.controller_id(), Some(TabId::from_raw("tab_a")));

        // Tab A closes.
        drop(a_tasks);
        for _ in 0..10 {
            step(&origin.clock, 1_000).await;
        }
        assert_eq!(b.controller_id(), None);
        assert!(!b.is_controller());
    }
}
