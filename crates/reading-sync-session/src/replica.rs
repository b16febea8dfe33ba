//! Per-tab mirror of the server's session record.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chrono::SecondsFormat;
use reading_sync_core::{ApiError, Clock, SessionApi, SessionRecord, TaskHandle};
use tokio::{sync::watch, time::MissedTickBehavior};
use tracing::{debug, warn};

use crate::elapsed::{elapsed_seconds, format_elapsed, is_running};

/// Replicated session state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaState {
    /// The open session, `None` when nothing is being read.
    pub session: Option<SessionRecord>,
    /// True only during the initial fetch.
    pub loading: bool,
}

/// A provisional local patch awaiting server confirmation.
#[derive(Debug, Clone)]
pub struct Provisional {
    previous: SessionRecord,
    patched: SessionRecord,
}

/// Cached copy of the server's session record plus the elapsed-time clock.
///
/// The server stays the only source of truth: every update either replaces
/// the record wholesale with a server response or is a provisional patch
/// that is later replaced or reverted.
pub struct SessionReplica<A: SessionApi> {
    api: Arc<A>,
    clock: Arc<dyn Clock>,
    state: watch::Sender<ReplicaState>,
    elapsed: watch::Sender<u64>,
    ticking: AtomicBool,
}

impl<A: SessionApi> SessionReplica<A> {
    /// Create an empty replica in the loading state.
    #[must_use]
    pub fn new(api: Arc<A>, clock: Arc<dyn Clock>) -> Self {
        let (state, _) = watch::channel(ReplicaState {
            session: None,
            loading: true,
        });
        let (elapsed, _) = watch::channel(0);
        Self {
            api,
            clock,
            state,
            elapsed,
            ticking: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> ReplicaState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn session(&self) -> Option<SessionRecord> {
        self.state.borrow().session.clone()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ReplicaState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn elapsed_seconds(&self) -> u64 {
        *self.elapsed.borrow()
    }

    #[must_use]
    pub fn formatted_time(&self) -> String {
        format_elapsed(self.elapsed_seconds())
    }

    #[must_use]
    pub fn subscribe_elapsed(&self) -> watch::Receiver<u64> {
        self.elapsed.subscribe()
    }

    /// Whether the one-second ticker is currently running.
    #[must_use]
    pub fn is_ticking(&self) -> bool {
        self.ticking.load(Ordering::SeqCst)
    }

    /// Initial fetch. Shows the loading flag while in flight.
    pub async fn load(&self) -> bool {
        self.state.send_modify(|s| s.loading = true);
        let loaded = self.fetch().await;
        self.state.send_if_modified(|s| std::mem::replace(&mut s.loading, false));
        loaded
    }

    /// Background re-fetch. Never touches the loading flag, so a poke from
    /// another tab does not make the UI flicker.
    pub async fn refresh(&self) -> bool {
        self.fetch().await
    }

    async fn fetch(&self) -> bool {
        match self.api.get_active().await {
            Ok(session) => {
                self.replace(session);
                true
            }
            Err(ApiError::Unauthorized) => {
                warn!("session fetch rejected: credential no longer valid");
                false
            }
            Err(e) => {
                warn!("failed to fetch active session: {e}");
                false
            }
        }
    }

    /// Replace the record wholesale.
    pub fn replace(&self, session: Option<SessionRecord>) {
        let changed = self.state.send_if_modified(|s| {
            if s.session == session {
                return false;
            }
            s.session = session;
            true
        });
        if changed {
            debug!(session = ?self.state.borrow().session.as_ref().map(|s| s.id), "replica updated");
        }
        self.recompute_elapsed();
    }

    /// Shift `start_time` forward by `millis` locally, ahead of the server.
    ///
    /// Returns `None` without touching anything if there is no record or its
    /// start time does not parse.
    pub fn shift_start_provisionally(&self, millis: i64) -> Option<Provisional> {
        let previous = self.session()?;
        let start = previous.start_instant()?;
        let shifted = start + chrono::Duration::milliseconds(millis);

        let mut patched = previous.clone();
        patched.start_time = shifted.to_rfc3339_opts(SecondsFormat::Millis, true);
        self.replace(Some(patched.clone()));
        Some(Provisional { previous, patched })
    }

    /// Undo a provisional patch, unless something newer already replaced it.
    pub fn revert(&self, provisional: Provisional) {
        let Provisional { previous, patched } = provisional;
        let reverted = self.state.send_if_modified(|s| {
            if s.session.as_ref() != Some(&patched) {
                return false;
            }
            s.session = Some(previous);
            true
        });
        if reverted {
            self.recompute_elapsed();
        }
    }

    /// Recompute elapsed time from the record and the clock.
    pub fn recompute_elapsed(&self) -> u64 {
        let seconds = elapsed_seconds(self.state.borrow().session.as_ref(), self.clock.now());
        self.elapsed.send_if_modified(|current| {
            if *current == seconds {
                return false;
            }
            *current = seconds;
            true
        });
        seconds
    }

    /// Keep elapsed time current.
    ///
    /// Ticks every `period` while the session is active. A paused, stopped or
    /// missing session is evaluated once and then left alone until the record
    /// changes; no interval exists in that case.
    pub fn spawn_ticker(self: &Arc<Self>, period: Duration) -> TaskHandle
    where
        A: 'static,
    {
        let replica = Arc::clone(self);
        let mut changes = self.state.subscribe();
        TaskHandle::spawn("elapsed-ticker", async move {
            loop {
                let running = is_running(changes.borrow_and_update().session.as_ref());
                replica.recompute_elapsed();

                if running {
                    let _flag = TickingFlag::raise(&replica.ticking);
                    let mut interval = tokio::time::interval(period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    interval.tick().await;
                    let closed = loop {
                        tokio::select! {
                            _ = interval.tick() => {
                                replica.recompute_elapsed();
                            }
                            changed = changes.changed() => break changed.is_err(),
                        }
                    };
                    if closed {
                        return;
                    }
                } else if changes.changed().await.is_err() {
                    return;
                }
            }
        })
    }
}

/// Lowers the ticking flag when the ticker leaves its active loop or is aborted.
struct TickingFlag<'a>(&'a AtomicBool);

impl<'a> TickingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for TickingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use reading_sync_core::{ManualClock, SessionStatus};

    use super::*;
    use crate::api::MemorySessionApi;

    const START: i64 = 1_714_557_600_000; // 2024-05-01T10:00:00Z

    fn setup() -> (Arc<ManualClock>, Arc<MemorySessionApi>, Arc<SessionReplica<MemorySessionApi>>) {
        let clock = Arc::new(ManualClock::new(START));
        let api = Arc::new(MemorySessionApi::new(Arc::clone(&clock) as Arc<dyn Clock>));
        let replica = Arc::new(SessionReplica::new(
            Arc::clone(&api),
            Arc::clone(&clock) as Arc<dyn Clock>,
        ));
        (clock, api, replica)
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    async fn step(clock: &ManualClock, millis: u64) {
        clock.advance(i64::try_from(millis).unwrap());
        tokio::time::advance(Duration::from_millis(millis)).await;
        settle().await;
    }

    #[tokio::test]
    async fn test_load_sets_and_clears_loading() {
        let (_, api, replica) = setup();
        api.start(4).await.unwrap();
        let mut rx = replica.subscribe();

        assert!(replica.is_loading());
        assert!(replica.load().await);
        assert!(!replica.is_loading());
        assert_eq!(replica.session().map(|s| s.book_id), Some(4));
        assert!(rx.has_changed().unwrap());
        assert!(!rx.borrow_and_update().loading);
    }

    #[tokio::test]
    async fn test_refresh_does_not_flag_loading() {
        let (_, api, replica) = setup();
        replica.load().await;
        let mut rx = replica.subscribe();
        rx.borrow_and_update();

        api.start(4).await.unwrap();
        assert!(replica.refresh().await);
        assert!(!rx.borrow_and_update().loading);
        assert!(replica.session().is_some());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_state() {
        let (_, api, replica) = setup();
        api.start(4).await.unwrap();
        replica.load().await;
        let before = replica.snapshot();

        api.set_offline(true);
        assert!(!replica.refresh().await);
        assert_eq!(replica.snapshot(), before);
    }

    #[tokio::test]
    async fn test_duplicate_refresh_is_idempotent() {
        let (clock, api, replica) = setup();
        api.start(4).await.unwrap();
        clock.advance(90_000);
        replica.refresh().await;
        let once = (replica.session(), replica.elapsed_seconds());

        replica.refresh().await;
        replica.refresh().await;
        assert_eq!((replica.session(), replica.elapsed_seconds()), once);
        assert_eq!(once.1, 90);
        assert_eq!(api.call_count("start"), 1);
    }

    #[tokio::test]
    async fn test_provisional_shift_and_revert() {
        let (clock, api, replica) = setup();
        api.start(4).await.unwrap();
        replica.load().await;
        clock.advance(60_000);
        assert_eq!(replica.recompute_elapsed(), 60);

        let provisional = replica.shift_start_provisionally(20_000).unwrap();
        assert_eq!(replica.elapsed_seconds(), 40);
        assert_eq!(
            replica.session().unwrap().start_time,
            "2024-05-01T10:00:20.000Z"
        );

        replica.revert(provisional);
        assert_eq!(replica.elapsed_seconds(), 60);
    }

    #[tokio::test]
    async fn test_revert_skipped_after_newer_update() {
        let (_, api, replica) = setup();
        api.start(4).await.unwrap();
        replica.load().await;

        let provisional = replica.shift_start_provisionally(5_000).unwrap();
        let mut newer = replica.session().unwrap();
        newer.paused_millis = Some(123);
        replica.replace(Some(newer.clone()));

        replica.revert(provisional);
        assert_eq!(replica.session(), Some(newer));
    }

    #[tokio::test]
    async fn test_shift_needs_valid_start() {
        let (_, _, replica) = setup();
        assert!(replica.shift_start_provisionally(1_000).is_none());

        replica.replace(Some(SessionRecord {
            id: 1,
            book_id: 1,
            start_time: "not-a-date".into(),
            end_time: None,
            status: SessionStatus::Active,
            end_page: None,
            paused_millis: None,
            paused_at: None,
        }));
        assert!(replica.shift_start_provisionally(1_000).is_none());
        assert_eq!(replica.elapsed_seconds(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_runs_only_while_active() {
        let (clock, api, replica) = setup();
        let _ticker = replica.spawn_ticker(Duration::from_secs(1));
        settle().await;
        assert!(!replica.is_ticking());
        assert_eq!(replica.elapsed_seconds(), 0);

        api.start(4).await.unwrap();
        replica.refresh().await;
        settle().await;
        assert!(replica.is_ticking());

        for expected in 1..=5 {
            step(&clock, 1_000).await;
            assert_eq!(replica.elapsed_seconds(), expected);
        }

        api.pause().await.unwrap();
        replica.refresh().await;
        settle().await;
        assert!(!replica.is_ticking());
        assert_eq!(replica.elapsed_seconds(), 5);

        step(&clock, 2_000).await;
        assert_eq!(replica.elapsed_seconds(), 5);

        api.stop(None, None).await.unwrap();
        replica.refresh().await;
        settle().await;
        assert!(!replica.is_ticking());
        assert_eq!(replica.elapsed_seconds(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_ticker_stops_updates() {
        let (clock, api, replica) = setup();
        api.start(4).await.unwrap();
        replica.load().await;
        let ticker = replica.spawn_ticker(Duration::from_secs(1));
        step(&clock, 3_000).await;
        assert_eq!(replica.elapsed_seconds(), 3);

        drop(ticker);
        step(&clock, 3_000).await;
        assert_eq!(replica.elapsed_seconds(), 3);
        assert!(!replica.is_ticking());
    }
}
