//! In-memory Session API.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reading_sync_core::{
    ApiError, BookId, Clock, SessionApi, SessionRecord, SessionStatus,
};

/// In-memory server implementation.
///
/// Enforces the same rules as the real backend for a single user: at most
/// one open session, pause/resume time accounted into `paused_millis`.
/// Useful for tests and demos. Data is lost on restart.
pub struct MemorySessionApi {
    clock: Arc<dyn Clock>,
    sessions: RwLock<Vec<SessionRecord>>,
    next_id: AtomicI64,
    offline: AtomicBool,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl MemorySessionApi {
    /// Create an empty server.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            sessions: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
            offline: AtomicBool::new(false),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Make every call fail with a network error until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of times `operation` was invoked (including failed calls).
    #[must_use]
    pub fn call_count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(operation).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn enter(&self, operation: &'static str) -> Result<(), ApiError> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(operation).or_default() += 1;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(ApiError::Network("server unreachable".to_string()));
        }
        Ok(())
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn with_open<T>(
        &self,
        statuses: &[SessionStatus],
        missing: &str,
        f: impl FnOnce(&mut SessionRecord) -> Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let session = sessions
            .iter_mut()
            .rev()
            .find(|s| statuses.contains(&s.status))
            .ok_or_else(|| conflict(missing))?;
        f(session)
    }

    fn close(session: &mut SessionRecord, end: DateTime<Utc>, end_page: Option<u32>) {
        if session.status == SessionStatus::Paused {
            if let Some(paused_at) = session.paused_instant() {
                let gap = (end - paused_at).num_milliseconds();
                if gap > 0 {
                    session.paused_millis = Some(session.paused_millis() + gap);
                }
            }
        }
        session.paused_at = None;
        session.end_time = Some(iso(end));
        session.end_page = end_page;
        session.status = SessionStatus::Stopped;
    }

    fn resume_in_place(session: &mut SessionRecord, now: DateTime<Utc>) {
        if let Some(paused_at) = session.paused_instant() {
            let gap = (now - paused_at).num_milliseconds();
            if gap > 0 {
                session.paused_millis = Some(session.paused_millis() + gap);
            }
        }
        session.status = SessionStatus::Active;
        session.paused_at = None;
    }
}

const OPEN: &[SessionStatus] = &[SessionStatus::Active, SessionStatus::Paused];

fn iso(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn conflict(message: &str) -> ApiError {
    ApiError::Status {
        status: 409,
        body: message.to_string(),
    }
}

#[async_trait]
impl SessionApi for MemorySessionApi {
    async fn get_active(&self) -> Result<Option<SessionRecord>, ApiError> {
        self.enter("get_active")?;
        Ok(self
            .sessions
            .read()
            .map_err(|e| ApiError::Network(e.to_string()))?
            .iter()
            .rev()
            .find(|s| s.is_live())
            .cloned())
    }

    async fn get_by_book_id(&self, book_id: BookId) -> Result<Vec<SessionRecord>, ApiError> {
        self.enter("get_by_book_id")?;
        Ok(self
            .sessions
            .read()
            .map_err(|e| ApiError::Network(e.to_string()))?
            .iter()
            .filter(|s| s.book_id == book_id)
            .cloned()
            .collect())
    }

    async fn start(&self, book_id: BookId) -> Result<SessionRecord, ApiError> {
        self.enter("start")?;
        let now = self.now();
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        if let Some(open) = sessions.iter_mut().rev().find(|s| s.is_live()) {
            if open.book_id == book_id {
                if open.status == SessionStatus::Paused {
                    Self::resume_in_place(open, now);
                }
                return Ok(open.clone());
            }
            // Reading another book: the previous session ends now.
            Self::close(open, now, None);
        }

        let session = SessionRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            book_id,
            start_time: iso(now),
            end_time: None,
            status: SessionStatus::Active,
            end_page: None,
            paused_millis: Some(0),
            paused_at: None,
        };
        sessions.push(session.clone());
        Ok(session)
    }

    async fn stop(
        &self,
        end_time: Option<DateTime<Utc>>,
        end_page: Option<u32>,
    ) -> Result<Option<SessionRecord>, ApiError> {
        self.enter("stop")?;
        let end = end_time.unwrap_or_else(|| self.now());
        self.with_open(OPEN, "No active reading session found", |session| {
            Self::close(session, end, end_page);
            Ok(Some(session.clone()))
        })
    }

    async fn pause(&self) -> Result<SessionRecord, ApiError> {
        self.enter("pause")?;
        let now = self.now();
        self.with_open(
            &[SessionStatus::Active],
            "No active session found to pause",
            |session| {
                session.status = SessionStatus::Paused;
                session.paused_at = Some(iso(now));
                Ok(session.clone())
            },
        )
    }

    async fn resume(&self) -> Result<SessionRecord, ApiError> {
        self.enter("resume")?;
        let now = self.now();
        self.with_open(
            &[SessionStatus::Paused],
            "No paused session found to resume",
            |session| {
                Self::resume_in_place(session, now);
                Ok(session.clone())
            },
        )
    }

    async fn exclude_time(&self, millis: i64) -> Result<SessionRecord, ApiError> {
        self.enter("exclude_time")?;
        if millis < 0 {
            return Err(ApiError::Status {
                status: 400,
                body: "Invalid millis".to_string(),
            });
        }
        self.with_open(&[SessionStatus::Active], "No active session found", |session| {
            session.paused_millis = Some(session.paused_millis() + millis);
            Ok(session.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use reading_sync_core::ManualClock;
    use tokio_test::assert_err;

    use super::*;

    const START: i64 = 1_714_557_600_000;

    fn server() -> (Arc<ManualClock>, MemorySessionApi) {
        let clock = Arc::new(ManualClock::new(START));
        let api = MemorySessionApi::new(Arc::clone(&clock) as Arc<dyn Clock>);
        (clock, api)
    }

    #[tokio::test]
    async fn test_single_open_session() {
        let (_, api) = server();
        let first = api.start(1).await.unwrap();
        let again = api.start(1).await.unwrap();
        assert_eq!(first.id, again.id);

        let second = api.start(2).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(api.get_active().await.unwrap().map(|s| s.id), Some(second.id));

        let history = api.get_by_book_id(1).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn test_pause_resume_accounting() {
        let (clock, api) = server();
        api.start(1).await.unwrap();
        clock.advance(10_000);

        let paused = api.pause().await.unwrap();
        assert_eq!(paused.status, SessionStatus::Paused);
        assert!(paused.paused_at.is_some());

        clock.advance(7_000);
        let resumed = api.resume().await.unwrap();
        assert_eq!(resumed.status, SessionStatus::Active);
        assert_eq!(resumed.paused_at, None);
        assert_eq!(resumed.paused_millis(), 7_000);
    }

    #[tokio::test]
    async fn test_state_conflicts() {
        let (_, api) = server();
        assert_err!(api.pause().await);
        assert_err!(api.stop(None, None).await);

        api.start(1).await.unwrap();
        assert_err!(api.resume().await);
        assert_err!(api.exclude_time(-1).await);

        api.pause().await.unwrap();
        assert_err!(api.exclude_time(1_000).await);
    }

    #[tokio::test]
    async fn test_stop_while_paused_counts_gap() {
        let (clock, api) = server();
        api.start(1).await.unwrap();
        api.pause().await.unwrap();
        clock.advance(4_000);

        let stopped = api.stop(None, Some(120)).await.unwrap().unwrap();
        assert_eq!(stopped.status, SessionStatus::Stopped);
        assert_eq!(stopped.paused_millis(), 4_000);
        assert_eq!(stopped.end_page, Some(120));
        let wire = serde_json::to_value(&stopped).unwrap();
        assert_eq!(wire["status"], "COMPLETED");
        assert!(api.get_active().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_offline_counts_calls() {
        let (_, api) = server();
        api.set_offline(true);
        assert!(matches!(api.start(1).await, Err(ApiError::Network(_))));
        assert_eq!(api.call_count("start"), 1);
        assert_eq!(api.call_count("pause"), 0);
    }
}
