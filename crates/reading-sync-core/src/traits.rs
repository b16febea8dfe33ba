//! Session records and the server-side session collaborator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Server-assigned session identifier.
pub type SessionId = i64;

/// Book identifier.
pub type BookId = i64;

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Timer is running.
    Active,
    /// Timer is frozen at `paused_at`.
    Paused,
    /// Session has ended. The server reports this as `COMPLETED`.
    #[serde(rename = "COMPLETED", alias = "STOPPED")]
    Stopped,
}

/// A reading session as reported by the server.
///
/// Timestamps are kept as the raw strings the server sent so that a malformed
/// value degrades to "elapsed 0" instead of failing the whole record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Session id.
    pub id: SessionId,
    /// Book being read.
    pub book_id: BookId,
    /// Logical start, RFC 3339.
    pub start_time: String,
    /// End of the session, RFC 3339.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    /// Current status.
    pub status: SessionStatus,
    /// Page the reader stopped on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_page: Option<u32>,
    /// Milliseconds already excluded from elapsed time.
    #[serde(default)]
    pub paused_millis: Option<i64>,
    /// When the session was paused, RFC 3339. Present iff `status` is `Paused`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<String>,
}

impl SessionRecord {
    /// Parse `start_time`, `None` if malformed.
    #[must_use]
    pub fn start_instant(&self) -> Option<DateTime<Utc>> {
        parse_instant(&self.start_time)
    }

    /// Parse `paused_at`, `None` if absent or malformed.
    #[must_use]
    pub fn paused_instant(&self) -> Option<DateTime<Utc>> {
        self.paused_at.as_deref().and_then(parse_instant)
    }

    /// Parse `end_time`, `None` if absent or malformed.
    #[must_use]
    pub fn end_instant(&self) -> Option<DateTime<Utc>> {
        self.end_time.as_deref().and_then(parse_instant)
    }

    /// Excluded milliseconds, treating a missing value as zero.
    #[must_use]
    pub fn paused_millis(&self) -> i64 {
        self.paused_millis.unwrap_or(0)
    }

    /// Whether this record describes a session that is still open.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self.status, SessionStatus::Active | SessionStatus::Paused)
    }
}

/// Parse an RFC 3339 timestamp into UTC.
#[must_use]
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Session API error.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Trait for the server-side reading session API.
///
/// The server is the authority on whether a session exists; every tab only
/// caches what these calls return.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Fetch the caller's open session, if any.
    async fn get_active(&self) -> Result<Option<SessionRecord>, ApiError>;

    /// List all sessions recorded for a book.
    async fn get_by_book_id(&self, book_id: BookId) -> Result<Vec<SessionRecord>, ApiError>;

    /// Start a session for a book.
    async fn start(&self, book_id: BookId) -> Result<SessionRecord, ApiError>;

    /// Stop the open session.
    async fn stop(
        &self,
        end_time: Option<DateTime<Utc>>,
        end_page: Option<u32>,
    ) -> Result<Option<SessionRecord>, ApiError>;

    /// Pause the open session.
    async fn pause(&self) -> Result<SessionRecord, ApiError>;

    /// Resume the paused session.
    async fn resume(&self) -> Result<SessionRecord, ApiError>;

    /// Exclude `millis` from the open session's elapsed time.
    async fn exclude_time(&self, millis: i64) -> Result<SessionRecord, ApiError>;
}
