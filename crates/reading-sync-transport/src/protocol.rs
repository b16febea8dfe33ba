//! Wire protocol for the reading session REST API.

use chrono::{DateTime, SecondsFormat, Utc};
use reading_sync_core::BookId;
use serde::{Deserialize, Serialize};

/// Body of `POST /api/sessions/start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    pub book_id: BookId,
}

/// Body of `POST /api/sessions/stop`. Absent fields are omitted, not null.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopSessionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_page: Option<u32>,
}

impl StopSessionRequest {
    #[must_use]
    pub fn new(end_time: Option<DateTime<Utc>>, end_page: Option<u32>) -> Self {
        Self {
            end_time: end_time.map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true)),
            end_page,
        }
    }
}

/// Body of `POST /api/sessions/active/exclude-time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludeTimeRequest {
    pub millis: i64,
}

/// Session API endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// `cache_bust` is appended as `_t` so intermediaries never serve a stale answer.
    Active { cache_bust: i64 },
    ByBook(BookId),
    Start,
    Stop,
    Pause,
    Resume,
    ExcludeTime,
}

impl Route {
    /// Whether the route is a `POST`; everything else is a `GET`.
    #[must_use]
    pub const fn is_post(self) -> bool {
        !matches!(self, Self::Active { .. } | Self::ByBook(_))
    }

    /// Path and query, relative to the server origin.
    #[must_use]
    pub fn path(self) -> String {
        match self {
            Self::Active { cache_bust } => format!("/api/sessions/active?_t={cache_bust}"),
            Self::ByBook(book_id) => format!("/api/sessions/book/{book_id}"),
            Self::Start => "/api/sessions/start".to_string(),
            Self::Stop => "/api/sessions/stop".to_string(),
            Self::Pause => "/api/sessions/active/pause".to_string(),
            Self::Resume => "/api/sessions/active/resume".to_string(),
            Self::ExcludeTime => "/api/sessions/active/exclude-time".to_string(),
        }
    }
}
