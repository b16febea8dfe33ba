//! HTTP Session API client.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reading_sync_core::{ApiError, BookId, SessionApi, SessionRecord};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use crate::protocol::{ExcludeTimeRequest, Route, StartSessionRequest, StopSessionRequest};

/// Source of the `Authorization` header.
pub trait CredentialProvider: Send + Sync {
    /// Full header value, e.g. `Basic dXNlcjpwYXNz`. `None` sends no header.
    fn authorization(&self) -> Option<String>;

    /// Called when the server rejects the credential with 401.
    fn invalidate(&self);
}

/// A fixed credential that can be revoked once.
#[derive(Debug, Default)]
pub struct StaticCredential {
    header: std::sync::RwLock<Option<String>>,
}

impl StaticCredential {
    #[must_use]
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: std::sync::RwLock::new(Some(header.into())),
        }
    }

    /// `Basic <token>`.
    #[must_use]
    pub fn basic(token: &str) -> Self {
        Self::new(format!("Basic {token}"))
    }
}

impl CredentialProvider for StaticCredential {
    fn authorization(&self) -> Option<String> {
        self.header.read().ok().and_then(|h| h.clone())
    }

    fn invalidate(&self) {
        if let Ok(mut header) = self.header.write() {
            header.take();
        }
    }
}

/// Session API over HTTP.
pub struct HttpSessionApi {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpSessionApi {
    /// Client for the server at `base_url` (scheme and authority, no trailing path).
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn url(&self, route: Route) -> String {
        format!("{}{}", self.base_url, route.path())
    }

    async fn call<B: Serialize + Sync>(
        &self,
        route: Route,
        body: Option<&B>,
    ) -> Result<(u16, String), ApiError> {
        let url = self.url(route);
        let mut request = if route.is_post() {
            self.client.post(&url)
        } else {
            self.client.get(&url)
        };
        if let Some(header) = self.credentials.authorization() {
            request = request.header(reqwest::header::AUTHORIZATION, header);
        }
        if let Some(body) = body {
            request = request.json(body);
        } else if route.is_post() {
            request = request.header(reqwest::header::CONTENT_TYPE, "application/json");
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        debug!(%url, status, "session api call");

        if status == 401 {
            warn!(%url, "credential rejected, invalidating");
            self.credentials.invalidate();
        }
        check_status(status, &text)?;
        Ok((status, text))
    }

    async fn call_json<B, T>(&self, route: Route, body: Option<&B>) -> Result<T, ApiError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let (_, text) = self.call(route, body).await?;
        decode(&text)
    }
}

/// Map a response status onto the error taxonomy. 2xx is success.
fn check_status(status: u16, body: &str) -> Result<(), ApiError> {
    match status {
        200..=299 => Ok(()),
        401 => Err(ApiError::Unauthorized),
        _ => Err(ApiError::Status {
            status,
            body: body.to_string(),
        }),
    }
}

fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ApiError> {
    serde_json::from_str(text).map_err(|e| ApiError::Decode(e.to_string()))
}

const NO_BODY: Option<&()> = None;

#[async_trait]
impl SessionApi for HttpSessionApi {
    async fn get_active(&self) -> Result<Option<SessionRecord>, ApiError> {
        let route = Route::Active {
            cache_bust: Utc::now().timestamp_millis(),
        };
        let (status, text) = self.call(route, NO_BODY).await?;
        if status == 204 || text.trim().is_empty() {
            return Ok(None);
        }
        decode(&text)
    }

    async fn get_by_book_id(&self, book_id: BookId) -> Result<Vec<SessionRecord>, ApiError> {
        self.call_json(Route::ByBook(book_id), NO_BODY).await
    }

    async fn start(&self, book_id: BookId) -> Result<SessionRecord, ApiError> {
        self.call_json(Route::Start, Some(&StartSessionRequest { book_id }))
            .await
    }

    async fn stop(
        &self,
        end_time: Option<DateTime<Utc>>,
        end_page: Option<u32>,
    ) -> Result<Option<SessionRecord>, ApiError> {
        let body = StopSessionRequest::new(end_time, end_page);
        let (_, text) = self.call(Route::Stop, Some(&body)).await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        decode(&text)
    }

    async fn pause(&self) -> Result<SessionRecord, ApiError> {
        self.call_json(Route::Pause, NO_BODY).await
    }

    async fn resume(&self) -> Result<SessionRecord, ApiError> {
        self.call_json(Route::Resume, NO_BODY).await
    }

    async fn exclude_time(&self, millis: i64) -> Result<SessionRecord, ApiError> {
        self.call_json(Route::ExcludeTime, Some(&ExcludeTimeRequest { millis }))
            .await
    }
}
