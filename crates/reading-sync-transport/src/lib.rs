//! Transport layer for the reading session server.
//!
//! Provides:
//! - Wire protocol (JSON request bodies and route table)
//! - HTTP Session API client (feature: http)

pub mod protocol;

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{CredentialProvider, HttpSessionApi, StaticCredential};
pub use protocol::{ExcludeTimeRequest, Route, StartSessionRequest, StopSessionRequest};
