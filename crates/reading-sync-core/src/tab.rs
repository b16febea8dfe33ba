//! Per-tab identity.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

const PREFIX: &str = "tab_";
const SUFFIX_LEN: usize = 9;
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Opaque identifier of one execution context (browser tab, process, task).
///
/// Generated once when the context starts and never persisted, so a reload
/// yields a fresh identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(String);

impl TabId {
    /// Generate a new random identity of the form `tab_xxxxxxxxx`.
    ///
    /// The suffix is drawn from a v4 UUID, so tabs opened in the same
    /// millisecond still get distinct ids.
    #[must_use]
    pub fn generate() -> Self {
        let mut bits = Uuid::new_v4().as_u128();
        let mut id = String::with_capacity(PREFIX.len() + SUFFIX_LEN);
        id.push_str(PREFIX);
        for _ in 0..SUFFIX_LEN {
            id.push(BASE36[(bits % 36) as usize] as char);
            bits /= 36;
        }
        Self(id)
    }

    /// Wrap an existing identifier, e.g. one read back from storage.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrow the identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_shape() {
        let id = TabId::generate();
        let s = id.as_str();
        assert!(s.starts_with("tab_"));
        assert_eq!(s.len(), 13);
        assert!(s[4..].bytes().all(|b| b.is_ascii_digit() || b.is_ascii_lowercase()));
    }

    #[test]
    fn test_no_collisions_in_burst() {
        let ids: HashSet<TabId> = (0..10_000).map(|_| TabId::generate()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = TabId::from_raw("tab_abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"tab_abc\"");
    }
}
