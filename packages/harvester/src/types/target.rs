//! Target identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Opaque identifier naming one profile.
///
/// Usually a profile URL. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    /// Create an identifier, trimming surrounding whitespace.
    ///
    /// Returns `None` for blank input.
    pub fn new(id: impl AsRef<str>) -> Option<Self> {
        let id = id.as_ref().trim();
        if id.is_empty() {
            None
        } else {
            Some(Self(id.to_string()))
        }
    }

    /// Normalize a profile URL into an identifier.
    ///
    /// Drops the query string (tracking parameters) and fragment, and the
    /// trailing slash, so the same profile reached from different search
    /// pages maps to one cache entry.
    pub fn from_profile_url(raw: &str) -> Option<Self> {
        let mut url = Url::parse(raw.trim()).ok()?;
        url.set_query(None);
        url.set_fragment(None);

        let normalized = url.as_str().trim_end_matches('/').to_string();
        Self::new(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key under which this target's record is stored.
    pub fn record_key(&self) -> String {
        format!("{}{}", RECORD_PREFIX, self.0)
    }

    /// Last path segment, handy for file names and log lines.
    pub fn slug(&self) -> &str {
        self.0
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.0)
    }
}

/// Key prefix for cached records in the key-value store.
pub const RECORD_PREFIX: &str = "record:";

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TargetId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_rejected() {
        assert!(TargetId::new("   ").is_none());
        assert_eq!(TargetId::new("  a ").unwrap().as_str(), "a");
    }

    #[test]
    fn test_profile_url_normalized() {
        let id = TargetId::from_profile_url(
            "https://www.linkedin.com/in/jane-doe/?miniProfileUrn=abc#top",
        )
        .unwrap();
        assert_eq!(id.as_str(), "https://www.linkedin.com/in/jane-doe");
        assert_eq!(id.slug(), "jane-doe");
    }

    #[test]
    fn test_record_key() {
        let id = TargetId::new("x").unwrap();
        assert_eq!(id.record_key(), "record:x");
    }
}
