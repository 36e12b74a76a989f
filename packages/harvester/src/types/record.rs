//! Record types - raw extractions, summaries, and cache entries.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::FailureKind;
use crate::types::target::TargetId;

/// A single extracted field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    /// True when the value carries no visible text.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Text(s) => s.trim().is_empty(),
            Self::List(items) => items.iter().all(|i| i.trim().is_empty()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(items: Vec<String>) -> Self {
        Self::List(items)
    }
}

/// Ordered field map. Insertion order is serialization order.
pub type FieldMap = IndexMap<String, FieldValue>;

/// Fields extracted from one rendered profile page.
///
/// Created by the fetch worker and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub target: TargetId,
    pub fields: FieldMap,
    pub extracted_at: DateTime<Utc>,
}

impl RawRecord {
    pub fn new(target: TargetId, fields: FieldMap) -> Self {
        Self {
            target,
            fields,
            extracted_at: Utc::now(),
        }
    }

    /// Add a field (builder style, mostly for tests).
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Whether at least one field carries text.
    pub fn has_data(&self) -> bool {
        self.fields.values().any(|v| !v.is_blank())
    }

    /// Look up a scalar field.
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.fields.get(name)? {
            FieldValue::Text(s) => Some(s.as_str()),
            FieldValue::List(_) => None,
        }
    }
}

/// Summary of one raw record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub target: TargetId,

    /// Per-chunk summaries in sequence index order
    pub chunk_summaries: Vec<String>,

    /// Merged summary text
    pub text: String,

    /// Hash of the prompts used, for staleness checks
    pub prompt_hash: String,

    pub created_at: DateTime<Utc>,
}

impl Summary {
    pub fn new(
        target: TargetId,
        chunk_summaries: Vec<String>,
        text: impl Into<String>,
        prompt_hash: impl Into<String>,
    ) -> Self {
        Self {
            target,
            chunk_summaries,
            text: text.into(),
            prompt_hash: prompt_hash.into(),
            created_at: Utc::now(),
        }
    }

    /// Check if this summary was generated with different prompts.
    pub fn is_prompt_stale(&self, current_prompt_hash: &str) -> bool {
        self.prompt_hash != current_prompt_hash
    }
}

/// Cache entry status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheStatus {
    Pending,
    Done,
    Failed,
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        })
    }
}

/// Why an entry ended up FAILED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub reason: String,
}

/// Durable cache entry for one target.
///
/// At most one per target. `raw` and `summary` are both present exactly when
/// the status is DONE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRecord {
    pub target: TargetId,
    pub status: CacheStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<RawRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,

    /// Fetch attempts spent on the latest processing
    #[serde(default)]
    pub attempts: u32,

    /// Run that holds (or last held) the reservation
    pub run_id: Uuid,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CachedRecord {
    /// Fresh PENDING entry owned by `run_id`.
    pub fn pending(target: TargetId, run_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            target,
            status: CacheStatus::Pending,
            raw: None,
            summary: None,
            failure: None,
            attempts: 0,
            run_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Re-open an existing entry as PENDING, keeping its creation time.
    pub fn reopened(&self, run_id: Uuid) -> Self {
        Self {
            status: CacheStatus::Pending,
            failure: None,
            attempts: 0,
            run_id,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == CacheStatus::Done
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|f| f.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> TargetId {
        TargetId::new("https://example.com/in/a").unwrap()
    }

    #[test]
    fn test_has_data_ignores_blank_fields() {
        let raw = RawRecord::new(target(), FieldMap::new())
            .with_field("name", "  ")
            .with_field("skills", vec![" ".to_string()]);
        assert!(!raw.has_data());

        let raw = raw.with_field("headline", "Engineer");
        assert!(raw.has_data());
        assert_eq!(raw.text("headline"), Some("Engineer"));
    }

    #[test]
    fn test_field_order_survives_json() {
        let raw = RawRecord::new(target(), FieldMap::new())
            .with_field("zeta", "1")
            .with_field("alpha", "2");
        let json = serde_json::to_string(&raw).unwrap();
        let back: RawRecord = serde_json::from_str(&json).unwrap();
        let keys: Vec<_> = back.fields.keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_reopened_clears_failure() {
        let mut entry = CachedRecord::pending(target(), Uuid::new_v4());
        entry.status = CacheStatus::Failed;
        entry.failure = Some(Failure {
            kind: FailureKind::RenderTimeout,
            reason: "slow".into(),
        });
        entry.attempts = 3;

        let run = Uuid::new_v4();
        let reopened = entry.reopened(run);
        assert_eq!(reopened.status, CacheStatus::Pending);
        assert!(reopened.failure.is_none());
        assert_eq!(reopened.attempts, 0);
        assert_eq!(reopened.run_id, run);
        assert_eq!(reopened.created_at, entry.created_at);
    }
}
