//! JSON export of acquired profiles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::CacheStore;
use crate::error::StoreResult;
use crate::traits::kv::KvStore;
use crate::types::record::{CacheStatus, CachedRecord, FieldMap};

/// One exported profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedProfile {
    pub name: String,
    pub profile_url: String,
    pub headline: String,
    pub location: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Every extracted field, in extraction order
    pub fields: FieldMap,

    pub extracted_at: DateTime<Utc>,
}

impl ExportedProfile {
    /// Build from a DONE entry. Other entries have no data to export.
    pub fn from_record(entry: &CachedRecord) -> Option<Self> {
        let raw = entry.raw.as_ref()?;
        let text = |field: &str| raw.text(field).unwrap_or_default().trim().to_string();

        let name = match text("name") {
            name if name.is_empty() => "Unknown".to_string(),
            name => name,
        };

        Some(Self {
            name,
            profile_url: entry.target.to_string(),
            headline: text("headline"),
            location: text("location"),
            summary: entry.summary.as_ref().map(|s| s.text.clone()),
            fields: raw.fields.clone(),
            extracted_at: raw.extracted_at,
        })
    }
}

/// Export document: `{"profiles": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileExport {
    pub profiles: Vec<ExportedProfile>,
}

impl ProfileExport {
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Collect every DONE profile in the cache, ordered by target id.
pub async fn export_profiles<K: KvStore + ?Sized>(cache: &CacheStore<K>) -> StoreResult<ProfileExport> {
    let entries = cache.list(Some(CacheStatus::Done)).await?;
    Ok(ProfileExport {
        profiles: entries.iter().filter_map(ExportedProfile::from_record).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ReserveMode;
    use crate::stores::MemoryKv;
    use crate::types::record::{RawRecord, Summary};
    use crate::types::target::TargetId;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_exports_done_profiles_only() {
        let cache = CacheStore::new(Arc::new(MemoryKv::new()));
        let ada = TargetId::new("https://www.linkedin.com/in/ada").unwrap();
        let grace = TargetId::new("https://www.linkedin.com/in/grace").unwrap();

        cache.reserve(&ada, ReserveMode::default()).await.unwrap();
        let raw = RawRecord::new(ada.clone(), Default::default())
            .with_field("name", "Ada Lovelace")
            .with_field("headline", "Analyst");
        let summary = Summary::new(ada.clone(), vec!["s".into()], "Analyst in London", "h");
        cache.commit(&ada, raw, summary, 1).await.unwrap();

        // Still pending, not exported
        cache.reserve(&grace, ReserveMode::default()).await.unwrap();

        let export = export_profiles(&cache).await.unwrap();
        assert_eq!(export.profiles.len(), 1);

        let profile = &export.profiles[0];
        assert_eq!(profile.name, "Ada Lovelace");
        assert_eq!(profile.profile_url, "https://www.linkedin.com/in/ada");
        assert_eq!(profile.location, "");
        assert_eq!(profile.summary.as_deref(), Some("Analyst in London"));

        let json: serde_json::Value =
            serde_json::from_str(&export.to_json_pretty().unwrap()).unwrap();
        assert!(json["profiles"].is_array());
        assert_eq!(json["profiles"][0]["headline"], "Analyst");
    }

    #[test]
    fn test_missing_name_is_unknown() {
        let target = TargetId::new("https://www.linkedin.com/in/anon").unwrap();
        let mut entry = CachedRecord::pending(target.clone(), uuid::Uuid::now_v7());
        entry.raw = Some(RawRecord::new(target, Default::default()).with_field("headline", "x"));

        let profile = ExportedProfile::from_record(&entry).unwrap();
        assert_eq!(profile.name, "Unknown");
        assert!(profile.summary.is_none());
    }
}
