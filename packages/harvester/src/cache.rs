//! Cache store - the sole authority over per-target state transitions.
//!
//! Each target moves through ABSENT → PENDING → {DONE, FAILED}. Every
//! transition is a compare-and-swap against the exact value read, so two
//! workers racing on the same target can never both win a reservation and a
//! commit can never overwrite someone else's entry.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{FailureKind, StoreError, StoreResult};
use crate::traits::kv::KvStore;
use crate::types::{
    record::{CacheStatus, CachedRecord, Failure, RawRecord, Summary},
    target::{TargetId, RECORD_PREFIX},
};

/// Which existing entries a reservation may re-open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReserveMode {
    /// Re-open DONE entries.
    pub force_refresh: bool,

    /// Re-open FAILED entries of any kind.
    pub retry_failed: bool,
}

impl ReserveMode {
    fn may_reopen(&self, entry: &CachedRecord) -> bool {
        match entry.status {
            CacheStatus::Pending => false,
            CacheStatus::Done => self.force_refresh,
            CacheStatus::Failed => {
                self.retry_failed || entry.failure_kind() == Some(FailureKind::Interrupted)
            }
        }
    }
}

/// Per-status entry counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheCounts {
    pub pending: usize,
    pub done: usize,
    pub failed: usize,
}

/// Cache of acquired records over a [`KvStore`].
pub struct CacheStore<K: KvStore + ?Sized> {
    kv: Arc<K>,
    run_id: Uuid,
}

impl<K: KvStore + ?Sized> Clone for CacheStore<K> {
    fn clone(&self) -> Self {
        Self {
            kv: Arc::clone(&self.kv),
            run_id: self.run_id,
        }
    }
}

impl<K: KvStore + ?Sized> CacheStore<K> {
    /// Cache owned by a fresh run.
    pub fn new(kv: Arc<K>) -> Self {
        Self::with_run_id(kv, Uuid::now_v7())
    }

    pub fn with_run_id(kv: Arc<K>, run_id: Uuid) -> Self {
        Self { kv, run_id }
    }

    /// Run id stamped on reservations made through this handle.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn kv(&self) -> &Arc<K> {
        &self.kv
    }

    /// Read the current entry for `id`.
    pub async fn get(&self, id: &TargetId) -> StoreResult<Option<CachedRecord>> {
        Ok(self.read(id).await?.map(|(_, record)| record))
    }

    /// Atomically claim `id` for processing.
    ///
    /// Returns `false` when another worker holds it, or when it is DONE or
    /// FAILED and `mode` does not allow re-opening it.
    pub async fn reserve(&self, id: &TargetId, mode: ReserveMode) -> StoreResult<bool> {
        let key = id.record_key();
        let (expected, next) = match self.read(id).await? {
            None => (None, CachedRecord::pending(id.clone(), self.run_id)),
            Some((raw, entry)) => {
                if !mode.may_reopen(&entry) {
                    debug!(target_id = %id, status = %entry.status, "reservation refused");
                    return Ok(false);
                }
                (Some(raw), entry.reopened(self.run_id))
            }
        };

        let encoded = serde_json::to_string(&next)?;
        let won = self
            .kv
            .compare_and_swap(&key, expected.as_deref(), &encoded)
            .await?;

        if won {
            debug!(target_id = %id, run_id = %self.run_id, "reserved");
        } else {
            debug!(target_id = %id, "lost reservation race");
        }
        Ok(won)
    }

    /// PENDING → DONE with the acquired record and its summary.
    pub async fn commit(
        &self,
        id: &TargetId,
        raw: RawRecord,
        summary: Summary,
        attempts: u32,
    ) -> StoreResult<()> {
        if raw.target != *id {
            return Err(StoreError::IncompatibleRecord {
                target: id.clone(),
                reason: format!("raw record belongs to {}", raw.target),
            });
        }
        if summary.target != *id {
            return Err(StoreError::IncompatibleRecord {
                target: id.clone(),
                reason: format!("summary belongs to {}", summary.target),
            });
        }

        self.transition(id, CacheStatus::Done, |entry| {
            entry.raw = Some(raw);
            entry.summary = Some(summary);
            entry.failure = None;
            entry.attempts = attempts;
        })
        .await?;

        info!(target_id = %id, attempts, "committed");
        Ok(())
    }

    /// PENDING → FAILED.
    pub async fn fail(
        &self,
        id: &TargetId,
        kind: FailureKind,
        reason: impl Into<String>,
        attempts: u32,
    ) -> StoreResult<()> {
        let reason = reason.into();
        self.transition(id, CacheStatus::Failed, |entry| {
            entry.failure = Some(Failure {
                kind,
                reason: reason.clone(),
            });
            entry.attempts = attempts;
        })
        .await?;

        warn!(target_id = %id, kind = %kind, attempts, reason = %reason, "marked failed");
        Ok(())
    }

    /// Turn PENDING entries left by other runs into FAILED/`Interrupted`.
    ///
    /// Assumes one live run per store: anything PENDING that this run did
    /// not reserve was abandoned by a crash or a hard stop. Returns the
    /// recovered targets.
    pub async fn recover_interrupted(&self) -> StoreResult<Vec<TargetId>> {
        let mut recovered = Vec::new();

        for (key, raw) in self.kv.scan_prefix(RECORD_PREFIX).await? {
            let entry = decode(&key, &raw)?;
            if entry.status != CacheStatus::Pending || entry.run_id == self.run_id {
                continue;
            }

            let mut next = entry.clone();
            next.status = CacheStatus::Failed;
            next.failure = Some(Failure {
                kind: FailureKind::Interrupted,
                reason: format!("abandoned by run {}", entry.run_id),
            });
            next.updated_at = Utc::now();

            let encoded = serde_json::to_string(&next)?;
            if self.kv.compare_and_swap(&key, Some(raw.as_str()), &encoded).await? {
                recovered.push(entry.target);
            }
        }

        if !recovered.is_empty() {
            info!(count = recovered.len(), "recovered interrupted entries");
        }
        Ok(recovered)
    }

    /// All entries, optionally filtered by status, ordered by key.
    pub async fn list(&self, status: Option<CacheStatus>) -> StoreResult<Vec<CachedRecord>> {
        let mut records = Vec::new();
        for (key, raw) in self.kv.scan_prefix(RECORD_PREFIX).await? {
            let entry = decode(&key, &raw)?;
            if status.map_or(true, |s| entry.status == s) {
                records.push(entry);
            }
        }
        Ok(records)
    }

    pub async fn counts(&self) -> StoreResult<CacheCounts> {
        let mut counts = CacheCounts::default();
        for entry in self.list(None).await? {
            match entry.status {
                CacheStatus::Pending => counts.pending += 1,
                CacheStatus::Done => counts.done += 1,
                CacheStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    /// Failure kinds of all FAILED entries.
    pub async fn failure_breakdown(&self) -> StoreResult<HashMap<FailureKind, usize>> {
        let mut breakdown = HashMap::new();
        for entry in self.list(Some(CacheStatus::Failed)).await? {
            if let Some(kind) = entry.failure_kind() {
                *breakdown.entry(kind).or_insert(0) += 1;
            }
        }
        Ok(breakdown)
    }

    async fn read(&self, id: &TargetId) -> StoreResult<Option<(String, CachedRecord)>> {
        let key = id.record_key();
        match self.kv.get(&key).await? {
            Some(raw) => {
                let entry = decode(&key, &raw)?;
                Ok(Some((raw, entry)))
            }
            None => Ok(None),
        }
    }

    /// Move a PENDING entry owned by this run to `to`.
    async fn transition(
        &self,
        id: &TargetId,
        to: CacheStatus,
        apply: impl FnOnce(&mut CachedRecord),
    ) -> StoreResult<()> {
        let key = id.record_key();
        let (raw, entry) = self.read(id).await?.ok_or_else(|| StoreError::InvalidTransition {
            target: id.clone(),
            from: "ABSENT".to_string(),
            to: to.to_string(),
        })?;

        if entry.status != CacheStatus::Pending || entry.run_id != self.run_id {
            return Err(StoreError::InvalidTransition {
                target: id.clone(),
                from: format!("{} (run {})", entry.status, entry.run_id),
                to: to.to_string(),
            });
        }

        let mut next = entry;
        next.status = to;
        next.updated_at = Utc::now();
        apply(&mut next);

        let encoded = serde_json::to_string(&next)?;
        if !self.kv.compare_and_swap(&key, Some(raw.as_str()), &encoded).await? {
            return Err(StoreError::Conflict { target: id.clone() });
        }
        Ok(())
    }
}

fn decode(key: &str, raw: &str) -> StoreResult<CachedRecord> {
    serde_json::from_str(raw).map_err(|source| StoreError::Corrupt {
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryKv;
    use crate::types::record::FieldMap;

    fn id(s: &str) -> TargetId {
        TargetId::new(s).unwrap()
    }

    fn raw(target: &TargetId) -> RawRecord {
        RawRecord::new(target.clone(), FieldMap::new()).with_field("name", "Jane")
    }

    fn summary(target: &TargetId) -> Summary {
        Summary::new(target.clone(), vec!["s".into()], "s", "hash")
    }

    #[tokio::test]
    async fn test_reserve_commit_cycle() {
        let cache = CacheStore::new(Arc::new(MemoryKv::new()));
        let a = id("a");

        assert!(cache.get(&a).await.unwrap().is_none());
        assert!(cache.reserve(&a, ReserveMode::default()).await.unwrap());
        assert_eq!(cache.get(&a).await.unwrap().unwrap().status, CacheStatus::Pending);

        // Already pending
        assert!(!cache.reserve(&a, ReserveMode::default()).await.unwrap());

        cache.commit(&a, raw(&a), summary(&a), 1).await.unwrap();
        let entry = cache.get(&a).await.unwrap().unwrap();
        assert_eq!(entry.status, CacheStatus::Done);
        assert!(entry.raw.is_some() && entry.summary.is_some());

        // DONE is sticky without force-refresh
        assert!(!cache.reserve(&a, ReserveMode::default()).await.unwrap());
        let force = ReserveMode {
            force_refresh: true,
            ..Default::default()
        };
        assert!(cache.reserve(&a, force).await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_rejects_mismatched_pair() {
        let cache = CacheStore::new(Arc::new(MemoryKv::new()));
        let a = id("a");
        let b = id("b");
        cache.reserve(&a, ReserveMode::default()).await.unwrap();

        let err = cache.commit(&a, raw(&a), summary(&b), 1).await.unwrap_err();
        assert!(matches!(err, StoreError::IncompatibleRecord { .. }));
        assert_eq!(cache.get(&a).await.unwrap().unwrap().status, CacheStatus::Pending);
    }

    #[tokio::test]
    async fn test_commit_requires_pending() {
        let cache = CacheStore::new(Arc::new(MemoryKv::new()));
        let a = id("a");
        let err = cache.commit(&a, raw(&a), summary(&a), 1).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_failed_requires_retry_flag() {
        let cache = CacheStore::new(Arc::new(MemoryKv::new()));
        let a = id("a");
        cache.reserve(&a, ReserveMode::default()).await.unwrap();
        cache
            .fail(&a, FailureKind::ExtractionFailed, "empty page", 3)
            .await
            .unwrap();

        let entry = cache.get(&a).await.unwrap().unwrap();
        assert_eq!(entry.failure_kind(), Some(FailureKind::ExtractionFailed));
        assert_eq!(entry.attempts, 3);

        assert!(!cache.reserve(&a, ReserveMode::default()).await.unwrap());
        // force-refresh covers DONE only
        let force = ReserveMode {
            force_refresh: true,
            ..Default::default()
        };
        assert!(!cache.reserve(&a, force).await.unwrap());

        let retry = ReserveMode {
            retry_failed: true,
            ..Default::default()
        };
        assert!(cache.reserve(&a, retry).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_reserve_single_winner() {
        let kv = Arc::new(MemoryKv::new());
        let a = id("contested");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = CacheStore::new(Arc::clone(&kv));
                let a = a.clone();
                tokio::spawn(async move { cache.reserve(&a, ReserveMode::default()).await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_recover_interrupted() {
        let kv = Arc::new(MemoryKv::new());
        let crashed = CacheStore::new(Arc::clone(&kv));
        let a = id("a");
        let b = id("b");
        crashed.reserve(&a, ReserveMode::default()).await.unwrap();
        crashed.reserve(&b, ReserveMode::default()).await.unwrap();
        crashed.commit(&b, raw(&b), summary(&b), 1).await.unwrap();

        let next_run = CacheStore::new(Arc::clone(&kv));
        let recovered = next_run.recover_interrupted().await.unwrap();
        assert_eq!(recovered, vec![a.clone()]);

        let entry = next_run.get(&a).await.unwrap().unwrap();
        assert_eq!(entry.failure_kind(), Some(FailureKind::Interrupted));

        // Interrupted entries are retryable without the operator flag
        assert!(next_run.reserve(&a, ReserveMode::default()).await.unwrap());
        assert!(!next_run.reserve(&b, ReserveMode::default()).await.unwrap());
    }

    #[tokio::test]
    async fn test_other_run_cannot_commit() {
        let kv = Arc::new(MemoryKv::new());
        let owner = CacheStore::new(Arc::clone(&kv));
        let intruder = CacheStore::new(Arc::clone(&kv));
        let a = id("a");

        owner.reserve(&a, ReserveMode::default()).await.unwrap();
        let err = intruder.commit(&a, raw(&a), summary(&a), 1).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_counts() {
        let cache = CacheStore::new(Arc::new(MemoryKv::new()));
        for name in ["a", "b", "c"] {
            cache.reserve(&id(name), ReserveMode::default()).await.unwrap();
        }
        cache.commit(&id("a"), raw(&id("a")), summary(&id("a")), 1).await.unwrap();
        cache
            .fail(&id("b"), FailureKind::BudgetExceeded, "huge", 1)
            .await
            .unwrap();

        let counts = cache.counts().await.unwrap();
        assert_eq!(
            counts,
            CacheCounts {
                pending: 1,
                done: 1,
                failed: 1
            }
        );
        let breakdown = cache.failure_breakdown().await.unwrap();
        assert_eq!(breakdown.get(&FailureKind::BudgetExceeded), Some(&1));
    }
}
