//! Durable key-value interface backing the cache store.

use async_trait::async_trait;

use crate::error::StoreResult;

/// Key-value store with compare-and-swap.
///
/// `compare_and_swap` is the only primitive the cache relies on for
/// atomicity, so it must be linearizable per key.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn put(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Replace the value under `key` with `new` iff the current value equals
    /// `expected` (`None` = key absent). Returns whether the swap happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> StoreResult<bool>;

    /// All `(key, value)` pairs whose key starts with `prefix`, ordered by key.
    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, String)>>;
}
