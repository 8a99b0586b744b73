// src/core/cache/mod.rs

//! The shared cache: typed list, set and map operations over store-backed keys.

use crate::core::MoonshipError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

pub mod bulk;
pub mod memory;
pub mod redis;

pub use bulk::{BulkOp, BulkStep, KeyKind};
pub use memory::MemorySharedCache;
pub use redis::RedisSharedCache;

/// Capability set of the shared cache, implemented once per backend.
///
/// All values are UTF-8 strings. Operating on a key that holds a different
/// container type fails with [`MoonshipError::WrongType`]; transport failures
/// are reported to the caller and never retried here.
#[async_trait]
pub trait SharedCache: Send + Sync {
    /// Acquires the shared store connection for this cache.
    async fn open(&self) -> Result<(), MoonshipError>;

    /// Releases the shared store connection. Calling it twice is harmless.
    async fn close(&self) -> Result<(), MoonshipError>;

    async fn list_push_head(&self, key: &str, element: &str) -> Result<(), MoonshipError>;
    async fn list_push_tail(&self, key: &str, element: &str) -> Result<(), MoonshipError>;
    async fn list_pop_head(&self, key: &str) -> Result<Option<String>, MoonshipError>;
    async fn list_pop_tail(&self, key: &str) -> Result<Option<String>, MoonshipError>;
    /// Removes every occurrence of `element` from the list.
    async fn list_remove(&self, key: &str, element: &str) -> Result<(), MoonshipError>;
    async fn list_get_head(&self, key: &str) -> Result<Option<String>, MoonshipError>;
    async fn list_get_tail(&self, key: &str) -> Result<Option<String>, MoonshipError>;
    async fn list_get_elements(&self, key: &str) -> Result<Vec<String>, MoonshipError>;

    async fn set_add(&self, key: &str, element: &str) -> Result<(), MoonshipError>;
    async fn set_remove(&self, key: &str, element: &str) -> Result<(), MoonshipError>;
    async fn set_get_elements(&self, key: &str) -> Result<HashSet<String>, MoonshipError>;

    /// Merges `entries` into the map stored under `key`.
    async fn map_merge(
        &self,
        key: &str,
        entries: &HashMap<String, String>,
    ) -> Result<(), MoonshipError>;
    async fn map_get(&self, key: &str, field: &str) -> Result<Option<String>, MoonshipError>;
    async fn map_get_entries(&self, key: &str) -> Result<HashMap<String, String>, MoonshipError>;

    /// Removes the key whatever type of value it holds.
    async fn delete(&self, key: &str) -> Result<(), MoonshipError>;

    /// Sets the key to expire `ttl_ms` milliseconds from now, replacing any
    /// previous expiry. Missing keys are left alone.
    async fn expire(&self, key: &str, ttl_ms: u64) -> Result<(), MoonshipError>;

    /// Starts a bulk operation whose steps are queued until `execute`.
    fn start_bulk(&self, transactional: bool) -> BulkOp<'_>;

    /// Commits queued steps. Called by [`BulkOp::execute`].
    async fn execute_bulk(
        &self,
        transactional: bool,
        steps: Vec<BulkStep>,
    ) -> Result<(), MoonshipError>;

    /// Stores `entries` under `key`.
    ///
    /// With `append` the entries are merged into the existing map. Without it
    /// the map is replaced: delete and put commit together, so no reader ever
    /// sees a mix of old and new fields.
    async fn map_put(
        &self,
        key: &str,
        entries: &HashMap<String, String>,
        append: bool,
    ) -> Result<(), MoonshipError> {
        if append {
            if entries.is_empty() {
                return Ok(());
            }
            self.map_merge(key, entries).await
        } else {
            self.start_bulk(true)
                .delete(key)
                .map_put(key, entries)
                .execute()
                .await
        }
    }
}
