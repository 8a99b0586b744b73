// src/core/cache/memory.rs

//! `SharedCache` over the in-process [`MemoryStore`].

use super::{BulkOp, BulkStep, SharedCache};
use crate::core::MoonshipError;
use crate::core::store::{ConnectionLease, MemoryConnectionManager, MemoryConnector};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub struct MemorySharedCache {
    lease: ConnectionLease<MemoryConnector>,
}

impl MemorySharedCache {
    pub fn new(manager: Arc<MemoryConnectionManager>) -> Self {
        Self {
            lease: ConnectionLease::new(manager),
        }
    }

    async fn apply(&self, step: BulkStep) -> Result<(), MoonshipError> {
        self.lease.get().await?.apply(&[step], false)
    }
}

#[async_trait]
impl SharedCache for MemorySharedCache {
    async fn open(&self) -> Result<(), MoonshipError> {
        self.lease.open().await.map(|_| ())
    }

    async fn close(&self) -> Result<(), MoonshipError> {
        self.lease.close().await
    }

    async fn list_push_head(&self, key: &str, element: &str) -> Result<(), MoonshipError> {
        self.apply(BulkStep::ListPushHead {
            key: key.to_string(),
            element: element.to_string(),
        })
        .await
    }

    async fn list_push_tail(&self, key: &str, element: &str) -> Result<(), MoonshipError> {
        self.apply(BulkStep::ListPushTail {
            key: key.to_string(),
            element: element.to_string(),
        })
        .await
    }

    async fn list_pop_head(&self, key: &str) -> Result<Option<String>, MoonshipError> {
        self.lease.get().await?.list_pop(key, true)
    }

    async fn list_pop_tail(&self, key: &str) -> Result<Option<String>, MoonshipError> {
        self.lease.get().await?.list_pop(key, false)
    }

    async fn list_remove(&self, key: &str, element: &str) -> Result<(), MoonshipError> {
        self.apply(BulkStep::ListRemove {
            key: key.to_string(),
            element: element.to_string(),
        })
        .await
    }

    async fn list_get_head(&self, key: &str) -> Result<Option<String>, MoonshipError> {
        self.lease.get().await?.list_get(key, true)
    }

    async fn list_get_tail(&self, key: &str) -> Result<Option<String>, MoonshipError> {
        self.lease.get().await?.list_get(key, false)
    }

    async fn list_get_elements(&self, key: &str) -> Result<Vec<String>, MoonshipError> {
        self.lease.get().await?.list_elements(key)
    }

    async fn set_add(&self, key: &str, element: &str) -> Result<(), MoonshipError> {
        self.apply(BulkStep::SetAdd {
            key: key.to_string(),
            element: element.to_string(),
        })
        .await
    }

    async fn set_remove(&self, key: &str, element: &str) -> Result<(), MoonshipError> {
        self.apply(BulkStep::SetRemove {
            key: key.to_string(),
            element: element.to_string(),
        })
        .await
    }

    async fn set_get_elements(&self, key: &str) -> Result<HashSet<String>, MoonshipError> {
        self.lease.get().await?.set_members(key)
    }

    async fn map_merge(
        &self,
        key: &str,
        entries: &HashMap<String, String>,
    ) -> Result<(), MoonshipError> {
        self.apply(BulkStep::MapPut {
            key: key.to_string(),
            entries: entries.clone(),
        })
        .await
    }

    async fn map_get(&self, key: &str, field: &str) -> Result<Option<String>, MoonshipError> {
        self.lease.get().await?.map_get(key, field)
    }

    async fn map_get_entries(&self, key: &str) -> Result<HashMap<String, String>, MoonshipError> {
        self.lease.get().await?.map_entries(key)
    }

    async fn delete(&self, key: &str) -> Result<(), MoonshipError> {
        self.apply(BulkStep::Delete {
            key: key.to_string(),
        })
        .await
    }

    async fn expire(&self, key: &str, ttl_ms: u64) -> Result<(), MoonshipError> {
        self.apply(BulkStep::Expire {
            key: key.to_string(),
            ttl_ms,
        })
        .await
    }

    fn start_bulk(&self, transactional: bool) -> BulkOp<'_> {
        BulkOp::new(self, transactional)
    }

    async fn execute_bulk(
        &self,
        transactional: bool,
        steps: Vec<BulkStep>,
    ) -> Result<(), MoonshipError> {
        self.lease.get().await?.apply(&steps, transactional)
    }
}
