// src/core/backend.rs

//! Chooses the store implementation once and builds every component over it.

use crate::config::{Backend, Config, SessionConfig};
use crate::core::MoonshipError;
use crate::core::bus::{MemoryTransport, MessageBus, PubSubTransport, RedisTransport};
use crate::core::cache::{MemorySharedCache, RedisSharedCache, SharedCache};
use crate::core::session::SessionStore;
use crate::core::store::{
    ConnectionManager, MemoryConnectionManager, MemoryConnector, MemoryStore,
    RedisConnectionManager, RespConnector,
};
use std::sync::Arc;
use tracing::info;

/// The process-wide connection manager of the selected backend.
///
/// Each component built here holds its own lease on the one shared connection,
/// so components can be opened and closed independently.
#[derive(Clone)]
pub enum StoreBackend {
    Redis(Arc<RedisConnectionManager>),
    Memory(Arc<MemoryConnectionManager>),
}

impl StoreBackend {
    /// Validates the store settings and builds the manager. No connection is made.
    pub fn from_config(config: &Config) -> Result<Self, MoonshipError> {
        match config.backend {
            Backend::Redis => {
                let connector = RespConnector::from_config(&config.redis)?;
                info!(
                    "Using Redis backend at {} (tls: {}).",
                    connector.endpoint().address(),
                    connector.endpoint().tls
                );
                Ok(StoreBackend::Redis(Arc::new(ConnectionManager::new(connector))))
            }
            Backend::Memory => {
                info!("Using in-process memory backend.");
                Ok(Self::memory(Arc::new(MemoryStore::new())))
            }
        }
    }

    /// An in-process backend over `store`.
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        StoreBackend::Memory(Arc::new(ConnectionManager::new(MemoryConnector::new(store))))
    }

    pub fn shared_cache(&self) -> Arc<dyn SharedCache> {
        match self {
            StoreBackend::Redis(manager) => Arc::new(RedisSharedCache::new(manager.clone())),
            StoreBackend::Memory(manager) => Arc::new(MemorySharedCache::new(manager.clone())),
        }
    }

    pub fn pubsub_transport(&self) -> Arc<dyn PubSubTransport> {
        match self {
            StoreBackend::Redis(manager) => Arc::new(RedisTransport::new(manager.clone())),
            StoreBackend::Memory(manager) => Arc::new(MemoryTransport::new(manager.clone())),
        }
    }

    pub fn message_bus(&self) -> MessageBus {
        MessageBus::new(self.pubsub_transport())
    }

    pub fn session_store(&self, config: &SessionConfig) -> SessionStore {
        let cache: Box<dyn SharedCache> = match self {
            StoreBackend::Redis(manager) => Box::new(RedisSharedCache::new(manager.clone())),
            StoreBackend::Memory(manager) => Box::new(MemorySharedCache::new(manager.clone())),
        };
        SessionStore::new(cache, config.idle_expiry)
    }

    /// Current number of holders of the shared connection.
    pub async fn ref_count(&self) -> usize {
        match self {
            StoreBackend::Redis(manager) => manager.ref_count().await,
            StoreBackend::Memory(manager) => manager.ref_count().await,
        }
    }
}
