// src/core/bus/memory.rs

//! Pub/sub transport over the in-process broker of [`MemoryStore`](crate::core::store::MemoryStore).

use super::transport::{InboundStream, PubSubTransport};
use crate::core::MoonshipError;
use crate::core::store::{ConnectionLease, MemoryConnectionManager, MemoryConnector};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

pub struct MemoryTransport {
    lease: ConnectionLease<MemoryConnector>,
    subscriber: Mutex<Option<u64>>,
}

impl MemoryTransport {
    pub fn new(manager: Arc<MemoryConnectionManager>) -> Self {
        Self {
            lease: ConnectionLease::new(manager),
            subscriber: Mutex::new(None),
        }
    }

    fn subscriber_id(&self) -> Result<u64, MoonshipError> {
        (*self.subscriber.lock()).ok_or(MoonshipError::NotOpen)
    }
}

#[async_trait]
impl PubSubTransport for MemoryTransport {
    async fn open(&self) -> Result<InboundStream, MoonshipError> {
        let conn = self.lease.open().await?;
        let (id, rx) = conn.register_subscriber();
        if let Some(previous) = self.subscriber.lock().replace(id) {
            conn.drop_subscriber(previous);
        }
        debug!("In-process subscriber {} registered.", id);
        Ok(UnboundedReceiverStream::new(rx).map(Ok).boxed())
    }

    async fn subscribe(&self, channel: &str) -> Result<(), MoonshipError> {
        let id = self.subscriber_id()?;
        self.lease.get().await?.subscribe(id, channel);
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), MoonshipError> {
        let id = self.subscriber_id()?;
        self.lease.get().await?.unsubscribe(id, channel);
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, MoonshipError> {
        Ok(self.lease.get().await?.publish(channel, payload))
    }

    async fn close(&self) -> Result<(), MoonshipError> {
        let id = self.subscriber.lock().take();
        if let Some(id) = id
            && let Ok(conn) = self.lease.get().await
        {
            conn.drop_subscriber(id);
        }
        self.lease.close().await
    }
}
