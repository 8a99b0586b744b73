// src/core/bus/transport.rs

//! The channel-level publish/subscribe primitive underneath the message bus.

use crate::core::MoonshipError;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// A raw message as received from a subscribed channel, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub channel: String,
    pub payload: String,
}

/// Stream of every message delivered to the transport's subscriptions.
pub type InboundStream = BoxStream<'static, Result<InboundMessage, MoonshipError>>;

/// Transport-level pub/sub. Implementations track nothing about handlers:
/// the bus decides when a channel is subscribed or unsubscribed.
#[async_trait]
pub trait PubSubTransport: Send + Sync + 'static {
    /// Acquires the shared connection and starts receiving. The returned stream
    /// ends when the transport is closed.
    async fn open(&self) -> Result<InboundStream, MoonshipError>;

    async fn subscribe(&self, channel: &str) -> Result<(), MoonshipError>;

    async fn unsubscribe(&self, channel: &str) -> Result<(), MoonshipError>;

    /// Publishes `payload` and returns how many subscribers received it.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, MoonshipError>;

    /// Stops receiving and releases the shared connection. Idempotent.
    async fn close(&self) -> Result<(), MoonshipError>;
}
