// src/core/bus/mod.rs

//! The message bus: per-channel handler fan-out over a pub/sub transport, one
//! background listener per bus, and request/reply on top of both.

use crate::core::MoonshipError;
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub mod handler;
pub mod memory;
pub mod redis;
pub mod transport;

pub use handler::{FnHandler, MessageHandler, handler_fn, same_handler};
pub use memory::MemoryTransport;
pub use redis::RedisTransport;
pub use transport::{InboundMessage, InboundStream, PubSubTransport};

use handler::PendingReply;

/// A structured message envelope: a JSON object.
pub type Message = serde_json::Map<String, Value>;

/// Serializes a message to its compact wire form.
pub fn encode_message(message: &Message) -> Result<String, MoonshipError> {
    Ok(serde_json::to_string(message)?)
}

/// Parses a wire payload. Anything other than a JSON object is a protocol error.
pub fn decode_message(payload: &str) -> Result<Message, MoonshipError> {
    let value = serde_json::from_str::<Value>(payload)
        .map_err(|e| MoonshipError::Protocol(format!("message payload is not JSON: {e}")))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(MoonshipError::Protocol(format!(
            "message payload is not an object: {other}"
        ))),
    }
}

type Registry = HashMap<String, Vec<Arc<dyn MessageHandler>>>;

pub struct MessageBus {
    transport: Arc<dyn PubSubTransport>,
    /// Handlers per channel. An entry exists iff the channel is subscribed at
    /// the transport, and its handler list is never empty.
    registry: Arc<Mutex<Registry>>,
    listener: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl MessageBus {
    pub fn new(transport: Arc<dyn PubSubTransport>) -> Self {
        Self {
            transport,
            registry: Arc::new(Mutex::new(HashMap::new())),
            listener: parking_lot::Mutex::new(None),
        }
    }

    /// Opens the transport and spawns the listener task.
    pub async fn start(&self) -> Result<(), MoonshipError> {
        if self.is_running() {
            debug!("Message bus already started.");
            return Ok(());
        }
        let inbound = self.transport.open().await?;
        let handle = tokio::spawn(listen(inbound, self.registry.clone()));
        if let Some(previous) = self.listener.lock().replace(handle) {
            previous.abort();
        }
        info!("Message bus started.");
        Ok(())
    }

    /// True while the listener task is receiving. Turns false when the
    /// inbound stream ends on its own, e.g. after the subscriber socket is lost.
    pub fn is_running(&self) -> bool {
        self.listener
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Started, but the listener is no longer receiving.
    fn listener_lost(&self) -> bool {
        self.listener
            .lock()
            .as_ref()
            .is_some_and(|handle| handle.is_finished())
    }

    /// Unsubscribes every channel, stops the listener and closes the transport.
    pub async fn close(&self) -> Result<(), MoonshipError> {
        let channels: Vec<String> = {
            let mut registry = self.registry.lock().await;
            registry.drain().map(|(channel, _)| channel).collect()
        };
        for channel in &channels {
            if let Err(e) = self.transport.unsubscribe(channel).await {
                warn!("Failed to unsubscribe from '{}' during close: {}", channel, e);
            }
        }

        // Abort before the transport ends the inbound stream.
        let listener = self.listener.lock().take();
        if let Some(handle) = listener {
            handle.abort();
            if let Err(e) = handle.await
                && !e.is_cancelled()
            {
                error!("Message bus listener ended abnormally: {}", e);
            }
        }

        let result = self.transport.close().await;
        info!("Message bus closed.");
        result
    }

    /// Registers `handler` on `channel`, subscribing at the transport for the
    /// channel's first handler. Registering the same handler twice is a no-op.
    pub async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), MoonshipError> {
        if self.listener_lost() {
            return Err(MoonshipError::Transport(
                "Message bus listener stopped: subscriber connection lost".into(),
            ));
        }
        let mut registry = self.registry.lock().await;
        match registry.get_mut(channel) {
            Some(handlers) => {
                if handlers.iter().any(|h| same_handler(h, &handler)) {
                    debug!("Handler already registered on '{}'.", channel);
                } else {
                    handlers.push(handler);
                }
            }
            None => {
                self.transport.subscribe(channel).await?;
                registry.insert(channel.to_string(), vec![handler]);
                debug!("Subscribed to channel '{}'.", channel);
            }
        }
        Ok(())
    }

    /// Removes `handler` from `channel`, or every handler when `None`. The
    /// transport subscription is dropped with the last handler.
    pub async fn unsubscribe(
        &self,
        channel: &str,
        handler: Option<&Arc<dyn MessageHandler>>,
    ) -> Result<(), MoonshipError> {
        let mut registry = self.registry.lock().await;
        let Some(handlers) = registry.get(channel) else {
            return Ok(());
        };
        let remaining: Vec<_> = match handler {
            Some(handler) => handlers
                .iter()
                .filter(|h| !same_handler(h, handler))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        if remaining.is_empty() {
            // The entry goes only once the transport has let go of the channel.
            self.transport.unsubscribe(channel).await?;
            registry.remove(channel);
            debug!("Unsubscribed from channel '{}'.", channel);
        } else {
            registry.insert(channel.to_string(), remaining);
        }
        Ok(())
    }

    /// Publishes `message` on `channel`; returns the number of receivers.
    pub async fn publish(&self, message: &Message, channel: &str) -> Result<usize, MoonshipError> {
        let payload = encode_message(message)?;
        self.transport.publish(channel, &payload).await
    }

    /// Publishes `message` on `request_channel` and returns the next message
    /// seen on `response_channel`, or a timeout error after `timeout`.
    ///
    /// The reply is not correlated with the request: callers with overlapping
    /// requests on the same channel pair must serialize them.
    pub async fn publish_and_receive(
        &self,
        message: &Message,
        request_channel: &str,
        response_channel: &str,
        timeout: Duration,
    ) -> Result<Message, MoonshipError> {
        let (pending, reply) = PendingReply::new();
        let pending: Arc<dyn MessageHandler> = pending;
        self.subscribe(response_channel, pending.clone()).await?;

        let result = async {
            self.publish(message, request_channel).await?;
            match tokio::time::timeout(timeout, reply).await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(_)) => Err(MoonshipError::InvalidState(
                    "pending reply dropped before completion".into(),
                )),
                Err(_) => Err(MoonshipError::Timeout {
                    channel: response_channel.to_string(),
                    timeout,
                }),
            }
        }
        .await;

        if let Err(e) = self.unsubscribe(response_channel, Some(&pending)).await {
            warn!(
                "Failed to remove reply handler from '{}': {}",
                response_channel, e
            );
        }
        result
    }

    /// Channels with at least one handler, sorted.
    pub async fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.registry.lock().await.keys().cloned().collect();
        channels.sort();
        channels
    }

    pub async fn handler_count(&self, channel: &str) -> usize {
        self.registry.lock().await.get(channel).map_or(0, Vec::len)
    }
}

/// The listener loop: runs until the inbound stream ends or the task is aborted.
async fn listen(mut inbound: InboundStream, registry: Arc<Mutex<Registry>>) {
    debug!("Message bus listener running.");
    while let Some(item) = inbound.next().await {
        match item {
            Ok(message) => dispatch(&registry, message).await,
            Err(e) => error!("Error receiving from the pub/sub transport: {}", e),
        }
    }
    error!("Message bus listener stopped: the pub/sub transport's inbound stream ended.");
}

/// Invokes every handler of the message's channel in registration order.
/// The registry lock is released before any handler runs.
async fn dispatch(registry: &Mutex<Registry>, inbound: InboundMessage) {
    let handlers = registry.lock().await.get(&inbound.channel).cloned();
    let Some(handlers) = handlers else {
        debug!("No handlers for channel '{}', message ignored.", inbound.channel);
        return;
    };
    let message = match decode_message(&inbound.payload) {
        Ok(message) => message,
        Err(e) => {
            warn!(
                "Skipping malformed message on channel '{}': {}",
                inbound.channel, e
            );
            return;
        }
    };

    for handler in handlers {
        let call = handler.handle(message.clone(), &inbound.channel);
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(
                "Message handler on channel '{}' failed: {:#}",
                inbound.channel, e
            ),
            Err(_) => error!("Message handler on channel '{}' panicked.", inbound.channel),
        }
    }
}
