// src/core/bus/handler.rs

use super::Message;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;

/// A callback registered on one or more channels.
///
/// Handlers are identified by their `Arc`: registering the same `Arc` twice on
/// a channel is a no-op, and `unsubscribe` removes exactly that `Arc`.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: Message, channel: &str) -> anyhow::Result<()>;
}

/// Returns true if both handles point to the same handler instance.
pub fn same_handler(a: &Arc<dyn MessageHandler>, b: &Arc<dyn MessageHandler>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Adapts an async closure into a [`MessageHandler`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Message, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, message: Message, channel: &str) -> anyhow::Result<()> {
        (self.f)(message, channel.to_string()).await
    }
}

/// Wraps `f` as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Message, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// One-shot handler resolving a pending request with the first message it sees.
pub(crate) struct PendingReply {
    sender: Mutex<Option<oneshot::Sender<Message>>>,
}

impl PendingReply {
    pub(crate) fn new() -> (Arc<Self>, oneshot::Receiver<Message>) {
        let (tx, rx) = oneshot::channel();
        let pending = Arc::new(Self {
            sender: Mutex::new(Some(tx)),
        });
        (pending, rx)
    }
}

#[async_trait]
impl MessageHandler for PendingReply {
    async fn handle(&self, message: Message, _channel: &str) -> anyhow::Result<()> {
        if let Some(sender) = self.sender.lock().take() {
            // The waiter may already have timed out.
            let _ = sender.send(message);
        }
        Ok(())
    }
}
