// tests/integration/bus_test.rs

//! Integration tests for the message bus
//! Tests: fan-out, subscription bookkeeping, handler isolation, request/reply

use super::test_helpers::{
    Delivery, TestContext, assert_no_delivery, message, next_delivery, recording_handler,
};
use async_trait::async_trait;
use moonship::MoonshipError;
use moonship::core::bus::{
    InboundStream, MemoryTransport, MessageBus, MessageHandler, PubSubTransport, handler_fn,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Memory transport whose unsubscribe can be made to fail.
struct FlakyTransport {
    inner: MemoryTransport,
    fail_unsubscribe: AtomicBool,
}

#[async_trait]
impl PubSubTransport for FlakyTransport {
    async fn open(&self) -> Result<InboundStream, MoonshipError> {
        self.inner.open().await
    }

    async fn subscribe(&self, channel: &str) -> Result<(), MoonshipError> {
        self.inner.subscribe(channel).await
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), MoonshipError> {
        if self.fail_unsubscribe.load(Ordering::SeqCst) {
            return Err(MoonshipError::Transport("unsubscribe refused".into()));
        }
        self.inner.unsubscribe(channel).await
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, MoonshipError> {
        self.inner.publish(channel, payload).await
    }

    async fn close(&self) -> Result<(), MoonshipError> {
        self.inner.close().await
    }
}

#[tokio::test]
async fn test_handlers_run_in_registration_order() {
    let ctx = TestContext::new();
    let bus = ctx.bus().await;
    let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();

    bus.subscribe("A", recording_handler("h1", &tx)).await.unwrap();
    bus.subscribe("A", recording_handler("h2", &tx)).await.unwrap();
    bus.publish(&message(json!({"n": 1})), "A").await.unwrap();

    let first = next_delivery(&mut rx).await;
    let second = next_delivery(&mut rx).await;
    assert_eq!(first.0, "h1");
    assert_eq!(second.0, "h2");
    assert_eq!(first.1, "A");
    assert_eq!(first.2, message(json!({"n": 1})));
    assert_no_delivery(&mut rx).await;
}

#[tokio::test]
async fn test_transport_subscription_follows_handler_set() {
    let ctx = TestContext::new();
    let bus = ctx.bus().await;
    let (tx, _rx) = mpsc::unbounded_channel::<Delivery>();
    let h1 = recording_handler("h1", &tx);
    let h2 = recording_handler("h2", &tx);

    bus.subscribe("A", h1.clone()).await.unwrap();
    bus.subscribe("A", h2.clone()).await.unwrap();
    assert_eq!(ctx.store.subscriber_count("A"), 1);
    assert_eq!(bus.handler_count("A").await, 2);

    bus.unsubscribe("A", Some(&h1)).await.unwrap();
    assert_eq!(ctx.store.subscriber_count("A"), 1);
    assert_eq!(bus.channels().await, vec!["A"]);

    bus.unsubscribe("A", Some(&h2)).await.unwrap();
    assert_eq!(ctx.store.subscriber_count("A"), 0);
    assert!(bus.channels().await.is_empty());
}

#[tokio::test]
async fn test_duplicate_registration_is_a_no_op() {
    let ctx = TestContext::new();
    let bus = ctx.bus().await;
    let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
    let handler = recording_handler("h", &tx);

    bus.subscribe("A", handler.clone()).await.unwrap();
    bus.subscribe("A", handler.clone()).await.unwrap();
    assert_eq!(bus.handler_count("A").await, 1);

    bus.publish(&message(json!({})), "A").await.unwrap();
    next_delivery(&mut rx).await;
    assert_no_delivery(&mut rx).await;
}

#[tokio::test]
async fn test_unsubscribe_all_handlers() {
    let ctx = TestContext::new();
    let bus = ctx.bus().await;
    let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();

    bus.subscribe("A", recording_handler("h1", &tx)).await.unwrap();
    bus.subscribe("A", recording_handler("h2", &tx)).await.unwrap();
    bus.subscribe("B", recording_handler("h3", &tx)).await.unwrap();

    bus.unsubscribe("A", None).await.unwrap();
    bus.unsubscribe("never-subscribed", None).await.unwrap();

    assert_eq!(bus.channels().await, vec!["B"]);
    assert_eq!(ctx.store.active_channels(), vec!["B"]);
    assert_eq!(bus.publish(&message(json!({})), "A").await.unwrap(), 0);
    assert_no_delivery(&mut rx).await;
}

#[tokio::test]
async fn test_handler_is_only_removed_from_named_channel() {
    let ctx = TestContext::new();
    let bus = ctx.bus().await;
    let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
    let handler = recording_handler("h", &tx);

    bus.subscribe("A", handler.clone()).await.unwrap();
    bus.subscribe("B", handler.clone()).await.unwrap();
    bus.unsubscribe("A", Some(&handler)).await.unwrap();

    bus.publish(&message(json!({"to": "B"})), "B").await.unwrap();
    let (_, channel, _) = next_delivery(&mut rx).await;
    assert_eq!(channel, "B");
}

#[tokio::test]
async fn test_failing_handlers_do_not_stop_dispatch() {
    let ctx = TestContext::new();
    let bus = ctx.bus().await;
    let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();

    let failing = handler_fn(|_, _| async { Err::<(), _>(anyhow::anyhow!("handler failure")) });
    let panicking = handler_fn(|_, channel| async move {
        if channel == "A" {
            panic!("handler panic");
        }
        Ok::<(), anyhow::Error>(())
    });
    bus.subscribe("A", failing).await.unwrap();
    bus.subscribe("A", panicking).await.unwrap();
    bus.subscribe("A", recording_handler("survivor", &tx)).await.unwrap();

    bus.publish(&message(json!({"n": 1})), "A").await.unwrap();
    bus.publish(&message(json!({"n": 2})), "A").await.unwrap();

    assert_eq!(next_delivery(&mut rx).await.2, message(json!({"n": 1})));
    assert_eq!(next_delivery(&mut rx).await.2, message(json!({"n": 2})));
    assert!(bus.is_running());
}

#[tokio::test]
async fn test_malformed_payloads_are_skipped() {
    let ctx = TestContext::new();
    let bus = ctx.bus().await;
    let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
    bus.subscribe("A", recording_handler("h", &tx)).await.unwrap();

    assert_eq!(ctx.store.publish("A", "{not json"), 1);
    ctx.store.publish("A", "[1, 2, 3]");
    ctx.store.publish("A", r#"{"ok": true}"#);

    assert_eq!(next_delivery(&mut rx).await.2, message(json!({"ok": true})));
    assert_no_delivery(&mut rx).await;
}

#[tokio::test]
async fn test_messages_arrive_in_publish_order() {
    let ctx = TestContext::new();
    let bus = ctx.bus().await;
    let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
    bus.subscribe("A", recording_handler("h", &tx)).await.unwrap();

    for n in 0..50 {
        bus.publish(&message(json!({"n": n})), "A").await.unwrap();
    }
    for n in 0..50 {
        assert_eq!(next_delivery(&mut rx).await.2, message(json!({"n": n})));
    }
}

#[tokio::test]
async fn test_publish_reaches_every_bus() {
    let ctx = TestContext::new();
    let sender = ctx.bus().await;
    let receiver = ctx.bus().await;
    let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
    receiver.subscribe("A", recording_handler("remote", &tx)).await.unwrap();

    let receivers = sender.publish(&message(json!({"x": 1})), "A").await.unwrap();

    assert_eq!(receivers, 1);
    assert_eq!(next_delivery(&mut rx).await.0, "remote");
}

#[tokio::test]
async fn test_publish_and_receive_returns_reply() {
    let ctx = TestContext::new();
    let requester = ctx.bus().await;
    let responder = ctx.bus().await;

    let replies = responder.clone();
    let echo: Arc<dyn MessageHandler> = handler_fn(move |request, _| {
        let replies = replies.clone();
        async move {
            let mut reply = request;
            reply.insert("answered".into(), json!(true));
            replies.publish(&reply, "responses").await?;
            Ok::<(), anyhow::Error>(())
        }
    });
    responder.subscribe("requests", echo).await.unwrap();

    let reply = requester
        .publish_and_receive(
            &message(json!({"q": 1})),
            "requests",
            "responses",
            Duration::from_secs(2),
        )
        .await
        .unwrap();

    assert_eq!(reply, message(json!({"q": 1, "answered": true})));
    assert_eq!(requester.handler_count("responses").await, 0);
    assert_eq!(ctx.store.subscriber_count("responses"), 0);
}

#[tokio::test]
async fn test_publish_and_receive_times_out() {
    let ctx = TestContext::new();
    let bus = ctx.bus().await;
    let (tx, _rx) = mpsc::unbounded_channel::<Delivery>();
    bus.subscribe("responses", recording_handler("keep", &tx)).await.unwrap();

    let result = bus
        .publish_and_receive(
            &message(json!({})),
            "requests",
            "responses",
            Duration::from_millis(50),
        )
        .await;

    assert_eq!(
        result,
        Err(MoonshipError::Timeout {
            channel: "responses".into(),
            timeout: Duration::from_millis(50),
        })
    );
    // Only the temporary reply handler is removed.
    assert_eq!(bus.handler_count("responses").await, 1);
}

#[tokio::test]
async fn test_close_releases_connection_and_subscriptions() {
    let ctx = TestContext::new();
    let bus = ctx.bus().await;
    let (tx, _rx) = mpsc::unbounded_channel::<Delivery>();
    bus.subscribe("A", recording_handler("h", &tx)).await.unwrap();
    assert_eq!(ctx.backend.ref_count().await, 1);

    bus.close().await.unwrap();

    assert!(!bus.is_running());
    assert_eq!(ctx.backend.ref_count().await, 0);
    assert!(ctx.store.active_channels().is_empty());
    assert!(bus.channels().await.is_empty());
}

#[tokio::test]
async fn test_subscribe_before_start_is_rejected() {
    let ctx = TestContext::new();
    let bus = ctx.backend.message_bus();
    let (tx, _rx) = mpsc::unbounded_channel::<Delivery>();

    let result = bus.subscribe("A", recording_handler("h", &tx)).await;

    assert_eq!(result, Err(MoonshipError::NotOpen));
    assert!(bus.channels().await.is_empty());
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let ctx = TestContext::new();
    let bus = ctx.bus().await;

    bus.start().await.unwrap();

    assert_eq!(ctx.backend.ref_count().await, 1);
    assert_eq!(ctx.connector().connects(), 1);
}

#[tokio::test]
async fn test_failed_transport_unsubscribe_keeps_handlers() {
    let ctx = TestContext::new();
    let transport = Arc::new(FlakyTransport {
        inner: MemoryTransport::new(ctx.manager()),
        fail_unsubscribe: AtomicBool::new(true),
    });
    let bus = MessageBus::new(transport.clone());
    bus.start().await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
    let h1 = recording_handler("h1", &tx);
    bus.subscribe("A", h1.clone()).await.unwrap();

    assert!(matches!(
        bus.unsubscribe("A", Some(&h1)).await,
        Err(MoonshipError::Transport(_))
    ));
    assert_eq!(ctx.store.subscriber_count("A"), 1);
    assert_eq!(bus.handler_count("A").await, 1);
    bus.publish(&message(json!({"n": 1})), "A").await.unwrap();
    assert_eq!(next_delivery(&mut rx).await.0, "h1");

    transport.fail_unsubscribe.store(false, Ordering::SeqCst);
    bus.unsubscribe("A", None).await.unwrap();
    assert_eq!(ctx.store.subscriber_count("A"), 0);
    assert!(bus.channels().await.is_empty());
    bus.close().await.unwrap();
}
