// src/core/bus/redis.rs

//! Pub/sub transport over the Redis-compatible store.
//!
//! A connection in subscribe mode cannot run ordinary commands, so subscriptions
//! live on a dedicated socket opened with the shared endpoint settings, while
//! `PUBLISH` goes through the shared command connection.

use super::transport::{InboundMessage, InboundStream, PubSubTransport};
use crate::core::MoonshipError;
use crate::core::protocol::{RespFrame, RespFrameCodec};
use crate::core::store::client::command;
use crate::core::store::stream::AnyStream;
use crate::core::store::{ConnectionLease, RedisConnectionManager, RespConnector};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

type SubscriberWriter = FramedWrite<WriteHalf<AnyStream>, RespFrameCodec>;

pub struct RedisTransport {
    lease: ConnectionLease<RespConnector>,
    writer: Mutex<Option<SubscriberWriter>>,
}

impl RedisTransport {
    pub fn new(manager: Arc<RedisConnectionManager>) -> Self {
        Self {
            lease: ConnectionLease::new(manager),
            writer: Mutex::new(None),
        }
    }

    async fn open_subscriber(&self) -> Result<InboundStream, MoonshipError> {
        let client = self.lease.open().await?;
        let parts = client.endpoint().connect().await?.into_parts();
        let (read_half, write_half) = tokio::io::split(parts.io);

        let mut reader = FramedRead::new(read_half, RespFrameCodec);
        reader.read_buffer_mut().extend_from_slice(&parts.read_buf);
        let previous = self
            .writer
            .lock()
            .await
            .replace(FramedWrite::new(write_half, RespFrameCodec));
        if let Some(mut previous) = previous {
            let _ = previous.get_mut().shutdown().await;
        }

        Ok(reader
            .filter_map(|frame| async move {
                match frame {
                    Ok(frame) => parse_push(frame).map(Ok),
                    Err(e) => Some(Err(e)),
                }
            })
            .boxed())
    }

    async fn send(&self, frame: RespFrame) -> Result<(), MoonshipError> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(MoonshipError::NotOpen)?;
        writer.send(frame).await
    }
}

/// Extracts a published message from a push frame. Subscription confirmations
/// and anything else are dropped.
fn parse_push(frame: RespFrame) -> Option<InboundMessage> {
    let RespFrame::Array(parts) = frame else {
        warn!("Unexpected non-array frame on subscriber connection: {:?}", frame);
        return None;
    };
    let mut parts = parts.into_iter();
    let kind = parts.next()?.into_string().ok()??;
    if !kind.eq_ignore_ascii_case("message") {
        debug!("Subscriber connection received '{}' notification.", kind);
        return None;
    }
    let channel = parts.next()?.into_string().ok()??;
    match parts.next()?.into_string() {
        Ok(Some(payload)) => Some(InboundMessage { channel, payload }),
        _ => {
            warn!("Dropping non-UTF-8 message on channel '{}'.", channel);
            None
        }
    }
}

#[async_trait]
impl PubSubTransport for RedisTransport {
    async fn open(&self) -> Result<InboundStream, MoonshipError> {
        match self.open_subscriber().await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                self.lease.close().await?;
                Err(e)
            }
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<(), MoonshipError> {
        self.send(command(&["SUBSCRIBE", channel])).await
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), MoonshipError> {
        self.send(command(&["UNSUBSCRIBE", channel])).await
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, MoonshipError> {
        let reply = self
            .lease
            .get()
            .await?
            .execute(command(&["PUBLISH", channel, payload]))
            .await?
            .into_result()?;
        match reply {
            RespFrame::Integer(n) => Ok(usize::try_from(n).unwrap_or(0)),
            other => Err(MoonshipError::Protocol(format!(
                "unexpected PUBLISH reply: {other:?}"
            ))),
        }
    }

    async fn close(&self) -> Result<(), MoonshipError> {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer
            && let Err(e) = writer.get_mut().shutdown().await
        {
            debug!("Subscriber connection shutdown failed: {}", e);
        }
        self.lease.close().await
    }
}
