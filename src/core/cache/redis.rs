// src/core/cache/redis.rs

//! `SharedCache` over the Redis-compatible store.

use super::bulk::check_step_types;
use super::{BulkOp, BulkStep, KeyKind, SharedCache};
use crate::core::MoonshipError;
use crate::core::cache::bulk::touched_keys;
use crate::core::protocol::RespFrame;
use crate::core::store::client::{ClientGuard, command};
use crate::core::store::{ConnectionLease, RedisConnectionManager, RespClient, RespConnector};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// How often a transactional commit is retried when a watched key changes
/// between the type check and `EXEC`.
const MAX_TRANSACTION_ATTEMPTS: usize = 5;

/// Translates a queued bulk step into the store command that performs it.
pub fn step_command(step: &BulkStep) -> RespFrame {
    match step {
        BulkStep::ListPushHead { key, element } => command(&["LPUSH", key.as_str(), element.as_str()]),
        BulkStep::ListPushTail { key, element } => command(&["RPUSH", key.as_str(), element.as_str()]),
        BulkStep::ListPopHead { key } => command(&["LPOP", key.as_str()]),
        BulkStep::ListPopTail { key } => command(&["RPOP", key.as_str()]),
        BulkStep::ListRemove { key, element } => {
            command(&["LREM", key.as_str(), "0", element.as_str()])
        }
        BulkStep::SetAdd { key, element } => command(&["SADD", key.as_str(), element.as_str()]),
        BulkStep::SetRemove { key, element } => command(&["SREM", key.as_str(), element.as_str()]),
        BulkStep::MapPut { key, entries } => {
            let mut parts: Vec<&str> = Vec::with_capacity(2 + entries.len() * 2);
            parts.push("HSET");
            parts.push(key);
            for (field, value) in entries {
                parts.push(field);
                parts.push(value);
            }
            command(&parts)
        }
        BulkStep::Delete { key } => command(&["DEL", key.as_str()]),
        BulkStep::Expire { key, ttl_ms } => {
            let ttl = ttl_ms.to_string();
            command(&["PEXPIRE", key.as_str(), ttl.as_str()])
        }
    }
}

/// Returns the first error among `replies`, if any.
fn first_error(replies: Vec<RespFrame>) -> Result<(), MoonshipError> {
    for reply in replies {
        reply.into_result()?;
    }
    Ok(())
}

/// Turns an `HGETALL` reply (alternating fields and values) into a map.
fn pairs_to_map(reply: RespFrame) -> Result<HashMap<String, String>, MoonshipError> {
    let flat = reply.into_string_vec()?;
    if flat.len() % 2 != 0 {
        return Err(MoonshipError::Protocol(
            "HGETALL reply has an odd number of elements".into(),
        ));
    }
    let mut map = HashMap::with_capacity(flat.len() / 2);
    let mut iter = flat.into_iter();
    while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
        map.insert(field, value);
    }
    Ok(map)
}

pub struct RedisSharedCache {
    lease: ConnectionLease<RespConnector>,
}

impl RedisSharedCache {
    pub fn new(manager: Arc<RedisConnectionManager>) -> Self {
        Self {
            lease: ConnectionLease::new(manager),
        }
    }

    async fn client(&self) -> Result<Arc<RespClient>, MoonshipError> {
        self.lease.get().await
    }

    async fn run(&self, parts: &[&str]) -> Result<RespFrame, MoonshipError> {
        self.client().await?.execute(command(parts)).await?.into_result()
    }

    /// One transactional attempt: watch the touched keys, check their types,
    /// and commit with `MULTI`/`EXEC`. Returns `Ok(false)` when a watched key
    /// changed and the commit was discarded.
    async fn try_transaction(
        conn: &mut ClientGuard<'_>,
        keys: &[String],
        steps: &[BulkStep],
        commands: &[RespFrame],
    ) -> Result<bool, MoonshipError> {
        let mut watch = vec!["WATCH"];
        watch.extend(keys.iter().map(String::as_str));
        let mut frames = vec![command(&watch)];
        frames.extend(keys.iter().map(|key| command(&["TYPE", key.as_str()])));
        let mut replies = conn.round_trip(frames).await?.into_iter();

        let checked = async {
            replies
                .next()
                .ok_or_else(|| MoonshipError::Protocol("missing WATCH reply".into()))?
                .into_result()?;
            let mut initial = HashMap::with_capacity(keys.len());
            for (key, reply) in keys.iter().zip(replies) {
                let type_name = reply.into_string()?.unwrap_or_default();
                initial.insert(key.clone(), KeyKind::from_type_name(&type_name));
            }
            check_step_types(steps, &initial)
        }
        .await;

        if let Err(e) = checked {
            conn.round_trip(vec![command(&["UNWATCH"])]).await?;
            return Err(e);
        }

        let mut frames = Vec::with_capacity(commands.len() + 2);
        frames.push(command(&["MULTI"]));
        frames.extend(commands.iter().cloned());
        frames.push(command(&["EXEC"]));
        let mut replies = conn.round_trip(frames).await?;

        match replies.pop() {
            Some(RespFrame::Array(results)) => first_error(results).map(|_| true),
            Some(RespFrame::NullArray) | Some(RespFrame::Null) => Ok(false),
            Some(RespFrame::Error(e)) => Err(MoonshipError::from_store_reply(&e)),
            other => Err(MoonshipError::Protocol(format!(
                "unexpected EXEC reply: {other:?}"
            ))),
        }
    }
}

#[async_trait]
impl SharedCache for RedisSharedCache {
    async fn open(&self) -> Result<(), MoonshipError> {
        self.lease.open().await.map(|_| ())
    }

    async fn close(&self) -> Result<(), MoonshipError> {
        self.lease.close().await
    }

    async fn list_push_head(&self, key: &str, element: &str) -> Result<(), MoonshipError> {
        self.run(&["LPUSH", key, element]).await.map(|_| ())
    }

    async fn list_push_tail(&self, key: &str, element: &str) -> Result<(), MoonshipError> {
        self.run(&["RPUSH", key, element]).await.map(|_| ())
    }

    async fn list_pop_head(&self, key: &str) -> Result<Option<String>, MoonshipError> {
        self.run(&["LPOP", key]).await?.into_string()
    }

    async fn list_pop_tail(&self, key: &str) -> Result<Option<String>, MoonshipError> {
        self.run(&["RPOP", key]).await?.into_string()
    }

    async fn list_remove(&self, key: &str, element: &str) -> Result<(), MoonshipError> {
        self.run(&["LREM", key, "0", element]).await.map(|_| ())
    }

    async fn list_get_head(&self, key: &str) -> Result<Option<String>, MoonshipError> {
        self.run(&["LINDEX", key, "0"]).await?.into_string()
    }

    async fn list_get_tail(&self, key: &str) -> Result<Option<String>, MoonshipError> {
        self.run(&["LINDEX", key, "-1"]).await?.into_string()
    }

    async fn list_get_elements(&self, key: &str) -> Result<Vec<String>, MoonshipError> {
        self.run(&["LRANGE", key, "0", "-1"]).await?.into_string_vec()
    }

    async fn set_add(&self, key: &str, element: &str) -> Result<(), MoonshipError> {
        self.run(&["SADD", key, element]).await.map(|_| ())
    }

    async fn set_remove(&self, key: &str, element: &str) -> Result<(), MoonshipError> {
        self.run(&["SREM", key, element]).await.map(|_| ())
    }

    async fn set_get_elements(&self, key: &str) -> Result<HashSet<String>, MoonshipError> {
        Ok(self
            .run(&["SMEMBERS", key])
            .await?
            .into_string_vec()?
            .into_iter()
            .collect())
    }

    async fn map_merge(
        &self,
        key: &str,
        entries: &HashMap<String, String>,
    ) -> Result<(), MoonshipError> {
        if entries.is_empty() {
            return Ok(());
        }
        let step = BulkStep::MapPut {
            key: key.to_string(),
            entries: entries.clone(),
        };
        self.client()
            .await?
            .execute(step_command(&step))
            .await?
            .into_result()
            .map(|_| ())
    }

    async fn map_get(&self, key: &str, field: &str) -> Result<Option<String>, MoonshipError> {
        self.run(&["HGET", key, field]).await?.into_string()
    }

    async fn map_get_entries(&self, key: &str) -> Result<HashMap<String, String>, MoonshipError> {
        pairs_to_map(self.run(&["HGETALL", key]).await?)
    }

    async fn delete(&self, key: &str) -> Result<(), MoonshipError> {
        self.run(&["DEL", key]).await.map(|_| ())
    }

    async fn expire(&self, key: &str, ttl_ms: u64) -> Result<(), MoonshipError> {
        let ttl = ttl_ms.to_string();
        self.run(&["PEXPIRE", key, ttl.as_str()]).await.map(|_| ())
    }

    fn start_bulk(&self, transactional: bool) -> BulkOp<'_> {
        BulkOp::new(self, transactional)
    }

    async fn execute_bulk(
        &self,
        transactional: bool,
        mut steps: Vec<BulkStep>,
    ) -> Result<(), MoonshipError> {
        // `HSET` without fields is a syntax error; an empty put changes nothing.
        steps.retain(|step| !matches!(step, BulkStep::MapPut { entries, .. } if entries.is_empty()));
        if steps.is_empty() {
            return Ok(());
        }
        let client = self.client().await?;
        let commands: Vec<RespFrame> = steps.iter().map(step_command).collect();

        if !transactional {
            return first_error(client.pipeline(commands).await?);
        }

        let keys = touched_keys(&steps);
        let mut conn = client.lock().await;
        for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
            if Self::try_transaction(&mut conn, &keys, &steps, &commands).await? {
                debug!("Bulk operation of {} steps committed.", steps.len());
                return Ok(());
            }
            debug!(
                "Watched keys changed during bulk commit (attempt {}), retrying.",
                attempt
            );
        }
        warn!(
            "Bulk operation abandoned after {} conflicting attempts.",
            MAX_TRANSACTION_ATTEMPTS
        );
        Err(MoonshipError::TransactionAborted(
            "watched keys kept changing".to_string(),
        ))
    }
}
