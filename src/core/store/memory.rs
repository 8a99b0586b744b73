// src/core/store/memory.rs

//! An in-process shared store: keyspace plus pub/sub broker.
//!
//! It backs the `memory` implementations of the cache and the bus transport,
//! giving single-process deployments and tests the same observable behaviour
//! as the external store: container types, millisecond expiry, all-or-nothing
//! bulk commits and per-channel fan-out.

use super::connection::{Connector, StoreConnection};
use crate::core::MoonshipError;
use crate::core::bus::InboundMessage;
use crate::core::cache::bulk::{BulkStep, KeyKind, check_step_types, touched_keys};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
enum StoredValue {
    List(VecDeque<String>),
    Set(HashSet<String>),
    Map(HashMap<String, String>),
}

impl StoredValue {
    fn kind(&self) -> KeyKind {
        match self {
            StoredValue::List(_) => KeyKind::List,
            StoredValue::Set(_) => KeyKind::Set,
            StoredValue::Map(_) => KeyKind::Map,
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            StoredValue::List(l) => l.is_empty(),
            StoredValue::Set(s) => s.is_empty(),
            StoredValue::Map(m) => m.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

/// Key/value state. Expired keys are purged lazily on access.
#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    fn purge_if_expired(&mut self, key: &str) {
        let expired = self
            .entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|deadline| deadline <= Instant::now());
        if expired {
            debug!("Expired key '{}' purged.", key);
            self.entries.remove(key);
        }
    }

    fn get(&mut self, key: &str) -> Option<&StoredValue> {
        self.purge_if_expired(key);
        self.entries.get(key).map(|e| &e.value)
    }

    fn kind(&mut self, key: &str) -> KeyKind {
        self.get(key).map_or(KeyKind::Missing, StoredValue::kind)
    }

    /// Returns the value under `key`, creating it with `init` when missing.
    fn get_or_insert(
        &mut self,
        key: &str,
        init: fn() -> StoredValue,
    ) -> &mut StoredValue {
        self.purge_if_expired(key);
        &mut self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry {
                value: init(),
                expires_at: None,
            })
            .value
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut StoredValue> {
        self.purge_if_expired(key);
        self.entries.get_mut(key).map(|e| &mut e.value)
    }

    /// Containers never linger empty.
    fn drop_if_empty(&mut self, key: &str) {
        if self.entries.get(key).is_some_and(|e| e.value.is_empty()) {
            self.entries.remove(key);
        }
    }

    fn list_mut(&mut self, key: &str, create: bool) -> Result<Option<&mut VecDeque<String>>, MoonshipError> {
        let value = if create {
            Some(self.get_or_insert(key, || StoredValue::List(VecDeque::new())))
        } else {
            self.get_mut(key)
        };
        match value {
            None => Ok(None),
            Some(StoredValue::List(list)) => Ok(Some(list)),
            Some(_) => Err(MoonshipError::WrongType),
        }
    }

    fn set_mut(&mut self, key: &str, create: bool) -> Result<Option<&mut HashSet<String>>, MoonshipError> {
        let value = if create {
            Some(self.get_or_insert(key, || StoredValue::Set(HashSet::new())))
        } else {
            self.get_mut(key)
        };
        match value {
            None => Ok(None),
            Some(StoredValue::Set(set)) => Ok(Some(set)),
            Some(_) => Err(MoonshipError::WrongType),
        }
    }

    fn map_mut(&mut self, key: &str) -> Result<&mut HashMap<String, String>, MoonshipError> {
        match self.get_or_insert(key, || StoredValue::Map(HashMap::new())) {
            StoredValue::Map(map) => Ok(map),
            _ => Err(MoonshipError::WrongType),
        }
    }

    fn check_kind(&mut self, key: &str, required: KeyKind) -> Result<(), MoonshipError> {
        match self.kind(key) {
            KeyKind::Missing => Ok(()),
            kind if kind == required => Ok(()),
            _ => Err(MoonshipError::WrongType),
        }
    }

    fn push(&mut self, key: &str, element: &str, head: bool) -> Result<(), MoonshipError> {
        self.check_kind(key, KeyKind::List)?;
        if let Some(list) = self.list_mut(key, true)? {
            if head {
                list.push_front(element.to_string());
            } else {
                list.push_back(element.to_string());
            }
        }
        Ok(())
    }

    fn pop(&mut self, key: &str, head: bool) -> Result<Option<String>, MoonshipError> {
        let popped = match self.list_mut(key, false)? {
            Some(list) if head => list.pop_front(),
            Some(list) => list.pop_back(),
            None => None,
        };
        self.drop_if_empty(key);
        Ok(popped)
    }

    fn list_remove(&mut self, key: &str, element: &str) -> Result<(), MoonshipError> {
        if let Some(list) = self.list_mut(key, false)? {
            list.retain(|e| e != element);
        }
        self.drop_if_empty(key);
        Ok(())
    }

    fn set_add(&mut self, key: &str, element: &str) -> Result<(), MoonshipError> {
        self.check_kind(key, KeyKind::Set)?;
        if let Some(set) = self.set_mut(key, true)? {
            set.insert(element.to_string());
        }
        Ok(())
    }

    fn set_remove(&mut self, key: &str, element: &str) -> Result<(), MoonshipError> {
        if let Some(set) = self.set_mut(key, false)? {
            set.remove(element);
        }
        self.drop_if_empty(key);
        Ok(())
    }

    fn map_put(&mut self, key: &str, entries: &HashMap<String, String>) -> Result<(), MoonshipError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.check_kind(key, KeyKind::Map)?;
        let map = self.map_mut(key)?;
        for (field, value) in entries {
            map.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    fn delete(&mut self, key: &str) {
        self.entries.remove(key);
    }

    fn expire(&mut self, key: &str, ttl_ms: u64) {
        self.purge_if_expired(key);
        if let Some(entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + Duration::from_millis(ttl_ms));
        }
    }

    fn apply(&mut self, step: &BulkStep) -> Result<(), MoonshipError> {
        match step {
            BulkStep::ListPushHead { key, element } => self.push(key, element, true),
            BulkStep::ListPushTail { key, element } => self.push(key, element, false),
            BulkStep::ListPopHead { key } => self.pop(key, true).map(|_| ()),
            BulkStep::ListPopTail { key } => self.pop(key, false).map(|_| ()),
            BulkStep::ListRemove { key, element } => self.list_remove(key, element),
            BulkStep::SetAdd { key, element } => self.set_add(key, element),
            BulkStep::SetRemove { key, element } => self.set_remove(key, element),
            BulkStep::MapPut { key, entries } => self.map_put(key, entries),
            BulkStep::Delete { key } => {
                self.delete(key);
                Ok(())
            }
            BulkStep::Expire { key, ttl_ms } => {
                self.expire(key, *ttl_ms);
                Ok(())
            }
        }
    }
}

/// Channel subscriptions of every connected subscriber.
#[derive(Default)]
struct Broker {
    next_id: u64,
    subscribers: HashMap<u64, mpsc::UnboundedSender<InboundMessage>>,
    channels: HashMap<String, Vec<u64>>,
}

/// The in-process store shared by all memory-backed components.
#[derive(Default)]
pub struct MemoryStore {
    keyspace: Mutex<Keyspace>,
    broker: Mutex<Broker>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Default::default()
    }

    /// Applies `steps` in order.
    ///
    /// Transactional commits verify every step's container type against the
    /// current keyspace first and apply nothing on a mismatch. Non-transactional
    /// commits apply what they can and report the first failure.
    pub fn apply(&self, steps: &[BulkStep], transactional: bool) -> Result<(), MoonshipError> {
        let mut keyspace = self.keyspace.lock();
        if transactional {
            let initial: HashMap<String, KeyKind> = touched_keys(steps)
                .into_iter()
                .map(|key| {
                    let kind = keyspace.kind(&key);
                    (key, kind)
                })
                .collect();
            check_step_types(steps, &initial)?;
            for step in steps {
                keyspace.apply(step)?;
            }
            Ok(())
        } else {
            let mut first_error = None;
            for step in steps {
                if let Err(e) = keyspace.apply(step) {
                    first_error.get_or_insert(e);
                }
            }
            first_error.map_or(Ok(()), Err)
        }
    }

    pub fn list_pop(&self, key: &str, head: bool) -> Result<Option<String>, MoonshipError> {
        self.keyspace.lock().pop(key, head)
    }

    pub fn list_get(&self, key: &str, head: bool) -> Result<Option<String>, MoonshipError> {
        let mut keyspace = self.keyspace.lock();
        match keyspace.get(key) {
            None => Ok(None),
            Some(StoredValue::List(list)) if head => Ok(list.front().cloned()),
            Some(StoredValue::List(list)) => Ok(list.back().cloned()),
            Some(_) => Err(MoonshipError::WrongType),
        }
    }

    pub fn list_elements(&self, key: &str) -> Result<Vec<String>, MoonshipError> {
        let mut keyspace = self.keyspace.lock();
        match keyspace.get(key) {
            None => Ok(Vec::new()),
            Some(StoredValue::List(list)) => Ok(list.iter().cloned().collect()),
            Some(_) => Err(MoonshipError::WrongType),
        }
    }

    pub fn set_members(&self, key: &str) -> Result<HashSet<String>, MoonshipError> {
        let mut keyspace = self.keyspace.lock();
        match keyspace.get(key) {
            None => Ok(HashSet::new()),
            Some(StoredValue::Set(set)) => Ok(set.clone()),
            Some(_) => Err(MoonshipError::WrongType),
        }
    }

    pub fn map_get(&self, key: &str, field: &str) -> Result<Option<String>, MoonshipError> {
        let mut keyspace = self.keyspace.lock();
        match keyspace.get(key) {
            None => Ok(None),
            Some(StoredValue::Map(map)) => Ok(map.get(field).cloned()),
            Some(_) => Err(MoonshipError::WrongType),
        }
    }

    pub fn map_entries(&self, key: &str) -> Result<HashMap<String, String>, MoonshipError> {
        let mut keyspace = self.keyspace.lock();
        match keyspace.get(key) {
            None => Ok(HashMap::new()),
            Some(StoredValue::Map(map)) => Ok(map.clone()),
            Some(_) => Err(MoonshipError::WrongType),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.keyspace.lock().get(key).is_some()
    }

    /// Remaining time to live, `None` for missing keys or keys without expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut keyspace = self.keyspace.lock();
        keyspace.purge_if_expired(key);
        keyspace
            .entries
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    // --- Pub/Sub broker ---

    /// Registers a new subscriber connection and returns its inbound queue.
    pub fn register_subscriber(&self) -> (u64, mpsc::UnboundedReceiver<InboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut broker = self.broker.lock();
        broker.next_id += 1;
        let id = broker.next_id;
        broker.subscribers.insert(id, tx);
        (id, rx)
    }

    /// Removes the subscriber and all its subscriptions, ending its queue.
    pub fn drop_subscriber(&self, id: u64) {
        let mut broker = self.broker.lock();
        broker.subscribers.remove(&id);
        broker.channels.retain(|_, ids| {
            ids.retain(|sub| *sub != id);
            !ids.is_empty()
        });
    }

    pub fn subscribe(&self, id: u64, channel: &str) {
        let mut broker = self.broker.lock();
        let ids = broker.channels.entry(channel.to_string()).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    pub fn unsubscribe(&self, id: u64, channel: &str) {
        let mut broker = self.broker.lock();
        if let Some(ids) = broker.channels.get_mut(channel) {
            ids.retain(|sub| *sub != id);
            if ids.is_empty() {
                broker.channels.remove(channel);
            }
        }
    }

    /// Delivers `payload` to every subscriber of `channel`; returns the receiver count.
    pub fn publish(&self, channel: &str, payload: &str) -> usize {
        let broker = self.broker.lock();
        let Some(ids) = broker.channels.get(channel) else {
            return 0;
        };
        let mut receivers = 0;
        for id in ids {
            if let Some(tx) = broker.subscribers.get(id) {
                let message = InboundMessage {
                    channel: channel.to_string(),
                    payload: payload.to_string(),
                };
                if tx.send(message).is_ok() {
                    receivers += 1;
                }
            }
        }
        receivers
    }

    /// Channels with at least one subscriber, sorted.
    pub fn active_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.broker.lock().channels.keys().cloned().collect();
        channels.sort();
        channels
    }

    /// Number of subscribers on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.broker.lock().channels.get(channel).map_or(0, Vec::len)
    }
}

/// A "connection" to a [`MemoryStore`]. Closing it leaves the data in place,
/// just as closing a network connection leaves the external store untouched.
pub struct MemoryConnection {
    store: Arc<MemoryStore>,
    closes: Arc<AtomicUsize>,
}

impl Deref for MemoryConnection {
    type Target = MemoryStore;

    fn deref(&self) -> &MemoryStore {
        &self.store
    }
}

impl MemoryConnection {
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn close(&self) -> Result<(), MoonshipError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out connections to one shared [`MemoryStore`] and counts them.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    store: Arc<MemoryStore>,
    connects: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            connects: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Connections opened so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Connections closed so far.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection, MoonshipError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            store: self.store.clone(),
            closes: self.closes.clone(),
        })
    }
}
