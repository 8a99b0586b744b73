// src/core/cache/bulk.rs

//! The queued-mutation builder behind `SharedCache::start_bulk`.

use super::SharedCache;
use crate::core::MoonshipError;
use std::collections::HashMap;

/// One queued mutation of a bulk operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkStep {
    ListPushHead { key: String, element: String },
    ListPushTail { key: String, element: String },
    ListPopHead { key: String },
    ListPopTail { key: String },
    ListRemove { key: String, element: String },
    SetAdd { key: String, element: String },
    SetRemove { key: String, element: String },
    MapPut { key: String, entries: HashMap<String, String> },
    Delete { key: String },
    Expire { key: String, ttl_ms: u64 },
}

impl BulkStep {
    pub fn key(&self) -> &str {
        match self {
            BulkStep::ListPushHead { key, .. }
            | BulkStep::ListPushTail { key, .. }
            | BulkStep::ListPopHead { key }
            | BulkStep::ListPopTail { key }
            | BulkStep::ListRemove { key, .. }
            | BulkStep::SetAdd { key, .. }
            | BulkStep::SetRemove { key, .. }
            | BulkStep::MapPut { key, .. }
            | BulkStep::Delete { key }
            | BulkStep::Expire { key, .. } => key,
        }
    }

    /// The container kind this step requires, if any.
    fn required_kind(&self) -> Option<KeyKind> {
        match self {
            BulkStep::ListPushHead { .. }
            | BulkStep::ListPushTail { .. }
            | BulkStep::ListPopHead { .. }
            | BulkStep::ListPopTail { .. }
            | BulkStep::ListRemove { .. } => Some(KeyKind::List),
            BulkStep::SetAdd { .. } | BulkStep::SetRemove { .. } => Some(KeyKind::Set),
            BulkStep::MapPut { .. } => Some(KeyKind::Map),
            BulkStep::Delete { .. } | BulkStep::Expire { .. } => None,
        }
    }

    /// True if this step can create the key when it is absent.
    fn creates_key(&self) -> bool {
        matches!(
            self,
            BulkStep::ListPushHead { .. }
                | BulkStep::ListPushTail { .. }
                | BulkStep::SetAdd { .. }
                | BulkStep::MapPut { .. }
        )
    }
}

/// The kind of value currently stored under a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Missing,
    List,
    Set,
    Map,
    /// Any container type this layer does not manage (strings, sorted sets, ...).
    Other,
}

impl KeyKind {
    /// Maps a Redis `TYPE` reply onto a `KeyKind`.
    pub fn from_type_name(name: &str) -> Self {
        match name {
            "none" => KeyKind::Missing,
            "list" => KeyKind::List,
            "set" => KeyKind::Set,
            "hash" => KeyKind::Map,
            _ => KeyKind::Other,
        }
    }
}

/// Checks, before anything is applied, that every step will find the container
/// type it needs. `initial` gives the current kind of each touched key.
///
/// Kinds are tracked through the step sequence, so `delete` followed by
/// `map_put` on a key that currently holds a list is accepted.
pub fn check_step_types(
    steps: &[BulkStep],
    initial: &HashMap<String, KeyKind>,
) -> Result<(), MoonshipError> {
    let mut kinds = initial.clone();
    for step in steps {
        let key = step.key();
        let current = kinds.get(key).copied().unwrap_or(KeyKind::Missing);
        if matches!(step, BulkStep::Delete { .. }) {
            kinds.insert(key.to_string(), KeyKind::Missing);
            continue;
        }
        let Some(required) = step.required_kind() else {
            continue;
        };
        match current {
            KeyKind::Missing if step.creates_key() => {
                kinds.insert(key.to_string(), required);
            }
            KeyKind::Missing => {}
            kind if kind == required => {}
            _ => return Err(MoonshipError::WrongType),
        }
    }
    Ok(())
}

/// Distinct keys touched by `steps`, in first-use order.
pub fn touched_keys(steps: &[BulkStep]) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for step in steps {
        if !keys.iter().any(|k| k == step.key()) {
            keys.push(step.key().to_string());
        }
    }
    keys
}

/// A queue of mutations committed together by [`BulkOp::execute`].
///
/// Nothing reaches the store until `execute` is awaited, and steps are applied
/// in the order they were queued. In transactional mode the commit is
/// all-or-nothing; otherwise it is one round trip with no atomicity.
#[must_use = "a bulk operation does nothing until `execute` is awaited"]
pub struct BulkOp<'a> {
    cache: &'a dyn SharedCache,
    transactional: bool,
    steps: Vec<BulkStep>,
}

impl<'a> BulkOp<'a> {
    pub fn new(cache: &'a dyn SharedCache, transactional: bool) -> Self {
        Self {
            cache,
            transactional,
            steps: Vec::new(),
        }
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    pub fn steps(&self) -> &[BulkStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn push(mut self, step: BulkStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn list_push_head(self, key: &str, element: &str) -> Self {
        self.push(BulkStep::ListPushHead {
            key: key.to_string(),
            element: element.to_string(),
        })
    }

    pub fn list_push_tail(self, key: &str, element: &str) -> Self {
        self.push(BulkStep::ListPushTail {
            key: key.to_string(),
            element: element.to_string(),
        })
    }

    pub fn list_pop_head(self, key: &str) -> Self {
        self.push(BulkStep::ListPopHead {
            key: key.to_string(),
        })
    }

    pub fn list_pop_tail(self, key: &str) -> Self {
        self.push(BulkStep::ListPopTail {
            key: key.to_string(),
        })
    }

    /// Removes every occurrence of `element`.
    pub fn list_remove(self, key: &str, element: &str) -> Self {
        self.push(BulkStep::ListRemove {
            key: key.to_string(),
            element: element.to_string(),
        })
    }

    pub fn set_add(self, key: &str, element: &str) -> Self {
        self.push(BulkStep::SetAdd {
            key: key.to_string(),
            element: element.to_string(),
        })
    }

    pub fn set_remove(self, key: &str, element: &str) -> Self {
        self.push(BulkStep::SetRemove {
            key: key.to_string(),
            element: element.to_string(),
        })
    }

    /// Merges `entries` into the map. An empty `entries` queues nothing.
    pub fn map_put(self, key: &str, entries: &HashMap<String, String>) -> Self {
        if entries.is_empty() {
            return self;
        }
        self.push(BulkStep::MapPut {
            key: key.to_string(),
            entries: entries.clone(),
        })
    }

    pub fn delete(self, key: &str) -> Self {
        self.push(BulkStep::Delete {
            key: key.to_string(),
        })
    }

    pub fn expire(self, key: &str, ttl_ms: u64) -> Self {
        self.push(BulkStep::Expire {
            key: key.to_string(),
            ttl_ms,
        })
    }

    /// Commits every queued step.
    pub async fn execute(self) -> Result<(), MoonshipError> {
        if self.steps.is_empty() {
            return Ok(());
        }
        self.cache
            .execute_bulk(self.transactional, self.steps)
            .await
    }
}
