//! Latest-value cache for inbound MQTT payloads
//!
//! The cache is the only structure written from the connection task and read
//! from request handlers at the same time. Every write replaces one entry under
//! the write lock and every read copies the whole map under the read lock, so a
//! [`Snapshot`] never contains a half-applied update.

use serde::Serialize;
use serde_json::Value;
use std::collections::hash_map;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Concurrent key/value store holding the most recent value per cache key.
#[derive(Debug, Default)]
pub struct MessageCache {
    entries: RwLock<HashMap<String, Value>>,
}

impl MessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the entry for `key`.
    pub fn put(&self, key: String, value: Value) {
        // A poisoned lock only means a reader panicked mid-clone; the map is intact.
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        entries.insert(key, value);
    }

    /// Copies all entries at a single point in time.
    pub fn snapshot(&self) -> Snapshot {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Snapshot(entries.clone())
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Independent point-in-time copy of the message cache.
///
/// Presentation code that combines several keys (for example a metric and a
/// field derived from another array value) must read them from the same
/// snapshot to avoid mixing values from different moments.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Snapshot(HashMap<String, Value>);

impl Snapshot {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, Value> {
        self.0.iter()
    }

    pub fn into_inner(self) -> HashMap<String, Value> {
        self.0
    }
}

impl IntoIterator for Snapshot {
    type Item = (String, Value);
    type IntoIter = hash_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Cloneable read-only handle on the cache, handed to request handlers.
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    cache: Arc<MessageCache>,
}

impl SnapshotReader {
    pub fn new(cache: Arc<MessageCache>) -> Self {
        Self { cache }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.cache.snapshot()
    }
}
