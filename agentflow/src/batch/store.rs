//! Shared key-value store collaborator.

use crate::errors::AgentflowError;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::time::{Duration, Instant};

/// A key-value cache reachable by every worker.
///
/// Used for per-job batch results, final aggregates and response caching.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Stores a value. `None` means no expiry.
    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>)
        -> Result<(), AgentflowError>;

    /// Reads a value, ignoring expired entries.
    async fn get(&self, key: &str) -> Result<Option<Value>, AgentflowError>;

    /// Returns true if a live value exists.
    async fn has(&self, key: &str) -> Result<bool, AgentflowError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Removes a value.
    async fn forget(&self, key: &str) -> Result<(), AgentflowError>;

    /// Stores a value only if no live value exists. Returns true if stored.
    ///
    /// The default is not atomic; stores shared across processes should
    /// override it.
    async fn put_if_absent(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<bool, AgentflowError> {
        if self.has(key).await? {
            return Ok(false);
        }
        self.put(key, value, ttl).await?;
        Ok(true)
    }
}

struct StoreEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl StoreEntry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

/// In-process store with per-entry expiry.
#[derive(Default)]
pub struct InMemoryStore {
    entries: DashMap<String, StoreEntry>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_live()).count()
    }

    /// Returns true if no live entries exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the live keys starting with a prefix, sorted.
    #[must_use]
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.is_live() && e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Removes expired entries.
    pub fn purge_expired(&self) {
        self.entries.retain(|_, entry| entry.is_live());
    }

    /// Clears all entries.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn put(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), AgentflowError> {
        self.entries
            .insert(key.to_string(), StoreEntry::new(value, ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, AgentflowError> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_live() {
                return Ok(Some(entry.value.clone()));
            }
            drop(entry);
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn forget(&self, key: &str) -> Result<(), AgentflowError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<bool, AgentflowError> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live() {
                    return Ok(false);
                }
                occupied.insert(StoreEntry::new(value, ttl));
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoreEntry::new(value, ttl));
                Ok(true)
            }
        }
    }
}
