//! Response cache keyed by input fingerprints.

use crate::batch::KeyValueStore;
use crate::context::Payload;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

fn default_enabled() -> bool {
    true
}

fn default_ttl_seconds() -> u64 {
    300
}

fn default_key_prefix() -> String {
    "agentflow:cache".to_string()
}

/// Response cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether successful responses are cached.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Lifetime of cached responses.
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    /// Prefix of every cache key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            ttl_seconds: default_ttl_seconds(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl CacheConfig {
    /// A configuration with caching switched off.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Sets the TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_seconds = ttl.as_secs();
        self
    }

    /// Sets the key prefix.
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }
}

/// Computes the fingerprint of a service call input.
///
/// Returns `None` if the input holds a callable.
#[must_use]
pub fn fingerprint(service: &str, input: &Payload) -> Option<String> {
    let json = input.to_json().ok()?;
    let mut hasher = Sha256::new();
    hasher.update(service.as_bytes());
    hasher.update(b":");
    hasher.update(json.to_string().as_bytes());
    Some(hex::encode(hasher.finalize()))
}

/// Caches successful service responses in a [`KeyValueStore`].
///
/// Store failures are logged and treated as misses.
pub struct ResponseCache {
    store: Arc<dyn KeyValueStore>,
    config: CacheConfig,
}

impl ResponseCache {
    /// Creates a cache over a store.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    /// Returns true if caching is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Returns the store key for an input, if it can be fingerprinted.
    #[must_use]
    pub fn key_for(&self, service: &str, input: &Payload) -> Option<String> {
        fingerprint(service, input).map(|fp| format!("{}:{service}:{fp}", self.config.key_prefix))
    }

    /// Looks up a cached response.
    pub async fn get(&self, service: &str, input: &Payload) -> Option<Payload> {
        if !self.config.enabled {
            return None;
        }
        let key = self.key_for(service, input)?;
        match self.store.get(&key).await {
            Ok(value) => value.map(Payload::from),
            Err(err) => {
                warn!(service = %service, error = %err, "Response cache read failed");
                None
            }
        }
    }

    /// Stores a successful response.
    pub async fn put(&self, service: &str, input: &Payload, output: &Payload) {
        if !self.config.enabled {
            return;
        }
        let (Some(key), Ok(value)) = (self.key_for(service, input), output.to_json()) else {
            return;
        };
        let ttl = Some(Duration::from_secs(self.config.ttl_seconds));
        if let Err(err) = self.store.put(&key, value, ttl).await {
            warn!(service = %service, error = %err, "Response cache write failed");
        }
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
