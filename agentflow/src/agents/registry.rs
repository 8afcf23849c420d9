//! Key-to-factory registries for agents and middleware.

use super::Agent;
use crate::errors::AgentflowError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type Factory<T> = Arc<dyn Fn() -> Arc<T> + Send + Sync>;

// Upper bound on alias hops, so alias cycles resolve to an error.
const MAX_ALIAS_DEPTH: usize = 8;

/// In-memory registry mapping string keys to shared instances or factories.
///
/// Instances take precedence over factories registered under the same key.
/// A factory runs on every resolution.
pub struct Registry<T: ?Sized> {
    kind: &'static str,
    instances: RwLock<HashMap<String, Arc<T>>>,
    factories: RwLock<HashMap<String, Factory<T>>>,
    aliases: RwLock<HashMap<String, String>>,
}

/// Registry of agents, used to resolve [`AgentRef::Named`](super::AgentRef::Named).
pub type AgentRegistry = Registry<dyn Agent>;

impl<T: ?Sized> Registry<T> {
    /// Creates an empty registry. `kind` names the entries in resolution errors.
    #[must_use]
    pub fn with_kind(kind: &'static str) -> Self {
        Self {
            kind,
            instances: RwLock::new(HashMap::new()),
            factories: RwLock::new(HashMap::new()),
            aliases: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a shared instance under a key.
    pub fn register_as(&self, key: impl Into<String>, instance: Arc<T>) {
        self.instances.write().insert(key.into(), instance);
    }

    /// Registers a factory under a key.
    pub fn register_factory<F>(&self, key: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<T> + Send + Sync + 'static,
    {
        self.factories.write().insert(key.into(), Arc::new(factory));
    }

    /// Makes `alias` resolve to whatever `target` resolves to.
    pub fn alias(&self, alias: impl Into<String>, target: impl Into<String>) {
        self.aliases.write().insert(alias.into(), target.into());
    }

    /// Resolves a key.
    ///
    /// # Errors
    ///
    /// Returns `Resolution` if nothing is registered under the key or its aliases.
    pub fn resolve(&self, key: &str) -> Result<Arc<T>, AgentflowError> {
        let target = self.canonical_key(key);
        if let Some(instance) = self.instances.read().get(&target) {
            return Ok(Arc::clone(instance));
        }
        let factory = self.factories.read().get(&target).cloned();
        factory.map(|f| f()).ok_or_else(|| AgentflowError::Resolution {
            identifier: key.to_string(),
            kind: self.kind.to_string(),
        })
    }

    /// Returns true if the key resolves.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        let target = self.canonical_key(key);
        self.instances.read().contains_key(&target) || self.factories.read().contains_key(&target)
    }

    /// Removes a key and any aliases pointing directly at it.
    pub fn remove(&self, key: &str) {
        self.instances.write().remove(key);
        self.factories.write().remove(key);
        self.aliases.write().retain(|alias, target| alias != key && target != key);
    }

    /// Returns all registered keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .instances
            .read()
            .keys()
            .chain(self.factories.read().keys())
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Returns the number of registered keys, aliases excluded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn canonical_key(&self, key: &str) -> String {
        let aliases = self.aliases.read();
        let mut current = key.to_string();
        for _ in 0..MAX_ALIAS_DEPTH {
            match aliases.get(&current) {
                Some(next) => current.clone_from(next),
                None => break,
            }
        }
        current
    }
}

impl<T: ?Sized> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("keys", &self.keys())
            .finish()
    }
}

impl Registry<dyn Agent> {
    /// Creates an empty agent registry.
    #[must_use]
    pub fn new() -> Self {
        Self::with_kind("agent")
    }

    /// Registers an agent under its own name.
    pub fn register(&self, agent: impl Agent + 'static) {
        let name = agent.name().to_string();
        self.register_as(name, Arc::new(agent));
    }
}

impl Default for Registry<dyn Agent> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{FnAgent, NoOpAgent};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_register_and_resolve_instance() {
        let registry = AgentRegistry::new();
        registry.register(NoOpAgent::new("idle"));

        let agent = registry.resolve("idle").unwrap();
        assert_eq!(agent.name(), "idle");
        assert!(registry.contains("idle"));
        assert_eq!(registry.keys(), vec!["idle".to_string()]);
    }

    #[test]
    fn test_missing_key_is_resolution_error() {
        let registry = AgentRegistry::new();
        let err = registry.resolve("ghost").unwrap_err();

        assert!(matches!(
            err,
            AgentflowError::Resolution { ref identifier, ref kind }
                if identifier == "ghost" && kind == "agent"
        ));
    }

    #[test]
    fn test_factory_runs_per_resolution() {
        let registry = AgentRegistry::new();
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        registry.register_factory("fresh", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Arc::new(FnAgent::new("fresh", |ctx| Ok(ctx.clone()))) as Arc<dyn Agent>
        });

        registry.resolve("fresh").unwrap();
        registry.resolve("fresh").unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_aliases_and_cycles() {
        let registry = AgentRegistry::new();
        registry.register(NoOpAgent::new("idle"));
        registry.alias("noop", "idle");
        registry.alias("loop-a", "loop-b");
        registry.alias("loop-b", "loop-a");

        assert_eq!(registry.resolve("noop").unwrap().name(), "idle");
        assert!(registry.resolve("loop-a").is_err());
    }

    #[test]
    fn test_remove() {
        let registry = AgentRegistry::new();
        registry.register(NoOpAgent::new("idle"));
        registry.alias("noop", "idle");
        registry.remove("idle");

        assert!(registry.is_empty());
        assert!(!registry.contains("noop"));
    }
}
