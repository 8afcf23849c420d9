//! Predicates selecting which agents scoped middleware applies to.

use crate::agents::Agent;
use crate::errors::AgentflowError;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

type Predicate = Arc<dyn Fn(&dyn Agent) -> bool + Send + Sync>;

/// A predicate over agent identity, supplied when scoped middleware is registered.
#[derive(Clone)]
pub struct AgentMatcher {
    description: String,
    predicate: Predicate,
}

impl AgentMatcher {
    /// Wraps an arbitrary predicate.
    pub fn new<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&dyn Agent) -> bool + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Matches every agent.
    #[must_use]
    pub fn any() -> Self {
        Self::new("*", |_| true)
    }

    /// Matches agents by display name.
    pub fn name(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(format!("name={name}"), move |agent| agent.name() == name)
    }

    /// Matches agents by type identity.
    pub fn kind(kind: impl Into<String>) -> Self {
        let kind = kind.into();
        Self::new(format!("kind={kind}"), move |agent| agent.kind() == kind)
    }

    /// Matches agents advertising a tag.
    pub fn tagged(tag: impl Into<String>) -> Self {
        let tag = tag.into();
        Self::new(format!("tag={tag}"), move |agent| agent.tags().contains(&tag))
    }

    /// Matches a glob (`*` and `?`) against the agent's type identity or name.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the glob does not compile.
    pub fn glob(pattern: &str) -> Result<Self, AgentflowError> {
        let regex = glob_to_regex(pattern)?;
        Ok(Self::new(format!("glob={pattern}"), move |agent| {
            regex.is_match(agent.kind()) || regex.is_match(agent.name())
        }))
    }

    /// Returns true if the agent matches.
    #[must_use]
    pub fn matches(&self, agent: &dyn Agent) -> bool {
        (self.predicate)(agent)
    }

    /// Returns the description given at construction.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for AgentMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AgentMatcher").field(&self.description).finish()
    }
}

fn glob_to_regex(pattern: &str) -> Result<Regex, AgentflowError> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push('$');
    Regex::new(&source)
        .map_err(|e| AgentflowError::Configuration(format!("invalid agent glob '{pattern}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{FnAgent, NoOpAgent};

    fn http_agent() -> FnAgent {
        FnAgent::new("weather", |ctx| Ok(ctx.clone()))
            .with_kind("HttpWeatherAgent")
            .with_tags(["http"])
    }

    #[test]
    fn test_glob_matches_kind_or_name() {
        let by_kind = AgentMatcher::glob("Http*").unwrap();
        let by_name = AgentMatcher::glob("weath?r").unwrap();

        assert!(by_kind.matches(&http_agent()));
        assert!(by_name.matches(&http_agent()));
        assert!(!by_kind.matches(&NoOpAgent::new("idle")));
    }

    #[test]
    fn test_glob_escapes_regex_characters() {
        let matcher = AgentMatcher::glob("a.b").unwrap();
        assert!(matcher.matches(&NoOpAgent::new("a.b")));
        assert!(!matcher.matches(&NoOpAgent::new("axb")));
    }

    #[test]
    fn test_simple_matchers() {
        let agent = http_agent();
        assert!(AgentMatcher::name("weather").matches(&agent));
        assert!(AgentMatcher::kind("HttpWeatherAgent").matches(&agent));
        assert!(AgentMatcher::tagged("http").matches(&agent));
        assert!(!AgentMatcher::tagged("db").matches(&agent));
        assert!(AgentMatcher::any().matches(&agent));
    }

    #[test]
    fn test_custom_predicate() {
        let matcher = AgentMatcher::new("short names", |agent| agent.name().len() <= 4);
        assert!(matcher.matches(&NoOpAgent::new("idle")));
        assert!(!matcher.matches(&NoOpAgent::new("verbose")));
        assert_eq!(matcher.description(), "short names");
    }
}
