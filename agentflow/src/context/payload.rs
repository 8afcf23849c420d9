//! The value carried through a pipeline.

use crate::errors::AgentflowError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A behaviour-carrying payload value.
///
/// Callables can flow through synchronous pipelines but can never be
/// externalized, so a context holding one fails `prepare_for_queue`.
#[derive(Clone)]
pub struct Callable {
    name: String,
    func: Arc<dyn Fn(Payload) -> Payload + Send + Sync>,
}

impl Callable {
    /// Wraps a function.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Payload) -> Payload + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Returns the callable's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invokes the callable.
    #[must_use]
    pub fn call(&self, input: Payload) -> Payload {
        (self.func)(input)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable").field("name", &self.name).finish()
    }
}

impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

/// An arbitrary value being transformed by agents.
///
/// Mirrors the JSON data model plus [`Callable`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload {
    /// Absent value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Number.
    Number(serde_json::Number),
    /// String.
    String(String),
    /// Ordered list.
    List(Vec<Payload>),
    /// String-keyed mapping.
    Map(BTreeMap<String, Payload>),
    /// Behaviour-carrying value.
    Callable(Callable),
}

impl Payload {
    /// Creates an empty map payload.
    #[must_use]
    pub fn map() -> Self {
        Self::Map(BTreeMap::new())
    }

    /// Creates an empty list payload.
    #[must_use]
    pub fn list() -> Self {
        Self::List(Vec::new())
    }

    /// Returns the type name used in diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Callable(_) => "callable",
        }
    }

    /// Returns true for null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns true for lists and maps.
    #[must_use]
    pub fn is_collection(&self) -> bool {
        matches!(self, Self::List(_) | Self::Map(_))
    }

    /// Returns true for null, empty strings, and empty collections.
    ///
    /// `0` and `false` are not empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::String(s) => s.is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Map(entries) => entries.is_empty(),
            Self::Bool(_) | Self::Number(_) | Self::Callable(_) => false,
        }
    }

    /// Returns the string slice, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as `i64`, if this is an integral number.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    /// Returns the value as `f64`, if this is a number.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    /// Returns the boolean, if this is a boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the items, if this is a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Payload]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the entries, if this is a map.
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Payload>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Looks up a key in a map payload.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Payload> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Returns true if no callable is reachable from this value.
    #[must_use]
    pub fn is_serializable(&self) -> bool {
        self.first_callable_path("$").is_none()
    }

    /// Converts to JSON.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` naming the path of the first callable found.
    pub fn to_json(&self) -> Result<Value, AgentflowError> {
        if let Some(path) = self.first_callable_path("$") {
            return Err(AgentflowError::serialization(
                path,
                "callables cannot be externalized",
            ));
        }
        Ok(self.to_json_lossy())
    }

    /// Converts to JSON, rendering callables as `"<callable:name>"`.
    #[must_use]
    pub fn to_json_lossy(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
            Self::List(items) => Value::Array(items.iter().map(Self::to_json_lossy).collect()),
            Self::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json_lossy()))
                    .collect(),
            ),
            Self::Callable(c) => Value::String(format!("<callable:{}>", c.name())),
        }
    }

    /// Best-effort size estimate in bytes.
    ///
    /// Grows monotonically with the amount of nested content.
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        match self {
            Self::Null => 4,
            Self::Bool(true) => 4,
            Self::Bool(false) => 5,
            Self::Number(n) => n.to_string().len(),
            Self::String(s) => s.len() + 2,
            Self::List(items) => {
                2 + items.iter().map(Self::estimated_size).sum::<usize>()
                    + items.len().saturating_sub(1)
            }
            Self::Map(entries) => {
                2 + entries
                    .iter()
                    .map(|(k, v)| k.len() + 3 + v.estimated_size())
                    .sum::<usize>()
                    + entries.len().saturating_sub(1)
            }
            Self::Callable(c) => c.name().len() + 16,
        }
    }

    fn first_callable_path(&self, path: &str) -> Option<String> {
        match self {
            Self::Callable(_) => Some(path.to_string()),
            Self::List(items) => items
                .iter()
                .enumerate()
                .find_map(|(i, item)| item.first_callable_path(&format!("{path}[{i}]"))),
            Self::Map(entries) => entries
                .iter()
                .find_map(|(k, v)| v.first_callable_path(&format!("{path}.{k}"))),
            _ => None,
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(entries) => {
                Self::Map(entries.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Payload {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Payload {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<i32> for Payload {
    fn from(value: i32) -> Self {
        Self::Number(value.into())
    }
}

impl From<u64> for Payload {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

impl From<f64> for Payload {
    fn from(value: f64) -> Self {
        serde_json::Number::from_f64(value).map_or(Self::Null, Self::Number)
    }
}

impl From<Vec<Payload>> for Payload {
    fn from(value: Vec<Payload>) -> Self {
        Self::List(value)
    }
}

impl From<BTreeMap<String, Payload>> for Payload {
    fn from(value: BTreeMap<String, Payload>) -> Self {
        Self::Map(value)
    }
}

impl From<Callable> for Payload {
    fn from(value: Callable) -> Self {
        Self::Callable(value)
    }
}
