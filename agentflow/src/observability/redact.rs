//! Redaction of sensitive metadata before it is logged.

use serde_json::{Map, Value};

/// Replacement for redacted values.
pub const REDACTED: &str = "[REDACTED]";

/// Key fragments that mark a value as sensitive, compared case-insensitively.
pub const SENSITIVE_KEY_FRAGMENTS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "api_key",
    "apikey",
    "authorization",
    "credential",
    "private_key",
    "ssn",
    "credit_card",
];

/// Returns true if the key names a sensitive value.
#[must_use]
pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_KEY_FRAGMENTS
        .iter()
        .any(|fragment| key.contains(fragment))
}

/// Returns a copy of the metadata with sensitive values replaced, recursively.
#[must_use]
pub fn redact_metadata(metadata: &Map<String, Value>) -> Map<String, Value> {
    metadata
        .iter()
        .map(|(key, value)| {
            let value = if is_sensitive_key(key) {
                Value::String(REDACTED.to_string())
            } else {
                redact_value(value)
            };
            (key.clone(), value)
        })
        .collect()
}

fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(redact_metadata(map)),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_sensitive_keys() {
        assert!(is_sensitive_key("password"));
        assert!(is_sensitive_key("DB_PASSWORD"));
        assert!(is_sensitive_key("refresh_token"));
        assert!(is_sensitive_key("Authorization"));
        assert!(!is_sensitive_key("user"));
    }

    #[test]
    fn test_redacts_nested_values() {
        let metadata = object(json!({
            "user": "ada",
            "api_key": "k-123",
            "auth": {"client_secret": "s", "scope": "read"},
            "hops": [{"token": "t"}, {"name": "edge"}],
        }));

        let redacted = redact_metadata(&metadata);

        assert_eq!(
            Value::Object(redacted),
            json!({
                "user": "ada",
                "api_key": REDACTED,
                "auth": {"client_secret": REDACTED, "scope": "read"},
                "hops": [{"token": REDACTED}, {"name": "edge"}],
            })
        );
    }
}
