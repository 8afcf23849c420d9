//! Observability helpers: logging setup and redaction.

mod logging;
mod redact;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};
pub use redact::{is_sensitive_key, redact_metadata, REDACTED, SENSITIVE_KEY_FRAGMENTS};
