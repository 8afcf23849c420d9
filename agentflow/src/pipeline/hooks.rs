//! Debugging hooks that observe a context between stages.

use crate::agents::ValidationResult;
use crate::context::Context;
use crate::observability::redact_metadata;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

type TapFn = Arc<dyn Fn(&Context) + Send + Sync>;
type ValidateFn = Arc<dyn Fn(&Context) -> ValidationResult + Send + Sync>;

/// Cancellation reason recorded when a halting validation fails.
pub const VALIDATION_HALT_REASON: &str = "validation failed";

/// A pass-through stage used while developing pipelines.
///
/// Only `Validate` can change the context: failures are appended as errors.
#[derive(Clone)]
pub enum DebugHook {
    /// Calls a function with the context.
    Tap(TapFn),
    /// Logs the full context, metadata redacted.
    Dump(String),
    /// Logs a one-line summary, metadata redacted.
    LogContext(String),
    /// Checks the context and records failures.
    Validate(ValidateFn),
}

impl DebugHook {
    /// Creates a tap hook.
    pub fn tap<F>(func: F) -> Self
    where
        F: Fn(&Context) + Send + Sync + 'static,
    {
        Self::Tap(Arc::new(func))
    }

    /// Creates a validation hook.
    pub fn validate<F, R>(check: F) -> Self
    where
        F: Fn(&Context) -> R + Send + Sync + 'static,
        R: Into<ValidationResult>,
    {
        Self::Validate(Arc::new(move |ctx| check(ctx).into()))
    }

    /// Name used in logs.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Tap(_) => "tap",
            Self::Dump(_) => "dump",
            Self::LogContext(_) => "log_context",
            Self::Validate(_) => "validate",
        }
    }

    /// Runs the hook. When `halt` is set, a failed validation also cancels the context.
    pub(crate) fn apply(&self, ctx: Context, halt: bool) -> Context {
        match self {
            Self::Tap(func) => {
                func(&ctx);
                ctx
            }
            Self::Dump(label) => {
                let rendered = redacted_debug_value(&ctx);
                info!(label = %label, context = %rendered, "Context dump");
                ctx
            }
            Self::LogContext(label) => {
                let metadata = Value::Object(redact_metadata(ctx.metadata()));
                info!(
                    label = %label,
                    correlation_id = %ctx.correlation_id(),
                    payload_type = ctx.payload().type_name(),
                    tags = ?ctx.tags(),
                    error_count = ctx.error_count(),
                    cancelled = ctx.is_cancelled(),
                    metadata = %metadata,
                    "Pipeline context"
                );
                ctx
            }
            Self::Validate(check) => {
                let result = check(&ctx);
                if result.is_valid() {
                    debug!(correlation_id = %ctx.correlation_id(), "Validation passed");
                    return ctx;
                }
                warn!(
                    correlation_id = %ctx.correlation_id(),
                    errors = ?result.errors(),
                    halt,
                    "Validation failed"
                );
                let ctx = ctx.add_errors(result.errors().iter().cloned());
                if halt {
                    ctx.cancel_with_reason(VALIDATION_HALT_REASON)
                } else {
                    ctx
                }
            }
        }
    }
}

impl fmt::Debug for DebugHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dump(label) => f.debug_tuple("Dump").field(label).finish(),
            Self::LogContext(label) => f.debug_tuple("LogContext").field(label).finish(),
            other => f.write_str(other.label()),
        }
    }
}

/// The context's debug rendering with sensitive metadata replaced.
#[must_use]
pub fn redacted_debug_value(ctx: &Context) -> Value {
    let mut rendered = ctx.to_debug_value();
    if let Some(object) = rendered.as_object_mut() {
        object.insert(
            "metadata".to_string(),
            Value::Object(redact_metadata(ctx.metadata())),
        );
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::REDACTED;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_tap_sees_context_and_passes_it_on() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let hook = DebugHook::tap(move |ctx| *sink.lock() = Some(ctx.payload().clone()));

        let ctx = hook.apply(Context::new("x"), false);
        assert_eq!(seen.lock().clone(), Some(ctx.payload().clone()));
    }

    #[test]
    fn test_validate_records_errors_without_halting() {
        let hook = DebugHook::validate(|_| vec!["missing name".to_string()]);
        let ctx = hook.apply(Context::new(1), false);

        assert_eq!(ctx.errors(), ["missing name"]);
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn test_validate_can_halt() {
        let hook = DebugHook::validate(|_| false);
        let ctx = hook.apply(Context::new(1), true);

        assert_eq!(ctx.errors(), ["validation failed"]);
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_passing_validation_is_transparent() {
        let hook = DebugHook::validate(|ctx: &Context| !ctx.payload().is_null());
        let ctx = hook.apply(Context::new("ok"), true);
        assert!(!ctx.has_errors());
    }

    #[test]
    fn test_dump_redacts_metadata() {
        let ctx = Context::new("x")
            .with_metadata("password", "hunter2")
            .with_metadata("user", "ada");

        let rendered = redacted_debug_value(&ctx);
        assert_eq!(rendered["metadata"], json!({"password": REDACTED, "user": "ada"}));
        assert_eq!(rendered["payload"], json!("x"));

        let passed = DebugHook::Dump("checkpoint".into()).apply(ctx.clone(), false);
        assert_eq!(passed.metadata(), ctx.metadata());
    }
}
