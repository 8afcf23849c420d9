//! Test assertions for contexts.

use crate::context::{Context, Payload};

/// Asserts that some error contains `fragment`.
pub fn assert_has_error(ctx: &Context, fragment: &str) {
    assert!(
        ctx.errors().iter().any(|e| e.contains(fragment)),
        "Expected an error containing '{}', got {:?}",
        fragment,
        ctx.errors()
    );
}

/// Asserts that no errors were recorded.
pub fn assert_no_errors(ctx: &Context) {
    assert!(
        !ctx.has_errors(),
        "Expected no errors, got {:?}",
        ctx.errors()
    );
}

/// Asserts that the context carries a tag.
pub fn assert_has_tag(ctx: &Context, tag: &str) {
    assert!(
        ctx.has_tag(tag),
        "Expected tag '{}', got {:?}",
        tag,
        ctx.tags()
    );
}

/// Asserts that a metadata key holds the expected value.
pub fn assert_metadata_eq(ctx: &Context, key: &str, expected: &serde_json::Value) {
    let actual = ctx.get_metadata(key);
    assert_eq!(
        actual,
        Some(expected),
        "Expected metadata {:?} for key '{}', got {:?}",
        expected,
        key,
        actual
    );
}

/// Asserts the payload.
pub fn assert_payload_eq(ctx: &Context, expected: &Payload) {
    assert_eq!(
        ctx.payload(),
        expected,
        "Expected payload {:?}, got {:?}",
        expected,
        ctx.payload()
    );
}
