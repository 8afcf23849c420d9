//! Testing utilities for agentflow.
//!
//! This module provides:
//! - Mock and failing agents
//! - A counting service call for resilience tests
//! - Middleware that records hook order
//! - Assertions over contexts

mod assertions;
mod mocks;

pub use assertions::{
    assert_has_error, assert_has_tag, assert_metadata_eq, assert_no_errors, assert_payload_eq,
};
pub use mocks::{
    CountingServiceCall, FailingAgent, MiddlewareLog, MockAgent, RecordingMiddleware,
};
