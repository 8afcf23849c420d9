//! Context model for agent execution.
//!
//! This module provides:
//! - The [`Payload`] value model, including non-serializable callables
//! - The immutable [`Context`] carried through agents and pipelines
//! - [`QueuedContext`], the externalized form used by the batch layer

mod immutable;
mod payload;
mod queued;

pub use immutable::{Context, CANCEL_REASON_KEY};
pub use payload::{Callable, Payload};
pub use queued::QueuedContext;
