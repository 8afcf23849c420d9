//! # Agentflow
//!
//! An agent-based data-processing orchestrator.
//!
//! Agentflow threads an immutable [`Context`](context::Context) through
//! single-purpose agents, with support for:
//!
//! - **Mediated dispatch**: name resolution, onion-ordered middleware,
//!   statistics and orchestration events
//! - **Composable pipelines**: sequential, parallel, conditional and
//!   map-reduce modes, nested pipelines and debugging hooks
//! - **Async batches**: parallel stages run as scheduled jobs whose results
//!   are aggregated through a key-value store
//! - **Resilience**: circuit breaking, rate limiting and response caching
//!   for agents that call external services
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use agentflow::prelude::*;
//!
//! let mediator = Arc::new(Mediator::new());
//! let pipeline = Pipeline::new(mediator)
//!     .agent(FnAgent::transform("upper", |p| {
//!         Payload::from(p.as_str().unwrap_or_default().to_uppercase())
//!     }))
//!     .validate(|ctx: &Context| !ctx.payload().is_null());
//!
//! let result = pipeline.run("hello").await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod agents;
pub mod batch;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod http;
pub mod mediator;
pub mod middleware;
pub mod observability;
pub mod pipeline;
pub mod resilience;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::agents::{
        Agent, AgentRef, AgentRegistry, FnAgent, NoOpAgent, ResilientAgent, ServiceCall,
        StepAdapterAgent, ValidationResult,
    };
    pub use crate::batch::{
        BatchConfig, BatchCoordinator, BatchHandle, BatchProgress, InMemoryStore, KeyValueStore,
        TaskScheduler, TokioScheduler,
    };
    pub use crate::config::OrchestratorConfig;
    pub use crate::context::{Callable, Context, Payload};
    pub use crate::core::{ExecutionMode, ExecutionStatus, RetryPolicy};
    pub use crate::errors::AgentflowError;
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, OrchestrationEvent};
    pub use crate::mediator::{Mediator, MediatorConfig};
    pub use crate::middleware::{AgentMatcher, Middleware};
    pub use crate::pipeline::{CallableStage, Pipeline, Stage, StageValue};
    pub use crate::resilience::ResilienceConfig;
    pub use std::sync::Arc;
}
