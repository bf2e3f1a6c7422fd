//! Flow run engine
//!
//! This crate walks flow graphs: it resolves templated step input,
//! evaluates branch conditions, runs blocks from the registry and turns
//! every step into a new execution context.

mod branch;
mod constants;
mod executor;
pub mod expression;
mod policy;
mod registry;
mod resolver;
mod runtime;

pub use branch::{evaluate_condition, evaluate_conditions, resolve_conditions};
pub use constants::EngineConstants;
pub use executor::{FlowExecutor, RunOptions};
pub use policy::{FailureDecision, FailurePolicy, StepSettingsPolicy};
pub use registry::BlockRegistry;
pub use resolver::PropsResolver;
pub use runtime::{FlowRuntime, RuntimeConfig};
