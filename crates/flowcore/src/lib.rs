//! Core abstractions for the flow run engine
//!
//! This crate provides the fundamental types every other crate depends on:
//! the flow definition model, step outputs, the immutable execution
//! context, the block trait and run events. It performs no I/O.

mod block;
mod context;
mod error;
pub mod events;
mod flow;
mod step;
pub mod value;

pub use block::{Block, BlockContext, BlockMetadata, BlockOutcome, PauseRequest};
pub use context::{ExecutionContext, PathSegment, PathSlot, PauseMetadata, RunError, Verdict};
pub use error::{BlockError, FlowError, WorkflowError};
pub use events::*;
pub use flow::{
    Action, ActionChain, ActionKind, ActionType, BranchCondition, BranchOperator,
    ErrorHandlingOptions, FlowId, FlowSettings, FlowVersion, FlowVersionId, RetryPolicy,
    SplitBranch, Trigger, TriggerKind, TRIGGER_STEP_NAME,
};
pub use step::{ChildSteps, StepKind, StepMap, StepOutput, StepStatus};
pub use value::ValueExt;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
