use flowcore::FlowError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Raised by an engine runner instead of returning a response.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The sandbox gave up on the run before it produced a result.
    #[error("Execution timed out after {}ms", .0.as_millis())]
    ExecutionTimeout(Duration),

    #[error("Engine failure: {0}")]
    Failed(String),

    #[error(transparent)]
    Flow(#[from] FlowError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LockError {
    #[error("Could not acquire lock '{key}' within {waited_ms}ms")]
    Timeout { key: String, waited_ms: u64 },

    #[error("Lock '{key}' is no longer held by this owner")]
    NotHeld { key: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Run not found: {0}")]
    RunNotFound(String),
}
