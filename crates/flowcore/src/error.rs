use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Execution error: {0}")]
    Execution(String),
}

/// Errors raised by a block while running one step.
///
/// These are business failures: the executor records them on the step
/// output with status FAILED instead of aborting the run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BlockError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Invalid flow: {0}")]
    Invalid(String),

    #[error("Duplicate step name: {0}")]
    DuplicateStepName(String),

    #[error("Unknown block: {0}")]
    UnknownBlock(String),
}
