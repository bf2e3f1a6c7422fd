use crate::{events::EventEmitter, BlockError, ExecutionId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Core trait that all executable blocks implement
#[async_trait]
pub trait Block: Send + Sync {
    /// Unique type identifier (e.g., "debug.log", "flow.approval")
    fn block_type(&self) -> &str;

    /// Run one step with its already-resolved input
    async fn run(&self, ctx: BlockContext) -> Result<BlockOutcome, BlockError>;

    /// Optional: description shown by `flow blocks`
    fn metadata(&self) -> BlockMetadata {
        BlockMetadata::default()
    }
}

/// Context handed to a block for one step
#[derive(Clone)]
pub struct BlockContext {
    pub execution_id: ExecutionId,

    /// Name of the step being executed
    pub step_name: String,

    /// Input after template resolution
    pub input: Value,

    /// Present when the run resumes at this step
    pub resume_payload: Option<Value>,

    pub project_id: String,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Cancelled when the run is stopped
    pub cancellation: tokio_util::sync::CancellationToken,
}

impl BlockContext {
    /// Get required input field or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, BlockError> {
        self.input
            .get(name)
            .filter(|v| !v.is_null())
            .ok_or_else(|| BlockError::MissingInput(name.to_string()))
    }

    /// Get required string input field
    pub fn require_str(&self, name: &str) -> Result<&str, BlockError> {
        let value = self.require_input(name)?;
        value.as_str().ok_or_else(|| BlockError::InvalidInputType {
            field: name.to_string(),
            expected: "string".to_string(),
            actual: type_name(value).to_string(),
        })
    }

    pub fn input_or(&self, name: &str, default: Value) -> Value {
        self.input.get(name).cloned().unwrap_or(default)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// What a block asked the executor to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockOutcome {
    /// Step succeeded with this output
    Output(Value),
    /// Suspend the run until a resume job arrives
    Pause(PauseRequest),
    /// Step succeeded and the whole run stops here
    Stop(Value),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PauseRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub resume_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data: Value,
}

/// Metadata about a block type
#[derive(Debug, Clone)]
pub struct BlockMetadata {
    pub description: String,
    pub category: String,
}

impl Default for BlockMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}
