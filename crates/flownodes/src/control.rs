//! Blocks that steer the run instead of computing a value.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowcore::{Block, BlockContext, BlockError, BlockMetadata, BlockOutcome, PauseRequest};
use serde_json::{json, Value};

/// Suspends the run until a resume job delivers a decision.
///
/// On the first visit the block pauses with the `request` input as pause
/// data. When the run resumes at this step, the resume payload becomes the
/// step output.
pub struct ApprovalBlock;

#[async_trait]
impl Block for ApprovalBlock {
    fn block_type(&self) -> &str {
        "flow.approval"
    }

    async fn run(&self, ctx: BlockContext) -> Result<BlockOutcome, BlockError> {
        if let Some(payload) = ctx.resume_payload {
            ctx.events.info("Approval received");
            return Ok(BlockOutcome::Output(payload));
        }

        let resume_at = match ctx.input.get("resume_at").and_then(Value::as_str) {
            Some(raw) => Some(
                raw.parse::<DateTime<Utc>>()
                    .map_err(|_| BlockError::InvalidInputType {
                        field: "resume_at".to_string(),
                        expected: "RFC 3339 timestamp".to_string(),
                        actual: raw.to_string(),
                    })?,
            ),
            None => None,
        };

        ctx.events.info("Waiting for approval");
        Ok(BlockOutcome::Pause(PauseRequest {
            request_id: Some(format!("{}:{}", ctx.execution_id, ctx.step_name)),
            resume_at,
            data: ctx.input_or("request", Value::Null),
        }))
    }

    fn metadata(&self) -> BlockMetadata {
        BlockMetadata {
            description: "Pause the run until it is resumed with a decision".to_string(),
            category: "flow".to_string(),
        }
    }
}

/// Ends the run with verdict STOPPED, returning `response` as its output.
pub struct StopFlowBlock;

#[async_trait]
impl Block for StopFlowBlock {
    fn block_type(&self) -> &str {
        "flow.stop"
    }

    async fn run(&self, ctx: BlockContext) -> Result<BlockOutcome, BlockError> {
        let response = ctx.input_or("response", json!({}));
        tracing::info!(step = %ctx.step_name, "Stopping run");
        Ok(BlockOutcome::Stop(response))
    }

    fn metadata(&self) -> BlockMetadata {
        BlockMetadata {
            description: "Stop the run here".to_string(),
            category: "flow".to_string(),
        }
    }
}
