use async_trait::async_trait;
use flowcore::{Block, BlockContext, BlockError, BlockMetadata, BlockOutcome};
use serde_json::json;
use tokio::time::{sleep, Duration};

/// Delay execution for a specified duration
pub struct DelayBlock;

#[async_trait]
impl Block for DelayBlock {
    fn block_type(&self) -> &str {
        "time.delay"
    }

    async fn run(&self, ctx: BlockContext) -> Result<BlockOutcome, BlockError> {
        let delay_ms = ctx
            .input
            .get("delay_ms")
            .and_then(|v| v.as_f64())
            .unwrap_or(1000.0)
            .max(0.0) as u64;

        ctx.events.info(format!("Delaying for {}ms", delay_ms));

        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => {}
            _ = ctx.cancellation.cancelled() => return Err(BlockError::Cancelled),
        }

        // Pass through the value, if any
        let value = ctx.input_or("value", serde_json::Value::Null);
        Ok(BlockOutcome::Output(json!({ "delayed_ms": delay_ms, "value": value })))
    }

    fn metadata(&self) -> BlockMetadata {
        BlockMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
        }
    }
}
