use async_trait::async_trait;
use flowcore::{Block, BlockContext, BlockError, BlockMetadata, BlockOutcome};
use serde_json::json;

/// Simple debug block that logs its input
pub struct DebugBlock;

#[async_trait]
impl Block for DebugBlock {
    fn block_type(&self) -> &str {
        "debug.log"
    }

    async fn run(&self, ctx: BlockContext) -> Result<BlockOutcome, BlockError> {
        let message = ctx
            .input
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)")
            .to_string();

        tracing::info!(step = %ctx.step_name, "DEBUG: {}", message);
        ctx.events.info(format!("DEBUG: {}", message));

        // Also log every input field for visibility
        if let Some(fields) = ctx.input.as_object() {
            for (key, value) in fields {
                ctx.events.info(format!("  {}: {}", key, value));
            }
        }

        Ok(BlockOutcome::Output(json!({ "message": message })))
    }

    fn metadata(&self) -> BlockMetadata {
        BlockMetadata {
            description: "Logs input values for debugging".to_string(),
            category: "debug".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::context;

    #[tokio::test]
    async fn test_echoes_message() {
        let outcome = DebugBlock
            .run(context(json!({ "message": "hello", "extra": 1 })))
            .await
            .unwrap();
        assert_eq!(outcome, BlockOutcome::Output(json!({ "message": "hello" })));
    }

    #[tokio::test]
    async fn test_missing_message_has_placeholder() {
        let outcome = DebugBlock.run(context(json!({}))).await.unwrap();
        assert_eq!(outcome, BlockOutcome::Output(json!({ "message": "(no message)" })));
    }
}
