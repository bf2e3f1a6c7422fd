use async_trait::async_trait;
use flowcore::{Block, BlockContext, BlockError, BlockMetadata, BlockOutcome};
use serde_json::json;

/// Parse JSON string to a value
pub struct JsonParseBlock;

#[async_trait]
impl Block for JsonParseBlock {
    fn block_type(&self) -> &str {
        "transform.json_parse"
    }

    async fn run(&self, ctx: BlockContext) -> Result<BlockOutcome, BlockError> {
        let input = ctx.require_str("json")?;

        let parsed: serde_json::Value = serde_json::from_str(input)
            .map_err(|e| BlockError::ExecutionFailed(format!("JSON parse error: {}", e)))?;

        Ok(BlockOutcome::Output(json!({ "parsed": parsed })))
    }

    fn metadata(&self) -> BlockMetadata {
        BlockMetadata {
            description: "Parse JSON string".to_string(),
            category: "transform".to_string(),
        }
    }
}

/// Stringify a value to JSON
pub struct JsonStringifyBlock;

#[async_trait]
impl Block for JsonStringifyBlock {
    fn block_type(&self) -> &str {
        "transform.json_stringify"
    }

    async fn run(&self, ctx: BlockContext) -> Result<BlockOutcome, BlockError> {
        let value = ctx.require_input("value")?;
        let pretty = ctx
            .input
            .get("pretty")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let rendered = if pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
        .map_err(|e| BlockError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;

        Ok(BlockOutcome::Output(json!({ "json": rendered })))
    }

    fn metadata(&self) -> BlockMetadata {
        BlockMetadata {
            description: "Convert value to JSON string".to_string(),
            category: "transform".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::context;

    #[tokio::test]
    async fn test_parse() {
        let outcome = JsonParseBlock
            .run(context(json!({ "json": "{\"cost\": 12.5}" })))
            .await
            .unwrap();
        assert_eq!(outcome, BlockOutcome::Output(json!({ "parsed": { "cost": 12.5 } })));
    }

    #[tokio::test]
    async fn test_parse_rejects_non_string() {
        let err = JsonParseBlock.run(context(json!({ "json": 5 }))).await.unwrap_err();
        assert!(matches!(err, BlockError::InvalidInputType { ref field, .. } if field == "json"));
    }

    #[tokio::test]
    async fn test_parse_reports_syntax_errors() {
        let err = JsonParseBlock.run(context(json!({ "json": "{" }))).await.unwrap_err();
        assert!(matches!(err, BlockError::ExecutionFailed(ref m) if m.starts_with("JSON parse error")));
    }

    #[tokio::test]
    async fn test_stringify_keeps_key_order() {
        let outcome = JsonStringifyBlock
            .run(context(json!({ "value": { "b": 1, "a": [true] } })))
            .await
            .unwrap();
        assert_eq!(outcome, BlockOutcome::Output(json!({ "json": "{\"b\":1,\"a\":[true]}" })));
    }

    #[tokio::test]
    async fn test_stringify_requires_value() {
        let err = JsonStringifyBlock.run(context(json!({}))).await.unwrap_err();
        assert_eq!(err, BlockError::MissingInput("value".to_string()));
    }
}
