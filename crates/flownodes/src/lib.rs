//! Standard block library
//!
//! Collection of built-in blocks for common operations

mod control;
mod debug;
mod time;
mod transform;

pub use control::{ApprovalBlock, StopFlowBlock};
pub use debug::DebugBlock;
pub use time::DelayBlock;
pub use transform::{JsonParseBlock, JsonStringifyBlock};
use flowruntime::BlockRegistry;

use std::sync::Arc;

/// Register all standard blocks with a registry
pub fn register_all(registry: &mut BlockRegistry) {
    registry.register(Arc::new(debug::DebugBlock));
    registry.register(Arc::new(time::DelayBlock));
    registry.register(Arc::new(transform::JsonParseBlock));
    registry.register(Arc::new(transform::JsonStringifyBlock));
    registry.register(Arc::new(control::ApprovalBlock));
    registry.register(Arc::new(control::StopFlowBlock));
}

#[cfg(test)]
mod test_support {
    use flowcore::{BlockContext, EventBus, ExecutionId};
    use serde_json::Value;

    pub fn context(input: Value) -> BlockContext {
        let event_bus = EventBus::new(100);
        let execution_id = ExecutionId::new_v4();

        BlockContext {
            execution_id,
            step_name: "step".to_string(),
            input,
            resume_payload: None,
            project_id: "project".to_string(),
            events: event_bus.create_emitter(execution_id, "step"),
            cancellation: tokio_util::sync::CancellationToken::new(),
        }
    }
}
