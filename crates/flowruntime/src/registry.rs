use flowcore::{Block, BlockMetadata, WorkflowError};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of available block types
pub struct BlockRegistry {
    blocks: HashMap<String, Arc<dyn Block>>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self {
            blocks: HashMap::new(),
        }
    }

    /// Register a block under its `block_type()`
    pub fn register(&mut self, block: Arc<dyn Block>) {
        let block_type = block.block_type().to_string();
        tracing::info!("Registering block type: {}", block_type);
        self.blocks.insert(block_type, block);
    }

    /// Look up a block; a flow naming an unregistered block is malformed
    pub fn get(&self, block_type: &str) -> Result<Arc<dyn Block>, WorkflowError> {
        self.blocks
            .get(block_type)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownBlock(block_type.to_string()))
    }

    pub fn contains(&self, block_type: &str) -> bool {
        self.blocks.contains_key(block_type)
    }

    /// All registered block types, sorted
    pub fn list_block_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.blocks.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn get_metadata(&self, block_type: &str) -> Option<BlockMetadata> {
        self.blocks.get(block_type).map(|b| b.metadata())
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}
