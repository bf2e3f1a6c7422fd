//! Collaborators the worker persists through.

use crate::error::StoreError;
use crate::job::{JobStatusUpdate, Run, RunUpdate};
use async_trait::async_trait;
use flowcore::{FlowVersion, FlowVersionId};

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn get_run(&self, run_id: &str) -> Result<Run, StoreError>;

    async fn update_run_status(&self, run_id: &str, update: RunUpdate) -> Result<(), StoreError>;
}

#[async_trait]
pub trait JobStatusReporter: Send + Sync {
    async fn update_job_status(&self, update: JobStatusUpdate) -> Result<(), StoreError>;
}

#[async_trait]
pub trait FlowSource: Send + Sync {
    /// The immutable snapshot of a flow version, or `None` when it no
    /// longer exists.
    async fn get_flow_with_exact_blocks(
        &self,
        version_id: FlowVersionId,
    ) -> Result<Option<FlowVersion>, StoreError>;
}
