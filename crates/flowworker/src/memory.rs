//! In-process collaborators for tests and the CLI.

use crate::error::StoreError;
use crate::job::{JobStatusUpdate, Run, RunDetails, RunUpdate};
use crate::services::{FlowSource, JobStatusReporter, RunStore};
use async_trait::async_trait;
use chrono::Utc;
use flowcore::{FlowVersion, FlowVersionId};
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};

/// Run store that also keeps every update it received, in order.
#[derive(Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<String, Run>>,
    updates: Mutex<Vec<(String, RunUpdate)>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, run: Run) {
        self.runs.write().await.insert(run.id.clone(), run);
    }

    pub async fn run(&self, run_id: &str) -> Option<Run> {
        self.runs.read().await.get(run_id).cloned()
    }

    pub async fn updates(&self) -> Vec<(String, RunUpdate)> {
        self.updates.lock().await.clone()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn get_run(&self, run_id: &str) -> Result<Run, StoreError> {
        self.run(run_id)
            .await
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))
    }

    async fn update_run_status(&self, run_id: &str, update: RunUpdate) -> Result<(), StoreError> {
        tracing::debug!(run_id, status = ?update.status, "Updating run status");
        self.updates.lock().await.push((run_id.to_string(), update.clone()));

        let mut runs = self.runs.write().await;
        let run = runs
            .entry(run_id.to_string())
            .or_insert_with(|| Run::new(run_id, RunDetails::default()));
        update.apply(&mut run.details);
        run.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryFlowSource {
    flows: RwLock<HashMap<FlowVersionId, FlowVersion>>,
}

impl InMemoryFlowSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, flow: FlowVersion) {
        self.flows.write().await.insert(flow.id, flow);
    }
}

#[async_trait]
impl FlowSource for InMemoryFlowSource {
    async fn get_flow_with_exact_blocks(
        &self,
        version_id: FlowVersionId,
    ) -> Result<Option<FlowVersion>, StoreError> {
        Ok(self.flows.read().await.get(&version_id).cloned())
    }
}

/// Records job status updates instead of acknowledging a real queue.
#[derive(Default)]
pub struct InMemoryJobReporter {
    updates: Mutex<Vec<JobStatusUpdate>>,
}

impl InMemoryJobReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn updates(&self) -> Vec<JobStatusUpdate> {
        self.updates.lock().await.clone()
    }
}

#[async_trait]
impl JobStatusReporter for InMemoryJobReporter {
    async fn update_job_status(&self, update: JobStatusUpdate) -> Result<(), StoreError> {
        tracing::debug!(run_id = %update.run_id, status = ?update.status, "Job status updated");
        self.updates.lock().await.push(update);
        Ok(())
    }
}
