//! Queue payloads and the persisted run record.

use crate::engine::EngineResult;
use chrono::{DateTime, Utc};
use flowcore::{FlowVersionId, PauseMetadata, StepMap, Verdict};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionType {
    Begin,
    Resume,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunEnvironment {
    #[default]
    Production,
    Testing,
}

/// How the caller wants to hear about the run's progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressUpdateType {
    #[default]
    None,
    WebhookResponse,
    TestFlow,
}

/// One queued unit of work: begin or resume a single run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunJob {
    pub run_id: String,
    pub flow_version_id: FlowVersionId,
    pub project_id: String,
    pub execution_type: ExecutionType,
    /// Trigger payload for BEGIN, resume payload for RESUME.
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub environment: RunEnvironment,
    #[serde(default)]
    pub synchronous_request_id: Option<String>,
    #[serde(default)]
    pub progress_update_type: ProgressUpdateType,
}

impl RunJob {
    pub fn begin(run_id: impl Into<String>, flow_version_id: FlowVersionId, payload: Value) -> Self {
        Self {
            run_id: run_id.into(),
            flow_version_id,
            project_id: String::new(),
            execution_type: ExecutionType::Begin,
            payload,
            environment: RunEnvironment::default(),
            synchronous_request_id: None,
            progress_update_type: ProgressUpdateType::default(),
        }
    }

    pub fn resume(run_id: impl Into<String>, flow_version_id: FlowVersionId, payload: Value) -> Self {
        Self {
            execution_type: ExecutionType::Resume,
            ..Self::begin(run_id, flow_version_id, payload)
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = project_id.into();
        self
    }

    /// Mark the job as answering a caller that waits for the run.
    pub fn with_synchronous_request(
        mut self,
        request_id: impl Into<String>,
        progress_update_type: ProgressUpdateType,
    ) -> Self {
        self.synchronous_request_id = Some(request_id.into());
        self.progress_update_type = progress_update_type;
        self
    }
}

/// Persisted lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Paused,
    Succeeded,
    Failed,
    Stopped,
    Timeout,
    InternalError,
}

impl From<Verdict> for RunStatus {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Running => RunStatus::Running,
            Verdict::Paused => RunStatus::Paused,
            Verdict::Succeeded => RunStatus::Succeeded,
            Verdict::Failed => RunStatus::Failed,
            Verdict::Stopped => RunStatus::Stopped,
            Verdict::Timeout => RunStatus::Timeout,
            Verdict::InternalError => RunStatus::InternalError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDetails {
    pub status: RunStatus,
    #[serde(default)]
    pub steps: StepMap,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub termination_reason: Option<String>,
    #[serde(default)]
    pub pause: Option<PauseMetadata>,
}

impl Default for RunDetails {
    fn default() -> Self {
        Self {
            status: RunStatus::Running,
            steps: StepMap::new(),
            duration_ms: 0,
            termination_reason: None,
            pause: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub details: RunDetails,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn new(id: impl Into<String>, details: RunDetails) -> Self {
        Self {
            id: id.into(),
            details,
            updated_at: Utc::now(),
        }
    }
}

/// Partial update of a persisted run; `None` fields keep their stored value.
#[derive(Debug, Clone, PartialEq)]
pub struct RunUpdate {
    pub status: RunStatus,
    pub steps: Option<StepMap>,
    pub duration_ms: Option<u64>,
    pub termination_reason: Option<String>,
    pub pause: Option<PauseMetadata>,
}

impl RunUpdate {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status,
            steps: None,
            duration_ms: None,
            termination_reason: None,
            pause: None,
        }
    }

    /// Everything the engine reported about an attempt.
    pub fn from_result(result: &EngineResult) -> Self {
        let mut update = Self::status(result.verdict.into()).with_duration(result.duration_ms);
        if !result.steps.is_empty() {
            update = update.with_steps(result.steps.clone());
        }
        update.pause = result.pause.clone();
        update.termination_reason = result.termination_reason();
        update
    }

    pub fn with_steps(mut self, steps: StepMap) -> Self {
        self.steps = Some(steps);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.termination_reason = Some(reason.into());
        self
    }

    /// Fold this update into a stored record.
    pub fn apply(self, details: &mut RunDetails) {
        details.status = self.status;
        if let Some(steps) = self.steps {
            details.steps = steps;
        }
        if let Some(duration_ms) = self.duration_ms {
            details.duration_ms = duration_ms;
        }
        if self.termination_reason.is_some() {
            details.termination_reason = self.termination_reason;
        }
        details.pause = self.pause;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusUpdate {
    pub run_id: String,
    pub status: JobStatus,
    pub message: Option<String>,
    pub queue_name: String,
    /// Copied from the job so a caller waiting on the run can match the update.
    pub synchronous_request_id: Option<String>,
    pub progress_update_type: ProgressUpdateType,
}

/// What `execute_flow` did with a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Nothing to do: the flow is gone or the run already finished.
    Skipped,
    /// The run reached a terminal or paused state and the job completed.
    Completed { run_status: RunStatus },
    /// The orchestration itself failed; the job was reported FAILED.
    Failed { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_run_job_wire_format() {
        let job: RunJob = serde_json::from_value(json!({
            "run_id": "run-1",
            "flow_version_id": "6f0b1a9e-2d1c-4c5e-9a63-1f3b8d1c0e11",
            "project_id": "p",
            "execution_type": "RESUME",
            "payload": { "approved": true }
        }))
        .unwrap();

        assert_eq!(job.execution_type, ExecutionType::Resume);
        assert_eq!(job.environment, RunEnvironment::Production);
        assert_eq!(job.progress_update_type, ProgressUpdateType::None);
        assert_eq!(job.payload, json!({ "approved": true }));
    }

    #[test]
    fn test_update_keeps_unset_fields() {
        let mut details = RunDetails {
            status: RunStatus::Paused,
            duration_ms: 40,
            ..RunDetails::default()
        };
        RunUpdate::status(RunStatus::Timeout)
            .with_reason("too slow")
            .apply(&mut details);

        assert_eq!(details.status, RunStatus::Timeout);
        assert_eq!(details.duration_ms, 40);
        assert_eq!(details.termination_reason.as_deref(), Some("too slow"));
    }
}
