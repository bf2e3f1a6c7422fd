use crate::classify::{classify, Classification};
use crate::config::WorkerConfig;
use crate::engine::{EngineInput, EngineInputKind, EngineResponse, EngineRunner};
use crate::error::{EngineError, WorkerError};
use crate::job::{
    ExecutionType, JobOutcome, JobStatus, JobStatusUpdate, RunJob, RunStatus, RunUpdate,
};
use crate::lock::LockService;
use crate::services::{FlowSource, JobStatusReporter, RunStore};
use flowcore::{FlowVersion, StepMap, StepOutput, TRIGGER_STEP_NAME};
use std::sync::Arc;

/// Carries one queued run job through a single engine invocation.
pub struct WorkerJobExecutor {
    engine: Arc<dyn EngineRunner>,
    runs: Arc<dyn RunStore>,
    jobs: Arc<dyn JobStatusReporter>,
    flows: Arc<dyn FlowSource>,
    locks: Arc<dyn LockService>,
    config: WorkerConfig,
}

impl WorkerJobExecutor {
    pub fn new(
        engine: Arc<dyn EngineRunner>,
        runs: Arc<dyn RunStore>,
        jobs: Arc<dyn JobStatusReporter>,
        flows: Arc<dyn FlowSource>,
        locks: Arc<dyn LockService>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            engine,
            runs,
            jobs,
            flows,
            locks,
            config,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run `job` under the per-run lock.
    ///
    /// Engine failures become a persisted run status and a job status.
    /// Errors are returned only when the lock cannot be acquired or
    /// released, or a collaborator cannot persist.
    pub async fn execute_flow(&self, job: &RunJob) -> Result<JobOutcome, WorkerError> {
        let guard = self
            .locks
            .acquire_lock(&job.run_id, self.config.lock_timeout())
            .await?;
        tracing::info!(run_id = %job.run_id, execution_type = ?job.execution_type, "Executing run job");

        let outcome = self.execute_locked(job).await;
        let released = guard.release().await;

        match (outcome, released) {
            (Ok(outcome), Ok(())) => {
                tracing::info!(run_id = %job.run_id, outcome = ?outcome, "Run job finished");
                Ok(outcome)
            }
            (Err(error), Ok(())) => Err(error),
            (Ok(_), Err(release_error)) => Err(release_error.into()),
            (Err(error), Err(release_error)) => {
                tracing::error!(run_id = %job.run_id, error = %release_error, "Failed to release run lock");
                Err(error)
            }
        }
    }

    async fn execute_locked(&self, job: &RunJob) -> Result<JobOutcome, WorkerError> {
        let Some(flow) = self.flows.get_flow_with_exact_blocks(job.flow_version_id).await? else {
            tracing::info!(
                run_id = %job.run_id,
                flow_version_id = %job.flow_version_id,
                "Flow version not found, nothing to execute"
            );
            return Ok(JobOutcome::Skipped);
        };

        let Some(input) = self.prepare(job, flow).await? else {
            return Ok(JobOutcome::Skipped);
        };

        match self.engine.execute_flow(&self.config.engine_token, input).await {
            Ok(response) => self.settle(job, response).await,
            Err(EngineError::ExecutionTimeout(limit)) => {
                tracing::warn!(run_id = %job.run_id, limit_ms = limit.as_millis() as u64, "Engine timed out");
                let reason = EngineError::ExecutionTimeout(limit).to_string();
                self.terminate(job, RunUpdate::status(RunStatus::Timeout).with_reason(reason), JobStatus::Completed, None)
                    .await?;
                Ok(JobOutcome::Completed {
                    run_status: RunStatus::Timeout,
                })
            }
            Err(error) => {
                tracing::error!(run_id = %job.run_id, error = %error, "Engine raised an error");
                let message = error.to_string();
                self.terminate(
                    job,
                    RunUpdate::status(RunStatus::InternalError).with_reason(message.clone()),
                    JobStatus::Failed,
                    Some(message.clone()),
                )
                .await?;
                Ok(JobOutcome::Failed { message })
            }
        }
    }

    /// Build the engine input, or `None` when a RESUME finds its run
    /// already finished.
    async fn prepare(&self, job: &RunJob, flow: FlowVersion) -> Result<Option<EngineInput>, WorkerError> {
        let kind = match job.execution_type {
            ExecutionType::Begin => {
                let mut steps = StepMap::new();
                steps.insert(TRIGGER_STEP_NAME.to_string(), StepOutput::trigger(job.payload.clone()));
                self.runs
                    .update_run_status(&job.run_id, RunUpdate::status(RunStatus::Running).with_steps(steps))
                    .await?;
                EngineInputKind::Begin {
                    trigger_payload: job.payload.clone(),
                }
            }
            ExecutionType::Resume => {
                let run = self.runs.get_run(&job.run_id).await?;
                if matches!(run.details.status, RunStatus::Succeeded | RunStatus::Stopped) {
                    tracing::info!(
                        run_id = %job.run_id,
                        status = ?run.details.status,
                        "Run already finished, ignoring resume"
                    );
                    return Ok(None);
                }
                EngineInputKind::Resume {
                    steps: run.details.steps,
                    previous_duration_ms: run.details.duration_ms,
                    resume_payload: job.payload.clone(),
                }
            }
        };

        Ok(Some(EngineInput {
            run_id: job.run_id.clone(),
            project_id: job.project_id.clone(),
            environment: job.environment,
            flow_version: flow,
            kind,
        }))
    }

    async fn settle(&self, job: &RunJob, response: EngineResponse) -> Result<JobOutcome, WorkerError> {
        let verdict = response.result.verdict;
        let classification = classify(response.status, verdict);
        tracing::info!(
            run_id = %job.run_id,
            engine_status = ?response.status,
            verdict = ?verdict,
            classification = ?classification,
            "Engine responded"
        );

        let run_status = match classification {
            Classification::Success => {
                self.report(job, JobStatus::Completed, None).await?;
                return Ok(JobOutcome::Completed {
                    run_status: verdict.into(),
                });
            }
            Classification::Terminated(run_status) => run_status,
        };

        let reason = response
            .result
            .termination_reason()
            .unwrap_or_else(|| default_reason(run_status).to_string());
        let mut update = RunUpdate::status(run_status)
            .with_duration(response.result.duration_ms)
            .with_reason(reason.clone());
        if !response.result.steps.is_empty() {
            update = update.with_steps(response.result.steps);
        }

        match classification.job_status() {
            JobStatus::Completed => {
                self.terminate(job, update, JobStatus::Completed, None).await?;
                Ok(JobOutcome::Completed { run_status })
            }
            JobStatus::Failed => {
                self.terminate(job, update, JobStatus::Failed, Some(reason.clone())).await?;
                Ok(JobOutcome::Failed { message: reason })
            }
        }
    }

    /// Persist the run's final status, then the job status.
    async fn terminate(
        &self,
        job: &RunJob,
        update: RunUpdate,
        job_status: JobStatus,
        message: Option<String>,
    ) -> Result<(), WorkerError> {
        self.runs.update_run_status(&job.run_id, update).await?;
        self.report(job, job_status, message).await
    }

    async fn report(&self, job: &RunJob, status: JobStatus, message: Option<String>) -> Result<(), WorkerError> {
        self.jobs
            .update_job_status(JobStatusUpdate {
                run_id: job.run_id.clone(),
                status,
                message,
                queue_name: self.config.queue_name.clone(),
                synchronous_request_id: job.synchronous_request_id.clone(),
                progress_update_type: job.progress_update_type,
            })
            .await?;
        Ok(())
    }
}

fn default_reason(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Timeout => "Run exceeded the maximum execution time",
        RunStatus::Stopped => "Run was stopped",
        _ => "Run failed due to an internal error",
    }
}
