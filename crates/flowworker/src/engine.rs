//! The seam between the worker and whatever actually runs a flow.

use crate::error::EngineError;
use crate::job::{RunEnvironment, RunUpdate};
use crate::services::RunStore;
use async_trait::async_trait;
use flowcore::{ExecutionContext, FlowError, FlowVersion, PauseMetadata, RunError, StepMap, Verdict};
use flowruntime::{EngineConstants, FlowRuntime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Transport level signal from the engine runner, independent of the
/// run verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineResponseStatus {
    Ok,
    Timeout,
    Error,
}

#[derive(Debug, Clone)]
pub enum EngineInputKind {
    Begin {
        trigger_payload: Value,
    },
    Resume {
        steps: StepMap,
        previous_duration_ms: u64,
        resume_payload: Value,
    },
}

/// Everything needed to run one attempt of a flow.
#[derive(Debug, Clone)]
pub struct EngineInput {
    pub run_id: String,
    pub project_id: String,
    pub environment: RunEnvironment,
    pub flow_version: FlowVersion,
    pub kind: EngineInputKind,
}

/// The executor's view of an attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineResult {
    pub verdict: Verdict,
    pub steps: StepMap,
    pub duration_ms: u64,
    pub pause: Option<PauseMetadata>,
    pub error: Option<RunError>,
}

impl EngineResult {
    pub fn from_context(ctx: &ExecutionContext) -> Self {
        Self {
            verdict: ctx.verdict(),
            steps: ctx.steps().clone(),
            duration_ms: ctx.duration_ms(),
            pause: ctx.pause().cloned(),
            error: ctx.error().cloned(),
        }
    }

    /// A result carrying no step data, only a verdict and why.
    pub fn terminated(verdict: Verdict, message: impl Into<String>) -> Self {
        Self {
            verdict,
            steps: StepMap::new(),
            duration_ms: 0,
            pause: None,
            error: Some(RunError {
                step_name: String::new(),
                message: message.into(),
            }),
        }
    }

    pub fn termination_reason(&self) -> Option<String> {
        self.error
            .as_ref()
            .map(|e| e.message.clone())
            .filter(|m| !m.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineResponse {
    pub status: EngineResponseStatus,
    pub result: EngineResult,
}

#[async_trait]
pub trait EngineRunner: Send + Sync {
    async fn execute_flow(
        &self,
        engine_token: &str,
        input: EngineInput,
    ) -> Result<EngineResponse, EngineError>;
}

/// Runs flows in-process on a [`FlowRuntime`].
///
/// The sandbox ceiling is enforced with `tokio::time::timeout`; an
/// executor error or a panicking block is answered with an ERROR response
/// rather than raised.
/// Finished attempts are reported to the run store.
pub struct LocalEngineRunner {
    runtime: Arc<FlowRuntime>,
    runs: Arc<dyn RunStore>,
    sandbox_timeout: Duration,
    api_url: String,
    shutdown: CancellationToken,
}

impl LocalEngineRunner {
    pub fn new(runtime: Arc<FlowRuntime>, runs: Arc<dyn RunStore>, sandbox_timeout: Duration) -> Self {
        Self {
            runtime,
            runs,
            sandbox_timeout,
            api_url: String::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Cancelling `shutdown` stops every run in flight.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Run one attempt on its own task so a panicking block surfaces as
    /// an error instead of unwinding through the caller.
    fn spawn_attempt(&self, engine_token: &str, input: EngineInput) -> JoinHandle<Result<ExecutionContext, FlowError>> {
        let runtime = self.runtime.clone();
        let constants = EngineConstants::new(input.project_id.clone()).with_api(&self.api_url, engine_token);
        let cancellation = self.shutdown.child_token();

        tokio::spawn(async move {
            let flow = &input.flow_version;
            match input.kind {
                EngineInputKind::Begin { trigger_payload } => {
                    runtime.begin(flow, trigger_payload, &constants, cancellation).await
                }
                EngineInputKind::Resume {
                    steps,
                    previous_duration_ms,
                    resume_payload,
                } => {
                    let constants = constants.with_resume_payload(resume_payload);
                    runtime
                        .resume(flow, steps, previous_duration_ms, &constants, cancellation)
                        .await
                }
            }
        })
    }
}

#[async_trait]
impl EngineRunner for LocalEngineRunner {
    async fn execute_flow(
        &self,
        engine_token: &str,
        input: EngineInput,
    ) -> Result<EngineResponse, EngineError> {
        let run_id = input.run_id.clone();

        let handle = self.spawn_attempt(engine_token, input);
        let abort = handle.abort_handle();
        let joined = tokio::time::timeout(self.sandbox_timeout, handle).await.map(|joined| {
            joined
                .map_err(|e| FlowError::Execution(format!("Task join error: {}", e)))
                .and_then(|attempt| attempt)
        });

        let response = match joined {
            Ok(Ok(ctx)) => {
                let result = EngineResult::from_context(&ctx);
                self.runs
                    .update_run_status(&run_id, RunUpdate::from_result(&result))
                    .await
                    .map_err(|e| EngineError::Failed(e.to_string()))?;
                EngineResponse {
                    status: EngineResponseStatus::Ok,
                    result,
                }
            }
            Ok(Err(error)) => {
                tracing::error!(run_id = %run_id, error = %error, "Flow executor raised an error");
                EngineResponse {
                    status: EngineResponseStatus::Error,
                    result: EngineResult::terminated(Verdict::InternalError, error.to_string()),
                }
            }
            Err(_) => {
                abort.abort();
                tracing::warn!(
                    run_id = %run_id,
                    timeout_ms = self.sandbox_timeout.as_millis() as u64,
                    "Flow run exceeded the sandbox timeout"
                );
                EngineResponse {
                    status: EngineResponseStatus::Timeout,
                    result: EngineResult::terminated(
                        Verdict::Running,
                        format!("Run exceeded the sandbox limit of {}ms", self.sandbox_timeout.as_millis()),
                    ),
                }
            }
        };

        Ok(response)
    }
}
