use crate::constants::EngineConstants;
use crate::executor::{FlowExecutor, RunOptions};
use crate::policy::{FailurePolicy, StepSettingsPolicy};
use crate::registry::BlockRegistry;
use chrono::Utc;
use flowcore::{
    EventBus, ExecutionContext, ExecutionEvent, ExecutionId, FlowError, FlowVersion, RetryPolicy,
    StepMap, StepOutput, TRIGGER_STEP_NAME,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Main runtime for executing flow versions
pub struct FlowRuntime {
    registry: Arc<BlockRegistry>,
    executor: Arc<FlowExecutor>,
    event_bus: Arc<EventBus>,
}

impl FlowRuntime {
    /// Create a new runtime with an empty registry
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_registry(Arc::new(BlockRegistry::new()), config)
    }

    /// Create a new runtime with a pre-configured registry
    pub fn with_registry(registry: Arc<BlockRegistry>, config: RuntimeConfig) -> Self {
        let policy: Arc<dyn FailurePolicy> = Arc::new(StepSettingsPolicy::new(config.retry.clone()));
        Self::with_policy(registry, config, policy)
    }

    pub fn with_policy(
        registry: Arc<BlockRegistry>,
        config: RuntimeConfig,
        policy: Arc<dyn FailurePolicy>,
    ) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let executor = Arc::new(FlowExecutor::new(
            registry.clone(),
            event_bus.clone(),
            policy,
            config.max_parallel_branches,
        ));

        Self {
            registry,
            executor,
            event_bus,
        }
    }

    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.registry
    }

    pub fn executor(&self) -> &Arc<FlowExecutor> {
        &self.executor
    }

    /// Start a fresh run from the trigger payload.
    pub async fn begin(
        &self,
        flow: &FlowVersion,
        trigger_payload: Value,
        constants: &EngineConstants,
        cancellation: CancellationToken,
    ) -> Result<ExecutionContext, FlowError> {
        let ctx = ExecutionContext::empty()
            .upsert_step(TRIGGER_STEP_NAME, StepOutput::trigger(trigger_payload));
        self.run(flow, ctx, 0, false, constants, cancellation).await
    }

    /// Continue a paused run from its persisted steps. Steps that already
    /// finished are not executed again.
    pub async fn resume(
        &self,
        flow: &FlowVersion,
        steps: StepMap,
        previous_duration_ms: u64,
        constants: &EngineConstants,
        cancellation: CancellationToken,
    ) -> Result<ExecutionContext, FlowError> {
        let ctx = ExecutionContext::from_steps(steps);
        self.run(flow, ctx, previous_duration_ms, true, constants, cancellation)
            .await
    }

    async fn run(
        &self,
        flow: &FlowVersion,
        ctx: ExecutionContext,
        previous_duration_ms: u64,
        resumed: bool,
        constants: &EngineConstants,
        cancellation: CancellationToken,
    ) -> Result<ExecutionContext, FlowError> {
        flow.validate()?;

        let execution_id = ExecutionId::new_v4();
        let started = Instant::now();
        let deadline = flow
            .settings
            .max_execution_time_ms
            .map(|ms| started + Duration::from_millis(ms));

        tracing::info!(
            flow = %flow.display_name,
            flow_version_id = %flow.id,
            %execution_id,
            resumed,
            "Starting flow run"
        );
        self.event_bus.emit(ExecutionEvent::RunStarted {
            execution_id,
            flow_version_id: flow.id,
            resumed,
            timestamp: Utc::now(),
        });

        let options = RunOptions {
            execution_id,
            deadline,
            cancellation,
        };
        let ctx = self
            .executor
            .execute_with(flow.first_action(), ctx, constants, options)
            .await?;

        let duration_ms = previous_duration_ms + started.elapsed().as_millis() as u64;
        let ctx = ctx.with_duration(duration_ms);

        tracing::info!(%execution_id, verdict = ?ctx.verdict(), duration_ms, "Flow run finished");
        self.event_bus.emit(ExecutionEvent::RunFinished {
            execution_id,
            verdict: ctx.verdict(),
            duration_ms,
            timestamp: Utc::now(),
        });

        Ok(ctx)
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Split branches executed concurrently
    pub max_parallel_branches: usize,
    pub event_buffer_size: usize,
    pub retry: RetryPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_branches: 10,
            event_buffer_size: 1000,
            retry: RetryPolicy::default(),
        }
    }
}
