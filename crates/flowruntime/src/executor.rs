use crate::branch::{evaluate_conditions, resolve_conditions};
use crate::constants::EngineConstants;
use crate::policy::{FailureDecision, FailurePolicy};
use crate::registry::BlockRegistry;
use crate::resolver::PropsResolver;
use chrono::Utc;
use flowcore::{
    Action, ActionKind, ActionType, BlockContext, BlockError, BlockOutcome, BranchCondition,
    ChildSteps, ErrorHandlingOptions, EventBus, ExecutionContext, ExecutionEvent, ExecutionId, FlowError,
    PathSlot, PauseMetadata, RunError, SplitBranch, StepOutput, StepStatus, Verdict,
};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-attempt options that are not part of the flow definition.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub execution_id: ExecutionId,
    /// Past this instant the run ends with verdict TIMEOUT before the next step.
    pub deadline: Option<Instant>,
    /// Cancelling ends the run with verdict STOPPED.
    pub cancellation: CancellationToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            execution_id: ExecutionId::new_v4(),
            deadline: None,
            cancellation: CancellationToken::new(),
        }
    }
}

/// Everything one attempt needs while walking the graph.
struct Attempt {
    resolver: PropsResolver,
    options: RunOptions,
}

impl Attempt {
    fn constants(&self) -> &EngineConstants {
        self.resolver.constants()
    }

    /// Verdict forced on the run by cancellation or the deadline.
    fn interruption(&self) -> Option<(Verdict, &'static str)> {
        if self.options.cancellation.is_cancelled() {
            return Some((Verdict::Stopped, "Run was stopped"));
        }
        match self.options.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Some((Verdict::Timeout, "Run exceeded its execution time limit"))
            }
            _ => None,
        }
    }
}

/// Walks a flow graph one action at a time, producing a new execution
/// context per step.
pub struct FlowExecutor {
    registry: Arc<BlockRegistry>,
    event_bus: Arc<EventBus>,
    policy: Arc<dyn FailurePolicy>,
    max_parallel_branches: usize,
}

impl FlowExecutor {
    pub fn new(
        registry: Arc<BlockRegistry>,
        event_bus: Arc<EventBus>,
        policy: Arc<dyn FailurePolicy>,
        max_parallel_branches: usize,
    ) -> Self {
        Self {
            registry,
            event_bus,
            policy,
            max_parallel_branches: max_parallel_branches.max(1),
        }
    }

    /// Run `action` and its successors against `execution_state`.
    pub async fn execute(
        &self,
        action: Option<&Action>,
        execution_state: ExecutionContext,
        constants: &EngineConstants,
    ) -> Result<ExecutionContext, FlowError> {
        self.execute_with(action, execution_state, constants, RunOptions::default())
            .await
    }

    pub async fn execute_with(
        &self,
        action: Option<&Action>,
        execution_state: ExecutionContext,
        constants: &EngineConstants,
        options: RunOptions,
    ) -> Result<ExecutionContext, FlowError> {
        let attempt = Attempt {
            resolver: PropsResolver::new(constants.clone()),
            options,
        };

        let ctx = if execution_state.verdict() == Verdict::Paused {
            execution_state.with_verdict(Verdict::Running)
        } else {
            execution_state
        };
        if ctx.verdict().is_terminal() {
            return Ok(ctx);
        }

        let ctx = self.run_chain(action, ctx, &attempt).await?;
        if ctx.verdict() == Verdict::Running {
            return Ok(ctx.with_verdict(Verdict::Succeeded));
        }
        Ok(ctx)
    }

    /// Execute `head` and every `next_action` after it until the chain
    /// ends or the run leaves RUNNING.
    fn run_chain<'a>(
        &'a self,
        head: Option<&'a Action>,
        ctx: ExecutionContext,
        attempt: &'a Attempt,
    ) -> BoxFuture<'a, Result<ExecutionContext, FlowError>> {
        Box::pin(async move {
            let mut ctx = ctx;
            let Some(head) = head else {
                return Ok(ctx);
            };

            for action in head.chain() {
                if ctx.verdict() != Verdict::Running {
                    break;
                }
                if let Some((verdict, message)) = attempt.interruption() {
                    tracing::warn!(step = %action.name, verdict = ?verdict, "{}", message);
                    ctx = ctx.with_verdict(verdict).with_error(RunError {
                        step_name: action.name.clone(),
                        message: message.to_string(),
                    });
                    break;
                }
                if action.skip {
                    tracing::debug!(step = %action.name, "Skipping disabled step");
                    continue;
                }
                ctx = self.execute_action(action, ctx, attempt).await?;
            }

            Ok(ctx)
        })
    }

    async fn execute_action(
        &self,
        action: &Action,
        ctx: ExecutionContext,
        attempt: &Attempt,
    ) -> Result<ExecutionContext, FlowError> {
        match &action.kind {
            ActionKind::Block {
                block,
                input,
                error_handling,
            } => {
                self.execute_block(action, block, input, *error_handling, ctx, attempt)
                    .await
            }
            ActionKind::Branch {
                conditions,
                on_success_action,
                on_failure_action,
            } => {
                self.execute_branch(
                    action,
                    conditions,
                    on_success_action.as_deref(),
                    on_failure_action.as_deref(),
                    ctx,
                    attempt,
                )
                .await
            }
            ActionKind::Loop {
                items,
                first_loop_action,
            } => {
                self.execute_loop(action, items, first_loop_action.as_deref(), ctx, attempt)
                    .await
            }
            ActionKind::Split { branches } => {
                self.execute_split(action, branches, ctx, attempt).await
            }
        }
    }

    async fn execute_block(
        &self,
        action: &Action,
        block_type: &str,
        input: &Value,
        error_handling: ErrorHandlingOptions,
        ctx: ExecutionContext,
        attempt: &Attempt,
    ) -> Result<ExecutionContext, FlowError> {
        let name = action.name.as_str();
        let previous_status = ctx.scope_step(name).map(|s| s.status);
        if matches!(previous_status, Some(StepStatus::Succeeded | StepStatus::Failed)) {
            tracing::debug!(step = name, "Step already executed, skipping on resume");
            return Ok(ctx);
        }

        let block = self.registry.get(block_type)?;
        let resolved_input = attempt.resolver.resolve(input, &ctx);
        let resume_payload = match previous_status {
            Some(StepStatus::Paused) => attempt.constants().resume_payload.clone(),
            _ => None,
        };

        self.emit_started(attempt, name, ActionType::Block);
        let started = Instant::now();
        let mut attempt_no: u32 = 0;

        loop {
            attempt_no += 1;
            let block_ctx = BlockContext {
                execution_id: attempt.options.execution_id,
                step_name: name.to_string(),
                input: resolved_input.clone(),
                resume_payload: resume_payload.clone(),
                project_id: attempt.constants().project_id.clone(),
                events: self.event_bus.create_emitter(attempt.options.execution_id, name),
                cancellation: attempt.options.cancellation.clone(),
            };

            let result = tokio::select! {
                result = block.run(block_ctx) => result,
                _ = attempt.options.cancellation.cancelled() => Err(BlockError::Cancelled),
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let step = StepOutput::new(name, ActionType::Block, resolved_input.clone())
                .with_duration(elapsed_ms);

            match result {
                Ok(BlockOutcome::Output(output)) => {
                    tracing::info!(step = name, duration_ms = elapsed_ms, "Step succeeded");
                    self.emit_completed(attempt, name, StepStatus::Succeeded, elapsed_ms);
                    return Ok(ctx.upsert_step(name, step.succeeded(output)));
                }
                Ok(BlockOutcome::Pause(request)) => {
                    tracing::info!(step = name, "Step paused the run");
                    self.emit_completed(attempt, name, StepStatus::Paused, elapsed_ms);
                    let pause = PauseMetadata {
                        step_name: name.to_string(),
                        request_id: request.request_id,
                        resume_at: request.resume_at,
                        data: request.data.clone(),
                    };
                    return Ok(ctx
                        .upsert_step(name, step.paused(request.data))
                        .with_pause(pause));
                }
                Ok(BlockOutcome::Stop(response)) => {
                    tracing::info!(step = name, "Step stopped the run");
                    self.emit_completed(attempt, name, StepStatus::Succeeded, elapsed_ms);
                    return Ok(ctx
                        .upsert_step(name, step.succeeded(response))
                        .with_verdict(Verdict::Stopped));
                }
                Err(BlockError::Cancelled) if attempt.options.cancellation.is_cancelled() => {
                    self.emit_failed(attempt, name, &BlockError::Cancelled, attempt_no);
                    self.emit_completed(attempt, name, StepStatus::Failed, elapsed_ms);
                    return Ok(ctx
                        .upsert_step(name, step.failed(BlockError::Cancelled.to_string()))
                        .with_verdict(Verdict::Stopped)
                        .with_error(RunError {
                            step_name: name.to_string(),
                            message: "Run was stopped".to_string(),
                        }));
                }
                Err(error) => {
                    tracing::warn!(step = name, attempt = attempt_no, error = %error, "Step failed");
                    self.emit_failed(attempt, name, &error, attempt_no);

                    match self.policy.on_failure(action, attempt_no, &error) {
                        FailureDecision::Retry { delay } => {
                            tracing::info!(step = name, delay_ms = delay.as_millis() as u64, "Retrying step");
                            tokio::time::sleep(delay).await;
                        }
                        FailureDecision::Continue => {
                            tracing::info!(
                                step = name,
                                continue_on_failure = error_handling.continue_on_failure,
                                "Continuing after step failure"
                            );
                            self.emit_completed(attempt, name, StepStatus::Failed, elapsed_ms);
                            return Ok(ctx.upsert_step(name, step.failed(error.to_string())));
                        }
                        FailureDecision::FailRun => {
                            self.emit_completed(attempt, name, StepStatus::Failed, elapsed_ms);
                            return Ok(ctx
                                .upsert_step(name, step.failed(error.to_string()))
                                .with_verdict(Verdict::Failed)
                                .with_error(RunError {
                                    step_name: name.to_string(),
                                    message: error.to_string(),
                                }));
                        }
                    }
                }
            }
        }
    }

    async fn execute_branch(
        &self,
        action: &Action,
        conditions: &[Vec<BranchCondition>],
        on_success: Option<&Action>,
        on_failure: Option<&Action>,
        ctx: ExecutionContext,
        attempt: &Attempt,
    ) -> Result<ExecutionContext, FlowError> {
        let name = action.name.as_str();

        // On resume the stored verdict decides the path again.
        let stored = ctx
            .scope_step(name)
            .and_then(|step| step.output.get("condition"))
            .and_then(Value::as_bool);

        let (condition, ctx) = match stored {
            Some(condition) => (condition, ctx),
            None => {
                self.emit_started(attempt, name, ActionType::Branch);
                let started = Instant::now();
                let resolved = resolve_conditions(&attempt.resolver, conditions, &ctx);
                let condition = evaluate_conditions(&resolved);
                let elapsed_ms = started.elapsed().as_millis() as u64;

                tracing::debug!(step = name, condition, "Branch evaluated");
                self.emit_completed(attempt, name, StepStatus::Succeeded, elapsed_ms);

                let step = StepOutput::new(
                    name,
                    ActionType::Branch,
                    json!({ "conditions": serde_json::to_value(&resolved).unwrap_or_default() }),
                )
                .succeeded(json!({ "condition": condition }))
                .with_duration(elapsed_ms);
                (condition, ctx.upsert_step(name, step))
            }
        };

        let path = if condition { on_success } else { on_failure };
        self.run_chain(path, ctx, attempt).await
    }

    async fn execute_loop(
        &self,
        action: &Action,
        items: &Value,
        body: Option<&Action>,
        ctx: ExecutionContext,
        attempt: &Attempt,
    ) -> Result<ExecutionContext, FlowError> {
        let name = action.name.as_str();
        let existing = ctx.scope_step(name).cloned();
        if matches!(
            existing.as_ref().map(|s| s.status),
            Some(StepStatus::Succeeded | StepStatus::Failed)
        ) {
            return Ok(ctx);
        }

        self.emit_started(attempt, name, ActionType::Loop);
        let started = Instant::now();

        let items = match attempt.resolver.resolve(items, &ctx) {
            Value::Array(items) => items,
            other => {
                let message = "The items to loop over must be a list".to_string();
                tracing::warn!(step = name, "{}", message);
                self.emit_completed(
                    attempt,
                    name,
                    StepStatus::Failed,
                    started.elapsed().as_millis() as u64,
                );
                let step = StepOutput::new(name, ActionType::Loop, json!({ "items": other }))
                    .failed(message.clone());
                return Ok(ctx
                    .upsert_step(name, step)
                    .with_verdict(Verdict::Failed)
                    .with_error(RunError {
                        step_name: name.to_string(),
                        message,
                    }));
            }
        };

        let seed = existing.unwrap_or_else(|| {
            StepOutput::new(name, ActionType::Loop, json!({ "items": items.clone() }))
                .with_children(ChildSteps::Iterations(Vec::new()))
        });
        let mut ctx = ctx.upsert_step(name, seed.with_status(StepStatus::Running));

        for (index, item) in items.iter().enumerate() {
            ctx = update_scope_step(&ctx, name, |step| StepOutput {
                output: json!({ "item": item, "index": index + 1 }),
                ..step
            });
            let inner = ctx.enter(name, PathSlot::Iteration(index));
            ctx = self.run_chain(body, inner, attempt).await?.leave();

            if ctx.verdict() != Verdict::Running {
                break;
            }
        }

        Ok(self.finish_container(name, ctx, started, attempt))
    }

    async fn execute_split(
        &self,
        action: &Action,
        branches: &[SplitBranch],
        ctx: ExecutionContext,
        attempt: &Attempt,
    ) -> Result<ExecutionContext, FlowError> {
        let name = action.name.as_str();
        let existing = ctx.scope_step(name).cloned();
        if matches!(
            existing.as_ref().map(|s| s.status),
            Some(StepStatus::Succeeded | StepStatus::Failed)
        ) {
            return Ok(ctx);
        }

        self.emit_started(attempt, name, ActionType::Split);
        let started = Instant::now();

        let selected: Vec<&SplitBranch> = branches
            .iter()
            .filter(|branch| {
                branch.conditions.is_empty()
                    || evaluate_conditions(&resolve_conditions(
                        &attempt.resolver,
                        &branch.conditions,
                        &ctx,
                    ))
            })
            .collect();
        let selected_names: Vec<&str> = selected.iter().map(|b| b.name.as_str()).collect();
        tracing::debug!(step = name, branches = ?selected_names, "Split fanning out");

        let seed = existing.unwrap_or_else(|| {
            StepOutput::new(name, ActionType::Split, json!({ "branches": selected_names }))
                .with_children(ChildSteps::Branches(Default::default()))
        });
        let mut ctx = ctx.upsert_step(name, seed.with_status(StepStatus::Running));

        let pending: Vec<_> = selected
            .iter()
            .copied()
            .map(|branch| {
                let entry = ctx.enter(name, PathSlot::Branch(branch.name.clone()));
                self.run_branch(branch, entry, attempt)
            })
            .collect();
        let finished: Vec<Result<(String, ExecutionContext), FlowError>> = stream::iter(pending)
            .buffered(self.max_parallel_branches)
            .collect()
            .await;

        // Fold in definition order; the first branch that left RUNNING
        // decides the run verdict.
        let mut adopted = false;
        for result in finished {
            let (branch, done) = result?;
            let steps = done.scope_steps().cloned().unwrap_or_default();
            ctx = ctx.with_branch_steps(name, &branch, steps);

            if adopted || done.verdict() == Verdict::Running {
                continue;
            }
            adopted = true;
            ctx = match done.pause() {
                Some(pause) => ctx.with_pause(pause.clone()),
                None => ctx.with_verdict(done.verdict()),
            };
            if let Some(error) = done.error() {
                ctx = ctx.with_error(error.clone());
            }
        }

        Ok(self.finish_container(name, ctx, started, attempt))
    }

    /// One split branch in its own sub-context.
    fn run_branch<'a>(
        &'a self,
        branch: &'a SplitBranch,
        entry: ExecutionContext,
        attempt: &'a Attempt,
    ) -> BoxFuture<'a, Result<(String, ExecutionContext), FlowError>> {
        Box::pin(async move {
            let done = self
                .run_chain(branch.first_action.as_deref(), entry, attempt)
                .await?;
            Ok((branch.name.clone(), done))
        })
    }

    /// Settle a loop or split step's status from the run verdict.
    fn finish_container(
        &self,
        name: &str,
        ctx: ExecutionContext,
        started: Instant,
        attempt: &Attempt,
    ) -> ExecutionContext {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let status = match ctx.verdict() {
            Verdict::Running | Verdict::Succeeded | Verdict::Stopped => StepStatus::Succeeded,
            Verdict::Paused => StepStatus::Paused,
            Verdict::Failed | Verdict::Timeout | Verdict::InternalError => StepStatus::Failed,
        };
        self.emit_completed(attempt, name, status, elapsed_ms);
        update_scope_step(&ctx, name, |step| step.with_status(status).with_duration(elapsed_ms))
    }

    fn emit_started(&self, attempt: &Attempt, step_name: &str, action_type: ActionType) {
        self.event_bus.emit(ExecutionEvent::StepStarted {
            execution_id: attempt.options.execution_id,
            step_name: step_name.to_string(),
            action_type,
            timestamp: Utc::now(),
        });
    }

    fn emit_completed(&self, attempt: &Attempt, step_name: &str, status: StepStatus, duration_ms: u64) {
        self.event_bus.emit(ExecutionEvent::StepCompleted {
            execution_id: attempt.options.execution_id,
            step_name: step_name.to_string(),
            status,
            duration_ms,
            timestamp: Utc::now(),
        });
    }

    fn emit_failed(&self, attempt: &Attempt, step_name: &str, error: &BlockError, attempt_no: u32) {
        self.event_bus.emit(ExecutionEvent::StepFailed {
            execution_id: attempt.options.execution_id,
            step_name: step_name.to_string(),
            error: error.to_string(),
            attempt: attempt_no,
            timestamp: Utc::now(),
        });
    }
}

fn update_scope_step(
    ctx: &ExecutionContext,
    name: &str,
    update: impl FnOnce(StepOutput) -> StepOutput,
) -> ExecutionContext {
    match ctx.scope_step(name).cloned() {
        Some(step) => ctx.upsert_step(name, update(step)),
        None => ctx.clone(),
    }
}
