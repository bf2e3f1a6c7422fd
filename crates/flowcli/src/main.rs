use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flowcore::{
    Action, ActionKind, BranchCondition, BranchOperator, ExecutionEvent, FlowVersion, StepEvent,
    StepStatus, Trigger, TriggerKind, Verdict,
};
use flowruntime::{BlockRegistry, FlowRuntime, RuntimeConfig};
use flowworker::memory::{InMemoryFlowSource, InMemoryJobReporter, InMemoryRunStore};
use flowworker::{
    InMemoryLockService, JobOutcome, LocalEngineRunner, RunJob, RunStatus, WorkerConfig,
    WorkerJobExecutor,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Flow run engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a flow file
    Run {
        /// Path to flow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Trigger payload as JSON string
        #[arg(short, long)]
        payload: Option<String>,

        /// Resume a paused run with this JSON payload
        #[arg(short, long)]
        resume_payload: Option<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a flow file
    Validate {
        /// Path to flow JSON file
        file: PathBuf,
    },

    /// List available block types
    Blocks,

    /// Create a new example flow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "flow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            payload,
            resume_payload,
            verbose,
        } => {
            let default_level = if verbose { "debug" } else { "info" };
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
                )
                .init();

            run_flow(file, payload, resume_payload).await?;
        }

        Commands::Validate { file } => {
            validate_flow(file)?;
        }

        Commands::Blocks => {
            list_blocks();
        }

        Commands::Init { output } => {
            create_example_flow(output)?;
        }
    }

    Ok(())
}

fn registry() -> BlockRegistry {
    let mut registry = BlockRegistry::new();
    flownodes::register_all(&mut registry);
    registry
}

fn load_flow(file: &PathBuf) -> Result<FlowVersion> {
    let flow_json = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let flow: FlowVersion = serde_json::from_str(&flow_json)
        .with_context(|| format!("parsing {}", file.display()))?;
    Ok(flow)
}

fn parse_json(raw: Option<String>) -> Result<Value> {
    match raw {
        Some(raw) => serde_json::from_str(&raw).context("payload must be valid JSON"),
        None => Ok(json!({})),
    }
}

async fn run_flow(file: PathBuf, payload: Option<String>, resume_payload: Option<String>) -> Result<()> {
    println!("🚀 Loading flow from: {}", file.display());

    let flow = load_flow(&file)?;
    let payload = parse_json(payload)?;
    let resume_payload = resume_payload.map(|raw| parse_json(Some(raw))).transpose()?;

    println!("📋 Flow: {}", flow.display_name);
    println!("   Steps: {}", flow.actions().len());
    println!();

    let config = WorkerConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Invalid FLOW_WORKER_* configuration, using defaults");
        WorkerConfig::default()
    });

    let runtime = Arc::new(FlowRuntime::with_registry(
        Arc::new(registry()),
        RuntimeConfig::default(),
    ));
    let runs = Arc::new(InMemoryRunStore::new());
    let flows = Arc::new(InMemoryFlowSource::new());
    flows.insert(flow.clone()).await;

    // Ctrl-C stops the run instead of killing the process
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("🛑 Stopping run...");
                shutdown.cancel();
            }
        });
    }

    let engine = LocalEngineRunner::new(runtime.clone(), runs.clone(), config.sandbox_timeout())
        .with_api_url(config.api_url.clone())
        .with_shutdown(shutdown);
    let executor = WorkerJobExecutor::new(
        Arc::new(engine),
        runs.clone(),
        Arc::new(InMemoryJobReporter::new()),
        flows,
        Arc::new(InMemoryLockService::new(config.lock_backoff())),
        config,
    );

    // Subscribe to events for real-time output
    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(event);
        }
    });

    let run_id = uuid::Uuid::new_v4().to_string();
    let mut outcome = executor
        .execute_flow(&RunJob::begin(&run_id, flow.id, payload).with_project("local"))
        .await?;

    if let Some(resume_payload) = resume_payload {
        if outcome == (JobOutcome::Completed { run_status: RunStatus::Paused }) {
            println!("⏯️  Resuming paused run");
            outcome = executor
                .execute_flow(&RunJob::resume(&run_id, flow.id, resume_payload).with_project("local"))
                .await?;
        }
    }

    // Wait for events to finish printing
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    println!();
    println!("📊 Execution Summary:");
    println!("   Run ID: {}", run_id);
    match &outcome {
        JobOutcome::Skipped => println!("   Outcome: skipped"),
        JobOutcome::Completed { run_status } => println!("   Status: {:?}", run_status),
        JobOutcome::Failed { message } => println!("   Failed: {}", message),
    }

    if let Some(run) = runs.run(&run_id).await {
        println!("   Duration: {}ms", run.details.duration_ms);
        if let Some(reason) = &run.details.termination_reason {
            println!("   Reason: {}", reason);
        }
        if let Some(pause) = &run.details.pause {
            println!("   Paused at: {} (resume with --resume-payload)", pause.step_name);
        }

        println!();
        println!("📤 Steps:");
        for (name, step) in &run.details.steps {
            let marker = match step.status {
                StepStatus::Succeeded => "✅",
                StepStatus::Failed => "❌",
                StepStatus::Paused => "⏸️ ",
                StepStatus::Running => "⏳",
            };
            println!("   {} {}: {}", marker, name, step.value());
            if let Some(error) = &step.error_message {
                println!("      error: {}", error);
            }
        }
    }

    Ok(())
}

fn print_event(event: ExecutionEvent) {
    match event {
        ExecutionEvent::RunStarted { resumed, .. } => {
            if resumed {
                println!("▶️  Run resumed");
            } else {
                println!("▶️  Run started");
            }
        }
        ExecutionEvent::StepStarted { step_name, action_type, .. } => {
            println!("  ⚡ Starting step: {} ({:?})", step_name, action_type);
        }
        ExecutionEvent::StepCompleted {
            step_name,
            status,
            duration_ms,
            ..
        } => {
            println!("  ✅ Step {} finished {:?} in {}ms", step_name, status, duration_ms);
        }
        ExecutionEvent::StepFailed {
            step_name,
            error,
            attempt,
            ..
        } => {
            println!("  ❌ Step {} failed (attempt {}): {}", step_name, attempt, error);
        }
        ExecutionEvent::StepEvent { step_name, event, .. } => match event {
            StepEvent::Info { message } => {
                println!("     ℹ️  [{}] {}", step_name, message);
            }
            StepEvent::Warning { message } => {
                println!("     ⚠️  [{}] {}", step_name, message);
            }
            StepEvent::Progress { percent, message } => {
                if let Some(msg) = message {
                    println!("     📊 [{}] {}% - {}", step_name, percent, msg);
                } else {
                    println!("     📊 [{}] {}%", step_name, percent);
                }
            }
            StepEvent::Data { .. } => {}
        },
        ExecutionEvent::RunFinished { verdict, duration_ms, .. } => match verdict {
            Verdict::Succeeded => println!("✨ Run completed successfully in {}ms", duration_ms),
            Verdict::Paused => println!("⏸️  Run paused after {}ms", duration_ms),
            other => println!("💥 Run ended {:?} after {}ms", other, duration_ms),
        },
    }
}

fn validate_flow(file: PathBuf) -> Result<()> {
    println!("🔍 Validating flow: {}", file.display());

    let flow = load_flow(&file)?;
    flow.validate()?;

    let registry = registry();
    let unknown: Vec<&str> = flow
        .actions()
        .into_iter()
        .filter_map(|action| match &action.kind {
            ActionKind::Block { block, .. } if !registry.contains(block) => Some(block.as_str()),
            _ => None,
        })
        .collect();
    if !unknown.is_empty() {
        anyhow::bail!("unknown block types: {}", unknown.join(", "));
    }

    println!("✅ Flow is valid:");
    println!("   Name: {}", flow.display_name);
    println!("   Trigger: {:?}", flow.trigger.kind);
    println!("   Steps: {}", flow.actions().len());

    Ok(())
}

fn list_blocks() {
    println!("📦 Available Block Types:");
    println!();

    let registry = registry();
    for block_type in registry.list_block_types() {
        if let Some(metadata) = registry.get_metadata(&block_type) {
            println!("  • {} ({})", block_type, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", block_type);
        }
    }
}

fn create_example_flow(output: PathBuf) -> Result<()> {
    let over_budget = vec![vec![BranchCondition::new(
        BranchOperator::NumberIsGreaterThan,
        "{{trigger.spend}}",
    )
    .compared_to("{{trigger.budget}}")]];

    let check = Action::branch("check_budget", over_budget)
        .with_display_name("Spend over budget?")
        .on_success(
            Action::block("request_approval", "flow.approval")
                .with_input(json!({
                    "request": { "account": "{{trigger.account}}", "spend": "{{trigger.spend}}" }
                }))
                .then(
                    Action::block("log_decision", "debug.log")
                        .with_input(json!({ "message": "Approved: {{request_approval.approved}}" })),
                ),
        )
        .on_failure(
            Action::block("log_ok", "debug.log")
                .with_input(json!({ "message": "{{trigger.account}} is within budget" })),
        );

    let flow = FlowVersion::new("Budget guard", Trigger::new(TriggerKind::Webhook).then(check));

    let flow_json = serde_json::to_string_pretty(&flow)?;
    std::fs::write(&output, flow_json)?;

    println!("✨ Created example flow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  flow run --file {} --payload '{{\"account\": \"prod\", \"spend\": 1200, \"budget\": 1000}}' --resume-payload '{{\"approved\": true}}'",
        output.display()
    );

    Ok(())
}
