//! Worker side of flow runs
//!
//! Takes one queued run job, holds the per-run lock while the engine runs
//! it, and maps the engine's answer onto persisted run and job statuses.

mod classify;
mod config;
mod engine;
mod error;
mod executor;
mod job;
mod lock;
pub mod memory;
mod services;

pub use classify::{classify, Classification};
pub use config::WorkerConfig;
pub use engine::{
    EngineInput, EngineInputKind, EngineResponse, EngineResponseStatus, EngineResult, EngineRunner,
    LocalEngineRunner,
};
pub use error::{EngineError, LockError, StoreError, WorkerError};
pub use executor::WorkerJobExecutor;
pub use job::{
    ExecutionType, JobOutcome, JobStatus, JobStatusUpdate, ProgressUpdateType, Run, RunDetails,
    RunEnvironment, RunJob, RunStatus, RunUpdate,
};
pub use lock::{InMemoryLockGuard, InMemoryLockService, LockBackoff, LockGuard, LockService};
pub use services::{FlowSource, JobStatusReporter, RunStore};
