//! ferrodock Jobs - Docking job lifecycle and execution.
//!
//! `JobService` is the only path to job state: submission with per-user
//! quotas, status and results queries, cancellation and the lifecycle
//! transitions used by workers. `TaskRunner` drives QUEUED jobs through the
//! `DockingPipeline` on a fixed pool of workers, retrying failed attempts
//! with exponential backoff and sweeping expired jobs.

pub mod cleanup;
pub mod pipeline;
pub mod provider;
pub mod retry;
pub mod runner;
pub mod service;
pub mod settings;

pub use cleanup::{sweep, CleanupReport};
pub use pipeline::{DockingPipeline, PipelineOutcome};
pub use provider::{DirectoryStructureProvider, InMemoryStructureProvider, StructureProvider, TargetStructure};
pub use retry::RetryPolicy;
pub use runner::{RunnerHandle, TaskRunner};
pub use service::{
    progress, HistoryPage, JobFiles, JobResults, JobService, JobStatusView, SubmitReceipt, SubmitRequest,
    CANCELLED_MESSAGE, NO_POSES_MESSAGE,
};
pub use settings::{JobSettings, RunnerSettings};
