//! Asynchronous analysis jobs: persistence, orchestration and the worker pool.

mod models;
mod orchestrator;
mod retry_policy;
mod schema;
mod store;
mod worker;

pub use models::{AggregateResult, AnalysisJob, JobStatus, JobStatusView, SubmitRequest};
pub use orchestrator::{
    Orchestrator, OrchestratorError, SubmitError, ANALYSIS_FAILED_UNEXPECTEDLY, INTERRUPTED_BY_RESTART,
};
pub use retry_policy::RetryPolicy;
pub use store::{AnalysisJobStore, SqliteAnalysisJobStore};
pub use worker::WorkerPool;
