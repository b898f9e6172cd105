//! FormCheck Server Library
//!
//! Exercise form analysis over pose landmark sequences, run as persisted
//! asynchronous jobs.

pub mod analysis;
pub mod config;
pub mod jobs;
pub mod landmarks;
pub mod metrics;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use jobs::{
    AnalysisJob, AnalysisJobStore, JobStatus, JobStatusView, Orchestrator, SqliteAnalysisJobStore,
    SubmitRequest, WorkerPool,
};
pub use landmarks::{JsonlLandmarkSource, LandmarkSource};
