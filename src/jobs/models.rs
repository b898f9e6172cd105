//! Data models for analysis jobs.

use crate::analysis::AnalysisDetails;
use serde::{Deserialize, Serialize};

/// Lifecycle status of an analysis job.
///
/// Transitions only move forward: `Queued -> Processing -> Completed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed, // terminal
    Failed,    // terminal
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Returns true if this is a terminal state (Completed or Failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Aggregate outcome of a completed analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub overall_score: Option<f64>,
    pub consistency: Option<f64>,
    pub feedback: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: String,
    pub video_reference: String,
    /// Normalized exercise id.
    pub exercise_id: String,
    pub owner_id: String,
    pub status: JobStatus,
    /// Present iff the job completed.
    pub result: Option<AggregateResult>,
    /// Present iff the job failed.
    pub error: Option<String>,
    /// Number of times the landmark source was opened for this job.
    pub attempts: u32,
    pub details: Option<AnalysisDetails>,
    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl AnalysisJob {
    pub fn new(video_reference: &str, exercise_id: &str, owner_id: &str) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            video_reference: video_reference.to_string(),
            exercise_id: exercise_id.to_string(),
            owner_id: owner_id.to_string(),
            status: JobStatus::Queued,
            result: None,
            error: None,
            attempts: 0,
            details: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }
}

/// A request to analyze a stored video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub video_reference: String,
    pub exercise_id: String,
    pub owner_id: String,
}

/// What callers polling a job get to see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consistency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&AnalysisJob> for JobStatusView {
    fn from(job: &AnalysisJob) -> Self {
        let result = job.result.as_ref();
        Self {
            status: job.status,
            overall_score: result.and_then(|r| r.overall_score),
            consistency: result.and_then(|r| r.consistency),
            feedback: result.map(|r| r.feedback.clone()),
            error: job.error.clone(),
        }
    }
}
