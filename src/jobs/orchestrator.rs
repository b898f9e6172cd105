//! Analysis job orchestration.
//!
//! Accepts submissions, drives claimed jobs through the analysis pipeline and
//! answers status queries. All job state lives in the store; the orchestrator
//! only keeps the cancellation tokens of jobs that have not finished yet.

use super::models::*;
use super::retry_policy::RetryPolicy;
use super::store::AnalysisJobStore;
use crate::analysis::{
    analyze, normalize_exercise_id, AnalysisContext, AnalysisError, AnalysisOutcome,
    CriteriaEvaluator, RuleRegistry,
};
use crate::config::AnalysisSettings;
use crate::landmarks::LandmarkSource;
use crate::metrics;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Error message stored on jobs found in processing at startup.
pub const INTERRUPTED_BY_RESTART: &str = "Analysis interrupted by server restart";

/// Error message stored when processing broke down outside the analysis itself,
/// e.g. a panicking analysis task or a storage failure mid-run.
pub const ANALYSIS_FAILED_UNEXPECTEDLY: &str = "Analysis failed unexpectedly";

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("analysis job {0} not found")]
    JobNotFound(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub struct Orchestrator {
    store: Arc<dyn AnalysisJobStore>,
    source: Arc<dyn LandmarkSource>,
    registry: Arc<RuleRegistry>,
    evaluator: CriteriaEvaluator,
    retry_policy: RetryPolicy,
    /// Tokens of jobs that were cancelled or are being processed.
    cancellations: Mutex<HashMap<String, CancellationToken>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn AnalysisJobStore>,
        source: Arc<dyn LandmarkSource>,
        registry: Arc<RuleRegistry>,
        settings: &AnalysisSettings,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            source,
            registry,
            evaluator: CriteriaEvaluator::new(settings.fallback_rule_score, settings.min_visibility),
            retry_policy,
            cancellations: Mutex::new(HashMap::new()),
        }
    }

    /// Validates and persists a new job, returning its id. The job is picked up
    /// asynchronously by a worker.
    pub fn submit(&self, request: SubmitRequest) -> Result<String, SubmitError> {
        let video_reference = request.video_reference.trim();
        if video_reference.is_empty() {
            return Err(SubmitError::MalformedRequest(
                "video_reference must not be empty".to_string(),
            ));
        }
        let exercise_id = normalize_exercise_id(&request.exercise_id);
        if exercise_id.is_empty() {
            return Err(SubmitError::MalformedRequest(
                "exercise_id must not be empty".to_string(),
            ));
        }

        let job = AnalysisJob::new(video_reference, &exercise_id, request.owner_id.trim());
        self.store.insert_job(&job)?;
        metrics::record_job_submitted(&exercise_id);
        info!(
            "Queued analysis job {} ({} for owner {})",
            job.id, exercise_id, job.owner_id
        );
        Ok(job.id)
    }

    pub fn status(&self, job_id: &str) -> Result<JobStatusView, OrchestratorError> {
        let job = self
            .store
            .get_job(job_id)?
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?;
        Ok(JobStatusView::from(&job))
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<AnalysisJob>> {
        self.store.get_job(job_id)
    }

    pub fn list_for_owner(
        &self,
        owner_id: &str,
        exercise_id: Option<&str>,
    ) -> Result<Vec<AnalysisJob>> {
        let exercise_id = exercise_id.map(normalize_exercise_id);
        self.store.list_for_owner(owner_id, exercise_id.as_deref())
    }

    /// Requests cancellation. A processing job stops at its next frame or
    /// backoff; a queued job fails as soon as it is claimed. Returns false for
    /// jobs that already finished and for processing jobs this orchestrator is
    /// not running.
    pub fn cancel(&self, job_id: &str) -> Result<bool, OrchestratorError> {
        let job = self
            .store
            .get_job(job_id)?
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?;

        match job.status {
            JobStatus::Completed | JobStatus::Failed => {
                debug!("Ignoring cancel for finished job {}", job_id);
                return Ok(false);
            }
            JobStatus::Processing => {
                let token = self.cancellations.lock().unwrap().get(job_id).cloned();
                let Some(token) = token else {
                    debug!("Ignoring cancel for job {} not running here", job_id);
                    return Ok(false);
                };
                token.cancel();
            }
            JobStatus::Queued => {
                self.job_token(job_id).cancel();
                // The job may have run to completion between the read and the insert
                let finished = self
                    .store
                    .get_job(job_id)?
                    .map(|job| job.status.is_terminal())
                    .unwrap_or(true);
                if finished {
                    self.cancellations.lock().unwrap().remove(job_id);
                    return Ok(false);
                }
            }
        }

        info!("Cancellation requested for job {} ({})", job_id, job.status);
        Ok(true)
    }

    /// Fails jobs left in processing by a previous run.
    pub fn recover_stale_jobs(&self) -> Result<usize> {
        self.store.fail_stale_processing(INTERRUPTED_BY_RESTART)
    }

    /// Claims and processes the oldest queued job. Returns false when the queue
    /// was empty.
    pub async fn process_next(&self) -> Result<bool> {
        match self.store.claim_next_queued()? {
            Some(job) => {
                self.process_job(job).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Runs a claimed job to its terminal status. Failures outside the analysis
    /// itself still fail the job; the returned error only reports that the final
    /// status could not be written.
    pub async fn process_job(&self, job: AnalysisJob) -> Result<()> {
        let token = self.job_token(&job.id);
        let started = Instant::now();
        metrics::record_job_started();
        info!(
            "Processing analysis job {} ({}, {})",
            job.id, job.exercise_id, job.video_reference
        );

        let finished = match self.run_with_retries(&job, &token).await {
            Ok(Ok(outcome)) => self.complete(&job, outcome),
            Ok(Err(e)) => self.fail(&job, &e),
            Err(e) => {
                error!("Job {} failed unexpectedly: {:#}", job.id, e);
                self.record_failure(&job, ANALYSIS_FAILED_UNEXPECTEDLY)
            }
        };
        self.cancellations.lock().unwrap().remove(&job.id);
        metrics::record_job_ended();

        // None: another writer already moved the job out of processing
        if let Some(status) = finished? {
            metrics::record_job_finished(status.as_str(), started.elapsed());
        }
        Ok(())
    }

    fn complete(&self, job: &AnalysisJob, outcome: AnalysisOutcome) -> Result<Option<JobStatus>> {
        let result = AggregateResult {
            overall_score: Some(outcome.summary.overall_score),
            consistency: Some(outcome.summary.consistency),
            feedback: outcome.feedback,
        };
        if !self.store.mark_completed(&job.id, &result, &outcome.details)? {
            warn!("Job {} was no longer processing, result discarded", job.id);
            return Ok(None);
        }
        info!(
            "Job {} completed: score {:.3}, consistency {:.3} over {} frames",
            job.id,
            outcome.summary.overall_score,
            outcome.summary.consistency,
            outcome.summary.frame_count
        );
        Ok(Some(JobStatus::Completed))
    }

    fn fail(&self, job: &AnalysisJob, error: &AnalysisError) -> Result<Option<JobStatus>> {
        match error {
            AnalysisError::Cancelled => info!("Job {} cancelled", job.id),
            _ => warn!("Job {} failed: {}", job.id, error),
        }
        self.record_failure(job, &error.to_string())
    }

    fn record_failure(&self, job: &AnalysisJob, message: &str) -> Result<Option<JobStatus>> {
        if !self.store.mark_failed(&job.id, message)? {
            warn!("Job {} was no longer processing, failure not recorded", job.id);
            return Ok(None);
        }
        Ok(Some(JobStatus::Failed))
    }

    /// Opens the source and analyzes it, retrying transient source failures with
    /// backoff. The outer result carries storage and task failures, the inner one
    /// the analysis outcome.
    async fn run_with_retries(
        &self,
        job: &AnalysisJob,
        token: &CancellationToken,
    ) -> Result<Result<AnalysisOutcome, AnalysisError>> {
        let mut retry_count = 0;
        loop {
            if token.is_cancelled() {
                return Ok(Err(AnalysisError::Cancelled));
            }

            let attempt = self.store.record_attempt(&job.id)?;
            debug!("Job {} attempt {}", job.id, attempt);

            let source = Arc::clone(&self.source);
            let ctx = AnalysisContext::new(token.clone(), Arc::clone(&self.registry), self.evaluator);
            let video_reference = job.video_reference.clone();
            let exercise_id = job.exercise_id.clone();

            let result = tokio::task::spawn_blocking(
                move || -> Result<AnalysisOutcome, AnalysisError> {
                    let frames = source.open(&video_reference)?;
                    analyze(&exercise_id, frames, &ctx)
                },
            )
            .await
            .with_context(|| format!("Analysis task for job {} panicked", job.id))?;

            match result {
                Err(e) if self.retry_policy.should_retry(&e, retry_count) => {
                    let backoff = self.retry_policy.backoff(retry_count);
                    warn!(
                        "Job {} attempt {} failed ({}), retrying in {:?}",
                        job.id, attempt, e, backoff
                    );
                    metrics::record_job_retry();
                    retry_count += 1;

                    tokio::select! {
                        _ = token.cancelled() => return Ok(Err(AnalysisError::Cancelled)),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(e) if e.is_transient() => {
                    error!(
                        "Job {} giving up after {} attempts: {}",
                        job.id, attempt, e
                    );
                    return Ok(Err(e));
                }
                other => return Ok(other),
            }
        }
    }

    fn job_token(&self, job_id: &str) -> CancellationToken {
        self.cancellations
            .lock()
            .unwrap()
            .entry(job_id.to_string())
            .or_default()
            .clone()
    }
}
