//! Worker pool polling the job store for queued analyses.

use super::orchestrator::Orchestrator;
use crate::config::WorkerSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct WorkerPool {
    orchestrator: Arc<Orchestrator>,
    settings: WorkerSettings,
    /// Token to signal pool shutdown. Workers stop claiming new jobs; jobs in
    /// flight are awaited up to the shutdown timeout.
    shutdown_token: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        settings: WorkerSettings,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            settings,
            shutdown_token,
        }
    }

    /// Runs the workers until the shutdown token is cancelled.
    pub async fn run(self) {
        info!("Starting analysis worker pool with {} workers", self.settings.count);

        // On startup: mark any stale processing jobs as failed
        match self.orchestrator.recover_stale_jobs() {
            Ok(count) if count > 0 => {
                info!("Marked {} stale analysis jobs as failed from previous run", count);
            }
            Ok(_) => {}
            Err(e) => {
                error!("Failed to mark stale analysis jobs: {}", e);
            }
        }

        let handles: Vec<JoinHandle<()>> = (0..self.settings.count)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&self.orchestrator),
                    self.settings.poll_interval(),
                    self.shutdown_token.clone(),
                ))
            })
            .collect();

        self.shutdown_token.cancelled().await;
        info!("Worker pool received shutdown signal");

        let deadline = tokio::time::Instant::now() + self.settings.shutdown_timeout();
        for (worker_id, handle) in handles.into_iter().enumerate() {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Analysis worker {} panicked: {}", worker_id, e),
                Err(_) => warn!(
                    "Analysis worker {} did not stop within {:?}, abandoning its job",
                    worker_id,
                    self.settings.shutdown_timeout()
                ),
            }
        }

        info!("Worker pool stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    orchestrator: Arc<Orchestrator>,
    poll_interval: Duration,
    shutdown_token: CancellationToken,
) {
    debug!("Analysis worker {} started", worker_id);
    while !shutdown_token.is_cancelled() {
        match orchestrator.process_next().await {
            // keep draining the queue without waiting
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => error!("Analysis worker {} failed to process a job: {:#}", worker_id, e),
        }

        tokio::select! {
            _ = shutdown_token.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
    debug!("Analysis worker {} stopped", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::RuleRegistry;
    use crate::config::AnalysisSettings;
    use crate::jobs::models::{JobStatus, SubmitRequest};
    use crate::jobs::retry_policy::RetryPolicy;
    use crate::jobs::store::{AnalysisJobStore, SqliteAnalysisJobStore};
    use crate::landmarks::{InMemoryLandmarkSource, RawFrame, RawLandmark, RawLandmarks};

    fn frame() -> RawFrame {
        let landmarks = [
            ("left_hip", (0.8, 0.5)),
            ("left_knee", (0.5, 0.5)),
            ("left_ankle", (0.5, 0.8)),
        ]
        .into_iter()
        .map(|(name, (x, y))| {
            (
                name.to_string(),
                RawLandmark {
                    x,
                    y,
                    z: 0.0,
                    visibility: 1.0,
                },
            )
        })
        .collect();
        RawFrame {
            landmarks: RawLandmarks::Named(landmarks),
        }
    }

    fn settings(count: usize) -> WorkerSettings {
        WorkerSettings {
            count,
            poll_interval_ms: 5,
            shutdown_timeout_secs: 5,
        }
    }

    fn setup() -> (Arc<Orchestrator>, Arc<SqliteAnalysisJobStore>) {
        let source = InMemoryLandmarkSource::new();
        source.insert("a.mp4", vec![frame(); 3]);
        let store = Arc::new(SqliteAnalysisJobStore::in_memory().unwrap());
        let orchestrator = Orchestrator::new(
            store.clone(),
            Arc::new(source),
            Arc::new(RuleRegistry::with_defaults()),
            &AnalysisSettings::default(),
            RetryPolicy::default(),
        );
        (Arc::new(orchestrator), store)
    }

    async fn wait_until_terminal(orchestrator: &Orchestrator, ids: &[String]) {
        for _ in 0..400 {
            let done = ids.iter().all(|id| {
                orchestrator
                    .get_job(id)
                    .unwrap()
                    .map(|job| job.status.is_terminal())
                    .unwrap_or(false)
            });
            if done {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("jobs did not finish in time");
    }

    #[tokio::test]
    async fn test_pool_processes_every_job_once() {
        let (orchestrator, _store) = setup();
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::new(Arc::clone(&orchestrator), settings(3), shutdown.clone());
        let pool_handle = tokio::spawn(pool.run());

        let ids: Vec<String> = (0..8)
            .map(|_| {
                orchestrator
                    .submit(SubmitRequest {
                        video_reference: "a.mp4".to_string(),
                        exercise_id: "squat".to_string(),
                        owner_id: "user-1".to_string(),
                    })
                    .unwrap()
            })
            .collect();

        wait_until_terminal(&orchestrator, &ids).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), pool_handle)
            .await
            .unwrap()
            .unwrap();

        for id in &ids {
            let job = orchestrator.get_job(id).unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Completed);
            assert_eq!(job.attempts, 1);
        }
    }

    #[tokio::test]
    async fn test_pool_fails_stale_jobs_on_startup() {
        let (orchestrator, store) = setup();
        let id = orchestrator
            .submit(SubmitRequest {
                video_reference: "a.mp4".to_string(),
                exercise_id: "squat".to_string(),
                owner_id: "user-1".to_string(),
            })
            .unwrap();
        // claimed by a process that then died
        store.claim_next_queued().unwrap();

        let shutdown = CancellationToken::new();
        let pool_handle = tokio::spawn(
            WorkerPool::new(Arc::clone(&orchestrator), settings(1), shutdown.clone()).run(),
        );
        wait_until_terminal(&orchestrator, &[id.clone()]).await;
        shutdown.cancel();
        pool_handle.await.unwrap();

        let job = store.get_job(&id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error.as_deref(),
            Some(crate::jobs::orchestrator::INTERRUPTED_BY_RESTART)
        );
    }

    #[tokio::test]
    async fn test_pool_stops_when_idle() {
        let (orchestrator, _store) = setup();
        let shutdown = CancellationToken::new();
        let pool_handle =
            tokio::spawn(WorkerPool::new(orchestrator, settings(2), shutdown.clone()).run());

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(5), pool_handle)
            .await
            .expect("pool should stop promptly")
            .unwrap();
    }
}
