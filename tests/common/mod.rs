//! Common test infrastructure
//!
//! Builds an orchestrator on top of a temporary directory holding both the
//! jobs database and the landmark files, the same layout `serve` uses.

#![allow(dead_code)]

use formcheck_server::analysis::RuleRegistry;
use formcheck_server::config::{AnalysisSettings, RetrySettings, WorkerSettings};
use formcheck_server::jobs::{
    AnalysisJob, Orchestrator, RetryPolicy, SqliteAnalysisJobStore, SubmitRequest,
};
use formcheck_server::landmarks::JsonlLandmarkSource;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const OWNER_ID: &str = "athlete-1";

pub struct TestEnv {
    pub orchestrator: Arc<Orchestrator>,
    pub db_path: PathBuf,
    pub landmarks_dir: PathBuf,
    // Held so the directory outlives the test
    _dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = dir.path().join("analysis_jobs.db");
        let landmarks_dir = dir.path().join("landmarks");
        std::fs::create_dir_all(&landmarks_dir).expect("Failed to create landmarks dir");

        let orchestrator = build_orchestrator(&db_path, &landmarks_dir);
        Self {
            orchestrator,
            db_path,
            landmarks_dir,
            _dir: dir,
        }
    }

    /// Opens a second orchestrator over the same files, as a restarted server would.
    pub fn reopen(&self) -> Arc<Orchestrator> {
        build_orchestrator(&self.db_path, &self.landmarks_dir)
    }

    /// Writes a detector output file, one JSON record per line.
    pub fn write_landmarks(&self, video_reference: &str, records: &[Value]) {
        let lines: Vec<String> = records.iter().map(|r| r.to_string()).collect();
        self.write_raw_landmarks(video_reference, &lines.join("\n"));
    }

    pub fn write_raw_landmarks(&self, video_reference: &str, contents: impl AsRef<[u8]>) {
        let path = self
            .landmarks_dir
            .join(format!("{}.{}", video_reference, JsonlLandmarkSource::EXTENSION));
        std::fs::write(path, contents).expect("Failed to write landmarks file");
    }

    pub fn submit(&self, video_reference: &str, exercise_id: &str) -> String {
        self.orchestrator
            .submit(SubmitRequest {
                video_reference: video_reference.to_string(),
                exercise_id: exercise_id.to_string(),
                owner_id: OWNER_ID.to_string(),
            })
            .expect("Failed to submit job")
    }

    pub fn job(&self, job_id: &str) -> AnalysisJob {
        self.orchestrator
            .get_job(job_id)
            .expect("Failed to read job")
            .expect("Job not found")
    }

    /// Polls until every job reached a terminal status.
    pub async fn wait_until_terminal(&self, job_ids: &[String]) {
        for _ in 0..1000 {
            let done = job_ids
                .iter()
                .all(|id| self.job(id).status.is_terminal());
            if done {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("jobs did not reach a terminal status in time");
    }
}

fn build_orchestrator(db_path: &Path, landmarks_dir: &Path) -> Arc<Orchestrator> {
    let store = SqliteAnalysisJobStore::new(db_path).expect("Failed to open job store");
    Arc::new(Orchestrator::new(
        Arc::new(store),
        Arc::new(JsonlLandmarkSource::new(landmarks_dir)),
        Arc::new(RuleRegistry::with_defaults()),
        &AnalysisSettings::default(),
        RetryPolicy::new(&RetrySettings {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            backoff_multiplier: 2.0,
        }),
    ))
}

pub fn worker_settings(count: usize) -> WorkerSettings {
    WorkerSettings {
        count,
        poll_interval_ms: 5,
        shutdown_timeout_secs: 5,
    }
}

/// A side-view squat record whose left knee is bent at `knee_angle` degrees,
/// with the knee stacked over the ankle.
pub fn squat_record(knee_angle: f64) -> Value {
    let theta = knee_angle.to_radians();
    json!({
        "landmarks": {
            "left_hip": { "x": 0.5 + 0.3 * theta.sin(), "y": 0.5 + 0.3 * theta.cos(), "visibility": 0.98 },
            "left_knee": { "x": 0.5, "y": 0.5, "visibility": 0.97 },
            "left_ankle": { "x": 0.5, "y": 0.8, "visibility": 0.95 },
        }
    })
}

/// A record in which the detector found nobody.
pub fn empty_record() -> Value {
    json!({ "landmarks": {} })
}
