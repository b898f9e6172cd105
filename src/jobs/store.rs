//! Analysis job storage and persistence.
//!
//! The job record is the single source of truth for a job's lifecycle. Every
//! status change is one conditional UPDATE on the expected current status, so a
//! transition either happens completely or not at all.

use super::models::*;
use super::schema::ANALYSIS_JOBS_VERSIONED_SCHEMAS;
use crate::analysis::AnalysisDetails;
use crate::sqlite_persistence::BASE_DB_VERSION;
use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Trait for analysis job storage operations.
pub trait AnalysisJobStore: Send + Sync {
    /// Persist a freshly submitted job.
    fn insert_job(&self, job: &AnalysisJob) -> Result<()>;

    fn get_job(&self, id: &str) -> Result<Option<AnalysisJob>>;

    /// Atomically move the oldest queued job to processing and return it.
    fn claim_next_queued(&self) -> Result<Option<AnalysisJob>>;

    /// Count one more landmark source attempt for a processing job.
    /// Returns the new attempt count.
    fn record_attempt(&self, id: &str) -> Result<u32>;

    /// `processing -> completed`. Returns false if the job was not processing.
    fn mark_completed(
        &self,
        id: &str,
        result: &AggregateResult,
        details: &AnalysisDetails,
    ) -> Result<bool>;

    /// `processing -> failed`. Returns false if the job was not processing.
    fn mark_failed(&self, id: &str, error: &str) -> Result<bool>;

    /// Jobs of one owner, newest first, optionally restricted to one exercise.
    fn list_for_owner(&self, owner_id: &str, exercise_id: Option<&str>)
        -> Result<Vec<AnalysisJob>>;

    /// Fail every job still marked processing. Used at startup, when no job can
    /// legitimately be in flight.
    fn fail_stale_processing(&self, error: &str) -> Result<usize>;
}

/// SQLite-backed analysis job store.
pub struct SqliteAnalysisJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAnalysisJobStore {
    /// Opens an existing database or creates a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = if db_path.as_ref().exists() {
            Connection::open_with_flags(
                &db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        } else {
            let conn = Connection::open(&db_path)?;
            ANALYSIS_JOBS_VERSIONED_SCHEMAS
                .last()
                .context("No schemas defined")?
                .create(&conn)?;
            info!("Created new analysis jobs database at {:?}", db_path.as_ref());
            conn
        };

        let db_version = conn
            .query_row("PRAGMA user_version;", [], |row| row.get::<usize, i64>(0))
            .context("Failed to read database version")?
            - BASE_DB_VERSION as i64;

        if db_version < 0 {
            bail!(
                "Analysis jobs database version {} is too old, does not contain base db version {}",
                db_version,
                BASE_DB_VERSION
            );
        }
        let version = db_version as usize;

        let schema_count = ANALYSIS_JOBS_VERSIONED_SCHEMAS.len();
        if version >= schema_count {
            bail!(
                "Analysis jobs database version {} is too new (max supported: {})",
                version,
                schema_count - 1
            );
        }

        ANALYSIS_JOBS_VERSIONED_SCHEMAS
            .get(version)
            .context("Failed to get schema")?
            .validate(&conn)?;

        Self::migrate_if_needed(&conn, version)?;

        Ok(SqliteAnalysisJobStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store for testing.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        ANALYSIS_JOBS_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;

        Ok(SqliteAnalysisJobStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate_if_needed(conn: &Connection, current_version: usize) -> Result<()> {
        let target_version = ANALYSIS_JOBS_VERSIONED_SCHEMAS.len() - 1;

        if current_version >= target_version {
            return Ok(());
        }

        info!(
            "Migrating analysis jobs database from version {} to {}",
            current_version, target_version
        );

        for schema in ANALYSIS_JOBS_VERSIONED_SCHEMAS
            .iter()
            .skip(current_version + 1)
        {
            if let Some(migration_fn) = schema.migration {
                info!("Running analysis jobs migration to version {}", schema.version);
                migration_fn(conn)?;
            }
        }

        conn.execute(
            &format!(
                "PRAGMA user_version = {}",
                BASE_DB_VERSION + target_version
            ),
            [],
        )?;

        ANALYSIS_JOBS_VERSIONED_SCHEMAS[target_version].validate(conn)?;
        Ok(())
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<AnalysisJob> {
        let status_str: String = row.get("status")?;
        let status = JobStatus::from_str(&status_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown job status '{}'", status_str).into(),
            )
        })?;

        let overall_score: Option<f64> = row.get("overall_score")?;
        let consistency: Option<f64> = row.get("consistency")?;
        let feedback: Option<String> = row.get("feedback")?;
        let result = feedback.map(|feedback| AggregateResult {
            overall_score,
            consistency,
            feedback,
        });

        let details = row
            .get::<_, Option<String>>("details")?
            .and_then(|json| match serde_json::from_str(&json) {
                Ok(details) => Some(details),
                Err(e) => {
                    warn!("Ignoring unreadable analysis details: {}", e);
                    None
                }
            });

        Ok(AnalysisJob {
            id: row.get("id")?,
            video_reference: row.get("video_reference")?,
            exercise_id: row.get("exercise_id")?,
            owner_id: row.get("owner_id")?,
            status,
            result,
            error: row.get("error")?,
            attempts: row.get("attempts")?,
            details,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
        })
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

impl AnalysisJobStore for SqliteAnalysisJobStore {
    fn insert_job(&self, job: &AnalysisJob) -> Result<()> {
        let details = job
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize analysis details")?;
        let result = job.result.as_ref();

        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"INSERT INTO analysis_jobs (
                id, video_reference, exercise_id, owner_id, status,
                overall_score, consistency, feedback, error,
                created_at, updated_at, started_at, finished_at, attempts, details
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"#,
            params![
                job.id,
                job.video_reference,
                job.exercise_id,
                job.owner_id,
                job.status.as_str(),
                result.and_then(|r| r.overall_score),
                result.and_then(|r| r.consistency),
                result.map(|r| r.feedback.as_str()),
                job.error,
                job.created_at,
                job.updated_at,
                job.started_at,
                job.finished_at,
                job.attempts,
                details,
            ],
        )
        .with_context(|| format!("Failed to insert analysis job {}", job.id))?;
        Ok(())
    }

    fn get_job(&self, id: &str) -> Result<Option<AnalysisJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM analysis_jobs WHERE id = ?1")?;
        let job = stmt.query_row([id], Self::row_to_job).optional()?;
        Ok(job)
    }

    fn claim_next_queued(&self) -> Result<Option<AnalysisJob>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let next_id: Option<String> = tx
            .query_row(
                r#"SELECT id FROM analysis_jobs
                   WHERE status = 'queued'
                   ORDER BY created_at ASC, rowid ASC
                   LIMIT 1"#,
                [],
                |row| row.get(0),
            )
            .optional()?;

        let Some(id) = next_id else {
            return Ok(None);
        };

        let now = Self::now();
        let claimed = tx.execute(
            r#"UPDATE analysis_jobs
               SET status = 'processing', started_at = ?1, updated_at = ?1
               WHERE id = ?2 AND status = 'queued'"#,
            params![now, id],
        )?;
        if claimed == 0 {
            return Ok(None);
        }

        let job = tx.query_row(
            "SELECT * FROM analysis_jobs WHERE id = ?1",
            params![id],
            Self::row_to_job,
        )?;
        tx.commit()?;
        Ok(Some(job))
    }

    fn record_attempt(&self, id: &str) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        let attempts = conn
            .query_row(
                r#"UPDATE analysis_jobs
                   SET attempts = attempts + 1, updated_at = ?1
                   WHERE id = ?2 AND status = 'processing'
                   RETURNING attempts"#,
                params![Self::now(), id],
                |row| row.get(0),
            )
            .optional()?;
        attempts.with_context(|| format!("Analysis job {} is not processing", id))
    }

    fn mark_completed(
        &self,
        id: &str,
        result: &AggregateResult,
        details: &AnalysisDetails,
    ) -> Result<bool> {
        let details =
            serde_json::to_string(details).context("Failed to serialize analysis details")?;
        let now = Self::now();

        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            r#"UPDATE analysis_jobs
               SET status = 'completed', overall_score = ?1, consistency = ?2, feedback = ?3,
                   error = NULL, details = ?4, updated_at = ?5, finished_at = ?5
               WHERE id = ?6 AND status = 'processing'"#,
            params![
                result.overall_score,
                result.consistency,
                result.feedback,
                details,
                now,
                id
            ],
        )?;
        Ok(updated > 0)
    }

    fn mark_failed(&self, id: &str, error: &str) -> Result<bool> {
        let now = Self::now();
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            r#"UPDATE analysis_jobs
               SET status = 'failed', error = ?1, overall_score = NULL, consistency = NULL,
                   feedback = NULL, updated_at = ?2, finished_at = ?2
               WHERE id = ?3 AND status = 'processing'"#,
            params![error, now, id],
        )?;
        Ok(updated > 0)
    }

    fn list_for_owner(
        &self,
        owner_id: &str,
        exercise_id: Option<&str>,
    ) -> Result<Vec<AnalysisJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"SELECT * FROM analysis_jobs
               WHERE owner_id = ?1 AND (?2 IS NULL OR exercise_id = ?2)
               ORDER BY created_at DESC, rowid DESC"#,
        )?;
        let jobs = stmt
            .query_map(params![owner_id, exercise_id], Self::row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn fail_stale_processing(&self, error: &str) -> Result<usize> {
        let now = Self::now();
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            r#"UPDATE analysis_jobs
               SET status = 'failed', error = ?1, updated_at = ?2, finished_at = ?2
               WHERE status = 'processing'"#,
            params![error, now],
        )?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::schema::ANALYSIS_JOBS_VERSIONED_SCHEMAS;
    use tempfile::tempdir;

    fn queued(owner: &str, exercise: &str, created_at: i64) -> AnalysisJob {
        let mut job = AnalysisJob::new("uploads/clip.mp4", exercise, owner);
        job.created_at = created_at;
        job.updated_at = created_at;
        job
    }

    fn sample_result() -> AggregateResult {
        AggregateResult {
            overall_score: Some(0.85),
            consistency: Some(0.15),
            feedback: "Good form with some room for improvement.".to_string(),
        }
    }

    #[test]
    fn test_create_and_reopen_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("analysis_jobs.db");

        let job = queued("user-1", "squat", 100);
        {
            let store = SqliteAnalysisJobStore::new(&db_path).unwrap();
            store.insert_job(&job).unwrap();
        }
        assert!(db_path.exists());

        let store = SqliteAnalysisJobStore::new(&db_path).unwrap();
        assert_eq!(store.get_job(&job.id).unwrap(), Some(job));
    }

    #[test]
    fn test_opening_old_database_migrates_it() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("analysis_jobs.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            ANALYSIS_JOBS_VERSIONED_SCHEMAS[0].create(&conn).unwrap();
            conn.execute(
                r#"INSERT INTO analysis_jobs (
                    id, video_reference, exercise_id, owner_id, status, created_at, updated_at
                ) VALUES ('old-job', 'a.mp4', 'squat', 'user-1', 'queued', 10, 10)"#,
                [],
            )
            .unwrap();
        }

        let store = SqliteAnalysisJobStore::new(&db_path).unwrap();

        let job = store.get_job("old-job").unwrap().unwrap();
        assert_eq!(job.attempts, 0);
        assert_eq!(job.details, None);
        let version: i64 = store
            .conn
            .lock()
            .unwrap()
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version as usize, BASE_DB_VERSION + 1);
    }

    #[test]
    fn test_foreign_database_is_rejected() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("analysis_jobs.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute("CREATE TABLE other (id TEXT)", []).unwrap();
        }
        assert!(SqliteAnalysisJobStore::new(&db_path).is_err());
    }

    #[test]
    fn test_get_missing_job() {
        let store = SqliteAnalysisJobStore::in_memory().unwrap();
        assert_eq!(store.get_job("nope").unwrap(), None);
    }

    #[test]
    fn test_claim_takes_oldest_queued_once() {
        let store = SqliteAnalysisJobStore::in_memory().unwrap();
        let newer = queued("user-1", "squat", 200);
        let older = queued("user-1", "squat", 100);
        store.insert_job(&newer).unwrap();
        store.insert_job(&older).unwrap();

        let first = store.claim_next_queued().unwrap().unwrap();
        assert_eq!(first.id, older.id);
        assert_eq!(first.status, JobStatus::Processing);
        assert!(first.started_at.is_some());

        let second = store.claim_next_queued().unwrap().unwrap();
        assert_eq!(second.id, newer.id);

        assert!(store.claim_next_queued().unwrap().is_none());
    }

    #[test]
    fn test_complete_writes_result_and_details_together() {
        let store = SqliteAnalysisJobStore::in_memory().unwrap();
        let job = queued("user-1", "squat", 100);
        store.insert_job(&job).unwrap();
        store.claim_next_queued().unwrap();

        let details = AnalysisDetails {
            frame_scores: vec![1.0, 0.7],
            frames_total: 2,
            frames_scored: 2,
            ..Default::default()
        };
        assert!(store.mark_completed(&job.id, &sample_result(), &details).unwrap());

        let stored = store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.result, Some(sample_result()));
        assert_eq!(stored.error, None);
        assert_eq!(stored.details, Some(details));
        assert!(stored.finished_at.is_some());
    }

    #[test]
    fn test_transitions_require_processing() {
        let store = SqliteAnalysisJobStore::in_memory().unwrap();
        let job = queued("user-1", "squat", 100);
        store.insert_job(&job).unwrap();

        // still queued
        assert!(!store.mark_completed(&job.id, &sample_result(), &AnalysisDetails::default()).unwrap());
        assert!(!store.mark_failed(&job.id, "boom").unwrap());
        assert!(store.record_attempt(&job.id).is_err());

        store.claim_next_queued().unwrap();
        assert!(store.mark_failed(&job.id, "boom").unwrap());

        // terminal states are absorbing
        assert!(!store.mark_completed(&job.id, &sample_result(), &AnalysisDetails::default()).unwrap());
        assert!(!store.mark_failed(&job.id, "again").unwrap());

        let stored = store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("boom"));
        assert_eq!(stored.result, None);
    }

    #[test]
    fn test_record_attempt_counts_up() {
        let store = SqliteAnalysisJobStore::in_memory().unwrap();
        let job = queued("user-1", "squat", 100);
        store.insert_job(&job).unwrap();
        store.claim_next_queued().unwrap();

        assert_eq!(store.record_attempt(&job.id).unwrap(), 1);
        assert_eq!(store.record_attempt(&job.id).unwrap(), 2);
        assert_eq!(store.get_job(&job.id).unwrap().unwrap().attempts, 2);
    }

    #[test]
    fn test_list_for_owner_newest_first() {
        let store = SqliteAnalysisJobStore::in_memory().unwrap();
        let a = queued("user-1", "squat", 100);
        let b = queued("user-1", "push_up", 200);
        let c = queued("user-1", "squat", 300);
        let other = queued("user-2", "squat", 400);
        for job in [&a, &b, &c, &other] {
            store.insert_job(job).unwrap();
        }

        let ids: Vec<String> = store
            .list_for_owner("user-1", None)
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec![c.id.clone(), b.id.clone(), a.id.clone()]);

        let squats: Vec<String> = store
            .list_for_owner("user-1", Some("squat"))
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(squats, vec![c.id, a.id]);

        assert!(store.list_for_owner("nobody", None).unwrap().is_empty());
    }

    #[test]
    fn test_fail_stale_processing_only_touches_processing() {
        let store = SqliteAnalysisJobStore::in_memory().unwrap();
        let stale = queued("user-1", "squat", 100);
        let waiting = queued("user-1", "squat", 200);
        store.insert_job(&stale).unwrap();
        store.insert_job(&waiting).unwrap();
        store.claim_next_queued().unwrap();

        assert_eq!(store.fail_stale_processing("interrupted").unwrap(), 1);

        let stale = store.get_job(&stale.id).unwrap().unwrap();
        assert_eq!(stale.status, JobStatus::Failed);
        assert_eq!(stale.error.as_deref(), Some("interrupted"));
        assert_eq!(
            store.get_job(&waiting.id).unwrap().unwrap().status,
            JobStatus::Queued
        );
    }
}
