use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all FormCheck metrics
const PREFIX: &str = "formcheck";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Job lifecycle
    pub static ref JOBS_SUBMITTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_jobs_submitted_total"), "Analysis jobs accepted"),
        &["exercise"]
    ).expect("Failed to create jobs_submitted_total metric");

    pub static ref JOBS_FINISHED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_jobs_finished_total"), "Analysis jobs that reached a terminal status"),
        &["status"]
    ).expect("Failed to create jobs_finished_total metric");

    pub static ref JOB_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_job_duration_seconds"),
            "Time from claiming a job to its terminal status"
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0])
    ).expect("Failed to create job_duration_seconds metric");

    pub static ref JOBS_IN_PROGRESS: Gauge = Gauge::new(
        format!("{PREFIX}_jobs_in_progress"),
        "Analysis jobs currently being processed"
    ).expect("Failed to create jobs_in_progress metric");

    pub static ref JOB_RETRIES_TOTAL: IntCounter = IntCounter::new(
        format!("{PREFIX}_job_retries_total"),
        "Landmark source retries after transient failures"
    ).expect("Failed to create job_retries_total metric");

    // Frame analysis
    pub static ref FRAMES_SCORED_TOTAL: IntCounter = IntCounter::new(
        format!("{PREFIX}_frames_scored_total"),
        "Frames scored against exercise criteria"
    ).expect("Failed to create frames_scored_total metric");

    pub static ref RULE_SKIPS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_rule_skips_total"), "Rules skipped because they could not be measured"),
        &["rule", "reason"]
    ).expect("Failed to create rule_skips_total metric");

    pub static ref UNKNOWN_EXERCISE_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_unknown_exercise_total"), "Jobs analyzed for exercises with no registered rules"),
        &["exercise"]
    ).expect("Failed to create unknown_exercise_total metric");
}

/// Register all metrics with the Prometheus registry
pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(JOBS_SUBMITTED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_FINISHED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_IN_PROGRESS.clone()));
    let _ = REGISTRY.register(Box::new(JOB_RETRIES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(FRAMES_SCORED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RULE_SKIPS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(UNKNOWN_EXERCISE_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

pub fn record_job_submitted(exercise: &str) {
    JOBS_SUBMITTED_TOTAL.with_label_values(&[exercise]).inc();
}

pub fn record_job_started() {
    JOBS_IN_PROGRESS.inc();
}

/// Record a worker letting go of a job, whatever became of it
pub fn record_job_ended() {
    JOBS_IN_PROGRESS.dec();
}

/// Record a job reaching a terminal status after `duration` in processing
pub fn record_job_finished(status: &str, duration: Duration) {
    JOBS_FINISHED_TOTAL.with_label_values(&[status]).inc();
    JOB_DURATION_SECONDS.observe(duration.as_secs_f64());
}

pub fn record_job_retry() {
    JOB_RETRIES_TOTAL.inc();
}

pub fn record_frames_scored(count: usize) {
    FRAMES_SCORED_TOTAL.inc_by(count as u64);
}

pub fn record_rule_skips(rule: &str, reason: &str, count: u64) {
    RULE_SKIPS_TOTAL.with_label_values(&[rule, reason]).inc_by(count);
}

pub fn record_unknown_exercise(exercise: &str) {
    UNKNOWN_EXERCISE_TOTAL.with_label_values(&[exercise]).inc();
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_family(name: &str) -> bool {
        REGISTRY.gather().iter().any(|m| m.get_name() == name)
    }

    #[test]
    fn test_metrics_initialization() {
        init_metrics();
        // label-less metrics are exported right away
        assert!(has_family("formcheck_jobs_in_progress"));
        assert!(has_family("formcheck_frames_scored_total"));
    }

    #[test]
    fn test_record_job_lifecycle() {
        init_metrics();

        record_job_submitted("squat");
        record_job_started();
        record_job_ended();
        record_job_finished("completed", Duration::from_millis(250));

        assert!(has_family("formcheck_jobs_submitted_total"));
        assert!(has_family("formcheck_jobs_finished_total"));
        assert!(has_family("formcheck_job_duration_seconds"));
    }

    #[test]
    fn test_record_rule_skips() {
        init_metrics();

        record_rule_skips("squat_depth", "missing_landmark", 3);
        record_unknown_exercise("burpee");

        assert!(
            RULE_SKIPS_TOTAL
                .with_label_values(&["squat_depth", "missing_landmark"])
                .get()
                >= 3
        );
        assert!(has_family("formcheck_unknown_exercise_total"));
    }

    #[tokio::test]
    async fn test_metrics_handler_renders_text() {
        init_metrics();
        record_frames_scored(2);

        let response = metrics_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
