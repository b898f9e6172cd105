//! Retry policy for transient landmark source failures.
//!
//! Implements exponential backoff with configurable parameters. Retries happen
//! while the job stays in `processing`; the job never goes back to the queue.

use crate::analysis::AnalysisError;
use crate::config::RetrySettings;
use std::time::Duration;

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries before permanent failure.
    pub max_retries: u32,
    /// Initial backoff duration in milliseconds.
    pub initial_backoff_ms: u64,
    /// Maximum backoff duration in milliseconds (cap for exponential growth).
    pub max_backoff_ms: u64,
    /// Multiplier applied to backoff after each retry.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(config: &RetrySettings) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
            backoff_multiplier: config.backoff_multiplier,
        }
    }

    /// Check if an error should be retried given the current retry count.
    ///
    /// Returns true if the error is transient and the retry count is less than
    /// max_retries.
    pub fn should_retry(&self, error: &AnalysisError, retry_count: u32) -> bool {
        error.is_transient() && retry_count < self.max_retries
    }

    /// Backoff before retry number `retry_count` (0-based):
    /// `initial_backoff * multiplier^retry_count`, capped at `max_backoff_ms`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let backoff = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(backoff.min(self.max_backoff_ms as f64) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetrySettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::SourceError;

    fn io_error() -> AnalysisError {
        AnalysisError::Source(SourceError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "read failed",
        )))
    }

    #[test]
    fn test_new_from_config() {
        let config = RetrySettings {
            max_retries: 4,
            initial_backoff_ms: 100,
            max_backoff_ms: 2000,
            backoff_multiplier: 3.0,
        };
        let policy = RetryPolicy::new(&config);

        assert_eq!(policy.max_retries, 4);
        assert_eq!(policy.initial_backoff_ms, 100);
        assert_eq!(policy.max_backoff_ms, 2000);
        assert_eq!(policy.backoff_multiplier, 3.0);
    }

    #[test]
    fn test_backoff_calculation() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
        };

        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_capping() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_backoff_ms: 500,
            max_backoff_ms: 3000,
            backoff_multiplier: 2.0,
        };

        // 500 * 2^2 = 2000 (under cap)
        assert_eq!(policy.backoff(2), Duration::from_millis(2000));
        // 500 * 2^3 = 4000 -> capped
        assert_eq!(policy.backoff(3), Duration::from_millis(3000));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(3000));
    }

    #[test]
    fn test_zero_initial_backoff() {
        let policy = RetryPolicy {
            initial_backoff_ms: 0,
            ..Default::default()
        };
        assert_eq!(policy.backoff(0), Duration::ZERO);
        assert_eq!(policy.backoff(5), Duration::ZERO);
    }

    #[test]
    fn test_should_retry_transient_errors() {
        let policy = RetryPolicy {
            max_retries: 3,
            ..Default::default()
        };

        assert!(policy.should_retry(&io_error(), 0));
        assert!(policy.should_retry(&io_error(), 2));
        // At or above max_retries: should not retry
        assert!(!policy.should_retry(&io_error(), 3));
        assert!(!policy.should_retry(&io_error(), 10));
    }

    #[test]
    fn test_permanent_errors_never_retry() {
        let policy = RetryPolicy::default();

        let not_found = AnalysisError::Source(SourceError::NotFound("a.mp4".to_string()));
        assert!(!policy.should_retry(&not_found, 0));
        assert!(!policy.should_retry(&AnalysisError::Source(SourceError::NoFrames), 0));
        assert!(!policy.should_retry(&AnalysisError::NoScorableFrames, 0));
        assert!(!policy.should_retry(&AnalysisError::Cancelled, 0));
    }
}
