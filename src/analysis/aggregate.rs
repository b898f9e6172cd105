//! Temporal aggregation of per-frame scores.

use serde::{Deserialize, Serialize};

/// Mean and population standard deviation of a job's frame scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub overall_score: f64,
    pub consistency: f64,
    pub frame_count: usize,
}

/// Summarizes a finished sequence of scores. `None` when there are no scores.
pub fn summarize(scores: &[f64]) -> Option<ScoreSummary> {
    scores
        .iter()
        .fold(ScoreAccumulator::new(), |mut acc, score| {
            acc.push(*score);
            acc
        })
        .summary()
}

/// Streaming mean/variance (Welford), so frames can be scored as they arrive
/// without first collecting the whole video.
#[derive(Debug, Clone, Default)]
pub struct ScoreAccumulator {
    count: usize,
    mean: f64,
    m2: f64,
}

impl ScoreAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, score: f64) {
        self.count += 1;
        let delta = score - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (score - self.mean);
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    pub fn summary(&self) -> Option<ScoreSummary> {
        if self.count == 0 {
            return None;
        }
        // m2 can dip a hair below zero through rounding on constant input
        let variance = (self.m2 / self.count as f64).max(0.0);
        Some(ScoreSummary {
            overall_score: self.mean,
            consistency: variance.sqrt(),
            frame_count: self.count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_has_no_summary() {
        assert_eq!(summarize(&[]), None);
        assert_eq!(ScoreAccumulator::new().mean(), None);
    }

    #[test]
    fn test_single_score() {
        let summary = summarize(&[0.7]).unwrap();
        assert_eq!(summary.overall_score, 0.7);
        assert_eq!(summary.consistency, 0.0);
        assert_eq!(summary.frame_count, 1);
    }

    #[test]
    fn test_mean_and_population_std() {
        let summary = summarize(&[1.0, 0.7]).unwrap();
        assert!((summary.overall_score - 0.85).abs() < 1e-12);
        assert!((summary.consistency - 0.15).abs() < 1e-12);

        let summary = summarize(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((summary.overall_score - 5.0).abs() < 1e-12);
        assert!((summary.consistency - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_constant_scores_have_zero_spread() {
        let summary = summarize(&[0.8; 50]).unwrap();
        assert!((summary.overall_score - 0.8).abs() < 1e-12);
        assert!(summary.consistency.abs() < 1e-12);
    }

    #[test]
    fn test_order_does_not_matter() {
        let a = summarize(&[0.1, 0.9, 0.5, 0.3]).unwrap();
        let b = summarize(&[0.9, 0.3, 0.1, 0.5]).unwrap();
        assert!((a.overall_score - b.overall_score).abs() < 1e-12);
        assert!((a.consistency - b.consistency).abs() < 1e-12);
    }

    #[test]
    fn test_accumulator_matches_batch() {
        let scores = [0.2, 0.4, 1.0, 0.56, 0.8];
        let mut acc = ScoreAccumulator::new();
        for s in scores {
            acc.push(s);
        }
        assert_eq!(acc.count(), 5);
        let batch = summarize(&scores).unwrap();
        let streamed = acc.summary().unwrap();
        assert!((batch.overall_score - streamed.overall_score).abs() < 1e-12);
        assert!((batch.consistency - streamed.consistency).abs() < 1e-12);
    }
}
