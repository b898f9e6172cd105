//! Runs one job's frames through evaluation, aggregation and feedback.

use super::aggregate::{ScoreAccumulator, ScoreSummary};
use super::criteria::{
    normalize_exercise_id, CriteriaEvaluator, RuleOutcome, RuleRegistry, RuleSet,
};
use super::feedback::{generate_feedback, UNABLE_TO_ANALYZE};
use crate::landmarks::{FrameStream, SourceError, SourceFrame};
use crate::metrics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Everything a single analysis run needs. Passed explicitly so that runs share
/// nothing but the immutable registry.
#[derive(Clone)]
pub struct AnalysisContext {
    /// Cancelled when the job is cancelled.
    pub cancellation_token: CancellationToken,
    pub registry: Arc<RuleRegistry>,
    pub evaluator: CriteriaEvaluator,
}

impl AnalysisContext {
    pub fn new(
        cancellation_token: CancellationToken,
        registry: Arc<RuleRegistry>,
        evaluator: CriteriaEvaluator,
    ) -> Self {
        Self {
            cancellation_token,
            registry,
            evaluator,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("{}", UNABLE_TO_ANALYZE)]
    NoScorableFrames,
    #[error("Analysis cancelled")]
    Cancelled,
}

impl AnalysisError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AnalysisError::Source(e) if e.is_transient())
    }
}

/// Outcome counts for one rule across a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleStats {
    pub rule: String,
    pub passed: u64,
    pub below_range: u64,
    pub above_range: u64,
    pub misaligned: u64,
    pub skipped: u64,
}

impl RuleStats {
    fn record(&mut self, outcome: &RuleOutcome) {
        match outcome {
            RuleOutcome::Passed => self.passed += 1,
            RuleOutcome::BelowRange => self.below_range += 1,
            RuleOutcome::AboveRange => self.above_range += 1,
            RuleOutcome::Misaligned => self.misaligned += 1,
            RuleOutcome::Skipped(_) => self.skipped += 1,
        }
    }
}

/// Summary persisted alongside a completed job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisDetails {
    pub frame_scores: Vec<f64>,
    pub frames_total: usize,
    pub frames_scored: usize,
    /// Frames in which no valid landmark was detected.
    pub frames_empty: usize,
    /// Source records that could not be decoded at all.
    pub frames_undecodable: usize,
    pub invalid_landmarks: usize,
    pub rules: Vec<RuleStats>,
    pub cue_mean_angle: Option<f64>,
    pub no_rules: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutcome {
    pub summary: ScoreSummary,
    pub feedback: String,
    pub details: AnalysisDetails,
}

/// Consumes `frames` lazily and produces the job's aggregate result.
///
/// Per-frame problems (undecodable records, empty frames, unmeasurable rules) are
/// counted, never fatal. The run fails when the stream errors, yields nothing,
/// yields no scorable frame, or is cancelled.
pub fn analyze(
    exercise_id: &str,
    frames: FrameStream,
    ctx: &AnalysisContext,
) -> Result<AnalysisOutcome, AnalysisError> {
    let rule_set = ctx.registry.resolve(exercise_id);
    let mut details = AnalysisDetails::default();

    let cue = match rule_set {
        RuleSet::Known(rules) => {
            details.rules = rules
                .rules
                .iter()
                .map(|rule| RuleStats {
                    rule: rule.name().to_string(),
                    ..Default::default()
                })
                .collect();
            rules.cue.as_ref()
        }
        RuleSet::NoRules => {
            let normalized = normalize_exercise_id(exercise_id);
            warn!(
                "No rules registered for exercise '{}', scoring every frame as neutral",
                normalized
            );
            metrics::record_unknown_exercise(&normalized);
            details.no_rules = true;
            None
        }
    };

    let mut scores = ScoreAccumulator::new();
    let mut cue_angles = ScoreAccumulator::new();
    let mut skips: BTreeMap<(usize, &'static str), u64> = BTreeMap::new();

    for (index, item) in frames.enumerate() {
        if ctx.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }
        details.frames_total += 1;

        let raw = match item? {
            SourceFrame::Frame(raw) => raw,
            SourceFrame::Skipped { .. } => {
                details.frames_undecodable += 1;
                continue;
            }
        };

        let validated = raw.validate(index);
        details.invalid_landmarks += validated.invalid_landmarks;
        if validated.frame.is_empty() {
            details.frames_empty += 1;
            continue;
        }

        let evaluation = ctx.evaluator.evaluate(&validated.frame, rule_set);
        for (rule_index, outcome) in evaluation.outcomes.iter().enumerate() {
            details.rules[rule_index].record(outcome);
            if let RuleOutcome::Skipped(reason) = outcome {
                *skips.entry((rule_index, reason.as_str())).or_default() += 1;
            }
        }
        if let Some(angle) = evaluation.cue_angle {
            cue_angles.push(angle);
        }

        let score = evaluation.score.value();
        scores.push(score);
        details.frame_scores.push(score);
    }

    if details.frames_total == 0 {
        return Err(SourceError::NoFrames.into());
    }

    details.frames_scored = scores.count();
    details.cue_mean_angle = cue_angles.mean();

    metrics::record_frames_scored(details.frames_scored);
    for ((rule_index, reason), count) in &skips {
        metrics::record_rule_skips(&details.rules[*rule_index].rule, reason, *count);
    }

    debug!(
        "Analyzed {} frames ({} scored, {} empty, {} undecodable)",
        details.frames_total, details.frames_scored, details.frames_empty, details.frames_undecodable
    );

    let summary = scores.summary().ok_or(AnalysisError::NoScorableFrames)?;
    let feedback = generate_feedback(Some(summary.overall_score), details.cue_mean_angle, cue);

    Ok(AnalysisOutcome {
        summary,
        feedback,
        details,
    })
}
