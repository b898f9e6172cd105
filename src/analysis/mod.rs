//! Form analysis: joint geometry, per-exercise criteria, score aggregation and
//! feedback text.

mod aggregate;
mod analyzer;
mod criteria;
mod feedback;
mod geometry;

pub use aggregate::{summarize, ScoreAccumulator, ScoreSummary};
pub use analyzer::{
    analyze, AnalysisContext, AnalysisDetails, AnalysisError, AnalysisOutcome, RuleStats,
};
pub use criteria::{
    normalize_exercise_id, AngleBand, CriteriaEvaluator, CueThreshold, ExerciseRules,
    FeedbackCue, FrameEvaluation, FrameScore, JointTriple, Rule, RuleOutcome, RuleRegistry,
    RuleSet, SkipReason, DEFAULT_FALLBACK_SCORE,
};
pub use feedback::{generate_feedback, EXCELLENT_FORM, GOOD_FORM, POOR_FORM, UNABLE_TO_ANALYZE};
pub use geometry::{joint_angle, joint_angle_3d, GeometryError};
