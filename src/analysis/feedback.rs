//! Human-readable feedback text.

use super::criteria::FeedbackCue;

pub const EXCELLENT_FORM: &str = "Excellent form! Keep up the great work.";
pub const GOOD_FORM: &str = "Good form with some room for improvement.";
pub const POOR_FORM: &str =
    "Form needs significant improvement. Consider reducing weight and focusing on technique.";
pub const UNABLE_TO_ANALYZE: &str =
    "Unable to analyze form. Please ensure proper video quality and visibility.";

/// Builds the feedback for a job from its overall score and, when the exercise
/// has a cue statistic, the mean cue angle across frames.
///
/// The exercise-specific clause goes on its own line after the general verdict.
/// Without a score only the "unable to analyze" text is returned.
pub fn generate_feedback(
    overall_score: Option<f64>,
    cue_mean: Option<f64>,
    cue: Option<&FeedbackCue>,
) -> String {
    let Some(score) = overall_score else {
        return UNABLE_TO_ANALYZE.to_string();
    };

    let verdict = if score >= 0.9 {
        EXCELLENT_FORM
    } else if score >= 0.7 {
        GOOD_FORM
    } else {
        POOR_FORM
    };

    match cue.zip(cue_mean).and_then(|(cue, mean)| cue_clause(cue, mean)) {
        Some(clause) => format!("{}\n{}", verdict, clause),
        None => verdict.to_string(),
    }
}

fn cue_clause(cue: &FeedbackCue, mean: f64) -> Option<&'static str> {
    if let Some(above) = cue.above.as_ref().filter(|t| mean > t.limit) {
        return Some(above.message);
    }
    cue.below
        .as_ref()
        .filter(|t| mean < t.limit)
        .map(|t| t.message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::criteria::ExerciseRules;

    fn squat_cue() -> FeedbackCue {
        ExerciseRules::squat().cue.unwrap()
    }

    #[test]
    fn test_verdict_bands() {
        assert_eq!(generate_feedback(Some(1.0), None, None), EXCELLENT_FORM);
        assert_eq!(generate_feedback(Some(0.9), None, None), EXCELLENT_FORM);
        assert_eq!(generate_feedback(Some(0.89), None, None), GOOD_FORM);
        assert_eq!(generate_feedback(Some(0.7), None, None), GOOD_FORM);
        assert_eq!(generate_feedback(Some(0.69), None, None), POOR_FORM);
        assert_eq!(generate_feedback(Some(0.0), None, None), POOR_FORM);
    }

    #[test]
    fn test_no_score_ignores_cue() {
        let cue = squat_cue();
        assert_eq!(
            generate_feedback(None, Some(150.0), Some(&cue)),
            UNABLE_TO_ANALYZE
        );
    }

    #[test]
    fn test_shallow_squat_clause() {
        let cue = squat_cue();
        assert_eq!(
            generate_feedback(Some(0.85), Some(112.5), Some(&cue)),
            "Good form with some room for improvement.\nTry to squat deeper - aim for parallel or slightly below."
        );
    }

    #[test]
    fn test_deep_squat_clause() {
        let cue = squat_cue();
        let feedback = generate_feedback(Some(0.8), Some(75.0), Some(&cue));
        assert!(feedback.ends_with("\nYou're squatting too deep - try to stop at parallel."));
    }

    #[test]
    fn test_squat_within_cue_range_has_no_clause() {
        let cue = squat_cue();
        assert_eq!(
            generate_feedback(Some(1.0), Some(95.0), Some(&cue)),
            EXCELLENT_FORM
        );
        assert_eq!(
            generate_feedback(Some(1.0), Some(110.0), Some(&cue)),
            EXCELLENT_FORM
        );
    }

    #[test]
    fn test_missing_cue_mean_has_no_clause() {
        let cue = squat_cue();
        assert_eq!(generate_feedback(Some(0.6), None, Some(&cue)), POOR_FORM);
    }

    #[test]
    fn test_push_up_body_line_clause() {
        let cue = ExerciseRules::push_up().cue.unwrap();
        assert_eq!(
            generate_feedback(Some(0.95), Some(150.0), Some(&cue)),
            "Excellent form! Keep up the great work.\nKeep your body in a straight line from shoulders to ankles."
        );
        assert_eq!(
            generate_feedback(Some(0.95), Some(175.0), Some(&cue)),
            EXCELLENT_FORM
        );
    }
}
