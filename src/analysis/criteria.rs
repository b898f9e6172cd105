//! Exercise criteria: per-exercise geometric rules and per-frame scoring.
//!
//! Each exercise id maps to an ordered list of [`Rule`]s. A frame starts at a
//! score of 1.0 and every rule multiplies in its factor, so simultaneous
//! deviations compound. Rules that cannot be measured on a frame (missing
//! landmark, low visibility, degenerate geometry) are skipped and contribute the
//! configured fallback factor instead of aborting the frame.

use super::geometry::{joint_angle, GeometryError};
use crate::landmarks::{Frame, Joint, LandmarkError};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Default factor contributed by a rule that could not be measured.
pub const DEFAULT_FALLBACK_SCORE: f64 = 0.5;

/// Per-frame conformance in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
pub struct FrameScore(f64);

impl FrameScore {
    pub const PERFECT: FrameScore = FrameScore(1.0);

    /// Clamps into [0, 1]. NaN maps to 0.
    pub fn new(value: f64) -> Self {
        debug_assert!(!value.is_nan(), "frame score computed as NaN");
        if value.is_nan() {
            return FrameScore(0.0);
        }
        FrameScore(value.clamp(0.0, 1.0))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

/// Three joints forming an angle at `vertex`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JointTriple {
    pub a: Joint,
    pub vertex: Joint,
    pub c: Joint,
}

impl JointTriple {
    pub const fn new(a: Joint, vertex: Joint, c: Joint) -> Self {
        Self { a, vertex, c }
    }
}

impl fmt::Display for JointTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.a, self.vertex, self.c)
    }
}

/// Accepted angle interval in degrees, inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AngleBand {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// Penalizes the joint angle falling outside `band`.
    JointAngle {
        name: &'static str,
        joints: JointTriple,
        band: AngleBand,
        below_penalty: f64,
        above_penalty: f64,
    },
    /// Penalizes a horizontal offset between two joints beyond `tolerance`
    /// (e.g. knee drifting away from the ankle line).
    HorizontalAlignment {
        name: &'static str,
        upper: Joint,
        lower: Joint,
        tolerance: f64,
        penalty: f64,
    },
}

impl Rule {
    pub fn name(&self) -> &'static str {
        match self {
            Rule::JointAngle { name, .. } => name,
            Rule::HorizontalAlignment { name, .. } => name,
        }
    }
}

/// Why a rule was not measured on a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "joint")]
pub enum SkipReason {
    MissingLandmark(Joint),
    LowVisibility(Joint),
    DegenerateGeometry,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MissingLandmark(_) => "missing_landmark",
            SkipReason::LowVisibility(_) => "low_visibility",
            SkipReason::DegenerateGeometry => "degenerate_geometry",
        }
    }
}

impl From<LandmarkError> for SkipReason {
    fn from(e: LandmarkError) -> Self {
        match e {
            LandmarkError::MissingLandmark(joint) => SkipReason::MissingLandmark(joint),
            LandmarkError::LowVisibility { joint, .. } => SkipReason::LowVisibility(joint),
        }
    }
}

impl From<GeometryError> for SkipReason {
    fn from(_: GeometryError) -> Self {
        SkipReason::DegenerateGeometry
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RuleOutcome {
    Passed,
    BelowRange,
    AboveRange,
    Misaligned,
    Skipped(SkipReason),
}

/// Threshold on the mean cue angle that triggers a coaching message.
#[derive(Debug, Clone, PartialEq)]
pub struct CueThreshold {
    pub limit: f64,
    pub message: &'static str,
}

/// Exercise-specific feedback statistic: the mean angle of `measurement`
/// across a job's frames, compared against the thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackCue {
    pub measurement: JointTriple,
    /// Message when the mean angle is above `limit`.
    pub above: Option<CueThreshold>,
    /// Message when the mean angle is below `limit`.
    pub below: Option<CueThreshold>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExerciseRules {
    pub id: &'static str,
    pub rules: Vec<Rule>,
    pub cue: Option<FeedbackCue>,
}

impl ExerciseRules {
    pub fn squat() -> Self {
        let knee = JointTriple::new(Joint::LeftHip, Joint::LeftKnee, Joint::LeftAnkle);
        Self {
            id: "squat",
            rules: vec![
                Rule::JointAngle {
                    name: "squat_depth",
                    joints: knee,
                    band: AngleBand {
                        min: 90.0,
                        max: 120.0,
                    },
                    below_penalty: 0.8,
                    above_penalty: 0.7,
                },
                Rule::HorizontalAlignment {
                    name: "knee_over_ankle",
                    upper: Joint::LeftKnee,
                    lower: Joint::LeftAnkle,
                    tolerance: 0.1,
                    penalty: 0.8,
                },
            ],
            cue: Some(FeedbackCue {
                measurement: knee,
                above: Some(CueThreshold {
                    limit: 110.0,
                    message: "Try to squat deeper - aim for parallel or slightly below.",
                }),
                below: Some(CueThreshold {
                    limit: 80.0,
                    message: "You're squatting too deep - try to stop at parallel.",
                }),
            }),
        }
    }

    pub fn push_up() -> Self {
        let body_line = JointTriple::new(Joint::LeftShoulder, Joint::LeftHip, Joint::LeftAnkle);
        Self {
            id: "push_up",
            rules: vec![
                Rule::JointAngle {
                    name: "elbow_range",
                    joints: JointTriple::new(Joint::LeftShoulder, Joint::LeftElbow, Joint::LeftWrist),
                    band: AngleBand {
                        min: 70.0,
                        max: 170.0,
                    },
                    below_penalty: 0.8,
                    above_penalty: 0.9,
                },
                Rule::JointAngle {
                    name: "body_line",
                    joints: body_line,
                    band: AngleBand {
                        min: 160.0,
                        max: 180.0,
                    },
                    below_penalty: 0.7,
                    above_penalty: 1.0,
                },
            ],
            cue: Some(FeedbackCue {
                measurement: body_line,
                above: None,
                below: Some(CueThreshold {
                    limit: 165.0,
                    message: "Keep your body in a straight line from shoulders to ankles.",
                }),
            }),
        }
    }
}

/// Canonical form of an exercise id: trimmed, lowercase, with spaces and dashes
/// turned into underscores.
pub fn normalize_exercise_id(exercise_id: &str) -> String {
    exercise_id
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

/// Rules resolved for an exercise id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RuleSet<'a> {
    Known(&'a ExerciseRules),
    /// The exercise has no rules registered: every frame scores a neutral 1.0.
    NoRules,
}

pub struct RuleRegistry {
    sets: HashMap<String, ExerciseRules>,
}

impl RuleRegistry {
    pub fn empty() -> Self {
        Self {
            sets: HashMap::new(),
        }
    }

    /// Registry with the built-in exercises.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(ExerciseRules::squat());
        registry.register(ExerciseRules::push_up());
        registry
    }

    pub fn register(&mut self, rules: ExerciseRules) {
        self.sets.insert(normalize_exercise_id(rules.id), rules);
    }

    pub fn resolve(&self, exercise_id: &str) -> RuleSet<'_> {
        match self.sets.get(&normalize_exercise_id(exercise_id)) {
            Some(rules) => RuleSet::Known(rules),
            None => RuleSet::NoRules,
        }
    }

    pub fn exercise_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.sets.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameEvaluation {
    pub score: FrameScore,
    /// One outcome per rule, in rule order.
    pub outcomes: Vec<RuleOutcome>,
    /// The exercise's cue angle on this frame, when measurable.
    pub cue_angle: Option<f64>,
}

/// Scores single frames against a rule set.
#[derive(Debug, Clone, Copy)]
pub struct CriteriaEvaluator {
    fallback_score: f64,
    min_visibility: f64,
}

impl Default for CriteriaEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_FALLBACK_SCORE, 0.0)
    }
}

impl CriteriaEvaluator {
    pub fn new(fallback_score: f64, min_visibility: f64) -> Self {
        Self {
            fallback_score: fallback_score.clamp(0.0, 1.0),
            min_visibility,
        }
    }

    pub fn fallback_score(&self) -> f64 {
        self.fallback_score
    }

    pub fn evaluate(&self, frame: &Frame, rule_set: RuleSet<'_>) -> FrameEvaluation {
        let rules = match rule_set {
            RuleSet::Known(rules) => rules,
            RuleSet::NoRules => {
                return FrameEvaluation {
                    score: FrameScore::PERFECT,
                    outcomes: Vec::new(),
                    cue_angle: None,
                }
            }
        };

        let mut angles = AngleCache::new(frame, self.min_visibility);
        let mut score = 1.0;
        let mut outcomes = Vec::with_capacity(rules.rules.len());

        for rule in &rules.rules {
            let (outcome, factor) = self.apply(rule, frame, &mut angles);
            score *= factor;
            outcomes.push(outcome);
        }

        let cue_angle = rules
            .cue
            .as_ref()
            .and_then(|cue| angles.angle(cue.measurement).ok());

        FrameEvaluation {
            score: FrameScore::new(score),
            outcomes,
            cue_angle,
        }
    }

    fn apply(&self, rule: &Rule, frame: &Frame, angles: &mut AngleCache<'_>) -> (RuleOutcome, f64) {
        let measured = match rule {
            Rule::JointAngle {
                joints,
                band,
                below_penalty,
                above_penalty,
                ..
            } => angles.angle(*joints).map(|angle| {
                if angle < band.min {
                    (RuleOutcome::BelowRange, *below_penalty)
                } else if angle > band.max {
                    (RuleOutcome::AboveRange, *above_penalty)
                } else {
                    (RuleOutcome::Passed, 1.0)
                }
            }),
            Rule::HorizontalAlignment {
                upper,
                lower,
                tolerance,
                penalty,
                ..
            } => self.horizontal_offset(frame, *upper, *lower).map(|offset| {
                if offset > *tolerance {
                    (RuleOutcome::Misaligned, *penalty)
                } else {
                    (RuleOutcome::Passed, 1.0)
                }
            }),
        };

        measured.unwrap_or_else(|reason| (RuleOutcome::Skipped(reason), self.fallback_score))
    }

    fn horizontal_offset(&self, frame: &Frame, upper: Joint, lower: Joint) -> Result<f64, SkipReason> {
        let upper = frame.get_visible(upper, self.min_visibility)?;
        let lower = frame.get_visible(lower, self.min_visibility)?;
        Ok((upper.x - lower.x).abs())
    }
}

/// Joint angles computed at most once per frame and joint triple.
struct AngleCache<'a> {
    frame: &'a Frame,
    min_visibility: f64,
    computed: HashMap<JointTriple, Result<f64, SkipReason>>,
}

impl<'a> AngleCache<'a> {
    fn new(frame: &'a Frame, min_visibility: f64) -> Self {
        Self {
            frame,
            min_visibility,
            computed: HashMap::new(),
        }
    }

    fn angle(&mut self, joints: JointTriple) -> Result<f64, SkipReason> {
        let frame = self.frame;
        let min_visibility = self.min_visibility;
        *self.computed.entry(joints).or_insert_with(|| {
            let a = frame.get_visible(joints.a, min_visibility)?;
            let vertex = frame.get_visible(joints.vertex, min_visibility)?;
            let c = frame.get_visible(joints.c, min_visibility)?;
            Ok(joint_angle(a, vertex, c)?)
        })
    }
}
