//! Landmark and frame types.
//!
//! A [`Frame`] holds the landmarks a pose detector reported for one video frame.
//! Joints the detector did not report (or reported with invalid values) are
//! absent from the frame rather than zeroed, so rules can tell "joint not
//! detected" apart from "joint at the origin".

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Body joints reported by the pose detector, in detector index order
/// (MediaPipe Pose, 33 landmarks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Joint {
    Nose,
    LeftEyeInner,
    LeftEye,
    LeftEyeOuter,
    RightEyeInner,
    RightEye,
    RightEyeOuter,
    LeftEar,
    RightEar,
    MouthLeft,
    MouthRight,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftPinky,
    RightPinky,
    LeftIndex,
    RightIndex,
    LeftThumb,
    RightThumb,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
    LeftHeel,
    RightHeel,
    LeftFootIndex,
    RightFootIndex,
}

impl Joint {
    pub const COUNT: usize = 33;

    pub const ALL: [Joint; Joint::COUNT] = [
        Joint::Nose,
        Joint::LeftEyeInner,
        Joint::LeftEye,
        Joint::LeftEyeOuter,
        Joint::RightEyeInner,
        Joint::RightEye,
        Joint::RightEyeOuter,
        Joint::LeftEar,
        Joint::RightEar,
        Joint::MouthLeft,
        Joint::MouthRight,
        Joint::LeftShoulder,
        Joint::RightShoulder,
        Joint::LeftElbow,
        Joint::RightElbow,
        Joint::LeftWrist,
        Joint::RightWrist,
        Joint::LeftPinky,
        Joint::RightPinky,
        Joint::LeftIndex,
        Joint::RightIndex,
        Joint::LeftThumb,
        Joint::RightThumb,
        Joint::LeftHip,
        Joint::RightHip,
        Joint::LeftKnee,
        Joint::RightKnee,
        Joint::LeftAnkle,
        Joint::RightAnkle,
        Joint::LeftHeel,
        Joint::RightHeel,
        Joint::LeftFootIndex,
        Joint::RightFootIndex,
    ];

    /// Detector index of this joint.
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Joint::Nose => "nose",
            Joint::LeftEyeInner => "left_eye_inner",
            Joint::LeftEye => "left_eye",
            Joint::LeftEyeOuter => "left_eye_outer",
            Joint::RightEyeInner => "right_eye_inner",
            Joint::RightEye => "right_eye",
            Joint::RightEyeOuter => "right_eye_outer",
            Joint::LeftEar => "left_ear",
            Joint::RightEar => "right_ear",
            Joint::MouthLeft => "mouth_left",
            Joint::MouthRight => "mouth_right",
            Joint::LeftShoulder => "left_shoulder",
            Joint::RightShoulder => "right_shoulder",
            Joint::LeftElbow => "left_elbow",
            Joint::RightElbow => "right_elbow",
            Joint::LeftWrist => "left_wrist",
            Joint::RightWrist => "right_wrist",
            Joint::LeftPinky => "left_pinky",
            Joint::RightPinky => "right_pinky",
            Joint::LeftIndex => "left_index",
            Joint::RightIndex => "right_index",
            Joint::LeftThumb => "left_thumb",
            Joint::RightThumb => "right_thumb",
            Joint::LeftHip => "left_hip",
            Joint::RightHip => "right_hip",
            Joint::LeftKnee => "left_knee",
            Joint::RightKnee => "right_knee",
            Joint::LeftAnkle => "left_ankle",
            Joint::RightAnkle => "right_ankle",
            Joint::LeftHeel => "left_heel",
            Joint::RightHeel => "right_heel",
            Joint::LeftFootIndex => "left_foot_index",
            Joint::RightFootIndex => "right_foot_index",
        }
    }

    /// Parses a joint name. Case-insensitive, accepts `-` in place of `_`.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL.iter().copied().find(|j| j.as_str() == normalized)
    }
}

impl fmt::Display for Joint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single joint position in normalized frame coordinates plus detection confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub visibility: f64,
}

impl Landmark {
    /// Builds a landmark, returning `None` unless all coordinates are finite and
    /// visibility lies in [0, 1].
    pub fn new(x: f64, y: f64, z: f64, visibility: f64) -> Option<Self> {
        let valid = x.is_finite()
            && y.is_finite()
            && z.is_finite()
            && visibility.is_finite()
            && (0.0..=1.0).contains(&visibility);
        valid.then_some(Self {
            x,
            y,
            z,
            visibility,
        })
    }
}

/// Landmark lookup failures. Consumed by the criteria evaluator, never surfaced
/// to job callers.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum LandmarkError {
    #[error("landmark {0} is missing from the frame")]
    MissingLandmark(Joint),
    #[error("landmark {joint} visibility {visibility:.2} is below the required minimum")]
    LowVisibility { joint: Joint, visibility: f64 },
}

/// One video frame's validated landmarks.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    /// 0-based frame number within the video.
    pub index: usize,
    landmarks: BTreeMap<Joint, Landmark>,
}

impl Frame {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            landmarks: BTreeMap::new(),
        }
    }

    pub fn with_landmark(mut self, joint: Joint, landmark: Landmark) -> Self {
        self.landmarks.insert(joint, landmark);
        self
    }

    pub fn insert(&mut self, joint: Joint, landmark: Landmark) {
        self.landmarks.insert(joint, landmark);
    }

    pub fn get(&self, joint: Joint) -> Result<&Landmark, LandmarkError> {
        self.landmarks
            .get(&joint)
            .ok_or(LandmarkError::MissingLandmark(joint))
    }

    /// Like [`Frame::get`], but also rejects landmarks whose visibility is below
    /// `min_visibility`.
    pub fn get_visible(&self, joint: Joint, min_visibility: f64) -> Result<&Landmark, LandmarkError> {
        let landmark = self.get(joint)?;
        if landmark.visibility < min_visibility {
            return Err(LandmarkError::LowVisibility {
                joint,
                visibility: landmark.visibility,
            });
        }
        Ok(landmark)
    }

    pub fn contains(&self, joint: Joint) -> bool {
        self.landmarks.contains_key(&joint)
    }

    pub fn len(&self) -> usize {
        self.landmarks.len()
    }

    /// True when the detector found no valid landmark at all in this frame.
    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }

    pub fn joints(&self) -> impl Iterator<Item = Joint> + '_ {
        self.landmarks.keys().copied()
    }
}

/// Landmark as the detector wrote it, before validation.
///
/// Decoding never fails on a single landmark: a field that is present but not a
/// number, or an entry that is not an object, decodes as NaN so that validation
/// drops and counts it while the rest of the frame survives. Missing `z`
/// defaults to 0 and missing `visibility` to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value")]
pub struct RawLandmark {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub visibility: f64,
}

impl From<serde_json::Value> for RawLandmark {
    fn from(value: serde_json::Value) -> Self {
        let field = |name: &str, missing: f64| match value.get(name) {
            Some(v) => v.as_f64().unwrap_or(f64::NAN),
            None if value.is_object() => missing,
            None => f64::NAN,
        };
        Self {
            x: field("x", f64::NAN),
            y: field("y", f64::NAN),
            z: field("z", 0.0),
            visibility: field("visibility", 1.0),
        }
    }
}

/// Landmarks of one raw frame, either keyed by joint name or as the detector's
/// index-ordered array with `null` for undetected joints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawLandmarks {
    Named(HashMap<String, RawLandmark>),
    Indexed(Vec<Option<RawLandmark>>),
}

impl Default for RawLandmarks {
    fn default() -> Self {
        RawLandmarks::Named(HashMap::new())
    }
}

/// A frame record as produced by the external pose detector.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawFrame {
    #[serde(default)]
    pub landmarks: RawLandmarks,
}

/// Result of validating a [`RawFrame`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedFrame {
    pub frame: Frame,
    /// Landmarks dropped because of non-finite coordinates or out-of-range visibility.
    pub invalid_landmarks: usize,
}

impl RawFrame {
    /// Validates every exposed landmark and builds the frame with the given index.
    /// Invalid landmarks are dropped and counted; unknown joint names and array
    /// positions beyond the known joints are ignored.
    pub fn validate(&self, index: usize) -> ValidatedFrame {
        let mut frame = Frame::new(index);
        let mut invalid_landmarks = 0;

        let mut accept = |joint: Joint, raw: &RawLandmark| {
            match Landmark::new(raw.x, raw.y, raw.z, raw.visibility) {
                Some(landmark) => frame.insert(joint, landmark),
                None => invalid_landmarks += 1,
            }
        };

        match &self.landmarks {
            RawLandmarks::Named(map) => {
                for (name, raw) in map {
                    if let Some(joint) = Joint::from_name(name) {
                        accept(joint, raw);
                    }
                }
            }
            RawLandmarks::Indexed(list) => {
                for (i, raw) in list.iter().enumerate() {
                    if let (Some(joint), Some(raw)) = (Joint::from_index(i), raw) {
                        accept(joint, raw);
                    }
                }
            }
        }

        ValidatedFrame {
            frame,
            invalid_landmarks,
        }
    }
}
