//! Landmark identities and the schemas that number them.
//!
//! Two detector schemas are supported:
//! - COCO: 17 body points (PoseNet / MoveNet)
//! - BlazePose: 39 points including mouth, hands and feet
//!
//! COCO's names are a subset of BlazePose's, so a single [`Landmark`] type
//! covers both; the schema decides which ones exist and what wire id each has.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TrackingError;

/// A named anatomical point tracked by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Landmark {
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
    // BlazePose auxiliary points (region-of-interest helpers)
    #[serde(rename = "bodyCenter")]
    BodyCenter,
    #[serde(rename = "forehead")]
    Forehead,
    #[serde(rename = "leftThumb")]
    LeftThumbAux,
    #[serde(rename = "leftHand")]
    LeftHand,
    #[serde(rename = "rightThumb")]
    RightThumbAux,
    #[serde(rename = "rightHand")]
    RightHand,
}

impl Landmark {
    /// Every landmark, in BlazePose id order.
    pub const ALL: [Landmark; 39] = BLAZEPOSE;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nose => "nose",
            Self::LeftEyeInner => "left_eye_inner",
            Self::LeftEye => "left_eye",
            Self::LeftEyeOuter => "left_eye_outer",
            Self::RightEyeInner => "right_eye_inner",
            Self::RightEye => "right_eye",
            Self::RightEyeOuter => "right_eye_outer",
            Self::LeftEar => "left_ear",
            Self::RightEar => "right_ear",
            Self::MouthLeft => "mouth_left",
            Self::MouthRight => "mouth_right",
            Self::LeftShoulder => "left_shoulder",
            Self::RightShoulder => "right_shoulder",
            Self::LeftElbow => "left_elbow",
            Self::RightElbow => "right_elbow",
            Self::LeftWrist => "left_wrist",
            Self::RightWrist => "right_wrist",
            Self::LeftPinky => "left_pinky",
            Self::RightPinky => "right_pinky",
            Self::LeftIndex => "left_index",
            Self::RightIndex => "right_index",
            Self::LeftThumb => "left_thumb",
            Self::RightThumb => "right_thumb",
            Self::LeftHip => "left_hip",
            Self::RightHip => "right_hip",
            Self::LeftKnee => "left_knee",
            Self::RightKnee => "right_knee",
            Self::LeftAnkle => "left_ankle",
            Self::RightAnkle => "right_ankle",
            Self::LeftHeel => "left_heel",
            Self::RightHeel => "right_heel",
            Self::LeftFootIndex => "left_foot_index",
            Self::RightFootIndex => "right_foot_index",
            Self::BodyCenter => "bodyCenter",
            Self::Forehead => "forehead",
            Self::LeftThumbAux => "leftThumb",
            Self::LeftHand => "leftHand",
            Self::RightThumbAux => "rightThumb",
            Self::RightHand => "rightHand",
        }
    }
}

impl fmt::Display for Landmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Landmark {
    type Err = TrackingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Landmark::ALL
            .iter()
            .copied()
            .find(|landmark| landmark.as_str() == s)
            .ok_or_else(|| TrackingError::UnknownLandmark(s.to_string()))
    }
}

/// Body side. The left side inverts the local y axis when building limb
/// bases, which corrects for the mirrored handedness of the two chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn other(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    pub fn invert_local_y(self) -> bool {
        matches!(self, Side::Left)
    }

    fn pick(self, left: Landmark, right: Landmark) -> Landmark {
        match self {
            Side::Left => left,
            Side::Right => right,
        }
    }

    pub fn shoulder(self) -> Landmark {
        self.pick(Landmark::LeftShoulder, Landmark::RightShoulder)
    }

    pub fn hip(self) -> Landmark {
        self.pick(Landmark::LeftHip, Landmark::RightHip)
    }
}

/// The landmarks making up one limb chain on one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimbLandmarks {
    /// Proximal joint (shoulder / hip)
    pub root: Landmark,
    /// Same joint on the other side, defines the lateral axis
    pub root_other: Landmark,
    /// Middle joint (elbow / knee)
    pub middle: Landmark,
    /// Distal joint (wrist / ankle)
    pub end: Landmark,
    /// Points past the distal joint (thumb/index/pinky or heel/foot index)
    pub extremities: &'static [Landmark],
}

const LEFT_HAND: [Landmark; 3] = [Landmark::LeftThumb, Landmark::LeftIndex, Landmark::LeftPinky];
const RIGHT_HAND: [Landmark; 3] = [
    Landmark::RightThumb,
    Landmark::RightIndex,
    Landmark::RightPinky,
];
const LEFT_FOOT: [Landmark; 2] = [Landmark::LeftHeel, Landmark::LeftFootIndex];
const RIGHT_FOOT: [Landmark; 2] = [Landmark::RightHeel, Landmark::RightFootIndex];

impl LimbLandmarks {
    pub fn arm(side: Side) -> Self {
        match side {
            Side::Left => Self {
                root: Landmark::LeftShoulder,
                root_other: Landmark::RightShoulder,
                middle: Landmark::LeftElbow,
                end: Landmark::LeftWrist,
                extremities: &LEFT_HAND,
            },
            Side::Right => Self {
                root: Landmark::RightShoulder,
                root_other: Landmark::LeftShoulder,
                middle: Landmark::RightElbow,
                end: Landmark::RightWrist,
                extremities: &RIGHT_HAND,
            },
        }
    }

    pub fn leg(side: Side) -> Self {
        match side {
            Side::Left => Self {
                root: Landmark::LeftHip,
                root_other: Landmark::RightHip,
                middle: Landmark::LeftKnee,
                end: Landmark::LeftAnkle,
                extremities: &LEFT_FOOT,
            },
            Side::Right => Self {
                root: Landmark::RightHip,
                root_other: Landmark::LeftHip,
                middle: Landmark::RightKnee,
                end: Landmark::RightAnkle,
                extremities: &RIGHT_FOOT,
            },
        }
    }
}

/// Landmark numbering used by a detector model. Fixed for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LandmarkSchema {
    #[serde(rename = "COCO")]
    Coco,
    #[serde(rename = "BlazePose")]
    BlazePose,
}

impl Default for LandmarkSchema {
    fn default() -> Self {
        Self::BlazePose
    }
}

impl LandmarkSchema {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Coco => "COCO",
            Self::BlazePose => "BlazePose",
        }
    }

    /// Landmarks of this schema, indexed by wire id.
    pub fn landmarks(&self) -> &'static [Landmark] {
        match self {
            Self::Coco => &COCO,
            Self::BlazePose => &BLAZEPOSE,
        }
    }

    pub fn id_of(&self, landmark: Landmark) -> Option<i8> {
        self.landmarks()
            .iter()
            .position(|&l| l == landmark)
            .map(|index| index as i8)
    }

    pub fn landmark(&self, id: i8) -> Option<Landmark> {
        usize::try_from(id)
            .ok()
            .and_then(|index| self.landmarks().get(index).copied())
    }

    pub fn contains(&self, landmark: Landmark) -> bool {
        self.landmarks().contains(&landmark)
    }
}

impl fmt::Display for LandmarkSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LandmarkSchema {
    type Err = TrackingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COCO" => Ok(Self::Coco),
            "BlazePose" => Ok(Self::BlazePose),
            other => Err(TrackingError::UnknownSchema(other.to_string())),
        }
    }
}

const COCO: [Landmark; 17] = [
    Landmark::Nose,
    Landmark::LeftEye,
    Landmark::RightEye,
    Landmark::LeftEar,
    Landmark::RightEar,
    Landmark::LeftShoulder,
    Landmark::RightShoulder,
    Landmark::LeftElbow,
    Landmark::RightElbow,
    Landmark::LeftWrist,
    Landmark::RightWrist,
    Landmark::LeftHip,
    Landmark::RightHip,
    Landmark::LeftKnee,
    Landmark::RightKnee,
    Landmark::LeftAnkle,
    Landmark::RightAnkle,
];

const BLAZEPOSE: [Landmark; 39] = [
    Landmark::Nose,
    Landmark::LeftEyeInner,
    Landmark::LeftEye,
    Landmark::LeftEyeOuter,
    Landmark::RightEyeInner,
    Landmark::RightEye,
    Landmark::RightEyeOuter,
    Landmark::LeftEar,
    Landmark::RightEar,
    Landmark::MouthLeft,
    Landmark::MouthRight,
    Landmark::LeftShoulder,
    Landmark::RightShoulder,
    Landmark::LeftElbow,
    Landmark::RightElbow,
    Landmark::LeftWrist,
    Landmark::RightWrist,
    Landmark::LeftPinky,
    Landmark::RightPinky,
    Landmark::LeftIndex,
    Landmark::RightIndex,
    Landmark::LeftThumb,
    Landmark::RightThumb,
    Landmark::LeftHip,
    Landmark::RightHip,
    Landmark::LeftKnee,
    Landmark::RightKnee,
    Landmark::LeftAnkle,
    Landmark::RightAnkle,
    Landmark::LeftHeel,
    Landmark::RightHeel,
    Landmark::LeftFootIndex,
    Landmark::RightFootIndex,
    Landmark::BodyCenter,
    Landmark::Forehead,
    Landmark::LeftThumbAux,
    Landmark::LeftHand,
    Landmark::RightThumbAux,
    Landmark::RightHand,
];
