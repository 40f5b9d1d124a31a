//! Kinematic decomposition: 3D landmark positions to joint angles.
//!
//! Each limb is walked from the torso outward. A local basis is built for
//! the first segment, the segment's rotation is read off in that basis, and
//! the basis is then counter-rotated by that rotation to give the basis of
//! the next segment. Whatever cannot be computed (a missing landmark, a
//! degenerate basis) is left unset along with everything below it.

use glam::DVec3;
use std::collections::HashMap;

use super::landmarks::{Landmark, LimbLandmarks, Side};
use crate::config::DecomposerConfig;
use crate::math::{decompose_euler, project_to_basis, rotate, rotate_basis, Basis, EulerAngle};
use crate::pose::{PartialHumanPose, PartialLimb};

/// Yaw at the ends of the ear-to-ear fit, in degrees.
const HEAD_YAW_SCALE: f64 = 60.0;
const HEAD_YAW_EXPONENT: f64 = 0.63;

/// Turns a smoothed landmark map into a partial human pose.
#[derive(Debug, Clone)]
pub struct PoseDecomposer {
    roll_reference_min: f64,
    legs: bool,
}

impl Default for PoseDecomposer {
    fn default() -> Self {
        Self::new(&DecomposerConfig::default())
    }
}

impl PoseDecomposer {
    pub fn new(config: &DecomposerConfig) -> Self {
        Self {
            roll_reference_min: config.roll_reference_min,
            legs: config.legs,
        }
    }

    pub fn decompose(&self, landmarks: &HashMap<Landmark, DVec3>) -> PartialHumanPose {
        let mut pose = PartialHumanPose {
            head: decompose_head(landmarks),
            ..Default::default()
        };

        for side in Side::BOTH {
            *pose.arms.get_mut(side) = self.decompose_arm(landmarks, side);
            if self.legs {
                *pose.legs.get_mut(side) = self.decompose_leg(landmarks, side);
            }
        }

        drop_non_finite(&mut pose);
        pose
    }

    /// Arm basis: x from the other shoulder out through this one, z up the
    /// torso from hip to shoulder, y forward.
    fn decompose_arm(&self, landmarks: &HashMap<Landmark, DVec3>, side: Side) -> PartialLimb {
        let chain = LimbLandmarks::arm(side);
        let Some([root, other, hip, middle]) =
            require(landmarks, [chain.root, chain.root_other, side.hip(), chain.middle])
        else {
            return PartialLimb::default();
        };

        let x = (root - other).normalize_or_zero();
        let z = (root - hip).normalize_or_zero();
        let mut y = z.cross(x);
        if side.invert_local_y() {
            y = -y;
        }

        let wrist = landmarks.get(&chain.end).copied();
        let (mut limb, end_basis) =
            self.decompose_chain(&Basis::new(x, y, z), root, middle, wrist);

        if let (Some(basis), Some(wrist)) = (end_basis, wrist) {
            if let Some([thumb, index, pinky]) = require(landmarks, hand(side)) {
                limb.end.palm = palm_angles(&basis, wrist, thumb, index, pinky);
            }
        }

        limb
    }

    /// Leg basis: x down the torso from shoulder to hip, y from the other hip
    /// out through this one, z backward. A leg hanging straight down is the
    /// zero pose; flexing the hip forward is positive pitch.
    fn decompose_leg(&self, landmarks: &HashMap<Landmark, DVec3>, side: Side) -> PartialLimb {
        let chain = LimbLandmarks::leg(side);
        let Some([root, other, shoulder, middle]) =
            require(landmarks, [chain.root, chain.root_other, side.shoulder(), chain.middle])
        else {
            return PartialLimb::default();
        };

        let x = (root - shoulder).normalize_or_zero();
        let y = (root - other).normalize_or_zero();
        let mut z = x.cross(y);
        // the left leg mirrors its derived axis, like the left arm
        if side.invert_local_y() {
            z = -z;
        }

        let ankle = landmarks.get(&chain.end).copied();
        let (mut limb, end_basis) =
            self.decompose_chain(&Basis::new(x, y, z), root, middle, ankle);

        if let (Some(basis), Some(ankle)) = (end_basis, ankle) {
            if let Some(toe) = landmarks.get(&foot_index(side)) {
                limb.end.palm = segment_direction(*toe - ankle, &basis)
                    .map(|forward| decompose_euler(forward, None));
            }
        }

        limb
    }

    /// Upper and lower segment angles of a two-segment chain, plus the basis
    /// of whatever hangs off its end.
    fn decompose_chain(
        &self,
        basis_upper: &Basis,
        root: DVec3,
        middle: DVec3,
        end: Option<DVec3>,
    ) -> (PartialLimb, Option<Basis>) {
        let mut limb = PartialLimb::default();

        let Some(x_upper) = segment_direction(middle - root, basis_upper) else {
            return (limb, None);
        };
        let x_lower = end.and_then(|end| segment_direction(end - middle, basis_upper));

        // The middle joint only pitches, so the bend plane fixes the upper
        // segment's roll. A nearly straight chain has no usable bend plane.
        let roll_reference = x_lower.and_then(|x_lower| {
            let bend = x_lower - x_upper;
            if bend.length() < self.roll_reference_min {
                return None;
            }
            x_upper
                .cross(bend.normalize())
                .cross(x_upper)
                .try_normalize()
        });

        let upper = decompose_euler(x_upper, roll_reference);
        limb.upper = Some(upper);

        let Some(x_lower) = x_lower else {
            return (limb, None);
        };

        let basis_lower = rotate_basis(basis_upper, -upper);
        let lower = decompose_euler(rotate(x_lower, -upper), None);
        limb.lower = Some(lower);

        (limb, Some(rotate_basis(&basis_lower, -lower)))
    }
}

/// Palm orientation: forward toward the index finger, up out of the palm.
fn palm_angles(
    basis: &Basis,
    wrist: DVec3,
    thumb: DVec3,
    index: DVec3,
    pinky: DVec3,
) -> Option<EulerAngle> {
    let local = |point: DVec3| match project_to_basis(point - wrist, basis) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::debug!("Skipping palm: {}", e);
            None
        }
    };

    let thumb = local(thumb)?;
    let index = local(index)?;
    let pinky = local(pinky)?;
    let up = thumb.cross(pinky).try_normalize();

    Some(decompose_euler(index, up))
}

/// Head pitch and yaw from the nose's position between face landmarks.
///
/// Pitch: where the nose sits on the line from the mouth to the eyes, as a
/// time `t` (0 at the mouth, 1 at the eyes). Halfway is level; the curve
/// reaches 90 at `t = 1` and -90 at `t = -0.5`. Yaw: the same time along the
/// line from ear to ear, fitted to `60 * sign(u) * |u|^0.63`.
fn decompose_head(landmarks: &HashMap<Landmark, DVec3>) -> Option<EulerAngle> {
    let [mouth_left, mouth_right, nose, left_eye, right_eye, left_ear, right_ear] = require(
        landmarks,
        [
            Landmark::MouthLeft,
            Landmark::MouthRight,
            Landmark::Nose,
            Landmark::LeftEye,
            Landmark::RightEye,
            Landmark::LeftEar,
            Landmark::RightEar,
        ],
    )?;

    let mouth = (mouth_left + mouth_right) / 2.0;
    let eyes = (left_eye + right_eye) / 2.0;
    let pitch = head_pitch(signed_time(nose, mouth, eyes)?);
    let yaw = head_yaw(signed_time(nose, left_ear, right_ear)?);

    Some(EulerAngle::new(0.0, pitch, yaw))
}

fn head_pitch(t: f64) -> f64 {
    if t >= 0.5 {
        if t <= 1.0 {
            (2.0 * t - 1.0).asin().to_degrees()
        } else {
            90.0
        }
    } else if t >= -0.5 {
        (t - 0.5).asin().to_degrees()
    } else {
        -90.0
    }
}

fn head_yaw(t: f64) -> f64 {
    let u = (t - 0.5) / 1.5;
    HEAD_YAW_SCALE * u.signum() * u.abs().powf(HEAD_YAW_EXPONENT)
}

/// Signed position of `p` projected onto the line `a -> b`, 0 at `a` and 1
/// at `b`.
fn signed_time(p: DVec3, a: DVec3, b: DVec3) -> Option<f64> {
    let line = b - a;
    let length_sq = line.length_squared();
    if length_sq == 0.0 {
        return None;
    }
    Some((p - a).dot(line) / length_sq)
}

/// Unit direction of `v` in `basis`.
fn segment_direction(v: DVec3, basis: &Basis) -> Option<DVec3> {
    match project_to_basis(v, basis) {
        Ok(local) => local.try_normalize(),
        Err(e) => {
            tracing::debug!("Skipping segment: {}", e);
            None
        }
    }
}

fn require<const N: usize>(
    landmarks: &HashMap<Landmark, DVec3>,
    names: [Landmark; N],
) -> Option<[DVec3; N]> {
    let mut points = [DVec3::ZERO; N];
    for (point, name) in points.iter_mut().zip(names) {
        *point = *landmarks.get(&name)?;
    }
    Some(points)
}

fn hand(side: Side) -> [Landmark; 3] {
    match side {
        Side::Left => [Landmark::LeftThumb, Landmark::LeftIndex, Landmark::LeftPinky],
        Side::Right => [Landmark::RightThumb, Landmark::RightIndex, Landmark::RightPinky],
    }
}

fn foot_index(side: Side) -> Landmark {
    match side {
        Side::Left => Landmark::LeftFootIndex,
        Side::Right => Landmark::RightFootIndex,
    }
}

fn drop_non_finite(pose: &mut PartialHumanPose) {
    check_finite(&mut pose.head, "head");
    for side in Side::BOTH {
        let name = match side {
            Side::Left => "left",
            Side::Right => "right",
        };
        let limbs = [("arms", pose.arms.get_mut(side)), ("legs", pose.legs.get_mut(side))];
        for (group, limb) in limbs {
            check_finite(&mut limb.upper, &format!("{group}.{name}.upper"));
            check_finite(&mut limb.lower, &format!("{group}.{name}.lower"));
            check_finite(&mut limb.end.palm, &format!("{group}.{name}.end.palm"));
        }
    }
}

fn check_finite(angle: &mut Option<EulerAngle>, path: &str) {
    if let Some(value) = angle {
        if !value.is_finite() {
            tracing::warn!("Dropping non-finite angle at {}: {:?}", path, value);
            *angle = None;
        }
    }
}
