//! Roll/pitch/yaw angles.
//!
//! Angles are in degrees. A rotation by `(roll, pitch, yaw)` rolls about x,
//! then pitches about the rolled y, then yaws about the twice-rotated z, which
//! as a matrix is `Rz(yaw) · Ry(pitch) · Rx(roll)`.

use glam::{DMat3, DVec3};
use serde::{Deserialize, Serialize};
use std::ops::Neg;

use super::basis::Basis;

/// Dot products below this count as perpendicular when checking the up hint.
const PERPENDICULAR_EPSILON: f64 = 1e-12;

/// Three-DOF rotation in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EulerAngle {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl EulerAngle {
    pub const ZERO: EulerAngle = EulerAngle::new(0.0, 0.0, 0.0);

    pub const fn new(roll: f64, pitch: f64, yaw: f64) -> Self {
        Self { roll, pitch, yaw }
    }

    pub fn from_array([roll, pitch, yaw]: [f64; 3]) -> Self {
        Self { roll, pitch, yaw }
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.roll, self.pitch, self.yaw]
    }

    pub fn is_finite(&self) -> bool {
        self.roll.is_finite() && self.pitch.is_finite() && self.yaw.is_finite()
    }

    /// Euclidean distance between the two angle triples.
    pub fn distance(&self, other: &EulerAngle) -> f64 {
        let d = [
            self.roll - other.roll,
            self.pitch - other.pitch,
            self.yaw - other.yaw,
        ];
        (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt()
    }

    pub fn approx_eq(&self, other: &EulerAngle, tolerance: f64) -> bool {
        self.distance(other) < tolerance
    }

    /// Rotation matrix `Rz(yaw) · Ry(pitch) · Rx(roll)`.
    pub fn to_matrix(self) -> DMat3 {
        DMat3::from_rotation_z(self.yaw.to_radians())
            * DMat3::from_rotation_y(self.pitch.to_radians())
            * DMat3::from_rotation_x(self.roll.to_radians())
    }
}

impl Neg for EulerAngle {
    type Output = EulerAngle;

    fn neg(self) -> Self::Output {
        EulerAngle::new(-self.roll, -self.pitch, -self.yaw)
    }
}

impl From<[f64; 3]> for EulerAngle {
    fn from(value: [f64; 3]) -> Self {
        Self::from_array(value)
    }
}

/// Rotate `v` by `angle`.
pub fn rotate(v: DVec3, angle: EulerAngle) -> DVec3 {
    angle.to_matrix() * v
}

/// Rotate a basis about its own axes.
///
/// The roll turns about `basis.x`, the pitch about `basis.y` and the yaw about
/// `basis.z`, composed in that order into one rotation which is then applied
/// to all three vectors. For the standard basis this is the same as calling
/// [`rotate`] on each axis.
pub fn rotate_basis(basis: &Basis, angle: EulerAngle) -> Basis {
    let m = axis_rotation(basis.z, angle.yaw)
        * axis_rotation(basis.y, angle.pitch)
        * axis_rotation(basis.x, angle.roll);

    Basis {
        x: m * basis.x,
        y: m * basis.y,
        z: m * basis.z,
    }
}

fn axis_rotation(axis: DVec3, degrees: f64) -> DMat3 {
    match axis.try_normalize() {
        Some(axis) => DMat3::from_axis_angle(axis, degrees.to_radians()),
        None => DMat3::IDENTITY,
    }
}

/// Find the angles that turn `+X` into `forward`, optionally rolled so that
/// the local `+Z` lines up with `up`.
///
/// Pitch and yaw come straight from `forward`. Roll is measured between `up`
/// and the up vector a zero-roll rotation would produce; its sign comes from
/// which side of that ideal up `up` falls on. `up` does not need to be exactly
/// perpendicular to `forward`; it is re-orthogonalized first. An `up` parallel
/// to `forward`, or no `up` at all, gives zero roll.
pub fn decompose_euler(forward: DVec3, up: Option<DVec3>) -> EulerAngle {
    let forward = forward.normalize_or_zero();

    let up = up.and_then(|up| {
        let up = up.try_normalize()?;
        if up.dot(forward).abs() > PERPENDICULAR_EPSILON {
            forward.cross(up).cross(forward).try_normalize()
        } else {
            Some(up)
        }
    });

    let xy_length = (forward.x * forward.x + forward.y * forward.y).sqrt();
    let pitch = (-forward.z).atan2(xy_length).to_degrees();
    let yaw = forward.y.atan2(forward.x).to_degrees();

    let roll = match up {
        Some(up) => {
            let ideal_up = rotate(DVec3::Z, EulerAngle::new(0.0, pitch, yaw));
            let ideal_right = forward.cross(ideal_up);
            let magnitude = ideal_up.dot(up).clamp(-1.0, 1.0).acos().to_degrees();
            let roll = if ideal_right.dot(up) < 0.0 {
                -magnitude
            } else {
                magnitude
            };
            if roll.is_nan() {
                0.0
            } else {
                roll
            }
        }
        None => 0.0,
    };

    EulerAngle::new(roll, pitch, yaw)
}
