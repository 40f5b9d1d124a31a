//! Depth inference: 2D landmark observations to 3D positions.
//!
//! A monocular detector only knows where a joint is on the image plane. The
//! [`StaticLimbLength`] unprojector recovers depth from the assumption that
//! limb segments have a fixed length: a segment that looks shorter than it
//! should must point toward the camera, by exactly the missing amount.

use glam::{DVec2, DVec3};
use std::collections::HashMap;

use super::frame::LandmarkObservation;
use super::landmarks::{Landmark, LimbLandmarks, Side};
use crate::config::{SegmentLengths, UnprojectorConfig, UnprojectorMode};

/// Frames between logs of the configured limb lengths.
const LENGTH_LOG_INTERVAL: u64 = 100;

/// A landmark placed in 3D.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Unprojected {
    pub position: DVec3,
    pub confidence: Option<f64>,
}

impl Unprojected {
    fn from_observation(obs: &LandmarkObservation) -> Self {
        Self {
            position: DVec3::new(obs.x, obs.y, obs.z.unwrap_or(0.0)),
            confidence: obs.confidence,
        }
    }

    /// Confidence with an absent value read as certain.
    pub fn confidence_or_certain(&self) -> f64 {
        self.confidence.unwrap_or(1.0)
    }
}

pub type UnprojectedFrame = HashMap<Landmark, Unprojected>;

/// Strategy turning one frame of observations into 3D positions.
pub trait Unprojector: Send {
    fn name(&self) -> &'static str;

    /// Landmarks that cannot be placed are left out of the result.
    fn unproject(&mut self, frame: &[LandmarkObservation]) -> UnprojectedFrame;
}

/// Build the unprojector selected in the config.
pub fn from_config(config: &UnprojectorConfig) -> Box<dyn Unprojector> {
    match config.mode {
        UnprojectorMode::Passthrough => Box::new(Passthrough),
        UnprojectorMode::StaticLimbLength => Box::new(StaticLimbLength::new(config)),
    }
}

/// For detectors that already estimate depth. Absent z reads as 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Unprojector for Passthrough {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn unproject(&mut self, frame: &[LandmarkObservation]) -> UnprojectedFrame {
        frame
            .iter()
            .map(|obs| (obs.landmark, Unprojected::from_observation(obs)))
            .collect()
    }
}

/// Monocular depth from fixed limb lengths.
///
/// Every point is re-centred on the shoulder midpoint and scaled by a
/// multiple of the shoulder distance, so the configured lengths are
/// independent of how far the subject stands from the camera.
pub struct StaticLimbLength {
    arms: SegmentLengths,
    legs: Option<SegmentLengths>,
    reference_scale: f64,
    vertical_offset: f64,
    min_confidence: f64,
    frames: u64,
}

impl StaticLimbLength {
    pub fn new(config: &UnprojectorConfig) -> Self {
        Self {
            arms: config.arms,
            legs: config.legs,
            reference_scale: config.reference_scale,
            vertical_offset: config.vertical_offset,
            min_confidence: config.min_confidence,
            frames: 0,
        }
    }

    /// Depth needed for a segment measuring `measured_sq` on the image plane
    /// to have true squared length `length_sq`.
    pub fn z_offset(measured_sq: f64, length_sq: f64) -> f64 {
        if measured_sq > length_sq {
            0.0
        } else {
            (length_sq - measured_sq).sqrt()
        }
    }

    /// Push the middle and end joint of one chain back from the root.
    fn unproject_chain(
        &self,
        positions: &mut UnprojectedFrame,
        chain: &LimbLandmarks,
        lengths: &SegmentLengths,
    ) {
        let Some(root) = positions.get(&chain.root).map(|u| u.position) else {
            return;
        };

        let Some(middle) = self.place(positions, chain.middle, root, lengths.upper_sq) else {
            return;
        };

        let Some(end) = self.place(positions, chain.end, middle, lengths.lower_sq) else {
            return;
        };

        for extremity in chain.extremities {
            if let Some(point) = positions.get_mut(extremity) {
                point.position.z = end.z;
            }
        }
    }

    fn place(
        &self,
        positions: &mut UnprojectedFrame,
        landmark: Landmark,
        parent: DVec3,
        length_sq: f64,
    ) -> Option<DVec3> {
        let point = positions.get_mut(&landmark)?;
        if point.confidence_or_certain() <= self.min_confidence {
            return None;
        }

        let measured_sq = parent.truncate().distance_squared(point.position.truncate());
        point.position.z = parent.z - Self::z_offset(measured_sq, length_sq);
        Some(point.position)
    }
}

impl Unprojector for StaticLimbLength {
    fn name(&self) -> &'static str {
        "static-limb-length"
    }

    fn unproject(&mut self, frame: &[LandmarkObservation]) -> UnprojectedFrame {
        self.frames += 1;
        if self.frames % LENGTH_LOG_INTERVAL == 0 {
            tracing::debug!(
                "Expected squared limb lengths: arms {:?}, legs {:?}",
                self.arms,
                self.legs
            );
        }

        let shoulder = |landmark| {
            frame
                .iter()
                .find(|o| o.landmark == landmark)
                .map(|o| DVec2::new(o.x, o.y))
        };

        let (Some(left), Some(right)) = (
            shoulder(Side::Left.shoulder()),
            shoulder(Side::Right.shoulder()),
        ) else {
            return UnprojectedFrame::new();
        };

        let center = (left + right) / 2.0;
        let reference = self.reference_scale * left.distance(right);
        if !(reference > 0.0) {
            tracing::debug!("Shoulders coincide, skipping frame");
            return UnprojectedFrame::new();
        }

        let mut positions: UnprojectedFrame = frame
            .iter()
            .map(|obs| {
                let x = 2.0 * (obs.x - center.x) / reference;
                let y = 2.0 * (obs.y - center.y) / reference + self.vertical_offset;
                let placed = Unprojected {
                    position: DVec3::new(x, y, 0.0),
                    confidence: obs.confidence,
                };
                (obs.landmark, placed)
            })
            .collect();

        for side in Side::BOTH {
            self.unproject_chain(&mut positions, &LimbLandmarks::arm(side), &self.arms);
            if let Some(legs) = &self.legs {
                self.unproject_chain(&mut positions, &LimbLandmarks::leg(side), legs);
            }
        }

        positions
    }
}
