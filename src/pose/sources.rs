//! Pose sources: motion capture and procedural idle motion.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::f64::consts::PI;
use std::marker::PhantomData;

use super::angles::{
    Bilateral, HumanPoseAngles, LimbPoseAngles, PartialHumanPose, PartialLimb, PoseTree,
};
use super::rig::PoseSource;
use crate::pipeline::PoseReader;

/// Maps a tracked human pose onto a creature's pose shape.
pub trait ControlType<P: PoseTree>: Send {
    fn project(&self, human: &PartialHumanPose) -> P::Partial;
}

/// Drives a humanoid rig one-to-one.
#[derive(Debug, Clone, Copy, Default)]
pub struct HumanControl;

impl ControlType<HumanPoseAngles> for HumanControl {
    fn project(&self, human: &PartialHumanPose) -> PartialHumanPose {
        *human
    }
}

/// Drives a pair of limbs (a two-armed creature, or a pair of fins) from the
/// tracked arms.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArmsControl;

impl ControlType<Bilateral<LimbPoseAngles>> for ArmsControl {
    fn project(&self, human: &PartialHumanPose) -> Bilateral<PartialLimb> {
        human.arms
    }
}

/// Applies the latest tracked pose to the rig every tick.
pub struct MotionPoseSource<P, C> {
    reader: PoseReader,
    control: C,
    _pose: PhantomData<fn() -> P>,
}

impl<P: PoseTree, C: ControlType<P>> MotionPoseSource<P, C> {
    pub fn new(reader: PoseReader, control: C) -> Self {
        Self {
            reader,
            control,
            _pose: PhantomData,
        }
    }
}

impl<P: PoseTree, C: ControlType<P>> PoseSource<P> for MotionPoseSource<P, C> {
    fn name(&self) -> &str {
        "motion"
    }

    fn update(&mut self, pose: &mut P, _dt: f64) {
        let human = self.reader.snapshot();
        pose.merge(&self.control.project(&human));
    }
}

/// Oscillation of one single-axis leaf.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointOscillation {
    pub mean: f64,
    pub amplitude: f64,
    /// Starting phase in half turns
    #[serde(default)]
    pub phase_offset: f64,
}

/// Sinusoidal idle motion on selected scalar leaves, addressed by dotted
/// path (`arms.left.upper.pitch`).
pub struct RhythmicSine {
    joints: BTreeMap<String, JointOscillation>,
    /// Half turns per second
    frequency: f64,
    phases: HashMap<String, f64>,
}

impl RhythmicSine {
    pub const DEFAULT_FREQUENCY: f64 = 0.5;

    pub fn new(joints: BTreeMap<String, JointOscillation>) -> Self {
        Self {
            joints,
            frequency: Self::DEFAULT_FREQUENCY,
            phases: HashMap::new(),
        }
    }

    pub fn with_frequency(mut self, frequency: f64) -> Self {
        self.frequency = frequency;
        self
    }
}

impl<P: PoseTree> PoseSource<P> for RhythmicSine {
    fn name(&self) -> &str {
        "rhythmic-sine"
    }

    fn update(&mut self, pose: &mut P, dt: f64) {
        let progress = self.frequency * dt;
        let joints = &self.joints;
        let phases = &mut self.phases;

        pose.visit_scalars_mut("", &mut |path, value| {
            if let Some(joint) = joints.get(path) {
                let phase = phases
                    .entry(path.to_string())
                    .or_insert(joint.phase_offset);
                *phase += progress;
                *value = (*phase * PI).sin() * joint.amplitude + joint.mean;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::EulerAngle;
    use crate::pipeline::PoseHandoff;
    use crate::pose::Rig;

    #[test]
    fn test_motion_source_merges_latest_pose() {
        let handoff = PoseHandoff::new();
        let mut rig = Rig::new(HumanPoseAngles::default())
            .with_source(MotionPoseSource::new(handoff.reader(), HumanControl));

        let mut update = PartialHumanPose::default();
        update.head = Some(EulerAngle::new(0.0, 12.0, -30.0));
        handoff.publish(&update);
        rig.update(0.016);

        assert_eq!(rig.current_pose().head, EulerAngle::new(0.0, 12.0, -30.0));
        assert_eq!(rig.current_pose().arms.left.upper, EulerAngle::ZERO);
    }

    #[test]
    fn test_arms_control_projects_arms_only() {
        let handoff = PoseHandoff::new();
        let mut rig = Rig::new(Bilateral::<LimbPoseAngles>::default())
            .with_source(MotionPoseSource::new(handoff.reader(), ArmsControl));

        let mut update = PartialHumanPose::default();
        update.arms.right.lower = Some(EulerAngle::new(0.0, -24.0, 0.0));
        update.legs.right.lower = Some(EulerAngle::new(0.0, 90.0, 0.0));
        handoff.publish(&update);
        rig.update(0.016);

        assert_eq!(rig.current_pose().right.lower, EulerAngle::new(0.0, -24.0, 0.0));
    }

    #[test]
    fn test_rhythmic_sine_oscillates_configured_leaf() {
        let mut joints = BTreeMap::new();
        joints.insert(
            "left".to_string(),
            JointOscillation {
                mean: 10.0,
                amplitude: 5.0,
                phase_offset: 0.0,
            },
        );
        let mut rig = Rig::new(Bilateral::new(0.0, 0.0)).with_source(RhythmicSine::new(joints));

        // 0.5 half turns per second, one second -> quarter period -> peak
        rig.update(1.0);
        assert!((rig.current_pose().left - 15.0).abs() < 1e-9);
        assert_eq!(rig.current_pose().right, 0.0);

        rig.update(2.0);
        assert!((rig.current_pose().left - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_rhythmic_sine_phase_offset() {
        let mut joints = BTreeMap::new();
        joints.insert(
            "arms.right.upper.pitch".to_string(),
            JointOscillation {
                mean: 0.0,
                amplitude: 20.0,
                phase_offset: 0.5,
            },
        );
        let mut rig = Rig::new(HumanPoseAngles::default()).with_source(RhythmicSine::new(joints));
        rig.update(0.0);
        assert!((rig.current_pose().arms.right.upper.pitch - 20.0).abs() < 1e-9);
        assert_eq!(rig.current_pose().arms.left.upper.pitch, 0.0);
    }
}
