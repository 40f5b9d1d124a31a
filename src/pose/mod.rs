//! Pose representation and actuation
//!
//! Typed pose trees, the joint actuator trees they are bound to, and the rig
//! that pushes a pose to its actuators every tick.

pub mod angles;
pub mod joints;
pub mod rig;
pub mod sources;

pub use angles::{
    Bilateral, HumanJoints, HumanPoseAngles, LimbEndPoseAngles, LimbPoseAngles, PartialHumanPose,
    PartialLimb, PartialLimbEnd, PartialPose, PoseTree,
};
pub use joints::{EulerActuator, JointKind, JointNode, ScalarActuator, ShapeMismatch};
pub use rig::{PoseSource, Rig};
pub use sources::{
    ArmsControl, ControlType, HumanControl, JointOscillation, MotionPoseSource, RhythmicSine,
};
