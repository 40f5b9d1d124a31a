//! The rig: a current pose, the sources that animate it, and the actuators
//! it drives.

use super::angles::PoseTree;
use super::joints::{JointNode, ShapeMismatch};
use crate::error::Result;

/// Something that moves a pose every tick.
pub trait PoseSource<P: PoseTree>: Send {
    fn name(&self) -> &str;

    /// Called once, before the first update. A failing source is dropped.
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// Mutate the pose for a tick of `dt` seconds.
    fn update(&mut self, pose: &mut P, dt: f64);
}

/// Owns the current pose of one creature and pushes it to its joints.
///
/// Sources are initialised lazily on the first [`Rig::update`], but a joint
/// tree is bound as soon as it is handed to [`Rig::control`] or
/// [`Rig::try_control`], so a tree of the wrong shape fails at wiring time.
/// Actuators see nothing until the next update.
pub struct Rig<P: PoseTree> {
    current_pose: P,
    sources: Vec<Box<dyn PoseSource<P>>>,
    joints: Option<P::Joints>,
    initialized: bool,
}

impl<P: PoseTree + Default> Default for Rig<P> {
    fn default() -> Self {
        Self::new(P::default())
    }
}

impl<P: PoseTree> Rig<P> {
    pub fn new(initial_pose: P) -> Self {
        Self {
            current_pose: initial_pose,
            sources: Vec::new(),
            joints: None,
            initialized: false,
        }
    }

    pub fn with_source(mut self, source: impl PoseSource<P> + 'static) -> Self {
        self.add_source(Box::new(source));
        self
    }

    pub fn add_source(&mut self, source: Box<dyn PoseSource<P>>) {
        tracing::debug!("Adding pose source: {}", source.name());
        self.sources.push(source);
    }

    pub fn current_pose(&self) -> &P {
        &self.current_pose
    }

    pub fn is_bound(&self) -> bool {
        self.joints.is_some()
    }

    /// Merge a partial pose into the current one.
    pub fn apply(&mut self, update: &P::Partial) {
        self.current_pose.merge(update);
    }

    /// Bind a joint tree now, replacing any previous binding.
    pub fn try_control(&mut self, tree: JointNode) -> std::result::Result<(), ShapeMismatch> {
        self.joints = Some(P::bind(tree, "")?);
        Ok(())
    }

    /// Bind a joint tree.
    ///
    /// # Panics
    ///
    /// Panics when the tree does not have the shape of `P`. A mismatched
    /// tree is a wiring bug, not a runtime condition.
    pub fn control(&mut self, tree: JointNode) {
        if let Err(mismatch) = self.try_control(tree) {
            panic!("{}", mismatch);
        }
    }

    /// Bind actuators that are already typed to this pose.
    pub fn control_typed(&mut self, joints: P::Joints) {
        self.joints = Some(joints);
    }

    /// Advance every source by `dt` seconds and push the result to the joints.
    pub fn update(&mut self, dt: f64) {
        if !self.initialized {
            self.sources.retain_mut(|source| match source.initialize() {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!("Pose source {} failed to initialize: {}", source.name(), e);
                    false
                }
            });
            self.initialized = true;
        }

        for source in &mut self.sources {
            source.update(&mut self.current_pose, dt);
        }

        if let Some(joints) = &mut self.joints {
            self.current_pose.drive(joints);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MarionetteError, TrackingError};
    use crate::math::EulerAngle;
    use crate::pose::angles::{Bilateral, HumanPoseAngles, PartialHumanPose};
    use std::sync::{Arc, Mutex};

    struct Nudge {
        initialized: Arc<Mutex<u32>>,
        fail: bool,
    }

    impl PoseSource<Bilateral<f64>> for Nudge {
        fn name(&self) -> &str {
            "nudge"
        }

        fn initialize(&mut self) -> Result<()> {
            *self.initialized.lock().unwrap() += 1;
            if self.fail {
                return Err(MarionetteError::Tracking(TrackingError::Receiver(
                    "camera unavailable".to_string(),
                )));
            }
            Ok(())
        }

        fn update(&mut self, pose: &mut Bilateral<f64>, dt: f64) {
            pose.left += dt;
        }
    }

    fn knee_tree(log: &Arc<Mutex<Vec<f64>>>) -> JointNode {
        let left = log.clone();
        let right = log.clone();
        JointNode::branch([
            ("left", JointNode::hinge(move |a: f64| left.lock().unwrap().push(a))),
            ("right", JointNode::hinge(move |a: f64| right.lock().unwrap().push(a))),
        ])
    }

    #[test]
    fn test_update_initializes_sources_once() {
        let count = Arc::new(Mutex::new(0));
        let mut rig = Rig::new(Bilateral::new(0.0, 0.0)).with_source(Nudge {
            initialized: count.clone(),
            fail: false,
        });

        rig.update(0.5);
        rig.update(0.25);

        assert_eq!(*count.lock().unwrap(), 1);
        assert!((rig.current_pose().left - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_failed_source_is_dropped() {
        let count = Arc::new(Mutex::new(0));
        let mut rig = Rig::new(Bilateral::new(0.0, 0.0)).with_source(Nudge {
            initialized: count.clone(),
            fail: true,
        });

        rig.update(1.0);
        rig.update(1.0);
        assert_eq!(rig.current_pose().left, 0.0);
    }

    #[test]
    fn test_update_drives_bound_joints() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut rig = Rig::new(Bilateral::new(5.0, -5.0));
        rig.control(knee_tree(&log));
        assert!(rig.is_bound());

        rig.update(0.016);
        rig.apply(&Bilateral::new(Some(30.0), None));
        rig.update(0.016);

        assert_eq!(*log.lock().unwrap(), vec![5.0, -5.0, 30.0, -5.0]);
    }

    #[test]
    fn test_binding_happens_before_first_update() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut rig = Rig::new(Bilateral::new(1.0, 2.0));
        rig.try_control(knee_tree(&log)).unwrap();

        assert!(rig.is_bound());
        assert!(log.lock().unwrap().is_empty());

        rig.update(0.0);
        assert_eq!(*log.lock().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_try_control_rejects_wrong_shape() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut rig: Rig<HumanPoseAngles> = Rig::default();
        let err = rig.try_control(knee_tree(&log)).unwrap_err();
        assert_eq!(err.path, "left");
        assert_eq!(err.found, "unexpected field");
        assert!(!rig.is_bound());
    }

    #[test]
    #[should_panic(expected = "joint tree does not match pose")]
    fn test_control_panics_on_wrong_shape() {
        let mut rig: Rig<Bilateral<f64>> = Rig::default();
        rig.control(JointNode::cone(|_: EulerAngle| {}));
    }

    #[test]
    fn test_apply_merges_partial() {
        let mut rig: Rig<HumanPoseAngles> = Rig::default();
        let mut update = PartialHumanPose::default();
        update.arms.left.upper = Some(EulerAngle::new(0.0, 15.0, 0.0));
        rig.apply(&update);
        assert_eq!(rig.current_pose().arms.left.upper.pitch, 15.0);
        assert_eq!(rig.current_pose().head, EulerAngle::ZERO);
    }
}
