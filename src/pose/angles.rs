//! Typed pose trees.
//!
//! A pose is a tree whose leaves are joint angles: `f64` for a hinge,
//! [`EulerAngle`] for a ball joint. Every pose type has a partial twin in
//! which each leaf is optional; an absent leaf means "no opinion" and is
//! never read as zero. Merging a partial overwrites exactly the leaves it
//! carries.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use super::joints::{
    join_path, BranchFields, EulerActuator, JointKind, JointNode, ScalarActuator, ShapeMismatch,
};
use crate::math::EulerAngle;
use crate::tracking::Side;

/// A partial pose: any subset of a pose tree's leaves.
pub trait PartialPose: Clone + Default + Debug + Send + Sync + 'static {
    /// Copy every leaf `other` carries onto `self`.
    fn overlay(&mut self, other: &Self);

    fn is_empty(&self) -> bool;
}

impl<T> PartialPose for Option<T>
where
    T: Clone + Debug + Send + Sync + 'static,
{
    fn overlay(&mut self, other: &Self) {
        if let Some(value) = other {
            *self = Some(value.clone());
        }
    }

    fn is_empty(&self) -> bool {
        self.is_none()
    }
}

/// A complete pose tree with a fixed shape.
pub trait PoseTree: Clone + Debug + Send + Sync + 'static {
    type Partial: PartialPose;
    /// Actuators bound to this shape.
    type Joints: Send;

    /// Overwrite every leaf the partial carries.
    fn merge(&mut self, update: &Self::Partial);

    /// The whole pose as a partial with every leaf set.
    fn to_partial(&self) -> Self::Partial;

    /// Check a dynamic joint tree against this shape and take its actuators.
    fn bind(node: JointNode, path: &str) -> Result<Self::Joints, ShapeMismatch>;

    /// Build a joint tree of this shape, asking `leaf` for each actuator.
    fn joint_tree(path: &str, leaf: &mut dyn FnMut(&str, JointKind) -> JointNode) -> JointNode;

    /// Push every leaf to its actuator.
    fn drive(&self, joints: &mut Self::Joints);

    /// Visit every single-axis leaf with its dotted path.
    fn visit_scalars_mut(&mut self, path: &str, visitor: &mut dyn FnMut(&str, &mut f64));
}

impl PoseTree for f64 {
    type Partial = Option<f64>;
    type Joints = Box<dyn ScalarActuator>;

    fn merge(&mut self, update: &Self::Partial) {
        if let Some(value) = update {
            *self = *value;
        }
    }

    fn to_partial(&self) -> Self::Partial {
        Some(*self)
    }

    fn bind(node: JointNode, path: &str) -> Result<Self::Joints, ShapeMismatch> {
        match node {
            JointNode::Hinge(actuator) => Ok(actuator),
            other => Err(ShapeMismatch::new(path, JointKind::Hinge, other.kind())),
        }
    }

    fn joint_tree(path: &str, leaf: &mut dyn FnMut(&str, JointKind) -> JointNode) -> JointNode {
        leaf(path, JointKind::Hinge)
    }

    fn drive(&self, joints: &mut Self::Joints) {
        ScalarActuator::set_angle(joints.as_mut(), *self);
    }

    fn visit_scalars_mut(&mut self, path: &str, visitor: &mut dyn FnMut(&str, &mut f64)) {
        visitor(path, self);
    }
}

impl PoseTree for EulerAngle {
    type Partial = Option<EulerAngle>;
    type Joints = Box<dyn EulerActuator>;

    fn merge(&mut self, update: &Self::Partial) {
        if let Some(value) = update {
            *self = *value;
        }
    }

    fn to_partial(&self) -> Self::Partial {
        Some(*self)
    }

    fn bind(node: JointNode, path: &str) -> Result<Self::Joints, ShapeMismatch> {
        match node {
            JointNode::Cone(actuator) => Ok(actuator),
            other => Err(ShapeMismatch::new(path, JointKind::Cone, other.kind())),
        }
    }

    fn joint_tree(path: &str, leaf: &mut dyn FnMut(&str, JointKind) -> JointNode) -> JointNode {
        leaf(path, JointKind::Cone)
    }

    fn drive(&self, joints: &mut Self::Joints) {
        EulerActuator::set_angle(joints.as_mut(), *self);
    }

    fn visit_scalars_mut(&mut self, path: &str, visitor: &mut dyn FnMut(&str, &mut f64)) {
        visitor(&join_path(path, "roll"), &mut self.roll);
        visitor(&join_path(path, "pitch"), &mut self.pitch);
        visitor(&join_path(path, "yaw"), &mut self.yaw);
    }
}

/// A left/right pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bilateral<T> {
    pub left: T,
    pub right: T,
}

impl<T> Bilateral<T> {
    pub fn new(left: T, right: T) -> Self {
        Self { left, right }
    }

    pub fn get(&self, side: Side) -> &T {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn get_mut(&mut self, side: Side) -> &mut T {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }
}

impl<T: PartialPose> PartialPose for Bilateral<T> {
    fn overlay(&mut self, other: &Self) {
        self.left.overlay(&other.left);
        self.right.overlay(&other.right);
    }

    fn is_empty(&self) -> bool {
        self.left.is_empty() && self.right.is_empty()
    }
}

impl<T: PoseTree> PoseTree for Bilateral<T> {
    type Partial = Bilateral<T::Partial>;
    type Joints = Bilateral<T::Joints>;

    fn merge(&mut self, update: &Self::Partial) {
        self.left.merge(&update.left);
        self.right.merge(&update.right);
    }

    fn to_partial(&self) -> Self::Partial {
        Bilateral::new(self.left.to_partial(), self.right.to_partial())
    }

    fn bind(node: JointNode, path: &str) -> Result<Self::Joints, ShapeMismatch> {
        let mut fields = BranchFields::open(node, path, &["left", "right"])?;
        let (left, left_path) = fields.take("left")?;
        let (right, right_path) = fields.take("right")?;
        Ok(Bilateral::new(T::bind(left, &left_path)?, T::bind(right, &right_path)?))
    }

    fn joint_tree(path: &str, leaf: &mut dyn FnMut(&str, JointKind) -> JointNode) -> JointNode {
        JointNode::branch([
            ("left", T::joint_tree(&join_path(path, "left"), leaf)),
            ("right", T::joint_tree(&join_path(path, "right"), leaf)),
        ])
    }

    fn drive(&self, joints: &mut Self::Joints) {
        self.left.drive(&mut joints.left);
        self.right.drive(&mut joints.right);
    }

    fn visit_scalars_mut(&mut self, path: &str, visitor: &mut dyn FnMut(&str, &mut f64)) {
        self.left.visit_scalars_mut(&join_path(path, "left"), visitor);
        self.right.visit_scalars_mut(&join_path(path, "right"), visitor);
    }
}

/// Angles past the distal joint of a limb.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LimbEndPoseAngles {
    pub palm: EulerAngle,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialLimbEnd {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub palm: Option<EulerAngle>,
}

impl PartialPose for PartialLimbEnd {
    fn overlay(&mut self, other: &Self) {
        self.palm.overlay(&other.palm);
    }

    fn is_empty(&self) -> bool {
        self.palm.is_none()
    }
}

impl PoseTree for LimbEndPoseAngles {
    type Partial = PartialLimbEnd;
    type Joints = LimbEndJoints;

    fn merge(&mut self, update: &Self::Partial) {
        self.palm.merge(&update.palm);
    }

    fn to_partial(&self) -> Self::Partial {
        PartialLimbEnd {
            palm: self.palm.to_partial(),
        }
    }

    fn bind(node: JointNode, path: &str) -> Result<Self::Joints, ShapeMismatch> {
        let mut fields = BranchFields::open(node, path, &["palm"])?;
        let (palm, palm_path) = fields.take("palm")?;
        Ok(LimbEndJoints {
            palm: EulerAngle::bind(palm, &palm_path)?,
        })
    }

    fn joint_tree(path: &str, leaf: &mut dyn FnMut(&str, JointKind) -> JointNode) -> JointNode {
        JointNode::branch([("palm", EulerAngle::joint_tree(&join_path(path, "palm"), leaf))])
    }

    fn drive(&self, joints: &mut Self::Joints) {
        self.palm.drive(&mut joints.palm);
    }

    fn visit_scalars_mut(&mut self, path: &str, visitor: &mut dyn FnMut(&str, &mut f64)) {
        self.palm.visit_scalars_mut(&join_path(path, "palm"), visitor);
    }
}

pub struct LimbEndJoints {
    pub palm: Box<dyn EulerActuator>,
}

/// One arm or leg: upper segment, lower segment and the hand or foot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LimbPoseAngles {
    pub upper: EulerAngle,
    pub lower: EulerAngle,
    pub end: LimbEndPoseAngles,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialLimb {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<EulerAngle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<EulerAngle>,
    #[serde(default)]
    pub end: PartialLimbEnd,
}

impl PartialPose for PartialLimb {
    fn overlay(&mut self, other: &Self) {
        self.upper.overlay(&other.upper);
        self.lower.overlay(&other.lower);
        self.end.overlay(&other.end);
    }

    fn is_empty(&self) -> bool {
        self.upper.is_none() && self.lower.is_none() && self.end.is_empty()
    }
}

impl PoseTree for LimbPoseAngles {
    type Partial = PartialLimb;
    type Joints = LimbJoints;

    fn merge(&mut self, update: &Self::Partial) {
        self.upper.merge(&update.upper);
        self.lower.merge(&update.lower);
        self.end.merge(&update.end);
    }

    fn to_partial(&self) -> Self::Partial {
        PartialLimb {
            upper: self.upper.to_partial(),
            lower: self.lower.to_partial(),
            end: self.end.to_partial(),
        }
    }

    fn bind(node: JointNode, path: &str) -> Result<Self::Joints, ShapeMismatch> {
        let mut fields = BranchFields::open(node, path, &["upper", "lower", "end"])?;
        let (upper, upper_path) = fields.take("upper")?;
        let (lower, lower_path) = fields.take("lower")?;
        let (end, end_path) = fields.take("end")?;
        Ok(LimbJoints {
            upper: EulerAngle::bind(upper, &upper_path)?,
            lower: EulerAngle::bind(lower, &lower_path)?,
            end: LimbEndPoseAngles::bind(end, &end_path)?,
        })
    }

    fn joint_tree(path: &str, leaf: &mut dyn FnMut(&str, JointKind) -> JointNode) -> JointNode {
        JointNode::branch([
            ("upper", EulerAngle::joint_tree(&join_path(path, "upper"), leaf)),
            ("lower", EulerAngle::joint_tree(&join_path(path, "lower"), leaf)),
            ("end", LimbEndPoseAngles::joint_tree(&join_path(path, "end"), leaf)),
        ])
    }

    fn drive(&self, joints: &mut Self::Joints) {
        self.upper.drive(&mut joints.upper);
        self.lower.drive(&mut joints.lower);
        self.end.drive(&mut joints.end);
    }

    fn visit_scalars_mut(&mut self, path: &str, visitor: &mut dyn FnMut(&str, &mut f64)) {
        self.upper.visit_scalars_mut(&join_path(path, "upper"), visitor);
        self.lower.visit_scalars_mut(&join_path(path, "lower"), visitor);
        self.end.visit_scalars_mut(&join_path(path, "end"), visitor);
    }
}

pub struct LimbJoints {
    pub upper: Box<dyn EulerActuator>,
    pub lower: Box<dyn EulerActuator>,
    pub end: LimbEndJoints,
}

/// Whole-body pose of a humanoid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HumanPoseAngles {
    pub head: EulerAngle,
    pub arms: Bilateral<LimbPoseAngles>,
    pub legs: Bilateral<LimbPoseAngles>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialHumanPose {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<EulerAngle>,
    #[serde(default)]
    pub arms: Bilateral<PartialLimb>,
    #[serde(default)]
    pub legs: Bilateral<PartialLimb>,
}

impl PartialPose for PartialHumanPose {
    fn overlay(&mut self, other: &Self) {
        self.head.overlay(&other.head);
        self.arms.overlay(&other.arms);
        self.legs.overlay(&other.legs);
    }

    fn is_empty(&self) -> bool {
        self.head.is_none() && self.arms.is_empty() && self.legs.is_empty()
    }
}

impl PoseTree for HumanPoseAngles {
    type Partial = PartialHumanPose;
    type Joints = HumanJoints;

    fn merge(&mut self, update: &Self::Partial) {
        self.head.merge(&update.head);
        self.arms.merge(&update.arms);
        self.legs.merge(&update.legs);
    }

    fn to_partial(&self) -> Self::Partial {
        PartialHumanPose {
            head: self.head.to_partial(),
            arms: self.arms.to_partial(),
            legs: self.legs.to_partial(),
        }
    }

    fn bind(node: JointNode, path: &str) -> Result<Self::Joints, ShapeMismatch> {
        let mut fields = BranchFields::open(node, path, &["head", "arms", "legs"])?;
        let (head, head_path) = fields.take("head")?;
        let (arms, arms_path) = fields.take("arms")?;
        let (legs, legs_path) = fields.take("legs")?;
        Ok(HumanJoints {
            head: EulerAngle::bind(head, &head_path)?,
            arms: Bilateral::<LimbPoseAngles>::bind(arms, &arms_path)?,
            legs: Bilateral::<LimbPoseAngles>::bind(legs, &legs_path)?,
        })
    }

    fn joint_tree(path: &str, leaf: &mut dyn FnMut(&str, JointKind) -> JointNode) -> JointNode {
        JointNode::branch([
            ("head", EulerAngle::joint_tree(&join_path(path, "head"), leaf)),
            (
                "arms",
                Bilateral::<LimbPoseAngles>::joint_tree(&join_path(path, "arms"), leaf),
            ),
            (
                "legs",
                Bilateral::<LimbPoseAngles>::joint_tree(&join_path(path, "legs"), leaf),
            ),
        ])
    }

    fn drive(&self, joints: &mut Self::Joints) {
        self.head.drive(&mut joints.head);
        self.arms.drive(&mut joints.arms);
        self.legs.drive(&mut joints.legs);
    }

    fn visit_scalars_mut(&mut self, path: &str, visitor: &mut dyn FnMut(&str, &mut f64)) {
        self.head.visit_scalars_mut(&join_path(path, "head"), visitor);
        self.arms.visit_scalars_mut(&join_path(path, "arms"), visitor);
        self.legs.visit_scalars_mut(&join_path(path, "legs"), visitor);
    }
}

pub struct HumanJoints {
    pub head: Box<dyn EulerActuator>,
    pub arms: Bilateral<LimbJoints>,
    pub legs: Bilateral<LimbJoints>,
}
