//! Joint actuators and the dynamic joint tree bound to a pose shape.

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::math::EulerAngle;

/// A single-axis joint.
pub trait ScalarActuator: Send {
    fn set_angle(&mut self, angle: f64);
}

/// A three-axis (ball / cone) joint.
pub trait EulerActuator: Send {
    fn set_angle(&mut self, angle: EulerAngle);
}

impl<F: FnMut(f64) + Send> ScalarActuator for F {
    fn set_angle(&mut self, angle: f64) {
        self(angle)
    }
}

impl<F: FnMut(EulerAngle) + Send> EulerActuator for F {
    fn set_angle(&mut self, angle: EulerAngle) {
        self(angle)
    }
}

/// Leaf or branch kind of a joint tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointKind {
    Hinge,
    Cone,
    Branch,
}

impl fmt::Display for JointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JointKind::Hinge => "hinge",
            JointKind::Cone => "cone",
            JointKind::Branch => "branch",
        })
    }
}

/// A tree of actuators laid out like a pose.
///
/// Built at runtime (from an engine's scene, say) and checked against the
/// static pose type once, when it is bound to a rig.
pub enum JointNode {
    Hinge(Box<dyn ScalarActuator>),
    Cone(Box<dyn EulerActuator>),
    Branch(BTreeMap<String, JointNode>),
}

impl JointNode {
    pub fn hinge(actuator: impl ScalarActuator + 'static) -> Self {
        Self::Hinge(Box::new(actuator))
    }

    pub fn cone(actuator: impl EulerActuator + 'static) -> Self {
        Self::Cone(Box::new(actuator))
    }

    pub fn branch<K, I>(children: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, JointNode)>,
    {
        Self::Branch(
            children
                .into_iter()
                .map(|(name, node)| (name.into(), node))
                .collect(),
        )
    }

    pub fn kind(&self) -> JointKind {
        match self {
            Self::Hinge(_) => JointKind::Hinge,
            Self::Cone(_) => JointKind::Cone,
            Self::Branch(_) => JointKind::Branch,
        }
    }
}

impl fmt::Debug for JointNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hinge(_) => f.write_str("Hinge"),
            Self::Cone(_) => f.write_str("Cone"),
            Self::Branch(children) => f.debug_map().entries(children.iter()).finish(),
        }
    }
}

/// A joint tree whose layout differs from the pose it was bound to.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("joint tree does not match pose at `{path}`: expected {expected}, found {found}")]
pub struct ShapeMismatch {
    pub path: String,
    pub expected: String,
    pub found: String,
}

impl ShapeMismatch {
    pub fn new(path: &str, expected: impl fmt::Display, found: impl fmt::Display) -> Self {
        Self {
            path: display_path(path).to_string(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "<root>"
    } else {
        path
    }
}

/// Dotted path of `field` below `path`.
pub fn join_path(path: &str, field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{path}.{field}")
    }
}

/// Children of a branch node, checked to have exactly the given fields.
#[derive(Debug)]
pub struct BranchFields {
    path: String,
    children: BTreeMap<String, JointNode>,
}

impl BranchFields {
    pub fn open(node: JointNode, path: &str, fields: &[&str]) -> Result<Self, ShapeMismatch> {
        let children = match node {
            JointNode::Branch(children) => children,
            other => return Err(ShapeMismatch::new(path, JointKind::Branch, other.kind())),
        };

        if let Some(extra) = children.keys().find(|k| !fields.contains(&k.as_str())) {
            return Err(ShapeMismatch::new(
                &join_path(path, extra),
                "no joint",
                "unexpected field",
            ));
        }

        Ok(Self {
            path: path.to_string(),
            children,
        })
    }

    /// Remove one field and return it with its full path.
    pub fn take(&mut self, field: &str) -> Result<(JointNode, String), ShapeMismatch> {
        let path = join_path(&self.path, field);
        match self.children.remove(field) {
            Some(node) => Ok((node, path)),
            None => Err(ShapeMismatch::new(&path, "joint", "missing field")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_closures_are_actuators() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut node = JointNode::hinge(move |angle: f64| sink.lock().unwrap().push(angle));
        if let JointNode::Hinge(actuator) = &mut node {
            actuator.set_angle(12.5);
        }
        assert_eq!(*seen.lock().unwrap(), vec![12.5]);
    }

    #[test]
    fn test_branch_fields_reject_extra_and_missing() {
        let node = JointNode::branch([
            ("upper", JointNode::cone(|_: EulerAngle| {})),
            ("elbow", JointNode::hinge(|_: f64| {})),
        ]);
        let err = BranchFields::open(node, "arms.left", &["upper", "lower"]).unwrap_err();
        assert_eq!(err.path, "arms.left.elbow");

        let node = JointNode::branch([("upper", JointNode::cone(|_: EulerAngle| {}))]);
        let mut fields = BranchFields::open(node, "arms.left", &["upper", "lower"]).unwrap();
        assert!(fields.take("upper").is_ok());
        let err = fields.take("lower").unwrap_err();
        assert_eq!(err.path, "arms.left.lower");
        assert_eq!(err.found, "missing field");
    }

    #[test]
    fn test_leaf_where_branch_expected() {
        let err = BranchFields::open(JointNode::hinge(|_: f64| {}), "", &["head"]).unwrap_err();
        assert_eq!(err.path, "<root>");
        assert_eq!(err.expected, "branch");
        assert_eq!(err.found, "hinge");
    }
}
