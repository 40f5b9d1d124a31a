//! Basis algebra
//!
//! Small linear-algebra layer used by the kinematic decomposer:
//! - projecting world vectors into local (possibly skewed) bases
//! - roll/pitch/yaw composition and decomposition
//! - rotating a basis about its own axes

pub mod basis;
pub mod euler;

pub use basis::{project_to_basis, Basis};
pub use euler::{decompose_euler, rotate, rotate_basis, EulerAngle};
