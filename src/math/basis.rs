//! Local coordinate frames and projection into them.

use glam::{DMat3, DVec3};

use crate::error::GeometryError;

/// Determinant magnitude below which a basis is treated as singular.
pub const SINGULAR_DETERMINANT: f64 = 1e-12;

/// Three vectors spanning a local frame. Not required to be orthonormal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Basis {
    pub x: DVec3,
    pub y: DVec3,
    pub z: DVec3,
}

impl Default for Basis {
    fn default() -> Self {
        Self::STANDARD
    }
}

impl Basis {
    /// The world axes.
    pub const STANDARD: Basis = Basis {
        x: DVec3::X,
        y: DVec3::Y,
        z: DVec3::Z,
    };

    pub fn new(x: DVec3, y: DVec3, z: DVec3) -> Self {
        Self { x, y, z }
    }

    /// Matrix whose columns are the basis vectors.
    pub fn to_matrix(&self) -> DMat3 {
        DMat3::from_cols(self.x, self.y, self.z)
    }

    pub fn determinant(&self) -> f64 {
        self.to_matrix().determinant()
    }

    pub fn is_singular(&self) -> bool {
        let det = self.determinant();
        !det.is_finite() || det.abs() < SINGULAR_DETERMINANT
    }
}

/// Express world-space `v` as coordinates in `basis`.
///
/// Solves `[x | y | z] · r = v` for `r`, i.e. the factors of the linear
/// combination of the basis vectors that produces `v`. A singular basis has no
/// unique solution and is reported instead of producing NaNs.
pub fn project_to_basis(v: DVec3, basis: &Basis) -> Result<DVec3, GeometryError> {
    let matrix = basis.to_matrix();
    let determinant = matrix.determinant();

    if !determinant.is_finite() || determinant.abs() < SINGULAR_DETERMINANT {
        return Err(GeometryError::SingularBasis { determinant });
    }

    let r = matrix.inverse() * v;
    if !r.is_finite() {
        return Err(GeometryError::SingularBasis { determinant });
    }

    Ok(r)
}
