use super::error::BoundaryError;
use nalgebra::{DMatrix, SMatrix, SVector};

pub type Vector<const D: usize> = SVector<f64, D>;
pub type Tensor<const D: usize> = SMatrix<f64, D, D>;

pub(crate) fn check_dimension<const D: usize>() -> Result<(), BoundaryError> {
    if D == 2 || D == 3 {
        Ok(())
    } else {
        Err(BoundaryError::UnsupportedDimension(D))
    }
}

pub(crate) fn check_finite<const D: usize>(
    v: &Vector<D>,
    what: &'static str,
) -> Result<(), BoundaryError> {
    if v.iter().all(|x| x.is_finite()) {
        Ok(())
    } else {
        Err(BoundaryError::NonFinite(what))
    }
}

/// Signed determinant of `m`.
pub fn determinant<const D: usize>(m: &Tensor<D>) -> f64 {
    DMatrix::from_column_slice(D, D, m.as_slice()).determinant()
}

pub fn inverse<const D: usize>(m: &Tensor<D>) -> Option<Tensor<D>> {
    DMatrix::from_column_slice(D, D, m.as_slice())
        .try_inverse()
        .map(|inv| Tensor::<D>::from_column_slice(inv.as_slice()))
}

/// Extents of the smallest axis-aligned box containing the parallelepiped
/// spanned by `edges`. Every vertex is a subset sum of the edges, so the
/// extent along an axis is the sum of the absolute edge components.
pub fn bounding_box<const D: usize>(edges: &[Vector<D>; D]) -> Vector<D> {
    edges
        .iter()
        .fold(Vector::<D>::zeros(), |acc, e| acc + e.abs())
}

/// Maps `x` into `[0, 1)`.
#[inline]
pub fn wrap_unit(x: f64) -> f64 {
    let w = x.rem_euclid(1.0);
    // rem_euclid of a tiny negative number rounds up to exactly 1.0
    if w >= 1.0 { 0.0 } else { w }
}

/// Snaps `x` onto the nearest integer when it lies within `tol` of it.
#[inline]
pub fn snap_to_integer(x: f64, tol: f64) -> f64 {
    let nearest = x.round();
    if (x - nearest).abs() < tol { nearest } else { x }
}
