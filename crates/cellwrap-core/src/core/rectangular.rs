use super::error::BoundaryError;
use super::linalg::{Vector, check_dimension, check_finite};

/// Orthogonal cell with an independent periodicity flag per axis.
///
/// Axes are independent, so both image operations are exact in one pass.
/// Non-periodic axes are left untouched by `nearest_image` and
/// `central_image`.
#[derive(Debug, Clone, PartialEq)]
pub struct RectangularCell<const D: usize> {
    dimensions: Vector<D>,
    periodic: [bool; D],
}

impl<const D: usize> RectangularCell<D> {
    pub fn new(dimensions: Vector<D>, periodic: [bool; D]) -> Result<Self, BoundaryError> {
        check_dimension::<D>()?;
        validate_box_size(&dimensions)?;
        Ok(Self {
            dimensions,
            periodic,
        })
    }

    pub fn dimensions(&self) -> &Vector<D> {
        &self.dimensions
    }

    pub fn periodic(&self) -> &[bool; D] {
        &self.periodic
    }

    pub fn volume(&self) -> f64 {
        self.dimensions.product()
    }

    pub fn edge_vector(&self, d: usize) -> Vector<D> {
        let mut edge = Vector::<D>::zeros();
        edge[d] = self.dimensions[d];
        edge
    }

    #[inline]
    pub fn nearest_image(&self, dr: &mut Vector<D>) {
        for i in 0..D {
            if self.periodic[i] {
                let l = self.dimensions[i];
                dr[i] -= l * (dr[i] / l).round();
            }
        }
    }

    /// Translation that brings every periodic component of `r` into
    /// `[-L/2, L/2)`.
    #[inline]
    pub fn central_image(&self, r: &Vector<D>) -> Vector<D> {
        let mut shift = Vector::<D>::zeros();
        for i in 0..D {
            if self.periodic[i] {
                let l = self.dimensions[i];
                shift[i] = -l * (r[i] / l + 0.5).floor();
            }
        }
        shift
    }

    /// Replaces the dimensions and returns the per-axis scale factors.
    pub(crate) fn set_dimensions(&mut self, dimensions: Vector<D>) -> Result<Vector<D>, BoundaryError> {
        validate_box_size(&dimensions)?;
        let scale = dimensions.component_div(&self.dimensions);
        self.dimensions = dimensions;
        Ok(scale)
    }
}

pub(crate) fn validate_box_size<const D: usize>(size: &Vector<D>) -> Result<(), BoundaryError> {
    check_finite(size, "box size")?;
    match size.iter().position(|&x| x <= 0.0) {
        Some(axis) => Err(BoundaryError::NonPositiveSize {
            axis,
            value: size[axis],
        }),
        None => Ok(()),
    }
}
