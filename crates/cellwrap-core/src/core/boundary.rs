use super::deformable::{DeformableCell, Tolerances};
use super::error::BoundaryError;
use super::events::{BoundaryEvent, BoundaryEventManager};
use super::linalg::{Tensor, Vector, check_dimension};
use super::rectangular::RectangularCell;
use crate::config::{BoundaryConfig, ConfigError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, instrument};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryKind {
    /// Rectangular, periodic along every axis.
    Periodic,
    /// Rectangular, periodic along every axis except one.
    Slit,
    /// Rectangular, periodic along a single axis only.
    Pore,
    /// Rectangular, no periodic axes.
    Nonperiodic,
    /// Arbitrary parallelepiped, periodic along every edge.
    Deformable,
}

impl BoundaryKind {
    pub fn is_rectangular(&self) -> bool {
        !matches!(self, BoundaryKind::Deformable)
    }
}

impl fmt::Display for BoundaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BoundaryKind::Periodic => "periodic",
            BoundaryKind::Slit => "slit",
            BoundaryKind::Pore => "pore",
            BoundaryKind::Nonperiodic => "nonperiodic",
            BoundaryKind::Deformable => "deformable",
        };
        f.write_str(name)
    }
}

/// Geometry of a simulation cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell<const D: usize> {
    Rectangular(RectangularCell<D>),
    Deformable(DeformableCell<D>),
}

impl<const D: usize> Cell<D> {
    pub fn volume(&self) -> f64 {
        match self {
            Cell::Rectangular(cell) => cell.volume(),
            Cell::Deformable(cell) => cell.volume(),
        }
    }

    pub fn box_size(&self) -> Vector<D> {
        match self {
            Cell::Rectangular(cell) => *cell.dimensions(),
            Cell::Deformable(cell) => cell.box_size(),
        }
    }

    /// # Panics
    ///
    /// Panics if `d >= D`.
    pub fn edge_vector(&self, d: usize) -> Vector<D> {
        match self {
            Cell::Rectangular(cell) => cell.edge_vector(d),
            Cell::Deformable(cell) => cell.edge_vector(d),
        }
    }

    /// # Panics
    ///
    /// Panics if `d >= D`.
    pub fn periodicity(&self, d: usize) -> bool {
        match self {
            Cell::Rectangular(cell) => cell.periodic()[d],
            Cell::Deformable(_) => {
                assert!(d < D, "dimension index {d} out of range for a {D}D cell");
                true
            }
        }
    }

    #[inline]
    pub fn nearest_image(&self, dr: &mut Vector<D>) {
        match self {
            Cell::Rectangular(cell) => cell.nearest_image(dr),
            Cell::Deformable(cell) => cell.nearest_image(dr),
        }
    }

    #[inline]
    pub fn central_image(&self, r: &Vector<D>) -> Vector<D> {
        match self {
            Cell::Rectangular(cell) => cell.central_image(r),
            Cell::Deformable(cell) => cell.central_image(r),
        }
    }

    /// Non-zero integer combinations of the periodic edges with every
    /// coefficient in `-n_shells..=n_shells`, last edge varying fastest.
    pub fn image_origins(&self, n_shells: usize) -> Vec<Vector<D>> {
        let edges: Vec<Vector<D>> = (0..D)
            .filter(|&d| self.periodicity(d))
            .map(|d| self.edge_vector(d))
            .collect();
        lattice_translations(&edges, n_shells)
    }
}

fn lattice_translations<const D: usize>(edges: &[Vector<D>], n_shells: usize) -> Vec<Vector<D>> {
    if edges.is_empty() || n_shells == 0 {
        return Vec::new();
    }
    let n = n_shells as i64;
    let total = (2 * n_shells + 1).pow(edges.len() as u32);
    let mut origins = Vec::with_capacity(total - 1);
    let mut coefficients = vec![-n; edges.len()];

    for _ in 0..total {
        if coefficients.iter().any(|&k| k != 0) {
            let origin = edges
                .iter()
                .zip(&coefficients)
                .fold(Vector::<D>::zeros(), |acc, (e, &k)| acc + e * k as f64);
            origins.push(origin);
        }
        for k in coefficients.iter_mut().rev() {
            if *k < n {
                *k += 1;
                break;
            }
            *k = -n;
        }
    }
    origins
}

/// Serializable snapshot of a boundary: the edge matrix as a flat,
/// edge-after-edge array of `D * D` values plus one periodicity flag per
/// dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryState {
    pub edges: Vec<f64>,
    pub periodic: Vec<bool>,
}

/// Periodic (or partially periodic) boundary of one simulation cell.
///
/// Reads (`nearest_image`, `central_image`, ...) take `&self` and never
/// allocate; mutations take `&mut self`, validate their input before touching
/// any cached state, and notify registered listeners once the new geometry is
/// in place.
pub struct Boundary<const D: usize> {
    kind: BoundaryKind,
    cell: Cell<D>,
    events: BoundaryEventManager<D>,
}

pub type Boundary2 = Boundary<2>;
pub type Boundary3 = Boundary<3>;

impl<const D: usize> Boundary<D> {
    fn from_cell(kind: BoundaryKind, cell: Cell<D>) -> Self {
        info!(
            %kind,
            dimension = D,
            volume = cell.volume(),
            "Created boundary"
        );
        Self {
            kind,
            cell,
            events: BoundaryEventManager::new(),
        }
    }

    fn rectangular(
        kind: BoundaryKind,
        dimensions: Vector<D>,
        periodic: [bool; D],
    ) -> Result<Self, BoundaryError> {
        let cell = RectangularCell::new(dimensions, periodic)?;
        Ok(Self::from_cell(kind, Cell::Rectangular(cell)))
    }

    fn check_axis(axis: usize) -> Result<(), BoundaryError> {
        check_dimension::<D>()?;
        if axis < D {
            Ok(())
        } else {
            Err(BoundaryError::IndexOutOfRange {
                index: axis,
                dimension: D,
            })
        }
    }

    pub fn periodic(dimensions: Vector<D>) -> Result<Self, BoundaryError> {
        Self::rectangular(BoundaryKind::Periodic, dimensions, [true; D])
    }

    pub fn cubic(side: f64) -> Result<Self, BoundaryError> {
        Self::periodic(Vector::<D>::repeat(side))
    }

    /// Periodic along every axis except `slit_axis`.
    pub fn slit(dimensions: Vector<D>, slit_axis: usize) -> Result<Self, BoundaryError> {
        Self::check_axis(slit_axis)?;
        let mut periodic = [true; D];
        periodic[slit_axis] = false;
        Self::rectangular(BoundaryKind::Slit, dimensions, periodic)
    }

    /// Periodic along `pore_axis` only.
    pub fn pore(dimensions: Vector<D>, pore_axis: usize) -> Result<Self, BoundaryError> {
        Self::check_axis(pore_axis)?;
        let mut periodic = [false; D];
        periodic[pore_axis] = true;
        Self::rectangular(BoundaryKind::Pore, dimensions, periodic)
    }

    pub fn nonperiodic(dimensions: Vector<D>) -> Result<Self, BoundaryError> {
        Self::rectangular(BoundaryKind::Nonperiodic, dimensions, [false; D])
    }

    pub fn deformable(edges: [Vector<D>; D]) -> Result<Self, BoundaryError> {
        let cell = DeformableCell::new(edges)?;
        Ok(Self::from_cell(BoundaryKind::Deformable, Cell::Deformable(cell)))
    }

    pub fn deformable_with_options(
        edges: [Vector<D>; D],
        tolerances: Tolerances,
        truncation_radius: f64,
    ) -> Result<Self, BoundaryError> {
        let cell = DeformableCell::with_options(edges, tolerances, truncation_radius)?;
        Ok(Self::from_cell(BoundaryKind::Deformable, Cell::Deformable(cell)))
    }

    pub fn from_config(config: &BoundaryConfig) -> Result<Self, BoundaryError> {
        config.validate()?;
        if config.dimension != D {
            return Err(ConfigError::DimensionMismatch {
                expected: D,
                found: config.dimension,
            }
            .into());
        }

        match config.kind {
            BoundaryKind::Deformable => {
                let rows = config
                    .edges
                    .as_ref()
                    .ok_or(ConfigError::MissingParameter("edges"))?;
                let edges: [Vector<D>; D] =
                    std::array::from_fn(|d| Vector::<D>::from_column_slice(&rows[d]));
                Self::deformable_with_options(
                    edges,
                    config.tolerances.unwrap_or_default(),
                    config.truncation_radius.unwrap_or(f64::INFINITY),
                )
            }
            kind => {
                let size = config
                    .box_size
                    .as_ref()
                    .ok_or(ConfigError::MissingParameter("box_size"))?;
                let dimensions = Vector::<D>::from_column_slice(size);
                let axis = || config.axis.ok_or(ConfigError::MissingParameter("axis"));
                match kind {
                    BoundaryKind::Periodic => Self::periodic(dimensions),
                    BoundaryKind::Slit => Self::slit(dimensions, axis()?),
                    BoundaryKind::Pore => Self::pore(dimensions, axis()?),
                    _ => Self::nonperiodic(dimensions),
                }
            }
        }
    }

    pub fn kind(&self) -> BoundaryKind {
        self.kind
    }

    pub fn dimension(&self) -> usize {
        D
    }

    pub fn cell(&self) -> &Cell<D> {
        &self.cell
    }

    pub fn volume(&self) -> f64 {
        self.cell.volume()
    }

    /// Extents of the smallest axis-aligned box containing the cell.
    pub fn box_size(&self) -> Vector<D> {
        self.cell.box_size()
    }

    /// # Panics
    ///
    /// Panics if `d >= D`.
    pub fn edge_vector(&self, d: usize) -> Vector<D> {
        self.cell.edge_vector(d)
    }

    /// # Panics
    ///
    /// Panics if `d >= D`.
    pub fn periodicity(&self, d: usize) -> bool {
        self.cell.periodicity(d)
    }

    /// Geometric center of the primary cell.
    pub fn center(&self) -> Vector<D> {
        Vector::<D>::zeros()
    }

    /// Replaces `dr` by its shortest periodic image.
    #[inline]
    pub fn nearest_image(&self, dr: &mut Vector<D>) {
        self.cell.nearest_image(dr);
    }

    /// Applies [`Boundary::nearest_image`] to every displacement in place.
    pub fn nearest_images(&self, displacements: &mut [Vector<D>]) {
        let cell = &self.cell;
        #[cfg(feature = "parallel")]
        displacements
            .par_iter_mut()
            .for_each(|dr| cell.nearest_image(dr));
        #[cfg(not(feature = "parallel"))]
        displacements
            .iter_mut()
            .for_each(|dr| cell.nearest_image(dr));
    }

    /// Translation `T` such that `r + T` is the canonical image of `r` in the
    /// primary cell.
    #[inline]
    pub fn central_image(&self, r: &Vector<D>) -> Vector<D> {
        self.cell.central_image(r)
    }

    pub fn image_origins(&self, n_shells: usize) -> Vec<Vector<D>> {
        self.cell.image_origins(n_shells)
    }

    /// Uniformly distributed point inside the primary cell.
    pub fn random_position<R: Rng>(&self, rng: &mut R) -> Vector<D> {
        let u = Vector::<D>::from_fn(|_, _| rng.gen_range(-0.5..0.5));
        match &self.cell {
            Cell::Rectangular(cell) => u.component_mul(cell.dimensions()),
            Cell::Deformable(cell) => cell.to_cartesian(&u),
        }
    }

    /// Transform vectors used by the deformable reduction; `None` for
    /// rectangular cells, which reduce axis by axis.
    pub fn transform_vectors(&self) -> Option<&[Vector<D>]> {
        match &self.cell {
            Cell::Rectangular(_) => None,
            Cell::Deformable(cell) => Some(cell.transform_vectors()),
        }
    }

    pub fn truncation_radius(&self) -> Option<f64> {
        match &self.cell {
            Cell::Deformable(cell) if cell.truncation_radius().is_finite() => {
                Some(cell.truncation_radius())
            }
            _ => None,
        }
    }

    pub fn events(&self) -> &BoundaryEventManager<D> {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut BoundaryEventManager<D> {
        &mut self.events
    }

    fn deformable_mut(&mut self, operation: &'static str) -> Result<&mut DeformableCell<D>, BoundaryError> {
        match &mut self.cell {
            Cell::Deformable(cell) => Ok(cell),
            Cell::Rectangular(_) => Err(BoundaryError::NotDeformable(operation)),
        }
    }

    fn notify(&mut self, event: BoundaryEvent<D>) {
        self.events.fire(&event, &self.cell);
    }

    /// Rescales the cell so its bounding box becomes `size`, keeping its
    /// shape.
    #[instrument(level = "debug", skip_all)]
    pub fn set_box_size(&mut self, size: Vector<D>) -> Result<(), BoundaryError> {
        let scale = match &mut self.cell {
            Cell::Rectangular(cell) => cell.set_dimensions(size)?,
            Cell::Deformable(cell) => cell.set_box_size(&size)?,
        };
        self.notify(BoundaryEvent::Inflated { scale });
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(index = d))]
    pub fn set_edge_vector(&mut self, d: usize, edge: Vector<D>) -> Result<(), BoundaryError> {
        self.deformable_mut("set_edge_vector")?
            .set_edge_vector(d, edge)?;
        self.notify(BoundaryEvent::EdgeChanged { index: d });
        Ok(())
    }

    /// Applies `tensor` to every edge vector.
    #[instrument(level = "debug", skip_all)]
    pub fn deform(&mut self, tensor: &Tensor<D>) -> Result<(), BoundaryError> {
        self.deformable_mut("deform")?.deform(tensor)?;
        self.notify(BoundaryEvent::Deformed { tensor: *tensor });
        Ok(())
    }

    /// Sets the interaction cutoff used to prune transform vectors;
    /// `f64::INFINITY` disables pruning.
    #[instrument(level = "debug", skip_all, fields(radius = radius))]
    pub fn set_truncation_radius(&mut self, radius: f64) -> Result<(), BoundaryError> {
        self.deformable_mut("set_truncation_radius")?
            .set_truncation_radius(radius)?;
        self.notify(BoundaryEvent::TruncationChanged { radius });
        Ok(())
    }

    pub fn state(&self) -> BoundaryState {
        BoundaryState {
            edges: (0..D)
                .flat_map(|d| self.edge_vector(d).iter().copied().collect::<Vec<_>>())
                .collect(),
            periodic: (0..D).map(|d| self.periodicity(d)).collect(),
        }
    }

    /// Restores the geometry recorded in `state`. The periodicity flags must
    /// match this boundary's kind; rectangular boundaries additionally
    /// require a diagonal edge matrix.
    #[instrument(level = "debug", skip_all)]
    pub fn apply_state(&mut self, state: &BoundaryState) -> Result<(), BoundaryError> {
        if state.edges.len() != D * D || state.periodic.len() != D {
            return Err(BoundaryError::InvalidState(format!(
                "expected {} edge components and {} periodicity flags, found {} and {}",
                D * D,
                D,
                state.edges.len(),
                state.periodic.len()
            )));
        }
        if (0..D).any(|d| state.periodic[d] != self.periodicity(d)) {
            return Err(BoundaryError::InvalidState(format!(
                "periodicity {:?} does not match a {} boundary",
                state.periodic, self.kind
            )));
        }
        let edges: [Vector<D>; D] =
            std::array::from_fn(|d| Vector::<D>::from_column_slice(&state.edges[d * D..(d + 1) * D]));

        match &mut self.cell {
            Cell::Rectangular(cell) => {
                let off_diagonal = (0..D).any(|d| (0..D).any(|i| i != d && edges[d][i] != 0.0));
                if off_diagonal {
                    return Err(BoundaryError::InvalidState(
                        "rectangular boundary requires axis-aligned edges".to_string(),
                    ));
                }
                let dimensions = Vector::<D>::from_fn(|i, _| edges[i][i]);
                cell.set_dimensions(dimensions)?;
            }
            Cell::Deformable(cell) => cell.set_edges(edges)?,
        }
        self.notify(BoundaryEvent::Restored);
        Ok(())
    }
}

impl<const D: usize> fmt::Debug for Boundary<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Boundary")
            .field("kind", &self.kind)
            .field("cell", &self.cell)
            .field("events", &self.events)
            .finish()
    }
}
