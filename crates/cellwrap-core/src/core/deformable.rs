use super::error::BoundaryError;
use super::linalg::{
    self, Tensor, Vector, bounding_box, check_dimension, check_finite, snap_to_integer, wrap_unit,
};
use super::rectangular::validate_box_size;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// Numerical thresholds used by [`DeformableCell`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Tolerances {
    /// Projection magnitude above which a transform vector is applied. Kept
    /// slightly above one half so exact half-cell displacements do not flip
    /// back and forth under roundoff.
    pub half_tol: f64,
    /// Fractional coordinates this close to an integer are snapped onto it
    /// before wrapping.
    pub fraction_snap: f64,
    /// Relative threshold below which two edges count as orthogonal.
    pub dot_noise: f64,
    /// Relative volume below which an edge set is rejected as degenerate.
    pub degeneracy: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            half_tol: 0.500_000_000_01,
            fraction_snap: 1e-10,
            dot_noise: 1e-10,
            degeneracy: 1e-10,
        }
    }
}

impl Tolerances {
    pub fn validate(&self) -> Result<(), BoundaryError> {
        let checks = [
            ("half_tol", self.half_tol, (0.5..1.0).contains(&self.half_tol)),
            (
                "fraction_snap",
                self.fraction_snap,
                (0.0..0.5).contains(&self.fraction_snap),
            ),
            ("dot_noise", self.dot_noise, (0.0..1.0).contains(&self.dot_noise)),
            (
                "degeneracy",
                self.degeneracy,
                (0.0..1.0).contains(&self.degeneracy),
            ),
        ];
        match checks.iter().find(|(_, _, ok)| !ok) {
            Some(&(name, value, _)) => Err(BoundaryError::InvalidTolerance { name, value }),
            None => Ok(()),
        }
    }

    /// Threshold on `|p·t|/|t|²` beyond which `t` is considered to reduce `p`.
    #[inline]
    fn domination_threshold(&self) -> f64 {
        1.0 - self.half_tol
    }
}

/// Lattice translations tried by the reduction, with cached squared lengths.
#[derive(Debug, Clone, PartialEq)]
struct TransformSet<const D: usize> {
    vectors: Vec<Vector<D>>,
    norms2: Vec<f64>,
}

impl<const D: usize> TransformSet<D> {
    fn from_edges(edges: &[Vector<D>; D]) -> Self {
        let mut set = Self {
            vectors: Vec::with_capacity(if D == 3 { 13 } else { 3 }),
            norms2: Vec::with_capacity(if D == 3 { 13 } else { 3 }),
        };
        for edge in edges {
            set.push(*edge);
        }
        set
    }

    fn push(&mut self, v: Vector<D>) {
        self.norms2.push(v.norm_squared());
        self.vectors.push(v);
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    /// True when some vector already in the set would reduce `point`.
    fn dominates(&self, point: &Vector<D>, tol: &Tolerances) -> bool {
        let threshold = tol.domination_threshold();
        self.vectors
            .iter()
            .zip(&self.norms2)
            .any(|(t, &t2)| (point.dot(t) / t2).abs() > threshold)
    }
}

/// Pairwise and (in 3D) triple edge combinations that may shorten a
/// displacement the raw edges leave untouched.
fn candidate_vectors<const D: usize>(edges: &[Vector<D>; D], tol: &Tolerances) -> Vec<Vector<D>> {
    let norms: Vec<f64> = edges.iter().map(|e| e.norm()).collect();
    let mut candidates = Vec::new();

    for i in 0..D {
        for j in (i + 1)..D {
            let dot = edges[i].dot(&edges[j]);
            if dot.abs() > tol.dot_noise * norms[i] * norms[j] {
                candidates.push(if dot < 0.0 {
                    edges[i] + edges[j]
                } else {
                    edges[i] - edges[j]
                });
            }
        }
    }

    if D == 3 {
        let d01 = edges[0].dot(&edges[1]);
        let d02 = edges[0].dot(&edges[2]);
        let d12 = edges[1].dot(&edges[2]);
        let noise = tol.dot_noise * (norms[0] * norms[1] + norms[0] * norms[2] + norms[1] * norms[2]);
        for (s1, s2) in [(1.0, 1.0), (1.0, -1.0), (-1.0, 1.0), (-1.0, -1.0)] {
            if s1 * d01 + s2 * d02 + s1 * s2 * d12 < -noise {
                candidates.push(edges[0] + edges[1] * s1 + edges[2] * s2);
            }
        }
    }

    candidates
}

/// Builds the transform set for `edges`.
///
/// With a finite truncation radius `R`, admitted candidates are then pruned
/// longest first. A candidate `v` is dropped only when no point left
/// unreduced by the remaining vectors, but reducible by a dropped vector,
/// lies within `R` of a non-zero lattice point. Every displacement whose
/// minimum image is shorter than `R` therefore reduces to the same length
/// as with the full set. Raw edges are never pruned.
fn build_transform_set<const D: usize>(
    edges: &[Vector<D>; D],
    h_inv: &Tensor<D>,
    truncation_radius: f64,
    tol: &Tolerances,
) -> TransformSet<D> {
    let mut full = TransformSet::from_edges(edges);
    let mut admitted = Vec::new();

    for candidate in candidate_vectors(edges, tol) {
        let norm2 = candidate.norm_squared();
        if norm2 == 0.0 {
            warn!("Skipping zero-length transform candidate");
            continue;
        }
        let half = candidate * 0.5;
        if full.dominates(&half, tol) {
            trace!(?candidate, "Transform candidate dominated by an existing vector");
            continue;
        }
        full.push(candidate);
        admitted.push(candidate);
    }

    if truncation_radius.is_infinite() || admitted.is_empty() {
        return full;
    }

    let mut by_length = admitted.clone();
    by_length.sort_by(|a, b| b.norm_squared().total_cmp(&a.norm_squared()));

    let mut kept = full.vectors.clone();
    let mut pruned: Vec<Vector<D>> = Vec::new();
    for candidate in by_length {
        // vectors shorter than about 2R reduce some pair inside the cutoff
        if truncation_radius > tol.domination_threshold() * candidate.norm() {
            continue;
        }
        let trial: Vec<Vector<D>> = kept.iter().copied().filter(|t| *t != candidate).collect();
        pruned.push(candidate);
        if pruning_is_safe(edges, h_inv, &trial, &pruned, truncation_radius, tol) {
            trace!(?candidate, truncation_radius, "Pruned transform candidate");
            kept = trial;
        } else {
            pruned.pop();
        }
    }

    let mut set = TransformSet::from_edges(edges);
    for candidate in admitted {
        if !pruned.contains(&candidate) {
            set.push(candidate);
        }
    }
    set
}

const FEASIBILITY_SLACK: f64 = 1e-9;
const GRAM_DEGENERACY: f64 = 1e-12;

/// Closed half-space `normal · p <= offset`.
#[derive(Debug, Clone, Copy)]
struct HalfSpace<const D: usize> {
    normal: Vector<D>,
    offset: f64,
}

/// Faces of the region no vector in `vectors` would reduce.
fn reduced_region<const D: usize>(vectors: &[Vector<D>], tol: &Tolerances) -> Vec<HalfSpace<D>> {
    vectors
        .iter()
        .flat_map(|t| {
            let offset = tol.half_tol * t.norm_squared();
            [
                HalfSpace { normal: *t, offset },
                HalfSpace { normal: -t, offset },
            ]
        })
        .collect()
}

fn pruning_is_safe<const D: usize>(
    edges: &[Vector<D>; D],
    h_inv: &Tensor<D>,
    kept: &[Vector<D>],
    pruned: &[Vector<D>],
    radius: f64,
    tol: &Tolerances,
) -> bool {
    let region = reduced_region(kept, tol);
    // the reduced region sits inside the parallelepiped |fractional| <= half_tol
    let circumradius = tol.half_tol * edges.iter().map(|e| e.norm()).sum::<f64>();
    let lattice = lattice_points_within(h_inv, edges, circumradius + radius);

    // the region is symmetric, so the `-v` side is covered by `-L`
    pruned.iter().all(|v| {
        let mut faces = region.clone();
        faces.push(HalfSpace {
            normal: -v,
            offset: -tol.half_tol * v.norm_squared(),
        });
        lattice
            .iter()
            .all(|point| distance_at_least(point, &faces, radius))
    })
}

/// Non-zero lattice points strictly closer than `radius` to the origin.
fn lattice_points_within<const D: usize>(
    h_inv: &Tensor<D>,
    edges: &[Vector<D>; D],
    radius: f64,
) -> Vec<Vector<D>> {
    let bounds: Vec<i64> = (0..D)
        .map(|i| (radius * h_inv.row(i).norm()).floor() as i64)
        .collect();
    let mut coefficients: Vec<i64> = bounds.iter().map(|&b| -b).collect();
    let mut points = Vec::new();

    loop {
        if coefficients.iter().any(|&k| k != 0) {
            let point = edges
                .iter()
                .zip(&coefficients)
                .fold(Vector::<D>::zeros(), |acc, (e, &k)| acc + e * k as f64);
            if point.norm() < radius {
                points.push(point);
            }
        }
        let mut axis = 0;
        loop {
            if axis == D {
                return points;
            }
            if coefficients[axis] < bounds[axis] {
                coefficients[axis] += 1;
                break;
            }
            coefficients[axis] = -bounds[axis];
            axis += 1;
        }
    }
}

fn distance_at_least<const D: usize>(point: &Vector<D>, faces: &[HalfSpace<D>], radius: f64) -> bool {
    let separated = faces
        .iter()
        .any(|f| f.normal.dot(point) - f.offset >= radius * f.normal.norm());
    separated || distance_to_polytope(point, faces) >= radius
}

/// Euclidean distance from `point` to the polytope bounded by `faces`;
/// infinite when the polytope is empty.
///
/// The closest point is the projection of `point` onto the affine hull of
/// some face of dimension `D - k`, so it suffices to project onto every set
/// of at most `D` active faces and keep the nearest feasible projection.
fn distance_to_polytope<const D: usize>(point: &Vector<D>, faces: &[HalfSpace<D>]) -> f64 {
    let slack = FEASIBILITY_SLACK * faces.iter().map(|f| f.offset.abs()).fold(1.0, f64::max);
    let mut best = f64::INFINITY;
    let mut active = Vec::with_capacity(D);
    visit_active_sets(faces.len(), 0, D, &mut active, &mut |active: &[usize]| {
        let Some(projected) = project_onto_faces(point, faces, active) else {
            return;
        };
        if faces.iter().all(|f| f.normal.dot(&projected) <= f.offset + slack) {
            best = best.min((projected - point).norm());
        }
    });
    best
}

fn visit_active_sets<F: FnMut(&[usize])>(
    n: usize,
    start: usize,
    remaining: usize,
    active: &mut Vec<usize>,
    visit: &mut F,
) {
    visit(active);
    if remaining == 0 {
        return;
    }
    for i in start..n {
        active.push(i);
        visit_active_sets(n, i + 1, remaining - 1, active, visit);
        active.pop();
    }
}

fn project_onto_faces<const D: usize>(
    point: &Vector<D>,
    faces: &[HalfSpace<D>],
    active: &[usize],
) -> Option<Vector<D>> {
    if active.is_empty() {
        return Some(*point);
    }
    let k = active.len();
    let normals = DMatrix::from_fn(k, D, |r, c| faces[active[r]].normal[c]);
    let gram = &normals * normals.transpose();
    let diagonal: f64 = gram.diagonal().iter().product();
    if gram.determinant().abs() <= GRAM_DEGENERACY * diagonal {
        return None;
    }
    let residual = DVector::from_fn(k, |r, _| {
        let face = &faces[active[r]];
        face.normal.dot(point) - face.offset
    });
    let multipliers = gram.try_inverse()? * residual;
    let correction = normals.transpose() * multipliers;
    Some(point - Vector::<D>::from_column_slice(correction.as_slice()))
}

/// Periodic parallelepiped spanned by `D` arbitrary edge vectors.
///
/// All derived state (`h`, `h_inv`, volume, transform vectors) is rebuilt in
/// full whenever the edges or the truncation radius change; a failed
/// mutation leaves the cell untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct DeformableCell<const D: usize> {
    edges: [Vector<D>; D],
    h: Tensor<D>,
    h_inv: Tensor<D>,
    volume: f64,
    half_diagonal: Vector<D>,
    transforms: TransformSet<D>,
    truncation_radius: f64,
    tolerances: Tolerances,
}

impl<const D: usize> DeformableCell<D> {
    pub fn new(edges: [Vector<D>; D]) -> Result<Self, BoundaryError> {
        Self::with_options(edges, Tolerances::default(), f64::INFINITY)
    }

    pub fn with_options(
        edges: [Vector<D>; D],
        tolerances: Tolerances,
        truncation_radius: f64,
    ) -> Result<Self, BoundaryError> {
        check_dimension::<D>()?;
        tolerances.validate()?;
        validate_truncation_radius(truncation_radius)?;
        Self::build(edges, truncation_radius, tolerances)
    }

    fn build(
        edges: [Vector<D>; D],
        truncation_radius: f64,
        tolerances: Tolerances,
    ) -> Result<Self, BoundaryError> {
        for edge in &edges {
            check_finite(edge, "edge vector")?;
        }

        let h = Tensor::<D>::from_columns(&edges);
        let volume = linalg::determinant(&h).abs();
        let scale: f64 = edges.iter().map(|e| e.norm()).product();
        if !volume.is_finite() || volume <= tolerances.degeneracy * scale {
            return Err(BoundaryError::DegenerateCell { volume });
        }
        let h_inv = linalg::inverse(&h).ok_or(BoundaryError::DegenerateCell { volume })?;

        let transforms = build_transform_set(&edges, &h_inv, truncation_radius, &tolerances);
        let half_diagonal = edges.iter().fold(Vector::<D>::zeros(), |acc, e| acc + e) * 0.5;

        debug!(
            volume,
            transforms = transforms.len(),
            truncation_radius,
            "Rebuilt deformable cell"
        );

        Ok(Self {
            edges,
            h,
            h_inv,
            volume,
            half_diagonal,
            transforms,
            truncation_radius,
            tolerances,
        })
    }

    pub fn edges(&self) -> &[Vector<D>; D] {
        &self.edges
    }

    pub fn edge_vector(&self, d: usize) -> Vector<D> {
        self.edges[d]
    }

    /// Edge matrix, one edge per column.
    pub fn h(&self) -> &Tensor<D> {
        &self.h
    }

    pub fn h_inv(&self) -> &Tensor<D> {
        &self.h_inv
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn box_size(&self) -> Vector<D> {
        bounding_box(&self.edges)
    }

    pub fn transform_vectors(&self) -> &[Vector<D>] {
        &self.transforms.vectors
    }

    pub fn truncation_radius(&self) -> f64 {
        self.truncation_radius
    }

    pub fn tolerances(&self) -> &Tolerances {
        &self.tolerances
    }

    /// Fractional coordinates of `r` relative to the cell edges.
    pub fn to_fractional(&self, r: &Vector<D>) -> Vector<D> {
        self.h_inv * r
    }

    pub fn to_cartesian(&self, fractional: &Vector<D>) -> Vector<D> {
        self.h * fractional
    }

    /// Reduces `dr` until no transform vector shortens it further.
    ///
    /// The list is walked cyclically; every applied translation strictly
    /// decreases `|dr|²`, and the walk stops once a full lap applies nothing.
    /// The result is only locally minimal: on strongly skewed cells that are
    /// far from a reduced basis it can be longer than the true minimum image,
    /// so reduce such cells (e.g. with [`DeformableCell::deform`]) before
    /// relying on global minimality.
    #[inline]
    pub fn nearest_image(&self, dr: &mut Vector<D>) {
        let vectors = &self.transforms.vectors;
        let norms2 = &self.transforms.norms2;
        let n = vectors.len();
        let half_tol = self.tolerances.half_tol;

        let mut since_last = 0;
        let mut i = 0;
        while since_last < n {
            let proj = dr.dot(&vectors[i]) / norms2[i];
            if proj.abs() > half_tol {
                *dr -= vectors[i] * proj.round();
                since_last = 1;
            } else {
                since_last += 1;
            }
            i += 1;
            if i == n {
                i = 0;
            }
        }
    }

    /// Translation mapping `r` into the cell centred on the origin.
    pub fn central_image(&self, r: &Vector<D>) -> Vector<D> {
        let shifted = r + self.half_diagonal;
        let fractional = (self.h_inv * shifted)
            .map(|x| wrap_unit(snap_to_integer(x, self.tolerances.fraction_snap)));
        self.h * fractional - shifted
    }

    pub(crate) fn set_edges(&mut self, edges: [Vector<D>; D]) -> Result<(), BoundaryError> {
        *self = Self::build(edges, self.truncation_radius, self.tolerances)?;
        Ok(())
    }

    pub(crate) fn set_edge_vector(&mut self, d: usize, edge: Vector<D>) -> Result<(), BoundaryError> {
        if d >= D {
            return Err(BoundaryError::IndexOutOfRange {
                index: d,
                dimension: D,
            });
        }
        let mut edges = self.edges;
        edges[d] = edge;
        self.set_edges(edges)
    }

    pub(crate) fn deform(&mut self, tensor: &Tensor<D>) -> Result<(), BoundaryError> {
        if !tensor.iter().all(|x| x.is_finite()) {
            return Err(BoundaryError::NonFinite("deformation tensor"));
        }
        self.set_edges(self.edges.map(|e| tensor * e))
    }

    /// Rescales the cell so its bounding box matches `size`, returning the
    /// applied per-axis scale factors.
    pub(crate) fn set_box_size(&mut self, size: &Vector<D>) -> Result<Vector<D>, BoundaryError> {
        validate_box_size(size)?;
        let scale = size.component_div(&self.box_size());
        self.set_edges(self.edges.map(|e| e.component_mul(&scale)))?;
        Ok(scale)
    }

    pub(crate) fn set_truncation_radius(&mut self, radius: f64) -> Result<(), BoundaryError> {
        validate_truncation_radius(radius)?;
        *self = Self::build(self.edges, radius, self.tolerances)?;
        Ok(())
    }
}

fn validate_truncation_radius(radius: f64) -> Result<(), BoundaryError> {
    if radius > 0.0 {
        Ok(())
    } else {
        Err(BoundaryError::InvalidTruncationRadius(radius))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Matrix3, Vector2, Vector3};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const TOLERANCE: f64 = 1e-9;

    fn vec_approx_equal<const D: usize>(a: &Vector<D>, b: &Vector<D>) -> bool {
        (a - b).norm() < TOLERANCE
    }

    fn oblique_2d() -> DeformableCell<2> {
        DeformableCell::new([Vector2::new(10.0, 0.0), Vector2::new(3.0, 9.0)]).unwrap()
    }

    fn skewed_3d() -> DeformableCell<3> {
        DeformableCell::new([
            Vector3::new(8.0, 0.0, 0.0),
            Vector3::new(5.0, 7.0, 0.0),
            Vector3::new(-3.0, 2.5, 9.0),
        ])
        .unwrap()
    }

    /// All pairwise edge dots are negative and the edges form an obtuse
    /// superbase, so the seven edge subset sums are the full set of
    /// Voronoi-relevant vectors.
    fn obtuse_3d() -> DeformableCell<3> {
        DeformableCell::new([
            Vector3::new(8.0, 0.0, 0.0),
            Vector3::new(-2.5, 7.0, 0.0),
            Vector3::new(-1.5, -2.0, 9.0),
        ])
        .unwrap()
    }

    fn brute_force_minimum_3d(cell: &DeformableCell<3>, dr: &Vector3<f64>) -> f64 {
        let base = dr - cell.to_cartesian(&cell.to_fractional(dr).map(f64::round));
        let mut best = f64::INFINITY;
        for i in -3..=3 {
            for j in -3..=3 {
                for k in -3..=3 {
                    let image = base
                        + cell.edge_vector(0) * i as f64
                        + cell.edge_vector(1) * j as f64
                        + cell.edge_vector(2) * k as f64;
                    best = best.min(image.norm_squared());
                }
            }
        }
        best
    }

    #[test]
    fn orthogonal_edges_produce_only_the_edges_as_transforms() {
        let cell = DeformableCell::new([
            Vector3::new(10.0, 0.0, 0.0),
            Vector3::new(0.0, 10.0, 0.0),
            Vector3::new(0.0, 0.0, 10.0),
        ])
        .unwrap();
        assert_eq!(cell.transform_vectors().len(), 3);
        assert!((cell.volume() - 1000.0).abs() < TOLERANCE);
    }

    #[test]
    fn oblique_2d_cell_admits_the_edge_difference() {
        let cell = oblique_2d();
        let transforms = cell.transform_vectors();
        assert_eq!(transforms.len(), 3);
        assert!(vec_approx_equal(&transforms[2], &Vector2::new(7.0, -9.0)));
        assert!((cell.volume() - 90.0).abs() < TOLERANCE);
    }

    #[test]
    fn triclinic_golden_value_reduces_to_expected_vector() {
        let cell = oblique_2d();
        let mut dr = Vector2::new(8.0, 1.0);
        cell.nearest_image(&mut dr);
        assert!(vec_approx_equal(&dr, &Vector2::new(-2.0, 1.0)));

        let mut dr = Vector2::new(6.0, -5.0);
        cell.nearest_image(&mut dr);
        assert!(vec_approx_equal(&dr, &Vector2::new(-1.0, 4.0)));
    }

    #[test]
    fn fcc_primitive_cell_has_six_transform_vectors() {
        let cell = DeformableCell::new([
            Vector3::new(0.0, 0.5, 0.5),
            Vector3::new(0.5, 0.0, 0.5),
            Vector3::new(0.5, 0.5, 0.0),
        ])
        .unwrap();
        assert_eq!(cell.transform_vectors().len(), 6);
    }

    #[test]
    fn bcc_primitive_cell_has_seven_transform_vectors() {
        let cell = DeformableCell::new([
            Vector3::new(-0.5, 0.5, 0.5),
            Vector3::new(0.5, -0.5, 0.5),
            Vector3::new(0.5, 0.5, -0.5),
        ])
        .unwrap();
        let transforms = cell.transform_vectors();
        assert_eq!(transforms.len(), 7);
        assert!(vec_approx_equal(&transforms[6], &Vector3::new(0.5, 0.5, 0.5)));
    }

    #[test]
    fn nearest_image_matches_brute_force_on_obtuse_triclinic_cell() {
        let cell = obtuse_3d();
        assert_eq!(cell.transform_vectors().len(), 7);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let dr = Vector3::new(
                rng.gen_range(-30.0..30.0),
                rng.gen_range(-30.0..30.0),
                rng.gen_range(-30.0..30.0),
            );
            let mut reduced = dr;
            cell.nearest_image(&mut reduced);
            let expected = brute_force_minimum_3d(&cell, &dr);
            assert!(
                (reduced.norm_squared() - expected).abs() < 1e-8,
                "dr = {dr:?}: got {}, brute force {expected}",
                reduced.norm_squared()
            );
        }
    }

    #[test]
    fn nearest_image_is_idempotent_and_locally_minimal() {
        let cell = skewed_3d();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            let mut dr = Vector3::new(
                rng.gen_range(-50.0..50.0),
                rng.gen_range(-50.0..50.0),
                rng.gen_range(-50.0..50.0),
            );
            cell.nearest_image(&mut dr);
            let mut again = dr;
            cell.nearest_image(&mut again);
            assert_eq!(again, dr);

            for t in cell.transform_vectors() {
                let proj = dr.dot(t) / t.norm_squared();
                assert!(proj.abs() <= 0.5 + 1e-9);
            }
        }
    }

    #[test]
    fn nearly_degenerate_cell_is_only_reduced_to_a_local_minimum() {
        let cell = DeformableCell::new([Vector2::new(10.0, 0.0), Vector2::new(9.7, 0.5)]).unwrap();
        let mut dr = Vector2::new(2.9, 5.1);
        cell.nearest_image(&mut dr);
        assert!(vec_approx_equal(&dr, &Vector2::new(4.4, 2.6)));
        for t in cell.transform_vectors() {
            assert!((dr.dot(t) / t.norm_squared()).abs() <= 0.5 + 1e-9);
        }

        let shorter = dr + cell.edge_vector(0) * 8.0 - cell.edge_vector(1) * 9.0;
        assert!(vec_approx_equal(&shorter, &Vector2::new(-2.9, -1.9)));
        assert!(shorter.norm() < dr.norm());
    }

    #[test]
    fn nearest_image_only_applies_lattice_translations() {
        let cell = skewed_3d();
        let dr = Vector3::new(23.0, -17.5, 31.0);
        let mut reduced = dr;
        cell.nearest_image(&mut reduced);
        let n = cell.to_fractional(&(dr - reduced));
        for k in n.iter() {
            assert!((k - k.round()).abs() < 1e-9);
        }
    }

    #[test]
    fn central_image_lands_inside_the_cell_and_is_a_lattice_translation() {
        let cell = skewed_3d();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let r = Vector3::new(
                rng.gen_range(-40.0..40.0),
                rng.gen_range(-40.0..40.0),
                rng.gen_range(-40.0..40.0),
            );
            let shift = cell.central_image(&r);

            let n = cell.to_fractional(&shift);
            for k in n.iter() {
                assert!((k - k.round()).abs() < 1e-9);
            }

            let f = cell.to_fractional(&(r + shift + cell.half_diagonal));
            for x in f.iter() {
                assert!(*x >= -1e-9 && *x < 1.0 + 1e-9);
            }
        }
    }

    #[test]
    fn central_image_of_origin_is_zero_and_invariant_under_edge_shifts() {
        let cell = oblique_2d();
        assert!(vec_approx_equal(
            &cell.central_image(&Vector2::zeros()),
            &Vector2::zeros()
        ));

        let r = Vector2::new(1.5, -2.0);
        let moved = r + cell.edge_vector(0) * 2.0 - cell.edge_vector(1);
        let a = r + cell.central_image(&r);
        let b = moved + cell.central_image(&moved);
        assert!(vec_approx_equal(&a, &b));
    }

    #[test]
    fn central_image_is_consistent_on_cell_faces() {
        let cell = oblique_2d();
        let face = -cell.half_diagonal;
        let wrapped = face + cell.central_image(&face);
        assert!(vec_approx_equal(&wrapped, &face));

        let opposite = face + cell.edge_vector(0);
        let wrapped = opposite + cell.central_image(&opposite);
        assert!(vec_approx_equal(&wrapped, &face));
    }

    #[test]
    fn degenerate_edges_are_rejected() {
        let result = DeformableCell::new([
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(1.0, 1.0, 0.0),
        ]);
        assert!(matches!(result, Err(BoundaryError::DegenerateCell { .. })));

        let result = DeformableCell::new([Vector2::new(1.0, 2.0), Vector2::new(2.0, 4.0)]);
        assert!(matches!(result, Err(BoundaryError::DegenerateCell { .. })));

        let result = DeformableCell::new([Vector2::new(1.0, f64::NAN), Vector2::new(0.0, 4.0)]);
        assert!(matches!(result, Err(BoundaryError::NonFinite(_))));
    }

    #[test]
    fn failed_mutation_leaves_cell_untouched() {
        let mut cell = oblique_2d();
        let before = cell.clone();
        assert!(cell.set_edge_vector(1, Vector2::new(20.0, 0.0)).is_err());
        assert!(cell.set_edge_vector(2, Vector2::new(0.0, 1.0)).is_err());
        assert!(cell.set_box_size(&Vector2::new(-1.0, 1.0)).is_err());
        assert!(cell.deform(&nalgebra::Matrix2::zeros()).is_err());
        assert_eq!(cell, before);
    }

    #[test]
    fn deform_by_identity_changes_nothing() {
        let mut cell = skewed_3d();
        let before = cell.clone();
        cell.deform(&Matrix3::identity()).unwrap();
        assert_eq!(cell, before);
    }

    #[test]
    fn deform_scales_volume_by_tensor_determinant() {
        let mut cell = skewed_3d();
        let v0 = cell.volume();
        let tensor = Matrix3::new(1.1, 0.2, 0.0, 0.0, 0.9, 0.1, 0.0, 0.0, 1.05);
        cell.deform(&tensor).unwrap();
        assert!((cell.volume() - v0 * tensor.determinant()).abs() < 1e-8);
        assert!((cell.volume() - cell.h().determinant().abs()).abs() < 1e-8);
    }

    #[test]
    fn set_box_size_rescales_bounding_box() {
        let mut cell = oblique_2d();
        assert!(vec_approx_equal(&cell.box_size(), &Vector2::new(13.0, 9.0)));

        let scale = cell.set_box_size(&Vector2::new(26.0, 4.5)).unwrap();
        assert!(vec_approx_equal(&scale, &Vector2::new(2.0, 0.5)));
        assert!(vec_approx_equal(&cell.box_size(), &Vector2::new(26.0, 4.5)));
        assert!(vec_approx_equal(&cell.edge_vector(1), &Vector2::new(6.0, 4.5)));
        assert!((cell.volume() - 90.0).abs() < TOLERANCE);
    }

    #[test]
    fn h_times_h_inv_is_identity() {
        let cell = skewed_3d();
        assert!((cell.h() * cell.h_inv() - Matrix3::identity()).norm() < 1e-12);
    }

    #[test]
    fn truncation_never_grows_the_transform_set() {
        let edges = [
            Vector3::new(8.0, 0.0, 0.0),
            Vector3::new(5.0, 7.0, 0.0),
            Vector3::new(-3.0, 2.5, 9.0),
        ];
        let full = DeformableCell::new(edges).unwrap().transform_vectors().len();
        for radius in [0.5, 2.0, 4.0, 6.0, 10.0, 100.0] {
            let cell = DeformableCell::with_options(edges, Tolerances::default(), radius).unwrap();
            assert!(cell.transform_vectors().len() <= full, "radius {radius}");
            assert!(cell.transform_vectors().len() >= 3);
        }
    }

    #[test]
    fn short_truncation_radius_prunes_long_candidates() {
        let edges = [Vector2::new(10.0, 0.0), Vector2::new(3.0, 9.0)];
        // pairs closer than ~3.07 never need the (7, -9) translation
        let cell = DeformableCell::with_options(edges, Tolerances::default(), 3.0).unwrap();
        assert_eq!(cell.transform_vectors().len(), 2);

        let mut cell = cell;
        cell.set_truncation_radius(f64::INFINITY).unwrap();
        assert_eq!(cell.transform_vectors().len(), 3);
    }

    #[test]
    fn truncation_keeps_vectors_needed_by_pairs_inside_the_cutoff() {
        let edges = [Vector2::new(10.0, 0.0), Vector2::new(3.0, 9.0)];
        let cell = DeformableCell::with_options(edges, Tolerances::default(), 5.0).unwrap();
        assert_eq!(cell.transform_vectors().len(), 3);

        // the edges alone leave this displacement at ~7.0
        let mut dr = Vector2::new(4.9, -5.0);
        cell.nearest_image(&mut dr);
        assert!(vec_approx_equal(&dr, &Vector2::new(-2.1, 4.0)));
        assert!(dr.norm() < 5.0);
    }

    fn assert_truncated_matches_full<const D: usize>(
        edges: [Vector<D>; D],
        radius: f64,
        minimum_image: impl Fn(&DeformableCell<D>, &Vector<D>) -> f64,
        seed: u64,
    ) {
        let full = DeformableCell::new(edges).unwrap();
        let truncated = DeformableCell::with_options(edges, Tolerances::default(), radius).unwrap();
        assert!(
            truncated.transform_vectors().len() < full.transform_vectors().len(),
            "radius {radius} should prune something"
        );

        let mut rng = StdRng::seed_from_u64(seed);
        let mut inside = 0;
        for _ in 0..2000 {
            let dr = Vector::<D>::from_fn(|_, _| rng.gen_range(-25.0..25.0));
            let shortest = minimum_image(&full, &dr);
            if shortest >= radius * radius {
                continue;
            }
            inside += 1;
            let mut a = dr;
            let mut b = dr;
            full.nearest_image(&mut a);
            truncated.nearest_image(&mut b);
            assert!(
                (a.norm_squared() - shortest).abs() < 1e-8,
                "dr = {dr:?}: full set gave {a:?}"
            );
            assert!(
                (a.norm() - b.norm()).abs() < 1e-9,
                "dr = {dr:?}: full {a:?}, truncated {b:?}"
            );
        }
        assert!(inside > 50, "only {inside} samples inside the cutoff");
    }

    fn brute_force_minimum_2d(cell: &DeformableCell<2>, dr: &Vector2<f64>) -> f64 {
        let base = dr - cell.to_cartesian(&cell.to_fractional(dr).map(f64::round));
        let mut best = f64::INFINITY;
        for i in -3..=3 {
            for j in -3..=3 {
                let image = base + cell.edge_vector(0) * i as f64 + cell.edge_vector(1) * j as f64;
                best = best.min(image.norm_squared());
            }
        }
        best
    }

    #[test]
    fn truncated_oblique_cell_reduces_pairs_inside_the_cutoff_exactly() {
        assert_truncated_matches_full(
            [Vector2::new(10.0, 0.0), Vector2::new(3.0, 9.0)],
            3.0,
            brute_force_minimum_2d,
            17,
        );
    }

    #[test]
    fn truncated_triclinic_cell_reduces_pairs_inside_the_cutoff_exactly() {
        let edges = *obtuse_3d().edges();
        assert_truncated_matches_full(edges, 3.0, brute_force_minimum_3d, 23);
        assert_truncated_matches_full(edges, 4.0, brute_force_minimum_3d, 29);
    }

    #[test]
    fn invalid_truncation_radius_and_tolerances_are_rejected() {
        let edges = [Vector2::new(10.0, 0.0), Vector2::new(3.0, 9.0)];
        assert!(matches!(
            DeformableCell::with_options(edges, Tolerances::default(), 0.0),
            Err(BoundaryError::InvalidTruncationRadius(_))
        ));
        assert!(matches!(
            DeformableCell::with_options(edges, Tolerances::default(), f64::NAN),
            Err(BoundaryError::InvalidTruncationRadius(_))
        ));
        let tolerances = Tolerances {
            half_tol: 0.4,
            ..Tolerances::default()
        };
        assert!(matches!(
            DeformableCell::with_options(edges, tolerances, f64::INFINITY),
            Err(BoundaryError::InvalidTolerance {
                name: "half_tol",
                ..
            })
        ));
    }
}
