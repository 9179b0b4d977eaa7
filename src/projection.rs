use crate::basis::{legendre_mass_matrix, legendre_stiffness_matrix, LegendrePoly};
use crate::domain::{
    fields::{LocalExpansion, Patch, Solution, SolutionError},
    mesh::{
        elem::Elem,
        p_refinement::PolyOrders,
        primitives::{intersect_ranges, local_coordinate, DyadicRange, UNIT},
    },
    Space,
};
use crate::integration::{
    forms::ProjNormType,
    glq::{gauss_rule, points_for_degree, real_gauss_quad, scale_gauss_quad_points},
    region_jacobian,
};
use crate::linalg::{kron, solve_sparse_spd, solve_spd, LinearSolveError, SparseMatrix};

use log::trace;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("got {coarse} working spaces, {reference} reference spaces and {solutions} reference solutions")]
    FieldCountMismatch {
        coarse: usize,
        reference: usize,
        solutions: usize,
    },
    #[error(transparent)]
    Solution(#[from] SolutionError),
    #[error("reference space of field {field} was not built from the current working space")]
    UnrelatedSpaces { field: usize },
    #[error("Elem {0} doesn't exist in the reference space")]
    MissingElem(usize),
    #[error("reference patches don't cover Elem {elem}")]
    IncompleteCoverage { elem: usize },
    #[error("local projection system on Elem {elem} could not be solved")]
    Singular {
        elem: usize,
        #[source]
        source: LinearSolveError,
    },
    #[error("global projection system could not be solved")]
    Solve(#[source] LinearSolveError),
}

/// Projects reference solutions onto the working spaces they were refined from
pub trait Projector: Send + Sync {
    fn project(
        &self,
        coarse_spaces: &[Space],
        ref_spaces: &[Space],
        ref_solutions: &[Solution],
    ) -> Result<Vec<Solution>, ProjectionError>;
}

/// Global orthogonal projection: the best approximation (in `norm`) of the reference solution among the working
/// Space's conforming functions which take the prescribed essential boundary values
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OrthogonalProjection {
    pub norm: ProjNormType,
}

impl OrthogonalProjection {
    pub fn new(norm: ProjNormType) -> Self {
        Self { norm }
    }

    fn project_field(&self, field: usize, coarse: &Space, reference: &Space, solution: &Solution) -> Result<Solution, ProjectionError> {
        solution.check_space(reference)?;
        if !reference.is_refinement_of(coarse) {
            return Err(ProjectionError::UnrelatedSpaces { field });
        }

        let dofs = conforming_projection::<_, ProjectionError>(coarse, self.norm, |target| {
            let sources: Vec<Patch> = reference
                .mesh()
                .active_descendants(target.elem_id)
                .map_err(|_| ProjectionError::MissingElem(target.elem_id))?
                .iter()
                .filter_map(|source_id| solution.patch(reference, *source_id))
                .collect();

            local_load(target, &sources, self.norm)
        })?;

        trace!("Projected field {} onto {} DOFs", field, dofs.len());

        Ok(Solution::from_dofs(coarse, &dofs)?)
    }
}

impl Projector for OrthogonalProjection {
    fn project(
        &self,
        coarse_spaces: &[Space],
        ref_spaces: &[Space],
        ref_solutions: &[Solution],
    ) -> Result<Vec<Solution>, ProjectionError> {
        if coarse_spaces.len() != ref_spaces.len() || ref_spaces.len() != ref_solutions.len() {
            return Err(ProjectionError::FieldCountMismatch {
                coarse: coarse_spaces.len(),
                reference: ref_spaces.len(),
                solutions: ref_solutions.len(),
            });
        }

        coarse_spaces
            .iter()
            .zip(ref_spaces.iter().zip(ref_solutions.iter()))
            .enumerate()
            .map(|(field, (coarse, (reference, solution)))| self.project_field(field, coarse, reference, solution))
            .collect()
    }
}

/// The area and expansion orders a set of patches is projected onto
#[derive(Clone, Copy, Debug)]
pub struct ProjectionTarget {
    /// Elem used to identify the target in errors
    pub elem_id: usize,
    pub range: DyadicRange,
    pub element_extent: [f64; 2],
    pub orders: PolyOrders,
}

impl ProjectionTarget {
    pub fn of(elem: &Elem, orders: PolyOrders) -> Self {
        Self {
            elem_id: elem.id,
            range: elem.range,
            element_extent: elem.element.extent(),
            orders,
        }
    }

    pub fn with_range(&self, range: DyadicRange, orders: PolyOrders) -> Self {
        Self {
            range,
            orders,
            ..*self
        }
    }

    /// `2 / width` and `2 / height`: derivatives with respect to the local coordinates times these are real derivatives
    fn derivative_scale(&self) -> [f64; 2] {
        let width = self.element_extent[0] * (self.range[0][1] - self.range[0][0]) as f64 / UNIT as f64;
        let height = self.element_extent[1] * (self.range[1][1] - self.range[1][0]) as f64 / UNIT as f64;
        [2.0 / width, 2.0 / height]
    }
}

/// Best approximation (in `norm`) of the field given by `local_load` among the conforming functions of `space`
///
/// `local_load` returns the inner products of the field with the Legendre products on a target Elem (see [local_load()]).
/// Essential boundary values are imposed and the remaining DOFs solve the normal equations, which are assembled over
/// the active Elems in parallel. Returns the Space's DOF vector.
pub fn conforming_projection<F, E>(space: &Space, norm: ProjNormType, local_load: F) -> Result<Vec<f64>, E>
where
    F: Fn(&ProjectionTarget) -> Result<DVector<f64>, E> + Sync,
    E: From<ProjectionError> + Send,
{
    let num_dofs = space.num_dofs();

    let contributions = space
        .dof_map()
        .elems()
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|(elem_id, basis)| {
            let target = ProjectionTarget::of(&space.mesh().elems[*elem_id], basis.orders);
            let gram = local_gram(&target, norm);
            let load = local_load(&target)? - &gram * &basis.lift;

            let elem_matrix = basis.basis.transpose() * &gram * &basis.basis;
            let elem_rhs = basis.basis.transpose() * load;

            let mut entries = Vec::with_capacity(basis.dofs.len() * (basis.dofs.len() + 1) / 2);
            for (a, dof_a) in basis.dofs.iter().enumerate() {
                for (b, dof_b) in basis.dofs.iter().enumerate().skip(a) {
                    entries.push(([*dof_a, *dof_b], elem_matrix[(a, b)]));
                }
            }
            let rhs: Vec<(usize, f64)> = basis.dofs.iter().copied().zip(elem_rhs.iter().copied()).collect();

            Ok((entries, rhs))
        })
        .collect::<Result<Vec<_>, E>>()?;

    if num_dofs == 0 {
        return Ok(Vec::new());
    }

    let mut matrix = SparseMatrix::new(num_dofs);
    let mut rhs = DVector::zeros(num_dofs);
    for (entries, elem_rhs) in contributions {
        matrix.insert_group(entries);
        for (dof, value) in elem_rhs {
            rhs[dof] += value;
        }
    }

    let dofs = solve_sparse_spd(matrix, &rhs).map_err(|err| E::from(ProjectionError::Solve(err)))?;
    Ok(dofs.iter().copied().collect())
}

/// Gram matrix of the target's Legendre products in `norm`
pub fn local_gram(target: &ProjectionTarget, norm: ProjNormType) -> DMatrix<f64> {
    let PolyOrders { ni, nj } = target.orders;
    let [sx, sy] = target.derivative_scale();

    let (mass_x, mass_y) = (legendre_mass_matrix(ni), legendre_mass_matrix(nj));
    let mut gram = kron(&mass_x, &mass_y);
    if norm == ProjNormType::H1 {
        let (stiff_x, stiff_y) = (legendre_stiffness_matrix(ni), legendre_stiffness_matrix(nj));
        gram += kron(&stiff_x, &mass_y) * sx.powi(2) + kron(&mass_x, &stiff_y) * sy.powi(2);
    }
    gram / (sx * sy)
}

/// Inner products (in `norm`) of a piecewise field given by `sources` with the target's Legendre products
///
/// The sources must belong to the target's Element and must cover its range.
pub fn local_load(target: &ProjectionTarget, sources: &[Patch], norm: ProjNormType) -> Result<DVector<f64>, ProjectionError> {
    let covered: u64 = sources
        .iter()
        .filter_map(|source| intersect_ranges(&source.range, &target.range))
        .map(|[u, v]| (u[1] - u[0]) as u64 * (v[1] - v[0]) as u64)
        .sum();
    let area = (target.range[0][1] - target.range[0][0]) as u64 * (target.range[1][1] - target.range[1][0]) as u64;
    if covered != area {
        return Err(ProjectionError::IncompleteCoverage { elem: target.elem_id });
    }

    let PolyOrders { ni, nj } = target.orders;
    let [sx, sy] = target.derivative_scale();
    let n_j = nj as usize + 1;
    let mut rhs = DVector::zeros(target.orders.num_coeffs());

    for source in sources {
        let region = match intersect_ranges(&source.range, &target.range) {
            Some(region) => region,
            None => continue,
        };

        let (u_points, u_weights) = gauss_rule(points_for_degree(ni as usize + source.expansion.orders.ni as usize));
        let (v_points, v_weights) = gauss_rule(points_for_degree(nj as usize + source.expansion.orders.nj as usize));
        let (_, us) = scale_gauss_quad_points(&u_points, region[0][0] as f64, region[0][1] as f64);
        let (_, vs) = scale_gauss_quad_points(&v_points, region[1][0] as f64, region[1][1] as f64);

        let samples = source.sample(&us, &vs);
        let xis: Vec<f64> = us.iter().map(|u| local_coordinate(*u, target.range[0])).collect();
        let etas: Vec<f64> = vs.iter().map(|v| local_coordinate(*v, target.range[1])).collect();
        let leg_x = LegendrePoly::with(ni, &xis);
        let leg_y = LegendrePoly::with(nj, &etas);
        let jacobian = region_jacobian(target.element_extent, &region);

        for i in 0..=ni as usize {
            for j in 0..n_j {
                rhs[i * n_j + j] += real_gauss_quad(&u_weights, &v_weights, jacobian, |m, n| {
                    let s = &samples[m * vs.len() + n];
                    let mut integrand = leg_x.l[i][m] * leg_y.l[j][n] * s.value;
                    if norm == ProjNormType::H1 {
                        integrand += sx * leg_x.d1[i][m] * leg_y.l[j][n] * s.dx + sy * leg_x.l[i][m] * leg_y.d1[j][n] * s.dy;
                    }
                    integrand
                });
            }
        }
    }

    Ok(rhs)
}

/// Best approximation (in `norm`) of a piecewise field given by `sources` on the target's range, without any
/// continuity requirement
///
/// The sources must belong to the target's Element and must cover its range.
pub fn project_patches(target: &ProjectionTarget, sources: &[Patch], norm: ProjNormType) -> Result<LocalExpansion, ProjectionError> {
    // a single source on the same range is already in the target space
    if let [source] = sources {
        if source.range == target.range && target.orders.dominates(&source.expansion.orders) {
            return Ok(source.expansion.padded(target.orders));
        }
    }

    let rhs = local_load(target, sources, norm)?;
    let coeffs = solve_spd(local_gram(target, norm), &rhs).map_err(|source| ProjectionError::Singular {
        elem: target.elem_id,
        source,
    })?;

    Ok(LocalExpansion::from_slice(target.orders, coeffs.as_slice()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{boundary::EssentialBCs, mesh::{primitives::Point, Mesh}};
    use crate::integration::{forms::NormForm, integrate_form};
    use crate::solver::{DiscreteSolver, ExactSolutionSolver};
    use approx::assert_relative_eq;
    use std::collections::BTreeMap;

    fn space_with(orders: PolyOrders, bcs: EssentialBCs) -> Space {
        let mesh = Mesh::rectangle(Point::new(0.0, 0.0), [2.0, 1.0], [2, 1]).unwrap();
        Space::new(mesh, orders, bcs).unwrap()
    }

    fn space(orders: PolyOrders) -> Space {
        space_with(orders, EssentialBCs::new())
    }

    fn pseudo_random_vector(len: usize, seed: u64) -> Vec<f64> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((state >> 33) as f64 / (1u64 << 31) as f64) - 0.5
            })
            .collect()
    }

    #[test]
    fn projection_of_a_refined_polynomial_is_exact() {
        // a field from the working space, interpolated into the reference space, projects back onto itself
        for norm in [ProjNormType::L2, ProjNormType::H1] {
            let coarse = space(PolyOrders::from(2, 3));
            let reference = coarse.construct_refined_space(1).unwrap();
            let coarse_solution = Solution::from_dofs(&coarse, &pseudo_random_vector(coarse.num_dofs(), 7)).unwrap();

            // restrict each coarse expansion onto its reference children by projection (exact)
            let mut ref_expansions = BTreeMap::new();
            for (elem_id, orders) in reference.local_layout() {
                let elem = &reference.mesh().elems[elem_id];
                let parent = elem.parent_id().unwrap();
                let source = coarse_solution.patch(&coarse, parent).unwrap();
                let target = ProjectionTarget::of(elem, orders);
                ref_expansions.insert(elem_id, project_patches(&target, &[source], norm).unwrap());
            }
            let ref_solution = Solution::from_expansions(&reference, ref_expansions).unwrap();

            let projected = OrthogonalProjection::new(norm)
                .project(&[coarse.clone()], &[reference.clone()], &[ref_solution])
                .unwrap();

            for (a, b) in projected[0].to_local_coeffs().iter().zip(coarse_solution.to_local_coeffs()) {
                assert_relative_eq!(*a, b, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn projection_is_idempotent() {
        let space = space(PolyOrders::from(3, 2));
        let solution = Solution::from_dofs(&space, &pseudo_random_vector(space.num_dofs(), 11)).unwrap();

        let projected = OrthogonalProjection::default()
            .project(&[space.clone()], &[space.clone()], &[solution.clone()])
            .unwrap();

        for (a, b) in projected[0].to_local_coeffs().iter().zip(solution.to_local_coeffs()) {
            assert_relative_eq!(*a, b, epsilon = 1e-10);
        }
    }

    #[test]
    fn projection_minimizes_the_error() {
        // projecting a quadratic onto linears: moving along any conforming function can only increase the H1 error
        let coarse = space(PolyOrders::iso(1));
        let reference = coarse.construct_refined_space(1).unwrap();
        let ref_solution = Solution::from_dofs(&reference, &pseudo_random_vector(reference.num_dofs(), 3)).unwrap();

        let projector = OrthogonalProjection::new(ProjNormType::H1);
        let projected = projector
            .project(&[coarse.clone()], &[reference.clone()], &[ref_solution.clone()])
            .unwrap();

        let error = |solution: &Solution| -> f64 {
            let form = NormForm::H1;
            reference
                .local_layout()
                .iter()
                .map(|(ref_id, _)| {
                    let parent = reference.mesh().elems[*ref_id].parent_id().unwrap();
                    let fine = ref_solution.patch(&reference, *ref_id).unwrap();
                    let coarse_patch = solution.patch(&coarse, parent).unwrap();
                    integrate_form(&form, &fine, Some(&coarse_patch), &fine.range)
                })
                .sum()
        };

        let best = error(&projected[0]);
        for dof in 0..coarse.num_dofs() {
            let mut direction = vec![0.0; coarse.num_dofs()];
            direction[dof] = 1e-3;
            let shift = Solution::from_dofs(&coarse, &direction).unwrap().to_local_coeffs();

            let perturbed: Vec<f64> = projected[0]
                .to_local_coeffs()
                .iter()
                .zip(shift.iter())
                .map(|(a, b)| a + b)
                .collect();
            let worse = error(&Solution::from_local_coeffs(&coarse, &perturbed).unwrap());

            assert!(best < worse);
        }
    }

    #[test]
    fn projections_are_continuous_and_keep_boundary_values() {
        let coarse = space_with(PolyOrders::iso(1), EssentialBCs::new().with("Bdy_left", 5.0));
        let reference = coarse.construct_refined_space(1).unwrap();
        let mut solver = ExactSolutionSolver::new().with_field(|x, y| (1.5 * x).exp() * (1.0 + y));
        let ref_dofs = solver.solve(std::slice::from_ref(&reference)).unwrap();
        let ref_solution = Solution::from_dofs(&reference, &ref_dofs).unwrap();

        let projected = OrthogonalProjection::new(ProjNormType::H1)
            .project(&[coarse.clone()], &[reference], &[ref_solution])
            .unwrap();
        let solution = &projected[0];

        // Elem 0 covers x in [0, 1] and Elem 1 covers x in [1, 2]
        let left = solution.expansion(0).unwrap();
        let right = solution.expansion(1).unwrap();
        for eta in [-0.8, 0.0, 0.6] {
            let from_left = left.sample_grid(&[1.0], &[eta], [1.0, 1.0])[0].value;
            let from_right = right.sample_grid(&[-1.0], &[eta], [1.0, 1.0])[0].value;
            assert_relative_eq!(from_left, from_right, epsilon = 1e-12);
        }

        for y in [0.0, 0.3, 1.0] {
            let sample = solution.evaluate(&coarse, Point::new(0.0, y)).unwrap();
            assert_relative_eq!(sample.value, 5.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn conforming_projection_without_free_dofs() {
        let mesh = Mesh::rectangle(Point::new(0.0, 0.0), [1.0, 1.0], [1, 1]).unwrap();
        let bcs = ["Bdy_left", "Bdy_right", "Bdy_top", "Bdy_bottom"]
            .iter()
            .fold(EssentialBCs::new(), |bcs, marker| bcs.with(*marker, 0.5));
        let space = Space::new(mesh, PolyOrders::iso(1), bcs).unwrap();
        assert_eq!(space.num_dofs(), 0);

        let dofs = conforming_projection::<_, ProjectionError>(&space, ProjNormType::H1, |target| {
            Ok(DVector::zeros(target.orders.num_coeffs()))
        })
        .unwrap();
        assert!(dofs.is_empty());
    }

    #[test]
    fn mismatched_inputs() {
        let coarse = space(PolyOrders::iso(1));
        let reference = coarse.construct_refined_space(1).unwrap();
        let other = space(PolyOrders::iso(1));
        let projector = OrthogonalProjection::default();

        assert!(matches!(
            projector.project(&[coarse.clone()], &[reference.clone()], &[]),
            Err(ProjectionError::FieldCountMismatch { .. })
        ));
        assert!(matches!(
            projector.project(&[coarse.clone()], &[reference.clone()], &[Solution::zero(&coarse)]),
            Err(ProjectionError::Solution(SolutionError::StaleSolution { .. }))
        ));
        assert_eq!(
            projector
                .project(&[other], &[reference.clone()], &[Solution::zero(&reference)])
                .unwrap_err(),
            ProjectionError::UnrelatedSpaces { field: 0 }
        );
    }

    #[test]
    fn uncovered_targets() {
        let coarse = space(PolyOrders::iso(1));
        let reference = coarse.construct_refined_space(0).unwrap();
        let ref_solution = Solution::zero(&reference);

        let elem = &coarse.mesh().elems[0];
        let child = reference.mesh().elems[0].child_ids().unwrap()[0];
        let partial = [ref_solution.patch(&reference, child).unwrap()];

        assert_eq!(
            project_patches(&ProjectionTarget::of(elem, PolyOrders::iso(1)), &partial, ProjNormType::H1).unwrap_err(),
            ProjectionError::IncompleteCoverage { elem: 0 }
        );
    }
}
