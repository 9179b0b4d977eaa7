use crate::basis::LegendrePoly;
use crate::domain::Space;
use crate::integration::{
    forms::ProjNormType,
    glq::{gauss_rule, scale_gauss_quad_points},
    region_jacobian,
};
use crate::projection::{conforming_projection, ProjectionError};

use nalgebra::DVector;
use std::fmt;
use thiserror::Error;

/// Extra quadrature points (beyond the expansion orders) used to sample closed-form fields
const EXTRA_QUAD_POINTS: usize = 6;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolverError {
    #[error("discrete system is singular: {reason}")]
    Singular { reason: String },
    #[error("iterative solver did not converge after {iterations} iterations")]
    NotConverged { iterations: usize },
    #[error("solver expected {expected} unknowns/fields but got {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("solution of field {field} contains non-finite values")]
    NonFinite { field: usize },
}

impl From<ProjectionError> for SolverError {
    fn from(err: ProjectionError) -> Self {
        Self::Singular { reason: err.to_string() }
    }
}

/// Assembles and solves the discrete problem on a set of Spaces (one per field component)
///
/// The returned vector concatenates one block per field, each holding the values of its Space's
/// [conforming DOFs](Space::num_dofs). Use [vector_to_solutions](crate::domain::fields::vector_to_solutions) to split it.
pub trait DiscreteSolver {
    fn solve(&mut self, spaces: &[Space]) -> Result<Vec<f64>, SolverError>;
}

impl<S: DiscreteSolver + ?Sized> DiscreteSolver for Box<S> {
    fn solve(&mut self, spaces: &[Space]) -> Result<Vec<f64>, SolverError> {
        (**self).solve(spaces)
    }
}

type FieldFn = Box<dyn Fn(f64, f64) -> f64 + Send + Sync>;

/// A stand-in solver which returns the L2 best approximation of known closed-form fields among each Space's
/// conforming functions
///
/// Useful for manufactured-solution runs, where the exact solution of the problem is known ahead of time.
/// Essential boundary values of the Spaces are imposed, so they should agree with the fields.
pub struct ExactSolutionSolver {
    fields: Vec<FieldFn>,
    num_solves: usize,
}

impl ExactSolutionSolver {
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            num_solves: 0,
        }
    }

    /// Add a field component `f(x, y)`
    pub fn with_field(mut self, field: impl Fn(f64, f64) -> f64 + Send + Sync + 'static) -> Self {
        self.fields.push(Box::new(field));
        self
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    /// Number of completed calls to [solve](DiscreteSolver::solve)
    pub fn num_solves(&self) -> usize {
        self.num_solves
    }

    fn approximate(field_idx: usize, field: &FieldFn, space: &Space) -> Result<Vec<f64>, SolverError> {
        conforming_projection(space, ProjNormType::L2, |target| {
            let elem = &space.mesh().elems[target.elem_id];
            let (ni, nj) = (target.orders.ni as usize, target.orders.nj as usize);

            let (u_points, u_weights) = gauss_rule(ni + EXTRA_QUAD_POINTS);
            let (v_points, v_weights) = gauss_rule(nj + EXTRA_QUAD_POINTS);
            let (_, us) = scale_gauss_quad_points(&u_points, elem.range[0][0] as f64, elem.range[0][1] as f64);
            let (_, vs) = scale_gauss_quad_points(&v_points, elem.range[1][0] as f64, elem.range[1][1] as f64);

            let leg_x = LegendrePoly::with(target.orders.ni, &u_points);
            let leg_y = LegendrePoly::with(target.orders.nj, &v_points);

            let mut values = Vec::with_capacity(us.len() * vs.len());
            for u in us.iter() {
                for v in vs.iter() {
                    let point = elem.element.real_point(*u, *v);
                    let value = field(point.x, point.y);
                    if !value.is_finite() {
                        return Err(SolverError::NonFinite { field: field_idx });
                    }
                    values.push(value);
                }
            }

            let jacobian = region_jacobian(target.element_extent, &target.range);
            let mut load = DVector::zeros(target.orders.num_coeffs());
            for i in 0..=ni {
                for j in 0..=nj {
                    let mut sum = 0.0;
                    for (m, wu) in u_weights.iter().enumerate() {
                        for (n, wv) in v_weights.iter().enumerate() {
                            sum += wu * wv * values[m * vs.len() + n] * leg_x.l[i][m] * leg_y.l[j][n];
                        }
                    }
                    load[i * (nj + 1) + j] = sum * jacobian;
                }
            }
            Ok(load)
        })
    }
}

impl Default for ExactSolutionSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExactSolutionSolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExactSolutionSolver")
            .field("num_fields", &self.fields.len())
            .field("num_solves", &self.num_solves)
            .finish()
    }
}

impl DiscreteSolver for ExactSolutionSolver {
    fn solve(&mut self, spaces: &[Space]) -> Result<Vec<f64>, SolverError> {
        if spaces.len() != self.fields.len() {
            return Err(SolverError::DimensionMismatch {
                expected: self.fields.len(),
                found: spaces.len(),
            });
        }

        let mut solution = Vec::with_capacity(spaces.iter().map(|space| space.num_dofs()).sum());
        for (field_idx, (field, space)) in self.fields.iter().zip(spaces.iter()).enumerate() {
            solution.extend(Self::approximate(field_idx, field, space)?);
        }

        self.num_solves += 1;
        Ok(solution)
    }
}
