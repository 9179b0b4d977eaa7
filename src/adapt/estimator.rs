use crate::domain::{
    fields::{Solution, SolutionError},
    Space,
};
use crate::integration::{
    forms::{ErrorForm, NormForm, ProjNormType},
    integrate_form,
};

use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Squared reference norms at or below this are treated as zero
pub const ZERO_NORM_TOLERANCE: f64 = 1e-24;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EstimateError {
    #[error("got {coarse} working spaces, {coarse_solutions} working solutions, {reference} reference spaces and {ref_solutions} reference solutions")]
    FieldCountMismatch {
        coarse: usize,
        coarse_solutions: usize,
        reference: usize,
        ref_solutions: usize,
    },
    #[error(transparent)]
    Solution(#[from] SolutionError),
    #[error("reference space of field {field} was not built from the current working space")]
    UnrelatedSpaces { field: usize },
    #[error("Elem {0} doesn't exist in the reference space")]
    MissingElem(usize),
}

/// How the relative errors of several field components are combined into one total
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCombination {
    /// `sqrt(Σ rel_c²)`
    #[default]
    Euclidean,
    /// `sqrt(Σ err_c² / Σ norm_c²)`
    NormWeighted,
    /// `max rel_c`
    Maximum,
}

/// Error of one field component
#[derive(Clone, Debug, PartialEq)]
pub struct ComponentError {
    /// Squared error on each active working Elem
    pub elem_errors: BTreeMap<usize, f64>,
    /// Squared norm of the reference solution
    pub norm_squared: f64,
    /// Relative error (0 for degenerate components)
    pub rel: f64,
    /// The reference solution has (numerically) zero norm
    pub degenerate: bool,
}

impl ComponentError {
    pub fn new(elem_errors: BTreeMap<usize, f64>, norm_squared: f64) -> Self {
        let degenerate = norm_squared <= ZERO_NORM_TOLERANCE;
        let error_squared: f64 = elem_errors.values().sum();

        Self {
            rel: if degenerate {
                0.0
            } else {
                (error_squared / norm_squared).sqrt()
            },
            elem_errors,
            norm_squared,
            degenerate,
        }
    }

    pub fn error_squared(&self) -> f64 {
        self.elem_errors.values().sum()
    }
}

/// An Elem's error as seen by the marking strategies
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ElemError {
    pub field: usize,
    pub elem_id: usize,
    pub error: f64,
}

/// Errors of all field components, and their combined total
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorEstimate {
    pub components: Vec<ComponentError>,
    pub combination: ErrorCombination,
    total: f64,
}

impl ErrorEstimate {
    pub fn new(components: Vec<ComponentError>, combination: ErrorCombination) -> Self {
        let total = match combination {
            ErrorCombination::Euclidean => components.iter().map(|c| c.rel.powi(2)).sum::<f64>().sqrt(),
            ErrorCombination::NormWeighted => {
                let (err, norm) = components
                    .iter()
                    .filter(|c| !c.degenerate)
                    .fold((0.0, 0.0), |(err, norm), c| (err + c.error_squared(), norm + c.norm_squared));
                if norm <= ZERO_NORM_TOLERANCE {
                    0.0
                } else {
                    (err / norm).sqrt()
                }
            }
            ErrorCombination::Maximum => components.iter().map(|c| c.rel).fold(0.0, f64::max),
        };

        Self {
            components,
            combination,
            total,
        }
    }

    /// Combined relative error
    pub fn total(&self) -> f64 {
        self.total
    }

    /// Combined relative error in percent
    pub fn total_percent(&self) -> f64 {
        self.total * 100.0
    }

    /// Relative errors of every component in percent
    pub fn component_percents(&self) -> Vec<f64> {
        self.components.iter().map(|c| c.rel * 100.0).collect()
    }

    /// Normalized squared Elem errors of all non-degenerate components, in (field, elem) order
    ///
    /// Errors are divided by the component's squared norm (or by the sum of all squared norms for
    /// [NormWeighted](ErrorCombination::NormWeighted)) so that they are comparable across components.
    pub fn marking_errors(&self) -> Vec<ElemError> {
        let norm_sum: f64 = self
            .components
            .iter()
            .filter(|c| !c.degenerate)
            .map(|c| c.norm_squared)
            .sum();

        self.components
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.degenerate)
            .flat_map(|(field, c)| {
                let scale = match self.combination {
                    ErrorCombination::NormWeighted => norm_sum,
                    _ => c.norm_squared,
                };
                c.elem_errors.iter().map(move |(elem_id, err)| ElemError {
                    field,
                    elem_id: *elem_id,
                    error: err / scale,
                })
            })
            .collect()
    }
}

/// Computes the error of working solutions against reference solutions
pub trait Estimator: Send + Sync {
    fn estimate(
        &self,
        coarse_spaces: &[Space],
        coarse_solutions: &[Solution],
        ref_spaces: &[Space],
        ref_solutions: &[Solution],
    ) -> Result<ErrorEstimate, EstimateError>;
}

/// Integrates an [ErrorForm] of `u_ref - u_coarse` over the reference Elems descending from each working Elem
pub struct ReferenceEstimator {
    default_form: NormForm,
    forms: BTreeMap<usize, Box<dyn ErrorForm>>,
    combination: ErrorCombination,
}

impl ReferenceEstimator {
    pub fn new(norm: ProjNormType, combination: ErrorCombination) -> Self {
        Self {
            default_form: NormForm::from(norm),
            forms: BTreeMap::new(),
            combination,
        }
    }

    /// Measure errors of one field component with a custom form
    pub fn set_error_form(&mut self, field: usize, form: impl ErrorForm + 'static) {
        self.forms.insert(field, Box::new(form));
    }

    pub fn with_error_form(mut self, field: usize, form: impl ErrorForm + 'static) -> Self {
        self.set_error_form(field, form);
        self
    }

    pub fn combination(&self) -> ErrorCombination {
        self.combination
    }

    fn form(&self, field: usize) -> &dyn ErrorForm {
        match self.forms.get(&field) {
            Some(form) => form.as_ref(),
            None => &self.default_form,
        }
    }

    fn estimate_field(
        &self,
        field: usize,
        coarse: &Space,
        coarse_solution: &Solution,
        reference: &Space,
        ref_solution: &Solution,
    ) -> Result<ComponentError, EstimateError> {
        coarse_solution.check_space(coarse)?;
        ref_solution.check_space(reference)?;
        if !reference.is_refinement_of(coarse) {
            return Err(EstimateError::UnrelatedSpaces { field });
        }

        let form = self.form(field);

        let per_elem = coarse
            .mesh()
            .active_elem_ids()
            .into_par_iter()
            .map(|elem_id| {
                let coarse_patch = coarse_solution
                    .patch(coarse, elem_id)
                    .ok_or(EstimateError::MissingElem(elem_id))?;

                let mut err = 0.0;
                let mut norm = 0.0;
                for ref_id in reference
                    .mesh()
                    .active_descendants(elem_id)
                    .map_err(|_| EstimateError::MissingElem(elem_id))?
                {
                    let ref_patch = ref_solution
                        .patch(reference, ref_id)
                        .ok_or(EstimateError::MissingElem(ref_id))?;

                    err += integrate_form(form, &ref_patch, Some(&coarse_patch), &ref_patch.range);
                    norm += integrate_form(form, &ref_patch, None, &ref_patch.range);
                }

                Ok((elem_id, err.max(0.0), norm))
            })
            .collect::<Result<Vec<(usize, f64, f64)>, EstimateError>>()?;

        let norm_squared: f64 = per_elem.iter().map(|(_, _, norm)| norm).sum();
        let component = ComponentError::new(
            per_elem.iter().map(|(elem_id, err, _)| (*elem_id, *err)).collect(),
            norm_squared,
        );

        if component.degenerate {
            warn!(
                "Reference solution of field {} has zero norm; its relative error is taken to be 0 and none of its elems will be marked",
                field
            );
        }

        Ok(component)
    }
}

impl Default for ReferenceEstimator {
    fn default() -> Self {
        Self::new(ProjNormType::default(), ErrorCombination::default())
    }
}

impl fmt::Debug for ReferenceEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceEstimator")
            .field("default_form", &self.default_form)
            .field("custom_forms", &self.forms.keys().collect::<Vec<_>>())
            .field("combination", &self.combination)
            .finish()
    }
}

impl Estimator for ReferenceEstimator {
    fn estimate(
        &self,
        coarse_spaces: &[Space],
        coarse_solutions: &[Solution],
        ref_spaces: &[Space],
        ref_solutions: &[Solution],
    ) -> Result<ErrorEstimate, EstimateError> {
        let n = coarse_spaces.len();
        if coarse_solutions.len() != n || ref_spaces.len() != n || ref_solutions.len() != n {
            return Err(EstimateError::FieldCountMismatch {
                coarse: n,
                coarse_solutions: coarse_solutions.len(),
                reference: ref_spaces.len(),
                ref_solutions: ref_solutions.len(),
            });
        }

        let components = (0..n)
            .map(|field| {
                self.estimate_field(
                    field,
                    &coarse_spaces[field],
                    &coarse_solutions[field],
                    &ref_spaces[field],
                    &ref_solutions[field],
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let estimate = ErrorEstimate::new(components, self.combination);
        debug!(
            "Estimated errors {:?} % (total {:.6} %)",
            estimate.component_percents(),
            estimate.total_percent()
        );

        Ok(estimate)
    }
}
