/// Error estimation against a reference solution
pub mod estimator;
/// Strategies for choosing which Elems to refine
pub mod marking;
/// Refinement candidates and their DOF costs
pub mod candidate;
/// Projection-based selection of the best candidate
pub mod selector;

use crate::domain::{fields::Solution, ElemRefinement, RefinementError, Space};
use crate::projection::ProjectionError;
use candidate::RefinementCandidate;
use estimator::{ElemError, ErrorEstimate};
use marking::MarkingStrategy;
use selector::ProjBasedSelector;

use log::{debug, info};
use rayon::prelude::*;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RefineError {
    #[error("got {spaces} working spaces, {reference} reference spaces, {solutions} reference solutions and estimates for {estimate} fields")]
    FieldCountMismatch {
        spaces: usize,
        reference: usize,
        solutions: usize,
        estimate: usize,
    },
    #[error("single-mesh adaptation requires every field to have the same mesh")]
    MeshesDiffer,
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    #[error("failed to refine field {field}: {source}")]
    Refinement {
        field: usize,
        #[source]
        source: RefinementError,
    },
}

/// Summary of one mark-and-refine pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AdaptReport {
    /// (field, Elem) pairs flagged by the marking strategy
    pub num_marked: usize,
    /// Elem refinements applied across all fields
    pub num_refined: usize,
    /// Flagged Elems without an improving candidate
    pub num_unimproved: usize,
    /// Elems split to restore mesh regularity
    pub num_regularized: usize,
}

/// The mark-and-refine pass: flags Elems with large errors, selects a refinement for each, and applies them
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Adapt {
    pub selector: ProjBasedSelector,
    pub strategy: MarkingStrategy,
    pub threshold: f64,
    /// Each field has its own mesh. Otherwise all fields are split identically.
    pub multimesh: bool,
    /// Maximum level of hanging nodes (unbounded if `None`)
    pub regularity: Option<u8>,
}

impl Default for Adapt {
    fn default() -> Self {
        Self {
            selector: ProjBasedSelector::default(),
            strategy: MarkingStrategy::default(),
            threshold: 0.3,
            multimesh: true,
            regularity: None,
        }
    }
}

impl Adapt {
    /// Elem errors flagged by the marking strategy, largest first
    pub fn marked_elems(&self, estimate: &ErrorEstimate) -> Vec<ElemError> {
        let elem_errors = estimate.marking_errors();
        let errors: Vec<f64> = elem_errors.iter().map(|e| e.error).collect();

        self.strategy
            .mark(&errors, self.threshold)
            .into_iter()
            .map(|idx| elem_errors[idx])
            .collect()
    }

    /// Refine the working `spaces` according to the error `estimate`
    ///
    /// Spaces are only modified once a refinement has been selected for every flagged Elem.
    pub fn adapt(
        &self,
        spaces: &mut [Space],
        ref_spaces: &[Space],
        ref_solutions: &[Solution],
        estimate: &ErrorEstimate,
    ) -> Result<AdaptReport, RefineError> {
        let n = spaces.len();
        if ref_spaces.len() != n || ref_solutions.len() != n || estimate.components.len() != n {
            return Err(RefineError::FieldCountMismatch {
                spaces: n,
                reference: ref_spaces.len(),
                solutions: ref_solutions.len(),
                estimate: estimate.components.len(),
            });
        }
        if !self.multimesh && spaces.windows(2).any(|pair| !pair[0].mesh().same_structure(pair[1].mesh())) {
            return Err(RefineError::MeshesDiffer);
        }

        let marked = self.marked_elems(estimate);
        debug!("Marked {} elems with strategy {}", marked.len(), self.strategy);

        let spaces_ro: &[Space] = spaces;
        let selections = marked
            .par_iter()
            .map(|elem_error| {
                self.selector
                    .select(
                        &spaces_ro[elem_error.field],
                        &ref_spaces[elem_error.field],
                        &ref_solutions[elem_error.field],
                        elem_error.elem_id,
                    )
                    .map(|choice| (elem_error.field, elem_error.elem_id, choice))
            })
            .collect::<Result<Vec<_>, ProjectionError>>()?;

        let num_unimproved = selections.iter().filter(|(_, _, choice)| choice.is_none()).count();

        let refinements = if self.multimesh {
            multimesh_refinements(n, &selections)
        } else {
            single_mesh_refinements(spaces_ro, &selections)
        };

        let mut report = AdaptReport {
            num_marked: marked.len(),
            num_unimproved,
            ..Default::default()
        };

        for (field, (space, field_refinements)) in spaces.iter_mut().zip(refinements.iter()).enumerate() {
            if field_refinements.is_empty() {
                continue;
            }
            space
                .apply_refinements(field_refinements)
                .map_err(|source| RefineError::Refinement { field, source })?;
            report.num_refined += field_refinements.len();
        }

        if let Some(regularity) = self.regularity {
            for (field, space) in spaces.iter_mut().enumerate() {
                report.num_regularized += space
                    .regularize(regularity)
                    .map_err(|source| RefineError::Refinement { field, source })?;
            }
        }

        info!(
            "Adapted: {} marked, {} refined, {} without an improving candidate, {} split for regularity",
            report.num_marked, report.num_refined, report.num_unimproved, report.num_regularized
        );

        Ok(report)
    }
}

type Selection = (usize, usize, Option<RefinementCandidate>);

fn multimesh_refinements(num_fields: usize, selections: &[Selection]) -> Vec<Vec<ElemRefinement>> {
    let mut refinements = vec![Vec::new(); num_fields];
    for (field, elem_id, choice) in selections {
        if let Some(candidate) = choice {
            refinements[*field].push(ElemRefinement {
                elem_id: *elem_id,
                split: candidate.split,
                orders: candidate.son_orders,
            });
        }
    }
    refinements
}

/// Every field applies the finest split chosen for an Elem by any field, keeping its own son orders
fn single_mesh_refinements(spaces: &[Space], selections: &[Selection]) -> Vec<Vec<ElemRefinement>> {
    let mut by_elem: BTreeMap<usize, Vec<(usize, RefinementCandidate)>> = BTreeMap::new();
    for (field, elem_id, choice) in selections {
        if let Some(candidate) = choice {
            by_elem.entry(*elem_id).or_default().push((*field, *candidate));
        }
    }

    let mut refinements = vec![Vec::new(); spaces.len()];
    for (elem_id, choices) in by_elem {
        let split = choices
            .iter()
            .filter_map(|(_, candidate)| candidate.split)
            .reduce(|a, b| a.union(b));

        for (field, space) in spaces.iter().enumerate() {
            let own = choices.iter().find(|(f, _)| *f == field).map(|(_, candidate)| candidate.son_orders);
            if own.is_none() && split.is_none() {
                continue;
            }

            if let Some(orders) = own.or_else(|| space.elem_orders(elem_id)) {
                refinements[field].push(ElemRefinement { elem_id, split, orders });
            }
        }
    }

    refinements
}
