use super::candidate::{elem_candidates, local_dofs, CandList, RefinementCandidate};
use crate::domain::{
    fields::{Patch, Solution},
    mesh::{
        h_refinement::HRef,
        p_refinement::PolyOrders,
        primitives::{intersect_ranges, DyadicRange},
    },
    Space,
};
use crate::integration::{
    forms::{NormForm, ProjNormType},
    integrate_form,
};
use crate::projection::{project_patches, ProjectionError, ProjectionTarget};

use log::{debug, trace};
use serde::{Deserialize, Serialize};

/// Projection errors below this fraction of the reference norm are round-off
const NEGLIGIBLE_ERROR: f64 = 1e-10;

/// Multipliers applied to candidate errors, by kind of refinement
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorWeights {
    /// isotropic splits
    pub h: f64,
    /// anisotropic splits
    pub aniso: f64,
    /// p-only refinements
    pub p: f64,
}

impl Default for ErrorWeights {
    fn default() -> Self {
        Self {
            h: 2.0,
            aniso: std::f64::consts::SQRT_2,
            p: 1.0,
        }
    }
}

impl ErrorWeights {
    pub fn new(h: f64, aniso: f64, p: f64) -> Self {
        Self { h, aniso, p }
    }

    pub fn weight(&self, split: Option<HRef>) -> f64 {
        match split {
            None => self.p,
            Some(HRef::T) => self.h,
            Some(HRef::U) | Some(HRef::V) => self.aniso,
        }
    }
}

/// Chooses the refinement of an Elem which best reduces the projection error of the reference solution per added DOF
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjBasedSelector {
    pub cand_list: CandList,
    pub conv_exp: f64,
    pub max_order: u8,
    pub max_order_increase: u8,
    pub weights: ErrorWeights,
    pub norm: ProjNormType,
}

impl ProjBasedSelector {
    pub fn new(cand_list: CandList, conv_exp: f64, max_order: u8) -> Self {
        Self {
            cand_list,
            conv_exp,
            max_order,
            max_order_increase: 2,
            weights: ErrorWeights::default(),
            norm: ProjNormType::default(),
        }
    }

    pub fn set_error_weights(&mut self, h: f64, aniso: f64, p: f64) {
        self.weights = ErrorWeights::new(h, aniso, p);
    }

    /// Select the refinement of `elem_id` (an active Elem of `coarse`)
    ///
    /// Returns `None` if no candidate reduces the error while adding DOFs.
    pub fn select(
        &self,
        coarse: &Space,
        reference: &Space,
        ref_solution: &Solution,
        elem_id: usize,
    ) -> Result<Option<RefinementCandidate>, ProjectionError> {
        let elem = coarse
            .mesh()
            .elems
            .get(elem_id)
            .ok_or(ProjectionError::MissingElem(elem_id))?;

        let sources: Vec<Patch> = reference
            .mesh()
            .active_descendants(elem_id)
            .map_err(|_| ProjectionError::MissingElem(elem_id))?
            .iter()
            .filter_map(|ref_id| ref_solution.patch(reference, *ref_id))
            .collect();

        let form = NormForm::from(self.norm);
        let negligible = NEGLIGIBLE_ERROR
            * sources
                .iter()
                .map(|source| integrate_form(&form, source, None, &source.range))
                .sum::<f64>()
                .sqrt();

        let target = ProjectionTarget::of(elem, elem.poly_orders);
        let current_error = self.candidate_error(&target, None, elem.poly_orders, &sources)?.sqrt();
        let current_dofs = local_dofs(None, elem.poly_orders);

        if current_error <= negligible {
            debug!("Elem {} already matches the reference solution; it won't be refined", elem_id);
            return Ok(None);
        }

        let mut best: Option<RefinementCandidate> = None;
        for mut candidate in elem_candidates(self.cand_list, elem, self.max_order, self.max_order_increase) {
            if candidate.dofs <= current_dofs {
                continue;
            }

            let error = self.candidate_error(&target, candidate.split, candidate.son_orders, &sources)?.sqrt();
            candidate.error = if error <= negligible {
                0.0
            } else {
                error * self.weights.weight(candidate.split)
            };
            if candidate.error >= current_error {
                continue;
            }

            candidate.score = if candidate.error <= 0.0 {
                f64::INFINITY
            } else {
                (current_error.log10() - candidate.error.log10())
                    / ((candidate.dofs - current_dofs) as f64).powf(self.conv_exp)
            };

            trace!(
                "Elem {} candidate {:?} {:?}: error {:.3e}, dofs {}, score {:.4}",
                elem_id,
                candidate.split,
                candidate.son_orders,
                candidate.error,
                candidate.dofs,
                candidate.score
            );

            let better = match &best {
                None => true,
                Some(b) => candidate.score > b.score || (candidate.score == b.score && candidate.dofs < b.dofs),
            };
            if better {
                best = Some(candidate);
            }
        }

        match &best {
            Some(choice) => debug!(
                "Elem {}: chose {:?} with son orders {:?} (score {:.4})",
                elem_id, choice.split, choice.son_orders, choice.score
            ),
            None => debug!("Elem {}: no candidate improves the error; it won't be refined", elem_id),
        }

        Ok(best)
    }

    /// Squared error between the reference patches and their projection onto the candidate's sons
    fn candidate_error(
        &self,
        target: &ProjectionTarget,
        split: Option<HRef>,
        son_orders: PolyOrders,
        sources: &[Patch],
    ) -> Result<f64, ProjectionError> {
        let son_ranges: Vec<DyadicRange> = match split {
            Some(split) => split.child_ranges(&target.range),
            None => vec![target.range],
        };
        let form = NormForm::from(self.norm);

        let mut error = 0.0;
        for son_range in son_ranges {
            let son_sources: Vec<Patch> = sources
                .iter()
                .filter(|source| intersect_ranges(&source.range, &son_range).is_some())
                .copied()
                .collect();

            let projected = project_patches(&target.with_range(son_range, son_orders), &son_sources, self.norm)?;
            let son_patch = Patch {
                range: son_range,
                element_extent: target.element_extent,
                expansion: &projected,
            };

            for source in son_sources.iter() {
                if let Some(region) = intersect_ranges(&source.range, &son_range) {
                    error += integrate_form(&form, source, Some(&son_patch), &region);
                }
            }
        }

        Ok(error.max(0.0))
    }
}

impl Default for ProjBasedSelector {
    fn default() -> Self {
        Self::new(CandList::default(), 1.0, 9)
    }
}
