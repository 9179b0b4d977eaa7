use crate::domain::mesh::{
    elem::Elem,
    h_refinement::{HLevels, HRef},
    p_refinement::PolyOrders,
    primitives::ParaDir,
};
use serde::{Deserialize, Serialize};

/// Predefined lists of refinement candidates
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandList {
    /// p-refinement, both orders raised together
    PIso,
    /// p-refinement, orders raised independently
    PAniso,
    /// isotropic h-refinement
    HIso,
    /// isotropic and anisotropic h-refinement
    HAniso,
    /// isotropic p- and h-refinement
    HpIso,
    /// isotropic p-refinement with isotropic and anisotropic h-refinement
    HpAnisoH,
    /// anisotropic p-refinement with isotropic h-refinement
    HpAnisoP,
    /// anisotropic p- and h-refinement
    #[default]
    HpAniso,
}

impl CandList {
    /// Does the list contain p-only candidates
    pub fn has_p(&self) -> bool {
        !matches!(self, Self::HIso | Self::HAniso)
    }

    /// Does the list contain h-refinements
    pub fn has_h(&self) -> bool {
        !matches!(self, Self::PIso | Self::PAniso)
    }

    /// Does the list contain anisotropic (`U` / `V`) splits
    pub fn has_aniso_h(&self) -> bool {
        matches!(self, Self::HAniso | Self::HpAnisoH | Self::HpAniso)
    }

    /// Are orders raised independently in each direction
    pub fn has_aniso_p(&self) -> bool {
        matches!(self, Self::PAniso | Self::HpAnisoP | Self::HpAniso)
    }

    /// Can the sons of a split have raised orders
    fn raises_son_orders(&self) -> bool {
        matches!(self, Self::HpIso | Self::HpAnisoH | Self::HpAnisoP | Self::HpAniso)
    }
}

/// One way of refining an Elem: an optional split, and the orders given to the resulting Elem(s)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RefinementCandidate {
    pub split: Option<HRef>,
    pub son_orders: PolyOrders,
    /// Local DOF count of the refined Elem (see [local_dofs])
    pub dofs: usize,
    /// Weighted projection error (filled in by the selector)
    pub error: f64,
    /// Selection score (filled in by the selector)
    pub score: f64,
}

impl RefinementCandidate {
    pub fn new(split: Option<HRef>, son_orders: PolyOrders) -> Self {
        Self {
            split,
            son_orders,
            dofs: local_dofs(split, son_orders),
            error: f64::NAN,
            score: 0.0,
        }
    }

    /// Number of Elems the candidate produces
    pub fn num_sons(&self) -> usize {
        self.split.map_or(1, |split| split.num_children())
    }
}

/// Conforming DOF count of an Elem refined into a grid of sons with uniform orders
///
/// `(nu + 1)(nv + 1)` vertices, `order - 1` DOFs on each of the grid's sides, and `(ni - 1)(nj - 1)` bubbles per son
pub fn local_dofs(split: Option<HRef>, orders: PolyOrders) -> usize {
    let (nu, nv) = match split {
        None => (1, 1),
        Some(split) => (
            if split.splits(ParaDir::U) { 2 } else { 1 },
            if split.splits(ParaDir::V) { 2 } else { 1 },
        ),
    };
    let (a, b) = (orders.ni as usize - 1, orders.nj as usize - 1);

    (nu + 1) * (nv + 1) + nu * (nv + 1) * a + (nu + 1) * nv * b + nu * nv * a * b
}

/// Enumerate the candidates of `cand_list` for an Elem with the given orders and h-levels
///
/// p-only candidates come first, then `T`, `U` and `V` splits. Son orders never go below the Elem's orders or above `max_order`.
pub fn enumerate_candidates(
    cand_list: CandList,
    orders: PolyOrders,
    levels: HLevels,
    max_order: u8,
    max_order_increase: u8,
) -> Vec<RefinementCandidate> {
    // raised orders, if they stay within max_order
    let raised = |a: u8, b: u8| match (orders.ni.checked_add(a), orders.nj.checked_add(b)) {
        (Some(ni), Some(nj)) if ni <= max_order && nj <= max_order => Some(PolyOrders::from(ni, nj)),
        _ => None,
    };
    let max_order_increase = max_order_increase.min(max_order);
    let mut candidates = Vec::new();

    if cand_list.has_p() {
        if cand_list.has_aniso_p() {
            for a in 0..=max_order_increase {
                for b in 0..=max_order_increase {
                    if (a, b) == (0, 0) {
                        continue;
                    }
                    if let Some(son_orders) = raised(a, b) {
                        candidates.push(RefinementCandidate::new(None, son_orders));
                    }
                }
            }
        } else {
            for k in 1..=max_order_increase {
                if let Some(son_orders) = raised(k, k) {
                    candidates.push(RefinementCandidate::new(None, son_orders));
                }
            }
        }
    }

    if cand_list.has_h() {
        let splits: &[HRef] = if cand_list.has_aniso_h() {
            &[HRef::T, HRef::U, HRef::V]
        } else {
            &[HRef::T]
        };
        let max_inc = if cand_list.raises_son_orders() { max_order_increase } else { 0 };

        for split in splits.iter().filter(|split| levels.admits(**split)) {
            for a in 0..=max_inc {
                for b in 0..=max_inc {
                    if !cand_list.has_aniso_p() && a != b {
                        continue;
                    }
                    if let Some(son_orders) = raised(a, b) {
                        candidates.push(RefinementCandidate::new(Some(*split), son_orders));
                    }
                }
            }
        }
    }

    candidates
}

/// Candidates for an existing Elem
pub fn elem_candidates(cand_list: CandList, elem: &Elem, max_order: u8, max_order_increase: u8) -> Vec<RefinementCandidate> {
    enumerate_candidates(cand_list, elem.poly_orders, elem.h_levels, max_order, max_order_increase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mesh::primitives::MAX_H_LEVEL;

    #[test]
    fn local_dof_counts() {
        assert_eq!(local_dofs(None, PolyOrders::iso(1)), 4);
        assert_eq!(local_dofs(None, PolyOrders::from(3, 2)), 12);
        assert_eq!(local_dofs(Some(HRef::T), PolyOrders::iso(1)), 9);
        assert_eq!(local_dofs(Some(HRef::T), PolyOrders::iso(2)), 25);
        assert_eq!(local_dofs(Some(HRef::U), PolyOrders::iso(2)), 15);
        assert_eq!(local_dofs(Some(HRef::V), PolyOrders::from(3, 1)), 4 * 3);
    }

    #[test]
    fn candidate_lists() {
        let orders = PolyOrders::from(2, 3);
        let levels = HLevels::default();
        let count = |list| enumerate_candidates(list, orders, levels, 9, 2).len();

        assert_eq!(count(CandList::PIso), 2);
        assert_eq!(count(CandList::PAniso), 8);
        assert_eq!(count(CandList::HIso), 1);
        assert_eq!(count(CandList::HAniso), 3);
        assert_eq!(count(CandList::HpIso), 2 + 3);
        assert_eq!(count(CandList::HpAnisoH), 2 + 3 * 3);
        assert_eq!(count(CandList::HpAnisoP), 8 + 9);
        assert_eq!(count(CandList::HpAniso), 8 + 3 * 9);

        let candidates = enumerate_candidates(CandList::HpAniso, orders, levels, 9, 2);
        assert_eq!(candidates[0].split, None);
        assert_eq!(candidates[0].son_orders, PolyOrders::from(2, 4));
        assert_eq!(candidates[8].split, Some(HRef::T));
        assert_eq!(candidates[8].son_orders, orders);
        assert_eq!(candidates.last().unwrap().split, Some(HRef::V));
        assert!(candidates.iter().all(|c| c.son_orders.dominates(&orders)));
    }

    #[test]
    fn admissibility() {
        // orders are capped
        let capped = enumerate_candidates(CandList::HpAniso, PolyOrders::from(9, 8), HLevels::default(), 9, 2);
        assert!(capped.iter().all(|c| c.son_orders.ni <= 9 && c.son_orders.nj <= 9));
        assert_eq!(capped.iter().filter(|c| c.split.is_none()).count(), 1);

        // no splits in a direction at the maximum h-level
        let levels = HLevels::from(MAX_H_LEVEL, 3);
        let splits: Vec<_> = enumerate_candidates(CandList::HAniso, PolyOrders::iso(2), levels, 9, 1)
            .iter()
            .map(|c| c.split)
            .collect();
        assert_eq!(splits, vec![Some(HRef::V)]);

        // increments beyond the order range don't overflow
        let wide = enumerate_candidates(CandList::HpAniso, PolyOrders::iso(9), HLevels::default(), 9, 250);
        assert!(wide.iter().all(|c| c.son_orders == PolyOrders::iso(9) && c.split.is_some()));
        assert_eq!(wide.len(), 3);
        let all = enumerate_candidates(CandList::HpAniso, PolyOrders::iso(1), HLevels::default(), 3, u8::MAX);
        assert_eq!(all.iter().filter(|c| c.split.is_none()).count(), 8);

        assert!(CandList::HpAnisoH.has_aniso_h());
        assert!(!CandList::HpAnisoP.has_aniso_h());
        assert_eq!(CandList::default(), CandList::HpAniso);
    }
}
