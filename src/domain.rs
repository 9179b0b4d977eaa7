/// Essential boundary conditions
pub mod boundary;
/// Degrees of Freedom (exact conformity structure and H1 counting)
pub mod dof;
/// Solutions (local expansions tied to a Space snapshot)
pub mod fields;
/// The internal geometric structure of a Space
pub mod mesh;

use boundary::EssentialBCs;
use dof::{DofCount, DofError, DofMap, Topology};
use mesh::{
    h_refinement::{HRef, HRefError},
    p_refinement::{PRefError, PolyOrders},
    primitives::ParaDir,
    Mesh,
};

use log::{debug, warn};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

static SNAPSHOT_TRACKER: AtomicU64 = AtomicU64::new(1);

fn next_snapshot() -> u64 {
    SNAPSHOT_TRACKER.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RefinementError {
    #[error(transparent)]
    H(#[from] HRefError),
    #[error(transparent)]
    P(#[from] PRefError),
    #[error(transparent)]
    Dof(#[from] DofError),
}

/// A change to one active Elem: an optional split, and the expansion orders of the resulting Elem(s)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElemRefinement {
    pub elem_id: usize,
    pub split: Option<HRef>,
    pub orders: PolyOrders,
}

/// The discretization of one field component: a Mesh with per-Elem expansion orders and essential boundary conditions
///
/// Every mutation renumbers the (H1-conforming) degrees of freedom and moves the Space to a new snapshot id.
/// [Solution](fields::Solution)s remember the snapshot they were computed on, so they can't be used with a Space that has changed since.
#[derive(Debug, Clone)]
pub struct Space {
    mesh: Mesh,
    essential: EssentialBCs,
    dof_map: Arc<DofMap>,
    snapshot: u64,
    origin: u64,
}

impl Space {
    /// Create a Space with uniform expansion orders on every Elem
    pub fn new(mut mesh: Mesh, orders: PolyOrders, essential: EssentialBCs) -> Result<Self, RefinementError> {
        mesh.set_global_expansion_orders(orders)?;
        Ok(Self::from_mesh(mesh, essential)?)
    }

    /// Create a Space from a Mesh, keeping its Elems' current expansion orders
    pub fn from_mesh(mesh: Mesh, essential: EssentialBCs) -> Result<Self, DofError> {
        let dof_map = Arc::new(DofMap::build(&mesh, &essential)?);
        let snapshot = next_snapshot();
        Ok(Self {
            mesh,
            essential,
            dof_map,
            snapshot,
            origin: snapshot,
        })
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn essential_bcs(&self) -> &EssentialBCs {
        &self.essential
    }

    pub fn num_dofs(&self) -> usize {
        self.dof_map.num_dofs()
    }

    pub fn dof_count(&self) -> DofCount {
        self.dof_map.count()
    }

    /// Local representation of the Space's conforming basis
    pub fn dof_map(&self) -> &DofMap {
        &self.dof_map
    }

    /// Identifier of the Space's current state
    pub fn snapshot(&self) -> u64 {
        self.snapshot
    }

    /// Is this Space a global refinement of the current state of `coarse` (or identical to it)
    pub fn is_refinement_of(&self, coarse: &Space) -> bool {
        self.origin == coarse.snapshot
    }

    pub fn elem_orders(&self, elem_id: usize) -> Option<PolyOrders> {
        self.mesh.elems.get(elem_id).map(|elem| elem.poly_orders)
    }

    /// Layout of a local coefficient vector on this Space: active Elems in ascending order with their expansion orders
    ///
    /// Each Elem contributes `(ni + 1)(nj + 1)` consecutive Legendre coefficients (row-major in `i`)
    pub fn local_layout(&self) -> Vec<(usize, PolyOrders)> {
        self.mesh
            .active_elems()
            .map(|elem| (elem.id, elem.poly_orders))
            .collect()
    }

    /// Length of a local coefficient vector on this Space
    pub fn num_coeffs(&self) -> usize {
        self.mesh
            .active_elems()
            .map(|elem| elem.poly_orders.num_coeffs())
            .sum()
    }

    /// Build the reference Space: every active Elem is split with the finest refinement it accepts,
    /// and expansion orders are raised by `order_increase`
    pub fn construct_refined_space(&self, order_increase: u8) -> Result<Space, RefinementError> {
        let mut mesh = self.mesh.clone();
        mesh.global_h_refinement()?;
        mesh.raise_expansion_orders(order_increase);

        let mut reference = Self::from_mesh(mesh, self.essential.clone())?;
        reference.origin = self.snapshot;

        debug!(
            "Reference space {} built from space {} ({} -> {} DOFs)",
            reference.snapshot, self.snapshot, self.num_dofs(), reference.num_dofs()
        );

        Ok(reference)
    }

    /// Apply a batch of Elem refinements
    ///
    /// Split Elems pass the requested orders on to all of their children. The batch is validated before the Space is modified.
    pub fn apply_refinements(&mut self, refinements: &[ElemRefinement]) -> Result<(), RefinementError> {
        let mut mesh = self.mesh.clone();

        mesh.execute_h_refinements(
            refinements
                .iter()
                .filter_map(|r| r.split.map(|split| (r.elem_id, split)))
                .collect(),
        )?;

        for refinement in refinements {
            match mesh.elems[refinement.elem_id].child_ids() {
                Some(child_ids) if refinement.split.is_some() => {
                    for child_id in child_ids {
                        mesh.set_expansion_orders(child_id, refinement.orders)?;
                    }
                }
                _ => mesh.set_expansion_orders(refinement.elem_id, refinement.orders)?,
            }
        }

        self.dof_map = Arc::new(DofMap::build(&mesh, &self.essential)?);
        self.mesh = mesh;
        self.move_snapshot();

        Ok(())
    }

    /// Split Elems until no side of an active Elem is more than `2^regularity` times longer than a neighboring side it
    /// contains. Children inherit their parent's expansion orders.
    ///
    /// Returns the number of Elems which were split
    pub fn regularize(&mut self, regularity: u8) -> Result<usize, RefinementError> {
        let mut mesh = self.mesh.clone();
        let mut num_split = 0;

        loop {
            let offenders = Topology::build(&mesh).irregular_elems(regularity);
            if offenders.is_empty() {
                break;
            }

            let mut splits: BTreeMap<usize, HRef> = BTreeMap::new();
            for (elem_id, dir) in offenders {
                let levels = mesh.elems[elem_id].h_levels;
                let split = if levels.admits(HRef::T) {
                    HRef::T
                } else {
                    match (dir, levels.can_refine(dir)) {
                        (ParaDir::U, true) => HRef::U,
                        (ParaDir::V, true) => HRef::V,
                        _ => {
                            warn!("Elem {} can't be split to regularize the mesh; it is at the maximum h-level", elem_id);
                            continue;
                        }
                    }
                };

                splits
                    .entry(elem_id)
                    .and_modify(|existing| *existing = existing.union(split))
                    .or_insert(split);
            }

            if splits.is_empty() {
                break;
            }

            num_split += splits.len();
            mesh.execute_h_refinements(splits.into_iter().collect())?;
        }

        if num_split > 0 {
            debug!("Regularization split {} elems", num_split);
            self.dof_map = Arc::new(DofMap::build(&mesh, &self.essential)?);
            self.mesh = mesh;
            self.move_snapshot();
        }

        Ok(num_split)
    }

    fn move_snapshot(&mut self) {
        self.snapshot = next_snapshot();
        self.origin = self.snapshot;
    }
}

/// Build the reference Spaces of several fields concurrently
pub fn construct_refined_spaces(spaces: &[Space], order_increase: u8) -> Result<Vec<Space>, RefinementError> {
    spaces
        .par_iter()
        .map(|space| space.construct_refined_space(order_increase))
        .collect()
}
