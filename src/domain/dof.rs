use super::boundary::EssentialBCs;
use super::mesh::{
    element::Element,
    p_refinement::PolyOrders,
    primitives::{local_coordinate, ParaDir, UNIT},
    Mesh,
};
use crate::basis::{edge_fn_scale, legendre_restriction, LegendrePoly, VERTEX_FNS};

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// A straight line carrying the sides of active Elems
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LineKey {
    /// A side of a base `Element`, identified by its sorted node-id pair (shared between neighboring `Element`s)
    BaseEdge([usize; 2]),
    /// A line strictly inside a base `Element`
    Interior {
        element: usize,
        dir: ParaDir,
        offset: u32,
    },
}

/// A vertex of an active Elem, identified exactly (independent of which Elem references it)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VertexKey {
    /// A node of the base mesh
    Node(usize),
    /// A point strictly inside a base edge (dyadic position along the edge)
    OnEdge([usize; 2], u32),
    /// A point strictly inside a base `Element`
    Interior(usize, u32, u32),
}

/// One side of an active Elem on a [LineKey]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Side {
    pub elem_id: usize,
    /// dyadic extent along the line
    pub span: [u32; 2],
    /// expansion order of the Elem along the line
    pub order: u8,
}

impl Side {
    fn len(&self) -> u32 {
        self.span[1] - self.span[0]
    }

    /// Is `other` a strict subset of this side
    fn strictly_contains(&self, other: &Side) -> bool {
        self.span[0] <= other.span[0] && other.span[1] <= self.span[1] && self.len() > other.len()
    }

    fn overlaps(&self, span: &[u32; 2]) -> bool {
        self.span[0] < span[1] && span[0] < self.span[1]
    }
}

#[derive(Clone, Debug)]
struct LineSides {
    dir: ParaDir,
    sides: Vec<Side>,
}

/// Exact conformity structure of a Mesh's active Elems
///
/// Sides of neighboring Elems which lie on the same line are compared through their dyadic spans. A side which is
/// strictly contained in a longer side on the same line is *constrained*, and a vertex lying strictly inside some
/// side is *hanging*. Neither carries degrees of freedom.
#[derive(Clone, Debug)]
pub struct Topology {
    lines: BTreeMap<LineKey, LineSides>,
    vertices: BTreeMap<VertexKey, Vec<(LineKey, u32)>>,
}

impl Topology {
    pub fn build(mesh: &Mesh) -> Self {
        let mut lines: BTreeMap<LineKey, LineSides> = BTreeMap::new();
        let mut vertices: BTreeMap<VertexKey, Vec<(LineKey, u32)>> = BTreeMap::new();

        for elem in mesh.active_elems() {
            let element = elem.element.as_ref();
            let [[u0, u1], [v0, v1]] = elem.range;

            let south = line_key(element, ParaDir::U, v0);
            let north = line_key(element, ParaDir::U, v1);
            let west = line_key(element, ParaDir::V, u0);
            let east = line_key(element, ParaDir::V, u1);

            for (line, dir, span, order) in [
                (south, ParaDir::U, [u0, u1], elem.poly_orders.ni),
                (north, ParaDir::U, [u0, u1], elem.poly_orders.ni),
                (west, ParaDir::V, [v0, v1], elem.poly_orders.nj),
                (east, ParaDir::V, [v0, v1], elem.poly_orders.nj),
            ] {
                lines
                    .entry(line)
                    .or_insert_with(|| LineSides {
                        dir,
                        sides: Vec::new(),
                    })
                    .sides
                    .push(Side {
                        elem_id: elem.id,
                        span,
                        order,
                    });
            }

            for (u, v, horizontal, vertical) in [
                (u0, v0, south, west),
                (u1, v0, south, east),
                (u0, v1, north, west),
                (u1, v1, north, east),
            ] {
                vertices
                    .entry(vertex_key(element, u, v))
                    .or_default()
                    .extend([(horizontal, u), (vertical, v)]);
            }
        }

        Self { lines, vertices }
    }

    /// Does a vertex lie strictly inside the side of some active Elem
    pub fn is_hanging(&self, vertex: &VertexKey) -> bool {
        self.vertices.get(vertex).map_or(false, |lines_through| {
            lines_through.iter().any(|(line, pos)| {
                self.lines[line]
                    .sides
                    .iter()
                    .any(|side| side.span[0] < *pos && *pos < side.span[1])
            })
        })
    }

    pub fn vertices(&self) -> impl Iterator<Item = &VertexKey> + '_ {
        self.vertices.keys()
    }

    /// Lines passing through a vertex, with the vertex's dyadic position along each
    pub fn vertex_lines(&self, vertex: &VertexKey) -> &[(LineKey, u32)] {
        self.vertices.get(vertex).map_or(&[], |lines| lines.as_slice())
    }

    /// Edge segments which carry degrees of freedom with their (minimum rule) expansion orders
    ///
    /// Every side which isn't constrained by a longer side defines a segment. The segment's order is the
    /// minimum order among all sides overlapping it (including the constrained sides it contains)
    pub fn segments(&self) -> BTreeMap<(LineKey, [u32; 2]), u8> {
        let mut segments = BTreeMap::new();

        for (line, line_sides) in self.lines.iter() {
            for side in line_sides.sides.iter() {
                if line_sides.sides.iter().any(|other| other.strictly_contains(side)) {
                    continue;
                }

                let order = line_sides
                    .sides
                    .iter()
                    .filter(|other| other.overlaps(&side.span))
                    .map(|other| other.order)
                    .min()
                    .unwrap_or(side.order);

                segments.insert((*line, side.span), order);
            }
        }

        segments
    }

    /// Elems whose sides are more than `2^regularity` times longer than a neighboring side they contain
    ///
    /// Returns each offending Elem along with the direction of its offending side
    pub fn irregular_elems(&self, regularity: u8) -> BTreeSet<(usize, ParaDir)> {
        let max_ratio = 1_u64 << regularity.min(31);
        let mut offenders = BTreeSet::new();

        for line_sides in self.lines.values() {
            for long in line_sides.sides.iter() {
                if line_sides.sides.iter().any(|short| {
                    long.strictly_contains(short) && long.len() as u64 > max_ratio * short.len() as u64
                }) {
                    offenders.insert((long.elem_id, line_sides.dir));
                }
            }
        }

        offenders
    }
}

/// Breakdown of a conforming H1 degree of freedom count
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DofCount {
    pub vertex: usize,
    pub edge: usize,
    pub bubble: usize,
}

impl DofCount {
    pub fn total(&self) -> usize {
        self.vertex + self.edge + self.bubble
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DofError {
    #[error("constraints of {0} hanging vertices could not be resolved")]
    UnresolvedConstraints(usize),
    #[error("a side of Elem {0} doesn't lie on any edge segment")]
    DetachedSide(usize),
}

/// `constant + Σ weight * x[dof]`
#[derive(Clone, Debug, Default, PartialEq)]
struct Combination {
    terms: BTreeMap<usize, f64>,
    constant: f64,
}

impl Combination {
    fn dof(dof: usize) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(dof, 1.0);
        Self { terms, constant: 0.0 }
    }

    fn constant(value: f64) -> Self {
        Self {
            terms: BTreeMap::new(),
            constant: value,
        }
    }

    fn add_dof(&mut self, dof: usize, weight: f64) {
        *self.terms.entry(dof).or_insert(0.0) += weight;
    }

    fn add_scaled(&mut self, other: &Self, scale: f64) {
        if scale == 0.0 {
            return;
        }
        self.constant += scale * other.constant;
        for (dof, weight) in other.terms.iter() {
            self.add_dof(*dof, scale * weight);
        }
    }
}

/// Legendre series (with affine coefficients) evaluated at `t`
fn evaluate(coeffs: &[Combination], t: f64) -> Combination {
    let leg = LegendrePoly::with(coeffs.len().saturating_sub(1) as u8, &[t]);
    let mut value = Combination::default();
    for (k, c) in coeffs.iter().enumerate() {
        value.add_scaled(c, leg.l[k][0]);
    }
    value
}

fn end_value(coeffs: &[Combination], end: usize) -> Combination {
    let mut value = Combination::default();
    for (k, c) in coeffs.iter().enumerate() {
        value.add_scaled(c, if end == 0 && k % 2 == 1 { -1.0 } else { 1.0 });
    }
    value
}

/// A trace minus the linear function matching it at both ends
fn edge_part(trace: &[Combination]) -> Vec<Combination> {
    let (start, end) = (end_value(trace, 0), end_value(trace, 1));
    let mut part = trace.to_vec();
    part[0].add_scaled(&start, -0.5);
    part[0].add_scaled(&end, -0.5);
    part[1].add_scaled(&start, 0.5);
    part[1].add_scaled(&end, -0.5);
    part
}

/// An edge segment (unconstrained side) with its DOFs
#[derive(Clone, Copy, Debug)]
struct Segment {
    span: [u32; 2],
    order: u8,
    /// first of the segment's `order - 1` edge DOFs (`None` on essential boundaries, where they are zero)
    first_dof: Option<usize>,
}

/// Local Legendre coefficients of an active Elem as an affine function of the global DOF vector:
/// `basis * x[dofs] + lift`, in the Elem's row-major (in `i`) coefficient layout
#[derive(Clone, Debug, PartialEq)]
pub struct ElemBasis {
    pub orders: PolyOrders,
    pub dofs: Vec<usize>,
    /// `(ni + 1)(nj + 1) x dofs.len()`
    pub basis: DMatrix<f64>,
    /// contribution of prescribed boundary values
    pub lift: DVector<f64>,
}

impl ElemBasis {
    /// Local coefficients for a global DOF vector (which must cover every DOF of the Elem)
    pub fn expand(&self, x: &[f64]) -> DVector<f64> {
        let local = DVector::from_iterator(self.dofs.len(), self.dofs.iter().map(|dof| x[*dof]));
        &self.basis * local + &self.lift
    }
}

/// Numbering of an H1-conforming hierarchical discretization and its element-local representation
///
/// DOFs are numbered vertices first, then edge segments, then bubbles of each active Elem (by id):
/// * one per vertex that is neither hanging nor on an essential boundary
/// * `order - 1` per edge segment which isn't on an essential boundary (minimum rule order)
/// * `(ni - 1)(nj - 1)` per active Elem
///
/// Hanging vertices and constrained sides take the values of the segment that contains them, so every field
/// expanded through this map is continuous. Essential boundaries carry their prescribed (constant) values in the
/// lift. A node shared by essential boundaries with different values takes the value of its first boundary edge.
#[derive(Clone, Debug)]
pub struct DofMap {
    count: DofCount,
    elems: BTreeMap<usize, ElemBasis>,
}

impl DofMap {
    pub fn build(mesh: &Mesh, essential: &EssentialBCs) -> Result<Self, DofError> {
        let topology = Topology::build(mesh);
        let (essential_edges, essential_nodes) = essential_values(mesh, essential);

        let mut count = DofCount::default();
        let mut next_dof = 0;

        let mut vertex_values: BTreeMap<VertexKey, Combination> = BTreeMap::new();
        let mut hanging = Vec::new();
        for vertex in topology.vertices() {
            if topology.is_hanging(vertex) {
                hanging.push(*vertex);
                continue;
            }

            let prescribed = match vertex {
                VertexKey::Node(node_id) => essential_nodes.get(node_id),
                VertexKey::OnEdge(nodes, _) => essential_edges.get(nodes),
                VertexKey::Interior(..) => None,
            };
            let value = match prescribed {
                Some(value) => Combination::constant(*value),
                None => {
                    count.vertex += 1;
                    next_dof += 1;
                    Combination::dof(next_dof - 1)
                }
            };
            vertex_values.insert(*vertex, value);
        }

        let mut segments: BTreeMap<LineKey, Vec<Segment>> = BTreeMap::new();
        for ((line, span), order) in topology.segments() {
            let prescribed = matches!(line, LineKey::BaseEdge(nodes) if essential_edges.contains_key(&nodes));
            let num_edge_dofs = order as usize - 1;
            let first_dof = if prescribed || num_edge_dofs == 0 {
                None
            } else {
                count.edge += num_edge_dofs;
                next_dof += num_edge_dofs;
                Some(next_dof - num_edge_dofs)
            };
            segments.entry(line).or_default().push(Segment { span, order, first_dof });
        }

        let mut first_bubbles = BTreeMap::new();
        for elem in mesh.active_elems() {
            first_bubbles.insert(elem.id, next_dof);
            count.bubble += elem.poly_orders.num_bubbles();
            next_dof += elem.poly_orders.num_bubbles();
        }

        let positions: BTreeMap<(LineKey, u32), VertexKey> = topology
            .vertices()
            .flat_map(|vertex| {
                topology
                    .vertex_lines(vertex)
                    .iter()
                    .map(move |(line, pos)| ((*line, *pos), *vertex))
            })
            .collect();

        resolve_hanging_vertices(&topology, &hanging, &segments, &positions, &mut vertex_values)?;

        let mut traces = BTreeMap::new();
        for (line, line_segments) in segments.iter() {
            for segment in line_segments {
                let trace = segment_trace(line, segment, &positions, &vertex_values)
                    .ok_or(DofError::UnresolvedConstraints(hanging.len()))?;
                traces.insert((*line, segment.span), trace);
            }
        }

        let elems = mesh
            .active_elems()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|elem| {
                let side = |dir: ParaDir, offset: u32, span: [u32; 2], order: u8| {
                    side_trace(&segments, &traces, line_key(&elem.element, dir, offset), span, order)
                        .ok_or(DofError::DetachedSide(elem.id))
                };
                let [[u0, u1], [v0, v1]] = elem.range;
                let PolyOrders { ni, nj } = elem.poly_orders;

                let south = side(ParaDir::U, v0, [u0, u1], ni)?;
                let north = side(ParaDir::U, v1, [u0, u1], ni)?;
                let west = side(ParaDir::V, u0, [v0, v1], nj)?;
                let east = side(ParaDir::V, u1, [v0, v1], nj)?;

                let local = elem_coefficients(elem.poly_orders, [&south, &north, &west, &east], first_bubbles[&elem.id]);
                Ok((elem.id, ElemBasis::from_coefficients(elem.poly_orders, local)))
            })
            .collect::<Result<BTreeMap<usize, ElemBasis>, DofError>>()?;

        Ok(Self { count, elems })
    }

    pub fn num_dofs(&self) -> usize {
        self.count.total()
    }

    pub fn count(&self) -> DofCount {
        self.count
    }

    pub fn elem(&self, elem_id: usize) -> Option<&ElemBasis> {
        self.elems.get(&elem_id)
    }

    pub fn elems(&self) -> impl Iterator<Item = (&usize, &ElemBasis)> + '_ {
        self.elems.iter()
    }
}

impl ElemBasis {
    fn from_coefficients(orders: PolyOrders, coefficients: Vec<Combination>) -> Self {
        let dofs: Vec<usize> = coefficients
            .iter()
            .flat_map(|c| c.terms.keys().copied())
            .collect::<BTreeSet<usize>>()
            .into_iter()
            .collect();

        let basis = DMatrix::from_fn(coefficients.len(), dofs.len(), |r, c| {
            coefficients[r].terms.get(&dofs[c]).copied().unwrap_or(0.0)
        });
        let lift = DVector::from_iterator(coefficients.len(), coefficients.iter().map(|c| c.constant));

        Self {
            orders,
            dofs,
            basis,
            lift,
        }
    }
}

/// Prescribed values of essential boundary edges and of their nodes
fn essential_values(mesh: &Mesh, essential: &EssentialBCs) -> (BTreeMap<[usize; 2], f64>, BTreeMap<usize, f64>) {
    let edges: BTreeMap<[usize; 2], f64> = mesh
        .boundaries
        .iter()
        .filter_map(|(nodes, marker)| essential.value(marker).map(|value| (*nodes, value)))
        .collect();

    let mut nodes = BTreeMap::new();
    for (edge, value) in edges.iter() {
        for node in edge {
            nodes.entry(*node).or_insert(*value);
        }
    }

    (edges, nodes)
}

/// Legendre coefficients (local to the segment) of a field's trace on an edge segment
///
/// `None` if the value at one of its ends isn't known yet
fn segment_trace(
    line: &LineKey,
    segment: &Segment,
    positions: &BTreeMap<(LineKey, u32), VertexKey>,
    vertex_values: &BTreeMap<VertexKey, Combination>,
) -> Option<Vec<Combination>> {
    let start = vertex_values.get(positions.get(&(*line, segment.span[0]))?)?;
    let end = vertex_values.get(positions.get(&(*line, segment.span[1]))?)?;

    let mut trace = vec![Combination::default(); segment.order.max(1) as usize + 1];
    for (vertex_fn, value) in VERTEX_FNS.iter().zip([start, end]) {
        trace[0].add_scaled(value, vertex_fn[0]);
        trace[1].add_scaled(value, vertex_fn[1]);
    }

    if let Some(first_dof) = segment.first_dof {
        for k in 2..=segment.order as usize {
            let scale = edge_fn_scale(k);
            trace[k].add_dof(first_dof + k - 2, scale);
            trace[k - 2].add_dof(first_dof + k - 2, -scale);
        }
    }

    Some(trace)
}

/// Give every hanging vertex the value of the segment it lies inside
///
/// A segment's trace is only known once both of its ends are, so constraints are resolved in sweeps.
fn resolve_hanging_vertices(
    topology: &Topology,
    hanging: &[VertexKey],
    segments: &BTreeMap<LineKey, Vec<Segment>>,
    positions: &BTreeMap<(LineKey, u32), VertexKey>,
    vertex_values: &mut BTreeMap<VertexKey, Combination>,
) -> Result<(), DofError> {
    let mut pending: Vec<(VertexKey, LineKey, Segment, u32)> = Vec::with_capacity(hanging.len());
    for vertex in hanging {
        let constraint = topology.vertex_lines(vertex).iter().find_map(|(line, pos)| {
            segments
                .get(line)?
                .iter()
                .find(|segment| segment.span[0] < *pos && *pos < segment.span[1])
                .map(|segment| (*vertex, *line, *segment, *pos))
        });

        match constraint {
            Some(constraint) => pending.push(constraint),
            None => return Err(DofError::UnresolvedConstraints(hanging.len())),
        }
    }

    while !pending.is_empty() {
        let before = pending.len();
        let mut remaining = Vec::new();

        for (vertex, line, segment, pos) in pending {
            match segment_trace(&line, &segment, positions, vertex_values) {
                Some(trace) => {
                    let value = evaluate(&trace, local_coordinate(pos as f64, segment.span));
                    vertex_values.insert(vertex, value);
                }
                None => remaining.push((vertex, line, segment, pos)),
            }
        }

        if remaining.len() == before {
            return Err(DofError::UnresolvedConstraints(before));
        }
        pending = remaining;
    }

    Ok(())
}

/// Trace on an Elem side (`span` on `line`), expressed in the side's local coordinate with `order + 1` coefficients
fn side_trace(
    segments: &BTreeMap<LineKey, Vec<Segment>>,
    traces: &BTreeMap<(LineKey, [u32; 2]), Vec<Combination>>,
    line: LineKey,
    span: [u32; 2],
    order: u8,
) -> Option<Vec<Combination>> {
    let segment = segments
        .get(&line)?
        .iter()
        .find(|segment| segment.span[0] <= span[0] && span[1] <= segment.span[1])?;
    let trace = traces.get(&(line, segment.span))?;

    // the minimum rule keeps the segment's order at or below the side's
    let mut local = vec![Combination::default(); order as usize + 1];
    if segment.span == span {
        for (target, coeff) in local.iter_mut().zip(trace.iter()) {
            *target = coeff.clone();
        }
    } else {
        let sub_interval = [
            local_coordinate(span[0] as f64, segment.span),
            local_coordinate(span[1] as f64, segment.span),
        ];
        let restriction = legendre_restriction(trace.len() as u8 - 1, sub_interval);
        for (m, target) in local.iter_mut().enumerate().take(trace.len()) {
            for (k, coeff) in trace.iter().enumerate() {
                target.add_scaled(coeff, restriction[(m, k)]);
            }
        }
    }

    Some(local)
}

/// Local coefficients of an Elem from the traces on its sides (`[south, north, west, east]`) and its bubbles
fn elem_coefficients(orders: PolyOrders, [south, north, west, east]: [&[Combination]; 4], first_bubble: usize) -> Vec<Combination> {
    let (n_i, n_j) = (orders.ni as usize + 1, orders.nj as usize + 1);
    let idx = |i: usize, j: usize| i * n_j + j;
    let mut coefficients = vec![Combination::default(); n_i * n_j];

    // corners[a][b]: `a` selects the end in ξ, `b` the end in η
    let corners = [
        [end_value(south, 0), end_value(north, 0)],
        [end_value(south, 1), end_value(north, 1)],
    ];
    for (a, corners_a) in corners.iter().enumerate() {
        for (b, corner) in corners_a.iter().enumerate() {
            for i in 0..2 {
                for j in 0..2 {
                    coefficients[idx(i, j)].add_scaled(corner, VERTEX_FNS[a][i] * VERTEX_FNS[b][j]);
                }
            }
        }
    }

    for (b, trace) in [south, north].into_iter().enumerate() {
        let part = edge_part(trace);
        for (i, coeff) in part.iter().enumerate() {
            for j in 0..2 {
                coefficients[idx(i, j)].add_scaled(coeff, VERTEX_FNS[b][j]);
            }
        }
    }

    for (a, trace) in [west, east].into_iter().enumerate() {
        let part = edge_part(trace);
        for (j, coeff) in part.iter().enumerate() {
            for i in 0..2 {
                coefficients[idx(i, j)].add_scaled(coeff, VERTEX_FNS[a][i]);
            }
        }
    }

    let mut bubble = first_bubble;
    for k in 2..n_i {
        for l in 2..n_j {
            let scale = edge_fn_scale(k) * edge_fn_scale(l);
            for (i, si) in [(k, 1.0), (k - 2, -1.0)] {
                for (j, sj) in [(l, 1.0), (l - 2, -1.0)] {
                    coefficients[idx(i, j)].add_dof(bubble, scale * si * sj);
                }
            }
            bubble += 1;
        }
    }

    coefficients
}

fn line_key(element: &Element, dir: ParaDir, offset: u32) -> LineKey {
    match (dir, offset) {
        (ParaDir::U, 0) => LineKey::BaseEdge(element.side_nodes(0)),
        (ParaDir::U, UNIT) => LineKey::BaseEdge(element.side_nodes(1)),
        (ParaDir::V, 0) => LineKey::BaseEdge(element.side_nodes(2)),
        (ParaDir::V, UNIT) => LineKey::BaseEdge(element.side_nodes(3)),
        _ => LineKey::Interior {
            element: element.id,
            dir,
            offset,
        },
    }
}

fn vertex_key(element: &Element, u: u32, v: u32) -> VertexKey {
    match (u, v) {
        (0, 0) => VertexKey::Node(element.node_ids[0]),
        (UNIT, 0) => VertexKey::Node(element.node_ids[1]),
        (0, UNIT) => VertexKey::Node(element.node_ids[2]),
        (UNIT, UNIT) => VertexKey::Node(element.node_ids[3]),
        (_, 0) => VertexKey::OnEdge(element.side_nodes(0), u),
        (_, UNIT) => VertexKey::OnEdge(element.side_nodes(1), u),
        (0, _) => VertexKey::OnEdge(element.side_nodes(2), v),
        (UNIT, _) => VertexKey::OnEdge(element.side_nodes(3), v),
        _ => VertexKey::Interior(element.id, u, v),
    }
}
