/// A Finite Element in Parametric Space (a node of the refinement forest)
pub mod elem;
/// A Finite Element in Real Space
pub mod element;
/// Structures and Functions to facilitate isotropic and anisotropic h-refinement
pub mod h_refinement;
/// Structures and Functions to facilitate anisotropic p-refinement
pub mod p_refinement;
/// Points, directions and dyadic parametric ranges
pub mod primitives;

use elem::Elem;
use element::{Element, SIDE_NODE_INDICES};
use h_refinement::{HRef, HRefError};
use p_refinement::{PRefError, PolyOrders};
use primitives::{ParaDir, Point};

use json::JsonValue;
#[cfg(feature = "json_export")]
use json::object;
use std::collections::BTreeMap;
use std::fs::read_to_string;
#[cfg(feature = "json_export")]
use std::fs::File;
#[cfg(feature = "json_export")]
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// The expected "h-Refinement" depth. This determines the stack allocation size of some `SmallVec`s related to h-Refinement
pub const EXPECTED_NUM_H_REFINEMENTS: usize = 8;

/// Maximum Polynomial expansion. p-Refinements will fail when Elem's expansion orders exceed this value.
pub const MAX_POLYNOMIAL_ORDER: u8 = 20;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("Unable to read Mesh file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unable to parse Mesh file as JSON: {0}")]
    Json(#[from] json::Error),
    #[error("Malformed Mesh description: {0}")]
    Format(String),
    #[error("Element {element} is not a valid axis-aligned rectangle: {reason}")]
    Geometry { element: usize, reason: String },
    #[error("Edge between Nodes {0:?} is not shared conformingly between Elements")]
    NonConformingEdge([usize; 2]),
    #[error("Boundary marker on Nodes {0:?} does not describe an Edge on the boundary of the Mesh")]
    InvalidBoundary([usize; 2]),
    #[error("Elem {0} doesn't exist!")]
    ElemDoesntExist(usize),
}

/// Information used to define the geometric structure and refinement state of one field's discretization
///
/// Elem ids are never reused: refining a copy of a `Mesh` preserves all of the original's Elem ids,
/// which is how reference Elems are traced back to the working Elems they descend from.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub elements: Vec<Arc<Element>>,
    pub elems: Vec<Elem>,
    pub nodes: Vec<Point>,
    /// Named boundary markers by (sorted) node-id pair
    pub boundaries: BTreeMap<[usize; 2], String>,
}

impl Mesh {
    /// Construct a Mesh from a JSON file with the following format
    ///
    /// The following describes this two element mesh:
    /// ```text
    ///     3               4               5
    /// 0.5 *---------------*---------------*
    ///     |               |               |
    ///     |  Material_1   |  Material_2   |
    ///     |               |               |
    /// 0.0 *---------------*---------------*
    ///  y  0               1               2
    ///  x 0.0             1.0             2.0
    /// ```
    ///
    /// mesh.json
    /// ```JSON
    /// {
    ///     "Elements": [
    ///         { "node_ids": [0, 1, 3, 4], "marker": "Material_1" },
    ///         { "node_ids": [1, 2, 4, 5], "marker": "Material_2" }
    ///     ],
    ///     "Nodes": [
    ///         [0.0, 0.0], [1.0, 0.0], [2.0, 0.0],
    ///         [0.0, 0.5], [1.0, 0.5], [2.0, 0.5]
    ///     ],
    ///     "Boundaries": [
    ///         { "nodes": [0, 3], "marker": "Bdy_left" },
    ///         { "nodes": [2, 5], "marker": "Bdy_right" }
    ///     ]
    /// }
    /// ```
    ///
    /// Element `node_ids` are ordered `[SW, SE, NW, NE]`. Boundaries are optional.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MeshError> {
        let mesh_file_contents = read_to_string(path.as_ref())?;
        Self::from_json_str(&mesh_file_contents)
    }

    /// Construct a Mesh from the contents of a JSON mesh file (see [Mesh::from_file])
    pub fn from_json_str(contents: &str) -> Result<Self, MeshError> {
        let mesh_file_json = json::parse(contents)?;

        let points = parse_node_information(&mesh_file_json)?;
        let (element_node_ids, markers) = parse_element_information(&mesh_file_json, points.len())?;
        let boundaries = parse_boundary_information(&mesh_file_json)?;

        Self::from_parts(points, element_node_ids, markers, boundaries)
    }

    /// Construct a uniform `nx` by `ny` grid of Elements over a rectangle
    ///
    /// The Elements are marked "Material_1"; the four sides of the rectangle are marked
    /// "Bdy_bottom", "Bdy_top", "Bdy_left" and "Bdy_right"
    pub fn rectangle(origin: Point, size: [f64; 2], [nx, ny]: [usize; 2]) -> Result<Self, MeshError> {
        if nx == 0 || ny == 0 {
            return Err(MeshError::Format(String::from(
                "A rectangular Mesh needs at least one Element in each direction",
            )));
        }

        let node_id = |i: usize, j: usize| j * (nx + 1) + i;

        let points: Vec<Point> = (0..=ny)
            .flat_map(|j| {
                (0..=nx).map(move |i| {
                    Point::new(
                        origin.x + size[0] * i as f64 / nx as f64,
                        origin.y + size[1] * j as f64 / ny as f64,
                    )
                })
            })
            .collect();

        let element_node_ids: Vec<[usize; 4]> = (0..ny)
            .flat_map(|j| {
                (0..nx).map(move |i| {
                    [
                        node_id(i, j),
                        node_id(i + 1, j),
                        node_id(i, j + 1),
                        node_id(i + 1, j + 1),
                    ]
                })
            })
            .collect();
        let markers = vec![String::from("Material_1"); element_node_ids.len()];

        let mut boundaries = Vec::with_capacity(2 * (nx + ny));
        for i in 0..nx {
            boundaries.push(([node_id(i, 0), node_id(i + 1, 0)], "Bdy_bottom"));
            boundaries.push(([node_id(i, ny), node_id(i + 1, ny)], "Bdy_top"));
        }
        for j in 0..ny {
            boundaries.push(([node_id(0, j), node_id(0, j + 1)], "Bdy_left"));
            boundaries.push(([node_id(nx, j), node_id(nx, j + 1)], "Bdy_right"));
        }

        Self::from_parts(
            points,
            element_node_ids,
            markers,
            boundaries
                .drain(0..)
                .map(|(nodes, marker)| (nodes, String::from(marker)))
                .collect(),
        )
    }

    fn from_parts(
        points: Vec<Point>,
        element_node_ids: Vec<[usize; 4]>,
        markers: Vec<String>,
        boundary_list: Vec<([usize; 2], String)>,
    ) -> Result<Self, MeshError> {
        if element_node_ids.is_empty() {
            return Err(MeshError::Format(String::from(
                "Mesh must have at least one Element",
            )));
        }

        let elements: Vec<Arc<Element>> = element_node_ids
            .iter()
            .zip(markers)
            .enumerate()
            .map(|(element_id, (node_ids, marker))| {
                let element = Element::new(element_id, *node_ids, node_ids.map(|id| points[id]), marker);
                validate_element_geometry(&element)?;
                Ok(Arc::new(element))
            })
            .collect::<Result<_, MeshError>>()?;

        // {[node_id_0, node_id_1] => [(element_id, side_index)]}
        let mut edge_sides: BTreeMap<[usize; 2], Vec<(usize, usize)>> = BTreeMap::new();
        for element in elements.iter() {
            for side in 0..4 {
                edge_sides
                    .entry(element.side_nodes(side))
                    .or_default()
                    .push((element.id, side));
            }
        }

        for (nodes, sides) in edge_sides.iter() {
            match sides.as_slice() {
                [_] => {}
                [(_, side_a), (_, side_b)] => {
                    // neighboring Elements must see the shared edge from opposite sides
                    if side_a / 2 != side_b / 2 || side_a == side_b {
                        return Err(MeshError::NonConformingEdge(*nodes));
                    }
                }
                _ => return Err(MeshError::NonConformingEdge(*nodes)),
            }
        }

        let mut boundaries = BTreeMap::new();
        for ([a, b], marker) in boundary_list {
            let nodes = if a < b { [a, b] } else { [b, a] };
            match edge_sides.get(&nodes) {
                Some(sides) if sides.len() == 1 => {
                    boundaries.insert(nodes, marker);
                }
                _ => return Err(MeshError::InvalidBoundary(nodes)),
            }
        }

        let elems = elements
            .iter()
            .map(|element| Elem::new(element.id, element.clone(), PolyOrders::default()))
            .collect();

        Ok(Self {
            elements,
            elems,
            nodes: points,
            boundaries,
        })
    }

    /// Print the mesh to a JSON file specified by path.
    #[cfg(feature = "json_export")]
    pub fn export_to_json(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let f = File::create(path.as_ref())?;
        let mut w = BufWriter::new(&f);

        let mesh_object = object! {
            "Elements": JsonValue::from(self.elements.iter().map(|element| element.to_json()).collect::<Vec<_>>()),
            "Elems": JsonValue::from(self.elems.iter().map(|elem| elem.to_json()).collect::<Vec<_>>()),
            "Nodes": JsonValue::from(self.nodes.iter().copied().map(JsonValue::from).collect::<Vec<_>>()),
            "Boundaries": JsonValue::from(
                self.boundaries
                    .iter()
                    .map(|(nodes, marker)| object! { "nodes": nodes.to_vec(), "marker": marker.clone() })
                    .collect::<Vec<_>>()
            ),
        };

        mesh_object.write_pretty(&mut w, 4)?;

        Ok(())
    }

    // ----------------------------------------------------------------------------------------------------
    // General Data Retrieval
    // ----------------------------------------------------------------------------------------------------

    /// Ids of all Elems without children (in ascending order)
    pub fn active_elem_ids(&self) -> Vec<usize> {
        self.elems
            .iter()
            .filter(|elem| !elem.has_children())
            .map(|elem| elem.id)
            .collect()
    }

    /// Iterate over all Elems without children (in ascending order)
    pub fn active_elems(&self) -> impl Iterator<Item = &Elem> + '_ {
        self.elems.iter().filter(|elem| !elem.has_children())
    }

    pub fn num_active_elems(&self) -> usize {
        self.active_elems().count()
    }

    pub fn elem(&self, elem_id: usize) -> Result<&Elem, MeshError> {
        self.elems
            .get(elem_id)
            .ok_or(MeshError::ElemDoesntExist(elem_id))
    }

    /// Get a list of an [`Elem`]s descendant's IDs
    pub fn descendant_elems(
        &self,
        elem_id: usize,
        include_starting_elem: bool,
    ) -> Result<Vec<usize>, MeshError> {
        if elem_id >= self.elems.len() {
            Err(MeshError::ElemDoesntExist(elem_id))
        } else {
            let mut descendants = Vec::new();
            self.rec_descendant_elems(elem_id, include_starting_elem, &mut descendants);
            Ok(descendants)
        }
    }

    fn rec_descendant_elems(&self, elem_id: usize, include: bool, desc: &mut Vec<usize>) {
        if include {
            desc.push(elem_id);
        }
        if let Some(child_elem_ids) = self.elems[elem_id].child_ids() {
            for cei in child_elem_ids {
                self.rec_descendant_elems(cei, true, desc);
            }
        }
    }

    /// Get a list of an [`Elem`]s descendant's IDs which don't have children (including itself if it is active)
    pub fn active_descendants(&self, elem_id: usize) -> Result<Vec<usize>, MeshError> {
        Ok(self
            .descendant_elems(elem_id, true)?
            .drain(0..)
            .filter(|id| !self.elems[*id].has_children())
            .collect())
    }

    /// Boundary marker of an `Element` side (if it has one)
    pub fn boundary_marker(&self, nodes: &[usize; 2]) -> Option<&str> {
        self.boundaries.get(nodes).map(|marker| marker.as_str())
    }

    /// Maximum polynomial expansion orders represented among all `Elem`s in the `Mesh`
    pub fn max_expansion_orders(&self) -> [u8; 2] {
        self.active_elems()
            .fold([0; 2], |acc, elem| elem.poly_orders.max_with(acc))
    }

    /// Determine if an Elem can accept an h-refinement
    /// * returns false if the Elem already has children
    /// * returns false if the refinement would exceed the maximum h-level
    /// * returns an `Err` if the Mesh doesn't have `elem_id`
    pub fn elem_is_h_refineable(&self, elem_id: usize, refinement: HRef) -> Result<bool, HRefError> {
        match self.elems.get(elem_id) {
            None => Err(HRefError::ElemDoesntExist(elem_id)),
            Some(elem) => Ok(!elem.has_children() && elem.h_levels.admits(refinement)),
        }
    }

    /// Do two meshes describe the same geometry and refinement forest (expansion orders may differ)
    pub fn same_structure(&self, other: &Self) -> bool {
        self.elements.len() == other.elements.len()
            && self.elems.len() == other.elems.len()
            && self.elems.iter().zip(other.elems.iter()).all(|(a, b)| {
                a.element.id == b.element.id
                    && a.range == b.range
                    && a.has_children() == b.has_children()
            })
    }

    // ----------------------------------------------------------------------------------------------------
    // h-refinement methods
    // ----------------------------------------------------------------------------------------------------

    /// The finest refinement an Elem can still accept: `T` if it can be split in both directions, otherwise `U` or `V`
    pub fn finest_refinement(elem: &Elem) -> Option<HRef> {
        match (
            elem.h_levels.can_refine(ParaDir::U),
            elem.h_levels.can_refine(ParaDir::V),
        ) {
            (true, true) => Some(HRef::T),
            (true, false) => Some(HRef::U),
            (false, true) => Some(HRef::V),
            (false, false) => None,
        }
    }

    /// Split every active `Elem` with the finest refinement it can accept
    pub fn global_h_refinement(&mut self) -> Result<(), HRefError> {
        self.execute_h_refinements(
            self.active_elems()
                .filter_map(|elem| Self::finest_refinement(elem).map(|refinement| (elem.id, refinement)))
                .collect(),
        )
    }

    /// Execute a series of [HRef]s on [Elem]s specified by their id
    ///
    /// All refinements are checked before any are applied; an `Err` leaves the Mesh unchanged
    pub fn execute_h_refinements(&mut self, refinements: Vec<(usize, HRef)>) -> Result<(), HRefError> {
        let mut refinements_map: BTreeMap<usize, HRef> = BTreeMap::new();
        for (elem_id, h_ref) in refinements {
            if !self.elem_is_h_refineable(elem_id, h_ref)? {
                return Err(if self.elems[elem_id].has_children() {
                    HRefError::ElemHasChildren(elem_id)
                } else {
                    HRefError::MaxLevelExceeded(elem_id, h_ref)
                });
            }
            if refinements_map.insert(elem_id, h_ref).is_some() {
                return Err(HRefError::DoubleRefinement(elem_id));
            }
        }

        let mut elem_id_tracker = self.elems.len();
        for (elem_id, refinement) in refinements_map {
            let mut new_elems = self.elems[elem_id].h_refine(refinement, &mut elem_id_tracker)?;
            self.elems.extend(new_elems.drain(0..));
        }

        Ok(())
    }

    // ----------------------------------------------------------------------------------------------------
    // p-refinement methods
    // ----------------------------------------------------------------------------------------------------

    /// Set the expansion orders on every Elem in the Mesh
    pub fn set_global_expansion_orders(&mut self, orders: PolyOrders) -> Result<(), PRefError> {
        let mut checked = PolyOrders::default();
        checked.set([orders.ni, orders.nj])?;

        for elem in self.elems.iter_mut() {
            elem.poly_orders = checked;
        }

        Ok(())
    }

    /// Set the expansion orders of a single active Elem
    pub fn set_expansion_orders(&mut self, elem_id: usize, orders: PolyOrders) -> Result<(), PRefError> {
        let mut checked = self.active_elem_orders(elem_id)?;
        checked.set([orders.ni, orders.nj])?;
        self.elems[elem_id].poly_orders = checked;

        Ok(())
    }

    /// Raise the expansion orders of every active Elem by `increment` (saturating at [MAX_POLYNOMIAL_ORDER])
    pub fn raise_expansion_orders(&mut self, increment: u8) {
        for elem in self.elems.iter_mut().filter(|elem| !elem.has_children()) {
            elem.poly_orders = elem.poly_orders.raised(increment, MAX_POLYNOMIAL_ORDER);
        }
    }

    fn active_elem_orders(&self, elem_id: usize) -> Result<PolyOrders, PRefError> {
        match self.elems.get(elem_id) {
            None => Err(PRefError::ElemDoesntExist(elem_id)),
            Some(elem) if elem.has_children() => Err(PRefError::InactiveElem(elem_id)),
            Some(elem) => Ok(elem.poly_orders),
        }
    }
}

fn validate_element_geometry(element: &Element) -> Result<(), MeshError> {
    if has_duplicates(&element.node_ids) {
        return Err(MeshError::Geometry {
            element: element.id,
            reason: String::from("node_ids should have 4 unique values"),
        });
    }

    for (side, [a, b]) in SIDE_NODE_INDICES.iter().enumerate() {
        if element.points[*a].orientation_with(&element.points[*b]) != Some(Element::side_dir(side)) {
            return Err(MeshError::Geometry {
                element: element.id,
                reason: format!("side {} is not aligned with the {:?} direction", side, Element::side_dir(side)),
            });
        }
    }

    let [width, height] = element.extent();
    if width <= 0.0 || height <= 0.0 {
        return Err(MeshError::Geometry {
            element: element.id,
            reason: String::from("node_ids must be ordered [SW, SE, NW, NE]"),
        });
    }

    Ok(())
}

fn parse_element_information(
    mesh_file_json: &JsonValue,
    num_nodes: usize,
) -> Result<(Vec<[usize; 4]>, Vec<String>), MeshError> {
    if !mesh_file_json["Elements"].is_array() {
        return Err(MeshError::Format(String::from("Elements must be an Array!")));
    }

    mesh_file_json["Elements"]
        .members()
        .map(|json_element| {
            if !json_element["node_ids"].is_array() || json_element["node_ids"].len() != 4 {
                return Err(MeshError::Format(String::from(
                    "Elements must have an Array of 4 node_ids!",
                )));
            }

            let mut node_ids = [0; 4];
            for (idx, node_id_json) in json_element["node_ids"].members().enumerate() {
                node_ids[idx] = match node_id_json.as_usize() {
                    Some(node_id) if node_id < num_nodes => node_id,
                    _ => {
                        return Err(MeshError::Format(String::from(
                            "node_ids must be positive integers smaller than the total number of nodes!",
                        )))
                    }
                };
            }

            let marker = if json_element["marker"].is_null() {
                String::from("default")
            } else {
                json_element["marker"]
                    .as_str()
                    .ok_or_else(|| MeshError::Format(String::from("Element markers must be strings!")))?
                    .to_string()
            };

            Ok((node_ids, marker))
        })
        .collect::<Result<Vec<_>, MeshError>>()
        .map(|elements| elements.into_iter().unzip())
}

fn parse_node_information(mesh_file_json: &JsonValue) -> Result<Vec<Point>, MeshError> {
    if !mesh_file_json["Nodes"].is_array() {
        return Err(MeshError::Format(String::from("Nodes must be an Array!")));
    }

    mesh_file_json["Nodes"]
        .members()
        .map(|json_node_point| {
            if !json_node_point.is_array() || json_node_point.len() != 2 {
                return Err(MeshError::Format(String::from(
                    "nodes must be arrays of length 2!",
                )));
            }

            match (json_node_point[0].as_f64(), json_node_point[1].as_f64()) {
                (Some(x), Some(y)) => Ok(Point::new(x, y)),
                _ => Err(MeshError::Format(String::from(
                    "nodes must be composed of numerical values!",
                ))),
            }
        })
        .collect()
}

fn parse_boundary_information(mesh_file_json: &JsonValue) -> Result<Vec<([usize; 2], String)>, MeshError> {
    if mesh_file_json["Boundaries"].is_null() {
        return Ok(Vec::new());
    }
    if !mesh_file_json["Boundaries"].is_array() {
        return Err(MeshError::Format(String::from("Boundaries must be an Array!")));
    }

    mesh_file_json["Boundaries"]
        .members()
        .map(|json_boundary| {
            let nodes = &json_boundary["nodes"];
            let marker = json_boundary["marker"].as_str();

            match (nodes[0].as_usize(), nodes[1].as_usize(), marker) {
                (Some(a), Some(b), Some(marker)) if nodes.len() == 2 => Ok(([a, b], marker.to_string())),
                _ => Err(MeshError::Format(String::from(
                    "Boundaries must have an Array of 2 node ids and a string marker!",
                ))),
            }
        })
        .collect()
}

fn has_duplicates<T>(values: &[T]) -> bool
where
    T: PartialEq,
{
    for (i, val) in values.iter().enumerate() {
        for val_cmp in values.iter().skip(i + 1) {
            if val == val_cmp {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::primitives::UNIT;
    use super::*;

    #[test]
    fn mesh_from_file() {
        let mesh = Mesh::from_file("./test_input/two_materials.json").unwrap();

        assert_eq!(mesh.elements.len(), 4);
        assert_eq!(mesh.elems.len(), 4);
        assert_eq!(mesh.elements[1].marker, "Material_2");
        assert_eq!(mesh.elements[3].extent(), [1.0, 0.5]);
        assert_eq!(mesh.boundary_marker(&[0, 3]), Some("Bdy_left"));
        assert_eq!(mesh.boundary_marker(&[1, 4]), None);

        for element in mesh.elements.iter() {
            assert!(element.points[3].x > element.points[0].x);
            assert!(element.points[3].y > element.points[0].y);
        }
    }

    #[test]
    fn rectangular_mesh() {
        let mesh = Mesh::rectangle(Point::new(0.0, 0.0), [9.0, 4.0], [9, 4]).unwrap();

        assert_eq!(mesh.elements.len(), 36);
        assert_eq!(mesh.nodes.len(), 50);
        assert_eq!(mesh.boundaries.len(), 26);
        assert_eq!(mesh.boundary_marker(&[0, 1]), Some("Bdy_bottom"));
        assert_eq!(mesh.boundary_marker(&[9, 19]), Some("Bdy_right"));
        assert_eq!(mesh.elements[10].points[0], Point::new(1.0, 1.0));
    }

    #[test]
    fn basic_h_refinements() {
        let mut mesh = Mesh::from_file("./test_input/two_materials.json").unwrap();
        mesh.execute_h_refinements(vec![(0, HRef::T)]).unwrap();
        mesh.execute_h_refinements(vec![(1, HRef::U), (2, HRef::U)]).unwrap();
        mesh.execute_h_refinements(vec![(3, HRef::V), (4, HRef::V)]).unwrap();

        assert_eq!(mesh.elems.len(), 4 + 4 + 2 + 2 + 2 + 2);
        assert_eq!(mesh.num_active_elems(), 11);
        assert_eq!(mesh.descendant_elems(0, false).unwrap(), vec![4, 14, 15, 5, 6, 7]);
        assert_eq!(mesh.active_descendants(0).unwrap(), vec![14, 15, 5, 6, 7]);
        assert_eq!(mesh.elems[15].parent_id(), Some(4));
        assert_eq!(mesh.elems[15].range, [[0, UNIT / 2], [UNIT / 4, UNIT / 2]]);
    }

    #[test]
    fn global_refinement_respects_levels() {
        let mut mesh = Mesh::rectangle(Point::new(0.0, 0.0), [1.0, 1.0], [1, 1]).unwrap();
        for _ in 0..primitives::MAX_H_LEVEL {
            mesh.execute_h_refinements(vec![(mesh.elems.len() - 1, HRef::U)]).unwrap();
        }
        let deepest = mesh.elems.len() - 1;
        assert_eq!(Mesh::finest_refinement(&mesh.elems[deepest]), Some(HRef::V));

        assert_eq!(mesh.num_active_elems(), 16);
        mesh.global_h_refinement().unwrap();
        assert_eq!(mesh.num_active_elems(), 14 * 4 + 2 * 2);
    }

    #[test]
    fn expansion_orders() {
        let mut mesh = Mesh::from_file("./test_input/two_materials.json").unwrap();
        mesh.set_expansion_orders(0, PolyOrders::iso(3)).unwrap();
        mesh.set_expansion_orders(1, PolyOrders::from(3, 2)).unwrap();
        mesh.set_expansion_orders(2, PolyOrders::from(2, 3)).unwrap();

        assert_eq!(mesh.elems[0].poly_orders, PolyOrders::from(3, 3));
        assert_eq!(mesh.elems[1].poly_orders, PolyOrders::from(3, 2));
        assert_eq!(mesh.elems[2].poly_orders, PolyOrders::from(2, 3));
        assert_eq!(mesh.max_expansion_orders(), [3, 3]);

        mesh.raise_expansion_orders(1);
        assert_eq!(mesh.elems[3].poly_orders, PolyOrders::from(2, 2));
    }

    #[test]
    fn refined_mesh_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut mesh = Mesh::from_file("./test_input/two_materials.json").unwrap();
        mesh.execute_h_refinements(vec![(0, HRef::T), (1, HRef::U)]).unwrap();
        mesh.export_to_json(dir.path().join("refined.json")).unwrap();

        let contents = read_to_string(dir.path().join("refined.json")).unwrap();
        let exported = json::parse(&contents).unwrap();
        assert_eq!(exported["Elems"].len(), 10);
        assert_eq!(exported["Boundaries"].len(), mesh.boundaries.len());
    }

    #[test]
    fn invalid_h_refinements() {
        let mut mesh = Mesh::from_file("./test_input/two_materials.json").unwrap();
        assert_eq!(
            mesh.execute_h_refinements(vec![(7, HRef::T)]),
            Err(HRefError::ElemDoesntExist(7))
        );
        assert_eq!(
            mesh.execute_h_refinements(vec![(1, HRef::T), (1, HRef::U)]),
            Err(HRefError::DoubleRefinement(1))
        );
        assert_eq!(mesh.elems.len(), 4);

        mesh.execute_h_refinements(vec![(0, HRef::T)]).unwrap();
        assert_eq!(
            mesh.execute_h_refinements(vec![(0, HRef::T)]),
            Err(HRefError::ElemHasChildren(0))
        );
    }

    #[test]
    fn invalid_p_refinements() {
        let mut mesh = Mesh::from_file("./test_input/two_materials.json").unwrap();
        assert_eq!(
            mesh.set_expansion_orders(5, PolyOrders::iso(2)),
            Err(PRefError::ElemDoesntExist(5))
        );
        assert_eq!(
            mesh.set_expansion_orders(0, PolyOrders::from(0, 2)),
            Err(PRefError::NegExpansion)
        );
        assert_eq!(
            mesh.set_global_expansion_orders(PolyOrders::iso(MAX_POLYNOMIAL_ORDER + 1)),
            Err(PRefError::ExceededMaxExpansion)
        );

        mesh.execute_h_refinements(vec![(0, HRef::V)]).unwrap();
        assert_eq!(
            mesh.set_expansion_orders(0, PolyOrders::iso(2)),
            Err(PRefError::InactiveElem(0))
        );
    }

    #[test]
    fn invalid_mesh_files() {
        assert!(matches!(
            Mesh::from_file("./test_input/non_conforming.json"),
            Err(MeshError::NonConformingEdge(_))
        ));
        assert!(matches!(
            Mesh::from_file("./test_input/bad_orientation.json"),
            Err(MeshError::Geometry { element: 0, .. })
        ));
        assert!(matches!(
            Mesh::from_json_str("{\"Elements\": [], \"Nodes\": []}"),
            Err(MeshError::Format(_))
        ));
        assert!(matches!(
            Mesh::from_json_str("{\"Elements\": ["),
            Err(MeshError::Json(_))
        ));
        assert!(matches!(
            Mesh::from_file("./test_input/does_not_exist.json"),
            Err(MeshError::Io(_))
        ));
    }
}
