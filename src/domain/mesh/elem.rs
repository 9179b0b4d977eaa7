use super::{
    element::Element,
    h_refinement::{HLevels, HRef, HRefError, HRefLoc},
    p_refinement::PolyOrders,
    primitives::{DyadicRange, FULL_RANGE},
    EXPECTED_NUM_H_REFINEMENTS,
};
use json::{array, object, JsonValue};
use smallvec::SmallVec;
use std::sync::Arc;

/// `Elem`s are the basic unit of the refinement forest in Parametric Space
///
/// `Elem`s are responsible for keeping track of:
/// * Their dyadic sub-range of the associated [`Element`]
/// * Connections to their parent `Elem` (and their own h-refinement state)
/// * Connections to their child `Elem`s (if h-refined)
/// * Polynomial expansion orders (p-refinement state)
///
/// ## h-Refinement
///
/// Three variants of h-refinements are supported. The relative indices of the child `Elem`s are shown below for each type:
///
/// ```text
///        T-Type                U-Type                V-Type
///  -----------------     -----------------     -----------------
///  |       |       |     |       |       |     |               |
///  |   2   |   3   |     |       |       |     |       1       |
///  |       |       |     |       |       |     |               |
///  -----------------     |   0   |   1   |     -----------------
///  |       |       |     |       |       |     |               |
///  |   0   |   1   |     |       |       |     |       0       |
///  |       |       |     |       |       |     |               |
///  -----------------     -----------------     -----------------
/// ```
///
/// Child `Elem`s inherit their parent's polynomial expansion orders.
#[derive(Debug, Clone)]
pub struct Elem {
    pub id: usize,
    pub element: Arc<Element>,
    pub range: DyadicRange,
    pub h_levels: HLevels,
    pub poly_orders: PolyOrders,
    children: Option<SmallVec<[usize; 4]>>,
    ancestors: SmallVec<[(usize, HRefLoc); EXPECTED_NUM_H_REFINEMENTS]>,
}

impl Elem {
    /// Construct a new (base layer) Elem covering the entirety of an [`Element`]
    pub fn new(id: usize, element: Arc<Element>, poly_orders: PolyOrders) -> Self {
        Self {
            id,
            element,
            range: FULL_RANGE,
            h_levels: HLevels::default(),
            poly_orders,
            children: None,
            ancestors: SmallVec::new(),
        }
    }

    /// Construct the 2 or 4 child Elems of an [HRef] applied to this Elem
    pub(crate) fn h_refine(
        &mut self,
        refinement: HRef,
        id_counter: &mut usize,
    ) -> Result<Vec<Elem>, HRefError> {
        if self.children.is_some() {
            return Err(HRefError::ElemHasChildren(self.id));
        }
        if !self.h_levels.admits(refinement) {
            return Err(HRefError::MaxLevelExceeded(self.id, refinement));
        }

        let children: Vec<Elem> = refinement
            .locs()
            .map(|loc| {
                let id = *id_counter;
                *id_counter += 1;

                let mut ancestors = self.ancestors.clone();
                ancestors.push((self.id, loc));

                Elem {
                    id,
                    element: self.element.clone(),
                    range: loc.sub_range(&self.range),
                    h_levels: self.h_levels.refined(refinement),
                    poly_orders: self.poly_orders,
                    children: None,
                    ancestors,
                }
            })
            .collect();

        self.children = Some(children.iter().map(|child| child.id).collect());
        Ok(children)
    }

    /// Id of the Parent Elem if this Elem has a parent
    pub fn parent_id(&self) -> Option<usize> {
        self.ancestors.last().map(|(id, _)| *id)
    }

    /// Returns a vector of ids for this Elem's children. Returns `None` if this Elem has no children.
    pub fn child_ids(&self) -> Option<SmallVec<[usize; 4]>> {
        self.children.clone()
    }

    /// Has this `Elem` been h-Refined
    pub fn has_children(&self) -> bool {
        self.children.is_some()
    }

    /// Real-space size of this Elem: `[width, height]`
    pub fn extent(&self) -> [f64; 2] {
        self.element.sub_extent(&self.range)
    }

    /// Produce a Json Object that describes this Elem
    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        let sw = self
            .element
            .real_point(self.range[0][0] as f64, self.range[1][0] as f64);
        let ne = self
            .element
            .real_point(self.range[0][1] as f64, self.range[1][1] as f64);

        object! {
            "id": self.id,
            "element_id": self.element.id,
            "parent": self.parent_id(),
            "active": self.children.is_none(),
            "bounds": array![sw.x, sw.y, ne.x, ne.y],
            "expansion": self.poly_orders,
            "h_levels": self.h_levels,
            "children": JsonValue::from(
                match &self.children {
                    Some(ids) => ids.to_vec(),
                    None => Vec::new(),
                }
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{primitives::Point, primitives::UNIT};
    use super::*;

    fn base_elem() -> Elem {
        let element = Element::new(
            0,
            [0, 1, 2, 3],
            [
                Point::new(0.0, 0.0),
                Point::new(2.0, 0.0),
                Point::new(0.0, 1.0),
                Point::new(2.0, 1.0),
            ],
            String::from("Material_1"),
        );
        Elem::new(0, Arc::new(element), PolyOrders::from(2, 3))
    }

    #[test]
    fn elem_h_refinement() {
        let mut elem = base_elem();
        let mut id_counter = 1;

        let children = elem.h_refine(HRef::T, &mut id_counter).unwrap();
        assert_eq!(id_counter, 5);
        assert_eq!(children.len(), 4);
        assert_eq!(elem.child_ids().unwrap().to_vec(), vec![1, 2, 3, 4]);

        let ne = &children[3];
        assert_eq!(ne.range, [[UNIT / 2, UNIT], [UNIT / 2, UNIT]]);
        assert_eq!(ne.parent_id(), Some(0));
        assert_eq!(ne.h_levels, HLevels::from(1, 1));
        assert_eq!(ne.poly_orders, PolyOrders::from(2, 3));
        assert_eq!(ne.extent(), [1.0, 0.5]);

        assert_eq!(
            elem.h_refine(HRef::U, &mut id_counter).unwrap_err(),
            HRefError::ElemHasChildren(0)
        );
    }

    #[test]
    fn elem_anisotropic_refinement() {
        let mut elem = base_elem();
        let mut id_counter = 1;

        let children = elem.h_refine(HRef::V, &mut id_counter).unwrap();
        assert_eq!(children[0].range, [[0, UNIT], [0, UNIT / 2]]);
        assert_eq!(children[1].h_levels, HLevels::from(0, 1));
        assert_eq!(children[1].extent(), [2.0, 0.5]);
    }
}
