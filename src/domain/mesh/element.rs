use super::primitives::{DyadicRange, ParaDir, Point, UNIT};
use json::{object, JsonValue};

/// Sides of an `Element` (and of an `Elem`) by index
///
/// ```text
///               N
///         2 --------- 3
///         |     1     |
///         |           |
///      W  |2         3|  E
///         |           |
///         |     0     |
///         0 --------- 1
///               S
/// ```
pub const SIDE_NODE_INDICES: [[usize; 2]; 4] = [[0, 1], [2, 3], [0, 2], [1, 3]];

/// The `Element`s are the basic geometric unit of the Mesh in Real Space.
///
/// Each `Element` is an axis-aligned rectangle with a material marker. Its four points are ordered
/// `[SW, SE, NW, NE]`; `node_ids` are the ids of the corresponding mesh nodes.
///
/// Mesh files describe the `Element`s in the domain; not the `Elem`s
/// Upon `Mesh` construction, each `Element` has one associated `Elem`, but more can be added through h-Refinements
#[derive(Debug, Clone)]
pub struct Element {
    pub id: usize,
    pub node_ids: [usize; 4],
    pub points: [Point; 4],
    pub marker: String,
}

impl Element {
    pub fn new(id: usize, node_ids: [usize; 4], points: [Point; 4], marker: String) -> Self {
        Self {
            id,
            node_ids,
            points,
            marker,
        }
    }

    /// Real-space size of the Element: `[width, height]`
    pub fn extent(&self) -> [f64; 2] {
        [
            self.points[3].x - self.points[0].x,
            self.points[3].y - self.points[0].y,
        ]
    }

    /// Real-space size of a dyadic sub-range of this Element
    pub fn sub_extent(&self, range: &DyadicRange) -> [f64; 2] {
        let [width, height] = self.extent();
        [
            width * (range[0][1] - range[0][0]) as f64 / UNIT as f64,
            height * (range[1][1] - range[1][0]) as f64 / UNIT as f64,
        ]
    }

    /// Real-space location of a dyadic coordinate pair (fractional values permitted)
    pub fn real_point(&self, u: f64, v: f64) -> Point {
        Point::new(
            map_range(u, 0.0, UNIT as f64, self.points[0].x, self.points[3].x),
            map_range(v, 0.0, UNIT as f64, self.points[0].y, self.points[3].y),
        )
    }

    /// Sorted node-id pair of one of the Element's sides
    pub fn side_nodes(&self, side: usize) -> [usize; 2] {
        let [a, b] = SIDE_NODE_INDICES[side].map(|idx| self.node_ids[idx]);
        if a < b {
            [a, b]
        } else {
            [b, a]
        }
    }

    /// Direction in which a side runs
    pub fn side_dir(side: usize) -> ParaDir {
        if side < 2 {
            ParaDir::U
        } else {
            ParaDir::V
        }
    }

    pub fn area(&self) -> f64 {
        let [width, height] = self.extent();
        width * height
    }

    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "id": self.id,
            "marker": self.marker.clone(),
            "node_ids": JsonValue::from(self.node_ids.to_vec()),
            "points": JsonValue::from(self.points.iter().copied().map(JsonValue::from).collect::<Vec<_>>()),
        }
    }
}

pub fn map_range(x: f64, x_min: f64, x_max: f64, y_min: f64, y_max: f64) -> f64 {
    y_min + (y_max - y_min) / (x_max - x_min) * (x - x_min)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_element() -> Element {
        Element::new(
            0,
            [4, 7, 2, 9],
            [
                Point::new(1.0, 0.0),
                Point::new(3.0, 0.0),
                Point::new(1.0, 0.5),
                Point::new(3.0, 0.5),
            ],
            String::from("Material_1"),
        )
    }

    #[test]
    fn element_geometry() {
        let element = unit_element();
        assert_eq!(element.extent(), [2.0, 0.5]);
        assert_eq!(element.sub_extent(&[[0, UNIT / 2], [0, UNIT / 4]]), [1.0, 0.125]);
        assert_eq!(
            element.real_point((UNIT / 2) as f64, UNIT as f64),
            Point::new(2.0, 0.5)
        );
        assert!((element.area() - 1.0).abs() < 1e-14);
    }

    #[test]
    fn element_sides() {
        let element = unit_element();
        assert_eq!(element.side_nodes(0), [4, 7]);
        assert_eq!(element.side_nodes(1), [2, 9]);
        assert_eq!(element.side_nodes(2), [2, 4]);
        assert_eq!(element.side_nodes(3), [7, 9]);
        assert_eq!(Element::side_dir(1), ParaDir::U);
        assert_eq!(Element::side_dir(3), ParaDir::V);
    }
}
