use json::{object, JsonValue};
use std::fmt;

/// Maximum number of h-refinement layers in either parametric direction
pub const MAX_H_LEVEL: u8 = 15;

/// Length of an `Element`s side in dyadic parametric units
///
/// Each [Elem](super::elem::Elem) covers a dyadic sub-rectangle of its `Element`, `[0, UNIT] x [0, UNIT]`, so refinement never
/// has to compare floating point coordinates to decide which sides and vertices coincide.
pub const UNIT: u32 = 1 << MAX_H_LEVEL;

/// Tolerance used when comparing real-space coordinates of mesh input
pub const COORD_TOLERANCE: f64 = 1e-12;

/// Parametric range of an `Elem` within its `Element`: `[[u_min, u_max], [v_min, v_max]]` in dyadic units
pub type DyadicRange = [[u32; 2]; 2];

/// The full range of an `Element`
pub const FULL_RANGE: DyadicRange = [[0, UNIT], [0, UNIT]];

/// A Point in Real Space
#[derive(Clone, Copy, Debug, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn between(a: &Self, b: &Self) -> Self {
        Self::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
    }

    pub fn dist(&self, other: &Self) -> f64 {
        ((other.x - self.x).powi(2) + (other.y - self.y).powi(2)).sqrt()
    }

    /// The direction of the line between two points (`None` if the points are not axis-aligned)
    pub fn orientation_with(&self, other: &Self) -> Option<ParaDir> {
        let same_x = (self.x - other.x).abs() < COORD_TOLERANCE;
        let same_y = (self.y - other.y).abs() < COORD_TOLERANCE;

        match (same_x, same_y) {
            (false, true) => Some(ParaDir::U),
            (true, false) => Some(ParaDir::V),
            _ => None,
        }
    }
}

impl PartialEq for Point {
    fn eq(&self, other: &Self) -> bool {
        (self.x - other.x).abs() < COORD_TOLERANCE && (self.y - other.y).abs() < COORD_TOLERANCE
    }
}

impl From<Point> for JsonValue {
    fn from(point: Point) -> Self {
        object! {
            "x": point.x,
            "y": point.y,
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.x, self.y)
    }
}

/// Parametric directions
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParaDir {
    /// along the x-axis
    U,
    /// along the y-axis
    V,
}

impl ParaDir {
    pub fn index(&self) -> usize {
        match self {
            Self::U => 0,
            Self::V => 1,
        }
    }
}

/// Intersection of two dyadic ranges (`None` if they don't overlap on a set of positive area)
pub fn intersect_ranges(a: &DyadicRange, b: &DyadicRange) -> Option<DyadicRange> {
    let u = [a[0][0].max(b[0][0]), a[0][1].min(b[0][1])];
    let v = [a[1][0].max(b[1][0]), a[1][1].min(b[1][1])];

    if u[0] < u[1] && v[0] < v[1] {
        Some([u, v])
    } else {
        None
    }
}

/// Does `outer` cover all of `inner`
pub fn range_contains(outer: &DyadicRange, inner: &DyadicRange) -> bool {
    outer[0][0] <= inner[0][0]
        && inner[0][1] <= outer[0][1]
        && outer[1][0] <= inner[1][0]
        && inner[1][1] <= outer[1][1]
}

/// Map a dyadic coordinate (possibly fractional) onto `[-1, 1]` relative to an interval `[min, max]`
#[inline]
pub fn local_coordinate(dyadic: f64, [min, max]: [u32; 2]) -> f64 {
    let (min, max) = (min as f64, max as f64);
    (2.0 * dyadic - min - max) / (max - min)
}
