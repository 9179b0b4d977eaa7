use super::primitives::{DyadicRange, ParaDir, MAX_H_LEVEL};
use json::{object, JsonValue};
use thiserror::Error;

/// Description of an h-Refinement
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HRef {
    /// isotropic (4 children)
    T,
    /// anisotropic about the u-direction (left and right children)
    U,
    /// anisotropic about the v-direction (bottom and top children)
    V,
}

impl HRef {
    /// Number of children produced by this refinement
    pub fn num_children(&self) -> usize {
        match self {
            Self::T => 4,
            Self::U | Self::V => 2,
        }
    }

    /// Location of the child at `index` relative to its parent
    pub fn loc(&self, index: usize) -> HRefLoc {
        match self {
            Self::T => HRefLoc::T(Quadrant::ALL[index]),
            Self::U => HRefLoc::U(Bisection::ALL[index]),
            Self::V => HRefLoc::V(Bisection::ALL[index]),
        }
    }

    /// Iterator over the locations of all children
    pub fn locs(self) -> impl Iterator<Item = HRefLoc> {
        (0..self.num_children()).map(move |idx| self.loc(idx))
    }

    /// Dyadic ranges of the children which would result from applying this refinement to `range`
    pub fn child_ranges(&self, range: &DyadicRange) -> Vec<DyadicRange> {
        self.locs().map(|loc| loc.sub_range(range)).collect()
    }

    /// Does this refinement split the `Elem` in the given direction
    pub fn splits(&self, dir: ParaDir) -> bool {
        matches!(
            (self, dir),
            (Self::T, _) | (Self::U, ParaDir::U) | (Self::V, ParaDir::V)
        )
    }

    /// The finest refinement covering both `self` and `other`
    pub fn union(self, other: Self) -> Self {
        match (self, other) {
            (Self::U, Self::U) => Self::U,
            (Self::V, Self::V) => Self::V,
            _ => Self::T,
        }
    }
}

/// Quadrant of a child Elem following a T-Type h-Refinement (from the parent Elem's perspective)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quadrant {
    /// south west
    SW,
    /// south east
    SE,
    /// north west
    NW,
    /// north east
    NE,
}

impl Quadrant {
    const ALL: [Self; 4] = [Self::SW, Self::SE, Self::NW, Self::NE];

    pub fn index(&self) -> usize {
        match self {
            Self::SW => 0,
            Self::SE => 1,
            Self::NW => 2,
            Self::NE => 3,
        }
    }
}

/// Location of a child Elem following a U-Type or V-Type h-refinement (from the parent Elem's perspective).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bisection {
    /// Bottom (V-type) or Left (U-type)
    BL,
    /// Top (V-Type) or Right (U-type)
    TR,
}

impl Bisection {
    const ALL: [Self; 2] = [Self::BL, Self::TR];

    pub fn index(&self) -> usize {
        match self {
            Self::BL => 0,
            Self::TR => 1,
        }
    }
}

/// The location of an [Elem](super::elem::Elem) relative to its parent following an h-refinement
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HRefLoc {
    T(Quadrant),
    U(Bisection),
    V(Bisection),
}

impl HRefLoc {
    pub fn index(&self) -> usize {
        match self {
            Self::T(quad) => quad.index(),
            Self::U(bi) | Self::V(bi) => bi.index(),
        }
    }

    /// Portion of a parent's dyadic range covered by the child at this location
    pub fn sub_range(&self, [[u0, u1], [v0, v1]]: &DyadicRange) -> DyadicRange {
        let u_mid = (u0 + u1) / 2;
        let v_mid = (v0 + v1) / 2;

        match self {
            Self::T(Quadrant::SW) => [[*u0, u_mid], [*v0, v_mid]],
            Self::T(Quadrant::SE) => [[u_mid, *u1], [*v0, v_mid]],
            Self::T(Quadrant::NW) => [[*u0, u_mid], [v_mid, *v1]],
            Self::T(Quadrant::NE) => [[u_mid, *u1], [v_mid, *v1]],
            Self::U(Bisection::BL) => [[*u0, u_mid], [*v0, *v1]],
            Self::U(Bisection::TR) => [[u_mid, *u1], [*v0, *v1]],
            Self::V(Bisection::BL) => [[*u0, *u1], [*v0, v_mid]],
            Self::V(Bisection::TR) => [[*u0, *u1], [v_mid, *v1]],
        }
    }
}

/// Description of an Elem's h-Refinement levels in the u and v directions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct HLevels {
    pub u: u8,
    pub v: u8,
}

impl HLevels {
    pub fn from(u: u8, v: u8) -> Self {
        Self { u, v }
    }

    pub fn refined(&self, refinement: HRef) -> Self {
        match refinement {
            HRef::T => Self::from(self.u + 1, self.v + 1),
            HRef::U => Self::from(self.u + 1, self.v),
            HRef::V => Self::from(self.u, self.v + 1),
        }
    }

    /// Can an Elem at these levels be refined further in the given direction
    pub fn can_refine(&self, dir: ParaDir) -> bool {
        match dir {
            ParaDir::U => self.u < MAX_H_LEVEL,
            ParaDir::V => self.v < MAX_H_LEVEL,
        }
    }

    /// Can an Elem at these levels accept the given refinement
    pub fn admits(&self, refinement: HRef) -> bool {
        [ParaDir::U, ParaDir::V]
            .iter()
            .all(|dir| !refinement.splits(*dir) || self.can_refine(*dir))
    }
}

#[cfg(feature = "json_export")]
impl From<HLevels> for JsonValue {
    fn from(levels: HLevels) -> Self {
        object! {
            "u": levels.u,
            "v": levels.v,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HRefError {
    #[error("Elem {0} does not exist; Cannot apply h-Refinement!")]
    ElemDoesntExist(usize),
    #[error("Elem {0} has already been h-refined; Cannot apply h-Refinement!")]
    ElemHasChildren(usize),
    #[error("Multiple h-refinements were specified for Elem {0}; Cannot apply h-Refinements!")]
    DoubleRefinement(usize),
    #[error("Elem {0} is at the maximum h-refinement level; Cannot apply {1:?} h-Refinement!")]
    MaxLevelExceeded(usize, HRef),
}
