use super::MAX_POLYNOMIAL_ORDER;
use json::{object, JsonValue};
use thiserror::Error;

/// Anisotropic polynomial degrees of an `Elem`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PolyOrders {
    /// Maximum u-directed polynomial expansion order
    pub ni: u8,
    /// Maximum v-directed polynomial expansion order
    pub nj: u8,
}

impl PolyOrders {
    pub const fn from(i: u8, j: u8) -> Self {
        Self { ni: i, nj: j }
    }

    pub const fn iso(n: u8) -> Self {
        Self { ni: n, nj: n }
    }

    pub fn set(&mut self, [ni, nj]: [u8; 2]) -> Result<(), PRefError> {
        if ni > MAX_POLYNOMIAL_ORDER || nj > MAX_POLYNOMIAL_ORDER {
            return Err(PRefError::ExceededMaxExpansion);
        }
        if ni == 0 || nj == 0 {
            return Err(PRefError::NegExpansion);
        }

        self.ni = ni;
        self.nj = nj;

        Ok(())
    }

    /// Orders raised by `increment` in both directions, saturating at `cap`
    pub fn raised(&self, increment: u8, cap: u8) -> Self {
        Self {
            ni: self.ni.saturating_add(increment).min(cap),
            nj: self.nj.saturating_add(increment).min(cap),
        }
    }

    /// Are both orders at least as large as those of `other`
    pub fn dominates(&self, other: &Self) -> bool {
        self.ni >= other.ni && self.nj >= other.nj
    }

    pub fn max_with(&self, orders: [u8; 2]) -> [u8; 2] {
        [
            std::cmp::max(self.ni, orders[0]),
            std::cmp::max(self.nj, orders[1]),
        ]
    }

    /// Number of coefficients in a tensor expansion of these orders
    pub fn num_coeffs(&self) -> usize {
        (self.ni as usize + 1) * (self.nj as usize + 1)
    }

    /// Number of interior (bubble) degrees of freedom
    pub fn num_bubbles(&self) -> usize {
        (self.ni as usize - 1) * (self.nj as usize - 1)
    }

    /// Iterate over the `[i, j]` index pairs of a tensor expansion (row-major in `i`)
    pub fn permutations(&self) -> impl Iterator<Item = [u8; 2]> + '_ {
        (0..=self.ni).flat_map(move |i_order| (0..=self.nj).map(move |j_order| [i_order, j_order]))
    }
}

impl Default for PolyOrders {
    fn default() -> Self {
        Self { ni: 1, nj: 1 }
    }
}

#[cfg(feature = "json_export")]
impl From<PolyOrders> for JsonValue {
    fn from(orders: PolyOrders) -> Self {
        object! {
            "u": orders.ni,
            "v": orders.nj,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PRefError {
    #[error("expansion orders must be at least 1")]
    NegExpansion,
    #[error("expansion orders can't exceed {}", MAX_POLYNOMIAL_ORDER)]
    ExceededMaxExpansion,
    #[error("Elem {0} does not exist; Cannot apply p-Refinement!")]
    ElemDoesntExist(usize),
    #[error("Elem {0} has children; p-Refinements can only be applied to active Elems!")]
    InactiveElem(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checked_orders() {
        let mut orders = PolyOrders::from(2, 3);
        orders.set([3, 1]).unwrap();
        assert_eq!(orders, PolyOrders::from(3, 1));

        assert_eq!(orders.set([0, 1]), Err(PRefError::NegExpansion));
        assert_eq!(
            orders.set([1, MAX_POLYNOMIAL_ORDER + 1]),
            Err(PRefError::ExceededMaxExpansion)
        );
        assert_eq!(orders, PolyOrders::from(3, 1));
    }

    #[test]
    fn coefficient_counts() {
        let orders = PolyOrders::from(3, 2);
        assert_eq!(orders.num_coeffs(), 12);
        assert_eq!(orders.num_bubbles(), 2);
        assert_eq!(orders.permutations().count(), 12);
        assert_eq!(orders.permutations().nth(3), Some([1, 0]));
        assert_eq!(orders.raised(2, 4), PolyOrders::from(4, 4));
        assert!(PolyOrders::from(4, 4).dominates(&orders));
    }
}
