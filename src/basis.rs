use crate::integration::glq::{gauss_quadrature_points, gauss_rule};
use nalgebra::DMatrix;

/// Legendre polynomials `P_0 ... P_max_n` and their first derivatives, sampled at a set of points in `[-1, 1]`
///
/// `l[n][p]` is `P_n` evaluated at the `p`th point; `d1[n][p]` is its derivative.
#[derive(Clone, Debug)]
pub struct LegendrePoly {
    pub l: Vec<Vec<f64>>,
    pub d1: Vec<Vec<f64>>,
}

impl LegendrePoly {
    pub fn with(max_n: u8, points: &[f64]) -> Self {
        let max_n = max_n as usize;
        let mut values: Vec<Vec<f64>> = Vec::with_capacity(max_n + 1);
        let mut primes: Vec<Vec<f64>> = Vec::with_capacity(max_n + 1);

        for i in 0..=max_n {
            let i_f = i as f64;
            let (value, prime): (Vec<f64>, Vec<f64>) = match i {
                0 => (vec![1.0; points.len()], vec![0.0; points.len()]),
                1 => (Vec::from(points), vec![1.0; points.len()]),
                _ => points
                    .iter()
                    .enumerate()
                    .map(|(p, x)| {
                        (
                            ((2.0 * i_f - 1.0) * x * values[i - 1][p] - (i_f - 1.0) * values[i - 2][p]) / i_f,
                            i_f * values[i - 1][p] + x * primes[i - 1][p],
                        )
                    })
                    .unzip(),
            };

            values.push(value);
            primes.push(prime);
        }

        Self {
            l: values,
            d1: primes,
        }
    }

    pub fn max_order(&self) -> usize {
        self.l.len() - 1
    }

    /// `∫ P_n^2` over `[-1, 1]`
    pub fn norm_squared(n: usize) -> f64 {
        2.0 / (2.0 * n as f64 + 1.0)
    }
}

/// 1D mass matrix `∫ P_i P_k` over `[-1, 1]` (diagonal)
pub fn legendre_mass_matrix(max_n: u8) -> DMatrix<f64> {
    let n = max_n as usize + 1;
    DMatrix::from_fn(n, n, |i, k| if i == k { LegendrePoly::norm_squared(i) } else { 0.0 })
}

/// 1D stiffness matrix `∫ P_i' P_k'` over `[-1, 1]`
pub fn legendre_stiffness_matrix(max_n: u8) -> DMatrix<f64> {
    let n = max_n as usize + 1;
    let (points, weights) = gauss_quadrature_points(n);
    let leg = LegendrePoly::with(max_n, &points);

    DMatrix::from_fn(n, n, |i, k| {
        weights
            .iter()
            .enumerate()
            .map(|(p, w)| w * leg.d1[i][p] * leg.d1[k][p])
            .sum()
    })
}

/// Legendre coefficients of the linear functions which are one at `ξ = -1` and at `ξ = 1` respectively
pub const VERTEX_FNS: [[f64; 2]; 2] = [[0.5, -0.5], [0.5, 0.5]];

/// Scaling of the `k`th edge function `s_k (P_k - P_{k-2})`, chosen so that `∫ ψ_k'^2 = 1`
pub fn edge_fn_scale(k: usize) -> f64 {
    1.0 / (4.0 * k as f64 - 2.0).sqrt()
}

/// Value of a Legendre series `Σ c_k P_k` at either end of `[-1, 1]`
pub fn legendre_end_value(coeffs: &[f64], end: usize) -> f64 {
    coeffs
        .iter()
        .enumerate()
        .map(|(k, c)| if end == 0 && k % 2 == 1 { -c } else { *c })
        .sum()
}

/// Re-expansion of a Legendre series of degree `max_n` over the sub-interval `[a, b]` of `[-1, 1]`
///
/// Column `k` holds the Legendre coefficients (local to `[a, b]`) of `P_k` restricted to `[a, b]`.
pub fn legendre_restriction(max_n: u8, [a, b]: [f64; 2]) -> DMatrix<f64> {
    let n = max_n as usize + 1;
    let (points, weights) = gauss_rule(n);
    let mapped: Vec<f64> = points.iter().map(|tau| 0.5 * (a + b) + 0.5 * (b - a) * tau).collect();

    let outer = LegendrePoly::with(max_n, &mapped);
    let inner = LegendrePoly::with(max_n, &points);

    DMatrix::from_fn(n, n, |m, k| {
        weights
            .iter()
            .enumerate()
            .map(|(q, w)| w * outer.l[k][q] * inner.l[m][q])
            .sum::<f64>()
            / LegendrePoly::norm_squared(m)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DVector;

    #[test]
    fn legendre_values() {
        let points = [-1.0, -0.5, 0.0, 0.3, 1.0];
        let leg = LegendrePoly::with(4, &points);

        for (p, x) in points.iter().enumerate() {
            assert_relative_eq!(leg.l[2][p], 0.5 * (3.0 * x * x - 1.0), epsilon = 1e-14);
            assert_relative_eq!(leg.l[3][p], 0.5 * (5.0 * x * x * x - 3.0 * x), epsilon = 1e-14);
            assert_relative_eq!(leg.d1[2][p], 3.0 * x, epsilon = 1e-14);
            assert_relative_eq!(leg.d1[3][p], 0.5 * (15.0 * x * x - 3.0), epsilon = 1e-14);
        }

        // P_n(1) = 1 and P_n'(1) = n(n+1)/2
        for n in 0..=4 {
            assert_relative_eq!(leg.l[n][4], 1.0, epsilon = 1e-14);
            assert_relative_eq!(leg.d1[n][4], (n * (n + 1)) as f64 / 2.0, epsilon = 1e-13);
        }
        assert_eq!(leg.max_order(), 4);
    }

    #[test]
    fn one_dimensional_matrices() {
        let mass = legendre_mass_matrix(3);
        assert_relative_eq!(mass[(2, 2)], 0.4, epsilon = 1e-15);
        assert_eq!(mass[(1, 2)], 0.0);

        // ∫ P_i' P_k' = min(i, k)(min(i, k) + 1) when i + k is even, 0 otherwise
        let stiffness = legendre_stiffness_matrix(4);
        assert_relative_eq!(stiffness[(1, 1)], 2.0, epsilon = 1e-13);
        assert_relative_eq!(stiffness[(2, 2)], 6.0, epsilon = 1e-13);
        assert_relative_eq!(stiffness[(2, 4)], 6.0, epsilon = 1e-13);
        assert_relative_eq!(stiffness[(1, 3)], 2.0, epsilon = 1e-13);
        assert_relative_eq!(stiffness[(1, 2)], 0.0, epsilon = 1e-13);
        assert_relative_eq!(stiffness[(0, 3)], 0.0, epsilon = 1e-13);
    }

    #[test]
    fn edge_functions_vanish_at_the_ends() {
        for k in 2..=6 {
            let mut coeffs = vec![0.0; k + 1];
            coeffs[k] = edge_fn_scale(k);
            coeffs[k - 2] = -edge_fn_scale(k);
            assert_relative_eq!(legendre_end_value(&coeffs, 0), 0.0, epsilon = 1e-15);
            assert_relative_eq!(legendre_end_value(&coeffs, 1), 0.0, epsilon = 1e-15);
        }

        // derivative of P_k - P_{k-2} is (2k - 1) P_{k-1}
        let stiffness = legendre_stiffness_matrix(4);
        let s = edge_fn_scale(4);
        let seminorm = s * s * (stiffness[(4, 4)] - 2.0 * stiffness[(4, 2)] + stiffness[(2, 2)]);
        assert_relative_eq!(seminorm, 1.0, epsilon = 1e-12);

        assert_eq!(legendre_end_value(&VERTEX_FNS[0], 0), 1.0);
        assert_eq!(legendre_end_value(&VERTEX_FNS[0], 1), 0.0);
        assert_eq!(legendre_end_value(&VERTEX_FNS[1], 1), 1.0);
    }

    #[test]
    fn restriction_to_a_sub_interval() {
        // p(x) = 1 + 2x + 3 P_2(x) on [0, 0.5]
        let coeffs = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let restricted = legendre_restriction(2, [0.0, 0.5]) * &coeffs;

        let taus = [-1.0, -0.3, 0.4, 1.0];
        let leg = LegendrePoly::with(2, &taus);
        for (q, tau) in taus.iter().enumerate() {
            let x = 0.25 + 0.25 * tau;
            let expected = 1.0 + 2.0 * x + 1.5 * (3.0 * x * x - 1.0);
            let found: f64 = (0..3).map(|k| restricted[k] * leg.l[k][q]).sum();
            assert_relative_eq!(found, expected, epsilon = 1e-13);
        }

        let identity = legendre_restriction(3, [-1.0, 1.0]);
        assert_relative_eq!(identity, DMatrix::identity(4, 4), epsilon = 1e-13);
    }
}
