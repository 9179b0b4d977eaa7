use nalgebra::{DMatrix, SymmetricEigen};
use std::sync::OnceLock;

/// Rules up to this many points are computed once and shared
const MAX_CACHED_POINTS: usize = 32;

static GLQ_RULES: OnceLock<Vec<(Vec<f64>, Vec<f64>)>> = OnceLock::new();

// https://en.wikipedia.org/wiki/Gaussian_quadrature#Gauss%E2%80%93Legendre_quadrature
// https://www.mathworks.com/matlabcentral/mlc-downloads/downloads/submissions/23972/versions/22/previews/chebfun/examples/quad/html/GaussQuad.html
pub fn gauss_quadrature_points(n: usize) -> (Vec<f64>, Vec<f64>) {
    if n == 0 {
        return (Vec::new(), Vec::new());
    }

    let betas: Vec<f64> = (1..n)
        .map(|i| 0.5 / (1.0 - (2.0 * i as f64).powi(-2)).sqrt())
        .collect();

    let polymat: DMatrix<f64> = DMatrix::from_fn(n, n, |r, c| {
        if r == c + 1 {
            betas[r - 1]
        } else if c == r + 1 {
            betas[c - 1]
        } else {
            0.0
        }
    });

    let eigen_decomp = SymmetricEigen::new(polymat);

    let mut xw: Vec<(f64, f64)> = eigen_decomp
        .eigenvalues
        .iter()
        .cloned()
        .zip(
            eigen_decomp
                .eigenvectors
                .row(0)
                .iter()
                .map(|weight| (*weight).powi(2) * 2.0),
        )
        .collect();

    xw.sort_by(|a, b| a.0.total_cmp(&b.0));

    xw.drain(0..).unzip()
}

/// An `n` point Gauss-Legendre rule on `[-1, 1]`
pub fn gauss_rule(n: usize) -> (Vec<f64>, Vec<f64>) {
    if n == 0 || n > MAX_CACHED_POINTS {
        return gauss_quadrature_points(n);
    }

    let rules = GLQ_RULES.get_or_init(|| (1..=MAX_CACHED_POINTS).map(gauss_quadrature_points).collect());
    rules[n - 1].clone()
}

/// Number of points needed to integrate a polynomial of degree `degree` exactly
pub fn points_for_degree(degree: usize) -> usize {
    degree / 2 + 1
}

pub fn scale_gauss_quad_points(points: &[f64], min: f64, max: f64) -> (f64, Vec<f64>) {
    let scale_factor = (max - min) / 2.0;
    let offset = (max + min) / 2.0;

    (
        scale_factor,
        points
            .iter()
            .map(|x| x * scale_factor + offset)
            .collect::<Vec<f64>>(),
    )
}

/// Integrate a function sampled at GLQ points over a 2D region: `jacobian * Σ w_i w_j f(i, j)`
pub fn real_gauss_quad(u_weights: &[f64], v_weights: &[f64], jacobian: f64, mut values: impl FnMut(usize, usize) -> f64) -> f64 {
    let mut sum = 0.0;
    for (m, wu) in u_weights.iter().enumerate() {
        for (n, wv) in v_weights.iter().enumerate() {
            sum += wu * wv * values(m, n);
        }
    }
    sum * jacobian
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monomial_integral(degree: i32) -> f64 {
        if degree % 2 == 0 {
            2.0 / (degree + 1) as f64
        } else {
            0.0
        }
    }

    #[test]
    fn rules_integrate_monomials_exactly() {
        for n in 1..=24 {
            let (points, weights) = gauss_rule(n);
            assert_eq!(points.len(), n);
            assert!(points.windows(2).all(|pair| pair[0] < pair[1]));
            assert!(points.iter().all(|x| x.abs() < 1.0));
            for (x, x_mirror) in points.iter().zip(points.iter().rev()) {
                assert!((x + x_mirror).abs() < 1e-11);
            }

            for degree in 0..(2 * n as i32) {
                let integral: f64 = points.iter().zip(weights.iter()).map(|(x, w)| w * x.powi(degree)).sum();
                assert!(
                    (integral - monomial_integral(degree)).abs() < 1e-11,
                    "{} points, degree {}",
                    n,
                    degree
                );
            }
        }

        // one degree past the rule's exactness
        let (points, weights) = gauss_rule(3);
        let integral: f64 = points.iter().zip(weights.iter()).map(|(x, w)| w * x.powi(6)).sum();
        assert!((integral - 24.0 / 100.0).abs() < 1e-12);
        assert!((integral - monomial_integral(6)).abs() > 0.04);
    }

    #[test]
    fn fewest_points_for_a_degree() {
        for degree in 0..40 {
            let n = points_for_degree(degree);
            assert!(2 * n - 1 >= degree);
            assert!(n == 1 || 2 * (n - 1) - 1 < degree);
        }
    }

    #[test]
    fn scaled_points() {
        let (points, weights) = gauss_rule(points_for_degree(3));
        let (scale, scaled) = scale_gauss_quad_points(&points, 0.25, 0.5);

        assert!((scale - 0.125).abs() < 1e-14);
        assert!(scaled.iter().all(|x| *x > 0.25 && *x < 0.5));

        let integral: f64 = scaled.iter().zip(weights.iter()).map(|(x, w)| w * x.powi(3)).sum::<f64>() * scale;
        assert!((integral - (0.5f64.powi(4) - 0.25f64.powi(4)) / 4.0).abs() < 1e-14);
    }

    #[test]
    fn cached_rules_match() {
        for n in [1, 5, 20, MAX_CACHED_POINTS, MAX_CACHED_POINTS + 3] {
            let (points, weights) = gauss_rule(n);
            let (direct_points, direct_weights) = gauss_quadrature_points(n);
            assert_eq!(points, direct_points);
            assert_eq!(weights, direct_weights);
            assert!((weights.iter().sum::<f64>() - 2.0).abs() < 1e-12);
        }
        assert!(gauss_rule(0).0.is_empty());
    }

    #[test]
    fn polynomial_exactness() {
        // ∫∫ x^4 y^2 over [0, 2] x [1, 3] = (32 / 5) * (26 / 3)
        let (points, weights) = gauss_rule(points_for_degree(4));
        let (su, us) = scale_gauss_quad_points(&points, 0.0, 2.0);
        let (sv, vs) = scale_gauss_quad_points(&points, 1.0, 3.0);

        let integral = real_gauss_quad(&weights, &weights, su * sv, |m, n| us[m].powi(4) * vs[n].powi(2));
        assert!((integral - 32.0 / 5.0 * 26.0 / 3.0).abs() < 1e-11);
    }
}
