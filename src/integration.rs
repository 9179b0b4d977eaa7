/// Error and norm forms evaluated at quadrature points
pub mod forms;
/// Gauss-Legendre quadrature rules
pub mod glq;

use crate::domain::{
    fields::{FieldSample, Patch},
    mesh::primitives::{DyadicRange, UNIT},
};
use forms::ErrorForm;
use glq::{gauss_rule, points_for_degree, scale_gauss_quad_points, real_gauss_quad};

/// Integrate `form(a - b, a - b)` over the dyadic `region` (or `form(a, a)` when `b` is `None`)
///
/// `region` must lie inside both patches, which must belong to the same Element.
/// When both patches cover the same range, their coefficients are subtracted before sampling.
pub fn integrate_form(form: &dyn ErrorForm, a: &Patch, b: Option<&Patch>, region: &DyadicRange) -> f64 {
    match b {
        Some(b) if a.range == b.range => {
            let diff = a.expansion.difference(b.expansion);
            let diff_patch = Patch {
                range: a.range,
                element_extent: a.element_extent,
                expansion: &diff,
            };
            integrate_samples(form, &[&diff_patch], region, |samples| samples[0])
        }
        Some(b) => integrate_samples(form, &[a, b], region, |samples| samples[0] - samples[1]),
        None => integrate_samples(form, &[a], region, |samples| samples[0]),
    }
}

fn integrate_samples<F>(form: &dyn ErrorForm, patches: &[&Patch], region: &DyadicRange, combine: F) -> f64
where
    F: Fn(&[FieldSample]) -> FieldSample,
{
    let max_i = patches.iter().map(|p| p.expansion.orders.ni).max().unwrap_or(0);
    let max_j = patches.iter().map(|p| p.expansion.orders.nj).max().unwrap_or(0);

    let (u_points, u_weights) = gauss_rule(points_for_degree(form.order(max_i, max_i)));
    let (v_points, v_weights) = gauss_rule(points_for_degree(form.order(max_j, max_j)));

    let (_, us) = scale_gauss_quad_points(&u_points, region[0][0] as f64, region[0][1] as f64);
    let (_, vs) = scale_gauss_quad_points(&v_points, region[1][0] as f64, region[1][1] as f64);

    let sampled: Vec<Vec<FieldSample>> = patches.iter().map(|p| p.sample(&us, &vs)).collect();
    let jacobian = region_jacobian(patches[0].element_extent, region);

    let mut point_samples = vec![FieldSample::default(); patches.len()];
    real_gauss_quad(&u_weights, &v_weights, jacobian, |m, n| {
        let index = m * vs.len() + n;
        for (slot, samples) in point_samples.iter_mut().zip(sampled.iter()) {
            *slot = samples[index];
        }
        let diff = combine(&point_samples);
        form.value(&diff, &diff)
    })
}

/// Jacobian of the map from `[-1, 1]^2` onto the real-space image of a dyadic region
pub fn region_jacobian(element_extent: [f64; 2], region: &DyadicRange) -> f64 {
    let width = element_extent[0] * (region[0][1] - region[0][0]) as f64 / UNIT as f64;
    let height = element_extent[1] * (region[1][1] - region[1][0]) as f64 / UNIT as f64;
    width * height / 4.0
}
