use crate::domain::fields::FieldSample;
use serde::{Deserialize, Serialize};

/// A symmetric bilinear form used to measure errors and norms of a field component
///
/// Implementations only see point samples; the surrounding quadrature is handled by [integrate_form](super::integrate_form).
pub trait ErrorForm: Send + Sync {
    /// Integrand of the form at one quadrature point
    fn value(&self, u: &FieldSample, v: &FieldSample) -> f64;

    /// Polynomial degree (along one direction) of the integrand when `u` and `v` have the given degrees
    fn order(&self, u_order: u8, v_order: u8) -> usize {
        u_order as usize + v_order as usize
    }
}

/// Norm used for projections and (by default) for error estimation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProjNormType {
    L2,
    #[default]
    H1,
}

/// Built-in norms as [ErrorForm]s
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NormForm {
    L2,
    H1,
    /// Gradient part of the H1 norm only
    H1Semi,
}

impl From<ProjNormType> for NormForm {
    fn from(norm: ProjNormType) -> Self {
        match norm {
            ProjNormType::L2 => Self::L2,
            ProjNormType::H1 => Self::H1,
        }
    }
}

impl ErrorForm for NormForm {
    fn value(&self, u: &FieldSample, v: &FieldSample) -> f64 {
        match self {
            Self::L2 => u.value * v.value,
            Self::H1 => u.value * v.value + u.dx * v.dx + u.dy * v.dy,
            Self::H1Semi => u.dx * v.dx + u.dy * v.dy,
        }
    }
}
