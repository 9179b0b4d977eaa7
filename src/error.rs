use crate::adapt::{estimator::EstimateError, RefineError};
use crate::config::ConfigError;
use crate::domain::{
    fields::SolutionError,
    mesh::{h_refinement::HRefError, p_refinement::PRefError, MeshError},
    RefinementError,
};
use crate::projection::ProjectionError;
use crate::solver::SolverError;

use thiserror::Error;

/// Failures which end an adaptivity run
///
/// `step` is the 1-based iteration in which the failure occurred. Iterations before it are already in the
/// [ConvergenceHistory](crate::convergence::ConvergenceHistory) and the convergence log.
#[derive(Debug, Error)]
pub enum AdaptError {
    #[error("solver failed in adaptivity step {step}: {source}")]
    FatalSolverFailure {
        step: usize,
        #[source]
        source: SolverError,
    },
    #[error("projection of the reference solution failed in adaptivity step {step}: {source}")]
    ProjectionFailure {
        step: usize,
        #[source]
        source: ProjectionError,
    },
    #[error("error estimation failed in adaptivity step {step}: {source}")]
    EstimationFailure {
        step: usize,
        #[source]
        source: EstimateError,
    },
    #[error("refinement of the working spaces failed in adaptivity step {step}: {source}")]
    RefinementFailure {
        step: usize,
        #[source]
        source: RefineError,
    },
    #[error("reference space construction failed in adaptivity step {step}: {source}")]
    ReferenceFailure {
        step: usize,
        #[source]
        source: RefinementError,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Mesh(#[from] MeshError),
    #[error(transparent)]
    Refinement(#[from] RefinementError),
    #[error(transparent)]
    Solution(#[from] SolutionError),
}

impl From<HRefError> for AdaptError {
    fn from(err: HRefError) -> Self {
        Self::Refinement(RefinementError::H(err))
    }
}

impl From<PRefError> for AdaptError {
    fn from(err: PRefError) -> Self {
        Self::Refinement(RefinementError::P(err))
    }
}

impl AdaptError {
    /// The adaptivity step in which the run failed (`None` for failures before the loop started)
    pub fn step(&self) -> Option<usize> {
        match self {
            Self::FatalSolverFailure { step, .. }
            | Self::ProjectionFailure { step, .. }
            | Self::EstimationFailure { step, .. }
            | Self::RefinementFailure { step, .. }
            | Self::ReferenceFailure { step, .. } => Some(*step),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn conversions_and_sources() {
        let err = AdaptError::FatalSolverFailure {
            step: 2,
            source: SolverError::NotConverged { iterations: 100 },
        };
        assert_eq!(err.step(), Some(2));
        assert!(err.to_string().contains("step 2"));
        assert!(err.source().is_some());

        let err: AdaptError = PRefError::ExceededMaxExpansion.into();
        assert!(matches!(err, AdaptError::Refinement(RefinementError::P(_))));
        assert_eq!(err.step(), None);

        let err: AdaptError = ConfigError::ZeroRegularity.into();
        assert!(matches!(err, AdaptError::Config(ConfigError::ZeroRegularity)));
    }
}
