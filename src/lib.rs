//! Automatic hp-adaptivity for 2D finite element discretizations
//!
//! Each iteration of an [AdaptivityLoop] solves the problem on a globally refined reference space,
//! projects the reference solution back onto the working space, estimates the error between the two,
//! and refines the working space where the error is largest. Refinements are chosen per Elem from
//! h-, p- and hp-candidates by their projected error decrease per added degree of freedom.
//!
//! ```no_run
//! use hp_adapt_2d::*;
//!
//! let mesh = Mesh::from_file("./test_input/l_shape.json").unwrap();
//! let config = AdaptConfig::from_file("./test_input/adapt.toml").unwrap();
//! let spaces = config
//!     .initial_spaces(&mesh, vec![EssentialBCs::new().with("Bdy_outer", 0.0)])
//!     .unwrap();
//!
//! let solver = ExactSolutionSolver::new().with_field(|x, y| (x * y).sin());
//! let mut adaptivity = AdaptivityLoop::new(config, spaces, solver)
//!     .unwrap()
//!     .with_convergence_log(ConvergenceLog::create("./test_output").unwrap());
//!
//! let outcome = adaptivity.run().unwrap();
//! println!("{:?} after {} steps", outcome.stop_reason, outcome.iterations);
//! ```

/// Error estimation, marking, candidate selection and refinement
pub mod adapt;
/// Legendre polynomials used by local expansions
pub mod basis;
/// Options of an adaptivity run
pub mod config;
/// The adaptivity loop
pub mod controller;
/// Convergence history and graph files
pub mod convergence;
/// Meshes, Spaces and Solutions
pub mod domain;
/// Top level error type
pub mod error;
/// Quadrature and error forms
pub mod integration;
/// Dense and sparse symmetric linear solves
pub mod linalg;
/// Logger setup
pub mod logging;
/// Projection of reference solutions onto working spaces
pub mod projection;
/// The interface to the discrete problem solver
pub mod solver;

pub use adapt::{
    candidate::CandList,
    estimator::{ErrorCombination, ErrorEstimate, Estimator, ReferenceEstimator},
    marking::MarkingStrategy,
    selector::{ErrorWeights, ProjBasedSelector},
    Adapt, AdaptReport,
};
pub use config::{AdaptConfig, ConfigError};
pub use controller::{AdaptObserver, AdaptOutcome, AdaptState, AdaptivityLoop, IterationView, StopReason};
pub use convergence::{ConvergenceHistory, ConvergenceLog, IterationRecord};
pub use domain::{
    boundary::EssentialBCs,
    fields::{vector_to_solutions, Solution},
    mesh::{h_refinement::HRef, p_refinement::PolyOrders, primitives::Point, Mesh},
    ElemRefinement, Space,
};
pub use error::AdaptError;
pub use integration::forms::{ErrorForm, NormForm, ProjNormType};
pub use projection::{OrthogonalProjection, Projector};
pub use solver::{DiscreteSolver, ExactSolutionSolver, SolverError};
