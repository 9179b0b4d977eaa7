use crate::adapt::{
    estimator::{ErrorEstimate, Estimator, ReferenceEstimator},
    Adapt,
};
use crate::config::AdaptConfig;
use crate::convergence::{ConvergenceHistory, ConvergenceLog, CpuClock, IterationRecord};
use crate::domain::{
    construct_refined_spaces,
    fields::{vector_to_solutions, Solution, SolutionError},
    Space,
};
use crate::error::AdaptError;
use crate::projection::{OrthogonalProjection, Projector};
use crate::solver::{DiscreteSolver, SolverError};

use log::{debug, info, warn};

/// Phases of an adaptivity iteration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdaptState {
    Start,
    BuildReference,
    Solve,
    Project,
    Estimate,
    MarkAndRefine,
    CheckStop,
    Done,
}

/// Why an adaptivity run ended
///
/// After a refinement pass the DOF ceiling is checked first, so a pass which refines nothing on spaces already at
/// the ceiling ends with [DofCeiling](StopReason::DofCeiling).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The error estimate fell below `err_stop`
    Converged,
    /// The working spaces reached `ndof_stop` DOFs
    DofCeiling,
    /// No flagged Elem had a refinement which improved its error
    NoRefinement,
    /// `max_iterations` iterations were completed
    IterationLimit,
}

/// Result of a completed adaptivity run
#[derive(Debug)]
pub struct AdaptOutcome {
    pub stop_reason: StopReason,
    pub iterations: usize,
    /// Final working spaces
    pub spaces: Vec<Space>,
    /// Projected solutions of the last iteration
    ///
    /// These belong to the working spaces as they were when the error was estimated. If the run ended on
    /// the DOF ceiling or iteration limit, the spaces have been refined since.
    pub coarse_solutions: Vec<Solution>,
    /// Reference spaces of the last iteration
    pub ref_spaces: Vec<Space>,
    /// Reference solutions of the last iteration (the most accurate solutions of the run)
    pub ref_solutions: Vec<Solution>,
    pub estimate: ErrorEstimate,
    pub history: ConvergenceHistory,
}

impl AdaptOutcome {
    pub fn final_error_percent(&self) -> f64 {
        self.estimate.total_percent()
    }
}

/// Everything produced by one iteration, as seen by an [AdaptObserver]
pub struct IterationView<'a> {
    pub iteration: usize,
    pub spaces: &'a [Space],
    pub coarse_solutions: &'a [Solution],
    pub ref_spaces: &'a [Space],
    pub ref_solutions: &'a [Solution],
    pub estimate: &'a ErrorEstimate,
}

/// Receives the results of every completed iteration (before the working spaces are refined)
///
/// Time spent in observers is not counted in the convergence history.
pub trait AdaptObserver {
    fn iteration_complete(&mut self, view: &IterationView);
}

/// The hp-adaptivity loop: solve on a reference space, project, estimate, refine, repeat
pub struct AdaptivityLoop<S, P = OrthogonalProjection, E = ReferenceEstimator> {
    config: AdaptConfig,
    adapt: Adapt,
    spaces: Vec<Space>,
    solver: S,
    projector: P,
    estimator: E,
    log: Option<ConvergenceLog>,
    observers: Vec<Box<dyn AdaptObserver>>,
    history: ConvergenceHistory,
    state: AdaptState,
    iteration: usize,
}

impl<S: DiscreteSolver> AdaptivityLoop<S> {
    /// Set up a run on the given working spaces (one per field)
    ///
    /// The configuration is validated against the spaces before anything else happens.
    pub fn new(config: AdaptConfig, spaces: Vec<Space>, solver: S) -> Result<Self, AdaptError> {
        config.validate(&spaces)?;

        Ok(Self {
            adapt: config.adapt(),
            projector: config.projector(),
            estimator: config.estimator(),
            config,
            spaces,
            solver,
            log: None,
            observers: Vec::new(),
            history: ConvergenceHistory::new(),
            state: AdaptState::Start,
            iteration: 0,
        })
    }
}

impl<S, P, E> AdaptivityLoop<S, P, E>
where
    S: DiscreteSolver,
    P: Projector,
    E: Estimator,
{
    pub fn with_projector<Q: Projector>(self, projector: Q) -> AdaptivityLoop<S, Q, E> {
        AdaptivityLoop {
            config: self.config,
            adapt: self.adapt,
            spaces: self.spaces,
            solver: self.solver,
            projector,
            estimator: self.estimator,
            log: self.log,
            observers: self.observers,
            history: self.history,
            state: self.state,
            iteration: self.iteration,
        }
    }

    pub fn with_estimator<F: Estimator>(self, estimator: F) -> AdaptivityLoop<S, P, F> {
        AdaptivityLoop {
            config: self.config,
            adapt: self.adapt,
            spaces: self.spaces,
            solver: self.solver,
            projector: self.projector,
            estimator,
            log: self.log,
            observers: self.observers,
            history: self.history,
            state: self.state,
            iteration: self.iteration,
        }
    }

    /// Append a row to `log` after every completed iteration
    pub fn with_convergence_log(mut self, log: ConvergenceLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn add_observer(&mut self, observer: impl AdaptObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn config(&self) -> &AdaptConfig {
        &self.config
    }

    pub fn spaces(&self) -> &[Space] {
        &self.spaces
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn history(&self) -> &ConvergenceHistory {
        &self.history
    }

    pub fn state(&self) -> AdaptState {
        self.state
    }

    /// Number of started iterations
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    fn enter(&mut self, state: AdaptState) {
        debug!("Adaptivity step {}: {:?} -> {:?}", self.iteration, self.state, state);
        self.state = state;
    }

    /// Iterate until one of the stopping criteria is met
    ///
    /// Solver, projection, estimation and refinement failures end the run immediately. The working spaces are
    /// left as they were after the last successful iteration.
    pub fn run(&mut self) -> Result<AdaptOutcome, AdaptError> {
        let mut clock = CpuClock::start();
        info!("ndof = {}", total_dofs(&self.spaces));

        loop {
            self.iteration += 1;
            let step = self.iteration;
            info!("---- Adaptivity step {}:", step);

            self.enter(AdaptState::BuildReference);
            let ref_spaces = construct_refined_spaces(&self.spaces, self.config.order_increase)
                .map_err(|source| AdaptError::ReferenceFailure { step, source })?;

            self.enter(AdaptState::Solve);
            info!("Solving on reference mesh (ndof = {}).", total_dofs(&ref_spaces));
            let coeffs = self
                .solver
                .solve(&ref_spaces)
                .map_err(|source| AdaptError::FatalSolverFailure { step, source })?;
            let ref_solutions = vector_to_solutions(&ref_spaces, &coeffs).map_err(|err| AdaptError::FatalSolverFailure {
                step,
                source: malformed_solution(err),
            })?;
            clock.tick();

            self.enter(AdaptState::Project);
            info!("Projecting reference solution on coarse mesh.");
            let coarse_solutions = self
                .projector
                .project(&self.spaces, &ref_spaces, &ref_solutions)
                .map_err(|source| AdaptError::ProjectionFailure { step, source })?;

            self.enter(AdaptState::Estimate);
            info!("Calculating error estimate.");
            let estimate = self
                .estimator
                .estimate(&self.spaces, &coarse_solutions, &ref_spaces, &ref_solutions)
                .map_err(|source| AdaptError::EstimationFailure { step, source })?;
            clock.tick();

            for (field, rel) in estimate.component_percents().iter().enumerate() {
                info!(
                    "ndof_coarse[{}]: {}, ndof_fine[{}]: {}, err_est_rel[{}]: {}%",
                    field,
                    self.spaces[field].num_dofs(),
                    field,
                    ref_spaces[field].num_dofs(),
                    field,
                    rel
                );
            }

            let record = IterationRecord {
                iteration: step,
                ndof_coarse: total_dofs(&self.spaces),
                ndof_reference: total_dofs(&ref_spaces),
                error_percent: estimate.total_percent(),
                cpu_seconds: clock.seconds(),
            };
            info!(
                "ndof_coarse_total: {}, ndof_fine_total: {}, err_est_rel_total: {}%",
                record.ndof_coarse, record.ndof_reference, record.error_percent
            );

            self.history.push(record);
            if let Some(log) = &self.log {
                if let Err(err) = log.append(&record) {
                    warn!("Unable to write to the convergence log: {}", err);
                }
            }

            let view = IterationView {
                iteration: step,
                spaces: &self.spaces,
                coarse_solutions: &coarse_solutions,
                ref_spaces: &ref_spaces,
                ref_solutions: &ref_solutions,
                estimate: &estimate,
            };
            for observer in self.observers.iter_mut() {
                observer.iteration_complete(&view);
            }
            clock.skip();

            self.enter(AdaptState::CheckStop);
            let stop_reason = if record.error_percent < self.config.err_stop {
                Some(StopReason::Converged)
            } else {
                self.enter(AdaptState::MarkAndRefine);
                info!("Adapting coarse mesh.");
                let report = self
                    .adapt
                    .adapt(&mut self.spaces, &ref_spaces, &ref_solutions, &estimate)
                    .map_err(|source| AdaptError::RefinementFailure { step, source })?;
                clock.tick();

                self.enter(AdaptState::CheckStop);
                stop_after_refinement(&self.config, report.num_refined, total_dofs(&self.spaces), step)
            };

            if let Some(stop_reason) = stop_reason {
                self.enter(AdaptState::Done);
                info!(
                    "Adaptivity finished after {} steps ({:?}): ndof = {}, err_est_rel_total = {}%",
                    step,
                    stop_reason,
                    total_dofs(&self.spaces),
                    record.error_percent
                );

                return Ok(AdaptOutcome {
                    stop_reason,
                    iterations: step,
                    spaces: self.spaces.clone(),
                    coarse_solutions,
                    ref_spaces,
                    ref_solutions,
                    estimate,
                    history: self.history.clone(),
                });
            }
        }
    }
}

/// Total DOFs of several fields
pub fn total_dofs(spaces: &[Space]) -> usize {
    spaces.iter().map(|space| space.num_dofs()).sum()
}

fn stop_after_refinement(config: &AdaptConfig, num_refined: usize, ndof: usize, step: usize) -> Option<StopReason> {
    if ndof >= config.ndof_stop {
        Some(StopReason::DofCeiling)
    } else if num_refined == 0 {
        Some(StopReason::NoRefinement)
    } else if config.max_iterations.map_or(false, |max| step >= max) {
        Some(StopReason::IterationLimit)
    } else {
        None
    }
}

fn malformed_solution(err: SolutionError) -> SolverError {
    match err {
        SolutionError::LengthMismatch { expected, found } => SolverError::DimensionMismatch { expected, found },
        other => SolverError::Singular {
            reason: other.to_string(),
        },
    }
}
