use hp_adapt_2d::adapt::estimator::{ComponentError, EstimateError};
use hp_adapt_2d::*;

use approx::assert_relative_eq;
use std::collections::BTreeMap;
use std::fs::read_to_string;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Reports a predetermined sequence of relative errors (%), one per call
///
/// The error is either put entirely on the first active Elem of each field, or spread evenly over all of them.
struct ScriptedEstimator {
    errors_percent: Vec<f64>,
    spread: bool,
    calls: AtomicUsize,
}

impl ScriptedEstimator {
    fn concentrated(errors_percent: &[f64]) -> Self {
        Self {
            errors_percent: errors_percent.to_vec(),
            spread: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn spread(errors_percent: &[f64]) -> Self {
        Self {
            spread: true,
            ..Self::concentrated(errors_percent)
        }
    }
}

impl Estimator for ScriptedEstimator {
    fn estimate(
        &self,
        coarse_spaces: &[Space],
        _: &[Solution],
        _: &[Space],
        _: &[Solution],
    ) -> Result<ErrorEstimate, EstimateError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let rel = self.errors_percent[call.min(self.errors_percent.len() - 1)] / 100.0;

        let components = coarse_spaces
            .iter()
            .map(|space| {
                let elem_ids = space.mesh().active_elem_ids();
                let elem_errors: BTreeMap<usize, f64> = elem_ids
                    .iter()
                    .enumerate()
                    .map(|(idx, elem_id)| {
                        let err = if self.spread {
                            rel * rel / elem_ids.len() as f64
                        } else if idx == 0 {
                            rel * rel
                        } else {
                            0.0
                        };
                        (*elem_id, err)
                    })
                    .collect();
                ComponentError::new(elem_errors, 1.0)
            })
            .collect();

        Ok(ErrorEstimate::new(components, ErrorCombination::Euclidean))
    }
}

/// Fails on one call, otherwise defers to an [ExactSolutionSolver]
struct FailingSolver {
    inner: ExactSolutionSolver,
    fail_on: usize,
    calls: usize,
}

impl DiscreteSolver for FailingSolver {
    fn solve(&mut self, spaces: &[Space]) -> Result<Vec<f64>, SolverError> {
        self.calls += 1;
        if self.calls == self.fail_on {
            Err(SolverError::NotConverged { iterations: 500 })
        } else {
            self.inner.solve(spaces)
        }
    }
}

fn smooth(x: f64, y: f64) -> f64 {
    (1.3 * x + 0.4).sin() * (0.6 * y).exp()
}

/// 9 x 4 grid of first order Elems (50 DOFs)
fn grid_spaces() -> Vec<Space> {
    let mesh = Mesh::rectangle(Point::new(0.0, 0.0), [9.0, 4.0], [9, 4]).unwrap();
    vec![Space::new(mesh, PolyOrders::iso(1), EssentialBCs::new()).unwrap()]
}

fn grid_config() -> AdaptConfig {
    AdaptConfig {
        initial_orders: vec![1],
        strategy: MarkingStrategy::CumulativeFraction,
        threshold: 0.2,
        err_stop: 1.0,
        ..Default::default()
    }
}

fn assert_dofs_are_monotone(history: &ConvergenceHistory) {
    for pair in history.records().windows(2) {
        assert!(pair[1].ndof_coarse >= pair[0].ndof_coarse);
    }
    for record in history.iter() {
        assert!(record.ndof_reference >= record.ndof_coarse);
    }
}

#[test]
fn converges_after_five_iterations() {
    let dir = tempfile::tempdir().unwrap();
    let spaces = grid_spaces();
    assert_eq!(spaces[0].num_dofs(), 50);

    let mut adaptivity = AdaptivityLoop::new(grid_config(), spaces, ExactSolutionSolver::new().with_field(smooth))
        .unwrap()
        .with_estimator(ScriptedEstimator::concentrated(&[50.0, 18.0, 6.0, 1.8, 0.6]))
        .with_convergence_log(ConvergenceLog::create(dir.path()).unwrap());

    let outcome = adaptivity.run().unwrap();

    assert_eq!(outcome.stop_reason, StopReason::Converged);
    assert_eq!(outcome.iterations, 5);
    assert_relative_eq!(outcome.final_error_percent(), 0.6, epsilon = 1e-9);

    let errors: Vec<f64> = outcome.history.iter().map(|r| r.error_percent).collect();
    for (found, expected) in errors.iter().zip([50.0, 18.0, 6.0, 1.8, 0.6]) {
        assert_relative_eq!(*found, expected, epsilon = 1e-9);
    }
    assert_eq!(outcome.history.records()[0].ndof_coarse, 50);
    assert_dofs_are_monotone(&outcome.history);

    // four refinement passes, each of which raised the DOF count
    assert!(outcome.history.records()[4].ndof_coarse > 50);
    assert_eq!(outcome.spaces[0].num_dofs(), outcome.history.records()[4].ndof_coarse);

    let graph = read_to_string(dir.path().join("conv_dof_est.dat")).unwrap();
    assert_eq!(graph.lines().count(), 5);
    assert!(graph.starts_with("50 50\n"));
    assert_eq!(read_to_string(dir.path().join("conv_cpu_est.dat")).unwrap().lines().count(), 5);
}

#[test]
fn stops_at_the_dof_ceiling() {
    let config = AdaptConfig {
        threshold: 0.3,
        ndof_stop: 1000,
        max_iterations: Some(40),
        ..grid_config()
    };

    let mut adaptivity = AdaptivityLoop::new(config, grid_spaces(), ExactSolutionSolver::new().with_field(smooth))
        .unwrap()
        .with_estimator(ScriptedEstimator::spread(&[5.0]));

    let outcome = adaptivity.run().unwrap();

    assert_eq!(outcome.stop_reason, StopReason::DofCeiling);
    assert!(outcome.spaces[0].num_dofs() >= 1000);
    assert!(outcome.history.last().unwrap().ndof_coarse < 1000);
    assert_relative_eq!(outcome.final_error_percent(), 5.0, epsilon = 1e-9);
    assert_dofs_are_monotone(&outcome.history);
}

#[test]
fn solver_failure_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let solver = FailingSolver {
        inner: ExactSolutionSolver::new().with_field(smooth),
        fail_on: 2,
        calls: 0,
    };

    let mut adaptivity = AdaptivityLoop::new(grid_config(), grid_spaces(), solver)
        .unwrap()
        .with_estimator(ScriptedEstimator::concentrated(&[50.0, 18.0, 6.0, 1.8, 0.6]))
        .with_convergence_log(ConvergenceLog::create(dir.path()).unwrap());

    let err = adaptivity.run().unwrap_err();

    assert!(matches!(
        err,
        AdaptError::FatalSolverFailure {
            step: 2,
            source: SolverError::NotConverged { iterations: 500 }
        }
    ));
    assert_eq!(err.step(), Some(2));
    assert_eq!(adaptivity.history().len(), 1);
    assert_eq!(adaptivity.state(), AdaptState::Solve);
    assert_eq!(adaptivity.solver().calls, 2);

    // only the first iteration made it into the log
    let graph = read_to_string(dir.path().join("conv_dof_est.dat")).unwrap();
    assert_eq!(graph, "50 50\n");
}

#[test]
fn no_improving_candidate_ends_the_run() {
    // bilinear fields are represented exactly by first order Elems
    let mut adaptivity = AdaptivityLoop::new(
        grid_config(),
        grid_spaces(),
        ExactSolutionSolver::new().with_field(|x, y| 0.5 * x * y - y + 2.0),
    )
    .unwrap()
    .with_estimator(ScriptedEstimator::concentrated(&[5.0]));

    let snapshot = adaptivity.spaces()[0].snapshot();
    let outcome = adaptivity.run().unwrap();

    assert_eq!(outcome.stop_reason, StopReason::NoRefinement);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.spaces[0].snapshot(), snapshot);
}

#[test]
fn single_mesh_run_with_two_fields() {
    let mesh = Mesh::rectangle(Point::new(0.0, 0.0), [2.0, 1.0], [2, 1]).unwrap();
    let config = AdaptConfig {
        initial_orders: vec![1, 1],
        multimesh: false,
        threshold: 0.7,
        err_stop: 1.0,
        max_iterations: Some(30),
        ..Default::default()
    };
    let spaces = config
        .initial_spaces(&mesh, vec![EssentialBCs::new(), EssentialBCs::new()])
        .unwrap();
    let solver = ExactSolutionSolver::new()
        .with_field(|x, y| x.sin() * y.cosh())
        .with_field(|x, y| 0.5 * (x + y).exp());

    let mut adaptivity = AdaptivityLoop::new(config, spaces, solver).unwrap();
    let outcome = adaptivity.run().unwrap();

    assert_eq!(outcome.stop_reason, StopReason::Converged);
    assert!(outcome.final_error_percent() < 1.0);
    assert!(outcome.spaces[0].mesh().same_structure(outcome.spaces[1].mesh()));
    assert_dofs_are_monotone(&outcome.history);

    for (space, solution) in outcome.ref_spaces.iter().zip(outcome.ref_solutions.iter()) {
        assert!(solution.check_space(space).is_ok());
    }
}

#[test]
fn l_shape_from_files() {
    let mesh = Mesh::from_file("./test_input/l_shape.json").unwrap();
    let config = AdaptConfig::from_file("./test_input/adapt.toml").unwrap();
    assert_eq!(config.max_iterations, Some(2));

    let spaces = config
        .initial_spaces(&mesh, vec![EssentialBCs::new().with("Bdy_outer", 0.0)])
        .unwrap();
    let solver = ExactSolutionSolver::new().with_field(|x, y| (3.0 * x).sin() * (2.0 * y).cos());

    let mut adaptivity = AdaptivityLoop::new(config, spaces, solver).unwrap();
    let outcome = adaptivity.run().unwrap();

    assert_eq!(outcome.stop_reason, StopReason::IterationLimit);
    assert_eq!(outcome.history.len(), 2);
    assert!(outcome.history.records()[1].ndof_coarse > outcome.history.records()[0].ndof_coarse);
}
