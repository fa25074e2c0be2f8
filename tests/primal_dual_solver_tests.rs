use ndarray::{Array1, Array2, Array3, Array4};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Uniform};

use pd_forecast::primal_dual::{
    clamp_theta, dual_step, extrapolate, primal_step, project_linf_ball, FiniteDifferenceOperator,
    LinearOperator, PrimalDualSolver, QuadraticProx, SolverConfig, SolverInit, SolverParameters,
};
use pd_forecast::PredictError;

fn encoded(dim: (usize, usize, usize), seed: u64) -> Array3<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let dist = Uniform::new(-1.0, 1.0);
    Array3::from_shape_fn(dim, |_| dist.sample(&mut rng))
}

fn random_params(hidden: usize, seed: u64) -> SolverParameters {
    let mut rng = StdRng::seed_from_u64(seed);
    SolverParameters::random(hidden, &SolverInit::default(), &mut rng).unwrap()
}

fn solver(max_it: usize) -> PrimalDualSolver {
    PrimalDualSolver::new(SolverConfig {
        max_it,
        dual_radius: 1.0,
        diagnostics: true,
    })
    .unwrap()
}

#[test]
/// Replays the loop by hand to pin the step order: dual step, projection,
/// adjoint, primal step from the encoder output, prox, extrapolation.
fn solve_matches_hand_unrolled_iterations() {
    let enc = encoded((2, 6, 4), 1);
    let params = random_params(4, 2);
    let out = solver(3).solve(&enc, &params).unwrap();

    let op = FiniteDifferenceOperator;
    let theta = clamp_theta(params.theta);
    let prox = QuadraticProx::new(&params.h, &params.b, params.tau).unwrap();
    let mut x = enc.clone();
    let mut x_tilde = enc.clone();
    let mut y = Array4::<f64>::ones(op.dual_dim(enc.dim()));
    for _ in 0..3 {
        let lx = op.apply(&x_tilde).unwrap();
        y = project_linf_ball(&dual_step(&y, &lx, params.sigma).unwrap(), 1.0).unwrap();
        let x_old = x.clone();
        let lty = op.adjoint(&y, enc.dim()).unwrap();
        x = prox.apply(&primal_step(&enc, &lty, params.tau).unwrap()).unwrap();
        x_tilde = extrapolate(&x, &x_tilde, &x_old, theta).unwrap();
    }

    assert_eq!(out.x_tilde, x_tilde);
}

#[test]
fn solve_runs_exactly_max_it_iterations() {
    let enc = encoded((2, 5, 3), 3);
    let params = random_params(3, 4);
    for max_it in [1, 2, 5, 20] {
        let out = solver(max_it).solve(&enc, &params).unwrap();
        assert_eq!(out.iterations, max_it);
        assert_eq!(out.stats.len(), max_it);
        let order: Vec<usize> = out.stats.iter().map(|s| s.iteration).collect();
        assert_eq!(order, (0..max_it).collect::<Vec<_>>());
    }
}

#[test]
fn iteration_count_does_not_depend_on_input_magnitude() {
    let params = random_params(3, 5);
    let s = solver(7);
    for scale in [0.0, 1e-9, 1.0, 1e6] {
        let enc = encoded((1, 4, 3), 6) * scale;
        let out = s.solve(&enc, &params).unwrap();
        assert_eq!(out.iterations, 7);
        assert_eq!(out.stats.len(), 7);
    }
}

#[test]
fn solve_preserves_primal_shape() {
    let enc = encoded((4, 10, 64), 7);
    let params = random_params(64, 8);
    let out = solver(20).solve(&enc, &params).unwrap();
    assert_eq!(out.x_tilde.dim(), (4, 10, 64));
    assert!(out.stats.iter().all(|s| s.finite));
}

#[test]
fn solve_is_deterministic() {
    let enc = encoded((3, 8, 5), 9);
    let params = random_params(5, 10);
    let s = solver(20);
    let a = s.solve(&enc, &params).unwrap();
    let b = s.solve(&enc, &params).unwrap();
    assert_eq!(a.x_tilde, b.x_tilde);
}

#[test]
fn theta_is_clamped_once_per_call_and_not_written_back() {
    let enc = encoded((2, 6, 4), 11);
    let s = solver(10);

    let mut high = random_params(4, 12);
    high.theta = 7.5;
    let mut at_bound = high.clone();
    at_bound.theta = 5.0;

    let clamped = s.solve(&enc, &high).unwrap();
    let reference = s.solve(&enc, &at_bound).unwrap();
    assert_eq!(clamped.effective_theta, 5.0);
    assert_eq!(clamped.x_tilde, reference.x_tilde);
    assert_eq!(high.theta, 7.5);

    let mut low = high.clone();
    low.theta = -2.0;
    let mut zero = high.clone();
    zero.theta = 0.0;
    let clamped = s.solve(&enc, &low).unwrap();
    assert_eq!(clamped.effective_theta, 0.0);
    assert_eq!(clamped.x_tilde, s.solve(&enc, &zero).unwrap().x_tilde);
}

#[test]
fn dual_iterate_stays_in_unit_ball() {
    let enc = encoded((2, 6, 4), 13) * 50.0;
    let params = random_params(4, 14);
    let out = solver(5).solve(&enc, &params).unwrap();
    let dual_entries = (2 * 2 * 6 * 4) as f64;
    for s in &out.stats {
        assert!(s.dual_norm <= dual_entries.sqrt() + 1e-12);
    }
}

#[test]
fn singular_fidelity_system_propagates_non_finite_values() {
    let enc = encoded((1, 4, 3), 15);
    // I + tau * I with tau = -1 is the zero matrix
    let params =
        SolverParameters::new(Array2::eye(3), Array1::zeros(3), 5.0, 0.5, -1.0, 0.9).unwrap();
    let out = solver(3).solve(&enc, &params).unwrap();
    assert!(out.x_tilde.iter().any(|v| !v.is_finite()));
    assert!(!out.stats[0].finite);
}

#[test]
fn solve_rejects_hidden_width_mismatch() {
    let enc = encoded((2, 5, 6), 16);
    let params = random_params(4, 17);
    let err = solver(2).solve(&enc, &params).unwrap_err();
    assert!(matches!(err, PredictError::ShapeMismatch { .. }));
}

#[test]
fn solver_rejects_zero_iterations() {
    let cfg = SolverConfig {
        max_it: 0,
        ..SolverConfig::default()
    };
    assert!(PrimalDualSolver::new(cfg).is_err());
}

#[test]
fn parameters_reject_mismatched_offset() {
    let err = SolverParameters::new(Array2::eye(3), Array1::zeros(2), 1.0, 0.5, 0.1, 0.9);
    assert!(err.is_err());
}
