use ndarray::{Array1, Array2, Array3, Array4};
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};

use crate::error::{expect_shape, PredictError, Result};
use crate::primal_dual::linear_operator::{FiniteDifferenceOperator, LinearOperator};
use crate::primal_dual::proximal::{project_linf_ball, QuadraticProx};
use crate::primal_dual::updates::{clamp_theta, dual_step, extrapolate, primal_step};

/// Learnable values shared by every iteration of the unrolled loop.
///
/// A forward pass only ever borrows this bundle; training code updates it
/// between calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverParameters {
    pub lambda: f64,
    pub sigma: f64,
    pub tau: f64,
    pub theta: f64,
    pub h: Array2<f64>,
    pub b: Array1<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FidelityInit {
    Identity,
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverInit {
    pub lambda_rof: f64,
    pub sigma: f64,
    pub tau: f64,
    pub theta: f64,
    pub fidelity: FidelityInit,
}

impl Default for SolverInit {
    fn default() -> Self {
        Self {
            lambda_rof: 5.0,
            sigma: 0.5,
            tau: 0.1,
            theta: 0.9,
            fidelity: FidelityInit::Identity,
        }
    }
}

impl SolverParameters {
    pub fn new(
        h: Array2<f64>,
        b: Array1<f64>,
        lambda: f64,
        sigma: f64,
        tau: f64,
        theta: f64,
    ) -> Result<Self> {
        expect_shape("solver_parameters", &[h.nrows()], b.shape())?;
        if h.ncols() == 0 {
            return Err(PredictError::InvalidParameter(
                "fidelity operator must have at least one column".to_string(),
            ));
        }
        Ok(Self {
            lambda,
            sigma,
            tau,
            theta,
            h,
            b,
        })
    }

    pub fn identity(hidden_size: usize, init: &SolverInit) -> Result<Self> {
        Self::new(
            Array2::eye(hidden_size),
            Array1::zeros(hidden_size),
            init.lambda_rof,
            init.sigma,
            init.tau,
            init.theta,
        )
    }

    pub fn random<R: Rng + ?Sized>(hidden_size: usize, init: &SolverInit, rng: &mut R) -> Result<Self> {
        if hidden_size == 0 {
            return Err(PredictError::InvalidParameter(
                "hidden_size must be > 0".to_string(),
            ));
        }
        let k = 1.0 / (hidden_size as f64).sqrt();
        let dist = Uniform::new_inclusive(-k, k);
        let h = Array2::from_shape_fn((hidden_size, hidden_size), |_| dist.sample(rng));
        let b = Array1::from_shape_fn(hidden_size, |_| dist.sample(rng));
        Self::new(h, b, init.lambda_rof, init.sigma, init.tau, init.theta)
    }

    pub fn from_init<R: Rng + ?Sized>(hidden_size: usize, init: &SolverInit, rng: &mut R) -> Result<Self> {
        match init.fidelity {
            FidelityInit::Identity => Self::identity(hidden_size, init),
            FidelityInit::Random => Self::random(hidden_size, init, rng),
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.h.ncols()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    pub max_it: usize,
    pub dual_radius: f64,
    #[serde(default)]
    pub diagnostics: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_it: 20,
            dual_radius: 1.0,
            diagnostics: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IterationStats {
    pub iteration: usize,
    pub primal_change: f64,
    pub dual_norm: f64,
    pub max_abs: f64,
    pub finite: bool,
}

#[derive(Debug, Clone)]
pub struct SolverOutput {
    pub x_tilde: Array3<f64>,
    pub iterations: usize,
    pub effective_theta: f64,
    pub stats: Vec<IterationStats>,
}

#[derive(Debug, Clone)]
pub struct PrimalDualSolver<L = FiniteDifferenceOperator> {
    cfg: SolverConfig,
    op: L,
}

impl PrimalDualSolver<FiniteDifferenceOperator> {
    pub fn new(cfg: SolverConfig) -> Result<Self> {
        Self::with_operator(cfg, FiniteDifferenceOperator)
    }
}

impl<L: LinearOperator> PrimalDualSolver<L> {
    pub fn with_operator(cfg: SolverConfig, op: L) -> Result<Self> {
        if cfg.max_it == 0 {
            return Err(PredictError::InvalidParameter(
                "max_it must be > 0".to_string(),
            ));
        }
        if !cfg.dual_radius.is_finite() || cfg.dual_radius < 0.0 {
            return Err(PredictError::InvalidParameter(format!(
                "dual_radius must be finite and >= 0, got {}",
                cfg.dual_radius
            )));
        }
        Ok(Self { cfg, op })
    }

    pub fn config(&self) -> &SolverConfig {
        &self.cfg
    }

    /// Refine batch-major encoder states `(batch, time, hidden)`.
    ///
    /// Always runs exactly `max_it` iterations; the returned `x_tilde` is the
    /// extrapolated point after the last one.
    pub fn solve(&self, encoded: &Array3<f64>, params: &SolverParameters) -> Result<SolverOutput> {
        let (batch, steps, hidden) = encoded.dim();
        expect_shape(
            "primal_dual_solve",
            &[batch, steps, params.hidden_size()],
            encoded.shape(),
        )?;

        let theta = clamp_theta(params.theta);
        self.log_parameter_ranges(params, theta);
        let prox = QuadraticProx::new(&params.h, &params.b, params.tau)?;

        let mut x = encoded.clone();
        let mut x_tilde = encoded.clone();
        let mut y = Array4::<f64>::ones(self.op.dual_dim((batch, steps, hidden)));
        let mut stats = Vec::new();
        let mut reported_non_finite = false;

        for it in 0..self.cfg.max_it {
            let lx = self.op.apply(&x_tilde)?;
            let y_raw = dual_step(&y, &lx, params.sigma)?;
            y = project_linf_ball(&y_raw, self.cfg.dual_radius)?;

            let x_old = x;
            let adjoint_y = self.op.adjoint(&y, (batch, steps, hidden))?;
            let x_raw = primal_step(encoded, &adjoint_y, params.tau)?;
            x = prox.apply(&x_raw)?;
            x_tilde = extrapolate(&x, &x_tilde, &x_old, theta)?;

            if self.cfg.diagnostics {
                let s = iteration_stats(it, &x, &x_old, &x_tilde, &y);
                tracing::trace!(
                    iteration = it,
                    primal_change = s.primal_change,
                    dual_norm = s.dual_norm,
                    max_abs = s.max_abs,
                    "primal-dual iteration"
                );
                if !s.finite && !reported_non_finite {
                    tracing::warn!(iteration = it, "non-finite values in primal-dual iterate");
                    reported_non_finite = true;
                }
                stats.push(s);
            }
        }

        Ok(SolverOutput {
            x_tilde,
            iterations: self.cfg.max_it,
            effective_theta: theta,
            stats,
        })
    }

    fn log_parameter_ranges(&self, params: &SolverParameters, theta: f64) {
        if theta != params.theta {
            tracing::debug!(stored = params.theta, effective = theta, "theta clamped for this call");
        }
        if params.sigma <= 0.0 || params.tau <= 0.0 || params.lambda <= 0.0 {
            tracing::debug!(
                sigma = params.sigma,
                tau = params.tau,
                lambda = params.lambda,
                "non-positive step or fidelity weight"
            );
        }
        let step_product = params.sigma * params.tau * self.op.norm_sq_bound();
        if step_product >= 1.0 {
            tracing::debug!(step_product, "sigma * tau * ||L||^2 >= 1");
        }
    }
}

fn iteration_stats(
    iteration: usize,
    x: &Array3<f64>,
    x_old: &Array3<f64>,
    x_tilde: &Array3<f64>,
    y: &Array4<f64>,
) -> IterationStats {
    let primal_change = (x - x_old).mapv(|v| v * v).sum().sqrt();
    let dual_norm = y.mapv(|v| v * v).sum().sqrt();
    let max_abs = x_tilde.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let finite = x_tilde.iter().all(|v| v.is_finite()) && y.iter().all(|v| v.is_finite());
    IterationStats {
        iteration,
        primal_change,
        dual_norm,
        max_abs,
        finite,
    }
}
