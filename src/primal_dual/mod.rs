//! Unrolled primal-dual refinement of encoder hidden states.
//!
//! Each iteration runs, in order: dual ascent on `L(x_tilde)`, projection of
//! the dual onto the L-inf ball, primal descent from the encoder output using
//! `L^T y`, the quadratic fidelity prox, and over-relaxed extrapolation.

pub mod linear_operator;
pub mod proximal;
pub mod solver;
pub mod updates;

pub use linear_operator::{FiniteDifferenceOperator, LinearOperator, DUAL_CHANNELS};
pub use proximal::{project_linf_ball, QuadraticProx};
pub use solver::{
    FidelityInit, IterationStats, PrimalDualSolver, SolverConfig, SolverInit, SolverOutput,
    SolverParameters,
};
pub use updates::{clamp_theta, dual_step, extrapolate, primal_step, THETA_MAX, THETA_MIN};
