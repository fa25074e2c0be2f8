use ndarray::{Array3, Array4, Zip};

use crate::error::{expect_shape, Result};

pub const THETA_MIN: f64 = 0.0;
pub const THETA_MAX: f64 = 5.0;

pub fn clamp_theta(theta: f64) -> f64 {
    theta.clamp(THETA_MIN, THETA_MAX)
}

/// Dual ascent: `y_prev + sigma * L(x_tilde)`. Unconstrained; the caller
/// projects the result.
pub fn dual_step(y_prev: &Array4<f64>, lx_tilde: &Array4<f64>, sigma: f64) -> Result<Array4<f64>> {
    expect_shape("dual_step", y_prev.shape(), lx_tilde.shape())?;
    Ok(Zip::from(y_prev)
        .and(lx_tilde)
        .map_collect(|&y, &lx| y + sigma * lx))
}

/// Primal descent from the fidelity anchor: `anchor - tau * L^T y`.
pub fn primal_step(anchor: &Array3<f64>, adjoint_y: &Array3<f64>, tau: f64) -> Result<Array3<f64>> {
    expect_shape("primal_step", anchor.shape(), adjoint_y.shape())?;
    Ok(Zip::from(anchor)
        .and(adjoint_y)
        .map_collect(|&a, &ly| a - tau * ly))
}

/// Over-relaxation `x_new + theta * (x_new - x_old)`.
///
/// `x_tilde_prev` does not enter the formula; it is only checked so a drifted
/// extrapolation point is caught at the step that produced it.
pub fn extrapolate(
    x_new: &Array3<f64>,
    x_tilde_prev: &Array3<f64>,
    x_old: &Array3<f64>,
    theta: f64,
) -> Result<Array3<f64>> {
    expect_shape("extrapolate", x_new.shape(), x_old.shape())?;
    expect_shape("extrapolate", x_new.shape(), x_tilde_prev.shape())?;
    Ok(Zip::from(x_new)
        .and(x_old)
        .map_collect(|&new, &old| new + theta * (new - old)))
}
