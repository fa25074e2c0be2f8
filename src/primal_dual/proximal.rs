use nalgebra::linalg::{Cholesky, LU};
use nalgebra::{DMatrix, Dyn};
use ndarray::{Array, Array1, Array2, Array3, Dimension};

use crate::error::{expect_shape, PredictError, Result};

/// Projection onto the L-infinity ball of the given radius (element-wise clamp).
pub fn project_linf_ball<D: Dimension>(y: &Array<f64, D>, radius: f64) -> Result<Array<f64, D>> {
    if !radius.is_finite() || radius < 0.0 {
        return Err(PredictError::InvalidParameter(format!(
            "L-inf ball radius must be finite and >= 0, got {radius}"
        )));
    }
    Ok(y.mapv(|v| v.clamp(-radius, radius)))
}

/// Proximal operator of `1/2 ||H x - b||^2` with step `tau`, applied to every
/// (batch, time) row of a primal array.
///
/// Solves `(I + tau H^T H) x' = x + tau H^T b`. The system matrix only
/// depends on `H` and `tau`, so it is factored once and reused by every
/// iteration of a forward pass.
#[derive(Debug, Clone)]
pub struct QuadraticProx {
    factor: SystemFactor,
    offset: Array1<f64>,
    width: usize,
    tau: f64,
}

// Cholesky when tau >= 0 (the system is then positive definite), LU otherwise.
#[derive(Debug, Clone)]
enum SystemFactor {
    Cholesky(Cholesky<f64, Dyn>),
    Lu(LU<f64, Dyn, Dyn>),
}

impl QuadraticProx {
    pub fn new(h: &Array2<f64>, b: &Array1<f64>, tau: f64) -> Result<Self> {
        expect_shape("quadratic_prox_offset", &[h.nrows()], b.shape())?;
        let n = h.ncols();
        let h_mat = DMatrix::from_fn(h.nrows(), n, |i, j| h[[i, j]]);
        let system = DMatrix::<f64>::identity(n, n) + h_mat.transpose() * &h_mat * tau;
        let chol = if tau >= 0.0 {
            Cholesky::new(system.clone())
        } else {
            None
        };
        let factor = match chol {
            Some(chol) => SystemFactor::Cholesky(chol),
            None => {
                tracing::debug!(tau, "quadratic prox system is not positive definite, using LU");
                let lu = system.lu();
                if !lu.is_invertible() {
                    tracing::warn!(tau, "quadratic prox system is singular");
                }
                SystemFactor::Lu(lu)
            }
        };
        let offset = h.t().dot(b) * tau;
        Ok(Self {
            factor,
            offset,
            width: n,
            tau,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn apply(&self, x: &Array3<f64>) -> Result<Array3<f64>> {
        let (b, t, h) = x.dim();
        expect_shape("quadratic_prox", &[b, t, self.width], x.shape())?;
        if self.tau == 0.0 {
            return Ok(x.clone());
        }
        let rows = x.to_shape((b * t, h))?;
        let shifted = &rows + &self.offset;
        // column r of the right-hand side is row r of `shifted`
        let rhs = DMatrix::from_iterator(h, b * t, shifted.iter().copied());
        let solved = match &self.factor {
            SystemFactor::Cholesky(chol) => chol.solve(&rhs),
            SystemFactor::Lu(lu) => match lu.solve(&rhs) {
                Some(sol) => sol,
                None => DMatrix::from_element(h, b * t, f64::NAN),
            },
        };
        Ok(Array3::from_shape_vec((b, t, h), solved.iter().copied().collect())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn indefinite_system_falls_back_to_lu() {
        // I + tau * I with tau = -2 is -I
        let h = Array2::<f64>::eye(2);
        let b = array![1.0, -1.0];
        let prox = QuadraticProx::new(&h, &b, -2.0).unwrap();
        assert!(matches!(prox.factor, SystemFactor::Lu(_)));
        let x = Array3::from_shape_vec((1, 1, 2), vec![3.0, 0.5]).unwrap();
        let out = prox.apply(&x).unwrap();
        // x' = -(x - 2 b)
        assert!((out[[0, 0, 0]] - -1.0).abs() < 1e-12);
        assert!((out[[0, 0, 1]] - -2.5).abs() < 1e-12);
    }

    #[test]
    fn positive_step_uses_cholesky() {
        let h = array![[1.0, 2.0], [0.0, 1.0], [3.0, -1.0]];
        let b = array![0.5, 0.0, 1.0];
        let prox = QuadraticProx::new(&h, &b, 0.7).unwrap();
        assert!(matches!(prox.factor, SystemFactor::Cholesky(_)));
        assert_eq!(prox.width(), 2);
    }

    #[test]
    fn singular_system_yields_nan_rows() {
        let h = Array2::<f64>::eye(3);
        let b = Array1::<f64>::zeros(3);
        let prox = QuadraticProx::new(&h, &b, -1.0).unwrap();
        let out = prox.apply(&Array3::from_elem((2, 2, 3), 1.0)).unwrap();
        assert_eq!(out.dim(), (2, 2, 3));
        assert!(out.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn negative_radius_is_rejected() {
        let y = array![1.0, -2.0];
        assert!(project_linf_ball(&y, -1.0).is_err());
        assert!(project_linf_ball(&y, f64::NAN).is_err());
    }
}
