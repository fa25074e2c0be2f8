use ndarray::{s, Array3, Array4};

use crate::error::{expect_shape, Result};

pub const DUAL_CHANNELS: usize = 2;

/// A linear map from the primal space (batch, time, hidden) into a dual
/// space (batch, channel, time, hidden), paired with its adjoint.
///
/// Implementations must satisfy `<L x, y> == <x, L^T y>` for every pair of
/// correctly shaped arrays; nothing checks this at runtime.
pub trait LinearOperator {
    fn dual_dim(&self, primal: (usize, usize, usize)) -> (usize, usize, usize, usize);

    fn apply(&self, x: &Array3<f64>) -> Result<Array4<f64>>;

    fn adjoint(&self, y: &Array4<f64>, primal: (usize, usize, usize)) -> Result<Array3<f64>>;

    /// Upper bound on the squared operator norm.
    fn norm_sq_bound(&self) -> f64;
}

/// Forward differences on the (time, hidden) grid of every batch element.
///
/// Channel 0 differences along time, channel 1 along the hidden axis. The
/// last row/column of each channel is zero (Neumann boundary), and the
/// adjoint is the matching negative divergence.
#[derive(Debug, Clone, Copy, Default)]
pub struct FiniteDifferenceOperator;

impl LinearOperator for FiniteDifferenceOperator {
    fn dual_dim(&self, primal: (usize, usize, usize)) -> (usize, usize, usize, usize) {
        let (b, t, h) = primal;
        (b, DUAL_CHANNELS, t, h)
    }

    fn apply(&self, x: &Array3<f64>) -> Result<Array4<f64>> {
        let (b, t, h) = x.dim();
        let mut out = Array4::zeros(self.dual_dim((b, t, h)));
        if t > 1 {
            let dt = &x.slice(s![.., 1.., ..]) - &x.slice(s![.., ..t - 1, ..]);
            out.slice_mut(s![.., 0, ..t - 1, ..]).assign(&dt);
        }
        if h > 1 {
            let dh = &x.slice(s![.., .., 1..]) - &x.slice(s![.., .., ..h - 1]);
            out.slice_mut(s![.., 1, .., ..h - 1]).assign(&dh);
        }
        Ok(out)
    }

    fn adjoint(&self, y: &Array4<f64>, primal: (usize, usize, usize)) -> Result<Array3<f64>> {
        let (b, c, t, h) = self.dual_dim(primal);
        expect_shape("finite_difference_adjoint", &[b, c, t, h], y.shape())?;

        let mut out = Array3::zeros(primal);
        if t > 1 {
            let yt = y.slice(s![.., 0, ..t - 1, ..]);
            let mut head = out.slice_mut(s![.., 1.., ..]);
            head += &yt;
            let mut tail = out.slice_mut(s![.., ..t - 1, ..]);
            tail -= &yt;
        }
        if h > 1 {
            let yh = y.slice(s![.., 1, .., ..h - 1]);
            let mut head = out.slice_mut(s![.., .., 1..]);
            head += &yh;
            let mut tail = out.slice_mut(s![.., .., ..h - 1]);
            tail -= &yh;
        }
        Ok(out)
    }

    fn norm_sq_bound(&self) -> f64 {
        8.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_channel_is_forward_difference() {
        let x = Array3::from_shape_fn((1, 3, 1), |(_, t, _)| (t * t) as f64);
        let lx = FiniteDifferenceOperator.apply(&x).unwrap();
        assert_eq!(lx[[0, 0, 0, 0]], 1.0);
        assert_eq!(lx[[0, 0, 1, 0]], 3.0);
        assert_eq!(lx[[0, 0, 2, 0]], 0.0);
        // single hidden column: feature channel is all zero
        assert!(lx.slice(s![.., 1, .., ..]).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn adjoint_rejects_wrong_channel_count() {
        let y = Array4::<f64>::zeros((2, 3, 4, 5));
        let err = FiniteDifferenceOperator.adjoint(&y, (2, 4, 5));
        assert!(err.is_err());
    }
}
