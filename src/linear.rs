use ndarray::{Array1, Array2, ArrayView2};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal, Uniform};
use serde::{Deserialize, Serialize};

use crate::error::{expect_shape, Result};

/// Fully connected layer `x W^T + b` over row-major batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Linear {
    weight: Array2<f64>,
    bias: Array1<f64>,
}

impl Linear {
    pub fn from_parts(weight: Array2<f64>, bias: Array1<f64>) -> Result<Self> {
        expect_shape("linear_bias", &[weight.nrows()], bias.shape())?;
        Ok(Self { weight, bias })
    }

    /// Weight and bias drawn from U(-1/sqrt(in), 1/sqrt(in)).
    pub fn uniform<R: Rng + ?Sized>(in_dim: usize, out_dim: usize, rng: &mut R) -> Self {
        let k = 1.0 / (in_dim.max(1) as f64).sqrt();
        let dist = Uniform::new_inclusive(-k, k);
        Self {
            weight: Array2::from_shape_fn((out_dim, in_dim), |_| dist.sample(rng)),
            bias: Array1::from_shape_fn(out_dim, |_| dist.sample(rng)),
        }
    }

    /// Standard-normal weight, uniform bias.
    pub fn normal<R: Rng + ?Sized>(in_dim: usize, out_dim: usize, rng: &mut R) -> Self {
        let mut layer = Self::uniform(in_dim, out_dim, rng);
        layer.weight = Array2::from_shape_fn((out_dim, in_dim), |_| StandardNormal.sample(rng));
        layer
    }

    pub fn in_dim(&self) -> usize {
        self.weight.ncols()
    }

    pub fn forward(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        expect_shape("linear", &[x.nrows(), self.in_dim()], x.shape())?;
        Ok(x.dot(&self.weight.t()) + &self.bias)
    }
}

pub fn relu(x: Array2<f64>) -> Array2<f64> {
    x.mapv_into(|v| v.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn forward_applies_weight_and_bias() {
        let layer = Linear::from_parts(array![[1.0, 2.0], [0.0, -1.0]], array![0.5, 1.0]).unwrap();
        let out = layer.forward(array![[1.0, 1.0]].view()).unwrap();
        assert_eq!(out, array![[3.5, 0.0]]);
    }

    #[test]
    fn forward_rejects_wrong_width() {
        let layer = Linear::from_parts(Array2::zeros((3, 2)), Array1::zeros(3)).unwrap();
        assert!(layer.forward(Array2::<f64>::zeros((4, 5)).view()).is_err());
    }

    #[test]
    fn relu_zeroes_negatives() {
        assert_eq!(relu(array![[-1.0, 2.0]]), array![[0.0, 2.0]]);
    }
}
