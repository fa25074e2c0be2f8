use ndarray::{Array2, Array3, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{PredictError, Result};
use crate::linear::{relu, Linear};

pub const LSTM_BOTTLENECK: usize = 10;

/// Projection of refined states `(batch, time, hidden)` to a per-batch
/// prediction taken at the last timestep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputHead {
    fc1: Linear,
    fc2: Linear,
}

impl OutputHead {
    pub fn new<R: Rng + ?Sized>(hidden_size: usize, num_securities: usize, rng: &mut R) -> Self {
        Self {
            fc1: Linear::normal(hidden_size, hidden_size, rng),
            fc2: Linear::uniform(hidden_size, num_securities, rng),
        }
    }

    pub fn forward(&self, refined: &Array3<f64>) -> Result<Array2<f64>> {
        let steps = refined.len_of(Axis(1));
        if steps == 0 {
            return Err(PredictError::InvalidParameter(
                "refined sequence has no timesteps".to_string(),
            ));
        }
        let last = refined.index_axis(Axis(1), steps - 1);
        let hidden = relu(self.fc1.forward(last)?);
        self.fc2.forward(hidden.view())
    }
}

/// Head of the plain recurrent predictor, applied to the last encoder output
/// `(batch, hidden)`: hidden -> hidden -> 10 -> ReLU -> securities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmHead {
    fc1: Linear,
    fc3: Linear,
    fc2: Linear,
}

impl LstmHead {
    pub fn new<R: Rng + ?Sized>(hidden_size: usize, num_securities: usize, rng: &mut R) -> Self {
        Self {
            fc1: Linear::normal(hidden_size, hidden_size, rng),
            fc3: Linear::uniform(hidden_size, LSTM_BOTTLENECK, rng),
            fc2: Linear::uniform(LSTM_BOTTLENECK, num_securities, rng),
        }
    }

    pub fn forward(&self, last: &Array2<f64>) -> Result<Array2<f64>> {
        let out = self.fc1.forward(last.view())?;
        let out = self.fc3.forward(out.view())?;
        self.fc2.forward(relu(out).view())
    }
}
