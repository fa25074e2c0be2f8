use ndarray::{s, Array1, Array2, Array3, ArrayView2, Axis};
use rand::{Rng, RngCore};
use rand_distr::{Bernoulli, Distribution, Uniform};
use serde::{Deserialize, Serialize};

use crate::error::{expect_shape, PredictError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub input_size: usize,
    pub hidden_size: usize,
    pub n_layers: usize,
    pub dropout: f64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            input_size: 5,
            hidden_size: 64,
            n_layers: 2,
            dropout: 0.2,
        }
    }
}

impl EncoderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.input_size == 0 || self.hidden_size == 0 || self.n_layers == 0 {
            return Err(PredictError::InvalidParameter(format!(
                "encoder sizes must be > 0 (input {}, hidden {}, layers {})",
                self.input_size, self.hidden_size, self.n_layers
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(PredictError::InvalidParameter(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }
}

// Gate rows are stacked as input, forget, cell, output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LstmLayer {
    w_ih: Array2<f64>, // [4H, in]
    w_hh: Array2<f64>, // [4H, H]
    b_ih: Array1<f64>, // [4H]
    b_hh: Array1<f64>, // [4H]
}

struct EncoderState {
    h: Array2<f64>, // [B, H]
    c: Array2<f64>, // [B, H]
}

impl EncoderState {
    fn zeros(batch: usize, hidden: usize) -> Self {
        Self {
            h: Array2::zeros((batch, hidden)),
            c: Array2::zeros((batch, hidden)),
        }
    }
}

impl LstmLayer {
    fn new<R: Rng + ?Sized>(input_dim: usize, hidden: usize, rng: &mut R) -> Self {
        let k = 1.0 / (hidden as f64).sqrt();
        let dist = Uniform::new_inclusive(-k, k);
        Self {
            w_ih: Array2::from_shape_fn((4 * hidden, input_dim), |_| dist.sample(rng)),
            w_hh: Array2::from_shape_fn((4 * hidden, hidden), |_| dist.sample(rng)),
            b_ih: Array1::from_shape_fn(4 * hidden, |_| dist.sample(rng)),
            b_hh: Array1::from_shape_fn(4 * hidden, |_| dist.sample(rng)),
        }
    }

    fn hidden(&self) -> usize {
        self.w_hh.ncols()
    }

    fn step(&self, x_t: ArrayView2<f64>, st: &mut EncoderState) {
        let hsz = self.hidden();
        let gates = x_t.dot(&self.w_ih.t()) + &self.b_ih + st.h.dot(&self.w_hh.t()) + &self.b_hh;
        let i = gates.slice(s![.., 0..hsz]).mapv(sigmoid);
        let f = gates.slice(s![.., hsz..2 * hsz]).mapv(sigmoid);
        let g = gates.slice(s![.., 2 * hsz..3 * hsz]).mapv(f64::tanh);
        let o = gates.slice(s![.., 3 * hsz..4 * hsz]).mapv(sigmoid);
        st.c = &f * &st.c + &i * &g;
        st.h = &o * &st.c.mapv(f64::tanh);
    }

    fn forward(&self, x: &Array3<f64>) -> Array3<f64> {
        let (steps, batch, _) = x.dim();
        let mut st = EncoderState::zeros(batch, self.hidden());
        let mut out = Array3::zeros((steps, batch, self.hidden()));
        for t in 0..steps {
            self.step(x.index_axis(Axis(0), t), &mut st);
            out.index_axis_mut(Axis(0), t).assign(&st.h);
        }
        out
    }
}

/// Stacked unidirectional LSTM over time-major input `(time, batch, features)`.
///
/// Every call starts from zero hidden and cell state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmEncoder {
    cfg: EncoderConfig,
    layers: Vec<LstmLayer>,
}

impl LstmEncoder {
    pub fn new<R: Rng + ?Sized>(cfg: EncoderConfig, rng: &mut R) -> Result<Self> {
        cfg.validate()?;
        let layers = (0..cfg.n_layers)
            .map(|i| {
                let input_dim = if i == 0 { cfg.input_size } else { cfg.hidden_size };
                LstmLayer::new(input_dim, cfg.hidden_size, rng)
            })
            .collect();
        Ok(Self { cfg, layers })
    }

    /// Returns per-timestep outputs of the top layer, `(time, batch, hidden)`.
    ///
    /// With `dropout_rng` set, inverted dropout is applied to the output of
    /// every layer but the last.
    pub fn encode(&self, x: &Array3<f64>, mut dropout_rng: Option<&mut dyn RngCore>) -> Result<Array3<f64>> {
        let (steps, batch, _) = x.dim();
        expect_shape("lstm_encoder", &[steps, batch, self.cfg.input_size], x.shape())?;
        if steps == 0 {
            return Err(PredictError::InvalidParameter(
                "input sequence must have at least one timestep".to_string(),
            ));
        }

        let last = self.layers.len() - 1;
        let mut h = x.clone();
        for (idx, layer) in self.layers.iter().enumerate() {
            h = layer.forward(&h);
            if idx < last && self.cfg.dropout > 0.0 {
                if let Some(rng) = dropout_rng.as_deref_mut() {
                    apply_dropout(&mut h, self.cfg.dropout, rng)?;
                }
            }
        }
        Ok(h)
    }
}

fn apply_dropout(h: &mut Array3<f64>, rate: f64, rng: &mut dyn RngCore) -> Result<()> {
    let keep = 1.0 - rate;
    let bern = Bernoulli::new(keep)
        .map_err(|e| PredictError::InvalidParameter(format!("dropout rate {rate}: {e}")))?;
    let scale = 1.0 / keep;
    h.mapv_inplace(|v| if bern.sample(rng) { v * scale } else { 0.0 });
    Ok(())
}

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}
