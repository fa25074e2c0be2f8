mod lstm;
mod pd_lstm;

use std::cell::RefCell;
use std::collections::HashMap;

use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::encoder::{EncoderConfig, LstmEncoder};
use crate::error::Result;
use crate::primal_dual::{SolverConfig, SolverInit};

pub use lstm::LstmPredictor;
pub use pd_lstm::{PdForward, PdLstmPredictor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictorKind {
    Lstm,
    PdLstm,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictorConfig {
    pub kind: PredictorKind,
    pub encoder: EncoderConfig,
    pub training: bool,
    pub solver: SolverConfig,
    pub init: SolverInit,
}

impl PredictorConfig {
    pub fn num_securities(&self) -> usize {
        self.encoder.input_size
    }
}

pub type PredictorSpecs = Vec<(String, PredictorConfig)>;

pub fn default_predictor_specs(num_securities: usize, hidden_size: usize) -> PredictorSpecs {
    vec![
        (
            "lstm-v1".to_string(),
            PredictorConfig {
                kind: PredictorKind::Lstm,
                encoder: EncoderConfig {
                    input_size: num_securities,
                    hidden_size,
                    n_layers: 8,
                    dropout: 0.2,
                },
                training: false,
                solver: SolverConfig::default(),
                init: SolverInit::default(),
            },
        ),
        (
            "pd-lstm-v1".to_string(),
            PredictorConfig {
                kind: PredictorKind::PdLstm,
                encoder: EncoderConfig {
                    input_size: num_securities,
                    hidden_size,
                    n_layers: 2,
                    dropout: 0.2,
                },
                training: false,
                solver: SolverConfig::default(),
                init: SolverInit::default(),
            },
        ),
    ]
}

pub fn build_predictor_models<R: Rng + ?Sized>(
    specs: &[(String, PredictorConfig)],
    rng: &mut R,
) -> Result<HashMap<String, PredictorModel>> {
    let mut out = HashMap::new();
    for (id, cfg) in specs {
        let model = match cfg.kind {
            PredictorKind::Lstm => {
                PredictorModel::Lstm(LstmPredictor::new(cfg.encoder, cfg.training, rng)?)
            }
            PredictorKind::PdLstm => PredictorModel::PdLstm(PdLstmPredictor::new(
                cfg.encoder,
                cfg.solver,
                &cfg.init,
                cfg.training,
                rng,
            )?),
        };
        tracing::debug!(id = %id, kind = ?cfg.kind, "built predictor");
        out.insert(id.clone(), model);
    }
    Ok(out)
}

#[derive(Debug)]
pub enum PredictorModel {
    Lstm(LstmPredictor),
    PdLstm(PdLstmPredictor),
}

impl PredictorModel {
    pub fn kind(&self) -> PredictorKind {
        match self {
            Self::Lstm(_) => PredictorKind::Lstm,
            Self::PdLstm(_) => PredictorKind::PdLstm,
        }
    }

    pub fn is_training(&self) -> bool {
        match self {
            Self::Lstm(m) => m.is_training(),
            Self::PdLstm(m) => m.is_training(),
        }
    }

    /// Predict the next step from `estimated` `(time, batch, securities)`.
    /// `observed` is only consulted by models that take a reference sequence.
    pub fn predict(&self, estimated: &Array3<f64>, observed: &Array3<f64>) -> Result<Array2<f64>> {
        match self {
            Self::Lstm(m) => m.forward(estimated),
            Self::PdLstm(m) => m.forward(estimated, observed),
        }
    }
}

// Dropout masks come from a per-model stream seeded at construction, so a
// seeded build replays the same masks.
fn dropout_stream<R: Rng + ?Sized>(rng: &mut R) -> RefCell<StdRng> {
    RefCell::new(StdRng::seed_from_u64(rng.gen()))
}

fn encode_sequence(
    encoder: &LstmEncoder,
    x: &Array3<f64>,
    training: bool,
    dropout_rng: &RefCell<StdRng>,
) -> Result<Array3<f64>> {
    if training {
        let mut rng = dropout_rng.borrow_mut();
        encoder.encode(x, Some(&mut *rng))
    } else {
        encoder.encode(x, None)
    }
}
