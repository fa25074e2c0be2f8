use std::cell::RefCell;

use ndarray::{Array2, Array3, Axis};
use rand::rngs::StdRng;
use rand::Rng;

use crate::encoder::{EncoderConfig, LstmEncoder};
use crate::error::Result;
use crate::head::LstmHead;

use super::{dropout_stream, encode_sequence};

/// Plain recurrent predictor: encoder output at the last timestep fed
/// through a small dense head.
#[derive(Debug, Clone)]
pub struct LstmPredictor {
    encoder: LstmEncoder,
    head: LstmHead,
    training: bool,
    dropout_rng: RefCell<StdRng>,
}

impl LstmPredictor {
    pub fn new<R: Rng + ?Sized>(cfg: EncoderConfig, training: bool, rng: &mut R) -> Result<Self> {
        let encoder = LstmEncoder::new(cfg, rng)?;
        let head = LstmHead::new(cfg.hidden_size, cfg.input_size, rng);
        Ok(Self {
            encoder,
            head,
            training,
            dropout_rng: dropout_stream(rng),
        })
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    pub fn forward(&self, x: &Array3<f64>) -> Result<Array2<f64>> {
        let encoded = encode_sequence(&self.encoder, x, self.training, &self.dropout_rng)?;
        let steps = encoded.len_of(Axis(0));
        let last = encoded.index_axis(Axis(0), steps - 1).to_owned();
        self.head.forward(&last)
    }
}
