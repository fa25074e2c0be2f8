use std::cell::RefCell;

use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::Rng;

use crate::encoder::{EncoderConfig, LstmEncoder};
use crate::error::{expect_shape, Result};
use crate::head::OutputHead;
use crate::primal_dual::{PrimalDualSolver, SolverConfig, SolverInit, SolverOutput, SolverParameters};

use super::{dropout_stream, encode_sequence};

#[derive(Debug, Clone)]
pub struct PdForward {
    pub prediction: Array2<f64>,
    pub solver: SolverOutput,
}

/// LSTM encoder whose hidden states are refined by the unrolled primal-dual
/// solver before the output head.
#[derive(Debug, Clone)]
pub struct PdLstmPredictor {
    encoder: LstmEncoder,
    head: OutputHead,
    solver: PrimalDualSolver,
    params: SolverParameters,
    training: bool,
    dropout_rng: RefCell<StdRng>,
}

impl PdLstmPredictor {
    pub fn new<R: Rng + ?Sized>(
        encoder_cfg: EncoderConfig,
        solver_cfg: SolverConfig,
        init: &SolverInit,
        training: bool,
        rng: &mut R,
    ) -> Result<Self> {
        let params = SolverParameters::from_init(encoder_cfg.hidden_size, init, rng)?;
        Self::with_parameters(encoder_cfg, solver_cfg, params, training, rng)
    }

    /// Build around an explicit fidelity operator and step sizes.
    pub fn with_parameters<R: Rng + ?Sized>(
        encoder_cfg: EncoderConfig,
        solver_cfg: SolverConfig,
        params: SolverParameters,
        training: bool,
        rng: &mut R,
    ) -> Result<Self> {
        expect_shape(
            "pd_lstm_fidelity_width",
            &[encoder_cfg.hidden_size],
            &[params.hidden_size()],
        )?;
        let encoder = LstmEncoder::new(encoder_cfg, rng)?;
        let head = OutputHead::new(encoder_cfg.hidden_size, encoder_cfg.input_size, rng);
        let solver = PrimalDualSolver::new(solver_cfg)?;
        Ok(Self {
            encoder,
            head,
            solver,
            params,
            training,
            dropout_rng: dropout_stream(rng),
        })
    }

    pub fn params(&self) -> &SolverParameters {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut SolverParameters {
        &mut self.params
    }

    pub fn solver(&self) -> &PrimalDualSolver {
        &self.solver
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    pub fn forward(&self, x: &Array3<f64>, x_obs: &Array3<f64>) -> Result<Array2<f64>> {
        Ok(self.forward_detailed(x, x_obs)?.prediction)
    }

    /// Same as [`forward`](Self::forward) but also returns the solver output.
    pub fn forward_detailed(&self, x: &Array3<f64>, x_obs: &Array3<f64>) -> Result<PdForward> {
        expect_shape("pd_lstm_observed", x.shape(), x_obs.shape())?;
        let encoded = encode_sequence(&self.encoder, x, self.training, &self.dropout_rng)?;
        // (time, batch, hidden) -> (batch, time, hidden)
        let batch_major = encoded.permuted_axes([1, 0, 2]).as_standard_layout().into_owned();

        tracing::debug!(
            shape = ?batch_major.shape(),
            max_it = self.solver.config().max_it,
            "refining encoder states"
        );
        // TODO: wire x_obs into a data-fidelity term once b is derived from observations
        tracing::trace!("observed sequence is shape-checked only");

        let solved = self.solver.solve(&batch_major, &self.params)?;
        let prediction = self.head.forward(&solved.x_tilde)?;
        Ok(PdForward {
            prediction,
            solver: solved,
        })
    }
}
