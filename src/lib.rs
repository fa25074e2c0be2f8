pub mod config;
pub mod encoder;
pub mod error;
pub mod head;
pub mod linear;
pub mod predictor;
pub mod primal_dual;

pub use error::{PredictError, Result};
