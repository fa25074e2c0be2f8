use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::encoder::EncoderConfig;
use crate::predictor::{PredictorConfig, PredictorKind, PredictorSpecs};
use crate::primal_dual::{FidelityInit, SolverConfig, SolverInit};

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    pub solver: SolverSection,
    pub window: WindowConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub num_securities: usize,
    pub hidden_size: usize,
    pub lstm_layers: usize,
    pub pd_layers: usize,
    pub dropout: f64,
    #[serde(default)]
    pub training: bool,
    #[serde(default)]
    pub seed: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SolverSection {
    pub max_it: usize,
    pub sigma: f64,
    pub tau: f64,
    pub theta: f64,
    pub lambda_rof: f64,
    #[serde(default = "default_dual_radius")]
    pub dual_radius: f64,
    #[serde(default = "default_fidelity")]
    pub fidelity: FidelityInit,
    #[serde(default)]
    pub diagnostics: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    pub seq_len: usize,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

fn default_dual_radius() -> f64 {
    1.0
}

fn default_fidelity() -> FidelityInit {
    FidelityInit::Identity
}

impl SolverSection {
    pub fn solver_config(&self) -> SolverConfig {
        SolverConfig {
            max_it: self.max_it,
            dual_radius: self.dual_radius,
            diagnostics: self.diagnostics,
        }
    }

    pub fn solver_init(&self) -> SolverInit {
        SolverInit {
            lambda_rof: self.lambda_rof,
            sigma: self.sigma,
            tau: self.tau,
            theta: self.theta,
            fidelity: self.fidelity,
        }
    }
}

impl Config {
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let config = Self::parse(&config_str)
            .with_context(|| format!("failed to parse {}", config_path.display()))?;
        Ok(config)
    }

    pub fn parse(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str).context("invalid TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.num_securities == 0 {
            bail!("model.num_securities must be > 0");
        }
        if self.model.hidden_size == 0 {
            bail!("model.hidden_size must be > 0");
        }
        if self.model.lstm_layers == 0 || self.model.pd_layers == 0 {
            bail!("model.lstm_layers and model.pd_layers must be > 0");
        }
        if !(0.0..1.0).contains(&self.model.dropout) {
            bail!("model.dropout must be in [0, 1), got {}", self.model.dropout);
        }
        if self.solver.max_it == 0 {
            bail!("solver.max_it must be > 0");
        }
        if self.window.seq_len == 0 || self.window.batch_size == 0 {
            bail!("window.seq_len and window.batch_size must be > 0");
        }
        Ok(())
    }

    pub fn predictor_specs(&self) -> PredictorSpecs {
        let encoder = |n_layers| EncoderConfig {
            input_size: self.model.num_securities,
            hidden_size: self.model.hidden_size,
            n_layers,
            dropout: self.model.dropout,
        };
        vec![
            (
                "lstm-v1".to_string(),
                PredictorConfig {
                    kind: PredictorKind::Lstm,
                    encoder: encoder(self.model.lstm_layers),
                    training: self.model.training,
                    solver: self.solver.solver_config(),
                    init: self.solver.solver_init(),
                },
            ),
            (
                "pd-lstm-v1".to_string(),
                PredictorConfig {
                    kind: PredictorKind::PdLstm,
                    encoder: encoder(self.model.pd_layers),
                    training: self.model.training,
                    solver: self.solver.solver_config(),
                    init: self.solver.solver_init(),
                },
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT_TOML: &str = r#"
[model]
num_securities = 5
hidden_size = 64
lstm_layers = 8
pd_layers = 2
dropout = 0.2
seed = 7

[solver]
max_it = 20
sigma = 0.5
tau = 0.1
theta = 0.9
lambda_rof = 5.0
fidelity = "random"

[window]
seq_len = 10
batch_size = 4

[logging]
level = "debug"
"#;

    #[test]
    fn parse_default_toml() {
        let config = Config::parse(DEFAULT_TOML).unwrap();
        assert_eq!(config.model.num_securities, 5);
        assert_eq!(config.model.hidden_size, 64);
        assert!(!config.model.training);
        assert_eq!(config.solver.max_it, 20);
        assert!((config.solver.dual_radius - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.solver.fidelity, FidelityInit::Random);
        assert!(!config.solver.diagnostics);
        assert_eq!(config.window.seq_len, 10);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn predictor_specs_follow_model_section() {
        let config = Config::parse(DEFAULT_TOML).unwrap();
        let specs = config.predictor_specs();
        assert_eq!(specs.len(), 2);
        let (_, pd) = specs.iter().find(|(id, _)| id == "pd-lstm-v1").unwrap();
        assert_eq!(pd.kind, PredictorKind::PdLstm);
        assert_eq!(pd.encoder.n_layers, 2);
        assert_eq!(pd.num_securities(), 5);
        assert_eq!(pd.solver.max_it, 20);
        assert!((pd.init.theta - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_zero_iterations() {
        let bad = DEFAULT_TOML.replace("max_it = 20", "max_it = 0");
        assert!(Config::parse(&bad).is_err());
    }

    #[test]
    fn rejects_dropout_of_one() {
        let bad = DEFAULT_TOML.replace("dropout = 0.2", "dropout = 1.0");
        assert!(Config::parse(&bad).is_err());
    }

    #[test]
    fn rejects_unknown_fidelity() {
        let bad = DEFAULT_TOML.replace("\"random\"", "\"lowrank\"");
        assert!(Config::parse(&bad).is_err());
    }
}
