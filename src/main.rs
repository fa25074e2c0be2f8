use std::path::PathBuf;

use anyhow::{Context, Result};
use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::Serialize;

use pd_forecast::config::{Config, DEFAULT_CONFIG_PATH};
use pd_forecast::predictor::{build_predictor_models, PredictorModel};
use pd_forecast::primal_dual::IterationStats;

#[derive(Debug, Serialize)]
struct PredictionReport {
    id: String,
    kind: String,
    training: bool,
    prediction: Vec<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    solver_iterations: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    effective_theta: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    iteration_stats: Vec<IterationStats>,
}

fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = match Config::load_from(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                config
                    .logging
                    .level
                    .parse()
                    .unwrap_or_else(|_| "info".parse().unwrap())
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(
        config = %config_path.display(),
        securities = config.model.num_securities,
        hidden = config.model.hidden_size,
        max_it = config.solver.max_it,
        "Starting pd-forecast"
    );

    let mut rng = StdRng::seed_from_u64(config.model.seed);
    let specs = config.predictor_specs();
    let models = build_predictor_models(&specs, &mut rng).context("failed to build predictors")?;

    let window = synthetic_returns(
        config.window.seq_len,
        config.window.batch_size,
        config.model.num_securities,
        &mut rng,
    )?;

    let mut ids: Vec<&String> = models.keys().collect();
    ids.sort();
    let mut reports = Vec::with_capacity(ids.len());
    for id in ids {
        let model = &models[id];
        let report = match model {
            PredictorModel::PdLstm(m) => {
                let out = m
                    .forward_detailed(&window, &window)
                    .with_context(|| format!("{id} forward failed"))?;
                PredictionReport {
                    id: id.clone(),
                    kind: format!("{:?}", model.kind()),
                    training: model.is_training(),
                    prediction: rows(&out.prediction),
                    solver_iterations: Some(out.solver.iterations),
                    effective_theta: Some(out.solver.effective_theta),
                    iteration_stats: out.solver.stats,
                }
            }
            PredictorModel::Lstm(_) => {
                let prediction = model
                    .predict(&window, &window)
                    .with_context(|| format!("{id} forward failed"))?;
                PredictionReport {
                    id: id.clone(),
                    kind: format!("{:?}", model.kind()),
                    training: model.is_training(),
                    prediction: rows(&prediction),
                    solver_iterations: None,
                    effective_theta: None,
                    iteration_stats: Vec::new(),
                }
            }
        };
        tracing::info!(id = %report.id, "prediction complete");
        reports.push(report);
    }

    println!("{}", serde_json::to_string_pretty(&reports)?);
    tracing::info!("Shutdown complete");
    Ok(())
}

// Log-return window shaped (time, batch, securities).
fn synthetic_returns(
    seq_len: usize,
    batch_size: usize,
    securities: usize,
    rng: &mut StdRng,
) -> Result<Array3<f64>> {
    let dist = Normal::new(0.0, 0.01).context("invalid return distribution")?;
    Ok(Array3::from_shape_fn((seq_len, batch_size, securities), |_| {
        dist.sample(rng)
    }))
}

fn rows(a: &Array2<f64>) -> Vec<Vec<f64>> {
    a.outer_iter().map(|r| r.to_vec()).collect()
}
