//! Model Training Tool
//!
//! Fits the gradient-boosted loan payback classifier on a labeled CSV and
//! writes the model artifact loaded by the service.

use anyhow::{Context, Result};
use clap::Parser;
use loan_risk_service::models::training::{self, BoostingParams};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "train_model", about = "Train the loan payback classifier")]
struct Args {
    /// Labeled training data (CSV with a `loan_paid_back` column)
    #[arg(long, default_value = "data/train.csv")]
    data: PathBuf,

    /// Artifact output path
    #[arg(long, default_value = "models/loan_model.json")]
    output: PathBuf,

    /// Fraction of rows held out for evaluation
    #[arg(long, default_value_t = 0.2)]
    test_fraction: f64,

    #[arg(long, default_value_t = 800)]
    n_estimators: usize,

    #[arg(long, default_value_t = 6)]
    max_depth: usize,

    #[arg(long, default_value_t = 0.1)]
    learning_rate: f64,

    #[arg(long, default_value_t = 0.8)]
    subsample: f64,

    #[arg(long, default_value_t = 0.8)]
    colsample_bytree: f64,

    /// Weight of positive (paid back) rows
    #[arg(long, default_value_t = 2.5)]
    scale_pos_weight: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

impl Args {
    fn params(&self) -> BoostingParams {
        BoostingParams {
            n_estimators: self.n_estimators,
            max_depth: self.max_depth,
            learning_rate: self.learning_rate,
            subsample: self.subsample,
            colsample_bytree: self.colsample_bytree,
            scale_pos_weight: self.scale_pos_weight,
            seed: self.seed,
            ..BoostingParams::default()
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("train_model=info".parse()?)
                .add_directive("loan_risk_service=info".parse()?),
        )
        .init();

    let args = Args::parse();
    info!(data = %args.data.display(), "Loading training data");

    let data = training::load_training_csv(&args.data)?;
    info!(
        rows = data.len(),
        positive_rate = format!("{:.1}%", data.positive_rate() * 100.0),
        "Training data loaded"
    );

    let start = Instant::now();
    let artifact = training::train(&data, &args.params(), args.test_fraction)?;
    artifact
        .write(&args.output)
        .with_context(|| format!("Failed to save artifact to {}", args.output.display()))?;

    let report = &artifact.report;
    info!(
        accuracy = format!("{:.2}%", report.accuracy * 100.0),
        auc = format!("{:.4}", report.auc),
        elapsed_secs = start.elapsed().as_secs(),
        output = %args.output.display(),
        "Model trained"
    );
    for importance in report.feature_importance.iter().take(5) {
        info!(
            feature = %importance.feature,
            importance = format!("{:.1}%", importance.importance * 100.0),
            "Top feature"
        );
    }

    Ok(())
}
