//! Loan Risk Service Library
//!
//! Scores loan applications with a pre-trained gradient-boosted classifier
//! and serves the results, along with accounts and prediction history,
//! over an HTTP API.

pub mod auth;
pub mod config;
pub mod error;
pub mod feature_extractor;
pub mod metrics;
pub mod models;
pub mod server;
pub mod store;
pub mod types;

pub use config::AppConfig;
pub use error::PipelineError;
pub use feature_extractor::FeatureExtractor;
pub use models::inference::InferenceEngine;
pub use models::ModelArtifact;
pub use server::{build_router, AppState};
pub use store::Store;
pub use types::{FeatureRecord, LoanApplication, RiskAssessment, RiskLevel};
