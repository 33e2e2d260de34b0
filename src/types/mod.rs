//! Type definitions for the loan risk service

pub mod application;
pub mod assessment;

pub use application::{FeatureRecord, FeatureValue, LoanApplication};
pub use assessment::{Confidence, RiskAssessment, RiskLevel};
