//! Risk assessment data structures

use serde::{Deserialize, Serialize};
use std::fmt;

/// Probability at or above which an application is rated Very Low Risk
pub const VERY_LOW_RISK_MIN: f64 = 0.85;
/// Probability at or above which an application is rated Low Risk
pub const LOW_RISK_MIN: f64 = 0.65;
/// Probability at or above which an application is rated Medium Risk
pub const MEDIUM_RISK_MIN: f64 = 0.50;

/// Risk tier, ordered from safest to riskiest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "Very Low Risk")]
    VeryLow,
    #[serde(rename = "Low Risk")]
    Low,
    #[serde(rename = "Medium Risk")]
    Medium,
    #[serde(rename = "High Risk")]
    High,
}

/// Qualitative confidence attached to each risk tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [
        RiskLevel::VeryLow,
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
    ];

    /// Bucket a paid-back probability. Bounds are inclusive and checked
    /// from the safest tier down; the first match wins.
    pub fn from_probability(probability: f64) -> Self {
        if probability >= VERY_LOW_RISK_MIN {
            RiskLevel::VeryLow
        } else if probability >= LOW_RISK_MIN {
            RiskLevel::Low
        } else if probability >= MEDIUM_RISK_MIN {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }

    pub fn confidence(&self) -> Confidence {
        match self {
            RiskLevel::VeryLow => Confidence::Excellent,
            RiskLevel::Low => Confidence::Good,
            RiskLevel::Medium => Confidence::Fair,
            RiskLevel::High => Confidence::Poor,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::VeryLow => "Very Low Risk",
            RiskLevel::Low => "Low Risk",
            RiskLevel::Medium => "Medium Risk",
            RiskLevel::High => "High Risk",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Excellent => "Excellent",
            Confidence::Good => "Good",
            Confidence::Fair => "Fair",
            Confidence::Poor => "Poor",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of scoring one application
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Probability that the loan is paid back (0.0 - 1.0)
    #[serde(rename = "loan_paid_back_probability")]
    pub probability: f64,

    /// Label from the classifier's own decision rule
    #[serde(rename = "loan_will_be_paid_back")]
    pub will_be_paid_back: bool,

    pub risk_level: RiskLevel,

    pub confidence: Confidence,
}

impl RiskAssessment {
    /// Build an assessment from classifier output
    pub fn new(probability: f64, will_be_paid_back: bool) -> Self {
        let risk_level = RiskLevel::from_probability(probability);
        Self {
            probability,
            will_be_paid_back,
            risk_level,
            confidence: risk_level.confidence(),
        }
    }

    /// Persisted flag: the inverse of the paid-back label
    pub fn is_default_predicted(&self) -> bool {
        !self.will_be_paid_back
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_from_probability() {
        assert_eq!(RiskLevel::from_probability(0.91), RiskLevel::VeryLow);
        assert_eq!(RiskLevel::from_probability(0.70), RiskLevel::Low);
        assert_eq!(RiskLevel::from_probability(0.55), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_probability(0.10), RiskLevel::High);
    }

    #[test]
    fn test_bounds_are_inclusive() {
        assert_eq!(RiskLevel::from_probability(0.85), RiskLevel::VeryLow);
        assert_eq!(RiskLevel::from_probability(0.65), RiskLevel::Low);
        assert_eq!(RiskLevel::from_probability(0.50), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_probability(0.8499999), RiskLevel::Low);
        assert_eq!(RiskLevel::from_probability(0.4999999), RiskLevel::High);
        assert_eq!(RiskLevel::from_probability(0.0), RiskLevel::High);
        assert_eq!(RiskLevel::from_probability(1.0), RiskLevel::VeryLow);
    }

    #[test]
    fn test_confidence_pairs() {
        let pairs: Vec<(&str, &str)> = RiskLevel::ALL
            .iter()
            .map(|level| (level.as_str(), level.confidence().as_str()))
            .collect();

        assert_eq!(
            pairs,
            vec![
                ("Very Low Risk", "Excellent"),
                ("Low Risk", "Good"),
                ("Medium Risk", "Fair"),
                ("High Risk", "Poor"),
            ]
        );
    }

    #[test]
    fn test_assessment_serialization() {
        let assessment = RiskAssessment::new(0.91, true);
        let json = serde_json::to_value(assessment).unwrap();

        assert_eq!(json["loan_paid_back_probability"], 0.91);
        assert_eq!(json["loan_will_be_paid_back"], true);
        assert_eq!(json["risk_level"], "Very Low Risk");
        assert_eq!(json["confidence"], "Excellent");
        assert!(!assessment.is_default_predicted());
    }
}
