//! Loan application data structures

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single submitted feature value.
///
/// The wire format only distinguishes JSON numbers from JSON strings; which
/// one a field must be is decided by the artifact's feature schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Number(f64),
    Text(String),
}

impl FeatureValue {
    /// Short type name used in schema mismatch messages
    pub fn kind(&self) -> &'static str {
        match self {
            FeatureValue::Number(_) => "number",
            FeatureValue::Text(_) => "string",
        }
    }
}

/// Named record of raw feature values as submitted by a caller.
///
/// Field presence is not checked here; the assembler validates the record
/// against the schema frozen into the model artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureRecord(BTreeMap<String, FeatureValue>);

impl FeatureRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field
    pub fn insert(&mut self, name: impl Into<String>, value: FeatureValue) {
        self.0.insert(name.into(), value);
    }

    /// Builder-style numeric insert
    pub fn with_number(mut self, name: &str, value: f64) -> Self {
        self.insert(name, FeatureValue::Number(value));
        self
    }

    /// Builder-style categorical insert
    pub fn with_text(mut self, name: &str, value: &str) -> Self {
        self.insert(name, FeatureValue::Text(value.to_string()));
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<FeatureValue> {
        self.0.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.0.get(name)
    }

    /// Numeric value of a field, if present and numeric
    pub fn number(&self, name: &str) -> Option<f64> {
        match self.0.get(name) {
            Some(FeatureValue::Number(v)) => Some(*v),
            _ => None,
        }
    }

    /// Categorical value of a field, if present and a string
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.0.get(name) {
            Some(FeatureValue::Text(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Typed loan application with the canonical field set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanApplication {
    /// Annual income in dollars
    pub annual_income: f64,
    /// Monthly debt payments over monthly income (0-1)
    pub debt_to_income_ratio: f64,
    /// Credit score (300-850)
    pub credit_score: f64,
    /// Requested principal in dollars
    pub loan_amount: f64,
    /// Interest rate in percent
    pub interest_rate: f64,
    pub gender: String,
    pub marital_status: String,
    pub education_level: String,
    pub employment_status: String,
    pub loan_purpose: String,
    /// Lender grade and subgrade, e.g. "B1"
    pub grade_subgrade: String,
}

impl LoanApplication {
    /// Convert into the untyped record consumed by the scoring pipeline
    pub fn to_record(&self) -> FeatureRecord {
        FeatureRecord::new()
            .with_number("annual_income", self.annual_income)
            .with_number("debt_to_income_ratio", self.debt_to_income_ratio)
            .with_number("credit_score", self.credit_score)
            .with_number("loan_amount", self.loan_amount)
            .with_number("interest_rate", self.interest_rate)
            .with_text("gender", &self.gender)
            .with_text("marital_status", &self.marital_status)
            .with_text("education_level", &self.education_level)
            .with_text("employment_status", &self.employment_status)
            .with_text("loan_purpose", &self.loan_purpose)
            .with_text("grade_subgrade", &self.grade_subgrade)
    }
}

impl TryFrom<&FeatureRecord> for LoanApplication {
    type Error = PipelineError;

    fn try_from(record: &FeatureRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            annual_income: required_number(record, "annual_income")?,
            debt_to_income_ratio: required_number(record, "debt_to_income_ratio")?,
            credit_score: required_number(record, "credit_score")?,
            loan_amount: required_number(record, "loan_amount")?,
            interest_rate: required_number(record, "interest_rate")?,
            gender: required_text(record, "gender")?,
            marital_status: required_text(record, "marital_status")?,
            education_level: required_text(record, "education_level")?,
            employment_status: required_text(record, "employment_status")?,
            loan_purpose: required_text(record, "loan_purpose")?,
            grade_subgrade: required_text(record, "grade_subgrade")?,
        })
    }
}

fn required_number(record: &FeatureRecord, field: &str) -> Result<f64, PipelineError> {
    match record.get(field) {
        Some(FeatureValue::Number(n)) => Ok(*n),
        Some(other) => Err(PipelineError::wrong_kind(field, "number", other.kind())),
        None => Err(PipelineError::missing_field(field)),
    }
}

fn required_text(record: &FeatureRecord, field: &str) -> Result<String, PipelineError> {
    match record.get(field) {
        Some(FeatureValue::Text(s)) => Ok(s.clone()),
        Some(other) => Err(PipelineError::wrong_kind(field, "string", other.kind())),
        None => Err(PipelineError::missing_field(field)),
    }
}

impl From<&LoanApplication> for FeatureRecord {
    fn from(app: &LoanApplication) -> Self {
        app.to_record()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_application() -> LoanApplication {
        LoanApplication {
            annual_income: 85000.0,
            debt_to_income_ratio: 0.21,
            credit_score: 720.0,
            loan_amount: 15000.0,
            interest_rate: 6.5,
            gender: "F".to_string(),
            marital_status: "Married".to_string(),
            education_level: "Bachelor".to_string(),
            employment_status: "Employed".to_string(),
            loan_purpose: "Debt Consolidation".to_string(),
            grade_subgrade: "B1".to_string(),
        }
    }

    #[test]
    fn test_record_from_application() {
        let record = sample_application().to_record();

        assert_eq!(record.len(), 11);
        assert_eq!(record.number("credit_score"), Some(720.0));
        assert_eq!(record.text("grade_subgrade"), Some("B1"));
        assert_eq!(record.text("credit_score"), None);
    }

    #[test]
    fn test_application_from_record() {
        let app = sample_application();
        let parsed = LoanApplication::try_from(&app.to_record()).unwrap();
        assert_eq!(parsed, app);

        let mut record = app.to_record();
        record.remove("loan_purpose");
        let err = LoanApplication::try_from(&record).unwrap_err();
        assert!(err.to_string().contains("loan_purpose"));

        let record = app.to_record().with_text("credit_score", "high");
        assert!(LoanApplication::try_from(&record).is_err());
    }

    #[test]
    fn test_fractional_credit_score_is_kept() {
        let record = sample_application().to_record().with_number("credit_score", 599.6);
        let app = LoanApplication::try_from(&record).unwrap();

        assert_eq!(app.credit_score, 599.6);
        assert_eq!(app.to_record(), record);
    }

    #[test]
    fn test_record_deserializes_mixed_values() {
        let record: FeatureRecord =
            serde_json::from_str(r#"{"annual_income": 85000, "gender": "F"}"#).unwrap();

        assert_eq!(record.get("annual_income"), Some(&FeatureValue::Number(85000.0)));
        assert_eq!(record.get("gender"), Some(&FeatureValue::Text("F".to_string())));
    }

    #[test]
    fn test_record_rejects_non_scalar_values() {
        let result = serde_json::from_str::<FeatureRecord>(r#"{"gender": ["F"]}"#);
        assert!(result.is_err());
    }
}
