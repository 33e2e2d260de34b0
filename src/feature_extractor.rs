//! Feature extraction for loan risk model inference.
//!
//! Turns a submitted record into the exact feature vector the classifier
//! was fitted on: numeric fields first in their declared order, followed by
//! the encoded categorical fields in their declared order. The order comes
//! from the model artifact and is never re-derived here.

use crate::error::PipelineError;
use crate::types::application::{FeatureRecord, FeatureValue};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Numeric fields of the canonical loan schema, in training order
pub const NUMERIC_FEATURES: [&str; 5] = [
    "annual_income",
    "debt_to_income_ratio",
    "credit_score",
    "loan_amount",
    "interest_rate",
];

/// Categorical fields of the canonical loan schema, in training order
pub const CATEGORICAL_FEATURES: [&str; 6] = [
    "gender",
    "marital_status",
    "education_level",
    "employment_status",
    "loan_purpose",
    "grade_subgrade",
];

/// Code assigned to any value missing from a vocabulary
pub const UNSEEN_CATEGORY_CODE: u32 = 0;

/// Closed-world mapping from category value to integer code.
///
/// Codes are positions in `values`. Vocabularies fitted by the trainer are
/// sorted, so code 0 is also the alphabetically first known value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "VocabularyRepr", into = "VocabularyRepr")]
pub struct CategoryVocabulary {
    field: String,
    values: Vec<String>,
    codes: HashMap<String, u32>,
}

#[derive(Serialize, Deserialize)]
struct VocabularyRepr {
    field: String,
    values: Vec<String>,
}

impl TryFrom<VocabularyRepr> for CategoryVocabulary {
    type Error = anyhow::Error;

    fn try_from(repr: VocabularyRepr) -> Result<Self> {
        CategoryVocabulary::from_values(repr.field, repr.values)
    }
}

impl From<CategoryVocabulary> for VocabularyRepr {
    fn from(vocab: CategoryVocabulary) -> Self {
        Self {
            field: vocab.field,
            values: vocab.values,
        }
    }
}

impl CategoryVocabulary {
    /// Build a vocabulary from values already in code order
    pub fn from_values(field: impl Into<String>, values: Vec<String>) -> Result<Self> {
        let field = field.into();
        let mut codes = HashMap::with_capacity(values.len());
        for (code, value) in values.iter().enumerate() {
            if codes.insert(value.clone(), code as u32).is_some() {
                bail!("Duplicate value '{}' in vocabulary for '{}'", value, field);
            }
        }
        Ok(Self {
            field,
            values,
            codes,
        })
    }

    /// Fit a vocabulary from observed values: distinct values, sorted
    pub fn fit<'a, I>(field: impl Into<String>, observed: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let distinct: BTreeSet<&str> = observed.into_iter().collect();
        let values: Vec<String> = distinct.into_iter().map(str::to_string).collect();
        let codes = values
            .iter()
            .enumerate()
            .map(|(code, value)| (value.clone(), code as u32))
            .collect();
        Self {
            field: field.into(),
            values,
            codes,
        }
    }

    /// Field this vocabulary belongs to
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Known values in code order
    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, value: &str) -> bool {
        self.codes.contains_key(value)
    }

    /// Encode a raw value. Unseen values silently map to
    /// [`UNSEEN_CATEGORY_CODE`]; this is not a most-frequent imputation.
    pub fn encode(&self, value: &str) -> u32 {
        match self.codes.get(value) {
            Some(&code) => code,
            None => {
                debug!(field = %self.field, value = %value, "Unseen category, using code 0");
                UNSEEN_CATEGORY_CODE
            }
        }
    }

    /// Value for a code, if the code is known
    pub fn decode(&self, code: u32) -> Option<&str> {
        self.values.get(code as usize).map(String::as_str)
    }
}

/// Feature extractor that transforms records into model input features.
///
/// Holds the field order and vocabularies frozen into the model artifact.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    numeric: Vec<String>,
    categorical: Vec<CategoryVocabulary>,
}

impl FeatureExtractor {
    /// Create an extractor from the artifact's declared fields.
    ///
    /// Field names must be unique across both groups.
    pub fn new(numeric: Vec<String>, categorical: Vec<CategoryVocabulary>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for name in numeric
            .iter()
            .map(String::as_str)
            .chain(categorical.iter().map(CategoryVocabulary::field))
        {
            if !seen.insert(name) {
                bail!("Feature '{}' is declared more than once", name);
            }
        }
        if seen.is_empty() {
            bail!("Feature schema declares no fields");
        }
        Ok(Self {
            numeric,
            categorical,
        })
    }

    /// Extract the feature vector for a record.
    ///
    /// Fails with `SchemaMismatch` when a declared field is missing or holds
    /// the wrong kind of value. Extra fields are ignored.
    pub fn extract(&self, record: &FeatureRecord) -> Result<Vec<f32>, PipelineError> {
        let mut features = Vec::with_capacity(self.feature_count());

        for name in &self.numeric {
            match record.get(name) {
                Some(FeatureValue::Number(v)) => features.push(*v as f32),
                Some(other) => return Err(PipelineError::wrong_kind(name, "number", other.kind())),
                None => return Err(PipelineError::missing_field(name)),
            }
        }

        for vocab in &self.categorical {
            match record.get(vocab.field()) {
                Some(FeatureValue::Text(v)) => features.push(vocab.encode(v) as f32),
                Some(other) => {
                    return Err(PipelineError::wrong_kind(vocab.field(), "string", other.kind()))
                }
                None => return Err(PipelineError::missing_field(vocab.field())),
            }
        }

        Ok(features)
    }

    /// Encode a single categorical value. `None` if the field is not a
    /// declared categorical field.
    pub fn encode(&self, field: &str, value: &str) -> Option<u32> {
        self.vocabulary(field).map(|vocab| vocab.encode(value))
    }

    pub fn vocabulary(&self, field: &str) -> Option<&CategoryVocabulary> {
        self.categorical.iter().find(|v| v.field() == field)
    }

    /// Get the number of features produced.
    pub fn feature_count(&self) -> usize {
        self.numeric.len() + self.categorical.len()
    }

    /// Get feature names in vector order.
    pub fn feature_names(&self) -> Vec<&str> {
        self.numeric
            .iter()
            .map(String::as_str)
            .chain(self.categorical.iter().map(CategoryVocabulary::field))
            .collect()
    }

    pub fn numeric_features(&self) -> &[String] {
        &self.numeric
    }

    pub fn categorical_features(&self) -> &[CategoryVocabulary] {
        &self.categorical
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab(field: &str, values: &[&str]) -> CategoryVocabulary {
        CategoryVocabulary::fit(field, values.iter().copied())
    }

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(
            NUMERIC_FEATURES.iter().map(|s| s.to_string()).collect(),
            vec![
                vocab("gender", &["Male", "Female", "Other"]),
                vocab("marital_status", &["Single", "Married", "Divorced"]),
                vocab("education_level", &["High School", "Bachelor", "Master"]),
                vocab("employment_status", &["Employed", "Unemployed", "Self-employed"]),
                vocab("loan_purpose", &["Debt Consolidation", "Home", "Car"]),
                vocab("grade_subgrade", &["A1", "B1", "C1"]),
            ],
        )
        .unwrap()
    }

    fn record() -> FeatureRecord {
        FeatureRecord::new()
            .with_number("annual_income", 85000.0)
            .with_number("debt_to_income_ratio", 0.21)
            .with_number("credit_score", 720.0)
            .with_number("loan_amount", 15000.0)
            .with_number("interest_rate", 6.5)
            .with_text("gender", "Female")
            .with_text("marital_status", "Married")
            .with_text("education_level", "Bachelor")
            .with_text("employment_status", "Employed")
            .with_text("loan_purpose", "Debt Consolidation")
            .with_text("grade_subgrade", "B1")
    }

    #[test]
    fn test_fit_sorts_and_dedups() {
        let v = vocab("grade_subgrade", &["C1", "A1", "B1", "A1"]);
        assert_eq!(v.values(), &["A1", "B1", "C1"]);
        assert_eq!(v.encode("A1"), 0);
        assert_eq!(v.encode("C1"), 2);
        assert_eq!(v.decode(1), Some("B1"));
    }

    #[test]
    fn test_encoding_is_stable() {
        let v = vocab("gender", &["Male", "Female"]);
        let first = v.encode("Male");
        let second = v.encode("Male");
        assert_eq!(first, second);
        assert_eq!(first, 1);
    }

    #[test]
    fn test_unseen_category_encodes_to_zero() {
        let v = vocab("employment_status", &["Employed", "Unemployed"]);
        assert_eq!(v.encode("Martian"), UNSEEN_CATEGORY_CODE);
        assert_eq!(v.encode(""), UNSEEN_CATEGORY_CODE);
    }

    #[test]
    fn test_from_values_rejects_duplicates() {
        let result = CategoryVocabulary::from_values(
            "gender",
            vec!["Male".to_string(), "Male".to_string()],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_vocabulary_serde_rebuilds_codes() {
        let v = vocab("gender", &["Male", "Female"]);
        let json = serde_json::to_string(&v).unwrap();
        let restored: CategoryVocabulary = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.encode("Male"), v.encode("Male"));
        assert_eq!(restored, v);
    }

    #[test]
    fn test_feature_extraction_order() {
        let extractor = extractor();
        let features = extractor.extract(&record()).unwrap();

        assert_eq!(features.len(), extractor.feature_count());
        assert_eq!(features[0], 85000.0);
        assert_eq!(features[2], 720.0);
        assert_eq!(features[4], 6.5);
        // Female < Male < Other
        assert_eq!(features[5], 0.0);
        // Divorced < Married < Single
        assert_eq!(features[6], 1.0);
        // A1 < B1 < C1
        assert_eq!(features[10], 1.0);
    }

    #[test]
    fn test_feature_names_follow_declared_order() {
        let extractor = extractor();
        let names = extractor.feature_names();
        assert_eq!(names.len(), 11);
        assert_eq!(&names[..5], &NUMERIC_FEATURES);
        assert_eq!(&names[5..], &CATEGORICAL_FEATURES);
    }

    #[test]
    fn test_missing_field_is_schema_mismatch() {
        let extractor = extractor();
        for field in NUMERIC_FEATURES.iter().chain(CATEGORICAL_FEATURES.iter()) {
            let mut rec = record();
            rec.remove(field);
            match extractor.extract(&rec) {
                Err(PipelineError::SchemaMismatch { field: f, .. }) => assert_eq!(f, *field),
                other => panic!("expected schema mismatch for {field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_wrong_kind_is_schema_mismatch() {
        let extractor = extractor();

        let rec = record().with_text("credit_score", "720");
        assert!(matches!(
            extractor.extract(&rec),
            Err(PipelineError::SchemaMismatch { .. })
        ));

        let rec = record().with_number("gender", 1.0);
        assert!(matches!(
            extractor.extract(&rec),
            Err(PipelineError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_unseen_value_still_extracts() {
        let extractor = extractor();
        let rec = record().with_text("employment_status", "Martian");
        let features = extractor.extract(&rec).unwrap();
        assert_eq!(features[8], 0.0);
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let extractor = extractor();
        let rec = record().with_number("age", 41.0);
        assert_eq!(extractor.extract(&rec).unwrap().len(), 11);
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let result = FeatureExtractor::new(
            vec!["gender".to_string()],
            vec![vocab("gender", &["Male"])],
        );
        assert!(result.is_err());
    }
}
