//! Error types for the scoring pipeline

use thiserror::Error;

/// Failures of a single scoring request.
///
/// Unseen categorical values are deliberately absent: they encode to 0.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The caller's record is missing a declared field or has the wrong kind of value
    #[error("schema mismatch on field '{field}': {reason}")]
    SchemaMismatch { field: String, reason: String },

    /// The assembled vector does not fit the classifier input
    #[error("feature vector has {actual} values, classifier expects {expected}")]
    FeatureVectorError { expected: usize, actual: usize },

    /// The classifier backend failed to evaluate
    #[error("inference failed: {0}")]
    Inference(#[source] anyhow::Error),
}

impl PipelineError {
    pub fn missing_field(field: &str) -> Self {
        PipelineError::SchemaMismatch {
            field: field.to_string(),
            reason: "field is missing".to_string(),
        }
    }

    pub fn wrong_kind(field: &str, expected: &str, actual: &str) -> Self {
        PipelineError::SchemaMismatch {
            field: field.to_string(),
            reason: format!("expected a {expected}, got a {actual}"),
        }
    }

    /// Whether the caller is at fault
    pub fn is_client_error(&self) -> bool {
        matches!(self, PipelineError::SchemaMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PipelineError::missing_field("credit_score");
        assert_eq!(
            err.to_string(),
            "schema mismatch on field 'credit_score': field is missing"
        );
        assert!(err.is_client_error());

        let err = PipelineError::FeatureVectorError {
            expected: 11,
            actual: 10,
        };
        assert_eq!(
            err.to_string(),
            "feature vector has 10 values, classifier expects 11"
        );
        assert!(!err.is_client_error());
    }
}
