//! Scoring pipeline: feature assembly, classification, risk bucketing

use crate::error::PipelineError;
use crate::models::artifact::ModelArtifact;
use crate::types::application::FeatureRecord;
use crate::types::assessment::RiskAssessment;
use anyhow::{bail, Result};
use tracing::{debug, error};

/// Raw classifier output for one feature vector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierOutput {
    /// Probability that the loan is paid back
    pub probability: f64,
    /// Label from the model's own decision rule
    pub paid_back: bool,
}

/// Read-only binary classifier over fixed-length feature vectors.
///
/// Implementations are shared across request handlers and must not keep
/// per-call state.
pub trait Classifier: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Length of the feature vector the model was fitted on
    fn feature_count(&self) -> usize;

    /// Evaluate one feature vector. Callers guarantee the length matches
    /// [`Classifier::feature_count`].
    fn classify(&self, features: &[f32]) -> Result<ClassifierOutput>;
}

/// Positive-class probability from a probability tensor's shape and data.
///
/// `[1, 2]` or `[2]` hold both classes, `[1, 1]` or `[1]` only the positive one.
pub fn positive_class_probability(dims: &[i64], data: &[f32]) -> Result<f64> {
    let both_classes = matches!(dims.last(), Some(&n) if n >= 2);
    match (both_classes, data) {
        (_, []) => bail!("probability tensor {:?} is empty", dims),
        (true, [_, positive, ..]) => Ok(*positive as f64),
        (true, _) => bail!(
            "probability tensor {:?} holds {} value(s), expected at least 2",
            dims,
            data.len()
        ),
        (false, [positive, ..]) => Ok(*positive as f64),
    }
}

/// Inference engine wrapping a loaded model artifact
pub struct InferenceEngine {
    artifact: ModelArtifact,
}

impl InferenceEngine {
    pub fn new(artifact: ModelArtifact) -> Self {
        Self { artifact }
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    /// Score a submitted record end to end
    pub fn score(&self, record: &FeatureRecord) -> Result<RiskAssessment, PipelineError> {
        let features = self.artifact.extractor().extract(record)?;
        let output = self.classify_vector(&features)?;

        let assessment = RiskAssessment::new(output.probability, output.paid_back);
        debug!(
            probability = assessment.probability,
            risk_level = %assessment.risk_level,
            "Application scored"
        );
        Ok(assessment)
    }

    /// Run the classifier on an assembled vector, guarding its length
    pub fn classify_vector(&self, features: &[f32]) -> Result<ClassifierOutput, PipelineError> {
        let classifier = self.artifact.classifier();
        let expected = classifier.feature_count();
        if features.len() != expected {
            error!(
                expected = expected,
                actual = features.len(),
                classifier = classifier.name(),
                "Assembled feature vector does not match classifier input"
            );
            return Err(PipelineError::FeatureVectorError {
                expected,
                actual: features.len(),
            });
        }

        let output = classifier.classify(features).map_err(|e| {
            error!(classifier = classifier.name(), error = %e, "Classifier failed");
            PipelineError::Inference(e)
        })?;

        if !output.probability.is_finite() {
            return Err(PipelineError::Inference(anyhow::anyhow!(
                "classifier returned non-finite probability {}",
                output.probability
            )));
        }

        Ok(ClassifierOutput {
            probability: output.probability.clamp(0.0, 1.0),
            paid_back: output.paid_back,
        })
    }
}
