//! ONNX Runtime classifier backend
//!
//! Evaluates a binary classifier exported to ONNX, e.g. an XGBoost model
//! converted with onnxmltools. Expects a `[1, n]` float input and a
//! probability output of shape `[1, 2]` (class 1 = paid back); a `label`
//! output is used for the decision when present.

use crate::models::inference::{positive_class_probability, Classifier, ClassifierOutput};
use anyhow::{Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Loaded ONNX model with its resolved input/output names
pub struct OnnxClassifier {
    /// Session runs need exclusive access
    session: Mutex<Session>,
    input_name: String,
    probability_output: String,
    label_output: Option<String>,
    feature_count: usize,
}

impl OnnxClassifier {
    /// Load an ONNX model from file
    pub fn load(path: &Path, onnx_threads: usize, feature_count: usize) -> Result<Self> {
        ort::init().commit()?;

        info!(path = %path.display(), threads = onnx_threads, "Loading ONNX model");

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(onnx_threads)?
            .commit_from_file(path)
            .context(format!("Failed to load model from {:?}", path))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let probability_output = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob"))
            .map(|o| o.name.clone())
            .unwrap_or_else(|| {
                session
                    .outputs
                    .last()
                    .map(|o| o.name.clone())
                    .unwrap_or_else(|| "probabilities".to_string())
            });

        let label_output = session
            .outputs
            .iter()
            .find(|o| o.name.contains("label"))
            .map(|o| o.name.clone());

        info!(
            input = %input_name,
            probabilities = %probability_output,
            label = ?label_output,
            "ONNX model loaded"
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            probability_output,
            label_output,
            feature_count,
        })
    }
}

impl Classifier for OnnxClassifier {
    fn name(&self) -> &str {
        "onnx"
    }

    fn feature_count(&self) -> usize {
        self.feature_count
    }

    fn classify(&self, features: &[f32]) -> Result<ClassifierOutput> {
        // Input tensor of shape [1, num_features]
        let shape = vec![1_i64, features.len() as i64];
        let input_tensor = Tensor::from_array((shape, features.to_vec()))
            .context("Failed to create input tensor")?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let outputs = session.run(ort::inputs![&self.input_name => input_tensor])?;

        let output = outputs
            .get(self.probability_output.as_str())
            .with_context(|| format!("Model has no output '{}'", self.probability_output))?;
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        let dims: Vec<i64> = shape.iter().copied().collect();
        let probability = positive_class_probability(&dims, data)
            .with_context(|| format!("Unusable output '{}'", self.probability_output))?;

        let label = self.label_output.as_deref().and_then(|name| {
            let value = outputs.get(name)?;
            match value.try_extract_tensor::<i64>() {
                Ok((_, labels)) => labels.first().map(|&l| l == 1),
                Err(e) => {
                    warn!(output = %name, error = %e, "Could not read label output");
                    None
                }
            }
        });

        debug!(probability = probability, label = ?label, "ONNX inference complete");

        Ok(ClassifierOutput {
            probability,
            paid_back: label.unwrap_or(probability > 0.5),
        })
    }
}
