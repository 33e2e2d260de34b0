//! Model artifact loading and persistence
//!
//! An artifact is a single JSON document bundling the classifier, the
//! ordered feature schema with its category vocabularies, and the metrics
//! reported by training. It is loaded once at startup and never mutated.

use crate::feature_extractor::{CategoryVocabulary, FeatureExtractor};
use crate::models::ensemble::TreeEnsemble;
use crate::models::inference::Classifier;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Current on-disk format version
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Serialized classifier definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifierSpec {
    /// Native ensemble evaluated in-process
    TreeEnsemble(TreeEnsemble),
    /// ONNX model file, relative paths resolve against the artifact's directory
    Onnx { path: PathBuf },
}

/// Relative importance of one input feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// Evaluation results recorded at training time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Accuracy on the held-out split
    pub accuracy: f64,
    /// ROC AUC on the held-out split
    pub auc: f64,
    /// Labeled rows in the source dataset
    #[serde(default)]
    pub training_samples: usize,
    #[serde(default)]
    pub train_rows: usize,
    #[serde(default)]
    pub test_rows: usize,
    /// Gain-based importance, highest first
    #[serde(default)]
    pub feature_importance: Vec<FeatureImportance>,
    #[serde(default)]
    pub trained_at: Option<DateTime<Utc>>,
}

impl TrainingReport {
    pub fn top_feature(&self) -> Option<&FeatureImportance> {
        self.feature_importance.first()
    }
}

/// On-disk artifact document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactFile {
    pub format_version: u32,
    /// Numeric fields in vector order
    pub numeric_features: Vec<String>,
    /// Categorical fields with their vocabularies, in vector order after the numeric ones
    pub categorical_features: Vec<CategoryVocabulary>,
    pub classifier: ClassifierSpec,
    pub report: TrainingReport,
}

impl ArtifactFile {
    /// Read an artifact document from disk
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read artifact {}", path.display()))?;
        let file: ArtifactFile = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse artifact {}", path.display()))?;
        if file.format_version != ARTIFACT_FORMAT_VERSION {
            bail!(
                "Unsupported artifact format version {} (expected {})",
                file.format_version,
                ARTIFACT_FORMAT_VERSION
            );
        }
        Ok(file)
    }

    /// Write the artifact document, creating parent directories
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let json = serde_json::to_vec(self).context("Failed to serialize artifact")?;
        fs::write(path, json).with_context(|| format!("Failed to write artifact {}", path.display()))
    }
}

/// Loaded, immutable model artifact
pub struct ModelArtifact {
    extractor: FeatureExtractor,
    classifier: Box<dyn Classifier>,
    report: TrainingReport,
}

impl ModelArtifact {
    /// Assemble an artifact, checking that the schema and classifier agree
    pub fn new(
        extractor: FeatureExtractor,
        classifier: Box<dyn Classifier>,
        report: TrainingReport,
    ) -> Result<Self> {
        if extractor.feature_count() != classifier.feature_count() {
            bail!(
                "Feature schema declares {} fields but classifier '{}' expects {}",
                extractor.feature_count(),
                classifier.name(),
                classifier.feature_count()
            );
        }
        Ok(Self {
            extractor,
            classifier,
            report,
        })
    }

    /// Load an artifact from disk.
    ///
    /// `onnx_threads` only applies to ONNX classifiers.
    pub fn load<P: AsRef<Path>>(path: P, onnx_threads: usize) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading model artifact");

        let file = ArtifactFile::read(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let artifact = Self::from_file(file, base_dir, onnx_threads)?;

        info!(
            classifier = artifact.classifier.name(),
            features = artifact.extractor.feature_count(),
            accuracy = artifact.report.accuracy,
            auc = artifact.report.auc,
            "Model artifact loaded"
        );
        Ok(artifact)
    }

    /// Build a runtime artifact from a parsed document
    pub fn from_file(file: ArtifactFile, base_dir: &Path, onnx_threads: usize) -> Result<Self> {
        let extractor = FeatureExtractor::new(file.numeric_features, file.categorical_features)?;

        let classifier: Box<dyn Classifier> = match file.classifier {
            ClassifierSpec::TreeEnsemble(ensemble) => {
                ensemble.validate().context("Invalid tree ensemble")?;
                Box::new(ensemble)
            }
            ClassifierSpec::Onnx { path } => {
                let model_path = if path.is_absolute() {
                    path
                } else {
                    base_dir.join(path)
                };
                load_onnx(&model_path, onnx_threads, extractor.feature_count())?
            }
        };

        Self::new(extractor, classifier, file.report)
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }

    pub fn report(&self) -> &TrainingReport {
        &self.report
    }
}

#[cfg(feature = "onnx")]
fn load_onnx(path: &Path, onnx_threads: usize, feature_count: usize) -> Result<Box<dyn Classifier>> {
    let classifier = crate::models::onnx::OnnxClassifier::load(path, onnx_threads, feature_count)?;
    Ok(Box::new(classifier))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx(path: &Path, _onnx_threads: usize, _feature_count: usize) -> Result<Box<dyn Classifier>> {
    bail!(
        "Artifact references ONNX model {} but this build lacks the 'onnx' feature",
        path.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ensemble::{Node, Tree};

    fn sample_file() -> ArtifactFile {
        let tree = Tree::new(vec![
            Node::Split {
                feature: 0,
                threshold: 600.0,
                left: 1,
                right: 2,
            },
            Node::Leaf { value: -2.0 },
            Node::Leaf { value: 2.0 },
        ])
        .unwrap();

        ArtifactFile {
            format_version: ARTIFACT_FORMAT_VERSION,
            numeric_features: vec!["credit_score".to_string()],
            categorical_features: vec![CategoryVocabulary::fit(
                "grade_subgrade",
                ["A1", "B1"].into_iter(),
            )],
            classifier: ClassifierSpec::TreeEnsemble(
                TreeEnsemble::new(2, 0.0, 0.5, vec![tree]).unwrap(),
            ),
            report: TrainingReport {
                accuracy: 0.9,
                auc: 0.95,
                training_samples: 100,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("loan_model.json");
        sample_file().write(&path).unwrap();

        let artifact = ModelArtifact::load(&path, 1).unwrap();
        assert_eq!(artifact.extractor().feature_names(), vec!["credit_score", "grade_subgrade"]);
        assert_eq!(artifact.classifier().name(), "tree_ensemble");
        assert_eq!(artifact.report().training_samples, 100);
    }

    #[test]
    fn test_feature_count_mismatch_is_rejected() {
        let mut file = sample_file();
        file.numeric_features.push("loan_amount".to_string());

        let result = ModelArtifact::from_file(file, Path::new("."), 1);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ModelArtifact::load(dir.path().join("absent.json"), 1).is_err());
    }

    #[test]
    fn test_unknown_version_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loan_model.json");
        let mut file = sample_file();
        file.format_version = 99;
        file.write(&path).unwrap();

        assert!(ArtifactFile::read(&path).is_err());
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn test_onnx_classifier_requires_feature() {
        let mut file = sample_file();
        file.classifier = ClassifierSpec::Onnx {
            path: PathBuf::from("loan_model.onnx"),
        };
        assert!(ModelArtifact::from_file(file, Path::new("."), 1).is_err());
    }
}
