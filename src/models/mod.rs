//! ML model components: artifact loading, classifiers, scoring and training

pub mod artifact;
pub mod ensemble;
pub mod inference;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod training;

pub use artifact::{ArtifactFile, ModelArtifact, TrainingReport};
pub use ensemble::TreeEnsemble;
pub use inference::{Classifier, ClassifierOutput, InferenceEngine};
pub use training::{BoostingParams, GradientBooster};
