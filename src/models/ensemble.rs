//! Native gradient-boosted tree ensemble
//!
//! Binary logistic ensemble: the raw margin is the base margin plus the sum
//! of one leaf value per tree, and the paid-back probability is the sigmoid
//! of that margin.

use crate::models::inference::{Classifier, ClassifierOutput};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Decision tree node.
///
/// A split sends a row left when `features[feature] < threshold`, right
/// otherwise (including NaN).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node {
    Split {
        feature: u32,
        threshold: f32,
        left: u32,
        right: u32,
    },
    Leaf {
        value: f32,
    },
}

/// Single regression tree stored as a flat node array, root at index 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    /// Build a tree, checking that every child index points forward
    pub fn new(nodes: Vec<Node>) -> Result<Self> {
        let tree = Self { nodes };
        tree.validate()?;
        Ok(tree)
    }

    /// Single-leaf tree
    pub fn leaf(value: f32) -> Self {
        Self {
            nodes: vec![Node::Leaf { value }],
        }
    }

    fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            bail!("Tree has no nodes");
        }
        let len = self.nodes.len() as u32;
        for (idx, node) in self.nodes.iter().enumerate() {
            if let Node::Split { left, right, .. } = node {
                let idx = idx as u32;
                // Forward-only children rule out cycles
                if *left <= idx || *right <= idx || *left >= len || *right >= len {
                    bail!("Node {} has invalid children ({}, {})", idx, left, right);
                }
            }
        }
        Ok(())
    }

    /// Leaf value reached by a feature vector
    pub fn predict(&self, features: &[f32]) -> f32 {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let x = features[*feature as usize];
                    idx = if x < *threshold {
                        *left as usize
                    } else {
                        *right as usize
                    };
                }
            }
        }
    }

    /// Highest feature index referenced by a split
    pub fn max_feature(&self) -> Option<u32> {
        self.nodes
            .iter()
            .filter_map(|n| match n {
                Node::Split { feature, .. } => Some(*feature),
                Node::Leaf { .. } => None,
            })
            .max()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => {
                    1 + walk(nodes, *left as usize).max(walk(nodes, *right as usize))
                }
            }
        }
        walk(&self.nodes, 0)
    }
}

/// Logistic tree ensemble for binary classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEnsemble {
    /// Number of input features
    num_features: usize,
    /// Margin before any tree contributes
    base_margin: f64,
    /// A row is labelled paid back when its probability exceeds this
    decision_threshold: f64,
    trees: Vec<Tree>,
}

impl TreeEnsemble {
    pub fn new(
        num_features: usize,
        base_margin: f64,
        decision_threshold: f64,
        trees: Vec<Tree>,
    ) -> Result<Self> {
        let ensemble = Self {
            num_features,
            base_margin,
            decision_threshold,
            trees,
        };
        ensemble.validate()?;
        Ok(ensemble)
    }

    /// Check structural consistency, used after deserialization
    pub fn validate(&self) -> Result<()> {
        if self.num_features == 0 {
            bail!("Ensemble declares zero input features");
        }
        if !(0.0..=1.0).contains(&self.decision_threshold) {
            bail!(
                "Decision threshold {} is outside [0, 1]",
                self.decision_threshold
            );
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate()?;
            if let Some(max) = tree.max_feature() {
                if max as usize >= self.num_features {
                    bail!(
                        "Tree {} splits on feature {} but ensemble has {} features",
                        i,
                        max,
                        self.num_features
                    );
                }
            }
        }
        Ok(())
    }

    /// Raw additive score
    pub fn margin(&self, features: &[f32]) -> f64 {
        self.base_margin
            + self
                .trees
                .iter()
                .map(|t| t.predict(features) as f64)
                .sum::<f64>()
    }

    /// Paid-back probability
    pub fn predict_proba(&self, features: &[f32]) -> f64 {
        sigmoid(self.margin(features))
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    pub fn decision_threshold(&self) -> f64 {
        self.decision_threshold
    }
}

impl Classifier for TreeEnsemble {
    fn name(&self) -> &str {
        "tree_ensemble"
    }

    fn feature_count(&self) -> usize {
        self.num_features
    }

    fn classify(&self, features: &[f32]) -> Result<ClassifierOutput> {
        let probability = self.predict_proba(features);
        Ok(ClassifierOutput {
            probability,
            paid_back: probability > self.decision_threshold,
        })
    }
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
