//! Offline training of the loan payback classifier.
//!
//! Fits one sorted vocabulary per categorical field, splits the labeled
//! rows with a fixed seed and stratification, fits a logistic gradient
//! boosted tree ensemble with histogram split finding, evaluates it on the
//! held-out rows, and packages everything as an [`ArtifactFile`].

use crate::feature_extractor::{
    CategoryVocabulary, FeatureExtractor, CATEGORICAL_FEATURES, NUMERIC_FEATURES,
};
use crate::models::artifact::{
    ArtifactFile, ClassifierSpec, FeatureImportance, TrainingReport, ARTIFACT_FORMAT_VERSION,
};
use crate::models::ensemble::{sigmoid, Node, Tree, TreeEnsemble};
use crate::types::application::FeatureRecord;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::path::Path;
use tracing::{debug, info};

/// Label column of the training CSV: 1 = paid back, 0 = default
pub const LABEL_COLUMN: &str = "loan_paid_back";

/// Boosting hyperparameters
#[derive(Debug, Clone)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    /// Fraction of rows sampled per tree
    pub subsample: f64,
    /// Fraction of features sampled per tree
    pub colsample_bytree: f64,
    /// Weight applied to positive (paid back) rows
    pub scale_pos_weight: f64,
    /// L2 regularisation on leaf weights
    pub reg_lambda: f64,
    pub min_child_weight: f64,
    /// Upper bound on histogram bins per feature
    pub max_bins: usize,
    pub seed: u64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 800,
            max_depth: 6,
            learning_rate: 0.1,
            subsample: 0.8,
            colsample_bytree: 0.8,
            scale_pos_weight: 2.5,
            reg_lambda: 1.0,
            min_child_weight: 1.0,
            max_bins: 256,
            seed: 42,
        }
    }
}

/// Labeled training rows in raw record form
#[derive(Debug, Clone, Default)]
pub struct LabeledRecords {
    pub records: Vec<FeatureRecord>,
    /// `true` when the loan was paid back
    pub labels: Vec<bool>,
}

impl LabeledRecords {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn positive_rate(&self) -> f64 {
        if self.labels.is_empty() {
            return 0.0;
        }
        self.labels.iter().filter(|&&y| y).count() as f64 / self.labels.len() as f64
    }
}

/// Load the labeled CSV. Unknown columns (such as `id`) are ignored.
pub fn load_training_csv<P: AsRef<Path>>(path: P) -> Result<LabeledRecords> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open training data {}", path.display()))?;

    let headers = reader
        .headers()
        .context("Failed to read CSV headers")?
        .clone();
    let column = |name: &str| -> Result<usize> {
        headers
            .iter()
            .position(|h| h == name)
            .with_context(|| format!("Training data has no '{}' column", name))
    };

    let numeric: Vec<(&str, usize)> = NUMERIC_FEATURES
        .iter()
        .map(|&name| column(name).map(|idx| (name, idx)))
        .collect::<Result<_>>()?;
    let categorical: Vec<(&str, usize)> = CATEGORICAL_FEATURES
        .iter()
        .map(|&name| column(name).map(|idx| (name, idx)))
        .collect::<Result<_>>()?;
    let label_idx = column(LABEL_COLUMN)?;

    let mut data = LabeledRecords::default();
    for (row_no, row) in reader.records().enumerate() {
        let row = row.with_context(|| format!("Failed to read CSV row {}", row_no + 2))?;
        let field = |idx: usize| row.get(idx).unwrap_or("").trim();

        let mut record = FeatureRecord::new();
        for &(name, idx) in &numeric {
            let value: f64 = field(idx)
                .parse()
                .with_context(|| format!("Row {}: '{}' is not numeric", row_no + 2, name))?;
            record = record.with_number(name, value);
        }
        for &(name, idx) in &categorical {
            record = record.with_text(name, field(idx));
        }

        let label: f64 = field(label_idx)
            .parse()
            .with_context(|| format!("Row {}: label is not numeric", row_no + 2))?;

        data.records.push(record);
        data.labels.push(label != 0.0);
    }

    if data.is_empty() {
        bail!("Training data {} contains no rows", path.display());
    }
    Ok(data)
}

/// Fit a sorted vocabulary for every categorical field
pub fn fit_vocabularies(data: &LabeledRecords) -> Vec<CategoryVocabulary> {
    CATEGORICAL_FEATURES
        .iter()
        .map(|&field| CategoryVocabulary::fit(field, data.records.iter().filter_map(|r| r.text(field))))
        .collect()
}

/// Split row indices into (train, test), keeping the label ratio in both.
///
/// Each class is shuffled with the seeded RNG and its first
/// `round(len * test_fraction)` rows go to the test split.
pub fn stratified_split(labels: &[bool], test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(labels.len());
    let mut test = Vec::new();

    for class in [false, true] {
        let mut idx: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == class).collect();
        idx.shuffle(&mut rng);
        let n_test = (idx.len() as f64 * test_fraction).round() as usize;
        test.extend_from_slice(&idx[..n_test]);
        train.extend_from_slice(&idx[n_test..]);
    }

    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

/// Feature values discretised into histogram bins
struct BinnedMatrix {
    /// Per feature, ascending candidate thresholds
    cuts: Vec<Vec<f32>>,
    /// Per feature, per row: number of cuts <= value
    bins: Vec<Vec<u16>>,
}

impl BinnedMatrix {
    fn new(rows: &[Vec<f32>], num_features: usize, max_bins: usize) -> Self {
        let mut cuts = Vec::with_capacity(num_features);
        let mut bins = Vec::with_capacity(num_features);

        for f in 0..num_features {
            let mut column: Vec<f32> = rows.iter().map(|r| r[f]).filter(|v| !v.is_nan()).collect();
            let feature_cuts = quantile_cuts(&mut column, max_bins);
            let feature_bins = rows
                .iter()
                .map(|r| bin_of(&feature_cuts, r[f]))
                .collect();
            cuts.push(feature_cuts);
            bins.push(feature_bins);
        }

        Self { cuts, bins }
    }
}

/// Candidate thresholds for one feature. A row goes left of cut `c` when
/// its value is `< c`, so the smallest observed value is never a cut.
fn quantile_cuts(values: &mut [f32], max_bins: usize) -> Vec<f32> {
    if values.is_empty() {
        return Vec::new();
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let min = values[0];

    let mut distinct: Vec<f32> = values.to_vec();
    distinct.dedup();

    let mut cuts: Vec<f32> = if distinct.len() <= max_bins {
        distinct
    } else {
        let n = values.len();
        (1..max_bins).map(|i| values[i * n / max_bins]).collect()
    };
    cuts.dedup();
    cuts.retain(|&c| c > min);
    cuts
}

fn bin_of(cuts: &[f32], value: f32) -> u16 {
    if value.is_nan() {
        // NaN routes right of every split, like the tree evaluator
        return cuts.len() as u16;
    }
    cuts.partition_point(|&c| c <= value) as u16
}

struct SplitCandidate {
    feature: usize,
    /// Rows with bin <= this index go left
    bin: usize,
    gain: f64,
}

/// Gradient boosting trainer for binary logistic loss
pub struct GradientBooster {
    params: BoostingParams,
}

impl GradientBooster {
    pub fn new(params: BoostingParams) -> Self {
        Self { params }
    }

    /// Fit an ensemble. Returns it together with total split gain per feature.
    pub fn fit(&self, rows: &[Vec<f32>], labels: &[bool]) -> Result<(TreeEnsemble, Vec<f64>)> {
        let p = &self.params;
        if rows.is_empty() {
            bail!("Cannot train on an empty dataset");
        }
        if rows.len() != labels.len() {
            bail!("{} rows but {} labels", rows.len(), labels.len());
        }
        if p.max_bins < 2 || p.max_bins > u16::MAX as usize {
            bail!("max_bins must be in 2..={}", u16::MAX);
        }
        let num_features = rows[0].len();
        if num_features == 0 || rows.iter().any(|r| r.len() != num_features) {
            bail!("All rows must have the same non-zero number of features");
        }

        let n = rows.len();
        let binned = BinnedMatrix::new(rows, num_features, p.max_bins);
        let mut rng = StdRng::seed_from_u64(p.seed);

        let base_margin = 0.0;
        let mut margins = vec![base_margin; n];
        let weights: Vec<f64> = labels
            .iter()
            .map(|&y| if y { p.scale_pos_weight } else { 1.0 })
            .collect();
        let mut grad = vec![0.0; n];
        let mut hess = vec![0.0; n];
        let mut importance = vec![0.0; num_features];
        let mut trees = Vec::with_capacity(p.n_estimators);

        let n_cols = ((num_features as f64 * p.colsample_bytree).round() as usize).clamp(1, num_features);

        for round in 0..p.n_estimators {
            for i in 0..n {
                let prob = sigmoid(margins[i]);
                let y = if labels[i] { 1.0 } else { 0.0 };
                grad[i] = weights[i] * (prob - y);
                hess[i] = (weights[i] * prob * (1.0 - prob)).max(1e-16);
            }

            let mut sampled: Vec<usize> = (0..n).filter(|_| rng.gen::<f64>() < p.subsample).collect();
            if sampled.is_empty() {
                sampled = (0..n).collect();
            }

            let mut columns: Vec<usize> = (0..num_features).collect();
            columns.shuffle(&mut rng);
            columns.truncate(n_cols);
            columns.sort_unstable();

            let mut builder = TreeBuilder {
                params: p,
                binned: &binned,
                grad: &grad,
                hess: &hess,
                columns: &columns,
                nodes: Vec::new(),
                importance: &mut importance,
            };
            builder.grow(sampled, 0);
            let tree = Tree::new(builder.nodes)?;

            for (i, margin) in margins.iter_mut().enumerate() {
                *margin += tree.predict(&rows[i]) as f64;
            }
            trees.push(tree);

            if (round + 1) % 100 == 0 {
                info!(
                    trees = round + 1,
                    train_logloss = log_loss(&margins, labels),
                    "Boosting progress"
                );
            }
        }

        let ensemble = TreeEnsemble::new(num_features, base_margin, 0.5, trees)?;
        Ok((ensemble, importance))
    }
}

/// Grows one tree depth-first over a row subset
struct TreeBuilder<'a> {
    params: &'a BoostingParams,
    binned: &'a BinnedMatrix,
    grad: &'a [f64],
    hess: &'a [f64],
    columns: &'a [usize],
    nodes: Vec<Node>,
    importance: &'a mut [f64],
}

impl TreeBuilder<'_> {
    /// Append the subtree for `rows` and return its root index
    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> u32 {
        let (g, h) = rows
            .iter()
            .fold((0.0, 0.0), |(g, h), &r| (g + self.grad[r], h + self.hess[r]));

        let idx = self.nodes.len() as u32;
        let split = if depth < self.params.max_depth && rows.len() > 1 {
            self.best_split(&rows, g, h)
        } else {
            None
        };

        let Some(split) = split else {
            let value = -g / (h + self.params.reg_lambda) * self.params.learning_rate;
            self.nodes.push(Node::Leaf {
                value: value as f32,
            });
            return idx;
        };

        self.importance[split.feature] += split.gain;
        let column = &self.binned.bins[split.feature];
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| column[r] as usize <= split.bin);

        // Placeholder until both children have indices
        self.nodes.push(Node::Leaf { value: 0.0 });
        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[idx as usize] = Node::Split {
            feature: split.feature as u32,
            threshold: self.binned.cuts[split.feature][split.bin],
            left,
            right,
        };
        idx
    }

    fn best_split(&self, rows: &[usize], g: f64, h: f64) -> Option<SplitCandidate> {
        let lambda = self.params.reg_lambda;
        let min_child = self.params.min_child_weight;
        let parent_score = g * g / (h + lambda);
        let mut best: Option<SplitCandidate> = None;

        for &feature in self.columns {
            let cuts = &self.binned.cuts[feature];
            if cuts.is_empty() {
                continue;
            }
            let column = &self.binned.bins[feature];
            let mut hist = vec![(0.0f64, 0.0f64); cuts.len() + 1];
            for &r in rows {
                let slot = &mut hist[column[r] as usize];
                slot.0 += self.grad[r];
                slot.1 += self.hess[r];
            }

            let (mut gl, mut hl) = (0.0, 0.0);
            for (bin, &(bg, bh)) in hist.iter().enumerate().take(cuts.len()) {
                gl += bg;
                hl += bh;
                let (gr, hr) = (g - gl, h - hl);
                if hl < min_child || hr < min_child {
                    continue;
                }
                let gain = gl * gl / (hl + lambda) + gr * gr / (hr + lambda) - parent_score;
                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(SplitCandidate { feature, bin, gain });
                }
            }
        }
        best
    }
}

fn log_loss(margins: &[f64], labels: &[bool]) -> f64 {
    let eps = 1e-15;
    let total: f64 = margins
        .iter()
        .zip(labels)
        .map(|(&m, &y)| {
            let p = sigmoid(m).clamp(eps, 1.0 - eps);
            if y {
                -p.ln()
            } else {
                -(1.0 - p).ln()
            }
        })
        .sum();
    total / margins.len().max(1) as f64
}

/// Fraction of predictions equal to the truth
pub fn accuracy(predicted: &[bool], truth: &[bool]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let correct = predicted.iter().zip(truth).filter(|(p, t)| p == t).count();
    correct as f64 / truth.len() as f64
}

/// Area under the ROC curve via the rank-sum statistic, ties averaged.
/// Returns 0.5 when either class is absent.
pub fn roc_auc(scores: &[f64], truth: &[bool]) -> f64 {
    let positives = truth.iter().filter(|&&t| t).count();
    let negatives = truth.len() - positives;
    if positives == 0 || negatives == 0 {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut positive_rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // Ranks are 1-based; tied block i..=j shares the mean rank
        let mean_rank = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            if truth[k] {
                positive_rank_sum += mean_rank;
            }
        }
        i = j + 1;
    }

    let p = positives as f64;
    (positive_rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64)
}

/// Train a complete artifact from labeled records
pub fn train(data: &LabeledRecords, params: &BoostingParams, test_fraction: f64) -> Result<ArtifactFile> {
    if !(0.0..1.0).contains(&test_fraction) {
        bail!("test_fraction must be in [0, 1)");
    }

    let vocabularies = fit_vocabularies(data);
    for vocab in &vocabularies {
        debug!(field = vocab.field(), categories = vocab.len(), "Fitted vocabulary");
    }
    let numeric: Vec<String> = NUMERIC_FEATURES.iter().map(|s| s.to_string()).collect();
    let extractor = FeatureExtractor::new(numeric.clone(), vocabularies.clone())?;

    let rows: Vec<Vec<f32>> = data
        .records
        .iter()
        .map(|r| extractor.extract(r))
        .collect::<Result<_, _>>()
        .context("Training record does not match the feature schema")?;

    let (train_idx, test_idx) = stratified_split(&data.labels, test_fraction, params.seed);
    info!(
        train_rows = train_idx.len(),
        test_rows = test_idx.len(),
        positive_rate = data.positive_rate(),
        "Split dataset"
    );

    let train_rows: Vec<Vec<f32>> = train_idx.iter().map(|&i| rows[i].clone()).collect();
    let train_labels: Vec<bool> = train_idx.iter().map(|&i| data.labels[i]).collect();

    info!(trees = params.n_estimators, depth = params.max_depth, "Training");
    let (ensemble, gains) = GradientBooster::new(params.clone()).fit(&train_rows, &train_labels)?;

    // Evaluate on the held-out rows, or on the training rows when there are none
    let eval_idx = if test_idx.is_empty() { &train_idx } else { &test_idx };
    let scores: Vec<f64> = eval_idx.iter().map(|&i| ensemble.predict_proba(&rows[i])).collect();
    let predicted: Vec<bool> = scores
        .iter()
        .map(|&s| s > ensemble.decision_threshold())
        .collect();
    let truth: Vec<bool> = eval_idx.iter().map(|&i| data.labels[i]).collect();

    let accuracy = accuracy(&predicted, &truth);
    let auc = roc_auc(&scores, &truth);
    info!(accuracy = accuracy, auc = auc, "Evaluation complete");

    let total_gain: f64 = gains.iter().sum();
    let mut feature_importance: Vec<FeatureImportance> = extractor
        .feature_names()
        .into_iter()
        .zip(&gains)
        .map(|(name, &gain)| FeatureImportance {
            feature: name.to_string(),
            importance: if total_gain > 0.0 { gain / total_gain } else { 0.0 },
        })
        .collect();
    feature_importance.sort_by(|a, b| b.importance.total_cmp(&a.importance));

    Ok(ArtifactFile {
        format_version: ARTIFACT_FORMAT_VERSION,
        numeric_features: numeric,
        categorical_features: vocabularies,
        classifier: ClassifierSpec::TreeEnsemble(ensemble),
        report: TrainingReport {
            accuracy,
            auc,
            training_samples: data.len(),
            train_rows: train_idx.len(),
            test_rows: test_idx.len(),
            feature_importance,
            trained_at: Some(Utc::now()),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::artifact::ModelArtifact;
    use crate::models::inference::InferenceEngine;
    use std::io::Write;

    const GRADES: [&str; 4] = ["A1", "B2", "C3", "D1"];
    const EMPLOYMENT: [&str; 3] = ["Employed", "Self-employed", "Unemployed"];

    /// Paid back iff credit_score >= 620, everything else is noise
    fn synthetic(n: usize, seed: u64) -> LabeledRecords {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut data = LabeledRecords::default();
        for _ in 0..n {
            let credit_score = rng.gen_range(300..850) as f64;
            let record = FeatureRecord::new()
                .with_number("annual_income", rng.gen_range(20_000.0..150_000.0))
                .with_number("debt_to_income_ratio", rng.gen_range(0.0..0.6))
                .with_number("credit_score", credit_score)
                .with_number("loan_amount", rng.gen_range(1_000.0..40_000.0))
                .with_number("interest_rate", rng.gen_range(3.0..20.0))
                .with_text("gender", if rng.gen_bool(0.5) { "Male" } else { "Female" })
                .with_text("marital_status", if rng.gen_bool(0.5) { "Single" } else { "Married" })
                .with_text("education_level", "Bachelor's")
                .with_text("employment_status", EMPLOYMENT[rng.gen_range(0..EMPLOYMENT.len())])
                .with_text("loan_purpose", "Home")
                .with_text("grade_subgrade", GRADES[rng.gen_range(0..GRADES.len())]);
            data.records.push(record);
            data.labels.push(credit_score >= 620.0);
        }
        data
    }

    fn small_params() -> BoostingParams {
        BoostingParams {
            n_estimators: 25,
            max_depth: 3,
            learning_rate: 0.3,
            colsample_bytree: 1.0,
            ..BoostingParams::default()
        }
    }

    #[test]
    fn test_default_params() {
        let params = BoostingParams::default();
        assert_eq!(params.n_estimators, 800);
        assert_eq!(params.max_depth, 6);
        assert_eq!(params.learning_rate, 0.1);
        assert_eq!(params.subsample, 0.8);
        assert_eq!(params.colsample_bytree, 0.8);
        assert_eq!(params.scale_pos_weight, 2.5);
        assert_eq!(params.seed, 42);
    }

    #[test]
    fn test_stratified_split_keeps_ratio() {
        let labels: Vec<bool> = (0..100).map(|i| i % 10 < 3).collect();
        let (train, test) = stratified_split(&labels, 0.2, 42);

        assert_eq!(train.len(), 80);
        assert_eq!(test.len(), 20);
        assert_eq!(test.iter().filter(|&&i| labels[i]).count(), 6);
        assert!(train.iter().all(|i| !test.contains(i)));

        let (train_again, test_again) = stratified_split(&labels, 0.2, 42);
        assert_eq!(train, train_again);
        assert_eq!(test, test_again);
    }

    #[test]
    fn test_quantile_cuts() {
        let mut values = vec![3.0f32, 1.0, 2.0, 2.0, 1.0];
        assert_eq!(quantile_cuts(&mut values, 256), vec![2.0, 3.0]);

        let mut many: Vec<f32> = (0..1000).map(|v| v as f32).collect();
        let cuts = quantile_cuts(&mut many, 10);
        assert_eq!(cuts.len(), 9);
        assert!(cuts.windows(2).all(|w| w[0] < w[1]));

        assert_eq!(bin_of(&[2.0, 3.0], 1.0), 0);
        assert_eq!(bin_of(&[2.0, 3.0], 2.0), 1);
        assert_eq!(bin_of(&[2.0, 3.0], 9.0), 2);
    }

    #[test]
    fn test_roc_auc() {
        assert_eq!(roc_auc(&[0.1, 0.4, 0.35, 0.8], &[false, false, true, true]), 0.75);
        assert_eq!(roc_auc(&[0.1, 0.9], &[false, true]), 1.0);
        assert_eq!(roc_auc(&[0.5, 0.5], &[false, true]), 0.5);
        assert_eq!(roc_auc(&[0.2, 0.3], &[true, true]), 0.5);
    }

    #[test]
    fn test_accuracy() {
        assert_eq!(accuracy(&[true, false, true, true], &[true, true, true, false]), 0.5);
    }

    #[test]
    fn test_vocabularies_are_sorted() {
        let data = synthetic(200, 7);
        let vocabs = fit_vocabularies(&data);

        assert_eq!(vocabs.len(), CATEGORICAL_FEATURES.len());
        let grades = vocabs.iter().find(|v| v.field() == "grade_subgrade").unwrap();
        assert_eq!(grades.values(), &GRADES);
        let employment = vocabs.iter().find(|v| v.field() == "employment_status").unwrap();
        assert_eq!(employment.values(), &EMPLOYMENT);
    }

    #[test]
    fn test_training_learns_separable_signal() {
        let data = synthetic(600, 1);
        let artifact = train(&data, &small_params(), 0.2).unwrap();

        assert!(artifact.report.accuracy > 0.9, "accuracy {}", artifact.report.accuracy);
        assert!(artifact.report.auc > 0.9, "auc {}", artifact.report.auc);
        assert_eq!(artifact.report.training_samples, 600);
        assert_eq!(artifact.report.train_rows + artifact.report.test_rows, 600);
        assert_eq!(
            artifact.report.top_feature().map(|f| f.feature.as_str()),
            Some("credit_score")
        );
    }

    #[test]
    fn test_trees_respect_max_depth() {
        let data = synthetic(300, 2);
        let artifact = train(&data, &small_params(), 0.2).unwrap();
        let ClassifierSpec::TreeEnsemble(ensemble) = &artifact.classifier else {
            panic!("expected a tree ensemble");
        };

        assert_eq!(ensemble.num_trees(), 25);
        assert_eq!(ensemble.num_features(), 11);
        assert!(ensemble.trees().iter().all(|t| t.depth() <= 3));
    }

    #[test]
    fn test_training_is_deterministic() {
        let data = synthetic(200, 3);
        let first = train(&data, &small_params(), 0.2).unwrap();
        let second = train(&data, &small_params(), 0.2).unwrap();

        let (ClassifierSpec::TreeEnsemble(a), ClassifierSpec::TreeEnsemble(b)) =
            (&first.classifier, &second.classifier)
        else {
            panic!("expected tree ensembles");
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_trained_artifact_round_trips_through_disk() {
        let data = synthetic(300, 4);
        let file = train(&data, &small_params(), 0.2).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loan_model.json");
        file.write(&path).unwrap();

        let engine = InferenceEngine::new(ModelArtifact::load(&path, 1).unwrap());
        let record = &data.records[0];
        let first = engine.score(record).unwrap();
        let second = engine.score(record).unwrap();
        assert_eq!(first, second);
        assert!((0.0..=1.0).contains(&first.probability));
    }

    #[test]
    fn test_load_training_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "id,annual_income,debt_to_income_ratio,credit_score,loan_amount,interest_rate,\
             gender,marital_status,education_level,employment_status,loan_purpose,grade_subgrade,loan_paid_back"
        )
        .unwrap();
        writeln!(file, "0,29367.99,0.084,736,2528.42,13.67,Female,Single,High School,Self-employed,Other,C3,1.0").unwrap();
        writeln!(file, "1,22108.02,0.166,636,4593.1,12.92,Male,Married,Master's,Employed,Debt consolidation,D3,0").unwrap();
        file.flush().unwrap();

        let data = load_training_csv(file.path()).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data.labels, vec![true, false]);
        assert_eq!(data.records[0].number("credit_score"), Some(736.0));
        assert_eq!(data.records[1].text("loan_purpose"), Some("Debt consolidation"));
    }

    #[test]
    fn test_load_training_csv_requires_label() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "annual_income,credit_score").unwrap();
        writeln!(file, "1000,700").unwrap();
        file.flush().unwrap();

        assert!(load_training_csv(file.path()).is_err());
    }
}
