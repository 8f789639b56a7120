//! Model training and evaluation.
//!
//! Categorical targets get a one-vs-rest logistic classifier, numeric targets
//! a linear regressor; both are trained by full-batch gradient descent so the
//! result is a pure function of the dataset, the seed, and the
//! hyperparameters. Training failures are terminal for the retry loop:
//! retrying the same broken configuration cannot succeed.

use ndarray::{Array1, Array2};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::dataset::{ColumnType, Dataset};
use crate::intent::MetricKind;

use super::features::build_matrix;

/// Minimum usable rows (after dropping missing targets) to attempt training.
const MIN_ROWS: usize = 4;

/// Errors that end the training stage (and with it the retry loop).
#[derive(Debug, Error)]
pub enum TrainingError {
    /// The target column does not exist.
    #[error("Target column '{0}' not found in dataset")]
    MissingTarget(String),

    /// The target has fewer than two distinct classes.
    #[error("Target column '{column}' is degenerate: a single distinct class")]
    DegenerateTarget { column: String },

    /// Not enough rows with a non-missing target.
    #[error("Too few usable rows for training: {rows} (need at least {required})")]
    TooFewRows { rows: usize, required: usize },

    /// Every feature column was skipped.
    #[error("No usable feature columns for training")]
    NoUsableFeatures,

    /// Split ratio outside (0, 1).
    #[error("Invalid train split ratio {0}; must be within (0, 1)")]
    InvalidSplitRatio(f64),
}

/// Parameters for one training attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainParams {
    /// Target column name.
    pub target: String,
    /// Requested metric; defaulted from the target type when absent.
    pub metric: Option<MetricKind>,
    /// Train fraction of the seeded shuffle split.
    pub split_ratio: f64,
    /// Seed for the shuffle split.
    pub seed: u64,
    /// Gradient-descent learning rate.
    pub learning_rate: f64,
    /// Gradient-descent epochs.
    pub epochs: u32,
}

impl TrainParams {
    /// Creates parameters for a target with library defaults.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            metric: None,
            split_ratio: 0.8,
            seed: 42,
            learning_rate: 0.1,
            epochs: 200,
        }
    }

    /// Sets the requested metric.
    pub fn with_metric(mut self, metric: MetricKind) -> Self {
        self.metric = Some(metric);
        self
    }

    /// Sets the split ratio.
    pub fn with_split_ratio(mut self, ratio: f64) -> Self {
        self.split_ratio = ratio;
        self
    }

    /// Sets the seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the learning rate.
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Sets the epoch count.
    pub fn with_epochs(mut self, epochs: u32) -> Self {
        self.epochs = epochs;
        self
    }
}

/// Result of one training attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResult {
    /// Model family trained ("logistic_regression" or "linear_regression").
    pub model_family: String,
    /// Target column.
    pub target: String,
    /// Primary metric kind.
    pub metric: MetricKind,
    /// Primary metric value (higher is better).
    pub metric_value: f64,
    /// All evaluated metrics.
    pub metrics: BTreeMap<String, f64>,
    /// Class labels, classification only.
    pub classes: Option<Vec<String>>,
    /// Confusion matrix over test rows, classification only;
    /// `confusion[actual][predicted]`.
    pub confusion: Option<Vec<Vec<u64>>>,
    /// Mean absolute weight per feature, descending.
    pub feature_importances: Vec<(String, f64)>,
    /// Rows in the train split.
    pub train_rows: usize,
    /// Rows in the test split.
    pub test_rows: usize,
    /// Seed used for the split.
    pub seed: u64,
    /// Learning rate used.
    pub learning_rate: f64,
    /// Epochs used.
    pub epochs: u32,
}

/// Trains and evaluates a model.
///
/// Deterministic for fixed dataset, parameters and seed.
pub fn train(dataset: &Dataset, params: &TrainParams) -> Result<ModelResult, TrainingError> {
    if !(params.split_ratio > 0.0 && params.split_ratio < 1.0) {
        return Err(TrainingError::InvalidSplitRatio(params.split_ratio));
    }

    let target = dataset
        .column(&params.target)
        .ok_or_else(|| TrainingError::MissingTarget(params.target.clone()))?;

    // Rows with a non-missing target.
    let rows: Vec<usize> = target
        .cells
        .iter()
        .enumerate()
        .filter_map(|(idx, cell)| cell.is_some().then_some(idx))
        .collect();

    if rows.len() < MIN_ROWS {
        return Err(TrainingError::TooFewRows {
            rows: rows.len(),
            required: MIN_ROWS,
        });
    }

    let features = build_matrix(dataset, Some(&params.target), &rows);
    if features.names.is_empty() {
        return Err(TrainingError::NoUsableFeatures);
    }

    // Seeded shuffle split over positions into `rows`.
    let mut positions: Vec<usize> = (0..rows.len()).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
    positions.shuffle(&mut rng);

    let n_train = ((rows.len() as f64 * params.split_ratio) as usize).clamp(1, rows.len() - 1);
    let (train_pos, test_pos) = positions.split_at(n_train);

    let design = with_bias(&features.matrix);
    let train_x = select_rows(&design, train_pos);
    let test_x = select_rows(&design, test_pos);

    match target.ty {
        ColumnType::Numeric => train_regressor(
            dataset, params, &features.names, &rows, train_pos, test_pos, &train_x, &test_x,
        ),
        ColumnType::Boolean | ColumnType::Categorical => train_classifier(
            dataset, params, &features.names, &rows, train_pos, test_pos, &train_x, &test_x,
        ),
    }
}

/// Appends a constant bias column.
fn with_bias(matrix: &Array2<f64>) -> Array2<f64> {
    let n = matrix.nrows();
    let d = matrix.ncols();
    let mut out = Array2::zeros((n, d + 1));
    for r in 0..n {
        for c in 0..d {
            out[[r, c]] = matrix[[r, c]];
        }
        out[[r, d]] = 1.0;
    }
    out
}

/// Gathers the given rows into a new matrix.
fn select_rows(matrix: &Array2<f64>, rows: &[usize]) -> Array2<f64> {
    let mut out = Array2::zeros((rows.len(), matrix.ncols()));
    for (i, &r) in rows.iter().enumerate() {
        for c in 0..matrix.ncols() {
            out[[i, c]] = matrix[[r, c]];
        }
    }
    out
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Full-batch gradient descent on the logistic loss.
fn fit_logistic(x: &Array2<f64>, y: &Array1<f64>, learning_rate: f64, epochs: u32) -> Array1<f64> {
    let n = x.nrows() as f64;
    let mut w: Array1<f64> = Array1::zeros(x.ncols());
    for _ in 0..epochs {
        let pred = x.dot(&w).mapv(sigmoid);
        let grad = x.t().dot(&(&pred - y)) / n;
        w = w - &grad * learning_rate;
    }
    w
}

/// Full-batch gradient descent on the squared loss.
fn fit_linear(x: &Array2<f64>, y: &Array1<f64>, learning_rate: f64, epochs: u32) -> Array1<f64> {
    let n = x.nrows() as f64;
    let mut w: Array1<f64> = Array1::zeros(x.ncols());
    for _ in 0..epochs {
        let pred = x.dot(&w);
        let grad = x.t().dot(&(&pred - y)) / n;
        w = w - &grad * learning_rate;
    }
    w
}

#[allow(clippy::too_many_arguments)]
fn train_classifier(
    dataset: &Dataset,
    params: &TrainParams,
    feature_names: &[String],
    rows: &[usize],
    train_pos: &[usize],
    test_pos: &[usize],
    train_x: &Array2<f64>,
    test_x: &Array2<f64>,
) -> Result<ModelResult, TrainingError> {
    let target = dataset
        .column(&params.target)
        .expect("target checked by caller");

    let labels: Vec<&str> = rows
        .iter()
        .map(|&r| target.cells[r].as_deref().expect("rows have targets"))
        .collect();

    let mut classes: Vec<String> = Vec::new();
    for label in &labels {
        if !classes.iter().any(|c| c == label) {
            classes.push((*label).to_string());
        }
    }

    if classes.len() < 2 {
        return Err(TrainingError::DegenerateTarget {
            column: params.target.clone(),
        });
    }

    // One weight vector per class (one-vs-rest).
    let mut weights: Vec<Array1<f64>> = Vec::with_capacity(classes.len());
    for class in &classes {
        let y: Array1<f64> = train_pos
            .iter()
            .map(|&p| if labels[p] == class.as_str() { 1.0 } else { 0.0 })
            .collect();
        weights.push(fit_logistic(
            train_x,
            &y,
            params.learning_rate,
            params.epochs,
        ));
    }

    // Predict by highest class score.
    let predict = |x: &Array2<f64>| -> Vec<usize> {
        (0..x.nrows())
            .map(|r| {
                let row = x.row(r);
                let mut best = 0usize;
                let mut best_score = f64::NEG_INFINITY;
                for (c, w) in weights.iter().enumerate() {
                    let score = row.dot(w);
                    if score > best_score {
                        best_score = score;
                        best = c;
                    }
                }
                best
            })
            .collect()
    };

    let predicted = predict(test_x);
    let actual: Vec<usize> = test_pos
        .iter()
        .map(|&p| {
            classes
                .iter()
                .position(|c| c == labels[p])
                .expect("test labels drawn from classes")
        })
        .collect();

    let k = classes.len();
    let mut confusion = vec![vec![0u64; k]; k];
    for (a, p) in actual.iter().zip(predicted.iter()) {
        confusion[*a][*p] += 1;
    }

    let accuracy = if actual.is_empty() {
        0.0
    } else {
        actual
            .iter()
            .zip(predicted.iter())
            .filter(|(a, p)| a == p)
            .count() as f64
            / actual.len() as f64
    };
    let macro_f1 = macro_f1(&confusion);

    let mut metrics = BTreeMap::new();
    metrics.insert("accuracy".to_string(), accuracy);
    metrics.insert("macro_f1".to_string(), macro_f1);

    let metric = match params.metric {
        Some(MetricKind::F1) => MetricKind::F1,
        _ => MetricKind::Accuracy,
    };
    let metric_value = match metric {
        MetricKind::F1 => macro_f1,
        _ => accuracy,
    };

    Ok(ModelResult {
        model_family: "logistic_regression".to_string(),
        target: params.target.clone(),
        metric,
        metric_value,
        metrics,
        classes: Some(classes),
        confusion: Some(confusion),
        feature_importances: importances(feature_names, &weights),
        train_rows: train_pos.len(),
        test_rows: test_pos.len(),
        seed: params.seed,
        learning_rate: params.learning_rate,
        epochs: params.epochs,
    })
}

#[allow(clippy::too_many_arguments)]
fn train_regressor(
    dataset: &Dataset,
    params: &TrainParams,
    feature_names: &[String],
    rows: &[usize],
    train_pos: &[usize],
    test_pos: &[usize],
    train_x: &Array2<f64>,
    test_x: &Array2<f64>,
) -> Result<ModelResult, TrainingError> {
    let target = dataset
        .column(&params.target)
        .expect("target checked by caller");
    let cells = target.numeric_cells();

    let values: Vec<f64> = rows
        .iter()
        .map(|&r| cells[r].expect("rows have targets"))
        .collect();

    // Scale the target by train statistics for stable descent.
    let train_y_raw: Vec<f64> = train_pos.iter().map(|&p| values[p]).collect();
    let y_mean = super::eda::mean(&train_y_raw);
    let y_std = super::eda::std_dev(&train_y_raw);
    let scale = if y_std > 0.0 { y_std } else { 1.0 };

    let train_y: Array1<f64> = train_y_raw.iter().map(|v| (v - y_mean) / scale).collect();
    let w = fit_linear(train_x, &train_y, params.learning_rate, params.epochs);

    let predicted: Vec<f64> = (0..test_x.nrows())
        .map(|r| test_x.row(r).dot(&w) * scale + y_mean)
        .collect();
    let actual: Vec<f64> = test_pos.iter().map(|&p| values[p]).collect();

    let (r2, rmse) = regression_metrics(&actual, &predicted);

    let mut metrics = BTreeMap::new();
    metrics.insert("r2".to_string(), r2);
    metrics.insert("rmse".to_string(), rmse);

    Ok(ModelResult {
        model_family: "linear_regression".to_string(),
        target: params.target.clone(),
        metric: MetricKind::R2,
        metric_value: r2,
        metrics,
        classes: None,
        confusion: None,
        feature_importances: importances(feature_names, std::slice::from_ref(&w)),
        train_rows: train_pos.len(),
        test_rows: test_pos.len(),
        seed: params.seed,
        learning_rate: params.learning_rate,
        epochs: params.epochs,
    })
}

/// Macro-averaged F1 from a confusion matrix.
fn macro_f1(confusion: &[Vec<u64>]) -> f64 {
    let k = confusion.len();
    if k == 0 {
        return 0.0;
    }

    let mut sum = 0.0;
    for c in 0..k {
        let tp = confusion[c][c] as f64;
        let fp: f64 = (0..k).filter(|&r| r != c).map(|r| confusion[r][c] as f64).sum();
        let fn_: f64 = (0..k).filter(|&p| p != c).map(|p| confusion[c][p] as f64).sum();

        let precision = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
        let recall = if tp + fn_ > 0.0 { tp / (tp + fn_) } else { 0.0 };
        if precision + recall > 0.0 {
            sum += 2.0 * precision * recall / (precision + recall);
        }
    }
    sum / k as f64
}

/// r2 and rmse over test rows.
fn regression_metrics(actual: &[f64], predicted: &[f64]) -> (f64, f64) {
    if actual.is_empty() {
        return (0.0, 0.0);
    }

    let mean_actual = super::eda::mean(actual);
    let ss_res: f64 = actual
        .iter()
        .zip(predicted.iter())
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    let ss_tot: f64 = actual.iter().map(|a| (a - mean_actual).powi(2)).sum();

    let r2 = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };
    let rmse = (ss_res / actual.len() as f64).sqrt();
    (r2, rmse)
}

/// Mean absolute weight per feature (bias excluded), descending.
fn importances(names: &[String], weights: &[Array1<f64>]) -> Vec<(String, f64)> {
    let mut out: Vec<(String, f64)> = names
        .iter()
        .enumerate()
        .map(|(c, name)| {
            let total: f64 = weights.iter().map(|w| w[c].abs()).sum();
            (name.clone(), total / weights.len() as f64)
        })
        .collect();
    out.sort_by(|a, b| b.1.total_cmp(&a.1));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Linearly separable binary dataset: label is "hi" iff x > 0.
    fn separable() -> Dataset {
        let mut text = String::from("x,label\n");
        for i in 1..=20 {
            text.push_str(&format!("{},hi\n", i));
            text.push_str(&format!("-{},lo\n", i));
        }
        Dataset::from_csv_str(&text, "sep.csv").expect("dataset parses")
    }

    #[test]
    fn test_missing_target() {
        let ds = separable();
        let err = train(&ds, &TrainParams::new("absent")).unwrap_err();
        assert!(matches!(err, TrainingError::MissingTarget(name) if name == "absent"));
    }

    #[test]
    fn test_invalid_split_ratio() {
        let ds = separable();
        let err = train(&ds, &TrainParams::new("label").with_split_ratio(1.0)).unwrap_err();
        assert!(matches!(err, TrainingError::InvalidSplitRatio(_)));
    }

    #[test]
    fn test_degenerate_target() {
        let ds = Dataset::from_csv_str("x,label\n1,a\n2,a\n3,a\n4,a\n5,a\n", "d.csv").unwrap();
        let err = train(&ds, &TrainParams::new("label")).unwrap_err();
        assert!(matches!(err, TrainingError::DegenerateTarget { .. }));
    }

    #[test]
    fn test_too_few_rows() {
        let ds = Dataset::from_csv_str("x,label\n1,a\n2,b\n", "d.csv").unwrap();
        let err = train(&ds, &TrainParams::new("label")).unwrap_err();
        assert!(matches!(err, TrainingError::TooFewRows { rows: 2, .. }));
    }

    #[test]
    fn test_separable_classification_learns() {
        let ds = separable();
        let result = train(&ds, &TrainParams::new("label")).unwrap();
        assert_eq!(result.model_family, "logistic_regression");
        assert_eq!(result.metric, MetricKind::Accuracy);
        assert!(
            result.metric_value > 0.7,
            "expected separable data to learn, got {}",
            result.metric_value
        );
        assert_eq!(result.classes.as_ref().unwrap().len(), 2);
        assert_eq!(result.train_rows + result.test_rows, 40);
    }

    #[test]
    fn test_requested_f1_metric() {
        let ds = separable();
        let result = train(&ds, &TrainParams::new("label").with_metric(MetricKind::F1)).unwrap();
        assert_eq!(result.metric, MetricKind::F1);
        assert_eq!(result.metric_value, result.metrics["macro_f1"]);
    }

    #[test]
    fn test_deterministic_given_seed() {
        let ds = separable();
        let a = train(&ds, &TrainParams::new("label").with_seed(7)).unwrap();
        let b = train(&ds, &TrainParams::new("label").with_seed(7)).unwrap();
        assert_eq!(a.metric_value, b.metric_value);
        assert_eq!(a.confusion, b.confusion);
    }

    #[test]
    fn test_regression_on_linear_data() {
        let mut text = String::from("x,y\n");
        for i in 0..30 {
            text.push_str(&format!("{},{}\n", i, 2 * i + 1));
        }
        let ds = Dataset::from_csv_str(&text, "lin.csv").unwrap();
        let result = train(&ds, &TrainParams::new("y").with_epochs(500)).unwrap();
        assert_eq!(result.model_family, "linear_regression");
        assert_eq!(result.metric, MetricKind::R2);
        assert!(
            result.metric_value > 0.9,
            "expected near-perfect fit, got {}",
            result.metric_value
        );
    }

    #[test]
    fn test_missing_targets_dropped() {
        let mut text = String::from("x,label\n");
        for i in 1..=10 {
            text.push_str(&format!("{},hi\n", i));
            text.push_str(&format!("-{},lo\n", i));
        }
        text.push_str("99,\n");
        let ds = Dataset::from_csv_str(&text, "m.csv").unwrap();
        let result = train(&ds, &TrainParams::new("label")).unwrap();
        assert_eq!(result.train_rows + result.test_rows, 20);
    }

    #[test]
    fn test_macro_f1_perfect_prediction() {
        let confusion = vec![vec![5, 0], vec![0, 5]];
        assert!((macro_f1(&confusion) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_importances_sorted() {
        let names = vec!["a".to_string(), "b".to_string()];
        let w: Array1<f64> = vec![0.1, -2.0, 0.5].into();
        let imp = importances(&names, std::slice::from_ref(&w));
        assert_eq!(imp[0].0, "b");
        assert!((imp[0].1 - 2.0).abs() < 1e-9);
    }
}
