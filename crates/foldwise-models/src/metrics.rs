//! Scoring functions. Every metric is oriented so that higher is better.
//!
//! Multi-output targets are scored column by column and averaged. Class
//! probabilities are read by column index, so class labels are expected to be
//! encoded as `0..k`.

use std::sync::Arc;

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use foldwise_core::data::{ProblemType, Target};
use foldwise_core::traits::{Metric, Model, Predictions, Probabilities};

use crate::error::ModelError;
use crate::util::{distinct, target_matrix};

fn prediction_matrix(p: Predictions) -> Array2<f64> {
    match p {
        Predictions::Single(p) => p.insert_axis(Axis(1)),
        Predictions::MultiOutput(p) => p,
    }
}

/// Truth and predictions as equally shaped matrices.
fn paired(model: &dyn Model, x: ArrayView2<'_, f64>, y: &Target) -> anyhow::Result<(Array2<f64>, Array2<f64>)> {
    let truth = target_matrix(y);
    let predicted = prediction_matrix(model.predict(x)?);
    anyhow::ensure!(
        truth.dim() == predicted.dim(),
        "predictions are {:?}, truth is {:?}",
        predicted.dim(),
        truth.dim()
    );
    Ok((truth, predicted))
}

fn column_average<F>(truth: &Array2<f64>, predicted: &Array2<f64>, score: F) -> f64
where
    F: Fn(ArrayView1<'_, f64>, ArrayView1<'_, f64>) -> f64,
{
    let n = truth.ncols().max(1) as f64;
    truth
        .axis_iter(Axis(1))
        .zip(predicted.axis_iter(Axis(1)))
        .map(|(t, p)| score(t, p))
        .sum::<f64>()
        / n
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// Area under the ROC curve by the rank-sum statistic, ties averaged.
/// `None` when only one class is present.
pub fn binary_auc(positive: &[bool], scores: &[f64]) -> Option<f64> {
    let n_pos = positive.iter().filter(|p| **p).count();
    let n_neg = positive.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // Ranks are 1-based; tied block i..=j shares their average.
        let rank = (i + j) as f64 / 2.0 + 1.0;
        rank_sum += order[i..=j].iter().filter(|&&k| positive[k]).count() as f64 * rank;
        i = j + 1;
    }
    let n_pos = n_pos as f64;
    Some((rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg as f64))
}

/// Coefficient of determination.
#[derive(Debug, Clone, Copy, Default)]
pub struct R2;

impl Metric for R2 {
    fn name(&self) -> &str {
        "r2"
    }

    fn score(&self, model: &dyn Model, x: ArrayView2<'_, f64>, y: &Target) -> anyhow::Result<f64> {
        let (truth, predicted) = paired(model, x, y)?;
        Ok(column_average(&truth, &predicted, |t, p| {
            let m = t.mean().unwrap_or(0.0);
            let ss_tot: f64 = t.iter().map(|v| (v - m).powi(2)).sum();
            let ss_res: f64 = t.iter().zip(p.iter()).map(|(a, b)| (a - b).powi(2)).sum();
            if ss_tot == 0.0 {
                if ss_res == 0.0 {
                    1.0
                } else {
                    0.0
                }
            } else {
                1.0 - ss_res / ss_tot
            }
        }))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NegMeanSquaredError;

impl Metric for NegMeanSquaredError {
    fn name(&self) -> &str {
        "neg_mean_squared_error"
    }

    fn score(&self, model: &dyn Model, x: ArrayView2<'_, f64>, y: &Target) -> anyhow::Result<f64> {
        let (truth, predicted) = paired(model, x, y)?;
        Ok(-column_average(&truth, &predicted, |t, p| {
            mean(t.iter().zip(p.iter()).map(|(a, b)| (a - b).powi(2)))
        }))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NegMeanAbsoluteError;

impl Metric for NegMeanAbsoluteError {
    fn name(&self) -> &str {
        "neg_mean_absolute_error"
    }

    fn score(&self, model: &dyn Model, x: ArrayView2<'_, f64>, y: &Target) -> anyhow::Result<f64> {
        let (truth, predicted) = paired(model, x, y)?;
        Ok(-column_average(&truth, &predicted, |t, p| {
            mean(t.iter().zip(p.iter()).map(|(a, b)| (a - b).abs()))
        }))
    }
}

/// Fraction of rows predicted exactly; for multilabel every label must match.
#[derive(Debug, Clone, Copy, Default)]
pub struct Accuracy;

impl Metric for Accuracy {
    fn name(&self) -> &str {
        "accuracy"
    }

    fn score(&self, model: &dyn Model, x: ArrayView2<'_, f64>, y: &Target) -> anyhow::Result<f64> {
        let (truth, predicted) = paired(model, x, y)?;
        Ok(mean(
            truth
                .axis_iter(Axis(0))
                .zip(predicted.axis_iter(Axis(0)))
                .map(|(t, p)| if t == p { 1.0 } else { 0.0 }),
        ))
    }
}

/// Mean per-class recall over the classes present in the truth.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalancedAccuracy;

impl Metric for BalancedAccuracy {
    fn name(&self) -> &str {
        "balanced_accuracy"
    }

    fn score(&self, model: &dyn Model, x: ArrayView2<'_, f64>, y: &Target) -> anyhow::Result<f64> {
        let (truth, predicted) = paired(model, x, y)?;
        Ok(column_average(&truth, &predicted, |t, p| {
            mean(distinct(t).into_iter().map(|class| {
                let (hit, total) = t
                    .iter()
                    .zip(p.iter())
                    .filter(|(a, _)| **a == class)
                    .fold((0usize, 0usize), |(h, n), (_, b)| (h + usize::from(*b == class), n + 1));
                hit as f64 / total as f64
            }))
        }))
    }
}

/// Unweighted mean of per-class F1 over classes seen in truth or predictions.
#[derive(Debug, Clone, Copy, Default)]
pub struct MacroF1;

impl Metric for MacroF1 {
    fn name(&self) -> &str {
        "macro_f1"
    }

    fn score(&self, model: &dyn Model, x: ArrayView2<'_, f64>, y: &Target) -> anyhow::Result<f64> {
        let (truth, predicted) = paired(model, x, y)?;
        let f1 = |t: ArrayView1<'_, f64>, p: ArrayView1<'_, f64>, class: f64| {
            let mut tp = 0.0;
            let mut fp = 0.0;
            let mut fn_ = 0.0;
            for (a, b) in t.iter().zip(p.iter()) {
                match (*a == class, *b == class) {
                    (true, true) => tp += 1.0,
                    (false, true) => fp += 1.0,
                    (true, false) => fn_ += 1.0,
                    (false, false) => {}
                }
            }
            let denom = 2.0 * tp + fp + fn_;
            if denom == 0.0 {
                0.0
            } else {
                2.0 * tp / denom
            }
        };
        if truth.ncols() > 1 {
            // Multilabel: F1 of the positive label, averaged over targets.
            return Ok(column_average(&truth, &predicted, |t, p| f1(t, p, 1.0)));
        }
        let t = truth.column(0);
        let p = predicted.column(0);
        let mut classes: Vec<f64> = t.iter().chain(p.iter()).copied().collect();
        classes.sort_by(|a, b| a.total_cmp(b));
        classes.dedup();
        Ok(mean(classes.into_iter().map(|c| f1(t, p, c))))
    }
}

/// ROC AUC. Binary uses the last probability column, categorical averages
/// one-vs-rest over the classes present, multilabel averages over targets.
#[derive(Debug, Clone, Copy, Default)]
pub struct RocAuc;

impl Metric for RocAuc {
    fn name(&self) -> &str {
        "roc_auc"
    }

    fn score(&self, model: &dyn Model, x: ArrayView2<'_, f64>, y: &Target) -> anyhow::Result<f64> {
        let probabilities = model
            .predict_proba(x)
            .ok_or_else(|| anyhow::anyhow!("roc_auc needs a model with probability output"))??;
        match (probabilities, y) {
            (Probabilities::Classes(p), Target::Single(y)) if p.ncols() == 2 => {
                let positive: Vec<bool> = y.iter().map(|v| *v == 1.0).collect();
                Ok(binary_auc(&positive, &p.column(1).to_vec()).unwrap_or_else(undefined_auc))
            }
            (Probabilities::Classes(p), Target::Single(y)) => {
                let aucs: Vec<f64> = distinct(y.view())
                    .into_iter()
                    .filter_map(|class| {
                        let column = class as usize;
                        if class < 0.0 || column >= p.ncols() {
                            return None;
                        }
                        let positive: Vec<bool> = y.iter().map(|v| *v == class).collect();
                        binary_auc(&positive, &p.column(column).to_vec())
                    })
                    .collect();
                if aucs.is_empty() {
                    return Ok(undefined_auc());
                }
                Ok(mean(aucs.into_iter()))
            }
            (Probabilities::PerTarget(targets), Target::Multi(y)) => {
                anyhow::ensure!(
                    targets.len() == y.ncols(),
                    "{} probability targets for {} truth columns",
                    targets.len(),
                    y.ncols()
                );
                let aucs: Vec<f64> = targets
                    .iter()
                    .zip(y.axis_iter(Axis(1)))
                    .filter_map(|(p, t)| {
                        let positive: Vec<bool> = t.iter().map(|v| *v == 1.0).collect();
                        binary_auc(&positive, &p.column(1).to_vec())
                    })
                    .collect();
                if aucs.is_empty() {
                    return Ok(undefined_auc());
                }
                Ok(mean(aucs.into_iter()))
            }
            _ => anyhow::bail!("probability layout does not match the target"),
        }
    }
}

/// A fold whose truth holds a single class has no ROC curve. The score is
/// NaN so the remaining folds still run.
fn undefined_auc() -> f64 {
    tracing::warn!("roc_auc is undefined when the truth holds one class, scoring NaN");
    f64::NAN
}

/// Problem types a metric is defined for.
fn applies(name: &str, problem_type: ProblemType) -> bool {
    use ProblemType::*;
    match name {
        "r2" | "neg_mean_squared_error" | "neg_mean_absolute_error" => problem_type == Regression,
        "accuracy" | "macro_f1" | "roc_auc" => problem_type.is_classification(),
        "balanced_accuracy" => matches!(problem_type, Binary | Categorical),
        _ => false,
    }
}

/// Default metric per problem type.
pub fn default_metric(problem_type: ProblemType) -> &'static str {
    match problem_type {
        ProblemType::Regression => "r2",
        ProblemType::Binary | ProblemType::Multilabel => "roc_auc",
        ProblemType::Categorical => "balanced_accuracy",
    }
}

/// Look up a metric by name. `"default"` picks the problem type's default.
pub fn metric_by_name(name: &str, problem_type: ProblemType) -> Result<Arc<dyn Metric>, ModelError> {
    let name = if name == "default" {
        default_metric(problem_type)
    } else {
        name
    };
    let metric: Arc<dyn Metric> = match name {
        "r2" => Arc::new(R2),
        "neg_mean_squared_error" | "neg_mse" => Arc::new(NegMeanSquaredError),
        "neg_mean_absolute_error" | "neg_mae" => Arc::new(NegMeanAbsoluteError),
        "accuracy" => Arc::new(Accuracy),
        "balanced_accuracy" => Arc::new(BalancedAccuracy),
        "macro_f1" => Arc::new(MacroF1),
        "roc_auc" => Arc::new(RocAuc),
        other => return Err(ModelError::UnknownMetric(other.to_string())),
    };
    if !applies(metric.name(), problem_type) {
        return Err(ModelError::MetricNotApplicable {
            metric: metric.name().to_string(),
            problem_type,
        });
    }
    Ok(metric)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    /// Returns fixed outputs regardless of input.
    struct Fixed {
        predictions: Predictions,
        probabilities: Option<Probabilities>,
    }

    impl Model for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn fit(&mut self, _x: ArrayView2<'_, f64>, _y: &Target) -> anyhow::Result<()> {
            Ok(())
        }
        fn predict(&self, _x: ArrayView2<'_, f64>) -> anyhow::Result<Predictions> {
            Ok(self.predictions.clone())
        }
        fn predict_proba(&self, _x: ArrayView2<'_, f64>) -> Option<anyhow::Result<Probabilities>> {
            self.probabilities.clone().map(Ok)
        }
        fn clone_unfitted(&self) -> Box<dyn Model> {
            unimplemented!()
        }
    }

    fn fixed(p: Array1<f64>) -> Fixed {
        Fixed {
            predictions: Predictions::Single(p),
            probabilities: None,
        }
    }

    fn x(n: usize) -> Array2<f64> {
        Array2::zeros((n, 1))
    }

    #[test]
    fn r2_perfect_and_mean() {
        let y = Target::Single(array![1.0, 2.0, 3.0]);
        assert_eq!(R2.score(&fixed(array![1.0, 2.0, 3.0]), x(3).view(), &y).unwrap(), 1.0);
        assert_eq!(R2.score(&fixed(array![2.0, 2.0, 2.0]), x(3).view(), &y).unwrap(), 0.0);
    }

    #[test]
    fn errors_are_negated() {
        let y = Target::Single(array![0.0, 0.0]);
        let model = fixed(array![1.0, 3.0]);
        assert_eq!(NegMeanSquaredError.score(&model, x(2).view(), &y).unwrap(), -5.0);
        assert_eq!(NegMeanAbsoluteError.score(&model, x(2).view(), &y).unwrap(), -2.0);
    }

    #[test]
    fn multi_output_scores_average_columns() {
        let y = Target::Multi(array![[0.0, 0.0], [0.0, 0.0]]);
        let model = Fixed {
            predictions: Predictions::MultiOutput(array![[1.0, 2.0], [1.0, 2.0]]),
            probabilities: None,
        };
        assert_eq!(NegMeanSquaredError.score(&model, x(2).view(), &y).unwrap(), -2.5);
    }

    #[test]
    fn balanced_accuracy_weights_classes_equally() {
        let y = Target::Single(array![0.0, 0.0, 0.0, 1.0]);
        let model = fixed(array![0.0, 0.0, 0.0, 0.0]);
        assert_eq!(Accuracy.score(&model, x(4).view(), &y).unwrap(), 0.75);
        assert_eq!(BalancedAccuracy.score(&model, x(4).view(), &y).unwrap(), 0.5);
    }

    #[test]
    fn macro_f1_over_seen_classes() {
        let y = Target::Single(array![0.0, 1.0]);
        let model = fixed(array![0.0, 0.0]);
        // Class 0: tp 1, fp 1 -> 2/3. Class 1: 0.
        let f1 = MacroF1.score(&model, x(2).view(), &y).unwrap();
        assert!((f1 - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn auc_handles_ties_and_one_class() {
        assert_eq!(binary_auc(&[false, true], &[0.1, 0.9]), Some(1.0));
        assert_eq!(binary_auc(&[false, true], &[0.5, 0.5]), Some(0.5));
        assert_eq!(binary_auc(&[true, true], &[0.1, 0.9]), None);
    }

    #[test]
    fn roc_auc_binary_reads_positive_column() {
        let y = Target::Single(array![0.0, 1.0, 0.0, 1.0]);
        let model = Fixed {
            predictions: Predictions::Single(array![0.0, 1.0, 0.0, 1.0]),
            probabilities: Some(Probabilities::Classes(array![
                [0.9, 0.1],
                [0.2, 0.8],
                [0.6, 0.4],
                [0.7, 0.3]
            ])),
        };
        assert_eq!(RocAuc.score(&model, x(4).view(), &y).unwrap(), 0.75);
    }

    #[test]
    fn roc_auc_requires_probabilities() {
        let y = Target::Single(array![0.0, 1.0]);
        assert!(RocAuc.score(&fixed(array![0.0, 1.0]), x(2).view(), &y).is_err());
    }

    #[test]
    fn roc_auc_single_class_truth_is_nan() {
        let y = Target::Single(array![0.0, 0.0, 0.0]);
        let model = Fixed {
            predictions: Predictions::Single(array![0.0, 0.0, 1.0]),
            probabilities: Some(Probabilities::Classes(array![[0.9, 0.1], [0.8, 0.2], [0.3, 0.7]])),
        };
        assert!(RocAuc.score(&model, x(3).view(), &y).unwrap().is_nan());

        let multilabel = Target::Multi(array![[1.0, 0.0], [1.0, 0.0]]);
        let model = Fixed {
            predictions: Predictions::MultiOutput(array![[1.0, 0.0], [1.0, 0.0]]),
            probabilities: Some(Probabilities::PerTarget(vec![
                array![[0.2, 0.8], [0.1, 0.9]],
                array![[0.7, 0.3], [0.6, 0.4]],
            ])),
        };
        assert!(RocAuc.score(&model, x(2).view(), &multilabel).unwrap().is_nan());
    }

    #[test]
    fn registry_checks_problem_type() {
        assert_eq!(metric_by_name("default", ProblemType::Regression).unwrap().name(), "r2");
        assert_eq!(
            metric_by_name("default", ProblemType::Categorical).unwrap().name(),
            "balanced_accuracy"
        );
        assert_eq!(
            metric_by_name("neg_mse", ProblemType::Regression).unwrap().name(),
            "neg_mean_squared_error"
        );
        assert!(matches!(
            metric_by_name("r2", ProblemType::Binary),
            Err(ModelError::MetricNotApplicable { .. })
        ));
        assert!(matches!(
            metric_by_name("nope", ProblemType::Binary),
            Err(ModelError::UnknownMetric(_))
        ));
    }
}
