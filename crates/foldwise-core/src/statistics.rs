//! Summary statistics over fold score arrays.

use ndarray::{ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Statistics for one metric across all folds of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    /// Metric name.
    pub metric: String,
    /// Mean over every fold; zero when there are no folds. NaN when any
    /// fold's score is undefined.
    #[serde(deserialize_with = "crate::nullable::score")]
    pub mean: f64,
    /// Population standard deviation over every fold.
    #[serde(deserialize_with = "crate::nullable::score")]
    pub std: f64,
    /// Standard deviation of the per-repeat means; zero with a single repeat.
    #[serde(deserialize_with = "crate::nullable::score")]
    pub repeat_std: f64,
    #[serde(deserialize_with = "crate::nullable::score")]
    pub min: f64,
    #[serde(deserialize_with = "crate::nullable::score")]
    pub max: f64,
    /// Number of folds summarized.
    pub n_folds: usize,
}

fn mean(values: ArrayView1<'_, f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sum() / values.len() as f64
}

fn std(values: ArrayView1<'_, f64>) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Summarize a `(n_folds, n_metrics)` score array whose rows run repeat by
/// repeat, `n_splits` folds each.
pub fn summarize(
    metric_names: &[String],
    scores: ArrayView2<'_, f64>,
    n_splits: usize,
) -> Vec<ScoreSummary> {
    metric_names
        .iter()
        .zip(scores.axis_iter(Axis(1)))
        .map(|(name, column)| {
            let repeat_means: Vec<f64> = if n_splits == 0 {
                Vec::new()
            } else {
                column
                    .to_vec()
                    .chunks(n_splits)
                    .map(|chunk| chunk.iter().sum::<f64>() / chunk.len() as f64)
                    .collect()
            };
            let repeat_means = ndarray::Array1::from(repeat_means);
            let (min, max) = if column.is_empty() {
                (0.0, 0.0)
            } else {
                (
                    column.iter().copied().fold(f64::INFINITY, f64::min),
                    column.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                )
            };

            ScoreSummary {
                metric: name.clone(),
                mean: mean(column),
                std: std(column),
                repeat_std: std(repeat_means.view()),
                min,
                max,
                n_folds: column.len(),
            }
        })
        .collect()
}

/// Summary of a single held-out evaluation: one value per metric.
pub fn summarize_single(metric_names: &[String], scores: ArrayView1<'_, f64>) -> Vec<ScoreSummary> {
    metric_names
        .iter()
        .zip(scores.iter())
        .map(|(name, &value)| ScoreSummary {
            metric: name.clone(),
            mean: value,
            std: 0.0,
            repeat_std: 0.0,
            min: value,
            max: value,
            n_folds: 1,
        })
        .collect()
}
