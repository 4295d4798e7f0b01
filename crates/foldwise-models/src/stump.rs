//! Depth-one decision tree.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, ArrayView2, Axis};

use foldwise_core::data::{ProblemType, Target};
use foldwise_core::traits::{Capabilities, Model, Predictions, Probabilities};

use crate::error::ModelError;
use crate::util::{argmax, check_rows, distinct, not_fitted, target_matrix};

#[derive(Debug, Clone)]
struct StumpFit {
    /// `(feature, threshold)`; `None` when no split improved on a single leaf.
    split: Option<(usize, f64)>,
    /// Class distribution for classification, per-output means otherwise.
    left: Array1<f64>,
    right: Array1<f64>,
    classes: Vec<f64>,
    n_features: usize,
    single: bool,
}

impl StumpFit {
    fn leaf(&self, row: ndarray::ArrayView1<'_, f64>) -> &Array1<f64> {
        match self.split {
            Some((feature, threshold)) if row[feature] > threshold => &self.right,
            _ => &self.left,
        }
    }
}

/// Split cost of a node with per-output sums `s`, squared sums `q` and `n` rows.
/// Weighted Gini for one-hot rows, sum of squared errors for real rows.
fn cost(s: &Array1<f64>, q: &Array1<f64>, n: f64) -> f64 {
    q.sum() - s.iter().map(|v| v * v).sum::<f64>() / n
}

/// A single threshold split on one feature.
#[derive(Debug, Clone)]
pub struct DecisionStump {
    problem_type: ProblemType,
    min_samples_leaf: usize,
    fitted: Option<StumpFit>,
}

impl DecisionStump {
    pub fn new(problem_type: ProblemType) -> Self {
        Self {
            problem_type,
            min_samples_leaf: 1,
            fitted: None,
        }
    }

    fn classifies(&self) -> bool {
        matches!(self.problem_type, ProblemType::Binary | ProblemType::Categorical)
    }

    /// Rows as leaf vectors: one-hot for classification, the target otherwise.
    fn leaf_rows(&self, y: &Target) -> anyhow::Result<(Array2<f64>, Vec<f64>)> {
        match y {
            Target::Single(y) if self.classifies() => {
                let classes = distinct(y.view());
                let mut rows = Array2::zeros((y.len(), classes.len()));
                for (i, v) in y.iter().enumerate() {
                    if let Some(k) = classes.iter().position(|c| c == v) {
                        rows[[i, k]] = 1.0;
                    }
                }
                Ok((rows, classes))
            }
            Target::Multi(_) if self.classifies() => Err(ModelError::UnsupportedTarget {
                model: self.name().into(),
                reason: format!("multi-column targets for {}", self.problem_type),
            }
            .into()),
            _ => Ok((target_matrix(y), Vec::new())),
        }
    }
}

impl Model for DecisionStump {
    fn name(&self) -> &str {
        "stump"
    }

    fn fit(&mut self, x: ArrayView2<'_, f64>, y: &Target) -> anyhow::Result<()> {
        check_rows(self.name(), x, y)?;
        let (rows, classes) = self.leaf_rows(y)?;
        let n = x.nrows();
        let total = rows.sum_axis(Axis(0));
        let total_sq = rows.mapv(|v| v * v).sum_axis(Axis(0));
        let mut best_cost = cost(&total, &total_sq, n as f64);
        let mut best: Option<(usize, f64, usize)> = None;
        let mut order: Vec<usize> = (0..n).collect();

        for (feature, column) in x.axis_iter(Axis(1)).enumerate() {
            order.sort_by(|&a, &b| column[a].total_cmp(&column[b]));
            let mut s = Array1::<f64>::zeros(rows.ncols());
            let mut q = Array1::<f64>::zeros(rows.ncols());
            for (taken, pair) in order.windows(2).enumerate() {
                let row = rows.row(pair[0]);
                s += &row;
                q += &row.mapv(|v| v * v);
                let n_left = taken + 1;
                let (here, next) = (column[pair[0]], column[pair[1]]);
                if here == next || n_left < self.min_samples_leaf || n - n_left < self.min_samples_leaf {
                    continue;
                }
                let split_cost = cost(&s, &q, n_left as f64)
                    + cost(&(&total - &s), &(&total_sq - &q), (n - n_left) as f64);
                if split_cost < best_cost - 1e-12 {
                    best_cost = split_cost;
                    best = Some((feature, (here + next) / 2.0, n_left));
                }
            }
        }

        let mean_of = |mask: &dyn Fn(usize) -> bool| -> Array1<f64> {
            let picked: Vec<usize> = (0..n).filter(|&i| mask(i)).collect();
            if picked.is_empty() {
                return Array1::zeros(rows.ncols());
            }
            rows.select(Axis(0), &picked).sum_axis(Axis(0)) / picked.len() as f64
        };
        let split = best.map(|(feature, threshold, _)| (feature, threshold));
        let (left, right) = match split {
            Some((feature, threshold)) => (
                mean_of(&|i| x[[i, feature]] <= threshold),
                mean_of(&|i| x[[i, feature]] > threshold),
            ),
            None => {
                let all = mean_of(&|_| true);
                (all.clone(), all)
            }
        };
        tracing::trace!(?split, cost = best_cost, "stump fitted");
        self.fitted = Some(StumpFit {
            split,
            left,
            right,
            classes,
            n_features: x.ncols(),
            single: matches!(y, Target::Single(_)),
        });
        Ok(())
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> anyhow::Result<Predictions> {
        let fit = self.fitted.as_ref().ok_or_else(|| not_fitted(self.name()))?;
        if self.classifies() {
            return Ok(Predictions::Single(
                x.axis_iter(Axis(0))
                    .map(|row| fit.classes[argmax(fit.leaf(row).view())])
                    .collect(),
            ));
        }
        if fit.single {
            return Ok(Predictions::Single(
                x.axis_iter(Axis(0)).map(|row| fit.leaf(row)[0]).collect(),
            ));
        }
        let threshold = self.problem_type == ProblemType::Multilabel;
        let mut out = Array2::zeros((x.nrows(), fit.left.len()));
        for (mut target, row) in out.axis_iter_mut(Axis(0)).zip(x.axis_iter(Axis(0))) {
            let leaf = fit.leaf(row);
            if threshold {
                target.assign(&leaf.mapv(|r| if r >= 0.5 { 1.0 } else { 0.0 }));
            } else {
                target.assign(leaf);
            }
        }
        Ok(Predictions::MultiOutput(out))
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Option<anyhow::Result<Probabilities>> {
        if !self.problem_type.is_classification() {
            return None;
        }
        let fit = match self.fitted.as_ref() {
            Some(fit) => fit,
            None => return Some(Err(not_fitted(self.name()))),
        };
        let n = x.nrows();
        let width = fit.left.len();
        let mut leaves = Array2::zeros((n, width));
        for (mut out, row) in leaves.axis_iter_mut(Axis(0)).zip(x.axis_iter(Axis(0))) {
            out.assign(fit.leaf(row));
        }
        if self.classifies() {
            return Some(Ok(Probabilities::Classes(leaves)));
        }
        Some(Ok(Probabilities::PerTarget(
            leaves
                .axis_iter(Axis(1))
                .map(|rate| {
                    let mut p = Array2::zeros((n, 2));
                    p.column_mut(1).assign(&rate);
                    p.column_mut(0).assign(&rate.mapv(|r| 1.0 - r));
                    p
                })
                .collect(),
        )))
    }

    fn capabilities(&self) -> Capabilities {
        if self.problem_type.is_classification() {
            Capabilities::TREE_FEATURE_WEIGHTS | Capabilities::PROBABILITIES
        } else {
            Capabilities::TREE_FEATURE_WEIGHTS
        }
    }

    fn feature_weights(&self) -> Option<Array1<f64>> {
        let fit = self.fitted.as_ref()?;
        let mut weights = Array1::zeros(fit.n_features);
        if let Some((feature, _)) = fit.split {
            weights[feature] = 1.0;
        }
        Some(weights)
    }

    fn params(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([("min_samples_leaf".to_string(), self.min_samples_leaf as f64)])
    }

    fn set_param(&mut self, name: &str, value: f64) -> anyhow::Result<()> {
        match name {
            "min_samples_leaf" if value.is_finite() && value >= 1.0 => {
                self.min_samples_leaf = value.round() as usize;
                Ok(())
            }
            "min_samples_leaf" => Err(ModelError::InvalidParameter {
                model: self.name().into(),
                name: name.into(),
                value,
            }
            .into()),
            _ => Err(ModelError::UnknownParameter {
                model: self.name().into(),
                name: name.into(),
            }
            .into()),
        }
    }

    fn clone_unfitted(&self) -> Box<dyn Model> {
        Box::new(DecisionStump {
            fitted: None,
            ..self.clone()
        })
    }
}
