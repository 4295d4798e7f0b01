//! Linear estimators: closed-form ridge regression and gradient-descent
//! logistic regression.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use foldwise_core::data::{ProblemType, Target};
use foldwise_core::traits::{Capabilities, Model, Predictions, Probabilities};

use crate::error::ModelError;
use crate::util::{argmax, check_rows, column_means, distinct, not_fitted, sigmoid, target_matrix};

/// Solve `a * w = b` by Gaussian elimination with partial pivoting.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>, model: &str) -> Result<Array1<f64>, ModelError> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))
            .unwrap_or(col);
        if a[[pivot, col]].abs() < 1e-12 {
            return Err(ModelError::Singular(model.to_string()));
        }
        if pivot != col {
            for k in 0..n {
                a.swap([pivot, k], [col, k]);
            }
            b.swap(pivot, col);
        }
        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut w = Array1::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * w[k]).sum();
        w[row] = (b[row] - tail) / a[[row, row]];
    }
    Ok(w)
}

fn positive(model: &str, name: &str, value: f64) -> anyhow::Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ModelError::InvalidParameter {
            model: model.to_string(),
            name: name.to_string(),
            value,
        }
        .into())
    }
}

/// Mean absolute coefficient across outputs, or the raw row for one output.
fn collapse(weights: &Array2<f64>) -> Array1<f64> {
    if weights.nrows() == 1 {
        weights.row(0).to_owned()
    } else {
        weights
            .mapv(f64::abs)
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(weights.ncols()))
    }
}

// ---------------------------------------------------------------------------
// Ridge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct RidgeFit {
    /// One row of weights per output.
    weights: Array2<f64>,
    intercepts: Array1<f64>,
    single: bool,
}

/// L2-penalized least squares with an unpenalized intercept.
#[derive(Debug, Clone)]
pub struct RidgeRegression {
    alpha: f64,
    fitted: Option<RidgeFit>,
}

impl Default for RidgeRegression {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            fitted: None,
        }
    }
}

impl RidgeRegression {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            fitted: None,
        }
    }
}

impl Model for RidgeRegression {
    fn name(&self) -> &str {
        "ridge"
    }

    fn fit(&mut self, x: ArrayView2<'_, f64>, y: &Target) -> anyhow::Result<()> {
        check_rows(self.name(), x, y)?;
        let y_mat = target_matrix(y);
        let x_mean = column_means(x);
        let y_mean = column_means(y_mat.view());
        let xc = &x - &x_mean;
        let yc = &y_mat - &y_mean;

        let mut gram = xc.t().dot(&xc);
        gram.diag_mut().mapv_inplace(|d| d + self.alpha);

        let mut weights = Array2::zeros((y_mat.ncols(), x.ncols()));
        for (j, target) in yc.axis_iter(Axis(1)).enumerate() {
            let rhs = xc.t().dot(&target);
            let w = solve(gram.clone(), rhs, self.name())?;
            weights.row_mut(j).assign(&w);
        }
        let intercepts = &y_mean - &weights.dot(&x_mean);
        tracing::trace!(alpha = self.alpha, n = x.nrows(), "ridge fitted");
        self.fitted = Some(RidgeFit {
            weights,
            intercepts,
            single: matches!(y, Target::Single(_)),
        });
        Ok(())
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> anyhow::Result<Predictions> {
        let fit = self.fitted.as_ref().ok_or_else(|| not_fitted(self.name()))?;
        let out = x.dot(&fit.weights.t()) + &fit.intercepts;
        if fit.single {
            Ok(Predictions::Single(out.column(0).to_owned()))
        } else {
            Ok(Predictions::MultiOutput(out))
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::LINEAR_COEFFICIENTS
    }

    fn coefficients(&self) -> Option<Array1<f64>> {
        self.fitted.as_ref().map(|fit| collapse(&fit.weights))
    }

    fn params(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([("alpha".to_string(), self.alpha)])
    }

    fn set_param(&mut self, name: &str, value: f64) -> anyhow::Result<()> {
        match name {
            "alpha" => {
                if !(value.is_finite() && value >= 0.0) {
                    return Err(ModelError::InvalidParameter {
                        model: self.name().into(),
                        name: name.into(),
                        value,
                    }
                    .into());
                }
                self.alpha = value;
                Ok(())
            }
            _ => Err(ModelError::UnknownParameter {
                model: self.name().into(),
                name: name.into(),
            }
            .into()),
        }
    }

    fn clone_unfitted(&self) -> Box<dyn Model> {
        Box::new(RidgeRegression::new(self.alpha))
    }
}

// ---------------------------------------------------------------------------
// Logistic
// ---------------------------------------------------------------------------

/// Fit one binary logit on 0/1 labels. Returns weights and intercept.
fn fit_binary(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>, c: f64, max_iter: usize) -> (Array1<f64>, f64) {
    let n = x.nrows() as f64;
    let penalty = 1.0 / (c * n);
    // Step size from a bound on the Lipschitz constant of the mean log-loss.
    let lipschitz = x.iter().map(|v| v * v).sum::<f64>() / (4.0 * n) + 0.25 + penalty;
    let step = 1.0 / lipschitz;

    let mut w = Array1::<f64>::zeros(x.ncols());
    let mut b = 0.0;
    for _ in 0..max_iter {
        let z = x.dot(&w) + b;
        let residual = z.mapv(sigmoid) - y;
        let grad_w = x.t().dot(&residual) / n + &w * penalty;
        let grad_b = residual.sum() / n;
        w.scaled_add(-step, &grad_w);
        b -= step * grad_b;
        if grad_b.abs() < 1e-8 && grad_w.iter().all(|g| g.abs() < 1e-8) {
            break;
        }
    }
    (w, b)
}

#[derive(Debug, Clone)]
enum LogitFit {
    /// A single observed class.
    Constant { class: f64 },
    /// Two or more classes; one weight row for binary, one per class otherwise.
    Classes {
        classes: Vec<f64>,
        weights: Array2<f64>,
        intercepts: Array1<f64>,
    },
    /// Independent binary logit per multilabel target.
    PerTarget {
        weights: Array2<f64>,
        intercepts: Array1<f64>,
    },
}

/// Penalized logistic regression. One-vs-rest for more than two classes.
#[derive(Debug, Clone)]
pub struct LogisticRegression {
    problem_type: ProblemType,
    /// Inverse regularization strength.
    c: f64,
    max_iter: usize,
    fitted: Option<LogitFit>,
}

impl LogisticRegression {
    pub fn new(problem_type: ProblemType) -> Self {
        Self {
            problem_type,
            c: 1.0,
            max_iter: 500,
            fitted: None,
        }
    }

    fn scores(&self, x: ArrayView2<'_, f64>) -> anyhow::Result<(&LogitFit, Array2<f64>)> {
        let fit = self.fitted.as_ref().ok_or_else(|| not_fitted(self.name()))?;
        let z = match fit {
            LogitFit::Constant { .. } => Array2::zeros((x.nrows(), 0)),
            LogitFit::Classes {
                weights,
                intercepts,
                ..
            }
            | LogitFit::PerTarget {
                weights,
                intercepts,
            } => (x.dot(&weights.t()) + intercepts).mapv(sigmoid),
        };
        Ok((fit, z))
    }

    fn class_probabilities(fit: &LogitFit, z: Array2<f64>, n: usize) -> Array2<f64> {
        match fit {
            LogitFit::Constant { .. } => Array2::ones((n, 1)),
            LogitFit::Classes { classes, .. } if classes.len() == 2 => {
                let mut p = Array2::zeros((n, 2));
                p.column_mut(1).assign(&z.column(0));
                p.column_mut(0).assign(&z.column(0).mapv(|v| 1.0 - v));
                p
            }
            _ => {
                let mut p = z;
                for mut row in p.axis_iter_mut(Axis(0)) {
                    let total = row.sum();
                    if total > 0.0 {
                        row /= total;
                    }
                }
                p
            }
        }
    }
}

impl Model for LogisticRegression {
    fn name(&self) -> &str {
        "logistic"
    }

    fn fit(&mut self, x: ArrayView2<'_, f64>, y: &Target) -> anyhow::Result<()> {
        check_rows(self.name(), x, y)?;
        let fit = match y {
            Target::Multi(y) if self.problem_type == ProblemType::Multilabel => {
                let mut weights = Array2::zeros((y.ncols(), x.ncols()));
                let mut intercepts = Array1::zeros(y.ncols());
                for (j, column) in y.axis_iter(Axis(1)).enumerate() {
                    let (w, b) = fit_binary(x, column, self.c, self.max_iter);
                    weights.row_mut(j).assign(&w);
                    intercepts[j] = b;
                }
                LogitFit::PerTarget {
                    weights,
                    intercepts,
                }
            }
            Target::Multi(_) => {
                return Err(ModelError::UnsupportedTarget {
                    model: self.name().into(),
                    reason: format!("multi-column targets for {}", self.problem_type),
                }
                .into())
            }
            Target::Single(y) => {
                let classes = distinct(y.view());
                match classes.len() {
                    0 => return Err(ModelError::EmptyTrainingSet(self.name().into()).into()),
                    1 => LogitFit::Constant { class: classes[0] },
                    2 => {
                        let y01 = y.mapv(|v| if v == classes[1] { 1.0 } else { 0.0 });
                        let (w, b) = fit_binary(x, y01.view(), self.c, self.max_iter);
                        LogitFit::Classes {
                            classes,
                            weights: w.insert_axis(Axis(0)),
                            intercepts: Array1::from_elem(1, b),
                        }
                    }
                    k => {
                        let mut weights = Array2::zeros((k, x.ncols()));
                        let mut intercepts = Array1::zeros(k);
                        for (j, class) in classes.iter().enumerate() {
                            let y01 = y.mapv(|v| if v == *class { 1.0 } else { 0.0 });
                            let (w, b) = fit_binary(x, y01.view(), self.c, self.max_iter);
                            weights.row_mut(j).assign(&w);
                            intercepts[j] = b;
                        }
                        LogitFit::Classes {
                            classes,
                            weights,
                            intercepts,
                        }
                    }
                }
            }
        };
        self.fitted = Some(fit);
        Ok(())
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> anyhow::Result<Predictions> {
        let n = x.nrows();
        let (fit, z) = self.scores(x)?;
        match fit {
            LogitFit::Constant { class } => Ok(Predictions::Single(Array1::from_elem(n, *class))),
            LogitFit::PerTarget { .. } => {
                Ok(Predictions::MultiOutput(z.mapv(|p| if p >= 0.5 { 1.0 } else { 0.0 })))
            }
            LogitFit::Classes { classes, .. } => {
                let p = Self::class_probabilities(fit, z, n);
                Ok(Predictions::Single(
                    p.axis_iter(Axis(0))
                        .map(|row| classes[argmax(row)])
                        .collect(),
                ))
            }
        }
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Option<anyhow::Result<Probabilities>> {
        let n = x.nrows();
        let (fit, z) = match self.scores(x) {
            Ok(scored) => scored,
            Err(e) => return Some(Err(e)),
        };
        Some(Ok(match fit {
            LogitFit::PerTarget { .. } => Probabilities::PerTarget(
                z.axis_iter(Axis(1))
                    .map(|p| {
                        let mut out = Array2::zeros((n, 2));
                        out.column_mut(1).assign(&p);
                        out.column_mut(0).assign(&p.mapv(|v| 1.0 - v));
                        out
                    })
                    .collect(),
            ),
            _ => Probabilities::Classes(Self::class_probabilities(fit, z, n)),
        }))
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::LINEAR_COEFFICIENTS | Capabilities::PROBABILITIES
    }

    fn coefficients(&self) -> Option<Array1<f64>> {
        match self.fitted.as_ref()? {
            LogitFit::Constant { .. } => None,
            LogitFit::Classes { weights, .. } | LogitFit::PerTarget { weights, .. } => {
                Some(collapse(weights))
            }
        }
    }

    fn params(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("c".to_string(), self.c),
            ("max_iter".to_string(), self.max_iter as f64),
        ])
    }

    fn set_param(&mut self, name: &str, value: f64) -> anyhow::Result<()> {
        match name {
            "c" => self.c = positive(self.name(), name, value)?,
            "max_iter" => self.max_iter = positive(self.name(), name, value)?.round() as usize,
            _ => {
                return Err(ModelError::UnknownParameter {
                    model: self.name().into(),
                    name: name.into(),
                }
                .into())
            }
        }
        Ok(())
    }

    fn clone_unfitted(&self) -> Box<dyn Model> {
        Box::new(LogisticRegression {
            fitted: None,
            ..self.clone()
        })
    }
}
