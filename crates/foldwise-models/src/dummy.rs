//! Baseline estimator: training mean for regression, class prior for
//! classification.

use ndarray::{Array1, Array2, ArrayView2, Axis};

use foldwise_core::data::{ProblemType, Target};
use foldwise_core::traits::{Capabilities, Model, Predictions, Probabilities};

use crate::error::ModelError;
use crate::util::{check_rows, column_means, distinct, not_fitted};

#[derive(Debug, Clone)]
enum DummyFit {
    /// One mean per output; `single` records whether the target was 1-D.
    Means { means: Array1<f64>, single: bool },
    /// Class labels and their training frequencies.
    Prior { classes: Vec<f64>, prior: Array1<f64> },
    /// Positive rate per multilabel target.
    Rates(Array1<f64>),
}

/// Predicts a constant learned from the training target.
#[derive(Debug, Clone)]
pub struct DummyEstimator {
    problem_type: ProblemType,
    fitted: Option<DummyFit>,
}

impl DummyEstimator {
    pub fn new(problem_type: ProblemType) -> Self {
        Self {
            problem_type,
            fitted: None,
        }
    }
}

impl Model for DummyEstimator {
    fn name(&self) -> &str {
        "dummy"
    }

    fn fit(&mut self, x: ArrayView2<'_, f64>, y: &Target) -> anyhow::Result<()> {
        check_rows(self.name(), x, y)?;
        let fit = match (self.problem_type, y) {
            (ProblemType::Regression, Target::Single(y)) => DummyFit::Means {
                means: Array1::from_elem(1, y.mean().unwrap_or(0.0)),
                single: true,
            },
            (ProblemType::Regression, Target::Multi(y)) => DummyFit::Means {
                means: column_means(y.view()),
                single: false,
            },
            (ProblemType::Multilabel, Target::Multi(y)) => DummyFit::Rates(column_means(y.view())),
            (_, Target::Single(y)) => {
                let classes = distinct(y.view());
                let n = y.len() as f64;
                let prior = classes
                    .iter()
                    .map(|c| y.iter().filter(|v| *v == c).count() as f64 / n)
                    .collect();
                DummyFit::Prior { classes, prior }
            }
            (problem_type, Target::Multi(_)) => {
                return Err(ModelError::UnsupportedTarget {
                    model: self.name().into(),
                    reason: format!("multi-column targets for {problem_type}"),
                }
                .into())
            }
        };
        self.fitted = Some(fit);
        Ok(())
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> anyhow::Result<Predictions> {
        let n = x.nrows();
        match self.fitted.as_ref().ok_or_else(|| not_fitted(self.name()))? {
            DummyFit::Means { means, single: true } => {
                Ok(Predictions::Single(Array1::from_elem(n, means[0])))
            }
            DummyFit::Means { means, .. } => Ok(Predictions::MultiOutput(
                means.broadcast((n, means.len())).map(|b| b.to_owned()).ok_or_else(|| {
                    anyhow::anyhow!("cannot broadcast {} means to {n} rows", means.len())
                })?,
            )),
            DummyFit::Prior { classes, prior } => {
                let best = crate::util::argmax(prior.view());
                Ok(Predictions::Single(Array1::from_elem(n, classes[best])))
            }
            DummyFit::Rates(rates) => {
                let row = rates.mapv(|r| if r >= 0.5 { 1.0 } else { 0.0 });
                let mut out = Array2::zeros((n, rates.len()));
                out.axis_iter_mut(Axis(0)).for_each(|mut r| r.assign(&row));
                Ok(Predictions::MultiOutput(out))
            }
        }
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Option<anyhow::Result<Probabilities>> {
        let n = x.nrows();
        match self.fitted.as_ref()? {
            DummyFit::Means { .. } => None,
            DummyFit::Prior { prior, .. } => {
                let mut out = Array2::zeros((n, prior.len()));
                out.axis_iter_mut(Axis(0)).for_each(|mut r| r.assign(prior));
                Some(Ok(Probabilities::Classes(out)))
            }
            DummyFit::Rates(rates) => Some(Ok(Probabilities::PerTarget(
                rates
                    .iter()
                    .map(|&r| {
                        let mut p = Array2::zeros((n, 2));
                        p.column_mut(0).fill(1.0 - r);
                        p.column_mut(1).fill(r);
                        p
                    })
                    .collect(),
            ))),
        }
    }

    fn capabilities(&self) -> Capabilities {
        if self.problem_type.is_classification() {
            Capabilities::PROBABILITIES
        } else {
            Capabilities::empty()
        }
    }

    fn clone_unfitted(&self) -> Box<dyn Model> {
        Box::new(DummyEstimator::new(self.problem_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn x(n: usize) -> Array2<f64> {
        Array2::zeros((n, 2))
    }

    #[test]
    fn regression_predicts_training_mean() {
        let mut model = DummyEstimator::new(ProblemType::Regression);
        model.fit(x(4).view(), &Target::Single(array![1.0, 2.0, 3.0, 6.0])).unwrap();
        assert_eq!(
            model.predict(x(2).view()).unwrap(),
            Predictions::Single(array![3.0, 3.0])
        );
        assert!(model.predict_proba(x(2).view()).is_none());
    }

    #[test]
    fn classification_predicts_majority_with_prior() {
        let mut model = DummyEstimator::new(ProblemType::Categorical);
        model
            .fit(x(4).view(), &Target::Single(array![2.0, 0.0, 2.0, 1.0]))
            .unwrap();
        assert_eq!(
            model.predict(x(1).view()).unwrap(),
            Predictions::Single(array![2.0])
        );
        match model.predict_proba(x(1).view()).unwrap().unwrap() {
            Probabilities::Classes(p) => assert_eq!(p, array![[0.25, 0.25, 0.5]]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn multilabel_rates() {
        let mut model = DummyEstimator::new(ProblemType::Multilabel);
        model
            .fit(x(4).view(), &Target::Multi(array![[1.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 0.0]]))
            .unwrap();
        assert_eq!(
            model.predict(x(1).view()).unwrap(),
            Predictions::MultiOutput(array![[1.0, 0.0]])
        );
        match model.predict_proba(x(1).view()).unwrap().unwrap() {
            Probabilities::PerTarget(p) => assert_eq!(p[1], array![[0.75, 0.25]]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn predict_before_fit_fails() {
        let model = DummyEstimator::new(ProblemType::Regression);
        let err = model.predict(x(1).view()).unwrap_err();
        assert!(err.to_string().contains("not been fitted"));
    }
}
