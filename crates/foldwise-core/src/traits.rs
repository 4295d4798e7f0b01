//! Plugin contracts consumed by the evaluation engine.
//!
//! Models, metrics, importance methods, and pipeline builders are external
//! collaborators. The `foldwise-models` crate ships reference
//! implementations; anything implementing these traits plugs in the same way.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use ndarray::{Array1, Array2, ArrayD, ArrayView2, Axis, Ix2, Ix3};
use serde::{Deserialize, Serialize};

use crate::data::{FoldIndex, GroupLabels, ProblemType, Target};
use crate::error::EvalError;
use crate::split::IndexSplit;

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

bitflags! {
    /// Structure a fitted model exposes. Read once per fold after fit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u8 {
        /// `Model::coefficients` returns per-feature linear coefficients.
        const LINEAR_COEFFICIENTS = 1;
        /// `Model::feature_weights` returns tree-based feature weights.
        const TREE_FEATURE_WEIGHTS = 1 << 1;
        /// `Model::predict_proba` is supported.
        const PROBABILITIES = 1 << 2;
        /// The model is a search wrapper exposing best-found parameters.
        const SEARCHED = 1 << 3;
    }
}

// ---------------------------------------------------------------------------
// Prediction shapes
// ---------------------------------------------------------------------------

/// Point predictions.
#[derive(Debug, Clone, PartialEq)]
pub enum Predictions {
    /// One prediction per row.
    Single(Array1<f64>),
    /// One column per output (multi-target regression, multilabel).
    MultiOutput(Array2<f64>),
}

impl Predictions {
    pub fn len(&self) -> usize {
        match self {
            Predictions::Single(p) => p.len(),
            Predictions::MultiOutput(p) => p.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert a dynamically shaped array of rank 1 or 2.
    pub fn from_dyn(raw: ArrayD<f64>) -> Result<Self, EvalError> {
        match raw.ndim() {
            1 => Ok(Predictions::Single(
                raw.into_dimensionality()
                    .map_err(|e| EvalError::ShapeMismatch(e.to_string()))?,
            )),
            2 => Ok(Predictions::MultiOutput(
                raw.into_dimensionality::<Ix2>()
                    .map_err(|e| EvalError::ShapeMismatch(e.to_string()))?,
            )),
            rank => Err(EvalError::ShapeMismatch(format!(
                "predictions must be 1-D or 2-D, got rank {rank}"
            ))),
        }
    }

    pub fn validate(&self, n_rows: usize) -> Result<(), EvalError> {
        if self.len() != n_rows {
            return Err(EvalError::ShapeMismatch(format!(
                "expected {n_rows} predictions, got {}",
                self.len()
            )));
        }
        Ok(())
    }
}

/// Class probability output.
#[derive(Debug, Clone, PartialEq)]
pub enum Probabilities {
    /// Rows by classes.
    Classes(Array2<f64>),
    /// Multilabel: one rows-by-{negative, positive} matrix per target.
    PerTarget(Vec<Array2<f64>>),
}

impl Probabilities {
    /// Convert a dynamically shaped array. Rank 2 is rows by classes, rank 3
    /// is targets by rows by classes; any other rank is a shape mismatch.
    pub fn from_dyn(raw: ArrayD<f64>) -> Result<Self, EvalError> {
        match raw.ndim() {
            2 => Ok(Probabilities::Classes(
                raw.into_dimensionality::<Ix2>()
                    .map_err(|e| EvalError::ShapeMismatch(e.to_string()))?,
            )),
            3 => {
                let cube = raw
                    .into_dimensionality::<Ix3>()
                    .map_err(|e| EvalError::ShapeMismatch(e.to_string()))?;
                Ok(Probabilities::PerTarget(
                    cube.axis_iter(Axis(0)).map(|m| m.to_owned()).collect(),
                ))
            }
            rank => Err(EvalError::ShapeMismatch(format!(
                "probabilities must be 2-D or 3-D, got rank {rank}"
            ))),
        }
    }

    pub fn validate(&self, n_rows: usize) -> Result<(), EvalError> {
        match self {
            Probabilities::Classes(p) => {
                if p.nrows() != n_rows {
                    return Err(EvalError::ShapeMismatch(format!(
                        "expected {n_rows} probability rows, got {}",
                        p.nrows()
                    )));
                }
            }
            Probabilities::PerTarget(targets) => {
                if targets.is_empty() {
                    return Err(EvalError::ShapeMismatch(
                        "multilabel probabilities hold no targets".into(),
                    ));
                }
                for (i, p) in targets.iter().enumerate() {
                    if p.nrows() != n_rows || p.ncols() < 2 {
                        return Err(EvalError::ShapeMismatch(format!(
                            "target {i} probabilities are {}x{}, expected {n_rows}x2",
                            p.nrows(),
                            p.ncols()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Model trait
// ---------------------------------------------------------------------------

/// A fittable pipeline: optional preprocessing followed by an estimator.
pub trait Model: Send + Sync {
    /// Short name for logs and reports.
    fn name(&self) -> &str;

    /// Fit on a feature matrix and target.
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: &Target) -> anyhow::Result<()>;

    /// Point predictions for every row.
    fn predict(&self, x: ArrayView2<'_, f64>) -> anyhow::Result<Predictions>;

    /// Class probabilities, or `None` when the model has no probabilistic output.
    fn predict_proba(&self, _x: ArrayView2<'_, f64>) -> Option<anyhow::Result<Probabilities>> {
        None
    }

    /// Structure exposed by the fitted model.
    fn capabilities(&self) -> Capabilities {
        Capabilities::empty()
    }

    /// Per-feature linear coefficients, when `LINEAR_COEFFICIENTS` is set.
    fn coefficients(&self) -> Option<Array1<f64>> {
        None
    }

    /// Per-feature tree weights, when `TREE_FEATURE_WEIGHTS` is set.
    fn feature_weights(&self) -> Option<Array1<f64>> {
        None
    }

    /// Features as the final estimator sees them after preprocessing.
    fn transform(&self, x: ArrayView2<'_, f64>) -> anyhow::Result<Array2<f64>> {
        Ok(x.to_owned())
    }

    /// Current hyper-parameters.
    fn params(&self) -> BTreeMap<String, f64> {
        BTreeMap::new()
    }

    /// Set one hyper-parameter before fitting.
    fn set_param(&mut self, name: &str, _value: f64) -> anyhow::Result<()> {
        anyhow::bail!("model '{}' has no parameter '{name}'", self.name())
    }

    /// Parameters chosen by a search wrapper, once fitted.
    fn best_params(&self) -> Option<BTreeMap<String, f64>> {
        None
    }

    /// A fresh, unfitted copy with the same parameters.
    fn clone_unfitted(&self) -> Box<dyn Model>;
}

impl fmt::Debug for dyn Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name())
            .field("params", &self.params())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Metric trait
// ---------------------------------------------------------------------------

/// A scoring function `(fitted model, X, y) -> scalar`. Higher is better.
pub trait Metric: Send + Sync {
    fn name(&self) -> &str;

    fn score(&self, model: &dyn Model, x: ArrayView2<'_, f64>, y: &Target) -> anyhow::Result<f64>;
}

impl fmt::Debug for dyn Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metric").field("name", &self.name()).finish()
    }
}

// ---------------------------------------------------------------------------
// Feature importance trait
// ---------------------------------------------------------------------------

/// Importance value per feature key.
pub type FeatureScores = BTreeMap<String, f64>;

/// Which rows a local importance snapshot is computed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportanceSplit {
    Train,
    #[default]
    Test,
    /// Train and test rows concatenated.
    All,
}

impl fmt::Display for ImportanceSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportanceSplit::Train => write!(f, "train"),
            ImportanceSplit::Test => write!(f, "test"),
            ImportanceSplit::All => write!(f, "all"),
        }
    }
}

/// Global snapshots are computed once per run from the training rows;
/// local snapshots once per fold on the configured split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportanceScope {
    Global,
    Local,
}

impl fmt::Display for ImportanceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportanceScope::Global => write!(f, "global"),
            ImportanceScope::Local => write!(f, "local"),
        }
    }
}

/// Everything an importance method gets for one snapshot.
pub struct ImportanceInput<'a> {
    pub scope: ImportanceScope,
    pub model: &'a dyn Model,
    pub feature_keys: &'a [String],
    pub x: ArrayView2<'a, f64>,
    pub y: &'a Target,
    /// Processed training features, only when the method asked for them.
    pub x_train: Option<ArrayView2<'a, f64>>,
    pub scorer: &'a dyn Metric,
    pub fold: FoldIndex,
    pub seed: u64,
    pub capabilities: Capabilities,
}

/// A feature importance method.
pub trait ImportanceMethod: Send + Sync {
    fn name(&self) -> &str;

    /// Rows local snapshots are computed on.
    fn split(&self) -> ImportanceSplit;

    /// Whether the method needs processed training features given the
    /// fitted model's capabilities.
    fn needs_training_data(&self, capabilities: Capabilities) -> bool;

    /// Whether this method produces a global snapshot at all.
    fn has_global(&self) -> bool {
        true
    }

    fn compute(&self, input: ImportanceInput<'_>) -> anyhow::Result<FeatureScores>;
}

// ---------------------------------------------------------------------------
// Pipeline builder trait
// ---------------------------------------------------------------------------

/// Which estimator to build, and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Estimator name (e.g. "ridge", "logistic").
    pub name: String,
    /// Estimator hyper-parameters.
    #[serde(default)]
    pub params: BTreeMap<String, f64>,
    /// Standardize features before the estimator.
    #[serde(default)]
    pub scale: bool,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
            scale: false,
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: f64) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    pub fn scaled(mut self) -> Self {
        self.scale = true;
        self
    }
}

/// Candidate values per hyper-parameter.
pub type ParamGrid = BTreeMap<String, Vec<f64>>;

/// Inner resampling over the training rows of one outer fold.
#[derive(Debug, Clone)]
pub enum InnerResampling {
    KFold { n_splits: usize },
    Groups(GroupLabels),
}

/// Hyper-parameter search around the base pipeline.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub grid: ParamGrid,
    pub inner: InnerResampling,
    /// Search metric; the engine's primary metric when unset.
    pub metric: Option<Arc<dyn Metric>>,
}

/// Builds fittable pipelines for a feature scope.
pub trait PipelineBuilder: Send + Sync {
    fn build(
        &self,
        feature_keys: &[String],
        spec: &ModelSpec,
        problem_type: ProblemType,
    ) -> anyhow::Result<Box<dyn Model>>;

    /// Wrap a pipeline in a search that is fitted over the given inner splits.
    fn wrap_with_search(
        &self,
        pipeline: Box<dyn Model>,
        grid: &ParamGrid,
        inner: Vec<IndexSplit>,
        scorer: Arc<dyn Metric>,
    ) -> anyhow::Result<Box<dyn Model>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, IxDyn};

    #[test]
    fn probabilities_accept_rank_two_and_three() {
        let two = ArrayD::from_shape_vec(IxDyn(&[2, 3]), vec![0.2, 0.3, 0.5, 0.1, 0.1, 0.8])
            .unwrap();
        assert!(matches!(
            Probabilities::from_dyn(two).unwrap(),
            Probabilities::Classes(p) if p.ncols() == 3
        ));

        let three = ArrayD::from_shape_vec(IxDyn(&[2, 4, 2]), vec![0.5; 16]).unwrap();
        match Probabilities::from_dyn(three).unwrap() {
            Probabilities::PerTarget(targets) => {
                assert_eq!(targets.len(), 2);
                assert_eq!(targets[0].dim(), (4, 2));
            }
            other => panic!("expected per-target probabilities, got {other:?}"),
        }
    }

    #[test]
    fn probabilities_reject_other_ranks() {
        let one = ArrayD::from_shape_vec(IxDyn(&[3]), vec![0.1, 0.2, 0.3]).unwrap();
        assert!(matches!(
            Probabilities::from_dyn(one),
            Err(EvalError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn predictions_accept_rank_one_and_two() {
        let one = ArrayD::from_shape_vec(IxDyn(&[3]), vec![1.0, 0.0, 1.0]).unwrap();
        assert_eq!(
            Predictions::from_dyn(one).unwrap(),
            Predictions::Single(array![1.0, 0.0, 1.0])
        );

        let two = ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![0.5, 1.5, 2.5, 3.5]).unwrap();
        let multi = Predictions::from_dyn(two).unwrap();
        assert_eq!(multi, Predictions::MultiOutput(array![[0.5, 1.5], [2.5, 3.5]]));
        assert_eq!(multi.len(), 2);

        let three = ArrayD::from_shape_vec(IxDyn(&[1, 1, 2]), vec![0.0, 1.0]).unwrap();
        assert!(matches!(
            Predictions::from_dyn(three),
            Err(EvalError::ShapeMismatch(msg)) if msg.contains("rank 3")
        ));
    }

    #[test]
    fn validate_checks_row_counts() {
        let p = Probabilities::Classes(array![[0.4, 0.6], [0.9, 0.1]]);
        assert!(p.validate(2).is_ok());
        assert!(p.validate(3).is_err());

        let multilabel = Probabilities::PerTarget(vec![array![[0.4], [0.9]]]);
        assert!(multilabel.validate(2).is_err());

        assert!(Predictions::Single(array![1.0, 2.0]).validate(2).is_ok());
    }

    #[test]
    fn model_spec_builder() {
        let spec = ModelSpec::new("ridge").with_param("alpha", 0.5).scaled();
        assert_eq!(spec.params["alpha"], 0.5);
        assert!(spec.scale);
        let parsed: ModelSpec = serde_json::from_str(r#"{"name":"ridge"}"#).unwrap();
        assert!(!parsed.scale);
        assert!(parsed.params.is_empty());
    }

    #[test]
    fn capabilities_combine() {
        let caps = Capabilities::LINEAR_COEFFICIENTS | Capabilities::PROBABILITIES;
        assert!(caps.contains(Capabilities::LINEAR_COEFFICIENTS));
        assert!(!caps.contains(Capabilities::TREE_FEATURE_WEIGHTS));
        assert_eq!(Capabilities::default(), Capabilities::empty());
    }
}
