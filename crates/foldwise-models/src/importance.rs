//! Feature importance methods.

use std::sync::Arc;

use ndarray::{Array1, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use foldwise_core::traits::{
    Capabilities, FeatureScores, ImportanceInput, ImportanceMethod, ImportanceSplit,
};

use crate::error::ModelError;

fn keyed(keys: &[String], values: &Array1<f64>) -> anyhow::Result<FeatureScores> {
    anyhow::ensure!(
        keys.len() == values.len(),
        "{} importance values for {} features",
        values.len(),
        keys.len()
    );
    Ok(keys.iter().cloned().zip(values.iter().copied()).collect())
}

// ---------------------------------------------------------------------------
// Permutation
// ---------------------------------------------------------------------------

/// Drop in score when one feature column is shuffled, averaged over
/// `n_repeats` shuffles. Works with any model.
#[derive(Debug, Clone)]
pub struct PermutationImportance {
    split: ImportanceSplit,
    n_repeats: usize,
}

impl PermutationImportance {
    pub fn new(split: ImportanceSplit, n_repeats: usize) -> Self {
        Self {
            split,
            n_repeats: n_repeats.max(1),
        }
    }
}

impl ImportanceMethod for PermutationImportance {
    fn name(&self) -> &str {
        "permutation"
    }

    fn split(&self) -> ImportanceSplit {
        self.split
    }

    fn needs_training_data(&self, _capabilities: Capabilities) -> bool {
        false
    }

    fn compute(&self, input: ImportanceInput<'_>) -> anyhow::Result<FeatureScores> {
        let baseline = input.scorer.score(input.model, input.x, input.y)?;
        let mut rng = ChaCha8Rng::seed_from_u64(input.seed);
        let mut shuffled = input.x.to_owned();
        let mut order: Vec<usize> = (0..input.x.nrows()).collect();
        let mut drops = Array1::zeros(input.x.ncols());

        for (j, original) in input.x.axis_iter(Axis(1)).enumerate() {
            let mut total = 0.0;
            for _ in 0..self.n_repeats {
                order.shuffle(&mut rng);
                shuffled
                    .column_mut(j)
                    .assign(&original.select(Axis(0), &order));
                total += baseline - input.scorer.score(input.model, shuffled.view(), input.y)?;
            }
            shuffled.column_mut(j).assign(&original);
            drops[j] = total / self.n_repeats as f64;
        }
        tracing::trace!(fold = %input.fold, scope = %input.scope, baseline, "permutation importance");
        keyed(input.feature_keys, &drops)
    }
}

// ---------------------------------------------------------------------------
// Coefficients
// ---------------------------------------------------------------------------

/// Absolute linear coefficients. When the processed training features are
/// supplied, each coefficient is multiplied by its column's standard deviation.
#[derive(Debug, Clone)]
pub struct CoefficientImportance {
    split: ImportanceSplit,
}

impl CoefficientImportance {
    pub fn new(split: ImportanceSplit) -> Self {
        Self { split }
    }
}

impl ImportanceMethod for CoefficientImportance {
    fn name(&self) -> &str {
        "coefficients"
    }

    fn split(&self) -> ImportanceSplit {
        self.split
    }

    fn needs_training_data(&self, capabilities: Capabilities) -> bool {
        capabilities.contains(Capabilities::LINEAR_COEFFICIENTS)
    }

    fn compute(&self, input: ImportanceInput<'_>) -> anyhow::Result<FeatureScores> {
        anyhow::ensure!(
            input.capabilities.contains(Capabilities::LINEAR_COEFFICIENTS),
            "model '{}' exposes no linear coefficients",
            input.model.name()
        );
        let coef = input
            .model
            .coefficients()
            .ok_or_else(|| anyhow::anyhow!("model '{}' returned no coefficients", input.model.name()))?;
        let mut scores = coef.mapv(f64::abs);
        if let Some(x_train) = input.x_train {
            anyhow::ensure!(
                x_train.ncols() == scores.len(),
                "{} coefficients for {} processed columns",
                scores.len(),
                x_train.ncols()
            );
            scores *= &x_train.std_axis(Axis(0), 0.0);
        }
        keyed(input.feature_keys, &scores)
    }
}

// ---------------------------------------------------------------------------
// Tree weights
// ---------------------------------------------------------------------------

/// Tree-based feature weights as reported by the model.
#[derive(Debug, Clone)]
pub struct TreeImportance {
    split: ImportanceSplit,
}

impl TreeImportance {
    pub fn new(split: ImportanceSplit) -> Self {
        Self { split }
    }
}

impl ImportanceMethod for TreeImportance {
    fn name(&self) -> &str {
        "tree"
    }

    fn split(&self) -> ImportanceSplit {
        self.split
    }

    fn needs_training_data(&self, _capabilities: Capabilities) -> bool {
        false
    }

    fn compute(&self, input: ImportanceInput<'_>) -> anyhow::Result<FeatureScores> {
        anyhow::ensure!(
            input.capabilities.contains(Capabilities::TREE_FEATURE_WEIGHTS),
            "model '{}' exposes no tree feature weights",
            input.model.name()
        );
        let weights = input
            .model
            .feature_weights()
            .ok_or_else(|| anyhow::anyhow!("model '{}' returned no feature weights", input.model.name()))?;
        keyed(input.feature_keys, &weights)
    }
}

/// Capability an importance method requires of the fitted model, if any.
pub fn required_capability(name: &str) -> Option<Capabilities> {
    match name {
        "coefficients" => Some(Capabilities::LINEAR_COEFFICIENTS),
        "tree" => Some(Capabilities::TREE_FEATURE_WEIGHTS),
        _ => None,
    }
}

/// Default shuffles per feature for permutation importance.
pub const DEFAULT_PERMUTATION_REPEATS: usize = 5;

/// Look up an importance method by name.
pub fn importance_by_name(
    name: &str,
    split: ImportanceSplit,
) -> Result<Arc<dyn ImportanceMethod>, ModelError> {
    match name {
        "permutation" => Ok(Arc::new(PermutationImportance::new(
            split,
            DEFAULT_PERMUTATION_REPEATS,
        ))),
        "coefficients" | "coef" => Ok(Arc::new(CoefficientImportance::new(split))),
        "tree" => Ok(Arc::new(TreeImportance::new(split))),
        other => Err(ModelError::UnknownImportance(other.to_string())),
    }
}
