//! Feature importance aggregation.
//!
//! Each configured method moves through
//! `Uninitialized -> GlobalReady -> LocalAccumulating -> Finalized`.
//! Global snapshots are taken once per run from the training rows of the
//! first fold. Local snapshots are taken every fold and averaged per repeat
//! by a [`LocalReducer`], which holds at most one repeat's snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;

use ndarray::{concatenate, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::data::{FoldIndex, Target};
use crate::error::EvalError;
use crate::traits::{
    Capabilities, FeatureScores, ImportanceInput, ImportanceMethod, ImportanceScope,
    ImportanceSplit, Metric, Model,
};

/// Which part of a run an importance record summarizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImportanceWindow {
    /// Computed once from the whole training set of the run.
    Run,
    /// Mean of the local snapshots of one repeat (1-based).
    Repeat { repeat: usize },
    /// The single snapshot of a held-out test evaluation.
    Final,
    /// Mean of the per-repeat averages.
    Aggregate,
}

/// A finalized importance result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportanceRecord {
    pub method: String,
    pub scope: ImportanceScope,
    pub split: ImportanceSplit,
    pub window: ImportanceWindow,
    #[serde(deserialize_with = "crate::nullable::feature_scores")]
    pub scores: FeatureScores,
}

/// Mean of each feature over the snapshots that contain it.
pub fn average(snapshots: &[FeatureScores]) -> FeatureScores {
    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for snapshot in snapshots {
        for (feature, value) in snapshot {
            let entry = sums.entry(feature.clone()).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
    }
    sums.into_iter()
        .map(|(feature, (sum, count))| (feature, sum / count as f64))
        .collect()
}

/// Accumulate-then-average reducer for local snapshots.
#[derive(Debug, Clone, Default)]
pub struct LocalReducer {
    pending: Vec<FeatureScores>,
    repeats: Vec<FeatureScores>,
}

/// Output of [`LocalReducer::finalize`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReducedImportance {
    pub per_repeat: Vec<FeatureScores>,
    pub aggregate: Option<FeatureScores>,
}

impl LocalReducer {
    pub fn accumulate(&mut self, scores: FeatureScores) {
        self.pending.push(scores);
    }

    /// Snapshots waiting for their repeat to close.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Average the pending snapshots into one repeat record and clear them.
    /// Returns `None` when nothing is pending.
    pub fn close_repeat(&mut self) -> Option<FeatureScores> {
        if self.pending.is_empty() {
            return None;
        }
        let averaged = average(&self.pending);
        self.pending.clear();
        self.repeats.push(averaged.clone());
        Some(averaged)
    }

    /// Close any partial repeat and average across repeats.
    pub fn finalize(mut self) -> ReducedImportance {
        self.close_repeat();
        let aggregate = (!self.repeats.is_empty()).then(|| average(&self.repeats));
        ReducedImportance {
            per_repeat: self.repeats,
            aggregate,
        }
    }
}

/// Lifecycle of one importance method within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodState {
    Uninitialized,
    GlobalReady,
    LocalAccumulating,
    Finalized,
}

/// What the engine hands the aggregator for one fold.
pub struct FoldImportanceData<'a> {
    pub fold: FoldIndex,
    pub seed: u64,
    pub model: &'a dyn Model,
    pub capabilities: Capabilities,
    pub feature_keys: &'a [String],
    pub x_train: ArrayView2<'a, f64>,
    pub y_train: &'a Target,
    pub x_test: ArrayView2<'a, f64>,
    pub y_test: &'a Target,
    /// Processed training features, present when any method asked for them.
    pub processed_train: Option<ArrayView2<'a, f64>>,
    pub scorer: &'a dyn Metric,
}

struct MethodSlot {
    method: Arc<dyn ImportanceMethod>,
    state: MethodState,
    local: LocalReducer,
    records: Vec<ImportanceRecord>,
    repeats_closed: usize,
}

impl MethodSlot {
    fn record(
        &mut self,
        scope: ImportanceScope,
        split: ImportanceSplit,
        window: ImportanceWindow,
        scores: FeatureScores,
    ) {
        self.records.push(ImportanceRecord {
            method: self.method.name().to_string(),
            scope,
            split,
            window,
            scores,
        });
    }
}

/// Drives every configured importance method through one run.
pub struct FeatureImportanceAggregator {
    slots: Vec<MethodSlot>,
    /// Folds per repeat; `None` for a single held-out evaluation.
    n_splits: Option<usize>,
}

impl FeatureImportanceAggregator {
    pub fn new(methods: &[Arc<dyn ImportanceMethod>], n_splits: Option<usize>) -> Self {
        let slots = methods
            .iter()
            .map(|method| MethodSlot {
                method: Arc::clone(method),
                state: MethodState::Uninitialized,
                local: LocalReducer::default(),
                records: Vec::new(),
                repeats_closed: 0,
            })
            .collect();
        Self { slots, n_splits }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// State of each method, in configuration order.
    pub fn states(&self) -> Vec<(String, MethodState)> {
        self.slots
            .iter()
            .map(|slot| (slot.method.name().to_string(), slot.state))
            .collect()
    }

    /// Whether any method wants processed training features for a model
    /// with these capabilities.
    pub fn needs_training_data(&self, capabilities: Capabilities) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.method.needs_training_data(capabilities))
    }

    /// Compute this fold's snapshots for every method.
    pub fn observe_fold(&mut self, data: &FoldImportanceData<'_>) -> Result<(), EvalError> {
        let combined: Option<(Array2<f64>, Target)> = if self
            .slots
            .iter()
            .any(|slot| slot.method.split() == ImportanceSplit::All)
        {
            let x = concatenate(Axis(0), &[data.x_train.view(), data.x_test.view()])
                .map_err(|e| EvalError::ShapeMismatch(e.to_string()))?;
            Some((x, data.y_train.concat(data.y_test)?))
        } else {
            None
        };

        for slot in &mut self.slots {
            let method = Arc::clone(&slot.method);
            let x_train = if method.needs_training_data(data.capabilities) {
                data.processed_train.as_ref().map(|v| v.view())
            } else {
                None
            };
            let wrap = |source: anyhow::Error| EvalError::Importance {
                method: method.name().to_string(),
                fold: data.fold,
                source: source.into(),
            };

            if data.fold.is_first() && method.has_global() {
                let scores = method
                    .compute(ImportanceInput {
                        scope: ImportanceScope::Global,
                        model: data.model,
                        feature_keys: data.feature_keys,
                        x: data.x_train.view(),
                        y: data.y_train,
                        x_train,
                        scorer: data.scorer,
                        fold: data.fold,
                        seed: data.seed,
                        capabilities: data.capabilities,
                    })
                    .map_err(wrap)?;
                slot.record(
                    ImportanceScope::Global,
                    ImportanceSplit::Train,
                    ImportanceWindow::Run,
                    scores,
                );
                slot.state = MethodState::GlobalReady;
            }

            let split = method.split();
            let (x, y): (ArrayView2<'_, f64>, &Target) = match split {
                ImportanceSplit::Train => (data.x_train.view(), data.y_train),
                ImportanceSplit::Test => (data.x_test.view(), data.y_test),
                ImportanceSplit::All => {
                    let (x, y) = combined.as_ref().ok_or_else(|| {
                        EvalError::ShapeMismatch("combined train and test rows missing".into())
                    })?;
                    (x.view(), y)
                }
            };

            let scores = method
                .compute(ImportanceInput {
                    scope: ImportanceScope::Local,
                    model: data.model,
                    feature_keys: data.feature_keys,
                    x,
                    y,
                    x_train,
                    scorer: data.scorer,
                    fold: data.fold,
                    seed: data.seed,
                    capabilities: data.capabilities,
                })
                .map_err(wrap)?;

            match self.n_splits {
                None => {
                    slot.record(ImportanceScope::Local, split, ImportanceWindow::Final, scores);
                    slot.state = MethodState::Finalized;
                }
                Some(n_splits) => {
                    slot.local.accumulate(scores);
                    slot.state = MethodState::LocalAccumulating;
                    if data.fold.closes_repeat(n_splits) {
                        if let Some(averaged) = slot.local.close_repeat() {
                            slot.repeats_closed += 1;
                            let repeat = slot.repeats_closed;
                            slot.record(
                                ImportanceScope::Local,
                                split,
                                ImportanceWindow::Repeat { repeat },
                                averaged,
                            );
                            tracing::debug!(
                                method = %method.name(),
                                repeat,
                                "averaged local importances"
                            );
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Close partial repeats, add the cross-repeat aggregate, and return all records.
    pub fn finalize(self) -> Vec<ImportanceRecord> {
        let mut records = Vec::new();
        for mut slot in self.slots {
            if self.n_splits.is_some() {
                let split = slot.method.split();
                let reducer = std::mem::take(&mut slot.local);
                let reduced = reducer.finalize();
                for scores in reduced.per_repeat.into_iter().skip(slot.repeats_closed) {
                    slot.repeats_closed += 1;
                    let repeat = slot.repeats_closed;
                    slot.record(
                        ImportanceScope::Local,
                        split,
                        ImportanceWindow::Repeat { repeat },
                        scores,
                    );
                }
                if let Some(aggregate) = reduced.aggregate {
                    slot.record(
                        ImportanceScope::Local,
                        split,
                        ImportanceWindow::Aggregate,
                        aggregate,
                    );
                }
            }
            slot.state = MethodState::Finalized;
            records.append(&mut slot.records);
        }
        records
    }
}
