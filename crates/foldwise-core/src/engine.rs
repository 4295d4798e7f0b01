//! Central evaluation engine.
//!
//! Drives the outer fold loop: slice rows, build and fit a (possibly
//! searched) pipeline, feed the importance aggregator, score, and record raw
//! predictions. Folds run sequentially in split order and any fold error
//! aborts the whole call.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::data::{DataTable, FoldIndex, SubjectId, Target, TargetSpec, Xy};
use crate::error::EvalError;
use crate::importance::{FeatureImportanceAggregator, FoldImportanceData, ImportanceRecord};
use crate::ledger::{class_labels, ClassLabels, PredictionRecord, RawPredictionLedger, Side};
use crate::scope::{ResolvedColumns, Scope, ScopeResolver};
use crate::split::{
    k_fold_indices, leave_one_group_out_indices, repeated_k_fold,
    repeated_leave_one_group_out, IndexSplit, SplitConfig,
};
use crate::traits::{
    Capabilities, ImportanceMethod, InnerResampling, Metric, Model, ModelSpec, PipelineBuilder,
    SearchConfig,
};

/// Configuration for the evaluation engine.
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Target key(s) and problem type.
    pub target: TargetSpec,
    /// Also score (and, for `test`, record) the training rows.
    pub compute_train_score: bool,
    /// Seed for splits, inner splits and randomized importance methods.
    pub random_state: u64,
    /// Canonical subject universe; every subject set is intersected with it.
    pub final_subjects: Option<HashSet<SubjectId>>,
    pub model: ModelSpec,
    pub search: Option<SearchConfig>,
}

impl EvaluatorConfig {
    pub fn new(target: TargetSpec, model: ModelSpec) -> Self {
        Self {
            target,
            compute_train_score: false,
            random_state: 0,
            final_subjects: None,
            model,
            search: None,
        }
    }
}

/// Summary of one evaluated fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldReport {
    pub fold: FoldIndex,
    pub n_train: usize,
    pub n_test: usize,
    /// Scores on the test rows, in metric order. NaN where a metric is undefined.
    #[serde(deserialize_with = "crate::nullable::scores")]
    pub test_scores: Vec<f64>,
    /// Scores on the training rows, when train scoring is on.
    #[serde(default, deserialize_with = "crate::nullable::optional_scores")]
    pub train_scores: Option<Vec<f64>>,
    /// Hyper-parameters chosen by the search wrapper.
    pub best_params: Option<BTreeMap<String, f64>>,
    /// Number of ledger recordings that fell back to the `{0, 1}` labeling.
    pub degenerate_class_fallbacks: usize,
    pub duration_ms: u64,
}

/// Progress hook invoked between folds, never during fold work.
pub trait FoldObserver: Send + Sync {
    fn on_run_start(&self, n_folds: usize, n_subjects: usize);
    fn on_fold_start(&self, fold: &FoldIndex);
    fn on_fold_complete(&self, report: &FoldReport);
    fn on_run_complete(&self, n_folds: usize, elapsed: Duration);
}

/// Observer that ignores every event.
pub struct NoopObserver;

impl FoldObserver for NoopObserver {
    fn on_run_start(&self, _: usize, _: usize) {}
    fn on_fold_start(&self, _: &FoldIndex) {}
    fn on_fold_complete(&self, _: &FoldReport) {}
    fn on_run_complete(&self, _: usize, _: Duration) {}
}

/// Result of a cross-validated evaluation.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub metric_names: Vec<String>,
    pub n_splits: usize,
    pub n_repeats: usize,
    /// `(n_repeats * n_splits, n_metrics)`, present when train scoring is on.
    pub train_scores: Option<Array2<f64>>,
    /// `(n_repeats * n_splits, n_metrics)`.
    pub test_scores: Array2<f64>,
    pub ledger: RawPredictionLedger,
    pub importances: Vec<ImportanceRecord>,
    pub folds: Vec<FoldReport>,
}

impl Evaluation {
    pub fn is_empty(&self) -> bool {
        self.test_scores.nrows() == 0
    }
}

/// Result of a single held-out test evaluation.
#[derive(Debug, Clone)]
pub struct TestEvaluation {
    pub metric_names: Vec<String>,
    /// `(n_metrics,)`, present when train scoring is on.
    pub train_scores: Option<Array1<f64>>,
    /// `(n_metrics,)`, or empty when no subject survived restriction.
    pub test_scores: Array1<f64>,
    pub ledger: RawPredictionLedger,
    pub importances: Vec<ImportanceRecord>,
    pub fold: Option<FoldReport>,
}

impl TestEvaluation {
    pub fn is_empty(&self) -> bool {
        self.test_scores.is_empty()
    }
}

/// Mutable state owned by one `evaluate`/`test` call.
struct EvaluationContext {
    ledger: RawPredictionLedger,
    aggregator: FeatureImportanceAggregator,
    train_scores: Vec<Vec<f64>>,
    test_scores: Vec<Vec<f64>>,
    folds: Vec<FoldReport>,
}

impl EvaluationContext {
    fn new(
        subjects: Vec<SubjectId>,
        methods: &[Arc<dyn ImportanceMethod>],
        n_splits: Option<usize>,
    ) -> Self {
        Self {
            ledger: RawPredictionLedger::new(subjects),
            aggregator: FeatureImportanceAggregator::new(methods, n_splits),
            train_scores: Vec::new(),
            test_scores: Vec::new(),
            folds: Vec::new(),
        }
    }
}

/// The fitted model of one fold and what was learned about it.
struct FoldContext {
    fold: FoldIndex,
    model: Box<dyn Model>,
    /// Probed once after fit and shared by every importance method.
    capabilities: Capabilities,
}

/// Whether train-side predictions go into the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrainRecording {
    Skip,
    Record,
}

/// The evaluation engine.
pub struct Evaluator {
    config: EvaluatorConfig,
    columns: ResolvedColumns,
    builder: Arc<dyn PipelineBuilder>,
    metrics: Vec<Arc<dyn Metric>>,
    importances: Vec<Arc<dyn ImportanceMethod>>,
}

impl Evaluator {
    /// Resolve the feature scope once and validate the configuration.
    pub fn new(
        resolver: &dyn ScopeResolver,
        scope: &Scope,
        config: EvaluatorConfig,
        builder: Arc<dyn PipelineBuilder>,
        metrics: Vec<Arc<dyn Metric>>,
        importances: Vec<Arc<dyn ImportanceMethod>>,
    ) -> Result<Self, EvalError> {
        if metrics.is_empty() {
            return Err(EvalError::config("at least one metric is required"));
        }
        let columns = resolver.resolve(scope, &config.target.keys)?;
        if let Some(search) = &config.search {
            if search.grid.is_empty() {
                return Err(EvalError::config("search configured with an empty parameter grid"));
            }
            if let InnerResampling::KFold { n_splits } = search.inner {
                if n_splits < 2 {
                    return Err(EvalError::config(format!(
                        "inner n_splits must be at least 2, got {n_splits}"
                    )));
                }
            }
        }
        Ok(Self {
            config,
            columns,
            builder,
            metrics,
            importances,
        })
    }

    pub fn columns(&self) -> &ResolvedColumns {
        &self.columns
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    pub fn metric_names(&self) -> Vec<String> {
        self.metrics.iter().map(|m| m.name().to_string()).collect()
    }

    /// Repeated cross-validation over `train_subjects`.
    pub fn evaluate(
        &self,
        data: &DataTable,
        train_subjects: &[SubjectId],
        splits: &SplitConfig,
        observer: &dyn FoldObserver,
    ) -> Result<Evaluation, EvalError> {
        let start = Instant::now();
        let subjects = self.restrict(train_subjects, "train");
        if subjects.is_empty() {
            return Ok(Evaluation {
                metric_names: self.metric_names(),
                n_splits: splits.n_splits,
                n_repeats: splits.n_repeats,
                train_scores: self
                    .config
                    .compute_train_score
                    .then(|| Array2::zeros((0, self.metrics.len()))),
                test_scores: Array2::zeros((0, self.metrics.len())),
                ledger: RawPredictionLedger::new(Vec::new()),
                importances: Vec::new(),
                folds: Vec::new(),
            });
        }
        self.check_present(data, &subjects)?;

        let table = data.select_columns(&self.columns.all_keys())?;
        let resampling = match &splits.groups {
            Some(groups) => repeated_leave_one_group_out(&subjects, splits.n_repeats, groups)?,
            None => repeated_k_fold(
                &subjects,
                splits.n_repeats,
                splits.n_splits,
                self.config.random_state,
            )?,
        };
        let n_splits = resampling.n_splits();
        let n_folds = resampling.n_folds();

        tracing::info!(
            n_subjects = subjects.len(),
            n_splits,
            n_repeats = resampling.n_repeats(),
            n_features = self.columns.features.len(),
            "starting cross-validation"
        );
        observer.on_run_start(n_folds, subjects.len());

        let mut ctx = EvaluationContext::new(subjects, &self.importances, Some(n_splits));
        for (ordinal, split) in resampling.iter().enumerate() {
            let fold = FoldIndex::cv(ordinal, n_splits);
            observer.on_fold_start(&fold);
            let report = self.run_fold(
                &table,
                &split.train,
                &split.test,
                fold,
                TrainRecording::Skip,
                &mut ctx,
            )?;
            observer.on_fold_complete(&report);
        }

        let test_scores = stack(&ctx.test_scores, self.metrics.len())?;
        let train_scores = if self.config.compute_train_score {
            Some(stack(&ctx.train_scores, self.metrics.len())?)
        } else {
            None
        };
        let importances = ctx.aggregator.finalize();
        observer.on_run_complete(n_folds, start.elapsed());

        Ok(Evaluation {
            metric_names: self.metric_names(),
            n_splits,
            n_repeats: resampling.n_repeats(),
            train_scores,
            test_scores,
            ledger: ctx.ledger,
            importances,
            folds: ctx.folds,
        })
    }

    /// Fit on `train_subjects` and evaluate once on `test_subjects`.
    pub fn test(
        &self,
        data: &DataTable,
        train_subjects: &[SubjectId],
        test_subjects: &[SubjectId],
        observer: &dyn FoldObserver,
    ) -> Result<TestEvaluation, EvalError> {
        let start = Instant::now();
        let train = self.restrict(train_subjects, "train");
        let test = self.restrict(test_subjects, "test");
        if train.is_empty() || test.is_empty() {
            return Ok(TestEvaluation {
                metric_names: self.metric_names(),
                train_scores: self.config.compute_train_score.then(|| Array1::zeros(0)),
                test_scores: Array1::zeros(0),
                ledger: RawPredictionLedger::new(Vec::new()),
                importances: Vec::new(),
                fold: None,
            });
        }

        let train_set: HashSet<&SubjectId> = train.iter().collect();
        if let Some(shared) = test.iter().find(|s| train_set.contains(s)) {
            return Err(EvalError::config(format!(
                "subject '{shared}' is in both the train and test sets"
            )));
        }
        self.check_present(data, &train)?;
        self.check_present(data, &test)?;

        let table = data.select_columns(&self.columns.all_keys())?;
        let ledger_subjects: Vec<SubjectId> = if self.config.compute_train_score {
            train.iter().chain(test.iter()).cloned().collect()
        } else {
            test.clone()
        };

        observer.on_run_start(1, train.len() + test.len());
        let mut ctx = EvaluationContext::new(ledger_subjects, &self.importances, None);
        let recording = if self.config.compute_train_score {
            TrainRecording::Record
        } else {
            TrainRecording::Skip
        };

        observer.on_fold_start(&FoldIndex::Final);
        let report = self.run_fold(&table, &train, &test, FoldIndex::Final, recording, &mut ctx)?;
        observer.on_fold_complete(&report);

        let test_scores = Array1::from(report.test_scores.clone());
        let train_scores = report.train_scores.clone().map(Array1::from);
        let importances = ctx.aggregator.finalize();
        observer.on_run_complete(1, start.elapsed());

        Ok(TestEvaluation {
            metric_names: self.metric_names(),
            train_scores,
            test_scores,
            ledger: ctx.ledger,
            importances,
            fold: Some(report),
        })
    }

    /// Intersect with the final-subject filter, keeping input order and
    /// dropping duplicates.
    fn restrict(&self, subjects: &[SubjectId], side: &str) -> Vec<SubjectId> {
        let mut seen = HashSet::new();
        let restricted: Vec<SubjectId> = subjects
            .iter()
            .filter(|s| {
                self.config
                    .final_subjects
                    .as_ref()
                    .map_or(true, |universe| universe.contains(*s))
            })
            .filter(|s| seen.insert(*s))
            .cloned()
            .collect();

        if restricted.is_empty() {
            tracing::warn!(
                side,
                requested = subjects.len(),
                "no subjects remain after restricting to the final subjects"
            );
        } else if restricted.len() < subjects.len() {
            tracing::debug!(
                side,
                requested = subjects.len(),
                kept = restricted.len(),
                "restricted subjects"
            );
        }
        restricted
    }

    fn check_present(&self, data: &DataTable, subjects: &[SubjectId]) -> Result<(), EvalError> {
        match subjects.iter().find(|s| !data.contains(s)) {
            Some(missing) => Err(EvalError::UnknownSubject(missing.clone())),
            None => Ok(()),
        }
    }

    fn primary_metric(&self) -> &Arc<dyn Metric> {
        &self.metrics[0]
    }

    fn fold_seed(&self, fold: FoldIndex) -> u64 {
        self.config.random_state.wrapping_add(fold.seed_offset())
    }

    /// Base pipeline, wrapped in a search when one is configured.
    fn build_model(
        &self,
        train: &[SubjectId],
        train_xy: &Xy,
        fold: FoldIndex,
    ) -> Result<Box<dyn Model>, EvalError> {
        let pipeline = self
            .builder
            .build(
                &train_xy.feature_keys,
                &self.config.model,
                self.config.target.problem_type,
            )
            .map_err(|e| EvalError::config(format!("failed to build pipeline: {e:#}")))?;

        let Some(search) = &self.config.search else {
            return Ok(pipeline);
        };

        let inner = self.inner_splits(search, train, fold)?;
        let scorer = search
            .metric
            .clone()
            .unwrap_or_else(|| Arc::clone(self.primary_metric()));
        tracing::debug!(
            fold = %fold,
            n_inner = inner.len(),
            scorer = scorer.name(),
            "wrapping pipeline in search"
        );
        self.builder
            .wrap_with_search(pipeline, &search.grid, inner, scorer)
            .map_err(|e| EvalError::config(format!("failed to build search: {e:#}")))
    }

    /// Inner resampling over the fold's training rows only.
    fn inner_splits(
        &self,
        search: &SearchConfig,
        train: &[SubjectId],
        fold: FoldIndex,
    ) -> Result<Vec<IndexSplit>, EvalError> {
        match &search.inner {
            InnerResampling::KFold { n_splits } => {
                k_fold_indices(train.len(), *n_splits, self.fold_seed(fold))
            }
            InnerResampling::Groups(groups) => {
                let labels = train
                    .iter()
                    .map(|s| {
                        groups.get(s).map(String::as_str).ok_or_else(|| {
                            EvalError::config(format!("subject '{s}' has no inner group label"))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                leave_one_group_out_indices(&labels)
            }
        }
    }

    fn score_all(
        &self,
        model: &dyn Model,
        x: ArrayView2<'_, f64>,
        y: &Target,
        fold: FoldIndex,
    ) -> Result<Vec<f64>, EvalError> {
        self.metrics
            .iter()
            .map(|metric| {
                metric
                    .score(model, x, y)
                    .map_err(|source| EvalError::Scoring {
                        metric: metric.name().to_string(),
                        fold,
                        source: source.into(),
                    })
            })
            .collect()
    }

    /// Class labels for one side of a fold, logging the two-class fallback.
    fn fold_classes(&self, truth: &Target, fold: FoldIndex, side: Side) -> ClassLabels {
        if !self.config.target.problem_type.is_classification() {
            return ClassLabels {
                labels: Vec::new(),
                degenerate: false,
            };
        }
        let classes = class_labels(truth);
        if classes.degenerate {
            tracing::warn!(
                fold = %fold,
                side = ?side,
                problem_type = %self.config.target.problem_type,
                "single observed class, recording probabilities under classes {{0, 1}}"
            );
        }
        classes
    }

    fn record_side(
        &self,
        ctx: &mut EvaluationContext,
        fold_ctx: &FoldContext,
        side: Side,
        subjects: &[SubjectId],
        xy: &Xy,
    ) -> Result<bool, EvalError> {
        let fold = fold_ctx.fold;
        let predictions =
            fold_ctx
                .model
                .predict(xy.x.view())
                .map_err(|source| EvalError::Prediction {
                    fold,
                    source: source.into(),
                })?;
        let probabilities = match fold_ctx.model.predict_proba(xy.x.view()) {
            Some(result) => Some(result.map_err(|source| EvalError::Prediction {
                fold,
                source: source.into(),
            })?),
            None => None,
        };
        let classes = self.fold_classes(&xy.y, fold, side);
        let truth_keys = self.config.target.truth_keys();

        ctx.ledger.record(PredictionRecord {
            side,
            fold,
            subjects,
            predictions: &predictions,
            probabilities: probabilities.as_ref(),
            truth: &xy.y,
            truth_keys: &truth_keys,
            target_keys: &self.config.target.keys,
            classes: &classes.labels,
        })?;
        Ok(classes.degenerate)
    }

    /// One fold: slice, build, fit, importances, scores, ledger.
    fn run_fold(
        &self,
        table: &DataTable,
        train: &[SubjectId],
        test: &[SubjectId],
        fold: FoldIndex,
        recording: TrainRecording,
        ctx: &mut EvaluationContext,
    ) -> Result<FoldReport, EvalError> {
        let start = Instant::now();

        let train_xy = table.rows(train)?.split_xy(&self.columns, &self.config.target)?;
        let test_xy = table.rows(test)?.split_xy(&self.columns, &self.config.target)?;
        tracing::debug!(
            fold = %fold,
            n_train = train_xy.x.nrows(),
            n_test = test_xy.x.nrows(),
            n_features = train_xy.x.ncols(),
            "sliced fold"
        );

        let mut model = self.build_model(train, &train_xy, fold)?;
        model
            .fit(train_xy.x.view(), &train_xy.y)
            .map_err(|source| EvalError::FitFailure {
                fold,
                source: source.into(),
            })?;
        let fold_ctx = FoldContext {
            fold,
            capabilities: model.capabilities(),
            model,
        };

        let best_params = fold_ctx.model.best_params();
        if let Some(params) = &best_params {
            tracing::info!(fold = %fold, params = ?params, "search selected parameters");
        }

        if !ctx.aggregator.is_empty() {
            let processed = if ctx.aggregator.needs_training_data(fold_ctx.capabilities) {
                Some(fold_ctx.model.transform(train_xy.x.view()).map_err(|source| {
                    EvalError::Prediction {
                        fold,
                        source: source.into(),
                    }
                })?)
            } else {
                None
            };
            ctx.aggregator.observe_fold(&FoldImportanceData {
                fold,
                seed: self.fold_seed(fold),
                model: fold_ctx.model.as_ref(),
                capabilities: fold_ctx.capabilities,
                feature_keys: &train_xy.feature_keys,
                x_train: train_xy.x.view(),
                y_train: &train_xy.y,
                x_test: test_xy.x.view(),
                y_test: &test_xy.y,
                processed_train: processed.as_ref().map(|x| x.view()),
                scorer: self.primary_metric().as_ref(),
            })?;
        }

        let test_scores = self.score_all(
            fold_ctx.model.as_ref(),
            test_xy.x.view(),
            &test_xy.y,
            fold,
        )?;
        let train_scores = if self.config.compute_train_score {
            Some(self.score_all(
                fold_ctx.model.as_ref(),
                train_xy.x.view(),
                &train_xy.y,
                fold,
            )?)
        } else {
            None
        };

        let mut degenerate = 0;
        if self.record_side(ctx, &fold_ctx, Side::Test, test, &test_xy)? {
            degenerate += 1;
        }
        if recording == TrainRecording::Record
            && self.record_side(ctx, &fold_ctx, Side::Train, train, &train_xy)?
        {
            degenerate += 1;
        }

        tracing::info!(fold = %fold, scores = ?test_scores, "fold complete");

        ctx.test_scores.push(test_scores.clone());
        if let Some(scores) = &train_scores {
            ctx.train_scores.push(scores.clone());
        }
        let report = FoldReport {
            fold,
            n_train: train.len(),
            n_test: test.len(),
            test_scores,
            train_scores,
            best_params,
            degenerate_class_fallbacks: degenerate,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        ctx.folds.push(report.clone());
        Ok(report)
    }
}

fn stack(rows: &[Vec<f64>], n_metrics: usize) -> Result<Array2<f64>, EvalError> {
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((rows.len(), n_metrics), flat)
        .map_err(|e| EvalError::ShapeMismatch(format!("score rows: {e}")))
}
