//! Evaluation report types with JSON persistence and regression detection.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::data::{ProblemType, TargetSpec};
use crate::engine::{Evaluation, FoldReport, TestEvaluation};
use crate::importance::ImportanceRecord;
use crate::ledger::RawPredictionLedger;
use crate::statistics::{summarize, summarize_single, ScoreSummary};
use crate::traits::ModelSpec;

/// How the scores in a report were produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    CrossValidation,
    HeldOut,
}

/// A complete, persisted evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Unique report identifier.
    pub id: Uuid,
    /// When the report was created.
    pub created_at: DateTime<Utc>,
    /// Experiment name.
    pub name: String,
    pub mode: EvaluationMode,
    pub problem_type: ProblemType,
    pub target_keys: Vec<String>,
    pub feature_keys: Vec<String>,
    pub model: ModelSpec,
    pub metric_names: Vec<String>,
    pub n_splits: usize,
    pub n_repeats: usize,
    /// Test scores, one row per fold, metric order.
    #[serde(deserialize_with = "crate::nullable::score_rows")]
    pub test_scores: Vec<Vec<f64>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "crate::nullable::optional_score_rows"
    )]
    pub train_scores: Option<Vec<Vec<f64>>>,
    pub summary: Vec<ScoreSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub train_summary: Option<Vec<ScoreSummary>>,
    pub folds: Vec<FoldReport>,
    pub importances: Vec<ImportanceRecord>,
    pub ledger: RawPredictionLedger,
    /// Total wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Context shared by every report, independent of how it was evaluated.
#[derive(Debug, Clone)]
pub struct ReportMeta {
    pub name: String,
    pub target: TargetSpec,
    pub feature_keys: Vec<String>,
    pub model: ModelSpec,
    pub duration_ms: u64,
}

fn rows(scores: ArrayView2<'_, f64>) -> Vec<Vec<f64>> {
    scores.rows().into_iter().map(|r| r.to_vec()).collect()
}

impl EvaluationReport {
    /// Report for a cross-validated evaluation.
    pub fn from_evaluation(meta: ReportMeta, evaluation: Evaluation) -> Self {
        let summary = summarize(
            &evaluation.metric_names,
            evaluation.test_scores.view(),
            evaluation.n_splits,
        );
        let train_summary = evaluation
            .train_scores
            .as_ref()
            .map(|s| summarize(&evaluation.metric_names, s.view(), evaluation.n_splits));

        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            name: meta.name,
            mode: EvaluationMode::CrossValidation,
            problem_type: meta.target.problem_type,
            target_keys: meta.target.keys,
            feature_keys: meta.feature_keys,
            model: meta.model,
            metric_names: evaluation.metric_names,
            n_splits: evaluation.n_splits,
            n_repeats: evaluation.n_repeats,
            test_scores: rows(evaluation.test_scores.view()),
            train_scores: evaluation.train_scores.as_ref().map(|s| rows(s.view())),
            summary,
            train_summary,
            folds: evaluation.folds,
            importances: evaluation.importances,
            ledger: evaluation.ledger,
            duration_ms: meta.duration_ms,
        }
    }

    /// Report for a single held-out evaluation.
    pub fn from_test(meta: ReportMeta, evaluation: TestEvaluation) -> Self {
        let summary = summarize_single(&evaluation.metric_names, evaluation.test_scores.view());
        let train_summary = evaluation
            .train_scores
            .as_ref()
            .map(|s| summarize_single(&evaluation.metric_names, s.view()));
        let test_scores = if evaluation.test_scores.is_empty() {
            Vec::new()
        } else {
            vec![evaluation.test_scores.to_vec()]
        };

        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            name: meta.name,
            mode: EvaluationMode::HeldOut,
            problem_type: meta.target.problem_type,
            target_keys: meta.target.keys,
            feature_keys: meta.feature_keys,
            model: meta.model,
            metric_names: evaluation.metric_names,
            n_splits: 1,
            n_repeats: 1,
            test_scores,
            train_scores: evaluation.train_scores.map(|s| vec![s.to_vec()]),
            summary,
            train_summary,
            folds: evaluation.fold.into_iter().collect(),
            importances: evaluation.importances,
            ledger: evaluation.ledger,
            duration_ms: meta.duration_ms,
        }
    }

    /// Save the report as JSON to a file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }

    /// Load a report from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read report from {}", path.display()))?;
        let report: EvaluationReport =
            serde_json::from_str(&content).context("failed to parse report JSON")?;
        Ok(report)
    }

    /// Mean test score per metric.
    pub fn means(&self) -> BTreeMap<String, f64> {
        self.summary
            .iter()
            .map(|s| (s.metric.clone(), s.mean))
            .collect()
    }

    /// Compare this report against a baseline. Scores are higher-is-better,
    /// so a mean that drops by more than `threshold` is a regression.
    pub fn compare(&self, baseline: &EvaluationReport, threshold: f64) -> RegressionReport {
        let baseline_means = baseline.means();
        let current_means = self.means();

        let mut regressions = Vec::new();
        let mut improvements = Vec::new();
        let mut unchanged = 0usize;
        let mut new_metrics = 0usize;

        for (metric, &current) in &current_means {
            let Some(&baseline_mean) = baseline_means.get(metric) else {
                new_metrics += 1;
                continue;
            };
            let change = MetricChange {
                metric: metric.clone(),
                baseline_mean,
                current_mean: current,
                delta: current - baseline_mean,
            };
            if change.delta < -threshold {
                regressions.push(change);
            } else if change.delta > threshold {
                improvements.push(change);
            } else {
                unchanged += 1;
            }
        }

        let removed_metrics = baseline_means
            .keys()
            .filter(|k| !current_means.contains_key(*k))
            .count();

        RegressionReport {
            regressions,
            improvements,
            unchanged,
            new_metrics,
            removed_metrics,
        }
    }
}

/// Result of comparing two reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionReport {
    /// Metrics whose mean went down.
    pub regressions: Vec<MetricChange>,
    /// Metrics whose mean went up.
    pub improvements: Vec<MetricChange>,
    /// Metrics with no significant change.
    pub unchanged: usize,
    /// Metrics in current but not baseline.
    pub new_metrics: usize,
    /// Metrics in baseline but not current.
    pub removed_metrics: usize,
}

/// Movement of one metric's mean between two reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricChange {
    pub metric: String,
    pub baseline_mean: f64,
    pub current_mean: f64,
    pub delta: f64,
}

impl RegressionReport {
    /// Format the regression report as markdown.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str(&format!(
            "**Summary:** {} regressions, {} improvements, {} unchanged\n\n",
            self.regressions.len(),
            self.improvements.len(),
            self.unchanged
        ));

        for (title, changes) in [
            ("Regressions", &self.regressions),
            ("Improvements", &self.improvements),
        ] {
            if changes.is_empty() {
                continue;
            }
            md.push_str(&format!("### {title}\n\n"));
            md.push_str("| Metric | Baseline | Current | Delta |\n");
            md.push_str("|--------|----------|---------|-------|\n");
            for c in changes {
                md.push_str(&format!(
                    "| {} | {:.4} | {:.4} | {:+.4} |\n",
                    c.metric, c.baseline_mean, c.current_mean, c.delta
                ));
            }
            md.push('\n');
        }

        md
    }

    /// Returns true if there are any regressions.
    pub fn has_regressions(&self) -> bool {
        !self.regressions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FoldIndex;
    use crate::ledger::LedgerValue;
    use ndarray::array;

    fn meta() -> ReportMeta {
        ReportMeta {
            name: "ridge-baseline".into(),
            target: TargetSpec::single("score", ProblemType::Regression),
            feature_keys: vec!["x1".into(), "x2".into()],
            model: ModelSpec::new("ridge"),
            duration_ms: 12,
        }
    }

    fn evaluation(r2: [f64; 4]) -> Evaluation {
        let mut ledger = RawPredictionLedger::new(vec!["a".into()]);
        ledger.set(&"a".into(), "1", LedgerValue::Number(0.5)).unwrap();
        Evaluation {
            metric_names: vec!["r2".into(), "neg_mean_squared_error".into()],
            n_splits: 2,
            n_repeats: 2,
            train_scores: None,
            test_scores: array![
                [r2[0], -1.0],
                [r2[1], -1.0],
                [r2[2], -1.0],
                [r2[3], -1.0]
            ],
            ledger,
            importances: Vec::new(),
            folds: Vec::new(),
        }
    }

    #[test]
    fn report_summarizes_evaluation() {
        let report = EvaluationReport::from_evaluation(meta(), evaluation([0.5, 0.7, 0.6, 0.8]));
        assert_eq!(report.mode, EvaluationMode::CrossValidation);
        assert_eq!(report.test_scores.len(), 4);
        assert!((report.means()["r2"] - 0.65).abs() < 1e-12);
    }

    #[test]
    fn held_out_report() {
        let test = TestEvaluation {
            metric_names: vec!["accuracy".into()],
            train_scores: Some(array![0.9]),
            test_scores: array![0.75],
            ledger: RawPredictionLedger::new(Vec::new()),
            importances: Vec::new(),
            fold: None,
        };
        let report = EvaluationReport::from_test(meta(), test);
        assert_eq!(report.mode, EvaluationMode::HeldOut);
        assert_eq!(report.test_scores, vec![vec![0.75]]);
        assert_eq!(report.train_summary.unwrap()[0].mean, 0.9);
    }

    #[test]
    fn compare_identical_reports() {
        let baseline = EvaluationReport::from_evaluation(meta(), evaluation([0.5; 4]));
        let current = EvaluationReport::from_evaluation(meta(), evaluation([0.5; 4]));
        let report = current.compare(&baseline, 0.01);
        assert!(!report.has_regressions());
        assert!(report.improvements.is_empty());
        assert_eq!(report.unchanged, 2);
    }

    #[test]
    fn compare_with_regression() {
        let baseline = EvaluationReport::from_evaluation(meta(), evaluation([0.8; 4]));
        let current = EvaluationReport::from_evaluation(meta(), evaluation([0.6; 4]));
        let report = current.compare(&baseline, 0.05);
        assert_eq!(report.regressions.len(), 1);
        assert_eq!(report.regressions[0].metric, "r2");
        assert!((report.regressions[0].delta + 0.2).abs() < 1e-12);

        let md = report.to_markdown();
        assert!(md.contains("Regressions"));
        assert!(md.contains("| r2 |"));
    }

    #[test]
    fn compare_with_new_and_removed_metrics() {
        let baseline = EvaluationReport::from_evaluation(meta(), evaluation([0.5; 4]));
        let mut current = EvaluationReport::from_evaluation(meta(), evaluation([0.5; 4]));
        current.summary[1].metric = "neg_mean_absolute_error".into();
        let report = current.compare(&baseline, 0.05);
        assert_eq!(report.new_metrics, 1);
        assert_eq!(report.removed_metrics, 1);
    }

    #[test]
    fn json_roundtrip() {
        let mut evaluation = evaluation([0.5, 0.7, 0.6, 0.8]);
        evaluation.folds.push(FoldReport {
            fold: FoldIndex::cv(0, 2),
            n_train: 3,
            n_test: 1,
            test_scores: vec![0.5, -1.0],
            train_scores: None,
            best_params: Some(BTreeMap::from([("alpha".to_string(), 0.1)])),
            degenerate_class_fallbacks: 0,
            duration_ms: 1,
        });
        let report = EvaluationReport::from_evaluation(meta(), evaluation);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("report.json");

        report.save_json(&path).unwrap();
        let loaded = EvaluationReport::load_json(&path).unwrap();

        assert_eq!(loaded.id, report.id);
        assert_eq!(loaded.test_scores, report.test_scores);
        assert_eq!(loaded.folds, report.folds);
        assert_eq!(loaded.ledger, report.ledger);
        assert_eq!(loaded.summary.len(), 2);
    }

    #[test]
    fn undefined_scores_survive_json() {
        let mut evaluation = evaluation([0.5, f64::NAN, 0.6, 0.8]);
        evaluation.folds.push(FoldReport {
            fold: FoldIndex::cv(1, 2),
            n_train: 3,
            n_test: 1,
            test_scores: vec![f64::NAN, -1.0],
            train_scores: Some(vec![0.9, -0.5]),
            best_params: None,
            degenerate_class_fallbacks: 1,
            duration_ms: 1,
        });
        let report = EvaluationReport::from_evaluation(meta(), evaluation);
        assert!(report.summary[0].mean.is_nan());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        report.save_json(&path).unwrap();
        let loaded = EvaluationReport::load_json(&path).unwrap();

        assert!(loaded.test_scores[1][0].is_nan());
        assert_eq!(loaded.test_scores[0], vec![0.5, -1.0]);
        assert!(loaded.folds[0].test_scores[0].is_nan());
        assert_eq!(loaded.folds[0].train_scores, Some(vec![0.9, -0.5]));
        assert!(loaded.summary[0].mean.is_nan());
        assert_eq!(loaded.summary[0].max, 0.8);
    }
}
