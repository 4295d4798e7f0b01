//! Console progress for evaluation runs.

use std::time::Duration;

use foldwise_core::data::FoldIndex;
use foldwise_core::engine::{FoldObserver, FoldReport};

/// Writes one line per fold to stderr.
pub struct ConsoleObserver {
    metric_names: Vec<String>,
}

impl ConsoleObserver {
    pub fn new(metric_names: Vec<String>) -> Self {
        Self { metric_names }
    }
}

impl FoldObserver for ConsoleObserver {
    fn on_run_start(&self, n_folds: usize, n_subjects: usize) {
        eprintln!("Evaluating {n_folds} fold(s) over {n_subjects} subjects\n");
    }

    fn on_fold_start(&self, fold: &FoldIndex) {
        eprintln!("  Starting: {fold}");
    }

    fn on_fold_complete(&self, report: &FoldReport) {
        let scores: Vec<String> = self
            .metric_names
            .iter()
            .zip(&report.test_scores)
            .map(|(name, score)| format!("{name}={score:.4}"))
            .collect();
        let fallback = if report.degenerate_class_fallbacks > 0 {
            format!(" [{} degenerate]", report.degenerate_class_fallbacks)
        } else {
            String::new()
        };
        eprintln!(
            "  Done: {} train {} test {} {}{} ({}ms)",
            report.fold,
            report.n_train,
            report.n_test,
            scores.join(" "),
            fallback,
            report.duration_ms,
        );
    }

    fn on_run_complete(&self, n_folds: usize, elapsed: Duration) {
        eprintln!("\nComplete: {n_folds} fold(s) ({:.1}s)", elapsed.as_secs_f64());
    }
}
