//! The `foldwise run` command.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};

use foldwise_core::report::EvaluationReport;

use super::{print_summary, write_outputs, Experiment};
use crate::observer::ConsoleObserver;

pub fn execute(config_path: Option<PathBuf>, output: Option<PathBuf>, format: String) -> Result<()> {
    let start = Instant::now();
    let experiment = Experiment::load(config_path.as_deref())?;
    let config = &experiment.config;

    let groups = config
        .splits
        .group_column
        .as_deref()
        .map(|column| experiment.dataset.group_labels(column))
        .transpose()?;
    let splits = config.split_config(groups)?;

    // Held-out subjects never take part in cross-validation.
    let held_out: HashSet<_> = experiment
        .test_subjects(None)?
        .unwrap_or_default()
        .into_iter()
        .collect();
    let subjects: Vec<_> = experiment
        .dataset
        .table
        .subjects()
        .iter()
        .filter(|s| !held_out.contains(s))
        .cloned()
        .collect();

    eprintln!(
        "foldwise v{} - {} with {} on {} subjects",
        env!("CARGO_PKG_VERSION"),
        config.name,
        config.model.name,
        subjects.len()
    );

    let observer = ConsoleObserver::new(experiment.evaluator.metric_names());
    let evaluation = experiment
        .evaluator
        .evaluate(&experiment.dataset.table, &subjects, &splits, &observer)
        .context("evaluation failed")?;
    if evaluation.is_empty() {
        eprintln!("No subjects left to evaluate after restriction.");
    }

    let meta = experiment.meta(start.elapsed().as_millis() as u64)?;
    let report = EvaluationReport::from_evaluation(meta, evaluation);
    print_summary(&report);

    let output = output.unwrap_or_else(|| config.output_dir.clone());
    write_outputs(&report, &output, &format)?;
    Ok(())
}
