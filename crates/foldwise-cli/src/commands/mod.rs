pub mod compare;
pub mod init;
pub mod run;
pub mod validate;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use foldwise_core::data::SubjectId;
use foldwise_core::engine::Evaluator;
use foldwise_core::report::{EvaluationReport, ReportMeta};
use foldwise_core::scope::Scopes;
use foldwise_models::config::FoldwiseConfig;
use foldwise_models::{load_config_from, validate_config, DefaultPipelineBuilder};
use foldwise_report::{write_html_report, write_ledger_csv, write_scores_csv};

use crate::dataset::{load_dataset, read_subject_list, Dataset};

/// A loaded config, its dataset and a ready evaluator.
pub struct Experiment {
    pub config: FoldwiseConfig,
    pub dataset: Dataset,
    pub evaluator: Evaluator,
}

impl Experiment {
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = load_config_from(config_path)?;
        for warning in validate_config(&config) {
            eprintln!("Warning: {warning}");
        }

        let dataset = load_dataset(
            &config.data.path,
            &config.data.subject_column,
            &config.group_columns(),
        )?;
        let final_subjects = config
            .data
            .final_subjects
            .as_deref()
            .map(read_subject_list)
            .transpose()?
            .map(|subjects| subjects.into_iter().collect::<HashSet<_>>());
        let inner_groups = config
            .search
            .as_ref()
            .and_then(|s| s.group_column.as_deref())
            .map(|column| dataset.group_labels(column))
            .transpose()?;

        let scopes = scopes_for(&config, &dataset);
        let evaluator = Evaluator::new(
            &scopes,
            &config.problem.scope,
            config.evaluator_config(final_subjects, inner_groups)?,
            Arc::new(DefaultPipelineBuilder),
            config.metrics()?,
            config.importance_methods()?,
        )
        .context("failed to set up evaluation")?;
        tracing::debug!(
            features = evaluator.columns().features.len(),
            scope = %config.problem.scope,
            "resolved feature scope"
        );

        Ok(Self {
            config,
            dataset,
            evaluator,
        })
    }

    /// Subjects listed in the configured test-subjects file, or `override_path`.
    pub fn test_subjects(&self, override_path: Option<&Path>) -> Result<Option<Vec<SubjectId>>> {
        override_path
            .or(self.config.data.test_subjects.as_deref())
            .map(read_subject_list)
            .transpose()
    }

    pub fn meta(&self, duration_ms: u64) -> Result<ReportMeta> {
        Ok(ReportMeta {
            name: self.config.name.clone(),
            target: self.config.target_spec()?,
            feature_keys: self.evaluator.columns().features.clone(),
            model: self.config.model.clone(),
            duration_ms,
        })
    }
}

/// Data columns are every numeric column not claimed as a covariate,
/// categorical, strat or target key.
fn scopes_for(config: &FoldwiseConfig, dataset: &Dataset) -> Scopes {
    let problem = &config.problem;
    let targets = problem.target.to_vec();
    let reserved: HashSet<&String> = problem
        .covars
        .iter()
        .chain(&problem.strat)
        .chain(&targets)
        .collect();
    let data_keys = dataset
        .table
        .columns()
        .iter()
        .filter(|c| !reserved.contains(c))
        .cloned()
        .collect();
    Scopes::new(data_keys)
        .with_covars(problem.covars.clone())
        .with_categorical(problem.categorical.clone())
        .with_strat(problem.strat.clone())
}

/// Save a report in each requested format under `output`.
pub fn write_outputs(report: &EvaluationReport, output: &Path, format: &str) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output)
        .with_context(|| format!("failed to create {}", output.display()))?;
    let timestamp = report.created_at.format("%Y-%m-%dT%H%M%S");

    let formats: Vec<&str> = if format == "all" {
        vec!["json", "html", "csv"]
    } else {
        format.split(',').map(str::trim).collect()
    };

    let mut written = Vec::new();
    for fmt in &formats {
        match *fmt {
            "json" => {
                let path = output.join(format!("report-{timestamp}.json"));
                report.save_json(&path)?;
                eprintln!("Results saved to: {}", path.display());
                written.push(path);
            }
            "html" => {
                let path = output.join(format!("report-{timestamp}.html"));
                write_html_report(report, &path)?;
                eprintln!("HTML report: {}", path.display());
                written.push(path);
            }
            "csv" => {
                let ledger = output.join(format!("ledger-{timestamp}.csv"));
                write_ledger_csv(&report.ledger, &ledger)?;
                let scores = output.join(format!("scores-{timestamp}.csv"));
                write_scores_csv(report, &scores)?;
                eprintln!("Ledger CSV: {}", ledger.display());
                eprintln!("Scores CSV: {}", scores.display());
                written.extend([ledger, scores]);
            }
            _ => {
                eprintln!("Unknown format: {fmt}");
            }
        }
    }
    Ok(written)
}

pub fn print_summary(report: &EvaluationReport) {
    use comfy_table::{Cell, Table};

    let mut table = Table::new();
    let mut header = vec!["Metric", "Mean", "Std", "Repeat std", "Min", "Max"];
    if report.train_summary.is_some() {
        header.push("Train mean");
    }
    table.set_header(header);

    for s in &report.summary {
        let mut row = vec![
            Cell::new(&s.metric),
            Cell::new(format!("{:.4}", s.mean)),
            Cell::new(format!("{:.4}", s.std)),
            Cell::new(format!("{:.4}", s.repeat_std)),
            Cell::new(format!("{:.4}", s.min)),
            Cell::new(format!("{:.4}", s.max)),
        ];
        if let Some(train) = &report.train_summary {
            let mean = train
                .iter()
                .find(|t| t.metric == s.metric)
                .map(|t| format!("{:.4}", t.mean))
                .unwrap_or_else(|| "-".to_string());
            row.push(Cell::new(mean));
        }
        table.add_row(row);
    }

    eprintln!("\n{table}");
}
