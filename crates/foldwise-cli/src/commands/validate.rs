//! The `foldwise validate` command.

use std::path::PathBuf;

use anyhow::Result;

use foldwise_models::{load_config_from, validate_config};

use crate::dataset::load_dataset;

pub fn execute(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    println!(
        "Experiment: {} ({} on {} target {})",
        config.name,
        config.model.name,
        config.problem.problem_type,
        config.problem.target.to_vec().join(", ")
    );

    let mut warnings: Vec<String> = validate_config(&config)
        .iter()
        .map(ToString::to_string)
        .collect();

    if config.data.path.exists() {
        match load_dataset(&config.data.path, &config.data.subject_column, &config.group_columns()) {
            Ok(dataset) => println!(
                "Dataset: {} subjects, {} numeric columns",
                dataset.table.n_rows(),
                dataset.table.columns().len()
            ),
            Err(e) => warnings.push(format!("[data] {e:#}")),
        }
    } else {
        warnings.push(format!("[data] file not found: {}", config.data.path.display()));
    }

    for w in &warnings {
        println!("  WARNING: {w}");
    }

    if warnings.is_empty() {
        println!("Config valid.");
    } else {
        println!("\n{} warning(s) found.", warnings.len());
    }

    Ok(())
}
