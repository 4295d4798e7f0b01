//! End-to-end runs of the `foldwise` binary on generated datasets.
//!
//! Each test starts from `foldwise init` (or a hand-written config) in a
//! temporary directory and checks the files the run leaves behind.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

fn foldwise() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("foldwise").unwrap()
}

fn init(dir: &TempDir) {
    foldwise()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
}

/// Files in `dir` whose name starts with `prefix` and ends with `ext`.
fn outputs(dir: &Path, prefix: &str, ext: &str) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| {
            let name = p.file_name().unwrap().to_string_lossy().to_string();
            name.starts_with(prefix) && name.ends_with(ext)
        })
        .collect();
    found.sort();
    found
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

/// Run the starter experiment and return the path of its JSON report.
fn run_starter(dir: &TempDir, format: &str) -> PathBuf {
    init(dir);
    let out = dir.path().join("out");
    foldwise()
        .current_dir(dir.path())
        .args(["run", "--output"])
        .arg(&out)
        .args(["--format", format])
        .assert()
        .success()
        .stderr(predicate::str::contains("Complete: 5 fold(s)"));
    let reports = outputs(&out, "report-", ".json");
    assert_eq!(reports.len(), 1);
    reports[0].clone()
}

// --- run ---

#[test]
fn run_writes_every_format() {
    let dir = TempDir::new().unwrap();
    let report_path = run_starter(&dir, "all");
    let out = report_path.parent().unwrap();

    assert_eq!(outputs(out, "report-", ".html").len(), 1);
    let ledgers = outputs(out, "ledger-", ".csv");
    assert_eq!(ledgers.len(), 1);
    assert_eq!(outputs(out, "scores-", ".csv").len(), 1);

    let ledger = std::fs::read_to_string(&ledgers[0]).unwrap();
    let header = ledger.lines().next().unwrap();
    assert!(header.starts_with("subject,"));
    assert!(header.contains("1_fold"));
    assert!(header.contains("target"));
    assert_eq!(ledger.lines().count(), 61);

    let report = read_json(&report_path);
    assert_eq!(report["mode"], "cross_validation");
    assert_eq!(report["n_splits"], 5);
    assert_eq!(report["folds"].as_array().unwrap().len(), 5);
    assert_eq!(report["metric_names"][0], "r2");
    assert!(report["summary"][0]["mean"].as_f64().unwrap() > 0.9);
    assert!(report["train_summary"].is_array());
    for fold in report["folds"].as_array().unwrap() {
        assert!(fold["best_params"]["alpha"].is_number());
    }
}

#[test]
fn run_with_group_column_uses_leave_one_group_out() {
    let dir = TempDir::new().unwrap();
    let mut csv = String::from("subject,site,x1,x2,target\n");
    for i in 0..30 {
        let x1 = (i % 6) as f64;
        let x2 = ((i * 7) % 5) as f64;
        let site = ["north", "south", "east"][i % 3];
        csv.push_str(&format!("s{i},{site},{x1},{x2},{}\n", 3.0 * x1 + 0.5 * x2));
    }
    std::fs::write(dir.path().join("sites.csv"), csv).unwrap();
    std::fs::write(
        dir.path().join("sites.toml"),
        r#"
name = "sites"

[data]
path = "sites.csv"

[problem]
target = "target"
problem_type = "regression"
metrics = ["r2", "neg_mean_squared_error"]

[splits]
group_column = "site"

[model]
name = "ridge"
scale = true
"#,
    )
    .unwrap();

    let out = dir.path().join("out");
    foldwise()
        .arg("run")
        .arg("--config")
        .arg(dir.path().join("sites.toml"))
        .arg("--output")
        .arg(&out)
        .assert()
        .success();

    let report = read_json(&outputs(&out, "report-", ".json")[0]);
    assert_eq!(report["n_splits"], 3);
    let folds = report["folds"].as_array().unwrap();
    assert_eq!(folds.len(), 3);
    for fold in folds {
        assert_eq!(fold["n_test"], 10);
    }
    assert_eq!(report["feature_keys"], serde_json::json!(["x1", "x2"]));
}

// --- test ---

#[test]
fn held_out_test_records_final_predictions() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    let held_out: String = (0..10).map(|i| format!("sub-{i:03}\n")).collect();
    std::fs::write(dir.path().join("test.txt"), held_out).unwrap();

    let out = dir.path().join("out");
    foldwise()
        .current_dir(dir.path())
        .args(["test", "--test-subjects", "test.txt", "--format", "json,csv", "--output"])
        .arg(&out)
        .assert()
        .success()
        .stderr(predicate::str::contains("50 train / 10 test subjects"));

    let report = read_json(&outputs(&out, "report-", ".json")[0]);
    assert_eq!(report["mode"], "held_out");
    assert_eq!(report["test_scores"].as_array().unwrap().len(), 1);
    assert_eq!(report["summary"][0]["n_folds"], 1);

    let ledger = std::fs::read_to_string(&outputs(&out, "ledger-", ".csv")[0]).unwrap();
    let header: Vec<&str> = ledger.lines().next().unwrap().split(',').collect();
    assert!(header.contains(&"final"));
    assert!(header.contains(&"train_final"));
    assert!(header.contains(&"final_fold"));
    let first = ledger
        .lines()
        .find(|line| line.starts_with("sub-000,"))
        .unwrap();
    assert!(first.contains(",final"));
}

// --- compare ---

#[test]
fn compare_flags_regressions() {
    let dir = TempDir::new().unwrap();
    let baseline = run_starter(&dir, "json");

    let mut worse = read_json(&baseline);
    let mean = worse["summary"][0]["mean"].as_f64().unwrap();
    worse["summary"][0]["mean"] = serde_json::json!(mean - 0.5);
    let current = dir.path().join("current.json");
    std::fs::write(&current, serde_json::to_string_pretty(&worse).unwrap()).unwrap();

    foldwise()
        .arg("compare")
        .arg("--baseline")
        .arg(&baseline)
        .arg("--current")
        .arg(&current)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 regressions"))
        .stdout(predicate::str::contains("Regressions:"));

    foldwise()
        .arg("compare")
        .arg("--baseline")
        .arg(&baseline)
        .arg("--current")
        .arg(&current)
        .arg("--fail-on-regression")
        .assert()
        .failure();

    foldwise()
        .arg("compare")
        .arg("--baseline")
        .arg(&baseline)
        .arg("--current")
        .arg(&baseline)
        .args(["--format", "markdown"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0 regressions"));
}
