//! CSV exports.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use foldwise_core::ledger::RawPredictionLedger;
use foldwise_core::report::EvaluationReport;

fn create(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::File::create(path).with_context(|| format!("failed to create {}", path.display()))
}

/// Write the ledger as CSV: a `subject` column followed by the ledger's
/// columns in creation order. Unrecorded cells are left empty.
pub fn write_ledger<W: Write>(ledger: &RawPredictionLedger, out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    let mut header = vec!["subject".to_string()];
    header.extend(ledger.columns().iter().cloned());
    writer.write_record(&header)?;

    let columns: Vec<_> = ledger
        .columns()
        .iter()
        .filter_map(|name| ledger.column(name))
        .collect();
    for (row, subject) in ledger.subjects().iter().enumerate() {
        let mut record = vec![subject.to_string()];
        record.extend(columns.iter().map(|cells| {
            cells[row]
                .as_ref()
                .map(|value| value.to_string())
                .unwrap_or_default()
        }));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn ledger_to_csv(ledger: &RawPredictionLedger) -> Result<String> {
    let mut buffer = Vec::new();
    write_ledger(ledger, &mut buffer)?;
    String::from_utf8(buffer).context("ledger CSV is not valid UTF-8")
}

pub fn write_ledger_csv(ledger: &RawPredictionLedger, path: &Path) -> Result<()> {
    write_ledger(ledger, create(path)?)
        .with_context(|| format!("failed to write ledger to {}", path.display()))
}

/// Write one row per fold: fold label, split sizes, then one column per
/// metric (and `train_<metric>` when training scores were kept).
pub fn write_scores_csv(report: &EvaluationReport, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_writer(create(path)?);
    let mut header = vec!["fold".to_string(), "n_train".into(), "n_test".into()];
    header.extend(report.metric_names.iter().cloned());
    let with_train = report.folds.iter().any(|f| f.train_scores.is_some());
    if with_train {
        header.extend(report.metric_names.iter().map(|m| format!("train_{m}")));
    }
    writer.write_record(&header)?;

    for fold in &report.folds {
        let mut record = vec![
            fold.fold.to_string(),
            fold.n_train.to_string(),
            fold.n_test.to_string(),
        ];
        record.extend(fold.test_scores.iter().map(|s| s.to_string()));
        if with_train {
            match &fold.train_scores {
                Some(scores) => record.extend(scores.iter().map(|s| s.to_string())),
                None => record.extend(report.metric_names.iter().map(|_| String::new())),
            }
        }
        writer.write_record(&record)?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to write scores to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use foldwise_core::data::{FoldIndex, SubjectId};
    use foldwise_core::engine::FoldReport;
    use foldwise_core::ledger::LedgerValue;

    fn ledger() -> RawPredictionLedger {
        let mut ledger = RawPredictionLedger::new(vec!["a".into(), "b".into()]);
        let a = SubjectId::new("a");
        ledger.set(&a, "1", LedgerValue::Number(0.5)).unwrap();
        ledger.set(&a, "1_fold", LedgerValue::Number(2.0)).unwrap();
        ledger
            .set(&SubjectId::new("b"), "final_fold", LedgerValue::Label("final".into()))
            .unwrap();
        ledger
    }

    #[test]
    fn ledger_csv_has_subject_index_and_blank_cells() {
        let text = ledger_to_csv(&ledger()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "subject,1,1_fold,final_fold");
        assert_eq!(lines[1], "a,0.5,2,");
        assert_eq!(lines[2], "b,,,final");
    }

    #[test]
    fn scores_csv_written_per_fold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("scores.csv");
        let mut report = crate::html::tests::sample_report();
        report.folds = vec![FoldReport {
            fold: FoldIndex::cv(0, 2),
            n_train: 8,
            n_test: 2,
            test_scores: vec![0.75, -1.5],
            train_scores: Some(vec![0.9, -0.5]),
            best_params: None,
            degenerate_class_fallbacks: 0,
            duration_ms: 3,
        }];
        write_scores_csv(&report, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "fold,n_train,n_test,r2,neg_mean_squared_error,train_r2,train_neg_mean_squared_error");
        assert!(lines[1].ends_with(",8,2,0.75,-1.5,0.9,-0.5"));
    }
}
