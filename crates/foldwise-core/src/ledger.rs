//! Raw prediction ledger.
//!
//! A subject-indexed table whose columns appear as folds are recorded.
//! Column names follow `<prefix><repeat>`, `<prefix><repeat>_prob_class_<label>`
//! and `<prefix><repeat>_fold`, where the prefix is empty for test-side
//! predictions and `train_` for train-side ones.

use std::collections::{HashMap, HashSet};
use std::fmt;

use ndarray::Axis;
use serde::{Deserialize, Serialize};

use crate::data::{FoldIndex, SubjectId, Target};
use crate::error::EvalError;
use crate::traits::{Predictions, Probabilities};

/// One cell of the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LedgerValue {
    Number(f64),
    Label(String),
}

impl LedgerValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            LedgerValue::Number(v) => Some(*v),
            LedgerValue::Label(_) => None,
        }
    }
}

impl fmt::Display for LedgerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerValue::Number(v) => write!(f, "{v}"),
            LedgerValue::Label(s) => f.write_str(s),
        }
    }
}

/// Which side of a split predictions were made on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Test,
    Train,
}

impl Side {
    pub fn prefix(&self) -> &'static str {
        match self {
            Side::Test => "",
            Side::Train => "train_",
        }
    }
}

/// Class labels used to name probability columns for one fold.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassLabels {
    pub labels: Vec<f64>,
    /// The fold's truth held a single class and `{0, 1}` was substituted.
    pub degenerate: bool,
}

/// Distinct classes observed in `truth`. A single observed class falls back
/// to the two-class labeling `{0, 1}` so probability columns keep their shape.
pub fn class_labels(truth: &Target) -> ClassLabels {
    let labels = truth.unique_values();
    if labels.len() <= 1 {
        ClassLabels {
            labels: vec![0.0, 1.0],
            degenerate: true,
        }
    } else {
        ClassLabels {
            labels,
            degenerate: false,
        }
    }
}

/// Render a class label the way column names expect: `1`, not `1.0`.
pub fn format_label(label: f64) -> String {
    if label.fract() == 0.0 && label.abs() < 1e15 {
        format!("{}", label as i64)
    } else {
        format!("{label}")
    }
}

/// Everything recorded for one side of one fold.
#[derive(Debug)]
pub struct PredictionRecord<'a> {
    pub side: Side,
    pub fold: FoldIndex,
    pub subjects: &'a [SubjectId],
    pub predictions: &'a Predictions,
    pub probabilities: Option<&'a Probabilities>,
    pub truth: &'a Target,
    /// Ledger keys for the ground truth columns.
    pub truth_keys: &'a [String],
    /// Raw target keys, used to name multi-output columns.
    pub target_keys: &'a [String],
    /// Class labels naming the columns of 2-D probabilities.
    pub classes: &'a [f64],
}

/// Subject-indexed table of out-of-fold predictions and ground truth.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "LedgerTable", into = "LedgerTable")]
pub struct RawPredictionLedger {
    subjects: Vec<SubjectId>,
    positions: HashMap<SubjectId, usize>,
    columns: Vec<String>,
    column_index: HashMap<String, usize>,
    cells: Vec<Vec<Option<LedgerValue>>>,
}

impl RawPredictionLedger {
    /// An empty ledger indexed by `subjects`. Duplicates keep their first position.
    pub fn new(subjects: impl IntoIterator<Item = SubjectId>) -> Self {
        let mut ledger = Self::default();
        for subject in subjects {
            if !ledger.positions.contains_key(&subject) {
                ledger.positions.insert(subject.clone(), ledger.subjects.len());
                ledger.subjects.push(subject);
            }
        }
        ledger
    }

    pub fn subjects(&self) -> &[SubjectId] {
        &self.subjects
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    /// Column names in creation order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Every cell of a column, aligned with [`RawPredictionLedger::subjects`].
    pub fn column(&self, name: &str) -> Option<&[Option<LedgerValue>]> {
        self.column_index
            .get(name)
            .map(|&j| self.cells[j].as_slice())
    }

    pub fn get(&self, subject: &SubjectId, column: &str) -> Option<&LedgerValue> {
        let row = *self.positions.get(subject)?;
        let col = *self.column_index.get(column)?;
        self.cells[col][row].as_ref()
    }

    /// Write one cell, creating the column if needed.
    pub fn set(
        &mut self,
        subject: &SubjectId,
        column: &str,
        value: LedgerValue,
    ) -> Result<(), EvalError> {
        let row = *self
            .positions
            .get(subject)
            .ok_or_else(|| EvalError::UnknownSubject(subject.clone()))?;
        let col = self.ensure_column(column);
        self.cells[col][row] = Some(value);
        Ok(())
    }

    fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(&j) = self.column_index.get(name) {
            return j;
        }
        let j = self.columns.len();
        self.columns.push(name.to_string());
        self.column_index.insert(name.to_string(), j);
        self.cells.push(vec![None; self.subjects.len()]);
        j
    }

    fn rows_of(&self, subjects: &[SubjectId]) -> Result<Vec<usize>, EvalError> {
        subjects
            .iter()
            .map(|s| {
                self.positions
                    .get(s)
                    .copied()
                    .ok_or_else(|| EvalError::UnknownSubject(s.clone()))
            })
            .collect()
    }

    fn write_column<I>(&mut self, name: &str, rows: &[usize], values: I)
    where
        I: IntoIterator<Item = LedgerValue>,
    {
        let col = self.ensure_column(name);
        for (&row, value) in rows.iter().zip(values) {
            self.cells[col][row] = Some(value);
        }
    }

    /// Record predictions, probabilities, fold tag and ground truth for one
    /// side of one fold. Later writes to the same cell replace earlier ones.
    pub fn record(&mut self, record: PredictionRecord<'_>) -> Result<(), EvalError> {
        let n = record.subjects.len();
        record.predictions.validate(n)?;
        if record.truth.len() != n {
            return Err(EvalError::ShapeMismatch(format!(
                "ground truth has {} rows for {n} subjects",
                record.truth.len()
            )));
        }
        if let Some(probabilities) = record.probabilities {
            probabilities.validate(n)?;
        }

        let rows = self.rows_of(record.subjects)?;
        let base = format!("{}{}", record.side.prefix(), record.fold.repeat_label());

        match record.predictions {
            Predictions::Single(p) => {
                self.write_column(&base, &rows, p.iter().map(|&v| LedgerValue::Number(v)));
            }
            Predictions::MultiOutput(p) => {
                for (j, column) in p.axis_iter(Axis(1)).enumerate() {
                    let name = match record.target_keys.get(j) {
                        Some(key) if p.ncols() == record.target_keys.len() => {
                            format!("{base}_{key}")
                        }
                        _ => format!("{base}_{j}"),
                    };
                    self.write_column(&name, &rows, column.iter().map(|&v| LedgerValue::Number(v)));
                }
            }
        }

        match record.probabilities {
            Some(Probabilities::Classes(p)) => {
                let labels: Vec<String> = if record.classes.len() == p.ncols() {
                    record.classes.iter().map(|&c| format_label(c)).collect()
                } else {
                    (0..p.ncols()).map(|c| c.to_string()).collect()
                };
                for (label, column) in labels.iter().zip(p.axis_iter(Axis(1))) {
                    let name = format!("{base}_prob_class_{label}");
                    self.write_column(&name, &rows, column.iter().map(|&v| LedgerValue::Number(v)));
                }
            }
            Some(Probabilities::PerTarget(targets)) => {
                for (t, p) in targets.iter().enumerate() {
                    let label = record
                        .target_keys
                        .get(t)
                        .cloned()
                        .unwrap_or_else(|| t.to_string());
                    let name = format!("{base}_prob_class_{label}");
                    self.write_column(
                        &name,
                        &rows,
                        p.column(1).iter().map(|&v| LedgerValue::Number(v)),
                    );
                }
            }
            None => {}
        }

        let tag = match record.fold.fold_number() {
            Some(fold) => LedgerValue::Number(fold as f64),
            None => LedgerValue::Label(record.fold.repeat_label()),
        };
        self.write_column(
            &format!("{base}_fold"),
            &rows,
            std::iter::repeat(tag).take(n),
        );

        match record.truth {
            Target::Single(y) => {
                let key = record.truth_keys.first().ok_or_else(|| {
                    EvalError::config("no ground truth key for a single target")
                })?;
                self.write_column(key, &rows, y.iter().map(|&v| LedgerValue::Number(v)));
            }
            Target::Multi(y) => {
                if record.truth_keys.len() != y.ncols() {
                    return Err(EvalError::ShapeMismatch(format!(
                        "{} ground truth keys for {} target columns",
                        record.truth_keys.len(),
                        y.ncols()
                    )));
                }
                for (key, column) in record.truth_keys.iter().zip(y.axis_iter(Axis(1))) {
                    self.write_column(key, &rows, column.iter().map(|&v| LedgerValue::Number(v)));
                }
            }
        }

        Ok(())
    }

    /// Subjects with at least one recorded value in `column`.
    pub fn filled(&self, column: &str) -> HashSet<&SubjectId> {
        match self.column(column) {
            Some(cells) => self
                .subjects
                .iter()
                .zip(cells)
                .filter(|(_, cell)| cell.is_some())
                .map(|(s, _)| s)
                .collect(),
            None => HashSet::new(),
        }
    }
}

/// Serialized shape of the ledger: subjects plus named columns.
#[derive(Serialize, Deserialize)]
struct LedgerTable {
    subjects: Vec<SubjectId>,
    columns: Vec<LedgerColumn>,
}

#[derive(Serialize, Deserialize)]
struct LedgerColumn {
    name: String,
    values: Vec<Option<LedgerValue>>,
}

impl From<RawPredictionLedger> for LedgerTable {
    fn from(ledger: RawPredictionLedger) -> Self {
        LedgerTable {
            subjects: ledger.subjects,
            columns: ledger
                .columns
                .into_iter()
                .zip(ledger.cells)
                .map(|(name, values)| LedgerColumn { name, values })
                .collect(),
        }
    }
}

impl From<LedgerTable> for RawPredictionLedger {
    fn from(table: LedgerTable) -> Self {
        let mut ledger = RawPredictionLedger::new(table.subjects);
        let n = ledger.len();
        for LedgerColumn { name, mut values } in table.columns {
            values.resize(n, None);
            let j = ledger.ensure_column(&name);
            ledger.cells[j] = values;
        }
        ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(names: &[&str]) -> Vec<SubjectId> {
        names.iter().map(|&s| SubjectId::from(s)).collect()
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn binary_fold_writes_predictions_probabilities_tag_and_truth() {
        let subjects = ids(&["a", "b", "c"]);
        let mut ledger = RawPredictionLedger::new(subjects.clone());
        let predictions = Predictions::Single(array![1.0, 0.0]);
        let probabilities = Probabilities::Classes(array![[0.2, 0.8], [0.7, 0.3]]);
        let truth = Target::Single(array![1.0, 0.0]);
        let truth_keys = keys(&["label"]);

        ledger
            .record(PredictionRecord {
                side: Side::Test,
                fold: FoldIndex::cv(1, 2),
                subjects: &subjects[1..],
                predictions: &predictions,
                probabilities: Some(&probabilities),
                truth: &truth,
                truth_keys: &truth_keys,
                target_keys: &truth_keys,
                classes: &[0.0, 1.0],
            })
            .unwrap();

        assert_eq!(
            ledger.columns(),
            &["1", "1_prob_class_0", "1_prob_class_1", "1_fold", "label"]
        );
        assert_eq!(
            ledger.get(&"c".into(), "1_prob_class_1"),
            Some(&LedgerValue::Number(0.3))
        );
        assert_eq!(
            ledger.get(&"b".into(), "1_fold"),
            Some(&LedgerValue::Number(2.0))
        );
        assert_eq!(ledger.get(&"a".into(), "1"), None);
    }

    #[test]
    fn multilabel_probabilities_take_positive_class_per_target() {
        let subjects = ids(&["a", "b"]);
        let mut ledger = RawPredictionLedger::new(subjects.clone());
        let predictions = Predictions::MultiOutput(array![[1.0, 0.0], [0.0, 1.0]]);
        let probabilities = Probabilities::PerTarget(vec![
            array![[0.1, 0.9], [0.8, 0.2]],
            array![[0.6, 0.4], [0.3, 0.7]],
        ]);
        let truth = Target::Multi(array![[1.0, 0.0], [0.0, 1.0]]);
        let target_keys = keys(&["t_a", "t_b"]);

        ledger
            .record(PredictionRecord {
                side: Side::Test,
                fold: FoldIndex::Final,
                subjects: &subjects,
                predictions: &predictions,
                probabilities: Some(&probabilities),
                truth: &truth,
                truth_keys: &target_keys,
                target_keys: &target_keys,
                classes: &[0.0, 1.0],
            })
            .unwrap();

        assert_eq!(
            ledger.get(&"a".into(), "final_prob_class_t_a"),
            Some(&LedgerValue::Number(0.9))
        );
        assert_eq!(
            ledger.get(&"b".into(), "final_prob_class_t_b"),
            Some(&LedgerValue::Number(0.7))
        );
        assert_eq!(
            ledger.get(&"a".into(), "final_t_b"),
            Some(&LedgerValue::Number(0.0))
        );
        assert_eq!(
            ledger.get(&"a".into(), "final_fold"),
            Some(&LedgerValue::Label("final".into()))
        );
        assert_eq!(ledger.get(&"b".into(), "t_b"), Some(&LedgerValue::Number(1.0)));
    }

    #[test]
    fn train_side_uses_prefix() {
        let subjects = ids(&["a"]);
        let mut ledger = RawPredictionLedger::new(subjects.clone());
        let predictions = Predictions::Single(array![2.5]);
        let truth = Target::Single(array![3.0]);
        let key = keys(&["y"]);
        ledger
            .record(PredictionRecord {
                side: Side::Train,
                fold: FoldIndex::Final,
                subjects: &subjects,
                predictions: &predictions,
                probabilities: None,
                truth: &truth,
                truth_keys: &key,
                target_keys: &key,
                classes: &[],
            })
            .unwrap();
        assert_eq!(ledger.columns(), &["train_final", "train_final_fold", "y"]);
    }

    #[test]
    fn unknown_subject_is_rejected() {
        let mut ledger = RawPredictionLedger::new(ids(&["a"]));
        let err = ledger
            .set(&"z".into(), "1", LedgerValue::Number(1.0))
            .unwrap_err();
        assert!(matches!(err, EvalError::UnknownSubject(_)));
    }

    #[test]
    fn prediction_count_must_match_subjects() {
        let subjects = ids(&["a", "b"]);
        let mut ledger = RawPredictionLedger::new(subjects.clone());
        let predictions = Predictions::Single(array![1.0]);
        let truth = Target::Single(array![1.0, 0.0]);
        let key = keys(&["y"]);
        let err = ledger
            .record(PredictionRecord {
                side: Side::Test,
                fold: FoldIndex::cv(0, 2),
                subjects: &subjects,
                predictions: &predictions,
                probabilities: None,
                truth: &truth,
                truth_keys: &key,
                target_keys: &key,
                classes: &[],
            })
            .unwrap_err();
        assert!(matches!(err, EvalError::ShapeMismatch(_)));
    }

    #[test]
    fn single_class_truth_falls_back_to_binary_labels() {
        let labels = class_labels(&Target::Single(array![1.0, 1.0, 1.0]));
        assert_eq!(labels.labels, vec![0.0, 1.0]);
        assert!(labels.degenerate);

        let labels = class_labels(&Target::Single(array![2.0, 0.0, 1.0]));
        assert_eq!(labels.labels, vec![0.0, 1.0, 2.0]);
        assert!(!labels.degenerate);
    }

    #[test]
    fn label_formatting() {
        assert_eq!(format_label(1.0), "1");
        assert_eq!(format_label(-2.0), "-2");
        assert_eq!(format_label(0.5), "0.5");
    }

    #[test]
    fn json_round_trip_preserves_column_order() {
        let mut ledger = RawPredictionLedger::new(ids(&["a", "b"]));
        ledger.set(&"b".into(), "z", LedgerValue::Number(1.0)).unwrap();
        ledger
            .set(&"a".into(), "a", LedgerValue::Label("final".into()))
            .unwrap();
        let json = serde_json::to_string(&ledger).unwrap();
        let back: RawPredictionLedger = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ledger);
        assert_eq!(back.columns(), &["z", "a"]);
    }
}
