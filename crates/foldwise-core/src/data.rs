//! Core data model types for foldwise.
//!
//! Subjects, the subject-indexed data table, fold identities, and the
//! target layout every other module agrees on.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use ndarray::{concatenate, Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::EvalError;
use crate::scope::ResolvedColumns;

/// Opaque identifier of one row of the data table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SubjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Group label per subject, used by leave-one-group-out resampling.
pub type GroupLabels = HashMap<SubjectId, String>;

/// Identity of one evaluated fold.
///
/// All numbers are zero-based; `Display` and the ledger column names use
/// one-based repeat and fold numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FoldIndex {
    /// A cross-validation fold.
    Cv {
        /// Position in the overall fold sequence.
        ordinal: usize,
        repeat: usize,
        fold: usize,
    },
    /// The single train/test evaluation against an explicit held-out set.
    Final,
}

impl FoldIndex {
    /// Build the index of the `ordinal`-th fold of a run with `n_splits` folds per repeat.
    pub fn cv(ordinal: usize, n_splits: usize) -> Self {
        FoldIndex::Cv {
            ordinal,
            repeat: ordinal / n_splits,
            fold: ordinal % n_splits,
        }
    }

    /// Repeat segment used in ledger column names.
    pub fn repeat_label(&self) -> String {
        match self {
            FoldIndex::Cv { repeat, .. } => (repeat + 1).to_string(),
            FoldIndex::Final => "final".to_string(),
        }
    }

    /// One-based fold number within its repeat.
    pub fn fold_number(&self) -> Option<usize> {
        match self {
            FoldIndex::Cv { fold, .. } => Some(fold + 1),
            FoldIndex::Final => None,
        }
    }

    /// Whether global importances are computed on this fold.
    pub fn is_first(&self) -> bool {
        matches!(self, FoldIndex::Cv { ordinal: 0, .. } | FoldIndex::Final)
    }

    /// Whether this fold is the last one of its repeat.
    pub fn closes_repeat(&self, n_splits: usize) -> bool {
        match self {
            FoldIndex::Cv { fold, .. } => fold + 1 == n_splits,
            FoldIndex::Final => false,
        }
    }

    /// Seed offset for randomized plugins so that every fold sees a
    /// distinct but reproducible stream.
    pub fn seed_offset(&self) -> u64 {
        match self {
            FoldIndex::Cv { ordinal, .. } => *ordinal as u64,
            FoldIndex::Final => u64::MAX,
        }
    }
}

impl fmt::Display for FoldIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FoldIndex::Cv { repeat, fold, .. } => {
                write!(f, "repeat {} fold {}", repeat + 1, fold + 1)
            }
            FoldIndex::Final => write!(f, "final"),
        }
    }
}

/// Kind of learning problem the target describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProblemType {
    Regression,
    Binary,
    Categorical,
    Multilabel,
}

impl ProblemType {
    pub fn is_classification(&self) -> bool {
        !matches!(self, ProblemType::Regression)
    }
}

impl fmt::Display for ProblemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProblemType::Regression => write!(f, "regression"),
            ProblemType::Binary => write!(f, "binary"),
            ProblemType::Categorical => write!(f, "categorical"),
            ProblemType::Multilabel => write!(f, "multilabel"),
        }
    }
}

impl FromStr for ProblemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "regression" | "float" => Ok(ProblemType::Regression),
            "binary" => Ok(ProblemType::Binary),
            "categorical" | "multiclass" => Ok(ProblemType::Categorical),
            "multilabel" => Ok(ProblemType::Multilabel),
            other => Err(format!("unknown problem type: {other}")),
        }
    }
}

/// Target values for a set of rows.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// One value per row.
    Single(Array1<f64>),
    /// One column per target key, key order preserved.
    Multi(Array2<f64>),
}

impl Target {
    pub fn len(&self) -> usize {
        match self {
            Target::Single(y) => y.len(),
            Target::Multi(y) => y.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of output columns.
    pub fn n_outputs(&self) -> usize {
        match self {
            Target::Single(_) => 1,
            Target::Multi(y) => y.ncols(),
        }
    }

    pub fn as_single(&self) -> Option<&Array1<f64>> {
        match self {
            Target::Single(y) => Some(y),
            Target::Multi(_) => None,
        }
    }

    /// Rows at the given positions, in that order.
    pub fn select(&self, rows: &[usize]) -> Target {
        match self {
            Target::Single(y) => Target::Single(y.select(Axis(0), rows)),
            Target::Multi(y) => Target::Multi(y.select(Axis(0), rows)),
        }
    }

    /// Append the rows of `other` below these rows.
    pub fn concat(&self, other: &Target) -> Result<Target, EvalError> {
        match (self, other) {
            (Target::Single(a), Target::Single(b)) => concatenate(Axis(0), &[a.view(), b.view()])
                .map(Target::Single)
                .map_err(|e| EvalError::ShapeMismatch(e.to_string())),
            (Target::Multi(a), Target::Multi(b)) => concatenate(Axis(0), &[a.view(), b.view()])
                .map(Target::Multi)
                .map_err(|e| EvalError::ShapeMismatch(e.to_string())),
            _ => Err(EvalError::ShapeMismatch(
                "cannot concatenate single and multi-output targets".into(),
            )),
        }
    }

    /// Distinct values across all outputs, ascending.
    pub fn unique_values(&self) -> Vec<f64> {
        let mut values: Vec<f64> = match self {
            Target::Single(y) => y.iter().copied().collect(),
            Target::Multi(y) => y.iter().copied().collect(),
        };
        values.retain(|v| !v.is_nan());
        values.sort_by(|a, b| a.total_cmp(b));
        values.dedup();
        values
    }
}

/// Which columns hold the target, and what kind of problem it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub keys: Vec<String>,
    pub problem_type: ProblemType,
}

impl TargetSpec {
    pub fn new(keys: Vec<String>, problem_type: ProblemType) -> Result<Self, EvalError> {
        if keys.is_empty() {
            return Err(EvalError::config("at least one target key is required"));
        }
        let mut seen = HashSet::new();
        for key in &keys {
            if !seen.insert(key) {
                return Err(EvalError::config(format!("duplicate target key '{key}'")));
            }
        }
        Ok(Self { keys, problem_type })
    }

    pub fn single(key: impl Into<String>, problem_type: ProblemType) -> Self {
        Self {
            keys: vec![key.into()],
            problem_type,
        }
    }

    /// One-hot categorical columns that are collapsed into one class index.
    pub fn collapses_to_class_index(&self) -> bool {
        self.problem_type == ProblemType::Categorical && self.keys.len() > 1
    }

    /// Ledger key for a collapsed multiclass target: `multiclass_<base>`,
    /// where `<base>` is the first key without its last `_` segment.
    pub fn combined_key(&self) -> String {
        let first = &self.keys[0];
        let base = match first.rfind('_') {
            Some(pos) => &first[..pos],
            None => first.as_str(),
        };
        format!("multiclass_{base}")
    }

    /// Column names ground truth is recorded under in the ledger.
    pub fn truth_keys(&self) -> Vec<String> {
        if self.collapses_to_class_index() {
            vec![self.combined_key()]
        } else {
            self.keys.clone()
        }
    }

    /// Pull the target values out of a table.
    pub fn extract(&self, table: &DataTable) -> Result<Target, EvalError> {
        if self.keys.len() == 1 {
            let y = table
                .column(&self.keys[0])
                .ok_or_else(|| missing_column(&self.keys[0]))?;
            return Ok(Target::Single(y.to_owned()));
        }

        let block = table.select_columns(&self.keys)?;
        if self.collapses_to_class_index() {
            let labels = block
                .values()
                .rows()
                .into_iter()
                .map(|row| argmax(row) as f64)
                .collect::<Array1<f64>>();
            Ok(Target::Single(labels))
        } else {
            Ok(Target::Multi(block.values().to_owned()))
        }
    }
}

fn argmax(row: ArrayView1<'_, f64>) -> usize {
    let mut best = 0;
    for (i, v) in row.iter().enumerate() {
        if *v > row[best] {
            best = i;
        }
    }
    best
}

fn missing_column(key: &str) -> EvalError {
    EvalError::config(format!("column '{key}' not found in data table"))
}

/// Feature matrix and target for a set of rows.
#[derive(Debug, Clone)]
pub struct Xy {
    pub x: Array2<f64>,
    pub y: Target,
    pub feature_keys: Vec<String>,
}

/// Rows are subjects, columns are feature, strat and target keys.
///
/// The engine only ever re-slices a table; values are never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct DataTable {
    subjects: Vec<SubjectId>,
    index: HashMap<SubjectId, usize>,
    columns: Vec<String>,
    values: Array2<f64>,
}

impl DataTable {
    pub fn new(
        subjects: Vec<SubjectId>,
        columns: Vec<String>,
        values: Array2<f64>,
    ) -> Result<Self, EvalError> {
        if values.nrows() != subjects.len() || values.ncols() != columns.len() {
            return Err(EvalError::ShapeMismatch(format!(
                "table values are {}x{} but {} subjects and {} columns were given",
                values.nrows(),
                values.ncols(),
                subjects.len(),
                columns.len()
            )));
        }

        let mut index = HashMap::with_capacity(subjects.len());
        for (pos, subject) in subjects.iter().enumerate() {
            if index.insert(subject.clone(), pos).is_some() {
                return Err(EvalError::config(format!("duplicate subject '{subject}'")));
            }
        }

        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column) {
                return Err(EvalError::config(format!("duplicate column '{column}'")));
            }
        }

        Ok(Self {
            subjects,
            index,
            columns,
            values,
        })
    }

    /// Build a table from named columns of equal length.
    pub fn from_columns(
        subjects: Vec<SubjectId>,
        columns: Vec<(String, Vec<f64>)>,
    ) -> Result<Self, EvalError> {
        let n_rows = subjects.len();
        let mut values = Array2::<f64>::zeros((n_rows, columns.len()));
        let mut names = Vec::with_capacity(columns.len());
        for (j, (name, column)) in columns.into_iter().enumerate() {
            if column.len() != n_rows {
                return Err(EvalError::ShapeMismatch(format!(
                    "column '{name}' has {} values, expected {n_rows}",
                    column.len()
                )));
            }
            values.column_mut(j).assign(&Array1::from(column));
            names.push(name);
        }
        Self::new(subjects, names, values)
    }

    pub fn subjects(&self) -> &[SubjectId] {
        &self.subjects
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn n_rows(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    pub fn contains(&self, subject: &SubjectId) -> bool {
        self.index.contains_key(subject)
    }

    pub fn position(&self, subject: &SubjectId) -> Option<usize> {
        self.index.get(subject).copied()
    }

    pub fn column_index(&self, key: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == key)
    }

    pub fn column(&self, key: &str) -> Option<ArrayView1<'_, f64>> {
        self.column_index(key).map(|j| self.values.column(j))
    }

    /// Restrict to the given columns, in the given order.
    pub fn select_columns(&self, keys: &[String]) -> Result<DataTable, EvalError> {
        let positions = keys
            .iter()
            .map(|k| self.column_index(k).ok_or_else(|| missing_column(k)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(DataTable {
            subjects: self.subjects.clone(),
            index: self.index.clone(),
            columns: keys.to_vec(),
            values: self.values.select(Axis(1), &positions),
        })
    }

    /// Restrict to the given subjects, in the given order.
    pub fn rows(&self, subjects: &[SubjectId]) -> Result<DataTable, EvalError> {
        let positions = subjects
            .iter()
            .map(|s| {
                self.position(s)
                    .ok_or_else(|| EvalError::UnknownSubject(s.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        DataTable::new(
            subjects.to_vec(),
            self.columns.clone(),
            self.values.select(Axis(0), &positions),
        )
    }

    /// Stack the rows of `other` below these rows.
    pub fn concat(&self, other: &DataTable) -> Result<DataTable, EvalError> {
        if self.columns != other.columns {
            return Err(EvalError::ShapeMismatch(
                "cannot concatenate tables with different columns".into(),
            ));
        }
        let values = concatenate(Axis(0), &[self.values.view(), other.values.view()])
            .map_err(|e| EvalError::ShapeMismatch(e.to_string()))?;
        let subjects = self
            .subjects
            .iter()
            .chain(other.subjects.iter())
            .cloned()
            .collect();
        DataTable::new(subjects, self.columns.clone(), values)
    }

    /// Split into model features and target. Strat keys are never features.
    pub fn split_xy(
        &self,
        columns: &ResolvedColumns,
        target: &TargetSpec,
    ) -> Result<Xy, EvalError> {
        let x = self.select_columns(&columns.features)?.values;
        let y = target.extract(self)?;
        Ok(Xy {
            x,
            y,
            feature_keys: columns.features.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn table() -> DataTable {
        DataTable::from_columns(
            vec!["a".into(), "b".into(), "c".into()],
            vec![
                ("x1".into(), vec![1.0, 2.0, 3.0]),
                ("x2".into(), vec![4.0, 5.0, 6.0]),
                ("t_0".into(), vec![1.0, 0.0, 0.0]),
                ("t_1".into(), vec![0.0, 0.0, 1.0]),
                ("t_2".into(), vec![0.0, 1.0, 0.0]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn problem_type_display_and_parse() {
        assert_eq!(ProblemType::Binary.to_string(), "binary");
        assert_eq!(
            "multiclass".parse::<ProblemType>().unwrap(),
            ProblemType::Categorical
        );
        assert_eq!(
            "Regression".parse::<ProblemType>().unwrap(),
            ProblemType::Regression
        );
        assert!("ordinal".parse::<ProblemType>().is_err());
    }

    #[test]
    fn fold_index_labels() {
        let fold = FoldIndex::cv(7, 3);
        assert_eq!(
            fold,
            FoldIndex::Cv {
                ordinal: 7,
                repeat: 2,
                fold: 1
            }
        );
        assert_eq!(fold.repeat_label(), "3");
        assert_eq!(fold.fold_number(), Some(2));
        assert!(!fold.is_first());
        assert!(FoldIndex::cv(8, 3).closes_repeat(3));
        assert!(FoldIndex::Final.is_first());
        assert_eq!(FoldIndex::Final.repeat_label(), "final");
        assert_eq!(FoldIndex::Final.to_string(), "final");
    }

    #[test]
    fn rows_preserve_requested_order() {
        let t = table();
        let sub = t.rows(&["c".into(), "a".into()]).unwrap();
        assert_eq!(sub.subjects(), &[SubjectId::from("c"), SubjectId::from("a")]);
        assert_eq!(sub.column("x1").unwrap().to_vec(), vec![3.0, 1.0]);
    }

    #[test]
    fn rows_reject_unknown_subjects() {
        let err = table().rows(&["zz".into()]).unwrap_err();
        assert!(matches!(err, EvalError::UnknownSubject(s) if s.as_str() == "zz"));
    }

    #[test]
    fn duplicate_subjects_rejected() {
        let err = DataTable::from_columns(
            vec!["a".into(), "a".into()],
            vec![("x".into(), vec![1.0, 2.0])],
        )
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn collapsed_multiclass_target() {
        let spec = TargetSpec::new(
            vec!["t_0".into(), "t_1".into(), "t_2".into()],
            ProblemType::Categorical,
        )
        .unwrap();
        let y = spec.extract(&table()).unwrap();
        assert_eq!(y, Target::Single(array![0.0, 2.0, 1.0]));
        assert_eq!(spec.truth_keys(), vec!["multiclass_t".to_string()]);
    }

    #[test]
    fn multi_target_keeps_key_order() {
        let spec =
            TargetSpec::new(vec!["t_1".into(), "t_0".into()], ProblemType::Multilabel).unwrap();
        let y = spec.extract(&table()).unwrap();
        assert_eq!(
            y,
            Target::Multi(array![[0.0, 1.0], [0.0, 0.0], [1.0, 0.0]])
        );
        assert_eq!(spec.truth_keys(), vec!["t_1".to_string(), "t_0".to_string()]);
    }

    #[test]
    fn concat_stacks_rows() {
        let t = table();
        let a = t.rows(&["a".into()]).unwrap();
        let b = t.rows(&["b".into(), "c".into()]).unwrap();
        let all = a.concat(&b).unwrap();
        assert_eq!(all.n_rows(), 3);
        assert_eq!(all.column("x2").unwrap().to_vec(), vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn unique_values_sorted() {
        let y = Target::Single(array![2.0, 0.0, 2.0, 1.0]);
        assert_eq!(y.unique_values(), vec![0.0, 1.0, 2.0]);
    }
}
