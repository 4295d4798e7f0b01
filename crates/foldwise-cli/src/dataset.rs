//! CSV dataset loading.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};

use foldwise_core::data::{DataTable, GroupLabels, SubjectId};

/// A loaded CSV: numeric columns as a [`DataTable`], label columns as strings.
#[derive(Debug)]
pub struct Dataset {
    pub table: DataTable,
    labels: BTreeMap<String, Vec<String>>,
}

impl Dataset {
    /// Group labels for a column loaded as labels.
    pub fn group_labels(&self, column: &str) -> Result<GroupLabels> {
        let values = self
            .labels
            .get(column)
            .with_context(|| format!("group column '{column}' was not loaded"))?;
        Ok(self
            .table
            .subjects()
            .iter()
            .cloned()
            .zip(values.iter().cloned())
            .collect())
    }
}

/// Load `path` with `subject_column` as the row index.
///
/// Columns named in `label_columns` are kept verbatim. Every other column
/// must parse as a number; empty cells are rejected.
pub fn load_dataset(path: &Path, subject_column: &str, label_columns: &[String]) -> Result<Dataset> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open dataset {}", path.display()))?;
    let headers: Vec<String> = reader
        .headers()
        .context("failed to read dataset header")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let subject_idx = headers
        .iter()
        .position(|h| h == subject_column)
        .with_context(|| format!("subject column '{subject_column}' not found in {}", path.display()))?;
    for label in label_columns {
        anyhow::ensure!(
            headers.contains(label),
            "column '{label}' not found in {}",
            path.display()
        );
    }

    let numeric: Vec<(usize, &String)> = headers
        .iter()
        .enumerate()
        .filter(|(i, h)| *i != subject_idx && !label_columns.contains(*h))
        .collect();

    let mut subjects = Vec::new();
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); numeric.len()];
    let label_idx: Vec<usize> = label_columns
        .iter()
        .filter_map(|label| headers.iter().position(|h| h == label))
        .collect();
    let mut labels: Vec<Vec<String>> = vec![Vec::new(); label_columns.len()];

    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("failed to read row {}", row + 2))?;
        subjects.push(SubjectId::new(record.get(subject_idx).unwrap_or_default().trim()));
        for (column, (j, name)) in columns.iter_mut().zip(&numeric) {
            let cell = record.get(*j).unwrap_or_default().trim();
            let value: f64 = cell.parse().with_context(|| {
                format!("row {}: column '{name}' has non-numeric value '{cell}'", row + 2)
            })?;
            column.push(value);
        }
        for (values, j) in labels.iter_mut().zip(&label_idx) {
            values.push(record.get(*j).unwrap_or_default().trim().to_string());
        }
    }

    let table = DataTable::from_columns(
        subjects,
        numeric
            .into_iter()
            .map(|(_, name)| name.clone())
            .zip(columns)
            .collect(),
    )
    .with_context(|| format!("invalid dataset {}", path.display()))?;
    tracing::debug!(
        path = %path.display(),
        rows = table.n_rows(),
        columns = table.columns().len(),
        "loaded dataset"
    );
    Ok(Dataset {
        table,
        labels: label_columns.iter().cloned().zip(labels).collect(),
    })
}

/// Read subject ids, one per line. Blank lines and `#` comments are skipped.
pub fn read_subject_list(path: &Path) -> Result<Vec<SubjectId>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read subject list {}", path.display()))?;
    let mut seen = HashSet::new();
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| seen.insert(line.to_string()))
        .map(SubjectId::new)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn loads_numeric_and_label_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "data.csv",
            "subject,x,site,y\ns1,1.5,a,2\ns2,-0.5,b,3\n",
        );
        let dataset = load_dataset(&path, "subject", &["site".to_string()]).unwrap();
        assert_eq!(dataset.table.columns(), &["x".to_string(), "y".to_string()]);
        assert_eq!(dataset.table.column("x").unwrap().to_vec(), vec![1.5, -0.5]);

        let groups = dataset.group_labels("site").unwrap();
        assert_eq!(groups[&SubjectId::new("s2")], "b");
        assert!(dataset.group_labels("x").is_err());
    }

    #[test]
    fn rejects_non_numeric_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "data.csv", "subject,x\ns1,1\ns2,oops\n");
        let err = load_dataset(&path, "subject", &[]).unwrap_err();
        assert!(format!("{err:#}").contains("row 3"));
    }

    #[test]
    fn missing_subject_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "data.csv", "id,x\ns1,1\n");
        assert!(load_dataset(&path, "subject", &[]).is_err());
    }

    #[test]
    fn subject_list_skips_comments_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "test.txt", "# held out\ns3\n\ns1\ns3\n");
        let subjects = read_subject_list(&path).unwrap();
        assert_eq!(subjects, vec![SubjectId::new("s3"), SubjectId::new("s1")]);
    }
}
