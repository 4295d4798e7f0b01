//! Small numeric helpers shared by the estimators.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use foldwise_core::data::Target;

use crate::error::ModelError;

/// Distinct values in ascending order, NaN dropped.
pub(crate) fn distinct(values: ArrayView1<'_, f64>) -> Vec<f64> {
    let mut out: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    out.sort_by(|a, b| a.total_cmp(b));
    out.dedup();
    out
}

/// Targets as an `n x outputs` matrix.
pub(crate) fn target_matrix(y: &Target) -> Array2<f64> {
    match y {
        Target::Single(y) => y.view().insert_axis(Axis(1)).to_owned(),
        Target::Multi(y) => y.clone(),
    }
}

pub(crate) fn check_rows(model: &str, x: ArrayView2<'_, f64>, y: &Target) -> Result<(), ModelError> {
    if x.nrows() == 0 {
        return Err(ModelError::EmptyTrainingSet(model.to_string()));
    }
    if x.nrows() != y.len() {
        return Err(ModelError::UnsupportedTarget {
            model: model.to_string(),
            reason: format!("{} feature rows with {} target rows", x.nrows(), y.len()),
        });
    }
    Ok(())
}

/// Index of the largest value; ties go to the first.
pub(crate) fn argmax(row: ArrayView1<'_, f64>) -> usize {
    let mut best = 0;
    for (i, v) in row.iter().enumerate() {
        if *v > row[best] {
            best = i;
        }
    }
    best
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Column means, zero for an empty matrix.
pub(crate) fn column_means(x: ArrayView2<'_, f64>) -> Array1<f64> {
    x.mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(x.ncols()))
}

pub(crate) fn not_fitted(model: &str) -> anyhow::Error {
    ModelError::NotFitted(model.to_string()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn distinct_sorts_and_dedups() {
        assert_eq!(distinct(array![2.0, 0.0, 2.0, f64::NAN].view()), vec![0.0, 2.0]);
    }

    #[test]
    fn sigmoid_is_stable_at_extremes() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
        assert!(sigmoid(-800.0) >= 0.0);
        assert!(sigmoid(800.0) <= 1.0);
    }

    #[test]
    fn target_matrix_shapes() {
        assert_eq!(target_matrix(&Target::Single(array![1.0, 2.0])).dim(), (2, 1));
    }
}
