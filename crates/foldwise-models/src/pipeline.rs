//! Preprocessing pipeline: optional standardization in front of an estimator.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, ArrayView2, Axis};

use foldwise_core::data::Target;
use foldwise_core::traits::{Capabilities, Model, Predictions, Probabilities};

/// Per-column standardization learned on the training rows.
#[derive(Debug, Clone, Default)]
pub struct StandardScaler {
    mean: Option<Array1<f64>>,
    scale: Option<Array1<f64>>,
}

impl StandardScaler {
    pub fn fit(&mut self, x: ArrayView2<'_, f64>) {
        let mean = x
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(x.ncols()));
        // Constant columns keep unit scale so they map to zero.
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 1e-12 { s } else { 1.0 });
        self.mean = Some(mean);
        self.scale = Some(scale);
    }

    pub fn transform(&self, x: ArrayView2<'_, f64>) -> anyhow::Result<Array2<f64>> {
        match (&self.mean, &self.scale) {
            (Some(mean), Some(scale)) => {
                anyhow::ensure!(
                    mean.len() == x.ncols(),
                    "scaler fitted on {} columns, got {}",
                    mean.len(),
                    x.ncols()
                );
                Ok((&x - mean) / scale)
            }
            _ => anyhow::bail!("scaler has not been fitted"),
        }
    }
}

/// An estimator with optional scaling. Parameters pass through to the estimator.
pub struct Pipeline {
    scaler: Option<StandardScaler>,
    estimator: Box<dyn Model>,
}

impl Pipeline {
    pub fn new(estimator: Box<dyn Model>, scale: bool) -> Self {
        Self {
            scaler: scale.then(StandardScaler::default),
            estimator,
        }
    }

    pub fn is_scaled(&self) -> bool {
        self.scaler.is_some()
    }

    fn prepare(&self, x: ArrayView2<'_, f64>) -> anyhow::Result<Array2<f64>> {
        match &self.scaler {
            Some(scaler) => scaler.transform(x),
            None => Ok(x.to_owned()),
        }
    }
}

impl Model for Pipeline {
    fn name(&self) -> &str {
        self.estimator.name()
    }

    fn fit(&mut self, x: ArrayView2<'_, f64>, y: &Target) -> anyhow::Result<()> {
        match &mut self.scaler {
            Some(scaler) => {
                scaler.fit(x);
                let scaled = scaler.transform(x)?;
                self.estimator.fit(scaled.view(), y)
            }
            None => self.estimator.fit(x, y),
        }
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> anyhow::Result<Predictions> {
        if self.scaler.is_none() {
            return self.estimator.predict(x);
        }
        let x = self.prepare(x)?;
        self.estimator.predict(x.view())
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Option<anyhow::Result<Probabilities>> {
        if self.scaler.is_none() {
            return self.estimator.predict_proba(x);
        }
        match self.prepare(x) {
            Ok(x) => self.estimator.predict_proba(x.view()),
            Err(e) => Some(Err(e)),
        }
    }

    fn capabilities(&self) -> Capabilities {
        self.estimator.capabilities()
    }

    fn coefficients(&self) -> Option<Array1<f64>> {
        self.estimator.coefficients()
    }

    fn feature_weights(&self) -> Option<Array1<f64>> {
        self.estimator.feature_weights()
    }

    fn transform(&self, x: ArrayView2<'_, f64>) -> anyhow::Result<Array2<f64>> {
        self.prepare(x)
    }

    fn params(&self) -> BTreeMap<String, f64> {
        self.estimator.params()
    }

    fn set_param(&mut self, name: &str, value: f64) -> anyhow::Result<()> {
        self.estimator.set_param(name, value)
    }

    fn clone_unfitted(&self) -> Box<dyn Model> {
        Box::new(Pipeline::new(self.estimator.clone_unfitted(), self.is_scaled()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear::RidgeRegression;
    use ndarray::array;

    #[test]
    fn scaler_standardizes_columns() {
        let x = array![[1.0, 5.0], [3.0, 5.0]];
        let mut scaler = StandardScaler::default();
        scaler.fit(x.view());
        let out = scaler.transform(x.view()).unwrap();
        assert_eq!(out, array![[-1.0, 0.0], [1.0, 0.0]]);
    }

    #[test]
    fn transform_before_fit_fails() {
        let scaler = StandardScaler::default();
        assert!(scaler.transform(array![[1.0]].view()).is_err());
    }

    #[test]
    fn pipeline_transform_uses_training_statistics() {
        let x = array![[0.0], [2.0], [4.0]];
        let mut pipeline = Pipeline::new(Box::new(RidgeRegression::default()), true);
        pipeline.fit(x.view(), &Target::Single(array![0.0, 1.0, 2.0])).unwrap();
        let processed = pipeline.transform(array![[2.0]].view()).unwrap();
        assert!(processed[[0, 0]].abs() < 1e-12);
        assert!(pipeline.capabilities().contains(Capabilities::LINEAR_COEFFICIENTS));
    }

    #[test]
    fn unscaled_transform_is_identity() {
        let pipeline = Pipeline::new(Box::new(RidgeRegression::default()), false);
        let x = array![[3.0, -1.0]];
        assert_eq!(pipeline.transform(x.view()).unwrap(), x);
    }

    #[test]
    fn params_route_to_estimator() {
        let mut pipeline = Pipeline::new(Box::new(RidgeRegression::default()), true);
        pipeline.set_param("alpha", 4.0).unwrap();
        let copy = pipeline.clone_unfitted();
        assert_eq!(copy.params()["alpha"], 4.0);
        assert_eq!(copy.name(), "ridge");
    }
}
