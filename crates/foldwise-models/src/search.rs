//! Exhaustive grid search over inner resampling splits.

use std::collections::BTreeMap;
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView2, Axis};

use foldwise_core::data::Target;
use foldwise_core::split::IndexSplit;
use foldwise_core::traits::{Capabilities, Metric, Model, ParamGrid, Predictions, Probabilities};

use crate::util::not_fitted;

/// Every combination of the grid's values, in key order.
pub fn candidates(grid: &ParamGrid) -> Vec<BTreeMap<String, f64>> {
    grid.iter().fold(vec![BTreeMap::new()], |acc, (name, values)| {
        acc.iter()
            .flat_map(|partial| {
                values.iter().map(move |v| {
                    let mut next = partial.clone();
                    next.insert(name.clone(), *v);
                    next
                })
            })
            .collect()
    })
}

/// Score of one candidate over the inner splits.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateScore {
    pub params: BTreeMap<String, f64>,
    pub mean_score: f64,
}

/// Wraps a pipeline. `fit` scores each candidate on the inner splits,
/// then refits the best one on all rows.
pub struct GridSearchModel {
    base: Box<dyn Model>,
    grid: ParamGrid,
    inner: Vec<IndexSplit>,
    scorer: Arc<dyn Metric>,
    best: Option<(Box<dyn Model>, BTreeMap<String, f64>)>,
    results: Vec<CandidateScore>,
}

impl GridSearchModel {
    pub fn new(
        base: Box<dyn Model>,
        grid: ParamGrid,
        inner: Vec<IndexSplit>,
        scorer: Arc<dyn Metric>,
    ) -> Self {
        Self {
            base,
            grid,
            inner,
            scorer,
            best: None,
            results: Vec::new(),
        }
    }

    /// Per-candidate scores from the last fit.
    pub fn results(&self) -> &[CandidateScore] {
        &self.results
    }

    fn configured(&self, params: &BTreeMap<String, f64>) -> anyhow::Result<Box<dyn Model>> {
        let mut model = self.base.clone_unfitted();
        for (name, value) in params {
            model.set_param(name, *value)?;
        }
        Ok(model)
    }

    fn score_candidate(
        &self,
        params: &BTreeMap<String, f64>,
        x: ArrayView2<'_, f64>,
        y: &Target,
    ) -> anyhow::Result<f64> {
        let mut total = 0.0;
        for split in &self.inner {
            let mut model = self.configured(params)?;
            let x_train = x.select(Axis(0), &split.train);
            model.fit(x_train.view(), &y.select(&split.train))?;
            let x_test = x.select(Axis(0), &split.test);
            total += self.scorer.score(model.as_ref(), x_test.view(), &y.select(&split.test))?;
        }
        Ok(total / self.inner.len().max(1) as f64)
    }

    fn fitted(&self) -> anyhow::Result<&dyn Model> {
        self.best
            .as_ref()
            .map(|(model, _)| model.as_ref())
            .ok_or_else(|| not_fitted(self.name()))
    }
}

impl Model for GridSearchModel {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn fit(&mut self, x: ArrayView2<'_, f64>, y: &Target) -> anyhow::Result<()> {
        anyhow::ensure!(!self.inner.is_empty(), "grid search needs at least one inner split");
        let mut results = Vec::new();
        let mut best: Option<CandidateScore> = None;
        for params in candidates(&self.grid) {
            let mean_score = self.score_candidate(&params, x, y)?;
            tracing::trace!(?params, mean_score, "scored candidate");
            let candidate = CandidateScore { params, mean_score };
            // Ties keep the earlier candidate. An undefined (NaN) score ranks last.
            if best.as_ref().map_or(true, |b| {
                candidate.mean_score > b.mean_score
                    || (b.mean_score.is_nan() && !candidate.mean_score.is_nan())
            }) {
                best = Some(candidate.clone());
            }
            results.push(candidate);
        }
        let best = best.ok_or_else(|| anyhow::anyhow!("parameter grid produced no candidates"))?;
        tracing::debug!(
            params = ?best.params,
            score = best.mean_score,
            scorer = self.scorer.name(),
            "grid search selected"
        );

        let mut model = self.configured(&best.params)?;
        model.fit(x, y)?;
        self.best = Some((model, best.params));
        self.results = results;
        Ok(())
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> anyhow::Result<Predictions> {
        self.fitted()?.predict(x)
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Option<anyhow::Result<Probabilities>> {
        match self.fitted() {
            Ok(model) => model.predict_proba(x),
            Err(e) => Some(Err(e)),
        }
    }

    fn capabilities(&self) -> Capabilities {
        self.base.capabilities() | Capabilities::SEARCHED
    }

    fn coefficients(&self) -> Option<Array1<f64>> {
        self.fitted().ok()?.coefficients()
    }

    fn feature_weights(&self) -> Option<Array1<f64>> {
        self.fitted().ok()?.feature_weights()
    }

    fn transform(&self, x: ArrayView2<'_, f64>) -> anyhow::Result<Array2<f64>> {
        self.fitted()?.transform(x)
    }

    fn params(&self) -> BTreeMap<String, f64> {
        match &self.best {
            Some((model, _)) => model.params(),
            None => self.base.params(),
        }
    }

    fn best_params(&self) -> Option<BTreeMap<String, f64>> {
        self.best.as_ref().map(|(_, params)| params.clone())
    }

    fn clone_unfitted(&self) -> Box<dyn Model> {
        Box::new(GridSearchModel::new(
            self.base.clone_unfitted(),
            self.grid.clone(),
            self.inner.clone(),
            Arc::clone(&self.scorer),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear::RidgeRegression;
    use crate::metrics::NegMeanSquaredError;
    use foldwise_core::split::k_fold_indices;
    use ndarray::array;

    #[test]
    fn candidates_are_cartesian() {
        let grid = ParamGrid::from([
            ("a".to_string(), vec![1.0, 2.0]),
            ("b".to_string(), vec![10.0, 20.0, 30.0]),
        ]);
        let all = candidates(&grid);
        assert_eq!(all.len(), 6);
        assert_eq!(all[0]["a"], 1.0);
        assert_eq!(all[0]["b"], 10.0);
        assert_eq!(all[5]["b"], 30.0);
    }

    #[test]
    fn empty_grid_has_one_candidate() {
        assert_eq!(candidates(&ParamGrid::new()), vec![BTreeMap::new()]);
    }

    #[test]
    fn picks_small_alpha_on_noiseless_data() {
        let x = Array2::from_shape_fn((20, 1), |(i, _)| i as f64);
        let y = Target::Single(x.column(0).mapv(|v| 3.0 * v + 1.0));
        let grid = ParamGrid::from([("alpha".to_string(), vec![1e4, 1e-6])]);
        let inner = k_fold_indices(20, 4, 7).unwrap();
        let mut search = GridSearchModel::new(
            Box::new(RidgeRegression::default()),
            grid,
            inner,
            Arc::new(NegMeanSquaredError),
        );
        search.fit(x.view(), &y).unwrap();

        assert_eq!(search.best_params().unwrap()["alpha"], 1e-6);
        assert_eq!(search.results().len(), 2);
        assert!(search.capabilities().contains(Capabilities::SEARCHED));
        assert!(search.capabilities().contains(Capabilities::LINEAR_COEFFICIENTS));
        match search.predict(array![[100.0]].view()).unwrap() {
            Predictions::Single(p) => assert!((p[0] - 301.0).abs() < 1e-3),
            other => panic!("unexpected {other:?}"),
        }
    }

    /// Undefined for heavily regularized ridge, negated alpha otherwise.
    struct UndefinedAboveOne;

    impl Metric for UndefinedAboveOne {
        fn name(&self) -> &str {
            "undefined_above_one"
        }
        fn score(&self, model: &dyn Model, _x: ArrayView2<'_, f64>, _y: &Target) -> anyhow::Result<f64> {
            let alpha = model.params()["alpha"];
            Ok(if alpha > 1.0 { f64::NAN } else { -alpha })
        }
    }

    #[test]
    fn undefined_candidate_scores_rank_last() {
        let x = Array2::from_shape_fn((12, 1), |(i, _)| i as f64);
        let y = Target::Single(x.column(0).to_owned());
        let grid = ParamGrid::from([("alpha".to_string(), vec![10.0, 0.5, 0.25])]);
        let mut search = GridSearchModel::new(
            Box::new(RidgeRegression::default()),
            grid,
            k_fold_indices(12, 3, 1).unwrap(),
            Arc::new(UndefinedAboveOne),
        );
        search.fit(x.view(), &y).unwrap();

        assert!(search.results()[0].mean_score.is_nan());
        assert_eq!(search.best_params().unwrap()["alpha"], 0.25);
    }

    #[test]
    fn predict_before_fit_fails() {
        let search = GridSearchModel::new(
            Box::new(RidgeRegression::default()),
            ParamGrid::new(),
            Vec::new(),
            Arc::new(NegMeanSquaredError),
        );
        assert!(search.predict(array![[1.0]].view()).is_err());
        assert!(search.best_params().is_none());
    }
}
