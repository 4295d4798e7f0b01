//! Default pipeline builder over the built-in estimators.

use std::sync::Arc;

use foldwise_core::data::ProblemType;
use foldwise_core::split::IndexSplit;
use foldwise_core::traits::{Capabilities, Metric, Model, ModelSpec, ParamGrid, PipelineBuilder};

use crate::dummy::DummyEstimator;
use crate::error::ModelError;
use crate::linear::{LogisticRegression, RidgeRegression};
use crate::pipeline::Pipeline;
use crate::search::GridSearchModel;
use crate::stump::DecisionStump;

/// Names accepted by [`estimator`].
pub const ESTIMATORS: &[&str] = &["dummy", "ridge", "logistic", "stump"];

/// A fresh estimator by name, checked against the problem type.
pub fn estimator(name: &str, problem_type: ProblemType) -> Result<Box<dyn Model>, ModelError> {
    let unsupported = |reason: &str| ModelError::UnsupportedTarget {
        model: name.to_string(),
        reason: reason.to_string(),
    };
    match name {
        "dummy" => Ok(Box::new(DummyEstimator::new(problem_type))),
        "ridge" if problem_type == ProblemType::Regression => Ok(Box::new(RidgeRegression::default())),
        "ridge" => Err(unsupported(&format!("{problem_type} problems"))),
        "logistic" if problem_type.is_classification() => {
            Ok(Box::new(LogisticRegression::new(problem_type)))
        }
        "logistic" => Err(unsupported("regression problems")),
        "stump" => Ok(Box::new(DecisionStump::new(problem_type))),
        other => Err(ModelError::UnknownEstimator(other.to_string())),
    }
}

/// Capabilities the named estimator reports, for configuration checks.
pub fn estimator_capabilities(name: &str, problem_type: ProblemType) -> Result<Capabilities, ModelError> {
    estimator(name, problem_type).map(|model| model.capabilities())
}

/// Builds [`Pipeline`]s from a [`ModelSpec`] and wraps them in [`GridSearchModel`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPipelineBuilder;

impl PipelineBuilder for DefaultPipelineBuilder {
    fn build(
        &self,
        feature_keys: &[String],
        spec: &ModelSpec,
        problem_type: ProblemType,
    ) -> anyhow::Result<Box<dyn Model>> {
        anyhow::ensure!(!feature_keys.is_empty(), "no feature keys to build a pipeline over");
        let mut model = estimator(&spec.name, problem_type)?;
        for (name, value) in &spec.params {
            model.set_param(name, *value)?;
        }
        tracing::debug!(
            estimator = %spec.name,
            n_features = feature_keys.len(),
            scale = spec.scale,
            "built pipeline"
        );
        Ok(Box::new(Pipeline::new(model, spec.scale)))
    }

    fn wrap_with_search(
        &self,
        pipeline: Box<dyn Model>,
        grid: &ParamGrid,
        inner: Vec<IndexSplit>,
        scorer: Arc<dyn Metric>,
    ) -> anyhow::Result<Box<dyn Model>> {
        let known = pipeline.params();
        for (name, values) in grid {
            if !known.contains_key(name) {
                return Err(ModelError::UnknownParameter {
                    model: pipeline.name().to_string(),
                    name: name.clone(),
                }
                .into());
            }
            anyhow::ensure!(!values.is_empty(), "grid for '{name}' has no values");
        }
        Ok(Box::new(GridSearchModel::new(pipeline, grid.clone(), inner, scorer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::R2;

    fn keys() -> Vec<String> {
        vec!["a".into()]
    }

    #[test]
    fn builds_with_params() {
        let spec = ModelSpec::new("ridge").with_param("alpha", 0.5).scaled();
        let model = DefaultPipelineBuilder
            .build(&keys(), &spec, ProblemType::Regression)
            .unwrap();
        assert_eq!(model.name(), "ridge");
        assert_eq!(model.params()["alpha"], 0.5);
    }

    #[test]
    fn rejects_mismatched_problem_type() {
        let err = DefaultPipelineBuilder
            .build(&keys(), &ModelSpec::new("ridge"), ProblemType::Binary)
            .unwrap_err();
        assert!(err.to_string().contains("binary"));
        assert!(estimator("logistic", ProblemType::Regression).is_err());
        assert!(matches!(
            estimator("forest", ProblemType::Regression),
            Err(ModelError::UnknownEstimator(_))
        ));
    }

    #[test]
    fn rejects_unknown_params() {
        let spec = ModelSpec::new("stump").with_param("depth", 3.0);
        assert!(DefaultPipelineBuilder
            .build(&keys(), &spec, ProblemType::Regression)
            .is_err());
    }

    #[test]
    fn search_grid_must_name_known_params() {
        let pipeline = DefaultPipelineBuilder
            .build(&keys(), &ModelSpec::new("ridge"), ProblemType::Regression)
            .unwrap();
        let grid = ParamGrid::from([("gamma".to_string(), vec![1.0])]);
        assert!(DefaultPipelineBuilder
            .wrap_with_search(pipeline, &grid, Vec::new(), Arc::new(R2))
            .is_err());
    }

    #[test]
    fn search_wrapper_reports_capability() {
        let pipeline = DefaultPipelineBuilder
            .build(&keys(), &ModelSpec::new("ridge"), ProblemType::Regression)
            .unwrap();
        let grid = ParamGrid::from([("alpha".to_string(), vec![0.1, 1.0])]);
        let searched = DefaultPipelineBuilder
            .wrap_with_search(pipeline, &grid, Vec::new(), Arc::new(R2))
            .unwrap();
        assert!(searched.capabilities().contains(Capabilities::SEARCHED));
    }

    #[test]
    fn capabilities_by_name() {
        assert_eq!(
            estimator_capabilities("stump", ProblemType::Regression).unwrap(),
            Capabilities::TREE_FEATURE_WEIGHTS
        );
    }
}
