//! Model error types.

use thiserror::Error;

/// Errors raised by the reference estimators and plugin factories.
#[derive(Debug, Error)]
pub enum ModelError {
    /// `predict` or an accessor was called before `fit`.
    #[error("{0} has not been fitted")]
    NotFitted(String),

    /// The estimator name is not one of the built-in estimators.
    #[error("unknown estimator: {0}")]
    UnknownEstimator(String),

    /// A hyper-parameter the estimator does not have.
    #[error("{model} has no parameter '{name}'")]
    UnknownParameter { model: String, name: String },

    /// A hyper-parameter value outside its valid range.
    #[error("invalid value {value} for {model} parameter '{name}'")]
    InvalidParameter {
        model: String,
        name: String,
        value: f64,
    },

    /// The estimator cannot handle this target layout or problem type.
    #[error("{model} does not support {reason}")]
    UnsupportedTarget { model: String, reason: String },

    /// Fit was called with no rows.
    #[error("cannot fit {0} on an empty training set")]
    EmptyTrainingSet(String),

    /// The normal equations had no unique solution.
    #[error("singular system while fitting {0}")]
    Singular(String),

    /// Metric name not in the registry.
    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    /// The metric is not defined for the problem type.
    #[error("metric {metric} does not apply to {problem_type} problems")]
    MetricNotApplicable {
        metric: String,
        problem_type: foldwise_core::data::ProblemType,
    },

    /// Importance method name not in the registry.
    #[error("unknown importance method: {0}")]
    UnknownImportance(String),
}
