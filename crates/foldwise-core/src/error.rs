//! Evaluation error types.
//!
//! Plugins (models, metrics, importance methods) report failures through
//! `anyhow::Error`; the engine wraps them here together with the fold that
//! produced them so callers can tell configuration problems from runtime
//! failures without string matching.

use thiserror::Error;

use crate::data::{FoldIndex, SubjectId};

/// Boxed plugin error carried as the source of a fold-scoped failure.
pub type PluginError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while evaluating a pipeline.
#[derive(Debug, Error)]
pub enum EvalError {
    /// Invalid split counts, unresolvable scopes, mismatched dimensions.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A split or subject list referenced a subject the data table does not hold.
    #[error("subject '{0}' is not present in the data table")]
    UnknownSubject(SubjectId),

    /// The model raised during fit. Aborts the whole evaluation.
    #[error("fit failed at {fold}: {source}")]
    FitFailure {
        fold: FoldIndex,
        #[source]
        source: PluginError,
    },

    /// A metric could not be computed for a fold.
    #[error("metric '{metric}' failed at {fold}: {source}")]
    Scoring {
        metric: String,
        fold: FoldIndex,
        #[source]
        source: PluginError,
    },

    /// The fitted model raised while predicting or transforming features.
    #[error("prediction failed at {fold}: {source}")]
    Prediction {
        fold: FoldIndex,
        #[source]
        source: PluginError,
    },

    /// Prediction or probability output had an unexpected shape.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A feature importance method failed.
    #[error("importance method '{method}' failed at {fold}: {source}")]
    Importance {
        method: String,
        fold: FoldIndex,
        #[source]
        source: PluginError,
    },
}

impl EvalError {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        EvalError::Configuration(message.into())
    }

    /// Returns `true` for errors caused by invalid input rather than a
    /// failing plugin. These are never worth retrying.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            EvalError::Configuration(_) | EvalError::UnknownSubject(_)
        )
    }

    /// The fold a runtime failure happened in, if any.
    pub fn fold(&self) -> Option<FoldIndex> {
        match self {
            EvalError::FitFailure { fold, .. }
            | EvalError::Scoring { fold, .. }
            | EvalError::Prediction { fold, .. }
            | EvalError::Importance { fold, .. } => Some(*fold),
            _ => None,
        }
    }
}
