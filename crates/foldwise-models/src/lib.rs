//! foldwise-models: Reference plugins for the foldwise engine.
//!
//! Estimators, a scaling pipeline, a grid-search wrapper, metrics, feature
//! importance methods, and the TOML experiment configuration. Everything
//! here plugs into `foldwise-core` through its public traits.

pub mod builder;
pub mod config;
pub mod dummy;
pub mod error;
pub mod importance;
pub mod linear;
pub mod metrics;
pub mod pipeline;
pub mod search;
pub mod stump;
mod util;

pub use builder::DefaultPipelineBuilder;
pub use config::{load_config, load_config_from, validate_config, ConfigWarning, FoldwiseConfig};
pub use error::ModelError;
pub use importance::importance_by_name;
pub use metrics::metric_by_name;
