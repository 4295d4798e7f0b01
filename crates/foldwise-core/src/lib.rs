//! foldwise-core: Cross-validation engine, prediction ledger, and importance aggregation.
//!
//! This crate defines the data model, the plugin contracts (models, metrics,
//! importance methods, pipeline builders, scope resolvers), and the
//! evaluation engine that the rest of foldwise builds on.

pub mod data;
pub mod engine;
pub mod error;
pub mod importance;
pub mod ledger;
mod nullable;
pub mod report;
pub mod scope;
pub mod split;
pub mod statistics;
pub mod traits;

pub use data::{DataTable, FoldIndex, GroupLabels, ProblemType, SubjectId, Target, TargetSpec};
pub use engine::{
    Evaluation, Evaluator, EvaluatorConfig, FoldObserver, FoldReport, NoopObserver, TestEvaluation,
};
pub use error::EvalError;
pub use importance::{ImportanceRecord, ImportanceWindow};
pub use ledger::{LedgerValue, RawPredictionLedger};
pub use report::{EvaluationReport, RegressionReport, ReportMeta};
pub use scope::{Scope, ScopeResolver, Scopes};
pub use split::SplitConfig;
