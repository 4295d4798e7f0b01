//! Experiment configuration and plugin factory.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use foldwise_core::data::{GroupLabels, ProblemType, SubjectId, TargetSpec};
use foldwise_core::engine::EvaluatorConfig;
use foldwise_core::scope::Scope;
use foldwise_core::split::SplitConfig;
use foldwise_core::traits::{
    Capabilities, ImportanceMethod, ImportanceSplit, InnerResampling, Metric, ModelSpec,
    ParamGrid, SearchConfig,
};

use crate::builder::{estimator, estimator_capabilities};
use crate::importance::{importance_by_name, required_capability};
use crate::metrics::metric_by_name;

/// One key or a list of keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Keys {
    One(String),
    Many(Vec<String>),
}

impl Keys {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Keys::One(key) => vec![key.clone()],
            Keys::Many(keys) => keys.clone(),
        }
    }
}

/// `[data]`: where subjects and columns come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// CSV with one row per subject.
    pub path: PathBuf,
    /// Column holding the subject id.
    #[serde(default = "default_subject_column")]
    pub subject_column: String,
    /// Newline-separated subject ids every evaluation is restricted to.
    #[serde(default)]
    pub final_subjects: Option<PathBuf>,
    /// Newline-separated held-out subject ids for `test`.
    #[serde(default)]
    pub test_subjects: Option<PathBuf>,
}

fn default_subject_column() -> String {
    "subject".to_string()
}

/// `[problem]`: the target and how it is scored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemConfig {
    pub target: Keys,
    pub problem_type: ProblemType,
    /// Metric names; the first is the primary metric.
    #[serde(default = "default_metrics")]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub random_state: u64,
    #[serde(default)]
    pub compute_train_score: bool,
    #[serde(default)]
    pub scope: Scope,
    /// Columns reserved for stratification or grouping, never features.
    #[serde(default)]
    pub strat: Vec<String>,
    #[serde(default)]
    pub covars: Vec<String>,
    #[serde(default)]
    pub categorical: Vec<String>,
}

fn default_metrics() -> Vec<String> {
    vec!["default".to_string()]
}

/// `[splits]`: outer resampling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitsConfig {
    #[serde(default = "default_n_splits")]
    pub n_splits: usize,
    #[serde(default = "default_n_repeats")]
    pub n_repeats: usize,
    /// Leave-one-group-out over this column instead of k-fold.
    #[serde(default)]
    pub group_column: Option<String>,
}

impl Default for SplitsConfig {
    fn default() -> Self {
        Self {
            n_splits: default_n_splits(),
            n_repeats: default_n_repeats(),
            group_column: None,
        }
    }
}

fn default_n_splits() -> usize {
    5
}
fn default_n_repeats() -> usize {
    1
}

/// `[search]`: inner hyper-parameter search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSection {
    pub grid: ParamGrid,
    #[serde(default = "default_inner_splits")]
    pub inner_splits: usize,
    /// Inner leave-one-group-out over this column instead of k-fold.
    #[serde(default)]
    pub group_column: Option<String>,
    /// Search metric; the primary metric when unset.
    #[serde(default)]
    pub metric: Option<String>,
}

fn default_inner_splits() -> usize {
    3
}

/// `[[importances]]`: one feature importance method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportanceConfig {
    pub name: String,
    #[serde(default)]
    pub split: ImportanceSplit,
}

/// Top-level foldwise experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldwiseConfig {
    /// Experiment name used in reports.
    #[serde(default = "default_name")]
    pub name: String,
    pub data: DataConfig,
    pub problem: ProblemConfig,
    #[serde(default)]
    pub splits: SplitsConfig,
    pub model: ModelSpec,
    #[serde(default)]
    pub search: Option<SearchSection>,
    #[serde(default)]
    pub importances: Vec<ImportanceConfig>,
    /// Output directory for reports.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_name() -> String {
    "foldwise".to_string()
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./foldwise-results")
}

impl FoldwiseConfig {
    pub fn target_spec(&self) -> Result<TargetSpec> {
        Ok(TargetSpec::new(self.problem.target.to_vec(), self.problem.problem_type)?)
    }

    /// Metric plugins in configured order.
    pub fn metrics(&self) -> Result<Vec<Arc<dyn Metric>>> {
        self.problem
            .metrics
            .iter()
            .map(|name| {
                metric_by_name(name, self.problem.problem_type)
                    .with_context(|| format!("invalid metric '{name}'"))
            })
            .collect()
    }

    pub fn importance_methods(&self) -> Result<Vec<Arc<dyn ImportanceMethod>>> {
        self.importances
            .iter()
            .map(|imp| {
                importance_by_name(&imp.name, imp.split)
                    .with_context(|| format!("invalid importance method '{}'", imp.name))
            })
            .collect()
    }

    /// Outer split configuration. Group labels are required when
    /// `[splits] group_column` is set.
    pub fn split_config(&self, groups: Option<GroupLabels>) -> Result<SplitConfig> {
        match (&self.splits.group_column, groups) {
            (Some(_), Some(groups)) => Ok(SplitConfig::leave_one_group_out(groups, self.splits.n_repeats)),
            (Some(column), None) => anyhow::bail!("group labels for column '{column}' were not loaded"),
            (None, _) => Ok(SplitConfig::k_fold(self.splits.n_splits, self.splits.n_repeats)),
        }
    }

    /// Search configuration, with inner group labels when the search
    /// groups by a column.
    pub fn search_config(&self, inner_groups: Option<GroupLabels>) -> Result<Option<SearchConfig>> {
        let Some(search) = &self.search else {
            return Ok(None);
        };
        let inner = match (&search.group_column, inner_groups) {
            (Some(_), Some(groups)) => InnerResampling::Groups(groups),
            (Some(column), None) => {
                anyhow::bail!("inner group labels for column '{column}' were not loaded")
            }
            (None, _) => InnerResampling::KFold {
                n_splits: search.inner_splits,
            },
        };
        let metric = search
            .metric
            .as_deref()
            .map(|name| {
                metric_by_name(name, self.problem.problem_type)
                    .with_context(|| format!("invalid search metric '{name}'"))
            })
            .transpose()?;
        Ok(Some(SearchConfig {
            grid: search.grid.clone(),
            inner,
            metric,
        }))
    }

    pub fn evaluator_config(
        &self,
        final_subjects: Option<HashSet<SubjectId>>,
        inner_groups: Option<GroupLabels>,
    ) -> Result<EvaluatorConfig> {
        let mut config = EvaluatorConfig::new(self.target_spec()?, self.model.clone());
        config.compute_train_score = self.problem.compute_train_score;
        config.random_state = self.problem.random_state;
        config.final_subjects = final_subjects;
        config.search = self.search_config(inner_groups)?;
        Ok(config)
    }

    /// Columns the CLI must load beyond the resolved scope.
    pub fn group_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self.splits.group_column.iter().cloned().collect();
        if let Some(column) = self.search.as_ref().and_then(|s| s.group_column.clone()) {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
        columns
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &Path| {
            let expanded = PathBuf::from(resolve_env_vars(&path.to_string_lossy()));
            if expanded.is_relative() {
                base.join(expanded)
            } else {
                expanded
            }
        };
        self.data.path = resolve(&self.data.path);
        self.data.final_subjects = self.data.final_subjects.as_deref().map(resolve);
        self.data.test_subjects = self.data.test_subjects.as_deref().map(resolve);
        self.output_dir = PathBuf::from(resolve_env_vars(&self.output_dir.to_string_lossy()));
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

/// Parse a config from TOML text. Relative paths resolve against `base`.
pub fn parse_config(content: &str, base: &Path) -> Result<FoldwiseConfig> {
    let mut config: FoldwiseConfig = toml::from_str(content).context("failed to parse config")?;
    config.resolve_paths(base);
    Ok(config)
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `foldwise.toml` in the current directory
/// 2. `~/.config/foldwise/config.toml`
pub fn load_config() -> Result<FoldwiseConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<FoldwiseConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            p.to_path_buf()
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("foldwise.toml");
        match dirs_path().map(|home| home.join("config.toml")) {
            _ if local.exists() => local,
            Some(global) if global.exists() => global,
            _ => anyhow::bail!(
                "no foldwise.toml in the current directory or ~/.config/foldwise; run `foldwise init`"
            ),
        }
    };

    let content = std::fs::read_to_string(&config_path)
        .with_context(|| format!("failed to read config: {}", config_path.display()))?;
    let base = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    parse_config(&content, &base)
        .with_context(|| format!("invalid config: {}", config_path.display()))
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("foldwise"))
}

/// A non-fatal problem found by [`validate_config`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigWarning {
    /// Config section the warning refers to.
    pub section: String,
    pub message: String,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.section, self.message)
    }
}

/// Check a config for combinations that would fail or mislead at run time.
pub fn validate_config(config: &FoldwiseConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();
    let mut warn = |section: &str, message: String| {
        warnings.push(ConfigWarning {
            section: section.to_string(),
            message,
        })
    };
    let problem_type = config.problem.problem_type;

    if let Err(e) = config.target_spec() {
        warn("problem", format!("{e:#}"));
    }
    if config.problem.metrics.is_empty() {
        warn("problem", "no metrics configured".into());
    }
    for name in &config.problem.metrics {
        if let Err(e) = metric_by_name(name, problem_type) {
            warn("problem", e.to_string());
        }
    }

    let capabilities = match estimator_capabilities(&config.model.name, problem_type) {
        Ok(caps) => Some(caps),
        Err(e) => {
            warn("model", e.to_string());
            None
        }
    };
    if let Ok(mut model) = estimator(&config.model.name, problem_type) {
        for (name, value) in &config.model.params {
            if let Err(e) = model.set_param(name, *value) {
                warn("model", format!("{e:#}"));
            }
        }
    }

    let needs_probabilities = config.problem.metrics.iter().any(|m| m == "roc_auc")
        || (config.problem.metrics.iter().any(|m| m == "default")
            && matches!(problem_type, ProblemType::Binary | ProblemType::Multilabel));
    if let Some(caps) = capabilities {
        if needs_probabilities && !caps.contains(Capabilities::PROBABILITIES) {
            warn(
                "problem",
                format!("roc_auc needs probabilities, which '{}' does not produce", config.model.name),
            );
        }
    }

    if config.splits.group_column.is_none() && config.splits.n_splits < 2 {
        warn("splits", format!("n_splits must be at least 2, got {}", config.splits.n_splits));
    }
    if config.splits.n_repeats == 0 {
        warn("splits", "n_repeats must be at least 1".into());
    }
    if config.splits.group_column.is_some() && config.splits.n_repeats > 1 {
        warn(
            "splits",
            "leave-one-group-out repeats are identical; n_repeats > 1 only repeats work".into(),
        );
    }

    if let Some(search) = &config.search {
        if search.grid.is_empty() {
            warn("search", "parameter grid is empty".into());
        }
        if search.group_column.is_none() && search.inner_splits < 2 {
            warn("search", format!("inner_splits must be at least 2, got {}", search.inner_splits));
        }
        if let Ok(model) = estimator(&config.model.name, problem_type) {
            let known = model.params();
            for name in search.grid.keys().filter(|k| !known.contains_key(*k)) {
                warn("search", format!("'{}' has no parameter '{name}'", config.model.name));
            }
        }
        if let Some(metric) = &search.metric {
            if let Err(e) = metric_by_name(metric, problem_type) {
                warn("search", e.to_string());
            }
        }
    }

    for imp in &config.importances {
        if let Err(e) = importance_by_name(&imp.name, imp.split) {
            warn("importances", e.to_string());
            continue;
        }
        if let (Some(required), Some(caps)) = (required_capability(&imp.name), capabilities) {
            if !caps.contains(required) {
                warn(
                    "importances",
                    format!(
                        "'{}' needs {required:?}, which '{}' does not expose",
                        imp.name, config.model.name
                    ),
                );
            }
        }
    }

    warnings
}

/// Starter config written by `foldwise init`.
pub fn starter_config() -> String {
    let params = BTreeMap::from([("alpha".to_string(), 1.0)]);
    let config = FoldwiseConfig {
        name: "example".into(),
        data: DataConfig {
            path: PathBuf::from("data.csv"),
            subject_column: default_subject_column(),
            final_subjects: None,
            test_subjects: None,
        },
        problem: ProblemConfig {
            target: Keys::One("target".into()),
            problem_type: ProblemType::Regression,
            metrics: vec!["r2".into(), "neg_mean_absolute_error".into()],
            random_state: 42,
            compute_train_score: true,
            scope: Scope::default(),
            strat: Vec::new(),
            covars: Vec::new(),
            categorical: Vec::new(),
        },
        splits: SplitsConfig::default(),
        model: ModelSpec {
            name: "ridge".into(),
            params,
            scale: true,
        },
        search: Some(SearchSection {
            grid: ParamGrid::from([("alpha".to_string(), vec![0.1, 1.0, 10.0])]),
            inner_splits: default_inner_splits(),
            group_column: None,
            metric: None,
        }),
        importances: vec![ImportanceConfig {
            name: "permutation".into(),
            split: ImportanceSplit::Test,
        }],
        output_dir: default_output_dir(),
    };
    toml::to_string_pretty(&config).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
name = "ages"

[data]
path = "subjects.csv"
final_subjects = "${_FOLDWISE_TEST_DIR}/final.txt"

[problem]
target = "age"
problem_type = "regression"
metrics = ["r2", "neg_mse"]
random_state = 7
scope = ["thick", "area"]
strat = ["site"]

[splits]
n_splits = 4
n_repeats = 2

[model]
name = "ridge"
scale = true
params = { alpha = 2.0 }

[search]
grid = { alpha = [0.1, 1.0] }
metric = "neg_mean_absolute_error"

[[importances]]
name = "coefficients"
split = "all"
"#;

    #[test]
    fn resolve_env_vars_basic() {
        std::env::set_var("_FOLDWISE_TEST_VAR", "hello");
        assert_eq!(resolve_env_vars("${_FOLDWISE_TEST_VAR}"), "hello");
        assert_eq!(
            resolve_env_vars("prefix_${_FOLDWISE_TEST_VAR}_suffix"),
            "prefix_hello_suffix"
        );
        std::env::remove_var("_FOLDWISE_TEST_VAR");
    }

    #[test]
    fn parses_full_config() {
        std::env::set_var("_FOLDWISE_TEST_DIR", "/lists");
        let config = parse_config(EXAMPLE, Path::new("/experiments")).unwrap();
        std::env::remove_var("_FOLDWISE_TEST_DIR");

        assert_eq!(config.name, "ages");
        assert_eq!(config.data.path, PathBuf::from("/experiments/subjects.csv"));
        assert_eq!(config.data.final_subjects, Some(PathBuf::from("/lists/final.txt")));
        assert_eq!(config.data.subject_column, "subject");
        assert_eq!(config.problem.target, Keys::One("age".into()));
        assert_eq!(
            config.problem.scope,
            Scope::Keys(vec!["thick".into(), "area".into()])
        );
        assert_eq!(config.splits.n_repeats, 2);
        assert_eq!(config.model.params["alpha"], 2.0);
        assert_eq!(config.importances[0].split, ImportanceSplit::All);

        let metrics = config.metrics().unwrap();
        assert_eq!(metrics[1].name(), "neg_mean_squared_error");

        let evaluator = config.evaluator_config(None, None).unwrap();
        assert_eq!(evaluator.random_state, 7);
        let search = evaluator.search.unwrap();
        assert!(matches!(search.inner, InnerResampling::KFold { n_splits: 3 }));
        assert_eq!(search.metric.unwrap().name(), "neg_mean_absolute_error");
    }

    #[test]
    fn defaults_apply() {
        let config = parse_config(
            r#"
[data]
path = "d.csv"
[problem]
target = ["a", "b"]
problem_type = "multilabel"
[model]
name = "logistic"
"#,
            Path::new(""),
        )
        .unwrap();
        assert_eq!(config.splits.n_splits, 5);
        assert_eq!(config.problem.metrics, vec!["default".to_string()]);
        assert_eq!(config.metrics().unwrap()[0].name(), "roc_auc");
        assert!(config.search_config(None).unwrap().is_none());
        assert!(validate_config(&config).is_empty());
    }

    #[test]
    fn group_column_requires_labels() {
        let mut config = parse_config(EXAMPLE, Path::new("")).unwrap();
        config.splits.group_column = Some("site".into());
        assert!(config.split_config(None).is_err());
        assert_eq!(config.group_columns(), vec!["site".to_string()]);
    }

    #[test]
    fn validation_flags_mismatches() {
        let mut config = parse_config(EXAMPLE, Path::new("")).unwrap();
        config.problem.metrics.push("accuracy".into());
        config.importances.push(ImportanceConfig {
            name: "tree".into(),
            split: ImportanceSplit::Test,
        });
        config.splits.n_splits = 1;
        if let Some(search) = config.search.as_mut() {
            search.grid.insert("depth".into(), vec![1.0]);
        }

        let warnings = validate_config(&config);
        let text: Vec<String> = warnings.iter().map(|w| w.to_string()).collect();
        assert!(text.iter().any(|w| w.contains("accuracy")), "{text:?}");
        assert!(text.iter().any(|w| w.starts_with("[importances]") && w.contains("tree")));
        assert!(text.iter().any(|w| w.contains("n_splits")));
        assert!(text.iter().any(|w| w.contains("depth")));
    }

    #[test]
    fn starter_config_round_trips() {
        let text = starter_config();
        let config = parse_config(&text, Path::new("")).unwrap();
        assert_eq!(config.model.name, "ridge");
        assert!(validate_config(&config).is_empty());
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let err = load_config_from(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn loads_from_file_relative_to_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foldwise.toml");
        std::fs::write(&path, starter_config()).unwrap();
        let config = load_config_from(Some(&path)).unwrap();
        assert_eq!(config.data.path, dir.path().join("data.csv"));
    }
}
