//! Column scopes.
//!
//! A scope is a symbolic column group ("all", "covars", a list of column
//! names or name stubs) that resolves to an ordered, deduplicated list of
//! feature keys. Strat and target keys always come last and are never
//! features.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EvalError;

/// Named scopes understood by [`Scopes`].
pub const NAMED_SCOPES: &[&str] = &[
    "all",
    "n",
    "data",
    "covars",
    "float",
    "float covars",
    "fc",
    "cat",
    "categorical",
];

/// A symbolic selection of feature columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scope {
    Name(String),
    Keys(Vec<String>),
}

impl Default for Scope {
    fn default() -> Self {
        Scope::Name("all".to_string())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Name(name) => write!(f, "{name}"),
            Scope::Keys(keys) => write!(f, "[{}]", keys.join(", ")),
        }
    }
}

/// Concrete columns a scope resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedColumns {
    pub features: Vec<String>,
    pub strat: Vec<String>,
    pub targets: Vec<String>,
}

impl ResolvedColumns {
    /// Features, then strat keys, then target keys.
    pub fn all_keys(&self) -> Vec<String> {
        self.features
            .iter()
            .chain(self.strat.iter())
            .chain(self.targets.iter())
            .cloned()
            .collect()
    }
}

/// Maps a scope to concrete column keys.
pub trait ScopeResolver: Send + Sync {
    fn resolve(&self, scope: &Scope, targets: &[String]) -> Result<ResolvedColumns, EvalError>;
}

/// Default resolver over the column groups of a loaded dataset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scopes {
    /// Columns loaded as data (brain measures, features proper).
    #[serde(default)]
    pub data_keys: Vec<String>,
    /// Columns loaded as covariates.
    #[serde(default)]
    pub covars_keys: Vec<String>,
    /// Columns holding categorical values (subset of data or covars).
    #[serde(default)]
    pub cat_keys: Vec<String>,
    /// Columns reserved for stratification or grouping.
    #[serde(default)]
    pub strat_keys: Vec<String>,
}

impl Scopes {
    pub fn new(data_keys: Vec<String>) -> Self {
        Self {
            data_keys,
            ..Default::default()
        }
    }

    pub fn with_covars(mut self, keys: Vec<String>) -> Self {
        self.covars_keys = keys;
        self
    }

    pub fn with_categorical(mut self, keys: Vec<String>) -> Self {
        self.cat_keys = keys;
        self
    }

    pub fn with_strat(mut self, keys: Vec<String>) -> Self {
        self.strat_keys = keys;
        self
    }

    fn candidate_keys(&self) -> Vec<String> {
        self.data_keys
            .iter()
            .chain(self.covars_keys.iter())
            .cloned()
            .collect()
    }

    fn named(&self, name: &str) -> Option<Vec<String>> {
        let all = self.candidate_keys();
        let keys = match name {
            "all" | "n" => all,
            "data" => self.data_keys.clone(),
            "covars" => self.covars_keys.clone(),
            "float" => all
                .into_iter()
                .filter(|k| !self.cat_keys.contains(k))
                .collect(),
            "float covars" | "fc" => all
                .into_iter()
                .filter(|k| !self.cat_keys.contains(k) && !self.data_keys.contains(k))
                .collect(),
            "cat" | "categorical" => self.cat_keys.clone(),
            _ => return None,
        };
        Some(keys)
    }

    fn keys_from_list(&self, entries: &[String]) -> Vec<String> {
        let all = self.candidate_keys();
        let mut keys = Vec::new();
        let mut stubs = Vec::new();

        for entry in entries {
            if let Some(named) = self.named(entry) {
                keys.extend(named);
            } else if all.contains(entry) {
                keys.push(entry.clone());
            } else {
                stubs.push(entry.as_str());
            }
        }

        // Entries that are neither scopes nor columns narrow by substring.
        if !stubs.is_empty() {
            keys.extend(
                all.iter()
                    .filter(|k| stubs.iter().all(|stub| k.contains(stub)))
                    .cloned(),
            );
        }

        keys
    }
}

impl ScopeResolver for Scopes {
    fn resolve(&self, scope: &Scope, targets: &[String]) -> Result<ResolvedColumns, EvalError> {
        let raw = match scope {
            Scope::Name(name) => self
                .named(name)
                .unwrap_or_else(|| self.keys_from_list(std::slice::from_ref(name))),
            Scope::Keys(entries) => self.keys_from_list(entries),
        };

        let at_end: HashSet<&String> = self.strat_keys.iter().chain(targets.iter()).collect();
        let mut seen = HashSet::new();
        let features: Vec<String> = raw
            .into_iter()
            .filter(|k| !at_end.contains(k))
            .filter(|k| seen.insert(k.clone()))
            .collect();

        if features.is_empty() {
            return Err(EvalError::config(format!(
                "scope {scope} resolved to no feature keys"
            )));
        }

        tracing::debug!(scope = %scope, n_features = features.len(), "resolved scope");

        Ok(ResolvedColumns {
            features,
            strat: self.strat_keys.clone(),
            targets: targets.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes() -> Scopes {
        Scopes::new(vec![
            "thick_lh".into(),
            "thick_rh".into(),
            "area_lh".into(),
            "site".into(),
        ])
        .with_covars(vec!["age".into(), "sex".into()])
        .with_categorical(vec!["sex".into()])
        .with_strat(vec!["site".into()])
    }

    fn targets() -> Vec<String> {
        vec!["score".into()]
    }

    #[test]
    fn all_scope_excludes_strat_and_target() {
        let cols = scopes()
            .resolve(&Scope::default(), &targets())
            .unwrap();
        assert_eq!(
            cols.features,
            vec!["thick_lh", "thick_rh", "area_lh", "age", "sex"]
        );
        assert_eq!(cols.all_keys().last().unwrap(), "score");
        assert_eq!(cols.all_keys()[5], "site");
    }

    #[test]
    fn float_covars_scope() {
        let cols = scopes()
            .resolve(&Scope::Name("fc".into()), &targets())
            .unwrap();
        assert_eq!(cols.features, vec!["age"]);
    }

    #[test]
    fn list_mixes_scopes_columns_and_stubs() {
        let cols = scopes()
            .resolve(
                &Scope::Keys(vec!["covars".into(), "thick".into(), "age".into()]),
                &targets(),
            )
            .unwrap();
        assert_eq!(cols.features, vec!["age", "sex", "thick_lh", "thick_rh"]);
    }

    #[test]
    fn multiple_stubs_must_all_match() {
        let cols = scopes()
            .resolve(
                &Scope::Keys(vec!["thick".into(), "lh".into()]),
                &targets(),
            )
            .unwrap();
        assert_eq!(cols.features, vec!["thick_lh"]);
    }

    #[test]
    fn empty_resolution_is_a_configuration_error() {
        let err = scopes()
            .resolve(&Scope::Name("volume".into()), &targets())
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
