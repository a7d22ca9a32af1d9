//! Configuration dictionaries and option metadata.
//!
//! [`DynamicConfig`] is the keyed option store used for every layer the
//! expander reads or writes: the parser's own configuration, the external
//! (process-wide) configuration, per-call overrides, the output dictionary and
//! the local/global symbol tables of a running template.
//!
//! [`OptionDefinitions`] supplies the static metadata the expander needs when
//! a `FloatOrPercent` option has to be turned into an absolute number.

use std::collections::{BTreeMap, HashMap};

use crate::option::ConfigOption;

// ── Resolver seam ─────────────────────────────────────────────────────────────

/// Anything that can look up an option by key.
pub trait ConfigOptionResolver {
    fn option(&self, key: &str) -> Option<&ConfigOption>;
}

// ── DynamicConfig ─────────────────────────────────────────────────────────────

/// Ordered key → option map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicConfig {
    options: BTreeMap<String, ConfigOption>,
}

impl DynamicConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or overwrite) an option.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ConfigOption>) {
        self.options.insert(key.into(), value.into());
    }

    pub fn option(&self, key: &str) -> Option<&ConfigOption> {
        self.options.get(key)
    }

    pub fn option_mut(&mut self, key: &str) -> Option<&mut ConfigOption> {
        self.options.get_mut(key)
    }

    /// Remove an option.  Returns `true` if it existed.
    pub fn remove(&mut self, key: &str) -> bool {
        self.options.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.options.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.options.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigOption)> {
        self.options.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Copy every option of `other` into `self`, overwriting existing keys.
    pub fn apply(&mut self, other: &DynamicConfig) {
        for (key, opt) in other.iter() {
            self.options.insert(key.to_owned(), opt.clone());
        }
    }

    /// Keys of `other` whose value is missing from `self` or differs.
    pub fn diff(&self, other: &DynamicConfig) -> Vec<String> {
        other
            .iter()
            .filter(|(key, opt)| self.option(key) != Some(*opt))
            .map(|(key, _)| key.to_owned())
            .collect()
    }
}

impl ConfigOptionResolver for DynamicConfig {
    fn option(&self, key: &str) -> Option<&ConfigOption> {
        DynamicConfig::option(self, key)
    }
}

impl<K: Into<String>, V: Into<ConfigOption>> FromIterator<(K, V)> for DynamicConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut cfg = DynamicConfig::new();
        for (k, v) in iter {
            cfg.set(k, v);
        }
        cfg
    }
}

// ── Option metadata ───────────────────────────────────────────────────────────

/// Static metadata about option keys.
pub trait OptionDefinitions {
    /// Key of the option a percentage-valued `key` is relative to.
    fn ratio_over(&self, key: &str) -> Option<&str>;

    /// Absolute extrusion width of a `*line_width` option for the given
    /// extruder, computed from the rest of the configuration.  `None` when
    /// the width cannot be derived.
    fn extrusion_width(
        &self,
        _key: &str,
        _config: &dyn ConfigOptionResolver,
        _extruder: usize,
    ) -> Option<f64> {
        None
    }
}

/// Table-driven [`OptionDefinitions`].
#[derive(Debug, Clone, Default)]
pub struct DefinitionTable {
    ratio_over: HashMap<String, String>,
}

impl DefinitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`set_ratio_over`](Self::set_ratio_over).
    pub fn with_ratio_over(mut self, key: impl Into<String>, parent: impl Into<String>) -> Self {
        self.set_ratio_over(key, parent);
        self
    }

    pub fn set_ratio_over(&mut self, key: impl Into<String>, parent: impl Into<String>) {
        self.ratio_over.insert(key.into(), parent.into());
    }
}

impl OptionDefinitions for DefinitionTable {
    fn ratio_over(&self, key: &str) -> Option<&str> {
        self.ratio_over.get(key).map(String::as_str)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
