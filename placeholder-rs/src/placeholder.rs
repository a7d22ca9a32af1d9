//! [`PlaceholderParser`]: the configuration-owning front end.
//!
//! The parser owns the process configuration layer and, optionally, shares a
//! read-only external configuration with other parsers.  Each call to
//! [`process`](PlaceholderParser::process) builds a fresh evaluation context
//! over those layers plus whatever the caller passes for that one call:
//!
//! | Layer | Owner | Access |
//! |-------|-------|--------|
//! | override | caller, per call | read |
//! | process | this parser | read |
//! | external | shared (`Arc`) | read |
//! | outputs | caller, per call | read / write |
//! | global | caller's [`ContextData`] | read / write |
//! | local | the evaluation | read / write |
//!
//! A new parser is seeded with `version`, the `SLIC3R_*` environment
//! variables, the current local time (`timestamp`, `year` … `second`) and
//! `user`.

use std::fmt;
use std::sync::Arc;

use chrono::{Datelike, Local, Timelike};

use crate::config::{DefinitionTable, DynamicConfig, OptionDefinitions};
use crate::diagnostic::PlaceholderError;
use crate::option::ConfigOption;
use crate::script::{decide, render, ContextData, EvalContext, Template};

const ENV_PREFIX: &str = "SLIC3R_";

#[derive(Clone)]
pub struct PlaceholderParser {
    config: DynamicConfig,
    external_config: Option<Arc<DynamicConfig>>,
    definitions: Arc<dyn OptionDefinitions + Send + Sync>,
}

impl fmt::Debug for PlaceholderParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaceholderParser")
            .field("config", &self.config)
            .field("external_config", &self.external_config)
            .finish_non_exhaustive()
    }
}

impl Default for PlaceholderParser {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PlaceholderParser {
    /// A parser with the standard keys seeded.
    pub fn new(external_config: Option<Arc<DynamicConfig>>) -> Self {
        let mut parser = Self::empty();
        parser.external_config = external_config;
        parser.set("version", env!("CARGO_PKG_VERSION"));
        parser.apply_env_variables();
        parser.update_timestamp();
        parser.update_user_name();
        parser
    }

    /// A parser with an empty process layer and no external configuration.
    pub fn empty() -> Self {
        PlaceholderParser {
            config: DynamicConfig::new(),
            external_config: None,
            definitions: Arc::new(DefinitionTable::new()),
        }
    }

    /// Install the option metadata used to resolve percentages.
    pub fn with_definitions(mut self, definitions: impl OptionDefinitions + Send + Sync + 'static) -> Self {
        self.definitions = Arc::new(definitions);
        self
    }

    // ── Configuration ─────────────────────────────────────────────────────────

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ConfigOption>) {
        self.config.set(key, value);
    }

    pub fn option(&self, key: &str) -> Option<&ConfigOption> {
        self.config.option(key)
    }

    pub fn config(&self) -> &DynamicConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut DynamicConfig {
        &mut self.config
    }

    pub fn external_config(&self) -> Option<&DynamicConfig> {
        self.external_config.as_deref()
    }

    /// Keys of `rhs` that are missing from the process layer or differ.
    pub fn config_diff(&self, rhs: &DynamicConfig) -> Vec<String> {
        self.config.diff(rhs)
    }

    /// Copy the options of `rhs` that differ.  Returns `true` if anything
    /// changed.
    pub fn apply_config(&mut self, rhs: &DynamicConfig) -> bool {
        let keys = self.config_diff(rhs);
        for key in &keys {
            if let Some(opt) = rhs.option(key) {
                self.config.set(key.as_str(), opt.clone());
            }
        }
        !keys.is_empty()
    }

    /// Copy just `keys` from `rhs`; keys `rhs` does not define are skipped.
    pub fn apply_only<S: AsRef<str>>(&mut self, rhs: &DynamicConfig, keys: &[S]) {
        for key in keys {
            let key = key.as_ref();
            if let Some(opt) = rhs.option(key) {
                self.config.set(key, opt.clone());
            }
        }
    }

    /// Import every `SLIC3R_*` environment variable.  The value is the first
    /// whitespace-separated word.
    pub fn apply_env_variables(&mut self) {
        for (key, value) in std::env::vars_os() {
            let (Some(key), Some(value)) = (key.to_str(), value.to_str()) else {
                continue;
            };
            if key.starts_with(ENV_PREFIX) {
                let word = value.split_whitespace().next().unwrap_or("");
                tracing::trace!(key, value = word, "importing environment variable");
                self.config.set(key, word);
            }
        }
    }

    pub fn update_timestamp(&mut self) {
        update_timestamp(&mut self.config);
    }

    pub fn update_user_name(&mut self) {
        update_user_name(&mut self.config);
    }

    // ── Evaluation ────────────────────────────────────────────────────────────

    /// Parse a macro-mode template for repeated evaluation.
    pub fn compile(templ: &str) -> Result<Template, PlaceholderError> {
        Template::parse(templ)
    }

    /// Parse and evaluate `templ` in macro mode.
    pub fn process(
        &self,
        templ: &str,
        current_extruder_id: usize,
        config_override: Option<&DynamicConfig>,
        config_outputs: Option<&mut DynamicConfig>,
        context_data: Option<&mut ContextData>,
    ) -> Result<String, PlaceholderError> {
        let template = Self::compile(templ)?;
        self.process_template(
            &template,
            current_extruder_id,
            config_override,
            config_outputs,
            context_data,
        )
    }

    /// Evaluate an already compiled template.
    pub fn process_template(
        &self,
        template: &Template,
        current_extruder_id: usize,
        config_override: Option<&DynamicConfig>,
        config_outputs: Option<&mut DynamicConfig>,
        context_data: Option<&mut ContextData>,
    ) -> Result<String, PlaceholderError> {
        let mut ctx = EvalContext::new(&self.config, &*self.definitions)
            .with_external(self.external_config())
            .with_override(config_override)
            .with_outputs(config_outputs)
            .with_context_data(context_data)
            .with_extruder(current_extruder_id);
        render(template, &mut ctx)
    }

    /// Evaluate `templ` as a single boolean expression over `config`.
    pub fn evaluate_boolean_expression(
        templ: &str,
        config: &DynamicConfig,
        config_override: Option<&DynamicConfig>,
    ) -> Result<bool, PlaceholderError> {
        let template = Template::parse_boolean(templ)?;
        let definitions = DefinitionTable::new();
        let mut ctx = EvalContext::new(config, &definitions).with_override(config_override);
        decide(&template, &mut ctx)
    }
}

/// Write `timestamp` (`YYYYMMDD-HHMMSS`) and its components from local time.
pub fn update_timestamp(config: &mut DynamicConfig) {
    let now = Local::now();
    config.set("timestamp", now.format("%Y%m%d-%H%M%S").to_string());
    config.set("year", i64::from(now.year()));
    config.set("month", i64::from(now.month()));
    config.set("day", i64::from(now.day()));
    config.set("hour", i64::from(now.hour()));
    config.set("minute", i64::from(now.minute()));
    config.set("second", i64::from(now.second()));
}

/// Write `user` from `$USER`, falling back to `$USERNAME`.
pub fn update_user_name(config: &mut DynamicConfig) {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_owned());
    config.set("user", user);
}

// ── Tests ─────────────────────────────────────────────────────────────────────
