//! Per-evaluation state: configuration layers, symbol tables and the
//! suppression counter.
//!
//! ## Symbol lookup
//!
//! | Scope | Source | Writable |
//! |-------|--------|----------|
//! | [`Scope::Override`] | per-call override config | no |
//! | [`Scope::Process`]  | the parser's own config | no |
//! | [`Scope::External`] | process-wide config | no |
//! | [`Scope::Output`]   | caller-supplied output dictionary | yes |
//! | [`Scope::Global`]   | `global` variables in [`ContextData`] | yes |
//! | [`Scope::Local`]    | `local` variables of this evaluation | yes |
//!
//! Lookups walk the table top to bottom; the first hit wins.
//!
//! Vector reads are lenient (an out-of-range index reads element 0) while
//! vector writes are strict (an out-of-range index is an error).

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::expr::{eval_expr, VarRef};
use super::value::Value;
use crate::config::{ConfigOptionResolver, DynamicConfig, OptionDefinitions};
use crate::diagnostic::{EvalError, EvalResult, Span};
use crate::option::{ConfigOption, FloatOrPercent, OptionType};

/// Upper bound on the length of a "ratio over" chain.
const MAX_RATIO_OVER_DEPTH: usize = 32;

const RATIO_OVER_FAILED: &str =
    "FloatOrPercent variable failed to resolve the \"ratio_over\" dependencies";
const NIL_SCALAR: &str = "Trying to reference an undefined (nil) optional variable";
const NIL_ELEMENT: &str =
    "Trying to reference an undefined (nil) element of vector of optional values";
const EMPTY_VECTOR: &str = "Indexing an empty vector variable";
const NOT_NUMERIC: &str = "Right side is not a numeric expression";
const NOT_BOOLEAN: &str = "Right side is not a boolean expression";
const VECTOR_TO_SCALAR: &str = "Cannot assign a vector value to a scalar variable.";

// ── ContextData ───────────────────────────────────────────────────────────────

/// Caller-owned resources shared by a series of evaluations.
///
/// Not synchronized: callers evaluating concurrently with one `ContextData`
/// must serialize access themselves.
#[derive(Debug)]
pub struct ContextData {
    /// Random source for `random()`.
    pub rng: Option<StdRng>,
    /// Dictionary of `global` variables.
    pub global_config: Option<DynamicConfig>,
}

impl ContextData {
    /// Entropy-seeded RNG and an empty global dictionary.
    pub fn new() -> Self {
        Self {
            rng: Some(StdRng::from_entropy()),
            global_config: Some(DynamicConfig::new()),
        }
    }

    /// Deterministic RNG and an empty global dictionary.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Some(StdRng::seed_from_u64(seed)),
            global_config: Some(DynamicConfig::new()),
        }
    }

    pub fn global(&self, key: &str) -> Option<&ConfigOption> {
        self.global_config.as_ref()?.option(key)
    }
}

impl Default for ContextData {
    fn default() -> Self {
        Self::new()
    }
}

// ── Bindings ──────────────────────────────────────────────────────────────────

/// Where a resolved symbol lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Override,
    Process,
    External,
    Output,
    Global,
    Local,
}

impl Scope {
    pub fn is_writable(self) -> bool {
        matches!(self, Scope::Output | Scope::Global | Scope::Local)
    }
}

/// A resolved variable reference.
///
/// `index` is only ever set for vector options; negative indices have
/// already been clamped to 0.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionBinding {
    pub key: String,
    pub scope: Scope,
    pub index: Option<usize>,
    pub span: Span,
}

// ── EvalContext ───────────────────────────────────────────────────────────────

/// State of one template evaluation.
pub struct EvalContext<'a> {
    config_override: Option<&'a DynamicConfig>,
    config: &'a DynamicConfig,
    external_config: Option<&'a DynamicConfig>,
    config_outputs: Option<&'a mut DynamicConfig>,
    config_local: DynamicConfig,
    context_data: Option<&'a mut ContextData>,
    definitions: &'a dyn OptionDefinitions,
    current_extruder_id: usize,
    depth_suppressed: usize,
}

impl<'a> EvalContext<'a> {
    pub fn new(config: &'a DynamicConfig, definitions: &'a dyn OptionDefinitions) -> Self {
        EvalContext {
            config_override: None,
            config,
            external_config: None,
            config_outputs: None,
            config_local: DynamicConfig::new(),
            context_data: None,
            definitions,
            current_extruder_id: 0,
            depth_suppressed: 0,
        }
    }

    pub fn with_override(mut self, config_override: Option<&'a DynamicConfig>) -> Self {
        self.config_override = config_override;
        self
    }

    pub fn with_external(mut self, external_config: Option<&'a DynamicConfig>) -> Self {
        self.external_config = external_config;
        self
    }

    pub fn with_outputs(mut self, outputs: Option<&'a mut DynamicConfig>) -> Self {
        self.config_outputs = outputs;
        self
    }

    pub fn with_context_data(mut self, context_data: Option<&'a mut ContextData>) -> Self {
        self.context_data = context_data;
        self
    }

    pub fn with_extruder(mut self, extruder_id: usize) -> Self {
        self.current_extruder_id = extruder_id;
        self
    }

    // ── Suppression ───────────────────────────────────────────────────────────

    /// `true` while inside an untaken branch.
    pub fn skipping(&self) -> bool {
        self.depth_suppressed > 0
    }

    pub fn depth_suppressed(&self) -> usize {
        self.depth_suppressed
    }

    /// Run `f` inside a conditional block.  The block is suppressed when
    /// `active` is false or when already skipping.
    pub fn with_block<T>(&mut self, active: bool, f: impl FnOnce(&mut Self) -> T) -> T {
        let suppress = self.skipping() || !active;
        if suppress {
            self.depth_suppressed += 1;
        }
        let result = f(self);
        if suppress {
            self.depth_suppressed -= 1;
        }
        result
    }

    // ── Misc state ────────────────────────────────────────────────────────────

    pub fn current_extruder_id(&self) -> usize {
        self.current_extruder_id
    }

    pub fn set_current_extruder_id(&mut self, extruder_id: usize) {
        self.current_extruder_id = extruder_id;
    }

    pub fn rng(&mut self) -> Option<&mut StdRng> {
        self.context_data.as_deref_mut()?.rng.as_mut()
    }

    pub fn has_global_dictionary(&self) -> bool {
        self.context_data
            .as_deref()
            .is_some_and(|d| d.global_config.is_some())
    }

    pub fn locals(&self) -> &DynamicConfig {
        &self.config_local
    }

    // ── Lookup ────────────────────────────────────────────────────────────────

    /// Read-only layers: override, then process config, then external.
    pub fn resolve_symbol(&self, key: &str) -> Option<(&ConfigOption, Scope)> {
        if let Some(opt) = self.config_override.and_then(|c| c.option(key)) {
            return Some((opt, Scope::Override));
        }
        if let Some(opt) = self.config.option(key) {
            return Some((opt, Scope::Process));
        }
        self.external_config
            .and_then(|c| c.option(key))
            .map(|opt| (opt, Scope::External))
    }

    /// Writable layers: outputs, then globals, then locals.
    pub fn resolve_output_symbol(&self, key: &str) -> Option<(&ConfigOption, Scope)> {
        if let Some(opt) = self.config_outputs.as_deref().and_then(|c| c.option(key)) {
            return Some((opt, Scope::Output));
        }
        if let Some(opt) = self
            .context_data
            .as_deref()
            .and_then(|d| d.global(key))
        {
            return Some((opt, Scope::Global));
        }
        self.config_local.option(key).map(|opt| (opt, Scope::Local))
    }

    fn lookup(&self, scope: Scope, key: &str) -> Option<&ConfigOption> {
        match scope {
            Scope::Override => self.config_override?.option(key),
            Scope::Process => self.config.option(key),
            Scope::External => self.external_config?.option(key),
            Scope::Output => self.config_outputs.as_deref()?.option(key),
            Scope::Global => self.context_data.as_deref()?.global(key),
            Scope::Local => self.config_local.option(key),
        }
    }

    fn lookup_mut(&mut self, scope: Scope, key: &str) -> Option<&mut ConfigOption> {
        match scope {
            Scope::Output => self.config_outputs.as_deref_mut()?.option_mut(key),
            Scope::Global => self
                .context_data
                .as_deref_mut()?
                .global_config
                .as_mut()?
                .option_mut(key),
            Scope::Local => self.config_local.option_mut(key),
            _ => None,
        }
    }

    /// The option a binding refers to.
    pub fn option_of(&self, binding: &OptionBinding) -> EvalResult<&ConfigOption> {
        self.lookup(binding.scope, &binding.key)
            .ok_or_else(|| EvalError::name(binding.span, "Not a variable name"))
    }

    fn option_of_mut(&mut self, binding: &OptionBinding) -> EvalResult<&mut ConfigOption> {
        if !binding.scope.is_writable() {
            return Err(EvalError::name(binding.span, "Cannot modify a read-only variable"));
        }
        self.lookup_mut(binding.scope, &binding.key)
            .ok_or_else(|| EvalError::name(binding.span, "Not a variable name"))
    }

    /// Resolve `name` or `name[index]`, evaluating the index expression.
    pub fn bind(&mut self, r: &VarRef) -> EvalResult<OptionBinding> {
        let (scope, is_vector) = match self
            .resolve_symbol(&r.name)
            .or_else(|| self.resolve_output_symbol(&r.name))
        {
            Some((opt, scope)) => (scope, opt.is_vector()),
            None => return Err(EvalError::name(r.name_span, "Not a variable name")),
        };
        let index = match &r.index {
            None => None,
            Some(index_expr) => match eval_expr(index_expr, self)? {
                Value::Int(i) if is_vector => Some(usize::try_from(i).unwrap_or(0)),
                // A scalar ignores its index.
                Value::Int(_) | Value::Empty => None,
                _ => {
                    return Err(EvalError::type_error(
                        index_expr.span,
                        "Non-integer index is not allowed to address a vector variable.",
                    ))
                }
            },
        };
        Ok(OptionBinding {
            key: r.name.clone(),
            scope,
            index,
            span: r.span,
        })
    }

    // ── Reading ───────────────────────────────────────────────────────────────

    /// Value of a bound scalar, or of one element of a bound vector.
    pub fn read(&self, binding: &OptionBinding) -> EvalResult<Value> {
        let opt = self.option_of(binding)?;
        if opt.is_vector() {
            self.read_element(opt, binding)
        } else {
            self.read_scalar(opt, binding)
        }
    }

    fn read_scalar(&self, opt: &ConfigOption, binding: &OptionBinding) -> EvalResult<Value> {
        if opt.is_nil() {
            return Err(EvalError::runtime(binding.span, NIL_SCALAR));
        }
        Ok(match opt {
            ConfigOption::Float(Some(x)) | ConfigOption::Percent(Some(x)) => Value::Double(*x),
            ConfigOption::Int(Some(n)) => Value::Int(*n),
            ConfigOption::String(s) => Value::Str(s.clone()),
            ConfigOption::Bool(Some(b)) => Value::Bool(*b),
            ConfigOption::Enum { .. } | ConfigOption::Point(..) => Value::Str(opt.serialize()),
            ConfigOption::FloatOrPercent(Some(fp)) => {
                Value::Double(self.resolve_float_or_percent(&binding.key, *fp, binding.span)?)
            }
            _ => {
                return Err(EvalError::type_error(
                    binding.span,
                    "Unsupported scalar variable type",
                ))
            }
        })
    }

    /// Element index a read resolves to: out-of-range indices read element
    /// 0, a missing index reads the current extruder's element, and a
    /// single-element vector always reads its only element.
    fn read_index(&self, size: usize, index: Option<usize>) -> usize {
        match index {
            Some(i) if i < size => i,
            Some(_) => 0,
            None if size == 1 => 0,
            None if self.current_extruder_id < size => self.current_extruder_id,
            None => 0,
        }
    }

    fn read_element(&self, opt: &ConfigOption, binding: &OptionBinding) -> EvalResult<Value> {
        let size = opt.size();
        if size == 0 {
            return Err(EvalError::range(binding.span, EMPTY_VECTOR));
        }
        let idx = self.read_index(size, binding.index);
        if opt.is_nil_at(idx) {
            return Err(EvalError::runtime(binding.span, NIL_ELEMENT));
        }
        let value = match opt {
            ConfigOption::Floats(v) | ConfigOption::Percents(v) => {
                v.get(idx).copied().flatten().map(Value::Double)
            }
            ConfigOption::Ints(v) => v.get(idx).copied().flatten().map(Value::Int),
            ConfigOption::Enums(v) => v.get(idx).copied().map(Value::Int),
            ConfigOption::Strings(v) => v.get(idx).cloned().map(Value::Str),
            ConfigOption::Bools(v) => v.get(idx).copied().flatten().map(Value::Bool),
            ConfigOption::Points(v) => v.get(idx).map(|(x, y)| Value::Str(format!("[{x}, {y}]"))),
            ConfigOption::FloatsOrPercents(v) => match v.get(idx).copied().flatten() {
                Some(fp) => Some(Value::Double(self.resolve_float_or_percent(
                    &binding.key,
                    fp,
                    binding.span,
                )?)),
                None => None,
            },
            _ => None,
        };
        value.ok_or_else(|| EvalError::type_error(binding.span, "Unsupported vector variable type"))
    }

    /// Turn a float-or-percent value into an absolute number by following
    /// the "ratio over" chain of `key`.
    fn resolve_float_or_percent(&self, key: &str, fp: FloatOrPercent, span: Span) -> EvalResult<f64> {
        let defs = self.definitions;
        let failed = || EvalError::runtime(span, RATIO_OVER_FAILED);
        if key.ends_with("line_width") {
            return defs
                .extrusion_width(key, self, self.current_extruder_id)
                .ok_or_else(failed);
        }
        if !fp.percent {
            return Ok(fp.value);
        }
        let mut ratio = fp.value * 0.01;
        let mut key = key;
        for _ in 0..MAX_RATIO_OVER_DEPTH {
            let parent_key = defs.ratio_over(key).ok_or_else(failed)?;
            let (parent, _) = self.resolve_symbol(parent_key).ok_or_else(failed)?;
            if parent_key.ends_with("line_width") {
                let width = defs
                    .extrusion_width(parent_key, self, self.current_extruder_id)
                    .ok_or_else(failed)?;
                return Ok(ratio * width);
            }
            match parent {
                ConfigOption::Float(Some(x)) => return Ok(ratio * x),
                ConfigOption::FloatOrPercent(Some(p)) => {
                    ratio *= p.value;
                    if !p.percent {
                        return Ok(ratio);
                    }
                    ratio *= 0.01;
                }
                _ => {}
            }
            key = parent_key;
        }
        Err(failed())
    }

    // ── Writing ───────────────────────────────────────────────────────────────

    /// `lhs = scalar`.  A vector target needs an explicit, in-range index.
    pub fn assign_scalar(
        &mut self,
        lhs: &OptionBinding,
        rhs: &Value,
        rhs_span: Span,
    ) -> EvalResult<()> {
        let scope = lhs.scope;
        let opt = self.option_of_mut(lhs)?;
        if opt.is_vector() {
            store_element(opt, lhs.index, lhs.span, rhs, rhs_span)?;
        } else {
            store_scalar(opt, lhs.span, rhs, rhs_span)?;
        }
        trace_write(scope, &lhs.key);
        Ok(())
    }

    /// `lhs = (a, b, …)`.
    pub fn assign_list(
        &mut self,
        lhs: &OptionBinding,
        items: &[(Value, Span)],
    ) -> EvalResult<()> {
        let scope = lhs.scope;
        let opt = self.option_of_mut(lhs)?;
        if opt.is_scalar() || lhs.index.is_some() {
            match items {
                [(value, span)] => {
                    if opt.is_vector() {
                        store_element(opt, lhs.index, lhs.span, value, *span)?;
                    } else {
                        store_scalar(opt, lhs.span, value, *span)?;
                    }
                }
                _ => return Err(EvalError::type_error(lhs.span, VECTOR_TO_SCALAR)),
            }
        } else {
            fill_from_list(opt, lhs.span, items)?;
        }
        trace_write(scope, &lhs.key);
        Ok(())
    }

    /// `lhs = repeat(count, value)`.
    pub fn assign_repeat(
        &mut self,
        lhs: &OptionBinding,
        count: (&Value, Span),
        value: (&Value, Span),
    ) -> EvalResult<()> {
        let scope = lhs.scope;
        let opt = self.option_of_mut(lhs)?;
        if opt.is_scalar() {
            return Err(EvalError::type_error(value.1, VECTOR_TO_SCALAR));
        }
        let n = evaluate_count(count.0, count.1)?;
        fill_repeat(opt, lhs.span, (n, count.1), value.0, value.1)?;
        trace_write(scope, &lhs.key);
        Ok(())
    }

    /// `lhs = other_vector`: replace the whole vector with a copy of another
    /// vector of the same type.
    pub fn copy_vector(&mut self, lhs: &OptionBinding, rhs: &OptionBinding) -> EvalResult<()> {
        let source = self.option_of(rhs)?;
        if rhs.index.is_some() || !source.is_vector() {
            return Err(EvalError::type_error(lhs.span, "Cannot assign scalar to a vector"));
        }
        if source.has_nil() {
            return Err(EvalError::runtime(
                rhs.span,
                "Some elements of the right hand side vector variable of optional values are undefined (nil)",
            ));
        }
        let source = source.clone();
        let target = self.option_of_mut(lhs)?;
        if target.option_type() != source.option_type() {
            let message = match target.option_type() {
                OptionType::Floats => "Left hand side is a float vector, while the right hand side is not.",
                OptionType::Ints => "Left hand side is an int vector, while the right hand side is not.",
                OptionType::Strings => "Left hand side is a string vector, while the right hand side is not.",
                OptionType::Bools => "Left hand side is a bool vector, while the right hand side is not.",
                _ => "Left hand side / right hand side vectors are not compatible.",
            };
            return Err(EvalError::type_error(lhs.span, message));
        }
        *target = source;
        trace_write(lhs.scope, &lhs.key);
        Ok(())
    }

    // ── Declarations ──────────────────────────────────────────────────────────

    /// Check that `name` may be declared as a `global` / `local` variable.
    ///
    /// Returns the binding of an already existing variable of the same scope,
    /// which the declaration then assigns to.
    pub fn declare(
        &self,
        global: bool,
        name: &str,
        span: Span,
    ) -> EvalResult<Option<OptionBinding>> {
        if self.resolve_symbol(name).is_some() {
            return Err(EvalError::name(
                span,
                "Symbol is already defined in read-only system dictionary",
            ));
        }
        if self.config_outputs.as_deref().is_some_and(|c| c.contains(name)) {
            return Err(EvalError::name(
                span,
                "Symbol is already defined as system output variable",
            ));
        }
        let global_dict = self
            .context_data
            .as_deref()
            .and_then(|d| d.global_config.as_ref());
        let scope = if global {
            let Some(dict) = global_dict else {
                return Err(EvalError::name(
                    span,
                    "Global variables are not available in this context",
                ));
            };
            if self.config_local.contains(name) {
                return Err(EvalError::name(span, "Variable name already defined in local scope"));
            }
            dict.contains(name).then_some(Scope::Global)
        } else {
            if global_dict.is_some_and(|d| d.contains(name)) {
                return Err(EvalError::name(span, "Variable name already defined in global scope"));
            }
            self.config_local.contains(name).then_some(Scope::Local)
        };
        Ok(scope.map(|scope| OptionBinding {
            key: name.to_owned(),
            scope,
            index: None,
            span,
        }))
    }

    /// Add a freshly declared variable to the global or local dictionary.
    pub fn store_new_variable(&mut self, global: bool, name: &str, opt: ConfigOption) {
        tracing::trace!(name, global, kind = ?opt.option_type(), "declared template variable");
        if global {
            if let Some(dict) = self
                .context_data
                .as_deref_mut()
                .and_then(|d| d.global_config.as_mut())
            {
                dict.set(name, opt);
            }
        } else {
            self.config_local.set(name, opt);
        }
    }
}

impl ConfigOptionResolver for EvalContext<'_> {
    fn option(&self, key: &str) -> Option<&ConfigOption> {
        self.resolve_symbol(key).map(|(opt, _)| opt)
    }
}

fn trace_write(scope: Scope, key: &str) {
    if scope == Scope::Global {
        tracing::trace!(key, "global variable updated");
    }
}

// ── Option mutation helpers ───────────────────────────────────────────────────

fn numeric(value: &Value, span: Span) -> EvalResult<&Value> {
    if value.is_numeric() {
        Ok(value)
    } else {
        Err(EvalError::type_error(span, NOT_NUMERIC))
    }
}

fn boolean(value: &Value, span: Span) -> EvalResult<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        _ => Err(EvalError::type_error(span, NOT_BOOLEAN)),
    }
}

/// Validate the element count of `repeat()`.
pub(crate) fn evaluate_count(count: &Value, span: Span) -> EvalResult<usize> {
    let Value::Int(n) = count else {
        return Err(EvalError::type_error(
            span,
            "Expected number of elements to fill a vector with.",
        ));
    };
    usize::try_from(*n)
        .map_err(|_| EvalError::range(span, "Negative number of elements specified."))
}

fn store_scalar(opt: &mut ConfigOption, lhs_span: Span, rhs: &Value, rhs_span: Span) -> EvalResult<()> {
    match opt {
        ConfigOption::Float(v) | ConfigOption::Percent(v) => {
            *v = Some(numeric(rhs, rhs_span)?.as_f64());
        }
        ConfigOption::Int(v) => *v = Some(numeric(rhs, rhs_span)?.as_i64()),
        ConfigOption::String(s) => *s = rhs.to_string(),
        ConfigOption::Bool(v) => *v = Some(boolean(rhs, rhs_span)?),
        _ => {
            return Err(EvalError::type_error(
                lhs_span,
                "Unsupported output scalar variable type",
            ))
        }
    }
    Ok(())
}

fn store_element(
    opt: &mut ConfigOption,
    index: Option<usize>,
    lhs_span: Span,
    rhs: &Value,
    rhs_span: Span,
) -> EvalResult<()> {
    let Some(idx) = index else {
        return Err(EvalError::type_error(
            lhs_span,
            "Referencing an output vector variable when scalar is expected",
        ));
    };
    let size = opt.size();
    if size == 0 {
        return Err(EvalError::range(lhs_span, EMPTY_VECTOR));
    }
    if idx >= size {
        return Err(EvalError::range(lhs_span, "Index out of range"));
    }
    match opt {
        ConfigOption::Floats(v) | ConfigOption::Percents(v) => {
            v[idx] = Some(numeric(rhs, rhs_span)?.as_f64());
        }
        ConfigOption::Ints(v) => v[idx] = Some(numeric(rhs, rhs_span)?.as_i64()),
        ConfigOption::Strings(v) => v[idx] = rhs.to_string(),
        ConfigOption::Bools(v) => v[idx] = Some(boolean(rhs, rhs_span)?),
        _ => {
            return Err(EvalError::type_error(
                lhs_span,
                "Unsupported output vector variable type",
            ))
        }
    }
    Ok(())
}

fn fill_from_list(opt: &mut ConfigOption, lhs_span: Span, items: &[(Value, Span)]) -> EvalResult<()> {
    match opt {
        ConfigOption::Floats(v) | ConfigOption::Percents(v) => {
            *v = items
                .iter()
                .map(|(x, span)| numeric(x, *span).map(|x| Some(x.as_f64())))
                .collect::<EvalResult<_>>()?;
        }
        ConfigOption::Ints(v) => {
            *v = items
                .iter()
                .map(|(x, span)| numeric(x, *span).map(|x| Some(x.as_i64())))
                .collect::<EvalResult<_>>()?;
        }
        ConfigOption::Strings(v) => *v = items.iter().map(|(x, _)| x.to_string()).collect(),
        ConfigOption::Bools(v) => {
            *v = items
                .iter()
                .map(|(x, span)| boolean(x, *span).map(Some))
                .collect::<EvalResult<_>>()?;
        }
        _ => {
            return Err(EvalError::type_error(
                lhs_span,
                "Unsupported output vector variable type",
            ))
        }
    }
    Ok(())
}

fn fill_repeat(
    opt: &mut ConfigOption,
    lhs_span: Span,
    count: (usize, Span),
    value: &Value,
    value_span: Span,
) -> EvalResult<()> {
    match opt {
        ConfigOption::Floats(v) | ConfigOption::Percents(v) => {
            *v = repeated(Some(numeric(value, value_span)?.as_f64()), count)?;
        }
        ConfigOption::Ints(v) => *v = repeated(Some(numeric(value, value_span)?.as_i64()), count)?,
        ConfigOption::Strings(v) => *v = repeated(value.to_string(), count)?,
        ConfigOption::Bools(v) => *v = repeated(Some(boolean(value, value_span)?), count)?,
        _ => {
            return Err(EvalError::type_error(
                lhs_span,
                "Unsupported output vector variable type",
            ))
        }
    }
    Ok(())
}

/// `count` copies of `value`; a count that cannot be allocated is an error
/// at the count's span.
fn repeated<T: Clone>(value: T, (count, count_span): (usize, Span)) -> EvalResult<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(count).map_err(|_| {
        EvalError::range(count_span, "Number of elements to fill a vector with is too large.")
    })?;
    v.resize(count, value);
    Ok(v)
}

/// Option holding a freshly declared scalar.
pub(crate) fn new_scalar(value: &Value, span: Span) -> EvalResult<ConfigOption> {
    Ok(match value {
        Value::Bool(b) => ConfigOption::bool(*b),
        Value::Int(n) => ConfigOption::int(*n),
        Value::Double(x) => ConfigOption::float(*x),
        Value::Str(s) => ConfigOption::string(s.clone()),
        Value::Empty => {
            return Err(EvalError::type_error(
                span,
                "Cannot create a variable from an empty value.",
            ))
        }
    })
}

/// Option holding a freshly declared vector built from an initializer list.
/// The element type is inferred: any string makes a string vector, bools
/// cannot mix with numbers, any Double makes a float vector.
pub(crate) fn new_vector_from_list(items: &[(Value, Span)], lhs_span: Span) -> EvalResult<ConfigOption> {
    let (Some((_, first)), Some((_, last))) = (items.first(), items.last()) else {
        return Err(EvalError::type_error(
            lhs_span,
            "Cannot create vector variable from an empty initializer list, because its type cannot be deduced.",
        ));
    };
    let count = |pred: fn(&Value) -> bool| items.iter().filter(|(v, _)| pred(v)).count();
    let strings = count(|v| matches!(v, Value::Str(_)));
    let bools = count(|v| matches!(v, Value::Bool(_)));
    let doubles = count(Value::is_double);
    let ints = count(|v| matches!(v, Value::Int(_)));
    let mut opt = if strings > 0 {
        ConfigOption::Strings(Vec::new())
    } else if bools > 0 {
        if doubles + ints > 0 {
            return Err(EvalError::type_error(
                first.to(*last),
                "Right side is not valid: Mixing numeric and boolean types.",
            ));
        }
        ConfigOption::Bools(Vec::new())
    } else if doubles > 0 {
        ConfigOption::Floats(Vec::new())
    } else {
        ConfigOption::Ints(Vec::new())
    };
    fill_from_list(&mut opt, lhs_span, items)?;
    Ok(opt)
}

/// Option holding a freshly declared vector of `count` copies of `value`.
pub(crate) fn new_vector_from_repeat(
    count: (usize, Span),
    value: &Value,
    span: Span,
) -> EvalResult<ConfigOption> {
    Ok(match value {
        Value::Bool(b) => ConfigOption::Bools(repeated(Some(*b), count)?),
        Value::Int(n) => ConfigOption::Ints(repeated(Some(*n), count)?),
        Value::Double(x) => ConfigOption::Floats(repeated(Some(*x), count)?),
        Value::Str(s) => ConfigOption::Strings(repeated(s.clone(), count)?),
        Value::Empty => {
            return Err(EvalError::type_error(
                span,
                "Cannot create a variable from an empty value.",
            ))
        }
    })
}

/// Copy of a vector option for a freshly declared variable.  Percent
/// vectors become float vectors.
pub(crate) fn new_vector_from_copy(source: &ConfigOption, span: Span) -> EvalResult<ConfigOption> {
    if source.has_nil() {
        return Err(EvalError::runtime(
            span,
            "Some elements of the right hand side vector variable of optional values are undefined (nil)",
        ));
    }
    match source {
        ConfigOption::Floats(_)
        | ConfigOption::Ints(_)
        | ConfigOption::Strings(_)
        | ConfigOption::Bools(_) => Ok(source.clone()),
        ConfigOption::Percents(v) => Ok(ConfigOption::Floats(v.clone())),
        _ => Err(EvalError::type_error(
            span,
            "Duplicating this type of vector variable is not supported",
        )),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DefinitionTable;
    use crate::diagnostic::ErrorKind;
    use crate::script::expr::{parse_expression, ExprKind};

    fn var(src: &str) -> VarRef {
        match parse_expression(src).unwrap().kind {
            ExprKind::Var(r) => r,
            other => panic!("not a variable reference: {other:?}"),
        }
    }

    fn read(ctx: &mut EvalContext<'_>, src: &str) -> EvalResult<Value> {
        let b = ctx.bind(&var(src))?;
        ctx.read(&b)
    }

    fn sample_config() -> DynamicConfig {
        let mut cfg = DynamicConfig::new();
        cfg.set("temperature", vec![200i64, 210, 220]);
        cfg.set("nozzle_diameter", vec![0.4]);
        cfg.set("layer_height", 0.2);
        cfg.set("empty_vec", ConfigOption::Ints(vec![]));
        cfg.set("opt_temp", ConfigOption::Ints(vec![Some(1), None]));
        cfg.set("nil_float", ConfigOption::Float(None));
        cfg.set("flavor", ConfigOption::enumeration("marlin2", 3));
        cfg
    }

    #[test]
    fn read_layers_in_order() {
        let base = sample_config();
        let mut over = DynamicConfig::new();
        over.set("layer_height", 0.3);
        let mut ext = DynamicConfig::new();
        ext.set("layer_height", 0.1);
        ext.set("only_external", 7i64);
        let defs = DefinitionTable::new();
        let mut ctx = EvalContext::new(&base, &defs)
            .with_override(Some(&over))
            .with_external(Some(&ext));
        assert_eq!(read(&mut ctx, "layer_height").unwrap(), Value::Double(0.3));
        assert_eq!(read(&mut ctx, "only_external").unwrap(), Value::Int(7));
    }

    #[test]
    fn unknown_name() {
        let base = sample_config();
        let defs = DefinitionTable::new();
        let mut ctx = EvalContext::new(&base, &defs);
        let err = ctx.bind(&var("nope")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Name);
    }

    #[test]
    fn vector_read_clamps() {
        let base = sample_config();
        let defs = DefinitionTable::new();
        let mut ctx = EvalContext::new(&base, &defs).with_extruder(1);
        assert_eq!(read(&mut ctx, "temperature[2]").unwrap(), Value::Int(220));
        assert_eq!(read(&mut ctx, "temperature[7]").unwrap(), Value::Int(200));
        assert_eq!(read(&mut ctx, "temperature[-1]").unwrap(), Value::Int(200));
        assert_eq!(read(&mut ctx, "temperature").unwrap(), Value::Int(210));
        ctx.set_current_extruder_id(5);
        assert_eq!(read(&mut ctx, "temperature").unwrap(), Value::Int(200));
        assert_eq!(read(&mut ctx, "nozzle_diameter").unwrap(), Value::Double(0.4));
    }

    #[test]
    fn scalar_ignores_index() {
        let base = sample_config();
        let defs = DefinitionTable::new();
        let mut ctx = EvalContext::new(&base, &defs);
        let b = ctx.bind(&var("layer_height[3]")).unwrap();
        assert_eq!(b.index, None);
        assert_eq!(ctx.read(&b).unwrap(), Value::Double(0.2));
    }

    #[test]
    fn non_integer_index() {
        let base = sample_config();
        let defs = DefinitionTable::new();
        let mut ctx = EvalContext::new(&base, &defs);
        let err = ctx.bind(&var("temperature[1.5]")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
    }

    #[test]
    fn empty_and_nil_reads() {
        let base = sample_config();
        let defs = DefinitionTable::new();
        let mut ctx = EvalContext::new(&base, &defs);
        assert_eq!(read(&mut ctx, "empty_vec[0]").unwrap_err().kind, ErrorKind::Range);
        assert_eq!(read(&mut ctx, "opt_temp[1]").unwrap_err().kind, ErrorKind::Runtime);
        assert_eq!(read(&mut ctx, "opt_temp[0]").unwrap(), Value::Int(1));
        assert_eq!(read(&mut ctx, "nil_float").unwrap_err().kind, ErrorKind::Runtime);
        assert_eq!(read(&mut ctx, "flavor").unwrap(), Value::from("marlin2"));
    }

    #[test]
    fn ratio_over_chain() {
        let mut base = DynamicConfig::new();
        base.set("nozzle", 0.5);
        base.set("mid", ConfigOption::FloatOrPercent(Some(FloatOrPercent::percent(200.0))));
        base.set("top", ConfigOption::FloatOrPercent(Some(FloatOrPercent::percent(50.0))));
        base.set("abs", ConfigOption::FloatOrPercent(Some(FloatOrPercent::absolute(3.0))));
        base.set("orphan", ConfigOption::FloatOrPercent(Some(FloatOrPercent::percent(10.0))));
        let defs = DefinitionTable::new()
            .with_ratio_over("top", "mid")
            .with_ratio_over("mid", "nozzle");
        let mut ctx = EvalContext::new(&base, &defs);
        assert_eq!(read(&mut ctx, "top").unwrap(), Value::Double(0.5));
        assert_eq!(read(&mut ctx, "abs").unwrap(), Value::Double(3.0));
        assert_eq!(read(&mut ctx, "orphan").unwrap_err().kind, ErrorKind::Runtime);
    }

    #[test]
    fn line_width_uses_definitions() {
        struct Widths;
        impl OptionDefinitions for Widths {
            fn ratio_over(&self, _key: &str) -> Option<&str> {
                None
            }
            fn extrusion_width(
                &self,
                _key: &str,
                config: &dyn ConfigOptionResolver,
                extruder: usize,
            ) -> Option<f64> {
                let nozzle = config.option("nozzle_diameter")?.get_float()?;
                Some(nozzle * 1.125 + extruder as f64)
            }
        }
        let mut base = DynamicConfig::new();
        base.set("nozzle_diameter", 0.4);
        base.set("line_width", ConfigOption::FloatOrPercent(Some(FloatOrPercent::absolute(0.0))));
        let defs = Widths;
        let mut ctx = EvalContext::new(&base, &defs).with_extruder(1);
        let Value::Double(w) = read(&mut ctx, "line_width").unwrap() else {
            panic!("expected a double");
        };
        assert!((w - 1.45).abs() < 1e-9);
    }

    #[test]
    fn writes_are_strict() {
        let base = sample_config();
        let defs = DefinitionTable::new();
        let mut outputs = DynamicConfig::new();
        outputs.set("out", vec![1i64, 2]);
        let mut ctx = EvalContext::new(&base, &defs).with_outputs(Some(&mut outputs));

        let b = ctx.bind(&var("out[1]")).unwrap();
        ctx.assign_scalar(&b, &Value::Int(9), Span::default()).unwrap();
        let b = ctx.bind(&var("out[5]")).unwrap();
        let err = ctx.assign_scalar(&b, &Value::Int(9), Span::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Range);
        let b = ctx.bind(&var("out")).unwrap();
        assert!(ctx.assign_scalar(&b, &Value::Int(9), Span::default()).is_err());
        let b = ctx.bind(&var("out[0]")).unwrap();
        let err = ctx.assign_scalar(&b, &Value::from("x"), Span::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);

        drop(ctx);
        assert_eq!(outputs.option("out"), Some(&ConfigOption::ints([1, 9])));
    }

    #[test]
    fn read_only_layers_reject_writes() {
        let base = sample_config();
        let defs = DefinitionTable::new();
        let mut ctx = EvalContext::new(&base, &defs);
        let b = ctx.bind(&var("layer_height")).unwrap();
        let err = ctx.assign_scalar(&b, &Value::Double(1.0), Span::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Name);
    }

    #[test]
    fn declarations() {
        let base = sample_config();
        let defs = DefinitionTable::new();
        let mut data = ContextData::with_seed(1);
        data.global_config.as_mut().unwrap().set("g", 1i64);
        let mut ctx = EvalContext::new(&base, &defs).with_context_data(Some(&mut data));

        assert_eq!(ctx.declare(false, "layer_height", Span::default()).unwrap_err().kind, ErrorKind::Name);
        assert!(ctx.declare(false, "g", Span::default()).is_err());
        assert_eq!(ctx.declare(true, "g", Span::default()).unwrap().unwrap().scope, Scope::Global);
        assert_eq!(ctx.declare(false, "fresh", Span::default()).unwrap(), None);

        ctx.store_new_variable(false, "fresh", ConfigOption::int(3));
        assert!(ctx.declare(true, "fresh", Span::default()).is_err());
        assert_eq!(read(&mut ctx, "fresh").unwrap(), Value::Int(3));
    }

    #[test]
    fn globals_need_a_dictionary() {
        let base = sample_config();
        let defs = DefinitionTable::new();
        let ctx = EvalContext::new(&base, &defs);
        assert!(ctx.declare(true, "g", Span::default()).is_err());
        assert!(ctx.declare(false, "l", Span::default()).is_ok());
    }

    #[test]
    fn list_inference() {
        let s = Span::default();
        let ints = new_vector_from_list(&[(Value::Int(1), s), (Value::Int(2), s)], s).unwrap();
        assert_eq!(ints, ConfigOption::ints([1, 2]));
        let floats = new_vector_from_list(&[(Value::Int(1), s), (Value::Double(2.5), s)], s).unwrap();
        assert_eq!(floats, ConfigOption::floats([1.0, 2.5]));
        let strings = new_vector_from_list(&[(Value::Int(1), s), (Value::from("a"), s)], s).unwrap();
        assert_eq!(strings, ConfigOption::strings(["1", "a"]));
        assert!(new_vector_from_list(&[(Value::Bool(true), s), (Value::Int(1), s)], s).is_err());
        assert!(new_vector_from_list(&[], s).is_err());
    }

    #[test]
    fn repeat_count() {
        let s = Span::default();
        assert_eq!(evaluate_count(&Value::Int(3), s).unwrap(), 3);
        assert_eq!(evaluate_count(&Value::Int(-1), s).unwrap_err().kind, ErrorKind::Range);
        assert_eq!(evaluate_count(&Value::Double(1.0), s).unwrap_err().kind, ErrorKind::Type);
    }

    #[test]
    fn unallocatable_repeat_is_a_range_error() {
        let s = Span::default();
        let count = Span::new(4, 23);
        let huge = (1_000_000_000_000_000_000usize, count);
        let err = new_vector_from_repeat(huge, &Value::Int(0), s).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Range);
        assert_eq!(err.span, count);
        let mut opt = ConfigOption::ints([1, 2]);
        let err = fill_repeat(&mut opt, s, huge, &Value::Int(5), s).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Range);
        assert_eq!(opt, ConfigOption::ints([1, 2]));
        assert_eq!(
            new_vector_from_repeat((3, count), &Value::Double(0.5), s).unwrap(),
            ConfigOption::floats([0.5, 0.5, 0.5])
        );
    }

    #[test]
    fn suppression_nests() {
        let base = DynamicConfig::new();
        let defs = DefinitionTable::new();
        let mut ctx = EvalContext::new(&base, &defs);
        ctx.with_block(true, |ctx| {
            assert!(!ctx.skipping());
            ctx.with_block(false, |ctx| {
                assert_eq!(ctx.depth_suppressed(), 1);
                ctx.with_block(true, |ctx| assert_eq!(ctx.depth_suppressed(), 2));
            });
        });
        assert_eq!(ctx.depth_suppressed(), 0);
    }
}
