//! Legacy bracket expansion.
//!
//! | Form | Meaning |
//! |------|---------|
//! | `[name]` | scalar, or element `current_extruder_id` of a vector |
//! | `[name_N]` | element `N` of vector `name` (when `name_N` is not itself a key) |
//! | `[name[idx]]` | element of vector `name` at the value of Int option `idx` |
//! | `[name_[idx]]` | same, for the older spelling with a trailing underscore |
//!
//! Only the read-only configuration layers are consulted; template variables
//! are not visible to bracket expansion.  The result is the serialized form of
//! the option (or of the single element), not the expression-language string
//! form: a bool renders as `1`/`0`, a percent keeps its `%`.

use super::context::EvalContext;
use super::stmt::LegacyRef;
use crate::diagnostic::{EvalError, EvalResult, Span};
use crate::option::ConfigOption;

const MISSING: &str = "Variable does not exist";
const INDEX_SCALAR: &str = "Trying to index a scalar variable";

/// Expand one bracket reference to text.
pub fn expand_legacy(r: &LegacyRef, ctx: &EvalContext<'_>) -> EvalResult<String> {
    if ctx.skipping() {
        return Ok(String::new());
    }
    match &r.index {
        None => expand_plain(r, ctx),
        Some((index_name, index_span)) => expand_indexed(r, index_name, *index_span, ctx),
    }
}

fn expand_plain(r: &LegacyRef, ctx: &EvalContext<'_>) -> EvalResult<String> {
    let span = r.name_span;
    let mut idx = ctx.current_extruder_id();
    let opt = match ctx.resolve_symbol(&r.name) {
        Some((opt, _)) => opt,
        None => {
            let (opt, n) = split_index_suffix(&r.name, span, ctx)?;
            idx = n;
            opt
        }
    };
    if !opt.is_vector() {
        if opt.is_nil() {
            return Err(EvalError::runtime(
                span,
                "Trying to reference an undefined (nil) optional variable",
            ));
        }
        return Ok(opt.serialize());
    }
    element(opt, idx, span)
}

/// Resolve `name_N` as element `N` of vector `name`.
fn split_index_suffix<'c>(
    name: &str,
    span: Span,
    ctx: &'c EvalContext<'_>,
) -> EvalResult<(&'c ConfigOption, usize)> {
    let missing = || EvalError::name(span, MISSING);
    let pos = name.rfind('_').ok_or_else(missing)?;
    let (opt, _) = ctx.resolve_symbol(&name[..pos]).ok_or_else(missing)?;
    if !opt.is_vector() {
        return Err(EvalError::type_error(span, INDEX_SCALAR));
    }
    let suffix = &name[pos + 1..];
    let n: i64 = suffix.parse().map_err(|_| {
        EvalError::syntax(Span::new(span.start + pos + 1, span.end), "Invalid vector index")
    })?;
    // A negative suffix wraps around to an out-of-range index, which reads
    // element 0.
    Ok((opt, usize::try_from(n).unwrap_or(usize::MAX)))
}

fn expand_indexed(
    r: &LegacyRef,
    index_name: &str,
    index_span: Span,
    ctx: &EvalContext<'_>,
) -> EvalResult<String> {
    let span = r.name_span;
    let opt = ctx
        .resolve_symbol(&r.name)
        .or_else(|| {
            r.name
                .strip_suffix('_')
                .and_then(|base| ctx.resolve_symbol(base))
        })
        .map(|(opt, _)| opt)
        .ok_or_else(|| EvalError::name(span, MISSING))?;
    if !opt.is_vector() {
        return Err(EvalError::type_error(span, INDEX_SCALAR));
    }
    if opt.size() == 0 {
        return Err(EvalError::range(span, "Indexing an empty vector variable"));
    }
    let (index_opt, _) = ctx
        .resolve_symbol(index_name)
        .ok_or_else(|| EvalError::name(index_span, MISSING))?;
    let idx = match index_opt {
        ConfigOption::Int(Some(n)) => *n,
        ConfigOption::Int(None) => {
            return Err(EvalError::runtime(
                index_span,
                "Trying to reference an undefined (nil) optional variable",
            ))
        }
        _ => {
            return Err(EvalError::type_error(
                index_span,
                "Indexing variable has to be integer",
            ))
        }
    };
    let idx = usize::try_from(idx)
        .map_err(|_| EvalError::range(index_span, "Negative vector index"))?;
    element(opt, idx, span)
}

/// Serialized element `idx` of a vector; out-of-range reads element 0.
fn element(opt: &ConfigOption, idx: usize, span: Span) -> EvalResult<String> {
    let size = opt.size();
    if size == 0 {
        return Err(EvalError::range(span, "Indexing an empty vector variable"));
    }
    let idx = if idx < size { idx } else { 0 };
    if opt.is_nil_at(idx) {
        return Err(EvalError::runtime(
            span,
            "Trying to reference an undefined (nil) element of vector of optional values",
        ));
    }
    Ok(opt.vserialize().swap_remove(idx))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DefinitionTable, DynamicConfig};
    use crate::diagnostic::ErrorKind;
    use crate::script::stmt::{parse_template, Node};

    fn config() -> DynamicConfig {
        let mut cfg = DynamicConfig::new();
        cfg.set("temperature", vec![200i64, 210, 220]);
        cfg.set("layer_height", 0.2);
        cfg.set("use_relative", true);
        cfg.set("idx", 2i64);
        cfg.set("neg", -1i64);
        cfg.set("fidx", 1.5);
        cfg.set("wipe", ConfigOption::Bools(vec![Some(true), None]));
        cfg.set("fill_density", ConfigOption::percent(15.0));
        cfg.set("nothing", ConfigOption::Ints(vec![]));
        cfg
    }

    fn legacy(src: &str) -> LegacyRef {
        match parse_template(src).unwrap().remove(0) {
            Node::Legacy(r) => r,
            other => panic!("not a legacy reference: {other:?}"),
        }
    }

    fn expand(src: &str, extruder: usize) -> EvalResult<String> {
        let cfg = config();
        let defs = DefinitionTable::new();
        let ctx = EvalContext::new(&cfg, &defs).with_extruder(extruder);
        expand_legacy(&legacy(src), &ctx)
    }

    #[test]
    fn scalars_serialize() {
        assert_eq!(expand("[layer_height]", 0).unwrap(), "0.2");
        assert_eq!(expand("[use_relative]", 0).unwrap(), "1");
        assert_eq!(expand("[fill_density]", 0).unwrap(), "15%");
    }

    #[test]
    fn vector_defaults_to_current_extruder() {
        assert_eq!(expand("[temperature]", 1).unwrap(), "210");
        assert_eq!(expand("[temperature]", 9).unwrap(), "200");
    }

    #[test]
    fn numeric_suffix() {
        assert_eq!(expand("[temperature_2]", 0).unwrap(), "220");
        assert_eq!(expand("[temperature_7]", 0).unwrap(), "200");
        assert_eq!(expand("[temperature_x]", 0).unwrap_err().kind, ErrorKind::Syntax);
        assert_eq!(expand("[layer_height_0]", 0).unwrap_err().kind, ErrorKind::Type);
    }

    #[test]
    fn index_variable() {
        assert_eq!(expand("[temperature[idx]]", 0).unwrap(), "220");
        assert_eq!(expand("[temperature_[idx]]", 0).unwrap(), "220");
        assert_eq!(expand("[temperature[neg]]", 0).unwrap_err().kind, ErrorKind::Range);
        assert_eq!(expand("[temperature[fidx]]", 0).unwrap_err().kind, ErrorKind::Type);
        assert_eq!(expand("[temperature[nope]]", 0).unwrap_err().kind, ErrorKind::Name);
        assert_eq!(expand("[layer_height[idx]]", 0).unwrap_err().kind, ErrorKind::Type);
    }

    #[test]
    fn failures() {
        assert_eq!(expand("[missing]", 0).unwrap_err().kind, ErrorKind::Name);
        assert_eq!(expand("[wipe_1]", 0).unwrap_err().kind, ErrorKind::Runtime);
        assert_eq!(expand("[nothing]", 0).unwrap_err().kind, ErrorKind::Range);
    }

    #[test]
    fn suppressed_expands_to_nothing() {
        let cfg = config();
        let defs = DefinitionTable::new();
        let mut ctx = EvalContext::new(&cfg, &defs);
        let r = legacy("[missing]");
        let out = ctx.with_block(false, |ctx| expand_legacy(&r, ctx));
        assert_eq!(out.unwrap(), "");
    }
}
