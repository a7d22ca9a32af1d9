//! Tree-walking evaluator for parsed templates.
//!
//! Two entry points share one [`EvalContext`] model:
//!
//! - [`render`] walks a macro-mode template and concatenates its output.
//! - [`decide`] evaluates a boolean-only template to a single `bool`.
//!
//! Conditional blocks are evaluated through [`EvalContext::with_block`]: a
//! branch that is not taken is still walked, but with suppression active, so
//! every node in it produces nothing and checks nothing.  Once a branch has
//! been taken, the conditions of the remaining `elsif` branches are not
//! evaluated either.

use super::context::{
    evaluate_count, new_scalar, new_vector_from_copy, new_vector_from_list,
    new_vector_from_repeat, EvalContext, OptionBinding,
};
use super::expand::expand_legacy;
use super::expr::{eval_expr, Expr, VarRef};
use super::stmt::{Body, Declaration, IfBlock, Node, RValue, Template};
use super::value::Value;
use crate::diagnostic::{EvalError, EvalResult, PlaceholderError, Span};
use crate::option::ConfigOption;

// ── Entry points ──────────────────────────────────────────────────────────────

/// Evaluate `template` in macro mode.  A boolean template renders as
/// `true` / `false`.
pub fn render(template: &Template, ctx: &mut EvalContext<'_>) -> Result<String, PlaceholderError> {
    tracing::debug!(
        len = template.source().len(),
        extruder = ctx.current_extruder_id(),
        mode = "macro",
        "evaluating template"
    );
    let result = match template.body() {
        Body::Macro(nodes) => {
            let mut out = String::new();
            execute(nodes, ctx, &mut out).map(|()| out)
        }
        Body::Boolean(expr) => evaluate_boolean(expr, ctx).map(|b| b.to_string()),
    };
    finish(result, template.source())
}

/// Evaluate `template` as a single boolean expression.
pub fn decide(template: &Template, ctx: &mut EvalContext<'_>) -> Result<bool, PlaceholderError> {
    tracing::debug!(
        len = template.source().len(),
        extruder = ctx.current_extruder_id(),
        mode = "boolean",
        "evaluating template"
    );
    let result = match template.body() {
        Body::Boolean(expr) => evaluate_boolean(expr, ctx),
        Body::Macro(_) => {
            let boolean = Template::parse_boolean(template.source())?;
            return decide(&boolean, ctx);
        }
    };
    finish(result, template.source())
}

fn finish<T>(result: EvalResult<T>, source: &str) -> Result<T, PlaceholderError> {
    match result {
        Ok(value) => {
            tracing::debug!("template evaluated");
            Ok(value)
        }
        Err(err) => {
            let diag = err.into_diagnostic(source);
            tracing::debug!(kind = %diag.kind, line = diag.line, "template evaluation failed");
            Err(diag)
        }
    }
}

/// Evaluate a boolean-only expression; any other result type is an error.
pub fn evaluate_boolean(expr: &Expr, ctx: &mut EvalContext<'_>) -> EvalResult<bool> {
    match eval_expr(expr, ctx)? {
        Value::Bool(b) => Ok(b),
        _ => Err(EvalError::type_error(expr.span, "Not a boolean expression")),
    }
}

// ── Nodes ─────────────────────────────────────────────────────────────────────

/// Execute `nodes`, appending their output to `out`.
pub fn execute(nodes: &[Node], ctx: &mut EvalContext<'_>, out: &mut String) -> EvalResult<()> {
    for node in nodes {
        exec_node(node, ctx, out)?;
    }
    Ok(())
}

fn exec_node(node: &Node, ctx: &mut EvalContext<'_>, out: &mut String) -> EvalResult<()> {
    match node {
        Node::If(block) => return exec_if(block, ctx, out),
        _ if ctx.skipping() => return Ok(()),
        Node::Text(text) => out.push_str(text),
        Node::Legacy(r) => out.push_str(&expand_legacy(r, ctx)?),
        Node::Expr(expr) => {
            let value = eval_expr(expr, ctx)?;
            out.push_str(&value.to_string());
        }
        Node::Assign { lhs, rhs } => exec_assign(lhs, rhs, ctx)?,
        Node::Declare(decl) => exec_declare(decl, ctx)?,
    }
    Ok(())
}

fn exec_if(block: &IfBlock, ctx: &mut EvalContext<'_>, out: &mut String) -> EvalResult<()> {
    let mut taken = false;
    for branch in &block.branches {
        let active = ctx.with_block(!taken, |ctx| condition(&branch.cond, ctx))?;
        ctx.with_block(active, |ctx| execute(&branch.body, ctx, out))?;
        taken |= active;
    }
    if let Some(body) = &block.else_body {
        ctx.with_block(!taken, |ctx| execute(body, ctx, out))?;
    }
    Ok(())
}

/// Branch condition; always `false` while suppressed.
fn condition(expr: &Expr, ctx: &mut EvalContext<'_>) -> EvalResult<bool> {
    if ctx.skipping() {
        return Ok(false);
    }
    evaluate_boolean(expr, ctx)
}

// ── Assignment ────────────────────────────────────────────────────────────────

fn exec_assign(lhs: &VarRef, rhs: &RValue, ctx: &mut EvalContext<'_>) -> EvalResult<()> {
    let binding = ctx.bind(lhs)?;
    assign(&binding, rhs, ctx)
}

/// Evaluate list items, dropping the ones that produced no value.
fn eval_list(items: &[Expr], ctx: &mut EvalContext<'_>) -> EvalResult<Vec<(Value, Span)>> {
    let mut values = Vec::with_capacity(items.len());
    for item in items {
        let value = eval_expr(item, ctx)?;
        if !value.is_empty() {
            values.push((value, item.span));
        }
    }
    Ok(values)
}

/// `true` for an un-indexed reference to a vector option.
fn is_whole_vector(binding: &OptionBinding, ctx: &EvalContext<'_>) -> EvalResult<bool> {
    Ok(binding.index.is_none() && ctx.option_of(binding)?.is_vector())
}

fn assign(lhs: &OptionBinding, rhs: &RValue, ctx: &mut EvalContext<'_>) -> EvalResult<()> {
    match rhs {
        RValue::List { items, .. } => {
            let values = eval_list(items, ctx)?;
            ctx.assign_list(lhs, &values)
        }
        RValue::Repeat { count, value, .. } => {
            let n = eval_expr(count, ctx)?;
            let v = eval_expr(value, ctx)?;
            ctx.assign_repeat(lhs, (&n, count.span), (&v, value.span))
        }
        RValue::Var(r) => {
            let source = ctx.bind(r)?;
            if is_whole_vector(lhs, ctx)? {
                return ctx.copy_vector(lhs, &source);
            }
            let value = ctx.read(&source)?;
            ctx.assign_scalar(lhs, &value, r.span)
        }
        RValue::Expr(expr) => {
            let value = eval_expr(expr, ctx)?;
            ctx.assign_scalar(lhs, &value, expr.span)
        }
    }
}

// ── Declarations ──────────────────────────────────────────────────────────────

fn exec_declare(decl: &Declaration, ctx: &mut EvalContext<'_>) -> EvalResult<()> {
    match ctx.declare(decl.global, &decl.name, decl.name_span)? {
        Some(existing) => redeclare(&existing, &decl.rhs, ctx),
        None => {
            let opt = new_option(decl, ctx)?;
            ctx.store_new_variable(decl.global, &decl.name, opt);
            Ok(())
        }
    }
}

/// Declaring a variable that already exists in the same scope assigns to it.
fn redeclare(existing: &OptionBinding, rhs: &RValue, ctx: &mut EvalContext<'_>) -> EvalResult<()> {
    let lhs_vector = ctx.option_of(existing)?.is_vector();
    match rhs {
        RValue::Expr(expr) if lhs_vector => Err(EvalError::type_error(
            expr.span,
            "Cannot assign a scalar value to a vector variable.",
        )),
        RValue::Repeat { span, .. } if !lhs_vector => Err(EvalError::type_error(
            *span,
            "Cannot assign a vector value to a scalar variable.",
        )),
        _ => assign(existing, rhs, ctx),
    }
}

fn new_option(decl: &Declaration, ctx: &mut EvalContext<'_>) -> EvalResult<ConfigOption> {
    match &decl.rhs {
        RValue::List { items, .. } => {
            let values = eval_list(items, ctx)?;
            new_vector_from_list(&values, decl.name_span)
        }
        RValue::Repeat { count, value, .. } => {
            let n = eval_expr(count, ctx)?;
            let v = eval_expr(value, ctx)?;
            let n = evaluate_count(&n, count.span)?;
            new_vector_from_repeat((n, count.span), &v, value.span)
        }
        RValue::Var(r) => {
            let source = ctx.bind(r)?;
            if is_whole_vector(&source, ctx)? {
                return new_vector_from_copy(ctx.option_of(&source)?, r.span);
            }
            let value = ctx.read(&source)?;
            new_scalar(&value, r.span)
        }
        RValue::Expr(expr) => {
            let value = eval_expr(expr, ctx)?;
            new_scalar(&value, expr.span)
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DefinitionTable, DynamicConfig};
    use crate::diagnostic::ErrorKind;
    use crate::script::context::ContextData;

    fn config() -> DynamicConfig {
        let mut cfg = DynamicConfig::new();
        cfg.set("temperature", vec![200i64, 210]);
        cfg.set("nozzle", vec![0.4, 0.6]);
        cfg.set("layer_height", 0.2);
        cfg.set("flag", true);
        cfg
    }

    fn run_with(
        src: &str,
        outputs: Option<&mut DynamicConfig>,
        data: Option<&mut ContextData>,
    ) -> Result<String, PlaceholderError> {
        let cfg = config();
        let defs = DefinitionTable::new();
        let template = Template::parse(src)?;
        let mut ctx = EvalContext::new(&cfg, &defs)
            .with_outputs(outputs)
            .with_context_data(data);
        let out = render(&template, &mut ctx);
        assert_eq!(ctx.depth_suppressed(), 0);
        out
    }

    fn run(src: &str) -> Result<String, PlaceholderError> {
        run_with(src, None, None)
    }

    fn err_kind(src: &str) -> ErrorKind {
        run(src).unwrap_err().kind
    }

    #[test]
    fn text_passes_through() {
        assert_eq!(run("G28 ; home\nG1 Z5").unwrap(), "G28 ; home\nG1 Z5");
    }

    #[test]
    fn expressions_render() {
        assert_eq!(run("{1==1} {1>2} {\"ab\"+\"cd\"} {7/2} {7/2.}").unwrap(), "true false abcd 3 3.5");
    }

    #[test]
    fn if_else() {
        assert_eq!(run("{if 1<2}A{else}B{endif}").unwrap(), "A");
        assert_eq!(run("{if 1>2}A{else}B{endif}").unwrap(), "B");
        assert_eq!(run("{if false}A{elsif true}B{elsif true}C{else}D{endif}").unwrap(), "B");
        assert_eq!(run("{if false}A{endif}").unwrap(), "");
    }

    #[test]
    fn code_form_if() {
        assert_eq!(run("{if flag then \"yes\" else \"no\" endif}").unwrap(), "yes");
        assert_eq!(run("{local x = 0; if x == 0 then x = 5; endif; x}").unwrap(), "5");
    }

    #[test]
    fn nested_suppression() {
        let src = "{if false}{if true}X{else}Y{endif}{endif}Z";
        assert_eq!(run(src).unwrap(), "Z");
    }

    #[test]
    fn suppressed_branch_hides_runtime_errors() {
        assert_eq!(run("{if false}{undefined_name}{1/0}{\"a\"*2}{endif}ok").unwrap(), "ok");
        assert_eq!(run("{if false}{local x = undefined}{endif}ok").unwrap(), "ok");
        assert_eq!(run("{true ? 1 : 1/0}").unwrap(), "1");
    }

    #[test]
    fn later_conditions_are_not_evaluated_after_a_taken_branch() {
        assert_eq!(run("{if true}A{elsif undefined_name}B{endif}").unwrap(), "A");
    }

    #[test]
    fn condition_must_be_boolean() {
        assert_eq!(err_kind("{if 1}A{endif}"), ErrorKind::Type);
    }

    #[test]
    fn locals_and_assignment() {
        assert_eq!(run("{local x=5}{x=x+1}{x}").unwrap(), "6");
        assert_eq!(run("{local s = \"a\"; s = s + 1; s}").unwrap(), "a1");
        assert_eq!(err_kind("{local i = 1; i = \"x\"}"), ErrorKind::Type);
    }

    #[test]
    fn local_vectors() {
        assert_eq!(run("{local v = (1, 2.5); v[1]}").unwrap(), "2.5");
        assert_eq!(run("{local v = repeat(3, 7); size(v)}").unwrap(), "3");
        assert_eq!(run("{local v = temperature; v[1] = 5; v[1]}").unwrap(), "5");
        assert_eq!(run("{local v = (1, 2); v = (4, 5, 6); size(v)}").unwrap(), "3");
        assert_eq!(run("{local v = (1, 2); v[0] = (9); v[0]}").unwrap(), "9");
        assert_eq!(run("{local v = (1, 2); v = repeat(4, 1); size(v)}").unwrap(), "4");
        assert_eq!(err_kind("{local v = ()}"), ErrorKind::Type);
        assert_eq!(err_kind("{local v = (true, 1)}"), ErrorKind::Type);
    }

    #[test]
    fn vector_copy_needs_matching_types() {
        assert_eq!(run("{local v = (1, 2); v = temperature; v[1]}").unwrap(), "210");
        assert_eq!(err_kind("{local v = (1, 2); v = nozzle}"), ErrorKind::Type);
        assert_eq!(err_kind("{local v = (1, 2); v = layer_height}"), ErrorKind::Type);
    }

    #[test]
    fn scalar_from_whole_vector_reads_default_element() {
        assert_eq!(run("{local t = 0; t = temperature; t}").unwrap(), "200");
    }

    #[test]
    fn write_index_is_strict_while_read_clamps() {
        assert_eq!(run("{local v = (1, 2); v[5]}").unwrap(), "1");
        assert_eq!(err_kind("{local v = (1, 2); v[5] = 3}"), ErrorKind::Range);
    }

    #[test]
    fn read_only_config_cannot_be_assigned() {
        assert_eq!(err_kind("{layer_height = 1}"), ErrorKind::Name);
    }

    #[test]
    fn declaration_collisions() {
        assert_eq!(err_kind("{local layer_height = 1}"), ErrorKind::Name);
        assert_eq!(err_kind("{global g = 1}"), ErrorKind::Name);
        let mut data = ContextData::with_seed(1);
        assert_eq!(
            run_with("{local a = 1; global a = 2}", None, Some(&mut data)).unwrap_err().kind,
            ErrorKind::Name
        );
        assert_eq!(
            run_with("{local v = (1, 2); local v = 3}", None, None).unwrap_err().kind,
            ErrorKind::Type
        );
        assert_eq!(
            run_with("{local s = 1; local s = repeat(2, 1)}", None, None).unwrap_err().kind,
            ErrorKind::Type
        );
    }

    #[test]
    fn redeclaring_in_same_scope_assigns() {
        assert_eq!(run("{local a = 1; local a = a + 1; a}").unwrap(), "2");
    }

    #[test]
    fn globals_persist_across_runs() {
        let mut data = ContextData::with_seed(1);
        run_with("{global counter = 1}", None, Some(&mut data)).unwrap();
        let out = run_with("{counter = counter + 1; counter}", None, Some(&mut data)).unwrap();
        assert_eq!(out, "2");
        assert_eq!(data.global("counter"), Some(&ConfigOption::int(2)));
    }

    #[test]
    fn outputs_are_written() {
        let mut outputs = DynamicConfig::new();
        outputs.set("wipe_done", false);
        outputs.set("offsets", vec![0.0, 0.0]);
        run_with("{wipe_done = true; offsets[1] = 2.5}", Some(&mut outputs), None).unwrap();
        assert_eq!(outputs.option("wipe_done"), Some(&ConfigOption::bool(true)));
        assert_eq!(outputs.option("offsets"), Some(&ConfigOption::floats([0.0, 2.5])));
    }

    #[test]
    fn legacy_expansion_in_text() {
        assert_eq!(run("M104 S[temperature] Z[layer_height]").unwrap(), "M104 S200 Z0.2");
    }

    #[test]
    fn filament_change_affects_later_reads() {
        assert_eq!(run("{temperature}{filament_change(1)}{temperature}").unwrap(), "200210");
    }

    #[test]
    fn boolean_mode() {
        let cfg = config();
        let defs = DefinitionTable::new();
        let mut ctx = EvalContext::new(&cfg, &defs);
        let t = Template::parse_boolean("1<2 and not(false)").unwrap();
        assert!(decide(&t, &mut ctx).unwrap());
        let t = Template::parse_boolean("1+2").unwrap();
        assert_eq!(decide(&t, &mut ctx).unwrap_err().kind, ErrorKind::Type);
        assert!(Template::parse_boolean("{1}").is_err());
        let t = Template::parse("flag").unwrap();
        assert!(decide(&t, &mut ctx).unwrap());
    }

    #[test]
    fn error_message_points_at_failure() {
        let err = run("G1\nG1 X{100/0}").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Runtime);
        assert_eq!(err.line, 2);
        assert_eq!(err.message, "Parsing error at line 2: Division by zero\nG1 X{100/0}\n         ^\n");
    }
}
