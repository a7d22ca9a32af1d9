//! Built-in template functions.
//!
//! | Function | Result |
//! |----------|--------|
//! | `min(a, b)` / `max(a, b)` | Int, or Double when either argument is a Double |
//! | `random(a, b)` | uniform draw in `[a, b]` (Int) or `[a, b)` (Double) |
//! | `digits(v, w[, d])` / `zdigits(…)` | fixed-width String, space / zero padded |
//! | `int` / `round` / `floor` / `ceil` | Int |
//! | `is_nil(ref)` | Bool |
//! | `empty(vec)` / `size(vec)` | Bool / Int |
//! | `one_of(s, p…)` | Bool |
//! | `interpolate_table(x, (x0, y0)…)` | Double |
//! | `filament_change(n)` | Empty; switches the current extruder |
//!
//! [`call`] is invoked by the expression evaluator after its suppression
//! check, so nothing here needs to consider skipped branches.

use rand::Rng;

use super::context::EvalContext;
use super::expr::{compile_regex, eval_expr, op_error, Builtin, Expr, OneOfPattern, VarRef};
use super::value::Value;
use crate::diagnostic::{EvalError, EvalResult, Span};
use crate::pattern::Pattern;

/// Half-width of the band outside an interpolation table that still clamps
/// to the first / last knot.
pub const INTERPOLATION_EPSILON: f64 = 1e-4;

/// Largest width / precision accepted by `digits()`.
const MAX_DIGITS: i64 = 64;

const NOT_NUMERIC: &str = "Not a numeric type.";

/// Evaluate a built-in call spanning `span`.
pub fn call(builtin: &Builtin, span: Span, ctx: &mut EvalContext<'_>) -> EvalResult<Value> {
    match builtin {
        Builtin::Min(a, b) => min_max(a, b, ctx, false),
        Builtin::Max(a, b) => min_max(a, b, ctx, true),
        Builtin::Random(a, b) => random(a, b, span, ctx),
        Builtin::FilamentChange(arg) => filament_change(arg, ctx),
        Builtin::Digits {
            zero_pad,
            value,
            width,
            decimals,
        } => digits(*zero_pad, value, width, decimals.as_deref(), ctx),
        Builtin::Convert(conv, arg) => {
            let v = eval_expr(arg, ctx)?;
            v.convert(*conv)
                .map_err(|e| op_error(e, span, arg.span, arg.span))
        }
        Builtin::IsNil(r) => is_nil(r, ctx),
        Builtin::Empty(r) => {
            let size = vector_size(r, ctx, "parameter of empty() is not a vector variable")?;
            Ok(Value::Bool(size == 0))
        }
        Builtin::Size(r) => {
            let size = vector_size(r, ctx, "parameter of size() is not a vector variable")?;
            Ok(Value::Int(size as i64))
        }
        Builtin::OneOf { subject, patterns } => one_of(subject, patterns, ctx),
        Builtin::InterpolateTable { x, table } => interpolate_table(x, table, ctx),
    }
}

fn numeric_arg(expr: &Expr, ctx: &mut EvalContext<'_>) -> EvalResult<Value> {
    let v = eval_expr(expr, ctx)?;
    if v.is_numeric() {
        Ok(v)
    } else {
        Err(EvalError::type_error(expr.span, NOT_NUMERIC))
    }
}

fn int_arg(expr: &Expr, ctx: &mut EvalContext<'_>, message: &'static str) -> EvalResult<i64> {
    match eval_expr(expr, ctx)? {
        Value::Int(n) => Ok(n),
        _ => Err(EvalError::type_error(expr.span, message)),
    }
}

// ── Numeric ───────────────────────────────────────────────────────────────────

fn min_max(a: &Expr, b: &Expr, ctx: &mut EvalContext<'_>, max: bool) -> EvalResult<Value> {
    let x = numeric_arg(a, ctx)?;
    let y = numeric_arg(b, ctx)?;
    Ok(match (&x, &y) {
        (Value::Int(i), Value::Int(j)) => Value::Int(if max { *i.max(j) } else { *i.min(j) }),
        _ => {
            let (i, j) = (x.as_f64(), y.as_f64());
            Value::Double(if max { i.max(j) } else { i.min(j) })
        }
    })
}

fn random(a: &Expr, b: &Expr, span: Span, ctx: &mut EvalContext<'_>) -> EvalResult<Value> {
    let lo = numeric_arg(a, ctx)?;
    let hi = numeric_arg(b, ctx)?;
    let Some(rng) = ctx.rng() else {
        return Err(EvalError::runtime(
            span,
            "Random number generator not available in this context.",
        ));
    };
    match (&lo, &hi) {
        (Value::Int(lo), Value::Int(hi)) => {
            if lo > hi {
                return Err(EvalError::range(span, "Invalid range of a random number."));
            }
            Ok(Value::Int(rng.gen_range(*lo..=*hi)))
        }
        _ => {
            let (lo, hi) = (lo.as_f64(), hi.as_f64());
            // Infinite bounds or an infinite width cannot be sampled.
            if !(lo <= hi) || !lo.is_finite() || !hi.is_finite() || !(hi - lo).is_finite() {
                return Err(EvalError::range(span, "Invalid range of a random number."));
            }
            // An empty half-open range yields its only bound.
            if lo == hi {
                return Ok(Value::Double(lo));
            }
            Ok(Value::Double(rng.gen_range(lo..hi)))
        }
    }
}

fn filament_change(arg: &Expr, ctx: &mut EvalContext<'_>) -> EvalResult<Value> {
    let id = numeric_arg(arg, ctx)?.as_i64();
    let id = usize::try_from(id)
        .map_err(|_| EvalError::range(arg.span, "Filament index must not be negative."))?;
    tracing::trace!(from = ctx.current_extruder_id(), to = id, "filament_change");
    ctx.set_current_extruder_id(id);
    Ok(Value::Empty)
}

fn digits(
    zero_pad: bool,
    value: &Expr,
    width: &Expr,
    decimals: Option<&Expr>,
    ctx: &mut EvalContext<'_>,
) -> EvalResult<Value> {
    let v = numeric_arg(value, ctx)?;
    let w = int_arg(width, ctx, "digits: second parameter must be integer")?;
    let w = w.clamp(0, MAX_DIGITS) as usize;
    let text = match decimals {
        Some(d) => {
            let d = int_arg(d, ctx, "digits: third parameter must be integer")?;
            let d = d.clamp(0, MAX_DIGITS) as usize;
            let x = v.as_f64();
            if zero_pad {
                format!("{x:0w$.d$}")
            } else {
                format!("{x:>w$.d$}")
            }
        }
        None => {
            let n = v.as_i64_rounded();
            if zero_pad {
                format!("{n:0w$}")
            } else {
                format!("{n:>w$}")
            }
        }
    };
    Ok(Value::Str(text))
}

// ── Variable inspection ───────────────────────────────────────────────────────

fn is_nil(r: &VarRef, ctx: &mut EvalContext<'_>) -> EvalResult<Value> {
    let binding = ctx.bind(r)?;
    let opt = ctx.option_of(&binding)?;
    if !opt.is_vector() {
        return Ok(Value::Bool(opt.is_nil()));
    }
    let Some(idx) = binding.index else {
        return Err(EvalError::type_error(
            binding.span,
            "Referencing a vector variable when scalar is expected",
        ));
    };
    let size = opt.size();
    if size == 0 {
        return Err(EvalError::range(binding.span, "Indexing an empty vector variable"));
    }
    Ok(Value::Bool(opt.is_nil_at(if idx < size { idx } else { 0 })))
}

fn vector_size(r: &VarRef, ctx: &mut EvalContext<'_>, message: &'static str) -> EvalResult<usize> {
    let binding = ctx.bind(r)?;
    let opt = ctx.option_of(&binding)?;
    if r.index.is_some() || !opt.is_vector() {
        return Err(EvalError::type_error(binding.span, message));
    }
    Ok(opt.size())
}

// ── Matching ──────────────────────────────────────────────────────────────────

fn one_of(subject: &Expr, patterns: &[OneOfPattern], ctx: &mut EvalContext<'_>) -> EvalResult<Value> {
    let text = eval_expr(subject, ctx)?;
    for pattern in patterns {
        let Value::Str(text) = &text else {
            return Err(EvalError::type_error(
                subject.span,
                "one_of(): First parameter (the string to match against) has to be a string value",
            ));
        };
        let matched = match pattern {
            OneOfPattern::Text(expr) => match eval_expr(expr, ctx)? {
                Value::Str(p) => Pattern::literal(&p).matches(text),
                _ => return Err(pattern_not_string(expr.span)),
            },
            OneOfPattern::Regex(expr) => match eval_expr(expr, ctx)? {
                Value::Str(p) => Pattern::regex(&p)
                    .map_err(|_| {
                        EvalError::runtime(expr.span, "Regular expression compilation failed")
                    })?
                    .matches(text),
                _ => return Err(pattern_not_string(expr.span)),
            },
            OneOfPattern::RegexLiteral { pattern, span } => {
                compile_regex(pattern, *span)?.matches(text)
            }
        };
        if matched {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn pattern_not_string(span: Span) -> EvalError {
    EvalError::type_error(span, "one_of(): Pattern has to be a string value")
}

// ── Interpolation ─────────────────────────────────────────────────────────────

fn interpolate_table(x: &Expr, table: &[(Expr, Expr)], ctx: &mut EvalContext<'_>) -> EvalResult<Value> {
    let xv = eval_expr(x, ctx)?;
    if !xv.is_numeric() {
        return Err(EvalError::type_error(x.span, "Interpolation value must be a number."));
    }
    let mut knots = Vec::with_capacity(table.len());
    for (kx, ky) in table {
        let vx = eval_expr(kx, ctx)?;
        if !vx.is_numeric() {
            return Err(EvalError::type_error(kx.span, "X value of a table point must be a number."));
        }
        let vy = eval_expr(ky, ctx)?;
        if !vy.is_numeric() {
            return Err(EvalError::type_error(ky.span, "Y value of a table point must be a number."));
        }
        knots.push((vx.as_f64(), kx.span, vy.as_f64()));
    }
    interpolate(xv.as_f64(), &knots, x.span).map(Value::Double)
}

/// Piecewise-linear interpolation over `(x, x_span, y)` knots.
fn interpolate(x: f64, knots: &[(f64, Span, f64)], x_span: Span) -> EvalResult<f64> {
    let (Some(first), Some(last)) = (knots.first(), knots.last()) else {
        return Err(EvalError::range(x_span, "Interpolation table is empty"));
    };
    let mut result = None;
    for pair in knots.windows(2) {
        let (x0, span0, y0) = pair[0];
        let (x1, span1, y1) = pair[1];
        if x0 > x1 {
            return Err(EvalError::range(
                span0.to(span1),
                "X coordinates of the table must be increasing",
            ));
        }
        if result.is_none() && x >= x0 && x <= x1 {
            result = Some(if x == x0 {
                y0
            } else if x == x1 {
                y1
            } else if (x1 - x0).abs() < INTERPOLATION_EPSILON {
                0.5 * (y0 + y1)
            } else {
                y0 + (y1 - y0) * ((x - x0) / (x1 - x0))
            });
        }
    }
    if let Some(y) = result {
        return Ok(y);
    }
    if x > first.0 - INTERPOLATION_EPSILON && x <= first.0 {
        Ok(first.2)
    } else if x >= last.0 && x < last.0 + INTERPOLATION_EPSILON {
        Ok(last.2)
    } else {
        Err(EvalError::range(x_span, "Interpolation value is outside the table range"))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
