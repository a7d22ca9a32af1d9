use proptest::prelude::*;
use placeholder::config::{DefinitionTable, DynamicConfig};
use placeholder::script::expr::{eval_expr, parse_expression};
use placeholder::script::{EvalContext, Template};
use placeholder::{ConfigOption, PlaceholderParser};

/// An integer expression in template syntax together with its native value.
#[derive(Debug, Clone)]
struct IntExpr {
    src: String,
    value: i64,
}

fn int_expr() -> impl Strategy<Value = IntExpr> {
    let leaf = (-50i64..50).prop_map(|n| IntExpr { src: n.to_string(), value: n });
    leaf.prop_recursive(3, 8, 2, |inner| {
        (inner.clone(), 0usize..5, inner).prop_map(|(a, op, b)| {
            // A zero divisor turns the division into an addition.
            let op = if op >= 3 && b.value == 0 { 0 } else { op };
            let (sym, value) = match op {
                0 => ("+", a.value + b.value),
                1 => ("-", a.value - b.value),
                2 => ("*", a.value * b.value),
                3 => ("/", a.value / b.value),
                _ => ("%", a.value % b.value),
            };
            IntExpr { src: format!("({} {sym} {})", a.src, b.src), value }
        })
    })
}

fn evaluate(src: &str) -> placeholder::script::Value {
    let cfg = DynamicConfig::new();
    let defs = DefinitionTable::new();
    let mut ctx = EvalContext::new(&cfg, &defs);
    let expr = parse_expression(src).unwrap_or_else(|e| panic!("{src}: {e:?}"));
    eval_expr(&expr, &mut ctx).unwrap_or_else(|e| panic!("{src}: {e:?}"))
}

fn printer() -> PlaceholderParser {
    let mut p = PlaceholderParser::empty();
    p.set("temperature", vec![200i64, 210]);
    p.set("layer_height", 0.2);
    p.set("filament_type", vec!["PLA", "PETG"]);
    p.set("wipe", ConfigOption::Bools(vec![Some(true), None]));
    p
}

proptest! {
    /// Text without braces or brackets is copied through unchanged.
    #[test]
    fn plain_text_is_identity(s in "[^\\[\\]{}]*") {
        let out = printer().process(&s, 0, None, None, None).unwrap();
        prop_assert_eq!(out, s);
    }
}

proptest! {
    /// Int-only arithmetic stays Int and agrees with native arithmetic.
    #[test]
    fn integer_closure(e in int_expr()) {
        prop_assert_eq!(evaluate(&e.src), placeholder::script::Value::Int(e.value));
    }
}

proptest! {
    /// One Double literal promotes the whole result to Double.
    #[test]
    fn double_promotion(e in int_expr()) {
        let src = format!("{} * 1.0", e.src);
        prop_assert_eq!(evaluate(&src), placeholder::script::Value::Double(e.value as f64));
    }
}

proptest! {
    /// Parsing and evaluating arbitrary input returns Ok or Err, never panics.
    #[test]
    fn parser_does_not_panic(s in "\\PC*") {
        let _ = Template::parse(&s);
        let _ = Template::parse_boolean(&s);
        let _ = printer().process(&s, 0, None, None, None);
    }

    /// Same, but biased towards template syntax.
    #[test]
    fn template_syntax_does_not_panic(s in "[{}\\[\\]()a-z0-9_ +*/%=<>!?:;,\"\\\\.-]{0,40}") {
        let _ = printer().process(&s, 1, None, None, None);
        let _ = PlaceholderParser::evaluate_boolean_expression(&s, printer().config(), None);
    }
}
