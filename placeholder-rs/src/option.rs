//! Configuration option values.
//!
//! A [`ConfigOption`] is one named value of the surrounding print / printer /
//! filament configuration.  It is either a scalar or a vector (one element per
//! extruder or filament), and numeric / boolean kinds are nullable: `None`
//! marks a value that is currently unset ("nil").
//!
//! | Kind | Scalar | Vector | Read as |
//! |------|--------|--------|---------|
//! | float | [`Float`](ConfigOption::Float) | [`Floats`](ConfigOption::Floats) | Double |
//! | int | [`Int`](ConfigOption::Int) | [`Ints`](ConfigOption::Ints) | Int |
//! | string | [`String`](ConfigOption::String) | [`Strings`](ConfigOption::Strings) | String |
//! | percent | [`Percent`](ConfigOption::Percent) | [`Percents`](ConfigOption::Percents) | Double |
//! | float or percent | [`FloatOrPercent`](ConfigOption::FloatOrPercent) | [`FloatsOrPercents`](ConfigOption::FloatsOrPercents) | Double |
//! | bool | [`Bool`](ConfigOption::Bool) | [`Bools`](ConfigOption::Bools) | Bool |
//! | enum | [`Enum`](ConfigOption::Enum) | [`Enums`](ConfigOption::Enums) | String / Int |
//! | point | [`Point`](ConfigOption::Point) | [`Points`](ConfigOption::Points) | String |

use std::fmt;

/// A value that is either absolute or a percentage of some parent option.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloatOrPercent {
    pub value: f64,
    pub percent: bool,
}

impl FloatOrPercent {
    pub fn absolute(value: f64) -> Self {
        Self { value, percent: false }
    }

    pub fn percent(value: f64) -> Self {
        Self { value, percent: true }
    }
}

impl fmt::Display for FloatOrPercent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.percent {
            write!(f, "{}%", self.value)
        } else {
            write!(f, "{}", self.value)
        }
    }
}

/// Discriminant of a [`ConfigOption`], used where two options must have the
/// same shape (vector-to-vector copies).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionType {
    Float,
    Int,
    String,
    Percent,
    FloatOrPercent,
    Bool,
    Enum,
    Point,
    Floats,
    Ints,
    Strings,
    Percents,
    FloatsOrPercents,
    Bools,
    Enums,
    Points,
}

impl OptionType {
    /// Human-readable element kind, as used in type-mismatch diagnostics.
    pub fn element_name(self) -> &'static str {
        match self {
            OptionType::Float | OptionType::Floats => "float",
            OptionType::Int | OptionType::Ints => "int",
            OptionType::String | OptionType::Strings => "string",
            OptionType::Percent | OptionType::Percents => "percent",
            OptionType::FloatOrPercent | OptionType::FloatsOrPercents => "float or percent",
            OptionType::Bool | OptionType::Bools => "bool",
            OptionType::Enum | OptionType::Enums => "enum",
            OptionType::Point | OptionType::Points => "point",
        }
    }
}

/// A single configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigOption {
    Float(Option<f64>),
    Int(Option<i64>),
    String(String),
    Percent(Option<f64>),
    FloatOrPercent(Option<FloatOrPercent>),
    Bool(Option<bool>),
    /// Enumerated value: the serialized name plus its ordinal.
    Enum { name: String, value: i64 },
    Point(f64, f64),
    Floats(Vec<Option<f64>>),
    Ints(Vec<Option<i64>>),
    Strings(Vec<String>),
    Percents(Vec<Option<f64>>),
    FloatsOrPercents(Vec<Option<FloatOrPercent>>),
    Bools(Vec<Option<bool>>),
    /// Enum vectors only keep the ordinals.
    Enums(Vec<i64>),
    Points(Vec<(f64, f64)>),
}

impl ConfigOption {
    // ── Constructors ──────────────────────────────────────────────────────────

    pub fn float(v: f64) -> Self {
        ConfigOption::Float(Some(v))
    }

    pub fn int(v: i64) -> Self {
        ConfigOption::Int(Some(v))
    }

    pub fn string(v: impl Into<String>) -> Self {
        ConfigOption::String(v.into())
    }

    pub fn percent(v: f64) -> Self {
        ConfigOption::Percent(Some(v))
    }

    pub fn bool(v: bool) -> Self {
        ConfigOption::Bool(Some(v))
    }

    pub fn enumeration(name: impl Into<String>, value: i64) -> Self {
        ConfigOption::Enum {
            name: name.into(),
            value,
        }
    }

    pub fn floats(values: impl IntoIterator<Item = f64>) -> Self {
        ConfigOption::Floats(values.into_iter().map(Some).collect())
    }

    pub fn ints(values: impl IntoIterator<Item = i64>) -> Self {
        ConfigOption::Ints(values.into_iter().map(Some).collect())
    }

    pub fn strings<S: Into<String>>(values: impl IntoIterator<Item = S>) -> Self {
        ConfigOption::Strings(values.into_iter().map(Into::into).collect())
    }

    pub fn percents(values: impl IntoIterator<Item = f64>) -> Self {
        ConfigOption::Percents(values.into_iter().map(Some).collect())
    }

    pub fn bools(values: impl IntoIterator<Item = bool>) -> Self {
        ConfigOption::Bools(values.into_iter().map(Some).collect())
    }

    // ── Shape ─────────────────────────────────────────────────────────────────

    pub fn option_type(&self) -> OptionType {
        match self {
            ConfigOption::Float(_) => OptionType::Float,
            ConfigOption::Int(_) => OptionType::Int,
            ConfigOption::String(_) => OptionType::String,
            ConfigOption::Percent(_) => OptionType::Percent,
            ConfigOption::FloatOrPercent(_) => OptionType::FloatOrPercent,
            ConfigOption::Bool(_) => OptionType::Bool,
            ConfigOption::Enum { .. } => OptionType::Enum,
            ConfigOption::Point(..) => OptionType::Point,
            ConfigOption::Floats(_) => OptionType::Floats,
            ConfigOption::Ints(_) => OptionType::Ints,
            ConfigOption::Strings(_) => OptionType::Strings,
            ConfigOption::Percents(_) => OptionType::Percents,
            ConfigOption::FloatsOrPercents(_) => OptionType::FloatsOrPercents,
            ConfigOption::Bools(_) => OptionType::Bools,
            ConfigOption::Enums(_) => OptionType::Enums,
            ConfigOption::Points(_) => OptionType::Points,
        }
    }

    pub fn is_vector(&self) -> bool {
        matches!(
            self,
            ConfigOption::Floats(_)
                | ConfigOption::Ints(_)
                | ConfigOption::Strings(_)
                | ConfigOption::Percents(_)
                | ConfigOption::FloatsOrPercents(_)
                | ConfigOption::Bools(_)
                | ConfigOption::Enums(_)
                | ConfigOption::Points(_)
        )
    }

    pub fn is_scalar(&self) -> bool {
        !self.is_vector()
    }

    /// Number of elements of a vector option; scalars report 1.
    pub fn size(&self) -> usize {
        match self {
            ConfigOption::Floats(v) | ConfigOption::Percents(v) => v.len(),
            ConfigOption::Ints(v) => v.len(),
            ConfigOption::Strings(v) => v.len(),
            ConfigOption::FloatsOrPercents(v) => v.len(),
            ConfigOption::Bools(v) => v.len(),
            ConfigOption::Enums(v) => v.len(),
            ConfigOption::Points(v) => v.len(),
            _ => 1,
        }
    }

    /// Whether a scalar option is unset.  Vectors are never nil as a whole;
    /// use [`is_nil_at`](Self::is_nil_at) or [`has_nil`](Self::has_nil).
    pub fn is_nil(&self) -> bool {
        match self {
            ConfigOption::Float(v) | ConfigOption::Percent(v) => v.is_none(),
            ConfigOption::Int(v) => v.is_none(),
            ConfigOption::FloatOrPercent(v) => v.is_none(),
            ConfigOption::Bool(v) => v.is_none(),
            _ => false,
        }
    }

    /// Whether element `idx` of a vector option is unset.  Out-of-range
    /// indices and non-vector options report `false`.
    pub fn is_nil_at(&self, idx: usize) -> bool {
        match self {
            ConfigOption::Floats(v) | ConfigOption::Percents(v) => {
                v.get(idx).is_some_and(Option::is_none)
            }
            ConfigOption::Ints(v) => v.get(idx).is_some_and(Option::is_none),
            ConfigOption::FloatsOrPercents(v) => v.get(idx).is_some_and(Option::is_none),
            ConfigOption::Bools(v) => v.get(idx).is_some_and(Option::is_none),
            _ => false,
        }
    }

    /// Whether any element of a vector option is unset.
    pub fn has_nil(&self) -> bool {
        (0..self.size()).any(|i| self.is_nil_at(i))
    }

    // ── Scalar accessors ──────────────────────────────────────────────────────

    /// Numeric value of a scalar option (percentages report the raw number).
    pub fn get_float(&self) -> Option<f64> {
        match self {
            ConfigOption::Float(v) | ConfigOption::Percent(v) => *v,
            ConfigOption::Int(v) => v.map(|n| n as f64),
            ConfigOption::FloatOrPercent(v) => v.map(|fp| fp.value),
            ConfigOption::Bool(v) => v.map(|b| if b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn get_int(&self) -> Option<i64> {
        match self {
            ConfigOption::Int(v) => *v,
            ConfigOption::Enum { value, .. } => Some(*value),
            ConfigOption::Bool(v) => v.map(i64::from),
            _ => None,
        }
    }

    pub fn get_bool(&self) -> Option<bool> {
        match self {
            ConfigOption::Bool(v) => *v,
            _ => None,
        }
    }

    // ── Serialization ─────────────────────────────────────────────────────────

    /// Canonical text form of the whole option.  Vectors are joined with
    /// commas (strings with semicolons, quoted where needed).
    pub fn serialize(&self) -> String {
        match self {
            ConfigOption::Float(v) => opt_to_string(v),
            ConfigOption::Int(v) => opt_to_string(v),
            ConfigOption::String(s) => escape_string(s),
            ConfigOption::Percent(v) => v.map_or_else(|| NIL.to_owned(), |x| format!("{x}%")),
            ConfigOption::FloatOrPercent(v) => opt_to_string(v),
            ConfigOption::Bool(v) => v.map_or_else(|| NIL.to_owned(), |b| bool_digit(b).to_owned()),
            ConfigOption::Enum { name, .. } => name.clone(),
            ConfigOption::Point(x, y) => format!("{x},{y}"),
            ConfigOption::Strings(values) => values
                .iter()
                .map(|s| quote_if_needed(s))
                .collect::<Vec<_>>()
                .join(";"),
            ConfigOption::Points(_) => self.vserialize().join(","),
            _ => self.vserialize().join(","),
        }
    }

    /// Text form of each element of a vector option; a scalar yields a
    /// single element.
    pub fn vserialize(&self) -> Vec<String> {
        match self {
            ConfigOption::Floats(v) => v.iter().map(opt_to_string).collect(),
            ConfigOption::Ints(v) => v.iter().map(opt_to_string).collect(),
            ConfigOption::Strings(v) => v.clone(),
            ConfigOption::Percents(v) => v
                .iter()
                .map(|x| x.map_or_else(|| NIL.to_owned(), |x| format!("{x}%")))
                .collect(),
            ConfigOption::FloatsOrPercents(v) => v.iter().map(opt_to_string).collect(),
            ConfigOption::Bools(v) => v
                .iter()
                .map(|b| b.map_or_else(|| NIL.to_owned(), |b| bool_digit(b).to_owned()))
                .collect(),
            ConfigOption::Enums(v) => v.iter().map(i64::to_string).collect(),
            ConfigOption::Points(v) => v.iter().map(|(x, y)| format!("{x}x{y}")).collect(),
            scalar => vec![scalar.serialize()],
        }
    }
}

const NIL: &str = "nil";

fn opt_to_string<T: fmt::Display>(v: &Option<T>) -> String {
    match v {
        Some(v) => v.to_string(),
        None => NIL.to_owned(),
    }
}

fn bool_digit(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

/// C-style escaping of a single string value.
fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn quote_if_needed(s: &str) -> String {
    let needs_quotes = s.is_empty()
        || s
            .chars()
            .any(|c| matches!(c, ';' | '"' | '\\' | '\n' | '\r') || c.is_whitespace());
    if !needs_quotes {
        return s.to_owned();
    }
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

// ── Conversions ───────────────────────────────────────────────────────────────

impl From<f64> for ConfigOption {
    fn from(v: f64) -> Self {
        ConfigOption::float(v)
    }
}

impl From<i64> for ConfigOption {
    fn from(v: i64) -> Self {
        ConfigOption::int(v)
    }
}

impl From<i32> for ConfigOption {
    fn from(v: i32) -> Self {
        ConfigOption::int(i64::from(v))
    }
}

impl From<bool> for ConfigOption {
    fn from(v: bool) -> Self {
        ConfigOption::bool(v)
    }
}

impl From<&str> for ConfigOption {
    fn from(v: &str) -> Self {
        ConfigOption::string(v)
    }
}

impl From<String> for ConfigOption {
    fn from(v: String) -> Self {
        ConfigOption::String(v)
    }
}

impl From<Vec<f64>> for ConfigOption {
    fn from(v: Vec<f64>) -> Self {
        ConfigOption::floats(v)
    }
}

impl From<Vec<i64>> for ConfigOption {
    fn from(v: Vec<i64>) -> Self {
        ConfigOption::ints(v)
    }
}

impl From<Vec<bool>> for ConfigOption {
    fn from(v: Vec<bool>) -> Self {
        ConfigOption::bools(v)
    }
}

impl From<Vec<&str>> for ConfigOption {
    fn from(v: Vec<&str>) -> Self {
        ConfigOption::strings(v)
    }
}

impl From<Vec<String>> for ConfigOption {
    fn from(v: Vec<String>) -> Self {
        ConfigOption::Strings(v)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
