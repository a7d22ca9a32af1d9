//! Runtime value type for the template language.
//!
//! Template expressions are dynamically typed over five kinds.  `Empty` is
//! not an error marker: it is what every expression evaluates to inside an
//! untaken conditional branch, and it propagates silently through every
//! operator.
//!
//! Operators never see a span; they report an [`OpError`] naming the operand
//! at fault and the evaluator attaches the source position.

use std::cmp::Ordering;
use std::fmt;

use crate::diagnostic::ErrorKind;

/// Tolerance used by `==` / `!=` when either side is a Double.
pub const EQUALITY_EPSILON: f64 = 1e-8;

/// A template runtime value.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Empty,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => Ok(()),
            Value::Bool(b) => f.write_str(if *b { "true" } else { "false" }),
            Value::Int(n) => write!(f, "{n}"),
            // Shortest representation that round-trips.
            Value::Double(x) => write!(f, "{x}"),
            Value::Str(s) => f.write_str(s),
        }
    }
}

// ── Operator errors ───────────────────────────────────────────────────────────

/// Which operand an [`OpError`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Lhs,
    Rhs,
    Both,
}

/// Failure of a value-level operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OpError {
    pub kind: ErrorKind,
    pub message: &'static str,
    pub at: Operand,
}

impl OpError {
    fn type_error(message: &'static str, at: Operand) -> Self {
        Self {
            kind: ErrorKind::Type,
            message,
            at,
        }
    }
}

pub type OpResult<T> = Result<T, OpError>;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

/// Numeric conversions behind `int()`, `round()`, `floor()` and `ceil()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    Int,
    Round,
    Floor,
    Ceil,
}

impl Value {
    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Double(_))
    }

    pub fn is_double(&self) -> bool {
        matches!(self, Value::Double(_))
    }

    /// Numeric value as `f64`; non-numeric values read as 0.
    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Int(n) => *n as f64,
            Value::Double(x) => *x,
            _ => 0.0,
        }
    }

    /// Numeric value as `i64`, truncating Doubles; non-numeric values read as 0.
    pub fn as_i64(&self) -> i64 {
        match self {
            Value::Int(n) => *n,
            Value::Double(x) => *x as i64,
            _ => 0,
        }
    }

    /// Numeric value rounded half away from zero.
    pub fn as_i64_rounded(&self) -> i64 {
        match self {
            Value::Double(x) => x.round() as i64,
            other => other.as_i64(),
        }
    }

    /// Name of the kind, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Empty => "empty",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
        }
    }

    // ── Arithmetic ────────────────────────────────────────────────────────────

    fn require_numeric(a: &Value, b: &Value, message: &'static str) -> OpResult<()> {
        if !a.is_numeric() {
            return Err(OpError::type_error(message, Operand::Lhs));
        }
        if !b.is_numeric() {
            return Err(OpError::type_error(message, Operand::Rhs));
        }
        Ok(())
    }

    fn numeric(
        a: &Value,
        b: &Value,
        int_op: impl FnOnce(i64, i64) -> i64,
        dbl_op: impl FnOnce(f64, f64) -> f64,
    ) -> Value {
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => Value::Int(int_op(*x, *y)),
            _ => Value::Double(dbl_op(a.as_f64(), b.as_f64())),
        }
    }

    /// `+`: string concatenation when either side is a string, numeric
    /// addition otherwise.
    pub fn add(&self, rhs: &Value) -> OpResult<Value> {
        if matches!(self, Value::Str(_)) || matches!(rhs, Value::Str(_)) {
            return Ok(Value::Str(format!("{self}{rhs}")));
        }
        Self::require_numeric(self, rhs, "Cannot add non-numeric types.")?;
        Ok(Self::numeric(self, rhs, i64::wrapping_add, |a, b| a + b))
    }

    pub fn sub(&self, rhs: &Value) -> OpResult<Value> {
        Self::require_numeric(self, rhs, "Cannot subtract non-numeric types.")?;
        Ok(Self::numeric(self, rhs, i64::wrapping_sub, |a, b| a - b))
    }

    pub fn mul(&self, rhs: &Value) -> OpResult<Value> {
        Self::require_numeric(self, rhs, "Cannot multiply with non-numeric type.")?;
        Ok(Self::numeric(self, rhs, i64::wrapping_mul, |a, b| a * b))
    }

    fn check_divisor(&self, rhs: &Value) -> OpResult<()> {
        if !self.is_numeric() {
            return Err(OpError::type_error("Cannot divide a non-numeric type.", Operand::Lhs));
        }
        let zero = match rhs {
            Value::Int(n) => *n == 0,
            Value::Double(x) => *x == 0.0,
            _ => {
                return Err(OpError::type_error(
                    "Cannot divide with a non-numeric type.",
                    Operand::Rhs,
                ))
            }
        };
        if zero {
            return Err(OpError {
                kind: ErrorKind::Runtime,
                message: "Division by zero",
                at: Operand::Rhs,
            });
        }
        Ok(())
    }

    pub fn div(&self, rhs: &Value) -> OpResult<Value> {
        self.check_divisor(rhs)?;
        Ok(Self::numeric(self, rhs, i64::wrapping_div, |a, b| a / b))
    }

    /// `%`: integer remainder, or `fmod` semantics when either side is a Double.
    pub fn rem(&self, rhs: &Value) -> OpResult<Value> {
        self.check_divisor(rhs)?;
        Ok(Self::numeric(self, rhs, i64::wrapping_rem, |a, b| a % b))
    }

    // ── Unary ─────────────────────────────────────────────────────────────────

    pub fn neg(&self) -> OpResult<Value> {
        match self {
            Value::Int(n) => Ok(Value::Int(n.wrapping_neg())),
            Value::Double(x) => Ok(Value::Double(-x)),
            _ => Err(OpError::type_error("Cannot apply unary minus operator.", Operand::Lhs)),
        }
    }

    pub fn not(&self) -> OpResult<Value> {
        match self {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            _ => Err(OpError::type_error("Cannot apply a not operator.", Operand::Lhs)),
        }
    }

    /// Numeric to Int conversion.  Ints pass through unchanged.
    pub fn convert(&self, conv: Conversion) -> OpResult<Value> {
        let x = match self {
            Value::Int(n) => return Ok(Value::Int(*n)),
            Value::Double(x) => *x,
            _ => {
                let message = match conv {
                    Conversion::Int => "Cannot convert to integer.",
                    Conversion::Round => "Cannot round a non-numeric value.",
                    Conversion::Floor => "Cannot floor a non-numeric value.",
                    Conversion::Ceil => "Cannot ceil a non-numeric value.",
                };
                return Err(OpError::type_error(message, Operand::Lhs));
            }
        };
        let converted = match conv {
            Conversion::Int => x.trunc(),
            Conversion::Round => x.round(),
            Conversion::Floor => x.floor(),
            Conversion::Ceil => x.ceil(),
        };
        Ok(Value::Int(converted as i64))
    }

    // ── Comparison and logic ──────────────────────────────────────────────────

    /// Compare two values.
    ///
    /// Numerics compare numerically, two Bools compare for (in)equality only,
    /// and any other pairing compares the canonical string forms.
    pub fn compare(&self, op: CmpOp, rhs: &Value) -> OpResult<bool> {
        let ord = if self.is_numeric() && rhs.is_numeric() {
            if self.is_double() || rhs.is_double() {
                let (a, b) = (self.as_f64(), rhs.as_f64());
                if matches!(op, CmpOp::Eq | CmpOp::Ne) {
                    let eq = (a - b).abs() < EQUALITY_EPSILON;
                    return Ok(eq == (op == CmpOp::Eq));
                }
                // NaN compares as neither less nor greater.
                a.partial_cmp(&b)
            } else {
                Some(self.as_i64().cmp(&rhs.as_i64()))
            }
        } else if let (Value::Bool(a), Value::Bool(b)) = (self, rhs) {
            match op {
                CmpOp::Eq => return Ok(a == b),
                CmpOp::Ne => return Ok(a != b),
                _ => return Err(OpError::type_error("Cannot compare the types.", Operand::Both)),
            }
        } else {
            Some(self.to_string().cmp(&rhs.to_string()))
        };
        Ok(match op {
            CmpOp::Eq => ord == Some(Ordering::Equal),
            CmpOp::Ne => ord != Some(Ordering::Equal),
            CmpOp::Lt => ord == Some(Ordering::Less),
            CmpOp::Gt => ord == Some(Ordering::Greater),
            CmpOp::Le => ord != Some(Ordering::Greater),
            CmpOp::Ge => ord != Some(Ordering::Less),
        })
    }

    fn logical(&self, rhs: &Value, f: impl FnOnce(bool, bool) -> bool) -> OpResult<Value> {
        const MSG: &str = "Cannot apply logical operation to non-boolean operators.";
        match (self, rhs) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(f(*a, *b))),
            (Value::Bool(_), _) => Err(OpError::type_error(MSG, Operand::Rhs)),
            _ => Err(OpError::type_error(MSG, Operand::Lhs)),
        }
    }

    pub fn and(&self, rhs: &Value) -> OpResult<Value> {
        self.logical(rhs, |a, b| a && b)
    }

    pub fn or(&self, rhs: &Value) -> OpResult<Value> {
        self.logical(rhs, |a, b| a || b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Double(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(Value::Empty.to_string(), "");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Int(-7).to_string(), "-7");
        assert_eq!(Value::Double(3.14).to_string(), "3.14");
        assert_eq!(Value::Double(2.0).to_string(), "2");
        assert_eq!(Value::Double(0.1 + 0.2).to_string(), "0.30000000000000004");
        assert_eq!(Value::from("hello").to_string(), "hello");
    }

    #[test]
    fn integer_arithmetic() {
        let a = Value::Int(10);
        let b = Value::Int(3);
        assert_eq!(a.add(&b), Ok(Value::Int(13)));
        assert_eq!(a.sub(&b), Ok(Value::Int(7)));
        assert_eq!(a.mul(&b), Ok(Value::Int(30)));
        assert_eq!(a.div(&b), Ok(Value::Int(3)));
        assert_eq!(a.rem(&b), Ok(Value::Int(1)));
        assert_eq!(Value::Int(-7).div(&Value::Int(2)), Ok(Value::Int(-3)));
    }

    #[test]
    fn double_promotion() {
        assert_eq!(Value::Int(7).add(&Value::Double(2.0)), Ok(Value::Double(9.0)));
        assert_eq!(Value::Int(7).div(&Value::Double(2.0)), Ok(Value::Double(3.5)));
        assert_eq!(Value::Double(7.5).rem(&Value::Int(2)), Ok(Value::Double(1.5)));
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(Value::from("ab").add(&Value::from("cd")), Ok(Value::from("abcd")));
        assert_eq!(Value::from("T").add(&Value::Int(1)), Ok(Value::from("T1")));
        assert_eq!(Value::Double(0.5).add(&Value::from("mm")), Ok(Value::from("0.5mm")));
        assert_eq!(Value::Bool(false).add(&Value::from("!")), Ok(Value::from("false!")));
    }

    #[test]
    fn string_arithmetic_is_rejected() {
        let err = Value::from("a").sub(&Value::Int(1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
        assert_eq!(err.at, Operand::Lhs);
        assert!(Value::Int(1).mul(&Value::from("a")).is_err());
        assert!(Value::Bool(true).add(&Value::Int(1)).is_err());
    }

    #[test]
    fn division_by_zero() {
        let err = Value::Int(1).div(&Value::Int(0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Runtime);
        assert_eq!(err.message, "Division by zero");
        assert_eq!(err.at, Operand::Rhs);
        assert!(Value::Double(1.0).rem(&Value::Double(0.0)).is_err());
    }

    #[test]
    fn wrapping_integer_overflow() {
        assert_eq!(Value::Int(i64::MAX).add(&Value::Int(1)), Ok(Value::Int(i64::MIN)));
        assert_eq!(Value::Int(i64::MIN).div(&Value::Int(-1)), Ok(Value::Int(i64::MIN)));
    }

    #[test]
    fn numeric_comparison() {
        assert_eq!(Value::Int(1).compare(CmpOp::Eq, &Value::Int(1)), Ok(true));
        assert_eq!(Value::Int(1).compare(CmpOp::Lt, &Value::Double(1.5)), Ok(true));
        assert_eq!(Value::Double(0.1 + 0.2).compare(CmpOp::Eq, &Value::Double(0.3)), Ok(true));
        assert_eq!(Value::Int(2).compare(CmpOp::Le, &Value::Int(2)), Ok(true));
        assert_eq!(Value::Int(2).compare(CmpOp::Ge, &Value::Int(3)), Ok(false));
    }

    #[test]
    fn bool_comparison() {
        assert_eq!(Value::Bool(true).compare(CmpOp::Ne, &Value::Bool(false)), Ok(true));
        assert!(Value::Bool(true).compare(CmpOp::Lt, &Value::Bool(false)).is_err());
    }

    #[test]
    fn mixed_comparison_stringifies() {
        assert_eq!(Value::from("10").compare(CmpOp::Eq, &Value::Int(10)), Ok(true));
        assert_eq!(Value::from("abc").compare(CmpOp::Lt, &Value::from("abd")), Ok(true));
        assert_eq!(Value::Bool(true).compare(CmpOp::Eq, &Value::from("true")), Ok(true));
        assert_eq!(Value::Bool(true).compare(CmpOp::Eq, &Value::Int(1)), Ok(false));
    }

    #[test]
    fn logical() {
        assert_eq!(Value::Bool(true).and(&Value::Bool(false)), Ok(Value::Bool(false)));
        assert_eq!(Value::Bool(false).or(&Value::Bool(true)), Ok(Value::Bool(true)));
        assert_eq!(Value::Bool(true).and(&Value::Int(1)).unwrap_err().at, Operand::Rhs);
        assert_eq!(Value::Int(1).or(&Value::Bool(true)).unwrap_err().at, Operand::Lhs);
    }

    #[test]
    fn unary() {
        assert_eq!(Value::Int(5).neg(), Ok(Value::Int(-5)));
        assert_eq!(Value::Double(1.5).neg(), Ok(Value::Double(-1.5)));
        assert!(Value::from("x").neg().is_err());
        assert_eq!(Value::Bool(true).not(), Ok(Value::Bool(false)));
        assert!(Value::Int(0).not().is_err());
    }

    #[test]
    fn conversions() {
        assert_eq!(Value::Double(2.7).convert(Conversion::Int), Ok(Value::Int(2)));
        assert_eq!(Value::Double(-2.7).convert(Conversion::Int), Ok(Value::Int(-2)));
        assert_eq!(Value::Double(2.5).convert(Conversion::Round), Ok(Value::Int(3)));
        assert_eq!(Value::Double(-2.5).convert(Conversion::Floor), Ok(Value::Int(-3)));
        assert_eq!(Value::Double(2.1).convert(Conversion::Ceil), Ok(Value::Int(3)));
        assert_eq!(Value::Int(4).convert(Conversion::Round), Ok(Value::Int(4)));
        assert!(Value::from("4").convert(Conversion::Int).is_err());
    }

    #[test]
    fn from_impls() {
        let v: Value = 42i64.into();
        assert_eq!(v, Value::Int(42));
        let v: Value = true.into();
        assert_eq!(v, Value::Bool(true));
        assert!(Value::default().is_empty());
    }
}
