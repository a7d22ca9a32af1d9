//! Error taxonomy and diagnostic formatting.
//!
//! Parsing and evaluation report failures as an internal [`EvalError`]: an
//! [`ErrorKind`], the byte [`Span`] of the offending source text and an
//! [`Expectation`].  When a template run fails, [`EvalError::into_diagnostic`]
//! turns it into the single user-facing [`PlaceholderError`]:
//!
//! ```text
//! Parsing error at line 2: Division by zero
//! G1 X{100/0}
//!          ^
//! ```
//!
//! An expectation is either a free-form message (rendered after `": "`) or a
//! grammar tag looked up in a fixed table (rendered after `". "`).  Tags that
//! are missing from the table fall back to `". Expecting tag <tag>"`.

use std::fmt;

// ── Spans ────────────────────────────────────────────────────────────────────

/// Half-open byte range into the template source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Zero-width span at `pos`.
    pub fn at(pos: usize) -> Self {
        Self { start: pos, end: pos }
    }

    /// Smallest span covering both `self` and `other`.
    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

// ── Error kinds ───────────────────────────────────────────────────────────────

/// Classification of a failed evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The template does not match the grammar.
    Syntax,
    /// Unknown identifier, or a name collision on declaration.
    Name,
    /// An operator or function applied to the wrong kind of value.
    Type,
    /// Index, count or table coordinate outside its valid range.
    Range,
    /// Division by zero, bad regex, missing RNG, nil dereference.
    Runtime,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Syntax => "syntax error",
            ErrorKind::Name => "name error",
            ErrorKind::Type => "type error",
            ErrorKind::Range => "range error",
            ErrorKind::Runtime => "runtime error",
        })
    }
}

/// What the parser or evaluator expected at the failure position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    Message(String),
    Tag(&'static str),
}

/// Human-readable message for a grammar tag.
pub fn tag_message(tag: &str) -> Option<&'static str> {
    Some(match tag {
        "eoi" | "start" => "Unknown syntax error",
        "text" => "Invalid text.",
        "text_block" => "Invalid text block.",
        "macro" => "Invalid macro.",
        "if_else_output" => "Not an {if}{else}{endif} macro.",
        "legacy_variable_expansion" => "Expecting a legacy variable expansion format",
        "identifier" => "Expecting an identifier.",
        "conditional_expression" => "Expecting a conditional expression.",
        "logical_or_expression" | "logical_and_expression" | "bool_expr_eval" => {
            "Expecting a boolean expression."
        }
        "equality_expression"
        | "relational_expression"
        | "additive_expression"
        | "multiplicative_expression"
        | "unary_expression" => "Expecting an expression.",
        "optional_parameter" => "Expecting a closing brace or an optional parameter.",
        "one_of_list" => "Expecting a list of string patterns (simple text or rexep)",
        "variable_reference" => "Expecting a variable reference.",
        "variable" => "Expecting a variable name.",
        "regular_expression" => "Expecting a regular expression.",
        "statement_end" => "Expecting a semicolon or the end of the macro.",
        "closing_parenthesis" => "Expecting a closing parenthesis.",
        "closing_bracket" => "Expecting a closing bracket.",
        "assignment_operator" => "Expecting an assignment operator.",
        _ => return None,
    })
}

// ── Internal error ────────────────────────────────────────────────────────────

/// A failure at a known source position, before formatting.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub kind: ErrorKind,
    pub span: Span,
    pub expectation: Expectation,
}

pub type EvalResult<T> = Result<T, EvalError>;

impl EvalError {
    pub fn new(kind: ErrorKind, span: Span, msg: impl Into<String>) -> Self {
        Self {
            kind,
            span,
            expectation: Expectation::Message(msg.into()),
        }
    }

    /// Syntax error described by a grammar tag.
    pub fn expected(span: Span, tag: &'static str) -> Self {
        Self {
            kind: ErrorKind::Syntax,
            span,
            expectation: Expectation::Tag(tag),
        }
    }

    pub fn syntax(span: Span, msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, span, msg)
    }

    pub fn name(span: Span, msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Name, span, msg)
    }

    pub fn type_error(span: Span, msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, span, msg)
    }

    pub fn range(span: Span, msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Range, span, msg)
    }

    pub fn runtime(span: Span, msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, span, msg)
    }

    /// The cause text without position information.
    pub fn cause(&self) -> String {
        match &self.expectation {
            Expectation::Message(msg) => msg.clone(),
            Expectation::Tag(tag) => match tag_message(tag) {
                Some(msg) => msg.to_owned(),
                None => format!("Expecting tag {tag}"),
            },
        }
    }

    /// Locate the error in `source` and render the full diagnostic.
    pub fn into_diagnostic(self, source: &str) -> PlaceholderError {
        let mut pos = self.span.start.min(source.len());
        while !source.is_char_boundary(pos) {
            pos -= 1;
        }
        let before = &source[..pos];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map_or(0, |i| i + 1);
        let line_end = source[pos..].find('\n').map_or(source.len(), |i| pos + i);
        let column = source[line_start..pos].chars().count();
        let cause = self.cause();

        let mut message = format!("Parsing error at line {line}");
        match &self.expectation {
            Expectation::Message(_) => message.push_str(": "),
            Expectation::Tag(_) => message.push_str(". "),
        }
        message.push_str(&cause);
        message.push('\n');
        message.push_str(&source[line_start..line_end]);
        message.push('\n');
        message.extend(std::iter::repeat(' ').take(column));
        message.push_str("^\n");

        PlaceholderError {
            kind: self.kind,
            line,
            column,
            cause,
            message,
        }
    }
}

// ── Public error ──────────────────────────────────────────────────────────────

/// The single diagnostic produced by a failed template evaluation.
///
/// `message` is meant to be shown to the user verbatim.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct PlaceholderError {
    pub kind: ErrorKind,
    /// 1-based line of the failure.
    pub line: usize,
    /// 0-based character column of the failure within its line.
    pub column: usize,
    pub cause: String,
    pub message: String,
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_on_first_line() {
        let err = EvalError::runtime(Span::new(4, 7), "Division by zero");
        let diag = err.into_diagnostic("{1/ 0}");
        assert_eq!(diag.kind, ErrorKind::Runtime);
        assert_eq!(diag.line, 1);
        assert_eq!(diag.column, 4);
        assert_eq!(diag.message, "Parsing error at line 1: Division by zero\n{1/ 0}\n    ^\n");
    }

    #[test]
    fn locates_line_and_column() {
        let src = "G28\nG1 X{a}\nM104";
        let diag = EvalError::name(Span::new(9, 10), "Not a variable name").into_diagnostic(src);
        assert_eq!(diag.line, 2);
        assert_eq!(diag.column, 5);
        assert!(diag.message.contains("\nG1 X{a}\n     ^\n"));
        assert!(!diag.message.contains("M104"));
    }

    #[test]
    fn tag_lookup() {
        let diag = EvalError::expected(Span::at(1), "macro").into_diagnostic("{}");
        assert_eq!(diag.cause, "Invalid macro.");
        assert!(diag.message.starts_with("Parsing error at line 1. Invalid macro.\n"));
    }

    #[test]
    fn unknown_tag_falls_back() {
        let diag = EvalError::expected(Span::at(0), "gizmo").into_diagnostic("x");
        assert!(diag.message.starts_with("Parsing error at line 1. Expecting tag gizmo\n"));
    }

    #[test]
    fn column_counts_characters() {
        let src = "žluť {x}";
        let pos = src.find('x').unwrap();
        let diag = EvalError::name(Span::at(pos), "Not a variable name").into_diagnostic(src);
        assert_eq!(diag.column, 6);
    }

    #[test]
    fn error_at_end_of_input() {
        let diag = EvalError::expected(Span::at(3), "macro").into_diagnostic("{1+");
        assert_eq!(diag.column, 3);
        assert_eq!(diag.line, 1);
    }

    #[test]
    fn display_is_full_message() {
        let diag = EvalError::range(Span::at(0), "Index out of range").into_diagnostic("a");
        assert_eq!(diag.to_string(), diag.message);
    }
}
