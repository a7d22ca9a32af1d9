//! Code-mode lexer, expression AST, parser and evaluator.
//!
//! Everything between `{` and `}` of a template is "code".  Code is lexed on
//! demand (the template parser switches back and forth between literal text
//! and code), so [`Lexer`] works directly on the whole template with a byte
//! cursor instead of producing a token vector up front.
//!
//! Operator precedence (lowest → highest):
//!   ternary  →  or  →  and  →  equality / regex  →  relational  →
//!   additive  →  multiplicative  →  unary
//!
//! Every AST node carries the byte [`Span`] it was parsed from; the evaluator
//! uses it to place diagnostics.

use super::builtins;
use super::context::EvalContext;
use super::value::{CmpOp, Conversion, OpError, Operand, Value};
use crate::diagnostic::{EvalError, EvalResult, Span};
use crate::pattern::{unescape_slashes, Pattern};

/// Reserved words.  None of them can name a variable.
pub const KEYWORDS: &[&str] = &[
    "and",
    "ceil",
    "digits",
    "elsif",
    "else",
    "empty",
    "endif",
    "false",
    "filament_change",
    "floor",
    "global",
    "if",
    "int",
    "interpolate_table",
    "is_nil",
    "local",
    "max",
    "min",
    "not",
    "one_of",
    "or",
    "random",
    "repeat",
    "round",
    "size",
    "true",
    "zdigits",
];

pub fn is_keyword(ident: &str) -> bool {
    KEYWORDS.contains(&ident)
}

/// Deepest nesting of sub-expressions and `if` blocks a template may use.
pub const MAX_NESTING: usize = 64;

/// Parser depth units spent by one nesting level.  A chained binary operator
/// spends a single unit until its chain ends.
const NESTING_COST: usize = 8;
const MAX_DEPTH: usize = MAX_NESTING * NESTING_COST;

const NON_ASCII_IN_CODE: &str = "Non-ASCII7 characters are only allowed inside text blocks and string literals, not inside code blocks.";

// ── Token ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Int(i64),
    Double(f64),
    Str(String),
    Ident(String),

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Tilde,

    // Comparison
    Eq, // ==
    Ne, // != or <>
    Lt,
    Le,
    Gt,
    Ge,
    RegexMatch,    // =~
    NotRegexMatch, // !~

    // Logical
    And, // &&
    Or,  // ||

    // Misc
    Assign,
    Question,
    Colon,
    Comma,
    Semicolon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    /// Unrecognised input byte, reported by the parser with its position.
    Unknown(char),
    Eof,
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

/// Byte cursor over the template source.
pub struct Lexer<'a> {
    pub(crate) src: &'a str,
    pub(crate) pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer { src, pos: 0 }
    }

    pub(crate) fn peek_byte(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn peek_byte_at(&self, offset: usize) -> Option<u8> {
        self.src.as_bytes().get(self.pos + offset).copied()
    }

    fn eat(&mut self, ch: u8) -> bool {
        if self.peek_byte() == Some(ch) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn skip_ws(&mut self) {
        while matches!(self.peek_byte(), Some(b' ' | b'\t' | b'\r' | b'\n' | 0x0b | 0x0c)) {
            self.pos += 1;
        }
    }

    fn read_digits(&mut self) {
        while matches!(self.peek_byte(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
    }

    /// Integer or floating point literal.  A `.` or an exponent makes it a
    /// Double; `inf` / `nan` are not numbers.
    fn read_number(&mut self, start: usize) -> EvalResult<Token> {
        self.read_digits();
        let mut is_double = self.src.as_bytes()[start] == b'.';
        if !is_double && self.eat(b'.') {
            is_double = true;
        }
        if is_double {
            self.read_digits();
        }
        if matches!(self.peek_byte(), Some(b'e' | b'E')) {
            let exp_digits_at = match self.peek_byte_at(1) {
                Some(b'+' | b'-') => 2,
                _ => 1,
            };
            if matches!(self.peek_byte_at(exp_digits_at), Some(b'0'..=b'9')) {
                is_double = true;
                self.pos += exp_digits_at;
                self.read_digits();
            }
        }
        let text = &self.src[start..self.pos];
        let span = Span::new(start, self.pos);
        if is_double {
            text.parse()
                .map(Token::Double)
                .map_err(|_| EvalError::syntax(span, "Invalid number."))
        } else {
            text.parse()
                .map(Token::Int)
                .map_err(|_| EvalError::syntax(span, "Integer literal is out of range."))
        }
    }

    /// Double-quoted string; the opening quote is already consumed.
    fn read_string(&mut self, start: usize) -> EvalResult<Token> {
        let mut s = String::new();
        loop {
            let Some(ch) = self.src[self.pos..].chars().next() else {
                return Err(EvalError::syntax(
                    Span::new(start, self.pos),
                    "Unterminated string literal.",
                ));
            };
            self.pos += ch.len_utf8();
            match ch {
                '"' => return Ok(Token::Str(s)),
                '\\' => {
                    let esc_start = self.pos - 1;
                    let escaped = self.src[self.pos..].chars().next();
                    self.pos += escaped.map_or(0, char::len_utf8);
                    match escaped {
                        Some('n') => s.push('\n'),
                        Some('r') => s.push('\r'),
                        Some('"') => s.push('"'),
                        Some('\\') => s.push('\\'),
                        _ => {
                            return Err(EvalError::syntax(
                                Span::new(esc_start, self.pos),
                                "Invalid escape sequence",
                            ))
                        }
                    }
                }
                c => s.push(c),
            }
        }
    }

    fn read_ident(&mut self, start: usize) -> Token {
        while matches!(
            self.peek_byte(),
            Some(b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_')
        ) {
            self.pos += 1;
        }
        Token::Ident(self.src[start..self.pos].to_owned())
    }

    pub fn next_token(&mut self) -> EvalResult<(Token, Span)> {
        self.skip_ws();
        let start = self.pos;
        let Some(ch) = self.peek_byte() else {
            return Ok((Token::Eof, Span::at(start)));
        };
        if !ch.is_ascii() {
            let len = self.src[start..].chars().next().map_or(1, char::len_utf8);
            return Err(EvalError::syntax(Span::new(start, start + len), NON_ASCII_IN_CODE));
        }
        self.pos += 1;

        let tok = match ch {
            b'0'..=b'9' => self.read_number(start)?,
            b'.' if matches!(self.peek_byte(), Some(b'0'..=b'9')) => self.read_number(start)?,
            b'"' => self.read_string(start)?,
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.read_ident(start),
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' => Token::Star,
            b'/' => Token::Slash,
            b'%' => Token::Percent,
            b'~' => Token::Tilde,
            b'!' => {
                if self.eat(b'=') {
                    Token::Ne
                } else if self.eat(b'~') {
                    Token::NotRegexMatch
                } else {
                    Token::Bang
                }
            }
            b'=' => {
                if self.eat(b'=') {
                    Token::Eq
                } else if self.eat(b'~') {
                    Token::RegexMatch
                } else {
                    Token::Assign
                }
            }
            b'<' => {
                if self.eat(b'=') {
                    Token::Le
                } else if self.eat(b'>') {
                    Token::Ne
                } else {
                    Token::Lt
                }
            }
            b'>' => {
                if self.eat(b'=') {
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            b'&' if self.eat(b'&') => Token::And,
            b'|' if self.eat(b'|') => Token::Or,
            b'?' => Token::Question,
            b':' => Token::Colon,
            b',' => Token::Comma,
            b';' => Token::Semicolon,
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b'[' => Token::LBracket,
            b']' => Token::RBracket,
            b'{' => Token::LBrace,
            b'}' => Token::RBrace,
            c => Token::Unknown(c as char),
        };
        Ok((tok, Span::new(start, self.pos)))
    }
}

// ── AST ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Cmp(CmpOp),
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
}

/// `name` or `name[index]`.
#[derive(Debug, Clone, PartialEq)]
pub struct VarRef {
    pub name: String,
    pub name_span: Span,
    pub index: Option<Box<Expr>>,
    pub span: Span,
}

/// One entry of a `one_of()` pattern list.
#[derive(Debug, Clone, PartialEq)]
pub enum OneOfPattern {
    /// Compared for string equality.
    Text(Expr),
    /// `~expr`: the string value is compiled as a regex.
    Regex(Expr),
    /// `/regex/`.
    RegexLiteral { pattern: String, span: Span },
}

/// Calls of the built-in functions.
#[derive(Debug, Clone, PartialEq)]
pub enum Builtin {
    Min(Box<Expr>, Box<Expr>),
    Max(Box<Expr>, Box<Expr>),
    Random(Box<Expr>, Box<Expr>),
    FilamentChange(Box<Expr>),
    Digits {
        zero_pad: bool,
        value: Box<Expr>,
        width: Box<Expr>,
        decimals: Option<Box<Expr>>,
    },
    Convert(Conversion, Box<Expr>),
    IsNil(VarRef),
    Empty(VarRef),
    Size(VarRef),
    OneOf {
        subject: Box<Expr>,
        patterns: Vec<OneOfPattern>,
    },
    InterpolateTable {
        x: Box<Expr>,
        table: Vec<(Expr, Expr)>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Value),
    Var(VarRef),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// `subject =~ /pattern/` or `subject !~ /pattern/`.
    Regex {
        negate: bool,
        subject: Box<Expr>,
        pattern: String,
        pattern_span: Span,
    },
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(Builtin),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// The variable reference, if this expression is nothing but one.
    pub fn as_var(&self) -> Option<&VarRef> {
        match &self.kind {
            ExprKind::Var(r) => Some(r),
            _ => None,
        }
    }
}

// ── Parser ────────────────────────────────────────────────────────────────────

/// Recursive-descent parser shared by expressions and whole templates.
pub struct Parser<'a> {
    pub(crate) lex: Lexer<'a>,
    /// End offset of the last consumed token.
    pub(crate) prev_end: usize,
    /// Nesting spent so far, in units of `NESTING_COST`.
    pub(crate) depth: usize,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str) -> Self {
        Parser {
            lex: Lexer::new(src),
            prev_end: 0,
            depth: 0,
        }
    }

    /// Spend `cost` depth units; fails once the budget is exhausted.
    pub(crate) fn enter(&mut self, cost: usize, span: Span) -> EvalResult<()> {
        self.depth += cost;
        if self.depth > MAX_DEPTH {
            return Err(EvalError::syntax(span, "Expression nested too deeply."));
        }
        Ok(())
    }

    pub(crate) fn leave(&mut self, cost: usize) {
        self.depth = self.depth.saturating_sub(cost);
    }

    /// Run `f` one nesting level deeper.
    pub(crate) fn nested<T>(
        &mut self,
        span: Span,
        f: impl FnOnce(&mut Self) -> EvalResult<T>,
    ) -> EvalResult<T> {
        self.enter(NESTING_COST, span)?;
        let result = f(self);
        self.leave(NESTING_COST);
        result
    }

    pub(crate) fn peek(&mut self) -> EvalResult<(Token, Span)> {
        let save = self.lex.pos;
        let tok = self.lex.next_token();
        self.lex.pos = save;
        tok
    }

    pub(crate) fn advance(&mut self) -> EvalResult<(Token, Span)> {
        let (tok, span) = self.lex.next_token()?;
        self.prev_end = span.end;
        Ok((tok, span))
    }

    pub(crate) fn eat(&mut self, expected: &Token) -> EvalResult<bool> {
        if &self.peek()?.0 == expected {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Consume `expected` or fail with the grammar `tag` at the next token.
    pub(crate) fn expect(&mut self, expected: &Token, tag: &'static str) -> EvalResult<Span> {
        let (tok, span) = self.peek()?;
        if &tok == expected {
            self.advance()?;
            Ok(span)
        } else {
            Err(EvalError::expected(span, tag))
        }
    }

    pub(crate) fn at_keyword(&mut self, kw: &str) -> EvalResult<bool> {
        Ok(matches!(self.peek()?.0, Token::Ident(ref s) if s == kw))
    }

    pub(crate) fn eat_keyword(&mut self, kw: &str) -> EvalResult<bool> {
        if self.at_keyword(kw)? {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub(crate) fn span_from(&self, start: usize) -> Span {
        Span::new(start, self.prev_end.max(start))
    }

    // ── Grammar ───────────────────────────────────────────────────────────────

    pub fn parse_conditional(&mut self) -> EvalResult<Expr> {
        let cond = self.parse_or()?;
        if !self.eat(&Token::Question)? {
            return Ok(cond);
        }
        let start = cond.span.start;
        let (then, else_) = self.nested(cond.span, |p| {
            let then = p.parse_conditional()?;
            p.expect(&Token::Colon, "conditional_expression")?;
            Ok((then, p.parse_conditional()?))
        })?;
        Ok(Expr::new(
            ExprKind::Ternary(Box::new(cond), Box::new(then), Box::new(else_)),
            self.span_from(start),
        ))
    }

    fn binary(&self, op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        let span = lhs.span.to(rhs.span);
        Expr::new(ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)), span)
    }

    fn parse_or(&mut self) -> EvalResult<Expr> {
        let mut lhs = self.parse_and()?;
        let mut ops = 0;
        while self.eat(&Token::Or)? || self.eat_keyword("or")? {
            self.enter(1, lhs.span)?;
            ops += 1;
            let rhs = self.parse_and()?;
            lhs = self.binary(BinOp::Or, lhs, rhs);
        }
        self.leave(ops);
        Ok(lhs)
    }

    fn parse_and(&mut self) -> EvalResult<Expr> {
        let mut lhs = self.parse_equality()?;
        let mut ops = 0;
        while self.eat(&Token::And)? || self.eat_keyword("and")? {
            self.enter(1, lhs.span)?;
            ops += 1;
            let rhs = self.parse_equality()?;
            lhs = self.binary(BinOp::And, lhs, rhs);
        }
        self.leave(ops);
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> EvalResult<Expr> {
        let mut lhs = self.parse_relational()?;
        let mut ops = 0;
        loop {
            let op = match self.peek()?.0 {
                Token::Eq => CmpOp::Eq,
                Token::Ne => CmpOp::Ne,
                Token::RegexMatch | Token::NotRegexMatch => {
                    let (tok, _) = self.advance()?;
                    let (pattern, pattern_span) = self.read_regex()?;
                    let span = lhs.span.to(pattern_span);
                    lhs = Expr::new(
                        ExprKind::Regex {
                            negate: tok == Token::NotRegexMatch,
                            subject: Box::new(lhs),
                            pattern,
                            pattern_span,
                        },
                        span,
                    );
                    continue;
                }
                _ => break,
            };
            self.advance()?;
            self.enter(1, lhs.span)?;
            ops += 1;
            let rhs = self.parse_relational()?;
            lhs = self.binary(BinOp::Cmp(op), lhs, rhs);
        }
        self.leave(ops);
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> EvalResult<Expr> {
        let mut lhs = self.parse_additive()?;
        let mut ops = 0;
        loop {
            let op = match self.peek()?.0 {
                Token::Lt => CmpOp::Lt,
                Token::Le => CmpOp::Le,
                Token::Gt => CmpOp::Gt,
                Token::Ge => CmpOp::Ge,
                _ => break,
            };
            self.advance()?;
            self.enter(1, lhs.span)?;
            ops += 1;
            let rhs = self.parse_additive()?;
            lhs = self.binary(BinOp::Cmp(op), lhs, rhs);
        }
        self.leave(ops);
        Ok(lhs)
    }

    pub(crate) fn parse_additive(&mut self) -> EvalResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        let mut ops = 0;
        loop {
            let op = match self.peek()?.0 {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance()?;
            self.enter(1, lhs.span)?;
            ops += 1;
            let rhs = self.parse_multiplicative()?;
            lhs = self.binary(op, lhs, rhs);
        }
        self.leave(ops);
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> EvalResult<Expr> {
        let mut lhs = self.parse_unary()?;
        let mut ops = 0;
        loop {
            let op = match self.peek()?.0 {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Rem,
                _ => break,
            };
            self.advance()?;
            self.enter(1, lhs.span)?;
            ops += 1;
            let rhs = self.parse_unary()?;
            lhs = self.binary(op, lhs, rhs);
        }
        self.leave(ops);
        Ok(lhs)
    }

    fn unary(&mut self, op: UnaryOp, start: usize) -> EvalResult<Expr> {
        let inner = self.parse_unary()?;
        Ok(Expr::new(
            ExprKind::Unary(op, Box::new(inner)),
            self.span_from(start),
        ))
    }

    pub(crate) fn parse_unary(&mut self) -> EvalResult<Expr> {
        let span = self.peek()?.1;
        self.nested(span, Self::parse_primary)
    }

    fn parse_primary(&mut self) -> EvalResult<Expr> {
        let (tok, span) = self.peek()?;
        let start = span.start;
        match tok {
            Token::Minus => {
                self.advance()?;
                self.unary(UnaryOp::Neg, start)
            }
            Token::Plus => {
                self.advance()?;
                self.unary(UnaryOp::Plus, start)
            }
            Token::Bang => {
                self.advance()?;
                self.unary(UnaryOp::Not, start)
            }
            Token::LParen => {
                self.advance()?;
                let inner = self.parse_conditional()?;
                self.expect(&Token::RParen, "closing_parenthesis")?;
                Ok(Expr {
                    span: self.span_from(start),
                    ..inner
                })
            }
            Token::Int(n) => {
                self.advance()?;
                Ok(Expr::new(ExprKind::Literal(Value::Int(n)), span))
            }
            Token::Double(x) => {
                self.advance()?;
                Ok(Expr::new(ExprKind::Literal(Value::Double(x)), span))
            }
            Token::Str(s) => {
                self.advance()?;
                Ok(Expr::new(ExprKind::Literal(Value::Str(s)), span))
            }
            Token::Ident(name) if is_keyword(&name) => self.parse_keyword(&name, span),
            Token::Ident(_) => {
                let r = self.parse_variable_reference()?;
                let span = r.span;
                Ok(Expr::new(ExprKind::Var(r), span))
            }
            _ => Err(EvalError::expected(span, "unary_expression")),
        }
    }

    /// Keyword-introduced unary expressions: literals, `not` and built-in calls.
    fn parse_keyword(&mut self, kw: &str, span: Span) -> EvalResult<Expr> {
        let start = span.start;
        let builtin = match kw {
            "true" | "false" => {
                self.advance()?;
                return Ok(Expr::new(ExprKind::Literal(Value::Bool(kw == "true")), span));
            }
            "not" => {
                self.advance()?;
                return self.unary(UnaryOp::Not, start);
            }
            "min" | "max" | "random" => {
                self.advance()?;
                let (a, b) = self.parse_two_args()?;
                match kw {
                    "min" => Builtin::Min(a, b),
                    "max" => Builtin::Max(a, b),
                    _ => Builtin::Random(a, b),
                }
            }
            "filament_change" => {
                self.advance()?;
                Builtin::FilamentChange(self.parse_one_arg()?)
            }
            "int" | "round" | "floor" | "ceil" => {
                self.advance()?;
                let conv = match kw {
                    "int" => Conversion::Int,
                    "round" => Conversion::Round,
                    "floor" => Conversion::Floor,
                    _ => Conversion::Ceil,
                };
                Builtin::Convert(conv, self.parse_one_arg()?)
            }
            "digits" | "zdigits" => {
                self.advance()?;
                self.expect(&Token::LParen, "unary_expression")?;
                let value = Box::new(self.parse_conditional()?);
                self.expect(&Token::Comma, "unary_expression")?;
                let width = Box::new(self.parse_conditional()?);
                let decimals = if self.eat(&Token::RParen)? {
                    None
                } else if self.eat(&Token::Comma)? {
                    let decimals = self.parse_conditional()?;
                    self.expect(&Token::RParen, "closing_parenthesis")?;
                    Some(Box::new(decimals))
                } else {
                    return Err(EvalError::expected(self.peek()?.1, "optional_parameter"));
                };
                Builtin::Digits {
                    zero_pad: kw == "zdigits",
                    value,
                    width,
                    decimals,
                }
            }
            "is_nil" | "empty" | "size" => {
                self.advance()?;
                self.expect(&Token::LParen, "unary_expression")?;
                let r = self.parse_variable_reference()?;
                self.expect(&Token::RParen, "closing_parenthesis")?;
                match kw {
                    "is_nil" => Builtin::IsNil(r),
                    "empty" => Builtin::Empty(r),
                    _ => Builtin::Size(r),
                }
            }
            "one_of" => {
                self.advance()?;
                self.parse_one_of()?
            }
            "interpolate_table" => {
                self.advance()?;
                self.parse_interpolate_table()?
            }
            _ => return Err(EvalError::expected(span, "unary_expression")),
        };
        Ok(Expr::new(ExprKind::Call(builtin), self.span_from(start)))
    }

    fn parse_one_arg(&mut self) -> EvalResult<Box<Expr>> {
        self.expect(&Token::LParen, "unary_expression")?;
        let arg = self.parse_conditional()?;
        self.expect(&Token::RParen, "closing_parenthesis")?;
        Ok(Box::new(arg))
    }

    fn parse_two_args(&mut self) -> EvalResult<(Box<Expr>, Box<Expr>)> {
        self.expect(&Token::LParen, "unary_expression")?;
        let a = self.parse_conditional()?;
        self.expect(&Token::Comma, "unary_expression")?;
        let b = self.parse_conditional()?;
        self.expect(&Token::RParen, "closing_parenthesis")?;
        Ok((Box::new(a), Box::new(b)))
    }

    fn parse_one_of(&mut self) -> EvalResult<Builtin> {
        self.expect(&Token::LParen, "unary_expression")?;
        let subject = Box::new(self.parse_unary()?);
        let mut patterns = Vec::new();
        if self.eat(&Token::Comma)? {
            loop {
                match self.peek()?.0 {
                    Token::RParen => break,
                    Token::Tilde => {
                        self.advance()?;
                        patterns.push(OneOfPattern::Regex(self.parse_unary()?));
                    }
                    Token::Slash => {
                        let (pattern, span) = self.read_regex()?;
                        patterns.push(OneOfPattern::RegexLiteral { pattern, span });
                    }
                    _ => patterns.push(OneOfPattern::Text(self.parse_unary()?)),
                }
                self.eat(&Token::Comma)?;
            }
        }
        self.expect(&Token::RParen, "one_of_list")?;
        Ok(Builtin::OneOf { subject, patterns })
    }

    fn parse_interpolate_table(&mut self) -> EvalResult<Builtin> {
        self.expect(&Token::LParen, "unary_expression")?;
        let x = Box::new(self.parse_unary()?);
        self.expect(&Token::Comma, "unary_expression")?;
        let mut table = Vec::new();
        while self.eat(&Token::LParen)? {
            let kx = self.parse_unary()?;
            self.expect(&Token::Comma, "unary_expression")?;
            let ky = self.parse_unary()?;
            self.expect(&Token::RParen, "closing_parenthesis")?;
            table.push((kx, ky));
            self.eat(&Token::Comma)?;
        }
        self.expect(&Token::RParen, "closing_parenthesis")?;
        Ok(Builtin::InterpolateTable { x, table })
    }

    /// `name` or `name[additive_expression]`.
    pub(crate) fn parse_variable_reference(&mut self) -> EvalResult<VarRef> {
        let (tok, name_span) = self.peek()?;
        let name = match tok {
            Token::Ident(name) if !is_keyword(&name) => name,
            Token::Ident(_) => return Err(EvalError::expected(name_span, "identifier")),
            _ => return Err(EvalError::expected(name_span, "variable_reference")),
        };
        self.advance()?;
        let index = if self.eat(&Token::LBracket)? {
            let index = self.parse_additive()?;
            self.expect(&Token::RBracket, "closing_bracket")?;
            Some(Box::new(index))
        } else {
            None
        };
        Ok(VarRef {
            name,
            name_span,
            index,
            span: self.span_from(name_span.start),
        })
    }

    /// `/regex/` literal.  Inside, a backslash escapes the next character.
    pub(crate) fn read_regex(&mut self) -> EvalResult<(String, Span)> {
        self.lex.skip_ws();
        let start = self.lex.pos;
        let bytes = self.lex.src.as_bytes();
        if bytes.get(start) != Some(&b'/') {
            return Err(EvalError::expected(Span::at(start), "regular_expression"));
        }
        let mut i = start + 1;
        loop {
            match bytes.get(i) {
                None => {
                    return Err(EvalError::expected(
                        Span::new(start, bytes.len()),
                        "regular_expression",
                    ))
                }
                Some(b'\\') => i += 2,
                Some(b'/') => break,
                Some(_) => i += 1,
            }
        }
        let raw = &self.lex.src[start + 1..i];
        self.lex.pos = i + 1;
        self.prev_end = self.lex.pos;
        Ok((unescape_slashes(raw), Span::new(start, i + 1)))
    }
}

/// Parse `src` as exactly one conditional expression.
pub fn parse_expression(src: &str) -> EvalResult<Expr> {
    let mut parser = Parser::new(src);
    let expr = parser.parse_conditional()?;
    let (tok, span) = parser.peek()?;
    if tok != Token::Eof {
        return Err(EvalError::expected(span, "eoi"));
    }
    Ok(expr)
}

// ── Evaluator ─────────────────────────────────────────────────────────────────

/// Attach source positions to a value-level operator failure.
pub(crate) fn op_error(err: OpError, whole: Span, lhs: Span, rhs: Span) -> EvalError {
    let span = match err.at {
        Operand::Lhs => lhs,
        Operand::Rhs => rhs,
        Operand::Both => whole,
    };
    EvalError::new(err.kind, span, err.message)
}

/// Evaluate an [`Expr`] against the given context.
///
/// Inside a suppressed branch every expression evaluates to
/// [`Value::Empty`] before anything is resolved or checked.
pub fn eval_expr(expr: &Expr, ctx: &mut EvalContext<'_>) -> EvalResult<Value> {
    if ctx.skipping() {
        return Ok(Value::Empty);
    }
    match &expr.kind {
        ExprKind::Literal(v) => Ok(v.clone()),

        ExprKind::Var(r) => {
            let binding = ctx.bind(r)?;
            ctx.read(&binding)
        }

        ExprKind::Unary(op, inner) => {
            let v = eval_expr(inner, ctx)?;
            let result = match op {
                UnaryOp::Neg => v.neg(),
                UnaryOp::Plus => Ok(v),
                UnaryOp::Not => v.not(),
            };
            result.map_err(|e| op_error(e, expr.span, inner.span, inner.span))
        }

        ExprKind::Binary(op, lhs, rhs) => {
            // Both sides are always evaluated; logical operators do not
            // short-circuit.
            let l = eval_expr(lhs, ctx)?;
            let r = eval_expr(rhs, ctx)?;
            let result = match op {
                BinOp::Add => l.add(&r),
                BinOp::Sub => l.sub(&r),
                BinOp::Mul => l.mul(&r),
                BinOp::Div => l.div(&r),
                BinOp::Rem => l.rem(&r),
                BinOp::Cmp(cmp) => l.compare(*cmp, &r).map(Value::Bool),
                BinOp::And => l.and(&r),
                BinOp::Or => l.or(&r),
            };
            result.map_err(|e| op_error(e, expr.span, lhs.span, rhs.span))
        }

        ExprKind::Regex {
            negate,
            subject,
            pattern,
            pattern_span,
        } => {
            let Value::Str(text) = eval_expr(subject, ctx)? else {
                return Err(EvalError::type_error(
                    subject.span,
                    "Left hand side of a regex match must be a string.",
                ));
            };
            let re = compile_regex(pattern, *pattern_span)?;
            Ok(Value::Bool(re.matches(&text) != *negate))
        }

        ExprKind::Ternary(cond, then, else_) => {
            let cond_value = match eval_expr(cond, ctx)? {
                Value::Bool(b) => b,
                _ => {
                    return Err(EvalError::type_error(cond.span, "Not a boolean expression"));
                }
            };
            let a = ctx.with_block(cond_value, |ctx| eval_expr(then, ctx))?;
            let b = ctx.with_block(!cond_value, |ctx| eval_expr(else_, ctx))?;
            Ok(if cond_value { a } else { b })
        }

        ExprKind::Call(builtin) => builtins::call(builtin, expr.span, ctx),
    }
}

pub(crate) fn compile_regex(pattern: &str, span: Span) -> EvalResult<Pattern> {
    Pattern::regex(pattern).map_err(|e| {
        EvalError::runtime(span, format!("Regular expression compilation failed: {e}"))
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
