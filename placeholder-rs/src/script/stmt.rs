//! Template AST and template-level parser.
//!
//! A template alternates between literal text and code:
//!
//! ```text
//! text_block  := ( text | "{" macro "}" | "[" legacy "]" )*
//! macro       := ( if_block | statement (";"+ | ⟨end⟩) | ";"+ )+
//! if_block    := "if" cond body ("elsif" cond body)* ("else" body)? "endif"
//! body        := "}" text_block "{"  |  "then"? macro-items
//! statement   := lvalue "=" rvalue
//!              | ("local" | "global") name "=" rvalue
//!              | conditional_expression
//! rvalue      := "(" list ")" | "repeat" "(" additive "," cond ")" | cond
//! legacy      := name | name "[" name "]"
//! ```
//!
//! Inside a text body an embedded `{elsif …}`, `{else}` or `{endif}` ends the
//! text run and hands control back to the enclosing if-block.
//!
//! Parsing never evaluates anything, so a syntax error anywhere in the
//! template (including in branches that would not be taken) is reported before
//! any output is produced.

use super::expr::{is_keyword, parse_expression, Expr, ExprKind, Parser, Token, VarRef};
use crate::diagnostic::{EvalError, EvalResult, PlaceholderError, Span};

// ── AST ───────────────────────────────────────────────────────────────────────

/// A parsed template, ready to be evaluated any number of times.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    body: Body,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Full macro syntax: text, code blocks and legacy expansions.
    Macro(Vec<Node>),
    /// Exactly one conditional expression.
    Boolean(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Literal text, copied to the output unchanged.
    Text(String),
    /// `[name]`, `[name_N]` or `[name[index_name]]`.
    Legacy(LegacyRef),
    /// A bare expression whose string form is appended to the output.
    Expr(Expr),
    Assign { lhs: VarRef, rhs: RValue },
    Declare(Declaration),
    If(IfBlock),
}

/// Legacy bracket expansion.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyRef {
    pub name: String,
    pub name_span: Span,
    /// Name of the integer variable used as index in `[name[index_name]]`.
    pub index: Option<(String, Span)>,
    pub span: Span,
}

/// `local name = rvalue` / `global name = rvalue`.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub global: bool,
    pub name: String,
    pub name_span: Span,
    pub rhs: RValue,
}

/// Right-hand side of an assignment or declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum RValue {
    /// `(a, b, …)` vector initializer.
    List { items: Vec<Expr>, span: Span },
    /// A bare variable reference.  Copies a whole vector when both sides are
    /// un-indexed vectors, otherwise reads a scalar.
    Var(VarRef),
    Expr(Expr),
    /// `repeat(count, value)`.
    Repeat {
        count: Expr,
        value: Expr,
        span: Span,
    },
}

impl RValue {
    pub fn span(&self) -> Span {
        match self {
            RValue::List { span, .. } | RValue::Repeat { span, .. } => *span,
            RValue::Var(r) => r.span,
            RValue::Expr(e) => e.span,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfBlock {
    /// `if` branch followed by the `elsif` branches, in source order.
    pub branches: Vec<Branch>,
    pub else_body: Option<Vec<Node>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub cond: Expr,
    pub body: Vec<Node>,
}

impl Template {
    /// Parse a template in full macro syntax.
    pub fn parse(source: &str) -> Result<Template, PlaceholderError> {
        parse_template(source)
            .map(|nodes| Template {
                source: source.to_owned(),
                body: Body::Macro(nodes),
            })
            .map_err(|e| e.into_diagnostic(source))
    }

    /// Parse a template consisting of exactly one conditional expression.
    pub fn parse_boolean(source: &str) -> Result<Template, PlaceholderError> {
        parse_expression(source)
            .map(|expr| Template {
                source: source.to_owned(),
                body: Body::Boolean(expr),
            })
            .map_err(|e| e.into_diagnostic(source))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self.body, Body::Boolean(_))
    }
}

/// Parse `src` as a text block spanning the whole input.
pub fn parse_template(src: &str) -> EvalResult<Vec<Node>> {
    let mut parser = Parser::new(src);
    let nodes = parser.parse_text_block()?;
    if parser.lex.pos < src.len() {
        // Only an unmatched `{elsif}`, `{else}` or `{endif}` stops a
        // top-level text block early.
        return Err(EvalError::expected(Span::at(parser.lex.pos), "eoi"));
    }
    Ok(nodes)
}

// ── Parser ────────────────────────────────────────────────────────────────────

/// What may legally follow the last statement of a macro body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Within {
    /// `{ … }`
    Braces,
    /// `if` / `elsif` branch in code form.
    IfBranch,
    /// `else` branch in code form.
    ElseBranch,
}

fn is_branch_keyword(tok: &Token) -> bool {
    matches!(tok, Token::Ident(s) if s == "elsif" || s == "else" || s == "endif")
}

impl<'a> Parser<'a> {
    /// Literal text, `{…}` blocks and `[…]` expansions up to the end of
    /// input or up to a `{` that opens an `elsif` / `else` / `endif`.
    pub(crate) fn parse_text_block(&mut self) -> EvalResult<Vec<Node>> {
        let mut nodes = Vec::new();
        let src = self.lex.src;
        loop {
            let start = self.lex.pos;
            match src.as_bytes().get(start) {
                None => break,
                Some(b'{') => {
                    self.lex.pos = start + 1;
                    if is_branch_keyword(&self.peek()?.0) {
                        self.lex.pos = start;
                        break;
                    }
                    self.prev_end = start + 1;
                    self.parse_macro(Within::Braces, &mut nodes)?;
                    self.expect(&Token::RBrace, "macro")?;
                }
                Some(b'[') => {
                    self.lex.pos = start + 1;
                    self.prev_end = start + 1;
                    nodes.push(Node::Legacy(self.parse_legacy(start)?));
                }
                Some(_) => {
                    let end = src[start..]
                        .find(['{', '['])
                        .map_or(src.len(), |i| start + i);
                    nodes.push(Node::Text(src[start..end].to_owned()));
                    self.lex.pos = end;
                    self.prev_end = end;
                }
            }
        }
        Ok(nodes)
    }

    /// Items of a code body, appended to `nodes`.
    fn parse_macro(&mut self, within: Within, nodes: &mut Vec<Node>) -> EvalResult<()> {
        let mut any = false;
        loop {
            match self.peek()?.0 {
                Token::Semicolon => {
                    self.advance()?;
                }
                Token::Eof | Token::RBrace => break,
                ref t if is_branch_keyword(t) && within != Within::Braces => break,
                Token::Ident(ref kw) if kw == "if" => {
                    let (_, span) = self.advance()?;
                    nodes.push(Node::If(self.nested(span, Self::parse_if)?));
                }
                _ => {
                    nodes.push(self.parse_statement()?);
                    self.end_statement(within)?;
                }
            }
            any = true;
        }
        if !any && within == Within::Braces {
            return Err(EvalError::expected(self.peek()?.1, "macro"));
        }
        Ok(())
    }

    /// One or more `;`, or a lookahead of whatever closes the body.
    fn end_statement(&mut self, within: Within) -> EvalResult<()> {
        if self.eat(&Token::Semicolon)? {
            while self.eat(&Token::Semicolon)? {}
            return Ok(());
        }
        let (tok, span) = self.peek()?;
        let closed = match within {
            Within::Braces => tok == Token::RBrace,
            Within::IfBranch => is_branch_keyword(&tok),
            Within::ElseBranch => matches!(tok, Token::Ident(ref s) if s == "endif"),
        };
        if closed {
            Ok(())
        } else {
            Err(EvalError::expected(span, "statement_end"))
        }
    }

    /// Everything after the `if` keyword up to and including `endif`.
    fn parse_if(&mut self) -> EvalResult<IfBlock> {
        let mut branches = Vec::new();
        let cond = self.parse_conditional()?;
        let body = self.parse_branch_body(Within::IfBranch)?;
        branches.push(Branch { cond, body });
        while self.eat_keyword("elsif")? {
            let cond = self.parse_conditional()?;
            let body = self.parse_branch_body(Within::IfBranch)?;
            branches.push(Branch { cond, body });
        }
        let else_body = if self.eat_keyword("else")? {
            Some(self.parse_branch_body(Within::ElseBranch)?)
        } else {
            None
        };
        if !self.eat_keyword("endif")? {
            return Err(EvalError::expected(self.peek()?.1, "if_else_output"));
        }
        Ok(IfBlock { branches, else_body })
    }

    /// `} text {` or a code body.
    fn parse_branch_body(&mut self, within: Within) -> EvalResult<Vec<Node>> {
        let mut nodes = Vec::new();
        if self.eat(&Token::RBrace)? {
            nodes = self.parse_text_block()?;
            self.expect(&Token::LBrace, "if_else_output")?;
        } else {
            if within == Within::IfBranch {
                self.eat_ident("then")?;
            }
            self.parse_macro(within, &mut nodes)?;
        }
        Ok(nodes)
    }

    /// Consume a plain identifier `name` if it comes next.
    fn eat_ident(&mut self, name: &str) -> EvalResult<bool> {
        if matches!(self.peek()?.0, Token::Ident(ref s) if s == name) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn parse_statement(&mut self) -> EvalResult<Node> {
        match self.peek()?.0 {
            Token::Ident(ref kw) if kw == "local" || kw == "global" => {
                self.advance()?;
                self.parse_declaration(kw == "global")
            }
            Token::Ident(ref name) if !is_keyword(name) => {
                let (save_pos, save_end, save_depth) = (self.lex.pos, self.prev_end, self.depth);
                if let Ok(lhs) = self.parse_variable_reference() {
                    if self.eat(&Token::Assign)? {
                        let rhs = self.parse_rvalue()?;
                        return Ok(Node::Assign { lhs, rhs });
                    }
                }
                self.lex.pos = save_pos;
                self.prev_end = save_end;
                self.depth = save_depth;
                Ok(Node::Expr(self.parse_conditional()?))
            }
            _ => Ok(Node::Expr(self.parse_conditional()?)),
        }
    }

    fn parse_declaration(&mut self, global: bool) -> EvalResult<Node> {
        let (tok, name_span) = self.advance()?;
        let name = match tok {
            Token::Ident(name) if !is_keyword(&name) => name,
            _ => return Err(EvalError::expected(name_span, "identifier")),
        };
        self.expect(&Token::Assign, "assignment_operator")?;
        let rhs = self.parse_rvalue()?;
        Ok(Node::Declare(Declaration {
            global,
            name,
            name_span,
            rhs,
        }))
    }

    fn parse_rvalue(&mut self) -> EvalResult<RValue> {
        let (tok, span) = self.peek()?;
        if tok == Token::LParen {
            let (save_pos, save_end, save_depth) = (self.lex.pos, self.prev_end, self.depth);
            if let Ok(Some(list)) = self.parse_initializer_list(span.start) {
                return Ok(list);
            }
            self.lex.pos = save_pos;
            self.prev_end = save_end;
            self.depth = save_depth;
        }
        if self.eat_keyword("repeat")? {
            self.expect(&Token::LParen, "unary_expression")?;
            let count = self.parse_additive()?;
            self.expect(&Token::Comma, "unary_expression")?;
            let value = self.parse_conditional()?;
            self.expect(&Token::RParen, "closing_parenthesis")?;
            return Ok(RValue::Repeat {
                count,
                value,
                span: self.span_from(span.start),
            });
        }
        let expr = self.parse_conditional()?;
        Ok(match expr.kind {
            ExprKind::Var(r) => RValue::Var(r),
            kind => RValue::Expr(Expr::new(kind, expr.span)),
        })
    }

    /// `(a, b, …)` directly followed by the end of the statement.  `None`
    /// when the parenthesis turns out to open a scalar expression instead.
    fn parse_initializer_list(&mut self, start: usize) -> EvalResult<Option<RValue>> {
        self.expect(&Token::LParen, "unary_expression")?;
        let mut items = Vec::new();
        if !self.eat(&Token::RParen)? {
            loop {
                items.push(self.parse_conditional()?);
                if self.eat(&Token::Comma)? {
                    continue;
                }
                self.expect(&Token::RParen, "closing_parenthesis")?;
                break;
            }
        }
        let next = self.peek()?.0;
        let terminated = matches!(next, Token::Semicolon | Token::RBrace | Token::Eof)
            || is_branch_keyword(&next);
        Ok(terminated.then(|| RValue::List {
            items,
            span: self.span_from(start),
        }))
    }

    /// After `[`: `name]` or `name[index_name]]`.
    fn parse_legacy(&mut self, open: usize) -> EvalResult<LegacyRef> {
        let (tok, name_span) = self.advance()?;
        let name = match tok {
            Token::Ident(name) if !is_keyword(&name) => name,
            _ => return Err(EvalError::expected(name_span, "legacy_variable_expansion")),
        };
        let index = if self.eat(&Token::LBracket)? {
            let (tok, index_span) = self.advance()?;
            let index_name = match tok {
                Token::Ident(s) if !is_keyword(&s) => s,
                _ => return Err(EvalError::expected(index_span, "identifier")),
            };
            self.expect(&Token::RBracket, "closing_bracket")?;
            Some((index_name, index_span))
        } else {
            None
        };
        self.expect(&Token::RBracket, "legacy_variable_expansion")?;
        Ok(LegacyRef {
            name,
            name_span,
            index,
            span: self.span_from(open),
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
