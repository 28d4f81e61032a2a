//! # Condition Evaluator
//!
//! Boolean expressions for `condition` nodes. An expression mixes `${path}`
//! placeholders with comparison (`===`, `!==`, `>`, `>=`, `<`, `<=`),
//! logical (`!`, `&&`, `||`) and grouping operators, plus number, string,
//! `true`/`false`/`null` literals:
//!
//! ```text
//! expr   := or
//! or     := and ("||" and)*
//! and    := not ("&&" not)*
//! not    := "!"* cmp
//! cmp    := atom (("==="|"!=="|">"|">="|"<"|"<=") atom)?
//! atom   := literal | hole | "(" expr ")"
//! ```
//!
//! Placeholders are not substituted textually: each `${path}` becomes a hole
//! in the parsed tree and is resolved to the raw context value during
//! evaluation, so `"${name} === 'admin'"` compares the actual value of
//! `name` to the string literal. A bare `"${path}"` with no operators
//! collapses to truthiness.
//!
//! The expression language is evaluated by a hand-written parser; no user
//! text is ever compiled or executed. On any lex, parse or evaluation
//! failure the caller falls back to truthiness of the interpolated
//! expression and logs a warning.

use crate::context::FluxContext;
use crate::interpolate::{is_truthy, lookup, resolve};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Failure while lexing, parsing or evaluating a condition expression.
#[derive(Debug, Clone, Error)]
pub enum ConditionError {
    #[error("unexpected character '{1}' at offset {0}")]
    UnexpectedChar(usize, char),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unterminated ${{…}} placeholder")]
    UnterminatedPlaceholder,
    #[error("unexpected token {0}")]
    UnexpectedToken(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("cannot order {0} and {1}")]
    NotComparable(&'static str, &'static str),
}

/// Evaluate a `condition` node's `if` expression to a boolean.
///
/// Non-string expressions (and any expression that fails to parse or
/// evaluate) are interpolated with [`resolve`] and coerced to truthiness.
pub fn evaluate_condition(expr: &Value, ctx: &FluxContext) -> bool {
    let Value::String(text) = expr else {
        return is_truthy(&resolve(expr, ctx));
    };

    match evaluate(text, ctx) {
        Ok(slot) => slot.map(|v| is_truthy(&v)).unwrap_or(false),
        Err(err) => {
            warn!(expression = %text, error = %err, "condition fell back to truthiness");
            is_truthy(&resolve(expr, ctx))
        }
    }
}

/// Parse and evaluate an expression, returning the raw outcome.
///
/// `None` models a path that resolved to nothing (distinct from `null`, as
/// strict equality must keep them apart).
pub fn evaluate(text: &str, ctx: &FluxContext) -> Result<Option<Value>, ConditionError> {
    let tokens = lex(text)?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expr()?;
    parser.expect_end()?;
    eval(&expr, ctx)
}

// ── Tokens ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    OrOr,
    AndAnd,
    Bang,
    StrictEq,
    StrictNe,
    Gt,
    Ge,
    Lt,
    Le,
    LParen,
    RParen,
    Number(f64),
    Str(String),
    True,
    False,
    Null,
    Hole(String),
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::OrOr => write!(f, "'||'"),
            Token::AndAnd => write!(f, "'&&'"),
            Token::Bang => write!(f, "'!'"),
            Token::StrictEq => write!(f, "'==='"),
            Token::StrictNe => write!(f, "'!=='"),
            Token::Gt => write!(f, "'>'"),
            Token::Ge => write!(f, "'>='"),
            Token::Lt => write!(f, "'<'"),
            Token::Le => write!(f, "'<='"),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::Number(n) => write!(f, "number {}", n),
            Token::Str(s) => write!(f, "string {:?}", s),
            Token::True => write!(f, "'true'"),
            Token::False => write!(f, "'false'"),
            Token::Null => write!(f, "'null'"),
            Token::Hole(p) => write!(f, "${{{}}}", p),
        }
    }
}

fn lex(text: &str) -> Result<Vec<Token>, ConditionError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '|' if text[i..].starts_with("||") => {
                tokens.push(Token::OrOr);
                i += 2;
            }
            '&' if text[i..].starts_with("&&") => {
                tokens.push(Token::AndAnd);
                i += 2;
            }
            '=' if text[i..].starts_with("===") => {
                tokens.push(Token::StrictEq);
                i += 3;
            }
            '!' if text[i..].starts_with("!==") => {
                tokens.push(Token::StrictNe);
                i += 3;
            }
            '!' => {
                tokens.push(Token::Bang);
                i += 1;
            }
            '>' | '<' => {
                let wide = bytes.get(i + 1) == Some(&b'=');
                tokens.push(match (c, wide) {
                    ('>', true) => Token::Ge,
                    ('>', false) => Token::Gt,
                    ('<', true) => Token::Le,
                    _ => Token::Lt,
                });
                i += if wide { 2 } else { 1 };
            }
            '$' if text[i..].starts_with("${") => {
                let rest = &text[i + 2..];
                let end = rest.find('}').ok_or(ConditionError::UnterminatedPlaceholder)?;
                tokens.push(Token::Hole(rest[..end].to_string()));
                i += 2 + end + 1;
            }
            '\'' | '"' => {
                let rest = &text[i + 1..];
                let end = rest.find(c).ok_or(ConditionError::UnterminatedString)?;
                tokens.push(Token::Str(rest[..end].to_string()));
                i += 1 + end + 1;
            }
            '0'..='9' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                let number: f64 = text[start..i]
                    .parse()
                    .map_err(|_| ConditionError::UnexpectedChar(start, c))?;
                tokens.push(Token::Number(number));
            }
            '-' if bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit()) => {
                let start = i;
                i += 1;
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                let number: f64 = text[start..i]
                    .parse()
                    .map_err(|_| ConditionError::UnexpectedChar(start, c))?;
                tokens.push(Token::Number(number));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                match &text[start..i] {
                    "true" => tokens.push(Token::True),
                    "false" => tokens.push(Token::False),
                    "null" => tokens.push(Token::Null),
                    other => {
                        return Err(ConditionError::UnexpectedToken(format!("'{}'", other)));
                    }
                }
            }
            other => return Err(ConditionError::UnexpectedChar(i, other)),
        }
    }

    Ok(tokens)
}

// ── Parser ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Hole(String),
    Not(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Or,
    And,
    StrictEq,
    StrictNe,
    Gt,
    Ge,
    Lt,
    Le,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_end(&self) -> Result<(), ConditionError> {
        match self.peek() {
            None => Ok(()),
            Some(t) => Err(ConditionError::UnexpectedToken(t.to_string())),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ConditionError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::OrOr) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.parse_not()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.advance();
            let rhs = self.parse_not()?;
            lhs = Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ConditionError> {
        if self.peek() == Some(&Token::Bang) {
            self.advance();
            let operand = self.parse_not()?;
            return Ok(Expr::Not(Box::new(operand)));
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<Expr, ConditionError> {
        let lhs = self.parse_atom()?;
        let op = match self.peek() {
            Some(Token::StrictEq) => BinaryOp::StrictEq,
            Some(Token::StrictNe) => BinaryOp::StrictNe,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_atom()?;
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_atom(&mut self) -> Result<Expr, ConditionError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Literal(number_value(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::Hole(path)) => Ok(Expr::Hole(path)),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    Some(t) => Err(ConditionError::UnexpectedToken(t.to_string())),
                    None => Err(ConditionError::UnexpectedEnd),
                }
            }
            Some(t) => Err(ConditionError::UnexpectedToken(t.to_string())),
            None => Err(ConditionError::UnexpectedEnd),
        }
    }
}

fn number_value(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

// ── Evaluation ─────────────────────────────────────────────────────────────

/// `None` is the missing value; it is falsy and strictly equal only to
/// itself.
fn eval(expr: &Expr, ctx: &FluxContext) -> Result<Option<Value>, ConditionError> {
    match expr {
        Expr::Literal(v) => Ok(Some(v.clone())),
        Expr::Hole(path) => Ok(lookup(path, ctx)),
        Expr::Not(operand) => {
            let value = eval(operand, ctx)?;
            Ok(Some(Value::Bool(!slot_truthy(&value))))
        }
        Expr::Binary { op, lhs, rhs } => {
            let left = eval(lhs, ctx)?;
            match op {
                // Short-circuit operators keep the operand value, so a
                // parenthesised `(${a} || ${b})` can feed a comparison.
                BinaryOp::Or => {
                    if slot_truthy(&left) {
                        Ok(left)
                    } else {
                        eval(rhs, ctx)
                    }
                }
                BinaryOp::And => {
                    if slot_truthy(&left) {
                        eval(rhs, ctx)
                    } else {
                        Ok(left)
                    }
                }
                BinaryOp::StrictEq => Ok(Some(Value::Bool(strict_eq(&left, &eval(rhs, ctx)?)))),
                BinaryOp::StrictNe => Ok(Some(Value::Bool(!strict_eq(&left, &eval(rhs, ctx)?)))),
                BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Lt | BinaryOp::Le => {
                    let right = eval(rhs, ctx)?;
                    let ordering = order(&left, &right)?;
                    Ok(Some(Value::Bool(match op {
                        BinaryOp::Gt => ordering.is_gt(),
                        BinaryOp::Ge => ordering.is_ge(),
                        BinaryOp::Lt => ordering.is_lt(),
                        _ => ordering.is_le(),
                    })))
                }
            }
        }
    }
}

fn slot_truthy(slot: &Option<Value>) -> bool {
    slot.as_ref().map(is_truthy).unwrap_or(false)
}

/// Strict equality: missing equals only missing, numbers compare by value,
/// everything else compares structurally.
fn strict_eq(a: &Option<Value>, b: &Option<Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x.as_f64() == y.as_f64(),
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn order(a: &Option<Value>, b: &Option<Value>) -> Result<std::cmp::Ordering, ConditionError> {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            x.partial_cmp(&y)
                .ok_or(ConditionError::NotComparable("number", "number"))
        }
        (Some(Value::String(x)), Some(Value::String(y))) => Ok(x.cmp(y)),
        (x, y) => Err(ConditionError::NotComparable(slot_kind(x), slot_kind(y))),
    }
}

fn slot_kind(slot: &Option<Value>) -> &'static str {
    match slot {
        None => "missing",
        Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "boolean",
        Some(Value::Number(_)) => "number",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "array",
        Some(Value::Object(_)) => "object",
    }
}
