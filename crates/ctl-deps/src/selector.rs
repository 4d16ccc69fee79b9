//! Selector expressions.
//!
//! A selector is a small boolean expression deciding whether a dependency
//! applies to a build, e.g. `linux and not arm64` or `python >= "3.11"`.
//! The grammar is closed:
//!
//! ```text
//! expr       := or
//! or         := and ("or" and)*
//! and        := not ("and" not)*
//! not        := "not" not | comparison
//! comparison := primary (("==" | "!=" | "<" | "<=" | ">" | ">=") primary
//!                       | "in" primary | "not" "in" primary)?
//! primary    := "(" expr ")" | "[" (expr ("," expr)*)? "]"
//!             | STRING | NUMBER | BOOL | IDENT
//! ```
//!
//! Identifiers are looked up in a [`SelectorEnv`]; an unknown identifier is
//! an error rather than `false`. Comparisons between two values that both
//! read as dotted versions are version-aware, so `"3.9" < "3.10"`.
//!
//! ```
//! use ctl_deps::{Selector, SelectorEnv, SelectorValue};
//!
//! let mut env = SelectorEnv::new();
//! env.insert("linux".into(), SelectorValue::Bool(true));
//! env.insert("arm64".into(), SelectorValue::Bool(false));
//!
//! let selector = Selector::parse("linux and not arm64").unwrap();
//! assert!(selector.evaluate(&env).unwrap());
//! ```

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::version::{compare_loose, loose_eq};

/// Maximum nesting of parentheses and brackets.
const MAX_NESTING: usize = 64;

/// Variables visible to a selector.
pub type SelectorEnv = BTreeMap<String, SelectorValue>;

/// A runtime value inside a selector.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectorValue {
    Bool(bool),
    Str(String),
    /// Numeric literal, kept as written so `3.10` stays distinct from `3.1`.
    Num(String),
    List(Vec<SelectorValue>),
}

impl SelectorValue {
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Str(s) => !s.is_empty(),
            Self::Num(n) => n.parse::<f64>().map(|f| f != 0.0).unwrap_or(true),
            Self::List(items) => !items.is_empty(),
        }
    }

    fn as_text(&self) -> Option<&str> {
        match self {
            Self::Str(s) | Self::Num(s) => Some(s),
            _ => None,
        }
    }

    fn loose_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            _ => match (self.as_text(), other.as_text()) {
                (Some(a), Some(b)) => loose_eq(a, b),
                _ => false,
            },
        }
    }

    fn loose_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            _ => {
                let (a, b) = (self.as_text()?, other.as_text()?);
                Some(compare_loose(a, b).unwrap_or_else(|| a.cmp(b)))
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Str(_) => "string",
            Self::Num(_) => "number",
            Self::List(_) => "list",
        }
    }
}

impl From<bool> for SelectorValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for SelectorValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for SelectorValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<&serde_json::Value> for SelectorValue {
    fn from(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::Num(n.to_string()),
            Value::String(s) => Self::Str(s.clone()),
            Value::Null => Self::Str(String::new()),
            Value::Array(items) => Self::List(items.iter().map(Self::from).collect()),
            Value::Object(_) => Self::Str(value.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(String),
    Bool(bool),
    And,
    Or,
    Not,
    In,
    Compare(CompareOp),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(SelectorValue),
    Ident(String),
    List(Vec<Expr>),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Compare(Box<Expr>, CompareOp, Box<Expr>),
    In {
        needle: Box<Expr>,
        haystack: Box<Expr>,
        negated: bool,
    },
}

/// A parsed selector expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    source: String,
    expr: Expr,
}

impl Selector {
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            source,
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.parse_or()?;
        if let Some((offset, token)) = parser.tokens.get(parser.pos) {
            return Err(parse_error(source, *offset, format!("unexpected {token:?}")));
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Evaluate to a boolean using Python-style truthiness.
    pub fn evaluate(&self, env: &SelectorEnv) -> Result<bool> {
        Ok(self.eval(&self.expr, env)?.is_truthy())
    }

    fn eval(&self, expr: &Expr, env: &SelectorEnv) -> Result<SelectorValue> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Ident(name) => env
                .get(name)
                .cloned()
                .ok_or_else(|| self.eval_error(format!("unknown identifier '{name}'"))),
            Expr::List(items) => Ok(SelectorValue::List(
                items
                    .iter()
                    .map(|item| self.eval(item, env))
                    .collect::<Result<_>>()?,
            )),
            Expr::Not(inner) => Ok(SelectorValue::Bool(!self.eval(inner, env)?.is_truthy())),
            Expr::And(terms) => {
                for term in terms {
                    if !self.eval(term, env)?.is_truthy() {
                        return Ok(SelectorValue::Bool(false));
                    }
                }
                Ok(SelectorValue::Bool(true))
            }
            Expr::Or(terms) => {
                for term in terms {
                    if self.eval(term, env)?.is_truthy() {
                        return Ok(SelectorValue::Bool(true));
                    }
                }
                Ok(SelectorValue::Bool(false))
            }
            Expr::Compare(lhs, op, rhs) => {
                let (a, b) = (self.eval(lhs, env)?, self.eval(rhs, env)?);
                let result = match op {
                    CompareOp::Eq => a.loose_eq(&b),
                    CompareOp::Ne => !a.loose_eq(&b),
                    _ => {
                        let ordering = a.loose_cmp(&b).ok_or_else(|| {
                            self.eval_error(format!(
                                "cannot compare {} {op} {}",
                                a.kind(),
                                b.kind()
                            ))
                        })?;
                        match op {
                            CompareOp::Lt => ordering == Ordering::Less,
                            CompareOp::Le => ordering != Ordering::Greater,
                            CompareOp::Gt => ordering == Ordering::Greater,
                            _ => ordering != Ordering::Less,
                        }
                    }
                };
                Ok(SelectorValue::Bool(result))
            }
            Expr::In {
                needle,
                haystack,
                negated,
            } => {
                let needle = self.eval(needle, env)?;
                let found = match self.eval(haystack, env)? {
                    SelectorValue::List(items) => items.iter().any(|item| item.loose_eq(&needle)),
                    SelectorValue::Str(text) => match needle.as_text() {
                        Some(sub) => text.contains(sub),
                        None => {
                            return Err(self.eval_error(format!(
                                "'in <string>' requires a string operand, not {}",
                                needle.kind()
                            )));
                        }
                    },
                    other => {
                        return Err(self.eval_error(format!(
                            "'in' requires a list or string, not {}",
                            other.kind()
                        )));
                    }
                };
                Ok(SelectorValue::Bool(found != *negated))
            }
        }
    }

    fn eval_error(&self, message: String) -> Error {
        Error::SelectorEval {
            selector: self.source.clone(),
            message,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_error(source: &str, offset: usize, message: String) -> Error {
    Error::SelectorParse {
        selector: source.to_string(),
        offset,
        message,
    }
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let token = match c {
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            ',' => Token::Comma,
            '=' | '!' | '<' | '>' => {
                chars.next();
                let followed_by_eq = chars.next_if(|&(_, n)| n == '=').is_some();
                let op = match (c, followed_by_eq) {
                    ('=', true) => CompareOp::Eq,
                    ('!', true) => CompareOp::Ne,
                    ('<', true) => CompareOp::Le,
                    ('<', false) => CompareOp::Lt,
                    ('>', true) => CompareOp::Ge,
                    ('>', false) => CompareOp::Gt,
                    _ => {
                        return Err(parse_error(source, start, format!("unexpected '{c}'")));
                    }
                };
                tokens.push((start, Token::Compare(op)));
                continue;
            }
            '"' | '\'' => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                while let Some((_, n)) = chars.next() {
                    match n {
                        '\\' => match chars.next() {
                            Some((_, escaped)) => text.push(escaped),
                            None => break,
                        },
                        n if n == c => {
                            closed = true;
                            break;
                        }
                        n => text.push(n),
                    }
                }
                if !closed {
                    return Err(parse_error(source, start, "unterminated string".into()));
                }
                tokens.push((start, Token::Str(text)));
                continue;
            }
            c if c.is_ascii_digit() => {
                let mut text = String::new();
                while let Some((_, n)) = chars.next_if(|&(_, n)| n.is_ascii_digit() || n == '.') {
                    text.push(n);
                }
                tokens.push((start, Token::Num(text)));
                continue;
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some((_, n)) = chars.next_if(|&(_, n)| n.is_alphanumeric() || n == '_') {
                    word.push(n);
                }
                let token = match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    "True" | "true" => Token::Bool(true),
                    "False" | "false" => Token::Bool(false),
                    _ => Token::Ident(word),
                };
                tokens.push((start, token));
                continue;
            }
            other => {
                return Err(parse_error(source, start, format!("unexpected '{other}'")));
            }
        };
        chars.next();
        tokens.push((start, token));
    }

    Ok(tokens)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(o, _)| *o)
            .unwrap_or(self.source.len())
    }

    fn error(&self, message: impl Into<String>) -> Error {
        parse_error(self.source, self.offset(), message.into())
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected {expected:?}")))
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut terms = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::Or(terms)
        })
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut terms = vec![self.parse_not()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            terms.push(self.parse_not()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::And(terms)
        })
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let lhs = self.parse_primary()?;
        match self.peek().cloned() {
            Some(Token::Compare(op)) => {
                self.pos += 1;
                let rhs = self.parse_primary()?;
                Ok(Expr::Compare(Box::new(lhs), op, Box::new(rhs)))
            }
            Some(Token::In) => {
                self.pos += 1;
                let haystack = self.parse_primary()?;
                Ok(Expr::In {
                    needle: Box::new(lhs),
                    haystack: Box::new(haystack),
                    negated: false,
                })
            }
            Some(Token::Not) if self.peek_at(1) == Some(&Token::In) => {
                self.pos += 2;
                let haystack = self.parse_primary()?;
                Ok(Expr::In {
                    needle: Box::new(lhs),
                    haystack: Box::new(haystack),
                    negated: true,
                })
            }
            _ => Ok(lhs),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("unexpected end of selector"));
        };
        self.pos += 1;
        match token {
            Token::Str(s) => Ok(Expr::Literal(SelectorValue::Str(s))),
            Token::Num(n) => Ok(Expr::Literal(SelectorValue::Num(n))),
            Token::Bool(b) => Ok(Expr::Literal(SelectorValue::Bool(b))),
            Token::Ident(name) => Ok(Expr::Ident(name)),
            Token::LParen => {
                self.enter()?;
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                self.depth -= 1;
                Ok(inner)
            }
            Token::LBracket => {
                self.enter()?;
                let mut items = Vec::new();
                if self.peek() != Some(&Token::RBracket) {
                    loop {
                        items.push(self.parse_or()?);
                        if self.peek() == Some(&Token::Comma) {
                            self.pos += 1;
                            // trailing comma
                            if self.peek() == Some(&Token::RBracket) {
                                break;
                            }
                        } else {
                            break;
                        }
                    }
                }
                self.expect(Token::RBracket)?;
                self.depth -= 1;
                Ok(Expr::List(items))
            }
            other => {
                self.pos -= 1;
                Err(self.error(format!("unexpected {other:?}")))
            }
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error(format!("nesting deeper than {MAX_NESTING}")));
        }
        Ok(())
    }
}
