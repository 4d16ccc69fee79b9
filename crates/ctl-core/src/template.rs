//! Template syntax and evaluation context
//!
//! A placeholder is `${{ expr }}` where `expr` is one of:
//!
//! - an absolute path: `project.name`, `authors[0].email`
//! - a relative path: `.name` reads a sibling, each extra leading dot climbs
//!   one level (`..name`), and `.__key__` is the name of the enclosing key
//! - a context object: `repo.owner` when `repo` is a registered object
//! - a partial: `license_header` when registered, resolved in place
//! - a call: `join(topics, ", ")` with literal or path arguments
//! - a literal: `'text'`, `"text"`, `42`, `true`, `null`
//!
//! Resolution itself lives on [`NestedStore`](crate::store::NestedStore).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ctl_content::{PathSegment, parse_path};
use serde_json::Value;

pub(crate) const OPEN: &str = "${{";
pub(crate) const CLOSE: &str = "}}";

/// Segment name of the synthetic relative key.
pub const RELATIVE_KEY: &str = "__key__";

/// A function callable from templates.
pub type TemplateFunction = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// Functions, partials and objects visible to templates
#[derive(Clone, Default)]
pub struct TemplateContext {
    functions: BTreeMap<String, TemplateFunction>,
    partials: BTreeMap<String, String>,
    objects: BTreeMap<String, Value>,
}

impl fmt::Debug for TemplateContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateContext")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .field("partials", &self.partials.keys().collect::<Vec<_>>())
            .field("objects", &self.objects.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context with `lower`, `upper`, `join` and `replace`.
    pub fn with_builtins() -> Self {
        Self::new()
            .with_function("lower", |args| Ok(Value::String(str_arg(args, 0, "lower")?.to_lowercase())))
            .with_function("upper", |args| Ok(Value::String(str_arg(args, 0, "upper")?.to_uppercase())))
            .with_function("join", |args| {
                let items = args
                    .first()
                    .and_then(Value::as_array)
                    .ok_or("join() expects a sequence as its first argument")?;
                let sep = str_arg(args, 1, "join")?;
                let parts: Vec<String> = items.iter().map(stringify).collect();
                Ok(Value::String(parts.join(sep)))
            })
            .with_function("replace", |args| {
                let text = str_arg(args, 0, "replace")?;
                let from = str_arg(args, 1, "replace")?;
                let to = str_arg(args, 2, "replace")?;
                Ok(Value::String(text.replace(from, to)))
            })
    }

    pub fn with_function<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
        self
    }

    pub fn with_partial(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.partials.insert(name.into(), template.into());
        self
    }

    pub fn with_object(mut self, name: impl Into<String>, value: Value) -> Self {
        self.objects.insert(name.into(), value);
        self
    }

    pub fn function(&self, name: &str) -> Option<&TemplateFunction> {
        self.functions.get(name)
    }

    pub fn partial(&self, name: &str) -> Option<&str> {
        self.partials.get(name).map(String::as_str)
    }

    pub fn object(&self, name: &str) -> Option<&Value> {
        self.objects.get(name)
    }
}

fn str_arg<'a>(args: &'a [Value], idx: usize, func: &str) -> Result<&'a str, String> {
    args.get(idx)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("{func}() expects a string as argument {}", idx + 1))
}

/// Text form of a value when embedded in a larger string.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Whether a string contains a placeholder opening.
pub fn has_placeholder(s: &str) -> bool {
    s.contains(OPEN)
}

/// Whether any string in `value` contains a placeholder.
pub fn contains_placeholder(value: &Value) -> bool {
    match value {
        Value::String(s) => has_placeholder(s),
        Value::Array(items) => items.iter().any(contains_placeholder),
        Value::Object(map) => map.values().any(contains_placeholder),
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Piece<'a> {
    Text(&'a str),
    Expr(&'a str),
}

/// Split a string into literal text and placeholder expressions.
pub(crate) fn split(s: &str) -> Result<Vec<Piece<'_>>, String> {
    let mut pieces = Vec::new();
    let mut rest = s;
    while let Some(start) = rest.find(OPEN) {
        if start > 0 {
            pieces.push(Piece::Text(&rest[..start]));
        }
        let after = &rest[start + OPEN.len()..];
        let end = after
            .find(CLOSE)
            .ok_or_else(|| format!("unterminated placeholder in '{s}'"))?;
        let expr = after[..end].trim();
        if expr.is_empty() {
            return Err(format!("empty placeholder in '{s}'"));
        }
        pieces.push(Piece::Expr(expr));
        rest = &after[end + CLOSE.len()..];
    }
    if !rest.is_empty() {
        pieces.push(Piece::Text(rest));
    }
    Ok(pieces)
}

/// A parsed placeholder expression
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    /// `up == 0` is absolute; otherwise the number of leading dots.
    Path {
        up: usize,
        segments: Vec<PathSegment>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

pub(crate) fn parse_expr(source: &str) -> Result<Expr, String> {
    let mut parser = ExprParser { src: source, pos: 0 };
    let expr = parser.expr()?;
    parser.skip_ws();
    if parser.pos != source.len() {
        return Err(format!(
            "unexpected '{}' in expression '{source}'",
            &source[parser.pos..]
        ));
    }
    Ok(expr)
}

struct ExprParser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> ExprParser<'a> {
    fn rest(&self) -> &'a str {
        let src = self.src;
        &src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|&(_, c)| !pred(c))
            .map_or(rest.len(), |(i, _)| i);
        self.pos += len;
        &rest[..len]
    }

    fn expr(&mut self) -> Result<Expr, String> {
        self.skip_ws();
        match self.peek() {
            None => Err(format!("missing expression in '{}'", self.src)),
            Some(q @ ('\'' | '"')) => self.string(q),
            Some(c) if c.is_ascii_digit() || c == '-' => self.number(),
            Some('.') => {
                let up = self.take_while(|c| c == '.').len();
                let tail = self.take_while(is_path_char);
                Ok(Expr::Path {
                    up,
                    segments: if tail.is_empty() { Vec::new() } else { parse_path(tail) },
                })
            }
            Some(c) if is_path_char(c) => {
                let text = self.take_while(is_path_char).to_string();
                self.skip_ws();
                if self.peek() == Some('(') {
                    self.pos += 1;
                    return self.call(text);
                }
                Ok(match text.as_str() {
                    "true" => Expr::Literal(Value::Bool(true)),
                    "false" => Expr::Literal(Value::Bool(false)),
                    "null" => Expr::Literal(Value::Null),
                    _ => Expr::Path {
                        up: 0,
                        segments: parse_path(&text),
                    },
                })
            }
            Some(c) => Err(format!("unexpected '{c}' in expression '{}'", self.src)),
        }
    }

    fn string(&mut self, quote: char) -> Result<Expr, String> {
        self.pos += quote.len_utf8();
        let rest = self.rest();
        let mut out = String::new();
        let mut chars = rest.char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => {
                    if let Some((_, escaped)) = chars.next() {
                        out.push(escaped);
                    }
                }
                c if c == quote => {
                    self.pos += i + c.len_utf8();
                    return Ok(Expr::Literal(Value::String(out)));
                }
                c => out.push(c),
            }
        }
        Err(format!("unterminated string in expression '{}'", self.src))
    }

    fn number(&mut self) -> Result<Expr, String> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        self.take_while(|c| c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E');
        let text = &self.src[start..self.pos];
        serde_json::from_str::<Value>(text)
            .ok()
            .filter(Value::is_number)
            .map(Expr::Literal)
            .ok_or_else(|| format!("invalid number '{text}'"))
    }

    fn call(&mut self, name: String) -> Result<Expr, String> {
        let mut args = Vec::new();
        self.skip_ws();
        if self.peek() == Some(')') {
            self.pos += 1;
            return Ok(Expr::Call { name, args });
        }
        loop {
            args.push(self.expr()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(')') => {
                    self.pos += 1;
                    return Ok(Expr::Call { name, args });
                }
                _ => return Err(format!("expected ',' or ')' in call to {name}()")),
            }
        }
    }
}

fn is_path_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '[' | ']')
}
