//! JSON-Schema subset validator with default filling

use crate::registry::SchemaRegistry;
use crate::{Error, Result};
use ctl_content::path::{PathSegment, format_path};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

/// Nesting bound for `$ref` chains that do not descend into the data.
const MAX_SCHEMA_DEPTH: usize = 256;

/// Which pass of the compile pipeline a validation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Templates may still be unresolved; schemas are relaxed.
    PreSubstitution,
    /// Everything is resolved; schemas apply as written.
    PostSubstitution,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreSubstitution => write!(f, "pre-substitution"),
            Self::PostSubstitution => write!(f, "post-substitution"),
        }
    }
}

/// First violation found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Violation {
    path: String,
    message: String,
}

type Check = std::result::Result<(), Violation>;

/// Validate `data` against `schema`, filling defaults first when requested.
///
/// In the pre-substitution phase `schema` is relaxed before use.
pub fn validate(
    registry: &SchemaRegistry,
    data: &mut Value,
    schema: &Value,
    phase: Phase,
    fill_defaults: bool,
) -> Result<()> {
    let validator = Validator::new(registry, phase).with_fill_defaults(fill_defaults);
    match phase {
        Phase::PostSubstitution => validator.validate(data, schema),
        Phase::PreSubstitution => {
            let relaxed = crate::relax::build_pre_substitution_variant(schema);
            let root = relaxed.pointer("/anyOf/0").unwrap_or(&relaxed);
            validator.validate(data, root)
        }
    }
}

/// Validates documents against schemas already in the form for its phase.
pub struct Validator<'r> {
    registry: &'r SchemaRegistry,
    phase: Phase,
    fill_defaults: bool,
    patterns: RefCell<HashMap<String, Option<Regex>>>,
}

impl<'r> Validator<'r> {
    pub fn new(registry: &'r SchemaRegistry, phase: Phase) -> Self {
        Self {
            registry,
            phase,
            fill_defaults: false,
            patterns: RefCell::new(HashMap::new()),
        }
    }

    pub fn with_fill_defaults(mut self, fill_defaults: bool) -> Self {
        self.fill_defaults = fill_defaults;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Validate `data` against `schema`, which also serves as the root for
    /// local `#/...` references.
    pub fn validate(&self, data: &mut Value, schema: &Value) -> Result<()> {
        if self.fill_defaults {
            self.fill(data, schema, schema, 0);
        }
        let mut path = Vec::new();
        self.check(data, schema, schema, &mut path, 0)
            .map_err(|v| Error::SchemaValidation {
                phase: self.phase,
                path: v.path,
                message: v.message,
            })
    }

    /// Validate a registered schema by name.
    pub fn validate_named(&self, data: &mut Value, name: &str) -> Result<()> {
        let schema = self.registry.get_variant(name, self.phase)?;
        self.validate(data, schema)
    }

    /// Whether `data` satisfies `schema`, without filling defaults.
    pub fn is_valid(&self, data: &Value, schema: &Value) -> bool {
        self.check(data, schema, schema, &mut Vec::new(), 0).is_ok()
    }

    fn resolve<'s>(&'s self, reference: &str, root: &'s Value) -> Option<(&'s Value, &'s Value)> {
        if let Some(pointer) = reference.strip_prefix('#') {
            return root.pointer(pointer).map(|schema| (schema, root));
        }
        let (name, fragment) = match reference.split_once('#') {
            Some((name, fragment)) => (name, Some(fragment)),
            None => (reference, None),
        };
        let target = self.registry.resolve_ref(name, self.phase)?;
        match fragment {
            Some(pointer) if !pointer.is_empty() => target.pointer(pointer).map(|s| (s, target)),
            _ => Some((target, target)),
        }
    }

    fn pattern(&self, source: &str) -> Option<Regex> {
        self.patterns
            .borrow_mut()
            .entry(source.to_string())
            .or_insert_with(|| Regex::new(source).ok())
            .clone()
    }

    fn fill(&self, data: &mut Value, schema: &Value, root: &Value, depth: usize) {
        let Value::Object(keywords) = schema else {
            return;
        };
        if depth > MAX_SCHEMA_DEPTH {
            return;
        }
        if let Some(reference) = keywords.get("$ref").and_then(Value::as_str) {
            if let Some((target, target_root)) = self.resolve(reference, root) {
                self.fill(data, target, target_root, depth + 1);
            }
        }
        if let Some(Value::Array(branches)) = keywords.get("allOf") {
            for branch in branches {
                self.fill(data, branch, root, depth + 1);
            }
        }
        for key in ["anyOf", "oneOf"] {
            if let Some(Value::Array(branches)) = keywords.get(key) {
                for branch in branches {
                    let mut candidate = data.clone();
                    self.fill(&mut candidate, branch, root, depth + 1);
                    if self.check(&candidate, branch, root, &mut Vec::new(), 0).is_ok() {
                        *data = candidate;
                        break;
                    }
                }
            }
        }

        match data {
            Value::Object(map) => self.fill_object(map, keywords, root, depth),
            Value::Array(items) => {
                let prefix = keywords.get("prefixItems").and_then(Value::as_array);
                for (idx, item) in items.iter_mut().enumerate() {
                    let sub = prefix
                        .and_then(|p| p.get(idx))
                        .or_else(|| keywords.get("items"));
                    if let Some(sub) = sub {
                        self.fill(item, sub, root, depth + 1);
                    }
                }
            }
            _ => {}
        }
    }

    fn fill_object(&self, map: &mut Map<String, Value>, keywords: &Map<String, Value>, root: &Value, depth: usize) {
        let properties = keywords.get("properties").and_then(Value::as_object);
        if let Some(properties) = properties {
            for (key, sub) in properties {
                if map.contains_key(key) {
                    continue;
                }
                if let Some(default) = sub.get("default") {
                    map.insert(key.clone(), default.clone());
                }
            }
        }
        let pattern_properties = keywords.get("patternProperties").and_then(Value::as_object);
        for (key, value) in map.iter_mut() {
            let mut matched = false;
            if let Some(sub) = properties.and_then(|p| p.get(key)) {
                self.fill(value, sub, root, depth + 1);
                matched = true;
            }
            if let Some(patterns) = pattern_properties {
                for (source, sub) in patterns {
                    if self.pattern(source).is_some_and(|re| re.is_match(key)) {
                        self.fill(value, sub, root, depth + 1);
                        matched = true;
                    }
                }
            }
            if !matched {
                if let Some(sub) = keywords.get("additionalProperties").filter(|s| s.is_object()) {
                    self.fill(value, sub, root, depth + 1);
                }
            }
        }
    }

    fn check(
        &self,
        data: &Value,
        schema: &Value,
        root: &Value,
        path: &mut Vec<PathSegment>,
        depth: usize,
    ) -> Check {
        let keywords = match schema {
            Value::Bool(true) => return Ok(()),
            Value::Bool(false) => return Err(self.violation(path, "no value is allowed here")),
            Value::Object(keywords) => keywords,
            _ => return Ok(()),
        };
        if depth > MAX_SCHEMA_DEPTH {
            return Err(self.violation(path, "schema nesting is too deep"));
        }

        if let Some(reference) = keywords.get("$ref").and_then(Value::as_str) {
            let (target, target_root) = self
                .resolve(reference, root)
                .ok_or_else(|| self.violation(path, format!("unresolvable reference '{reference}'")))?;
            self.check(data, target, target_root, path, depth + 1)?;
        }

        if let Some(expected) = keywords.get("type") {
            let allowed: Vec<&str> = match expected {
                Value::String(t) => vec![t.as_str()],
                Value::Array(ts) => ts.iter().filter_map(Value::as_str).collect(),
                _ => Vec::new(),
            };
            if !allowed.is_empty() && !allowed.iter().any(|t| type_matches(t, data)) {
                return Err(self.violation(
                    path,
                    format!("expected {}, found {}", allowed.join(" or "), json_type(data)),
                ));
            }
        }
        if let Some(Value::Array(options)) = keywords.get("enum") {
            if !options.iter().any(|o| o == data) {
                return Err(self.violation(
                    path,
                    format!("{} is not one of {}", data, Value::Array(options.clone())),
                ));
            }
        }
        if let Some(constant) = keywords.get("const") {
            if constant != data {
                return Err(self.violation(path, format!("{data} does not equal {constant}")));
            }
        }

        match data {
            Value::String(s) => self.check_string(s, keywords, path)?,
            Value::Number(_) => self.check_number(data, keywords, path)?,
            Value::Object(map) => self.check_object(map, keywords, root, path, depth)?,
            Value::Array(items) => self.check_array(items, keywords, root, path, depth)?,
            _ => {}
        }

        if let Some(Value::Array(branches)) = keywords.get("allOf") {
            for branch in branches {
                self.check(data, branch, root, path, depth + 1)?;
            }
        }
        if let Some(Value::Array(branches)) = keywords.get("anyOf") {
            let mut first_failure = None;
            let mut matched = false;
            for branch in branches {
                match self.check(data, branch, root, path, depth + 1) {
                    Ok(()) => {
                        matched = true;
                        break;
                    }
                    Err(v) => {
                        first_failure.get_or_insert(v);
                    }
                }
            }
            if !matched {
                let detail = first_failure.map(|v| v.message).unwrap_or_default();
                return Err(self.violation(
                    path,
                    format!("value does not match any allowed schema ({detail})"),
                ));
            }
        }
        if let Some(Value::Array(branches)) = keywords.get("oneOf") {
            let matches = branches
                .iter()
                .filter(|b| self.check(data, b, root, path, depth + 1).is_ok())
                .count();
            if matches != 1 {
                return Err(self.violation(
                    path,
                    format!("value matches {matches} schemas, expected exactly one"),
                ));
            }
        }
        if let Some(negated) = keywords.get("not") {
            if self.check(data, negated, root, path, depth + 1).is_ok() {
                return Err(self.violation(path, "value matches a forbidden schema"));
            }
        }
        Ok(())
    }

    fn check_string(&self, s: &str, keywords: &Map<String, Value>, path: &[PathSegment]) -> Check {
        let length = s.chars().count() as u64;
        if let Some(min) = keywords.get("minLength").and_then(Value::as_u64) {
            if length < min {
                return Err(self.violation(path, format!("string is shorter than {min} characters")));
            }
        }
        if let Some(max) = keywords.get("maxLength").and_then(Value::as_u64) {
            if length > max {
                return Err(self.violation(path, format!("string is longer than {max} characters")));
            }
        }
        if let Some(source) = keywords.get("pattern").and_then(Value::as_str) {
            match self.pattern(source) {
                Some(re) if re.is_match(s) => {}
                Some(_) => {
                    return Err(self.violation(path, format!("'{s}' does not match pattern '{source}'")));
                }
                None => return Err(self.violation(path, format!("invalid pattern '{source}'"))),
            }
        }
        Ok(())
    }

    fn check_number(&self, data: &Value, keywords: &Map<String, Value>, path: &[PathSegment]) -> Check {
        let Some(n) = data.as_f64() else {
            return Ok(());
        };
        let bound = |key: &str| keywords.get(key).and_then(Value::as_f64);
        if let Some(min) = bound("minimum") {
            if n < min {
                return Err(self.violation(path, format!("{n} is less than the minimum of {min}")));
            }
        }
        if let Some(max) = bound("maximum") {
            if n > max {
                return Err(self.violation(path, format!("{n} is greater than the maximum of {max}")));
            }
        }
        if let Some(min) = bound("exclusiveMinimum") {
            if n <= min {
                return Err(self.violation(path, format!("{n} is not greater than {min}")));
            }
        }
        if let Some(max) = bound("exclusiveMaximum") {
            if n >= max {
                return Err(self.violation(path, format!("{n} is not less than {max}")));
            }
        }
        Ok(())
    }

    fn check_object(
        &self,
        map: &Map<String, Value>,
        keywords: &Map<String, Value>,
        root: &Value,
        path: &mut Vec<PathSegment>,
        depth: usize,
    ) -> Check {
        if let Some(Value::Array(required)) = keywords.get("required") {
            for key in required.iter().filter_map(Value::as_str) {
                if !map.contains_key(key) {
                    return Err(self.violation(path, format!("missing required property '{key}'")));
                }
            }
        }
        if let Some(min) = keywords.get("minProperties").and_then(Value::as_u64) {
            if (map.len() as u64) < min {
                return Err(self.violation(path, format!("expected at least {min} properties")));
            }
        }
        if let Some(max) = keywords.get("maxProperties").and_then(Value::as_u64) {
            if (map.len() as u64) > max {
                return Err(self.violation(path, format!("expected at most {max} properties")));
            }
        }

        let properties = keywords.get("properties").and_then(Value::as_object);
        let pattern_properties = keywords.get("patternProperties").and_then(Value::as_object);
        let additional = keywords.get("additionalProperties");
        let names = keywords.get("propertyNames");

        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort();
        for key in keys {
            let value = &map[key.as_str()];
            path.push(PathSegment::Key(key.clone()));
            if let Some(name_schema) = names {
                let name = Value::String(key.clone());
                self.check(&name, name_schema, root, path, depth + 1)?;
            }
            let mut matched = false;
            if let Some(sub) = properties.and_then(|p| p.get(key.as_str())) {
                self.check(value, sub, root, path, depth + 1)?;
                matched = true;
            }
            if let Some(patterns) = pattern_properties {
                for (source, sub) in patterns {
                    let re = self
                        .pattern(source)
                        .ok_or_else(|| self.violation(path, format!("invalid pattern '{source}'")))?;
                    if re.is_match(key) {
                        self.check(value, sub, root, path, depth + 1)?;
                        matched = true;
                    }
                }
            }
            if !matched {
                match additional {
                    Some(Value::Bool(false)) => {
                        path.pop();
                        return Err(self.violation(path, format!("unexpected property '{key}'")));
                    }
                    Some(sub) if sub.is_object() => self.check(value, sub, root, path, depth + 1)?,
                    _ => {}
                }
            }
            path.pop();
        }
        Ok(())
    }

    fn check_array(
        &self,
        items: &[Value],
        keywords: &Map<String, Value>,
        root: &Value,
        path: &mut Vec<PathSegment>,
        depth: usize,
    ) -> Check {
        if let Some(min) = keywords.get("minItems").and_then(Value::as_u64) {
            if (items.len() as u64) < min {
                return Err(self.violation(path, format!("expected at least {min} items")));
            }
        }
        if let Some(max) = keywords.get("maxItems").and_then(Value::as_u64) {
            if (items.len() as u64) > max {
                return Err(self.violation(path, format!("expected at most {max} items")));
            }
        }
        if keywords.get("uniqueItems").and_then(Value::as_bool) == Some(true) {
            for (idx, item) in items.iter().enumerate() {
                if items[..idx].contains(item) {
                    path.push(PathSegment::Index(idx));
                    let violation = self.violation(path, "duplicate item in a unique sequence");
                    path.pop();
                    return Err(violation);
                }
            }
        }

        let prefix = keywords
            .get("prefixItems")
            .and_then(Value::as_array)
            .map_or(&[][..], Vec::as_slice);
        for (idx, item) in items.iter().enumerate() {
            let sub = match prefix.get(idx) {
                Some(sub) => Some(sub),
                None => keywords.get("items"),
            };
            if let Some(sub) = sub {
                path.push(PathSegment::Index(idx));
                self.check(item, sub, root, path, depth + 1)?;
                path.pop();
            }
        }
        Ok(())
    }

    fn violation(&self, path: &[PathSegment], message: impl Into<String>) -> Violation {
        Violation {
            path: format_path(path),
            message: message.into(),
        }
    }
}

fn type_matches(expected: &str, data: &Value) -> bool {
    match expected {
        "null" => data.is_null(),
        "boolean" => data.is_boolean(),
        "string" => data.is_string(),
        "object" => data.is_object(),
        "array" => data.is_array(),
        "number" => data.is_number(),
        "integer" => match data {
            Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0),
            _ => false,
        },
        _ => false,
    }
}

fn json_type(data: &Value) -> &'static str {
    match data {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
