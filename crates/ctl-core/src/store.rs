//! Nested configuration store with on-read template resolution
//!
//! The store owns the merged tree. Reads resolve `${{ ... }}` placeholders
//! lazily and memoize the result per path; a path that is requested while
//! its own resolution is still running is a circular reference.
//!
//! # Examples
//!
//! ```
//! use ctl_core::store::NestedStore;
//! use serde_json::json;
//!
//! let mut store = NestedStore::new(json!({
//!     "project": {"name": "demo", "slug": "${{ upper(.name) }}"},
//!     "pypkg_demo": {"name": "${{ .__key__ }}", "enabled": "${{ flag }}"},
//!     "flag": true,
//! }));
//! assert_eq!(store.get("project.slug").unwrap(), Some(json!("DEMO")));
//! assert_eq!(store.get("pypkg_demo.name").unwrap(), Some(json!("pypkg_demo")));
//! assert_eq!(store.get("pypkg_demo.enabled").unwrap(), Some(json!(true)));
//! ```

use std::collections::HashMap;

use ctl_content::{PathSegment, format_path, get_at_path, is_under, parse_path, set_at_path};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::template::{
    Expr, Piece, RELATIVE_KEY, TemplateContext, has_placeholder, parse_expr, split, stringify,
};

/// Upper bound on write-back passes in [`NestedStore::fill`].
pub const MAX_FILL_PASSES: usize = 16;

/// Default name of the transient helper key.
pub const DEFAULT_TEMP_KEY: &str = "__temp__";

#[derive(Debug, Clone)]
enum NodeState {
    Unresolved,
    InProgress,
    Resolved(Value),
}

enum Lookup {
    Found(Value),
    /// The first `n` segments lead to a string that still holds placeholders.
    TemplatedAt(usize),
    Missing,
}

/// Merged configuration tree plus the memo of resolved paths
#[derive(Debug)]
pub struct NestedStore {
    tree: Value,
    context: TemplateContext,
    skip: Vec<Vec<PathSegment>>,
    temp_key: String,
    states: HashMap<String, NodeState>,
}

impl NestedStore {
    /// A store over `tree` with the builtin template functions.
    pub fn new(tree: Value) -> Self {
        Self {
            tree,
            context: TemplateContext::with_builtins(),
            skip: Vec::new(),
            temp_key: DEFAULT_TEMP_KEY.to_string(),
            states: HashMap::new(),
        }
    }

    pub fn with_context(mut self, context: TemplateContext) -> Self {
        self.context = context;
        self.states.clear();
        self
    }

    /// Subtrees whose placeholders are left verbatim, e.g. `data_*.jsonschema`.
    pub fn with_skip_patterns<S: AsRef<str>>(mut self, patterns: impl IntoIterator<Item = S>) -> Self {
        self.skip = patterns
            .into_iter()
            .map(|p| parse_path(p.as_ref()))
            .collect();
        self.states.clear();
        self
    }

    pub fn with_temp_key(mut self, key: impl Into<String>) -> Self {
        self.temp_key = key.into();
        self
    }

    /// The raw tree, placeholders included.
    pub fn tree(&self) -> &Value {
        &self.tree
    }

    /// Mutable access to the raw tree. Clears the memo.
    pub fn tree_mut(&mut self) -> &mut Value {
        self.states.clear();
        &mut self.tree
    }

    pub fn into_tree(self) -> Value {
        self.tree
    }

    /// Resolved value at `path`, or `None` if nothing is defined there.
    pub fn get(&mut self, path: &str) -> Result<Option<Value>> {
        self.resolve_path(&parse_path(path))
    }

    /// Resolved value at `path`, or `default`.
    pub fn get_or(&mut self, path: &str, default: Value) -> Result<Value> {
        Ok(self.get(path)?.unwrap_or(default))
    }

    /// Store a raw value at `path`, creating missing mappings. Clears the memo.
    pub fn set(&mut self, path: &str, value: Value) -> Result<()> {
        set_at_path(&mut self.tree, &parse_path(path), value)?;
        self.states.clear();
        Ok(())
    }

    /// Top-level keys starting with `prefix`, sorted.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .tree
            .as_object()
            .map(|map| {
                map.keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Resolved top-level entries whose key starts with `prefix`.
    pub fn items_with_prefix(&mut self, prefix: &str) -> Result<Vec<(String, Value)>> {
        let mut items = Vec::new();
        for key in self.keys_with_prefix(prefix) {
            if let Some(value) = self.resolve_path(&[PathSegment::Key(key.clone())])? {
                items.push((key, value));
            }
        }
        Ok(items)
    }

    /// Resolve the subtree at `path` (the whole tree for `None`) and write it back.
    ///
    /// Repeats until no placeholder is left outside skipped subtrees, since a
    /// resolved value may itself contain templates.
    pub fn fill(&mut self, path: Option<&str>) -> Result<()> {
        let segments = path.map(parse_path).unwrap_or_default();
        let location = format_path(&segments);

        for pass in 1..=MAX_FILL_PASSES {
            self.states.clear();
            let resolved = self
                .resolve_path(&segments)?
                .ok_or_else(|| Error::TemplateResolution {
                    path: location.clone(),
                    message: "nothing to fill at this path".into(),
                })?;
            let changed = get_at_path(&self.tree, &segments) != Some(&resolved);
            set_at_path(&mut self.tree, &segments, resolved)?;
            self.states.clear();

            let pending = get_at_path(&self.tree, &segments)
                .is_some_and(|value| self.has_pending(value, &mut segments.clone()));
            if !pending {
                tracing::debug!(path = %location, passes = pass, "Templates resolved");
                return Ok(());
            }
            if !changed {
                break;
            }
        }

        Err(Error::TemplateResolution {
            path: location,
            message: format!("templates did not settle after {MAX_FILL_PASSES} passes"),
        })
    }

    /// Remove relative-key entries and transient helper keys from the tree.
    pub fn strip_transient(&mut self) {
        let temp_key = self.temp_key.clone();
        strip_keys(&mut self.tree, &[RELATIVE_KEY, temp_key.as_str()]);
        self.states.clear();
    }

    /// Render `template` as if it were stored at `location`.
    pub fn resolve_str(&mut self, template: &str, location: &str) -> Result<Value> {
        let segments = parse_path(location);
        if has_placeholder(template) {
            self.render_string(template, &segments)
        } else {
            Ok(Value::String(template.to_string()))
        }
    }

    fn is_skipped(&self, location: &[PathSegment]) -> bool {
        self.skip.iter().any(|pattern| is_under(pattern, location))
    }

    fn has_pending(&self, value: &Value, location: &mut Vec<PathSegment>) -> bool {
        if self.is_skipped(location) {
            return false;
        }
        match value {
            Value::String(s) => has_placeholder(s),
            Value::Array(items) => items.iter().enumerate().any(|(idx, item)| {
                location.push(PathSegment::Index(idx));
                let pending = self.has_pending(item, location);
                location.pop();
                pending
            }),
            Value::Object(map) => map.iter().any(|(key, item)| {
                location.push(PathSegment::Key(key.clone()));
                let pending = self.has_pending(item, location);
                location.pop();
                pending
            }),
            _ => false,
        }
    }

    fn lookup_raw(&self, segments: &[PathSegment]) -> Lookup {
        let mut current = &self.tree;
        for (idx, segment) in segments.iter().enumerate() {
            if let Value::String(s) = current
                && has_placeholder(s)
            {
                return Lookup::TemplatedAt(idx);
            }
            let next = match segment {
                PathSegment::Key(key) => current.get(key.as_str()),
                PathSegment::Index(i) => current.get(*i),
            };
            match next {
                Some(value) => current = value,
                None => return Lookup::Missing,
            }
        }
        Lookup::Found(current.clone())
    }

    fn resolve_path(&mut self, segments: &[PathSegment]) -> Result<Option<Value>> {
        let key = format_path(segments);
        match self.states.get(&key) {
            Some(NodeState::Resolved(value)) => return Ok(Some(value.clone())),
            Some(NodeState::InProgress) => {
                return Err(Error::TemplateResolution {
                    path: key,
                    message: "circular reference".into(),
                });
            }
            Some(NodeState::Unresolved) | None => {}
        }

        let raw = match self.lookup_raw(segments) {
            Lookup::Found(raw) => raw,
            Lookup::Missing => return Ok(None),
            Lookup::TemplatedAt(prefix_len) => {
                let base = self.resolve_path(&segments[..prefix_len])?;
                return Ok(base.and_then(|value| get_at_path(&value, &segments[prefix_len..]).cloned()));
            }
        };

        self.states.insert(key.clone(), NodeState::InProgress);
        match self.resolve_value(raw, &mut segments.to_vec()) {
            Ok(value) => {
                self.states.insert(key, NodeState::Resolved(value.clone()));
                Ok(Some(value))
            }
            Err(e) => {
                self.states.insert(key, NodeState::Unresolved);
                Err(e)
            }
        }
    }

    fn resolve_value(&mut self, value: Value, location: &mut Vec<PathSegment>) -> Result<Value> {
        if self.is_skipped(location) {
            return Ok(value);
        }
        match value {
            Value::String(s) if has_placeholder(&s) => self.render_string(&s, location),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (idx, item) in items.into_iter().enumerate() {
                    location.push(PathSegment::Index(idx));
                    let resolved = self.resolve_value(item, location);
                    location.pop();
                    out.push(resolved?);
                }
                Ok(Value::Array(out))
            }
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, item) in map {
                    location.push(PathSegment::Key(key.clone()));
                    let resolved = self.resolve_value(item, location);
                    location.pop();
                    out.insert(key, resolved?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other),
        }
    }

    fn render_string(&mut self, template: &str, location: &[PathSegment]) -> Result<Value> {
        let pieces = split(template).map_err(|message| self.failure(location, message))?;
        if let [Piece::Expr(source)] = pieces.as_slice() {
            return self.eval_source(source, location);
        }

        let mut out = String::new();
        for piece in pieces {
            match piece {
                Piece::Text(text) => out.push_str(text),
                Piece::Expr(source) => out.push_str(&stringify(&self.eval_source(source, location)?)),
            }
        }
        Ok(Value::String(out))
    }

    fn eval_source(&mut self, source: &str, location: &[PathSegment]) -> Result<Value> {
        let expr = parse_expr(source).map_err(|message| self.failure(location, message))?;
        self.eval(&expr, location)
    }

    fn eval(&mut self, expr: &Expr, location: &[PathSegment]) -> Result<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Call { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, location)?);
                }
                let function = self
                    .context
                    .function(name)
                    .cloned()
                    .ok_or_else(|| self.failure(location, format!("unknown function '{name}'")))?;
                function(&values).map_err(|message| self.failure(location, format!("{name}(): {message}")))
            }
            Expr::Path { up: 0, segments } => self.eval_absolute(segments, location),
            Expr::Path { up, segments } => self.eval_relative(*up, segments, location),
        }
    }

    fn eval_absolute(&mut self, segments: &[PathSegment], location: &[PathSegment]) -> Result<Value> {
        if let Some((PathSegment::Key(head), rest)) = segments.split_first() {
            if let Some(object) = self.context.object(head) {
                return get_at_path(object, rest).cloned().ok_or_else(|| {
                    self.failure(location, format!("'{}' not found", format_path(segments)))
                });
            }
            if rest.is_empty()
                && let Some(partial) = self.context.partial(head)
            {
                let partial = partial.to_string();
                return self.render_string(&partial, location);
            }
        }

        self.resolve_path(segments)?.ok_or_else(|| {
            self.failure(location, format!("'{}' not found", format_path(segments)))
        })
    }

    fn eval_relative(
        &mut self,
        up: usize,
        segments: &[PathSegment],
        location: &[PathSegment],
    ) -> Result<Value> {
        let base_len = location
            .len()
            .checked_sub(up)
            .ok_or_else(|| self.failure(location, format!("{up} levels up leaves the tree")))?;
        let base = &location[..base_len];

        if let [PathSegment::Key(key)] = segments
            && key == RELATIVE_KEY
        {
            return match base.last() {
                Some(PathSegment::Key(name)) => Ok(Value::String(name.clone())),
                Some(PathSegment::Index(idx)) => Ok(Value::from(*idx)),
                None => Err(self.failure(location, "the tree root has no key".to_string())),
            };
        }

        let mut target = base.to_vec();
        target.extend_from_slice(segments);
        self.resolve_path(&target)?.ok_or_else(|| {
            self.failure(location, format!("'{}' not found", format_path(&target)))
        })
    }

    fn failure(&self, location: &[PathSegment], message: String) -> Error {
        Error::TemplateResolution {
            path: format_path(location),
            message,
        }
    }
}

fn strip_keys(value: &mut Value, keys: &[&str]) {
    match value {
        Value::Object(map) => {
            map.retain(|k, _| !keys.contains(&k.as_str()));
            for item in map.values_mut() {
                strip_keys(item, keys);
            }
        }
        Value::Array(items) => {
            for item in items {
                strip_keys(item, keys);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn single_placeholder_keeps_type() {
        let mut store = NestedStore::new(json!({
            "flag": true,
            "meta": {"tags": ["a", "b"]},
            "copy": "${{ flag }}",
            "tags": "${{ meta.tags }}",
            "text": "on=${{ flag }} tags=${{ meta.tags }}",
        }));
        assert_eq!(store.get("copy").unwrap(), Some(json!(true)));
        assert_eq!(store.get("tags").unwrap(), Some(json!(["a", "b"])));
        assert_eq!(
            store.get("text").unwrap(),
            Some(json!("on=true tags=[\"a\",\"b\"]"))
        );
    }

    #[test]
    fn relative_paths_climb_levels() {
        let mut store = NestedStore::new(json!({
            "pypkg_main": {
                "name": "demo",
                "path": {
                    "root": "${{ ..name }}",
                    "import": "${{ .root }}/src/${{ ..name }}",
                    "owner": "${{ ..__key__ }}",
                },
            },
        }));
        assert_eq!(store.get("pypkg_main.path.root").unwrap(), Some(json!("demo")));
        assert_eq!(
            store.get("pypkg_main.path.import").unwrap(),
            Some(json!("demo/src/demo"))
        );
        assert_eq!(store.get("pypkg_main.path.owner").unwrap(), Some(json!("pypkg_main")));
    }

    #[test]
    fn relative_key_names_enclosing_entry() {
        let mut store = NestedStore::new(json!({
            "branch": {"dev": {"name": "${{ .__key__ }}/"}},
            "items": [{"pos": "${{ .__key__ }}"}],
        }));
        assert_eq!(store.get("branch.dev.name").unwrap(), Some(json!("dev/")));
        assert_eq!(store.get("items[0].pos").unwrap(), Some(json!(0)));
    }

    #[test]
    fn circular_reference_is_an_error() {
        let mut store = NestedStore::new(json!({
            "a": "${{ b }}",
            "b": "x-${{ c }}",
            "c": "${{ a }}",
        }));
        let err = store.get("a").unwrap_err();
        assert!(err.to_string().contains("circular reference"), "{err}");

        let mut own = NestedStore::new(json!({"a": {"b": "${{ a }}"}}));
        assert!(own.get("a.b").is_err());
    }

    #[test]
    fn navigates_through_templated_intermediates() {
        let mut store = NestedStore::new(json!({
            "alias": "${{ source }}",
            "source": {"nested": {"value": 3}},
        }));
        assert_eq!(store.get("alias.nested.value").unwrap(), Some(json!(3)));
        assert_eq!(store.get("alias.nested.missing").unwrap(), None);
    }

    #[test]
    fn missing_reference_names_location() {
        let mut store = NestedStore::new(json!({"project": {"name": "${{ nope.x }}"}}));
        let err = store.get("project.name").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Template resolution failed at 'project.name': 'nope.x' not found"
        );
    }

    #[test]
    fn context_objects_partials_and_functions() {
        let context = TemplateContext::with_builtins()
            .with_object("repo", json!({"owner": "octo"}))
            .with_partial("banner", "${{ project }} by ${{ repo.owner }}")
            .with_function("twice", |args| {
                let n = args.first().and_then(Value::as_i64).ok_or("twice() expects an integer")?;
                Ok(json!(n * 2))
            });
        let mut store = NestedStore::new(json!({
            "project": "demo",
            "banner_text": "${{ banner }}",
            "size": "${{ twice(21) }}",
            "bad": "${{ twice('x') }}",
            "unknown": "${{ nope() }}",
        }))
        .with_context(context);

        assert_eq!(store.get("banner_text").unwrap(), Some(json!("demo by octo")));
        assert_eq!(store.get("size").unwrap(), Some(json!(42)));
        assert!(store.get("bad").unwrap_err().to_string().contains("twice()"));
        assert!(store.get("unknown").unwrap_err().to_string().contains("unknown function"));
    }

    #[test]
    fn fill_iterates_until_settled() {
        let context = TemplateContext::new().with_function("indirect", |_| Ok(json!("${{ target }}")));
        let mut store = NestedStore::new(json!({
            "target": 7,
            "value": "${{ indirect() }}",
        }))
        .with_context(context);
        store.fill(None).unwrap();
        assert_eq!(store.tree(), &json!({"target": 7, "value": 7}));
    }

    #[test]
    fn fill_gives_up_on_self_reproducing_templates() {
        let context = TemplateContext::new().with_function("again", |_| Ok(json!("${{ again() }}")));
        let mut store = NestedStore::new(json!({"loop": "${{ again() }}"})).with_context(context);
        let err = store.fill(None).unwrap_err();
        assert!(err.to_string().contains("did not settle"), "{err}");
    }

    #[test]
    fn skip_patterns_leave_templates_verbatim() {
        let mut store = NestedStore::new(json!({
            "name": "demo",
            "data_release": {
                "jsonschema": {"schema": {"default": "${{ name }}"}},
                "channel": "${{ name }}",
            },
        }))
        .with_skip_patterns(["data_*.jsonschema"]);
        store.fill(None).unwrap();
        assert_eq!(
            store.tree()["data_release"],
            json!({
                "jsonschema": {"schema": {"default": "${{ name }}"}},
                "channel": "demo",
            })
        );
    }

    #[test]
    fn set_invalidates_memo() {
        let mut store = NestedStore::new(json!({"a": 1, "b": "${{ a }}"}));
        assert_eq!(store.get("b").unwrap(), Some(json!(1)));
        store.set("a", json!(2)).unwrap();
        assert_eq!(store.get("b").unwrap(), Some(json!(2)));
    }

    #[test]
    fn prefix_iteration_and_transient_keys() {
        let mut store = NestedStore::new(json!({
            "env_b": {"x": "${{ env_a.x }}", "__temp__": {"scratch": 1}},
            "env_a": {"x": 1, "__key__": "env_a"},
            "project": {},
        }));
        let items = store.items_with_prefix("env_").unwrap();
        assert_eq!(
            items.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            ["env_a", "env_b"]
        );
        assert_eq!(items[1].1["x"], json!(1));

        store.strip_transient();
        assert_eq!(
            store.tree(),
            &json!({"env_b": {"x": "${{ env_a.x }}"}, "env_a": {"x": 1}, "project": {}})
        );
    }

    #[test]
    fn resolve_str_uses_location() {
        let mut store = NestedStore::new(json!({"unit": {"name": "core"}}));
        assert_eq!(
            store.resolve_str("${{ .name }}-lib", "unit.alias").unwrap(),
            json!("core-lib")
        );
        assert_eq!(store.resolve_str("plain", "").unwrap(), json!("plain"));
    }
}
