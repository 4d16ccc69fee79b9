//! Pre-substitution schema relaxation
//!
//! Before templates are resolved a field may still hold a placeholder such
//! as `${{ project.flag }}`. Every subschema is therefore widened to also
//! accept any string long enough to be a placeholder.

use serde_json::{Map, Value, json};

/// Length of the shortest possible placeholder, `${{x}}`.
pub const PLACEHOLDER_MIN_LENGTH: u64 = 6;

const OBJECT_MAPS: [&str; 4] = ["properties", "patternProperties", "$defs", "definitions"];
const SCHEMA_LISTS: [&str; 4] = ["prefixItems", "allOf", "anyOf", "oneOf"];
const SCHEMA_SLOTS: [&str; 3] = ["additionalProperties", "items", "not"];

/// Build the relaxed variant of `schema`.
///
/// Returns `{"$id"?, "default"?, "anyOf": [<schema with relaxed children>, <placeholder>]}`.
/// `$id` moves to the wrapper so registry lookups land on the relaxed form;
/// `default` is copied so default filling still sees it. Boolean schemas are
/// returned unchanged.
pub fn build_pre_substitution_variant(schema: &Value) -> Value {
    let Value::Object(original) = schema else {
        return schema.clone();
    };
    let mut inner = relax_children(original);
    inner.remove("$schema");

    let mut wrapper = Map::new();
    if let Some(id) = inner.remove("$id") {
        wrapper.insert("$id".into(), id);
    }
    if let Some(default) = inner.get("default") {
        wrapper.insert("default".into(), default.clone());
    }
    wrapper.insert(
        "anyOf".into(),
        json!([Value::Object(inner), placeholder_schema()]),
    );
    Value::Object(wrapper)
}

/// The schema every unresolved placeholder satisfies.
pub fn placeholder_schema() -> Value {
    json!({"type": "string", "minLength": PLACEHOLDER_MIN_LENGTH})
}

fn relax_children(schema: &Map<String, Value>) -> Map<String, Value> {
    let mut out = schema.clone();
    for key in OBJECT_MAPS {
        if let Some(Value::Object(children)) = out.get_mut(key) {
            for child in children.values_mut() {
                *child = build_pre_substitution_variant(child);
            }
        }
    }
    for key in SCHEMA_LISTS {
        if let Some(Value::Array(children)) = out.get_mut(key) {
            for child in children.iter_mut() {
                *child = build_pre_substitution_variant(child);
            }
        }
    }
    for key in SCHEMA_SLOTS {
        if let Some(child) = out.get_mut(key) {
            if child.is_object() {
                *child = build_pre_substitution_variant(child);
            }
        }
    }
    out
}
