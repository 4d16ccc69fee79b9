//! Schemas embedded in the configuration itself
//!
//! A user-defined entry may carry its own schema:
//!
//! ```yaml
//! data_release:
//!   jsonschema:
//!     schema: {type: object, properties: {channel: {type: string, default: stable}}}
//!     fill_defaults: true
//!   channel: beta
//! ```
//!
//! The entry minus its `jsonschema` key is validated against that schema in
//! both phases. With `fill_defaults` the filled entry is written back.

use crate::validator::{Phase, validate};
use crate::{Error, Result, SchemaRegistry};
use ctl_content::{parse_path, select};
use serde_json::Value;

const SCHEMA_KEY: &str = "jsonschema";

/// Locations of entries that may embed a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedSchemas {
    locations: Vec<String>,
}

impl Default for EmbeddedSchemas {
    fn default() -> Self {
        Self::new(["data_*", "file_*.data"])
    }
}

impl EmbeddedSchemas {
    pub fn new<S: Into<String>>(locations: impl IntoIterator<Item = S>) -> Self {
        Self {
            locations: locations.into_iter().map(Into::into).collect(),
        }
    }

    /// Wildcard paths of the embedded schema documents themselves.
    ///
    /// Templates inside these subtrees belong to the schema, not to the
    /// configuration, and must be left unresolved.
    pub fn schema_patterns(&self) -> Vec<String> {
        self.locations
            .iter()
            .map(|loc| format!("{loc}.{SCHEMA_KEY}"))
            .collect()
    }

    /// Validate every entry that embeds a schema. Returns how many were checked.
    pub fn validate(&self, registry: &SchemaRegistry, tree: &mut Value, phase: Phase) -> Result<usize> {
        let targets: Vec<String> = self
            .locations
            .iter()
            .flat_map(|loc| select(tree, loc))
            .filter(|(_, entry)| entry.get(SCHEMA_KEY).is_some_and(Value::is_object))
            .map(|(path, _)| path)
            .collect();

        for path in &targets {
            let segments = parse_path(path);
            let Some(Value::Object(entry)) = ctl_content::get_at_path(tree, &segments) else {
                continue;
            };
            let settings = &entry[SCHEMA_KEY];
            let Some(schema) = settings.get("schema") else {
                return Err(Error::InvalidSchema {
                    name: path.clone(),
                    message: format!("'{SCHEMA_KEY}' has no 'schema' key"),
                });
            };
            let schema = schema.clone();
            let fill = settings
                .get("fill_defaults")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let mut data_value = Value::Object(
                entry
                    .iter()
                    .filter(|(k, _)| k.as_str() != SCHEMA_KEY)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            );

            validate(registry, &mut data_value, &schema, phase, fill).map_err(|e| match e {
                Error::SchemaValidation { phase, path: inner, message } => Error::SchemaValidation {
                    phase,
                    path: join(path, &inner),
                    message,
                },
                other => other,
            })?;
            tracing::debug!(%path, %phase, "Validated embedded schema");

            if fill {
                if let (Some(Value::Object(entry)), Value::Object(filled)) =
                    (ctl_content::get_at_path_mut(tree, &segments), data_value)
                {
                    for (key, value) in filled {
                        entry.insert(key, value);
                    }
                }
            }
        }
        Ok(targets.len())
    }
}

fn join(prefix: &str, inner: &str) -> String {
    if inner.is_empty() {
        prefix.to_string()
    } else if inner.starts_with('[') {
        format!("{prefix}{inner}")
    } else {
        format!("{prefix}.{inner}")
    }
}
