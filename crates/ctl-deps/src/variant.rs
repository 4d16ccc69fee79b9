//! Variant dimensions and zip groups.
//!
//! A [`VariantSpace`] declares the build dimensions (e.g. `python`, `os`)
//! with their legal values in order. Dimensions listed together in a zip
//! group move in lockstep: they always resolve to the same index.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::selector::{SelectorEnv, SelectorValue};
use crate::version::loose_eq;

/// One dimension and its ordered legal values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantDimension {
    pub name: String,
    pub values: Vec<Value>,
}

impl VariantDimension {
    pub fn new(name: impl Into<String>, values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    fn index_of(&self, value: &Value) -> Option<usize> {
        self.values.iter().position(|v| value_matches(v, value))
    }
}

/// The version of the running host for one designated dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostVersion {
    pub dimension: String,
    pub version: String,
}

impl HostVersion {
    pub fn new(dimension: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            dimension: dimension.into(),
            version: version.into(),
        }
    }
}

/// Declared dimensions plus zip groups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariantSpace {
    dimensions: Vec<VariantDimension>,
    zip_groups: Vec<Vec<String>>,
}

/// `{variants: {name: [values]}, zip_keys: [[names]]}` as written in configuration.
#[derive(Debug, Deserialize)]
struct VariantSpaceDef {
    #[serde(default)]
    variants: BTreeMap<String, Vec<Value>>,
    #[serde(default)]
    zip_keys: Vec<Vec<String>>,
}

impl VariantSpace {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a space, rejecting zip groups that name undeclared dimensions
    /// or whose members have different value counts.
    pub fn new(dimensions: Vec<VariantDimension>, zip_groups: Vec<Vec<String>>) -> Result<Self> {
        for (i, dim) in dimensions.iter().enumerate() {
            if dimensions[..i].iter().any(|d| d.name == dim.name) {
                return Err(Error::InvalidVariantSpace(format!(
                    "dimension '{}' declared twice",
                    dim.name
                )));
            }
            if dim.values.is_empty() {
                return Err(Error::InvalidVariantSpace(format!(
                    "dimension '{}' has no values",
                    dim.name
                )));
            }
        }

        for group in &zip_groups {
            let mut len = None;
            for member in group {
                let dim = dimensions.iter().find(|d| &d.name == member).ok_or_else(|| {
                    Error::InvalidZipGroup {
                        group: group.clone(),
                        reason: format!("'{member}' is not a declared dimension"),
                    }
                })?;
                match len {
                    None => len = Some(dim.values.len()),
                    Some(n) if n != dim.values.len() => {
                        return Err(Error::InvalidZipGroup {
                            group: group.clone(),
                            reason: "members have different numbers of values".into(),
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(Self {
            dimensions,
            zip_groups,
        })
    }

    /// Parse `{variants: {...}, zip_keys: [...]}`. Dimensions come out in key order.
    pub fn from_value(value: &Value) -> Result<Self> {
        let def: VariantSpaceDef = serde_json::from_value(value.clone())
            .map_err(|e| Error::InvalidVariantSpace(e.to_string()))?;
        let dimensions = def
            .variants
            .into_iter()
            .map(|(name, values)| VariantDimension { name, values })
            .collect();
        Self::new(dimensions, def.zip_keys)
    }

    pub fn dimensions(&self) -> &[VariantDimension] {
        &self.dimensions
    }

    pub fn zip_groups(&self) -> &[Vec<String>] {
        &self.zip_groups
    }

    pub fn dimension(&self, name: &str) -> Option<&VariantDimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    /// Choose a value for every dimension.
    ///
    /// Overrides win. The host dimension then takes the host version unless
    /// a zip sibling is overridden. A remaining dimension inherits the index
    /// of a zip sibling (an overridden sibling first, then one already
    /// resolved) and otherwise takes its first value. Declaration order
    /// does not change the outcome.
    pub fn resolve(
        &self,
        overrides: &BTreeMap<String, Value>,
        host: Option<&HostVersion>,
    ) -> Result<ResolvedVariants> {
        let mut override_idx: HashMap<&str, usize> = HashMap::new();
        for (name, value) in overrides {
            let dim = self
                .dimension(name)
                .ok_or_else(|| Error::UnknownVariantDimension {
                    dimension: name.clone(),
                })?;
            let idx = dim.index_of(value).ok_or_else(|| Error::InvalidVariantValue {
                dimension: name.clone(),
                value: value_text(value),
            })?;
            override_idx.insert(dim.name.as_str(), idx);
        }

        for group in &self.zip_groups {
            let (names, indices): (Vec<String>, Vec<usize>) = group
                .iter()
                .filter_map(|m| override_idx.get(m.as_str()).map(|i| (m.clone(), *i)))
                .unzip();
            if indices.windows(2).any(|w| w[0] != w[1]) {
                return Err(Error::ZipInconsistent {
                    dimensions: names,
                    indices,
                });
            }
        }

        let mut chosen = override_idx.clone();
        if let Some((name, idx)) = self.host_index(host, &override_idx) {
            chosen.insert(name, idx);
        }
        let mut values = Vec::with_capacity(self.dimensions.len());

        for dim in &self.dimensions {
            let name = dim.name.as_str();

            if let Some(&idx) = chosen.get(name) {
                values.push((dim.name.clone(), dim.values[idx].clone()));
                continue;
            }

            if let Some(idx) = self.zipped_index(name, &override_idx, &chosen) {
                chosen.insert(name, idx);
                values.push((dim.name.clone(), dim.values[idx].clone()));
                continue;
            }

            match host.filter(|h| h.dimension == name) {
                Some(host) => {
                    let as_value = Value::String(host.version.clone());
                    match dim.index_of(&as_value) {
                        Some(idx) => {
                            chosen.insert(name, idx);
                            values.push((dim.name.clone(), dim.values[idx].clone()));
                        }
                        None => {
                            tracing::warn!(
                                dimension = name,
                                version = %host.version,
                                "Host version is not a declared variant value"
                            );
                            values.push((dim.name.clone(), as_value));
                        }
                    }
                }
                None => {
                    chosen.insert(name, 0);
                    values.push((dim.name.clone(), dim.values[0].clone()));
                }
            }
        }

        tracing::debug!(?values, "Resolved variants");
        Ok(ResolvedVariants { values })
    }

    /// Index of the host version in its dimension, unless an override on the
    /// dimension or on a zip sibling decides it.
    fn host_index(
        &self,
        host: Option<&HostVersion>,
        overrides: &HashMap<&str, usize>,
    ) -> Option<(&str, usize)> {
        let host = host?;
        let dim = self.dimension(&host.dimension)?;
        let zip_overridden = self
            .zip_groups
            .iter()
            .filter(|g| g.contains(&dim.name))
            .flatten()
            .any(|m| overrides.contains_key(m.as_str()));
        if zip_overridden || overrides.contains_key(dim.name.as_str()) {
            return None;
        }
        dim.index_of(&Value::String(host.version.clone()))
            .map(|idx| (dim.name.as_str(), idx))
    }

    fn zipped_index(
        &self,
        name: &str,
        overrides: &HashMap<&str, usize>,
        chosen: &HashMap<&str, usize>,
    ) -> Option<usize> {
        for group in self.zip_groups.iter().filter(|g| g.iter().any(|m| m == name)) {
            let siblings: Vec<&str> = group
                .iter()
                .map(String::as_str)
                .filter(|m| *m != name)
                .collect();
            if let Some(idx) = siblings.iter().find_map(|m| overrides.get(m)) {
                return Some(*idx);
            }
            if let Some(idx) = siblings.iter().find_map(|m| chosen.get(m)) {
                return Some(*idx);
            }
        }
        None
    }
}

/// Variant values chosen for one build, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedVariants {
    values: Vec<(String, Value)>,
}

impl ResolvedVariants {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(n, v)| (n.clone(), v.clone()))
                .collect(),
        )
    }

    /// Add every variant to a selector environment, replacing same-named entries.
    pub fn extend_env(&self, env: &mut SelectorEnv) {
        for (name, value) in &self.values {
            env.insert(name.clone(), SelectorValue::from(value));
        }
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Exact match, or the same text (`"3.10"` matches `3.10`, `"true"` matches `true`).
fn value_matches(declared: &Value, candidate: &Value) -> bool {
    declared == candidate || loose_eq(&value_text(declared), &value_text(candidate))
}
