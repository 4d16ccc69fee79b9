//! External references
//!
//! A scalar tagged `!ext` names data that lives outside the control center:
//!
//! ```yaml
//! license: !ext "file://data/licenses.yaml mit"
//! topics: !ext "https://example.org/topics.json ${{ join(items, ', ') }}"
//! ```
//!
//! The first word is the URL, the rest an optional query: a dotted path into
//! the fetched document, or a template evaluated against it. Results are
//! cached under the `extension` category keyed by the whole tag value.

use serde_json::{Map, Number, Value};

use crate::cache::CacheStore;
use crate::error::{Error, Result};
use crate::store::NestedStore;
use crate::template::has_placeholder;
use ctl_content::{get_at_path, parse_path};
use ctl_fs::{Format, NormalizedPath, io};

/// YAML tag marking an external reference.
pub const EXT_TAG: &str = "ext";

/// Cache category of fetched references.
pub const CACHE_CATEGORY: &str = "extension";

const MAX_NESTING: usize = 8;

/// Retrieves the raw text behind a URL.
///
/// Implementations own their timeouts and retries.
pub trait Fetcher {
    fn fetch(&self, url: &str) -> std::result::Result<String, String>;
}

impl<F: Fetcher + ?Sized> Fetcher for std::rc::Rc<F> {
    fn fetch(&self, url: &str) -> std::result::Result<String, String> {
        (**self).fetch(url)
    }
}

/// Reads `file://` URLs and plain paths, relative ones against `base_dir`.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    base_dir: NormalizedPath,
}

impl FileFetcher {
    pub fn new(base_dir: impl Into<NormalizedPath>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

impl Fetcher for FileFetcher {
    fn fetch(&self, url: &str) -> std::result::Result<String, String> {
        let location = match url.strip_prefix("file://") {
            Some(rest) => rest,
            None if url.contains("://") => {
                return Err(format!("no fetcher for '{url}'"));
            }
            None => url,
        };
        let path = if location.starts_with('/') {
            NormalizedPath::new(location)
        } else {
            self.base_dir.join(location)
        };
        io::read_text(&path).map_err(|e| e.to_string())
    }
}

/// Resolves `!ext` tags through a [`Fetcher`] and a [`CacheStore`]
pub struct ExternalResolver {
    fetcher: Box<dyn Fetcher>,
    cache: CacheStore,
}

impl std::fmt::Debug for ExternalResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalResolver")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl ExternalResolver {
    pub fn new(fetcher: impl Fetcher + 'static, cache: CacheStore) -> Self {
        Self {
            fetcher: Box::new(fetcher),
            cache,
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut CacheStore {
        &mut self.cache
    }

    /// Resolve one tag value, `"<url> [<query>]"`.
    pub fn resolve(&mut self, reference: &str) -> Result<Value> {
        self.resolve_nested(reference, 0)
    }

    /// Convert a parsed YAML document, resolving `!ext` tags on the way.
    pub fn yaml_to_json(&mut self, value: serde_yaml::Value, origin: &str) -> Result<Value> {
        self.convert(value, origin, 0)
    }

    fn resolve_nested(&mut self, reference: &str, depth: usize) -> Result<Value> {
        let reference = reference.trim();
        let failure = |message: String| Error::ExternalReference {
            reference: reference.to_string(),
            message,
        };
        if depth >= MAX_NESTING {
            return Err(failure(format!("references nest deeper than {MAX_NESTING} levels")));
        }
        if let Some(hit) = self.cache.get(CACHE_CATEGORY, reference) {
            return Ok(hit.clone());
        }

        let (url, query) = match reference.split_once(char::is_whitespace) {
            Some((url, query)) => (url, Some(query.trim()).filter(|q| !q.is_empty())),
            None => (reference, None),
        };
        if url.is_empty() {
            return Err(failure("empty reference".into()));
        }
        let format = Format::detect(url).map_err(|e| failure(e.to_string()))?;

        tracing::info!(url, "Fetching external reference");
        let text = self.fetcher.fetch(url).map_err(failure)?;
        let document = match format {
            Format::Yaml => {
                let raw: serde_yaml::Value = serde_yaml::from_str(&text)
                    .map_err(|e| failure(format!("invalid YAML: {e}")))?;
                self.convert(raw, url, depth + 1)?
            }
            other => other.parse::<Value>(&text, url).map_err(|e| failure(e.to_string()))?,
        };

        let data = match query {
            None => document,
            Some(query) if has_placeholder(query) => NestedStore::new(document)
                .resolve_str(query, "")
                .map_err(|e| failure(e.to_string()))?,
            Some(query) => get_at_path(&document, &parse_path(query))
                .cloned()
                .ok_or_else(|| failure(format!("query '{query}' matches nothing")))?,
        };

        self.cache.set(CACHE_CATEGORY, reference, data.clone());
        Ok(data)
    }

    fn convert(&mut self, value: serde_yaml::Value, origin: &str, depth: usize) -> Result<Value> {
        use serde_yaml::Value as Yaml;

        Ok(match value {
            Yaml::Null => Value::Null,
            Yaml::Bool(b) => Value::Bool(b),
            Yaml::Number(n) => yaml_number(&n),
            Yaml::String(s) => Value::String(s),
            Yaml::Sequence(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| self.convert(item, origin, depth))
                    .collect::<Result<_>>()?,
            ),
            Yaml::Mapping(mapping) => {
                let mut map = Map::new();
                for (key, item) in mapping {
                    let key = yaml_key(&key).ok_or_else(|| Error::Load {
                        path: origin.to_string(),
                        message: format!("unsupported mapping key {key:?}"),
                    })?;
                    map.insert(key, self.convert(item, origin, depth)?);
                }
                Value::Object(map)
            }
            Yaml::Tagged(tagged) => {
                if tagged.tag != EXT_TAG {
                    return Err(Error::Load {
                        path: origin.to_string(),
                        message: format!("unknown tag {}", tagged.tag),
                    });
                }
                let Yaml::String(reference) = tagged.value else {
                    return Err(Error::Load {
                        path: origin.to_string(),
                        message: format!("!{EXT_TAG} expects a string"),
                    });
                };
                self.resolve_nested(&reference, depth)?
            }
        })
    }
}

fn yaml_number(n: &serde_yaml::Number) -> Value {
    if let Some(i) = n.as_i64() {
        Value::from(i)
    } else if let Some(u) = n.as_u64() {
        Value::from(u)
    } else {
        n.as_f64()
            .and_then(Number::from_f64)
            .map_or(Value::Null, Value::Number)
    }
}

fn yaml_key(key: &serde_yaml::Value) -> Option<String> {
    use serde_yaml::Value as Yaml;

    match key {
        Yaml::String(s) => Some(s.clone()),
        Yaml::Number(n) => Some(n.to_string()),
        Yaml::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
