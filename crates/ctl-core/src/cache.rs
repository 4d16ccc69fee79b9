//! Persistent cache for external facts
//!
//! Entries are stored per category with the time they were written. Each
//! category has a retention in hours; expired entries read as misses and a
//! retention of `0` turns the category off entirely.
//!
//! The cache file is YAML:
//!
//! ```yaml
//! extension:
//!   "file:///data/licenses.json":
//!     timestamp: 2026-01-01T00:00:00Z
//!     data: {...}
//! ```
//!
//! There is no cross-process locking. Two processes saving the same cache
//! file concurrently will lose one of the writes.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use ctl_fs::{NormalizedPath, io};

/// Retention applied to categories without an explicit setting.
pub const DEFAULT_RETENTION_HOURS: u64 = 24;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CacheItem {
    timestamp: DateTime<Utc>,
    data: Value,
}

type CacheData = BTreeMap<String, BTreeMap<String, CacheItem>>;

/// `(category, key) -> value` store with per-category expiry
#[derive(Debug, Clone, Default)]
pub struct CacheStore {
    path: Option<NormalizedPath>,
    retention: BTreeMap<String, u64>,
    default_retention: u64,
    items: CacheData,
    dirty: bool,
}

impl CacheStore {
    /// A cache that is never persisted.
    pub fn in_memory() -> Self {
        Self {
            default_retention: DEFAULT_RETENTION_HOURS,
            ..Self::default()
        }
    }

    /// Open the cache at `path`.
    ///
    /// A missing file starts empty. An unreadable or corrupt one is logged
    /// and also starts empty; it is overwritten on the next save.
    pub fn open(path: NormalizedPath) -> Self {
        let items = match io::read_text_if_exists(&path) {
            Ok(Some(text)) => match serde_yaml::from_str::<Option<CacheData>>(&text) {
                Ok(items) => items.unwrap_or_default(),
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Cache file is corrupt; starting empty");
                    CacheData::new()
                }
            },
            Ok(None) => {
                tracing::debug!(path = %path, "No cache file; starting empty");
                CacheData::new()
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Cache file unreadable; starting empty");
                CacheData::new()
            }
        };

        Self {
            path: Some(path),
            retention: BTreeMap::new(),
            default_retention: DEFAULT_RETENTION_HOURS,
            items,
            dirty: false,
        }
    }

    /// Set the retention of one category.
    pub fn with_retention(mut self, category: impl Into<String>, hours: u64) -> Self {
        self.retention.insert(category.into(), hours);
        self
    }

    /// Set the retention of every category without an explicit one.
    pub fn with_default_retention(mut self, hours: u64) -> Self {
        self.default_retention = hours;
        self
    }

    pub fn path(&self) -> Option<&NormalizedPath> {
        self.path.as_ref()
    }

    fn retention_hours(&self, category: &str) -> u64 {
        self.retention
            .get(category)
            .copied()
            .unwrap_or(self.default_retention)
    }

    /// A fresh value, or `None` when missing, expired or disabled.
    pub fn get(&self, category: &str, key: &str) -> Option<&Value> {
        let hours = self.retention_hours(category);
        if hours == 0 {
            return None;
        }
        let item = self.items.get(category)?.get(key)?;
        let age = Utc::now().signed_duration_since(item.timestamp);
        let limit = i64::try_from(hours)
            .ok()
            .and_then(Duration::try_hours)
            .unwrap_or(Duration::MAX);
        if age > limit {
            tracing::debug!(category, key, "Cache entry expired");
            return None;
        }
        tracing::debug!(category, key, "Cache hit");
        Some(&item.data)
    }

    /// Store a value stamped with the current time. No-op for disabled categories.
    pub fn set(&mut self, category: &str, key: &str, value: Value) {
        self.set_at(category, key, value, Utc::now());
    }

    fn set_at(&mut self, category: &str, key: &str, value: Value, timestamp: DateTime<Utc>) {
        if self.retention_hours(category) == 0 {
            return;
        }
        self.items.entry(category.to_string()).or_default().insert(
            key.to_string(),
            CacheItem {
                timestamp,
                data: value,
            },
        );
        self.dirty = true;
    }

    /// Write the cache back to disk if it changed.
    pub fn save(&mut self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }
        let text = serde_yaml::to_string(&self.items).map_err(|e| ctl_fs::Error::ConfigSerialize {
            path: path.to_native(),
            format: "YAML".into(),
            message: e.to_string(),
        })?;
        io::write_text(path, &text)?;
        tracing::debug!(path = %path, "Cache saved");
        self.dirty = false;
        Ok(())
    }
}
