//! Prefixed, envelope-wrapped access to a [`StorageBackend`].

use crate::backend::{MemoryBackend, StorageBackend};
use crate::error::{StorageError, StorageResult};
use loom_types::Removal;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub const DEFAULT_PREFIX: &str = "loom4";
const EXPORT_VERSION: u32 = 1;

/// What is actually written for each key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub value: Value,
    /// Write time, Unix milliseconds.
    pub timestamp: i64,
    /// Expiry, Unix milliseconds.
    #[serde(default)]
    pub expires: Option<i64>,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    1
}

impl Envelope {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires.is_some_and(|at| now_ms > at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOptions {
    /// Absolute expiry, Unix milliseconds.
    pub expires: Option<i64>,
    pub version: u32,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            expires: None,
            version: default_version(),
        }
    }
}

/// Bytes used by this manager's entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageSize {
    pub used: usize,
    pub entries: usize,
}

impl StorageSize {
    pub fn used_mb(&self) -> f64 {
        self.used as f64 / (1024.0 * 1024.0)
    }
}

/// Storage facade used by the rest of the workspace.
///
/// Failures never propagate: they are logged and surface as `false`, an
/// empty result or the caller's default.
#[derive(Clone)]
pub struct StorageManager {
    backend: Arc<dyn StorageBackend>,
    prefix: String,
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageManager").field("prefix", &self.prefix).finish()
    }
}

impl StorageManager {
    pub fn new(backend: Arc<dyn StorageBackend>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
        }
    }

    /// An unlimited in-memory store with the default prefix.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), DEFAULT_PREFIX)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}_{}", self.prefix, key)
    }

    fn key_prefix(&self) -> String {
        format!("{}_", self.prefix)
    }

    /// Backend keys owned by this manager.
    fn owned_keys(&self) -> Vec<String> {
        let prefix = self.key_prefix();
        match self.backend.keys() {
            Ok(keys) => keys.into_iter().filter(|k| k.starts_with(&prefix)).collect(),
            Err(e) => {
                error!(prefix = %self.prefix, "Failed to list storage keys: {e}");
                Vec::new()
            }
        }
    }

    // ================================================================
    // Single entries
    // ================================================================

    pub fn set(&self, key: &str, value: &Value) -> bool {
        self.set_with(key, value, SetOptions::default())
    }

    /// Stores `value` in an envelope. When the backend is full, expired
    /// entries are cleaned up and the write is retried once.
    pub fn set_with(&self, key: &str, value: &Value, options: SetOptions) -> bool {
        match self.write(key, value, options) {
            Ok(()) => true,
            Err(StorageError::QuotaExceeded { .. }) => {
                warn!(key, "Storage quota exceeded, cleaning up and retrying");
                self.cleanup(None);
                match self.write(key, value, options) {
                    Ok(()) => true,
                    Err(e) => {
                        error!(key, "Failed to store data after cleanup: {e}");
                        false
                    }
                }
            }
            Err(e) => {
                error!(key, "Failed to store data: {e}");
                false
            }
        }
    }

    /// Stores `value` so that it reads as absent once `ttl` has passed.
    pub fn set_with_ttl(&self, key: &str, value: &Value, ttl: Duration) -> bool {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let options = SetOptions {
            expires: Some(now_ms().saturating_add(ttl_ms)),
            ..SetOptions::default()
        };
        self.set_with(key, value, options)
    }

    pub fn set_as<T: Serialize>(&self, key: &str, value: &T) -> bool {
        match serde_json::to_value(value) {
            Ok(v) => self.set(key, &v),
            Err(e) => {
                error!(key, "Failed to serialize data: {e}");
                false
            }
        }
    }

    fn write(&self, key: &str, value: &Value, options: SetOptions) -> StorageResult<()> {
        let envelope = Envelope {
            value: value.clone(),
            timestamp: now_ms(),
            expires: options.expires,
            version: options.version,
        };
        let text = serde_json::to_string(&envelope)?;
        self.backend.set_item(&self.full_key(key), &text)
    }

    /// Reads the value under `key`. Expired entries are deleted and read as
    /// absent, as are entries that fail to parse.
    pub fn get(&self, key: &str) -> Option<Value> {
        let text = match self.backend.get_item(&self.full_key(key)) {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(e) => {
                error!(key, "Failed to retrieve data: {e}");
                return None;
            }
        };
        let envelope: Envelope = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(key, "Failed to parse stored data: {e}");
                return None;
            }
        };
        if envelope.is_expired(now_ms()) {
            self.remove(key);
            return None;
        }
        Some(envelope.value)
    }

    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Reads and deserializes the value under `key`. A value of the wrong
    /// shape is logged and read as absent.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        serde_json::from_value(value)
            .inspect_err(|e| warn!(key, "Stored data has unexpected shape: {e}"))
            .ok()
    }

    pub fn remove(&self, key: &str) -> bool {
        match self.backend.remove_item(&self.full_key(key)) {
            Ok(()) => true,
            Err(e) => {
                error!(key, "Failed to remove data: {e}");
                false
            }
        }
    }

    /// Whether an entry exists, without checking expiry.
    pub fn has(&self, key: &str) -> bool {
        matches!(self.backend.get_item(&self.full_key(key)), Ok(Some(_)))
    }

    // ================================================================
    // Whole prefix
    // ================================================================

    /// Removes every entry under this prefix.
    pub fn clear(&self) -> bool {
        let mut ok = true;
        for key in self.owned_keys() {
            if let Err(e) = self.backend.remove_item(&key) {
                error!(key = %key, "Failed to clear storage entry: {e}");
                ok = false;
            }
        }
        ok
    }

    /// Keys under this prefix, with the prefix stripped.
    pub fn keys(&self) -> Vec<String> {
        let prefix = self.key_prefix();
        self.owned_keys()
            .into_iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub fn size(&self) -> StorageSize {
        let keys = self.owned_keys();
        let used = keys
            .iter()
            .map(|k| {
                let value_len = self.backend.get_item(k).ok().flatten().map_or(0, |v| v.len());
                k.len() + value_len
            })
            .sum();
        StorageSize {
            used,
            entries: keys.len(),
        }
    }

    /// Deletes expired and unreadable entries, plus entries older than
    /// `max_age` when given. Returns how many were removed.
    pub fn cleanup(&self, max_age: Option<Duration>) -> usize {
        let now = now_ms();
        let max_age_ms = max_age.map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX));

        let stale: Vec<String> = self
            .owned_keys()
            .into_iter()
            .filter(|key| {
                let Ok(Some(text)) = self.backend.get_item(key) else {
                    return false;
                };
                match serde_json::from_str::<Envelope>(&text) {
                    Ok(envelope) => {
                        envelope.is_expired(now)
                            || max_age_ms.is_some_and(|max| now - envelope.timestamp > max)
                    }
                    Err(_) => true,
                }
            })
            .collect();

        let mut removed = 0;
        for key in &stale {
            match self.backend.remove_item(key) {
                Ok(()) => removed += 1,
                Err(e) => error!(key = %key, "Failed to remove stale entry: {e}"),
            }
        }
        if removed > 0 {
            info!(prefix = %self.prefix, removed, "Cleaned up storage items");
        }
        removed
    }

    /// `{data, exportDate, version}` with every readable value under this prefix.
    pub fn export(&self) -> Value {
        let data: Map<String, Value> = self
            .keys()
            .into_iter()
            .map(|key| {
                let value = self.get(&key).unwrap_or(Value::Null);
                (key, value)
            })
            .collect();
        json!({
            "data": data,
            "exportDate": Utc::now().to_rfc3339(),
            "version": EXPORT_VERSION,
        })
    }

    /// Writes the entries of an [`StorageManager::export`] document. Existing
    /// keys are kept unless `overwrite` is set.
    pub fn import(&self, document: &Value, overwrite: bool) -> bool {
        let Some(data) = document.get("data").and_then(Value::as_object) else {
            warn!(prefix = %self.prefix, "Import document has no data object");
            return false;
        };
        let mut ok = true;
        for (key, value) in data {
            if overwrite || !self.has(key) {
                ok &= self.set(key, value);
            }
        }
        ok
    }

    /// A manager over the same backend whose keys live under `<prefix>_<name>`.
    pub fn scope(&self, name: &str) -> StorageManager {
        Self::new(Arc::clone(&self.backend), self.full_key(name))
    }

    // ================================================================
    // Value helpers
    // ================================================================

    /// Adds `by` to a numeric entry (non-numbers count as zero) and returns
    /// the new value.
    pub fn increment(&self, key: &str, by: i64) -> i64 {
        let current = self.get(key).and_then(|v| v.as_i64()).unwrap_or(0);
        let next = current.saturating_add(by);
        self.set(key, &json!(next));
        next
    }

    /// Appends `item` to a list entry, dropping the oldest items beyond
    /// `max_len`. Returns the stored list.
    pub fn push(&self, key: &str, item: Value, max_len: Option<usize>) -> Vec<Value> {
        let mut items = match self.get(key) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        items.push(item);
        if let Some(max) = max_len.filter(|max| items.len() > *max) {
            items.drain(..items.len() - max);
        }
        self.set(key, &Value::Array(items.clone()));
        items
    }

    /// Removes matching items from a list entry and returns what is left.
    /// A non-list entry is left untouched.
    pub fn pull(&self, key: &str, removal: Removal<'_>) -> Vec<Value> {
        let items = match self.get(key) {
            Some(Value::Array(items)) => items,
            None => Vec::new(),
            Some(_) => return Vec::new(),
        };
        let kept = removal.retain(items);
        self.set(key, &Value::Array(kept.clone()));
        kept
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
