//! Durable template/payload cache
//!
//! Blobs live in the key-value store under `yiweb:template:v1:<url>` as JSON
//! `{"ts": <ms since epoch>, "content": "..."}`. Everything here is
//! best-effort: storage failures are logged and behave like a cache miss.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::storage::{KeyValueStore, TEMPLATE_KEY_PREFIX};

/// Stored shape of one cached blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateEntry {
    /// Write time in milliseconds since the Unix epoch
    pub ts: i64,
    pub content: String,
}

/// Versioned blob cache over a [`KeyValueStore`]
#[derive(Clone)]
pub struct TemplateCache {
    store: Arc<dyn KeyValueStore>,
}

impl TemplateCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn key_for(url: &str) -> String {
        format!("{}{}", TEMPLATE_KEY_PREFIX, url)
    }

    /// Cached content for `url` if it is younger than `max_age`
    ///
    /// Stale or malformed entries are removed.
    pub fn get(&self, url: &str, max_age: Duration) -> Option<String> {
        self.get_at(url, max_age, Utc::now().timestamp_millis())
    }

    fn get_at(&self, url: &str, max_age: Duration, now_ms: i64) -> Option<String> {
        let key = Self::key_for(url);
        let raw = match self.store.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::debug!(url, error = %e, "Template storage unavailable");
                return None;
            }
        };

        let entry: TemplateEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(url, error = %e, "Dropping malformed template cache entry");
                self.remove(url);
                return None;
            }
        };

        let age_ms = now_ms.saturating_sub(entry.ts);
        if age_ms < 0 || age_ms as u128 >= max_age.as_millis() {
            tracing::debug!(url, age_ms, "Template cache entry is stale");
            self.remove(url);
            return None;
        }
        Some(entry.content)
    }

    pub fn put(&self, url: &str, content: impl Into<String>) {
        let entry = TemplateEntry {
            ts: Utc::now().timestamp_millis(),
            content: content.into(),
        };
        let result = serde_json::to_string(&entry)
            .map_err(crate::Error::from)
            .and_then(|raw| self.store.set(&Self::key_for(url), &raw));
        if let Err(e) = result {
            tracing::warn!(url, error = %e, "Failed to cache template");
        }
    }

    pub fn remove(&self, url: &str) {
        if let Err(e) = self.store.remove(&Self::key_for(url)) {
            tracing::debug!(url, error = %e, "Failed to remove template cache entry");
        }
    }

    /// Remove every template entry; other keys in the store are untouched
    pub fn clear(&self) -> usize {
        let keys = match self.store.keys() {
            Ok(keys) => keys,
            Err(e) => {
                tracing::debug!(error = %e, "Template storage unavailable");
                return 0;
            }
        };
        keys.iter()
            .filter(|key| key.starts_with(TEMPLATE_KEY_PREFIX))
            .filter(|key| self.store.remove(key).is_ok())
            .count()
    }
}
