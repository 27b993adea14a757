//! TTL response cache
//!
//! Maps a request fingerprint to a payload. Entries expire lazily: an expired
//! entry is treated as absent and deleted by the lookup that finds it. There
//! is no background sweeper; [`ResponseCache::purge_expired`] is explicit.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use url::{form_urlencoded, Url};

use crate::http::{Method, Payload};

/// A cached payload with its lifetime
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Payload,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    /// Valid while `now - created_at < ttl`
    pub fn is_valid_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) < self.ttl
    }
}

/// In-memory fingerprint → payload cache
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    // Critical sections are short and never hold across an await, so a
    // poisoned lock still guards consistent data.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The cached payload, if present and not expired
    pub fn get(&self, key: &str) -> Option<Payload> {
        let mut entries = self.lock();
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.is_valid_at(now) => Some(entry.payload.clone()),
            Some(_) => {
                entries.remove(key);
                tracing::debug!(key, "Cache entry expired");
                None
            }
            None => None,
        }
    }

    /// Store `payload` under `key`, replacing any existing entry
    pub fn set(&self, key: impl Into<String>, payload: Payload, ttl: Duration) {
        let key = key.into();
        let entry = CacheEntry {
            key: key.clone(),
            payload,
            created_at: Instant::now(),
            ttl,
        };
        self.lock().insert(key, entry);
    }

    pub fn remove(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut entries = self.lock();
        let count = entries.len();
        entries.clear();
        tracing::debug!(count, "Cache cleared");
    }

    /// Number of stored entries, expired ones included until evicted
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every expired entry; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.lock();
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_valid_at(now));
        before - entries.len()
    }
}

/// Deterministic request fingerprint: `METHOD normalized_url canonical_params`
///
/// Equal requests map to the same key regardless of object key order, query
/// parameter order, host case, default ports or fragments.
pub fn fingerprint(method: Method, url: &str, params: Option<&Value>) -> String {
    let url = normalize_url(url);
    match params {
        Some(params) => format!("{} {} {}", method, url, canonical_json(params)),
        None => format!("{} {}", method, url),
    }
}

fn normalize_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw.trim()) else {
        // relative URLs are kept verbatim minus the fragment
        return raw.trim().split('#').next().unwrap_or_default().to_string();
    };
    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        // stable: repeated keys keep their relative order
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        url.set_query(Some(&query));
    }
    url.to_string()
}

/// JSON text with object keys sorted at every depth
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
