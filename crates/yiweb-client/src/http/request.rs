//! Request configuration and payload types
//!
//! A [`RequestConfig`] is built fresh for every call by merging
//! [`RequestDefaults`] with the caller's [`RequestOptions`]; caller values win.
//! Once handed to the executor it is never mutated.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::RequestError;
use crate::loading::LoadingOptions;

/// Default per-request timeout (five minutes)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(300_000);

/// Header set on every request unless the caller overrides it
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Supported HTTP methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Whether the verb carries a request body
    pub fn has_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            other => Err(format!("Unsupported HTTP method: {}", other)),
        }
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Request body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Text(String),
    Binary(Vec<u8>),
}

impl RequestBody {
    /// Serialize a JSON value into a text body
    pub fn json(value: &Value) -> Self {
        RequestBody::Text(value.to_string())
    }

    pub fn len(&self) -> usize {
        match self {
            RequestBody::Text(s) => s.len(),
            RequestBody::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-call options recognised by the executor and the CRUD facade
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Extra headers; these win over defaults on conflict
    pub headers: HashMap<String, String>,
    /// Timeout override
    pub timeout: Option<Duration>,
    /// Explicit auth token; wins over the stored token
    pub token: Option<String>,
    /// Serve GET requests from the response cache when possible
    pub use_cache: bool,
    /// TTL for entries written by this call
    pub cache_ttl: Option<Duration>,
    /// Wrap the call in the loading coordinator
    pub loading: Option<LoadingOptions>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn cached(mut self, ttl: Option<Duration>) -> Self {
        self.use_cache = true;
        self.cache_ttl = ttl;
        self
    }

    pub fn with_loading(mut self, loading: LoadingOptions) -> Self {
        self.loading = Some(loading);
        self
    }
}

/// Defaults every request starts from
#[derive(Debug, Clone)]
pub struct RequestDefaults {
    pub headers: HashMap<String, String>,
    pub timeout: Duration,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            headers: HashMap::from([("Content-Type".to_string(), CONTENT_TYPE_JSON.to_string())]),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl RequestDefaults {
    /// Build a request config for `method url`, applying caller overrides
    pub fn build(
        &self,
        method: Method,
        url: impl Into<String>,
        body: Option<RequestBody>,
        options: &RequestOptions,
    ) -> RequestConfig {
        RequestConfig {
            url: url.into(),
            method,
            headers: merge_headers(&self.headers, &options.headers),
            body,
            timeout: options.timeout.unwrap_or(self.timeout),
            token: options.token.clone(),
        }
    }
}

/// Fully resolved request handed to the executor
#[derive(Debug, Clone, PartialEq)]
pub struct RequestConfig {
    pub url: String,
    pub method: Method,
    pub headers: HashMap<String, String>,
    pub body: Option<RequestBody>,
    pub timeout: Duration,
    /// Explicit auth token for this request
    pub token: Option<String>,
}

impl RequestConfig {
    /// A bare request with no headers and the default timeout
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            headers: HashMap::new(),
            body: None,
            timeout: DEFAULT_TIMEOUT,
            token: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn json_body(mut self, value: &Value) -> Self {
        self.body = Some(RequestBody::json(value));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Case-insensitive header lookup
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Merge two header maps; names compare case-insensitively and `overrides` win
pub fn merge_headers(
    defaults: &HashMap<String, String>,
    overrides: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut merged: HashMap<String, String> = defaults
        .iter()
        .filter(|(name, _)| !overrides.keys().any(|o| o.eq_ignore_ascii_case(name)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Response payload, chosen by the response content type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Json(Value),
    Text(String),
}

impl Payload {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(v) => Some(v),
            Payload::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            Payload::Json(_) => None,
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            Payload::Json(v) => Some(v),
            Payload::Text(_) => None,
        }
    }

    /// Deserialize a JSON payload into a typed value
    pub fn deserialize<T: DeserializeOwned>(self) -> Result<T, RequestError> {
        match self {
            Payload::Json(v) => serde_json::from_value(v).map_err(RequestError::parse),
            Payload::Text(s) => serde_json::from_str(&s).map_err(RequestError::parse),
        }
    }
}
