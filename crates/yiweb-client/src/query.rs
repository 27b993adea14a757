//! Query string codec
//!
//! Builds and parses `application/x-www-form-urlencoded` query strings.
//! Array values repeat their key once per element; on the way back, repeated
//! keys collapse into a list in encounter order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::{form_urlencoded, Url};

/// A single query parameter value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Omitted when encoding
    Null,
    Scalar(String),
    List(Vec<String>),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            ParamValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Stringify a JSON value the way a browser would put it in a URL
    fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => ParamValue::Null,
            Value::Array(items) => ParamValue::List(items.iter().filter_map(scalar_text).collect()),
            other => scalar_text(other).map(ParamValue::Scalar).unwrap_or(ParamValue::Null),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            ParamValue::Null => Value::Null,
            ParamValue::Scalar(s) => Value::String(s.clone()),
            ParamValue::List(items) => Value::Array(items.iter().cloned().map(Value::String).collect()),
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Scalar(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Scalar(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Scalar(value.to_string())
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::Scalar(value.to_string())
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Scalar(value.to_string())
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Scalar(value.to_string())
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(ParamValue::Null)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(value: Vec<String>) -> Self {
        ParamValue::List(value)
    }
}

impl From<Vec<&str>> for ParamValue {
    fn from(value: Vec<&str>) -> Self {
        ParamValue::List(value.into_iter().map(str::to_string).collect())
    }
}

/// Insertion-ordered query parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParams {
    entries: Vec<(String, ParamValue)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, replacing an existing value in place
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Build from a JSON object; non-objects yield `None`
    pub fn from_json(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        Some(
            object
                .iter()
                .map(|(k, v)| (k.clone(), ParamValue::from_json(v)))
                .collect(),
        )
    }

    /// JSON object view, used for cache fingerprints
    pub fn to_json(&self) -> Value {
        Value::Object(self.entries.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
    }

    fn push_occurrence(&mut self, key: String, value: String) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => {
                *existing = match std::mem::replace(existing, ParamValue::Null) {
                    ParamValue::Scalar(first) => ParamValue::List(vec![first, value]),
                    ParamValue::List(mut items) => {
                        items.push(value);
                        ParamValue::List(items)
                    }
                    ParamValue::Null => ParamValue::Scalar(value),
                }
            }
            None => self.entries.push((key, ParamValue::Scalar(value))),
        }
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = QueryParams::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

/// Encode `params` as a query string (without the leading `?`)
pub fn encode(params: &QueryParams) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in params.iter() {
        match value {
            ParamValue::Null => {}
            ParamValue::Scalar(v) => {
                serializer.append_pair(key, v);
            }
            ParamValue::List(items) => {
                for item in items {
                    serializer.append_pair(key, item);
                }
            }
        }
    }
    serializer.finish()
}

/// Parse the query of a full URL, a relative path or a bare query string
///
/// Never fails: an unparseable URL logs a warning and yields no parameters.
pub fn decode(input: &str) -> QueryParams {
    let Some(query) = extract_query(input) else {
        return QueryParams::new();
    };

    let mut params = QueryParams::new();
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        params.push_occurrence(key.into_owned(), value.into_owned());
    }
    params
}

fn extract_query(input: &str) -> Option<String> {
    match Url::parse(input) {
        Ok(url) => Some(url.query().unwrap_or_default().to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let without_fragment = input.split('#').next().unwrap_or_default();
            match without_fragment.split_once('?') {
                Some((_, query)) => Some(query.to_string()),
                // "a=1&b=2" is a bare query, "/items" is a path with none
                None if without_fragment.contains('/') => Some(String::new()),
                None => Some(without_fragment.to_string()),
            }
        }
        Err(e) => {
            tracing::warn!(url = %input, error = %e, "Failed to parse URL query");
            None
        }
    }
}

/// Append encoded `params` to `url`, keeping any fragment at the end
pub fn append_query(url: &str, params: &QueryParams) -> String {
    let encoded = encode(params);
    if encoded.is_empty() {
        return url.to_string();
    }

    let (base, fragment) = match url.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (url, None),
    };
    let separator = if !base.contains('?') {
        "?"
    } else if base.ends_with('?') || base.ends_with('&') {
        ""
    } else {
        "&"
    };

    let mut out = format!("{}{}{}", base, separator, encoded);
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}
