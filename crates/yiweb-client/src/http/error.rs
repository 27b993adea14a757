//! Request error taxonomy
//!
//! Every failure surfaced by the executor, the CRUD facade and the loading
//! coordinator is a [`RequestError`] tagged with an [`ErrorKind`]. Callers show
//! `message` to users and branch on `kind` / `status_code`.

use std::fmt;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::http::Method;

/// Classification of request failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Bad caller input; the network was never touched
    Validation,
    /// The timeout timer won the race against the network call
    Timeout,
    /// The server answered with a non-2xx status
    HttpStatus,
    /// Transport-level failure (DNS, connection refused, reset)
    Network,
    /// Body declared as JSON could not be parsed
    Parse,
    /// The user aborted the operation
    Cancelled,
}

impl ErrorKind {
    /// Stable upper-case name, as used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::HttpStatus => "HTTP_STATUS",
            ErrorKind::Network => "NETWORK",
            ErrorKind::Parse => "PARSE",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured request failure
#[derive(Debug, Clone)]
pub struct RequestError {
    kind: ErrorKind,
    /// Human-readable error message
    pub message: String,
    /// HTTP status code if the server answered
    pub status_code: Option<u16>,
    /// HTTP reason phrase if the server answered
    pub status_text: Option<String>,
    /// Request URL, when known
    pub url: Option<String>,
    /// Request method, when known
    pub method: Option<Method>,
    /// RFC 3339 timestamp of when the error was created
    pub timestamp: String,
    /// Failing field for validation errors
    pub field: Option<String>,
    /// Failing rule for validation errors
    pub rule: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl RequestError {
    /// Create an error of the given kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            status_text: None,
            url: None,
            method: None,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            field: None,
            rule: None,
            source: None,
        }
    }

    /// Validation failure naming the first failing field and rule
    pub fn validation(field: impl Into<String>, rule: impl Into<String>) -> Self {
        let field = field.into();
        let rule = rule.into();
        let mut err = Self::new(
            ErrorKind::Validation,
            format!("validation failed: field '{}' violates rule '{}'", field, rule),
        );
        err.field = Some(field);
        err.rule = Some(rule);
        err
    }

    /// The timeout timer fired first
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::new(ErrorKind::Timeout, format!("request timed out: {}ms", timeout_ms))
    }

    /// User-initiated abort
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "cancelled by user")
    }

    /// Non-2xx response
    pub fn http_status(status: u16, status_text: impl Into<String>, message: impl Into<String>) -> Self {
        let mut err = Self::new(ErrorKind::HttpStatus, message);
        err.status_code = Some(status);
        err.status_text = Some(status_text.into());
        err
    }

    /// Transport-level failure
    pub fn network<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::new(ErrorKind::Network, source.to_string()).with_source(source)
    }

    /// Malformed JSON body; the parser's message is kept verbatim
    pub fn parse(source: serde_json::Error) -> Self {
        Self::new(ErrorKind::Parse, source.to_string()).with_source(source)
    }

    /// Attach the request URL
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Attach the request method
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Attach the underlying cause
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    /// Get the error classification
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Whether re-attempting the same request might succeed
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ErrorKind::Timeout | ErrorKind::Network => true,
            ErrorKind::HttpStatus => matches!(self.status_code, Some(429) | Some(500..=599)),
            ErrorKind::Validation | ErrorKind::Parse | ErrorKind::Cancelled => false,
        }
    }

    /// 401 responses usually mean the stored token is stale
    pub fn is_unauthorized(&self) -> bool {
        self.status_code == Some(401)
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RequestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl PartialEq for RequestError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.message == other.message
            && self.status_code == other.status_code
            && self.url == other.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_retryable_kinds() {
        assert!(RequestError::timeout(10).is_retryable());
        assert!(RequestError::new(ErrorKind::Network, "refused").is_retryable());
        assert!(RequestError::http_status(503, "Service Unavailable", "x").is_retryable());
        assert!(RequestError::http_status(429, "Too Many Requests", "x").is_retryable());
        assert!(!RequestError::http_status(404, "Not Found", "x").is_retryable());
        assert!(!RequestError::validation("name", "required").is_retryable());
        assert!(!RequestError::cancelled().is_retryable());
    }

    #[test]
    fn test_validation_error_names_field_and_rule() {
        let err = RequestError::validation("email", "email");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.field.as_deref(), Some("email"));
        assert_eq!(err.rule.as_deref(), Some("email"));
        assert!(err.message.contains("'email'"));
    }

    #[test]
    fn test_parse_error_keeps_parser_message() {
        let json_err = serde_json::from_str::<serde_json::Value>("{\"a\":").unwrap_err();
        let expected = json_err.to_string();
        let err = RequestError::parse(json_err);
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert_eq!(err.message, expected);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_timestamp_is_rfc3339() {
        let err = RequestError::cancelled();
        assert!(chrono::DateTime::parse_from_rfc3339(&err.timestamp).is_ok());
        assert_eq!(err.to_string(), "cancelled by user");
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ErrorKind::HttpStatus.to_string(), "HTTP_STATUS");
        assert_eq!(
            serde_json::to_string(&ErrorKind::Cancelled).unwrap(),
            "\"CANCELLED\""
        );
    }
}
