//! Status classification
//!
//! Maps HTTP status codes to user-facing messages and turns non-2xx responses
//! into [`RequestError`]s of kind `HttpStatus`.

use crate::http::{Method, RequestError, TransportResponse};

/// Static status → message table
const STATUS_MESSAGES: &[(u16, &str)] = &[
    (400, "bad request"),
    (401, "unauthorized, please sign in again"),
    (403, "access denied"),
    (404, "requested resource not found"),
    (500, "internal server error"),
    (502, "bad gateway"),
    (503, "service unavailable"),
    (504, "gateway timeout"),
];

/// Message for a status, if the table has one
pub fn message_for(status: u16) -> Option<&'static str> {
    STATUS_MESSAGES
        .iter()
        .find(|(code, _)| *code == status)
        .map(|(_, message)| *message)
}

/// Human-readable message for any non-success status
pub fn describe(status: u16, status_text: &str) -> String {
    match message_for(status) {
        Some(message) => message.to_string(),
        None => format!("request failed: {}", status_text),
    }
}

/// Pass 2xx responses through unchanged; classify everything else
pub fn assert_success(
    response: TransportResponse,
    method: Method,
    url: &str,
) -> Result<TransportResponse, RequestError> {
    if response.ok() {
        return Ok(response);
    }

    let error = RequestError::http_status(
        response.status,
        response.status_text.clone(),
        describe(response.status, &response.status_text),
    )
    .with_url(url)
    .with_method(method);

    tracing::error!(
        status = response.status,
        status_text = %response.status_text,
        method = %method,
        url = %url,
        timestamp = %error.timestamp,
        message = %error.message,
        "Request returned non-success status"
    );

    Err(error)
}

/// `true` iff the `content-type` header contains `application/json`
pub fn is_json(response: &TransportResponse) -> bool {
    response
        .header("content-type")
        .map(|ct| ct.to_ascii_lowercase().contains("application/json"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ErrorKind;

    #[test]
    fn test_success_is_identity() {
        for status in [200u16, 201, 204, 299] {
            let response = TransportResponse::new(status, "body").with_header("x-a", "1");
            let passed = assert_success(response.clone(), Method::Get, "https://x.test").unwrap();
            assert_eq!(passed, response);
        }
    }

    #[test]
    fn test_table_message() {
        let response = TransportResponse::new(404, "");
        let err = assert_success(response, Method::Get, "https://x.test/a").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HttpStatus);
        assert_eq!(err.status_code, Some(404));
        assert_eq!(err.status_text.as_deref(), Some("Not Found"));
        assert_eq!(err.message, "requested resource not found");
        assert_eq!(err.url.as_deref(), Some("https://x.test/a"));
        assert_eq!(err.method, Some(Method::Get));
    }

    #[test]
    fn test_fallback_message() {
        let response = TransportResponse::new(418, "");
        let err = assert_success(response, Method::Post, "https://x.test").unwrap_err();
        assert_eq!(err.status_code, Some(418));
        assert_eq!(err.message, "request failed: I'm a teapot");
    }

    #[test]
    fn test_redirect_is_not_success() {
        let response = TransportResponse::new(304, "");
        assert!(assert_success(response, Method::Get, "https://x.test").is_err());
    }

    #[test]
    fn test_is_json() {
        let json = TransportResponse::new(200, "{}").with_header("Content-Type", "Application/JSON; charset=utf-8");
        let text = TransportResponse::new(200, "{}").with_header("content-type", "text/html");
        let none = TransportResponse::new(200, "{}");
        assert!(is_json(&json));
        assert!(!is_json(&text));
        assert!(!is_json(&none));
    }

    #[test]
    fn test_table_is_complete() {
        for code in [400, 401, 403, 404, 500, 502, 503, 504] {
            assert!(message_for(code).is_some(), "missing message for {}", code);
        }
        assert!(message_for(409).is_none());
    }
}
