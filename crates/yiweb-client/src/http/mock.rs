//! Scriptable transport for tests
//!
//! Responses are registered per `"{METHOD} {url}"` key and consumed in FIFO
//! order. Each response may carry a delay (honouring a paused tokio clock) so
//! timeout races can be driven deterministically.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::http::{ErrorKind, Method, RequestBody, RequestConfig, RequestError, Transport, TransportResponse};

/// A scripted outcome
#[derive(Debug, Clone)]
pub struct MockResponse {
    outcome: Result<TransportResponse, RequestError>,
    delay: Duration,
}

impl MockResponse {
    /// JSON body with `content-type: application/json`
    pub fn json(status: u16, body: Value) -> Self {
        Self::from_response(
            TransportResponse::new(status, body.to_string())
                .with_header("content-type", "application/json; charset=utf-8"),
        )
    }

    /// Plain text body
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::from_response(
            TransportResponse::new(status, body).with_header("content-type", "text/plain"),
        )
    }

    pub fn from_response(response: TransportResponse) -> Self {
        Self {
            outcome: Ok(response),
            delay: Duration::ZERO,
        }
    }

    /// Transport-level failure
    pub fn network_error(message: &str) -> Self {
        Self {
            outcome: Err(RequestError::new(ErrorKind::Network, message)),
            delay: Duration::ZERO,
        }
    }

    /// Complete only after `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Record of a call made to the mock transport
#[derive(Debug, Clone)]
pub struct MockCall {
    pub method: Method,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl MockCall {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Mock transport; cheap to clone, clones share state
#[derive(Clone, Default)]
pub struct MockTransport {
    responses: Arc<Mutex<HashMap<String, VecDeque<MockResponse>>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    in_flight: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `method url`
    pub fn add_response(&self, method: Method, url: &str, response: MockResponse) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key(method, url))
            .or_default()
            .push_back(response);
    }

    /// All calls made so far
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Requests currently executing; drops back when a caller abandons one
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Requests that ran to completion (were not dropped mid-flight)
    pub fn completed_count(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

fn key(method: Method, url: &str) -> String {
    format!("{} {}", method, url)
}

struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: &RequestConfig) -> Result<TransportResponse, RequestError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlightGuard {
            in_flight: self.in_flight.clone(),
        };

        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(MockCall {
                method: request.method,
                url: request.url.clone(),
                headers: request.headers.clone(),
                body: request.body.as_ref().map(|b| match b {
                    RequestBody::Text(s) => s.clone(),
                    RequestBody::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
                }),
            });

        let scripted = self
            .responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&key(request.method, &request.url))
            .and_then(|queue| queue.pop_front());

        let Some(scripted) = scripted else {
            return Err(RequestError::new(
                ErrorKind::Network,
                format!("No mock response configured for {} {}", request.method, request.url),
            ));
        };

        if !scripted.delay.is_zero() {
            tokio::time::sleep(scripted.delay).await;
        }

        self.completed.fetch_add(1, Ordering::SeqCst);
        scripted.outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_responses_are_fifo() {
        let mock = MockTransport::new();
        mock.add_response(Method::Get, "https://x.test/s", MockResponse::text(200, "first"));
        mock.add_response(Method::Get, "https://x.test/s", MockResponse::text(200, "second"));

        let request = RequestConfig::new(Method::Get, "https://x.test/s");
        assert_eq!(mock.execute(&request).await.unwrap().body, "first");
        assert_eq!(mock.execute(&request).await.unwrap().body, "second");
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_without_response_fails() {
        let mock = MockTransport::new();
        let request = RequestConfig::new(Method::Post, "https://x.test/none");
        let err = mock.execute(&request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_future_releases_in_flight() {
        let mock = MockTransport::new();
        mock.add_response(
            Method::Get,
            "https://x.test/slow",
            MockResponse::json(200, json!({})).with_delay(Duration::from_secs(10)),
        );

        let request = RequestConfig::new(Method::Get, "https://x.test/slow");
        let result = tokio::time::timeout(Duration::from_secs(1), mock.execute(&request)).await;

        assert!(result.is_err());
        assert_eq!(mock.in_flight_count(), 0);
        assert_eq!(mock.completed_count(), 0);
    }
}
