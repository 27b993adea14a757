//! Single-request executor
//!
//! Orchestrates one request through its lifecycle:
//!
//! 1. merge default headers, auth headers and caller headers (caller wins)
//! 2. run request interceptors
//! 3. race the transport against the timeout (and an optional cancel token)
//! 4. run response interceptors and classify the status
//! 5. extract a JSON or text payload according to `content-type`
//!
//! Every error path is logged and handed to `on_error` hooks, then returned
//! unchanged apart from URL/method annotation.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::AuthHandler;
use crate::http::interceptor::{run_error_hooks, run_request_hooks, run_response_hooks};
use crate::http::request::{merge_headers, CONTENT_TYPE_JSON};
use crate::http::timeout::{with_cancellation, with_timeout};
use crate::http::{
    status, Interceptor, LoggingInterceptor, Payload, RequestConfig, RequestContext, RequestError,
    Transport, TransportResponse,
};

/// Executes individual requests over a [`Transport`]
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    auth: Option<Arc<dyn AuthHandler>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    default_headers: HashMap<String, String>,
}

impl RequestExecutor {
    /// Create an executor with the logging interceptor installed
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            auth: None,
            interceptors: vec![Arc::new(LoggingInterceptor)],
            default_headers: HashMap::from([("Content-Type".to_string(), CONTENT_TYPE_JSON.to_string())]),
        }
    }

    /// Attach auth headers from `auth` to every request
    pub fn with_auth(mut self, auth: Arc<dyn AuthHandler>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Append an interceptor; hooks run in registration order
    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Send a request and return its payload
    pub async fn send(&self, config: RequestConfig) -> Result<Payload, RequestError> {
        self.execute(config, None).await
    }

    /// Like [`send`](Self::send), but `token` can abort the request
    pub async fn send_with_cancel(
        &self,
        config: RequestConfig,
        token: &CancellationToken,
    ) -> Result<Payload, RequestError> {
        self.execute(config, Some(token)).await
    }

    fn prepare(&self, config: RequestConfig) -> RequestConfig {
        let auth_headers = self
            .auth
            .as_ref()
            .map(|auth| auth.auth_headers(config.token.as_deref()))
            .unwrap_or_default();
        let base = merge_headers(&self.default_headers, &auth_headers);
        let headers = merge_headers(&base, &config.headers);
        RequestConfig { headers, ..config }
    }

    async fn execute(
        &self,
        config: RequestConfig,
        cancel: Option<&CancellationToken>,
    ) -> Result<Payload, RequestError> {
        let request = self.prepare(config);
        let mut ctx = RequestContext::new(&request);

        run_request_hooks(&self.interceptors, &mut ctx, &request);

        let result = self.race(&request, cancel).await.and_then(|response| {
            run_response_hooks(&self.interceptors, &ctx, &response);
            let response = status::assert_success(response, request.method, &request.url)?;
            extract_payload(response)
        });

        result.map_err(|error| {
            let error = annotate(error, &request);
            run_error_hooks(&self.interceptors, &ctx, &error);
            tracing::error!(
                request_id = %ctx.request_id,
                url = %request.url,
                method = %request.method,
                kind = %error.kind(),
                error = %error.message,
                timestamp = %error.timestamp,
                "Request failed"
            );
            error
        })
    }

    async fn race(
        &self,
        request: &RequestConfig,
        cancel: Option<&CancellationToken>,
    ) -> Result<TransportResponse, RequestError> {
        let network = with_timeout(self.transport.execute(request), request.timeout);
        match cancel {
            Some(token) => with_cancellation(network, token).await,
            None => network.await,
        }
    }
}

fn annotate(mut error: RequestError, request: &RequestConfig) -> RequestError {
    if error.url.is_none() {
        error.url = Some(request.url.clone());
    }
    if error.method.is_none() {
        error.method = Some(request.method);
    }
    error
}

/// JSON when the response declares it, text otherwise
pub fn extract_payload(response: TransportResponse) -> Result<Payload, RequestError> {
    // 204 carries no body whatever content-type the server claims
    if response.status == 204 {
        return Ok(Payload::Text(String::new()));
    }
    if status::is_json(&response) {
        serde_json::from_str(&response.body)
            .map(Payload::Json)
            .map_err(RequestError::parse)
    } else {
        Ok(Payload::Text(response.body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{ErrorKind, Method, MockResponse, MockTransport};
    use serde_json::json;
    use std::time::Duration;

    struct StaticAuth(&'static str);

    impl AuthHandler for StaticAuth {
        fn auth_headers(&self, explicit: Option<&str>) -> HashMap<String, String> {
            let token = explicit.unwrap_or(self.0);
            HashMap::from([("X-Token".to_string(), token.to_string())])
        }
    }

    fn executor(mock: &MockTransport) -> RequestExecutor {
        RequestExecutor::new(Arc::new(mock.clone()))
    }

    #[tokio::test]
    async fn test_json_payload() {
        let mock = MockTransport::new();
        mock.add_response(Method::Get, "https://x.test/items", MockResponse::json(200, json!({"items": [1, 2]})));

        let payload = executor(&mock)
            .send(RequestConfig::new(Method::Get, "https://x.test/items"))
            .await
            .unwrap();
        assert_eq!(payload, Payload::Json(json!({"items": [1, 2]})));
    }

    #[tokio::test]
    async fn test_text_payload() {
        let mock = MockTransport::new();
        mock.add_response(Method::Get, "https://x.test/readme", MockResponse::text(200, "# hello"));

        let payload = executor(&mock)
            .send(RequestConfig::new(Method::Get, "https://x.test/readme"))
            .await
            .unwrap();
        assert_eq!(payload.as_text(), Some("# hello"));
    }

    #[tokio::test]
    async fn test_default_and_auth_headers() {
        let mock = MockTransport::new();
        mock.add_response(Method::Post, "https://x.test/a", MockResponse::json(201, json!({})));
        let exec = executor(&mock).with_auth(Arc::new(StaticAuth("stored")));

        exec.send(RequestConfig::new(Method::Post, "https://x.test/a").header("X-Extra", "1"))
            .await
            .unwrap();

        let call = &mock.calls()[0];
        assert_eq!(call.header("content-type"), Some("application/json"));
        assert_eq!(call.header("x-token"), Some("stored"));
        assert_eq!(call.header("x-extra"), Some("1"));
    }

    #[tokio::test]
    async fn test_caller_token_header_wins() {
        let mock = MockTransport::new();
        mock.add_response(Method::Get, "https://x.test/a", MockResponse::json(200, json!({})));
        let exec = executor(&mock).with_auth(Arc::new(StaticAuth("stored")));

        exec.send(RequestConfig::new(Method::Get, "https://x.test/a").header("x-token", "mine"))
            .await
            .unwrap();

        let call = &mock.calls()[0];
        assert_eq!(call.headers.len(), 2);
        assert_eq!(call.header("X-Token"), Some("mine"));
    }

    #[tokio::test]
    async fn test_status_error_is_annotated() {
        let mock = MockTransport::new();
        mock.add_response(Method::Delete, "https://x.test/a/1", MockResponse::json(403, json!({"error": "no"})));

        let err = executor(&mock)
            .send(RequestConfig::new(Method::Delete, "https://x.test/a/1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HttpStatus);
        assert_eq!(err.status_code, Some(403));
        assert_eq!(err.message, "access denied");
        assert_eq!(err.url.as_deref(), Some("https://x.test/a/1"));
        assert_eq!(err.method, Some(Method::Delete));
    }

    #[tokio::test]
    async fn test_malformed_json_is_parse_error() {
        let mock = MockTransport::new();
        let broken = TransportResponse::new(200, "{\"a\": ").with_header("content-type", "application/json");
        mock.add_response(Method::Get, "https://x.test/broken", MockResponse::from_response(broken));

        let err = executor(&mock)
            .send(RequestConfig::new(Method::Get, "https://x.test/broken"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[tokio::test]
    async fn test_no_content() {
        let mock = MockTransport::new();
        let empty = TransportResponse::new(204, "").with_header("content-type", "application/json");
        mock.add_response(Method::Delete, "https://x.test/a/2", MockResponse::from_response(empty));

        let payload = executor(&mock)
            .send(RequestConfig::new(Method::Delete, "https://x.test/a/2"))
            .await
            .unwrap();
        assert_eq!(payload, Payload::Text(String::new()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_wins_and_drops_network_call() {
        let mock = MockTransport::new();
        mock.add_response(
            Method::Get,
            "https://x.test/slow",
            MockResponse::json(200, json!({"late": true})).with_delay(Duration::from_millis(101)),
        );

        let err = executor(&mock)
            .send(RequestConfig::new(Method::Get, "https://x.test/slow").timeout(Duration::from_millis(100)))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.message, "request timed out: 100ms");
        assert_eq!(err.url.as_deref(), Some("https://x.test/slow"));
        assert_eq!(mock.in_flight_count(), 0);
        assert_eq!(mock.completed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_token_aborts_request() {
        let mock = MockTransport::new();
        mock.add_response(
            Method::Get,
            "https://x.test/slow",
            MockResponse::json(200, json!({})).with_delay(Duration::from_secs(30)),
        );
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = executor(&mock)
            .send_with_cancel(RequestConfig::new(Method::Get, "https://x.test/slow"), &token)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(mock.completed_count(), 0);
    }

    #[tokio::test]
    async fn test_network_error_propagates() {
        let mock = MockTransport::new();
        mock.add_response(Method::Get, "https://x.test/down", MockResponse::network_error("connection refused"));

        let err = executor(&mock)
            .send(RequestConfig::new(Method::Get, "https://x.test/down"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(err.message, "connection refused");
    }
}
