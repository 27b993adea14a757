//! Request/response interception hooks
//!
//! Interceptors are observability-only. A failing hook is logged at `warn`
//! and ignored; it never blocks or alters the request flow.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::time::Instant;

use crate::http::{Method, RequestBody, RequestConfig, RequestError, TransportResponse};
use crate::logging::redaction;

/// Per-request context shared by all hooks of one `send`
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id for log lines of this request
    pub request_id: String,
    pub method: Method,
    pub url: String,
    /// Wall-clock time stamped before the request left
    pub timestamp: DateTime<Utc>,
    /// Monotonic start, used for elapsed durations
    pub started: Instant,
    /// Free-form annotations set by interceptors
    pub annotations: HashMap<String, String>,
}

impl RequestContext {
    pub fn new(config: &RequestConfig) -> Self {
        Self {
            request_id: crate::logging::generate_request_id(),
            method: config.method,
            url: config.url.clone(),
            timestamp: Utc::now(),
            started: Instant::now(),
            annotations: HashMap::new(),
        }
    }

    pub fn timestamp_iso(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Hook points around a single request
pub trait Interceptor: Send + Sync {
    /// Called before the network/timeout race starts
    fn on_request(&self, _ctx: &mut RequestContext, _request: &RequestConfig) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called when the transport produced a response, before classification
    fn on_response(&self, _ctx: &RequestContext, _response: &TransportResponse) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called on every error path, just before the error is returned
    fn on_error(&self, _ctx: &RequestContext, _error: &RequestError) {}
}

/// Default interceptor: stamps the request and logs start, completion and failure
#[derive(Debug, Default, Clone)]
pub struct LoggingInterceptor;

impl Interceptor for LoggingInterceptor {
    fn on_request(&self, ctx: &mut RequestContext, request: &RequestConfig) -> anyhow::Result<()> {
        ctx.timestamp = Utc::now();
        let headers = redaction::redact_headers(&request.headers);
        tracing::debug!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            url = %ctx.url,
            timestamp = %ctx.timestamp_iso(),
            headers = ?headers,
            "Sending request"
        );
        if let Some(body) = &request.body {
            tracing::trace!(request_id = %ctx.request_id, body = %loggable_body(body), "Request body");
        }
        Ok(())
    }

    fn on_response(&self, ctx: &RequestContext, response: &TransportResponse) -> anyhow::Result<()> {
        tracing::info!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            url = %ctx.url,
            status = response.status,
            duration_ms = ctx.elapsed().as_millis() as u64,
            response_len = response.body.len(),
            "Request completed"
        );
        Ok(())
    }

    fn on_error(&self, ctx: &RequestContext, error: &RequestError) {
        tracing::debug!(
            request_id = %ctx.request_id,
            kind = %error.kind(),
            error = %redaction::redact_sensitive(&error.message),
            duration_ms = ctx.elapsed().as_millis() as u64,
            "Request failed"
        );
    }
}

/// Body text safe to log: JSON credential fields and inline secrets are masked
pub fn loggable_body(body: &RequestBody) -> String {
    match body {
        RequestBody::Text(text) => match serde_json::from_str::<serde_json::Value>(text) {
            Ok(mut value) => {
                redaction::redact_json_value(&mut value);
                value.to_string()
            }
            Err(_) => redaction::redact_sensitive(text),
        },
        RequestBody::Binary(bytes) => format!("<{} bytes>", bytes.len()),
    }
}

/// Run `on_request` on every interceptor, swallowing failures
pub(crate) fn run_request_hooks(
    interceptors: &[Arc<dyn Interceptor>],
    ctx: &mut RequestContext,
    request: &RequestConfig,
) {
    for interceptor in interceptors {
        if let Err(e) = interceptor.on_request(ctx, request) {
            tracing::warn!(request_id = %ctx.request_id, error = %e, "Request interceptor failed, ignoring");
        }
    }
}

/// Run `on_response` on every interceptor, swallowing failures
pub(crate) fn run_response_hooks(
    interceptors: &[Arc<dyn Interceptor>],
    ctx: &RequestContext,
    response: &TransportResponse,
) {
    for interceptor in interceptors {
        if let Err(e) = interceptor.on_response(ctx, response) {
            tracing::warn!(request_id = %ctx.request_id, error = %e, "Response interceptor failed, ignoring");
        }
    }
}

pub(crate) fn run_error_hooks(interceptors: &[Arc<dyn Interceptor>], ctx: &RequestContext, error: &RequestError) {
    for interceptor in interceptors {
        interceptor.on_error(ctx, error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Failing;

    impl Interceptor for Failing {
        fn on_request(&self, _ctx: &mut RequestContext, _request: &RequestConfig) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }

        fn on_response(&self, _ctx: &RequestContext, _response: &TransportResponse) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    #[derive(Default)]
    struct Counting {
        requests: AtomicUsize,
    }

    impl Interceptor for Counting {
        fn on_request(&self, ctx: &mut RequestContext, _request: &RequestConfig) -> anyhow::Result<()> {
            ctx.annotations.insert("seen".into(), "yes".into());
            self.requests.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_failing_hook_does_not_stop_the_chain() {
        let counting = Arc::new(Counting::default());
        let interceptors: Vec<Arc<dyn Interceptor>> = vec![Arc::new(Failing), counting.clone()];
        let request = RequestConfig::new(Method::Get, "https://x.test");
        let mut ctx = RequestContext::new(&request);

        run_request_hooks(&interceptors, &mut ctx, &request);
        run_response_hooks(&interceptors, &ctx, &TransportResponse::new(200, ""));

        assert_eq!(counting.requests.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.annotations.get("seen").map(String::as_str), Some("yes"));
    }

    #[test]
    fn test_logging_interceptor_stamps_timestamp() {
        let request = RequestConfig::new(Method::Post, "https://x.test").header("X-Token", "secret-token-value");
        let mut ctx = RequestContext::new(&request);
        let before = ctx.timestamp;
        LoggingInterceptor.on_request(&mut ctx, &request).unwrap();
        assert!(ctx.timestamp >= before);
        assert!(ctx.request_id.starts_with("req_"));
    }

    #[test]
    fn test_loggable_body_masks_credentials() {
        let json = RequestBody::json(&serde_json::json!({
            "name": "site",
            "password": "hunter22",
            "nested": {"api_key": "abcdef123"}
        }));
        let logged = loggable_body(&json);
        assert!(logged.contains("\"name\":\"site\""));
        assert!(!logged.contains("hunter22"));
        assert!(!logged.contains("abcdef123"));

        let form = RequestBody::Text("user=ann&password=hunter22".to_string());
        assert!(!loggable_body(&form).contains("hunter22"));

        assert_eq!(loggable_body(&RequestBody::Binary(vec![0; 4])), "<4 bytes>");
    }
}
