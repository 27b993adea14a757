//! CRUD facade
//!
//! `get`/`create`/`update`/`patch`/`delete` on top of the request executor,
//! with pre-flight validation for writes, an optional response cache for
//! reads, and batch execution that collects partial failures instead of
//! failing fast.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde_json::Value;
use url::Url;

use crate::cache::{fingerprint, ResponseCache};
use crate::http::{
    ErrorKind, Method, Payload, RequestBody, RequestDefaults, RequestError, RequestExecutor, RequestOptions, RetryPolicy,
};
use crate::loading::LoadingCoordinator;
use crate::logging::timing::Timer;
use crate::query::{append_query, QueryParams};
use crate::validation::{ValidationRules, Validator};

/// Default TTL for cached GET responses
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// One operation of a [`CrudClient::batch`] call
#[derive(Debug, Clone)]
pub struct BatchOperation {
    pub kind: Method,
    pub url: String,
    /// Request body for writes; query parameters (as an object) for reads
    pub data: Option<Value>,
    pub options: RequestOptions,
    pub use_cache: bool,
    pub validation_rules: Option<ValidationRules>,
}

impl BatchOperation {
    pub fn new(kind: Method, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            data: None,
            options: RequestOptions::default(),
            use_cache: false,
            validation_rules: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn create(url: impl Into<String>, data: Value) -> Self {
        Self::new(Method::Post, url).with_data(data)
    }

    pub fn update(url: impl Into<String>, data: Value) -> Self {
        Self::new(Method::Put, url).with_data(data)
    }

    pub fn patch(url: impl Into<String>, data: Value) -> Self {
        Self::new(Method::Patch, url).with_data(data)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::Delete, url)
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_rules(mut self, rules: ValidationRules) -> Self {
        self.validation_rules = Some(rules);
        self
    }

    pub fn cached(mut self) -> Self {
        self.use_cache = true;
        self
    }
}

/// Settled outcome of one batch operation
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub operation: BatchOperation,
    pub outcome: Result<Payload, RequestError>,
}

/// Outcomes of a batch, in input order
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub results: Vec<BatchItem>,
    pub success_count: usize,
    pub error_count: usize,
}

impl BatchResult {
    fn new(results: Vec<BatchItem>) -> Self {
        let success_count = results.iter().filter(|item| item.outcome.is_ok()).count();
        Self {
            error_count: results.len() - success_count,
            success_count,
            results,
        }
    }

    pub fn is_all_ok(&self) -> bool {
        self.error_count == 0
    }

    pub fn errors(&self) -> impl Iterator<Item = (&BatchOperation, &RequestError)> {
        self.results
            .iter()
            .filter_map(|item| item.outcome.as_ref().err().map(|e| (&item.operation, e)))
    }

    pub fn payloads(&self) -> impl Iterator<Item = &Payload> {
        self.results.iter().filter_map(|item| item.outcome.as_ref().ok())
    }
}

/// CRUD operations over a [`RequestExecutor`]
#[derive(Clone)]
pub struct CrudClient {
    executor: RequestExecutor,
    defaults: RequestDefaults,
    cache: Arc<ResponseCache>,
    loading: Arc<LoadingCoordinator>,
    validator: Validator,
    retry: Option<RetryPolicy>,
    base_url: Option<Url>,
    cache_ttl: Duration,
    max_concurrency: Option<usize>,
}

impl CrudClient {
    pub fn new(executor: RequestExecutor) -> Self {
        Self {
            executor,
            defaults: RequestDefaults::default(),
            cache: Arc::new(ResponseCache::new()),
            loading: Arc::new(LoadingCoordinator::default()),
            validator: Validator::new(),
            retry: None,
            base_url: None,
            cache_ttl: DEFAULT_CACHE_TTL,
            max_concurrency: None,
        }
    }

    pub fn with_defaults(mut self, defaults: RequestDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_loading(mut self, loading: Arc<LoadingCoordinator>) -> Self {
        self.loading = loading;
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    /// Retry retryable failures of idempotent requests (GET, PUT, DELETE)
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Resolve relative URLs against `base`
    pub fn with_base_url(mut self, base: &str) -> Result<Self, crate::Error> {
        let base = Url::parse(base).map_err(|e| crate::Error::Configuration {
            message: format!("Invalid base URL '{}': {}", base, e),
            source: Some(anyhow::Error::new(e)),
        })?;
        self.base_url = Some(base);
        Ok(self)
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Bound concurrently running batch operations; `None` is unbounded
    pub fn with_max_concurrency(mut self, limit: Option<usize>) -> Self {
        self.max_concurrency = limit;
        self
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Absolute form of `url`
    pub fn resolve(&self, url: &str) -> String {
        match (&self.base_url, Url::parse(url)) {
            (_, Ok(absolute)) => absolute.to_string(),
            (Some(base), Err(url::ParseError::RelativeUrlWithoutBase)) => {
                base.join(url).map(|u| u.to_string()).unwrap_or_else(|_| url.to_string())
            }
            _ => url.to_string(),
        }
    }

    /// GET `url` with optional query parameters
    pub async fn get(
        &self,
        url: &str,
        params: Option<&QueryParams>,
        options: &RequestOptions,
    ) -> Result<Payload, RequestError> {
        let full_url = self.read_url(url, params);

        // keyed by the URL that goes on the wire, so equivalent params share an entry
        let cache_key = options.use_cache.then(|| fingerprint(Method::Get, &full_url, None));

        if let Some(key) = &cache_key {
            if let Some(payload) = self.cache.get(key) {
                tracing::debug!(url = %full_url, "Serving response from cache");
                return Ok(payload);
            }
        }

        let payload = self.dispatch(Method::Get, full_url, None, options).await?;

        if let Some(key) = cache_key {
            let ttl = options.cache_ttl.unwrap_or(self.cache_ttl);
            self.cache.set(key, payload.clone(), ttl);
        }
        Ok(payload)
    }

    /// POST `data` after validating it against `rules`
    pub async fn create(
        &self,
        url: &str,
        data: &Value,
        rules: Option<&ValidationRules>,
        options: &RequestOptions,
    ) -> Result<Payload, RequestError> {
        self.write(Method::Post, url, data, rules, options).await
    }

    /// PUT `data` after validating it against `rules`
    pub async fn update(
        &self,
        url: &str,
        data: &Value,
        rules: Option<&ValidationRules>,
        options: &RequestOptions,
    ) -> Result<Payload, RequestError> {
        self.write(Method::Put, url, data, rules, options).await
    }

    /// PATCH `data`; partial updates are not validated
    pub async fn patch(&self, url: &str, data: &Value, options: &RequestOptions) -> Result<Payload, RequestError> {
        self.write(Method::Patch, url, data, None, options).await
    }

    pub async fn delete(&self, url: &str, options: &RequestOptions) -> Result<Payload, RequestError> {
        self.dispatch(Method::Delete, self.resolve(url), None, options).await
    }

    async fn write(
        &self,
        method: Method,
        url: &str,
        data: &Value,
        rules: Option<&ValidationRules>,
        options: &RequestOptions,
    ) -> Result<Payload, RequestError> {
        let url = self.resolve(url);
        if let Some(rules) = rules {
            if let Err(failure) = self.validator.validate(data, rules) {
                tracing::warn!(
                    url = %url,
                    method = %method,
                    field = %failure.field,
                    rule = %failure.rule,
                    "Rejected request body"
                );
                return Err(RequestError::from(failure).with_url(url).with_method(method));
            }
        }
        self.dispatch(method, url, Some(RequestBody::json(data)), options).await
    }

    async fn dispatch(
        &self,
        method: Method,
        url: String,
        body: Option<RequestBody>,
        options: &RequestOptions,
    ) -> Result<Payload, RequestError> {
        let config = self.defaults.build(method, url, body, options);

        let send = async {
            match &self.retry {
                Some(policy) if is_idempotent(method) => {
                    policy
                        .execute_if(|| self.executor.send(config.clone()), retries_after)
                        .await
                }
                _ => self.executor.send(config.clone()).await,
            }
        };

        match &options.loading {
            Some(loading) => self.loading.with_loading(loading, send).await,
            None => send.await,
        }
    }

    /// Run `operations` concurrently and collect every outcome
    ///
    /// Never fails as a whole. Results keep input order; at most
    /// `max_concurrency` operations are in flight when a bound is set.
    pub async fn batch(&self, operations: Vec<BatchOperation>) -> BatchResult {
        let timer = Timer::with_details("batch", &format!("{} operations", operations.len()));
        let limit = self.max_concurrency.unwrap_or(operations.len()).max(1);

        let outcomes: Vec<Result<Payload, RequestError>> = stream::iter(operations.iter().map(|op| self.run(op)))
            .buffered(limit)
            .collect()
            .await;

        let results = operations
            .into_iter()
            .zip(outcomes)
            .map(|(operation, outcome)| BatchItem { operation, outcome })
            .collect();
        let result = BatchResult::new(results);

        tracing::info!(
            total = result.results.len(),
            succeeded = result.success_count,
            failed = result.error_count,
            duration_ms = timer.elapsed().as_millis() as u64,
            "Batch completed"
        );
        result
    }

    async fn run(&self, op: &BatchOperation) -> Result<Payload, RequestError> {
        match op.kind {
            Method::Get => {
                let params = op.data.as_ref().and_then(QueryParams::from_json);
                let mut options = op.options.clone();
                options.use_cache |= op.use_cache;
                self.get(&op.url, params.as_ref(), &options).await
            }
            Method::Delete => self.delete(&op.url, &op.options).await,
            method => {
                let data = op.data.clone().unwrap_or(Value::Null);
                self.write(method, &op.url, &data, op.validation_rules.as_ref(), &op.options)
                    .await
            }
        }
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Drop the cached response of one GET; `true` if something was cached
    pub fn invalidate(&self, url: &str, params: Option<&QueryParams>) -> bool {
        let key = fingerprint(Method::Get, &self.read_url(url, params), None);
        self.cache.remove(&key)
    }

    fn read_url(&self, url: &str, params: Option<&QueryParams>) -> String {
        let resolved = self.resolve(url);
        match params {
            Some(params) => append_query(&resolved, params),
            None => resolved,
        }
    }
}

fn is_idempotent(method: Method) -> bool {
    matches!(method, Method::Get | Method::Put | Method::Delete)
}

/// Errors the facade retries on its own; a timeout is final
fn retries_after(error: &RequestError) -> bool {
    error.kind() != ErrorKind::Timeout && error.is_retryable()
}
