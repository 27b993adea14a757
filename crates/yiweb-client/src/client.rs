//! Client composition root
//!
//! [`ClientBuilder`] wires storage, auth, transport, caching and loading
//! coordination together once; the resulting [`Client`] hands out the CRUD
//! facades for the API and data services of the selected environment.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::TokenStore;
use crate::cache::ResponseCache;
use crate::config::{select_environment, save_environment_preference, ClientConfig, Environment, EnvironmentConfig};
use crate::crud::CrudClient;
use crate::error::Result;
use crate::http::{
    Interceptor, Payload, RequestDefaults, RequestError, RequestExecutor, RequestOptions, ReqwestTransport, Transport,
};
use crate::loading::{LoadingCoordinator, LoadingIndicator, LoadingOptions, TracingIndicator};
use crate::storage::{FileStore, KeyValueStore, MemoryStore};
use crate::template_cache::TemplateCache;
use crate::validation::Validator;

/// Builder for [`Client`]
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn KeyValueStore>>,
    indicator: Option<Arc<dyn LoadingIndicator>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    validator: Option<Validator>,
    page_url: Option<String>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `transport` instead of the reqwest one built from the config
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use `store` instead of the one implied by `storage_path`
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn indicator(mut self, indicator: Arc<dyn LoadingIndicator>) -> Self {
        self.indicator = Some(indicator);
        self
    }

    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Page URL used for `env=` overrides and the host heuristic
    pub fn page_url(mut self, url: impl Into<String>) -> Self {
        self.page_url = Some(url.into());
        self
    }

    pub fn build(self) -> Result<Client> {
        let config = self.config;
        config.validate()?;

        let store: Arc<dyn KeyValueStore> = match (self.store, &config.storage_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(FileStore::open(path)?),
            (None, None) => Arc::new(MemoryStore::new()),
        };

        let environment = select_environment(
            config.environment.map(|env| env.as_str()),
            self.page_url.as_deref(),
            store.as_ref(),
        );
        let endpoints = config.environments.get(environment).clone();

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&config.transport)?),
        };

        let tokens = Arc::new(TokenStore::new(store.clone()));
        let executor = self
            .interceptors
            .into_iter()
            .fold(RequestExecutor::new(transport).with_auth(tokens.clone()), |executor, interceptor| {
                executor.with_interceptor(interceptor)
            });

        let cache = Arc::new(ResponseCache::new());
        let indicator = self.indicator.unwrap_or_else(|| Arc::new(TracingIndicator));
        let loading = Arc::new(LoadingCoordinator::new(indicator).with_delay_show(config.loading_delay));
        let defaults = RequestDefaults {
            timeout: config.timeout,
            ..RequestDefaults::default()
        };

        let crud = |base_url: &str| -> Result<CrudClient> {
            let mut client = CrudClient::new(executor.clone())
                .with_defaults(defaults.clone())
                .with_cache(cache.clone())
                .with_loading(loading.clone())
                .with_validator(self.validator.clone().unwrap_or_default())
                .with_cache_ttl(config.cache_ttl)
                .with_max_concurrency(config.max_concurrency)
                .with_base_url(base_url)?;
            if config.retry.max_attempts > 1 {
                client = client.with_retry(config.retry.clone());
            }
            Ok(client)
        };
        let api = crud(&endpoints.api_base_url)?;
        let data = crud(&endpoints.data_base_url)?;

        tracing::info!(
            environment = %environment,
            api = %endpoints.api_base_url,
            data = %endpoints.data_base_url,
            "Client ready"
        );

        Ok(Client {
            templates: TemplateCache::new(store.clone()),
            config,
            environment,
            endpoints,
            store,
            tokens,
            cache,
            loading,
            api,
            data,
            disposed: AtomicBool::new(false),
        })
    }
}

/// A configured YiWeb client
pub struct Client {
    config: ClientConfig,
    environment: Environment,
    endpoints: EnvironmentConfig,
    store: Arc<dyn KeyValueStore>,
    tokens: Arc<TokenStore>,
    cache: Arc<ResponseCache>,
    loading: Arc<LoadingCoordinator>,
    templates: TemplateCache,
    api: CrudClient,
    data: CrudClient,
    disposed: AtomicBool,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// CRUD facade for the API service
    pub fn api(&self) -> &CrudClient {
        &self.api
    }

    /// CRUD facade for the data service
    pub fn data(&self) -> &CrudClient {
        &self.data
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn templates(&self) -> &TemplateCache {
        &self.templates
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn loading(&self) -> &LoadingCoordinator {
        &self.loading
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn endpoints(&self) -> &EnvironmentConfig {
        &self.endpoints
    }

    /// Persist `env` as the preferred environment for future clients
    pub fn remember_environment(&self, env: Environment) {
        save_environment_preference(self.store.as_ref(), env);
    }

    /// Loading options carrying the configured display delay
    pub fn loading_options(&self, message: impl Into<String>) -> LoadingOptions {
        LoadingOptions::new(message).with_delay(self.config.loading_delay)
    }

    /// Fetch a text template from the data service, through the durable cache
    pub async fn load_template(&self, path: &str, max_age: Duration) -> std::result::Result<String, RequestError> {
        let url = self.data.resolve(path);
        if let Some(content) = self.templates.get(&url, max_age) {
            tracing::debug!(url = %url, "Template served from storage");
            return Ok(content);
        }

        let content = match self.data.get(&url, None, &RequestOptions::default()).await? {
            Payload::Text(text) => text,
            Payload::Json(value) => value.to_string(),
        };
        self.templates.put(&url, content.as_str());
        Ok(content)
    }

    /// Cancel running loading operations and drop cached responses
    ///
    /// Safe to call more than once.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let cancelled = self.loading.cancel_all();
        let cached = self.cache.len();
        self.cache.clear();
        tracing::info!(cancelled, cached, "Client disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.dispose();
    }
}
