//! YiWeb Client - data-fetch client for the YiWeb application
//!
//! This crate provides the request lifecycle behind every YiWeb page: a
//! timeout-raced request executor, a CRUD facade with validation and batch
//! execution, a TTL response cache, loading-state coordination and retries.
//!
//! # Main Components
//!
//! - **HTTP layer** ([`http`]): request configuration, transport seam,
//!   interceptors, status classification, timeout/cancel races, retry
//! - **CRUD facade** ([`crud`]): get/create/update/patch/delete and batch
//! - **Caching**: in-memory responses ([`cache`]) and durable templates
//!   ([`template_cache`])
//! - **Loading** ([`loading`]): delayed indicator with cancel and progress
//! - **Composition** ([`client`]): one [`Client`] wiring everything together
//!
//! # Example
//!
//! ```no_run
//! use yiweb_client::{Client, ClientConfig, RequestOptions};
//!
//! # async fn example() -> yiweb_client::Result<()> {
//! let client = Client::builder().config(ClientConfig::load()?).build()?;
//! let news = client
//!     .api()
//!     .get("/news", None, &RequestOptions::default().cached(None))
//!     .await?;
//! println!("{:?}", news.as_json());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod crud;
pub mod debounce;
pub mod error;
pub mod http;
pub mod loading;
pub mod logging;
pub mod query;
pub mod storage;
pub mod template_cache;
pub mod validation;

#[cfg(test)]
mod proptest_strategies;

// Re-export main types for convenience
pub use error::{Error, Result};

pub use auth::{AuthHandler, TokenStore};
pub use cache::{fingerprint, ResponseCache};
pub use client::{Client, ClientBuilder};
pub use config::{ClientConfig, Environment, EnvironmentConfig};
pub use crud::{BatchItem, BatchOperation, BatchResult, CrudClient};
pub use debounce::{Debouncer, Throttle};
pub use http::{
    retry, ErrorKind, Method, Payload, RequestConfig, RequestError, RequestExecutor, RequestOptions, RetryPolicy,
};
pub use loading::{CancelHandle, LoadingCoordinator, LoadingIndicator, LoadingOptions, LoadingSession};
pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use query::{ParamValue, QueryParams};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use template_cache::TemplateCache;
pub use validation::{Rule, ValidationFailure, ValidationRules, Validator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
