//! HTTP request layer
//!
//! This module provides the request lifecycle used by the CRUD facade:
//! - Request configuration with defaults merging
//! - A pluggable transport (reqwest in production, a scripted mock in tests)
//! - Interception hooks for logging and timestamps
//! - Timeout and cancellation races that abort the losing call
//! - Status classification into structured errors
//! - Retry with fixed delay or exponential backoff

pub mod error;
pub mod executor;
pub mod interceptor;
pub mod mock;
pub mod request;
pub mod retry;
pub mod status;
pub mod timeout;
pub mod transport;

pub use error::{ErrorKind, RequestError};
pub use executor::RequestExecutor;
pub use interceptor::{Interceptor, LoggingInterceptor, RequestContext};
pub use mock::{MockCall, MockResponse, MockTransport};
pub use request::{Method, Payload, RequestBody, RequestConfig, RequestDefaults, RequestOptions, DEFAULT_TIMEOUT};
pub use retry::{retry, Backoff, RetryPolicy};
pub use timeout::{with_cancellation, with_timeout};
pub use transport::{ReqwestTransport, Transport, TransportConfig, TransportResponse};
