//! Authentication token handling
//!
//! The API token is kept in durable storage under [`TOKEN_KEY`] and sent in
//! the `X-Token` header. All storage access is best-effort: a missing or
//! broken store degrades to "no auth header", never to an error.

use std::collections::HashMap;
use std::sync::Arc;

use crate::storage::{KeyValueStore, TOKEN_KEY};

/// Header carrying the token on the wire
pub const TOKEN_HEADER: &str = "X-Token";

/// Trait for supplying authentication headers to outgoing requests
pub trait AuthHandler: Send + Sync {
    /// Headers for a request; `explicit` overrides any stored credential
    fn auth_headers(&self, explicit: Option<&str>) -> HashMap<String, String>;
}

/// Persists the API token and derives auth headers from it
#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn KeyValueStore>,
}

impl TokenStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Stored token, or `""` if absent or unreadable
    pub fn get_token(&self) -> String {
        match self.store.get(TOKEN_KEY) {
            Ok(Some(token)) => token,
            Ok(None) => String::new(),
            Err(e) => {
                tracing::debug!(error = %e, "Token storage unavailable");
                String::new()
            }
        }
    }

    /// Store the trimmed token; write failures are ignored
    pub fn save_token(&self, token: &str) {
        if let Err(e) = self.store.set(TOKEN_KEY, token.trim()) {
            tracing::debug!(error = %e, "Failed to persist token, continuing without it");
        }
    }

    /// Forget the token; removal failures are ignored
    pub fn clear_token(&self) {
        if let Err(e) = self.store.remove(TOKEN_KEY) {
            tracing::debug!(error = %e, "Failed to clear token");
        }
    }

    pub fn has_token(&self) -> bool {
        !self.get_token().trim().is_empty()
    }
}

impl AuthHandler for TokenStore {
    fn auth_headers(&self, explicit: Option<&str>) -> HashMap<String, String> {
        let token = explicit
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.get_token().trim().to_string());

        if token.is_empty() {
            HashMap::new()
        } else {
            HashMap::from([(TOKEN_HEADER.to_string(), token)])
        }
    }
}
