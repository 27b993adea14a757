//! Logging utilities for the YiWeb client
//!
//! This module provides:
//! - Request ID generation
//! - Sensitive data redaction (tokens never reach the logs raw)
//! - Performance timing spans
//! - Structured subscriber setup (compact, full, JSON)

use std::collections::HashMap;

use is_terminal::IsTerminal;
use serde::{Deserialize, Serialize};
use tracing::{field, Span};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter, used when `RUST_LOG` is unset
    pub level: String,
    /// Output format: compact, full, json
    pub format: LogFormat,
    /// Colorize output when stderr is a terminal
    pub ansi: bool,
    /// Include thread IDs
    pub thread_ids: bool,
    /// Include file and line numbers
    pub source_location: bool,
    /// Per-module level overrides
    pub module_filter: HashMap<String, String>,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Compact format for production
    Compact,
    /// Full format with all details
    Full,
    /// JSON structured format
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "full" => Ok(LogFormat::Full),
            "json" => Ok(LogFormat::Json),
            other => Err(Error::configuration(format!("Invalid log format: {}", other))),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            ansi: true,
            thread_ids: false,
            source_location: false,
            module_filter: HashMap::new(),
        }
    }
}

impl LoggingConfig {
    /// Debug-level preset with source locations, handy in tests and local runs
    pub fn verbose() -> Self {
        Self {
            level: "debug".to_string(),
            source_location: true,
            ..Self::default()
        }
    }
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over `config.level`. Fails if a global
/// subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = create_env_filter(config)?;
    let ansi = config.ansi && std::io::stderr().is_terminal();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(config.thread_ids)
        .with_file(config.source_location)
        .with_line_number(config.source_location);

    // Each format has its own subscriber type
    let installed = match config.format {
        LogFormat::Compact => tracing::subscriber::set_global_default(builder.with_ansi(ansi).compact().finish()),
        LogFormat::Full => tracing::subscriber::set_global_default(builder.with_ansi(ansi).finish()),
        LogFormat::Json => tracing::subscriber::set_global_default(builder.with_ansi(false).json().finish()),
    };
    installed.map_err(|e| Error::Internal {
        message: format!("Failed to initialize logging: {}", e),
        source: anyhow::Error::new(e),
    })?;

    tracing::debug!(format = ?config.format, level = %config.level, "Logging initialized");
    Ok(())
}

fn create_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    for (module, level) in &config.module_filter {
        let directive = format!("{}={}", module, level)
            .parse()
            .map_err(|e| Error::configuration(format!("Invalid filter directive: {}", e)))?;
        filter = filter.add_directive(directive);
    }

    Ok(filter)
}

/// Generate a unique request ID
pub fn generate_request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

/// Span carrying an operation name and a `duration_ms` slot filled on completion
pub fn create_operation_span(operation: &str, details: Option<&str>) -> Span {
    tracing::info_span!(
        "operation",
        operation = operation,
        details = details.unwrap_or(""),
        duration_ms = field::Empty,
    )
}

/// Sensitive data redaction utilities
pub mod redaction {
    use std::collections::HashMap;
    use std::sync::OnceLock;

    use regex::Regex;

    const MASK: &str = "***";

    fn patterns() -> &'static [Regex] {
        static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
        PATTERNS.get_or_init(|| {
            [
                r#"(?i)(x-token|api[_-]?key|apikey)[=:\s]+['"]?([a-zA-Z0-9_.-]{4,})['"]?"#,
                r#"(?i)(token|bearer)[=:\s]+['"]?([a-zA-Z0-9_.-]{4,})['"]?"#,
                r#"(?i)(password|passwd|pwd)[=:\s]+['"]?([^\s'"&]{3,})['"]?"#,
            ]
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
        })
    }

    /// Redact sensitive information from a string
    pub fn redact_sensitive(input: &str) -> String {
        patterns().iter().fold(input.to_string(), |acc, regex| {
            regex.replace_all(&acc, format!("$1={}", MASK).as_str()).into_owned()
        })
    }

    /// Redact sensitive information from JSON values in place
    pub fn redact_json_value(value: &mut serde_json::Value) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    if is_sensitive_key(key) {
                        *val = serde_json::Value::String(MASK.to_string());
                    } else {
                        redact_json_value(val);
                    }
                }
            }
            serde_json::Value::Array(arr) => arr.iter_mut().for_each(redact_json_value),
            serde_json::Value::String(s) => *s = redact_sensitive(s),
            _ => {}
        }
    }

    /// Copy of `headers` with credential values masked
    pub fn redact_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
        headers
            .iter()
            .map(|(name, value)| {
                let value = if is_sensitive_key(name) { MASK.to_string() } else { value.clone() };
                (name.clone(), value)
            })
            .collect()
    }

    /// Check if a key names a credential
    pub fn is_sensitive_key(key: &str) -> bool {
        let key = key.to_lowercase();
        ["key", "token", "password", "passwd", "secret", "credential", "auth", "cookie"]
            .iter()
            .any(|needle| key.contains(needle))
    }
}

/// Performance timing utilities
pub mod timing {
    use std::time::{Duration, Instant};

    use tracing::Span;

    /// A timer that records its duration on the span when finished or dropped
    pub struct Timer {
        start: Instant,
        span: Span,
        operation: String,
        finished: bool,
    }

    impl Timer {
        pub fn new(operation: &str) -> Self {
            Self {
                start: Instant::now(),
                span: super::create_operation_span(operation, None),
                operation: operation.to_string(),
                finished: false,
            }
        }

        pub fn with_details(operation: &str, details: &str) -> Self {
            Self {
                start: Instant::now(),
                span: super::create_operation_span(operation, Some(details)),
                operation: operation.to_string(),
                finished: false,
            }
        }

        pub fn elapsed(&self) -> Duration {
            self.start.elapsed()
        }

        pub fn span(&self) -> &Span {
            &self.span
        }

        /// Finish the timer and log the duration at info
        pub fn finish(mut self) -> Duration {
            let duration = self.record();
            tracing::info!(operation = %self.operation, duration_ms = duration.as_millis() as u64, "Operation completed");
            self.finished = true;
            duration
        }

        fn record(&self) -> Duration {
            let duration = self.start.elapsed();
            self.span.record("duration_ms", duration.as_millis() as u64);
            duration
        }
    }

    impl Drop for Timer {
        fn drop(&mut self) {
            if !self.finished {
                let duration = self.record();
                tracing::debug!(
                    operation = %self.operation,
                    duration_ms = duration.as_millis() as u64,
                    "Operation completed (auto-timed)"
                );
            }
        }
    }
}
