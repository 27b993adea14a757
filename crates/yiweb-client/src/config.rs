//! Client configuration
//!
//! Configuration is assembled from:
//! - Default values
//! - A configuration file (YAML or JSON, chosen by extension)
//! - `YIWEB_*` environment variables (a `.env` file is honoured)
//!
//! It also holds the environment selection logic: which of the `local` and
//! `prod` service pairs a client talks to.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::http::{RetryPolicy, TransportConfig, DEFAULT_TIMEOUT};
use crate::logging::{LogFormat, LoggingConfig};
use crate::query;
use crate::storage::{KeyValueStore, ENV_PREFERENCE_KEY};

/// Serde adapter storing a [`Duration`] as integer milliseconds
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Named deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Local,
    Prod,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Prod => "prod",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Environment::Local),
            "prod" => Ok(Environment::Prod),
            other => Err(Error::configuration(format!("Unknown environment: {}", other))),
        }
    }
}

/// Base URLs of one environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Data service (static JSON, templates)
    pub data_base_url: String,
    /// API service
    pub api_base_url: String,
}

/// The `local` and `prod` service pairs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Environments {
    pub local: EnvironmentConfig,
    pub prod: EnvironmentConfig,
}

impl Default for Environments {
    fn default() -> Self {
        Self {
            local: EnvironmentConfig {
                data_base_url: "http://localhost:8000".to_string(),
                api_base_url: "http://localhost:8080".to_string(),
            },
            prod: EnvironmentConfig {
                data_base_url: "https://data.yiweb.app".to_string(),
                api_base_url: "https://api.yiweb.app".to_string(),
            },
        }
    }
}

impl Environments {
    pub fn get(&self, env: Environment) -> &EnvironmentConfig {
        match env {
            Environment::Local => &self.local,
            Environment::Prod => &self.prod,
        }
    }
}

/// `localhost`, `127.0.0.1` and `*.local` count as local hosts
pub fn is_local_host(host: &str) -> bool {
    let host = host.trim().trim_end_matches('.').to_lowercase();
    host == "localhost" || host == "127.0.0.1" || host.ends_with(".local")
}

/// Pick the environment for a session
///
/// Precedence: `explicit`, then an `env=` parameter on `page_url`, then the
/// stored preference, then the host of `page_url`. Values that do not name an
/// environment are skipped. With nothing to go on the result is `Prod`.
pub fn select_environment(explicit: Option<&str>, page_url: Option<&str>, store: &dyn KeyValueStore) -> Environment {
    let from_query = page_url.and_then(|url| {
        query::decode(url)
            .get("env")
            .and_then(|v| v.as_str().map(str::to_string))
    });

    let stored = match store.get(ENV_PREFERENCE_KEY) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "Environment preference unavailable");
            None
        }
    };

    let candidates = [
        ("explicit", explicit.map(str::to_string)),
        ("query", from_query),
        ("stored", stored),
    ];
    for (origin, candidate) in candidates {
        let Some(candidate) = candidate else { continue };
        match candidate.parse::<Environment>() {
            Ok(env) => {
                tracing::debug!(env = %env, origin, "Selected environment");
                return env;
            }
            Err(_) => tracing::warn!(value = %candidate, origin, "Ignoring unknown environment"),
        }
    }

    let local = page_url
        .and_then(|url| url::Url::parse(url).ok())
        .and_then(|url| url.host_str().map(is_local_host))
        .unwrap_or(false);
    if local {
        Environment::Local
    } else {
        Environment::Prod
    }
}

/// Remember `env` for later sessions; failures are ignored
pub fn save_environment_preference(store: &dyn KeyValueStore, env: Environment) {
    if let Err(e) = store.set(ENV_PREFERENCE_KEY, env.as_str()) {
        tracing::debug!(error = %e, "Failed to persist environment preference");
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Forced environment; when unset it is selected at build time
    pub environment: Option<Environment>,

    pub environments: Environments,

    /// Default per-request timeout
    #[serde(with = "duration_ms")]
    pub timeout: Duration,

    /// TTL for cached GET responses
    #[serde(with = "duration_ms")]
    pub cache_ttl: Duration,

    /// How long an operation runs before the loading indicator appears
    #[serde(with = "duration_ms")]
    pub loading_delay: Duration,

    /// Automatic retries for idempotent requests; a single attempt unless
    /// `max_attempts` is raised
    pub retry: RetryPolicy,

    /// Bound on concurrently running batch operations (`None` = unbounded)
    pub max_concurrency: Option<usize>,

    /// Durable storage file; `None` keeps storage in memory
    pub storage_path: Option<PathBuf>,

    pub transport: TransportConfig,

    pub logging: LoggingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            environment: None,
            environments: Environments::default(),
            timeout: DEFAULT_TIMEOUT,
            cache_ttl: Duration::from_secs(5 * 60),
            loading_delay: Duration::from_millis(3000),
            retry: RetryPolicy {
                max_attempts: 1,
                ..RetryPolicy::default()
            },
            max_concurrency: None,
            storage_path: None,
            transport: TransportConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = if is_yaml(path) {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        Ok(config)
    }

    /// Defaults or the first readable default config file, then env overrides
    pub fn load() -> Result<Self> {
        Self::load_with_file(None)
    }

    /// Load from `file` (or the default locations), apply env, validate
    pub fn load_with_file(file: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::from_default_paths(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn from_default_paths() -> Self {
        for path in Self::default_config_paths() {
            if !path.exists() {
                continue;
            }
            match Self::from_file(&path) {
                Ok(config) => {
                    tracing::debug!(path = %path.display(), "Loaded configuration");
                    return config;
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to load config"),
            }
        }
        Self::default()
    }

    /// Configuration file paths checked in order
    pub fn default_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from(".yiweb.yaml"),
            PathBuf::from(".yiweb.json"),
            PathBuf::from("yiweb.yaml"),
            PathBuf::from("yiweb.json"),
        ];

        if let Some(config_dir) = dirs::config_dir() {
            let dir = config_dir.join("yiweb");
            paths.push(dir.join("config.yaml"));
            paths.push(dir.join("config.json"));
        }

        paths
    }

    /// Apply `YIWEB_*` environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(env) = var("YIWEB_ENV") {
            self.environment = Some(env.parse()?);
        }
        if let Some(ms) = var("YIWEB_TIMEOUT_MS") {
            self.timeout = Duration::from_millis(parse_number("YIWEB_TIMEOUT_MS", &ms)?);
        }
        if let Some(ms) = var("YIWEB_CACHE_TTL_MS") {
            self.cache_ttl = Duration::from_millis(parse_number("YIWEB_CACHE_TTL_MS", &ms)?);
        }
        if let Some(ms) = var("YIWEB_LOADING_DELAY_MS") {
            self.loading_delay = Duration::from_millis(parse_number("YIWEB_LOADING_DELAY_MS", &ms)?);
        }
        if let Some(attempts) = var("YIWEB_RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_number("YIWEB_RETRY_MAX_ATTEMPTS", &attempts)?;
        }
        if let Some(limit) = var("YIWEB_MAX_CONCURRENCY") {
            self.max_concurrency = Some(parse_number("YIWEB_MAX_CONCURRENCY", &limit)?);
        }
        if let Some(path) = var("YIWEB_STORAGE_PATH") {
            self.storage_path = Some(PathBuf::from(path));
        }
        if let Some(url) = var("YIWEB_API_BASE_URL") {
            self.environments.prod.api_base_url = url;
        }
        if let Some(url) = var("YIWEB_DATA_BASE_URL") {
            self.environments.prod.data_base_url = url;
        }
        if let Some(format) = var("YIWEB_LOG_FORMAT") {
            self.logging.format = format.parse::<LogFormat>()?;
        }
        if let Some(level) = var("YIWEB_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Check invariants the rest of the client relies on
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::configuration("timeout must be greater than zero"));
        }
        if self.max_concurrency == Some(0) {
            return Err(Error::configuration("max_concurrency must be at least 1"));
        }
        self.retry
            .validate()
            .map_err(|e| Error::configuration(format!("Invalid retry policy: {}", e)))?;

        for (name, env) in [("local", &self.environments.local), ("prod", &self.environments.prod)] {
            for (field, value) in [("data_base_url", &env.data_base_url), ("api_base_url", &env.api_base_url)] {
                url::Url::parse(value).map_err(|e| Error::Configuration {
                    message: format!("Invalid {}.{}: {}", name, field, value),
                    source: Some(anyhow::Error::new(e)),
                })?;
            }
        }
        Ok(())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = if is_yaml(path) {
            serde_yaml::to_string(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(path.extension().and_then(|s| s.to_str()), Some("yaml") | Some("yml"))
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::configuration(format!("{} must be a number, got '{}': {}", key, value, e)))
}
