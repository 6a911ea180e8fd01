//! Load `RuntimeConfig` from XDG `config.toml`, project `.env`, and process env, then merge
//! with defaults. Priority: **process env > .env > XDG toml > built-in default**.
//!
//! Covers the fields `GraphRuntime` needs at construction time: store
//! backend/path, event queue bound, default retry policy, and default cache TTL.

mod dotenv;
mod xdg_toml;

use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("xdg config path: {0}")]
    XdgPath(String),
    #[error("read xdg config: {0}")]
    XdgRead(std::io::Error),
    #[error("parse xdg toml: {0}")]
    XdgParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Which `Store` implementation the runtime should construct.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    /// `store/memory.rs`: non-durable, process-local.
    Memory,
    /// `store/sqlite.rs`: durable, backed by a single sqlite file at `path`.
    Sqlite { path: String },
}

impl Default for StoreBackend {
    fn default() -> Self {
        StoreBackend::Memory
    }
}

/// Default retry shape applied to a Step when a node doesn't specify its own.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryDefaults {
    pub max_attempts: usize,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_interval: Duration::from_millis(200),
            max_interval: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

/// Fully-resolved runtime configuration: the `RuntimeConfig` handed to `GraphRuntime::new`.
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeConfig {
    pub store: StoreBackend,
    pub event_queue_capacity: usize,
    pub default_retry: RetryDefaults,
    pub default_cache_ttl: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            store: StoreBackend::default(),
            event_queue_capacity: 256,
            default_retry: RetryDefaults::default(),
            default_cache_ttl: None,
        }
    }
}

/// Raw `[runtime]` table as read from TOML, before merging with `.env`/process env/defaults.
/// Every field is optional so a partial or absent file doesn't force a value.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize)]
pub struct RuntimeConfigFile {
    pub store_backend: Option<String>,
    pub store_path: Option<String>,
    pub event_queue_capacity: Option<usize>,
    pub retry_max_attempts: Option<usize>,
    pub retry_initial_interval_ms: Option<u64>,
    pub retry_max_interval_ms: Option<u64>,
    pub retry_multiplier: Option<f64>,
    pub default_cache_ttl_secs: Option<u64>,
}

fn env_override(key: &str, dotenv_map: &std::collections::HashMap<String, String>) -> Option<String> {
    std::env::var(key).ok().or_else(|| dotenv_map.get(key).cloned())
}

/// Loads `RuntimeConfig` for `app_name`, looking at (in increasing priority):
/// 1. built-in defaults
/// 2. `$XDG_CONFIG_HOME/<app_name>/config.toml`'s `[runtime]` table
/// 3. project `.env` (current directory, or `override_dir` if given)
/// 4. the process environment
///
/// Env/`.env` keys are `SHUTTLE_STORE_BACKEND`, `SHUTTLE_STORE_PATH`,
/// `SHUTTLE_EVENT_QUEUE_CAPACITY`, `SHUTTLE_RETRY_MAX_ATTEMPTS`,
/// `SHUTTLE_RETRY_INITIAL_INTERVAL_MS`, `SHUTTLE_RETRY_MAX_INTERVAL_MS`,
/// `SHUTTLE_RETRY_MULTIPLIER`, `SHUTTLE_CACHE_TTL_SECS`.
pub fn load(app_name: &str, override_dir: Option<&Path>) -> Result<RuntimeConfig, LoadError> {
    let file = xdg_toml::load_runtime_file(app_name)?;
    let dotenv_map = dotenv::load_env_map(override_dir).map_err(LoadError::DotenvRead)?;

    let mut cfg = RuntimeConfig::default();

    let store_backend = env_override("SHUTTLE_STORE_BACKEND", &dotenv_map).or(file.store_backend);
    let store_path = env_override("SHUTTLE_STORE_PATH", &dotenv_map).or(file.store_path);
    cfg.store = match store_backend.as_deref() {
        None | Some("memory") => StoreBackend::Memory,
        Some("sqlite") => StoreBackend::Sqlite {
            path: store_path.unwrap_or_else(|| "shuttle.db".to_string()),
        },
        Some(other) => {
            return Err(LoadError::InvalidValue {
                field: "store_backend",
                value: other.to_string(),
            })
        }
    };

    if let Some(v) = env_override("SHUTTLE_EVENT_QUEUE_CAPACITY", &dotenv_map)
        .map(|v| parse_field(&v, "event_queue_capacity"))
        .transpose()?
        .or(file.event_queue_capacity)
    {
        cfg.event_queue_capacity = v;
    }

    if let Some(v) = env_override("SHUTTLE_RETRY_MAX_ATTEMPTS", &dotenv_map)
        .map(|v| parse_field(&v, "retry_max_attempts"))
        .transpose()?
        .or(file.retry_max_attempts)
    {
        cfg.default_retry.max_attempts = v;
    }
    if let Some(v) = env_override("SHUTTLE_RETRY_INITIAL_INTERVAL_MS", &dotenv_map)
        .map(|v| parse_field(&v, "retry_initial_interval_ms"))
        .transpose()?
        .or(file.retry_initial_interval_ms)
    {
        cfg.default_retry.initial_interval = Duration::from_millis(v);
    }
    if let Some(v) = env_override("SHUTTLE_RETRY_MAX_INTERVAL_MS", &dotenv_map)
        .map(|v| parse_field(&v, "retry_max_interval_ms"))
        .transpose()?
        .or(file.retry_max_interval_ms)
    {
        cfg.default_retry.max_interval = Duration::from_millis(v);
    }
    if let Some(v) = env_override("SHUTTLE_RETRY_MULTIPLIER", &dotenv_map)
        .map(|v| parse_field(&v, "retry_multiplier"))
        .transpose()?
        .or(file.retry_multiplier)
    {
        cfg.default_retry.multiplier = v;
    }

    if let Some(v) = env_override("SHUTTLE_CACHE_TTL_SECS", &dotenv_map)
        .map(|v| parse_field(&v, "default_cache_ttl_secs"))
        .transpose()?
        .or(file.default_cache_ttl_secs)
    {
        cfg.default_cache_ttl = Some(Duration::from_secs(v));
    }

    Ok(cfg)
}

fn parse_field<T: std::str::FromStr>(v: &str, field: &'static str) -> Result<T, LoadError> {
    v.parse().map_err(|_| LoadError::InvalidValue {
        field,
        value: v.to_string(),
    })
}
