//! Runtime configuration.
//!
//! [`ConfigStore`] holds the raw layered key/value settings; [`Config`] is the
//! typed view the renderer consumes, built once per process with
//! [`Config::from_store`].

mod store;

pub use store::{ConfigStore, ENV_PREFIX, GET_MAX_DEPTH};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::{DeviceDescriptor, Viewport};
use crate::readiness::ReadinessCondition;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing config variable '{0}'")]
    Missing(String),

    #[error("Cannot change type of config variable {key} (from {expected} to {found})")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Recursion depth limit of {limit} reached for config variable \"{key}\"")]
    Recursion { key: String, limit: usize },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to read config {path}: {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub conf_suffix: String,
    pub log_level: String,
    pub log_format: LogFormat,
    pub debug: bool,

    pub device: String,
    pub user_agent: String,
    pub user_agent_append: String,
    pub default_user_agent: String,
    pub user_agent_screen_mapping: Vec<(String, String)>,
    pub screen_presets: BTreeMap<String, Viewport>,
    pub extra_http_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceDescriptor>,

    pub max_concurrent_sessions: usize,
    #[serde(with = "humantime_serde")]
    pub navigation_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,

    pub network_idle_check: bool,
    #[serde(with = "humantime_serde")]
    pub network_idle_time: Duration,
    #[serde(with = "humantime_serde")]
    pub network_idle_tick: Duration,
    #[serde(with = "humantime_serde")]
    pub network_idle_timeout: Duration,
    pub request_wait_url_pattern: String,

    pub max_tries: u32,
    pub preload_pages: bool,
    pub add_base_url: bool,
    pub remove_elements: Vec<String>,
    pub ready_conditions: Vec<ReadinessCondition>,

    pub store_pages: bool,
    pub return_cached_pages: bool,
    pub cache_ignore_query_params: Vec<String>,
    pub s3_endpoint: String,
    pub s3_region: String,
    pub s3_bucket_name: String,
    pub s3_access_key: String,
    pub s3_secret_key: String,
}

impl Config {
    /// Typed config from the embedded defaults only.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_store(&ConfigStore::defaults()?)
    }

    /// Loads defaults, then the config file (explicit path, else the central
    /// file when present), then environment overrides.
    pub fn load_store(path: Option<&Path>) -> Result<ConfigStore, ConfigError> {
        let mut store = ConfigStore::defaults()?;
        match path {
            Some(path) => store.merge_file(path)?,
            None => {
                if let Some(central) = Self::central_config_path().filter(|p| p.is_file()) {
                    store.merge_file(&central)?;
                }
            }
        }
        store.apply_env()?;
        Ok(store)
    }

    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_store(&Self::load_store(path)?)
    }

    pub fn from_store(store: &ConfigStore) -> Result<Self, ConfigError> {
        let resolved = store.resolved()?;
        let config: Config = toml::Value::Table(resolved)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// `~/.config/spa-renderer/config.toml`
    pub fn central_config_path() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| {
            PathBuf::from(home)
                .join(".config")
                .join("spa-renderer")
                .join("config.toml")
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tries == 0 {
            return Err(ConfigError::Invalid("max_tries must be at least 1".to_string()));
        }
        if self.network_idle_tick.is_zero() {
            return Err(ConfigError::Invalid(
                "network_idle_tick must be greater than zero".to_string(),
            ));
        }
        for pattern in &self.cache_ignore_query_params {
            Regex::new(pattern).map_err(|e| ConfigError::InvalidValue {
                key: "cache_ignore_query_params".to_string(),
                message: e.to_string(),
            })?;
        }
        let sample = self
            .request_wait_url_pattern
            .replace(crate::monitor::BASE_URL_PLACEHOLDER, &regex::escape("https://example.com"));
        Regex::new(&sample).map_err(|e| ConfigError::InvalidValue {
            key: "request_wait_url_pattern".to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }
}
