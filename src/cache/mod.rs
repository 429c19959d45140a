//! Rendered-page cache: key derivation and blob storage.

mod s3;

pub use s3::{S3BlobCache, S3Settings};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use thiserror::Error;
use url::Url;

use crate::config::{Config, ConfigError};

/// Tracking parameters that never distinguish page content.
pub const BUILTIN_IGNORED_QUERY_PARAMS: &[&str] = &[
    "utm_.*", "fbclid", "gclid", "dclid", "msclkid", "_ga", "_gl", "mc_cid", "mc_eid",
];

pub const HTML_CONTENT_TYPE: &str = "text/html";

#[derive(Debug, Error)]
pub enum CacheKeyError {
    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("URL '{0}' has no host")]
    MissingHost(String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache transport error: {0}")]
    Transport(String),

    #[error("cache backend returned HTTP {status} for '{key}'")]
    Status { status: u16, key: String },

    #[error("cache is not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        CacheError::Transport(err.to_string())
    }
}

/// `host/device/path[?query]` identifying one page rendered for one device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derives cache keys. Pure: identical inputs always give identical keys.
#[derive(Debug, Clone)]
pub struct CacheKeyCodec {
    ignored: Vec<Regex>,
}

impl CacheKeyCodec {
    /// Each pattern must match a parameter name in full to drop it.
    pub fn with_patterns<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ignored = patterns
            .into_iter()
            .map(|p| Regex::new(&format!("^(?:{})$", p.as_ref())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { ignored })
    }

    /// Built-in ignore list plus `cache_ignore_query_params`.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let patterns = BUILTIN_IGNORED_QUERY_PARAMS
            .iter()
            .map(|p| p.to_string())
            .chain(config.cache_ignore_query_params.iter().cloned());
        Self::with_patterns(patterns).map_err(|e| ConfigError::InvalidValue {
            key: "cache_ignore_query_params".to_string(),
            message: e.to_string(),
        })
    }

    pub fn is_ignored(&self, param: &str) -> bool {
        self.ignored.iter().any(|re| re.is_match(param))
    }

    pub fn derive_key(&self, url: &str, device: &str) -> Result<CacheKey, CacheKeyError> {
        let parsed = Url::parse(url).map_err(|source| CacheKeyError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let host = parsed
            .host_str()
            .ok_or_else(|| CacheKeyError::MissingHost(url.to_string()))?;

        let path = parsed.path();
        let path = path.strip_suffix('/').unwrap_or(path);

        let query = parsed
            .query()
            .unwrap_or_default()
            .split('&')
            .filter(|pair| !pair.is_empty())
            .filter(|pair| {
                let name = pair.split_once('=').map_or(*pair, |(name, _)| name);
                !self.is_ignored(name)
            })
            .collect::<Vec<_>>()
            .join("&");

        let device: String = device
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();

        let mut key = format!("{host}/{device}{path}");
        if !query.is_empty() {
            key.push('?');
            key.push_str(&query);
        }
        Ok(CacheKey(key))
    }
}

/// Storage for rendered HTML.
///
/// `get` reports a missing entry as `Ok(None)`. `put` returns the public
/// locator of the stored object.
#[async_trait]
pub trait BlobCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, CacheError>;

    async fn put(&self, key: &CacheKey, html: &str, content_type: &str)
        -> Result<String, CacheError>;

    fn locator(&self, key: &CacheKey) -> String;
}

/// In-process cache. Last writer wins.
#[derive(Debug, Default)]
pub struct MemoryBlobCache {
    entries: DashMap<CacheKey, (String, String)>,
}

impl MemoryBlobCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn content_type(&self, key: &CacheKey) -> Option<String> {
        self.entries.get(key).map(|entry| entry.1.clone())
    }
}

#[async_trait]
impl BlobCache for MemoryBlobCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, CacheError> {
        Ok(self.entries.get(key).map(|entry| entry.0.clone()))
    }

    async fn put(
        &self,
        key: &CacheKey,
        html: &str,
        content_type: &str,
    ) -> Result<String, CacheError> {
        self.entries
            .insert(key.clone(), (html.to_string(), content_type.to_string()));
        Ok(self.locator(key))
    }

    fn locator(&self, key: &CacheKey) -> String {
        format!("memory://{key}")
    }
}

/// Builds the S3 cache when an endpoint and bucket are configured.
///
/// Enabling `store_pages` or `return_cached_pages` without them is an error.
/// Whether a given render reads or writes is decided per request.
pub fn from_config(config: &Config) -> Result<Option<Arc<dyn BlobCache>>, CacheError> {
    let has_bucket = !config.s3_endpoint.is_empty() && !config.s3_bucket_name.is_empty();
    if !has_bucket && !config.store_pages && !config.return_cached_pages {
        return Ok(None);
    }
    let settings = S3Settings::from_config(config)?;
    Ok(Some(Arc::new(S3BlobCache::new(settings)?)))
}
