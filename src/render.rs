//! Render orchestration: one URL in, one HTML snapshot out.
//!
//! A render resolves the device, consults the cache, leases an isolated
//! browser session and loads the page. Navigation, network idle and readiness
//! are retried as one unit on timeout, up to `max_tries`. The loaded DOM is
//! cleaned up and serialized, and the result is optionally written back to
//! the cache.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use url::Url;

use crate::browser::dom::{self, DEVICE_META, EXECUTABLE_SCRIPTS_SELECTOR, TIMESTAMP_META};
use crate::browser::{BrowserDriver, BrowserError, Page};
use crate::cache::{self, BlobCache, CacheKey, CacheKeyCodec, HTML_CONTENT_TYPE};
use crate::config::{Config, ConfigError};
use crate::device::{DeviceRequest, DeviceResolver, Viewport};
use crate::error::{RenderError, Result};
use crate::monitor::{IdlePolicy, NetworkActivityMonitor, RequestFilter};
use crate::readiness::{ReadinessCondition, ReadinessMatcher};
use crate::session::{self, LeasedSession, SessionFactory, SessionFactoryOptions};

/// One render job. Unset fields fall back to the configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RenderRequest {
    pub url: String,
    pub device: Option<String>,
    pub screen: Option<Viewport>,
    pub user_agent: Option<String>,
    pub user_agent_append: Option<String>,
    /// Runs the browser headful.
    pub debug: Option<bool>,
    /// Overlaid on the configured `extra_http_headers`.
    pub extra_headers: BTreeMap<String, String>,
    pub ready_conditions: Option<Vec<ReadinessCondition>>,
    pub remove_elements: Option<Vec<String>>,
    pub add_base_url: Option<bool>,
    pub network_idle_check: Option<bool>,
    pub store_pages: Option<bool>,
    pub return_cached: Option<bool>,
    pub max_tries: Option<u32>,
}

impl RenderRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderResult {
    pub html: String,
    pub device: String,
    pub cache_hit: bool,
    /// Public locator of the cached object, when one was read or written.
    pub cache_url: Option<String>,
}

/// Request overrides merged with configuration for one render.
#[derive(Debug, Clone)]
struct RenderPolicy {
    headless: bool,
    headers: BTreeMap<String, String>,
    conditions: Vec<ReadinessCondition>,
    removals: Vec<String>,
    add_base_url: bool,
    idle_check: bool,
    store: bool,
    read_cache: bool,
    max_tries: u32,
}

impl RenderPolicy {
    fn merge(config: &Config, request: &RenderRequest) -> Self {
        let mut headers = config.extra_http_headers.clone();
        headers.extend(
            request
                .extra_headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        Self {
            headless: !request.debug.unwrap_or(config.debug),
            headers,
            conditions: request
                .ready_conditions
                .clone()
                .unwrap_or_else(|| config.ready_conditions.clone()),
            removals: request
                .remove_elements
                .clone()
                .unwrap_or_else(|| config.remove_elements.clone()),
            add_base_url: request.add_base_url.unwrap_or(config.add_base_url),
            idle_check: request
                .network_idle_check
                .unwrap_or(config.network_idle_check),
            store: request.store_pages.unwrap_or(config.store_pages),
            read_cache: request.return_cached.unwrap_or(config.return_cached_pages),
            max_tries: request.max_tries.unwrap_or(config.max_tries).max(1),
        }
    }
}

pub struct RenderOrchestrator {
    config: Arc<Config>,
    sessions: SessionFactory,
    resolver: DeviceResolver,
    codec: CacheKeyCodec,
    matcher: ReadinessMatcher,
    cache: Option<Arc<dyn BlobCache>>,
}

impl RenderOrchestrator {
    pub fn new(
        config: Arc<Config>,
        driver: Arc<dyn BrowserDriver>,
        cache: Option<Arc<dyn BlobCache>>,
    ) -> Result<Self> {
        let resolver = DeviceResolver::from_config(&config)?;
        let codec = CacheKeyCodec::from_config(&config)?;
        let sessions = SessionFactory::new(driver, SessionFactoryOptions::from(config.as_ref()));
        let matcher = ReadinessMatcher::new(config.operation_timeout);
        Ok(Self {
            config,
            sessions,
            resolver,
            codec,
            matcher,
            cache,
        })
    }

    /// Orchestrator with the compiled-in browser backend and the configured cache.
    pub fn from_config(config: Arc<Config>) -> Result<Self> {
        let cache = cache::from_config(&config)?;
        Self::new(config, session::default_driver(), cache)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn resolver(&self) -> &DeviceResolver {
        &self.resolver
    }

    pub fn codec(&self) -> &CacheKeyCodec {
        &self.codec
    }

    pub async fn render(&self, request: &RenderRequest) -> Result<RenderResult> {
        let url = Url::parse(&request.url)?;
        let policy = RenderPolicy::merge(&self.config, request);
        let (device, profile) = self.resolver.resolve(&DeviceRequest {
            device: request.device.as_deref(),
            screen: request.screen,
            user_agent: request.user_agent.as_deref(),
            user_agent_append: request.user_agent_append.as_deref(),
        });
        info!(url = %url, device = %device, "render started");

        let cache_key = self.cache_key(&url, &device, &policy);
        if policy.read_cache {
            if let Some(result) = self.read_cache(cache_key.as_ref(), &device).await {
                return Ok(result);
            }
        }

        let filter = RequestFilter::for_page(&url, &self.config.request_wait_url_pattern)
            .map_err(|e| ConfigError::InvalidValue {
                key: "request_wait_url_pattern".to_string(),
                message: e.to_string(),
            })?;

        let session = self
            .sessions
            .open(&profile, &policy.headers, policy.headless)
            .await?;

        let captured = self
            .render_in_session(&session, &url, &device, &filter, &policy)
            .await;
        let result = match captured {
            Ok(html) => {
                let cache_url = match (policy.store, cache_key.as_ref()) {
                    (true, Some(key)) => self.write_cache(key, &html).await,
                    _ => None,
                };
                info!(url = %url, device = %device, bytes = html.len(), "render finished");
                Ok(RenderResult {
                    html,
                    device,
                    cache_hit: false,
                    cache_url,
                })
            }
            Err(err) => Err(err),
        };

        session.close().await;
        result
    }

    fn cache_key(&self, url: &Url, device: &str, policy: &RenderPolicy) -> Option<CacheKey> {
        if !(policy.read_cache || policy.store) {
            return None;
        }
        if self.cache.is_none() {
            warn!(
                url = %url,
                store = policy.store,
                read_cache = policy.read_cache,
                "page cache requested but no s3 bucket is configured; caching skipped"
            );
            return None;
        }
        match self.codec.derive_key(url.as_str(), device) {
            Ok(key) => Some(key),
            Err(err) => {
                warn!(url = %url, error = %err, "cannot derive cache key; caching skipped");
                None
            }
        }
    }

    async fn read_cache(&self, key: Option<&CacheKey>, device: &str) -> Option<RenderResult> {
        let (cache, key) = (self.cache.as_ref()?, key?);
        match cache.get(key).await {
            Ok(Some(html)) => {
                info!(key = %key, "cache hit");
                Some(RenderResult {
                    html,
                    device: device.to_string(),
                    cache_hit: true,
                    cache_url: Some(cache.locator(key)),
                })
            }
            Ok(None) => {
                debug!(key = %key, "cache miss");
                None
            }
            Err(err) => {
                warn!(key = %key, error = %err, "cache read failed; rendering instead");
                None
            }
        }
    }

    async fn write_cache(&self, key: &CacheKey, html: &str) -> Option<String> {
        let cache = self.cache.as_ref()?;
        match cache.put(key, html, HTML_CONTENT_TYPE).await {
            Ok(locator) => {
                info!(key = %key, locator = %locator, "stored page");
                Some(locator)
            }
            Err(err) => {
                warn!(key = %key, error = %err, "cache write failed");
                None
            }
        }
    }

    async fn render_in_session(
        &self,
        session: &LeasedSession,
        url: &Url,
        device: &str,
        filter: &RequestFilter,
        policy: &RenderPolicy,
    ) -> Result<String> {
        if self.config.preload_pages {
            self.preload(session, url).await;
        }

        let page = self.load_with_retries(session, url, filter, policy).await?;
        let captured = self.capture(page.as_ref(), url, device, policy).await;
        close_page(page.as_ref()).await;
        Ok(captured?)
    }

    async fn capture(
        &self,
        page: &dyn Page,
        url: &Url,
        device: &str,
        policy: &RenderPolicy,
    ) -> std::result::Result<String, BrowserError> {
        self.post_process(page, url, device, policy).await?;
        page.content().await
    }

    /// Loads the page once and discards it. Failures are logged only.
    async fn preload(&self, session: &LeasedSession, url: &Url) {
        debug!(url = %url, "pre-warming page");
        if let Err(err) = self.warm(session, url).await {
            warn!(url = %url, error = %err, "pre-warm failed; continuing");
        }
    }

    async fn warm(
        &self,
        session: &LeasedSession,
        url: &Url,
    ) -> std::result::Result<(), BrowserError> {
        let page = session.new_page().await?;
        let navigated = page
            .navigate(url.as_str(), self.config.navigation_timeout)
            .await;
        close_page(page.as_ref()).await;
        navigated
    }

    async fn load_with_retries(
        &self,
        session: &LeasedSession,
        url: &Url,
        filter: &RequestFilter,
        policy: &RenderPolicy,
    ) -> Result<Box<dyn Page>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.attempt(session, url, filter, policy).await {
                Ok(page) => return Ok(page),
                Err(err) => err,
            };
            let message = match err {
                BrowserError::Timeout(message) => message,
                other => return Err(other.into()),
            };
            if attempt >= policy.max_tries {
                warn!(url = %url, attempt, error = %message, "load timed out; giving up");
                return Err(RenderError::load_timeout(attempt, message));
            }
            warn!(url = %url, attempt, max_tries = policy.max_tries, error = %message, "load timed out; retrying");
        }
    }

    /// One load cycle on a fresh page. The page is closed on failure.
    async fn attempt(
        &self,
        session: &LeasedSession,
        url: &Url,
        filter: &RequestFilter,
        policy: &RenderPolicy,
    ) -> std::result::Result<Box<dyn Page>, BrowserError> {
        let page = session.new_page().await?;
        match self.load(page.as_ref(), url, filter, policy).await {
            Ok(()) => Ok(page),
            Err(err) => {
                close_page(page.as_ref()).await;
                Err(err)
            }
        }
    }

    async fn load(
        &self,
        page: &dyn Page,
        url: &Url,
        filter: &RequestFilter,
        policy: &RenderPolicy,
    ) -> std::result::Result<(), BrowserError> {
        let mut monitor = NetworkActivityMonitor::attach(page, filter.clone()).await?;
        let loaded = self.wait_loaded(page, &monitor, url, policy).await;
        if let Err(err) = monitor.detach(page).await {
            debug!(error = %err, "failed to detach network monitor");
        }
        loaded
    }

    async fn wait_loaded(
        &self,
        page: &dyn Page,
        monitor: &NetworkActivityMonitor,
        url: &Url,
        policy: &RenderPolicy,
    ) -> std::result::Result<(), BrowserError> {
        page.navigate(url.as_str(), self.config.navigation_timeout)
            .await?;
        if policy.idle_check {
            let waited = monitor.wait_until_idle(self.idle_policy()).await?;
            debug!(url = %url, waited = ?waited, "network idle reached");
        }
        self.matcher.wait_ready(page, &policy.conditions).await
    }

    fn idle_policy(&self) -> IdlePolicy {
        IdlePolicy {
            window: self.config.network_idle_time,
            tick: self.config.network_idle_tick,
            timeout: self.config.network_idle_timeout,
        }
    }

    async fn post_process(
        &self,
        page: &dyn Page,
        url: &Url,
        device: &str,
        policy: &RenderPolicy,
    ) -> std::result::Result<(), BrowserError> {
        dom::remove_elements(page, EXECUTABLE_SCRIPTS_SELECTOR).await?;
        for selector in &policy.removals {
            debug!(selector = %selector, "removing elements");
            dom::remove_elements(page, selector).await?;
        }
        dom::insert_meta(page, TIMESTAMP_META, &timestamp()).await?;
        dom::insert_meta(page, DEVICE_META, device).await?;
        if policy.add_base_url {
            dom::insert_base(page, url.as_str()).await?;
        }
        Ok(())
    }
}

async fn close_page(page: &dyn Page) {
    if let Err(err) = page.close().await {
        debug!(error = %err, "failed to close page");
    }
}

fn timestamp() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}
