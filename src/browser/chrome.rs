//! Chromium backend over the DevTools protocol.
//!
//! Each session launches its own browser process with a private profile
//! directory, so renders never share cookies, storage or cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetTouchEmulationEnabledParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, Headers,
    SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
use chromiumoxide::error::CdpError;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use super::dom::{selector_present_script, selector_state_script};
use super::{
    BrowserDriver, BrowserError, ElementState, Page, RequestEvent, RequestId, RequestObserver,
    Session, SessionOptions, SubscriptionId,
};

const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(100);

static PROFILE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn cdp_error(err: CdpError) -> BrowserError {
    match err {
        CdpError::Timeout => BrowserError::timeout("DevTools request timed out"),
        other => BrowserError::protocol(other.to_string()),
    }
}

/// Launches a fresh Chromium per session.
#[derive(Debug, Clone)]
pub struct ChromeDriver {
    executable: Option<PathBuf>,
    extra_args: Vec<String>,
}

impl Default for ChromeDriver {
    /// Uses the `CHROME` environment variable as the executable when set.
    fn default() -> Self {
        Self {
            executable: std::env::var_os("CHROME").map(PathBuf::from),
            extra_args: Vec::new(),
        }
    }
}

impl ChromeDriver {
    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    fn profile_dir() -> PathBuf {
        std::env::temp_dir().join(format!(
            "spa-renderer-{}-{}",
            std::process::id(),
            PROFILE_COUNTER.fetch_add(1, Ordering::Relaxed)
        ))
    }

    fn browser_config(
        &self,
        options: &SessionOptions,
        profile_dir: &Path,
    ) -> Result<BrowserConfig, BrowserError> {
        let viewport = options.profile.viewport;
        let mut builder = BrowserConfig::builder()
            .user_data_dir(profile_dir)
            .window_size(viewport.width, viewport.height)
            .viewport(None)
            .request_timeout(options.navigation_timeout)
            .arg("--ignore-certificate-errors")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking");
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        for arg in &self.extra_args {
            builder = builder.arg(arg.as_str());
        }
        builder.build().map_err(BrowserError::Launch)
    }
}

#[async_trait]
impl BrowserDriver for ChromeDriver {
    async fn open_session(
        &self,
        options: &SessionOptions,
    ) -> Result<Box<dyn Session>, BrowserError> {
        let profile_dir = Self::profile_dir();
        let config = self.browser_config(options, &profile_dir)?;
        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;
        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "browser handler event failed");
                }
            }
        });

        if let Err(err) = browser.version().await {
            let _ = browser.close().await;
            events.abort();
            remove_profile(&profile_dir).await;
            return Err(BrowserError::Launch(format!(
                "browser did not respond after launch: {err}"
            )));
        }
        debug!(profile = %profile_dir.display(), "browser launched");

        Ok(Box::new(ChromeSession {
            browser: tokio::sync::Mutex::new(Some(browser)),
            events,
            profile_dir,
            options: options.clone(),
        }))
    }
}

async fn remove_profile(dir: &Path) {
    if let Err(err) = tokio::fs::remove_dir_all(dir).await {
        debug!(profile = %dir.display(), error = %err, "failed to remove browser profile");
    }
}

struct ChromeSession {
    browser: tokio::sync::Mutex<Option<Browser>>,
    events: JoinHandle<()>,
    profile_dir: PathBuf,
    options: SessionOptions,
}

impl ChromeSession {
    async fn apply_overrides(&self, page: &chromiumoxide::Page) -> Result<(), BrowserError> {
        let profile = &self.options.profile;
        page.execute(EnableParams::default())
            .await
            .map_err(cdp_error)?;

        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(profile.viewport.width))
            .height(i64::from(profile.viewport.height))
            .device_scale_factor(profile.device_scale_factor)
            .mobile(profile.is_mobile)
            .build()
            .map_err(BrowserError::protocol)?;
        page.execute(metrics).await.map_err(cdp_error)?;
        if profile.has_touch {
            page.execute(SetTouchEmulationEnabledParams::new(true))
                .await
                .map_err(cdp_error)?;
        }

        if let Some(user_agent) = profile.user_agent() {
            let params = SetUserAgentOverrideParams::builder()
                .user_agent(user_agent)
                .build()
                .map_err(BrowserError::protocol)?;
            page.execute(params).await.map_err(cdp_error)?;
        }

        if !self.options.extra_headers.is_empty() {
            let headers: serde_json::Map<String, serde_json::Value> = self
                .options
                .extra_headers
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            let params = SetExtraHttpHeadersParams::builder()
                .headers(Headers::new(serde_json::Value::Object(headers)))
                .build()
                .map_err(BrowserError::protocol)?;
            page.execute(params).await.map_err(cdp_error)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Session for ChromeSession {
    async fn new_page(&self) -> Result<Box<dyn Page>, BrowserError> {
        let page = {
            let guard = self.browser.lock().await;
            let browser = guard.as_ref().ok_or(BrowserError::Closed)?;
            browser.new_page("about:blank").await.map_err(cdp_error)?
        };
        if let Err(err) = self.apply_overrides(&page).await {
            let _ = page.close().await;
            return Err(err);
        }
        Ok(Box::new(ChromePage {
            page,
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
        }))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        let browser = self.browser.lock().await.take();
        let closed = match browser {
            Some(mut browser) => {
                let closed = browser.close().await.map(|_| ()).map_err(cdp_error);
                if let Err(err) = browser.wait().await {
                    debug!(error = %err, "browser process did not exit cleanly");
                }
                closed
            }
            None => Ok(()),
        };
        self.events.abort();
        remove_profile(&self.profile_dir).await;
        closed
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        self.events.abort();
    }
}

struct ChromePage {
    page: chromiumoxide::Page,
    subscriptions: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_subscription: AtomicU64,
}

impl ChromePage {
    async fn evaluate_bool(&self, script: String) -> Result<bool, BrowserError> {
        self.page
            .evaluate_expression(script)
            .await
            .map_err(cdp_error)?
            .into_value::<bool>()
            .map_err(|e| BrowserError::protocol(e.to_string()))
    }

    fn abort_subscriptions(&self) {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, task) in subscriptions.drain() {
            task.abort();
        }
    }
}

#[async_trait]
impl Page for ChromePage {
    async fn navigate(&self, url: &str, limit: Duration) -> Result<(), BrowserError> {
        match timeout(limit, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(cdp_error(err)),
            Err(_) => Err(BrowserError::timeout(format!(
                "navigation to {url} exceeded {limit:?}"
            ))),
        }
    }

    async fn subscribe(
        &self,
        observer: Arc<dyn RequestObserver>,
    ) -> Result<SubscriptionId, BrowserError> {
        let mut started = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(cdp_error)?;
        let mut finished = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(cdp_error)?;
        let mut failed = self
            .page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(cdp_error)?;

        let task = tokio::spawn(async move {
            loop {
                // Start events are polled first so a request never ends before it starts.
                let event = tokio::select! {
                    biased;
                    Some(e) = started.next() => RequestEvent::Started {
                        id: RequestId(e.request_id.inner().clone()),
                        url: e.request.url.clone(),
                        method: e.request.method.clone(),
                    },
                    Some(e) = finished.next() => RequestEvent::Finished {
                        id: RequestId(e.request_id.inner().clone()),
                    },
                    Some(e) = failed.next() => RequestEvent::Failed {
                        id: RequestId(e.request_id.inner().clone()),
                    },
                    else => break,
                };
                observer.on_request_event(&event);
            }
        });

        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, task);
        Ok(SubscriptionId(id))
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BrowserError> {
        let task = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id.0);
        if let Some(task) = task {
            task.abort();
        }
        Ok(())
    }

    async fn query_selector(&self, selector: &str) -> Result<bool, BrowserError> {
        self.evaluate_bool(selector_present_script(selector)).await
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: ElementState,
        limit: Duration,
    ) -> Result<(), BrowserError> {
        let deadline = Instant::now() + limit;
        let script = selector_state_script(selector, state);
        loop {
            if self.evaluate_bool(script.clone()).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::timeout(format!(
                    "waiting for '{selector}' to be {state} exceeded {limit:?}"
                )));
            }
            sleep(SELECTOR_POLL_INTERVAL).await;
        }
    }

    async fn evaluate(&self, script: &str) -> Result<(), BrowserError> {
        self.page
            .evaluate_expression(script)
            .await
            .map(|_| ())
            .map_err(cdp_error)
    }

    async fn content(&self) -> Result<String, BrowserError> {
        self.page.content().await.map_err(cdp_error)
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.abort_subscriptions();
        match self.page.clone().close().await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(error = %err, "failed to close page");
                Err(cdp_error(err))
            }
        }
    }
}
