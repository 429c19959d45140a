//! Session factory coordinating isolated browser sessions.
//!
//! Every render leases its own session. The factory bounds how many are open
//! at once with a semaphore; the permit travels with the lease.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::browser::{BrowserDriver, BrowserError, Page, Session, SessionOptions};
use crate::config::Config;
use crate::device::DeviceProfile;
use crate::error::{RenderError, Result};

/// Default upper bound for navigation and protocol round-trips.
pub const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SessionFactoryOptions {
    /// Maximum number of concurrently open sessions (at least one).
    pub max_concurrent_sessions: usize,
    pub navigation_timeout: Duration,
}

impl Default for SessionFactoryOptions {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 1,
            navigation_timeout: DEFAULT_NAVIGATION_TIMEOUT,
        }
    }
}

impl From<&Config> for SessionFactoryOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_concurrent_sessions: config.max_concurrent_sessions,
            navigation_timeout: config.navigation_timeout,
        }
    }
}

#[derive(Clone)]
pub struct SessionFactory {
    driver: Arc<dyn BrowserDriver>,
    options: SessionFactoryOptions,
    semaphore: Arc<Semaphore>,
}

impl SessionFactory {
    pub fn new(driver: Arc<dyn BrowserDriver>, options: SessionFactoryOptions) -> Self {
        let permits = options.max_concurrent_sessions.max(1);
        Self {
            driver,
            options,
            semaphore: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Opens an isolated session for `profile`. Waits for a free slot first.
    ///
    /// The driver releases anything it started before reporting a failure, so
    /// an error here leaves nothing open.
    pub async fn open(
        &self,
        profile: &DeviceProfile,
        extra_headers: &BTreeMap<String, String>,
        headless: bool,
    ) -> Result<LeasedSession> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| RenderError::session_setup("session factory is shut down"))?;

        let mut headers = profile.extra_headers.clone();
        headers.extend(extra_headers.iter().map(|(k, v)| (k.clone(), v.clone())));

        let options = SessionOptions {
            profile: profile.clone(),
            extra_headers: headers,
            headless,
            navigation_timeout: self.options.navigation_timeout,
        };
        debug!(device = %profile.name, viewport = %profile.viewport, headless, "opening browser session");

        let session = self
            .driver
            .open_session(&options)
            .await
            .map_err(|e| RenderError::session_setup(e.to_string()))?;

        Ok(LeasedSession {
            session,
            _permit: permit,
        })
    }
}

/// A session plus its concurrency slot. The slot frees when the lease drops.
pub struct LeasedSession {
    session: Box<dyn Session>,
    _permit: OwnedSemaphorePermit,
}

impl LeasedSession {
    pub async fn new_page(&self) -> std::result::Result<Box<dyn Page>, BrowserError> {
        self.session.new_page().await
    }

    /// Closes the session. Failures are logged; the slot is released either way.
    pub async fn close(self) {
        if let Err(err) = self.session.close().await {
            warn!(error = %err, "failed to close browser session");
        }
    }
}

/// Driver used when the binary is built without a browser backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableDriver;

#[async_trait]
impl BrowserDriver for UnavailableDriver {
    async fn open_session(
        &self,
        _options: &SessionOptions,
    ) -> std::result::Result<Box<dyn Session>, BrowserError> {
        Err(BrowserError::Launch(
            "spa-renderer was built without the chrome feature".to_string(),
        ))
    }
}

/// The browser backend compiled into this build.
pub fn default_driver() -> Arc<dyn BrowserDriver> {
    #[cfg(feature = "chrome")]
    {
        Arc::new(crate::browser::ChromeDriver::default())
    }
    #[cfg(not(feature = "chrome"))]
    {
        Arc::new(UnavailableDriver)
    }
}
