//! Browser automation seam for page rendering.
//!
//! The render engine never talks to a concrete browser. It drives the traits
//! defined here, and a backend implements them.
//!
//! # Module Structure
//!
//! - [`dom`] - Fixed-shape DOM mutation scripts (remove, meta, base)
//! - `chrome` - Chromium backend over the DevTools protocol (feature `chrome`)
//!
//! # Request events
//!
//! Pages report request lifecycle through a single observer interface. A
//! subscriber receives [`RequestEvent::Started`] once per request and at most
//! one terminal event ([`RequestEvent::Finished`] or [`RequestEvent::Failed`])
//! carrying the same [`RequestId`].

pub mod dom;

#[cfg(feature = "chrome")]
mod chrome;

#[cfg(feature = "chrome")]
pub use chrome::ChromeDriver;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::DeviceProfile;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrowserError {
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Browser launch failed: {0}")]
    Launch(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Browser session closed")]
    Closed,
}

impl BrowserError {
    pub fn timeout(message: impl Into<String>) -> Self {
        BrowserError::Timeout(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        BrowserError::Protocol(message.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BrowserError::Timeout(_))
    }
}

/// Identity of a single network request within one page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub String);

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        RequestId(value.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestEvent {
    Started {
        id: RequestId,
        url: String,
        method: String,
    },
    Finished {
        id: RequestId,
    },
    Failed {
        id: RequestId,
    },
}

impl RequestEvent {
    pub fn id(&self) -> &RequestId {
        match self {
            RequestEvent::Started { id, .. }
            | RequestEvent::Finished { id }
            | RequestEvent::Failed { id } => id,
        }
    }
}

/// Receives request lifecycle events from a page.
pub trait RequestObserver: Send + Sync {
    fn on_request_event(&self, event: &RequestEvent);
}

/// Handle returned by [`Page::subscribe`], used to deregister the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Target state of an element for [`Page::wait_for_selector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementState {
    #[default]
    Attached,
    Detached,
    Hidden,
    Visible,
}

impl ElementState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementState::Attached => "attached",
            ElementState::Detached => "detached",
            ElementState::Hidden => "hidden",
            ElementState::Visible => "visible",
        }
    }
}

impl fmt::Display for ElementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "attached" => Ok(ElementState::Attached),
            "detached" => Ok(ElementState::Detached),
            "hidden" => Ok(ElementState::Hidden),
            "visible" => Ok(ElementState::Visible),
            other => Err(format!(
                "unknown element state '{other}' (expected attached, detached, hidden or visible)"
            )),
        }
    }
}

/// Everything a backend needs to start an isolated session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub profile: DeviceProfile,
    pub extra_headers: BTreeMap<String, String>,
    pub headless: bool,
    /// Upper bound for navigation and protocol round-trips.
    pub navigation_timeout: Duration,
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn open_session(
        &self,
        options: &SessionOptions,
    ) -> Result<Box<dyn Session>, BrowserError>;
}

#[async_trait]
pub trait Session: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn Page>, BrowserError>;

    async fn close(&self) -> Result<(), BrowserError>;
}

#[async_trait]
pub trait Page: Send + Sync {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    async fn subscribe(
        &self,
        observer: Arc<dyn RequestObserver>,
    ) -> Result<SubscriptionId, BrowserError>;

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BrowserError>;

    /// Returns whether `selector` currently matches at least one element.
    async fn query_selector(&self, selector: &str) -> Result<bool, BrowserError>;

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: ElementState,
        timeout: Duration,
    ) -> Result<(), BrowserError>;

    async fn evaluate(&self, script: &str) -> Result<(), BrowserError>;

    async fn content(&self) -> Result<String, BrowserError>;

    async fn close(&self) -> Result<(), BrowserError>;
}
