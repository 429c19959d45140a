//! SPA Renderer Library
//!
//! Renders JavaScript-heavy single-page applications to static HTML. A page
//! is loaded in an isolated headless browser session emulating a device,
//! allowed to settle (network idle plus readiness selectors), stripped of
//! executable scripts and serialized. Rendered pages can be stored in and
//! served from an S3-compatible object store.
//!
//! # Module Overview
//!
//! - [`render`] - Render orchestration (cache, session, retries, post-processing)
//! - [`browser`] - Browser driver abstraction and the Chromium backend
//! - [`session`] - Bounded factory for isolated browser sessions
//! - [`monitor`] - Network activity tracking and idle detection
//! - [`readiness`] - Readiness conditions and the round-based matcher
//! - [`device`] - Known devices, viewport parsing, profile resolution
//! - [`cache`] - Cache key derivation and blob stores
//! - [`config`] - Layered configuration
//! - [`output`] - JSON output schemas
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use spa_renderer_lib::{Config, RenderOrchestrator, RenderRequest};
//!
//! # async fn example() -> spa_renderer_lib::Result<()> {
//! let config = Arc::new(Config::load(None)?);
//! let renderer = RenderOrchestrator::from_config(config)?;
//!
//! let mut request = RenderRequest::new("https://example.com/shop");
//! request.device = Some("iPhone 12".to_string());
//! let result = renderer.render(&request).await?;
//! println!("{} bytes for {}", result.html.len(), result.device);
//! # Ok(())
//! # }
//! ```

pub mod browser;
pub mod cache;
pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod output;
pub mod readiness;
pub mod render;
pub mod session;

pub use browser::{BrowserDriver, BrowserError, ElementState, Page, Session, SessionOptions};
pub use cache::{
    BlobCache, CacheError, CacheKey, CacheKeyCodec, MemoryBlobCache, S3BlobCache, S3Settings,
};
pub use config::{Config, ConfigError, ConfigStore};
pub use device::{DeviceProfile, DeviceResolver, KnownDevices, Viewport};
pub use error::{ErrorCategory, ErrorPayload, RenderError, Result};
pub use monitor::{IdlePolicy, NetworkActivityMonitor, RequestFilter};
pub use output::{ErrorOutput, SpaOutput, SPA_OUTPUT_VERSION};
pub use readiness::{ReadinessCondition, ReadinessMatcher};
pub use render::{RenderOrchestrator, RenderRequest, RenderResult};
pub use session::{SessionFactory, SessionFactoryOptions};
