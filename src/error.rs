use crate::browser::BrowserError;
use crate::cache::CacheError;
use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::ParseError;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Load timeout after {attempts} attempt(s): {message}")]
    LoadTimeout { attempts: u32, message: String },

    #[error("Session setup failed: {0}")]
    SessionSetup(String),

    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] ParseError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RenderError {
    pub fn load_timeout(attempts: u32, message: impl Into<String>) -> Self {
        RenderError::LoadTimeout {
            attempts,
            message: message.into(),
        }
    }

    pub fn session_setup(message: impl Into<String>) -> Self {
        RenderError::SessionSetup(message.into())
    }

    pub fn is_load_timeout(&self) -> bool {
        matches!(self, RenderError::LoadTimeout { .. })
    }

    pub fn to_payload(&self) -> ErrorPayload {
        match self {
            RenderError::LoadTimeout { .. } => ErrorPayload::new(
                ErrorCategory::Timeout,
                self.to_string(),
                "Raise operation_timeout/network_idle_timeout or max_tries, and check that the readiness selectors can appear.",
            ),
            RenderError::SessionSetup(msg) => {
                let lower = msg.to_ascii_lowercase();
                if lower.contains("chrome feature") {
                    ErrorPayload::new(
                        ErrorCategory::Config,
                        self.to_string(),
                        "Rebuild with `cargo build --features chrome` to enable the Chromium backend.",
                    )
                } else if lower.contains("executable") || lower.contains("could not auto detect") {
                    ErrorPayload::new(
                        ErrorCategory::Browser,
                        self.to_string(),
                        "Install Chromium/Chrome and ensure it is on PATH (or set CHROME to its path).",
                    )
                } else {
                    ErrorPayload::new(
                        ErrorCategory::Browser,
                        self.to_string(),
                        "Check the browser installation and sandbox permissions; rerun with --verbose.",
                    )
                }
            }
            RenderError::Browser(e) => ErrorPayload::new(
                ErrorCategory::Browser,
                e.to_string(),
                "Re-run with --verbose to inspect the browser protocol trace.",
            ),
            RenderError::InvalidUrl(e) => ErrorPayload::new(
                ErrorCategory::Config,
                e.to_string(),
                "Verify URL/format (e.g., https://example.com/app).",
            ),
            RenderError::Config(e) => ErrorPayload::new(
                ErrorCategory::Config,
                e.to_string(),
                "Check the config file, SPA_RENDERER_* environment variables and --set values.",
            ),
            RenderError::Cache(e) => ErrorPayload::new(
                ErrorCategory::Config,
                e.to_string(),
                "Check the s3_* settings or disable store_pages/return_cached_pages.",
            ),
            RenderError::Io(e) => ErrorPayload::new(
                ErrorCategory::Config,
                e.to_string(),
                "Check file paths/permissions.",
            ),
            RenderError::Serialization(e) => ErrorPayload::new(
                ErrorCategory::Unknown,
                e.to_string(),
                "Re-run with --verbose; file an issue if persistent.",
            ),
        }
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Config,
    Timeout,
    Browser,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub category: ErrorCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl ErrorPayload {
    pub fn new(category: ErrorCategory, message: String, remediation: impl Into<String>) -> Self {
        Self {
            category,
            message,
            remediation: Some(remediation.into()),
        }
    }
}
