use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;

/// Browser viewport, written `WIDTHxHEIGHT` in config files and on the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScreenParseError {
    #[error("Invalid screen format '{0}': expected WIDTHxHEIGHT (e.g., 390x844)")]
    InvalidFormat(String),
    #[error("Invalid width: {0}")]
    InvalidWidth(String),
    #[error("Invalid height: {0}")]
    InvalidHeight(String),
    #[error("Screen dimensions must be positive")]
    Zero,
}

impl FromStr for Viewport {
    type Err = ScreenParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (width, height) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| ScreenParseError::InvalidFormat(s.to_string()))?;
        if height.contains(['x', 'X']) {
            return Err(ScreenParseError::InvalidFormat(s.to_string()));
        }

        let width: u32 = width
            .trim()
            .parse()
            .map_err(|_| ScreenParseError::InvalidWidth(width.to_string()))?;
        let height: u32 = height
            .trim()
            .parse()
            .map_err(|_| ScreenParseError::InvalidHeight(height.to_string()))?;

        if width == 0 || height == 0 {
            return Err(ScreenParseError::Zero);
        }
        Ok(Viewport { width, height })
    }
}

impl TryFrom<String> for Viewport {
    type Error = ScreenParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Viewport> for String {
    fn from(viewport: Viewport) -> Self {
        viewport.to_string()
    }
}

impl std::fmt::Display for Viewport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Concrete emulation settings for one render session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProfile {
    pub name: String,
    pub viewport: Viewport,
    /// Empty when neither the device nor the configuration supplies one.
    pub user_agent: String,
    pub device_scale_factor: f64,
    pub is_mobile: bool,
    pub has_touch: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_headers: BTreeMap<String, String>,
}

impl DeviceProfile {
    /// Profile for a coarse preset ("desktop", "mobile", ...) that is not a known device.
    pub fn synthetic(name: &str, viewport: Viewport, user_agent: &str) -> Self {
        let mobile = name != "desktop";
        Self {
            name: name.to_string(),
            viewport,
            user_agent: user_agent.to_string(),
            device_scale_factor: 1.0,
            is_mobile: mobile,
            has_touch: mobile,
            extra_headers: BTreeMap::new(),
        }
    }

    pub fn user_agent(&self) -> Option<&str> {
        if self.user_agent.is_empty() {
            None
        } else {
            Some(self.user_agent.as_str())
        }
    }
}
