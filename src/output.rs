use crate::error::ErrorPayload;
use crate::render::RenderResult;
use serde::{Deserialize, Serialize};

/// Schema version for output payloads.
pub const SPA_OUTPUT_VERSION: &str = "0.1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum SpaOutput {
    Render(RenderOutput),
    CacheKey(CacheKeyOutput),
    Devices(DevicesOutput),
    Config(ConfigOutput),
    Error(ErrorOutput),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOutput {
    pub version: String,
    pub url: String,
    pub device: String,
    pub cache_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_url: Option<String>,
    pub html: String,
}

impl RenderOutput {
    pub fn new(url: impl Into<String>, result: RenderResult) -> Self {
        Self {
            version: SPA_OUTPUT_VERSION.to_string(),
            url: url.into(),
            device: result.device,
            cache_hit: result.cache_hit,
            cache_url: result.cache_url,
            html: result.html,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheKeyOutput {
    pub version: String,
    pub url: String,
    pub device: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub name: String,
    pub viewport: String,
    pub mobile: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicesOutput {
    pub version: String,
    pub devices: Vec<DeviceSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOutput {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Resolved values with secrets masked.
    pub values: toml::Table,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorOutput {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub error: ErrorPayload,
}
