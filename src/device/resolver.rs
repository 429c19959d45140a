use std::collections::BTreeMap;

use tracing::debug;

use super::known::KnownDevices;
use super::profile::{DeviceProfile, Viewport};
use crate::config::{Config, ConfigError};

/// Preset used when nothing else matches.
pub const DEFAULT_PRESET: &str = "desktop";

/// Deployment-level fallbacks consulted when a request leaves a field unset.
#[derive(Debug, Clone, Default)]
pub struct DeviceDefaults {
    pub device: Option<String>,
    pub user_agent: Option<String>,
    pub user_agent_append: Option<String>,
    pub default_user_agent: String,
    pub screen_presets: BTreeMap<String, Viewport>,
    /// `(user-agent substring, preset)` pairs, checked in order.
    pub user_agent_screen_mapping: Vec<(String, String)>,
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl From<&Config> for DeviceDefaults {
    fn from(config: &Config) -> Self {
        Self {
            device: non_empty(&config.device),
            user_agent: non_empty(&config.user_agent),
            user_agent_append: non_empty(&config.user_agent_append),
            default_user_agent: config.default_user_agent.clone(),
            screen_presets: config.screen_presets.clone(),
            user_agent_screen_mapping: config.user_agent_screen_mapping.clone(),
        }
    }
}

/// Per-request device hints.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceRequest<'a> {
    pub device: Option<&'a str>,
    pub screen: Option<Viewport>,
    pub user_agent: Option<&'a str>,
    pub user_agent_append: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct DeviceResolver {
    known: KnownDevices,
    defaults: DeviceDefaults,
}

impl DeviceResolver {
    pub fn new(known: KnownDevices, defaults: DeviceDefaults) -> Self {
        Self { known, defaults }
    }

    /// Built-in devices overlaid with the configured `devices` table.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let known = KnownDevices::builtin()
            .map_err(|e| ConfigError::Parse(format!("built-in devices: {e}")))?
            .with_overrides(&config.devices);
        Ok(Self::new(known, DeviceDefaults::from(config)))
    }

    pub fn known_devices(&self) -> &KnownDevices {
        &self.known
    }

    /// Resolves the device name and profile for a render. Never fails: when
    /// nothing matches, a synthetic preset profile is built.
    pub fn resolve(&self, request: &DeviceRequest<'_>) -> (String, DeviceProfile) {
        let user_agent = request
            .user_agent
            .and_then(non_empty)
            .or_else(|| self.defaults.user_agent.clone());
        let user_agent_append = request
            .user_agent_append
            .and_then(non_empty)
            .or_else(|| self.defaults.user_agent_append.clone());
        let declared = request
            .device
            .and_then(non_empty)
            .or_else(|| self.defaults.device.clone());

        let matched = self
            .resolve_name(declared.as_deref(), user_agent.as_deref())
            .and_then(|name| self.known.profile(&name).map(|profile| (name, profile)));

        let (name, mut profile, screen) = match matched {
            Some((name, profile)) => (name, profile, request.screen),
            None => {
                let preset = declared
                    .filter(|name| self.defaults.screen_presets.contains_key(name))
                    .unwrap_or_else(|| self.preset_for(user_agent.as_deref()));
                let screen = request
                    .screen
                    .or_else(|| self.defaults.screen_presets.get(&preset).copied());
                let profile = DeviceProfile::synthetic(
                    &preset,
                    Viewport::default(),
                    &self.defaults.default_user_agent,
                );
                (preset, profile, screen)
            }
        };

        if let Some(screen) = screen {
            profile.viewport = screen;
        }
        if let Some(user_agent) = user_agent {
            profile.user_agent = user_agent;
        }
        if let Some(append) = user_agent_append {
            if !profile.user_agent.is_empty() {
                profile.user_agent = format!("{} {}", profile.user_agent, append);
            }
        }

        debug!(device = %name, viewport = %profile.viewport, user_agent = %profile.user_agent, "resolved device");
        (name, profile)
    }

    fn resolve_name(&self, declared: Option<&str>, user_agent: Option<&str>) -> Option<String> {
        if let Some(name) = declared {
            if self.known.contains(name) {
                debug!(device = name, "using declared device");
                return Some(name.to_string());
            }
            debug!(device = name, "declared device is unknown; falling back");
        }

        let user_agent = user_agent?;
        if let Some(name) = self.known.names_descending().find(|name| {
            self.known
                .get(name)
                .is_some_and(|d| d.user_agent.contains(user_agent))
        }) {
            debug!(device = name, "user agent match (full)");
            return Some(name.to_string());
        }
        if let Some(name) = self
            .known
            .names_descending()
            .find(|name| user_agent.contains(name))
        {
            debug!(device = name, "user agent match (partial)");
            return Some(name.to_string());
        }
        None
    }

    fn preset_for(&self, user_agent: Option<&str>) -> String {
        if let Some(user_agent) = user_agent {
            let lower = user_agent.to_lowercase();
            for (needle, preset) in &self.defaults.user_agent_screen_mapping {
                if lower.contains(&needle.to_lowercase()) {
                    return preset.clone();
                }
            }
        }
        DEFAULT_PRESET.to_string()
    }
}
