use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::profile::{DeviceProfile, Viewport};

const BUILTIN_DEVICES: &str = include_str!("devices.yaml");

/// One entry of the known-device table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub user_agent: String,
    pub viewport: Viewport,
    #[serde(default = "default_scale_factor")]
    pub device_scale_factor: f64,
    #[serde(default)]
    pub is_mobile: bool,
    #[serde(default)]
    pub has_touch: bool,
    #[serde(default)]
    pub extra_headers: BTreeMap<String, String>,
}

fn default_scale_factor() -> f64 {
    1.0
}

#[derive(Debug, Clone, Default)]
pub struct KnownDevices {
    devices: BTreeMap<String, DeviceDescriptor>,
}

impl KnownDevices {
    pub fn builtin() -> Result<Self, serde_yaml::Error> {
        let devices: BTreeMap<String, DeviceDescriptor> = serde_yaml::from_str(BUILTIN_DEVICES)?;
        Ok(Self { devices })
    }

    pub fn from_map(devices: BTreeMap<String, DeviceDescriptor>) -> Self {
        Self { devices }
    }

    /// Adds or replaces entries; deployment-supplied devices win over built-ins.
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, DeviceDescriptor>) -> Self {
        for (name, descriptor) in overrides {
            self.devices.insert(name.clone(), descriptor.clone());
        }
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&DeviceDescriptor> {
        self.devices.get(name)
    }

    pub fn profile(&self, name: &str) -> Option<DeviceProfile> {
        self.devices.get(name).map(|d| DeviceProfile {
            name: name.to_string(),
            viewport: d.viewport,
            user_agent: d.user_agent.clone(),
            device_scale_factor: d.device_scale_factor,
            is_mobile: d.is_mobile,
            has_touch: d.has_touch,
            extra_headers: d.extra_headers.clone(),
        })
    }

    /// Names in descending order, the scan order used for user-agent matching.
    pub fn names_descending(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().rev().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DeviceDescriptor)> {
        self.devices.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
