//! Device emulation: known-device table, viewport parsing and profile resolution.

mod known;
mod profile;
mod resolver;

pub use known::{DeviceDescriptor, KnownDevices};
pub use profile::{DeviceProfile, ScreenParseError, Viewport};
pub use resolver::{DeviceDefaults, DeviceRequest, DeviceResolver, DEFAULT_PRESET};
