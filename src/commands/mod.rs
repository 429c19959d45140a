mod cache_key;
mod devices;
mod render;
mod show_config;

pub use cache_key::run_cache_key;
pub use devices::run_devices;
pub use render::{run_render, RenderFlags};
pub use show_config::run_show_config;
