use std::str::FromStr;

use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::{ConfigError, LogFormat};

/// Parses a level name (`trace` .. `error`, or `off`).
pub fn parse_level(level: &str) -> Result<LevelFilter, ConfigError> {
    if level.trim().eq_ignore_ascii_case("off") {
        return Ok(LevelFilter::OFF);
    }
    Level::from_str(level.trim())
        .map(LevelFilter::from_level)
        .map_err(|e| ConfigError::InvalidValue {
            key: "log_level".to_string(),
            message: e.to_string(),
        })
}

/// Install the global tracing subscriber. Logs go to stderr; `RUST_LOG`
/// directives take precedence over `level`.
pub fn init(level: &str, format: LogFormat) -> Result<(), ConfigError> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(parse_level(level)?.into())
        .from_env_lossy();

    let fmt_layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|err| ConfigError::Invalid(format!("failed to install tracing subscriber: {err}")))
}
