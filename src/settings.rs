use std::path::Path;

use spa_renderer_lib::config::{Config, ConfigError, ConfigStore};
use spa_renderer_lib::{logging, RenderError};
use tracing::debug;

/// Load the layered config store and apply `--set` overrides.
/// Priority: `--set` > environment > explicit path or ~/.config/spa-renderer/config.toml > defaults
pub fn load_store(path: Option<&Path>, overrides: &[String]) -> Result<ConfigStore, RenderError> {
    let mut store = Config::load_store(path)?;
    for assignment in overrides {
        store.set_from_assignment(assignment)?;
    }
    Ok(store)
}

/// Load the typed config. Validation failures name the file they came from.
pub fn load_config(path: Option<&Path>, overrides: &[String]) -> Result<Config, RenderError> {
    let store = load_store(path, overrides)?;
    Config::from_store(&store).map_err(|e| match e {
        ConfigError::Invalid(message) => match path {
            Some(p) => ConfigError::Invalid(format!("{} ({})", message, p.display())),
            None => ConfigError::Invalid(message),
        },
        other => other,
    })
    .map_err(RenderError::from)
}

/// Install logging from the config; `--verbose` forces debug level.
pub fn init_logging(config: &Config, verbose: bool) {
    let level = if verbose { "debug" } else { config.log_level.as_str() };
    if let Err(err) = logging::init(level, config.log_format) {
        eprintln!("Logging disabled: {err}");
    }
}

/// Describe where the config came from.
pub fn config_source(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .or_else(|| {
            Config::central_config_path()
                .filter(|p| p.is_file())
                .map(|p| p.display().to_string())
        })
        .unwrap_or_else(|| "defaults".to_string())
}

/// Log the effective config at debug level (visible with --verbose).
pub fn log_effective_config(config_path: Option<&Path>, config: &Config) {
    debug!("{}", format_effective_config(config, Some(&config_source(config_path))));
}

/// Format effective config as a single-line string.
pub fn format_effective_config(config: &Config, source: Option<&str>) -> String {
    let source = source.unwrap_or("defaults");
    let device = if config.device.is_empty() {
        "auto"
    } else {
        config.device.as_str()
    };
    format!(
        "Effective config [{source}]: device={device}, max_tries={}, sessions={}, timeouts: nav={:?}, operation={:?}, network-idle={} (window {:?}, tick {:?}, limit {:?}), cache: store={}, read={}, bucket={}",
        config.max_tries,
        config.max_concurrent_sessions,
        config.navigation_timeout,
        config.operation_timeout,
        config.network_idle_check,
        config.network_idle_time,
        config.network_idle_tick,
        config.network_idle_timeout,
        config.store_pages,
        config.return_cached_pages,
        if config.s3_bucket_name.is_empty() {
            "-"
        } else {
            config.s3_bucket_name.as_str()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn overrides_apply_on_top_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("renderer.toml");
        std::fs::write(&path, "max_tries = 5\ndevice = \"mobile\"\n").unwrap();

        let config = load_config(Some(&path), &["max_tries=2".to_string()]).unwrap();
        assert_eq!(config.max_tries, 2);
        assert_eq!(config.device, "mobile");
    }

    #[test]
    fn override_type_change_is_a_config_error() {
        let err = load_config(None, &["max_tries=\"many\"".to_string()]).unwrap_err();
        assert!(matches!(err, RenderError::Config(ConfigError::TypeMismatch { .. })));
        assert!(err.to_string().contains("max_tries"));
    }

    #[test]
    fn invalid_values_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("renderer.toml");
        std::fs::write(&path, "max_tries = 0\n").unwrap();

        let err = load_config(Some(&path), &[]).unwrap_err();
        assert!(err.to_string().contains("max_tries"));
        assert!(err.to_string().contains("renderer.toml"));
    }

    #[test]
    fn format_effective_config_includes_key_fields() {
        let mut config = Config::builtin().unwrap();
        config.device = "iPhone 12".to_string();
        config.navigation_timeout = Duration::from_secs(12);
        config.s3_bucket_name = "pages".to_string();

        let summary = format_effective_config(&config, Some("renderer.toml"));
        assert!(summary.contains("[renderer.toml]"));
        assert!(summary.contains("device=iPhone 12"));
        assert!(summary.contains("max_tries=3"));
        assert!(summary.contains("nav=12s"));
        assert!(summary.contains("bucket=pages"));
    }

    #[test]
    fn format_effective_config_defaults() {
        let config = Config::builtin().unwrap();
        let summary = format_effective_config(&config, None);
        assert!(summary.contains("[defaults]"));
        assert!(summary.contains("device=auto"));
        assert!(summary.contains("bucket=-"));
    }
}
