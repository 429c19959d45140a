use std::path::PathBuf;
use std::process::ExitCode;

use spa_renderer_lib::config::ConfigError;
use spa_renderer_lib::device::{DeviceRequest, DeviceResolver};
use spa_renderer_lib::output::{CacheKeyOutput, SPA_OUTPUT_VERSION};
use spa_renderer_lib::{CacheKeyCodec, RenderError, SpaOutput};

use crate::cli::OutputFormat;
use crate::formatting::{render_error, write_output};
use crate::settings::{init_logging, load_config};

/// Run the cache-key command. The device resolves the same way a render would.
pub fn run_cache_key(
    config_path: Option<PathBuf>,
    overrides: &[String],
    verbose: bool,
    url: String,
    device: Option<String>,
    format: OutputFormat,
) -> ExitCode {
    let config = match load_config(config_path.as_deref(), overrides) {
        Ok(cfg) => cfg,
        Err(err) => return render_error(err, format, None),
    };
    init_logging(&config, verbose);

    let resolver = match DeviceResolver::from_config(&config) {
        Ok(resolver) => resolver,
        Err(err) => return render_error(err.into(), format, None),
    };
    let (device, _) = resolver.resolve(&DeviceRequest {
        device: device.as_deref(),
        ..DeviceRequest::default()
    });

    let key = CacheKeyCodec::from_config(&config).and_then(|codec| {
        codec
            .derive_key(&url, &device)
            .map_err(|e| ConfigError::InvalidValue {
                key: "url".to_string(),
                message: e.to_string(),
            })
    });
    let key = match key {
        Ok(key) => key,
        Err(err) => return render_error(RenderError::from(err), format, None),
    };

    let body = SpaOutput::CacheKey(CacheKeyOutput {
        version: SPA_OUTPUT_VERSION.to_string(),
        url,
        device,
        key: key.to_string(),
    });
    if let Err(err) = write_output(&body, format, None) {
        return render_error(
            RenderError::Io(std::io::Error::other(err.to_string())),
            format,
            None,
        );
    }
    ExitCode::SUCCESS
}
