use std::path::PathBuf;
use std::process::ExitCode;

use spa_renderer_lib::device::DeviceResolver;
use spa_renderer_lib::output::{DeviceSummary, DevicesOutput, SPA_OUTPUT_VERSION};
use spa_renderer_lib::{RenderError, SpaOutput};

use crate::cli::OutputFormat;
use crate::formatting::{render_error, write_output};
use crate::settings::{init_logging, load_config};

/// Run the devices command: built-in devices plus configured additions.
pub fn run_devices(
    config_path: Option<PathBuf>,
    overrides: &[String],
    verbose: bool,
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
    let devices = resolver
        .known_devices()
        .iter()
        .map(|(name, descriptor)| DeviceSummary {
            name: name.to_string(),
            viewport: descriptor.viewport.to_string(),
            mobile: descriptor.is_mobile,
        })
        .collect();

    let body = SpaOutput::Devices(DevicesOutput {
        version: SPA_OUTPUT_VERSION.to_string(),
        devices,
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
