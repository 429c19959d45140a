use std::path::PathBuf;
use std::process::ExitCode;

use spa_renderer_lib::config::Config;
use spa_renderer_lib::output::{ConfigOutput, SPA_OUTPUT_VERSION};
use spa_renderer_lib::{RenderError, SpaOutput};

use crate::cli::OutputFormat;
use crate::formatting::{render_error, write_output};
use crate::settings::{config_source, load_store};

/// Run the show-config command. The config is validated before it is shown.
pub fn run_show_config(
    config_path: Option<PathBuf>,
    overrides: &[String],
    format: OutputFormat,
) -> ExitCode {
    let store = match load_store(config_path.as_deref(), overrides) {
        Ok(store) => store,
        Err(err) => return render_error(err, format, None),
    };
    let values = match Config::from_store(&store).and_then(|_| store.masked()) {
        Ok(values) => values,
        Err(err) => return render_error(err.into(), format, None),
    };

    let body = SpaOutput::Config(ConfigOutput {
        version: SPA_OUTPUT_VERSION.to_string(),
        source: Some(config_source(config_path.as_deref())),
        values,
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
