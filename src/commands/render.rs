use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use spa_renderer_lib::config::ConfigError;
use spa_renderer_lib::output::RenderOutput;
use spa_renderer_lib::{
    ReadinessCondition, RenderError, RenderOrchestrator, RenderRequest, SpaOutput, Viewport,
};
use tracing::debug;

use crate::cli::OutputFormat;
use crate::formatting::{render_error, write_output};
use crate::settings::{init_logging, load_config, log_effective_config};

/// Flags of the `render` subcommand.
#[derive(Debug, Clone, Default)]
pub struct RenderFlags {
    pub url: String,
    pub device: Option<String>,
    pub screen: Option<Viewport>,
    pub user_agent: Option<String>,
    pub user_agent_append: Option<String>,
    pub debug: bool,
    pub headers: Vec<String>,
    pub checks: Vec<ReadinessCondition>,
    pub removals: Vec<String>,
    pub add_base_url: bool,
    pub no_idle_check: bool,
    pub store: bool,
    pub use_cache: bool,
    pub max_tries: Option<u32>,
}

impl RenderFlags {
    /// Flags left at their defaults stay unset so the configuration applies.
    pub fn to_request(&self) -> Result<RenderRequest, RenderError> {
        Ok(RenderRequest {
            url: self.url.clone(),
            device: self.device.clone(),
            screen: self.screen,
            user_agent: self.user_agent.clone(),
            user_agent_append: self.user_agent_append.clone(),
            debug: self.debug.then_some(true),
            extra_headers: parse_headers(&self.headers)?,
            ready_conditions: (!self.checks.is_empty()).then(|| self.checks.clone()),
            remove_elements: (!self.removals.is_empty()).then(|| self.removals.clone()),
            add_base_url: self.add_base_url.then_some(true),
            network_idle_check: self.no_idle_check.then_some(false),
            store_pages: self.store.then_some(true),
            return_cached: self.use_cache.then_some(true),
            max_tries: self.max_tries,
        })
    }
}

fn parse_headers(raw: &[String]) -> Result<BTreeMap<String, String>, RenderError> {
    raw.iter()
        .map(|header| {
            header
                .split_once('=')
                .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
                .filter(|(name, _)| !name.is_empty())
                .ok_or_else(|| {
                    RenderError::from(ConfigError::InvalidValue {
                        key: "header".to_string(),
                        message: format!("'{header}' is not NAME=VALUE"),
                    })
                })
        })
        .collect()
}

/// Run the render command.
pub async fn run_render(
    config_path: Option<PathBuf>,
    overrides: &[String],
    verbose: bool,
    flags: RenderFlags,
    format: OutputFormat,
    output: Option<PathBuf>,
) -> ExitCode {
    let config = match load_config(config_path.as_deref(), overrides) {
        Ok(cfg) => cfg,
        Err(err) => return render_error(err, format, output),
    };
    init_logging(&config, verbose);
    log_effective_config(config_path.as_deref(), &config);

    let request = match flags.to_request() {
        Ok(request) => request,
        Err(err) => return render_error(err, format, output),
    };
    let orchestrator = match RenderOrchestrator::from_config(Arc::new(config)) {
        Ok(orchestrator) => orchestrator,
        Err(err) => return render_error(err, format, output),
    };

    debug!(url = %request.url, "rendering");
    let result = match orchestrator.render(&request).await {
        Ok(result) => result,
        Err(err) => return render_error(err, format, output),
    };

    let body = SpaOutput::Render(RenderOutput::new(request.url, result));
    if let Err(err) = write_output(&body, format, output.clone()) {
        return render_error(
            RenderError::Io(std::io::Error::other(err.to_string())),
            format,
            output,
        );
    }
    ExitCode::SUCCESS
}
