use clap::{Parser, Subcommand, ValueEnum};
use spa_renderer_lib::{ReadinessCondition, Viewport};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "spa-renderer")]
#[command(
    version,
    about = "SPA Renderer - Render single-page applications to static HTML",
    long_about = "SPA Renderer\n\nLoads a URL in an isolated headless browser emulating a device, waits until the page is settled (network idle plus readiness selectors), strips executable scripts and prints the serialized DOM.\n\nCommands:\n- render: render one URL.\n- cache-key: print the page-cache key for a URL.\n- devices: list known device names.\n- show-config: print the effective configuration with secrets masked.\n\nUse --help on any subcommand for details."
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Enable verbose output (debug logging)")]
    pub verbose: bool,

    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Config file (TOML); defaults to ~/.config/spa-renderer/config.toml when present"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long = "set",
        global = true,
        value_name = "KEY=VALUE",
        help = "Override a config key (repeatable); VALUE is parsed as a TOML literal"
    )]
    pub overrides: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Render a URL to static HTML
    Render {
        #[arg(help = "Absolute URL to render")]
        url: String,

        #[arg(long, help = "Known device name (e.g. \"iPhone 12\") or preset (desktop, tablet, mobile)")]
        device: Option<String>,

        #[arg(long, help = "Viewport dimensions (WIDTHxHEIGHT)")]
        screen: Option<Viewport>,

        #[arg(long, help = "Replace the device user agent")]
        user_agent: Option<String>,

        #[arg(long, help = "Text appended to the user agent")]
        user_agent_append: Option<String>,

        #[arg(long, help = "Run the browser with a visible window")]
        debug: bool,

        #[arg(
            long = "header",
            value_name = "NAME=VALUE",
            help = "Extra HTTP header sent with every request (repeatable)"
        )]
        headers: Vec<String>,

        #[arg(
            long = "check",
            value_name = "WHEN|SELECTOR[,SELECTOR...][|STATE]",
            help = "Readiness condition (repeatable); replaces the configured conditions"
        )]
        checks: Vec<ReadinessCondition>,

        #[arg(
            long = "remove",
            value_name = "SELECTOR",
            help = "Remove matching elements before serializing (repeatable); replaces the configured list"
        )]
        removals: Vec<String>,

        #[arg(long, help = "Insert a <base href> pointing at the requested URL")]
        add_base_url: bool,

        #[arg(long, help = "Skip waiting for network idle")]
        no_idle_check: bool,

        #[arg(long, help = "Store the rendered page in the page cache (needs s3_endpoint and s3_bucket_name)")]
        store: bool,

        #[arg(long, help = "Return a cached page when one exists")]
        use_cache: bool,

        #[arg(long, help = "Load attempts before giving up on timeouts")]
        max_tries: Option<u32>,

        #[arg(long, value_enum, default_value = "html", help = "Output format")]
        format: OutputFormat,

        #[arg(long, short, help = "Output file path (stdout if omitted)")]
        output: Option<PathBuf>,
    },

    /// Print the page-cache key for a URL
    CacheKey {
        #[arg(help = "Absolute URL")]
        url: String,

        #[arg(long, help = "Device name used in the key (defaults to the resolved device)")]
        device: Option<String>,

        #[arg(long, value_enum, default_value = "pretty", help = "Output format")]
        format: OutputFormat,
    },

    /// List known device names
    Devices {
        #[arg(long, value_enum, default_value = "pretty", help = "Output format")]
        format: OutputFormat,
    },

    /// Print the effective configuration (secrets masked)
    ShowConfig {
        #[arg(long, value_enum, default_value = "pretty", help = "Output format")]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Raw payload: the HTML for `render`, plain text otherwise
    #[default]
    Html,
    Json,
    Pretty,
}

pub fn parse() -> Cli {
    Cli::parse()
}
