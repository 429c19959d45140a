mod cli;
mod commands;
mod formatting;
mod settings;

use std::process::ExitCode;

use cli::Commands;
use commands::{run_cache_key, run_devices, run_render, run_show_config, RenderFlags};

#[tokio::main]
async fn main() -> ExitCode {
    run().await
}

async fn run() -> ExitCode {
    let args = cli::parse();

    match args.command {
        Commands::Render {
            url,
            device,
            screen,
            user_agent,
            user_agent_append,
            debug,
            headers,
            checks,
            removals,
            add_base_url,
            no_idle_check,
            store,
            use_cache,
            max_tries,
            format,
            output,
        } => {
            let flags = RenderFlags {
                url,
                device,
                screen,
                user_agent,
                user_agent_append,
                debug,
                headers,
                checks,
                removals,
                add_base_url,
                no_idle_check,
                store,
                use_cache,
                max_tries,
            };
            run_render(
                args.config,
                &args.overrides,
                args.verbose,
                flags,
                format,
                output,
            )
            .await
        }
        Commands::CacheKey {
            url,
            device,
            format,
        } => run_cache_key(
            args.config,
            &args.overrides,
            args.verbose,
            url,
            device,
            format,
        ),
        Commands::Devices { format } => {
            run_devices(args.config, &args.overrides, args.verbose, format)
        }
        Commands::ShowConfig { format } => run_show_config(args.config, &args.overrides, format),
    }
}
