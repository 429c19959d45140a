use std::fmt::Write as FmtWrite;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use spa_renderer_lib::output::SPA_OUTPUT_VERSION;
use spa_renderer_lib::{ErrorOutput, RenderError, SpaOutput};

use crate::cli::OutputFormat;

/// Write output in the requested format.
pub fn write_output(
    body: &SpaOutput,
    format: OutputFormat,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Html => write_raw_output(body, output.as_deref())?,
        OutputFormat::Json => write_json_output(body, output.as_deref())?,
        OutputFormat::Pretty => write_pretty_output(body, output.as_deref())?,
    };
    Ok(())
}

/// Render an error and return the appropriate exit code.
pub fn render_error(err: RenderError, format: OutputFormat, output: Option<PathBuf>) -> ExitCode {
    let error_payload = err.to_payload();
    let payload = SpaOutput::Error(ErrorOutput {
        version: SPA_OUTPUT_VERSION.to_string(),
        message: Some(error_payload.message.clone()),
        error: error_payload,
    });

    match format {
        OutputFormat::Json => {
            let content =
                serde_json::to_string(&payload).unwrap_or_else(|_| "{\"mode\":\"error\"}".into());
            if let Some(path) = output {
                if let Err(write_err) = std::fs::write(&path, &content) {
                    eprintln!("Failed to write error output: {}", write_err);
                    println!("{content}");
                }
            } else {
                println!("{content}");
            }
        }
        OutputFormat::Pretty => {
            if let Err(write_err) = write_pretty_output(&payload, output.as_deref()) {
                eprintln!("Failed to write error output: {}", write_err);
            }
        }
        // stdout is reserved for the document; errors go to stderr.
        OutputFormat::Html => {
            eprint!("{}", format_pretty(&payload, io::stderr().is_terminal()));
        }
    };

    ExitCode::from(2)
}

/// Write the bare payload: the HTML document for renders, plain text otherwise.
fn write_raw_output(body: &SpaOutput, output: Option<&Path>) -> io::Result<()> {
    let content = match body {
        SpaOutput::Render(out) => out.html.clone(),
        SpaOutput::CacheKey(out) => format!("{}\n", out.key),
        SpaOutput::Devices(out) => out
            .devices
            .iter()
            .map(|d| format!("{}\n", d.name))
            .collect(),
        SpaOutput::Config(out) => toml::to_string(&out.values)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
        SpaOutput::Error(_) => format_pretty(body, false),
    };
    if let Some(path) = output {
        std::fs::write(path, content)?;
    } else {
        print!("{content}");
    }
    Ok(())
}

/// Write JSON output to file or stdout.
fn write_json_output(body: &SpaOutput, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let content = serde_json::to_string(body)?;
    if let Some(path) = output {
        std::fs::write(path, content)?;
    } else {
        println!("{content}");
    }
    Ok(())
}

/// Write pretty output to file or stdout.
fn write_pretty_output(body: &SpaOutput, output: Option<&Path>) -> io::Result<()> {
    let stdout_is_tty = std::io::stdout().is_terminal();
    let use_human = output.is_none() && stdout_is_tty;

    if use_human {
        let content = format_pretty(body, true);
        println!("{content}");
        return Ok(());
    }

    // Non-tty or file output: keep JSON shape for pipelines/files.
    let content =
        serde_json::to_string_pretty(body).unwrap_or_else(|_| "{\"mode\":\"error\"}".to_string());
    if let Some(path) = output {
        std::fs::write(path, &content)?;
    } else {
        println!("{content}");
    }
    Ok(())
}

/// Format output for human consumption in a terminal.
pub fn format_pretty(body: &SpaOutput, colorize: bool) -> String {
    match body {
        SpaOutput::Render(out) => {
            let mut buf = String::new();
            let header = color("[RENDER]", "32", colorize);
            writeln!(buf, "{} {}", header, out.url).ok();
            writeln!(buf, "Device: {}", out.device).ok();
            let cache = if out.cache_hit {
                color("hit", "36", colorize)
            } else {
                "miss".to_string()
            };
            writeln!(buf, "Cache: {cache}").ok();
            if let Some(locator) = &out.cache_url {
                writeln!(buf, "Stored at: {locator}").ok();
            }
            writeln!(buf, "HTML: {} bytes", out.html.len()).ok();
            buf
        }
        SpaOutput::CacheKey(out) => {
            let mut buf = String::new();
            let header = color("[CACHE-KEY]", "36", colorize);
            writeln!(buf, "{} {}", header, out.key).ok();
            writeln!(buf, "URL: {}", out.url).ok();
            writeln!(buf, "Device: {}", out.device).ok();
            buf
        }
        SpaOutput::Devices(out) => {
            let mut buf = String::new();
            let header = color("[DEVICES]", "34", colorize);
            writeln!(buf, "{} {} known", header, out.devices.len()).ok();
            for device in &out.devices {
                let kind = if device.mobile { "mobile" } else { "desktop" };
                writeln!(buf, "- {:32} {:>10} {}", device.name, device.viewport, kind).ok();
            }
            buf
        }
        SpaOutput::Config(out) => {
            let mut buf = String::new();
            let header = color("[CONFIG]", "34", colorize);
            let source = out.source.as_deref().unwrap_or("defaults");
            writeln!(buf, "{} source: {}", header, source).ok();
            for (key, value) in &out.values {
                writeln!(buf, "{:28} = {}", key, value).ok();
            }
            buf
        }
        SpaOutput::Error(out) => {
            let mut buf = String::new();
            let header = color("[ERROR]", "31", colorize);
            let message = out
                .message
                .as_deref()
                .unwrap_or_else(|| out.error.message.as_str());
            writeln!(buf, "{} {}", header, message).ok();
            if let Some(remediation) = &out.error.remediation {
                writeln!(buf, "Hint: {}", remediation).ok();
            }
            buf
        }
    }
}

/// Apply ANSI color codes when enabled.
fn color(text: &str, code: &str, colorize: bool) -> String {
    if colorize {
        format!("\x1b[{}m{}\x1b[0m", code, text)
    } else {
        text.to_string()
    }
}
