//! Printer upload tool
//!
//! Queries a printer's machine parameters and uploads an already compressed
//! job file to its storage, optionally starting the print.
//!
//! Usage:
//!   cargo run --example send_job -- [OPTIONS] --host IP FILE
//!
//! Options:
//!   --host IP         Printer address (required)
//!   --port PORT       UDP port (default: 3000)
//!   --timeout MS      Response timeout in ms (default: 5000)
//!   --settle MS       Wait after begin-write in ms (default: 3000)
//!   --name NAME       File name on the printer (default: local file name)
//!   --print           Start printing after the upload
//!   --info            Only print device information, do not upload
//!
//! Set RUST_LOG=qidilink_core=debug to see wire traffic.

use anyhow::{bail, Context, Result};
use qidilink_core::protocol::{Session, SessionConfig};
use std::fs::File;
use std::ops::ControlFlow;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

struct Options {
    config: SessionConfig,
    file: Option<PathBuf>,
    device_name: Option<String>,
    print: bool,
    info_only: bool,
}

fn parse_args() -> Result<Options> {
    let mut options = Options {
        config: SessionConfig::default(),
        file: None,
        device_name: None,
        print: false,
        info_only: false,
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--host" => options.config.host = args.next().context("--host needs a value")?,
            "--port" => {
                options.config.port = args
                    .next()
                    .context("--port needs a value")?
                    .parse()
                    .context("invalid port")?
            }
            "--timeout" => {
                options.config.timeout_ms = args
                    .next()
                    .context("--timeout needs a value")?
                    .parse()
                    .context("invalid timeout")?
            }
            "--settle" => {
                options.config.settle_delay_ms = args
                    .next()
                    .context("--settle needs a value")?
                    .parse()
                    .context("invalid settle delay")?
            }
            "--name" => options.device_name = Some(args.next().context("--name needs a value")?),
            "--print" => options.print = true,
            "--info" => options.info_only = true,
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other if other.starts_with("--") => bail!("unknown option {}", other),
            other => options.file = Some(PathBuf::from(other)),
        }
    }

    Ok(options)
}

fn print_help() {
    println!("Usage: send_job --host IP [--port PORT] [--timeout MS] [--settle MS]");
    println!("                [--name NAME] [--print] [--info] FILE");
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = parse_args()?;
    let mut session = Session::connect(options.config.clone())
        .with_context(|| format!("connecting to {}", options.config.host))?;

    let machine = session
        .query_step_parameters()
        .context("reading machine parameters")?;
    println!("Machine: {}", machine);

    if options.info_only {
        println!("Device:   {}", session.query_device_info()?.trim());
        println!("Firmware: {}", session.query_firmware()?.trim());
        println!("Wifi:     {}", session.query_wifi_info()?.trim());
        return Ok(());
    }

    let Some(path) = options.file else {
        bail!("no file given");
    };
    let device_name = match options.device_name {
        Some(name) => name,
        None => path
            .file_name()
            .and_then(|n| n.to_str())
            .context("file name is not valid UTF-8")?
            .to_string(),
    };

    let total = std::fs::metadata(&path)?.len();
    let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;

    let summary = session.send_file_with_progress(file, &device_name, |progress| {
        if progress.chunks % 64 == 0 || progress.bytes_sent == total {
            println!("  {} / {} bytes", progress.bytes_sent, total);
        }
        ControlFlow::Continue(())
    })?;
    println!(
        "Uploaded {} ({} bytes in {} chunks)",
        summary.file_name, summary.bytes_sent, summary.chunks
    );

    if options.print {
        session.start_print(&device_name)?;
        println!("Print started");
    }

    session.disconnect();
    Ok(())
}
