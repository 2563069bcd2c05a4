// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use voxl_camera_server::{Server, ServerConfig};

#[derive(Parser)]
#[command(name = "voxl-camera-server")]
#[command(about = "Multi-camera streaming server")]
#[command(version)]
struct Cli {
    /// Path to the server configuration file
    #[arg(short, long, value_name = "FILE", default_value = "/etc/voxl-camera-server.toml")]
    config: PathBuf,

    /// Log level/filter directive (e.g. "debug", "voxl_camera_server=trace");
    /// overrides RUST_LOG when set.
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a configuration file without starting any camera.
    Validate,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // --log-level takes precedence over RUST_LOG; with neither set, default to "info".
    let filter = match &cli.log_level {
        Some(level) => tracing_subscriber::EnvFilter::new(level),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_level(true).init();

    tracing::info!(version = voxl_camera_server::constants::app_info::version(), "voxl-camera-server starting");

    match cli.command {
        Some(Commands::Validate) => match ServerConfig::from_file(&cli.config) {
            Ok(_) => {
                println!("configuration OK: {}", cli.config.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("configuration invalid: {e}");
                ExitCode::from(2)
            }
        },
        None => run(&cli.config),
    }
}

fn run(config_path: &PathBuf) -> ExitCode {
    let config = match ServerConfig::from_file(config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let server = match Server::new(config) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to construct server");
            return ExitCode::FAILURE;
        }
    };

    match server.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server exited with error");
            ExitCode::FAILURE
        }
    }
}
