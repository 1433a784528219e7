//! otaguard - firmware update agent
//!
//! Runs the OTA Guard update loop on a host, with flash simulated by one file
//! per region so the update record survives restarts.

#![deny(static_mut_refs)]
#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

mod commands;
mod config;
mod error;
mod host;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use otaguard_update::{
    ApiError, DownloadError, FlashError, OtaError, StorageError, TransitionReason,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::AgentError;
use crate::host::HostDevice;

#[derive(Parser)]
#[command(name = "otaguard")]
#[command(about = "Firmware update agent with A/B partitions and automatic rollback")]
#[command(version)]
#[command(long_about = "
otaguard keeps a device on the newest published firmware. It polls a release
source, downloads and verifies the image, writes it to the inactive partition
and switches over. An image that never confirms a successful boot is rolled
back to the last known-good one.
")]
struct Cli {
    /// Configuration file (.json, .yaml or .yml)
    #[arg(short, long, global = true, env = "OTAGUARD_CONFIG", default_value = "otaguard.yaml")]
    config: PathBuf,

    /// Directory holding the simulated flash regions
    #[arg(long, global = true, env = "OTAGUARD_FLASH_DIR", default_value = "otaguard-flash")]
    flash_dir: PathBuf,

    /// Output in JSON format for machine parsing
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Boot, then check for updates periodically until interrupted
    Run,

    /// Run one update cycle now
    Check,

    /// Confirm that the running image booted successfully
    Confirm,

    /// Show the persistent update record
    Status,

    /// Run the boot sequence (boot counting and rollback check) once
    Boot,
}

fn log_filter(verbose: u8, status_logging: bool) -> &'static str {
    match (verbose, status_logging) {
        (0, false) => "warn",
        (0, true) | (1, _) => "info",
        (2, _) => "debug",
        _ => "trace",
    }
}

fn init_tracing(verbose: u8, status_logging: bool) {
    let level = log_filter(verbose, status_logging);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("otaguard={level},otaguard_agent={level},otaguard_update={level}").into()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn exit_code(error: &anyhow::Error) -> u8 {
    if let Some(agent) = error.downcast_ref::<AgentError>() {
        return match agent {
            AgentError::ConfigNotFound(_)
            | AgentError::UnsupportedFormat(_)
            | AgentError::InvalidConfiguration(_)
            | AgentError::JsonError(_)
            | AgentError::YamlError(_) => 2,
            AgentError::NoRecord => 3,
            AgentError::FlashUnavailable(_) | AgentError::IoError(_) => 4,
            AgentError::CycleFailed(reason) => match reason {
                TransitionReason::ReleaseQueryFailed { .. }
                | TransitionReason::DownloadFailed { .. } => 5,
                TransitionReason::FlashFailed { .. } => 4,
                _ => 1,
            },
        };
    }

    match error.downcast_ref::<OtaError>() {
        Some(OtaError::Config(_)) => 2,
        Some(OtaError::Storage(_) | OtaError::Flash(_)) => 4,
        Some(OtaError::Api(_) | OtaError::Download(_)) => 5,
        _ if error.is::<StorageError>() || error.is::<FlashError>() => 4,
        _ if error.is::<ApiError>() || error.is::<DownloadError>() => 5,
        _ if error.is::<otaguard_update::ConfigError>() => 2,
        _ => 1,
    }
}

async fn execute_command(cli: &Cli, device: &HostDevice) -> Result<()> {
    match cli.command {
        Commands::Run => commands::run(device).await,
        Commands::Check => commands::check(device, cli.json).await,
        Commands::Confirm => commands::confirm(device, cli.json),
        Commands::Status => commands::status(device, cli.json),
        Commands::Boot => commands::boot(device, cli.json),
    }
}

async fn start(cli: &Cli) -> Result<()> {
    let config = config::load_config(&cli.config)?;
    init_tracing(cli.verbose, config.status_logging);

    let device = HostDevice::open(config, &cli.flash_dir)?;
    execute_command(cli, &device).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match start(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.json {
                output::print_error_json(&e);
            } else {
                output::print_error_human(&e);
            }
            ExitCode::from(exit_code(&e))
        }
    }
}
