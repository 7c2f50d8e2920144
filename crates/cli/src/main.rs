//! driftsync CLI - keeps local trees mirrored into remote hosts
//!
//! Composition root: loads the config, wires the system adapters into the core
//! supervisors and renders their events.

mod commands;
mod lock;
mod output;
mod paths;
mod signals;
mod status_file;
mod telemetry;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;

use telemetry::LogFormat;

#[derive(Parser)]
#[command(name = "driftsync")]
#[command(about = "Mirror local directories into remote hosts with rsync, and keep them in sync", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: $DRIFTSYNC_CONFIG, ./driftsync.yml, user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Log format
    #[arg(long, value_enum, env = "DRIFTSYNC_LOG_FORMAT", default_value = "pretty", global = true)]
    log_format: LogFormat,

    /// Also write JSON logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Supervise services until Ctrl+C
    Start {
        /// Services to run (default: all)
        services: Vec<String>,

        /// Where to write the status snapshot (default: state dir)
        #[arg(long)]
        status_file: Option<PathBuf>,
    },

    /// Run one full sync per service and exit
    Sync {
        /// Services to sync (default: all)
        services: Vec<String>,
    },

    /// Check tools, source directories and remote reachability
    Check {
        /// Services to check (default: all)
        services: Vec<String>,
    },

    /// List configured services
    List,

    /// Show the status written by a running `driftsync start`
    Status {
        /// Status file to read (default: state dir)
        #[arg(long)]
        status_file: Option<PathBuf>,

        /// Print the raw JSON
        #[arg(long)]
        json: bool,
    },
}

fn load_config(cli: &Cli) -> Result<driftsync_infra_config::LoadedConfig> {
    driftsync_infra_config::load(cli.config.as_deref()).context("Failed to load configuration")
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    // Held until exit so the file writer flushes
    let _log_guard = telemetry::init_logging(
        cli.log_format,
        cli.verbose,
        cli.log_dir.as_deref(),
        !cli.no_color,
    )?;

    debug!("driftsync v{} starting", driftsync_core::VERSION);

    match &cli.command {
        Commands::Start {
            services,
            status_file,
        } => {
            let config = load_config(&cli)?;
            commands::start(&config, services, status_file.clone()).await
        }
        Commands::Sync { services } => {
            let config = load_config(&cli)?;
            commands::sync(&config, services).await
        }
        Commands::Check { services } => {
            let config = load_config(&cli)?;
            commands::check(&config, services).await
        }
        Commands::List => {
            let config = load_config(&cli)?;
            commands::list(&config)
        }
        Commands::Status { status_file, json } => commands::status(status_file.as_deref(), *json),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_start_with_globals() {
        let cli = Cli::try_parse_from([
            "driftsync",
            "start",
            "web",
            "api",
            "-vv",
            "--config",
            "/etc/driftsync.yml",
            "--log-format",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/driftsync.yml")));
        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Commands::Start { services, status_file } => {
                assert_eq!(services, vec!["web", "api"]);
                assert_eq!(status_file, None);
            }
            _ => panic!("expected start"),
        }
    }

    #[test]
    fn test_parse_status_json() {
        let cli = Cli::try_parse_from(["driftsync", "status", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Status { json: true, .. }));
    }
}
