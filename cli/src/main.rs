// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Swarm Control Plane CLI
//!
//! The `swarmctl` binary hosts the Overseer and the trigger engine.
//!
//! ## Commands
//!
//! - `swarmctl serve` - Run the control plane until Ctrl+C or SIGTERM
//! - `swarmctl config show|validate|generate` - Configuration management
//! - `swarmctl envelope validate FILE` - Check a telemetry envelope against the schema

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use swarm_control::commands::{self, ConfigCommand, EnvelopeCommand};
use swarm_control_core::domain::config::{ControlPlaneConfig, LoggingConfig};

/// Swarm control plane - zero-trust reconciliation and trigger rules
#[derive(Parser)]
#[command(name = "swarmctl")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "SWARM_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Defaults to the config file.
    #[arg(long, global = true, env = "SWARM_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Overseer and trigger engine
    #[command(name = "serve")]
    Serve,

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Envelope tooling
    #[command(name = "envelope")]
    Envelope {
        #[command(subcommand)]
        command: EnvelopeCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging comes up before the commands load the config, so discovery and
    // override lines are visible. A broken file is reported by the command.
    let logging = ControlPlaneConfig::peek_logging(cli.config.as_deref());
    let level = cli.log_level.as_deref().unwrap_or(&logging.level);
    init_logging(level, &logging)?;

    match cli.command {
        Some(Commands::Serve) => commands::serve::run(cli.config).await,
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        Some(Commands::Envelope { command }) => {
            commands::envelope::handle_command(command, cli.config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging. `RUST_LOG` wins over `level`.
fn init_logging(level: &str, logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if logging.format == "json" {
        builder.json().with_target(true).init();
    } else {
        builder.with_target(false).compact().init();
    }

    Ok(())
}
