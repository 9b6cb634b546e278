// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Agentic SOC CLI
//!
//! The `soc` binary runs multi-agent incident investigations in-process.
//!
//! ## Commands
//!
//! - `soc run <scenario>` - Run a built-in scenario with live events and approvals
//! - `soc scenario list|show` - Browse the scenario catalog
//! - `soc config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

use agentic_soc::commands::{self, ConfigCommand, RunArgs, ScenarioCommand};
use agentic_soc_core::domain::config::{LoggingConfig, OrchestratorConfigManifest};
use agentic_soc_core::infrastructure::metrics::describe_metrics;

/// Agentic SOC - multi-agent incident response orchestration
#[derive(Parser)]
#[command(name = "soc")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "SOC_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the configured level
    #[arg(long, global = true, env = "SOC_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario end to end
    #[command(name = "run")]
    Run(RunArgs),

    /// Browse built-in scenarios
    #[command(name = "scenario")]
    Scenario {
        #[command(subcommand)]
        command: ScenarioCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Commands report load errors themselves; logging falls back to defaults
    let config = OrchestratorConfigManifest::load_or_default(cli.config.clone()).ok();
    let logging = config
        .as_ref()
        .map(|c| c.spec.observability.logging.clone())
        .unwrap_or_default();
    init_logging(cli.log_level.as_deref().unwrap_or(&logging.level), &logging)?;

    if let Some(metrics) = config.as_ref().map(|c| &c.spec.observability.metrics) {
        if metrics.enabled {
            init_metrics(metrics.port)?;
        }
    }

    match cli.command {
        Some(Commands::Run(args)) => commands::run::handle_command(args, cli.config).await,
        Some(Commands::Scenario { command }) => commands::scenario::handle_command(command).await,
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}

/// Install the Prometheus exporter and register metric descriptions
fn init_metrics(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    describe_metrics();
    info!("Prometheus metrics listening on {}", addr);
    Ok(())
}
