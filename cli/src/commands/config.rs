// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use agentic_soc_core::domain::{OrchestratorConfigManifest, PolicyVerdict};

pub(crate) const MINIMAL_TEMPLATE: &str = include_str!("../../templates/config-minimal.yaml");
pub(crate) const EXAMPLES_TEMPLATE: &str = include_str!("../../templates/config-with-examples.yaml");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./soc-config.yaml)
        #[arg(short, long, default_value = "./soc-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = OrchestratorConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. SOC_CONFIG_PATH: {}",
            std::env::var("SOC_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./soc-config.yaml");
        println!("  4. ~/.agentic-soc/config.yaml");
        println!("  5. /etc/agentic-soc/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Orchestrator:".bold());
    println!("  Name: {}", config.metadata.name);
    if let Some(version) = &config.metadata.version {
        println!("  Version: {}", version);
    }
    println!();

    let spec = &config.spec;
    println!("{}", "Limits:".bold());
    println!("  Max rounds: {}", spec.limits.max_round_count);
    println!("  Max stalls before replan: {}", spec.limits.max_stall_count);
    println!("  Max replans: {}", spec.limits.max_reset_count);
    println!();

    println!("{}", "Timeouts:".bold());
    println!("  Planner: {:?}", spec.timeouts.planner);
    println!("  Participant: {:?}", spec.timeouts.participant);
    println!("  Approval: {:?}", spec.timeouts.approval);
    println!("  Stall grace window: {:?}", spec.timeouts.stall_grace_window);
    println!();

    println!("{}", "Approval policy:".bold());
    println!("  On timeout: {:?}", spec.approval.timeout_behavior);
    println!(
        "  Default: {}",
        verdict_label(spec.approval.policy.default_verdict)
    );
    for rule in &spec.approval.policy.rules {
        let risk = rule
            .risk
            .map(|r| r.as_str().to_string())
            .unwrap_or_else(|| "any".to_string());
        println!(
            "    - {} ({} risk) → {}",
            rule.action_kind.bold(),
            risk,
            verdict_label(rule.verdict)
        );
    }
    println!();

    if let Some(completion) = &spec.completion {
        println!("{}", "Completion:".bold());
        println!("  Output marker: {}", completion.output_marker);
        println!();
    }

    println!("{}", "Observability:".bold());
    println!(
        "  Logging: {} ({})",
        spec.observability.logging.level, spec.observability.logging.format
    );
    if spec.observability.metrics.enabled {
        println!("  Metrics: enabled on port {}", spec.observability.metrics.port);
    } else {
        println!("  Metrics: {}", "disabled".dimmed());
    }
    println!();

    Ok(())
}

fn verdict_label(verdict: PolicyVerdict) -> &'static str {
    match verdict {
        PolicyVerdict::AutoApprove => "auto-approve",
        PolicyVerdict::RequireApproval => "require approval",
    }
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = OrchestratorConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        EXAMPLES_TEMPLATE
    } else {
        MINIMAL_TEMPLATE
    };

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
