// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Scenario catalog commands
//!
//! Commands: list, show

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use crate::scenarios;

#[derive(Subcommand)]
pub enum ScenarioCommand {
    /// List built-in scenarios
    List,

    /// Show a scenario's task, playbook and participants
    Show {
        /// Scenario name
        name: String,
    },
}

pub async fn handle_command(command: ScenarioCommand) -> Result<()> {
    match command {
        ScenarioCommand::List => list(),
        ScenarioCommand::Show { name } => show(&name),
    }
}

fn list() -> Result<()> {
    println!("{}", "Built-in scenarios:".bold());
    for scenario in scenarios::builtin() {
        println!(
            "  {:<20} {}",
            scenario.name.bold(),
            scenario.description.dimmed()
        );
    }
    Ok(())
}

fn show(name: &str) -> Result<()> {
    let Some(scenario) = scenarios::find(name) else {
        anyhow::bail!(
            "Unknown scenario '{}'. Available: {}",
            name,
            scenarios::scenario_names().join(", ")
        );
    };

    println!("{} {}", "Scenario:".bold(), scenario.name);
    println!("  {}", scenario.description);
    println!("  Techniques: {}", scenario.techniques.join(", "));
    println!();

    println!("{}", "Task:".bold());
    println!("  {}", scenario.task.description());
    if let Some(origin) = scenario.task.origin() {
        let details = serde_json::to_string_pretty(&origin.details)?;
        for line in details.lines() {
            println!("  {}", line.dimmed());
        }
    }
    println!();

    println!("{}", "Playbook:".bold());
    for (i, step) in scenario.playbook.iter().enumerate() {
        println!("  {}. {} - {}", i + 1, step.participant.bold(), step.rationale);
    }
    println!();

    println!("{}", "Participants:".bold());
    for participant in &scenario.participants {
        let proposals: usize = participant
            .turns
            .iter()
            .map(|t| t.proposed_actions.len())
            .sum();
        println!(
            "  {:<18} {} ({} scripted turns, {} proposed actions)",
            participant.name.bold(),
            participant.capabilities,
            participant.turns.len(),
            proposals
        );
    }

    Ok(())
}
