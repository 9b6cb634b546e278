// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Run a scenario end to end
//!
//! Streams orchestration events to the terminal, answers approval requests
//! according to `--approvals`, offers guidance when the workflow stalls and
//! prints the final report.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use tracing::{debug, warn};

use agentic_soc_core::{
    application::{ApprovalSubmission, OrchestrationService, ServiceError},
    domain::{
        ActionId, ApprovalState, ExecutionState, HumanGuidance, OrchestrationEvent,
        OrchestrationEventType, OrchestratorConfigManifest, Workflow, WorkflowId, WorkflowOutcome,
    },
    infrastructure::{AuditLog, EventBusError},
};

use crate::embedded::EmbeddedRuntime;
use crate::scenarios;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ApprovalMode {
    /// Ask on the terminal
    Prompt,
    /// Approve every request
    Approve,
    /// Deny every request
    Deny,
    /// Never answer; requests resolve through the configured timeout
    Wait,
}

#[derive(Args)]
pub struct RunArgs {
    /// Scenario name (see `soc scenario list`)
    #[arg(value_name = "SCENARIO")]
    pub scenario: String,

    /// How approval requests are answered
    #[arg(long, value_enum, default_value_t = ApprovalMode::Prompt)]
    pub approvals: ApprovalMode,

    /// Guidance submitted when the workflow stalls
    #[arg(long)]
    pub guidance: Option<String>,

    /// Analyst identity recorded on decisions and guidance
    #[arg(long, env = "SOC_ANALYST", default_value = "analyst")]
    pub analyst: String,

    /// Print the final workflow record as JSON
    #[arg(long)]
    pub json: bool,

    /// Print the audit trail after the report
    #[arg(long)]
    pub audit: bool,
}

pub async fn handle_command(args: RunArgs, config_override: Option<PathBuf>) -> Result<()> {
    let config = OrchestratorConfigManifest::load_or_default(config_override)
        .context("Failed to load configuration")?;

    let Some(scenario) = scenarios::find(&args.scenario) else {
        anyhow::bail!(
            "Unknown scenario '{}'. Available: {}",
            args.scenario,
            scenarios::scenario_names().join(", ")
        );
    };

    let runtime = EmbeddedRuntime::new(&config, &scenario)?;
    let service = runtime.service();

    // Subscribe before starting so the first events are not missed
    let mut events = runtime.event_bus().subscribe();
    let workflow_id = service
        .start_workflow(scenario.task.clone())
        .await
        .context("Failed to start workflow")?;

    println!(
        "{} {} ({})",
        "Running scenario".bold(),
        scenario.name.bold(),
        workflow_id.to_string().dimmed()
    );
    println!("  {}", scenario.task.description());
    println!();

    let mut guidance = args.guidance.clone();
    loop {
        let event = tokio::select! {
            received = events.recv() => match received {
                Ok(event) => event,
                Err(EventBusError::Lagged(_)) => continue,
                Err(e) => {
                    warn!(error = %e, "Event stream ended");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                println!("{}", "Cancelling workflow...".yellow());
                if let Err(e) = service.cancel_workflow(workflow_id).await {
                    debug!(error = %e, "Cancel ignored");
                }
                continue;
            }
        };
        if event.workflow_id != workflow_id {
            continue;
        }

        if let Some(line) = describe_event(&event) {
            println!("{}", line);
        }

        match event.event_type {
            OrchestrationEventType::ApprovalRequested => {
                answer_approval(service, &event, args.approvals, &args.analyst).await?;
            }
            OrchestrationEventType::Stalled if accepts_guidance(&event) => {
                offer_guidance(service, workflow_id, &mut guidance, args.approvals, &args.analyst)
                    .await?;
            }
            t if t.is_terminal() => break,
            _ => {}
        }
    }

    let report = service
        .await_report(workflow_id)
        .await
        .context("Failed to collect workflow report")?;

    println!();
    if args.json {
        println!("{}", serde_json::to_string_pretty(report.as_ref())?);
    } else {
        print_report(&report);
    }
    if args.audit {
        print_audit_trail(runtime.audit_log(), workflow_id);
    }

    Ok(())
}

async fn answer_approval(
    service: &OrchestrationService,
    event: &OrchestrationEvent,
    mode: ApprovalMode,
    analyst: &str,
) -> Result<()> {
    let action_id: ActionId = serde_json::from_value(event.payload["action_id"].clone())
        .context("Approval request without an action id")?;
    let escalated = event.payload["escalated"].as_bool().unwrap_or(false);

    let submission = match mode {
        ApprovalMode::Wait => {
            println!("    {}", "waiting for the approval timeout".dimmed());
            return Ok(());
        }
        ApprovalMode::Approve => {
            ApprovalSubmission::approve(action_id, analyst).with_comment("approved from CLI")
        }
        ApprovalMode::Deny => {
            ApprovalSubmission::deny(action_id, analyst).with_comment("denied from CLI")
        }
        ApprovalMode::Prompt => {
            if escalated {
                println!("    {}", "escalated: this request is still open".yellow());
            }
            let prompt = format!(
                "Approve {} on {}?",
                event.payload["kind"].as_str().unwrap_or("action"),
                event.payload["target"].as_str().unwrap_or("target")
            );
            let approved = tokio::task::spawn_blocking(move || {
                dialoguer::Confirm::new()
                    .with_prompt(prompt)
                    .default(false)
                    .interact()
                    .unwrap_or(false)
            })
            .await
            .unwrap_or(false);
            if approved {
                ApprovalSubmission::approve(action_id, analyst)
            } else {
                ApprovalSubmission::deny(action_id, analyst)
            }
        }
    };

    match service.submit_approval(submission).await {
        Ok(_) => Ok(()),
        // The request may have timed out while the prompt was open
        Err(ServiceError::Approval(e)) => {
            println!("    {}", format!("decision not recorded: {}", e).yellow());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// A stall with no resets left aborts, so guidance would be discarded.
fn accepts_guidance(event: &OrchestrationEvent) -> bool {
    event.payload["resets_remaining"].as_u64().map_or(true, |n| n > 0)
}

async fn offer_guidance(
    service: &OrchestrationService,
    workflow_id: WorkflowId,
    guidance: &mut Option<String>,
    mode: ApprovalMode,
    analyst: &str,
) -> Result<()> {
    let text = match guidance.take() {
        Some(text) => Some(text),
        None if mode == ApprovalMode::Prompt => {
            tokio::task::spawn_blocking(|| {
                dialoguer::Input::<String>::new()
                    .with_prompt("Guidance for the planner (empty to let it replan)")
                    .allow_empty(true)
                    .interact_text()
                    .ok()
            })
            .await
            .ok()
            .flatten()
            .filter(|t| !t.trim().is_empty())
        }
        None => None,
    };

    if let Some(text) = text {
        match service
            .submit_guidance(workflow_id, HumanGuidance::new(text, analyst))
            .await
        {
            Ok(()) => println!("    {}", "guidance submitted".green()),
            Err(e) => println!("    {}", format!("guidance not delivered: {}", e).yellow()),
        }
    }
    Ok(())
}

/// One terminal line per event; terminal events are covered by the report.
pub fn describe_event(event: &OrchestrationEvent) -> Option<String> {
    let p = &event.payload;
    let text = |key: &str| p[key].as_str().unwrap_or_default().to_string();

    let line = match event.event_type {
        OrchestrationEventType::PlanCreated => {
            let steps: Vec<String> = p["steps"]
                .as_array()
                .map(|steps| {
                    steps
                        .iter()
                        .filter_map(|s| s["participant"].as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            format!(
                "{} v{}: {}",
                "▸ Plan".bold(),
                p["version"],
                steps.join(" → ")
            )
        }
        OrchestrationEventType::ParticipantSelected => format!(
            "{} round {}: {} {}",
            "→".cyan(),
            event.round_index,
            text("participant").bold(),
            format!("({})", text("rationale")).dimmed()
        ),
        OrchestrationEventType::ParticipantResponded => {
            if text("status") == "error" {
                format!("    {}", text("error").red())
            } else {
                format!("    {}", text("output"))
            }
        }
        OrchestrationEventType::ApprovalRequested => format!(
            "  {} {} on {} [{} risk]{}",
            "⚠ approval requested:".yellow(),
            text("kind").bold(),
            text("target"),
            text("risk"),
            if p["escalated"].as_bool().unwrap_or(false) { " (escalated)" } else { "" }
        ),
        OrchestrationEventType::ApprovalResolved => {
            let summary = format!(
                "{} by {} ({})",
                text("decision"),
                text("decider"),
                text("reason")
            );
            if text("decision") == "approved" {
                format!("  {} {}", "✓".green(), summary.green())
            } else {
                format!("  {} {}", "✗".red(), summary.red())
            }
        }
        OrchestrationEventType::RoundEvaluated => format!(
            "    {}",
            format!("round {}: {}, stalls {}", event.round_index, text("verdict"), p["stall_count"])
                .dimmed()
        ),
        OrchestrationEventType::Stalled => format!(
            "⏸ workflow stalled after {} non-progress rounds ({} replans left)",
            p["stall_count"], p["resets_remaining"]
        )
        .yellow()
        .to_string(),
        OrchestrationEventType::Replanned => format!(
            "↻ replanned (reset {}){}",
            p["reset_count"],
            if p["with_guidance"].as_bool().unwrap_or(false) { " with guidance" } else { "" }
        )
        .yellow()
        .to_string(),
        OrchestrationEventType::Completed
        | OrchestrationEventType::Failed
        | OrchestrationEventType::Aborted => return None,
    };
    Some(line)
}

fn print_report(report: &Workflow) {
    println!("{}", "Workflow report:".bold());
    println!("  ID: {}", report.id());
    let state = report.state().to_string();
    let state = match report.outcome() {
        Some(WorkflowOutcome::Completed { .. }) => state.green(),
        Some(WorkflowOutcome::Aborted { .. }) => state.yellow(),
        _ => state.red(),
    };
    println!("  State: {}", state);
    println!(
        "  Rounds: {}  Replans: {}",
        report.rounds_completed(),
        report.reset_count()
    );
    match report.outcome() {
        Some(WorkflowOutcome::Completed { summary }) => println!("  Summary: {}", summary),
        Some(WorkflowOutcome::Failed { reason }) | Some(WorkflowOutcome::Aborted { reason }) => {
            println!("  Reason: {}", reason)
        }
        None => {}
    }

    if !report.actions().is_empty() {
        println!();
        println!("{}", "Actions:".bold());
        for action in report.actions() {
            let approval = match action.approval_state {
                ApprovalState::Approved => "approved".green(),
                ApprovalState::AutoApproved => "auto".green(),
                ApprovalState::Denied => "denied".red(),
                ApprovalState::Pending => "pending".yellow(),
            };
            let execution = match &action.execution {
                ExecutionState::NotExecuted => "not executed".dimmed(),
                ExecutionState::Executed { .. } => "executed".green(),
                ExecutionState::ExecutionFailed { reason, .. } => {
                    format!("failed: {}", reason).red()
                }
            };
            println!(
                "  {:<18} {:<24} {:<8} {:<10} {}",
                action.kind.as_str(),
                action.target,
                action.risk.as_str(),
                approval,
                execution
            );
        }
    }
}

fn print_audit_trail(audit_log: &AuditLog, workflow_id: WorkflowId) {
    println!();
    println!("{}", "Audit trail:".bold());
    for entry in audit_log.entries_for(workflow_id) {
        println!(
            "  {} {:<22} {:<24} {}:{}",
            entry.timestamp.format("%H:%M:%S%.3f").to_string().dimmed(),
            entry.actor,
            entry.action,
            entry.target.entity_type,
            entry.target.entity_id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn event(event_type: OrchestrationEventType, payload: serde_json::Value) -> OrchestrationEvent {
        OrchestrationEvent {
            workflow_id: WorkflowId::new(),
            sequence: 0,
            round_index: 2,
            event_type,
            timestamp: Utc::now(),
            payload,
        }
    }

    #[test]
    fn test_describe_plan_lists_participants_in_order() {
        let line = describe_event(&event(
            OrchestrationEventType::PlanCreated,
            json!({"version": 1, "steps": [{"participant": "triage"}, {"participant": "forensics"}]}),
        ))
        .unwrap();
        assert!(line.contains("triage → forensics"));
    }

    #[test]
    fn test_describe_participant_error() {
        let line = describe_event(&event(
            OrchestrationEventType::ParticipantResponded,
            json!({"participant": "forensics", "status": "error", "error": "EDR unreachable"}),
        ))
        .unwrap();
        assert!(line.contains("EDR unreachable"));
    }

    #[test]
    fn test_guidance_only_offered_while_resets_remain() {
        let open = event(
            OrchestrationEventType::Stalled,
            json!({"stall_count": 3, "reset_count": 0, "resets_remaining": 2}),
        );
        let exhausted = event(
            OrchestrationEventType::Stalled,
            json!({"stall_count": 3, "reset_count": 2, "resets_remaining": 0}),
        );
        assert!(accepts_guidance(&open));
        assert!(!accepts_guidance(&exhausted));
    }

    #[test]
    fn test_terminal_events_are_left_to_the_report() {
        let completed = event(OrchestrationEventType::Completed, json!({"status": "completed"}));
        assert!(describe_event(&completed).is_none());
    }
}
