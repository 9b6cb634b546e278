// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end orchestration scenarios
//!
//! Each test drives a full workflow through the orchestrator with scripted
//! planners and participants:
//! 1. Steady progress to planner completion
//! 2. Stall detection and forced replan after the grace window
//! 3. Human denial of a high-risk action
//! 4. Approval timeout (deny and escalate)
//! 5. Round budget exhaustion
//! 6. Planner selecting an unknown participant

mod common;

use std::sync::Arc;
use std::time::Duration;

use agentic_soc_core::application::{workflow_channel, ApprovalGateway, ApprovalSubmission};
use agentic_soc_core::domain::{
    ApprovalDecision, ApprovalPolicy, ApprovalState, ApprovalTimeoutBehavior, ExecutionState,
    OrchestrationEventType, PlannerError, PolicyRule, PolicyVerdict, ProgressVerdict,
    ResolutionReason, RiskLevel, Task, TerminationReason, WorkflowOutcome, WorkflowState,
};
use agentic_soc_core::infrastructure::AuditResult;
use common::*;
use tokio_util::sync::CancellationToken;

use OrchestrationEventType::*;

#[tokio::test]
async fn test_single_participant_progresses_to_completion() {
    let investigator = Arc::new(Investigator::default());
    let planner = CountingPlanner::new("analyst", 3);
    let orchestrator = builder(
        planner.clone(),
        roster("analyst", investigator.clone()),
        settings(10, 3, 2),
    )
    .build();

    let wf = orchestrator
        .run_to_completion(Task::new("Triage failed logins for admin"), CancellationToken::new())
        .await;

    assert_eq!(wf.state(), WorkflowState::Completed);
    assert_eq!(wf.rounds_completed(), 3);
    assert_eq!(wf.stall_count(), 0);
    assert_eq!(wf.reset_count(), 0);
    assert!(wf.rounds().iter().all(|r| r.verdict == ProgressVerdict::Progress));
    assert_eq!(
        wf.outcome(),
        Some(&WorkflowOutcome::Completed { summary: "done after 3 rounds".to_string() })
    );
    assert_eq!(planner.calls(), 4);
    assert_eq!(investigator.calls(), 3);

    assert_eq!(
        event_types(wf.events()),
        vec![
            PlanCreated,
            ParticipantSelected,
            ParticipantResponded,
            RoundEvaluated,
            ParticipantSelected,
            ParticipantResponded,
            RoundEvaluated,
            ParticipantSelected,
            ParticipantResponded,
            RoundEvaluated,
            Completed,
        ]
    );
    assert_event_stream_well_formed(wf.events());
    wf.verify_audit_invariants().unwrap();

    // later rounds see earlier ones in their context
    let contexts = investigator.contexts.lock();
    assert_eq!(contexts[0].recent_rounds.len(), 0);
    assert_eq!(contexts[2].recent_rounds.len(), 2);
    assert_eq!(contexts[2].round_index, 2);
}

#[tokio::test(start_paused = true)]
async fn test_stall_forces_replan_after_grace_window() {
    let planner = CountingPlanner::completing_on_replan("analyst");
    let orchestrator = builder(
        planner.clone(),
        roster("analyst", Arc::new(Repeater("no new indicators"))),
        settings(10, 2, 2),
    )
    .build();

    let (control, _handle) = workflow_channel();
    let started = tokio::time::Instant::now();
    let wf = orchestrator.run(Task::new("Hunt lateral movement"), control).await;

    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(wf.state(), WorkflowState::Completed);
    assert_eq!(wf.rounds_completed(), 3);
    assert_eq!(wf.reset_count(), 1);
    assert_eq!(wf.stall_count(), 0);

    let verdicts: Vec<_> = wf.rounds().iter().map(|r| r.verdict).collect();
    assert_eq!(
        verdicts,
        vec![ProgressVerdict::Progress, ProgressVerdict::NoProgress, ProgressVerdict::NoProgress]
    );

    let path: Vec<_> = wf.transitions().iter().map(|t| (t.from, t.to)).collect();
    assert!(path.contains(&(WorkflowState::Evaluating, WorkflowState::Stalled)));
    assert!(path.contains(&(WorkflowState::Stalled, WorkflowState::AwaitingHumanGuidance)));
    assert!(path.contains(&(WorkflowState::AwaitingHumanGuidance, WorkflowState::Planning)));

    let replanned = wf.events().iter().find(|e| e.event_type == Replanned).unwrap();
    assert_eq!(replanned.payload["reset_count"], 1);
    assert_eq!(replanned.payload["stall_count"], 0);
    assert_eq!(replanned.payload["with_guidance"], false);

    let last_input = planner.inputs.lock().last().cloned().unwrap();
    assert!(last_input.replan_requested);
    assert_eq!(last_input.reset_count, 1);
    assert_event_stream_well_formed(wf.events());
}

#[tokio::test(start_paused = true)]
async fn test_stall_without_guidance_source_replans_immediately() {
    let orchestrator = builder(
        CountingPlanner::completing_on_replan("analyst"),
        roster("analyst", Arc::new(Repeater("same answer"))),
        settings(10, 2, 2),
    )
    .build();

    let started = tokio::time::Instant::now();
    let wf = orchestrator
        .run_to_completion(Task::new("Hunt lateral movement"), CancellationToken::new())
        .await;

    assert!(started.elapsed() < Duration::from_secs(30));
    assert_eq!(wf.state(), WorkflowState::Completed);
    assert_eq!(wf.reset_count(), 1);
    assert!(!wf
        .transitions()
        .iter()
        .any(|t| t.to == WorkflowState::AwaitingHumanGuidance));
}

#[tokio::test]
async fn test_stall_with_exhausted_resets_aborts() {
    let orchestrator = builder(
        CountingPlanner::new("analyst", usize::MAX),
        roster("analyst", Arc::new(Repeater("still nothing"))),
        settings(20, 2, 1),
    )
    .build();

    let wf = orchestrator
        .run_to_completion(Task::new("Hunt lateral movement"), CancellationToken::new())
        .await;

    assert_eq!(wf.state(), WorkflowState::Aborted);
    assert_eq!(wf.reset_count(), 1);
    assert_eq!(wf.rounds_completed(), 5);
    assert_eq!(
        wf.outcome(),
        Some(&WorkflowOutcome::Aborted {
            reason: TerminationReason::ResetBudgetExhausted { max_reset_count: 1 }
        })
    );
    let stalls: Vec<_> = wf.events().iter().filter(|e| e.event_type == Stalled).collect();
    assert_eq!(stalls.len(), 2);
    assert_eq!(stalls[0].payload["resets_remaining"], 1);
    assert_eq!(stalls[1].payload["resets_remaining"], 0);
    assert_event_stream_well_formed(wf.events());
}

#[tokio::test]
async fn test_denied_high_risk_action_is_never_executed() {
    let executor = Arc::new(RecordingExecutor::default());
    let orchestrator = builder(
        CountingPlanner::new("responder", 2),
        roster("responder", Responder::new("isolate_host", "WORKSTATION-05", RiskLevel::High)),
        settings(10, 3, 2),
    )
    .executor(executor.clone())
    .build();

    let gateway = orchestrator.gateway().clone();
    let approver = tokio::spawn(async move {
        loop {
            if let Some(request) = gateway.list_pending_requests().await.into_iter().next() {
                assert_eq!(request.risk, RiskLevel::High);
                gateway
                    .submit_decision(
                        ApprovalSubmission::deny(request.action_id, "analyst@soc")
                            .with_comment("host runs payroll"),
                    )
                    .await
                    .unwrap();
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let wf = orchestrator
        .run_to_completion(Task::new("Contain beaconing workstation"), CancellationToken::new())
        .await;
    approver.await.unwrap();

    assert_eq!(wf.state(), WorkflowState::Completed);
    assert_eq!(wf.rounds_completed(), 2);

    let action = &wf.actions()[0];
    assert_eq!(action.approval_state, ApprovalState::Denied);
    assert_eq!(action.execution, ExecutionState::NotExecuted);
    assert!(executor.executed.lock().is_empty());

    let record = wf.approval_for(action.id).unwrap();
    assert_eq!(record.decision, ApprovalDecision::Denied);
    assert_eq!(record.reason, ResolutionReason::HumanDecision);
    assert_eq!(record.decider, "analyst@soc");
    assert_eq!(record.comment.as_deref(), Some("host runs payroll"));

    let types = event_types(wf.events());
    let requested = types.iter().position(|t| *t == ApprovalRequested).unwrap();
    let resolved = types.iter().position(|t| *t == ApprovalResolved).unwrap();
    assert!(requested < resolved);

    let audit = orchestrator.audit_log().entries_for(wf.id());
    let denial = audit.iter().find(|e| e.action == "DeniedAction").unwrap();
    assert_eq!(denial.actor, "analyst@soc");
    assert_eq!(denial.result, AuditResult::Failure);
    assert!(!audit.iter().any(|e| e.action == "ExecutedAction"));
    wf.verify_audit_invariants().unwrap();
}

#[tokio::test]
async fn test_policy_auto_approves_low_risk_action() {
    let executor = Arc::new(RecordingExecutor::default());
    let policy = ApprovalPolicy::new(vec![PolicyRule::new(
        "block_ip",
        Some(RiskLevel::Low),
        PolicyVerdict::AutoApprove,
    )]);
    let orchestrator = builder(
        CountingPlanner::new("responder", 1),
        roster("responder", Responder::new("block_ip", "192.168.1.100", RiskLevel::Low)),
        settings(10, 3, 2),
    )
    .gateway(ApprovalGateway::new(policy))
    .executor(executor.clone())
    .build();

    let wf = orchestrator
        .run_to_completion(Task::new("Block brute force source"), CancellationToken::new())
        .await;

    assert_eq!(wf.state(), WorkflowState::Completed);
    let action = &wf.actions()[0];
    assert_eq!(action.approval_state, ApprovalState::AutoApproved);
    assert!(action.is_executed());
    assert_eq!(executor.executed.lock().len(), 1);
    assert_eq!(wf.approvals()[0].decider, "policy");
    assert!(!event_types(wf.events()).contains(&ApprovalRequested));
    wf.verify_audit_invariants().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_approval_timeout_denies_and_is_distinguishable() {
    let executor = Arc::new(RecordingExecutor::default());
    let orchestrator = builder(
        CountingPlanner::new("responder", 2),
        roster("responder", Responder::new("disable_account", "admin", RiskLevel::Critical)),
        settings(10, 3, 2),
    )
    .executor(executor.clone())
    .build();

    let wf = orchestrator
        .run_to_completion(Task::new("Respond to credential theft"), CancellationToken::new())
        .await;

    assert_eq!(wf.state(), WorkflowState::Completed);
    let action = &wf.actions()[0];
    assert_eq!(action.approval_state, ApprovalState::Denied);
    assert!(executor.executed.lock().is_empty());

    let record = wf.approval_for(action.id).unwrap();
    assert_eq!(record.decision, ApprovalDecision::Denied);
    assert_eq!(record.reason, ResolutionReason::TimedOut);
    assert_eq!(record.decider, "system");

    let resolved = wf.events().iter().find(|e| e.event_type == ApprovalResolved).unwrap();
    assert_eq!(resolved.payload["reason"], "timed_out");
    assert_eq!(resolved.payload["decision"], "denied");
}

#[tokio::test(start_paused = true)]
async fn test_approval_timeout_escalates_once_before_denying() {
    let mut escalating = settings(10, 3, 2);
    escalating.approval_timeout_behavior = ApprovalTimeoutBehavior::Escalate;
    let orchestrator = builder(
        CountingPlanner::new("responder", 2),
        roster("responder", Responder::new("disable_account", "admin", RiskLevel::High)),
        escalating,
    )
    .build();

    let started = tokio::time::Instant::now();
    let wf = orchestrator
        .run_to_completion(Task::new("Respond to credential theft"), CancellationToken::new())
        .await;

    assert!(started.elapsed() >= Duration::from_secs(120));
    let requests: Vec<_> = wf
        .events()
        .iter()
        .filter(|e| e.event_type == ApprovalRequested)
        .collect();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].payload["escalated"], false);
    assert_eq!(requests[1].payload["escalated"], true);
    assert_eq!(wf.approvals()[0].reason, ResolutionReason::TimedOut);
    assert_eq!(wf.state(), WorkflowState::Completed);
}

#[tokio::test]
async fn test_round_budget_exhaustion_aborts() {
    let investigator = Arc::new(Investigator::default());
    let orchestrator = builder(
        CountingPlanner::new("analyst", usize::MAX),
        roster("analyst", investigator.clone()),
        settings(5, 3, 2),
    )
    .build();

    let wf = orchestrator
        .run_to_completion(Task::new("Endless investigation"), CancellationToken::new())
        .await;

    assert_eq!(wf.state(), WorkflowState::Aborted);
    assert_eq!(wf.rounds_completed(), 5);
    assert_eq!(investigator.calls(), 5);
    assert_eq!(
        wf.outcome(),
        Some(&WorkflowOutcome::Aborted {
            reason: TerminationReason::RoundBudgetExhausted { max_round_count: 5 }
        })
    );

    let events = wf.events();
    let n = events.len();
    assert_eq!(events[n - 2].event_type, RoundEvaluated);
    assert_eq!(events[n - 2].round_index, 4);
    assert_eq!(events[n - 1].event_type, Aborted);
    assert_event_stream_well_formed(events);
    wf.verify_audit_invariants().unwrap();
}

#[tokio::test]
async fn test_unknown_participant_fails_without_dispatch() {
    let investigator = Arc::new(Investigator::default());
    let orchestrator = builder(
        Arc::new(BlindPlanner("ghost".to_string())),
        roster("analyst", investigator.clone()),
        settings(10, 3, 2),
    )
    .build();

    let wf = orchestrator
        .run_to_completion(Task::new("Phishing triage"), CancellationToken::new())
        .await;

    assert_eq!(wf.state(), WorkflowState::Failed);
    assert_eq!(wf.rounds_completed(), 0);
    assert_eq!(investigator.calls(), 0);
    assert_eq!(
        wf.outcome(),
        Some(&WorkflowOutcome::Failed {
            reason: TerminationReason::Planner {
                error: PlannerError::UnknownParticipant("ghost".to_string())
            }
        })
    );

    let types = event_types(wf.events());
    assert!(!types.contains(&ParticipantSelected));
    assert!(!types.contains(&ParticipantResponded));
    assert_eq!(types.last(), Some(&Failed));
}
