// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Property tests over randomly scripted participants and limits.
//!
//! Whatever the participant says, every finished workflow keeps contiguous
//! round indices within the round budget, a stall count equal to the trailing
//! non-progress run of its current epoch, one reset per replan, and no
//! executed action without an approving record.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agentic_soc_core::application::ApprovalGateway;
use agentic_soc_core::domain::progress::trailing_non_progress;
use agentic_soc_core::domain::{
    ActionProposal, ApprovalPolicy, ApprovalState, OrchestrationEventType, Participant,
    ParticipantContext, ParticipantError, ParticipantResponse, PolicyRule, PolicyVerdict,
    RiskLevel, Round, Task, TerminationReason, WorkflowOutcome, WorkflowState,
};
use async_trait::async_trait;
use common::*;
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
enum Turn {
    Say(u8),
    Fail,
    Propose(u8, RiskLevel),
}

/// Plays its turns in order, cycling once the script runs out.
struct ScriptPlayer {
    turns: Vec<Turn>,
    calls: AtomicUsize,
}

#[async_trait]
impl Participant for ScriptPlayer {
    async fn invoke(
        &self,
        _task: &Task,
        _context: &ParticipantContext,
    ) -> Result<ParticipantResponse, ParticipantError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.turns[n % self.turns.len()] {
            Turn::Say(k) => Ok(ParticipantResponse::success(format!("finding {}", k))),
            Turn::Fail => Err(ParticipantError::Failed("EDR unreachable".to_string())),
            Turn::Propose(k, risk) => Ok(ParticipantResponse::success(format!("contain host {}", k))
                .with_action(ActionProposal::new("isolate_host", format!("WS-{}", k), *risk, "beaconing"))),
        }
    }
}

fn arb_risk() -> impl Strategy<Value = RiskLevel> {
    prop_oneof![
        Just(RiskLevel::Low),
        Just(RiskLevel::Medium),
        Just(RiskLevel::High),
        Just(RiskLevel::Critical),
    ]
}

fn arb_turn() -> impl Strategy<Value = Turn> {
    prop_oneof![
        // a small alphabet so outputs repeat and rounds stall
        4 => (0u8..3).prop_map(Turn::Say),
        1 => Just(Turn::Fail),
        1 => (0u8..3, arb_risk()).prop_map(|(k, risk)| Turn::Propose(k, risk)),
    ]
}

fn current_epoch(rounds: &[Round], epoch: u32) -> Vec<Round> {
    rounds.iter().filter(|r| r.epoch == epoch).cloned().collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_orchestrated_workflows_keep_round_invariants(
        turns in prop::collection::vec(arb_turn(), 1..8),
        max_rounds in 1u32..10,
        max_stalls in 1u32..4,
        max_resets in 0u32..3,
        complete_after in prop_oneof![(1usize..12).boxed(), Just(usize::MAX).boxed()],
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let player = Arc::new(ScriptPlayer { turns, calls: AtomicUsize::new(0) });
        let mut settings = settings(max_rounds, max_stalls, max_resets);
        settings.approval_timeout = Duration::from_millis(1);
        let gateway = ApprovalGateway::new(ApprovalPolicy::new(vec![PolicyRule::new(
            "*",
            Some(RiskLevel::Low),
            PolicyVerdict::AutoApprove,
        )]));
        let orchestrator = builder(
            CountingPlanner::new("analyst", complete_after),
            roster("analyst", player),
            settings,
        )
        .gateway(gateway)
        .build();

        let wf = runtime.block_on(
            orchestrator.run_to_completion(Task::new("Hunt beaconing hosts"), CancellationToken::new()),
        );

        prop_assert!(wf.state().is_terminal());
        prop_assert!(wf.rounds().len() as u32 <= max_rounds);
        for (i, round) in wf.rounds().iter().enumerate() {
            prop_assert_eq!(round.index, i as u32);
        }

        let epoch_rounds = current_epoch(wf.rounds(), wf.reset_count());
        prop_assert_eq!(wf.stall_count(), trailing_non_progress(&epoch_rounds));

        prop_assert!(wf.reset_count() <= max_resets);
        let replans: Vec<_> = wf
            .events()
            .iter()
            .filter(|e| e.event_type == OrchestrationEventType::Replanned)
            .collect();
        prop_assert_eq!(replans.len() as u32, wf.reset_count());
        for (i, replan) in replans.iter().enumerate() {
            prop_assert_eq!(replan.payload["reset_count"].as_u64(), Some(i as u64 + 1));
            prop_assert_eq!(replan.payload["stall_count"].as_u64(), Some(0));
        }

        if let Some(WorkflowOutcome::Aborted {
            reason: TerminationReason::RoundBudgetExhausted { .. },
        }) = wf.outcome()
        {
            prop_assert_eq!(wf.rounds().len() as u32, max_rounds);
        }
        if wf.state() == WorkflowState::Completed {
            prop_assert!(wf.rounds().len() as u32 <= max_rounds);
        }

        for action in wf.actions() {
            if action.is_executed() {
                prop_assert!(matches!(
                    action.approval_state,
                    ApprovalState::Approved | ApprovalState::AutoApproved
                ));
                prop_assert!(wf.approval_for(action.id).is_some());
            }
            if action.risk > RiskLevel::Low {
                prop_assert!(!action.is_executed());
            }
        }
        prop_assert!(wf.verify_audit_invariants().is_ok());
        assert_event_stream_well_formed(wf.events());
    }
}
