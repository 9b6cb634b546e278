// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared test doubles for the orchestration integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agentic_soc_core::application::{
    ApprovalGateway, Orchestrator, OrchestratorBuilder, OrchestratorSettings,
};
use agentic_soc_core::domain::{
    ActionExecutor, ActionProposal, ApprovalPolicy, OrchestrationEvent, OrchestrationEventType,
    Participant, ParticipantContext, ParticipantDescriptor, ParticipantError, ParticipantResponse,
    ParticipantRoster, Plan, PlanStep, Planner, PlannerDecision, PlannerError, PlanningInput,
    ProposedAction, RiskLevel, Task, WorkflowLimits,
};
use async_trait::async_trait;
use parking_lot::Mutex;

// ============================================================================
// Planners
// ============================================================================

/// Dispatches `target` until `complete_after` rounds exist, then completes.
/// Completes early on a forced replan when `complete_on_replan` is set.
pub struct CountingPlanner {
    pub target: String,
    pub complete_after: usize,
    pub complete_on_replan: bool,
    pub inputs: Mutex<Vec<PlanningInput>>,
}

impl CountingPlanner {
    pub fn new(target: &str, complete_after: usize) -> Arc<Self> {
        Arc::new(Self {
            target: target.to_string(),
            complete_after,
            complete_on_replan: false,
            inputs: Mutex::new(Vec::new()),
        })
    }

    pub fn completing_on_replan(target: &str) -> Arc<Self> {
        Arc::new(Self {
            target: target.to_string(),
            complete_after: usize::MAX,
            complete_on_replan: true,
            inputs: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.inputs.lock().len()
    }
}

#[async_trait]
impl Planner for CountingPlanner {
    async fn plan(&self, input: PlanningInput) -> Result<PlannerDecision, PlannerError> {
        let rounds = input.rounds.len();
        let replan = input.replan_requested;
        self.inputs.lock().push(input);

        let plan = Plan::new(vec![PlanStep::new(self.target.clone(), "investigate")]);
        if rounds >= self.complete_after || (self.complete_on_replan && replan) {
            return Ok(PlannerDecision::complete(plan, format!("done after {} rounds", rounds)));
        }
        Ok(PlannerDecision::dispatch(plan, self.target.clone(), "keep investigating"))
    }
}

/// Always picks a participant name without checking the roster.
pub struct BlindPlanner(pub String);

#[async_trait]
impl Planner for BlindPlanner {
    async fn plan(&self, _input: PlanningInput) -> Result<PlannerDecision, PlannerError> {
        let plan = Plan::new(vec![PlanStep::new(self.0.clone(), "")]);
        Ok(PlannerDecision::dispatch(plan, self.0.clone(), "blind pick"))
    }
}

// ============================================================================
// Participants
// ============================================================================

/// Returns a distinct finding each call.
#[derive(Default)]
pub struct Investigator {
    pub calls: AtomicUsize,
    pub contexts: Mutex<Vec<ParticipantContext>>,
}

impl Investigator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Participant for Investigator {
    async fn invoke(
        &self,
        _task: &Task,
        context: &ParticipantContext,
    ) -> Result<ParticipantResponse, ParticipantError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().push(context.clone());
        Ok(ParticipantResponse::success(format!("finding #{}", n)))
    }
}

/// Returns the same text every call.
pub struct Repeater(pub &'static str);

#[async_trait]
impl Participant for Repeater {
    async fn invoke(
        &self,
        _task: &Task,
        _context: &ParticipantContext,
    ) -> Result<ParticipantResponse, ParticipantError> {
        Ok(ParticipantResponse::success(self.0))
    }
}

/// Proposes `proposal` in its first round only; later rounds report findings.
pub struct Responder {
    pub proposal: ActionProposal,
    pub calls: AtomicUsize,
}

impl Responder {
    pub fn new(kind: &str, target: &str, risk: RiskLevel) -> Arc<Self> {
        Arc::new(Self {
            proposal: ActionProposal::new(kind, target, risk, "containment required"),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Participant for Responder {
    async fn invoke(
        &self,
        _task: &Task,
        _context: &ParticipantContext,
    ) -> Result<ParticipantResponse, ParticipantError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            Ok(ParticipantResponse::success("recommend containment").with_action(self.proposal.clone()))
        } else {
            Ok(ParticipantResponse::success(format!("monitoring, pass {}", n)))
        }
    }
}

/// Proposes every action of `proposals` in its first round.
pub struct Proposer {
    pub proposals: Vec<ActionProposal>,
    pub calls: AtomicUsize,
}

impl Proposer {
    pub fn new(proposals: Vec<ActionProposal>) -> Arc<Self> {
        Arc::new(Self {
            proposals,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Participant for Proposer {
    async fn invoke(
        &self,
        _task: &Task,
        _context: &ParticipantContext,
    ) -> Result<ParticipantResponse, ParticipantError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n > 0 {
            return Ok(ParticipantResponse::success(format!("monitoring, pass {}", n)));
        }
        let response = self
            .proposals
            .iter()
            .cloned()
            .fold(ParticipantResponse::success("recommend containment"), |r, p| r.with_action(p));
        Ok(response)
    }
}

/// Never answers in time.
pub struct Hung;

#[async_trait]
impl Participant for Hung {
    async fn invoke(
        &self,
        _task: &Task,
        _context: &ParticipantContext,
    ) -> Result<ParticipantResponse, ParticipantError> {
        tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        Ok(ParticipantResponse::success("too late"))
    }
}

// ============================================================================
// Executor
// ============================================================================

#[derive(Default)]
pub struct RecordingExecutor {
    pub executed: Mutex<Vec<ProposedAction>>,
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn execute(&self, action: &ProposedAction) -> anyhow::Result<()> {
        self.executed.lock().push(action.clone());
        Ok(())
    }
}

// ============================================================================
// Wiring
// ============================================================================

pub fn roster(name: &str, handle: Arc<dyn Participant>) -> ParticipantRoster {
    ParticipantRoster::new()
        .with(ParticipantDescriptor::new(name, format!("{} duties", name), handle))
        .unwrap()
}

pub fn settings(max_rounds: u32, max_stalls: u32, max_resets: u32) -> OrchestratorSettings {
    OrchestratorSettings {
        limits: WorkflowLimits::new(max_rounds, max_stalls, max_resets).unwrap(),
        planner_timeout: Duration::from_secs(10),
        participant_timeout: Duration::from_secs(10),
        approval_timeout: Duration::from_secs(60),
        stall_grace_window: Duration::from_secs(30),
        ..OrchestratorSettings::default()
    }
}

pub fn builder(planner: Arc<dyn Planner>, roster: ParticipantRoster, settings: OrchestratorSettings) -> OrchestratorBuilder {
    Orchestrator::builder(planner, roster)
        .gateway(ApprovalGateway::new(ApprovalPolicy::require_all()))
        .settings(settings)
}

pub fn event_types(events: &[OrchestrationEvent]) -> Vec<OrchestrationEventType> {
    events.iter().map(|e| e.event_type).collect()
}

/// Sequences are 0..n with no gaps and exactly one terminal event, last.
pub fn assert_event_stream_well_formed(events: &[OrchestrationEvent]) {
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.sequence, i as u64, "event sequence gap at {}", i);
    }
    let terminal: Vec<_> = events.iter().filter(|e| e.event_type.is_terminal()).collect();
    assert_eq!(terminal.len(), 1, "expected exactly one terminal event");
    assert!(events.last().map(|e| e.event_type.is_terminal()).unwrap_or(false));
}
