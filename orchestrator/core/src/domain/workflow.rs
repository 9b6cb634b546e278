// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workflow Domain Model
//!
//! The [`Workflow`] aggregate holds everything one orchestrated task
//! accumulates: lifecycle state, current plan, rounds, proposed actions,
//! approval records, counters and the event history. The orchestrator core is
//! the only writer; every mutation goes through a method here that enforces
//! the aggregate's invariants.
//!
//! # Architectural Context
//!
//! - **Bounded Context:** Orchestration Context
//! - **Aggregate Root:** Workflow
//!
//! # State Machine
//!
//! ```text
//! Planning ──► Dispatching ──► AwaitingApproval ──► Evaluating
//!    │              │                                  │
//!    │              └──────────────────────────────────┤
//!    ▼                                                 ▼
//! Completed ◄──────────────────────────── {Planning | Completed | Stalled}
//!
//! Stalled ──► {Planning | AwaitingHumanGuidance}
//! AwaitingHumanGuidance ──► Planning
//! any non-terminal ──► {Failed | Aborted}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::action::{
    ActionId, ApprovalRecord, ApprovalState, ExecutionState, ProposedAction,
};
use crate::domain::events::{OrchestrationEvent, OrchestrationEventType};
use crate::domain::plan::{Plan, PlannerError};
use crate::domain::progress::StallCounter;
use crate::domain::round::Round;
use crate::domain::task::Task;

// ============================================================================
// Value Objects: Identifiers
// ============================================================================

/// Unique identifier for a workflow instance (one per submitted task)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowId(pub Uuid);

impl WorkflowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for WorkflowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ============================================================================
// Lifecycle State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowState {
    Planning,
    Dispatching,
    AwaitingApproval,
    Evaluating,
    Stalled,
    AwaitingHumanGuidance,
    Completed,
    Failed,
    Aborted,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::Completed | WorkflowState::Failed | WorkflowState::Aborted
        )
    }

    pub fn can_transition_to(&self, next: WorkflowState) -> bool {
        use WorkflowState::*;

        if self.is_terminal() {
            return false;
        }
        if matches!(next, Failed | Aborted) {
            return true;
        }
        matches!(
            (self, next),
            (Planning, Dispatching)
                | (Planning, Completed)
                | (Dispatching, AwaitingApproval)
                | (Dispatching, Evaluating)
                | (AwaitingApproval, Evaluating)
                | (Evaluating, Planning)
                | (Evaluating, Completed)
                | (Evaluating, Stalled)
                | (Stalled, Planning)
                | (Stalled, AwaitingHumanGuidance)
                | (AwaitingHumanGuidance, Planning)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Planning => "planning",
            WorkflowState::Dispatching => "dispatching",
            WorkflowState::AwaitingApproval => "awaiting_approval",
            WorkflowState::Evaluating => "evaluating",
            WorkflowState::Stalled => "stalled",
            WorkflowState::AwaitingHumanGuidance => "awaiting_human_guidance",
            WorkflowState::Completed => "completed",
            WorkflowState::Failed => "failed",
            WorkflowState::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: WorkflowState,
    pub to: WorkflowState,
    pub at: DateTime<Utc>,
}

// ============================================================================
// Limits
// ============================================================================

/// Budgets fixed when the workflow is created. There are no setters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkflowLimits {
    max_round_count: u32,
    max_stall_count: u32,
    max_reset_count: u32,
}

impl WorkflowLimits {
    pub fn new(
        max_round_count: u32,
        max_stall_count: u32,
        max_reset_count: u32,
    ) -> Result<Self, WorkflowError> {
        if max_round_count < 1 {
            return Err(WorkflowError::InvalidLimits(
                "max_round_count must be at least 1".to_string(),
            ));
        }
        if max_stall_count < 1 {
            return Err(WorkflowError::InvalidLimits(
                "max_stall_count must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            max_round_count,
            max_stall_count,
            max_reset_count,
        })
    }

    pub fn max_round_count(&self) -> u32 {
        self.max_round_count
    }

    pub fn max_stall_count(&self) -> u32 {
        self.max_stall_count
    }

    pub fn max_reset_count(&self) -> u32 {
        self.max_reset_count
    }
}

impl Default for WorkflowLimits {
    fn default() -> Self {
        Self {
            max_round_count: 20,
            max_stall_count: 3,
            max_reset_count: 2,
        }
    }
}

// ============================================================================
// Human Guidance & Outcome
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanGuidance {
    pub text: String,
    pub provided_by: String,
    pub received_at: DateTime<Utc>,
}

impl HumanGuidance {
    pub fn new(text: impl Into<String>, provided_by: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            provided_by: provided_by.into(),
            received_at: Utc::now(),
        }
    }
}

/// Why a workflow stopped without completing.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminationReason {
    #[error("planner error: {error}")]
    Planner { error: PlannerError },

    #[error("round budget of {max_round_count} exhausted")]
    RoundBudgetExhausted { max_round_count: u32 },

    #[error("stalled with reset budget of {max_reset_count} exhausted")]
    ResetBudgetExhausted { max_reset_count: u32 },

    #[error("cancelled while {state} after {rounds_completed} rounds")]
    Cancelled {
        state: WorkflowState,
        rounds_completed: u32,
    },

    #[error("invariant violation: {message}")]
    InvariantViolation { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkflowOutcome {
    Completed { summary: String },
    Failed { reason: TerminationReason },
    Aborted { reason: TerminationReason },
}

impl WorkflowOutcome {
    pub fn status_label(&self) -> &'static str {
        match self {
            WorkflowOutcome::Completed { .. } => "completed",
            WorkflowOutcome::Failed { .. } => "failed",
            WorkflowOutcome::Aborted { .. } => "aborted",
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("invalid workflow limits: {0}")]
    InvalidLimits(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: WorkflowState, to: WorkflowState },

    #[error("workflow already terminal ({0})")]
    AlreadyTerminal(WorkflowState),

    #[error("round index {actual} is not contiguous (expected {expected})")]
    NonContiguousRound { expected: u32, actual: u32 },

    #[error("round budget of {0} already used")]
    RoundBudgetExceeded(u32),

    #[error("reset budget of {0} already used")]
    ResetBudgetExceeded(u32),

    #[error("unknown action {0}")]
    UnknownAction(ActionId),

    #[error("action {0} belongs to a different workflow")]
    ForeignAction(ActionId),

    #[error("action {0} already has an approval record")]
    DuplicateApproval(ActionId),

    #[error("approval gateway rejected action {action_id}: {reason}")]
    GatewayRejected { action_id: ActionId, reason: String },

    #[error("action {0} has no approving record")]
    NotApproved(ActionId),

    #[error("action {0} was already executed")]
    AlreadyExecuted(ActionId),
}

// ============================================================================
// Aggregate Root: Workflow
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Workflow {
    id: WorkflowId,
    task: Task,
    limits: WorkflowLimits,
    state: WorkflowState,
    plan: Option<Plan>,
    rounds: Vec<Round>,
    actions: Vec<ProposedAction>,
    approvals: Vec<ApprovalRecord>,
    stall_counter: StallCounter,
    reset_count: u32,
    pending_guidance: Vec<HumanGuidance>,
    guidance_history: Vec<HumanGuidance>,
    events: Vec<OrchestrationEvent>,
    transitions: Vec<StateTransition>,
    outcome: Option<WorkflowOutcome>,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl Workflow {
    pub fn new(task: Task, limits: WorkflowLimits) -> Self {
        Self::with_id(WorkflowId::new(), task, limits)
    }

    pub fn with_id(id: WorkflowId, task: Task, limits: WorkflowLimits) -> Self {
        Self {
            id,
            task,
            limits,
            state: WorkflowState::Planning,
            plan: None,
            rounds: Vec::new(),
            actions: Vec::new(),
            approvals: Vec::new(),
            stall_counter: StallCounter::default(),
            reset_count: 0,
            pending_guidance: Vec::new(),
            guidance_history: Vec::new(),
            events: Vec::new(),
            transitions: Vec::new(),
            outcome: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    // ---- accessors ---------------------------------------------------------

    pub fn id(&self) -> WorkflowId {
        self.id
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn limits(&self) -> WorkflowLimits {
        self.limits
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    pub fn rounds(&self) -> &[Round] {
        &self.rounds
    }

    pub fn actions(&self) -> &[ProposedAction] {
        &self.actions
    }

    pub fn action(&self, id: ActionId) -> Option<&ProposedAction> {
        self.actions.iter().find(|a| a.id == id)
    }

    pub fn approvals(&self) -> &[ApprovalRecord] {
        &self.approvals
    }

    pub fn approval_for(&self, id: ActionId) -> Option<&ApprovalRecord> {
        self.approvals.iter().find(|r| r.action_id == id)
    }

    pub fn pending_actions(&self) -> Vec<&ProposedAction> {
        self.actions
            .iter()
            .filter(|a| a.approval_state == ApprovalState::Pending)
            .collect()
    }

    pub fn stall_count(&self) -> u32 {
        self.stall_counter.count()
    }

    pub fn reset_count(&self) -> u32 {
        self.reset_count
    }

    pub fn pending_guidance(&self) -> &[HumanGuidance] {
        &self.pending_guidance
    }

    pub fn guidance_history(&self) -> &[HumanGuidance] {
        &self.guidance_history
    }

    pub fn events(&self) -> &[OrchestrationEvent] {
        &self.events
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    pub fn outcome(&self) -> Option<&WorkflowOutcome> {
        self.outcome.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn rounds_completed(&self) -> u32 {
        self.rounds.len() as u32
    }

    /// Index the next recorded round must carry.
    pub fn next_round_index(&self) -> u32 {
        self.rounds.len() as u32
    }

    pub fn round_budget_exhausted(&self) -> bool {
        self.rounds_completed() >= self.limits.max_round_count
    }

    pub fn stall_threshold_reached(&self) -> bool {
        self.stall_counter.count() >= self.limits.max_stall_count
    }

    pub fn resets_exhausted(&self) -> bool {
        self.reset_count >= self.limits.max_reset_count
    }

    // ---- state machine -----------------------------------------------------

    pub fn transition_to(&mut self, next: WorkflowState) -> Result<(), WorkflowError> {
        if self.state.is_terminal() {
            return Err(WorkflowError::AlreadyTerminal(self.state));
        }
        if !self.state.can_transition_to(next) {
            return Err(WorkflowError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.transitions.push(StateTransition {
            from: self.state,
            to: next,
            at: Utc::now(),
        });
        self.state = next;
        Ok(())
    }

    pub fn complete(&mut self, summary: impl Into<String>) -> Result<(), WorkflowError> {
        self.transition_to(WorkflowState::Completed)?;
        self.finish(WorkflowOutcome::Completed {
            summary: summary.into(),
        });
        Ok(())
    }

    pub fn fail(&mut self, reason: TerminationReason) -> Result<(), WorkflowError> {
        self.transition_to(WorkflowState::Failed)?;
        self.finish(WorkflowOutcome::Failed { reason });
        Ok(())
    }

    pub fn abort(&mut self, reason: TerminationReason) -> Result<(), WorkflowError> {
        self.transition_to(WorkflowState::Aborted)?;
        self.finish(WorkflowOutcome::Aborted { reason });
        Ok(())
    }

    fn finish(&mut self, outcome: WorkflowOutcome) {
        self.outcome = Some(outcome);
        self.finished_at = Some(Utc::now());
    }

    // ---- plan --------------------------------------------------------------

    /// Adopts a new plan wholesale. Returns `true` when its steps differ from
    /// the plan it replaces (or there was none).
    pub fn replace_plan(&mut self, mut plan: Plan) -> bool {
        let (changed, version) = match &self.plan {
            Some(current) => (!current.same_steps(&plan), current.version + 1),
            None => (true, 1),
        };
        plan.version = version;
        self.plan = Some(plan);
        changed
    }

    // ---- rounds ------------------------------------------------------------

    /// Appends a round and updates the stall counter. Returns the new stall
    /// count.
    pub fn record_round(&mut self, round: Round) -> Result<u32, WorkflowError> {
        let expected = self.next_round_index();
        if round.index != expected {
            return Err(WorkflowError::NonContiguousRound {
                expected,
                actual: round.index,
            });
        }
        if self.round_budget_exhausted() {
            return Err(WorkflowError::RoundBudgetExceeded(self.limits.max_round_count));
        }
        let stall = self.stall_counter.observe(round.verdict);
        self.rounds.push(round);
        Ok(stall)
    }

    /// Stall intervention: stall counter back to zero, reset counter up by one.
    pub fn begin_replan(&mut self) -> Result<u32, WorkflowError> {
        if self.resets_exhausted() {
            return Err(WorkflowError::ResetBudgetExceeded(self.limits.max_reset_count));
        }
        self.stall_counter.reset();
        self.reset_count += 1;
        Ok(self.reset_count)
    }

    // ---- actions & approvals ----------------------------------------------

    pub fn register_action(&mut self, action: ProposedAction) -> Result<ActionId, WorkflowError> {
        if action.workflow_id != self.id {
            return Err(WorkflowError::ForeignAction(action.id));
        }
        let id = action.id;
        self.actions.push(action);
        Ok(id)
    }

    /// Attaches the single approval record an action may ever have.
    pub fn record_approval(&mut self, record: ApprovalRecord) -> Result<ApprovalState, WorkflowError> {
        if self.approval_for(record.action_id).is_some() {
            return Err(WorkflowError::DuplicateApproval(record.action_id));
        }
        let state = record.resulting_state();
        let action = self
            .actions
            .iter_mut()
            .find(|a| a.id == record.action_id)
            .ok_or(WorkflowError::UnknownAction(record.action_id))?;
        action.approval_state = state;
        self.approvals.push(record);
        Ok(state)
    }

    /// Records the outcome of executing an action. Refuses actions without an
    /// approving record.
    pub fn mark_action_executed(
        &mut self,
        id: ActionId,
        result: Result<(), String>,
    ) -> Result<(), WorkflowError> {
        let approved = self
            .approval_for(id)
            .map(|r| r.resulting_state().permits_execution())
            .unwrap_or(false);
        let action = self
            .actions
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(WorkflowError::UnknownAction(id))?;
        if !approved || !action.approval_state.permits_execution() {
            return Err(WorkflowError::NotApproved(id));
        }
        if action.execution != ExecutionState::NotExecuted {
            return Err(WorkflowError::AlreadyExecuted(id));
        }
        action.execution = match result {
            Ok(()) => ExecutionState::Executed { at: Utc::now() },
            Err(reason) => ExecutionState::ExecutionFailed {
                reason,
                at: Utc::now(),
            },
        };
        Ok(())
    }

    // ---- guidance ----------------------------------------------------------

    pub fn push_guidance(&mut self, guidance: HumanGuidance) {
        self.pending_guidance.push(guidance);
    }

    /// Moves pending guidance into the history once a planner has seen it.
    pub fn consume_pending_guidance(&mut self) -> Vec<HumanGuidance> {
        let taken = std::mem::take(&mut self.pending_guidance);
        self.guidance_history.extend(taken.iter().cloned());
        taken
    }

    // ---- events ------------------------------------------------------------

    pub fn record_event(
        &mut self,
        event_type: OrchestrationEventType,
        round_index: u32,
        payload: serde_json::Value,
    ) -> OrchestrationEvent {
        let event = OrchestrationEvent {
            workflow_id: self.id,
            sequence: self.events.len() as u64,
            round_index,
            event_type,
            timestamp: Utc::now(),
            payload,
        };
        self.events.push(event.clone());
        event
    }

    // ---- reporting ---------------------------------------------------------

    pub fn summary(&self) -> WorkflowSummary {
        WorkflowSummary {
            workflow_id: self.id,
            task: self.task.description().to_string(),
            state: self.state,
            rounds_completed: self.rounds_completed(),
            stall_count: self.stall_count(),
            reset_count: self.reset_count,
            plan_version: self.plan.as_ref().map(|p| p.version).unwrap_or(0),
            pending_approvals: self.pending_actions().len(),
            outcome: self.outcome.clone(),
            created_at: self.created_at,
            finished_at: self.finished_at,
        }
    }

    /// Checks the audit-trail invariants that must hold at any point.
    pub fn verify_audit_invariants(&self) -> Result<(), WorkflowError> {
        for (expected, round) in self.rounds.iter().enumerate() {
            if round.index != expected as u32 {
                return Err(WorkflowError::NonContiguousRound {
                    expected: expected as u32,
                    actual: round.index,
                });
            }
        }
        if self.rounds_completed() > self.limits.max_round_count {
            return Err(WorkflowError::RoundBudgetExceeded(self.limits.max_round_count));
        }
        for (i, record) in self.approvals.iter().enumerate() {
            if self.action(record.action_id).is_none() {
                return Err(WorkflowError::UnknownAction(record.action_id));
            }
            if self.approvals[..i].iter().any(|r| r.action_id == record.action_id) {
                return Err(WorkflowError::DuplicateApproval(record.action_id));
            }
        }
        for action in &self.actions {
            if action.execution == ExecutionState::NotExecuted {
                continue;
            }
            let approved = self
                .approval_for(action.id)
                .map(|r| r.resulting_state().permits_execution())
                .unwrap_or(false);
            if !approved {
                return Err(WorkflowError::NotApproved(action.id));
            }
        }
        Ok(())
    }
}

/// Point-in-time status of a workflow, as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub workflow_id: WorkflowId,
    pub task: String,
    pub state: WorkflowState,
    pub rounds_completed: u32,
    pub stall_count: u32,
    pub reset_count: u32,
    pub plan_version: u32,
    pub pending_approvals: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<WorkflowOutcome>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}
