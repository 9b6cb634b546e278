// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Proposed Actions and Approval Records
//!
//! A participant may propose side-effecting actions (isolate a host, disable
//! an account, block an IP). Each proposal becomes a [`ProposedAction`] owned
//! by the workflow aggregate and must be resolved by exactly one
//! [`ApprovalRecord`] before anything is executed.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Related:** `domain::policy` (auto-approve table), `application::approval_gateway`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::workflow::WorkflowId;

// ============================================================================
// Value Objects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(pub Uuid);

impl ActionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Risk classification attached to a proposed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// High and Critical actions never execute without an approval record.
    pub fn is_high(&self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Critical)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free-form action kind, e.g. `isolate_host` or `disable_account`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionKind(String);

impl ActionKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActionKind {
    fn from(kind: &str) -> Self {
        Self::new(kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    Approved,
    Denied,
    AutoApproved,
}

impl ApprovalState {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, ApprovalState::Pending)
    }

    pub fn permits_execution(&self) -> bool {
        matches!(self, ApprovalState::Approved | ApprovalState::AutoApproved)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionState {
    NotExecuted,
    Executed { at: DateTime<Utc> },
    ExecutionFailed { reason: String, at: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Denied,
}

/// How an approval record came to exist. Lets a timeout be told apart from
/// an explicit denial in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionReason {
    HumanDecision,
    PolicyAutoApproved,
    TimedOut,
    Cancelled,
}

impl ResolutionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionReason::HumanDecision => "human_decision",
            ResolutionReason::PolicyAutoApproved => "policy_auto_approved",
            ResolutionReason::TimedOut => "timed_out",
            ResolutionReason::Cancelled => "cancelled",
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub action_id: ActionId,
    pub decision: ApprovalDecision,
    pub decider: String,
    pub decided_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub reason: ResolutionReason,
}

impl ApprovalRecord {
    pub fn human(
        action_id: ActionId,
        decision: ApprovalDecision,
        decider: impl Into<String>,
        comment: Option<String>,
    ) -> Self {
        Self {
            action_id,
            decision,
            decider: decider.into(),
            decided_at: Utc::now(),
            comment,
            reason: ResolutionReason::HumanDecision,
        }
    }

    pub fn auto_approved(action_id: ActionId) -> Self {
        Self {
            action_id,
            decision: ApprovalDecision::Approved,
            decider: "policy".to_string(),
            decided_at: Utc::now(),
            comment: None,
            reason: ResolutionReason::PolicyAutoApproved,
        }
    }

    /// Synthetic denial written by the system (timeout or cancellation).
    pub fn system_denied(action_id: ActionId, reason: ResolutionReason) -> Self {
        Self {
            action_id,
            decision: ApprovalDecision::Denied,
            decider: "system".to_string(),
            decided_at: Utc::now(),
            comment: None,
            reason,
        }
    }

    /// The approval state this record puts its action into.
    pub fn resulting_state(&self) -> ApprovalState {
        match (self.decision, self.reason) {
            (ApprovalDecision::Approved, ResolutionReason::PolicyAutoApproved) => {
                ApprovalState::AutoApproved
            }
            (ApprovalDecision::Approved, _) => ApprovalState::Approved,
            (ApprovalDecision::Denied, _) => ApprovalState::Denied,
        }
    }
}

/// What a participant asks for in its response, before the orchestrator
/// assigns it an id and tracks it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionProposal {
    pub kind: ActionKind,
    pub target: String,
    pub risk: RiskLevel,
    pub justification: String,
}

impl ActionProposal {
    pub fn new(
        kind: impl Into<ActionKind>,
        target: impl Into<String>,
        risk: RiskLevel,
        justification: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            target: target.into(),
            risk,
            justification: justification.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAction {
    pub id: ActionId,
    pub workflow_id: WorkflowId,
    pub round_index: u32,
    pub proposed_by: String,
    pub kind: ActionKind,
    pub target: String,
    pub risk: RiskLevel,
    pub justification: String,
    pub approval_state: ApprovalState,
    pub execution: ExecutionState,
    pub proposed_at: DateTime<Utc>,
}

impl ProposedAction {
    pub fn from_proposal(
        workflow_id: WorkflowId,
        round_index: u32,
        proposed_by: impl Into<String>,
        proposal: ActionProposal,
    ) -> Self {
        Self {
            id: ActionId::new(),
            workflow_id,
            round_index,
            proposed_by: proposed_by.into(),
            kind: proposal.kind,
            target: proposal.target,
            risk: proposal.risk,
            justification: proposal.justification,
            approval_state: ApprovalState::Pending,
            execution: ExecutionState::NotExecuted,
            proposed_at: Utc::now(),
        }
    }

    pub fn is_executed(&self) -> bool {
        matches!(self.execution, ExecutionState::Executed { .. })
    }
}

// ============================================================================
// Execution Port
// ============================================================================

/// Carries out an approved action against the outside world (EDR, IdP,
/// firewall). The orchestrator only calls this after the aggregate has
/// confirmed an approving record exists.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &ProposedAction) -> anyhow::Result<()>;
}

/// Executor that records the action in the log and does nothing else.
#[derive(Debug, Default, Clone)]
pub struct LoggingActionExecutor;

#[async_trait]
impl ActionExecutor for LoggingActionExecutor {
    async fn execute(&self, action: &ProposedAction) -> anyhow::Result<()> {
        tracing::info!(
            workflow_id = %action.workflow_id,
            action_id = %action.id,
            kind = %action.kind,
            target = %action.target,
            risk = %action.risk,
            "Executing approved action"
        );
        Ok(())
    }
}
