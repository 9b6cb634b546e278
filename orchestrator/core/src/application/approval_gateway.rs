// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Approval Gateway - human-in-the-loop gating of proposed actions
//!
//! Evaluates the approval policy, holds pending approval requests, accepts
//! decisions from humans and writes synthetic denials for timeouts and
//! cancellations. Every action gets at most one [`ApprovalRecord`]; a second
//! decision is rejected with [`ApprovalError::Conflict`] and leaves the
//! original untouched.
//!
//! Records of a running workflow stay queryable through [`ApprovalGateway::record`].
//! Once the workflow finishes its records are released into a bounded
//! tombstone set, which keeps rejecting late decisions until the oldest
//! entries are evicted.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info, warn};

use crate::domain::action::{
    ActionId, ActionKind, ApprovalDecision, ApprovalRecord, ProposedAction, ResolutionReason,
    RiskLevel,
};
use crate::domain::policy::{ApprovalPolicy, PolicyVerdict};
use crate::domain::workflow::WorkflowId;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApprovalError {
    #[error("no approval request for action {0}")]
    NotFound(ActionId),

    #[error("action already resolved: {existing:?}")]
    Conflict { existing: ApprovalRecord },

    #[error("action {0} is already awaiting approval")]
    AlreadyPending(ActionId),

    #[error("action {0} is not pending approval")]
    NotPending(ActionId),
}

/// A decision arriving on the approval channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalSubmission {
    pub action_id: ActionId,
    pub decision: ApprovalDecision,
    pub decider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ApprovalSubmission {
    pub fn approve(action_id: ActionId, decider: impl Into<String>) -> Self {
        Self {
            action_id,
            decision: ApprovalDecision::Approved,
            decider: decider.into(),
            comment: None,
        }
    }

    pub fn deny(action_id: ActionId, decider: impl Into<String>) -> Self {
        Self {
            action_id,
            decision: ApprovalDecision::Denied,
            decider: decider.into(),
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// A pending approval request
#[derive(Debug)]
struct PendingApproval {
    action: ProposedAction,
    requested_at: DateTime<Utc>,
    timeout: Duration,
    escalated: bool,
    response_tx: oneshot::Sender<ApprovalRecord>,
}

impl PendingApproval {
    fn info(&self) -> PendingApprovalInfo {
        PendingApprovalInfo {
            action_id: self.action.id,
            workflow_id: self.action.workflow_id,
            round_index: self.action.round_index,
            proposed_by: self.action.proposed_by.clone(),
            kind: self.action.kind.clone(),
            target: self.action.target.clone(),
            risk: self.action.risk,
            justification: self.action.justification.clone(),
            requested_at: self.requested_at,
            timeout_seconds: self.timeout.as_secs(),
            escalated: self.escalated,
        }
    }
}

/// Information about a pending request (for UIs and the CLI)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApprovalInfo {
    pub action_id: ActionId,
    pub workflow_id: WorkflowId,
    pub round_index: u32,
    pub proposed_by: String,
    pub kind: ActionKind,
    pub target: String,
    pub risk: RiskLevel,
    pub justification: String,
    pub requested_at: DateTime<Utc>,
    pub timeout_seconds: u64,
    pub escalated: bool,
}

/// Released records kept for conflict checks after their workflow finished.
pub const DEFAULT_TOMBSTONE_CAPACITY: usize = 4096;

#[derive(Debug)]
struct ResolvedApproval {
    workflow_id: WorkflowId,
    record: ApprovalRecord,
}

#[derive(Debug, Default)]
struct GatewayState {
    pending: HashMap<ActionId, PendingApproval>,
    resolved: HashMap<ActionId, ResolvedApproval>,
    tombstones: HashMap<ActionId, ApprovalRecord>,
    tombstone_order: VecDeque<ActionId>,
}

impl GatewayState {
    fn existing(&self, action_id: &ActionId) -> Option<&ApprovalRecord> {
        self.resolved
            .get(action_id)
            .map(|r| &r.record)
            .or_else(|| self.tombstones.get(action_id))
    }

    fn conflict(&self, action_id: &ActionId) -> Option<ApprovalError> {
        self.existing(action_id).map(|existing| ApprovalError::Conflict {
            existing: existing.clone(),
        })
    }
}

#[derive(Clone)]
pub struct ApprovalGateway {
    policy: Arc<ApprovalPolicy>,
    state: Arc<RwLock<GatewayState>>,
    tombstone_capacity: usize,
}

impl ApprovalGateway {
    pub fn new(policy: ApprovalPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
            state: Arc::new(RwLock::new(GatewayState::default())),
            tombstone_capacity: DEFAULT_TOMBSTONE_CAPACITY,
        }
    }

    pub fn with_tombstone_capacity(mut self, capacity: usize) -> Self {
        self.tombstone_capacity = capacity;
        self
    }

    pub fn policy(&self) -> &ApprovalPolicy {
        &self.policy
    }

    pub fn evaluate(&self, action: &ProposedAction) -> PolicyVerdict {
        self.policy.evaluate(&action.kind, action.risk)
    }

    /// Records a policy auto-approval for an action that matched an
    /// AutoApprove rule.
    pub async fn auto_approve(&self, action: &ProposedAction) -> Result<ApprovalRecord, ApprovalError> {
        let mut state = self.state.write().await;
        if let Some(conflict) = state.conflict(&action.id) {
            return Err(conflict);
        }
        if state.pending.contains_key(&action.id) {
            return Err(ApprovalError::AlreadyPending(action.id));
        }
        let record = ApprovalRecord::auto_approved(action.id);
        state.resolved.insert(
            action.id,
            ResolvedApproval {
                workflow_id: action.workflow_id,
                record: record.clone(),
            },
        );
        debug!(action_id = %action.id, kind = %action.kind, "Action auto-approved by policy");
        Ok(record)
    }

    /// Opens an approval request. The returned receiver yields the record
    /// once a human decides or the request is expired.
    pub async fn open_request(
        &self,
        action: &ProposedAction,
        timeout: Duration,
    ) -> Result<oneshot::Receiver<ApprovalRecord>, ApprovalError> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.write().await;
        if let Some(conflict) = state.conflict(&action.id) {
            return Err(conflict);
        }
        if state.pending.contains_key(&action.id) {
            return Err(ApprovalError::AlreadyPending(action.id));
        }
        state.pending.insert(
            action.id,
            PendingApproval {
                action: action.clone(),
                requested_at: Utc::now(),
                timeout,
                escalated: false,
                response_tx: tx,
            },
        );

        info!(
            action_id = %action.id,
            workflow_id = %action.workflow_id,
            kind = %action.kind,
            risk = %action.risk,
            timeout_seconds = timeout.as_secs(),
            "Approval requested"
        );
        Ok(rx)
    }

    /// Flags a pending request as escalated after its first timeout window.
    pub async fn mark_escalated(&self, action_id: ActionId) -> Result<(), ApprovalError> {
        let mut state = self.state.write().await;
        if let Some(request) = state.pending.get_mut(&action_id) {
            request.escalated = true;
            warn!(action_id = %action_id, "Approval request escalated");
            return Ok(());
        }
        if state.existing(&action_id).is_some() {
            return Err(ApprovalError::NotPending(action_id));
        }
        Err(ApprovalError::NotFound(action_id))
    }

    /// Submit a human decision for a pending request
    pub async fn submit_decision(
        &self,
        submission: ApprovalSubmission,
    ) -> Result<ApprovalRecord, ApprovalError> {
        let record = ApprovalRecord::human(
            submission.action_id,
            submission.decision,
            submission.decider,
            submission.comment,
        );
        self.resolve(record).await
    }

    /// Resolves a pending request with a system denial (timeout or
    /// cancellation).
    pub async fn expire(
        &self,
        action_id: ActionId,
        reason: ResolutionReason,
    ) -> Result<ApprovalRecord, ApprovalError> {
        self.resolve(ApprovalRecord::system_denied(action_id, reason)).await
    }

    /// Writes a system denial for an action that never reached an approval
    /// request, e.g. when its workflow is torn down before the action's turn.
    /// A pending request for the action is expired instead.
    pub async fn resolve_unrequested(
        &self,
        action: &ProposedAction,
        reason: ResolutionReason,
    ) -> Result<ApprovalRecord, ApprovalError> {
        {
            let mut state = self.state.write().await;
            if let Some(conflict) = state.conflict(&action.id) {
                return Err(conflict);
            }
            if !state.pending.contains_key(&action.id) {
                let record = ApprovalRecord::system_denied(action.id, reason);
                state.resolved.insert(
                    action.id,
                    ResolvedApproval {
                        workflow_id: action.workflow_id,
                        record: record.clone(),
                    },
                );
                debug!(action_id = %action.id, reason = reason.as_str(), "Unrequested action denied");
                return Ok(record);
            }
        }
        self.expire(action.id, reason).await
    }

    async fn resolve(&self, record: ApprovalRecord) -> Result<ApprovalRecord, ApprovalError> {
        let mut state = self.state.write().await;
        let Some(request) = state.pending.remove(&record.action_id) else {
            return Err(state
                .conflict(&record.action_id)
                .unwrap_or(ApprovalError::NotFound(record.action_id)));
        };
        state.resolved.insert(
            record.action_id,
            ResolvedApproval {
                workflow_id: request.action.workflow_id,
                record: record.clone(),
            },
        );

        info!(
            action_id = %record.action_id,
            decision = ?record.decision,
            decider = %record.decider,
            reason = record.reason.as_str(),
            "Approval resolved"
        );

        // receiver may already be gone if the workflow was torn down
        let _ = request.response_tx.send(record.clone());
        Ok(record)
    }

    /// Denies every pending request of a workflow with reason `Cancelled`.
    pub async fn cancel_workflow(&self, workflow_id: WorkflowId) -> Vec<ApprovalRecord> {
        let ids: Vec<ActionId> = {
            let state = self.state.read().await;
            state
                .pending
                .values()
                .filter(|p| p.action.workflow_id == workflow_id)
                .map(|p| p.action.id)
                .collect()
        };
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(record) = self.expire(id, ResolutionReason::Cancelled).await {
                records.push(record);
            }
        }
        records
    }

    /// Moves a finished workflow's records into the tombstone set. Returns
    /// the number of records released.
    pub async fn release_workflow(&self, workflow_id: WorkflowId) -> usize {
        let mut state = self.state.write().await;
        let ids: Vec<ActionId> = state
            .resolved
            .iter()
            .filter(|(_, r)| r.workflow_id == workflow_id)
            .map(|(id, _)| *id)
            .collect();

        for id in &ids {
            if let Some(resolved) = state.resolved.remove(id) {
                state.tombstones.insert(*id, resolved.record);
                state.tombstone_order.push_back(*id);
            }
        }
        while state.tombstone_order.len() > self.tombstone_capacity {
            if let Some(evicted) = state.tombstone_order.pop_front() {
                state.tombstones.remove(&evicted);
            }
        }

        debug!(workflow_id = %workflow_id, released = ids.len(), "Approval records released");
        ids.len()
    }

    /// Get list of pending requests (for UI display), oldest first
    pub async fn list_pending_requests(&self) -> Vec<PendingApprovalInfo> {
        let state = self.state.read().await;
        let mut pending: Vec<PendingApprovalInfo> = state.pending.values().map(PendingApproval::info).collect();
        pending.sort_by_key(|p| p.requested_at);
        pending
    }

    pub async fn get_pending_request(&self, action_id: ActionId) -> Option<PendingApprovalInfo> {
        let state = self.state.read().await;
        state.pending.get(&action_id).map(PendingApproval::info)
    }

    /// Record of an action whose workflow is still running.
    pub async fn record(&self, action_id: ActionId) -> Option<ApprovalRecord> {
        let state = self.state.read().await;
        state.resolved.get(&action_id).map(|r| r.record.clone())
    }
}

impl Default for ApprovalGateway {
    fn default() -> Self {
        Self::new(ApprovalPolicy::default())
    }
}
