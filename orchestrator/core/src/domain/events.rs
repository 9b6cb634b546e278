// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::workflow::WorkflowId;

/// Orchestration lifecycle events, emitted in state-transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrchestrationEventType {
    PlanCreated,
    ParticipantSelected,
    ParticipantResponded,
    ApprovalRequested,
    ApprovalResolved,
    RoundEvaluated,
    Stalled,
    Replanned,
    Completed,
    Failed,
    Aborted,
}

impl OrchestrationEventType {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestrationEventType::Completed
                | OrchestrationEventType::Failed
                | OrchestrationEventType::Aborted
        )
    }
}

impl std::fmt::Display for OrchestrationEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationEvent {
    pub workflow_id: WorkflowId,
    /// Per-workflow, strictly increasing from 0
    pub sequence: u64,
    /// Index of the round in flight (or about to run) when the event fired
    pub round_index: u32,
    pub event_type: OrchestrationEventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Consumer of orchestration events (event bus, UI stream, log shipper).
///
/// `publish` is synchronous and must not block; the orchestrator calls it
/// inline with state transitions.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &OrchestrationEvent);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn publish(&self, _event: &OrchestrationEvent) {}
}
