// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Participant
//!
//! A participant is a specialized worker agent (triage, threat intel, hunting,
//! response) the orchestrator can dispatch a round to. Its reasoning is opaque:
//! the orchestrator only sees the [`Participant`] invocation contract and the
//! descriptor in the roster.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Invocation port and the per-workflow participant roster

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::domain::action::ActionProposal;
use crate::domain::round::RoundDigest;
use crate::domain::task::Task;
use crate::domain::workflow::WorkflowId;

// ============================================================================
// Invocation Contract
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantResponse {
    pub output: String,
    #[serde(default)]
    pub proposed_actions: Vec<ActionProposal>,
    pub status: ParticipantStatus,
}

impl ParticipantResponse {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            proposed_actions: Vec::new(),
            status: ParticipantStatus::Success,
        }
    }

    pub fn error(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            proposed_actions: Vec::new(),
            status: ParticipantStatus::Error,
        }
    }

    pub fn with_action(mut self, proposal: ActionProposal) -> Self {
        self.proposed_actions.push(proposal);
        self
    }
}

/// Snapshot handed to a participant for one round. Owned and serializable so
/// the participant never observes orchestrator state mutating underneath it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantContext {
    pub workflow_id: WorkflowId,
    pub round_index: u32,
    /// Replan epoch the round runs in
    pub epoch: u32,
    /// Rationale of the plan step that selected this participant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_step: Option<String>,
    #[serde(default)]
    pub recent_rounds: Vec<RoundDigest>,
    #[serde(default)]
    pub guidance: Vec<String>,
}

impl ParticipantContext {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum ParticipantError {
    #[error("participant call failed: {0}")]
    Failed(String),

    #[error("participant call timed out after {0:?}")]
    TimedOut(Duration),

    #[error("participant reported an error: {0}")]
    Reported(String),
}

#[async_trait]
pub trait Participant: Send + Sync {
    async fn invoke(
        &self,
        task: &Task,
        context: &ParticipantContext,
    ) -> Result<ParticipantResponse, ParticipantError>;
}

// ============================================================================
// Roster
// ============================================================================

#[derive(Clone)]
pub struct ParticipantDescriptor {
    pub name: String,
    pub capabilities: String,
    pub handle: Arc<dyn Participant>,
}

impl ParticipantDescriptor {
    pub fn new(
        name: impl Into<String>,
        capabilities: impl Into<String>,
        handle: Arc<dyn Participant>,
    ) -> Self {
        Self {
            name: name.into(),
            capabilities: capabilities.into(),
            handle,
        }
    }

    pub fn entry(&self) -> RosterEntry {
        RosterEntry {
            name: self.name.clone(),
            capabilities: self.capabilities.clone(),
        }
    }
}

impl std::fmt::Debug for ParticipantDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantDescriptor")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// Serializable view of a roster member, as given to planners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub name: String,
    pub capabilities: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RosterError {
    #[error("participant '{0}' is already registered")]
    Duplicate(String),

    #[error("participant name cannot be empty")]
    EmptyName,

    #[error("'any' is reserved and cannot be used as a participant name")]
    ReservedName,
}

/// Participants available to a workflow, in registration order.
#[derive(Debug, Clone, Default)]
pub struct ParticipantRoster {
    participants: Vec<ParticipantDescriptor>,
}

impl ParticipantRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: ParticipantDescriptor) -> Result<(), RosterError> {
        if descriptor.name.trim().is_empty() {
            return Err(RosterError::EmptyName);
        }
        if descriptor.name.eq_ignore_ascii_case(crate::domain::plan::ANY_PARTICIPANT) {
            return Err(RosterError::ReservedName);
        }
        if self.contains(&descriptor.name) {
            return Err(RosterError::Duplicate(descriptor.name));
        }
        tracing::debug!(participant = %descriptor.name, "Registered participant");
        self.participants.push(descriptor);
        Ok(())
    }

    pub fn with(mut self, descriptor: ParticipantDescriptor) -> Result<Self, RosterError> {
        self.register(descriptor)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&ParticipantDescriptor> {
        self.participants.iter().find(|p| p.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.participants.iter().map(|p| p.name.clone()).collect()
    }

    pub fn entries(&self) -> Vec<RosterEntry> {
        self.participants.iter().map(ParticipantDescriptor::entry).collect()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Participant for Echo {
        async fn invoke(
            &self,
            task: &Task,
            _context: &ParticipantContext,
        ) -> Result<ParticipantResponse, ParticipantError> {
            Ok(ParticipantResponse::success(task.description()))
        }
    }

    fn descriptor(name: &str) -> ParticipantDescriptor {
        ParticipantDescriptor::new(name, "echoes the task", Arc::new(Echo))
    }

    #[test]
    fn test_roster_rejects_duplicates() {
        let mut roster = ParticipantRoster::new();
        roster.register(descriptor("triage")).unwrap();
        roster.register(descriptor("intel")).unwrap();

        let err = roster.register(descriptor("triage")).unwrap_err();
        assert_eq!(err, RosterError::Duplicate("triage".to_string()));
        assert_eq!(roster.names(), vec!["triage", "intel"]);
    }

    #[test]
    fn test_roster_rejects_reserved_and_empty_names() {
        let mut roster = ParticipantRoster::new();
        assert_eq!(roster.register(descriptor("  ")).unwrap_err(), RosterError::EmptyName);
        assert_eq!(roster.register(descriptor("any")).unwrap_err(), RosterError::ReservedName);
        assert!(roster.is_empty());
    }

    #[tokio::test]
    async fn test_invoke_through_roster() {
        let roster = ParticipantRoster::new().with(descriptor("triage")).unwrap();
        let task = Task::new("triage alert 7");
        let context = ParticipantContext {
            workflow_id: WorkflowId::new(),
            round_index: 0,
            epoch: 0,
            plan_step: None,
            recent_rounds: vec![],
            guidance: vec![],
        };

        let response = roster
            .get("triage")
            .unwrap()
            .handle
            .invoke(&task, &context)
            .await
            .unwrap();
        assert_eq!(response.output, "triage alert 7");
        assert_eq!(context.to_value()["round_index"], 0);
    }
}
