// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Plan and Planner
//!
//! The planner (the "manager" in magentic orchestration) reads the task, the
//! round history, the roster and any pending human guidance, and returns a
//! plan plus either the next participant or a completion signal. Plans are
//! replaced wholesale; the orchestrator never edits one in place.
//!
//! Planner input and output are plain serializable values so every planning
//! call can be logged and replayed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::domain::participant::RosterEntry;
use crate::domain::round::Round;
use crate::domain::task::Task;
use crate::domain::workflow::{HumanGuidance, WorkflowId};

/// Step target meaning "whichever participant the planner picks next".
pub const ANY_PARTICIPANT: &str = "any";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Roster name or `"any"`
    pub participant: String,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepTarget<'a> {
    Participant(&'a str),
    Any,
}

impl PlanStep {
    pub fn new(participant: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            participant: participant.into(),
            rationale: rationale.into(),
        }
    }

    pub fn target(&self) -> StepTarget<'_> {
        if self.participant.eq_ignore_ascii_case(ANY_PARTICIPANT) {
            StepTarget::Any
        } else {
            StepTarget::Participant(&self.participant)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Set by the workflow when the plan is adopted; starts at 1
    #[serde(default)]
    pub version: u32,
    pub steps: Vec<PlanStep>,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self {
            version: 0,
            steps,
            created_at: Utc::now(),
        }
    }

    /// Plans are compared by their steps only; version and timestamp are
    /// bookkeeping.
    pub fn same_steps(&self, other: &Plan) -> bool {
        self.steps == other.steps
    }

    pub fn rationale_for(&self, participant: &str) -> Option<&str> {
        self.steps
            .iter()
            .find(|s| s.participant == participant)
            .or_else(|| self.steps.iter().find(|s| s.target() == StepTarget::Any))
            .map(|s| s.rationale.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NextStep {
    Participant { name: String },
    Complete { summary: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerDecision {
    pub plan: Plan,
    pub next: NextStep,
    #[serde(default)]
    pub rationale: String,
}

impl PlannerDecision {
    pub fn dispatch(plan: Plan, participant: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            plan,
            next: NextStep::Participant { name: participant.into() },
            rationale: rationale.into(),
        }
    }

    pub fn complete(plan: Plan, summary: impl Into<String>) -> Self {
        let summary = summary.into();
        Self {
            plan,
            rationale: summary.clone(),
            next: NextStep::Complete { summary },
        }
    }
}

/// Everything a planner sees for one planning call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningInput {
    pub workflow_id: WorkflowId,
    pub task: Task,
    pub rounds: Vec<Round>,
    pub roster: Vec<RosterEntry>,
    #[serde(default)]
    pub pending_guidance: Vec<HumanGuidance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_plan: Option<Plan>,
    /// Number of replans so far; also the epoch of the next round
    pub reset_count: u32,
    /// True on the first planning call after a stall intervention
    pub replan_requested: bool,
}

impl PlanningInput {
    pub fn is_known_participant(&self, name: &str) -> bool {
        self.roster.iter().any(|e| e.name == name)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum PlannerError {
    #[error("planner selected unknown participant '{0}'")]
    UnknownParticipant(String),

    #[error("planner output named neither a participant nor completion, or both: {0}")]
    Ambiguous(String),

    #[error("planner output could not be parsed: {0}")]
    MalformedOutput(String),

    #[error("planner call timed out after {0:?}")]
    TimedOut(Duration),

    #[error("planner backend error: {0}")]
    Backend(String),

    #[error("roster is empty")]
    EmptyRoster,
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, input: PlanningInput) -> Result<PlannerDecision, PlannerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_target() {
        assert_eq!(PlanStep::new("any", "").target(), StepTarget::Any);
        assert_eq!(PlanStep::new("ANY", "").target(), StepTarget::Any);
        assert_eq!(PlanStep::new("intel", "").target(), StepTarget::Participant("intel"));
    }

    #[test]
    fn test_rationale_lookup_falls_back_to_any() {
        let plan = Plan::new(vec![
            PlanStep::new("triage", "classify the alert"),
            PlanStep::new("any", "follow the evidence"),
        ]);
        assert_eq!(plan.rationale_for("triage"), Some("classify the alert"));
        assert_eq!(plan.rationale_for("hunter"), Some("follow the evidence"));
    }

    #[test]
    fn test_decision_serializes_for_replay() {
        let decision = PlannerDecision::complete(Plan::new(vec![]), "benign, closing");
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["next"]["type"], "complete");
        let back: PlannerDecision = serde_json::from_value(json).unwrap();
        assert_eq!(back, decision);
    }
}
