// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Orchestration domain model: tasks, participants, plans, rounds, proposed
//! actions, approval policy and the workflow aggregate.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure types and invariants; no I/O beyond the port traits

pub mod action;
pub mod config;
pub mod events;
pub mod participant;
pub mod plan;
pub mod policy;
pub mod progress;
pub mod round;
pub mod task;
pub mod workflow;

pub use action::{
    ActionExecutor, ActionId, ActionKind, ActionProposal, ApprovalDecision, ApprovalRecord,
    ApprovalState, ExecutionState, LoggingActionExecutor, ProposedAction, ResolutionReason,
    RiskLevel,
};
pub use config::OrchestratorConfigManifest;
pub use events::{EventSink, NullEventSink, OrchestrationEvent, OrchestrationEventType};
pub use participant::{
    Participant, ParticipantContext, ParticipantDescriptor, ParticipantError,
    ParticipantResponse, ParticipantRoster, ParticipantStatus, RosterEntry, RosterError,
};
pub use plan::{
    NextStep, Plan, PlanStep, Planner, PlannerDecision, PlannerError, PlanningInput,
    ANY_PARTICIPANT,
};
pub use policy::{ApprovalPolicy, ApprovalTimeoutBehavior, PolicyRule, PolicyVerdict};
pub use progress::{
    CompletionPredicate, DefaultProgressTracker, OutputContains, ProgressTracker, StallCounter,
};
pub use round::{ProgressVerdict, Round, RoundDigest, RoundObservation, RoundOutput};
pub use task::{Task, TaskId, TaskOrigin};
pub use workflow::{
    HumanGuidance, TerminationReason, Workflow, WorkflowError, WorkflowId, WorkflowLimits,
    WorkflowOutcome, WorkflowState, WorkflowSummary,
};
