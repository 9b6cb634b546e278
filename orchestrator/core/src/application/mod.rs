// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod approval_gateway;
pub mod orchestration_service;
pub mod orchestrator;

// Re-export use cases for convenience
pub use approval_gateway::{ApprovalError, ApprovalGateway, ApprovalSubmission, PendingApprovalInfo};
pub use orchestration_service::{OrchestrationService, ServiceError};
pub use orchestrator::{
    workflow_channel, workflow_channel_with_cancel, Orchestrator, OrchestratorBuilder,
    OrchestratorSettings, WorkflowControl, WorkflowHandle,
};
