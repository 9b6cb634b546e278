// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod audit_log;
pub mod event_bus;
pub mod metrics;
pub mod planners;
pub mod prompt_template_engine;

pub use audit_log::{AuditEntry, AuditLog, AuditResult, AuditTarget};
pub use event_bus::{EventBus, EventBusError, EventReceiver, WorkflowEventReceiver};
pub use planners::{ModelBackedPlanner, PlannerKind, PlannerModel, PlaybookStep, RuleBasedPlanner};
