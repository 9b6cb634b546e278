// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Embedded orchestration runtime
//!
//! Builds the orchestrator in-process from a configuration manifest and a
//! scenario: playbook planner, scripted roster, approval gateway, event bus
//! and audit trail.

use anyhow::{Context, Result};
use std::sync::Arc;

use agentic_soc_core::{
    application::{ApprovalGateway, OrchestrationService, Orchestrator, OrchestratorSettings},
    domain::{LoggingActionExecutor, OrchestratorConfigManifest, OutputContains},
    infrastructure::{AuditLog, EventBus, RuleBasedPlanner},
};

use crate::scenarios::Scenario;

pub struct EmbeddedRuntime {
    service: OrchestrationService,
    event_bus: EventBus,
    audit_log: AuditLog,
}

impl EmbeddedRuntime {
    pub fn new(config: &OrchestratorConfigManifest, scenario: &Scenario) -> Result<Self> {
        config
            .validate()
            .context("Configuration validation failed")?;

        let settings = OrchestratorSettings::from_config(config)?;
        let roster = scenario
            .roster()
            .context("Failed to build participant roster")?;
        let planner = Arc::new(RuleBasedPlanner::new(scenario.playbook.clone()));
        let event_bus = EventBus::with_default_capacity();
        let audit_log = AuditLog::new();

        let mut builder = Orchestrator::builder(planner, roster)
            .gateway(ApprovalGateway::new(config.spec.approval.policy.clone()))
            .executor(Arc::new(LoggingActionExecutor))
            .event_sink(Arc::new(event_bus.clone()))
            .audit_log(audit_log.clone())
            .settings(settings);
        if let Some(completion) = &config.spec.completion {
            builder = builder.completion_predicate(Arc::new(OutputContains::new(
                completion.output_marker.clone(),
            )));
        }

        Ok(Self {
            service: OrchestrationService::new(builder.build()),
            event_bus,
            audit_log,
        })
    }

    pub fn service(&self) -> &OrchestrationService {
        &self.service
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit_log
    }
}
