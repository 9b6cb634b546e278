// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Audit Log - append-only compliance trail
//!
//! Records what participants (agents), humans and the orchestrator itself did,
//! with the workflow id as the correlation id. Entries are never mutated or
//! removed. In-memory only; a durable sink can be layered on by reading
//! [`AuditLog::entries`].

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::workflow::WorkflowId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    AgentAction,
    HumanAction,
    SystemEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    Agent,
    User,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Failure,
    PartialSuccess,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditTarget {
    pub entity_type: String,
    pub entity_id: String,
}

impl AuditTarget {
    pub fn new(entity_type: impl Into<String>, entity_id: impl ToString) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_kind: AuditEventKind,
    pub actor: String,
    pub actor_type: ActorType,
    pub action: String,
    pub target: AuditTarget,
    #[serde(default)]
    pub details: serde_json::Value,
    pub result: AuditResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub correlation_id: WorkflowId,
}

#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_agent_action(
        &self,
        correlation_id: WorkflowId,
        agent_name: &str,
        action: &str,
        target: AuditTarget,
        result: AuditResult,
        details: serde_json::Value,
        error_message: Option<String>,
    ) -> AuditEntry {
        self.append(AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_kind: AuditEventKind::AgentAction,
            actor: agent_name.to_string(),
            actor_type: ActorType::Agent,
            action: action.to_string(),
            target,
            details,
            result,
            error_message,
            correlation_id,
        })
    }

    pub fn log_human_action(
        &self,
        correlation_id: WorkflowId,
        user: &str,
        action: &str,
        target: AuditTarget,
        result: AuditResult,
        details: serde_json::Value,
    ) -> AuditEntry {
        self.append(AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_kind: AuditEventKind::HumanAction,
            actor: user.to_string(),
            actor_type: ActorType::User,
            action: action.to_string(),
            target,
            details,
            result,
            error_message: None,
            correlation_id,
        })
    }

    pub fn log_system_event(
        &self,
        correlation_id: WorkflowId,
        component: &str,
        action: &str,
        target: AuditTarget,
        result: AuditResult,
        details: serde_json::Value,
    ) -> AuditEntry {
        self.append(AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_kind: AuditEventKind::SystemEvent,
            actor: component.to_string(),
            actor_type: ActorType::System,
            action: action.to_string(),
            target,
            details,
            result,
            error_message: None,
            correlation_id,
        })
    }

    fn append(&self, entry: AuditEntry) -> AuditEntry {
        info!(
            correlation_id = %entry.correlation_id,
            event_kind = ?entry.event_kind,
            actor = %entry.actor,
            action = %entry.action,
            result = ?entry.result,
            "audit_log_created"
        );
        self.entries.write().push(entry.clone());
        entry
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().clone()
    }

    pub fn entries_for(&self, correlation_id: WorkflowId) -> Vec<AuditEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.correlation_id == correlation_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
