// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task
//!
//! The unit of work submitted to the orchestrator. A task is immutable once
//! built: the builder methods consume `self` and there are no setters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What initiated the task, e.g. the alert that triggered an investigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOrigin {
    /// Origin kind ("alert", "incident", "scheduled_hunt", ...)
    pub kind: String,
    /// External reference (alert id, incident id)
    pub reference: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl TaskOrigin {
    pub fn alert(reference: impl Into<String>) -> Self {
        Self {
            kind: "alert".to_string(),
            reference: reference.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    description: String,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    origin: Option<TaskOrigin>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            description: description.into(),
            created_at: Utc::now(),
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: TaskOrigin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn origin(&self) -> Option<&TaskOrigin> {
        self.origin.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_carries_origin() {
        let task = Task::new("Investigate exfiltration alert")
            .with_origin(TaskOrigin::alert("alert-42").with_details(serde_json::json!({"severity": "High"})));

        assert_eq!(task.description(), "Investigate exfiltration alert");
        let origin = task.origin().unwrap();
        assert_eq!(origin.kind, "alert");
        assert_eq!(origin.reference, "alert-42");
        assert_eq!(origin.details["severity"], "High");
    }

    #[test]
    fn test_task_ids_are_unique() {
        assert_ne!(Task::new("a").id(), Task::new("a").id());
    }
}
