// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Orchestration Service
//!
//! Entry point for callers that manage several workflows at once: start a
//! workflow on a task, query its status, feed it guidance or approval
//! decisions, cancel it and collect its final report.
//!
//! Each workflow runs on its own tokio task. The service only keeps the
//! caller-side handle and a report slot per workflow. Finished workflows are
//! kept for status queries up to a retention limit; [`OrchestrationService::remove_finished`]
//! archives them explicitly.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info};

use crate::application::approval_gateway::{ApprovalError, ApprovalSubmission, PendingApprovalInfo};
use crate::application::orchestrator::{Orchestrator, WorkflowHandle};
use crate::domain::action::ApprovalRecord;
use crate::domain::task::Task;
use crate::domain::workflow::{HumanGuidance, Workflow, WorkflowId, WorkflowSummary};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("workflow not found: {0}")]
    NotFound(WorkflowId),

    #[error("workflow {0} has already finished")]
    AlreadyFinished(WorkflowId),

    #[error("workflow {0} stopped without producing a report")]
    ReportUnavailable(WorkflowId),

    #[error(transparent)]
    Approval(#[from] ApprovalError),
}

struct WorkflowEntry {
    handle: WorkflowHandle,
    report: watch::Receiver<Option<Arc<Workflow>>>,
}

impl WorkflowEntry {
    fn report(&self) -> Option<Arc<Workflow>> {
        self.report.borrow().clone()
    }

    fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.report
            .borrow()
            .as_ref()
            .map(|r| r.finished_at().unwrap_or_else(|| r.created_at()))
    }

    fn summary(&self) -> Option<WorkflowSummary> {
        if let Some(report) = self.report.borrow().as_ref() {
            return Some(report.summary());
        }
        self.handle.status()
    }
}

/// Finished workflows kept before the oldest are dropped on the next start.
pub const DEFAULT_FINISHED_RETENTION: usize = 256;

#[derive(Clone)]
pub struct OrchestrationService {
    orchestrator: Orchestrator,
    workflows: Arc<RwLock<HashMap<WorkflowId, WorkflowEntry>>>,
    finished_retention: usize,
}

impl OrchestrationService {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            workflows: Arc::new(RwLock::new(HashMap::new())),
            finished_retention: DEFAULT_FINISHED_RETENTION,
        }
    }

    pub fn with_finished_retention(mut self, limit: usize) -> Self {
        self.finished_retention = limit;
        self
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Starts a workflow for `task` and returns once it has entered Planning.
    pub async fn start_workflow(&self, task: Task) -> Result<WorkflowId, ServiceError> {
        let (handle, join) = self.orchestrator.spawn(task);
        let workflow_id = handle.workflow_id();

        let (report_tx, report_rx) = watch::channel(None);
        tokio::spawn(async move {
            match join.await {
                Ok(workflow) => {
                    report_tx.send_replace(Some(Arc::new(workflow)));
                }
                Err(e) => error!(workflow_id = %workflow_id, error = %e, "Workflow task terminated abnormally"),
            }
        });

        let mut status = handle.status_receiver();
        if status.wait_for(Option::is_some).await.is_err() {
            return Err(ServiceError::ReportUnavailable(workflow_id));
        }

        let mut workflows = self.workflows.write().await;
        prune_finished(&mut workflows, self.finished_retention);
        workflows.insert(
            workflow_id,
            WorkflowEntry {
                handle,
                report: report_rx,
            },
        );
        info!(workflow_id = %workflow_id, "Workflow registered");
        Ok(workflow_id)
    }

    pub async fn workflow_status(&self, workflow_id: WorkflowId) -> Result<WorkflowSummary, ServiceError> {
        let workflows = self.workflows.read().await;
        workflows
            .get(&workflow_id)
            .and_then(WorkflowEntry::summary)
            .ok_or(ServiceError::NotFound(workflow_id))
    }

    /// Status of every known workflow, oldest first.
    pub async fn list_workflows(&self) -> Vec<WorkflowSummary> {
        let workflows = self.workflows.read().await;
        let mut summaries: Vec<WorkflowSummary> =
            workflows.values().filter_map(WorkflowEntry::summary).collect();
        summaries.sort_by_key(|s| s.created_at);
        summaries
    }

    pub async fn submit_guidance(
        &self,
        workflow_id: WorkflowId,
        guidance: HumanGuidance,
    ) -> Result<(), ServiceError> {
        let workflows = self.workflows.read().await;
        let entry = workflows
            .get(&workflow_id)
            .ok_or(ServiceError::NotFound(workflow_id))?;
        if entry.summary().map(|s| s.state.is_terminal()).unwrap_or(false) {
            return Err(ServiceError::AlreadyFinished(workflow_id));
        }
        if !entry.handle.submit_guidance(guidance) {
            return Err(ServiceError::AlreadyFinished(workflow_id));
        }
        info!(workflow_id = %workflow_id, "Guidance queued");
        Ok(())
    }

    pub async fn cancel_workflow(&self, workflow_id: WorkflowId) -> Result<(), ServiceError> {
        let workflows = self.workflows.read().await;
        let entry = workflows
            .get(&workflow_id)
            .ok_or(ServiceError::NotFound(workflow_id))?;
        if entry.summary().map(|s| s.state.is_terminal()).unwrap_or(false) {
            return Err(ServiceError::AlreadyFinished(workflow_id));
        }
        entry.handle.cancel();
        info!(workflow_id = %workflow_id, "Cancellation requested");
        Ok(())
    }

    /// Human decision on a pending action, routed to the approval gateway.
    pub async fn submit_approval(&self, submission: ApprovalSubmission) -> Result<ApprovalRecord, ServiceError> {
        Ok(self.orchestrator.gateway().submit_decision(submission).await?)
    }

    pub async fn pending_approvals(&self) -> Vec<PendingApprovalInfo> {
        self.orchestrator.gateway().list_pending_requests().await
    }

    /// Removes every finished workflow and returns their reports, oldest first.
    pub async fn remove_finished(&self) -> Vec<Arc<Workflow>> {
        let mut workflows = self.workflows.write().await;
        let finished: Vec<WorkflowId> = workflows
            .iter()
            .filter(|(_, entry)| entry.report.borrow().is_some())
            .map(|(id, _)| *id)
            .collect();
        let mut reports: Vec<Arc<Workflow>> = finished
            .iter()
            .filter_map(|id| workflows.remove(id))
            .filter_map(|entry| entry.report())
            .collect();
        reports.sort_by_key(|r| r.finished_at());
        info!(removed = reports.len(), "Finished workflows archived");
        reports
    }

    /// Waits until the workflow is terminal and returns its full record.
    pub async fn await_report(&self, workflow_id: WorkflowId) -> Result<Arc<Workflow>, ServiceError> {
        let mut report = {
            let workflows = self.workflows.read().await;
            workflows
                .get(&workflow_id)
                .ok_or(ServiceError::NotFound(workflow_id))?
                .report
                .clone()
        };
        let ready = report
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ServiceError::ReportUnavailable(workflow_id))?;
        ready.clone().ok_or(ServiceError::ReportUnavailable(workflow_id))
    }
}

/// Drops the oldest finished entries until at most `limit` remain.
fn prune_finished(workflows: &mut HashMap<WorkflowId, WorkflowEntry>, limit: usize) {
    let mut finished: Vec<(DateTime<Utc>, WorkflowId)> = workflows
        .iter()
        .filter_map(|(id, entry)| entry.finished_at().map(|at| (at, *id)))
        .collect();
    if finished.len() <= limit {
        return;
    }
    finished.sort();
    let excess = finished.len() - limit;
    for (_, id) in finished.into_iter().take(excess) {
        workflows.remove(&id);
        debug!(workflow_id = %id, "Finished workflow dropped from service");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::approval_gateway::ApprovalGateway;
    use crate::application::orchestrator::OrchestratorSettings;
    use crate::domain::action::{ActionProposal, ApprovalDecision, RiskLevel};
    use crate::domain::participant::{
        Participant, ParticipantContext, ParticipantDescriptor, ParticipantError, ParticipantResponse,
        ParticipantRoster,
    };
    use crate::domain::policy::ApprovalPolicy;
    use crate::domain::workflow::{WorkflowLimits, WorkflowState};
    use crate::infrastructure::planners::{PlaybookStep, RuleBasedPlanner};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Containment;

    #[async_trait]
    impl Participant for Containment {
        async fn invoke(
            &self,
            _task: &Task,
            context: &ParticipantContext,
        ) -> Result<ParticipantResponse, ParticipantError> {
            Ok(ParticipantResponse::success(format!("containment round {}", context.round_index))
                .with_action(ActionProposal::new("isolate_host", "WORKSTATION-05", RiskLevel::High, "beaconing")))
        }
    }

    struct Quick;

    #[async_trait]
    impl Participant for Quick {
        async fn invoke(
            &self,
            _task: &Task,
            context: &ParticipantContext,
        ) -> Result<ParticipantResponse, ParticipantError> {
            Ok(ParticipantResponse::success(format!("triaged in round {}", context.round_index)))
        }
    }

    struct Slow;

    #[async_trait]
    impl Participant for Slow {
        async fn invoke(
            &self,
            _task: &Task,
            _context: &ParticipantContext,
        ) -> Result<ParticipantResponse, ParticipantError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ParticipantResponse::success("too late"))
        }
    }

    fn service(name: &str, participant: Arc<dyn Participant>) -> OrchestrationService {
        let roster = ParticipantRoster::new()
            .with(ParticipantDescriptor::new(name, "test participant", participant))
            .unwrap();
        let planner = Arc::new(RuleBasedPlanner::new(vec![PlaybookStep::new(name, "only step")]));
        let settings = OrchestratorSettings {
            limits: WorkflowLimits::new(5, 2, 1).unwrap(),
            approval_timeout: Duration::from_secs(30),
            ..OrchestratorSettings::default()
        };
        let orchestrator = Orchestrator::builder(planner, roster)
            .gateway(ApprovalGateway::new(ApprovalPolicy::require_all()))
            .settings(settings)
            .build();
        OrchestrationService::new(orchestrator)
    }

    #[tokio::test]
    async fn test_approval_through_service() {
        let service = service("containment", Arc::new(Containment));
        let workflow_id = service.start_workflow(Task::new("Contain beaconing host")).await.unwrap();

        let pending = loop {
            let pending = service.pending_approvals().await;
            if !pending.is_empty() {
                break pending;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert_eq!(pending[0].workflow_id, workflow_id);

        let record = service
            .submit_approval(ApprovalSubmission::approve(pending[0].action_id, "analyst@soc"))
            .await
            .unwrap();
        assert_eq!(record.decision, ApprovalDecision::Approved);

        let report = service.await_report(workflow_id).await.unwrap();
        assert_eq!(report.state(), WorkflowState::Completed);
        assert!(report.actions()[0].is_executed());

        let status = service.workflow_status(workflow_id).await.unwrap();
        assert_eq!(status.state, WorkflowState::Completed);
        assert_eq!(service.list_workflows().await.len(), 1);
        assert!(matches!(
            service.submit_guidance(workflow_id, HumanGuidance::new("late", "analyst")).await,
            Err(ServiceError::AlreadyFinished(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_aborts_workflow() {
        let service = service("slow", Arc::new(Slow));
        let workflow_id = service.start_workflow(Task::new("Never finishes")).await.unwrap();

        service.cancel_workflow(workflow_id).await.unwrap();
        let report = service.await_report(workflow_id).await.unwrap();
        assert_eq!(report.state(), WorkflowState::Aborted);
        assert_eq!(report.rounds_completed(), 0);
    }

    #[tokio::test]
    async fn test_unknown_workflow() {
        let service = service("slow", Arc::new(Slow));
        let missing = WorkflowId::new();
        assert!(matches!(service.workflow_status(missing).await, Err(ServiceError::NotFound(_))));
        assert!(matches!(service.cancel_workflow(missing).await, Err(ServiceError::NotFound(_))));
        assert!(matches!(service.await_report(missing).await, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_retention_drops_oldest_finished_workflows() {
        let service = service("triage", Arc::new(Quick)).with_finished_retention(1);
        let first = service.start_workflow(Task::new("Alert 1")).await.unwrap();
        service.await_report(first).await.unwrap();
        let second = service.start_workflow(Task::new("Alert 2")).await.unwrap();
        service.await_report(second).await.unwrap();

        let third = service.start_workflow(Task::new("Alert 3")).await.unwrap();
        assert!(matches!(service.workflow_status(first).await, Err(ServiceError::NotFound(_))));
        assert!(service.workflow_status(second).await.is_ok());
        assert!(service.workflow_status(third).await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_finished_archives_reports() {
        let service = service("triage", Arc::new(Quick));
        let first = service.start_workflow(Task::new("Alert 1")).await.unwrap();
        let second = service.start_workflow(Task::new("Alert 2")).await.unwrap();
        service.await_report(first).await.unwrap();
        service.await_report(second).await.unwrap();

        let archived = service.remove_finished().await;
        assert_eq!(archived.len(), 2);
        assert!(archived.iter().all(|wf| wf.state() == WorkflowState::Completed));
        assert!(service.list_workflows().await.is_empty());
        assert!(matches!(service.await_report(first).await, Err(ServiceError::NotFound(_))));
    }
}
