// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Orchestrator Application Service
//!
//! Drives one workflow through the magentic orchestration state machine.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Control loop for a single workflow (plan, dispatch, gate, evaluate)
//! - **Dependencies:** Domain (Workflow, Planner, Participant), Approval Gateway,
//!   Infrastructure (audit log, metrics)
//!
//! # Control Loop
//!
//! ```text
//! loop {
//!     match workflow.state {
//!         Planning              => ask planner, adopt plan, pick participant or complete
//!         Dispatching           => invoke participant (timeout, cancellable)
//!         AwaitingApproval      => policy check, wait for decisions, execute approved actions
//!         Evaluating            => classify progress, record round, check budgets and stalls
//!         Stalled               => replan directly or wait for human guidance
//!         AwaitingHumanGuidance => wait the grace window, then replan
//!         terminal              => break
//!     }
//! }
//! ```
//!
//! Rounds are strictly sequential. Every suspension point (planner call,
//! participant call, approval wait, grace window) has its own timeout and
//! observes the workflow's cancellation token.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::approval_gateway::{ApprovalError, ApprovalGateway};
use crate::domain::action::{
    ActionExecutor, ActionId, ApprovalDecision, ApprovalRecord, LoggingActionExecutor,
    ProposedAction, ResolutionReason,
};
use crate::domain::config::OrchestratorConfigManifest;
use crate::domain::events::{EventSink, NullEventSink, OrchestrationEventType};
use crate::domain::participant::{
    ParticipantContext, ParticipantError, ParticipantResponse, ParticipantRoster,
    ParticipantStatus,
};
use crate::domain::plan::{NextStep, Planner, PlannerError, PlanningInput};
use crate::domain::policy::{ApprovalTimeoutBehavior, PolicyVerdict};
use crate::domain::progress::{CompletionPredicate, DefaultProgressTracker, ProgressTracker};
use crate::domain::round::{ProgressVerdict, Round, RoundObservation, RoundOutput};
use crate::domain::task::Task;
use crate::domain::workflow::{
    HumanGuidance, TerminationReason, Workflow, WorkflowError, WorkflowId, WorkflowLimits,
    WorkflowState, WorkflowSummary,
};
use crate::infrastructure::audit_log::{AuditLog, AuditResult, AuditTarget};
use crate::infrastructure::metrics;

const COMPONENT: &str = "orchestrator";

// ============================================================================
// Settings
// ============================================================================

/// Per-workflow settings, fixed when the workflow starts.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub limits: WorkflowLimits,
    pub planner_timeout: Duration,
    pub participant_timeout: Duration,
    pub approval_timeout: Duration,
    pub stall_grace_window: Duration,
    pub approval_timeout_behavior: ApprovalTimeoutBehavior,
    /// Rounds of history included in a participant's context
    pub history_rounds: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            limits: WorkflowLimits::default(),
            planner_timeout: Duration::from_secs(60),
            participant_timeout: Duration::from_secs(120),
            approval_timeout: Duration::from_secs(15 * 60),
            stall_grace_window: Duration::from_secs(30),
            approval_timeout_behavior: ApprovalTimeoutBehavior::Deny,
            history_rounds: 5,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &OrchestratorConfigManifest) -> anyhow::Result<Self> {
        let spec = &config.spec;
        Ok(Self {
            limits: config.workflow_limits()?,
            planner_timeout: spec.timeouts.planner,
            participant_timeout: spec.timeouts.participant,
            approval_timeout: spec.timeouts.approval,
            stall_grace_window: spec.timeouts.stall_grace_window,
            approval_timeout_behavior: spec.approval.timeout_behavior,
            history_rounds: spec.context.history_rounds,
        })
    }
}

// ============================================================================
// Workflow control channel
// ============================================================================

/// Orchestrator side of a running workflow.
pub struct WorkflowControl {
    workflow_id: WorkflowId,
    cancel: CancellationToken,
    guidance_rx: mpsc::UnboundedReceiver<HumanGuidance>,
    status_tx: watch::Sender<Option<WorkflowSummary>>,
}

/// Caller side of a running workflow: cancel it, send guidance, watch status.
#[derive(Clone)]
pub struct WorkflowHandle {
    workflow_id: WorkflowId,
    cancel: CancellationToken,
    guidance_tx: mpsc::UnboundedSender<HumanGuidance>,
    status_rx: watch::Receiver<Option<WorkflowSummary>>,
}

pub fn workflow_channel() -> (WorkflowControl, WorkflowHandle) {
    workflow_channel_with_cancel(CancellationToken::new())
}

pub fn workflow_channel_with_cancel(cancel: CancellationToken) -> (WorkflowControl, WorkflowHandle) {
    let workflow_id = WorkflowId::new();
    let (guidance_tx, guidance_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(None);
    (
        WorkflowControl {
            workflow_id,
            cancel: cancel.clone(),
            guidance_rx,
            status_tx,
        },
        WorkflowHandle {
            workflow_id,
            cancel,
            guidance_tx,
            status_rx,
        },
    )
}

impl WorkflowControl {
    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }
}

impl WorkflowHandle {
    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Queues guidance for the next planning call. Returns `false` once the
    /// workflow has finished.
    pub fn submit_guidance(&self, guidance: HumanGuidance) -> bool {
        self.guidance_tx.send(guidance).is_ok()
    }

    pub fn status(&self) -> Option<WorkflowSummary> {
        self.status_rx.borrow().clone()
    }

    pub fn status_receiver(&self) -> watch::Receiver<Option<WorkflowSummary>> {
        self.status_rx.clone()
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

#[derive(Clone)]
pub struct Orchestrator {
    planner: Arc<dyn Planner>,
    roster: Arc<ParticipantRoster>,
    tracker: Arc<dyn ProgressTracker>,
    gateway: ApprovalGateway,
    executor: Arc<dyn ActionExecutor>,
    event_sink: Arc<dyn EventSink>,
    audit_log: AuditLog,
    completion: Option<Arc<dyn CompletionPredicate>>,
    settings: OrchestratorSettings,
}

pub struct OrchestratorBuilder {
    planner: Arc<dyn Planner>,
    roster: ParticipantRoster,
    tracker: Arc<dyn ProgressTracker>,
    gateway: Option<ApprovalGateway>,
    executor: Arc<dyn ActionExecutor>,
    event_sink: Arc<dyn EventSink>,
    audit_log: AuditLog,
    completion: Option<Arc<dyn CompletionPredicate>>,
    settings: OrchestratorSettings,
}

impl OrchestratorBuilder {
    pub fn tracker(mut self, tracker: Arc<dyn ProgressTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn gateway(mut self, gateway: ApprovalGateway) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn ActionExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn audit_log(mut self, audit_log: AuditLog) -> Self {
        self.audit_log = audit_log;
        self
    }

    pub fn completion_predicate(mut self, predicate: Arc<dyn CompletionPredicate>) -> Self {
        self.completion = Some(predicate);
        self
    }

    pub fn settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Orchestrator {
        Orchestrator {
            planner: self.planner,
            roster: Arc::new(self.roster),
            tracker: self.tracker,
            gateway: self.gateway.unwrap_or_default(),
            executor: self.executor,
            event_sink: self.event_sink,
            audit_log: self.audit_log,
            completion: self.completion,
            settings: self.settings,
        }
    }
}

/// Outcome of waiting at a suspension point.
enum Suspended<T> {
    Completed(T),
    TimedOut,
    Cancelled,
}

async fn suspend<F: Future>(cancel: &CancellationToken, timeout: Duration, fut: F) -> Suspended<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Suspended::Cancelled,
        res = tokio::time::timeout(timeout, fut) => match res {
            Ok(value) => Suspended::Completed(value),
            Err(_) => Suspended::TimedOut,
        },
    }
}

/// Why a step stopped before the workflow reached its next state.
enum Interrupt {
    Cancelled,
    Invariant(WorkflowError),
}

impl From<WorkflowError> for Interrupt {
    fn from(e: WorkflowError) -> Self {
        Interrupt::Invariant(e)
    }
}

enum Terminal {
    Completed(String),
    Failed(TerminationReason),
    Aborted(TerminationReason),
}

struct RoundInFlight {
    index: u32,
    participant: String,
    context: ParticipantContext,
    started_at: DateTime<Utc>,
    response: Option<ParticipantResponse>,
    error: Option<String>,
    action_ids: Vec<ActionId>,
    completion_signaled: bool,
}

/// Mutable state of one workflow run.
struct WorkflowRun {
    wf: Workflow,
    control: WorkflowControl,
    guidance_closed: bool,
    next: Option<(String, Option<String>)>,
    in_flight: Option<RoundInFlight>,
    replan_requested: bool,
}

impl WorkflowRun {
    /// Moves queued guidance onto the workflow and returns what arrived.
    fn drain_guidance(&mut self) -> Vec<HumanGuidance> {
        let mut received = Vec::new();
        loop {
            match self.control.guidance_rx.try_recv() {
                Ok(guidance) => {
                    self.wf.push_guidance(guidance.clone());
                    received.push(guidance);
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.guidance_closed = true;
                    break;
                }
            }
        }
        received
    }
}

type StepResult = Result<(), Interrupt>;

impl Orchestrator {
    pub fn builder(planner: Arc<dyn Planner>, roster: ParticipantRoster) -> OrchestratorBuilder {
        OrchestratorBuilder {
            planner,
            roster,
            tracker: Arc::new(DefaultProgressTracker),
            gateway: None,
            executor: Arc::new(LoggingActionExecutor),
            event_sink: Arc::new(NullEventSink),
            audit_log: AuditLog::new(),
            completion: None,
            settings: OrchestratorSettings::default(),
        }
    }

    pub fn roster(&self) -> &ParticipantRoster {
        &self.roster
    }

    pub fn gateway(&self) -> &ApprovalGateway {
        &self.gateway
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit_log
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Runs a workflow on a new task and returns its handle and join handle.
    pub fn spawn(&self, task: Task) -> (WorkflowHandle, JoinHandle<Workflow>) {
        let (control, handle) = workflow_channel();
        let orchestrator = self.clone();
        let join = tokio::spawn(async move { orchestrator.run(task, control).await });
        (handle, join)
    }

    /// Runs a workflow with no guidance source; stalls replan immediately.
    pub async fn run_to_completion(&self, task: Task, cancel: CancellationToken) -> Workflow {
        let (control, handle) = workflow_channel_with_cancel(cancel);
        drop(handle);
        self.run(task, control).await
    }

    /// Drives the workflow until it reaches a terminal state.
    pub async fn run(&self, task: Task, control: WorkflowControl) -> Workflow {
        let wf = Workflow::with_id(control.workflow_id, task, self.settings.limits);
        let mut run = WorkflowRun {
            wf,
            control,
            guidance_closed: false,
            next: None,
            in_flight: None,
            replan_requested: false,
        };

        info!(
            workflow_id = %run.wf.id(),
            task = %run.wf.task().description(),
            participants = self.roster.len(),
            max_rounds = self.settings.limits.max_round_count(),
            "Workflow started"
        );
        metrics::record_workflow_started();
        self.audit_log.log_system_event(
            run.wf.id(),
            COMPONENT,
            "WorkflowStarted",
            AuditTarget::new("task", run.wf.task().id()),
            AuditResult::Success,
            json!({ "description": run.wf.task().description() }),
        );

        loop {
            let _ = run.control.status_tx.send_replace(Some(run.wf.summary()));

            let state = run.wf.state();
            if state.is_terminal() {
                break;
            }

            let step = if run.control.cancel.is_cancelled() {
                Err(Interrupt::Cancelled)
            } else {
                match state {
                    WorkflowState::Planning => self.planning(&mut run).await,
                    WorkflowState::Dispatching => self.dispatching(&mut run).await,
                    WorkflowState::AwaitingApproval => self.awaiting_approval(&mut run).await,
                    WorkflowState::Evaluating => self.evaluating(&mut run).await,
                    WorkflowState::Stalled => self.stalled(&mut run).await,
                    WorkflowState::AwaitingHumanGuidance => self.awaiting_guidance(&mut run).await,
                    WorkflowState::Completed | WorkflowState::Failed | WorkflowState::Aborted => Ok(()),
                }
            };

            match step {
                Ok(()) => {}
                Err(Interrupt::Cancelled) => {
                    let reason = TerminationReason::Cancelled {
                        state: run.wf.state(),
                        rounds_completed: run.wf.rounds_completed(),
                    };
                    warn!(workflow_id = %run.wf.id(), state = %run.wf.state(), "Workflow cancelled");
                    self.finish(&mut run, Terminal::Aborted(reason)).await;
                }
                Err(Interrupt::Invariant(e)) => {
                    error!(workflow_id = %run.wf.id(), error = %e, "Workflow invariant violated");
                    let reason = TerminationReason::InvariantViolation {
                        message: e.to_string(),
                    };
                    self.finish(&mut run, Terminal::Failed(reason)).await;
                }
            }
        }

        let _ = run.control.status_tx.send_replace(Some(run.wf.summary()));
        run.wf
    }

    // ------------------------------------------------------------------------
    // Planning
    // ------------------------------------------------------------------------

    async fn planning(&self, run: &mut WorkflowRun) -> StepResult {
        self.take_guidance(run);

        let input = PlanningInput {
            workflow_id: run.wf.id(),
            task: run.wf.task().clone(),
            rounds: run.wf.rounds().to_vec(),
            roster: self.roster.entries(),
            pending_guidance: run.wf.pending_guidance().to_vec(),
            current_plan: run.wf.plan().cloned(),
            reset_count: run.wf.reset_count(),
            replan_requested: run.replan_requested,
        };
        debug!(
            workflow_id = %run.wf.id(),
            rounds = input.rounds.len(),
            guidance = input.pending_guidance.len(),
            replan = input.replan_requested,
            "Requesting plan"
        );

        let result = match suspend(
            &run.control.cancel,
            self.settings.planner_timeout,
            self.planner.plan(input),
        )
        .await
        {
            Suspended::Completed(result) => result,
            Suspended::TimedOut => Err(PlannerError::TimedOut(self.settings.planner_timeout)),
            Suspended::Cancelled => return Err(Interrupt::Cancelled),
        };

        let decision = match result {
            Ok(decision) => decision,
            Err(e) => {
                warn!(workflow_id = %run.wf.id(), error = %e, "Planner failed");
                self.finish(run, Terminal::Failed(TerminationReason::Planner { error: e }))
                    .await;
                return Ok(());
            }
        };

        run.wf.consume_pending_guidance();
        run.replan_requested = false;

        let round_index = run.wf.next_round_index();
        if run.wf.replace_plan(decision.plan) {
            let payload = run
                .wf
                .plan()
                .map(|p| json!({ "version": p.version, "steps": p.steps }))
                .unwrap_or_default();
            self.emit(run, OrchestrationEventType::PlanCreated, round_index, payload);
        }

        match decision.next {
            NextStep::Complete { summary } => {
                info!(workflow_id = %run.wf.id(), "Planner signaled completion");
                self.finish(run, Terminal::Completed(summary)).await;
            }
            NextStep::Participant { name } => {
                if !self.roster.contains(&name) {
                    warn!(workflow_id = %run.wf.id(), participant = %name, "Planner selected unknown participant");
                    let error = PlannerError::UnknownParticipant(name);
                    self.finish(run, Terminal::Failed(TerminationReason::Planner { error }))
                        .await;
                    return Ok(());
                }
                if run.wf.round_budget_exhausted() {
                    let max_round_count = self.settings.limits.max_round_count();
                    self.finish(
                        run,
                        Terminal::Aborted(TerminationReason::RoundBudgetExhausted { max_round_count }),
                    )
                    .await;
                    return Ok(());
                }

                let step_rationale = run
                    .wf
                    .plan()
                    .and_then(|p| p.rationale_for(&name))
                    .map(str::to_string);
                let plan_version = run.wf.plan().map(|p| p.version);
                self.emit(
                    run,
                    OrchestrationEventType::ParticipantSelected,
                    round_index,
                    json!({
                        "participant": name,
                        "rationale": decision.rationale,
                        "plan_version": plan_version,
                    }),
                );
                run.next = Some((name, step_rationale));
                run.wf.transition_to(WorkflowState::Dispatching)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Dispatching
    // ------------------------------------------------------------------------

    async fn dispatching(&self, run: &mut WorkflowRun) -> StepResult {
        let (name, step_rationale) = run.next.take().ok_or_else(|| {
            WorkflowError::InvalidTransition {
                from: WorkflowState::Planning,
                to: WorkflowState::Dispatching,
            }
        })?;
        let descriptor = match self.roster.get(&name) {
            Some(d) => d.clone(),
            None => {
                let error = PlannerError::UnknownParticipant(name);
                self.finish(run, Terminal::Failed(TerminationReason::Planner { error }))
                    .await;
                return Ok(());
            }
        };

        let index = run.wf.next_round_index();
        let skip = run.wf.rounds().len().saturating_sub(self.settings.history_rounds);
        let context = ParticipantContext {
            workflow_id: run.wf.id(),
            round_index: index,
            epoch: run.wf.reset_count(),
            plan_step: step_rationale,
            recent_rounds: run.wf.rounds().iter().skip(skip).map(Round::digest).collect(),
            guidance: run
                .wf
                .guidance_history()
                .iter()
                .map(|g| g.text.clone())
                .collect(),
        };
        let task = run.wf.task().clone();
        let started_at = Utc::now();
        let started = Instant::now();

        debug!(workflow_id = %run.wf.id(), round = index, participant = %name, "Dispatching round");
        let result = match suspend(
            &run.control.cancel,
            self.settings.participant_timeout,
            descriptor.handle.invoke(&task, &context),
        )
        .await
        {
            Suspended::Completed(result) => result,
            Suspended::TimedOut => Err(ParticipantError::TimedOut(self.settings.participant_timeout)),
            Suspended::Cancelled => return Err(Interrupt::Cancelled),
        };
        metrics::record_participant_latency(&name, started.elapsed());

        let (response, error) = match result {
            Ok(response) if response.status == ParticipantStatus::Success => (Some(response), None),
            Ok(response) => {
                let error = ParticipantError::Reported(response.output.clone()).to_string();
                (Some(response), Some(error))
            }
            Err(e) => (None, Some(e.to_string())),
        };

        if let Some(error) = &error {
            warn!(workflow_id = %run.wf.id(), round = index, participant = %name, error = %error, "Participant call failed");
        }

        let completion_signaled = match (&response, &error, &self.completion) {
            (Some(response), None, Some(predicate)) => predicate.is_satisfied(&task, response),
            _ => false,
        };

        let proposals = match (&response, &error) {
            (Some(response), None) => response.proposed_actions.clone(),
            (Some(response), Some(_)) if !response.proposed_actions.is_empty() => {
                warn!(
                    workflow_id = %run.wf.id(),
                    dropped = response.proposed_actions.len(),
                    "Ignoring actions proposed alongside a participant error"
                );
                Vec::new()
            }
            _ => Vec::new(),
        };

        let status = if error.is_none() { "success" } else { "error" };
        self.emit(
            run,
            OrchestrationEventType::ParticipantResponded,
            index,
            json!({
                "participant": name,
                "status": status,
                "output": response.as_ref().map(|r| r.output.as_str()),
                "error": error,
                "proposed_actions": proposals.len(),
            }),
        );
        self.audit_log.log_agent_action(
            run.wf.id(),
            &name,
            "RespondedToTask",
            AuditTarget::new("round", index),
            if error.is_none() { AuditResult::Success } else { AuditResult::Failure },
            json!({ "proposed_actions": proposals.len() }),
            error.clone(),
        );

        let mut action_ids = Vec::with_capacity(proposals.len());
        for proposal in proposals {
            let action = ProposedAction::from_proposal(run.wf.id(), index, name.clone(), proposal);
            self.audit_log.log_agent_action(
                run.wf.id(),
                &name,
                "ProposedAction",
                AuditTarget::new(action.kind.as_str(), &action.target),
                AuditResult::Success,
                json!({ "action_id": action.id, "risk": action.risk, "justification": action.justification }),
                None,
            );
            action_ids.push(run.wf.register_action(action)?);
        }

        let has_actions = !action_ids.is_empty();
        run.in_flight = Some(RoundInFlight {
            index,
            participant: name,
            context,
            started_at,
            response,
            error,
            action_ids,
            completion_signaled,
        });

        if has_actions {
            run.wf.transition_to(WorkflowState::AwaitingApproval)?;
        } else {
            run.wf.transition_to(WorkflowState::Evaluating)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Awaiting approval
    // ------------------------------------------------------------------------

    async fn awaiting_approval(&self, run: &mut WorkflowRun) -> StepResult {
        let (index, action_ids) = match &run.in_flight {
            Some(round) => (round.index, round.action_ids.clone()),
            None => (run.wf.next_round_index(), Vec::new()),
        };

        for action_id in action_ids {
            let action = run
                .wf
                .action(action_id)
                .cloned()
                .ok_or(WorkflowError::UnknownAction(action_id))?;

            let record = match self.gateway.evaluate(&action) {
                PolicyVerdict::AutoApprove => self
                    .gateway
                    .auto_approve(&action)
                    .await
                    .map_err(|e| self.gateway_invariant(action_id, e))?,
                PolicyVerdict::RequireApproval => self.request_approval(run, &action, index).await?,
            };

            let state = run.wf.record_approval(record.clone())?;
            self.on_resolved(run, &action, &record, index);

            if state.permits_execution() {
                self.execute(run, &action).await?;
            }
        }

        run.wf.transition_to(WorkflowState::Evaluating)?;
        Ok(())
    }

    async fn request_approval(
        &self,
        run: &mut WorkflowRun,
        action: &ProposedAction,
        round_index: u32,
    ) -> Result<ApprovalRecord, Interrupt> {
        let timeout = self.settings.approval_timeout;
        let mut rx = self
            .gateway
            .open_request(action, timeout)
            .await
            .map_err(|e| self.gateway_invariant(action.id, e))?;
        self.emit(
            run,
            OrchestrationEventType::ApprovalRequested,
            round_index,
            approval_request_payload(action, timeout, false),
        );

        let mut escalated = false;
        loop {
            let waited = suspend(&run.control.cancel, timeout, &mut rx).await;
            match waited {
                Suspended::Completed(Ok(record)) => return Ok(record),
                Suspended::Completed(Err(_)) => {
                    // sender dropped without a decision; the gateway holds the record if any
                    return self
                        .gateway
                        .record(action.id)
                        .await
                        .ok_or(Interrupt::Invariant(WorkflowError::UnknownAction(action.id)));
                }
                Suspended::Cancelled => return Err(Interrupt::Cancelled),
                Suspended::TimedOut => {
                    if self.settings.approval_timeout_behavior == ApprovalTimeoutBehavior::Escalate
                        && !escalated
                    {
                        escalated = true;
                        if self.gateway.mark_escalated(action.id).await.is_ok() {
                            warn!(workflow_id = %run.wf.id(), action_id = %action.id, "Approval timed out, escalating");
                            metrics::record_human_escalation();
                            self.audit_log.log_system_event(
                                run.wf.id(),
                                COMPONENT,
                                "EscalatedToHuman",
                                AuditTarget::new("action", action.id),
                                AuditResult::Success,
                                json!({ "kind": action.kind, "risk": action.risk }),
                            );
                            self.emit(
                                run,
                                OrchestrationEventType::ApprovalRequested,
                                round_index,
                                approval_request_payload(action, timeout, true),
                            );
                            continue;
                        }
                    }
                    return match self.gateway.expire(action.id, ResolutionReason::TimedOut).await {
                        Ok(record) => Ok(record),
                        // a human decided while the timer fired
                        Err(ApprovalError::Conflict { existing }) => Ok(existing),
                        Err(e) => Err(self.gateway_invariant(action.id, e)),
                    };
                }
            }
        }
    }

    fn on_resolved(&self, run: &mut WorkflowRun, action: &ProposedAction, record: &ApprovalRecord, round_index: u32) {
        let outcome = resolution_label(record);
        metrics::record_approval(outcome);
        info!(
            workflow_id = %run.wf.id(),
            action_id = %action.id,
            kind = %action.kind,
            decision = ?record.decision,
            reason = record.reason.as_str(),
            decider = %record.decider,
            "Approval resolved"
        );

        let target = AuditTarget::new("action", action.id);
        let result = match record.decision {
            ApprovalDecision::Approved => AuditResult::Success,
            ApprovalDecision::Denied => AuditResult::Failure,
        };
        let details = json!({ "kind": action.kind, "target": action.target, "reason": record.reason });
        match record.reason {
            ResolutionReason::HumanDecision => {
                let verb = match record.decision {
                    ApprovalDecision::Approved => "ApprovedAction",
                    ApprovalDecision::Denied => "DeniedAction",
                };
                self.audit_log
                    .log_human_action(run.wf.id(), &record.decider, verb, target, result, details);
            }
            _ => {
                self.audit_log
                    .log_system_event(run.wf.id(), COMPONENT, "ResolvedApproval", target, result, details);
            }
        }

        self.emit(
            run,
            OrchestrationEventType::ApprovalResolved,
            round_index,
            json!({
                "action_id": action.id,
                "decision": record.decision,
                "decider": record.decider,
                "reason": record.reason,
                "comment": record.comment,
            }),
        );
    }

    async fn execute(&self, run: &mut WorkflowRun, action: &ProposedAction) -> StepResult {
        let result = match suspend(
            &run.control.cancel,
            self.settings.participant_timeout,
            self.executor.execute(action),
        )
        .await
        {
            Suspended::Completed(Ok(())) => Ok(()),
            Suspended::Completed(Err(e)) => Err(format!("{:#}", e)),
            Suspended::TimedOut => Err("execution timed out".to_string()),
            Suspended::Cancelled => return Err(Interrupt::Cancelled),
        };

        let audit_result = if result.is_ok() { AuditResult::Success } else { AuditResult::Failure };
        if let Err(reason) = &result {
            warn!(workflow_id = %run.wf.id(), action_id = %action.id, error = %reason, "Action execution failed");
        }
        self.audit_log.log_agent_action(
            run.wf.id(),
            &action.proposed_by,
            "ExecutedAction",
            AuditTarget::new(action.kind.as_str(), &action.target),
            audit_result,
            json!({ "action_id": action.id }),
            result.clone().err(),
        );
        run.wf.mark_action_executed(action.id, result)?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Evaluating
    // ------------------------------------------------------------------------

    async fn evaluating(&self, run: &mut WorkflowRun) -> StepResult {
        let round = run.in_flight.take().ok_or(WorkflowError::InvalidTransition {
            from: WorkflowState::Dispatching,
            to: WorkflowState::Evaluating,
        })?;

        let output = match (&round.response, &round.error) {
            (Some(response), None) => Some(response.output.clone()),
            _ => None,
        };

        let verdict = if round.error.is_some() {
            ProgressVerdict::Error
        } else {
            let observation = RoundObservation {
                participant: round.participant.clone(),
                output: output.clone(),
                proposed_actions: round.action_ids.len(),
                completion_signaled: round.completion_signaled,
            };
            let classified = self.tracker.classify(run.wf.rounds(), &observation);
            let repeats_previous = match (output.as_deref(), run.wf.rounds().last().and_then(Round::output_text)) {
                (Some(current), Some(previous)) => current == previous,
                _ => false,
            };
            if repeats_previous {
                ProgressVerdict::NoProgress
            } else {
                classified
            }
        };

        let recorded = Round {
            index: round.index,
            participant: round.participant.clone(),
            epoch: round.context.epoch,
            input_context: round.context.to_value(),
            output: match (round.response, round.error) {
                (Some(response), _) => RoundOutput::Response(response),
                (None, Some(error)) => RoundOutput::Failed { error },
                (None, None) => RoundOutput::Failed { error: "no response".to_string() },
            },
            proposed_actions: round.action_ids,
            verdict,
            started_at: round.started_at,
            recorded_at: Utc::now(),
        };
        let stall_count = run.wf.record_round(recorded)?;
        metrics::record_round(verdict);

        info!(
            workflow_id = %run.wf.id(),
            round = round.index,
            participant = %round.participant,
            verdict = verdict.as_str(),
            stall_count,
            "Round evaluated"
        );
        let reset_count = run.wf.reset_count();
        self.emit(
            run,
            OrchestrationEventType::RoundEvaluated,
            round.index,
            json!({
                "participant": round.participant,
                "verdict": verdict,
                "stall_count": stall_count,
                "reset_count": reset_count,
            }),
        );

        if round.completion_signaled && verdict != ProgressVerdict::Error {
            let summary = output.unwrap_or_default();
            self.finish(run, Terminal::Completed(summary)).await;
        } else if run.wf.round_budget_exhausted() {
            let max_round_count = self.settings.limits.max_round_count();
            self.finish(
                run,
                Terminal::Aborted(TerminationReason::RoundBudgetExhausted { max_round_count }),
            )
            .await;
        } else if run.wf.stall_threshold_reached() {
            run.wf.transition_to(WorkflowState::Stalled)?;
            metrics::record_stall();
            warn!(workflow_id = %run.wf.id(), stall_count, "Workflow stalled");
            let next_index = run.wf.next_round_index();
            let resets_remaining = self.settings.limits.max_reset_count().saturating_sub(reset_count);
            self.emit(
                run,
                OrchestrationEventType::Stalled,
                next_index,
                json!({
                    "stall_count": stall_count,
                    "reset_count": reset_count,
                    "resets_remaining": resets_remaining,
                }),
            );
        } else {
            run.wf.transition_to(WorkflowState::Planning)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Stall intervention
    // ------------------------------------------------------------------------

    async fn stalled(&self, run: &mut WorkflowRun) -> StepResult {
        if run.wf.resets_exhausted() {
            let max_reset_count = self.settings.limits.max_reset_count();
            self.finish(
                run,
                Terminal::Aborted(TerminationReason::ResetBudgetExhausted { max_reset_count }),
            )
            .await;
            return Ok(());
        }

        self.take_guidance(run);
        if !run.wf.pending_guidance().is_empty()
            || run.guidance_closed
            || self.settings.stall_grace_window.is_zero()
        {
            return self.replan(run, WorkflowState::Stalled);
        }

        self.audit_log.log_system_event(
            run.wf.id(),
            COMPONENT,
            "RequestedHumanGuidance",
            AuditTarget::new("workflow", run.wf.id()),
            AuditResult::Success,
            json!({ "grace_window_seconds": self.settings.stall_grace_window.as_secs() }),
        );
        run.wf.transition_to(WorkflowState::AwaitingHumanGuidance)?;
        Ok(())
    }

    async fn awaiting_guidance(&self, run: &mut WorkflowRun) -> StepResult {
        let grace = self.settings.stall_grace_window;
        info!(workflow_id = %run.wf.id(), grace_seconds = grace.as_secs(), "Waiting for human guidance");

        let received = match suspend(&run.control.cancel, grace, run.control.guidance_rx.recv()).await {
            Suspended::Completed(Some(guidance)) => {
                self.audit_guidance(run.wf.id(), &guidance);
                run.wf.push_guidance(guidance);
                true
            }
            Suspended::Completed(None) => {
                run.guidance_closed = true;
                false
            }
            Suspended::TimedOut => false,
            Suspended::Cancelled => return Err(Interrupt::Cancelled),
        };
        self.take_guidance(run);

        if !received {
            info!(workflow_id = %run.wf.id(), "No guidance within grace window, forcing replan");
        }
        self.replan(run, WorkflowState::AwaitingHumanGuidance)
    }

    /// Drains queued guidance into the workflow, auditing each message.
    fn take_guidance(&self, run: &mut WorkflowRun) {
        for guidance in run.drain_guidance() {
            self.audit_guidance(run.wf.id(), &guidance);
        }
    }

    fn audit_guidance(&self, workflow_id: WorkflowId, guidance: &HumanGuidance) {
        self.audit_log.log_human_action(
            workflow_id,
            &guidance.provided_by,
            "ProvidedGuidance",
            AuditTarget::new("workflow", workflow_id),
            AuditResult::Success,
            json!({ "text": guidance.text }),
        );
    }

    fn replan(&self, run: &mut WorkflowRun, from: WorkflowState) -> StepResult {
        let reset_count = run.wf.begin_replan()?;
        run.replan_requested = true;
        let with_guidance = !run.wf.pending_guidance().is_empty();
        let stall_count = run.wf.stall_count();
        let next_index = run.wf.next_round_index();
        info!(workflow_id = %run.wf.id(), reset_count, with_guidance, "Replanning");
        self.emit(
            run,
            OrchestrationEventType::Replanned,
            next_index,
            json!({
                "reset_count": reset_count,
                "stall_count": stall_count,
                "with_guidance": with_guidance,
                "from": from,
            }),
        );
        run.wf.transition_to(WorkflowState::Planning)?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Terminal states
    // ------------------------------------------------------------------------

    async fn finish(&self, run: &mut WorkflowRun, terminal: Terminal) {
        if !matches!(terminal, Terminal::Completed(_)) {
            self.release_pending_approvals(run).await;
        }
        // the aggregate now holds every record of this workflow
        self.gateway.release_workflow(run.wf.id()).await;

        let applied = match &terminal {
            Terminal::Completed(summary) => run.wf.complete(summary.clone()),
            Terminal::Failed(reason) => run.wf.fail(reason.clone()),
            Terminal::Aborted(reason) => run.wf.abort(reason.clone()),
        };
        if let Err(e) = applied {
            error!(workflow_id = %run.wf.id(), error = %e, "Could not apply terminal state");
            let reason = TerminationReason::InvariantViolation { message: e.to_string() };
            if run.wf.fail(reason).is_err() {
                return;
            }
        }

        let (event_type, status) = match run.wf.state() {
            WorkflowState::Completed => (OrchestrationEventType::Completed, "completed"),
            WorkflowState::Failed => (OrchestrationEventType::Failed, "failed"),
            _ => (OrchestrationEventType::Aborted, "aborted"),
        };
        let payload = run
            .wf
            .outcome()
            .and_then(|o| serde_json::to_value(o).ok())
            .unwrap_or_default();
        let next_index = run.wf.next_round_index();
        self.emit(run, event_type, next_index, payload.clone());
        metrics::record_workflow_finished(status);

        let audit_result = if status == "completed" { AuditResult::Success } else { AuditResult::Failure };
        self.audit_log.log_system_event(
            run.wf.id(),
            COMPONENT,
            match status {
                "completed" => "WorkflowCompleted",
                "failed" => "WorkflowFailed",
                _ => "WorkflowAborted",
            },
            AuditTarget::new("workflow", run.wf.id()),
            audit_result,
            payload,
        );
        info!(
            workflow_id = %run.wf.id(),
            status,
            rounds = run.wf.rounds_completed(),
            resets = run.wf.reset_count(),
            "Workflow finished"
        );
    }

    /// Denies every action still pending approval with reason `Cancelled`.
    /// Actions that never reached a request are denied through the gateway
    /// too, so later decisions on them conflict.
    async fn release_pending_approvals(&self, run: &mut WorkflowRun) {
        let mut records = self.gateway.cancel_workflow(run.wf.id()).await;
        let unrequested: Vec<ProposedAction> = run
            .wf
            .pending_actions()
            .into_iter()
            .filter(|a| !records.iter().any(|r| r.action_id == a.id))
            .cloned()
            .collect();
        for action in unrequested {
            match self
                .gateway
                .resolve_unrequested(&action, ResolutionReason::Cancelled)
                .await
            {
                Ok(record) => records.push(record),
                Err(ApprovalError::Conflict { existing }) => records.push(existing),
                Err(e) => {
                    warn!(workflow_id = %run.wf.id(), action_id = %action.id, error = %e, "Could not deny unrequested action");
                }
            }
        }

        let index = run.wf.next_round_index();
        for record in records {
            let Some(action) = run.wf.action(record.action_id).cloned() else {
                continue;
            };
            if run.wf.record_approval(record.clone()).is_ok() {
                self.on_resolved(run, &action, &record, index);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn emit(
        &self,
        run: &mut WorkflowRun,
        event_type: OrchestrationEventType,
        round_index: u32,
        payload: serde_json::Value,
    ) {
        let event = run.wf.record_event(event_type, round_index, payload);
        self.event_sink.publish(&event);
    }

    fn gateway_invariant(&self, action_id: ActionId, e: ApprovalError) -> Interrupt {
        error!(action_id = %action_id, error = %e, "Approval gateway rejected request");
        Interrupt::Invariant(gateway_error(action_id, e))
    }
}

fn gateway_error(action_id: ActionId, e: ApprovalError) -> WorkflowError {
    match e {
        ApprovalError::Conflict { .. } => WorkflowError::DuplicateApproval(action_id),
        ApprovalError::NotFound(_) => WorkflowError::UnknownAction(action_id),
        other => WorkflowError::GatewayRejected {
            action_id,
            reason: other.to_string(),
        },
    }
}

fn approval_request_payload(action: &ProposedAction, timeout: Duration, escalated: bool) -> serde_json::Value {
    json!({
        "action_id": action.id,
        "kind": action.kind,
        "target": action.target,
        "risk": action.risk,
        "justification": action.justification,
        "proposed_by": action.proposed_by,
        "timeout_seconds": timeout.as_secs(),
        "escalated": escalated,
    })
}

fn resolution_label(record: &ApprovalRecord) -> &'static str {
    match (record.reason, record.decision) {
        (ResolutionReason::PolicyAutoApproved, _) => "auto_approved",
        (ResolutionReason::TimedOut, _) => "timed_out",
        (ResolutionReason::Cancelled, _) => "cancelled",
        (ResolutionReason::HumanDecision, ApprovalDecision::Approved) => "approved",
        (ResolutionReason::HumanDecision, ApprovalDecision::Denied) => "denied",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_errors_keep_their_meaning() {
        let id = ActionId::new();
        let existing = ApprovalRecord::auto_approved(id);
        assert_eq!(
            gateway_error(id, ApprovalError::Conflict { existing }),
            WorkflowError::DuplicateApproval(id)
        );
        assert_eq!(gateway_error(id, ApprovalError::NotFound(id)), WorkflowError::UnknownAction(id));

        let pending = gateway_error(id, ApprovalError::AlreadyPending(id));
        assert!(matches!(pending, WorkflowError::GatewayRejected { action_id, .. } if action_id == id));
        assert!(pending.to_string().contains("already awaiting approval"));
        assert!(!pending.to_string().contains("already has an approval record"));
    }
}
