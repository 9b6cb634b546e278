// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Orchestration metrics recorded through the `metrics` facade.
//!
//! Nothing is exported unless the binary installs a recorder (the CLI
//! installs the Prometheus exporter when `observability.metrics.enabled`).

use std::time::Duration;

use ::metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

use crate::domain::round::ProgressVerdict;

pub const WORKFLOWS_STARTED: &str = "soc_workflows_started_total";
pub const WORKFLOWS_FINISHED: &str = "soc_workflows_finished_total";
pub const ROUNDS: &str = "soc_rounds_total";
pub const APPROVALS: &str = "soc_approvals_total";
pub const HUMAN_ESCALATIONS: &str = "soc_human_escalations_total";
pub const STALLS: &str = "soc_stalls_total";
pub const PARTICIPANT_LATENCY: &str = "soc_participant_latency_seconds";

/// Register descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(WORKFLOWS_STARTED, "Workflows started");
    describe_counter!(WORKFLOWS_FINISHED, "Workflows that reached a terminal state, by status");
    describe_counter!(ROUNDS, "Rounds recorded, by progress verdict");
    describe_counter!(APPROVALS, "Approval resolutions, by outcome");
    describe_counter!(HUMAN_ESCALATIONS, "Approval requests escalated after a timeout");
    describe_counter!(STALLS, "Stall interventions");
    describe_histogram!(PARTICIPANT_LATENCY, Unit::Seconds, "Participant invocation latency");
}

pub fn record_workflow_started() {
    counter!(WORKFLOWS_STARTED).increment(1);
}

pub fn record_workflow_finished(status: &'static str) {
    counter!(WORKFLOWS_FINISHED, "status" => status).increment(1);
}

pub fn record_round(verdict: ProgressVerdict) {
    counter!(ROUNDS, "verdict" => verdict.as_str()).increment(1);
}

/// `outcome` is an approval resolution label such as `approved` or `timed_out`.
pub fn record_approval(outcome: &'static str) {
    counter!(APPROVALS, "outcome" => outcome).increment(1);
}

pub fn record_human_escalation() {
    counter!(HUMAN_ESCALATIONS).increment(1);
}

pub fn record_stall() {
    counter!(STALLS).increment(1);
}

pub fn record_participant_latency(participant: &str, elapsed: Duration) {
    histogram!(PARTICIPANT_LATENCY, "participant" => participant.to_string())
        .record(elapsed.as_secs_f64());
}
