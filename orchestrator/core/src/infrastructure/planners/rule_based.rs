// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Playbook-driven planner.
//!
//! Walks an ordered playbook of participants. A step is satisfied once its
//! participant has produced the required number of Progress rounds. A step is
//! abandoned when its participant's most recent round made no progress in an
//! earlier replan epoch, so a stall intervention moves the playbook on instead
//! of retrying the same participant forever. Guidance that names a roster
//! participant jumps straight to it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::plan::{Plan, PlanStep, Planner, PlannerDecision, PlannerError, PlanningInput};
use crate::domain::round::Round;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybookStep {
    pub participant: String,
    pub rationale: String,
    #[serde(default = "default_required_progress")]
    pub required_progress: u32,
}

fn default_required_progress() -> u32 {
    1
}

impl PlaybookStep {
    pub fn new(participant: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            participant: participant.into(),
            rationale: rationale.into(),
            required_progress: default_required_progress(),
        }
    }

    pub fn requiring(mut self, progress_rounds: u32) -> Self {
        self.required_progress = progress_rounds.max(1);
        self
    }

    fn satisfied(&self, rounds: &[Round]) -> bool {
        let progress = rounds
            .iter()
            .filter(|r| r.participant == self.participant && r.verdict.is_progress())
            .count() as u32;
        progress >= self.required_progress
    }

    fn abandoned(&self, rounds: &[Round], current_epoch: u32) -> bool {
        rounds
            .iter()
            .rev()
            .find(|r| r.participant == self.participant)
            .map(|r| !r.verdict.is_progress() && r.epoch < current_epoch)
            .unwrap_or(false)
    }

    fn to_plan_step(&self) -> PlanStep {
        PlanStep::new(self.participant.clone(), self.rationale.clone())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleBasedPlanner {
    pub playbook: Vec<PlaybookStep>,
}

impl RuleBasedPlanner {
    pub fn new(playbook: Vec<PlaybookStep>) -> Self {
        Self { playbook }
    }

    /// First roster participant named in the most recent guidance.
    fn guided_participant(input: &PlanningInput) -> Option<String> {
        let latest = input.pending_guidance.last()?;
        let text = latest.text.to_lowercase();
        input
            .roster
            .iter()
            .filter_map(|entry| {
                text.find(&entry.name.to_lowercase())
                    .map(|pos| (pos, entry.name.clone()))
            })
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, name)| name)
    }

    fn completion_summary(input: &PlanningInput) -> String {
        input
            .rounds
            .iter()
            .rev()
            .find(|r| r.verdict.is_progress())
            .and_then(|r| r.output_text())
            .map(|text| text.to_string())
            .unwrap_or_else(|| "Playbook finished".to_string())
    }
}

#[async_trait]
impl Planner for RuleBasedPlanner {
    async fn plan(&self, input: PlanningInput) -> Result<PlannerDecision, PlannerError> {
        if input.roster.is_empty() {
            return Err(PlannerError::EmptyRoster);
        }
        if let Some(unknown) = self
            .playbook
            .iter()
            .find(|s| !input.is_known_participant(&s.participant))
        {
            return Err(PlannerError::UnknownParticipant(unknown.participant.clone()));
        }

        let remaining: Vec<&PlaybookStep> = self
            .playbook
            .iter()
            .filter(|s| !s.satisfied(&input.rounds) && !s.abandoned(&input.rounds, input.reset_count))
            .collect();

        if let Some(name) = Self::guided_participant(&input) {
            debug!(participant = %name, "Guidance selects participant");
            let mut steps = vec![PlanStep::new(name.clone(), "Requested by human guidance")];
            steps.extend(
                remaining
                    .iter()
                    .filter(|s| s.participant != name)
                    .map(|s| s.to_plan_step()),
            );
            return Ok(PlannerDecision::dispatch(
                Plan::new(steps),
                name,
                "Following human guidance",
            ));
        }

        let plan = Plan::new(remaining.iter().map(|s| s.to_plan_step()).collect());
        match remaining.first() {
            Some(step) => Ok(PlannerDecision::dispatch(
                plan,
                step.participant.clone(),
                step.rationale.clone(),
            )),
            None => Ok(PlannerDecision::complete(plan, Self::completion_summary(&input))),
        }
    }
}
