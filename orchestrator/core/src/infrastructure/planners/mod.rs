// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Planner implementations.
//!
//! [`PlannerKind`] is the tagged variant callers pick from; both arms speak
//! the same [`Planner`] contract so the orchestrator never knows which one it
//! is driving.

pub mod model_backed;
pub mod rule_based;

use async_trait::async_trait;

use crate::domain::plan::{Planner, PlannerDecision, PlannerError, PlanningInput};

pub use model_backed::{ModelBackedPlanner, PlannerModel};
pub use rule_based::{PlaybookStep, RuleBasedPlanner};

#[derive(Clone)]
pub enum PlannerKind {
    RuleBased(RuleBasedPlanner),
    ModelBacked(ModelBackedPlanner),
}

impl PlannerKind {
    pub fn name(&self) -> &'static str {
        match self {
            PlannerKind::RuleBased(_) => "rule_based",
            PlannerKind::ModelBacked(_) => "model_backed",
        }
    }
}

#[async_trait]
impl Planner for PlannerKind {
    async fn plan(&self, input: PlanningInput) -> Result<PlannerDecision, PlannerError> {
        match self {
            PlannerKind::RuleBased(planner) => planner.plan(input).await,
            PlannerKind::ModelBacked(planner) => planner.plan(input).await,
        }
    }
}

impl From<RuleBasedPlanner> for PlannerKind {
    fn from(planner: RuleBasedPlanner) -> Self {
        PlannerKind::RuleBased(planner)
    }
}

impl From<ModelBackedPlanner> for PlannerKind {
    fn from(planner: ModelBackedPlanner) -> Self {
        PlannerKind::ModelBacked(planner)
    }
}
