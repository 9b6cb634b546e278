// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Model-backed planner.
//!
//! Renders the manager prompt, sends it to a [`PlannerModel`] and parses the
//! JSON reply into a [`PlannerDecision`]. The model is an abstract text
//! completion port; no particular vendor API is assumed.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::plan::{Plan, PlanStep, Planner, PlannerDecision, PlannerError, PlanningInput};
use crate::infrastructure::prompt_template_engine::{PlannerPromptContext, PromptTemplateEngine};

const MAX_LOG_CHARS: usize = 2_000;

/// Text completion backend for the planner.
#[async_trait]
pub trait PlannerModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Deserialize)]
struct ModelReply {
    #[serde(default)]
    plan: Vec<ReplyStep>,
    #[serde(default)]
    next_participant: Option<String>,
    #[serde(default)]
    complete: bool,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    rationale: String,
}

#[derive(Debug, Deserialize)]
struct ReplyStep {
    participant: String,
    #[serde(default)]
    rationale: String,
}

#[derive(Clone)]
pub struct ModelBackedPlanner {
    model: Arc<dyn PlannerModel>,
    engine: Arc<PromptTemplateEngine>,
    template: Option<String>,
    history_rounds: usize,
}

impl ModelBackedPlanner {
    pub fn new(model: Arc<dyn PlannerModel>) -> Self {
        Self {
            model,
            engine: Arc::new(PromptTemplateEngine::new()),
            template: None,
            history_rounds: 10,
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_history_rounds(mut self, rounds: usize) -> Self {
        self.history_rounds = rounds;
        self
    }

    fn render_prompt(&self, input: &PlanningInput) -> Result<String, PlannerError> {
        let context = PlannerPromptContext::from_input(input, self.history_rounds);
        self.engine
            .render_with_fallback(self.template.as_deref(), &context)
            .map_err(|e| PlannerError::Backend(format!("{:#}", e)))
    }

    fn parse_reply(input: &PlanningInput, raw: &str) -> Result<PlannerDecision, PlannerError> {
        let json = extract_json(raw)
            .ok_or_else(|| PlannerError::MalformedOutput("no JSON object in model output".to_string()))?;
        let reply: ModelReply = serde_json::from_str(json)
            .map_err(|e| PlannerError::MalformedOutput(e.to_string()))?;

        let plan = Plan::new(
            reply
                .plan
                .into_iter()
                .map(|s| PlanStep::new(s.participant, s.rationale))
                .collect(),
        );
        let next = reply
            .next_participant
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        match (next, reply.complete) {
            (Some(name), false) => {
                if !input.is_known_participant(&name) {
                    return Err(PlannerError::UnknownParticipant(name));
                }
                Ok(PlannerDecision::dispatch(plan, name, reply.rationale))
            }
            (None, true) => {
                let summary = reply.summary.unwrap_or_else(|| reply.rationale.clone());
                Ok(PlannerDecision::complete(plan, summary))
            }
            (Some(name), true) => Err(PlannerError::Ambiguous(format!(
                "selected '{}' and signaled completion",
                name
            ))),
            (None, false) => Err(PlannerError::Ambiguous(
                "selected no participant and did not signal completion".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Planner for ModelBackedPlanner {
    async fn plan(&self, input: PlanningInput) -> Result<PlannerDecision, PlannerError> {
        if input.roster.is_empty() {
            return Err(PlannerError::EmptyRoster);
        }
        let prompt = self.render_prompt(&input)?;
        info!(
            workflow_id = %input.workflow_id,
            rounds = input.rounds.len(),
            replan = input.replan_requested,
            "planner request prepared"
        );
        debug!(prompt = %truncate_for_log(&prompt), "planner prompt");

        let output = self
            .model
            .complete(&prompt)
            .await
            .map_err(|e| PlannerError::Backend(e.to_string()))?;
        debug!(output = %truncate_for_log(&output), "planner raw model output");

        Self::parse_reply(&input, &output)
    }
}

/// Slice from the first `{` to the last `}`; tolerates markdown fences and
/// chatter around the object.
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

fn truncate_for_log(text: &str) -> String {
    match text.char_indices().nth(MAX_LOG_CHARS) {
        Some((idx, _)) => format!("{}... [truncated]", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::participant::RosterEntry;
    use crate::domain::plan::NextStep;
    use crate::domain::task::Task;
    use crate::domain::workflow::WorkflowId;
    use parking_lot::Mutex;

    struct CannedModel {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedModel {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PlannerModel for CannedModel {
        async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
            self.prompts.lock().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    struct BrokenModel;

    #[async_trait]
    impl PlannerModel for BrokenModel {
        async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            anyhow::bail!("connection refused")
        }
    }

    fn input() -> PlanningInput {
        PlanningInput {
            workflow_id: WorkflowId::new(),
            task: Task::new("Investigate impossible travel for admin@contoso.com"),
            rounds: vec![],
            roster: vec![
                RosterEntry { name: "triage".into(), capabilities: "classifies alerts".into() },
                RosterEntry { name: "intel".into(), capabilities: "enriches IOCs".into() },
            ],
            pending_guidance: vec![],
            current_plan: None,
            reset_count: 0,
            replan_requested: false,
        }
    }

    #[tokio::test]
    async fn test_parses_fenced_dispatch_reply() {
        let model = CannedModel::new(
            "Here you go:\n```json\n{\"plan\": [{\"participant\": \"triage\", \"rationale\": \"classify\"}, {\"participant\": \"any\"}], \"next_participant\": \"triage\", \"complete\": false, \"rationale\": \"start with triage\"}\n```",
        );
        let planner = ModelBackedPlanner::new(model.clone());
        let decision = planner.plan(input()).await.unwrap();

        assert_eq!(decision.next, NextStep::Participant { name: "triage".to_string() });
        assert_eq!(decision.plan.steps.len(), 2);
        assert_eq!(decision.rationale, "start with triage");

        let prompts = model.prompts.lock();
        assert!(prompts[0].contains("admin@contoso.com"));
        assert!(prompts[0].contains("- intel: enriches IOCs"));
    }

    #[tokio::test]
    async fn test_completion_reply() {
        let model = CannedModel::new(r#"{"plan": [], "complete": true, "summary": "False positive: travel via corporate VPN"}"#);
        let decision = ModelBackedPlanner::new(model).plan(input()).await.unwrap();
        assert_eq!(
            decision.next,
            NextStep::Complete { summary: "False positive: travel via corporate VPN".to_string() }
        );
    }

    #[tokio::test]
    async fn test_ambiguous_replies_are_errors() {
        let both = CannedModel::new(r#"{"next_participant": "triage", "complete": true}"#);
        assert!(matches!(
            ModelBackedPlanner::new(both).plan(input()).await,
            Err(PlannerError::Ambiguous(_))
        ));

        let neither = CannedModel::new(r#"{"plan": [], "next_participant": "  "}"#);
        assert!(matches!(
            ModelBackedPlanner::new(neither).plan(input()).await,
            Err(PlannerError::Ambiguous(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_replies() {
        let unknown = CannedModel::new(r#"{"next_participant": "forensics"}"#);
        assert_eq!(
            ModelBackedPlanner::new(unknown).plan(input()).await.unwrap_err(),
            PlannerError::UnknownParticipant("forensics".to_string())
        );

        let prose = CannedModel::new("I think triage should go next.");
        assert!(matches!(
            ModelBackedPlanner::new(prose).plan(input()).await,
            Err(PlannerError::MalformedOutput(_))
        ));

        let bad_json = CannedModel::new(r#"{"next_participant": 42}"#);
        assert!(matches!(
            ModelBackedPlanner::new(bad_json).plan(input()).await,
            Err(PlannerError::MalformedOutput(_))
        ));
    }

    #[tokio::test]
    async fn test_backend_failure() {
        let err = ModelBackedPlanner::new(Arc::new(BrokenModel)).plan(input()).await.unwrap_err();
        assert_eq!(err, PlannerError::Backend("connection refused".to_string()));
    }

    #[tokio::test]
    async fn test_custom_template() {
        let model = CannedModel::new(r#"{"complete": true, "summary": "done"}"#);
        let planner = ModelBackedPlanner::new(model.clone()).with_template("TASK={{task}}");
        planner.plan(input()).await.unwrap();
        assert_eq!(
            model.prompts.lock()[0],
            "TASK=Investigate impossible travel for admin@contoso.com"
        );
    }
}
