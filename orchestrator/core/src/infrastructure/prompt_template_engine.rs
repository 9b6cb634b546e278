// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Prompt Template Engine
//!
//! Renders the manager prompt for the model-backed planner using Handlebars.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Transform a [`PlanningInput`] into the text sent to a planner model
//!
//! # Supported Placeholders
//!
//! - `{{task}}` - Task description
//! - `{{origin}}` - Origin reference (alert id), if any
//! - `{{#each roster}}{{name}}: {{capabilities}}{{/each}}` - Available participants
//! - `{{#each rounds}}...{{/each}}` - Digests of recent rounds
//! - `{{#each guidance}}...{{/each}}` - Pending human guidance
//! - `{{#each current_plan}}...{{/each}}` - Steps of the plan being replaced
//! - `{{reset_count}}`, `{{replan_requested}}`

use anyhow::{Context, Result};
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::participant::RosterEntry;
use crate::domain::plan::{PlanStep, PlanningInput};
use crate::domain::round::RoundDigest;

// ============================================================================
// Template Context
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlannerPromptContext {
    pub task: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,

    pub roster: Vec<RosterEntry>,

    pub rounds: Vec<RoundDigest>,

    pub guidance: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub current_plan: Vec<PlanStep>,

    pub reset_count: u32,

    pub replan_requested: bool,

    /// Additional custom fields
    #[serde(flatten)]
    pub extras: HashMap<String, serde_json::Value>,
}

impl PlannerPromptContext {
    /// Build the context from a planning input, keeping the last
    /// `history_rounds` rounds.
    pub fn from_input(input: &PlanningInput, history_rounds: usize) -> Self {
        let skip = input.rounds.len().saturating_sub(history_rounds);
        Self {
            task: input.task.description().to_string(),
            origin: input
                .task
                .origin()
                .map(|o| format!("{} {}", o.kind, o.reference)),
            roster: input.roster.clone(),
            rounds: input.rounds.iter().skip(skip).map(|r| r.digest()).collect(),
            guidance: input.pending_guidance.iter().map(|g| g.text.clone()).collect(),
            current_plan: input
                .current_plan
                .as_ref()
                .map(|p| p.steps.clone())
                .unwrap_or_default(),
            reset_count: input.reset_count,
            replan_requested: input.replan_requested,
            extras: HashMap::new(),
        }
    }

    pub fn extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }
}

// ============================================================================
// Template Engine
// ============================================================================

pub struct PromptTemplateEngine {
    handlebars: Handlebars<'static>,
}

impl PromptTemplateEngine {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        // prompts are plain text, not HTML
        handlebars.register_escape_fn(handlebars::no_escape);
        Self { handlebars }
    }

    pub fn render(&self, template: &str, context: &PlannerPromptContext) -> Result<String> {
        self.handlebars
            .render_template(template, context)
            .context("Failed to render planner prompt template")
    }

    pub fn render_with_fallback(
        &self,
        template: Option<&str>,
        context: &PlannerPromptContext,
    ) -> Result<String> {
        self.render(template.unwrap_or(Self::default_template()), context)
    }

    /// Manager prompt asking for a single JSON object.
    pub fn default_template() -> &'static str {
        r#"You are the manager of a security operations team. Decide who acts next.

Task: {{task}}
{{#if origin}}Origin: {{origin}}
{{/if}}
Participants:
{{#each roster}}- {{name}}: {{capabilities}}
{{/each}}
{{#if current_plan}}Current plan:
{{#each current_plan}}{{@index}}. {{participant}}: {{rationale}}
{{/each}}{{/if}}
{{#if rounds}}Recent rounds:
{{#each rounds}}[{{index}}] {{participant}} ({{verdict}}): {{output_excerpt}}
{{/each}}{{/if}}
{{#if guidance}}Human guidance:
{{#each guidance}}- {{this}}
{{/each}}{{/if}}
{{#if replan_requested}}The team has stalled (replan {{reset_count}}). Form a new plan that takes a different approach.
{{/if}}
Reply with one JSON object and nothing else:
{"plan": [{"participant": "<name or any>", "rationale": "..."}], "next_participant": "<name>" or null, "complete": false or true, "summary": "...", "rationale": "..."}
Set exactly one of next_participant or complete."#
    }

    pub fn validate_template(&self, template: &str) -> Result<()> {
        handlebars::template::Template::compile(template)
            .map(|_| ())
            .context("Invalid Handlebars template syntax")
    }
}

impl Default for PromptTemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
