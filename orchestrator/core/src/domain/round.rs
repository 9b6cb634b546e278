// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Round
//!
//! One dispatch of the task to one participant. Rounds are appended to the
//! workflow in strictly increasing, contiguous index order and are immutable
//! once recorded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::action::ActionId;
use crate::domain::participant::{ParticipantResponse, ParticipantStatus};

/// Maximum characters of participant output carried in a digest.
const DIGEST_EXCERPT_CHARS: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressVerdict {
    Progress,
    NoProgress,
    Error,
}

impl ProgressVerdict {
    pub fn is_progress(&self) -> bool {
        matches!(self, ProgressVerdict::Progress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressVerdict::Progress => "progress",
            ProgressVerdict::NoProgress => "no_progress",
            ProgressVerdict::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoundOutput {
    Response(ParticipantResponse),
    Failed { error: String },
}

impl RoundOutput {
    /// Text output of a successful response.
    pub fn text(&self) -> Option<&str> {
        match self {
            RoundOutput::Response(response) if response.status == ParticipantStatus::Success => {
                Some(response.output.as_str())
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub index: u32,
    pub participant: String,
    /// Reset count at the time the round ran
    pub epoch: u32,
    pub input_context: serde_json::Value,
    pub output: RoundOutput,
    #[serde(default)]
    pub proposed_actions: Vec<ActionId>,
    pub verdict: ProgressVerdict,
    pub started_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

impl Round {
    pub fn output_text(&self) -> Option<&str> {
        self.output.text()
    }

    pub fn digest(&self) -> RoundDigest {
        let excerpt = match &self.output {
            RoundOutput::Response(response) => truncate(&response.output, DIGEST_EXCERPT_CHARS),
            RoundOutput::Failed { error } => truncate(error, DIGEST_EXCERPT_CHARS),
        };
        RoundDigest {
            index: self.index,
            participant: self.participant.clone(),
            verdict: self.verdict,
            output_excerpt: excerpt,
            proposed_actions: self.proposed_actions.len(),
        }
    }
}

/// What the progress tracker is shown about a round that has not been
/// recorded yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundObservation {
    pub participant: String,
    /// `None` when the participant call failed
    pub output: Option<String>,
    pub proposed_actions: usize,
    pub completion_signaled: bool,
}

/// Compact, serializable summary of a past round passed to participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundDigest {
    pub index: u32,
    pub participant: String,
    pub verdict: ProgressVerdict,
    pub output_excerpt: String,
    pub proposed_actions: usize,
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
