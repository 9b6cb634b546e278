// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Progress tracking and stall detection.
//!
//! The tracker decides whether a round moved the task forward. The stall
//! counter is the run of consecutive non-progress rounds at the tail of the
//! history; one Progress round resets it to zero.

use serde::{Deserialize, Serialize};

use crate::domain::participant::ParticipantResponse;
use crate::domain::round::{ProgressVerdict, Round, RoundObservation};
use crate::domain::task::Task;

/// Classifies a new round against the rounds already recorded.
///
/// Implementations return `Progress` or `NoProgress`; the orchestrator
/// assigns `Error` itself when the participant call failed.
pub trait ProgressTracker: Send + Sync {
    fn classify(&self, previous_rounds: &[Round], observation: &RoundObservation) -> ProgressVerdict;
}

/// Progress iff the round proposed an action, signaled completion, or
/// produced non-empty output not seen in any earlier round.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultProgressTracker;

impl ProgressTracker for DefaultProgressTracker {
    fn classify(&self, previous_rounds: &[Round], observation: &RoundObservation) -> ProgressVerdict {
        if observation.proposed_actions > 0 || observation.completion_signaled {
            return ProgressVerdict::Progress;
        }

        let output = match observation.output.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => text,
            _ => return ProgressVerdict::NoProgress,
        };

        let seen_before = previous_rounds
            .iter()
            .filter_map(Round::output_text)
            .any(|previous| previous.trim() == output);

        if seen_before {
            ProgressVerdict::NoProgress
        } else {
            ProgressVerdict::Progress
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StallCounter {
    count: u32,
}

impl StallCounter {
    pub fn observe(&mut self, verdict: ProgressVerdict) -> u32 {
        if verdict.is_progress() {
            self.count = 0;
        } else {
            self.count += 1;
        }
        self.count
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Length of the trailing run of non-progress rounds.
pub fn trailing_non_progress(rounds: &[Round]) -> u32 {
    rounds
        .iter()
        .rev()
        .take_while(|r| !r.verdict.is_progress())
        .count() as u32
}

/// Decides whether a participant response satisfies the task objective.
pub trait CompletionPredicate: Send + Sync {
    fn is_satisfied(&self, task: &Task, response: &ParticipantResponse) -> bool;
}

impl<F> CompletionPredicate for F
where
    F: Fn(&Task, &ParticipantResponse) -> bool + Send + Sync,
{
    fn is_satisfied(&self, task: &Task, response: &ParticipantResponse) -> bool {
        self(task, response)
    }
}

/// Satisfied when the output contains a marker, case-insensitively.
#[derive(Debug, Clone)]
pub struct OutputContains {
    marker: String,
}

impl OutputContains {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into().to_lowercase(),
        }
    }
}

impl CompletionPredicate for OutputContains {
    fn is_satisfied(&self, _task: &Task, response: &ParticipantResponse) -> bool {
        !self.marker.is_empty() && response.output.to_lowercase().contains(&self.marker)
    }
}
