// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Approval policy table.
//!
//! Maps `(action kind, risk level)` to a verdict. Evaluation is pure and
//! deterministic: the most specific matching rule wins, ties go to the rule
//! declared first, and no match falls through to the table default
//! (`RequireApproval` unless configured otherwise).

use serde::{Deserialize, Serialize};

use crate::domain::action::{ActionKind, RiskLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyVerdict {
    AutoApprove,
    RequireApproval,
}

impl Default for PolicyVerdict {
    fn default() -> Self {
        PolicyVerdict::RequireApproval
    }
}

/// What happens when nobody answers an approval request in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalTimeoutBehavior {
    #[default]
    Deny,
    Escalate,
}

impl std::str::FromStr for ApprovalTimeoutBehavior {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deny" => Ok(Self::Deny),
            "escalate" => Ok(Self::Escalate),
            other => Err(format!("unknown approval timeout behavior '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Exact kind, `prefix*`, or `*`
    pub action_kind: String,
    /// `None` matches every risk level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskLevel>,
    pub verdict: PolicyVerdict,
}

impl PolicyRule {
    pub fn new(action_kind: impl Into<String>, risk: Option<RiskLevel>, verdict: PolicyVerdict) -> Self {
        Self {
            action_kind: action_kind.into(),
            risk,
            verdict,
        }
    }

    /// Specificity of this rule against the given action, or `None` when it
    /// does not apply. Higher sorts as more specific.
    fn specificity(&self, kind: &ActionKind, risk: RiskLevel) -> Option<(u8, usize, u8)> {
        if let Some(rule_risk) = self.risk {
            if rule_risk != risk {
                return None;
            }
        }
        let kind_score = kind_specificity(&self.action_kind, kind.as_str())?;
        Some((kind_score.0, kind_score.1, u8::from(self.risk.is_some())))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
    #[serde(default)]
    pub default_verdict: PolicyVerdict,
}

impl ApprovalPolicy {
    pub fn new(rules: Vec<PolicyRule>) -> Self {
        Self {
            rules,
            default_verdict: PolicyVerdict::RequireApproval,
        }
    }

    /// Policy under which every action needs a human.
    pub fn require_all() -> Self {
        Self::default()
    }

    pub fn evaluate(&self, kind: &ActionKind, risk: RiskLevel) -> PolicyVerdict {
        let mut best: Option<((u8, usize, u8), &PolicyRule)> = None;
        for rule in &self.rules {
            if let Some(score) = rule.specificity(kind, risk) {
                // strictly greater keeps the first-declared rule on ties
                if best.map_or(true, |(best_score, _)| score > best_score) {
                    best = Some((score, rule));
                }
            }
        }
        best.map(|(_, rule)| rule.verdict).unwrap_or(self.default_verdict)
    }
}

/// Returns `(tier, prefix_len)`: exact = 2, `prefix*` = 1, `*` = 0.
fn kind_specificity(pattern: &str, value: &str) -> Option<(u8, usize)> {
    if pattern == value {
        return Some((2, pattern.len()));
    }
    if pattern == "*" {
        return Some((0, 0));
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        if value.starts_with(prefix) {
            return Some((1, prefix.len()));
        }
    }
    None
}
