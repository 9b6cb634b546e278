// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Orchestrator Configuration
//
// Defines the configuration schema for the SOC orchestrator, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Workflow budgets (rounds, stalls, resets)
// - Per-suspension-point timeouts
// - Approval policy table and timeout behavior
// - Observability settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use crate::domain::policy::{ApprovalPolicy, ApprovalTimeoutBehavior};
use crate::domain::workflow::WorkflowLimits;

pub const API_VERSION: &str = "agentic-soc.io/v1";
pub const KIND: &str = "OrchestratorConfig";

/// Top-level Kubernetes-style orchestrator configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfigManifest {
    /// API version (must be "agentic-soc.io/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "OrchestratorConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: OrchestratorConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfigSpec {
    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    #[serde(default)]
    pub approval: ApprovalConfig,

    #[serde(default)]
    pub context: ContextConfig,

    /// Completion predicate applied to every participant response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion: Option<CompletionConfig>,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_round_count")]
    pub max_round_count: u32,

    #[serde(default = "default_max_stall_count")]
    pub max_stall_count: u32,

    #[serde(default = "default_max_reset_count")]
    pub max_reset_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(with = "humantime_serde", default = "default_planner_timeout")]
    pub planner: Duration,

    #[serde(with = "humantime_serde", default = "default_participant_timeout")]
    pub participant: Duration,

    #[serde(with = "humantime_serde", default = "default_approval_timeout")]
    pub approval: Duration,

    /// How long a stalled workflow waits for human guidance before replanning
    #[serde(with = "humantime_serde", default = "default_stall_grace_window")]
    pub stall_grace_window: Duration,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default)]
    pub timeout_behavior: ApprovalTimeoutBehavior,

    #[serde(default)]
    pub policy: ApprovalPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Number of most recent rounds included in a participant's context
    #[serde(default = "default_history_rounds")]
    pub history_rounds: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Workflow completes when a response contains this marker
    pub output_marker: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_max_round_count() -> u32 {
    20
}

fn default_max_stall_count() -> u32 {
    3
}

fn default_max_reset_count() -> u32 {
    2
}

fn default_planner_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_participant_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_approval_timeout() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_stall_grace_window() -> Duration {
    Duration::from_secs(30)
}

fn default_history_rounds() -> usize {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_round_count: default_max_round_count(),
            max_stall_count: default_max_stall_count(),
            max_reset_count: default_max_reset_count(),
        }
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            planner: default_planner_timeout(),
            participant: default_participant_timeout(),
            approval: default_approval_timeout(),
            stall_grace_window: default_stall_grace_window(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            history_rounds: default_history_rounds(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Default for OrchestratorConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "soc-orchestrator".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: OrchestratorConfigSpec::default(),
        }
    }
}

impl OrchestratorConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_yaml_str(&content).with_context(|| format!("Failed to parse config file {:?}", path))
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. SOC_CONFIG_PATH environment variable
    /// 2. ./soc-config.yaml (working directory)
    /// 3. ~/.agentic-soc/config.yaml (user home)
    /// 4. /etc/agentic-soc/config.yaml (system, Unix) or C:\ProgramData\AgenticSoc\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("SOC_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./soc-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".agentic-soc").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/agentic-soc/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\AgenticSoc\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // An explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::debug!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("SOC_MAX_ROUND_COUNT") {
            match val.trim().parse::<u32>() {
                Ok(n) => {
                    tracing::info!("Environment override: SOC_MAX_ROUND_COUNT={}", n);
                    self.spec.limits.max_round_count = n;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for SOC_MAX_ROUND_COUNT: '{}'. Expected a positive integer. Ignoring.",
                        val
                    );
                }
            }
        }

        if let Some(val) = lookup("SOC_APPROVAL_TIMEOUT_BEHAVIOR") {
            match val.parse::<ApprovalTimeoutBehavior>() {
                Ok(behavior) => {
                    tracing::info!("Environment override: SOC_APPROVAL_TIMEOUT_BEHAVIOR={:?}", behavior);
                    self.spec.approval.timeout_behavior = behavior;
                }
                Err(e) => {
                    tracing::warn!("Invalid value for SOC_APPROVAL_TIMEOUT_BEHAVIOR: {}. Ignoring.", e);
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        self.workflow_limits()?;

        let timeouts = &self.spec.timeouts;
        for (name, value) in [
            ("planner", timeouts.planner),
            ("participant", timeouts.participant),
            ("approval", timeouts.approval),
        ] {
            if value.is_zero() {
                anyhow::bail!("spec.timeouts.{} must be greater than zero", name);
            }
        }

        for rule in &self.spec.approval.policy.rules {
            if rule.action_kind.is_empty() {
                anyhow::bail!("spec.approval.policy rule has an empty action_kind");
            }
            let body = rule
                .action_kind
                .strip_suffix('*')
                .unwrap_or(&rule.action_kind);
            if body.contains('*') {
                anyhow::bail!(
                    "spec.approval.policy action_kind '{}' may only use '*' as a trailing wildcard",
                    rule.action_kind
                );
            }
        }

        if let Some(completion) = &self.spec.completion {
            if completion.output_marker.trim().is_empty() {
                anyhow::bail!("spec.completion.output_marker cannot be empty");
            }
        }

        match self.spec.observability.logging.format.as_str() {
            "text" | "json" => {}
            other => anyhow::bail!(
                "Invalid spec.observability.logging.format: '{}'. Must be 'text' or 'json'",
                other
            ),
        }

        Ok(())
    }

    pub fn workflow_limits(&self) -> anyhow::Result<WorkflowLimits> {
        let limits = &self.spec.limits;
        WorkflowLimits::new(
            limits.max_round_count,
            limits.max_stall_count,
            limits.max_reset_count,
        )
        .context("spec.limits")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::action::{ActionKind, RiskLevel};
    use crate::domain::policy::PolicyVerdict;
    use std::io::Write;

    #[test]
    fn test_default_manifest() {
        let manifest = OrchestratorConfigManifest::default();
        assert_eq!(manifest.api_version, "agentic-soc.io/v1");
        assert_eq!(manifest.kind, "OrchestratorConfig");
        assert!(!manifest.metadata.name.is_empty());
        assert_eq!(manifest.spec.limits.max_round_count, 20);
        assert_eq!(manifest.spec.timeouts.approval, Duration::from_secs(900));
        assert_eq!(manifest.spec.approval.timeout_behavior, ApprovalTimeoutBehavior::Deny);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
apiVersion: agentic-soc.io/v1
kind: OrchestratorConfig
metadata:
  name: soc-test
spec:
  limits:
    max_round_count: 8
    max_stall_count: 2
    max_reset_count: 0
  timeouts:
    participant: 45s
    approval: 5m
  approval:
    timeout_behavior: escalate
    policy:
      rules:
        - action_kind: "enrich_*"
          verdict: auto_approve
        - action_kind: disable_account
          risk: high
          verdict: require_approval
  completion:
    output_marker: "INVESTIGATION COMPLETE"
"#;
        let manifest = OrchestratorConfigManifest::from_yaml_str(yaml).unwrap();
        manifest.validate().unwrap();

        assert_eq!(manifest.metadata.name, "soc-test");
        assert_eq!(manifest.spec.limits.max_reset_count, 0);
        assert_eq!(manifest.spec.timeouts.participant, Duration::from_secs(45));
        assert_eq!(manifest.spec.timeouts.approval, Duration::from_secs(300));
        // unspecified timeouts keep their defaults
        assert_eq!(manifest.spec.timeouts.planner, Duration::from_secs(60));
        assert_eq!(manifest.spec.approval.timeout_behavior, ApprovalTimeoutBehavior::Escalate);
        assert_eq!(
            manifest
                .spec
                .approval
                .policy
                .evaluate(&ActionKind::new("enrich_ioc"), RiskLevel::Low),
            PolicyVerdict::AutoApprove
        );
        assert_eq!(manifest.spec.completion.unwrap().output_marker, "INVESTIGATION COMPLETE");
    }

    #[test]
    fn test_validation() {
        let mut manifest = OrchestratorConfigManifest::default();
        assert!(manifest.validate().is_ok());

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        manifest.spec.limits.max_round_count = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.limits.max_round_count = 5;

        manifest.spec.limits.max_stall_count = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.limits.max_stall_count = 1;

        manifest.spec.timeouts.approval = Duration::ZERO;
        assert!(manifest.validate().is_err());
        manifest.spec.timeouts.approval = Duration::from_secs(1);

        manifest.spec.observability.logging.format = "xml".to_string();
        assert!(manifest.validate().is_err());
        manifest.spec.observability.logging.format = "json".to_string();

        manifest.spec.approval.policy.rules.push(crate::domain::policy::PolicyRule::new(
            "dis*able",
            None,
            PolicyVerdict::AutoApprove,
        ));
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut manifest = OrchestratorConfigManifest::default();
        manifest.apply_overrides_from(|key| match key {
            "SOC_MAX_ROUND_COUNT" => Some("7".to_string()),
            "SOC_APPROVAL_TIMEOUT_BEHAVIOR" => Some("escalate".to_string()),
            _ => None,
        });
        assert_eq!(manifest.spec.limits.max_round_count, 7);
        assert_eq!(manifest.spec.approval.timeout_behavior, ApprovalTimeoutBehavior::Escalate);

        manifest.apply_overrides_from(|key| match key {
            "SOC_MAX_ROUND_COUNT" => Some("many".to_string()),
            _ => None,
        });
        assert_eq!(manifest.spec.limits.max_round_count, 7);
    }

    #[test]
    fn test_load_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "apiVersion: agentic-soc.io/v1\nkind: OrchestratorConfig\nmetadata:\n  name: from-file\nspec:\n  limits:\n    max_stall_count: 4"
        )
        .unwrap();

        let manifest = OrchestratorConfigManifest::load_or_default(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(manifest.metadata.name, "from-file");
        assert_eq!(manifest.spec.limits.max_stall_count, 4);
        assert_eq!(manifest.workflow_limits().unwrap().max_stall_count(), 4);

        let missing = OrchestratorConfigManifest::load_or_default(Some(PathBuf::from("/nonexistent/soc.yaml")));
        assert!(missing.is_err());
    }

    #[test]
    fn test_yaml_roundtrip_keeps_durations_readable() {
        let yaml = serde_yaml::to_string(&OrchestratorConfigManifest::default()).unwrap();
        assert!(yaml.contains("stall_grace_window: 30s"));
        let parsed = OrchestratorConfigManifest::from_yaml_str(&yaml).unwrap();
        assert_eq!(parsed.spec.timeouts.stall_grace_window, Duration::from_secs(30));
    }
}
