// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Curated SOC scenarios for demos and smoke tests.
//!
//! Each scenario bundles an alert-derived task, a playbook for the rule-based
//! planner and a roster of scripted participants that answer with canned
//! findings and containment proposals.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use agentic_soc_core::domain::{
    ActionProposal, Participant, ParticipantContext, ParticipantDescriptor, ParticipantError,
    ParticipantResponse, ParticipantRoster, RiskLevel, RosterError, Task, TaskOrigin,
};
use agentic_soc_core::infrastructure::PlaybookStep;

/// Participant that replays a fixed list of responses, repeating the last one
/// once the script runs out.
pub struct ScriptedParticipant {
    turns: Vec<ParticipantResponse>,
    calls: AtomicUsize,
}

impl ScriptedParticipant {
    pub fn new(turns: Vec<ParticipantResponse>) -> Self {
        Self {
            turns,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Participant for ScriptedParticipant {
    async fn invoke(
        &self,
        _task: &Task,
        context: &ParticipantContext,
    ) -> Result<ParticipantResponse, ParticipantError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(round = context.round_index, turn = n, "Scripted participant invoked");
        match self.turns.get(n).or_else(|| self.turns.last()) {
            Some(turn) => Ok(turn.clone()),
            None => Err(ParticipantError::Failed("empty script".to_string())),
        }
    }
}

pub struct ParticipantScript {
    pub name: &'static str,
    pub capabilities: &'static str,
    pub turns: Vec<ParticipantResponse>,
}

pub struct Scenario {
    pub name: &'static str,
    pub description: &'static str,
    pub techniques: Vec<&'static str>,
    pub task: Task,
    pub playbook: Vec<PlaybookStep>,
    pub participants: Vec<ParticipantScript>,
}

impl Scenario {
    pub fn roster(&self) -> Result<ParticipantRoster, RosterError> {
        let mut roster = ParticipantRoster::new();
        for script in &self.participants {
            roster.register(ParticipantDescriptor::new(
                script.name,
                script.capabilities,
                Arc::new(ScriptedParticipant::new(script.turns.clone())),
            ))?;
        }
        Ok(roster)
    }
}

pub fn scenario_names() -> Vec<&'static str> {
    builtin().iter().map(|s| s.name).collect()
}

pub fn find(name: &str) -> Option<Scenario> {
    builtin().into_iter().find(|s| s.name == name)
}

pub fn builtin() -> Vec<Scenario> {
    vec![
        brute_force(),
        phishing_campaign(),
        ransomware(),
        lateral_movement(),
        stalled_hunt(),
    ]
}

const TRIAGE: &str = "Classifies and prioritizes alerts, correlates related signals";
const INTEL: &str = "Enriches indicators with reputation and campaign context";
const CONTAINMENT: &str = "Proposes containment actions (isolation, blocks, credential resets)";
const FORENSICS: &str = "Reconstructs host timelines and attacker tooling";
const HUNTER: &str = "Searches telemetry for related activity";

fn say(text: &str) -> ParticipantResponse {
    ParticipantResponse::success(text)
}

fn brute_force() -> Scenario {
    Scenario {
        name: "brute_force",
        description: "Brute force attack leading to successful compromise and lateral movement",
        techniques: vec!["T1078", "T1021.002"],
        task: Task::new("Investigate 20 failed logins for 'admin' from 192.168.1.100 followed by a successful login")
            .with_origin(TaskOrigin::alert("brute_force").with_details(json!({
                "source_ip": "192.168.1.100",
                "target_account": "admin",
                "failed_attempts": 20,
                "smb_targets": ["SERVER-01", "SERVER-02", "WORKSTATION-05"],
            }))),
        playbook: vec![
            PlaybookStep::new("triage", "Classify the authentication alerts"),
            PlaybookStep::new("threat_intel", "Check the source address"),
            PlaybookStep::new("containment", "Stop the compromised account"),
        ],
        participants: vec![
            ParticipantScript {
                name: "triage",
                capabilities: TRIAGE,
                turns: vec![say(
                    "High severity: 20 failed logins for admin from 192.168.1.100, then a successful \
                     login (T1078) and SMB sessions to SERVER-01, SERVER-02 and WORKSTATION-05.",
                )],
            },
            ParticipantScript {
                name: "threat_intel",
                capabilities: INTEL,
                turns: vec![say(
                    "192.168.1.100 is internal with no prior alerts; the pattern matches password \
                     guessing followed by valid-account use.",
                )],
            },
            ParticipantScript {
                name: "containment",
                capabilities: CONTAINMENT,
                turns: vec![
                    say("Disable the admin account and block 192.168.1.100 at the internal firewall.")
                        .with_action(ActionProposal::new(
                            "disable_account",
                            "admin",
                            RiskLevel::High,
                            "Account used after brute force success",
                        ))
                        .with_action(ActionProposal::new(
                            "block_ip",
                            "192.168.1.100",
                            RiskLevel::Medium,
                            "Source of the password guessing",
                        )),
                ],
            },
        ],
    }
}

fn phishing_campaign() -> Scenario {
    Scenario {
        name: "phishing_campaign",
        description: "Phishing attack leading to credential theft and data exfiltration",
        techniques: vec!["T1566.002", "T1056.003", "T1567.002"],
        task: Task::new("Respond to phishing from admin@examp1e.com that led to credential theft by user@company.com")
            .with_origin(TaskOrigin::alert("phishing_campaign").with_details(json!({
                "sender": "admin@examp1e.com",
                "recipient": "user@company.com",
                "subject": "Urgent: Password Reset Required",
                "url": "http://malicious-site.com/login",
                "exfiltration_destination": "attacker-server.com",
            }))),
        playbook: vec![
            PlaybookStep::new("triage", "Confirm the phishing chain"),
            PlaybookStep::new("threat_intel", "Profile the lookalike domain"),
            PlaybookStep::new("containment", "Cut off the attacker"),
            PlaybookStep::new("forensics", "Scope the exfiltration"),
        ],
        participants: vec![
            ParticipantScript {
                name: "triage",
                capabilities: TRIAGE,
                turns: vec![say(
                    "Confirmed chain: spoofed sender admin@examp1e.com, click to malicious-site.com, \
                     credentials submitted, large upload to attacker-server.com.",
                )],
            },
            ParticipantScript {
                name: "threat_intel",
                capabilities: INTEL,
                turns: vec![say(
                    "examp1e.com is a typosquat registered 3 days ago; malicious-site.com hosts a \
                     credential harvesting kit.",
                )],
            },
            ParticipantScript {
                name: "containment",
                capabilities: CONTAINMENT,
                turns: vec![
                    say("Block the phishing domain and force a credential reset for the victim.")
                        .with_action(ActionProposal::new(
                            "block_domain",
                            "malicious-site.com",
                            RiskLevel::Low,
                            "Credential harvesting site",
                        ))
                        .with_action(ActionProposal::new(
                            "reset_credentials",
                            "user@company.com",
                            RiskLevel::High,
                            "Credentials submitted to phishing site",
                        )),
                ],
            },
            ParticipantScript {
                name: "forensics",
                capabilities: FORENSICS,
                turns: vec![say(
                    "Upload of 2.3 GB to attacker-server.com used the stolen session; no other \
                     accounts show the same source.",
                )],
            },
        ],
    }
}

fn ransomware() -> Scenario {
    Scenario {
        name: "ransomware",
        description: "Ransomware attack with file encryption and C2 communication",
        techniques: vec!["T1204.002", "T1486", "T1071.001"],
        task: Task::new("Contain ransomware activity on WORKSTATION-10")
            .with_origin(TaskOrigin::alert("ransomware").with_details(json!({
                "device": "WORKSTATION-10",
                "file_name": "invoice.exe",
                "file_extension": ".locked",
            }))),
        playbook: vec![
            PlaybookStep::new("triage", "Assess the blast radius"),
            PlaybookStep::new("containment", "Isolate the host"),
            PlaybookStep::new("forensics", "Identify patient zero"),
        ],
        participants: vec![
            ParticipantScript {
                name: "triage",
                capabilities: TRIAGE,
                turns: vec![say(
                    "Critical: invoice.exe from the Temp directory started mass encryption (.locked) \
                     on WORKSTATION-10 and beacons to a known C2 over HTTPS.",
                )],
            },
            ParticipantScript {
                name: "containment",
                capabilities: CONTAINMENT,
                turns: vec![
                    say("Isolate WORKSTATION-10 from the network immediately.").with_action(
                        ActionProposal::new(
                            "isolate_host",
                            "WORKSTATION-10",
                            RiskLevel::Critical,
                            "Active encryption and C2 traffic",
                        ),
                    ),
                ],
            },
            ParticipantScript {
                name: "forensics",
                capabilities: FORENSICS,
                turns: vec![say(
                    "invoice.exe arrived as an email attachment; no other host executed it.",
                )],
            },
        ],
    }
}

fn lateral_movement() -> Scenario {
    Scenario {
        name: "lateral_movement",
        description: "Encoded PowerShell, credential dumping and SMB movement toward the domain controller",
        techniques: vec!["T1059.001", "T1003.001", "T1021.002"],
        task: Task::new("Investigate credential dumping on WORKSTATION-01 and SMB activity toward DC-01")
            .with_origin(TaskOrigin::alert("lateral_movement").with_details(json!({
                "source_device": "WORKSTATION-01",
                "target_device": "DC-01",
                "target_process": "lsass.exe",
            }))),
        playbook: vec![
            PlaybookStep::new("triage", "Order the alerts into a kill chain"),
            PlaybookStep::new("forensics", "Confirm credential theft"),
            PlaybookStep::new("containment", "Protect the domain controller"),
        ],
        participants: vec![
            ParticipantScript {
                name: "triage",
                capabilities: TRIAGE,
                turns: vec![say(
                    "Kill chain: encoded PowerShell on WORKSTATION-01, LSASS access (T1003.001), \
                     then SMB to DC-01.",
                )],
            },
            ParticipantScript {
                name: "forensics",
                capabilities: FORENSICS,
                turns: vec![say(
                    "LSASS memory was read by a renamed procdump; cached credentials for two \
                     service accounts are exposed.",
                )],
            },
            ParticipantScript {
                name: "containment",
                capabilities: CONTAINMENT,
                turns: vec![
                    say("Isolate WORKSTATION-01 and rotate the exposed service account credentials.")
                        .with_action(ActionProposal::new(
                            "isolate_host",
                            "WORKSTATION-01",
                            RiskLevel::High,
                            "Source of credential dumping",
                        ))
                        .with_action(ActionProposal::new(
                            "reset_credentials",
                            "svc-backup",
                            RiskLevel::High,
                            "Cached credentials dumped from LSASS",
                        )),
                ],
            },
        ],
    }
}

/// The hunter keeps repeating itself, which exercises stall detection and
/// the replan path.
fn stalled_hunt() -> Scenario {
    Scenario {
        name: "stalled_hunt",
        description: "Threat hunt that stops producing new findings and needs a replan",
        techniques: vec!["T1071.004"],
        task: Task::new("Hunt for DNS tunneling from the finance subnet")
            .with_origin(TaskOrigin::alert("dns_anomaly").with_details(json!({
                "subnet": "10.20.0.0/24",
                "signal": "long TXT queries",
            }))),
        playbook: vec![
            PlaybookStep::new("threat_hunter", "Search DNS telemetry").requiring(2),
            PlaybookStep::new("triage", "Summarize the hunt"),
        ],
        participants: vec![
            ParticipantScript {
                name: "threat_hunter",
                capabilities: HUNTER,
                turns: vec![say("No additional indicators found in DNS logs.")],
            },
            ParticipantScript {
                name: "triage",
                capabilities: TRIAGE,
                turns: vec![say(
                    "Hunt inconclusive: long TXT queries trace to a sanctioned backup agent. \
                     Closing as benign.",
                )],
            },
        ],
    }
}
