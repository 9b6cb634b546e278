// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agentic SOC orchestration core
//!
//! Magentic multi-agent orchestration: a planner picks the next participant,
//! the orchestrator dispatches one round at a time, tracks progress, replans
//! on stalls and gates proposed actions behind human approval.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - `domain`: aggregate, value objects and ports
//! - `application`: orchestrator control loop, approval gateway, workflow service
//! - `infrastructure`: planners, event bus, audit log, prompt rendering

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
