// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agentic SOC CLI library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Scenario catalog, embedded runtime and command handlers

pub mod commands;
pub mod embedded;
pub mod scenarios;
