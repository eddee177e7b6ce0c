// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mod
//!
//! Configuration model of the provisioning orchestrator.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Host, install and catalog types; layered merge; validation

pub mod attributes;
pub mod config;
pub mod defaults;
pub mod host;
pub mod install;
pub mod merge;
pub mod settings;
pub mod stage;
