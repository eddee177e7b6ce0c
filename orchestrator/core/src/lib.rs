// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Lib
//!
//! Provisioning orchestrator core: configuration model, artifact rendering
//! and the bounded-concurrency host pipeline.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Wires the domain, infrastructure and application layers

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
