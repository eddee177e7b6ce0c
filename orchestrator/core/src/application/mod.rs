// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod orchestrator;
pub mod pipeline;

// Re-export use cases for convenience
pub use orchestrator::{HostOutcome, HostReport, Orchestrator, OrchestratorError, RunReport};
pub use pipeline::{HostError, HostPipeline, PipelineContext, PipelineState, RunOptions};
