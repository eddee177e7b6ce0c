// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod document_loader;
pub mod process_runner;
pub mod renderer;
pub mod toolchain;

pub use document_loader::{DocumentPaths, LoadError};
pub use process_runner::ProcessRunner;
pub use renderer::{AccessCredentials, ArtifactRenderer, HostWorkdir, RenderError};
pub use toolchain::Toolchain;
