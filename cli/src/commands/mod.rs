// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! CLI command implementations

pub mod run;
pub mod validate;

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use provisioner_core::domain::config::RootConfig;
use provisioner_core::domain::stage::StageKind;
use provisioner_core::infrastructure::DocumentPaths;

/// Input documents and host selection, shared by every command.
#[derive(Args, Debug, Clone)]
pub struct DocumentArgs {
    /// Defaults document (catalog, vm_defaults, install_defaults)
    #[arg(long, global = true, default_value = "configs/defaults.yaml", value_name = "FILE")]
    pub defaults: PathBuf,

    /// Host hardware/hypervisor document
    #[arg(long, global = true, default_value = "configs/vm_specs.yaml", value_name = "FILE")]
    pub vm_specs: PathBuf,

    /// Per-host OS install document ('-' reads stdin)
    #[arg(
        long,
        global = true,
        default_value = "configs/install_config.yaml",
        value_name = "FILE|-"
    )]
    pub install_config: PathBuf,

    /// Hosts to operate on, comma-separated or repeated (default: all hosts in vm-specs)
    #[arg(long, global = true, value_delimiter = ',', value_name = "NAME")]
    pub hosts: Vec<String>,
}

impl DocumentArgs {
    pub fn load(&self) -> Result<RootConfig> {
        DocumentPaths::new(&self.defaults, &self.vm_specs, &self.install_config)
            .load()
            .context("Failed to load provisioning documents")
    }
}

/// Options of a provisioning run.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Stages to run, comma-separated or repeated; always executed as infra,
    /// pxe, os, post (default: all)
    #[arg(long, value_delimiter = ',', value_name = "STAGE")]
    pub targets: Vec<StageKind>,

    /// Maximum number of hosts provisioned at once
    #[arg(long, env = "PROVISION_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Render and plan infra only; no apply, no configuration runs
    #[arg(long)]
    pub plan_only: bool,

    /// Override the login user for the VM and SSH
    #[arg(long)]
    pub username: Option<String>,

    /// SSH private key; its public half is read from `<FILE>.pub`
    #[arg(long, value_name = "FILE")]
    pub ssh_key: Option<PathBuf>,

    /// Dotenv file with tool credentials passed to every external command
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    /// Root directory for per-host working directories
    #[arg(long, value_name = "DIR")]
    pub build_root: Option<PathBuf>,
}
