// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Provisioning run: settings, credentials, orchestrator, summary.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

use provisioner_core::application::{
    HostOutcome, Orchestrator, PipelineContext, RunOptions, RunReport,
};
use provisioner_core::domain::settings::ProvisionerSettings;
use provisioner_core::domain::stage::StageSet;
use provisioner_core::infrastructure::{AccessCredentials, ProcessRunner, Toolchain};

use super::{DocumentArgs, RunArgs};

pub async fn execute(
    args: RunArgs,
    documents: &DocumentArgs,
    config_override: Option<PathBuf>,
    debug: bool,
) -> Result<ExitCode> {
    let mut settings = ProvisionerSettings::load_or_default(config_override)
        .context("Failed to load orchestrator settings")?;
    if let Some(build_root) = args.build_root {
        settings.build_root = build_root;
    }
    let concurrency = args.concurrency.unwrap_or(settings.concurrency);
    if concurrency == 0 {
        bail!("--concurrency must be at least 1");
    }

    let config = documents.load()?;

    let env = match &args.env_file {
        Some(path) => load_env_file(path)?,
        None => BTreeMap::new(),
    };
    let credentials = AccessCredentials {
        username: args.username,
        ssh_public_key: args.ssh_key.as_deref().map(read_public_key).transpose()?,
        ssh_private_key: args.ssh_key.clone(),
    };

    let stages = if args.targets.is_empty() {
        StageSet::all()
    } else {
        args.targets.into_iter().collect()
    };
    let options = RunOptions {
        stages,
        plan_only: args.plan_only,
    };

    let toolchain = Toolchain::new(settings)
        .with_env(env)
        .with_ssh_private_key(args.ssh_key)
        .with_debug(debug);
    let orchestrator = Orchestrator::new(PipelineContext::new(
        toolchain,
        credentials,
        Arc::new(ProcessRunner::new()),
        options,
    ));

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, no further hosts will be started");
            cancel.cancel();
        }
    });

    let report = orchestrator
        .run(&config, &documents.hosts, concurrency)
        .await
        .context("Provisioning run aborted")?;

    print_summary(&report);
    Ok(if report.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Parse a dotenv file into an explicit map; the process environment is
/// left untouched.
fn load_env_file(path: &Path) -> Result<BTreeMap<String, String>> {
    let entries = dotenvy::from_path_iter(path)
        .with_context(|| format!("Failed to open env file {}", path.display()))?;
    let env = entries
        .collect::<Result<BTreeMap<_, _>, _>>()
        .with_context(|| format!("Failed to parse env file {}", path.display()))?;
    info!(path = %path.display(), variables = env.len(), "Loaded tool credentials");
    Ok(env)
}

fn read_public_key(private_key: &Path) -> Result<String> {
    let public_key = PathBuf::from(format!("{}.pub", private_key.display()));
    let key = std::fs::read_to_string(&public_key)
        .with_context(|| format!("Failed to read public key {}", public_key.display()))?;
    Ok(key.trim().to_string())
}

fn print_summary(report: &RunReport) {
    println!();
    println!("{}", "Summary:".bold());
    for host in &report.hosts {
        let line = host.to_string();
        match host.outcome {
            HostOutcome::Succeeded => println!("{}", line.green()),
            HostOutcome::Failed(_) => println!("{}", line.red()),
            HostOutcome::NotStarted => println!("{}", line.yellow()),
        }
    }
}
