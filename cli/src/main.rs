// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Provisioning CLI
//!
//! The `provision` binary turns three YAML documents (defaults, vm-specs,
//! install-config) into per-host build artifacts and drives the external
//! infra and configuration tools for every selected host.
//!
//! ## Commands
//!
//! - `provision [flags]` - render and provision the selected hosts
//! - `provision validate` - load, merge and validate the documents only
//!
//! ## Exit codes
//!
//! `0` when every selected host completed, `1` when any host failed, the
//! documents are invalid, or no host matched the selection.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;

use commands::{DocumentArgs, RunArgs};

/// Provision virtualized and bare-metal hosts from layered YAML documents
#[derive(Parser)]
#[command(name = "provision")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to orchestrator settings file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "PROVISION_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "PROVISION_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Verbose logs and verbose external tools
    #[arg(long, global = true)]
    debug: bool,

    #[command(flatten)]
    documents: DocumentArgs,

    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the documents and show what each host would run
    #[command(name = "validate")]
    Validate,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { cli.log_level.as_str() };
    if let Err(e) = init_logging(level) {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Some(Commands::Validate) => commands::validate::execute(&cli.documents),
        None => commands::run::execute(cli.run, &cli.documents, cli.config, cli.debug).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
