// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Document validation without rendering or running anything.

use anyhow::{bail, Result};
use colored::Colorize;
use std::process::ExitCode;

use provisioner_core::domain::stage::StageKind;

use super::DocumentArgs;

pub fn execute(documents: &DocumentArgs) -> Result<ExitCode> {
    let config = documents.load()?;
    let selection = config.select_hosts(&documents.hosts);

    for name in &selection.unknown {
        println!("{} {} is not declared in vm-specs", "⚠".yellow(), name);
    }
    if selection.hosts.is_empty() {
        bail!("no hosts matched the selection");
    }

    println!("{}", "✓ Documents are valid".green());
    println!();

    let mut incomplete = 0;
    for vm in &selection.hosts {
        let Some(install) = config.install_for(&vm.name) else {
            incomplete += 1;
            println!(
                "  {} {} ({}, {}): {}",
                "✗".red(),
                vm.name.bold(),
                vm.hypervisor,
                vm.boot_method,
                "no install config".red()
            );
            continue;
        };
        let stages: Vec<&str> = StageKind::ALL
            .into_iter()
            .filter(|stage| stage.applies_to(vm))
            .map(|stage| stage.as_str())
            .collect();
        println!(
            "  {} {} ({}, {}, {} {}): {}",
            "✓".green(),
            vm.name.bold(),
            vm.hypervisor,
            vm.boot_method,
            install.os,
            install.version,
            stages.join(" → ")
        );
    }

    if incomplete > 0 {
        println!();
        println!(
            "{}",
            format!("{incomplete} selected host(s) have no install config").red()
        );
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
