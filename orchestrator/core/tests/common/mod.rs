// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use provisioner_core::application::{Orchestrator, PipelineContext, RunOptions};
use provisioner_core::domain::config::RootConfig;
use provisioner_core::domain::settings::ProvisionerSettings;
use provisioner_core::domain::stage::{CommandRunner, Invocation, StageError};
use provisioner_core::infrastructure::{AccessCredentials, Toolchain};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Stands in for the external tools: records every invocation, tracks how
/// many run at once and fails the ones matching a (host, pattern) rule.
#[derive(Default)]
pub struct RecordingRunner {
    invocations: Mutex<Vec<Invocation>>,
    failures: Mutex<Vec<(String, String)>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    delay: Duration,
}

impl RecordingRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    pub fn fail(&self, host: &str, pattern: &str) {
        self.failures.lock().push((host.to_string(), pattern.to_string()));
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().clone()
    }

    pub fn commands_for(&self, host: &str) -> Vec<String> {
        self.invocations
            .lock()
            .iter()
            .filter(|i| i.host == host)
            .map(Invocation::command_line)
            .collect()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, invocation: &Invocation) -> Result<(), StageError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.invocations.lock().push(invocation.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let command = invocation.command_line();
        let failing = self
            .failures
            .lock()
            .iter()
            .any(|(host, pattern)| host == &invocation.host && command.contains(pattern.as_str()));
        if failing {
            return Err(StageError::NonZeroExit {
                command,
                exit_code: 2,
            });
        }
        Ok(())
    }
}

/// Scratch template root and build root.
pub struct Workspace {
    pub dir: tempfile::TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        for module in ["proxmox_vm", "proxmox_nixos_vm"] {
            let module_dir = dir.path().join("templates/modules").join(module);
            std::fs::create_dir_all(&module_dir).unwrap();
            std::fs::write(module_dir.join("main.tf"), format!("# {module}\n")).unwrap();
        }
        std::fs::write(dir.path().join("templates/variables.tf"), "variable \"vm_name\" {}\n").unwrap();
        Self { dir }
    }

    pub fn build_root(&self) -> PathBuf {
        self.dir.path().join("build")
    }

    pub fn templates(&self) -> PathBuf {
        self.dir.path().join("templates")
    }

    pub fn settings(&self) -> ProvisionerSettings {
        let mut settings = ProvisionerSettings::default();
        settings.build_root = self.build_root();
        settings.terraform.templates = self.templates();
        settings.terraform.retry_backoff = Duration::ZERO;
        settings
    }

    pub fn orchestrator(&self, runner: Arc<RecordingRunner>, options: RunOptions) -> Orchestrator {
        Orchestrator::new(PipelineContext::new(
            Toolchain::new(self.settings()),
            AccessCredentials::default(),
            runner,
            options,
        ))
    }
}

pub fn yaml(s: &str) -> serde_yaml::Value {
    if s.trim().is_empty() {
        return serde_yaml::Value::Null;
    }
    serde_yaml::from_str(s).unwrap()
}

pub fn root_config(defaults: &str, vms: &str, installs: &str) -> RootConfig {
    RootConfig::from_documents(yaml(defaults), yaml(vms), yaml(installs)).unwrap()
}

/// Every file under `dir`, relative path and contents, sorted.
pub fn snapshot(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut files: Vec<(PathBuf, Vec<u8>)> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            (
                e.path().strip_prefix(dir).unwrap().to_path_buf(),
                std::fs::read(e.path()).unwrap(),
            )
        })
        .collect();
    files.sort();
    files
}
