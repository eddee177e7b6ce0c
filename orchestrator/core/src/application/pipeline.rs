// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Host Pipeline
//!
//! Drives one host through its selected stages:
//!
//! ```text
//! Pending ─▶ Rendering ─▶ [Infra] ─▶ [Pxe] ─▶ [Os] ─▶ [Post] ─▶ Done
//!    │           │           │         │        │        │
//!    └───────────┴───────────┴─────────┴────────┴────────┴────▶ Failed
//! ```
//!
//! Only selected stages run and always in the order above. The first failing
//! stage ends the pipeline for this host; sibling hosts are unaffected since
//! every error is returned as a value, never propagated past this boundary.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::domain::defaults::Defaults;
use crate::domain::host::VMSpec;
use crate::domain::install::{OSInstallConfig, OsFamily};
use crate::domain::stage::{CommandRunner, Invocation, StageError, StageKind, StageSet};
use crate::infrastructure::renderer::{
    AccessCredentials, ArtifactRenderer, HostWorkdir, RenderError, RenderedArtifacts,
};
use crate::infrastructure::toolchain::{self, Toolchain};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("no install config declared for host '{host}'")]
    IncompleteHost { host: String },

    #[error("rendering failed: {0}")]
    Render(#[from] RenderError),

    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: StageKind,
        #[source]
        source: StageError,
    },
}

impl HostError {
    /// Error class shown in the run summary.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::IncompleteHost { .. } => "IncompleteHostError",
            Self::Render(_) => "RenderError",
            Self::Stage { .. } => "StageError",
        }
    }

    pub fn stage(&self) -> Option<StageKind> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Where a host currently is in its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Pending,
    Rendering,
    Stage(StageKind),
    Done,
    Failed,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Rendering => f.write_str("rendering"),
            Self::Stage(kind) => write!(f, "{kind}"),
            Self::Done => f.write_str("done"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// What to run for every host of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub stages: StageSet,
    /// Render and plan infra without applying; configuration stages are skipped
    pub plan_only: bool,
}

/// Collaborators shared by every Host Pipeline of a run.
pub struct PipelineContext {
    renderer: ArtifactRenderer,
    toolchain: Toolchain,
    runner: Arc<dyn CommandRunner>,
    build_root: PathBuf,
    options: RunOptions,
}

impl PipelineContext {
    pub fn new(
        toolchain: Toolchain,
        credentials: AccessCredentials,
        runner: Arc<dyn CommandRunner>,
        options: RunOptions,
    ) -> Self {
        let settings = toolchain.settings();
        Self {
            renderer: ArtifactRenderer::new(settings.terraform.templates.clone(), credentials),
            build_root: settings.build_root.clone(),
            toolchain,
            runner,
            options,
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn workdir(&self, host: &str) -> HostWorkdir {
        HostWorkdir::new(&self.build_root, host)
    }
}

pub struct HostPipeline<'a> {
    ctx: &'a PipelineContext,
    vm: &'a VMSpec,
    install: Option<&'a OSInstallConfig>,
    defaults: &'a Defaults,
    workdir: HostWorkdir,
}

impl<'a> HostPipeline<'a> {
    pub fn new(
        ctx: &'a PipelineContext,
        vm: &'a VMSpec,
        install: Option<&'a OSInstallConfig>,
        defaults: &'a Defaults,
    ) -> Self {
        Self {
            workdir: ctx.workdir(&vm.name),
            ctx,
            vm,
            install,
            defaults,
        }
    }

    pub fn host(&self) -> &str {
        &self.vm.name
    }

    /// `Pending → Rendering` guard: a host without an install config fails
    /// here, before it takes a concurrency slot or touches the filesystem.
    pub fn preflight(&self) -> Result<&'a OSInstallConfig, HostError> {
        self.install.ok_or_else(|| HostError::IncompleteHost {
            host: self.vm.name.clone(),
        })
    }

    /// Run the pipeline to `Done` or `Failed`.
    pub async fn run(&self) -> Result<(), HostError> {
        let result = self.run_stages().await;
        match &result {
            Ok(()) => self.transition(PipelineState::Done),
            Err(e) => {
                error!(host = %self.vm.name, stage = ?e.stage().map(|s| s.as_str()), error = %e, "Host failed");
                self.transition(PipelineState::Failed)
            }
        }
        result
    }

    async fn run_stages(&self) -> Result<(), HostError> {
        let install = self.preflight()?;

        self.transition(PipelineState::Rendering);
        let artifacts = self
            .ctx
            .renderer
            .render(self.vm, install, self.defaults, &self.workdir)?;

        for stage in self.ctx.options.stages.iter() {
            if self.ctx.options.plan_only && stage != StageKind::Infra {
                debug!(host = %self.vm.name, stage = %stage, "Skipping stage in plan-only mode");
                continue;
            }
            if !stage.applies_to(self.vm) {
                info!(host = %self.vm.name, stage = %stage, "Stage not applicable to host, skipping");
                continue;
            }
            self.transition(PipelineState::Stage(stage));
            self.run_stage(stage, install, &artifacts)
                .await
                .map_err(|source| HostError::Stage { stage, source })?;
        }
        Ok(())
    }

    async fn run_stage(
        &self,
        stage: StageKind,
        install: &OSInstallConfig,
        artifacts: &RenderedArtifacts,
    ) -> Result<(), StageError> {
        let host = self.vm.name.as_str();
        let tools = &self.ctx.toolchain;
        match stage {
            StageKind::Infra => match &artifacts.infra_dir {
                Some(dir) => self.run_infra(dir).await,
                None => Ok(()),
            },
            StageKind::Pxe => {
                self.exec(tools.playbook(host, &self.workdir, toolchain::PXE_PLAYBOOK))
                    .await
            }
            StageKind::Os => self.run_os(install).await,
            StageKind::Post => {
                self.exec(tools.playbook(host, &self.workdir, toolchain::POST_PLAYBOOK))
                    .await
            }
        }
    }

    async fn run_infra(&self, dir: &std::path::Path) -> Result<(), StageError> {
        let host = self.vm.name.as_str();
        let tools = &self.ctx.toolchain;

        self.exec(tools.terraform_init(host, dir)).await?;
        self.exec(tools.terraform_validate(host, dir)).await?;

        if self.ctx.options.plan_only {
            return self.exec(tools.terraform_plan(host, dir)).await;
        }

        let retry = &tools.settings().terraform;
        let mut attempt = 1;
        loop {
            let outcome = match self.exec(tools.terraform_plan(host, dir)).await {
                Ok(()) => self.exec(tools.terraform_apply(host, dir)).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= retry.retries => return Err(e),
                Err(e) => {
                    let wait = retry.retry_backoff * attempt;
                    warn!(
                        host,
                        attempt,
                        max_attempts = retry.retries,
                        error = %e,
                        "Infra apply failed, destroying partial resources before retrying in {:?}",
                        wait
                    );
                    if let Err(destroy) = self.exec(tools.terraform_destroy(host, dir)).await {
                        warn!(host, error = %destroy, "Cleanup destroy failed");
                    }
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn run_os(&self, install: &OSInstallConfig) -> Result<(), StageError> {
        let host = self.vm.name.as_str();
        let tools = &self.ctx.toolchain;
        let playbook = tools.playbook(host, &self.workdir, toolchain::os_playbook(install.os));

        let deploy_target = match install.os {
            OsFamily::NixOs if tools.settings().nixos_anywhere.enabled => install.network.address(),
            _ => None,
        };
        if let Some(address) = deploy_target {
            match self.exec(tools.nixos_anywhere(host, address)).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(host, error = %e, "Declarative deploy failed, falling back to install playbook")
                }
            }
        }
        self.exec(playbook).await
    }

    async fn exec(&self, invocation: Invocation) -> Result<(), StageError> {
        self.ctx.runner.run(&invocation).await
    }

    fn transition(&self, state: PipelineState) {
        info!(host = %self.vm.name, state = %state, "Host pipeline transition");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    use crate::domain::config::RootConfig;
    use crate::domain::settings::ProvisionerSettings;

    /// Records every invocation; fails those whose command line contains `fail_on`
    /// for the first `failures` matches.
    struct ScriptedRunner {
        calls: Mutex<Vec<String>>,
        fail_on: &'static str,
        failures: Mutex<u32>,
    }

    impl ScriptedRunner {
        fn new(fail_on: &'static str, failures: u32) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail_on,
                failures: Mutex::new(failures),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, invocation: &Invocation) -> Result<(), StageError> {
            let line = invocation.command_line();
            self.calls.lock().push(line.clone());
            let mut remaining = self.failures.lock();
            if !self.fail_on.is_empty() && line.contains(self.fail_on) && *remaining > 0 {
                *remaining -= 1;
                return Err(StageError::NonZeroExit {
                    command: line,
                    exit_code: 1,
                });
            }
            Ok(())
        }
    }

    fn fixture(templates: &std::path::Path, build: &std::path::Path, deploy: bool) -> ProvisionerSettings {
        std::fs::create_dir_all(templates.join("modules/proxmox_vm")).unwrap();
        std::fs::create_dir_all(templates.join("modules/proxmox_nixos_vm")).unwrap();
        let mut settings = ProvisionerSettings::default();
        settings.build_root = build.to_path_buf();
        settings.terraform.templates = templates.to_path_buf();
        settings.terraform.retry_backoff = Duration::ZERO;
        settings.nixos_anywhere.enabled = deploy;
        settings
    }

    fn config() -> RootConfig {
        RootConfig::from_documents(
            serde_yaml::from_str("image_catalog: { ubuntu_iso_url: https://img.example/u.iso, nixos_iso_url: https://img.example/n.iso }").unwrap(),
            serde_yaml::from_str("vms:\n  - { name: web-01 }\n  - { name: nix-01 }\n  - { name: metal-01, hypervisor: baremetal }").unwrap(),
            serde_yaml::from_str("installs:\n  web-01: { os: ubuntu, version: '24.04', network: { hostname: web-01 } }\n  nix-01: { os: nixos, version: '24.11', network: { hostname: nix-01, dhcp: false, address_cidr: 10.0.0.5/24 } }\n  metal-01: { os: ubuntu, version: '24.04', network: { hostname: metal-01 } }").unwrap(),
        )
        .unwrap()
    }

    async fn run_host(
        settings: ProvisionerSettings,
        runner: Arc<ScriptedRunner>,
        host: &str,
        options: RunOptions,
    ) -> Result<(), HostError> {
        let config = config();
        let ctx = PipelineContext::new(
            Toolchain::new(settings),
            AccessCredentials::default(),
            runner,
            options,
        );
        let vm = config.vm(host).unwrap();
        HostPipeline::new(&ctx, vm, config.install_for(host), &config.defaults)
            .run()
            .await
    }

    #[tokio::test]
    async fn stages_run_in_fixed_order() {
        let dir = tempfile::tempdir().unwrap();
        let settings = fixture(&dir.path().join("tpl"), &dir.path().join("build"), false);
        let runner = ScriptedRunner::new("", 0);

        run_host(settings, runner.clone(), "web-01", RunOptions::default())
            .await
            .unwrap();

        let calls = runner.calls();
        let verbs: Vec<&str> = calls
            .iter()
            .map(|c| c.split_whitespace().nth(1).unwrap_or_default())
            .collect();
        assert_eq!(verbs, vec!["init", "validate", "plan", "apply", "-i", "-i"]);
        assert!(calls[4].contains("ubuntu_install.yml"));
        assert!(calls[5].contains("post_config_common.yml"));
    }

    #[tokio::test]
    async fn infra_retries_with_destroy_between_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let settings = fixture(&dir.path().join("tpl"), &dir.path().join("build"), false);
        let runner = ScriptedRunner::new("terraform apply", 1);
        let options = RunOptions {
            stages: [StageKind::Infra].into_iter().collect(),
            plan_only: false,
        };

        run_host(settings, runner.clone(), "web-01", options).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.iter().filter(|c| c.contains("terraform apply")).count(), 2);
        assert_eq!(calls.iter().filter(|c| c.contains("terraform destroy")).count(), 1);
    }

    #[tokio::test]
    async fn infra_gives_up_after_configured_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let settings = fixture(&dir.path().join("tpl"), &dir.path().join("build"), false);
        let runner = ScriptedRunner::new("terraform plan", 10);

        let err = run_host(settings, runner.clone(), "web-01", RunOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(StageKind::Infra));
        assert_eq!(err.kind(), "StageError");
        assert!(!runner.calls().iter().any(|c| c.contains("ansible-playbook")));
    }

    #[tokio::test]
    async fn plan_only_skips_apply_and_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let settings = fixture(&dir.path().join("tpl"), &dir.path().join("build"), false);
        let runner = ScriptedRunner::new("", 0);
        let options = RunOptions {
            stages: StageSet::all(),
            plan_only: true,
        };

        run_host(settings, runner.clone(), "web-01", options).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[2].starts_with("terraform plan"));
    }

    #[tokio::test]
    async fn bare_metal_skips_infra_and_stages_network_boot() {
        let dir = tempfile::tempdir().unwrap();
        let settings = fixture(&dir.path().join("tpl"), &dir.path().join("build"), false);
        let runner = ScriptedRunner::new("", 0);

        run_host(settings, runner.clone(), "metal-01", RunOptions::default())
            .await
            .unwrap();

        let calls = runner.calls();
        assert!(!calls.iter().any(|c| c.starts_with("terraform")));
        assert!(calls[0].contains("pxe_server.yml"));
        assert!(!dir.path().join("build/metal-01/tf").exists());
    }

    #[tokio::test]
    async fn nixos_falls_back_to_playbook_when_deploy_fails() {
        let dir = tempfile::tempdir().unwrap();
        let settings = fixture(&dir.path().join("tpl"), &dir.path().join("build"), true);
        let runner = ScriptedRunner::new("nixos-anywhere", 1);
        let options = RunOptions {
            stages: [StageKind::Os].into_iter().collect(),
            plan_only: false,
        };

        run_host(settings, runner.clone(), "nix-01", options).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].contains("root@10.0.0.5"));
        assert!(calls[1].contains("nixos_install.yml"));
    }

    #[tokio::test]
    async fn missing_template_is_a_render_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = fixture(&dir.path().join("tpl"), &dir.path().join("build"), false);
        settings.terraform.templates = dir.path().join("nowhere");
        let runner = ScriptedRunner::new("", 0);

        let err = run_host(settings, runner.clone(), "web-01", RunOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "RenderError");
        assert!(runner.calls().is_empty());
    }
}
