// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Orchestrator
//!
//! Runs one [`HostPipeline`] per selected host, at most `concurrency` at a
//! time, and collects every host's outcome into a [`RunReport`].
//!
//! Tasks are futures polled together on the caller's runtime; a
//! [`Semaphore`] is the concurrency gate. Outcomes are appended to a shared
//! collection as hosts finish and sorted back into selection order before
//! the report is returned.

use futures::future::join_all;
use parking_lot::Mutex;
use std::fmt;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::pipeline::{HostError, HostPipeline, PipelineContext};
use crate::domain::config::RootConfig;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("no hosts matched the selection")]
    NoHostsMatched,

    #[error("concurrency must be at least 1")]
    InvalidConcurrency,
}

#[derive(Debug)]
pub enum HostOutcome {
    Succeeded,
    Failed(HostError),
    /// Run was cancelled before the host got a concurrency slot
    NotStarted,
}

#[derive(Debug)]
pub struct HostReport {
    pub host: String,
    pub outcome: HostOutcome,
}

impl HostReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, HostOutcome::Succeeded)
    }
}

impl fmt::Display for HostReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            HostOutcome::Succeeded => write!(f, "[OK] {}", self.host),
            HostOutcome::Failed(e) => write!(f, "[FAIL] {} ({}): {}", self.host, e.kind(), e),
            HostOutcome::NotStarted => write!(f, "[SKIP] {} (cancelled before start)", self.host),
        }
    }
}

/// Per-host outcomes in host-selection order.
#[derive(Debug)]
pub struct RunReport {
    pub hosts: Vec<HostReport>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.hosts.iter().any(|h| !h.is_success())
    }

    pub fn exit_code(&self) -> i32 {
        if self.has_failures() {
            1
        } else {
            0
        }
    }

    pub fn failed(&self) -> usize {
        self.hosts
            .iter()
            .filter(|h| matches!(h.outcome, HostOutcome::Failed(_)))
            .count()
    }

    pub fn summary_lines(&self) -> Vec<String> {
        self.hosts.iter().map(ToString::to_string).collect()
    }
}

pub struct Orchestrator {
    ctx: PipelineContext,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops hosts from starting once cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Provision the hosts named in `filter` (all hosts when empty).
    pub async fn run(
        &self,
        config: &RootConfig,
        filter: &[String],
        concurrency: usize,
    ) -> Result<RunReport, OrchestratorError> {
        if concurrency == 0 {
            return Err(OrchestratorError::InvalidConcurrency);
        }

        let selection = config.select_hosts(filter);
        for name in &selection.unknown {
            warn!(host = %name, "Requested host is not declared in vm-specs, ignoring");
        }
        if selection.hosts.is_empty() {
            return Err(OrchestratorError::NoHostsMatched);
        }

        info!(
            hosts = selection.hosts.len(),
            concurrency,
            stages = %self.ctx.options().stages,
            plan_only = self.ctx.options().plan_only,
            "Starting provisioning run"
        );

        let gate = Semaphore::new(concurrency);
        let results: Mutex<Vec<(usize, HostReport)>> =
            Mutex::new(Vec::with_capacity(selection.hosts.len()));

        let tasks = selection.hosts.iter().enumerate().map(|(index, vm)| {
            let pipeline = HostPipeline::new(
                &self.ctx,
                vm,
                config.install_for(&vm.name),
                &config.defaults,
            );
            let gate = &gate;
            let results = &results;
            async move {
                let outcome = self.run_gated(&pipeline, gate).await;
                results.lock().push((
                    index,
                    HostReport {
                        host: pipeline.host().to_string(),
                        outcome,
                    },
                ));
            }
        });
        join_all(tasks).await;

        let mut results = results.into_inner();
        results.sort_by_key(|(index, _)| *index);
        let report = RunReport {
            hosts: results.into_iter().map(|(_, report)| report).collect(),
        };

        info!(
            hosts = report.hosts.len(),
            failed = report.failed(),
            "Provisioning run finished"
        );
        Ok(report)
    }

    async fn run_gated(&self, pipeline: &HostPipeline<'_>, gate: &Semaphore) -> HostOutcome {
        if let Err(e) = pipeline.preflight() {
            warn!(host = %pipeline.host(), error = %e, "Host is incomplete, not dispatching");
            return HostOutcome::Failed(e);
        }

        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return HostOutcome::NotStarted,
            permit = gate.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return HostOutcome::NotStarted,
            },
        };
        if self.cancel.is_cancelled() {
            return HostOutcome::NotStarted;
        }

        match pipeline.run().await {
            Ok(()) => HostOutcome::Succeeded,
            Err(e) => HostOutcome::Failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::pipeline::RunOptions;
    use crate::domain::stage::{CommandRunner, Invocation, StageError};
    use crate::domain::settings::ProvisionerSettings;
    use crate::infrastructure::renderer::AccessCredentials;
    use crate::infrastructure::toolchain::Toolchain;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct NoopRunner;

    #[async_trait]
    impl CommandRunner for NoopRunner {
        async fn run(&self, _invocation: &Invocation) -> Result<(), StageError> {
            Ok(())
        }
    }

    fn orchestrator(build: &std::path::Path) -> Orchestrator {
        let mut settings = ProvisionerSettings::default();
        settings.build_root = build.to_path_buf();
        let options = RunOptions {
            stages: [crate::domain::stage::StageKind::Post].into_iter().collect(),
            plan_only: false,
        };
        Orchestrator::new(PipelineContext::new(
            Toolchain::new(settings),
            AccessCredentials::default(),
            Arc::new(NoopRunner),
            options,
        ))
    }

    fn config() -> RootConfig {
        RootConfig::from_documents(
            serde_yaml::Value::Null,
            serde_yaml::from_str("vms:\n  - { name: a, hypervisor: baremetal }\n  - { name: b, hypervisor: baremetal }").unwrap(),
            serde_yaml::from_str("installs:\n  a: { os: ubuntu, version: '24.04', network: { hostname: a } }").unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn reports_every_host_in_selection_order() {
        let dir = tempfile::tempdir().unwrap();
        let report = orchestrator(dir.path())
            .run(&config(), &[], 2)
            .await
            .unwrap();

        assert_eq!(
            report.summary_lines(),
            vec![
                "[OK] a".to_string(),
                "[FAIL] b (IncompleteHostError): no install config declared for host 'b'".to_string(),
            ]
        );
        assert_eq!(report.exit_code(), 1);
        assert!(!dir.path().join("b").exists());
    }

    #[tokio::test]
    async fn unmatched_selection_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = orchestrator(dir.path())
            .run(&config(), &["zz".to_string()], 2)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NoHostsMatched));
    }

    #[tokio::test]
    async fn cancelled_run_starts_no_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path());
        orchestrator.cancellation_token().cancel();

        let report = orchestrator.run(&config(), &["a".to_string()], 1).await.unwrap();

        assert!(matches!(report.hosts[0].outcome, HostOutcome::NotStarted));
        assert_eq!(report.summary_lines(), vec!["[SKIP] a (cancelled before start)".to_string()]);
        assert_eq!(report.exit_code(), 1);
        assert!(!dir.path().join("a").exists());
    }
}
