// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Stages and external command invocation
//!
//! A stage is one discrete unit of external-tool work for a host. Stages of a
//! host always run in the fixed order `infra → pxe → os → post`, whatever
//! order they were selected in; [`StageSet`] encodes that by iterating in
//! [`StageKind`]'s `Ord` order.
//!
//! [`CommandRunner`] is the seam between the pipeline and the operating
//! system: the production implementation spawns processes, tests substitute
//! a recorder.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::host::VMSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageKind {
    Infra,
    Pxe,
    Os,
    Post,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [Self::Infra, Self::Pxe, Self::Os, Self::Post];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Infra => "infra",
            Self::Pxe => "pxe",
            Self::Os => "os",
            Self::Post => "post",
        }
    }

    /// Whether the stage has any work for `vm`: infra only provisions
    /// virtualized hosts, pxe only stages hosts that network-boot.
    pub fn applies_to(self, vm: &VMSpec) -> bool {
        match self {
            Self::Infra => vm.is_virtualized(),
            Self::Pxe => vm.needs_network_boot(),
            Self::Os | Self::Post => true,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "infra" => Ok(Self::Infra),
            "pxe" => Ok(Self::Pxe),
            "os" => Ok(Self::Os),
            "post" => Ok(Self::Post),
            other => Err(format!(
                "unknown stage '{other}' (expected one of: infra, pxe, os, post)"
            )),
        }
    }
}

/// Caller-selected stages, iterated in pipeline order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSet(BTreeSet<StageKind>);

impl StageSet {
    pub fn all() -> Self {
        Self(StageKind::ALL.into_iter().collect())
    }

    pub fn contains(&self, stage: StageKind) -> bool {
        self.0.contains(&stage)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = StageKind> + '_ {
        self.0.iter().copied()
    }
}

impl Default for StageSet {
    fn default() -> Self {
        Self::all()
    }
}

impl FromIterator<StageKind> for StageSet {
    fn from_iter<I: IntoIterator<Item = StageKind>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for StageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|s| s.as_str()).collect();
        f.write_str(&names.join(","))
    }
}

/// One external command, fully specified. Nothing is taken from ambient
/// process state except what the runner inherits by default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Host the command runs on behalf of (used to prefix output)
    pub host: String,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl Invocation {
    pub fn new(host: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Program and arguments as one shell-like line, for messages.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("command failed ({exit_code}): {command}")]
    NonZeroExit { command: String, exit_code: i32 },

    #[error("command terminated by signal: {command}")]
    Terminated { command: String },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl StageError {
    pub fn command(&self) -> &str {
        match self {
            Self::NonZeroExit { command, .. }
            | Self::Terminated { command }
            | Self::Spawn { command, .. } => command,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::NonZeroExit { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}

/// Runs one external command to completion, streaming its output.
///
/// Implementations never retry and never interpret output; a non-zero exit
/// becomes a [`StageError`].
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> Result<(), StageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_set_iterates_in_pipeline_order() {
        let set: StageSet = [StageKind::Post, StageKind::Infra, StageKind::Os]
            .into_iter()
            .collect();
        let order: Vec<StageKind> = set.iter().collect();
        assert_eq!(order, vec![StageKind::Infra, StageKind::Os, StageKind::Post]);
        assert_eq!(set.to_string(), "infra,os,post");
    }

    #[test]
    fn parses_stage_names() {
        assert_eq!("pxe".parse::<StageKind>(), Ok(StageKind::Pxe));
        assert!("deploy".parse::<StageKind>().is_err());
    }

    #[test]
    fn applicability_follows_hypervisor_and_boot_method() {
        let vm: VMSpec = serde_yaml::from_str("name: metal-01\nhypervisor: baremetal").unwrap();
        assert!(!StageKind::Infra.applies_to(&vm));
        assert!(StageKind::Pxe.applies_to(&vm));

        let vm: VMSpec = serde_yaml::from_str("name: vm-01\nboot_method: iso").unwrap();
        assert!(StageKind::Infra.applies_to(&vm));
        assert!(!StageKind::Pxe.applies_to(&vm));
        assert!(StageKind::Post.applies_to(&vm));
    }

    #[test]
    fn invocation_renders_command_line() {
        let inv = Invocation::new("web-01", "terraform")
            .args(["plan", "-input=false"])
            .arg("-out=tfplan");
        assert_eq!(inv.command_line(), "terraform plan -input=false -out=tfplan");
    }

    #[test]
    fn stage_error_exposes_command_and_code() {
        let err = StageError::NonZeroExit {
            command: "ansible-playbook site.yml".into(),
            exit_code: 2,
        };
        assert_eq!(err.exit_code(), Some(2));
        assert_eq!(err.command(), "ansible-playbook site.yml");
        assert_eq!(err.to_string(), "command failed (2): ansible-playbook site.yml");
    }
}
