// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Toolchain
//!
//! Builds the [`Invocation`]s for the external tools. Nothing here spawns a
//! process; the Host Pipeline hands the invocations to a
//! [`crate::domain::stage::CommandRunner`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::domain::install::OsFamily;
use crate::domain::settings::ProvisionerSettings;
use crate::domain::stage::Invocation;
use crate::infrastructure::renderer::HostWorkdir;

pub const PXE_PLAYBOOK: &str = "pxe_server.yml";
pub const UBUNTU_PLAYBOOK: &str = "ubuntu_install.yml";
pub const NIXOS_PLAYBOOK: &str = "nixos_install.yml";
pub const POST_PLAYBOOK: &str = "post_config_common.yml";

pub const PLAN_FILE: &str = "tfplan";
const TF_DEBUG_LOG: &str = "terraform-debug.log";
const NIXOS_ANYWHERE_FLAKE: &str = "github:nix-community/nixos-anywhere";

pub fn os_playbook(os: OsFamily) -> &'static str {
    match os {
        OsFamily::Ubuntu => UBUNTU_PLAYBOOK,
        OsFamily::NixOs => NIXOS_PLAYBOOK,
    }
}

#[derive(Debug, Clone)]
pub struct Toolchain {
    settings: ProvisionerSettings,
    /// Credentials passed to every invocation, from `--env-file`
    env: BTreeMap<String, String>,
    ssh_private_key: Option<PathBuf>,
    debug: bool,
}

impl Toolchain {
    pub fn new(settings: ProvisionerSettings) -> Self {
        Self {
            settings,
            env: BTreeMap::new(),
            ssh_private_key: None,
            debug: false,
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_ssh_private_key(mut self, key: Option<PathBuf>) -> Self {
        self.ssh_private_key = key;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn settings(&self) -> &ProvisionerSettings {
        &self.settings
    }

    fn terraform(&self, host: &str, dir: &Path) -> Invocation {
        let invocation = Invocation::new(host, &self.settings.terraform.binary)
            .current_dir(dir)
            .envs(&self.env);
        if self.debug {
            invocation
                .env("TF_LOG", "DEBUG")
                .env("TF_LOG_PATH", dir.join(TF_DEBUG_LOG).display().to_string())
        } else {
            invocation
        }
    }

    pub fn terraform_init(&self, host: &str, dir: &Path) -> Invocation {
        self.terraform(host, dir).args(["init", "-upgrade", "-input=false"])
    }

    pub fn terraform_validate(&self, host: &str, dir: &Path) -> Invocation {
        self.terraform(host, dir).arg("validate")
    }

    pub fn terraform_plan(&self, host: &str, dir: &Path) -> Invocation {
        self.terraform(host, dir)
            .args(["plan", "-input=false"])
            .arg(format!("-out={PLAN_FILE}"))
    }

    pub fn terraform_apply(&self, host: &str, dir: &Path) -> Invocation {
        self.terraform(host, dir)
            .args(["apply", "-auto-approve", "-input=false", PLAN_FILE])
    }

    pub fn terraform_destroy(&self, host: &str, dir: &Path) -> Invocation {
        self.terraform(host, dir)
            .args(["destroy", "-auto-approve", "-input=false"])
    }

    /// `ansible-playbook` against the host's rendered inventory and vars.
    pub fn playbook(&self, host: &str, workdir: &HostWorkdir, playbook: &str) -> Invocation {
        let mut invocation = Invocation::new(host, &self.settings.ansible.binary)
            .arg("-i")
            .arg(workdir.inventory().display().to_string())
            .arg(self.settings.ansible.playbooks.join(playbook).display().to_string())
            .arg("--limit")
            .arg(host)
            .arg("--extra-vars")
            .arg(format!("@{}", workdir.host_vars().display()))
            .envs(&self.env)
            .env("ANSIBLE_HOST_KEY_CHECKING", "False");
        if self.debug {
            invocation = invocation.arg("-vvv");
        }
        invocation
    }

    /// Declarative deploy of a nixos host reachable at `address`.
    pub fn nixos_anywhere(&self, host: &str, address: &str) -> Invocation {
        let deploy = &self.settings.nixos_anywhere;
        let mut invocation = Invocation::new(host, &deploy.nix_binary)
            .args(["run", NIXOS_ANYWHERE_FLAKE, "--"])
            .arg("--flake")
            .arg(format!("{}#{}", deploy.flake.display(), host))
            .arg("--target-host")
            .arg(format!("{}@{}", deploy.ssh_user, address))
            .envs(&self.env);
        if let Some(key) = &self.ssh_private_key {
            invocation = invocation.arg("-i").arg(key.display().to_string());
        }
        if self.debug {
            invocation = invocation.arg("--debug");
        }
        invocation
    }
}
