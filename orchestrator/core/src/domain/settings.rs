// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Orchestrator Settings
//
// Where the orchestrator finds its tools and templates and how it runs them:
// - build root for per-host working directories
// - infra tool binary, template root and retry policy
// - configuration tool binary and playbook directory
// - optional declarative deploy (nixos-anywhere) for nixos hosts
// - default concurrency
//
// Distinct from the three provisioning documents, which describe *what* to
// provision. Discovery order for the settings file:
// 1. explicit path (--config / PROVISION_CONFIG_PATH)
// 2. ./provision.yaml
// 3. <user config dir>/provision/config.yaml
// 4. /etc/provision/config.yaml
// otherwise built-in defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid settings: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionerSettings {
    /// Root directory for per-host working directories
    #[serde(default = "default_build_root")]
    pub build_root: PathBuf,

    /// Default number of hosts provisioned at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub terraform: TerraformSettings,

    #[serde(default)]
    pub ansible: AnsibleSettings,

    #[serde(default)]
    pub nixos_anywhere: NixosAnywhereSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerraformSettings {
    #[serde(default = "default_terraform_binary")]
    pub binary: String,

    /// Directory holding provider.tf, variables.tf and modules/<name>
    #[serde(default = "default_terraform_templates")]
    pub templates: PathBuf,

    /// Plan+apply attempts before the infra stage gives up
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Base wait between attempts; attempt `n` waits `n * retry_backoff`
    #[serde(default = "default_retry_backoff", with = "humantime_serde")]
    pub retry_backoff: Duration,
}

impl Default for TerraformSettings {
    fn default() -> Self {
        Self {
            binary: default_terraform_binary(),
            templates: default_terraform_templates(),
            retries: default_retries(),
            retry_backoff: default_retry_backoff(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnsibleSettings {
    #[serde(default = "default_ansible_binary")]
    pub binary: String,

    #[serde(default = "default_playbooks")]
    pub playbooks: PathBuf,
}

impl Default for AnsibleSettings {
    fn default() -> Self {
        Self {
            binary: default_ansible_binary(),
            playbooks: default_playbooks(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NixosAnywhereSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_nix_binary")]
    pub nix_binary: String,

    /// Flake directory whose `nixosConfigurations.<host>` is deployed
    #[serde(default = "default_flake")]
    pub flake: PathBuf,

    #[serde(default = "default_deploy_user")]
    pub ssh_user: String,
}

impl Default for NixosAnywhereSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            nix_binary: default_nix_binary(),
            flake: default_flake(),
            ssh_user: default_deploy_user(),
        }
    }
}

impl Default for ProvisionerSettings {
    fn default() -> Self {
        Self {
            build_root: default_build_root(),
            concurrency: default_concurrency(),
            terraform: TerraformSettings::default(),
            ansible: AnsibleSettings::default(),
            nixos_anywhere: NixosAnywhereSettings::default(),
        }
    }
}

impl ProvisionerSettings {
    /// Load settings from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Discover a settings file in the standard locations
    pub fn discover() -> Option<PathBuf> {
        let cwd = PathBuf::from("./provision.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("provision").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/provision/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load settings from an explicit path, else discovery, else defaults.
    pub fn load_or_default(explicit: Option<PathBuf>) -> Result<Self, SettingsError> {
        let settings = if let Some(path) = explicit {
            tracing::info!("Loading settings from explicit path: {:?}", path);
            Self::from_yaml_file(&path)?
        } else if let Some(path) = Self::discover() {
            tracing::info!("Loading settings from discovered path: {:?}", path);
            Self::from_yaml_file(&path)?
        } else {
            tracing::debug!("No settings file found in standard locations, using defaults");
            Self::default()
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.concurrency == 0 {
            return Err(SettingsError::Invalid("concurrency must be at least 1".into()));
        }
        if self.terraform.retries == 0 {
            return Err(SettingsError::Invalid("terraform.retries must be at least 1".into()));
        }
        if self.terraform.binary.trim().is_empty() || self.ansible.binary.trim().is_empty() {
            return Err(SettingsError::Invalid("tool binaries must not be empty".into()));
        }
        Ok(())
    }
}

fn default_build_root() -> PathBuf {
    PathBuf::from("build")
}

fn default_concurrency() -> usize {
    4
}

fn default_terraform_binary() -> String {
    "terraform".to_string()
}

fn default_terraform_templates() -> PathBuf {
    PathBuf::from("terraform")
}

fn default_retries() -> u32 {
    2
}

fn default_retry_backoff() -> Duration {
    Duration::from_secs(15)
}

fn default_ansible_binary() -> String {
    "ansible-playbook".to_string()
}

fn default_playbooks() -> PathBuf {
    PathBuf::from("ansible/playbooks")
}

fn default_nix_binary() -> String {
    "nix".to_string()
}

fn default_flake() -> PathBuf {
    PathBuf::from("nix-solution/nixos-anywhere")
}

fn default_deploy_user() -> String {
    "root".to_string()
}
