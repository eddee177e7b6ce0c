// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Artifact Renderer
//!
//! Turns one validated host (VMSpec + OSInstallConfig + Defaults) into the
//! files the external tools consume. Rendering never spawns processes and
//! never reads process state; credentials arrive through
//! [`AccessCredentials`].
//!
//! # Layout
//!
//! ```text
//! <build_root>/<host>/
//! ├── tf/                       (virtualized hosts only)
//! │   ├── modules/<module>/     copied from the template root
//! │   ├── provider.tf           copied when present
//! │   ├── variables.tf          copied when present
//! │   ├── backend.tf.json       when defaults.terraform_backend is set
//! │   ├── main.tf
//! │   ├── outputs.tf
//! │   └── terraform.tfvars.json
//! └── ansible/
//!     ├── inventory.yaml
//!     └── <host>.vars.yaml
//! ```
//!
//! The host directory is removed and recreated on every render, so a rerun
//! never leaves files from an earlier configuration behind. Output is a pure
//! function of the inputs: rendering twice yields byte-identical files.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use crate::domain::attributes::AttributeBag;
use crate::domain::defaults::Defaults;
use crate::domain::host::{is_safe_host_name, BootMethod, DiskSpec, Hypervisor, NetIfSpec, VMSpec};
use crate::domain::install::{NetworkConfig, OSInstallConfig, OsFamily, UserSpec};

pub const PXE_STAGING_GROUP: &str = "pxe_staging";

const DEFAULT_NODE: &str = "pve";
const DEFAULT_STORAGE: &str = "local-lvm";
const DEFAULT_BRIDGE: &str = "vmbr0";
const DEFAULT_DISK_SIZE_GB: u32 = 20;
const DEFAULT_DNS: [&str; 2] = ["1.1.1.1", "9.9.9.9"];
const NIXOS_PYTHON: &str = "/run/current-system/sw/bin/python3";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("filesystem error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("infra template not found: {0}")]
    MissingTemplate(PathBuf),

    #[error("host name {0:?} cannot be used as a working directory name")]
    UnsafeHostName(String),

    #[error("failed to serialize {artifact}: {message}")]
    Serialize { artifact: String, message: String },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> RenderError + '_ {
    move |source| RenderError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Access settings supplied by the operator, never looked up implicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessCredentials {
    /// Overrides the login user for the VM and for the configuration tool
    pub username: Option<String>,
    /// Public key installed for users that declare no authorized keys
    pub ssh_public_key: Option<String>,
    /// Private key the tools connect with
    pub ssh_private_key: Option<PathBuf>,
}

/// Paths of one host's working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostWorkdir {
    host: String,
    root: PathBuf,
}

impl HostWorkdir {
    pub fn new(build_root: impl AsRef<Path>, host: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            root: build_root.as_ref().join(&host),
            host,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn infra_dir(&self) -> PathBuf {
        self.root.join("tf")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join("ansible")
    }

    pub fn inventory(&self) -> PathBuf {
        self.config_dir().join("inventory.yaml")
    }

    pub fn host_vars(&self) -> PathBuf {
        self.config_dir().join(format!("{}.vars.yaml", self.host))
    }
}

/// Files produced for one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedArtifacts {
    /// Infra working directory, absent for bare-metal hosts
    pub infra_dir: Option<PathBuf>,
    pub inventory: PathBuf,
    pub host_vars: PathBuf,
}

pub struct ArtifactRenderer {
    /// Directory holding provider.tf, variables.tf and modules/<name>
    templates: PathBuf,
    credentials: AccessCredentials,
}

impl ArtifactRenderer {
    pub fn new(templates: impl Into<PathBuf>, credentials: AccessCredentials) -> Self {
        Self {
            templates: templates.into(),
            credentials,
        }
    }

    /// Render both artifact sets into a freshly emptied `workdir`.
    pub fn render(
        &self,
        vm: &VMSpec,
        install: &OSInstallConfig,
        defaults: &Defaults,
        workdir: &HostWorkdir,
    ) -> Result<RenderedArtifacts, RenderError> {
        if !is_safe_host_name(&vm.name) || !is_safe_host_name(&workdir.host) {
            return Err(RenderError::UnsafeHostName(vm.name.clone()));
        }
        reset_dir(workdir.root())?;

        let infra_dir = if vm.is_virtualized() {
            let dir = workdir.infra_dir();
            self.render_infra(&dir, vm, install, defaults)?;
            Some(dir)
        } else {
            None
        };

        self.render_config(workdir, vm, install, defaults)?;

        debug!(host = %vm.name, dir = %workdir.root().display(), "Rendered host artifacts");

        Ok(RenderedArtifacts {
            infra_dir,
            inventory: workdir.inventory(),
            host_vars: workdir.host_vars(),
        })
    }

    fn render_infra(
        &self,
        dir: &Path,
        vm: &VMSpec,
        install: &OSInstallConfig,
        defaults: &Defaults,
    ) -> Result<(), RenderError> {
        std::fs::create_dir_all(dir).map_err(io_error(dir))?;

        let module = infra_module(install.os);
        let module_src = self.templates.join("modules").join(module);
        if !module_src.is_dir() {
            return Err(RenderError::MissingTemplate(module_src));
        }
        copy_tree(&module_src, &dir.join("modules").join(module))?;

        for name in ["provider.tf", "variables.tf"] {
            let src = self.templates.join(name);
            if src.is_file() {
                let dst = dir.join(name);
                std::fs::copy(&src, &dst).map_err(io_error(&dst))?;
            }
        }

        if !defaults.terraform_backend.is_empty() {
            let backend = serde_json::json!({ "terraform": { "backend": &defaults.terraform_backend } });
            write_file(&dir.join("backend.tf.json"), &to_json("backend.tf.json", &backend)?)?;
        }

        write_file(&dir.join("main.tf"), &main_tf(module, install.os))?;
        write_file(&dir.join("outputs.tf"), OUTPUTS_TF)?;

        let vars = self.infra_variables(vm, install, defaults);
        write_file(
            &dir.join("terraform.tfvars.json"),
            &to_json("terraform.tfvars.json", &vars)?,
        )?;

        Ok(())
    }

    fn infra_variables<'a>(
        &self,
        vm: &'a VMSpec,
        install: &'a OSInstallConfig,
        defaults: &'a Defaults,
    ) -> InfraVariables<'a> {
        let endpoint = defaults.provider_endpoint();
        let provider = &defaults.proxmox_provider;
        let network = &install.network;
        let first_nic = vm.network_interfaces.first();

        let (vm_ip, vm_gateway) = if network.dhcp {
            ("dhcp".to_string(), String::new())
        } else {
            (
                network.address_cidr.clone().unwrap_or_default(),
                network.gateway.clone().unwrap_or_default(),
            )
        };

        let template = |key: &str, fallback: &str| {
            let base = provider.get_str(key).unwrap_or_else(|| fallback.to_string());
            match &install.template_profile {
                Some(profile) => provider.get_str(profile).unwrap_or(base),
                None => base,
            }
        };
        let (ubuntu_template, nixos_template) = match install.os {
            OsFamily::Ubuntu => (Some(template("ubuntu_template", "9000")), None),
            OsFamily::NixOs => (None, Some(template("nixos_template", "9100"))),
        };

        let media = defaults.image_catalog.media_for(install.os, vm.boot_method);

        InfraVariables {
            pm_api_url: endpoint.clone(),
            proxmox_endpoint: endpoint,
            pm_tls_insecure: provider.get_bool("pm_tls_insecure").unwrap_or(true),
            vm_name: &vm.name,
            vm_tenant: &vm.tenant,
            vm_node: vm.attributes.node().unwrap_or_else(|| DEFAULT_NODE.to_string()),
            vm_storage: vm
                .attributes
                .storage()
                .unwrap_or_else(|| DEFAULT_STORAGE.to_string()),
            vm_pool: vm.attributes.pool(),
            vm_bridge: first_nic
                .map(|nic| nic.bridge.clone())
                .unwrap_or_else(|| DEFAULT_BRIDGE.to_string()),
            vm_vlan: first_nic.and_then(|nic| nic.vlan),
            vm_cpus: vm.cpus,
            vm_memory: vm.memory_mb,
            vm_disk_size: vm.disks.first().map(|d| d.size_gb).unwrap_or(DEFAULT_DISK_SIZE_GB),
            vm_disks: &vm.disks,
            vm_network_interfaces: &vm.network_interfaces,
            vm_boot_method: vm.boot_method,
            vm_iso_url: media.filter(|_| vm.boot_method == BootMethod::Iso),
            vm_image_url: media.filter(|_| vm.boot_method == BootMethod::Image),
            vm_hostname: &network.hostname,
            vm_domain: network.domain.as_deref(),
            vm_ip,
            vm_gateway,
            vm_dns: if network.dns.is_empty() {
                DEFAULT_DNS.iter().map(|s| s.to_string()).collect()
            } else {
                network.dns.clone()
            },
            target_os: install.os,
            os_version: &install.version,
            ssh_key: self.credentials.ssh_public_key.clone().unwrap_or_default(),
            vm_username: self.login_user(install),
            proxmox_ssh_private_key_path: self
                .credentials
                .ssh_private_key
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            ubuntu_template,
            nixos_template,
        }
    }

    fn render_config(
        &self,
        workdir: &HostWorkdir,
        vm: &VMSpec,
        install: &OSInstallConfig,
        defaults: &Defaults,
    ) -> Result<(), RenderError> {
        let dir = workdir.config_dir();
        std::fs::create_dir_all(&dir).map_err(io_error(&dir))?;

        let host_entry = InventoryHost {
            ansible_host: install
                .network
                .address()
                .map(str::to_string)
                .unwrap_or_else(|| vm.name.clone()),
        };
        let mut children = BTreeMap::new();
        let mut group = |name: &str| {
            children.insert(
                name.to_string(),
                InventoryGroup {
                    hosts: BTreeMap::from([(vm.name.clone(), host_entry.clone())]),
                },
            );
        };
        group(install.os.as_str());
        if vm.needs_network_boot() {
            group(PXE_STAGING_GROUP);
        }
        let inventory = Inventory {
            all: InventoryAll { children },
        };
        write_file(&workdir.inventory(), &to_yaml("inventory.yaml", &inventory)?)?;

        let vars = HostVars {
            ansible_user: self.login_user(install),
            ansible_ssh_private_key_file: self
                .credentials
                .ssh_private_key
                .as_ref()
                .map(|p| p.display().to_string()),
            ansible_python_interpreter: (install.os == OsFamily::NixOs).then_some(NIXOS_PYTHON),
            ansible_ssh_common_args: defaults.ansible_defaults.get_str("ssh_common_args"),
            os_family: install.os,
            os_version: &install.version,
            network: &install.network,
            packages: &install.packages,
            docker_enabled: install.services.docker,
            nix_services: &install.services.nix_services,
            partitioning: install.partitioning.clone().unwrap_or_default(),
            users: self.effective_users(install),
            pxe: vm.needs_network_boot().then(|| PxeVars {
                server: &defaults.pxe,
                hypervisor: vm.hypervisor,
                boot_method: vm.boot_method,
                boot_mac: vm
                    .attributes
                    .mac()
                    .or_else(|| vm.network_interfaces.iter().find_map(|nic| nic.mac.clone())),
                power_management: vm.attributes.power_management().cloned(),
            }),
        };
        write_file(
            &workdir.host_vars(),
            &to_yaml(&format!("{}.vars.yaml", vm.name), &vars)?,
        )?;

        Ok(())
    }

    fn login_user(&self, install: &OSInstallConfig) -> String {
        self.credentials
            .username
            .clone()
            .or_else(|| install.users.first().map(|u| u.username.clone()))
            .unwrap_or_else(|| install.os.default_user().to_string())
    }

    /// Declared users with the operator key filled in where a user has none;
    /// a single sudo user when none are declared.
    fn effective_users(&self, install: &OSInstallConfig) -> Vec<UserSpec> {
        let key = self.credentials.ssh_public_key.as_ref();
        if install.users.is_empty() {
            let mut user = UserSpec::new(self.login_user(install));
            user.ssh_authorized_keys.extend(key.cloned());
            return vec![user];
        }
        install
            .users
            .iter()
            .cloned()
            .map(|mut user| {
                if user.ssh_authorized_keys.is_empty() {
                    user.ssh_authorized_keys.extend(key.cloned());
                }
                user
            })
            .collect()
    }
}

/// Infra module instantiated for a target OS.
pub fn infra_module(os: OsFamily) -> &'static str {
    match os {
        OsFamily::Ubuntu => "proxmox_vm",
        OsFamily::NixOs => "proxmox_nixos_vm",
    }
}

fn main_tf(module: &str, os: OsFamily) -> String {
    let os_line = match os {
        OsFamily::Ubuntu => "ubuntu_template = var.ubuntu_template",
        OsFamily::NixOs => "nixos_template = var.nixos_template",
    };
    format!(
        r#"module "vm" {{
  source = "./modules/{module}"

  vm_name      = var.vm_name
  vm_node      = var.vm_node
  vm_storage   = var.vm_storage
  vm_bridge    = var.vm_bridge
  vm_vlan      = var.vm_vlan
  vm_cpus      = var.vm_cpus
  vm_memory    = var.vm_memory
  vm_disk_size = var.vm_disk_size

  vm_ip      = var.vm_ip
  vm_gateway = var.vm_gateway
  vm_dns     = var.vm_dns

  ssh_key                      = var.ssh_key
  vm_username                  = var.vm_username
  proxmox_ssh_private_key_path = var.proxmox_ssh_private_key_path

  {os_line}
}}
"#
    )
}

const OUTPUTS_TF: &str = r#"output "vm_ip" {
  description = "VM IP address (static or dhcp-pending)"
  value       = module.vm.vm_ip
}
"#;

#[derive(Serialize)]
struct InfraVariables<'a> {
    pm_api_url: String,
    proxmox_endpoint: String,
    pm_tls_insecure: bool,

    vm_name: &'a str,
    vm_tenant: &'a str,
    vm_node: String,
    vm_storage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    vm_pool: Option<String>,
    vm_bridge: String,
    vm_vlan: Option<u16>,
    vm_cpus: u32,
    vm_memory: u32,
    vm_disk_size: u32,
    vm_disks: &'a [DiskSpec],
    vm_network_interfaces: &'a [NetIfSpec],
    vm_boot_method: BootMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    vm_iso_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vm_image_url: Option<&'a str>,

    vm_hostname: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    vm_domain: Option<&'a str>,
    vm_ip: String,
    vm_gateway: String,
    vm_dns: Vec<String>,

    target_os: OsFamily,
    os_version: &'a str,

    ssh_key: String,
    vm_username: String,
    proxmox_ssh_private_key_path: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    ubuntu_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nixos_template: Option<String>,
}

#[derive(Serialize)]
struct Inventory {
    all: InventoryAll,
}

#[derive(Serialize)]
struct InventoryAll {
    children: BTreeMap<String, InventoryGroup>,
}

#[derive(Serialize)]
struct InventoryGroup {
    hosts: BTreeMap<String, InventoryHost>,
}

#[derive(Clone, Serialize)]
struct InventoryHost {
    ansible_host: String,
}

#[derive(Serialize)]
struct HostVars<'a> {
    ansible_user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ansible_ssh_private_key_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ansible_python_interpreter: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ansible_ssh_common_args: Option<String>,
    os_family: OsFamily,
    os_version: &'a str,
    network: &'a NetworkConfig,
    packages: &'a BTreeSet<String>,
    docker_enabled: bool,
    nix_services: &'a [String],
    partitioning: AttributeBag,
    users: Vec<UserSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pxe: Option<PxeVars<'a>>,
}

#[derive(Serialize)]
struct PxeVars<'a> {
    #[serde(flatten)]
    server: &'a AttributeBag,
    hypervisor: Hypervisor,
    boot_method: BootMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    boot_mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    power_management: Option<serde_yaml::Value>,
}

fn reset_dir(path: &Path) -> Result<(), RenderError> {
    if path.exists() {
        if path.is_dir() {
            std::fs::remove_dir_all(path).map_err(io_error(path))?;
        } else {
            std::fs::remove_file(path).map_err(io_error(path))?;
        }
    }
    std::fs::create_dir_all(path).map_err(io_error(path))
}

fn copy_tree(src: &Path, dst: &Path) -> Result<(), RenderError> {
    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry.map_err(|e| RenderError::Io {
            path: e.path().unwrap_or(src).to_path_buf(),
            source: e.into(),
        })?;
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(io_error(&target))?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(io_error(&target))?;
        }
    }
    Ok(())
}

fn write_file(path: &Path, contents: &str) -> Result<(), RenderError> {
    std::fs::write(path, contents).map_err(io_error(path))
}

fn to_json<T: Serialize>(artifact: &str, value: &T) -> Result<String, RenderError> {
    serde_json::to_string_pretty(value)
        .map(|mut s| {
            s.push('\n');
            s
        })
        .map_err(|e| RenderError::Serialize {
            artifact: artifact.to_string(),
            message: e.to_string(),
        })
}

fn to_yaml<T: Serialize>(artifact: &str, value: &T) -> Result<String, RenderError> {
    serde_yaml::to_string(value).map_err(|e| RenderError::Serialize {
        artifact: artifact.to_string(),
        message: e.to_string(),
    })
}
