// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Host hardware and hypervisor specification
//!
//! One [`VMSpec`] per host, read from the `vms:` list of the vm-specs
//! document. Field-level bounds are checked by [`VMSpec::violations`]; the
//! aggregate checks (unique names, catalog coverage) live in
//! [`crate::domain::config`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path};

use crate::domain::attributes::AttributeBag;
use crate::domain::config::SchemaViolation;

pub const MIN_CPUS: u32 = 1;
pub const MIN_MEMORY_MB: u32 = 512;
pub const MIN_DISK_GB: u32 = 8;

/// Whether `name` can name a host's directory under the build root: exactly
/// one normal path component, no separators of any platform, no NUL.
pub fn is_safe_host_name(name: &str) -> bool {
    if name.contains(|c: char| matches!(c, '/' | '\\' | '\0')) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Hypervisor {
    #[serde(rename = "proxmox", alias = "virtualized")]
    Virtualized,
    #[serde(rename = "baremetal", alias = "bare-metal")]
    BareMetal,
}

impl Default for Hypervisor {
    fn default() -> Self {
        Self::Virtualized
    }
}

impl fmt::Display for Hypervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Virtualized => write!(f, "proxmox"),
            Self::BareMetal => write!(f, "baremetal"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootMethod {
    Iso,
    Image,
    #[serde(alias = "network-boot")]
    Pxe,
}

impl Default for BootMethod {
    fn default() -> Self {
        Self::Iso
    }
}

impl fmt::Display for BootMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Iso => write!(f, "iso"),
            Self::Image => write!(f, "image"),
            Self::Pxe => write!(f, "pxe"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskType {
    Scsi,
    Virtio,
    Sata,
}

impl Default for DiskType {
    fn default() -> Self {
        Self::Scsi
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NicModel {
    Virtio,
    E1000,
    Rtl8139,
}

impl Default for NicModel {
    fn default() -> Self {
        Self::Virtio
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskSpec {
    #[serde(default = "default_disk_size", alias = "sizeGB", alias = "sizeGb")]
    pub size_gb: u32,

    /// Storage target (hypervisor pool or block device)
    #[serde(alias = "storageTarget")]
    pub storage: String,

    #[serde(rename = "type", default, alias = "diskType")]
    pub disk_type: DiskType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetIfSpec {
    /// Bridge for virtualized hosts, physical device for bare-metal
    #[serde(alias = "bridgeOrDevice", alias = "device")]
    pub bridge: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,

    #[serde(default, alias = "nicModel")]
    pub model: NicModel,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VMSpec {
    pub name: String,

    #[serde(default = "default_tenant")]
    pub tenant: String,

    #[serde(default)]
    pub hypervisor: Hypervisor,

    #[serde(default, alias = "bootMethod")]
    pub boot_method: BootMethod,

    #[serde(default = "default_cpus")]
    pub cpus: u32,

    #[serde(default = "default_memory_mb", alias = "memoryMB", alias = "memoryMb")]
    pub memory_mb: u32,

    #[serde(default)]
    pub disks: Vec<DiskSpec>,

    #[serde(
        default,
        alias = "netifs",
        alias = "networkInterfaces"
    )]
    pub network_interfaces: Vec<NetIfSpec>,

    /// Hypervisor-specific hints (see [`AttributeBag`] for well-known keys)
    #[serde(
        default,
        alias = "proxmox",
        alias = "baremetal",
        alias = "hypervisorAttributes"
    )]
    pub attributes: AttributeBag,
}

impl VMSpec {
    /// Whether the host has to go through network-boot staging before the
    /// OS install can start.
    pub fn needs_network_boot(&self) -> bool {
        self.hypervisor == Hypervisor::BareMetal || self.boot_method == BootMethod::Pxe
    }

    pub fn is_virtualized(&self) -> bool {
        self.hypervisor == Hypervisor::Virtualized
    }

    /// Field-level constraint violations, all of them, prefixed with `path`.
    pub fn violations(&self, path: &str) -> Vec<SchemaViolation> {
        let mut out = Vec::new();

        if self.name.trim().is_empty() {
            out.push(SchemaViolation::new(format!("{path}.name"), "must not be empty"));
        } else if !is_safe_host_name(&self.name) {
            out.push(SchemaViolation::new(
                format!("{path}.name"),
                format!(
                    "'{}' is not a valid host name (no '/', '\\', NUL, '.' or '..')",
                    self.name.escape_default()
                ),
            ));
        }
        if self.cpus < MIN_CPUS {
            out.push(SchemaViolation::new(
                format!("{path}.cpus"),
                format!("must be >= {MIN_CPUS}, got {}", self.cpus),
            ));
        }
        if self.memory_mb < MIN_MEMORY_MB {
            out.push(SchemaViolation::new(
                format!("{path}.memory_mb"),
                format!("must be >= {MIN_MEMORY_MB}, got {}", self.memory_mb),
            ));
        }
        for (i, disk) in self.disks.iter().enumerate() {
            if disk.size_gb < MIN_DISK_GB {
                out.push(SchemaViolation::new(
                    format!("{path}.disks[{i}].size_gb"),
                    format!("must be >= {MIN_DISK_GB}, got {}", disk.size_gb),
                ));
            }
            if disk.storage.trim().is_empty() {
                out.push(SchemaViolation::new(
                    format!("{path}.disks[{i}].storage"),
                    "must not be empty",
                ));
            }
        }
        for (i, nic) in self.network_interfaces.iter().enumerate() {
            if nic.bridge.trim().is_empty() {
                out.push(SchemaViolation::new(
                    format!("{path}.network_interfaces[{i}].bridge"),
                    "must not be empty",
                ));
            }
            if let Some(vlan) = nic.vlan {
                if vlan == 0 || vlan > 4094 {
                    out.push(SchemaViolation::new(
                        format!("{path}.network_interfaces[{i}].vlan"),
                        format!("must be within 1..=4094, got {vlan}"),
                    ));
                }
            }
        }

        out
    }
}

fn default_tenant() -> String {
    "default".to_string()
}

fn default_cpus() -> u32 {
    2
}

fn default_memory_mb() -> u32 {
    4096
}

fn default_disk_size() -> u32 {
    50
}
