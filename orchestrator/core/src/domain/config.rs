// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Root configuration aggregate
//!
//! [`RootConfig`] is built once per run from the merged documents and is
//! read-only afterwards. Construction validates eagerly and reports every
//! violated constraint in one [`SchemaError`] rather than stopping at the
//! first.
//!
//! # Invariants
//! - host names are unique across `vms`
//! - every `installs` key names a declared host
//! - every host/install pair passes its field-level checks
//! - a virtualized host booting from `iso`/`image` has a catalog URL for its OS
//! - a virtualized host has a provider endpoint
//!
//! A host without an install entry is *not* a schema error: it is only
//! reported (as an incomplete host) if it gets selected for a run.

use serde::de::DeserializeOwned;
use serde_yaml::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use thiserror::Error;

use crate::domain::defaults::Defaults;
use crate::domain::host::{BootMethod, VMSpec};
use crate::domain::install::OSInstallConfig;
use crate::domain::merge::{self, RootConfigInput};

/// One violated constraint, located by a dotted path into the documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
}

impl SchemaViolation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Debug, Clone, Error)]
#[error("invalid configuration ({} violation(s)):\n{}", .violations.len(), render_violations(.violations))]
pub struct SchemaError {
    violations: Vec<SchemaViolation>,
}

impl SchemaError {
    pub fn new(violations: Vec<SchemaViolation>) -> Self {
        Self { violations }
    }

    pub fn violations(&self) -> &[SchemaViolation] {
        &self.violations
    }
}

fn render_violations(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("  - {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, PartialEq)]
pub struct RootConfig {
    pub defaults: Defaults,
    pub vms: Vec<VMSpec>,
    pub installs: BTreeMap<String, OSInstallConfig>,
}

/// Hosts picked for a run, in vm-specs order.
#[derive(Debug, Clone)]
pub struct HostSelection<'a> {
    pub hosts: Vec<&'a VMSpec>,
    /// Names requested on the command line that match no declared host
    pub unknown: Vec<String>,
}

impl RootConfig {
    /// Merge the three raw documents and validate the result.
    pub fn from_documents(
        defaults: Value,
        vm_specs: Value,
        install_config: Value,
    ) -> Result<Self, SchemaError> {
        let input = merge::merge(defaults, vm_specs, install_config)?;
        Self::from_input(input)
    }

    /// Validate merged input into a [`RootConfig`].
    pub fn from_input(input: RootConfigInput) -> Result<Self, SchemaError> {
        let mut violations = Vec::new();

        let defaults = parse_entry::<Defaults>(input.defaults, "defaults", &mut violations)
            .unwrap_or_default();
        violations.extend(defaults.violations("defaults"));

        let mut vms = Vec::with_capacity(input.vms.len());
        let mut first_seen: HashMap<String, usize> = HashMap::new();
        for (i, raw) in input.vms.into_iter().enumerate() {
            let path = format!("vms[{i}]");
            let Some(vm) = parse_entry::<VMSpec>(raw, &path, &mut violations) else {
                continue;
            };
            violations.extend(vm.violations(&path));
            if let Some(first) = first_seen.get(&vm.name) {
                violations.push(SchemaViolation::new(
                    format!("{path}.name"),
                    format!("duplicate host name '{}' (first declared at vms[{first}])", vm.name),
                ));
                continue;
            }
            first_seen.insert(vm.name.clone(), i);
            vms.push(vm);
        }

        let mut installs = BTreeMap::new();
        for (name, raw) in input.installs {
            let path = format!("installs.{name}");
            let Some(install) = parse_entry::<OSInstallConfig>(raw, &path, &mut violations) else {
                continue;
            };
            violations.extend(install.violations(&path));
            if !first_seen.contains_key(&name) {
                violations.push(SchemaViolation::new(
                    path,
                    format!("no host named '{name}' is declared in vms"),
                ));
                continue;
            }
            installs.insert(name, install);
        }

        let endpoint_missing = defaults.provider_endpoint().is_empty();
        for vm in vms.iter().filter(|vm| vm.is_virtualized()) {
            if endpoint_missing {
                violations.push(SchemaViolation::new(
                    "defaults.proxmox_provider.pm_api_url",
                    format!("required by virtualized host '{}'", vm.name),
                ));
            }
            let Some(install) = installs.get(&vm.name) else {
                continue;
            };
            if vm.boot_method != BootMethod::Pxe
                && defaults.image_catalog.media_for(install.os, vm.boot_method).is_none()
            {
                violations.push(SchemaViolation::new(
                    format!("defaults.image_catalog.{}_{}_url", install.os, vm.boot_method),
                    format!(
                        "host '{}' boots {} from {} but the catalog has no entry for it",
                        vm.name, install.os, vm.boot_method
                    ),
                ));
            }
        }

        if !violations.is_empty() {
            return Err(SchemaError::new(violations));
        }

        Ok(Self {
            defaults,
            vms,
            installs,
        })
    }

    pub fn vm(&self, name: &str) -> Option<&VMSpec> {
        self.vms.iter().find(|vm| vm.name == name)
    }

    pub fn install_for(&self, name: &str) -> Option<&OSInstallConfig> {
        self.installs.get(name)
    }

    /// Select hosts by name; an empty filter selects every host.
    pub fn select_hosts(&self, filter: &[String]) -> HostSelection<'_> {
        if filter.is_empty() {
            return HostSelection {
                hosts: self.vms.iter().collect(),
                unknown: Vec::new(),
            };
        }

        let hosts = self
            .vms
            .iter()
            .filter(|vm| filter.iter().any(|name| name == &vm.name))
            .collect();
        let mut seen = HashSet::new();
        let unknown = filter
            .iter()
            .filter(|name| self.vm(name).is_none() && seen.insert(name.as_str()))
            .cloned()
            .collect();

        HostSelection { hosts, unknown }
    }
}

fn parse_entry<T: DeserializeOwned>(
    raw: Value,
    path: &str,
    violations: &mut Vec<SchemaViolation>,
) -> Option<T> {
    match serde_yaml::from_value(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            violations.push(SchemaViolation::new(path, e.to_string()));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    const DEFAULTS: &str = "image_catalog:\n  ubuntu_iso_url: https://releases.example/ubuntu.iso\n";

    #[test]
    fn builds_a_valid_config() {
        let config = RootConfig::from_documents(
            yaml(DEFAULTS),
            yaml("vms:\n  - name: web-01\n  - name: web-02"),
            yaml("installs:\n  web-01: { os: ubuntu, version: '24.04', network: { hostname: web-01 } }"),
        )
        .unwrap();
        assert_eq!(config.vms.len(), 2);
        assert!(config.install_for("web-01").is_some());
        assert!(config.install_for("web-02").is_none());
    }

    #[test]
    fn enumerates_every_violation() {
        let err = RootConfig::from_documents(
            yaml(DEFAULTS),
            yaml("vms:\n  - name: a\n    cpus: 0\n  - name: b\n    hypervisor: vmware\n  - name: a"),
            yaml("installs:\n  a: { os: ubuntu, version: '24.04', network: { hostname: a, dhcp: false } }\n  ghost: { os: nixos, version: '24.11', network: { hostname: ghost } }"),
        )
        .unwrap_err();

        let paths: Vec<&str> = err.violations().iter().map(|v| v.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "vms[0].cpus",
                "vms[1]",
                "vms[2].name",
                "installs.a.network.address_cidr",
                "installs.ghost",
            ]
        );
        assert!(err.to_string().contains("5 violation(s)"));
    }

    #[test]
    fn virtualized_host_needs_catalog_media() {
        let err = RootConfig::from_documents(
            yaml(DEFAULTS),
            yaml("vms:\n  - name: nix-01\n    boot_method: iso"),
            yaml("installs:\n  nix-01: { os: nixos, version: '24.11', network: { hostname: nix-01 } }"),
        )
        .unwrap_err();
        assert_eq!(err.violations()[0].path, "defaults.image_catalog.nixos_iso_url");
    }

    #[test]
    fn bare_metal_and_pxe_hosts_need_no_catalog_media() {
        let config = RootConfig::from_documents(
            Value::Null,
            yaml("vms:\n  - name: metal-01\n    hypervisor: baremetal\n  - name: vm-pxe\n    boot_method: pxe"),
            yaml("installs:\n  metal-01: { os: ubuntu, version: '24.04', network: { hostname: m } }\n  vm-pxe: { os: nixos, version: '24.11', network: { hostname: p } }"),
        );
        assert!(config.is_ok());
    }

    #[test]
    fn empty_provider_endpoint_is_rejected_for_virtualized_hosts() {
        let err = RootConfig::from_documents(
            yaml("proxmox_provider: { pm_api_url: '' }"),
            yaml("vms:\n  - name: vm-01\n    boot_method: pxe"),
            Value::Null,
        )
        .unwrap_err();
        assert_eq!(err.violations()[0].path, "defaults.proxmox_provider.pm_api_url");
    }

    #[test]
    fn selection_keeps_document_order_and_reports_unknown_names() {
        let config = RootConfig::from_documents(
            Value::Null,
            yaml("vms:\n  - { name: a, boot_method: pxe }\n  - { name: b, boot_method: pxe }\n  - { name: c, boot_method: pxe }"),
            Value::Null,
        )
        .unwrap();

        let all = config.select_hosts(&[]);
        assert_eq!(all.hosts.len(), 3);

        let picked = config.select_hosts(&["c".into(), "zz".into(), "a".into()]);
        let names: Vec<&str> = picked.hosts.iter().map(|vm| vm.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(picked.unknown, vec!["zz".to_string()]);
    }

    #[test]
    fn unknown_names_are_reported_once_in_first_seen_order() {
        let config = RootConfig::from_documents(
            Value::Null,
            yaml("vms:\n  - { name: a, boot_method: pxe }"),
            Value::Null,
        )
        .unwrap();

        let picked = config.select_hosts(&["zz".into(), "a".into(), "yy".into(), "zz".into()]);
        assert_eq!(picked.unknown, vec!["zz".to_string(), "yy".to_string()]);
    }

    #[test]
    fn host_names_that_are_not_plain_directory_names_are_rejected() {
        let err = RootConfig::from_documents(
            Value::Null,
            yaml("vms:\n  - { name: a, boot_method: pxe }\n  - { name: 'a/b', boot_method: pxe }\n  - { name: '..', hypervisor: baremetal }"),
            Value::Null,
        )
        .unwrap_err();

        let paths: Vec<&str> = err.violations().iter().map(|v| v.path.as_str()).collect();
        assert_eq!(paths, vec!["vms[1].name", "vms[2].name"]);
    }
}
