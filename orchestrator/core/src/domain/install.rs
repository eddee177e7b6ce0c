// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! OS install configuration
//!
//! One [`OSInstallConfig`] per host, keyed by [`crate::domain::host::VMSpec::name`]
//! in the `installs:` mapping of the install-config document.
//!
//! # Invariants
//! - `network.dhcp == false` requires `network.address_cidr`
//! - a static `address_cidr` must be `ip/prefix`
//! - `gateway` and every `dns` entry must be IP addresses

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

use crate::domain::attributes::AttributeBag;
use crate::domain::config::SchemaViolation;
use crate::domain::host::NetIfSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OsFamily {
    /// Imperatively configured distribution
    #[serde(rename = "ubuntu", alias = "imperative-distro")]
    Ubuntu,
    /// Declaratively configured distribution
    #[serde(rename = "nixos", alias = "declarative-distro")]
    NixOs,
}

impl OsFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ubuntu => "ubuntu",
            Self::NixOs => "nixos",
        }
    }

    /// Login user assumed when the install config declares none.
    pub fn default_user(&self) -> &'static str {
        match self {
            Self::Ubuntu => "ubuntu",
            Self::NixOs => "root",
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSpec {
    pub username: String,

    #[serde(default, alias = "authorized_keys", alias = "authorizedKeys")]
    pub ssh_authorized_keys: Vec<String>,

    #[serde(default = "default_true")]
    pub sudo: bool,

    #[serde(default = "default_shell")]
    pub shell: String,
}

impl UserSpec {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ssh_authorized_keys: Vec::new(),
            sudo: true,
            shell: default_shell(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub hostname: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(default = "default_true")]
    pub dhcp: bool,

    #[serde(
        default,
        alias = "addressCIDR",
        alias = "addressCidr",
        skip_serializing_if = "Option::is_none"
    )]
    pub address_cidr: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,

    #[serde(default)]
    pub dns: Vec<String>,

    #[serde(default)]
    pub interfaces: Vec<NetIfSpec>,
}

impl NetworkConfig {
    /// Build a network config, rejecting a static setup without an address.
    pub fn new(
        hostname: impl Into<String>,
        dhcp: bool,
        address_cidr: Option<String>,
    ) -> Result<Self, Vec<SchemaViolation>> {
        let network = Self {
            hostname: hostname.into(),
            domain: None,
            dhcp,
            address_cidr,
            gateway: None,
            dns: Vec::new(),
            interfaces: Vec::new(),
        };
        let violations = network.violations("network");
        if violations.is_empty() {
            Ok(network)
        } else {
            Err(violations)
        }
    }

    /// Address part of `address_cidr`, without the prefix length.
    pub fn address(&self) -> Option<&str> {
        self.address_cidr
            .as_deref()
            .map(|cidr| cidr.split('/').next().unwrap_or(cidr).trim())
            .filter(|addr| !addr.is_empty())
    }

    pub fn violations(&self, path: &str) -> Vec<SchemaViolation> {
        let mut out = Vec::new();

        if self.hostname.trim().is_empty() {
            out.push(SchemaViolation::new(format!("{path}.hostname"), "must not be empty"));
        }

        match self.address_cidr.as_deref() {
            None if !self.dhcp => out.push(SchemaViolation::new(
                format!("{path}.address_cidr"),
                "static network (dhcp: false) requires address_cidr",
            )),
            Some(cidr) => {
                if let Err(reason) = parse_cidr(cidr) {
                    out.push(SchemaViolation::new(format!("{path}.address_cidr"), reason));
                }
            }
            None => {}
        }

        if let Some(gateway) = &self.gateway {
            if gateway.parse::<IpAddr>().is_err() {
                out.push(SchemaViolation::new(
                    format!("{path}.gateway"),
                    format!("'{gateway}' is not an IP address"),
                ));
            }
        }

        for (i, server) in self.dns.iter().enumerate() {
            if server.parse::<IpAddr>().is_err() {
                out.push(SchemaViolation::new(
                    format!("{path}.dns[{i}]"),
                    format!("'{server}' is not an IP address"),
                ));
            }
        }

        out
    }
}

fn parse_cidr(cidr: &str) -> Result<(IpAddr, u8), String> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| format!("'{cidr}' is not in ip/prefix form"))?;
    let addr: IpAddr = addr
        .trim()
        .parse()
        .map_err(|_| format!("'{cidr}' has an invalid address"))?;
    let prefix: u8 = prefix
        .trim()
        .parse()
        .map_err(|_| format!("'{cidr}' has an invalid prefix length"))?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    if prefix > max {
        return Err(format!("'{cidr}' prefix length exceeds {max}"));
    }
    Ok((addr, prefix))
}

/// Service switches. `docker` only applies to ubuntu hosts, `nix_services`
/// only to nixos hosts; both are rendered so playbooks can ignore what does
/// not apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceToggles {
    #[serde(default)]
    pub docker: bool,

    #[serde(default, alias = "nixServices")]
    pub nix_services: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OSInstallConfig {
    pub os: OsFamily,

    pub version: String,

    #[serde(default)]
    pub packages: BTreeSet<String>,

    #[serde(default)]
    pub users: Vec<UserSpec>,

    pub network: NetworkConfig,

    #[serde(flatten)]
    pub services: ServiceToggles,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitioning: Option<AttributeBag>,

    /// Alternative VM template key in the provider settings
    #[serde(
        default,
        alias = "templateProfile",
        skip_serializing_if = "Option::is_none"
    )]
    pub template_profile: Option<String>,
}

impl OSInstallConfig {
    pub fn violations(&self, path: &str) -> Vec<SchemaViolation> {
        let mut out = Vec::new();

        if self.version.trim().is_empty() {
            out.push(SchemaViolation::new(format!("{path}.version"), "must not be empty"));
        }
        for (i, user) in self.users.iter().enumerate() {
            if user.username.trim().is_empty() {
                out.push(SchemaViolation::new(
                    format!("{path}.users[{i}].username"),
                    "must not be empty",
                ));
            }
        }
        out.extend(self.network.violations(&format!("{path}.network")));

        out
    }
}

fn default_true() -> bool {
    true
}

fn default_shell() -> String {
    "/bin/bash".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_network_without_address_is_rejected() {
        let violations = NetworkConfig::new("web-01", false, None).unwrap_err();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "network.address_cidr");
    }

    #[test]
    fn dhcp_network_without_address_is_accepted() {
        let network = NetworkConfig::new("web-01", true, None).unwrap();
        assert!(network.dhcp);
        assert_eq!(network.address(), None);
    }

    #[test]
    fn static_network_with_address_is_accepted() {
        let network = NetworkConfig::new("web-01", false, Some("192.168.30.10/24".into())).unwrap();
        assert_eq!(network.address(), Some("192.168.30.10"));
    }

    #[test]
    fn malformed_addresses_are_reported() {
        let network = NetworkConfig {
            hostname: "db".into(),
            domain: None,
            dhcp: false,
            address_cidr: Some("10.0.0.300/24".into()),
            gateway: Some("gw.local".into()),
            dns: vec!["1.1.1.1".into(), "resolver".into()],
            interfaces: Vec::new(),
        };
        let paths: Vec<String> = network.violations("installs.db.network").into_iter().map(|v| v.path).collect();
        assert_eq!(
            paths,
            vec![
                "installs.db.network.address_cidr",
                "installs.db.network.gateway",
                "installs.db.network.dns[1]",
            ]
        );
    }

    #[test]
    fn parses_install_with_aliases_and_flattened_toggles() {
        let install: OSInstallConfig = serde_yaml::from_str(
            r#"
os: imperative-distro
version: "24.04"
packages: [vim, curl, vim]
docker: true
users:
  - username: ops
    authorizedKeys: ["ssh-ed25519 AAAA"]
network:
  hostname: web-01
  dhcp: false
  addressCIDR: 192.168.30.10/24
"#,
        )
        .unwrap();
        assert_eq!(install.os, OsFamily::Ubuntu);
        assert_eq!(install.packages.len(), 2);
        assert!(install.services.docker);
        assert!(install.users[0].sudo);
        assert_eq!(install.users[0].shell, "/bin/bash");
        assert_eq!(install.network.address_cidr.as_deref(), Some("192.168.30.10/24"));
        assert!(install.violations("installs.web-01").is_empty());
    }
}
