// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared defaults catalog
//!
//! Fallback values shared by every host: image locations, infra provider and
//! backend settings, configuration-tool variables and network-boot server
//! paths. Nothing in here is host-specific.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::domain::attributes::AttributeBag;
use crate::domain::config::SchemaViolation;
use crate::domain::host::BootMethod;
use crate::domain::install::OsFamily;

pub const DEFAULT_PROVIDER_ENDPOINT: &str = "https://proxmox.example:8006/api2/json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageCatalog {
    #[serde(default, alias = "ubuntuIsoUrl", skip_serializing_if = "Option::is_none")]
    pub ubuntu_iso_url: Option<String>,

    #[serde(default, alias = "ubuntuImageUrl", skip_serializing_if = "Option::is_none")]
    pub ubuntu_image_url: Option<String>,

    #[serde(default, alias = "nixosIsoUrl", skip_serializing_if = "Option::is_none")]
    pub nixos_iso_url: Option<String>,

    #[serde(default, alias = "nixosImageUrl", skip_serializing_if = "Option::is_none")]
    pub nixos_image_url: Option<String>,
}

impl ImageCatalog {
    /// Install media for an OS/boot-method pair. Network-boot hosts take
    /// their media from the PXE server, not the catalog.
    pub fn media_for(&self, os: OsFamily, boot: BootMethod) -> Option<&str> {
        match (os, boot) {
            (OsFamily::Ubuntu, BootMethod::Iso) => self.ubuntu_iso_url.as_deref(),
            (OsFamily::Ubuntu, BootMethod::Image) => self.ubuntu_image_url.as_deref(),
            (OsFamily::NixOs, BootMethod::Iso) => self.nixos_iso_url.as_deref(),
            (OsFamily::NixOs, BootMethod::Image) => self.nixos_image_url.as_deref(),
            (_, BootMethod::Pxe) => None,
        }
    }

    fn entries(&self) -> [(&'static str, Option<&str>); 4] {
        [
            ("ubuntu_iso_url", self.ubuntu_iso_url.as_deref()),
            ("ubuntu_image_url", self.ubuntu_image_url.as_deref()),
            ("nixos_iso_url", self.nixos_iso_url.as_deref()),
            ("nixos_image_url", self.nixos_image_url.as_deref()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(default, alias = "imageCatalog")]
    pub image_catalog: ImageCatalog,

    #[serde(default, alias = "terraformBackend")]
    pub terraform_backend: AttributeBag,

    #[serde(default = "default_provider", alias = "proxmoxProvider")]
    pub proxmox_provider: AttributeBag,

    #[serde(default, alias = "ansibleDefaults")]
    pub ansible_defaults: AttributeBag,

    #[serde(default = "default_pxe")]
    pub pxe: AttributeBag,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            image_catalog: ImageCatalog::default(),
            terraform_backend: AttributeBag::new(),
            proxmox_provider: default_provider(),
            ansible_defaults: AttributeBag::new(),
            pxe: default_pxe(),
        }
    }
}

impl Defaults {
    /// Infra provider API endpoint, empty when not configured.
    pub fn provider_endpoint(&self) -> String {
        self.proxmox_provider
            .get_str("pm_api_url")
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }

    pub fn violations(&self, path: &str) -> Vec<SchemaViolation> {
        let mut out = Vec::new();
        for (key, value) in self.image_catalog.entries() {
            let Some(value) = value else { continue };
            match Url::parse(value) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => out.push(SchemaViolation::new(
                    format!("{path}.image_catalog.{key}"),
                    format!("unsupported URL scheme '{}'", url.scheme()),
                )),
                Err(e) => out.push(SchemaViolation::new(
                    format!("{path}.image_catalog.{key}"),
                    format!("invalid URL '{value}': {e}"),
                )),
            }
        }
        out
    }
}

fn default_provider() -> AttributeBag {
    let mut bag = AttributeBag::new();
    bag.insert("pm_api_url", DEFAULT_PROVIDER_ENDPOINT);
    bag
}

fn default_pxe() -> AttributeBag {
    let mut bag = AttributeBag::new();
    bag.insert("tftp_root", "/var/lib/tftpboot");
    bag.insert("http_root", "/var/www/html");
    bag
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_documented_defaults() {
        let defaults: Defaults = serde_yaml::from_str("{}").unwrap();
        assert_eq!(defaults.provider_endpoint(), DEFAULT_PROVIDER_ENDPOINT);
        assert_eq!(defaults.pxe.get_str("tftp_root").as_deref(), Some("/var/lib/tftpboot"));
        assert!(defaults.violations("defaults").is_empty());
    }

    #[test]
    fn media_follows_os_and_boot_method() {
        let catalog = ImageCatalog {
            ubuntu_iso_url: Some("https://releases.example/ubuntu.iso".into()),
            nixos_iso_url: Some("https://channels.example/nixos.iso".into()),
            ..Default::default()
        };
        assert_eq!(
            catalog.media_for(OsFamily::Ubuntu, BootMethod::Iso),
            Some("https://releases.example/ubuntu.iso")
        );
        assert_eq!(catalog.media_for(OsFamily::Ubuntu, BootMethod::Image), None);
        assert_eq!(catalog.media_for(OsFamily::NixOs, BootMethod::Pxe), None);
    }

    #[test]
    fn rejects_non_http_catalog_urls() {
        let defaults: Defaults = serde_yaml::from_str(
            "imageCatalog:\n  ubuntuIsoUrl: ftp://mirror/ubuntu.iso\n  nixos_iso_url: not a url\n",
        )
        .unwrap();
        let paths: Vec<String> = defaults.violations("defaults").into_iter().map(|v| v.path).collect();
        assert_eq!(
            paths,
            vec!["defaults.image_catalog.ubuntu_iso_url", "defaults.image_catalog.nixos_iso_url"]
        );
    }
}
