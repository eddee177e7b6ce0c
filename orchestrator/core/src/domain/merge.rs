// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Layered Merger Domain Service
//!
//! Combines the defaults, vm-specs and install-config documents into one
//! [`RootConfigInput`] with a fixed precedence: install-config > vm-specs >
//! defaults.
//!
//! # Merge rule
//!
//! - mapping + mapping: merged key by key, recursively
//! - anything else: the more specific value replaces the other wholesale
//!
//! Lists are never concatenated or merged element-wise. A host that declares
//! `disks:` gets exactly the disks it declares, regardless of what
//! `vm_defaults.disks` says.
//!
//! # Document shapes
//!
//! ```yaml
//! # defaults.yaml
//! image_catalog: { ubuntu_iso_url: https://... }
//! vm_defaults: { cpus: 2, disks: [{ size_gb: 32, storage: local-lvm }] }
//! install_defaults: { version: "24.04" }
//!
//! # vm_specs.yaml
//! vms:
//!   - name: web-01
//!     cpus: 4
//!
//! # install_config.yaml
//! installs:
//!   web-01: { os: ubuntu, network: { hostname: web-01 } }
//! ```
//!
//! Catalog keys may appear in any of the three documents. `vm_defaults` is
//! applied under every `vms` entry and `install_defaults` under every
//! `installs` entry, using the same rule.
//!
//! # Key spellings
//!
//! Every document is rewritten to canonical snake_case keys before merging,
//! so `imageCatalog.ubuntuIsoUrl` in one layer and
//! `image_catalog.ubuntu_iso_url` in another address the same value. When a
//! single mapping carries both spellings, the later entry wins.

use serde_yaml::{Mapping, Value};

use crate::domain::config::{SchemaError, SchemaViolation};

pub const VMS_KEY: &str = "vms";
pub const INSTALLS_KEY: &str = "installs";
pub const VM_DEFAULTS_KEY: &str = "vm_defaults";
pub const INSTALL_DEFAULTS_KEY: &str = "install_defaults";

/// Merged but not yet validated configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RootConfigInput {
    /// Catalog section: every top-level key except the host sections
    pub defaults: Value,
    /// Host entries with `vm_defaults` applied, in document order
    pub vms: Vec<Value>,
    /// Install entries with `install_defaults` applied, in document order
    pub installs: Vec<(String, Value)>,
}

/// Deep-merge `overlay` onto `base`; `overlay` wins.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => {
                        let previous = std::mem::replace(slot, Value::Null);
                        *slot = deep_merge(previous, value);
                    }
                    None => {
                        base.insert(key, value);
                    }
                }
            }
            Value::Mapping(base)
        }
        (_, overlay) => overlay,
    }
}

/// Alternate spellings and nested sections of one kind of mapping.
struct Section {
    aliases: &'static [(&'static str, &'static str)],
    children: &'static [(&'static str, Child)],
}

enum Child {
    Map(&'static Section),
    List(&'static Section),
    /// Mapping from an arbitrary key (host name) to a section
    Entries(&'static Section),
}

static DISK: Section = Section {
    aliases: &[
        ("sizeGB", "size_gb"),
        ("sizeGb", "size_gb"),
        ("storageTarget", "storage"),
        ("diskType", "type"),
    ],
    children: &[],
};

static NIC: Section = Section {
    aliases: &[
        ("bridgeOrDevice", "bridge"),
        ("device", "bridge"),
        ("nicModel", "model"),
    ],
    children: &[],
};

static VM: Section = Section {
    aliases: &[
        ("bootMethod", "boot_method"),
        ("memoryMB", "memory_mb"),
        ("memoryMb", "memory_mb"),
        ("netifs", "network_interfaces"),
        ("networkInterfaces", "network_interfaces"),
        ("proxmox", "attributes"),
        ("baremetal", "attributes"),
        ("hypervisorAttributes", "attributes"),
    ],
    children: &[
        ("disks", Child::List(&DISK)),
        ("network_interfaces", Child::List(&NIC)),
    ],
};

static USER: Section = Section {
    aliases: &[
        ("authorized_keys", "ssh_authorized_keys"),
        ("authorizedKeys", "ssh_authorized_keys"),
    ],
    children: &[],
};

static NETWORK: Section = Section {
    aliases: &[("addressCIDR", "address_cidr"), ("addressCidr", "address_cidr")],
    children: &[("interfaces", Child::List(&NIC))],
};

static INSTALL: Section = Section {
    aliases: &[
        ("nixServices", "nix_services"),
        ("templateProfile", "template_profile"),
    ],
    children: &[
        ("network", Child::Map(&NETWORK)),
        ("users", Child::List(&USER)),
    ],
};

static CATALOG: Section = Section {
    aliases: &[
        ("ubuntuIsoUrl", "ubuntu_iso_url"),
        ("ubuntuImageUrl", "ubuntu_image_url"),
        ("nixosIsoUrl", "nixos_iso_url"),
        ("nixosImageUrl", "nixos_image_url"),
    ],
    children: &[],
};

static DOCUMENT: Section = Section {
    aliases: &[
        ("imageCatalog", "image_catalog"),
        ("terraformBackend", "terraform_backend"),
        ("proxmoxProvider", "proxmox_provider"),
        ("ansibleDefaults", "ansible_defaults"),
        ("vmDefaults", VM_DEFAULTS_KEY),
        ("installDefaults", INSTALL_DEFAULTS_KEY),
    ],
    children: &[
        ("image_catalog", Child::Map(&CATALOG)),
        (VM_DEFAULTS_KEY, Child::Map(&VM)),
        (INSTALL_DEFAULTS_KEY, Child::Map(&INSTALL)),
        (VMS_KEY, Child::List(&VM)),
        (INSTALLS_KEY, Child::Entries(&INSTALL)),
    ],
};

/// Rewrite alias keys to their canonical names, recursing into known
/// sections. Values of unexpected shape are left for the schema to reject.
fn canonicalize(value: Value, section: &Section) -> Value {
    let Value::Mapping(entries) = value else {
        return value;
    };

    let mut out = Mapping::with_capacity(entries.len());
    for (key, value) in entries {
        let (key, value) = match key {
            Value::String(name) => {
                let name = section
                    .aliases
                    .iter()
                    .find(|(alias, _)| *alias == name)
                    .map_or(name, |(_, canonical)| canonical.to_string());
                let value = match section.children.iter().find(|(child, _)| *child == name) {
                    Some((_, child)) => canonicalize_child(value, child),
                    None => value,
                };
                (Value::String(name), value)
            }
            other => (other, value),
        };

        match out.get_mut(&key) {
            Some(slot) => {
                let previous = std::mem::replace(slot, Value::Null);
                *slot = deep_merge(previous, value);
            }
            None => {
                out.insert(key, value);
            }
        }
    }
    Value::Mapping(out)
}

fn canonicalize_child(value: Value, child: &Child) -> Value {
    match (child, value) {
        (Child::Map(section), value) => canonicalize(value, section),
        (Child::List(section), Value::Sequence(items)) => Value::Sequence(
            items
                .into_iter()
                .map(|item| canonicalize(item, section))
                .collect(),
        ),
        (Child::Entries(section), Value::Mapping(entries)) => Value::Mapping(
            entries
                .into_iter()
                .map(|(key, entry)| (key, canonicalize(entry, section)))
                .collect(),
        ),
        (_, value) => value,
    }
}

/// Merge the three input documents.
///
/// Empty documents (`null`) count as empty mappings. Structural problems
/// (a document that is not a mapping, `vms` that is not a list, ...) are
/// collected and returned together.
pub fn merge(
    defaults: Value,
    vm_specs: Value,
    install_config: Value,
) -> Result<RootConfigInput, SchemaError> {
    let mut violations = Vec::new();

    let defaults = canonicalize(as_document(defaults, "defaults", &mut violations), &DOCUMENT);
    let vm_specs = canonicalize(as_document(vm_specs, "vm-specs", &mut violations), &DOCUMENT);
    let install_config = canonicalize(
        as_document(install_config, "install-config", &mut violations),
        &DOCUMENT,
    );

    let merged = deep_merge(deep_merge(defaults, vm_specs), install_config);
    let mut merged = match merged {
        Value::Mapping(mapping) => mapping,
        _ => Mapping::new(),
    };

    let vm_defaults = take_mapping(&mut merged, VM_DEFAULTS_KEY, &mut violations);
    let install_defaults = take_mapping(&mut merged, INSTALL_DEFAULTS_KEY, &mut violations);

    let vms = match merged.remove(VMS_KEY) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Sequence(entries)) => entries
            .into_iter()
            .map(|entry| deep_merge(vm_defaults.clone(), entry))
            .collect(),
        Some(_) => {
            violations.push(SchemaViolation::new(VMS_KEY, "must be a list of host entries"));
            Vec::new()
        }
    };

    let installs = match merged.remove(INSTALLS_KEY) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Mapping(entries)) => {
            let mut installs = Vec::with_capacity(entries.len());
            for (key, entry) in entries {
                match key {
                    Value::String(name) => {
                        installs.push((name, deep_merge(install_defaults.clone(), entry)))
                    }
                    other => violations.push(SchemaViolation::new(
                        INSTALLS_KEY,
                        format!("host keys must be strings, got {}", describe(&other)),
                    )),
                }
            }
            installs
        }
        Some(_) => {
            violations.push(SchemaViolation::new(
                INSTALLS_KEY,
                "must be a mapping from host name to install config",
            ));
            Vec::new()
        }
    };

    if !violations.is_empty() {
        return Err(SchemaError::new(violations));
    }

    Ok(RootConfigInput {
        defaults: Value::Mapping(merged),
        vms,
        installs,
    })
}

fn as_document(doc: Value, name: &str, violations: &mut Vec<SchemaViolation>) -> Value {
    match doc {
        Value::Null => Value::Mapping(Mapping::new()),
        Value::Mapping(_) => doc,
        other => {
            violations.push(SchemaViolation::new(
                name,
                format!("document must be a mapping, got {}", describe(&other)),
            ));
            Value::Mapping(Mapping::new())
        }
    }
}

fn take_mapping(merged: &mut Mapping, key: &str, violations: &mut Vec<SchemaViolation>) -> Value {
    match merged.remove(key) {
        None | Some(Value::Null) => Value::Mapping(Mapping::new()),
        Some(value @ Value::Mapping(_)) => value,
        Some(other) => {
            violations.push(SchemaViolation::new(
                key,
                format!("must be a mapping, got {}", describe(&other)),
            ));
            Value::Mapping(Mapping::new())
        }
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
