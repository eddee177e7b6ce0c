// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Open attribute bags
//!
//! Hypervisor placement hints, provider settings and partitioning layouts are
//! free-form in the input documents. They are carried as an ordered key/value
//! map so unknown keys survive untouched into the rendered artifacts, while the
//! handful of keys the renderer understands get typed accessors.
//!
//! # Well-known keys
//!
//! | Key                | Used by                 | Meaning                              |
//! |--------------------|-------------------------|--------------------------------------|
//! | `node`             | virtualized hosts       | hypervisor node to place the VM on   |
//! | `storage`          | virtualized hosts       | default storage pool for the VM      |
//! | `pool`             | virtualized hosts       | resource pool                        |
//! | `mac`              | bare-metal hosts        | boot NIC MAC for network-boot        |
//! | `power_management` | bare-metal hosts        | BMC / IPMI hint, passed through      |

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeBag(BTreeMap<String, Value>);

impl AttributeBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String value for `key`; numbers and booleans are rendered as text so
    /// `node: 1` and `node: "1"` resolve the same way.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Some(true),
                "false" | "no" | "off" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn node(&self) -> Option<String> {
        self.get_str("node")
    }

    pub fn storage(&self) -> Option<String> {
        self.get_str("storage")
    }

    pub fn pool(&self) -> Option<String> {
        self.get_str("pool")
    }

    pub fn mac(&self) -> Option<String> {
        self.get_str("mac")
    }

    pub fn power_management(&self) -> Option<&Value> {
        self.get("power_management")
    }
}

impl FromIterator<(String, Value)> for AttributeBag {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_values_read_as_strings() {
        let bag: AttributeBag = serde_yaml::from_str("node: 7\nstorage: fast-ssd\nflag: true").unwrap();
        assert_eq!(bag.node().as_deref(), Some("7"));
        assert_eq!(bag.storage().as_deref(), Some("fast-ssd"));
        assert_eq!(bag.get_str("flag").as_deref(), Some("true"));
        assert_eq!(bag.pool(), None);
    }

    #[test]
    fn bool_accepts_common_spellings() {
        let bag: AttributeBag = serde_yaml::from_str("a: yes\nb: \"off\"\nc: false").unwrap();
        assert_eq!(bag.get_bool("a"), Some(true));
        assert_eq!(bag.get_bool("b"), Some(false));
        assert_eq!(bag.get_bool("c"), Some(false));
        assert_eq!(bag.get_bool("missing"), None);
    }

    #[test]
    fn unknown_keys_survive_serialization() {
        let bag: AttributeBag = serde_yaml::from_str("custom:\n  nested: [1, 2]").unwrap();
        let json = serde_json::to_value(&bag).unwrap();
        assert_eq!(json["custom"]["nested"][1], 2);
    }
}
