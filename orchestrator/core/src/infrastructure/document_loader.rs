// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Document Loader
//!
//! Reads the three provisioning documents from disk (or `-` for stdin) and
//! hands them to [`RootConfig::from_documents`]. Only I/O and YAML syntax
//! errors are reported here; everything about the *content* of the documents
//! is a [`SchemaError`].

use serde_yaml::Value;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::domain::config::{RootConfig, SchemaError};

/// Path spelling that selects standard input.
pub const STDIN_PATH: &str = "-";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("standard input can supply only one document")]
    StdinReused,

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Paths of the three input documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPaths {
    pub defaults: PathBuf,
    pub vm_specs: PathBuf,
    pub install_config: PathBuf,
}

impl DocumentPaths {
    pub fn new(
        defaults: impl Into<PathBuf>,
        vm_specs: impl Into<PathBuf>,
        install_config: impl Into<PathBuf>,
    ) -> Self {
        Self {
            defaults: defaults.into(),
            vm_specs: vm_specs.into(),
            install_config: install_config.into(),
        }
    }

    /// Load, merge and validate all three documents.
    pub fn load(&self) -> Result<RootConfig, LoadError> {
        let from_stdin = [&self.defaults, &self.vm_specs, &self.install_config]
            .iter()
            .filter(|p| is_stdin(p))
            .count();
        if from_stdin > 1 {
            return Err(LoadError::StdinReused);
        }

        let defaults = load_document(&self.defaults)?;
        let vm_specs = load_document(&self.vm_specs)?;
        let install_config = load_document(&self.install_config)?;

        Ok(RootConfig::from_documents(defaults, vm_specs, install_config)?)
    }
}

fn is_stdin(path: &Path) -> bool {
    path.as_os_str() == STDIN_PATH
}

/// Read one YAML document. An empty file yields `Value::Null`.
pub fn load_document(path: &Path) -> Result<Value, LoadError> {
    let content = if is_stdin(path) {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|source| LoadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        buf
    } else {
        std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?
    };

    debug!(path = %path.display(), bytes = content.len(), "Loaded document");

    if content.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_yaml::from_str(&content).map_err(|source| LoadError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}
