//! Per-call filesystem and network policy, path checks, and `bwrap` wrapping.

mod bwrap;
mod paths;

use serde::{Deserialize, Serialize};

pub use bwrap::{SandboxCommandBuilder, SandboxError};
pub use paths::{AccessMode, PathValidator, PathViolation, ViolationKind, resolve_path};

use crate::config::SandboxConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRestrictions {
    #[serde(default)]
    pub deny_only: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRestrictions {
    #[serde(default)]
    pub allow_only: Vec<String>,
    #[serde(default)]
    pub deny_within_allow: Vec<String>,
}

/// Filesystem and network rules for a single tool call.
///
/// Rules are written relative to the working directory or with a leading
/// `~`; they are resolved when checked or mounted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxPolicy {
    pub enabled: bool,
    pub read: ReadRestrictions,
    pub write: WriteRestrictions,
    pub needs_network_restriction: bool,
    pub enable_weaker_nested_sandbox: bool,
}

impl SandboxPolicy {
    #[must_use]
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            enabled: config.enabled,
            read: ReadRestrictions {
                deny_only: config.read_deny.clone(),
            },
            write: WriteRestrictions {
                allow_only: config.write_allow.clone(),
                deny_within_allow: config.write_deny_within_allow.clone(),
            },
            needs_network_restriction: config.restrict_network,
            enable_weaker_nested_sandbox: config.weaker_nested_sandbox,
        }
    }

    /// Extend the write allow-list, skipping entries already present.
    #[must_use]
    pub fn with_write_dirs<S: AsRef<str>>(mut self, dirs: &[S]) -> Self {
        for dir in dirs {
            let dir = dir.as_ref();
            if !self.write.allow_only.iter().any(|d| d == dir) {
                self.write.allow_only.push(dir.to_owned());
            }
        }
        self
    }
}
