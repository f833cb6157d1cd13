//! Per-turn execution state shared between the scheduler, the permission
//! engine and tools.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::permissions::{PermissionAction, PermissionPolicy, PermissionRule};
use crate::sandbox::{PathValidator, SandboxPolicy};

/// Session-wide policy biasing how `ask` decisions are resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    Plan,
    BypassPermissions,
    DontAsk,
    Delegate,
}

impl PermissionMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "accept-edits",
            Self::Plan => "plan",
            Self::BypassPermissions => "bypass-permissions",
            Self::DontAsk => "dont-ask",
            Self::Delegate => "delegate",
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown permission mode `{0}`")]
pub struct UnknownPermissionMode(pub String);

impl FromStr for PermissionMode {
    type Err = UnknownPermissionMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "default" => Ok(Self::Default),
            "accept-edits" | "acceptedits" => Ok(Self::AcceptEdits),
            "plan" => Ok(Self::Plan),
            "bypass-permissions" | "bypasspermissions" | "bypass" => Ok(Self::BypassPermissions),
            "dont-ask" | "dontask" => Ok(Self::DontAsk),
            "delegate" => Ok(Self::Delegate),
            _ => Err(UnknownPermissionMode(s.to_owned())),
        }
    }
}

/// A change to the session's permission state, usually persisted from a
/// user's answer to a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PermissionUpdate {
    AddRule {
        tool_id: String,
        pattern: String,
        action: PermissionAction,
    },
    AddWriteDirectory {
        path: String,
    },
    SetMode {
        mode: PermissionMode,
    },
}

/// Current rules, mode and extra writable directories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionContext {
    pub mode: PermissionMode,
    pub policy: PermissionPolicy,
    pub additional_write_dirs: Vec<String>,
}

impl PermissionContext {
    #[must_use]
    pub fn new(mode: PermissionMode, policy: PermissionPolicy) -> Self {
        Self {
            mode,
            policy,
            additional_write_dirs: Vec::new(),
        }
    }

    pub fn apply(&mut self, update: &PermissionUpdate) {
        match update {
            PermissionUpdate::AddRule {
                tool_id,
                pattern,
                action,
            } => self.policy.add_rule(
                tool_id,
                PermissionRule {
                    pattern: pattern.clone(),
                    action: *action,
                },
            ),
            PermissionUpdate::AddWriteDirectory { path } => {
                if !self.additional_write_dirs.contains(path) {
                    self.additional_write_dirs.push(path.clone());
                }
            }
            PermissionUpdate::SetMode { mode } => self.mode = *mode,
        }
        tracing::debug!(?update, "permission context updated");
    }
}

/// Change a tool asks the scheduler to make to the [`ExecutionContext`] once
/// its result is finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextModifier {
    /// Messages to append to the conversation.
    InjectMessages(Vec<String>),
    /// Narrow the tools later calls may use. Intersects with any earlier
    /// restriction.
    RestrictTools(Vec<String>),
    RecordFileRead { path: PathBuf, modified: SystemTime },
    UpdatePermissions(Vec<PermissionUpdate>),
}

/// State owned by the orchestrator for one turn.
///
/// The scheduler is the only writer while a batch runs; tools see an
/// immutable [`ContextSnapshot`].
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub cwd: PathBuf,
    pub home_dir: Option<PathBuf>,
    pub cancel: CancellationToken,
    pub read_file_timestamps: HashMap<PathBuf, SystemTime>,
    pub permissions: PermissionContext,
    pub sandbox: SandboxPolicy,
    pub allowed_tools: Option<HashSet<String>>,
    pub injected_messages: Vec<String>,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            home_dir: dirs::home_dir(),
            cancel: CancellationToken::new(),
            read_file_timestamps: HashMap::new(),
            permissions: PermissionContext::default(),
            sandbox: SandboxPolicy::default(),
            allowed_tools: None,
            injected_messages: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_home_dir(mut self, home: Option<PathBuf>) -> Self {
        self.home_dir = home;
        self
    }

    #[must_use]
    pub fn with_permissions(mut self, permissions: PermissionContext) -> Self {
        self.permissions = permissions;
        self
    }

    #[must_use]
    pub fn with_sandbox(mut self, sandbox: SandboxPolicy) -> Self {
        self.sandbox = sandbox;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<ContextSnapshot> {
        Arc::new(ContextSnapshot {
            cwd: self.cwd.clone(),
            home_dir: self.home_dir.clone(),
            read_file_timestamps: self.read_file_timestamps.clone(),
            permissions: self.permissions.clone(),
            sandbox: self.sandbox.clone(),
            allowed_tools: self.allowed_tools.clone(),
        })
    }

    #[must_use]
    pub fn is_tool_allowed(&self, tool_id: &str) -> bool {
        self.allowed_tools
            .as_ref()
            .is_none_or(|set| set.contains(tool_id))
    }

    pub fn apply(&mut self, modifier: ContextModifier) {
        match modifier {
            ContextModifier::InjectMessages(messages) => self.injected_messages.extend(messages),
            ContextModifier::RestrictTools(tools) => {
                let next: HashSet<String> = tools.into_iter().collect();
                self.allowed_tools = Some(match self.allowed_tools.take() {
                    Some(current) => current.intersection(&next).cloned().collect(),
                    None => next,
                });
            }
            ContextModifier::RecordFileRead { path, modified } => {
                self.read_file_timestamps.insert(path, modified);
            }
            ContextModifier::UpdatePermissions(updates) => {
                for update in &updates {
                    self.permissions.apply(update);
                }
            }
        }
    }
}

/// Read-only view of an [`ExecutionContext`] taken at a point in time.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    pub cwd: PathBuf,
    pub home_dir: Option<PathBuf>,
    pub read_file_timestamps: HashMap<PathBuf, SystemTime>,
    pub permissions: PermissionContext,
    pub sandbox: SandboxPolicy,
    pub allowed_tools: Option<HashSet<String>>,
}

impl ContextSnapshot {
    /// Sandbox policy for one call: the base policy plus directories the
    /// user made writable this session.
    #[must_use]
    pub fn sandbox_for_call(&self) -> SandboxPolicy {
        self.sandbox
            .clone()
            .with_write_dirs(&self.permissions.additional_write_dirs)
    }

    #[must_use]
    pub fn path_validator(&self) -> PathValidator {
        PathValidator::new(&self.sandbox_for_call(), &self.cwd, self.home_dir.as_deref())
    }

    #[must_use]
    pub fn resolve(&self, raw: &str) -> PathBuf {
        crate::sandbox::resolve_path(raw, &self.cwd, self.home_dir.as_deref())
    }

    #[must_use]
    pub fn last_read(&self, path: &Path) -> Option<SystemTime> {
        self.read_file_timestamps.get(path).copied()
    }

    #[must_use]
    pub fn is_tool_allowed(&self, tool_id: &str) -> bool {
        self.allowed_tools
            .as_ref()
            .is_none_or(|set| set.contains(tool_id))
    }
}
