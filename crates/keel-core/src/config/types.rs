use keel_tools::{PermissionMode, ToolsConfig};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub permissions: PermissionsSection,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Session-wide permission settings; per-tool rules live under
/// `[tools.permissions]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermissionsSection {
    #[serde(default)]
    pub mode: PermissionMode,
}

fn default_chunk_buffer() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on concurrency-safe calls running at once. Unbounded
    /// when unset.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Capacity of each call's chunk channel.
    #[serde(default = "default_chunk_buffer")]
    pub chunk_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            chunk_buffer: default_chunk_buffer(),
        }
    }
}
