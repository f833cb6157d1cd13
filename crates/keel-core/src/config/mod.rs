mod env;
mod types;


pub use types::*;

use std::path::Path;

use anyhow::Context;
use keel_tools::{PermissionContext, PermissionPolicy, SandboxPolicy};

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Starting permission state for a session: configured mode and rules.
    #[must_use]
    pub fn permission_context(&self) -> PermissionContext {
        let policy = self
            .tools
            .permissions
            .clone()
            .map(PermissionPolicy::from)
            .unwrap_or_default();
        PermissionContext::new(self.permissions.mode, policy)
    }

    #[must_use]
    pub fn sandbox_policy(&self) -> SandboxPolicy {
        SandboxPolicy::from_config(&self.tools.sandbox)
    }
}
