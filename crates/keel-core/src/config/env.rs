use keel_tools::PermissionMode;

use super::Config;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("KEEL_PERMISSION_MODE") {
            match v.parse::<PermissionMode>() {
                Ok(mode) => self.permissions.mode = mode,
                Err(e) => tracing::warn!("ignoring invalid KEEL_PERMISSION_MODE value: {e}"),
            }
        }
        if let Ok(v) = std::env::var("KEEL_SHELL_TIMEOUT") {
            match v.parse::<u64>() {
                Ok(secs) if secs > 0 => self.tools.shell.timeout = secs,
                _ => tracing::warn!("ignoring invalid KEEL_SHELL_TIMEOUT value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("KEEL_SANDBOX_ENABLED") {
            if let Ok(enabled) = v.parse::<bool>() {
                self.tools.sandbox.enabled = enabled;
            } else {
                tracing::warn!("ignoring invalid KEEL_SANDBOX_ENABLED value: {v}");
            }
        }
        if let Ok(v) = std::env::var("KEEL_ALLOW_NETWORK") {
            if let Ok(allow) = v.parse::<bool>() {
                self.tools.shell.allow_network = allow;
            } else {
                tracing::warn!("ignoring invalid KEEL_ALLOW_NETWORK value: {v}");
            }
        }
        if let Ok(v) = std::env::var("KEEL_MAX_TOOL_CONCURRENCY") {
            match v.parse::<usize>() {
                Ok(0) => self.scheduler.max_concurrency = None,
                Ok(n) => self.scheduler.max_concurrency = Some(n),
                Err(_) => tracing::warn!("ignoring invalid KEEL_MAX_TOOL_CONCURRENCY value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("KEEL_AUDIT_DESTINATION") {
            self.tools.audit.destination = v;
        }
    }
}
