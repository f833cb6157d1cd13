use serde::Deserialize;

use crate::permissions::PermissionsConfig;

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

fn default_shell_path() -> String {
    "/bin/bash".into()
}

fn default_wrapper_path() -> String {
    "bwrap".into()
}

fn default_read_deny() -> Vec<String> {
    vec!["~/.ssh".into(), "~/.aws".into(), "~/.gnupg".into()]
}

fn default_write_allow() -> Vec<String> {
    vec![".".into()]
}

fn default_audit_destination() -> String {
    "stdout".into()
}

/// Top-level configuration for tool execution.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub permissions: Option<PermissionsConfig>,
}

/// Shell-specific configuration: timeout, interpreter, command blocklist and
/// allowlist overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct ShellConfig {
    /// Default per-command timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_shell_path")]
    pub shell_path: String,
    /// Extra patterns refused wherever they appear in a command.
    #[serde(default)]
    pub blocked_commands: Vec<String>,
    /// Executables added to the built-in allow-list.
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    #[serde(default = "default_true")]
    pub allow_network: bool,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            shell_path: default_shell_path(),
            blocked_commands: Vec::new(),
            allowed_commands: Vec::new(),
            allow_network: true,
        }
    }
}

/// Filesystem confinement for shell commands and path rules for file tools.
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// `bwrap` binary; a bare name is looked up on `PATH`.
    #[serde(default = "default_wrapper_path")]
    pub wrapper_path: String,
    #[serde(default = "default_read_deny")]
    pub read_deny: Vec<String>,
    #[serde(default = "default_write_allow")]
    pub write_allow: Vec<String>,
    #[serde(default)]
    pub write_deny_within_allow: Vec<String>,
    #[serde(default)]
    pub restrict_network: bool,
    /// Skip the pid namespace and fresh `/proc` for hosts that are already
    /// sandboxed (containers without user namespaces).
    #[serde(default)]
    pub weaker_nested_sandbox: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            wrapper_path: default_wrapper_path(),
            read_deny: default_read_deny(),
            write_allow: default_write_allow(),
            write_deny_within_allow: Vec::new(),
            restrict_network: false,
            weaker_nested_sandbox: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub enabled: bool,
    /// `stdout` or a file path opened in append mode.
    #[serde(default = "default_audit_destination")]
    pub destination: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            destination: default_audit_destination(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::PermissionAction;

    #[test]
    fn deserialize_full_config() {
        let toml_str = r#"
            [shell]
            timeout = 60
            blocked_commands = ["npm publish"]
            allowed_commands = ["terraform"]
            allow_network = false

            [sandbox]
            enabled = false
            write_allow = [".", "/tmp/build"]
            write_deny_within_allow = [".git/hooks"]
            restrict_network = true

            [audit]
            enabled = true
            destination = "/var/log/keel-audit.jsonl"

            [permissions]
            bash = [
                { pattern = "git push*", action = "ask" },
                { pattern = "cargo *", action = "allow" },
            ]
        "#;

        let config: ToolsConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.shell.timeout, 60);
        assert_eq!(config.shell.shell_path, "/bin/bash");
        assert!(!config.shell.allow_network);
        assert_eq!(config.shell.blocked_commands, vec!["npm publish"]);
        assert!(!config.sandbox.enabled);
        assert_eq!(config.sandbox.write_allow.len(), 2);
        assert!(config.sandbox.restrict_network);
        assert_eq!(config.sandbox.read_deny, default_read_deny());
        assert!(config.audit.enabled);
        let perms = config.permissions.unwrap();
        assert_eq!(perms.tools["bash"][1].action, PermissionAction::Allow);
    }

    #[test]
    fn deserialize_omitted_fields_use_defaults() {
        let config: ToolsConfig = toml::from_str("").unwrap();
        assert_eq!(config.shell.timeout, 30);
        assert!(config.shell.allow_network);
        assert!(config.sandbox.enabled);
        assert_eq!(config.sandbox.wrapper_path, "bwrap");
        assert_eq!(config.sandbox.write_allow, vec!["."]);
        assert!(!config.sandbox.weaker_nested_sandbox);
        assert!(!config.audit.enabled);
        assert_eq!(config.audit.destination, "stdout");
        assert!(config.permissions.is_none());
    }

    #[test]
    fn default_shell_config() {
        let config = ShellConfig::default();
        assert_eq!(config.timeout, 120);
        assert!(config.blocked_commands.is_empty());
        assert!(config.allowed_commands.is_empty());
    }
}
