//! Dangerous-pattern rules and the executable allow-list.
//!
//! Rules are evaluated in table order, per segment first and then over the
//! whole pipeline; the allow-list is consulted only when no rule fires.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::access::executables;
use super::parse::{Pipeline, SubcommandSpan};
use crate::config::ShellConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Critical,
}

/// Which text a [`DangerRule`] pattern is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleTarget {
    /// Segment source text, quoting intact.
    Raw,
    /// Unquoted words of the segment joined by spaces.
    Words,
    /// Each output redirection target of the segment.
    RedirectTarget,
    /// Unquoted words of every segment joined by ` | `.
    Pipeline,
}

#[derive(Debug, Clone, Copy)]
pub struct DangerRule {
    pub name: &'static str,
    pub target: RuleTarget,
    pub pattern: &'static str,
    pub reason: &'static str,
    pub severity: Severity,
}

pub const DANGER_RULES: &[DangerRule] = &[
    DangerRule {
        name: "command-substitution",
        target: RuleTarget::Raw,
        pattern: r"\$\(|`",
        reason: "command substitution hides the command that actually runs",
        severity: Severity::High,
    },
    DangerRule {
        name: "process-substitution",
        target: RuleTarget::Raw,
        pattern: r"[<>]\(",
        reason: "process substitution hides the command that actually runs",
        severity: Severity::High,
    },
    DangerRule {
        name: "chained-execution",
        target: RuleTarget::Words,
        pattern: r"^(?:\S+=\S*\s+)*(?:eval|exec|source|\.)(?:\s|$)|(?:^|\s)(?:\S*/)?(?:ba|z|da|k|c|tc|fi|a)?sh\s+(?:-\S+\s+)*-[a-zA-Z]*c|(?:^|\s)xargs(?:\s.*)?\s(?:\S*/)?(?:ba|z|da|k|fi|a)?sh(?:\s|$)",
        reason: "evaluates a string as a new command",
        severity: Severity::High,
    },
    DangerRule {
        name: "system-redirect",
        target: RuleTarget::RedirectTarget,
        pattern: r"^/(?:etc|usr|bin|sbin|boot|lib|lib32|lib64|libx32|opt|root|srv|sys|proc|var/lib|var/spool)(?:/|$)|^/dev/(?:tcp/|udp/|[hsv]d[a-z]|xvd|nvme|mmcblk|disk|mem|kmem|port)",
        reason: "redirects output into a system location",
        severity: Severity::Critical,
    },
    DangerRule {
        name: "recursive-root-delete",
        target: RuleTarget::Words,
        pattern: r"(?:^|\s)rm\s+(?:-\S+\s+)*?(?:-[a-zA-Z]*(?:[rR][a-zA-Z]*f|f[a-zA-Z]*[rR])[a-zA-Z]*|(?:-[a-zA-Z]*[rR][a-zA-Z]*|--recursive)\s+(?:-\S+\s+)*(?:-[a-zA-Z]*f[a-zA-Z]*|--force)|(?:-[a-zA-Z]*f[a-zA-Z]*|--force)\s+(?:-\S+\s+)*(?:-[a-zA-Z]*[rR][a-zA-Z]*|--recursive))\s+(?:-\S+\s+)*(?:\S+\s+)*?(?:/\*?|~/?\*?|\$HOME/?\*?|/[^/\s]+/?\*?)(?:\s|$)",
        reason: "recursively force-deletes the filesystem root, the home directory, or a top-level directory",
        severity: Severity::Critical,
    },
    DangerRule {
        name: "disk-overwrite",
        target: RuleTarget::Words,
        pattern: r"(?:^|\s)(?:dd\s.*\bof=/dev/|mkfs(?:\.\w+)?(?:\s|$)|wipefs\s|shred\s.*/dev/)",
        reason: "overwrites a block device",
        severity: Severity::Critical,
    },
    DangerRule {
        name: "pipe-to-shell",
        target: RuleTarget::Pipeline,
        pattern: r"\|\s*(?:sudo\s+)?(?:env\s+)?(?:\S*/)?(?:ba|z|da|k|c|tc|fi|a)?sh(?:\s|$)",
        reason: "pipes data into a shell interpreter",
        severity: Severity::Critical,
    },
    DangerRule {
        name: "pipe-to-interpreter",
        target: RuleTarget::Pipeline,
        pattern: r"\|\s*(?:sudo\s+)?(?:\S*/)?(?:python[0-9.]*|perl|ruby|node|php)(?:\s+-)?\s*(?:\||$)",
        reason: "pipes data into a script interpreter",
        severity: Severity::Critical,
    },
];

/// Executables permitted when no user configuration narrows the set.
pub const DEFAULT_ALLOWED: &[&str] = &[
    "awk", "base64", "basename", "bundle", "cargo", "cat", "cd", "chmod", "cmake", "cmp",
    "column", "comm", "command", "cp", "curl", "cut", "date", "df", "diff", "dirname", "dotnet",
    "du", "echo", "env", "eslint", "export", "false", "fd", "file", "find", "git", "go", "gradle",
    "grep", "gunzip", "gzip", "head", "id", "java", "javac", "jq", "less", "ln", "ls", "make",
    "md5sum", "mkdir", "mv", "mvn", "nc", "ncat", "netcat", "nice", "nl", "node", "nohup", "npm",
    "npx", "pip", "pip3", "pnpm", "prettier", "printenv", "printf", "pwd", "pytest", "python",
    "python3", "readlink", "realpath", "rg", "rm", "rmdir", "ruby", "rustc", "rustfmt", "rustup",
    "scp", "sed", "sha256sum", "sleep", "sort", "ssh", "stat", "tail", "tar", "tee", "test",
    "time", "timeout", "touch", "tr", "tree", "true", "tsc", "uname", "uniq", "unzip", "uv", "wc",
    "wget", "which", "whoami", "xargs", "yarn", "zip",
];

/// Executables that reach the network; dropped from the allow-list when
/// network access is disabled.
pub const NETWORK_COMMANDS: &[&str] = &[
    "curl", "ftp", "nc", "ncat", "netcat", "rsync", "scp", "ssh", "telnet", "wget",
];

#[derive(Debug, Clone)]
struct CompiledRule {
    name: String,
    target: RuleTarget,
    regex: Regex,
    reason: String,
    severity: Severity,
}

static BUILTIN_RULES: LazyLock<Vec<CompiledRule>> = LazyLock::new(|| {
    DANGER_RULES
        .iter()
        .map(|rule| CompiledRule {
            name: rule.name.to_owned(),
            target: rule.target,
            regex: Regex::new(rule.pattern).expect("built-in danger rule must compile"),
            reason: rule.reason.to_owned(),
            severity: rule.severity,
        })
        .collect()
});

/// Why a command was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedCommand {
    pub rule: String,
    /// The offending text, verbatim.
    pub pattern: String,
    pub reason: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Safe,
    Blocked(BlockedCommand),
}

impl Classification {
    #[must_use]
    pub fn is_safe(&self) -> bool {
        matches!(self, Self::Safe)
    }
}

/// Rule-table and allow-list classifier for shell sub-commands.
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    extra_rules: Vec<CompiledRule>,
    allowed: BTreeSet<String>,
}

impl CommandClassifier {
    #[must_use]
    pub fn new(config: &ShellConfig) -> Self {
        let explicit: BTreeSet<String> = config
            .allowed_commands
            .iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        let mut allowed: BTreeSet<String> =
            DEFAULT_ALLOWED.iter().map(|s| (*s).to_owned()).collect();
        if !config.allow_network {
            for cmd in NETWORK_COMMANDS {
                allowed.remove(*cmd);
            }
        }
        allowed.extend(explicit);

        let extra_rules = config
            .blocked_commands
            .iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .filter_map(|cmd| match Regex::new(&format!("(?i){}", regex::escape(&cmd))) {
                Ok(regex) => Some(CompiledRule {
                    name: "blocked-command".to_owned(),
                    target: RuleTarget::Words,
                    regex,
                    reason: format!("`{cmd}` is blocked by configuration"),
                    severity: Severity::High,
                }),
                Err(e) => {
                    tracing::warn!(pattern = %cmd, error = %e, "invalid blocked command, skipping");
                    None
                }
            })
            .collect();

        Self {
            extra_rules,
            allowed,
        }
    }

    #[must_use]
    pub fn is_allowed(&self, executable: &str) -> bool {
        self.allowed.contains(executable)
    }

    /// Classify a single segment: dangerous patterns first, then the allow-list.
    #[must_use]
    pub fn classify(&self, span: &SubcommandSpan) -> Classification {
        match self.segment_danger(span).or_else(|| self.unlisted(span)) {
            Some(blocked) => Classification::Blocked(blocked),
            None => Classification::Safe,
        }
    }

    /// Classify a pipeline: each segment's dangerous patterns, then rules over
    /// the joined pipeline, then each segment's executable.
    #[must_use]
    pub fn classify_pipeline(&self, pipeline: &Pipeline<'_>) -> Classification {
        let blocked = pipeline
            .segments
            .iter()
            .find_map(|s| self.segment_danger(s))
            .or_else(|| self.pipeline_danger(pipeline))
            .or_else(|| pipeline.segments.iter().find_map(|s| self.unlisted(s)));
        match blocked {
            Some(blocked) => Classification::Blocked(blocked),
            None => Classification::Safe,
        }
    }

    fn rules(&self) -> impl Iterator<Item = &CompiledRule> {
        BUILTIN_RULES.iter().chain(self.extra_rules.iter())
    }

    fn segment_danger(&self, span: &SubcommandSpan) -> Option<BlockedCommand> {
        let words = span.plain();
        self.rules().find_map(|rule| {
            let found = match rule.target {
                RuleTarget::Raw => rule.regex.find(&span.text),
                RuleTarget::Words => rule.regex.find(&words),
                RuleTarget::RedirectTarget => {
                    span.output_targets().find_map(|t| rule.regex.find(t))
                }
                RuleTarget::Pipeline => None,
            };
            found.map(|m| blocked(rule, m.as_str()))
        })
    }

    fn pipeline_danger(&self, pipeline: &Pipeline<'_>) -> Option<BlockedCommand> {
        if pipeline.segments.len() < 2 {
            return None;
        }
        let text = pipeline
            .segments
            .iter()
            .map(|s| s.plain())
            .collect::<Vec<_>>()
            .join(" | ");
        self.rules()
            .filter(|rule| rule.target == RuleTarget::Pipeline)
            .find_map(|rule| rule.regex.find(&text).map(|m| blocked(rule, m.as_str())))
    }

    fn unlisted(&self, span: &SubcommandSpan) -> Option<BlockedCommand> {
        executables(span)
            .into_iter()
            .find(|exe| !self.is_allowed(exe))
            .map(|exe| BlockedCommand {
                reason: format!("`{exe}` is not on the allowed command list"),
                pattern: exe,
                rule: "unlisted-executable".to_owned(),
                severity: Severity::High,
            })
    }
}

impl Default for CommandClassifier {
    fn default() -> Self {
        Self::new(&ShellConfig::default())
    }
}

fn blocked(rule: &CompiledRule, matched: &str) -> BlockedCommand {
    BlockedCommand {
        rule: rule.name.clone(),
        pattern: matched.trim().to_owned(),
        reason: rule.reason.clone(),
        severity: rule.severity,
    }
}
