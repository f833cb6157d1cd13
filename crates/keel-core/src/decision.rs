//! Permission decisions and how compound-command decisions combine.

use keel_tools::{PermissionMode, PermissionUpdate};
use serde::Serialize;

/// Outcome of evaluating one tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "behavior", rename_all = "snake_case")]
pub enum PermissionDecision {
    Allow {
        /// Replacement input, when the engine rewrote the call.
        updated_input: Option<serde_json::Value>,
        reason: Option<DecisionReason>,
    },
    Deny {
        message: String,
        reason: Option<DecisionReason>,
    },
    Ask {
        message: String,
        suggestions: Vec<PermissionUpdate>,
        reason: Option<DecisionReason>,
    },
    /// No opinion; resolved as `ask` unless a mode decides otherwise.
    Passthrough {
        message: String,
        reason: Option<DecisionReason>,
    },
}

/// Audit trail attached to a decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecisionReason {
    Rule { name: String },
    Other { text: String },
    SubcommandResults { results: Vec<SubcommandResult> },
    Mode { mode: PermissionMode },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubcommandResult {
    pub command: String,
    pub decision: PermissionDecision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Behavior {
    Allow,
    Passthrough,
    Ask,
    Deny,
}

impl Behavior {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Passthrough => "passthrough",
            Self::Ask => "ask",
            Self::Deny => "deny",
        }
    }
}

impl PermissionDecision {
    #[must_use]
    pub fn allow(reason: Option<DecisionReason>) -> Self {
        Self::Allow {
            updated_input: None,
            reason,
        }
    }

    #[must_use]
    pub fn deny(message: impl Into<String>, reason: Option<DecisionReason>) -> Self {
        Self::Deny {
            message: message.into(),
            reason,
        }
    }

    #[must_use]
    pub fn ask(
        message: impl Into<String>,
        suggestions: Vec<PermissionUpdate>,
        reason: Option<DecisionReason>,
    ) -> Self {
        Self::Ask {
            message: message.into(),
            suggestions,
            reason,
        }
    }

    #[must_use]
    pub fn passthrough(message: impl Into<String>, reason: Option<DecisionReason>) -> Self {
        Self::Passthrough {
            message: message.into(),
            reason,
        }
    }

    #[must_use]
    pub fn behavior(&self) -> Behavior {
        match self {
            Self::Allow { .. } => Behavior::Allow,
            Self::Passthrough { .. } => Behavior::Passthrough,
            Self::Ask { .. } => Behavior::Ask,
            Self::Deny { .. } => Behavior::Deny,
        }
    }

    #[must_use]
    pub fn is_allow(&self) -> bool {
        self.behavior() == Behavior::Allow
    }

    #[must_use]
    pub fn is_deny(&self) -> bool {
        self.behavior() == Behavior::Deny
    }

    #[must_use]
    pub fn reason(&self) -> Option<&DecisionReason> {
        match self {
            Self::Allow { reason, .. }
            | Self::Deny { reason, .. }
            | Self::Ask { reason, .. }
            | Self::Passthrough { reason, .. } => reason.as_ref(),
        }
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Allow { .. } => None,
            Self::Deny { message, .. }
            | Self::Ask { message, .. }
            | Self::Passthrough { message, .. } => Some(message),
        }
    }

    #[must_use]
    pub fn suggestions(&self) -> &[PermissionUpdate] {
        match self {
            Self::Ask { suggestions, .. } => suggestions,
            _ => &[],
        }
    }

    /// Name of the rule behind this decision, descending into the first
    /// sub-command that shares the overall behavior.
    #[must_use]
    pub fn rule_name(&self) -> Option<&str> {
        match self.reason()? {
            DecisionReason::Rule { name } => Some(name),
            DecisionReason::SubcommandResults { results } => results
                .iter()
                .find(|r| r.decision.behavior() == self.behavior())
                .and_then(|r| r.decision.rule_name()),
            DecisionReason::Other { .. } | DecisionReason::Mode { .. } => None,
        }
    }
}

/// Combine per-sub-command decisions: `deny` if any is `deny`, else `ask` if
/// any is `ask`, else `passthrough` if any is `passthrough`, else `allow`.
///
/// A single result is returned as is; several are wrapped with a
/// [`DecisionReason::SubcommandResults`] reason in input order. Passthrough
/// sub-commands contribute an allow-rule suggestion for `tool_id`.
#[must_use]
pub fn compose(tool_id: &str, mut results: Vec<SubcommandResult>) -> PermissionDecision {
    if results.len() == 1
        && let Some(only) = results.pop()
    {
        return only.decision;
    }
    let Some(worst) = results.iter().map(|r| r.decision.behavior()).max() else {
        return PermissionDecision::allow(None);
    };

    let flagged = |b: Behavior| {
        results
            .iter()
            .filter(move |r| r.decision.behavior() == b)
    };
    let message = match worst {
        Behavior::Allow => String::new(),
        Behavior::Deny => flagged(Behavior::Deny)
            .next()
            .map(|r| format!("`{}`: {}", r.command, r.decision.message().unwrap_or_default()))
            .unwrap_or_default(),
        Behavior::Ask | Behavior::Passthrough => {
            let asking: Vec<String> = results
                .iter()
                .filter(|r| matches!(r.decision.behavior(), Behavior::Ask | Behavior::Passthrough))
                .map(|r| format!("`{}`", r.command))
                .collect();
            format!("approval needed for {}", asking.join(", "))
        }
    };
    let suggestions = if worst == Behavior::Ask {
        subcommand_suggestions(tool_id, &results)
    } else {
        Vec::new()
    };

    let reason = Some(DecisionReason::SubcommandResults { results });
    match worst {
        Behavior::Deny => PermissionDecision::deny(message, reason),
        Behavior::Ask => PermissionDecision::ask(message, suggestions, reason),
        Behavior::Passthrough => PermissionDecision::passthrough(message, reason),
        Behavior::Allow => PermissionDecision::allow(reason),
    }
}

/// Updates offered for a compound `ask`: each asking sub-command's own
/// suggestions plus an allow rule per passthrough sub-command, deduplicated.
#[must_use]
pub fn subcommand_suggestions(tool_id: &str, results: &[SubcommandResult]) -> Vec<PermissionUpdate> {
    let mut suggestions: Vec<PermissionUpdate> = Vec::new();
    for r in results {
        let extra = match r.decision.behavior() {
            Behavior::Ask => r.decision.suggestions().to_vec(),
            Behavior::Passthrough => vec![allow_rule(tool_id, &r.command)],
            Behavior::Allow | Behavior::Deny => Vec::new(),
        };
        for s in extra {
            if !suggestions.contains(&s) {
                suggestions.push(s);
            }
        }
    }
    suggestions
}

/// Suggestion that would allow `command` for `tool_id` from now on.
#[must_use]
pub fn allow_rule(tool_id: &str, command: &str) -> PermissionUpdate {
    PermissionUpdate::AddRule {
        tool_id: tool_id.to_owned(),
        pattern: glob::Pattern::escape(command.trim()),
        action: keel_tools::PermissionAction::Allow,
    }
}
