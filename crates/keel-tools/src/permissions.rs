use std::collections::HashMap;

use glob::Pattern;
use serde::{Deserialize, Serialize};

/// Action a permission rule resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionAction {
    Allow,
    Ask,
    Deny,
}

impl PermissionAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Ask => "ask",
            Self::Deny => "deny",
        }
    }
}

/// Single permission rule: glob `pattern` + action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRule {
    pub pattern: String,
    pub action: PermissionAction,
}

impl PermissionRule {
    fn matches(&self, normalized_input: &str) -> bool {
        Pattern::new(&self.pattern.to_lowercase()).is_ok_and(|pat| pat.matches(normalized_input))
    }
}

/// Tool permission policy: maps `tool_id` to an ordered list of rules.
///
/// Rules are tiered: any matching `deny` beats any matching `ask`, which beats
/// any matching `allow`. Within a tier the first match in declaration order is
/// reported. Input matching is case-insensitive; tool ids are not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionPolicy {
    rules: HashMap<String, Vec<PermissionRule>>,
}

impl PermissionPolicy {
    #[must_use]
    pub fn new(rules: HashMap<String, Vec<PermissionRule>>) -> Self {
        Self { rules }
    }

    /// Highest-precedence rule matching `input`, if any.
    #[must_use]
    pub fn find(&self, tool_id: &str, input: &str) -> Option<&PermissionRule> {
        let rules = self.rules.get(tool_id)?;
        let normalized = input.to_lowercase();
        [
            PermissionAction::Deny,
            PermissionAction::Ask,
            PermissionAction::Allow,
        ]
        .into_iter()
        .find_map(|tier| {
            rules
                .iter()
                .find(|r| r.action == tier && r.matches(&normalized))
        })
    }

    /// Action for a tool invocation; `Ask` when no rule matches.
    #[must_use]
    pub fn check(&self, tool_id: &str, input: &str) -> PermissionAction {
        self.find(tool_id, input)
            .map_or(PermissionAction::Ask, |r| r.action)
    }

    /// Append a rule for `tool_id`, ignoring exact duplicates.
    pub fn add_rule(&mut self, tool_id: &str, rule: PermissionRule) {
        let rules = self.rules.entry(tool_id.to_owned()).or_default();
        if !rules.contains(&rule) {
            rules.push(rule);
        }
    }

    #[must_use]
    pub fn rules(&self) -> &HashMap<String, Vec<PermissionRule>> {
        &self.rules
    }
}

/// TOML-deserializable permissions config section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PermissionsConfig {
    #[serde(flatten)]
    pub tools: HashMap<String, Vec<PermissionRule>>,
}

impl From<PermissionsConfig> for PermissionPolicy {
    fn from(config: PermissionsConfig) -> Self {
        let mut policy = Self::default();
        for (tool_id, rules) in config.tools {
            for rule in rules {
                if Pattern::new(&rule.pattern).is_err() {
                    tracing::warn!(tool = %tool_id, pattern = %rule.pattern, "skipping invalid permission pattern");
                    continue;
                }
                policy.add_rule(&tool_id, rule);
            }
        }
        policy
    }
}
