//! Per-call permission decisions.
//!
//! Shell commands are split into pipelines, each classified and path-checked
//! on its own, then composed. Other tools are checked by their declared read
//! and write paths. Session mode is applied last, and an undecided call ends
//! as `ask`.

use std::path::Path;

use keel_tools::sandbox::ViolationKind;
use keel_tools::shell::access::{accessed_paths, is_read_only};
use keel_tools::shell::parse::{Pipeline, pipelines};
use keel_tools::{
    AccessMode, Classification, CommandClassifier, ContextSnapshot, PathValidator, PathViolation,
    PermissionAction, PermissionMode, PermissionRule, PermissionTarget, PermissionUpdate,
    ShellConfig, ToolCallRequest, ToolDescriptor, split,
};
use serde_json::Value;

use crate::bridge::{BridgeError, PermissionPrompter, PermissionRequest, PromptResponse};
use crate::decision::{
    Behavior, DecisionReason, PermissionDecision, SubcommandResult, allow_rule, compose,
    subcommand_suggestions,
};

/// Stateless evaluator; everything session-specific comes from the
/// [`ContextSnapshot`].
#[derive(Debug, Clone)]
pub struct PermissionEngine {
    classifier: CommandClassifier,
}

/// Outcome of a prompted `ask`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAsk {
    pub decision: PermissionDecision,
    /// Updates the user chose to keep for the rest of the session.
    pub updates: Vec<PermissionUpdate>,
}

impl Default for PermissionEngine {
    fn default() -> Self {
        Self::from_config(&ShellConfig::default())
    }
}

impl PermissionEngine {
    #[must_use]
    pub fn new(classifier: CommandClassifier) -> Self {
        Self { classifier }
    }

    #[must_use]
    pub fn from_config(config: &ShellConfig) -> Self {
        Self::new(CommandClassifier::new(config))
    }

    #[must_use]
    pub fn classifier(&self) -> &CommandClassifier {
        &self.classifier
    }

    /// Decide whether `tool` may run with `input`.
    ///
    /// Never returns `passthrough`: an undecided call is turned into `ask`
    /// with an allow-rule suggestion.
    #[must_use]
    pub fn evaluate(
        &self,
        tool: &dyn ToolDescriptor,
        input: &Value,
        ctx: &ContextSnapshot,
    ) -> PermissionDecision {
        let tool_id = tool.id();
        let mode = ctx.permissions.mode;
        let read_only = tool.is_read_only(input);

        if mode == PermissionMode::Plan && !read_only {
            return PermissionDecision::deny(
                format!("plan mode only runs read-only tools; `{tool_id}` would modify state"),
                Some(DecisionReason::Mode { mode }),
            );
        }
        if !tool.needs_permissions(input) {
            return PermissionDecision::allow(Some(DecisionReason::Other {
                text: "tool does not need permission".to_owned(),
            }));
        }

        let summary = tool.summarize(input);
        let target = tool.permission_target(input);
        let decision = match &target {
            PermissionTarget::Command(command) => self.command_decision(tool_id, command, ctx),
            PermissionTarget::Paths { read, write } => {
                path_decision(tool_id, &summary, read, write, read_only, ctx)
            }
            PermissionTarget::None => rule_decision(tool_id, &summary, read_only, ctx),
        };
        let decision = apply_mode(decision, mode, tool, &target);
        finalize(decision, tool_id, &summary, &target)
    }

    fn command_decision(
        &self,
        tool_id: &str,
        command: &str,
        ctx: &ContextSnapshot,
    ) -> PermissionDecision {
        let spans = match split(command) {
            Ok(spans) => spans,
            Err(e) => {
                return PermissionDecision::deny(
                    format!("could not parse command: {e}"),
                    Some(rule_reason("parse-error")),
                );
            }
        };
        let groups = pipelines(&spans);
        if groups.is_empty() {
            return PermissionDecision::deny(
                "empty command",
                Some(DecisionReason::Other {
                    text: "nothing to run".to_owned(),
                }),
            );
        }

        let validator = ctx.path_validator();
        let results = groups
            .iter()
            .map(|pipeline| SubcommandResult {
                command: pipeline.text(),
                decision: self.pipeline_decision(tool_id, pipeline, ctx, &validator),
            })
            .collect();
        compose(tool_id, results)
    }

    fn pipeline_decision(
        &self,
        tool_id: &str,
        pipeline: &Pipeline<'_>,
        ctx: &ContextSnapshot,
        validator: &PathValidator,
    ) -> PermissionDecision {
        if let Classification::Blocked(blocked) = self.classifier.classify_pipeline(pipeline) {
            tracing::debug!(rule = %blocked.rule, pattern = %blocked.pattern, "command blocked");
            return PermissionDecision::deny(
                format!("{}: `{}`", blocked.reason, blocked.pattern),
                Some(rule_reason(&blocked.rule)),
            );
        }

        let text = pipeline.text();
        let mut reads = Vec::new();
        let mut writes = Vec::new();
        for segment in &pipeline.segments {
            let access = accessed_paths(segment);
            reads.extend(access.read);
            writes.extend(access.write);
        }
        let checked = PathCheck {
            tool_id,
            summary: &text,
            reads: &reads,
            writes: &writes,
        };
        if let Some(decision) = checked.decide(ctx, validator) {
            return decision;
        }

        if pipeline.segments.iter().all(|s| is_read_only(s)) {
            return PermissionDecision::allow(Some(DecisionReason::Other {
                text: "read-only command".to_owned(),
            }));
        }
        if ctx.sandbox.enabled {
            return PermissionDecision::allow(Some(DecisionReason::Other {
                text: "runs inside the sandbox".to_owned(),
            }));
        }
        PermissionDecision::passthrough(format!("`{text}` runs without a sandbox"), None)
    }
}

/// Rules and path checks shared by commands and path-based tools.
struct PathCheck<'a> {
    tool_id: &'a str,
    summary: &'a str,
    reads: &'a [String],
    writes: &'a [String],
}

impl PathCheck<'_> {
    /// Decision from rules and path policy, or `None` when neither settles
    /// the call.
    ///
    /// Order: deny rule, denied path, ask rule, allow rule, write outside the
    /// allow-list.
    fn decide(&self, ctx: &ContextSnapshot, validator: &PathValidator) -> Option<PermissionDecision> {
        let matched = ctx.permissions.policy.find(self.tool_id, self.summary);
        if let Some(rule) = matched.filter(|r| r.action == PermissionAction::Deny) {
            return Some(PermissionDecision::deny(
                format!("denied by rule `{}`", rule.pattern),
                Some(user_rule_reason(self.tool_id, rule)),
            ));
        }

        let mut outside: Option<PathViolation> = None;
        for raw in self.reads {
            if let Err(violation) = validator.check(raw, AccessMode::Read) {
                return Some(PermissionDecision::deny(
                    violation.to_string(),
                    Some(rule_reason("sandbox-read-deny")),
                ));
            }
        }
        for raw in self.writes {
            match validator.check(raw, AccessMode::Write) {
                Ok(_) => {}
                Err(violation) if violation.kind == ViolationKind::OutsideWriteAllow => {
                    outside.get_or_insert(violation);
                }
                Err(violation) => {
                    return Some(PermissionDecision::deny(
                        violation.to_string(),
                        Some(rule_reason("sandbox-write-deny")),
                    ));
                }
            }
        }

        match matched {
            Some(rule) if rule.action == PermissionAction::Ask => {
                return Some(PermissionDecision::ask(
                    format!("rule `{}` asks before running `{}`", rule.pattern, self.summary),
                    Vec::new(),
                    Some(user_rule_reason(self.tool_id, rule)),
                ));
            }
            Some(rule) => {
                return Some(PermissionDecision::allow(Some(user_rule_reason(
                    self.tool_id,
                    rule,
                ))));
            }
            None => {}
        }

        outside.map(|violation| {
            let dir = violation
                .path
                .parent()
                .unwrap_or(Path::new("/"))
                .display()
                .to_string();
            PermissionDecision::ask(
                violation.to_string(),
                vec![
                    PermissionUpdate::AddWriteDirectory { path: dir },
                    allow_rule(self.tool_id, self.summary),
                ],
                Some(rule_reason("sandbox-write-allow")),
            )
        })
    }
}

fn path_decision(
    tool_id: &str,
    summary: &str,
    reads: &[String],
    writes: &[String],
    read_only: bool,
    ctx: &ContextSnapshot,
) -> PermissionDecision {
    let check = PathCheck {
        tool_id,
        summary,
        reads,
        writes,
    };
    if let Some(decision) = check.decide(ctx, &ctx.path_validator()) {
        return decision;
    }
    if read_only {
        return PermissionDecision::allow(Some(DecisionReason::Other {
            text: "read-only access".to_owned(),
        }));
    }
    PermissionDecision::passthrough(format!("`{tool_id}` wants to modify `{summary}`"), None)
}

fn rule_decision(
    tool_id: &str,
    summary: &str,
    read_only: bool,
    ctx: &ContextSnapshot,
) -> PermissionDecision {
    match ctx.permissions.policy.find(tool_id, summary) {
        Some(rule) => {
            let reason = Some(user_rule_reason(tool_id, rule));
            match rule.action {
                PermissionAction::Deny => {
                    PermissionDecision::deny(format!("denied by rule `{}`", rule.pattern), reason)
                }
                PermissionAction::Ask => PermissionDecision::ask(
                    format!("rule `{}` asks before running `{tool_id}`", rule.pattern),
                    Vec::new(),
                    reason,
                ),
                PermissionAction::Allow => PermissionDecision::allow(reason),
            }
        }
        None if read_only => PermissionDecision::allow(None),
        None => PermissionDecision::passthrough(format!("`{tool_id}` needs approval"), None),
    }
}

/// Session mode adjustments. `allow` and `deny` are final; only open
/// decisions move.
fn apply_mode(
    decision: PermissionDecision,
    mode: PermissionMode,
    tool: &dyn ToolDescriptor,
    target: &PermissionTarget,
) -> PermissionDecision {
    let behavior = decision.behavior();
    if matches!(behavior, Behavior::Allow | Behavior::Deny) {
        return decision;
    }
    let mode_reason = Some(DecisionReason::Mode { mode });
    match mode {
        PermissionMode::BypassPermissions if !tool.requires_user_interaction() => {
            PermissionDecision::allow(mode_reason)
        }
        PermissionMode::DontAsk => PermissionDecision::deny(
            format!(
                "{} (not asking in dont-ask mode)",
                decision.message().unwrap_or("approval needed")
            ),
            mode_reason,
        ),
        PermissionMode::AcceptEdits
            if behavior == Behavior::Passthrough
                && matches!(target, PermissionTarget::Paths { .. }) =>
        {
            PermissionDecision::allow(mode_reason)
        }
        _ => decision,
    }
}

fn finalize(
    decision: PermissionDecision,
    tool_id: &str,
    summary: &str,
    target: &PermissionTarget,
) -> PermissionDecision {
    let PermissionDecision::Passthrough { message, reason } = decision else {
        return decision;
    };
    let mut suggestions = match &reason {
        Some(DecisionReason::SubcommandResults { results }) => {
            subcommand_suggestions(tool_id, results)
        }
        _ => vec![allow_rule(tool_id, summary)],
    };
    if matches!(target, PermissionTarget::Paths { .. }) {
        suggestions.push(PermissionUpdate::SetMode {
            mode: PermissionMode::AcceptEdits,
        });
    }
    PermissionDecision::ask(message, suggestions, reason)
}

fn rule_reason(name: &str) -> DecisionReason {
    DecisionReason::Rule {
        name: name.to_owned(),
    }
}

fn user_rule_reason(tool_id: &str, rule: &PermissionRule) -> DecisionReason {
    rule_reason(&format!("{tool_id}({})", rule.pattern))
}

/// Build the question for an `ask` decision.
#[must_use]
pub fn permission_request(
    call: &ToolCallRequest,
    tool: &dyn ToolDescriptor,
    decision: &PermissionDecision,
    mode: PermissionMode,
) -> PermissionRequest {
    PermissionRequest {
        tool_use_id: call.tool_use_id.clone(),
        tool_id: tool.id().to_owned(),
        summary: tool.summarize(&call.input),
        message: decision.message().unwrap_or_default().to_owned(),
        reason: decision.reason().cloned(),
        suggestions: decision.suggestions().to_vec(),
        delegated: mode == PermissionMode::Delegate,
    }
}

/// Hand an `ask` to `prompter` and turn the answer into a final decision.
///
/// # Errors
///
/// Returns [`BridgeError`] when the prompter cannot answer.
pub async fn resolve_ask(
    prompter: &dyn PermissionPrompter,
    request: PermissionRequest,
) -> Result<ResolvedAsk, BridgeError> {
    let tool_id = request.tool_id.clone();
    let response = prompter.request_decision(request).await?;
    tracing::debug!(tool = %tool_id, ?response, "permission prompt answered");
    Ok(match response {
        PromptResponse::Allow { updates } => ResolvedAsk {
            decision: PermissionDecision::allow(Some(DecisionReason::Other {
                text: "approved by user".to_owned(),
            })),
            updates,
        },
        PromptResponse::Deny { message } => ResolvedAsk {
            decision: PermissionDecision::deny(
                message.unwrap_or_else(|| "denied by user".to_owned()),
                Some(DecisionReason::Other {
                    text: "rejected by user".to_owned(),
                }),
            ),
            updates: Vec::new(),
        },
    })
}
