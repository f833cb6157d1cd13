//! Terminal prompt bridge.

use dialoguer::{Input, Select};
use keel_core::{BridgeError, PermissionPrompter, PermissionRequest, PromptResponse};
use keel_tools::{BoxFuture, PermissionUpdate};

/// Asks the person at the terminal. Each prompt blocks a worker thread, not
/// the runtime.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TerminalPrompter;

impl PermissionPrompter for TerminalPrompter {
    fn request_decision<'a>(
        &'a self,
        request: PermissionRequest,
    ) -> BoxFuture<'a, Result<PromptResponse, BridgeError>> {
        Box::pin(async move {
            tokio::task::spawn_blocking(move || ask(&request))
                .await
                .map_err(|e| BridgeError::Failed(e.to_string()))?
        })
    }
}

fn ask(request: &PermissionRequest) -> Result<PromptResponse, BridgeError> {
    let who = if request.delegated {
        "delegated call"
    } else {
        "tool call"
    };
    eprintln!("\n{who} `{}`: {}", request.tool_id, request.summary);
    if !request.message.is_empty() {
        eprintln!("  {}", request.message);
    }

    let mut choices = vec!["Allow once".to_owned()];
    if !request.suggestions.is_empty() {
        let remembered: Vec<String> = request.suggestions.iter().map(describe).collect();
        choices.push(format!("Allow and remember: {}", remembered.join(", ")));
    }
    choices.push("Deny".to_owned());

    let picked = Select::new()
        .with_prompt("Allow this call?")
        .items(&choices)
        .default(0)
        .interact()
        .map_err(|e| BridgeError::Failed(e.to_string()))?;

    if picked + 1 == choices.len() {
        let reason: String = Input::new()
            .with_prompt("Reason (optional)")
            .allow_empty(true)
            .interact_text()
            .map_err(|e| BridgeError::Failed(e.to_string()))?;
        let reason = reason.trim();
        return Ok(PromptResponse::Deny {
            message: (!reason.is_empty()).then(|| reason.to_owned()),
        });
    }
    Ok(PromptResponse::Allow {
        updates: if picked == 0 {
            Vec::new()
        } else {
            request.suggestions.clone()
        },
    })
}

fn describe(update: &PermissionUpdate) -> String {
    match update {
        PermissionUpdate::AddRule {
            tool_id,
            pattern,
            action,
        } => format!("{} {tool_id}({pattern})", action.as_str()),
        PermissionUpdate::AddWriteDirectory { path } => format!("write to {path}"),
        PermissionUpdate::SetMode { mode } => format!("switch to {mode} mode"),
    }
}

#[cfg(test)]
mod tests {
    use keel_tools::{PermissionAction, PermissionMode};

    use super::*;

    #[test]
    fn describes_suggestions() {
        assert_eq!(
            describe(&PermissionUpdate::AddRule {
                tool_id: "bash".into(),
                pattern: "cargo test".into(),
                action: PermissionAction::Allow,
            }),
            "allow bash(cargo test)"
        );
        assert_eq!(
            describe(&PermissionUpdate::AddWriteDirectory {
                path: "/opt/out".into()
            }),
            "write to /opt/out"
        );
        assert_eq!(
            describe(&PermissionUpdate::SetMode {
                mode: PermissionMode::AcceptEdits
            }),
            "switch to accept-edits mode"
        );
    }
}
