//! Hand-off of `ask` decisions to whoever can answer them.

use keel_tools::{BoxFuture, PermissionUpdate};
use serde::Serialize;

use crate::decision::DecisionReason;

/// Typed error for prompt bridge operations.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The prompting side went away.
    #[error("permission prompt closed")]
    Closed,

    #[error("permission prompt failed: {0}")]
    Failed(String),
}

/// One question put to the user.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionRequest {
    pub tool_use_id: String,
    pub tool_id: String,
    /// Command or path the call acts on.
    pub summary: String,
    pub message: String,
    pub reason: Option<DecisionReason>,
    pub suggestions: Vec<PermissionUpdate>,
    /// Set in `delegate` mode: the answer comes from a delegating agent, not
    /// a person at the terminal.
    pub delegated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptResponse {
    /// Run the call and persist `updates` for the rest of the session.
    Allow { updates: Vec<PermissionUpdate> },
    Deny { message: Option<String> },
}

impl PromptResponse {
    #[must_use]
    pub fn allow_once() -> Self {
        Self::Allow {
            updates: Vec::new(),
        }
    }
}

/// Resolves `ask` decisions. Calls are made one at a time.
pub trait PermissionPrompter: Send + Sync {
    fn request_decision<'a>(
        &'a self,
        request: PermissionRequest,
    ) -> BoxFuture<'a, Result<PromptResponse, BridgeError>>;
}

/// Headless prompter that refuses everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAllPrompter;

impl PermissionPrompter for DenyAllPrompter {
    fn request_decision<'a>(
        &'a self,
        request: PermissionRequest,
    ) -> BoxFuture<'a, Result<PromptResponse, BridgeError>> {
        Box::pin(async move {
            tracing::info!(tool = %request.tool_id, summary = %request.summary, "no interactive prompt, denying");
            Ok(PromptResponse::Deny {
                message: Some("no interactive prompt available".to_owned()),
            })
        })
    }
}
