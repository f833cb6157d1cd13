//! The contract every tool implements and the values that flow through it.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::context::{ContextModifier, ContextSnapshot};
use crate::registry::ToolDef;
use crate::sandbox::{PathViolation, SandboxError};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One requested invocation within a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub tool_use_id: String,
    pub tool_id: String,
    #[serde(default)]
    pub input: serde_json::Value,
    /// Position within the batch; results are delivered in this order.
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub turn_id: String,
}

/// Structured result from tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub tool_name: String,
    pub summary: String,
    /// Applied by the scheduler once this result is finalized.
    pub context_modifiers: Vec<ContextModifier>,
}

impl ToolOutput {
    #[must_use]
    pub fn new(tool_name: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            summary: summary.into(),
            context_modifiers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_modifier(mut self, modifier: ContextModifier) -> Self {
        self.context_modifiers.push(modifier);
        self
    }
}

impl fmt::Display for ToolOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary)
    }
}

pub const MAX_TOOL_OUTPUT_CHARS: usize = 30_000;

/// Truncate tool output that exceeds `MAX_TOOL_OUTPUT_CHARS` using head+tail split.
#[must_use]
pub fn truncate_tool_output(output: &str) -> String {
    if output.len() <= MAX_TOOL_OUTPUT_CHARS {
        return output.to_string();
    }

    let half = MAX_TOOL_OUTPUT_CHARS / 2;
    let head_end = (0..=half)
        .rev()
        .find(|&i| output.is_char_boundary(i))
        .unwrap_or(0);
    let tail_start = (output.len() - half..=output.len())
        .find(|&i| output.is_char_boundary(i))
        .unwrap_or(output.len());
    let head = &output[..head_end];
    let tail = &output[tail_start..];
    let truncated = tail_start - head_end;

    format!(
        "{head}\n\n... [truncated {truncated} chars, showing first and last ~{half} chars] ...\n\n{tail}"
    )
}

/// Why a call ended without a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureKind {
    Validation { error_code: u32 },
    PermissionDenied,
    Sandbox,
    Execution,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ToolFailure {
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "cancelled by user")
    }
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// What a running call sends back: any number of progress chunks, then
/// exactly one terminal chunk.
#[derive(Debug, Clone)]
pub enum ToolChunk {
    Progress(String),
    Result(ToolOutput),
    Failed(ToolFailure),
}

impl ToolChunk {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress(_))
    }
}

/// Input rejected before any permission check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
    pub error_code: u32,
}

impl ValidationError {
    pub const INVALID_INPUT: u32 = 1;
    pub const STALE_FILE: u32 = 2;
    pub const TOOL_NOT_ALLOWED: u32 = 3;
    pub const UNKNOWN_TOOL: u32 = 4;

    #[must_use]
    pub fn new(error_code: u32, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_code,
        }
    }
}

impl From<ValidationError> for ToolFailure {
    fn from(err: ValidationError) -> Self {
        Self::new(
            FailureKind::Validation {
                error_code: err.error_code,
            },
            err.message,
        )
    }
}

/// Errors that can occur during tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("command blocked by policy: {command}")]
    Blocked { command: String },

    #[error("path not allowed by sandbox: {0}")]
    SandboxViolation(#[from] PathViolation),

    #[error("sandbox setup failed: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("command timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid tool parameters: {message}")]
    InvalidParams { message: String },

    #[error("{path} was modified since it was last read")]
    StaleFile { path: String },

    #[error("execution failed: {0}")]
    Execution(#[from] std::io::Error),
}

impl ToolError {
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Blocked { .. } | Self::SandboxViolation(_) => FailureKind::PermissionDenied,
            Self::Sandbox(_) => FailureKind::Sandbox,
            Self::Cancelled => FailureKind::Cancelled,
            Self::InvalidParams { .. } => FailureKind::Validation {
                error_code: ValidationError::INVALID_INPUT,
            },
            Self::StaleFile { .. } => FailureKind::Validation {
                error_code: ValidationError::STALE_FILE,
            },
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Execution(_) => FailureKind::Execution,
        }
    }
}

impl From<ToolError> for ToolFailure {
    fn from(err: ToolError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// Deserialize a tool's JSON input into its typed parameter struct.
///
/// # Errors
///
/// Returns `ToolError::InvalidParams` when deserialization fails.
pub fn deserialize_params<T: serde::de::DeserializeOwned>(
    input: &serde_json::Value,
) -> Result<T, ToolError> {
    T::deserialize(input).map_err(|e| ToolError::InvalidParams {
        message: e.to_string(),
    })
}

/// What the permission engine should check for a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionTarget {
    None,
    /// A shell command line, analysed sub-command by sub-command.
    Command(String),
    Paths { read: Vec<String>, write: Vec<String> },
}

/// Per-call handle passed to [`ToolDescriptor::execute`].
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub tool_use_id: String,
    pub cancel: CancellationToken,
    pub snapshot: Arc<ContextSnapshot>,
    progress: mpsc::Sender<ToolChunk>,
}

impl ToolContext {
    #[must_use]
    pub fn new(
        tool_use_id: impl Into<String>,
        cancel: CancellationToken,
        snapshot: Arc<ContextSnapshot>,
        progress: mpsc::Sender<ToolChunk>,
    ) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            cancel,
            snapshot,
            progress,
        }
    }

    /// Send a progress chunk. Waits when the consumer is behind; a closed
    /// channel is ignored.
    pub async fn progress(&self, text: impl Into<String>) {
        let _ = self.progress.send(ToolChunk::Progress(text.into())).await;
    }
}

/// Uniform interface over concrete tools.
///
/// Flags may depend on the input. The scheduler and permission engine query
/// them; nothing mutates a descriptor.
pub trait ToolDescriptor: Send + Sync {
    fn id(&self) -> &'static str;

    fn definition(&self) -> ToolDef;

    /// Check input shape and semantics against the current context.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] with a stable `error_code`.
    fn validate_input(
        &self,
        input: &serde_json::Value,
        ctx: &ContextSnapshot,
    ) -> Result<(), ValidationError>;

    fn is_read_only(&self, input: &serde_json::Value) -> bool;

    fn is_concurrency_safe(&self, input: &serde_json::Value) -> bool {
        self.is_read_only(input)
    }

    fn needs_permissions(&self, input: &serde_json::Value) -> bool {
        !self.is_read_only(input)
    }

    fn requires_user_interaction(&self) -> bool {
        false
    }

    fn permission_target(&self, _input: &serde_json::Value) -> PermissionTarget {
        PermissionTarget::None
    }

    /// Text matched against permission rules and shown in prompts.
    fn summarize(&self, input: &serde_json::Value) -> String {
        input.to_string()
    }

    fn execute<'a>(
        &'a self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'a, Result<ToolOutput, ToolError>>;
}

/// Shared validation for tools with a typed parameter struct.
///
/// # Errors
///
/// Returns a [`ValidationError::INVALID_INPUT`] error when `input` does not
/// deserialize into `T`.
pub fn validate_params<T: serde::de::DeserializeOwned>(
    input: &serde_json::Value,
) -> Result<T, ValidationError> {
    deserialize_params(input).map_err(|e| ValidationError::new(ValidationError::INVALID_INPUT, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ViolationKind;

    #[test]
    fn tool_output_display() {
        let output = ToolOutput::new("bash", "$ echo hello\nhello");
        assert_eq!(output.to_string(), "$ echo hello\nhello");
        assert!(output.context_modifiers.is_empty());
    }

    #[test]
    fn tool_error_blocked_display() {
        let err = ToolError::Blocked {
            command: "rm -rf /".to_owned(),
        };
        assert_eq!(err.to_string(), "command blocked by policy: rm -rf /");
        assert_eq!(err.kind(), FailureKind::PermissionDenied);
    }

    #[test]
    fn tool_error_sandbox_violation_kind() {
        let err = ToolError::from(PathViolation {
            requested: "/etc/shadow".into(),
            path: "/etc/shadow".into(),
            kind: ViolationKind::OutsideWriteAllow,
        });
        assert!(err.to_string().starts_with("path not allowed by sandbox:"));
        assert_eq!(err.kind(), FailureKind::PermissionDenied);
    }

    #[test]
    fn tool_error_kinds() {
        assert_eq!(
            ToolError::Sandbox(SandboxError::RelativePath { path: "x".into() }).kind(),
            FailureKind::Sandbox
        );
        assert_eq!(ToolError::Timeout { timeout_secs: 30 }.kind(), FailureKind::Timeout);
        assert_eq!(ToolError::Cancelled.kind(), FailureKind::Cancelled);
        assert_eq!(
            ToolError::StaleFile { path: "a".into() }.kind(),
            FailureKind::Validation { error_code: 2 }
        );
    }

    #[test]
    fn tool_error_timeout_display() {
        let err = ToolError::Timeout { timeout_secs: 30 };
        assert_eq!(err.to_string(), "command timed out after 30s");
    }

    #[test]
    fn tool_error_execution_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "bash not found");
        let err = ToolError::Execution(io_err);
        assert!(err.to_string().starts_with("execution failed:"));
        assert!(err.to_string().contains("bash not found"));
    }

    #[test]
    fn validation_error_becomes_failure() {
        let failure = ToolFailure::from(ValidationError::new(
            ValidationError::UNKNOWN_TOOL,
            "unknown tool `foo`",
        ));
        assert_eq!(failure.kind, FailureKind::Validation { error_code: 4 });
        assert_eq!(failure.message, "unknown tool `foo`");
    }

    #[test]
    fn deserialize_params_valid() {
        #[derive(Debug, serde::Deserialize, PartialEq)]
        struct P {
            name: String,
            count: u32,
        }
        let p: P = deserialize_params(&serde_json::json!({"name": "test", "count": 42})).unwrap();
        assert_eq!(
            p,
            P {
                name: "test".to_owned(),
                count: 42
            }
        );
    }

    #[test]
    fn deserialize_params_missing_required_field() {
        #[derive(Debug, serde::Deserialize)]
        struct P {
            #[allow(dead_code)]
            name: String,
        }
        let err = deserialize_params::<P>(&serde_json::json!({})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams { .. }));
    }

    #[test]
    fn validate_params_uses_invalid_input_code() {
        #[derive(Debug, serde::Deserialize)]
        struct P {
            #[allow(dead_code)]
            count: u32,
        }
        let err = validate_params::<P>(&serde_json::json!({"count": "nope"})).unwrap_err();
        assert_eq!(err.error_code, ValidationError::INVALID_INPUT);
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let req: ToolCallRequest =
            serde_json::from_str(r#"{"tool_use_id": "t1", "tool_id": "bash"}"#).unwrap();
        assert_eq!(req.index, 0);
        assert!(req.input.is_null());
        assert!(req.turn_id.is_empty());
    }

    #[test]
    fn only_progress_is_non_terminal() {
        assert!(!ToolChunk::Progress("x".into()).is_terminal());
        assert!(ToolChunk::Failed(ToolFailure::cancelled()).is_terminal());
        assert!(ToolChunk::Result(ToolOutput::new("t", "s")).is_terminal());
    }

    #[test]
    fn truncate_tool_output_short_passthrough() {
        let short = "hello world";
        assert_eq!(truncate_tool_output(short), short);
    }

    #[test]
    fn truncate_tool_output_exact_limit() {
        let exact = "a".repeat(MAX_TOOL_OUTPUT_CHARS);
        assert_eq!(truncate_tool_output(&exact), exact);
    }

    #[test]
    fn truncate_tool_output_long_split() {
        let long = "x".repeat(MAX_TOOL_OUTPUT_CHARS + 1000);
        let result = truncate_tool_output(&long);
        assert!(result.contains("truncated 1000 chars"));
        assert!(result.len() < long.len());
    }

    #[test]
    fn truncate_tool_output_respects_char_boundaries() {
        let long = "é".repeat(MAX_TOOL_OUTPUT_CHARS);
        let result = truncate_tool_output(&long);
        assert!(result.contains("truncated"));
        assert!(result.starts_with('é'));
        assert!(result.ends_with('é'));
    }

    #[tokio::test]
    async fn progress_is_ignored_after_receiver_drops() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let snapshot = crate::context::ExecutionContext::new("/").snapshot();
        let ctx = ToolContext::new("t1", CancellationToken::new(), snapshot, tx);
        ctx.progress("line").await;
    }
}
