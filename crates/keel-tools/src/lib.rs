//! Tool contract, shell command analysis, path validation and sandboxing.

pub mod audit;
pub mod config;
pub mod context;
pub mod executor;
pub mod file;
pub mod permissions;
pub mod registry;
pub mod sandbox;
pub mod shell;

pub use audit::{AuditEntry, AuditLogger, AuditResult};
pub use config::{AuditConfig, SandboxConfig, ShellConfig, ToolsConfig};
pub use context::{
    ContextModifier, ContextSnapshot, ExecutionContext, PermissionContext, PermissionMode,
    PermissionUpdate,
};
pub use executor::{
    BoxFuture, FailureKind, MAX_TOOL_OUTPUT_CHARS, PermissionTarget, ToolCallRequest, ToolChunk,
    ToolContext, ToolDescriptor, ToolError, ToolFailure, ToolOutput, ValidationError,
    truncate_tool_output,
};
pub use file::{EditTool, GlobTool, GrepTool, ReadTool, WriteTool, file_tools};
pub use permissions::{PermissionAction, PermissionPolicy, PermissionRule, PermissionsConfig};
pub use registry::{ToolDef, ToolRegistry};
pub use sandbox::{
    AccessMode, PathValidator, PathViolation, SandboxCommandBuilder, SandboxError, SandboxPolicy,
};
pub use shell::ShellTool;
pub use shell::classify::{BlockedCommand, Classification, CommandClassifier, Severity};
pub use shell::parse::{ParseError, SubcommandSpan, split};
