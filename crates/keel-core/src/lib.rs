//! Permission decisions for tool calls, the prompt bridge, and session
//! configuration.

pub mod bridge;
pub mod config;
pub mod decision;
pub mod engine;

pub use bridge::{BridgeError, DenyAllPrompter, PermissionPrompter, PermissionRequest, PromptResponse};
pub use config::{Config, PermissionsSection, SchedulerConfig};
pub use decision::{
    Behavior, DecisionReason, PermissionDecision, SubcommandResult, allow_rule, compose,
};
pub use engine::{PermissionEngine, ResolvedAsk, permission_request, resolve_ask};
