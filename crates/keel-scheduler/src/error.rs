use keel_core::BridgeError;
use thiserror::Error;

/// Faults that cannot be pinned on a single call; the batch is abandoned.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("permission check task failed: {0}")]
    PermissionTask(String),
    #[error("permission prompt failed: {0}")]
    Bridge(#[from] BridgeError),
    #[error("tool task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}
