//! Ordered, permission-gated execution of a batch of tool calls.

pub mod entry;
pub mod error;
pub mod queue;

pub use entry::{CallOutcome, EntryState, QueueEntry};
pub use error::SchedulerError;
pub use queue::{BatchReport, CallResult, DEFAULT_CHUNK_BUFFER, QueueEvent, ToolUseQueue};
