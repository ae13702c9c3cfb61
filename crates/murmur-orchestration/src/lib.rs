//! Streaming session orchestration for Murmur.
//!
//! [`SessionManager`] runs one completion stream at a time against a stored
//! transcript: it appends a placeholder reply, folds streamed deltas into it,
//! checkpoints through [`CheckpointScheduler`], dispatches requested tools
//! through [`ToolRegistry`] and performs the final save.

pub mod checkpoint;
pub mod session;
pub mod tools;

pub use checkpoint::{CheckpointDecision, CheckpointScheduler};
pub use session::{
    filter_history, PendingToolCall, SessionManager, SessionOutcome, SessionResponse,
    SessionSettings, SessionState, SessionStatus, ToolCallAccumulator, ToolInvocation,
};
pub use tools::{ToolHandler, ToolRegistry};
