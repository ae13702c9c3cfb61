pub mod config;
pub mod error;
pub mod notification;
pub mod provider;
pub mod repository;
pub mod transcript;

pub use error::{MurmurError, Result};
pub use transcript::{Message, Role, ToolCall, Transcript, TranscriptId};
