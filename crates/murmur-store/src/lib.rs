//! # Murmur Store
//!
//! File-backed persistence for chat transcripts.
//!
//! ## Features
//!
//! - **JSON documents**: one pretty-printed `{title, messages}` file per transcript
//! - **Atomic writes**: readers never observe a half-written document
//! - **Default template**: saving the reserved "New Chat" slot forks a new,
//!   timestamp-named transcript instead of overwriting the template
//! - **Store events**: subscribers learn about forks, deletions, and list changes
//! - **File watching**: [`TranscriptWatcher`] reports external edits to one transcript
//!
//! ## Usage
//!
//! ```rust,no_run
//! use murmur_core::repository::{SaveMode, TranscriptRepository};
//! use murmur_core::Message;
//! use murmur_store::TranscriptStore;
//!
//! #[tokio::main]
//! async fn main() -> murmur_core::Result<()> {
//!     let store = TranscriptStore::new("chats", "config/default.json");
//!     let template = store.ensure_default_template().await?;
//!
//!     let mut transcript = store.load(&template).await?;
//!     transcript.push(Message::user("What's the weather in Paris?"));
//!
//!     // Forks into chats/chat_<timestamp>.json
//!     let saved = store.save(&template, &transcript, SaveMode::Full).await?;
//!     println!("saved to {}", saved.id);
//!     Ok(())
//! }
//! ```

pub mod store;
pub mod watcher;

pub use store::{StoreEvent, TranscriptStore, DEFAULT_SYSTEM_PROMPT, DEFAULT_TITLE};
pub use watcher::{TranscriptChange, TranscriptWatcher};
