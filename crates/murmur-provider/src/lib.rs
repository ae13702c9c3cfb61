pub mod client;
pub mod error;
pub mod mock;
pub mod models;
pub mod openai;
pub mod streaming;

pub use client::AdapterFactory;
pub use error::ProviderError;
pub use mock::{MockCompletionAdapter, ScriptStep, ScriptedAdapter};
pub use openai::{OpenAIClient, OpenAIConfig};
