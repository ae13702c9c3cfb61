use thiserror::Error;

pub type Result<T> = std::result::Result<T, MurmurError>;

#[derive(Error, Debug)]
pub enum MurmurError {
    #[error("Transcript not found: {id}")]
    NotFound { id: String },

    #[error("Transcript {id} is not a valid chat document: {reason}")]
    CorruptFormat { id: String, reason: String },

    #[error("Completion adapter failed: {message}")]
    AdapterFailure { message: String },

    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Tool '{name}' failed: {reason}")]
    ToolFailure { name: String, reason: String },

    #[error("A session is already running for {active}")]
    SessionBusy { active: String },

    #[error("Failed to persist {id}: {reason}")]
    PersistFailure { id: String, reason: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MurmurError {
    pub fn adapter(message: impl Into<String>) -> Self {
        MurmurError::AdapterFailure {
            message: message.into(),
        }
    }

    /// True for the load failures that abort a session before any request is made.
    pub fn is_load_failure(&self) -> bool {
        matches!(
            self,
            MurmurError::NotFound { .. } | MurmurError::CorruptFormat { .. }
        )
    }
}
