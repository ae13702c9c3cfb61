use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProviderError>;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP error during {operation}: {source}")]
    Http {
        operation: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("JSON error during {operation}: {source}")]
    Json {
        operation: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimit { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Model not found: {model}")]
    ModelNotFound { model: String },

    #[error("Server error: {status_code}, message: {message}")]
    ServerError { status_code: u16, message: String },

    #[error("Request timed out after {timeout_ms}ms during {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Stream error during {operation}: {reason}")]
    Stream { operation: String, reason: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Unexpected response ({status_code}): {message}")]
    Unexpected { status_code: u16, message: String },
}

impl From<ProviderError> for murmur_core::MurmurError {
    fn from(err: ProviderError) -> Self {
        murmur_core::MurmurError::AdapterFailure {
            message: err.to_string(),
        }
    }
}
