//! # Murmur Telemetry
//!
//! Logging setup shared by the Murmur binaries.
//!
//! - Structured console output in JSON, pretty or compact form
//! - Optional daily log files written off the hot path
//! - Level from config, environment, or `RUST_LOG`
//!
//! ```no_run
//! use murmur_telemetry::{TelemetryConfig, TelemetrySystem};
//!
//! #[tokio::main]
//! async fn main() -> murmur_telemetry::Result<()> {
//!     let config = TelemetryConfig::load(None).await?;
//!     let _guard = TelemetrySystem::init(&config)?;
//!
//!     tracing::info!("Application started");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod system;

pub use config::{LogFormat, LogLevel, LoggingConfig, TelemetryConfig};
pub use system::{TelemetryGuard, TelemetrySystem};

/// Result type for telemetry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Telemetry-specific errors
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Telemetry system error: {message}")]
    System { message: String },
}
