//! Telemetry configuration

use crate::{Error, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::Level;

/// Main telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Global enable/disable toggle
    pub enabled: bool,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,

    pub format: LogFormat,

    /// Enable console logging (stderr)
    pub console_enabled: bool,

    /// Enable daily log files
    pub file_enabled: bool,

    /// Directory for log files
    pub log_dir: PathBuf,

    /// Prefix for log files; the date is appended per day
    pub log_file_name: String,

    /// Include source file and line
    pub include_location: bool,

    /// Include thread names/IDs
    pub include_thread_info: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "TRACE" => Ok(LogLevel::Trace),
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            other => Err(Error::Config {
                message: format!("Unknown log level: {}", other),
            }),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&Level::from(*self), f)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Structured JSON format
    Json,
    /// Human-readable pretty format
    Pretty,
    /// Compact single-line format
    Compact,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            other => Err(Error::Config {
                message: format!("Unknown log format: {}", other),
            }),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let log_dir = TelemetryConfig::default_log_dir().unwrap_or_else(|_| PathBuf::from("./logs"));

        Self {
            level: LogLevel::Warn,
            format: LogFormat::Compact,
            console_enabled: true,
            file_enabled: false,
            log_dir,
            log_file_name: "murmur.log".to_string(),
            include_location: false,
            include_thread_info: false,
        }
    }
}

impl TelemetryConfig {
    /// Load configuration from file, falling back to defaults. Environment
    /// overrides are applied either way.
    pub async fn load(config_path: Option<&Path>) -> Result<Self> {
        let config_file = match config_path {
            Some(path) => path.to_path_buf(),
            None => Self::default_config_path()?,
        };

        let mut config = if config_file.exists() {
            let content = tokio::fs::read_to_string(&config_file).await?;
            toml::from_str(&content).map_err(|e| Error::Config {
                message: format!("Failed to parse telemetry config: {}", e),
            })?
        } else {
            Self::default()
        };

        config.load_env_overrides();
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, config_path: Option<&Path>) -> Result<()> {
        let config_file = match config_path {
            Some(path) => path.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if let Some(parent) = config_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| Error::Config {
            message: format!("Failed to serialize telemetry config: {}", e),
        })?;

        tokio::fs::write(&config_file, content).await?;
        Ok(())
    }

    /// Apply `MURMUR_*` environment overrides. Unparseable values are ignored.
    pub fn load_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("MURMUR_TELEMETRY_ENABLED") {
            self.enabled = enabled.parse().unwrap_or(self.enabled);
        }

        if let Ok(level) = std::env::var("MURMUR_LOG_LEVEL") {
            self.logging.level = level.parse().unwrap_or(self.logging.level);
        }

        if let Ok(format) = std::env::var("MURMUR_LOG_FORMAT") {
            self.logging.format = format.parse().unwrap_or(self.logging.format);
        }

        if let Ok(enabled) = std::env::var("MURMUR_FILE_LOGGING") {
            self.logging.file_enabled = enabled.parse().unwrap_or(self.logging.file_enabled);
        }

        if let Ok(dir) = std::env::var("MURMUR_LOG_DIR") {
            self.logging.log_dir = PathBuf::from(dir);
        }
    }

    fn default_config_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("com", "murmur", "murmur").ok_or_else(|| Error::Config {
                message: "Could not determine config directory".to_string(),
            })?;

        Ok(project_dirs.config_dir().join("telemetry.toml"))
    }

    fn default_log_dir() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("com", "murmur", "murmur").ok_or_else(|| Error::Config {
                message: "Could not determine log directory".to_string(),
            })?;

        Ok(project_dirs.data_dir().join("logs"))
    }

    /// Validate configuration. Creates the log directory when file logging is on.
    pub fn validate(&self) -> Result<()> {
        if self.logging.log_file_name.trim().is_empty() {
            return Err(Error::Config {
                message: "log_file_name must not be empty".to_string(),
            });
        }

        if self.enabled && self.logging.file_enabled {
            std::fs::create_dir_all(&self.logging.log_dir)?;

            let probe = self.logging.log_dir.join(".murmur_probe");
            std::fs::write(&probe, "probe")?;
            std::fs::remove_file(&probe)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_parse_level_and_format() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!(" WARNING ".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());

        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!(LogLevel::Info.to_string(), "INFO");
    }

    #[tokio::test]
    #[serial]
    async fn test_config_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("telemetry.toml");

        let mut original = TelemetryConfig::default();
        original.logging.level = LogLevel::Trace;
        original.logging.format = LogFormat::Json;
        original.save(Some(&config_path)).await.unwrap();

        let written = std::fs::read_to_string(&config_path).unwrap();
        assert!(written.contains("level = \"trace\""));

        let loaded = TelemetryConfig::load(Some(&config_path)).await.unwrap();
        assert_eq!(loaded.logging.level, LogLevel::Trace);
        assert_eq!(loaded.logging.format, LogFormat::Json);
    }

    #[tokio::test]
    #[serial]
    async fn test_partial_file_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("telemetry.toml");
        std::fs::write(&config_path, "[logging]\nformat = \"pretty\"\n").unwrap();

        let loaded = TelemetryConfig::load(Some(&config_path)).await.unwrap();
        assert!(loaded.enabled);
        assert_eq!(loaded.logging.format, LogFormat::Pretty);
        assert_eq!(loaded.logging.level, LogLevel::Warn);
        assert_eq!(loaded.logging.log_file_name, "murmur.log");
    }

    #[tokio::test]
    #[serial]
    async fn test_invalid_file_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("telemetry.toml");
        std::fs::write(&config_path, "logging = 3").unwrap();

        let err = TelemetryConfig::load(Some(&config_path)).await.unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("MURMUR_LOG_LEVEL", "DEBUG");
        std::env::set_var("MURMUR_LOG_FORMAT", "json");
        std::env::set_var("MURMUR_FILE_LOGGING", "true");
        std::env::set_var("MURMUR_LOG_DIR", "/tmp/murmur-logs");

        let mut config = TelemetryConfig::default();
        config.load_env_overrides();

        std::env::remove_var("MURMUR_LOG_LEVEL");
        std::env::remove_var("MURMUR_LOG_FORMAT");
        std::env::remove_var("MURMUR_FILE_LOGGING");
        std::env::remove_var("MURMUR_LOG_DIR");

        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.logging.file_enabled);
        assert_eq!(config.logging.log_dir, PathBuf::from("/tmp/murmur-logs"));
    }

    #[test]
    #[serial]
    fn test_bad_env_values_ignored() {
        std::env::set_var("MURMUR_LOG_LEVEL", "shouty");
        std::env::set_var("MURMUR_FILE_LOGGING", "maybe");

        let mut config = TelemetryConfig::default();
        config.load_env_overrides();

        std::env::remove_var("MURMUR_LOG_LEVEL");
        std::env::remove_var("MURMUR_FILE_LOGGING");

        assert_eq!(config.logging.level, LogLevel::Warn);
        assert!(!config.logging.file_enabled);
    }

    #[test]
    fn test_config_validation() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = TelemetryConfig::default();
        config.logging.file_enabled = true;
        config.logging.log_dir = temp_dir.path().join("nested").join("logs");

        config.validate().unwrap();
        assert!(config.logging.log_dir.is_dir());

        config.logging.log_file_name = " ".to_string();
        assert!(config.validate().is_err());
    }
}
