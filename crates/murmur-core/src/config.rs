use crate::{MurmurError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub storage: StorageConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Which adapter to use: "openai" or "mock"
    pub provider: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: Option<f32>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub chats_dir: PathBuf,
    /// The reserved "New Chat" template. Saving to it forks a new transcript.
    pub default_template: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub checkpoint_interval_ms: u64,
    /// Send tool results back to the model for a follow-up turn.
    pub feed_tool_results: bool,
    pub max_tool_rounds: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            api_key: None,
            base_url: None,
            model: "gpt-4".to_string(),
            temperature: Some(0.7),
            timeout_seconds: 30,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        match ProjectDirs::from("com", "murmur", "murmur") {
            Some(dirs) => Self {
                chats_dir: dirs.data_dir().join("chats"),
                default_template: dirs.config_dir().join("default.json"),
            },
            None => Self {
                chats_dir: PathBuf::from("chats"),
                default_template: PathBuf::from("config/default.json"),
            },
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval_ms: 3000,
            feed_tool_results: false,
            max_tool_rounds: 4,
        }
    }
}

impl SessionConfig {
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms)
    }
}

impl Config {
    pub async fn load(config_path: Option<&Path>) -> Result<Self> {
        let config_file = match config_path {
            Some(path) => path.to_path_buf(),
            None => Self::default_config_path()?,
        };

        let mut config = if config_file.exists() {
            info!("Loading config from: {}", config_file.display());
            let content = tokio::fs::read_to_string(&config_file).await?;
            toml::from_str::<Config>(&content).map_err(|e| MurmurError::Config {
                message: format!("Failed to parse {}: {}", config_file.display(), e),
            })?
        } else {
            info!("No config file found, using defaults");
            Self::default()
        };

        config.load_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn default_config_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("com", "murmur", "murmur").ok_or_else(|| MurmurError::Config {
                message: "Could not determine config directory".to_string(),
            })?;

        Ok(project_dirs.config_dir().join("config.toml"))
    }

    pub fn load_env_overrides(&mut self) {
        if let Ok(provider) = std::env::var("MURMUR_PROVIDER") {
            self.provider.provider = provider;
        }
        if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
            self.provider.api_key = Some(api_key);
        }
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            self.provider.base_url = Some(base_url);
        }
        if let Ok(model) = std::env::var("MURMUR_MODEL") {
            self.provider.model = model;
        }
        if let Ok(dir) = std::env::var("MURMUR_CHATS_DIR") {
            self.storage.chats_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.provider.model.is_empty() {
            return Err(MurmurError::Config {
                message: "provider.model must be specified".to_string(),
            });
        }

        if let Some(base_url) = &self.provider.base_url {
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                return Err(MurmurError::Config {
                    message: "provider.base_url must start with http:// or https://".to_string(),
                });
            }
        }

        if self.provider.timeout_seconds == 0 {
            return Err(MurmurError::Config {
                message: "provider.timeout_seconds must be greater than 0".to_string(),
            });
        }

        if self.session.checkpoint_interval_ms == 0 {
            return Err(MurmurError::Config {
                message: "session.checkpoint_interval_ms must be greater than 0".to_string(),
            });
        }

        if self.session.max_tool_rounds == 0 {
            return Err(MurmurError::Config {
                message: "session.max_tool_rounds must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}
