use crate::error::{ProviderError, Result};
use crate::mock::MockCompletionAdapter;
use crate::openai::OpenAIClient;
use murmur_core::config::ProviderConfig;
use murmur_core::provider::CompletionAdapter;
use std::sync::Arc;
use tracing::{info, warn};

/// Factory for creating completion adapters
pub struct AdapterFactory;

impl AdapterFactory {
    /// Create an adapter based on configuration
    pub fn create(config: &ProviderConfig) -> Result<Arc<dyn CompletionAdapter>> {
        Self::validate_config(config)?;

        match config.provider.as_str() {
            "mock" => {
                info!("Using mock completion adapter");
                Ok(Arc::new(MockCompletionAdapter))
            }
            "openai" if has_api_key(config) => {
                info!("Creating OpenAI completion adapter");
                let client = OpenAIClient::from_provider_config(config)?;
                Ok(Arc::new(client))
            }
            "openai" => {
                warn!("No API key supplied; falling back to mock completion adapter");
                Ok(Arc::new(MockCompletionAdapter))
            }
            other => Err(ProviderError::Configuration {
                message: format!("Unknown provider: {}", other),
            }),
        }
    }

    /// Validate provider configuration
    pub fn validate_config(config: &ProviderConfig) -> Result<()> {
        if config.model.is_empty() {
            return Err(ProviderError::Configuration {
                message: "Model must be specified".to_string(),
            });
        }

        if config.timeout_seconds == 0 {
            return Err(ProviderError::Configuration {
                message: "Timeout must be greater than 0 seconds".to_string(),
            });
        }

        if let Some(base_url) = &config.base_url {
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                return Err(ProviderError::Configuration {
                    message: "Base URL must start with http:// or https://".to_string(),
                });
            }
        }

        Ok(())
    }
}

fn has_api_key(config: &ProviderConfig) -> bool {
    config
        .api_key
        .as_deref()
        .map(|key| !key.trim().is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(api_key: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            api_key: api_key.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_config_missing_api_key() {
        assert!(AdapterFactory::validate_config(&config(None)).is_ok());
    }

    #[test]
    fn test_validate_config_empty_model() {
        let mut config = config(Some("test-key"));
        config.model = String::new();
        assert!(AdapterFactory::validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_config_zero_timeout() {
        let mut config = config(Some("test-key"));
        config.timeout_seconds = 0;
        assert!(matches!(
            AdapterFactory::validate_config(&config),
            Err(ProviderError::Configuration { .. })
        ));
        assert!(AdapterFactory::create(&config).is_err());
    }

    #[test]
    fn test_validate_config_invalid_base_url() {
        let mut config = config(Some("test-key"));
        config.base_url = Some("invalid-url".to_string());
        assert!(AdapterFactory::validate_config(&config).is_err());
    }

    #[test]
    fn test_create_selects_adapter() {
        assert_eq!(AdapterFactory::create(&config(None)).unwrap().name(), "mock");
        assert_eq!(AdapterFactory::create(&config(Some("  "))).unwrap().name(), "mock");
        assert_eq!(
            AdapterFactory::create(&config(Some("sk-test"))).unwrap().name(),
            "openai"
        );

        let mut mock = config(Some("sk-test"));
        mock.provider = "mock".to_string();
        assert_eq!(AdapterFactory::create(&mock).unwrap().name(), "mock");
    }

    #[test]
    fn test_create_unknown_provider() {
        let mut config = config(None);
        config.provider = "carrier-pigeon".to_string();
        assert!(AdapterFactory::create(&config).is_err());
    }
}
