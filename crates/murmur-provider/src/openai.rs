use crate::error::{ProviderError, Result};
use crate::models::*;
use crate::streaming::SseStream;
use async_trait::async_trait;
use murmur_core::config::ProviderConfig;
use murmur_core::provider::{CompletionAdapter, EventStream, HistoryMessage, ToolSpec};
use reqwest::{header, Client, Response};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, instrument};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI API client configuration
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub timeout: Duration,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: "gpt-4".to_string(),
            temperature: Some(0.7),
            timeout: Duration::from_secs(30),
        }
    }
}

impl From<&ProviderConfig> for OpenAIConfig {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            api_key: config.api_key.clone().unwrap_or_default(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }
}

/// Streaming chat-completions adapter for OpenAI-compatible endpoints.
pub struct OpenAIClient {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIClient {
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(ProviderError::Configuration {
                message: "OpenAI API key is required".to_string(),
            });
        }

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", config.api_key)).map_err(|e| {
                ProviderError::Configuration {
                    message: format!("Invalid API key format: {}", e),
                }
            })?,
        );
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static("murmur/0.1.0"),
        );

        // No overall request timeout: it would also cut off long streams.
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ProviderError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    pub fn from_provider_config(config: &ProviderConfig) -> Result<Self> {
        Self::new(config.into())
    }

    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }

    fn build_request(&self, history: Vec<HistoryMessage>, tools: Vec<ToolSpec>) -> ChatCompletionRequest {
        let tool_choice = (!tools.is_empty()).then(|| "auto".to_string());
        ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: history.into_iter().map(Into::into).collect(),
            temperature: self.config.temperature,
            stream: true,
            tools: tools.into_iter().map(Into::into).collect(),
            tool_choice,
        }
    }

    #[instrument(skip(self, request), fields(model = %request.model, messages = request.messages.len()))]
    pub async fn chat_completion_stream(&self, request: ChatCompletionRequest) -> Result<SseStream> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        debug!("Making streaming chat completion request to: {}", url);

        let response = timeout(
            self.config.timeout,
            self.client.post(&url).json(&request).send(),
        )
        .await
        .map_err(|_| ProviderError::Timeout {
            operation: "stream_chat_completion".to_string(),
            timeout_ms: self.config.timeout.as_millis() as u64,
        })?
        .map_err(|e| ProviderError::Http {
            operation: "stream_chat_completion_request".to_string(),
            source: e,
        })?;

        if !response.status().is_success() {
            return Err(parse_error_response(response).await);
        }

        Ok(SseStream::new(response))
    }
}

async fn parse_error_response(response: Response) -> ProviderError {
    let status_code = response.status().as_u16();
    match response.text().await {
        Ok(body) => error_for_status(status_code, &body),
        Err(e) => ProviderError::Http {
            operation: "read_error_response_text".to_string(),
            source: e,
        },
    }
}

/// Map a failed HTTP status and its body to a provider error.
pub fn error_for_status(status_code: u16, body: &str) -> ProviderError {
    let details = serde_json::from_str::<OpenAIError>(body).ok().map(|e| e.error);
    let message = details
        .as_ref()
        .map(|d| d.message.clone())
        .unwrap_or_else(|| body.to_string());

    match status_code {
        401 => ProviderError::Authentication { message },
        429 => ProviderError::RateLimit { message },
        400 => ProviderError::InvalidRequest { message },
        404 => {
            let model_missing = details
                .as_ref()
                .map(|d| d.code.as_deref() == Some("model_not_found"))
                .unwrap_or(false);
            if model_missing {
                ProviderError::ModelNotFound {
                    model: details.and_then(|d| d.param).unwrap_or(message),
                }
            } else {
                ProviderError::Unexpected {
                    status_code,
                    message,
                }
            }
        }
        500..=599 => ProviderError::ServerError {
            status_code,
            message,
        },
        _ => ProviderError::Unexpected {
            status_code,
            message,
        },
    }
}

#[async_trait]
impl CompletionAdapter for OpenAIClient {
    #[instrument(skip(self, history, tools), fields(model = %self.config.model, tools = tools.len()))]
    async fn open(
        &self,
        history: Vec<HistoryMessage>,
        tools: Vec<ToolSpec>,
    ) -> murmur_core::Result<EventStream> {
        info!("Opening completion stream with {} history messages", history.len());
        let request = self.build_request(history, tools);
        let stream = self.chat_completion_stream(request).await?;
        Ok(stream.into_events())
    }

    fn name(&self) -> &str {
        "openai"
    }
}
