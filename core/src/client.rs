use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{LlmConfig, DEFAULT_API_VERSION};
use crate::errors::{AvatarError, AvatarResult};
use crate::types::*;

/// Common trait for chat-completion backends
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Send the full conversation and return the assistant's message content
    async fn complete(&self, history: &[ChatMessage]) -> AvatarResult<String>;

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;

    /// Get the model or deployment name being used
    fn model_name(&self) -> String;
}

/// Client for an Azure OpenAI chat-completions deployment
#[derive(Debug, Clone)]
pub struct AzureChatClient {
    client: Client,
    endpoint: String,
    deployment: String,
    api_version: String,
    sampling: SamplingParams,
}

impl AzureChatClient {
    /// Create a new Azure chat client
    pub fn new(config: &LlmConfig) -> AvatarResult<Self> {
        let endpoint = required(&config.endpoint, "LLM endpoint")?;
        let api_key = required(&config.api_key, "LLM API key")?;
        let deployment = required(&config.deployment, "LLM deployment name")?;

        let mut headers = HeaderMap::new();
        let mut key_header = HeaderValue::from_str(&api_key)
            .map_err(|e| AvatarError::ConfigError(format!("Invalid API key format: {}", e)))?;
        key_header.set_sensitive(true);
        headers.insert("api-key", key_header);

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.unwrap_or(60)))
            .connect_timeout(Duration::from_secs(10))
            .default_headers(headers)
            .build()?;

        let defaults = SamplingParams::default();
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            deployment,
            api_version: config
                .api_version
                .clone()
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            sampling: SamplingParams {
                temperature: config.temperature.unwrap_or(defaults.temperature),
                top_p: config.top_p.unwrap_or(defaults.top_p),
                max_tokens: config.max_tokens.unwrap_or(defaults.max_tokens),
            },
        })
    }

    /// Build the chat-completions URL for the configured deployment
    pub fn api_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, self.api_version
        )
    }

    /// Extract the first choice's content from a response
    pub fn extract_content(response: &ChatCompletionResponse) -> AvatarResult<String> {
        let choice = response
            .choices
            .first()
            .ok_or_else(|| AvatarError::ResponseError("No choices in response".to_string()))?;

        if let Some(reason) = &choice.finish_reason {
            if reason != "stop" {
                warn!(finish_reason = %reason, "Completion did not finish cleanly");
            }
        }

        choice
            .message
            .content
            .clone()
            .ok_or_else(|| AvatarError::ResponseError("No content in choice".to_string()))
    }
}

#[async_trait]
impl ChatCompletion for AzureChatClient {
    fn provider_name(&self) -> &'static str {
        "azure-openai"
    }

    fn model_name(&self) -> String {
        self.deployment.clone()
    }

    async fn complete(&self, history: &[ChatMessage]) -> AvatarResult<String> {
        let request = ChatCompletionRequest {
            messages: history,
            sampling: self.sampling,
        };
        debug!(
            deployment = %self.deployment,
            turns = history.len(),
            "Sending chat completion request"
        );

        let response = self
            .client
            .post(self.api_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| AvatarError::RequestError(format!("Failed to send request: {}", e)))?;

        let status = response.status();
        let response_text = response.text().await.map_err(|e| {
            AvatarError::ResponseError(format!("Failed to read response: {}", e))
        })?;

        if !status.is_success() {
            // Try to parse as error response
            let message = match serde_json::from_str::<ApiErrorResponse>(&response_text) {
                Ok(error_response) => format!(
                    "{} (code: {})",
                    error_response.error.message,
                    error_response.error.code.as_deref().unwrap_or("none")
                ),
                Err(_) => response_text,
            };
            return Err(AvatarError::HttpError {
                status_code: status.as_u16(),
                message,
            });
        }

        let completion: ChatCompletionResponse = serde_json::from_str(&response_text)
            .map_err(|e| AvatarError::ParsingError(format!("Failed to parse response: {}", e)))?;

        if let Some(usage) = &completion.usage {
            debug!(
                "Token usage: prompt={}, completion={}, total={}",
                usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
            );
        }

        Self::extract_content(&completion)
    }
}

fn required(value: &Option<String>, what: &str) -> AvatarResult<String> {
    value
        .clone()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AvatarError::ConfigError(format!("{} is required", what)))
}
