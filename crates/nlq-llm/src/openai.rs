//! OpenAI-compatible completion provider

use crate::provider::{CompletionProvider, CompletionRequest, CompletionResponse, ProviderError};
use crate::types::{ChatMessage, ChatRequest, ChatResponse};
use async_trait::async_trait;
use nlq_core::config::LlmConfig;
use reqwest::{Client, StatusCode};

/// Chat-completions provider for OpenAI and compatible endpoints.
#[derive(Debug)]
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, nlq_core::Error> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                nlq_core::Error::config(
                    "llm.api_key is not set; configure it or export NLQ_LLM_API_KEY",
                )
            })?;

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| nlq_core::Error::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<CompletionResponse, ProviderError> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: request.system,
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.user,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout("completion request timed out".to_string())
                } else {
                    // without_url keeps the message free of endpoint details
                    ProviderError::Transient(format!("request failed: {}", e.without_url()))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = format!("provider returned HTTP {}", status.as_u16());
            return if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                Err(ProviderError::Transient(message))
            } else {
                Err(ProviderError::Permanent(message))
            };
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Permanent(format!("malformed provider response: {e}")))?;

        let choice = reply
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Permanent("provider returned no choices".to_string()))?;

        Ok(CompletionResponse {
            text: choice.message.content,
            model_id: reply.model.unwrap_or_else(|| self.model.clone()),
            token_count: reply.usage.and_then(|u| u.completion_tokens),
        })
    }
}
