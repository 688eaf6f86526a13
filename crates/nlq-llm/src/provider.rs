//! Provider seam for the external completion service

use async_trait::async_trait;

/// One completion call: a system instruction and a user payload.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    pub model_id: String,
    pub token_count: Option<u32>,
}

/// Provider failures, classified for the retry layer.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// Network failures, 5xx, throttling: worth retrying with backoff
    Transient(String),
    /// 4xx, auth, content policy: retrying will not help
    Permanent(String),
    /// The provider did not answer within the per-call timeout
    Timeout(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_) | ProviderError::Timeout(_))
    }

    pub fn message(&self) -> &str {
        match self {
            ProviderError::Transient(m) | ProviderError::Permanent(m) | ProviderError::Timeout(m) => m,
        }
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Transient(m) => write!(f, "transient provider error: {m}"),
            ProviderError::Permanent(m) => write!(f, "provider error: {m}"),
            ProviderError::Timeout(m) => write!(f, "provider timeout: {m}"),
        }
    }
}

/// The external text-completion service.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn model_id(&self) -> &str;

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<CompletionResponse, ProviderError>;
}
