mod anthropic;
mod openai;
mod retry;
pub mod settings;

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::StatusCode;

use crate::error::ModelError;
use crate::prompt::ModelPayload;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;
pub use retry::{RetryPolicy, RetryingClient};
pub use settings::EngineSettings;

/// Unparsed model output. No structure is assumed until the parser runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCompletion(pub String);

impl RawCompletion {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RawCompletion {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Client abstraction for the remote reasoning model.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Send the payload and return the raw completion text.
    async fn complete(&self, payload: &ModelPayload) -> Result<RawCompletion, ModelError>;
}

#[async_trait]
impl<T: ModelClient + ?Sized> ModelClient for Arc<T> {
    async fn complete(&self, payload: &ModelPayload) -> Result<RawCompletion, ModelError> {
        (**self).complete(payload).await
    }
}

/// Supported model providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            other => bail!("unsupported model provider `{other}` (expected openai or anthropic)"),
        }
    }
}

/// Build the configured provider client wrapped in the bounded retry policy.
pub fn build_model_client(settings: &EngineSettings) -> Result<Arc<dyn ModelClient>> {
    let policy = RetryPolicy::default().with_max_retries(settings.max_retries);
    let client: Arc<dyn ModelClient> = match ProviderKind::parse(&settings.provider)? {
        ProviderKind::OpenAi => Arc::new(RetryingClient::new(OpenAiClient::new(settings)?, policy)),
        ProviderKind::Anthropic => {
            Arc::new(RetryingClient::new(AnthropicClient::new(settings)?, policy))
        }
    };
    Ok(client)
}

pub(crate) fn classify_status(status: StatusCode, body: &str) -> ModelError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ModelError::Unauthorized,
        StatusCode::TOO_MANY_REQUESTS => ModelError::RateLimited,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ModelError::Timeout,
        _ => ModelError::Transport(format!(
            "provider returned {status}: {}",
            body.chars().take(200).collect::<String>()
        )),
    }
}

pub(crate) fn classify_transport(err: reqwest::Error) -> ModelError {
    if err.is_timeout() {
        ModelError::Timeout
    } else {
        ModelError::Transport(err.to_string())
    }
}
