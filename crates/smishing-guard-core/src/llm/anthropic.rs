use super::{classify_status, classify_transport, EngineSettings, ModelClient, RawCompletion};
use crate::error::ModelError;
use crate::prompt::ModelPayload;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_MODEL: &str = "claude-3-haiku-20240307";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: Client,
    url: String,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(settings: &EngineSettings) -> Result<Self> {
        if settings.api_key.trim().is_empty() {
            bail!(
                "Anthropic API key must be provided via {}",
                EngineSettings::API_KEY_ENV
            );
        }
        let base = settings
            .endpoint
            .clone()
            .unwrap_or_else(|| "https://api.anthropic.com".to_string());
        let url = format!("{}/v1/messages", base.trim_end_matches('/'));
        let http = Client::builder()
            .user_agent("smishing-guard/0.3")
            .timeout(settings.timeout)
            .build()
            .context("failed to build Anthropic HTTP client")?;
        Ok(Self {
            http,
            url,
            api_key: settings.api_key.clone(),
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn complete(&self, payload: &ModelPayload) -> Result<RawCompletion, ModelError> {
        let request = AnthropicRequest {
            model: self.model.clone(),
            system: payload.system_instruction.to_string(),
            messages: vec![AnthropicMessage {
                role: "user",
                content: payload.render_user_message(),
            }],
            max_tokens: 800,
            temperature: 0.1,
        };

        let response = self
            .http
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let message: AnthropicResponse = response.json().await.map_err(|err| {
            ModelError::Transport(format!("failed to decode Anthropic response: {err}"))
        })?;
        let content = message
            .content
            .into_iter()
            .filter_map(|part| part.text)
            .collect::<Vec<_>>()
            .join("\n");
        if content.trim().is_empty() {
            return Err(ModelError::Transport(
                "Anthropic response missing message content".into(),
            ));
        }
        debug!(model = %self.model, chars = content.len(), "Anthropic completion received");
        Ok(RawCompletion(content))
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    system: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    _type: String,
    #[serde(default)]
    text: Option<String>,
}
