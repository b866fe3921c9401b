use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{ImageFormat, OcrAdapter};
use crate::error::OcrError;
use crate::llm::EngineSettings;

const DEFAULT_VISION_MODEL: &str = "gpt-4o-mini";
const NO_TEXT_SENTINEL: &str = "NO_TEXT";
const OCR_INSTRUCTION: &str = "이 이미지는 휴대폰 문자 메시지 화면입니다. 화면에 보이는 모든 글자를 원문 그대로 옮겨 적으세요. 설명이나 판단은 덧붙이지 마세요. 읽을 수 있는 글자가 없으면 NO_TEXT 라고만 답하세요.";

/// OCR through a vision-capable chat model on an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct VisionOcr {
    http: Client,
    url: String,
    api_key: String,
    model: String,
}

impl VisionOcr {
    pub fn new(settings: &EngineSettings) -> Result<Self> {
        if settings.api_key.trim().is_empty() {
            bail!(
                "OCR API key must be provided via {}",
                EngineSettings::API_KEY_ENV
            );
        }
        let base = settings
            .endpoint
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        let url = format!("{}/v1/chat/completions", base.trim_end_matches('/'));
        let http = Client::builder()
            .user_agent("smishing-guard/0.3")
            .timeout(settings.timeout)
            .build()
            .context("failed to build OCR HTTP client")?;
        let model = settings
            .ocr_model
            .clone()
            .or_else(|| settings.model.clone())
            .unwrap_or_else(|| DEFAULT_VISION_MODEL.to_string());
        Ok(Self {
            http,
            url,
            api_key: settings.api_key.clone(),
            model,
        })
    }
}

#[async_trait]
impl OcrAdapter for VisionOcr {
    async fn extract_text(&self, image: &[u8]) -> Result<String, OcrError> {
        let format = ImageFormat::sniff(image)?;
        let data_url = format!("data:{};base64,{}", format.mime_type(), BASE64.encode(image));
        let payload = json!({
            "model": self.model,
            "temperature": 0,
            "max_tokens": 1000,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": OCR_INSTRUCTION },
                    { "type": "image_url", "image_url": { "url": data_url, "detail": "high" } }
                ]
            }]
        });

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    OcrError::Unavailable("OCR request timed out".into())
                } else {
                    OcrError::Unavailable(format!("OCR request failed: {err}"))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            debug!(%status, body_len = body.len(), "vision OCR call rejected");
            return Err(OcrError::Unavailable(format!(
                "OCR provider error ({status})"
            )));
        }

        let chat: VisionResponse = response
            .json()
            .await
            .map_err(|err| OcrError::Unavailable(format!("invalid OCR response: {err}")))?;
        let text = chat
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .unwrap_or_default();
        let text = text.trim();
        if text.is_empty() || text == NO_TEXT_SENTINEL {
            return Err(OcrError::EmptyResult);
        }
        debug!(chars = text.chars().count(), "vision OCR extracted text");
        Ok(text.to_string())
    }
}

#[derive(Deserialize)]
struct VisionResponse {
    choices: Vec<VisionChoice>,
}

#[derive(Deserialize)]
struct VisionChoice {
    message: VisionMessage,
}

#[derive(Deserialize)]
struct VisionMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    const TINY_PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];

    fn settings(url: String) -> EngineSettings {
        EngineSettings {
            api_key: "test-key".into(),
            endpoint: Some(url),
            ocr_model: Some("vision-test".into()),
            ..EngineSettings::default()
        }
    }

    fn completion(text: &str) -> String {
        json!({ "choices": [{ "message": { "content": text } }] }).to_string()
    }

    #[test]
    fn requires_api_key() {
        let err = VisionOcr::new(&EngineSettings::default()).unwrap_err();
        assert!(err.to_string().contains("API key"));
    }

    #[tokio::test]
    async fn rejects_non_image_without_network() {
        let ocr = VisionOcr::new(&settings("http://127.0.0.1:9".into())).unwrap();
        assert_eq!(
            ocr.extract_text(b"not an image").await,
            Err(OcrError::UnsupportedFormat)
        );
    }

    #[tokio::test]
    async fn returns_transcribed_text() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer test-key")
                    .body_contains("data:image/png;base64,");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(completion("  [Web발신] 택배 주소 확인  "));
            })
            .await;

        let ocr = VisionOcr::new(&settings(server.base_url())).unwrap();
        let text = ocr.extract_text(TINY_PNG).await.unwrap();
        assert_eq!(text, "[Web발신] 택배 주소 확인");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn sentinel_reply_is_empty_result() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(completion("NO_TEXT"));
            })
            .await;

        let ocr = VisionOcr::new(&settings(server.base_url())).unwrap();
        assert_eq!(ocr.extract_text(TINY_PNG).await, Err(OcrError::EmptyResult));
    }

    #[tokio::test]
    async fn provider_failure_is_unavailable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(500);
            })
            .await;

        let ocr = VisionOcr::new(&settings(server.base_url())).unwrap();
        assert!(matches!(
            ocr.extract_text(TINY_PNG).await,
            Err(OcrError::Unavailable(msg)) if msg.contains("500")
        ));
    }
}
