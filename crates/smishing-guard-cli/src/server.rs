use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::multipart::Multipart;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use smishing_guard_core::normalize::DEFAULT_MAX_IMAGE_BYTES;
use smishing_guard_core::{
    AnalysisEngine, AnalysisError, AnalysisRequest, AnalysisResult, ErrorCode, OcrError,
    PROMPT_VERSION,
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{info, warn};

/// Multipart framing on top of the largest accepted image.
const MAX_REQUEST_BYTES: usize = DEFAULT_MAX_IMAGE_BYTES + 64 * 1024;

type SharedEngine = Arc<AnalysisEngine>;

pub fn router(engine: SharedEngine) -> Router {
    router_with_body_limit(engine, MAX_REQUEST_BYTES)
}

fn router_with_body_limit(engine: SharedEngine, limit: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/analyze/text", post(analyze_text))
        .route("/analyze/image", post(analyze_image))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(limit))
        .layer(middleware::map_response(move |response: Response| {
            payload_too_large_as_json(response, limit)
        }))
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

/// The body-limit layer answers 413 with a plain-text body; give it the same
/// `{ "error", "message" }` shape as every other failure.
async fn payload_too_large_as_json(response: Response, limit: usize) -> Response {
    if response.status() != StatusCode::PAYLOAD_TOO_LARGE {
        return response;
    }
    let body = json!({
        "error": ErrorCode::InvalidInput,
        "message": format!("request body exceeds {limit} bytes"),
    });
    (StatusCode::PAYLOAD_TOO_LARGE, Json(body)).into_response()
}

pub async fn serve(engine: AnalysisEngine, bind: &str) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(addr = %listener.local_addr()?, "analysis server listening");
    axum::serve(listener, router(Arc::new(engine)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated unexpectedly")?;
    info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to install ctrl-c handler; serving until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "promptVersion": PROMPT_VERSION }))
}

#[derive(Debug, Deserialize)]
struct TextBody {
    text: String,
}

async fn analyze_text(
    State(engine): State<SharedEngine>,
    body: Result<Json<TextBody>, JsonRejection>,
) -> Result<Json<AnalysisResult>, ApiError> {
    let Json(body) = body.map_err(|rej| AnalysisError::invalid_input(rej.body_text()))?;
    let result = engine.analyze(&AnalysisRequest::text(body.text)).await?;
    Ok(Json(result))
}

async fn analyze_image(
    State(engine): State<SharedEngine>,
    mut multipart: Multipart,
) -> Result<Json<AnalysisResult>, ApiError> {
    let mut image = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AnalysisError::invalid_input(err.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let is_image = field
            .content_type()
            .is_some_and(|mime| mime.starts_with("image/"));
        if !is_image {
            return Err(AnalysisError::UnsupportedFormat.into());
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|err| AnalysisError::invalid_input(err.body_text()))?;
        image = Some(bytes.to_vec());
        break;
    }
    let bytes =
        image.ok_or_else(|| AnalysisError::invalid_input("multipart field `file` is required"))?;
    let result = engine.analyze(&AnalysisRequest::image(bytes)).await?;
    Ok(Json(result))
}

/// HTTP face of [`AnalysisError`]: `{ "error": code, "message": text }`.
#[derive(Debug)]
pub struct ApiError(AnalysisError);

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        Self(err)
    }
}

pub fn status_for(err: &AnalysisError) -> StatusCode {
    match err {
        AnalysisError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        AnalysisError::UnreadableImage(OcrError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        AnalysisError::UnreadableImage(_) | AnalysisError::UnsupportedFormat => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AnalysisError::Unauthorized
        | AnalysisError::TransportError(_)
        | AnalysisError::MalformedModelOutput(_) => StatusCode::BAD_GATEWAY,
        AnalysisError::RateLimited => StatusCode::SERVICE_UNAVAILABLE,
        AnalysisError::Timeout => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            warn!(code = self.0.code().as_str(), error = %self.0, "analysis failed");
        }
        let body = json!({
            "error": self.0.code(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use smishing_guard_core::{ModelClient, ModelError, ModelPayload, RawCompletion};

    struct CannedModel(&'static str);

    #[async_trait]
    impl ModelClient for CannedModel {
        async fn complete(&self, _payload: &ModelPayload) -> Result<RawCompletion, ModelError> {
            Ok(RawCompletion::from(self.0))
        }
    }

    async fn spawn(reply: &'static str) -> String {
        spawn_with_limit(reply, MAX_REQUEST_BYTES).await
    }

    async fn spawn_with_limit(reply: &'static str, limit: usize) -> String {
        let engine = AnalysisEngine::builder(Arc::new(CannedModel(reply)))
            .build()
            .unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router_with_body_limit(Arc::new(engine), limit))
                .await
                .unwrap();
        });
        format!("http://{addr}")
    }

    const DANGEROUS: &str = r#"{"risk_score": 88, "reasons": ["단축 URL"], "safe_actions": ["삭제"]}"#;

    #[test]
    fn maps_error_taxonomy_to_statuses() {
        let cases = [
            (AnalysisError::invalid_input("x"), StatusCode::BAD_REQUEST),
            (
                AnalysisError::UnreadableImage(OcrError::EmptyResult),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (AnalysisError::UnsupportedFormat, StatusCode::UNPROCESSABLE_ENTITY),
            (AnalysisError::Unauthorized, StatusCode::BAD_GATEWAY),
            (AnalysisError::RateLimited, StatusCode::SERVICE_UNAVAILABLE),
            (AnalysisError::Timeout, StatusCode::GATEWAY_TIMEOUT),
            (
                AnalysisError::MalformedModelOutput("?".into()),
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(status_for(&err), status, "{err}");
        }
    }

    #[tokio::test]
    async fn health_reports_prompt_version() {
        let base = spawn(DANGEROUS).await;
        let body: Value = reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["promptVersion"], PROMPT_VERSION);
    }

    #[tokio::test]
    async fn analyzes_text_body() {
        let base = spawn(DANGEROUS).await;
        let response = reqwest::Client::new()
            .post(format!("{base}/analyze/text"))
            .json(&json!({ "text": "[Web발신] 택배 확인: https://bit.ly/xxxxx" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["riskScore"], 88);
        assert_eq!(body["riskTier"], "dangerous");
        assert_eq!(body["wasImage"], false);
    }

    #[tokio::test]
    async fn blank_text_is_bad_request() {
        let base = spawn(DANGEROUS).await;
        let response = reqwest::Client::new()
            .post(format!("{base}/analyze/text"))
            .json(&json!({ "text": "   " }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "invalid_input");
    }

    #[tokio::test]
    async fn oversized_body_gets_json_error() {
        let base = spawn_with_limit(DANGEROUS, 1024).await;
        let response = reqwest::Client::new()
            .post(format!("{base}/analyze/text"))
            .json(&json!({ "text": "택배".repeat(1024) }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::PAYLOAD_TOO_LARGE);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "invalid_input");
        assert!(body["message"].as_str().unwrap().contains("1024"));
    }

    #[tokio::test]
    async fn non_image_upload_is_rejected() {
        let base = spawn(DANGEROUS).await;
        let form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(b"hello".to_vec())
                .file_name("note.txt")
                .mime_str("text/plain")
                .unwrap(),
        );
        let response = reqwest::Client::new()
            .post(format!("{base}/analyze/image"))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "unsupported_format");
    }

    #[tokio::test]
    async fn image_without_ocr_provider_is_unavailable() {
        let base = spawn(DANGEROUS).await;
        let png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        let form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(png)
                .file_name("shot.png")
                .mime_str("image/png")
                .unwrap(),
        );
        let response = reqwest::Client::new()
            .post(format!("{base}/analyze/image"))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "unreadable_image");
    }
}
