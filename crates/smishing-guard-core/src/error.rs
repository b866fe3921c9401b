use serde::Serialize;
use thiserror::Error;

/// Failures reported by an [`OcrAdapter`](crate::ocr::OcrAdapter).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OcrError {
    #[error("payload is not a supported image format")]
    UnsupportedFormat,
    #[error("no text could be extracted from the image")]
    EmptyResult,
    #[error("OCR adapter unavailable: {0}")]
    Unavailable(String),
}

/// Failures reported by a [`ModelClient`](crate::llm::ModelClient).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("model provider rejected the credentials")]
    Unauthorized,
    #[error("model provider is rate limiting requests")]
    RateLimited,
    #[error("model call timed out")]
    Timeout,
    #[error("model transport failure: {0}")]
    Transport(String),
}

impl ModelError {
    /// Only rate limiting and timeouts are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Timeout)
    }
}

/// Public error taxonomy of the analysis pipeline. Each variant maps to one
/// caller-visible error code.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("image could not be read: {0}")]
    UnreadableImage(#[source] OcrError),
    #[error("unsupported image format")]
    UnsupportedFormat,
    #[error("model provider rejected the credentials")]
    Unauthorized,
    #[error("model provider is busy, try again later")]
    RateLimited,
    #[error("model call timed out")]
    Timeout,
    #[error("transport failure: {0}")]
    TransportError(String),
    #[error("model output could not be parsed: {0}")]
    MalformedModelOutput(String),
}

/// Stable machine-readable codes for [`AnalysisError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidInput,
    UnreadableImage,
    UnsupportedFormat,
    Unauthorized,
    RateLimited,
    Timeout,
    TransportError,
    MalformedModelOutput,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::UnreadableImage => "unreadable_image",
            Self::UnsupportedFormat => "unsupported_format",
            Self::Unauthorized => "unauthorized",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::TransportError => "transport_error",
            Self::MalformedModelOutput => "malformed_model_output",
        }
    }
}

impl AnalysisError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::UnreadableImage(_) => ErrorCode::UnreadableImage,
            Self::UnsupportedFormat => ErrorCode::UnsupportedFormat,
            Self::Unauthorized => ErrorCode::Unauthorized,
            Self::RateLimited => ErrorCode::RateLimited,
            Self::Timeout => ErrorCode::Timeout,
            Self::TransportError(_) => ErrorCode::TransportError,
            Self::MalformedModelOutput(_) => ErrorCode::MalformedModelOutput,
        }
    }

    /// Errors caused by the caller's request (4xx-equivalent).
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::InvalidInput(_) | Self::UnsupportedFormat => true,
            Self::UnreadableImage(cause) => !matches!(cause, OcrError::Unavailable(_)),
            _ => false,
        }
    }

    /// Whether the caller may re-run the whole pipeline once.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited
                | Self::Timeout
                | Self::TransportError(_)
                | Self::MalformedModelOutput(_)
                | Self::UnreadableImage(OcrError::Unavailable(_))
        )
    }
}

impl From<OcrError> for AnalysisError {
    fn from(err: OcrError) -> Self {
        match err {
            OcrError::UnsupportedFormat => Self::UnsupportedFormat,
            other => Self::UnreadableImage(other),
        }
    }
}

impl From<ModelError> for AnalysisError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Unauthorized => Self::Unauthorized,
            ModelError::RateLimited => Self::RateLimited,
            ModelError::Timeout => Self::Timeout,
            ModelError::Transport(msg) => Self::TransportError(msg),
        }
    }
}
