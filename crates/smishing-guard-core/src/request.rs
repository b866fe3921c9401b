use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// Where the message under analysis came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Text,
    Image,
}

/// Caller request. Exactly one of `raw_text`/`image_bytes` must be present and
/// agree with `source_kind`; [`AnalysisRequest::validate`] enforces this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub source_kind: SourceKind,
    pub raw_text: Option<String>,
    pub image_bytes: Option<Vec<u8>>,
}

/// Borrowed view of a request that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestBody<'a> {
    Text(&'a str),
    Image(&'a [u8]),
}

impl AnalysisRequest {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            source_kind: SourceKind::Text,
            raw_text: Some(text.into()),
            image_bytes: None,
        }
    }

    pub fn image(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            source_kind: SourceKind::Image,
            raw_text: None,
            image_bytes: Some(bytes.into()),
        }
    }

    /// Check the exactly-one invariant and return the populated body.
    pub fn validate(&self) -> Result<RequestBody<'_>, AnalysisError> {
        match (&self.raw_text, &self.image_bytes) {
            (Some(_), Some(_)) => Err(AnalysisError::invalid_input(
                "request must carry either text or an image, not both",
            )),
            (None, None) => Err(AnalysisError::invalid_input(
                "request must carry text or an image",
            )),
            (Some(text), None) if self.source_kind == SourceKind::Text => {
                Ok(RequestBody::Text(text))
            }
            (None, Some(bytes)) if self.source_kind == SourceKind::Image => {
                Ok(RequestBody::Image(bytes))
            }
            _ => Err(AnalysisError::invalid_input(format!(
                "payload does not match declared source kind `{:?}`",
                self.source_kind
            ))),
        }
    }
}

/// Canonical text handed to the prompt builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedInput {
    text: String,
    was_image: bool,
    truncated: bool,
}

impl NormalizedInput {
    pub(crate) fn new(text: String, was_image: bool, truncated: bool) -> Self {
        Self {
            text,
            was_image,
            truncated,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn was_image(&self) -> bool {
        self.was_image
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}
