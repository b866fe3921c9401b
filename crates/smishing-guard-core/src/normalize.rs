use std::sync::Arc;

use tracing::{debug, instrument};

use crate::error::{AnalysisError, OcrError};
use crate::llm::settings::DEFAULT_MAX_INPUT_CHARS;
use crate::ocr::OcrAdapter;
use crate::request::{AnalysisRequest, NormalizedInput, RequestBody};

pub const DEFAULT_MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Turns a text or image request into one canonical, length-bounded string.
pub struct Normalizer {
    ocr: Arc<dyn OcrAdapter>,
    max_chars: usize,
    max_image_bytes: usize,
}

impl Normalizer {
    pub fn new(ocr: Arc<dyn OcrAdapter>) -> Self {
        Self {
            ocr,
            max_chars: DEFAULT_MAX_INPUT_CHARS,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars.max(1);
        self
    }

    pub fn with_max_image_bytes(mut self, max_image_bytes: usize) -> Self {
        self.max_image_bytes = max_image_bytes;
        self
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    #[instrument(name = "normalize", skip_all, fields(source = ?request.source_kind))]
    pub async fn normalize(
        &self,
        request: &AnalysisRequest,
    ) -> Result<NormalizedInput, AnalysisError> {
        match request.validate()? {
            RequestBody::Text(raw) => {
                let (text, truncated) = canonicalize(raw, self.max_chars);
                if text.is_empty() {
                    return Err(AnalysisError::invalid_input(
                        "message text is empty or whitespace-only",
                    ));
                }
                Ok(NormalizedInput::new(text, false, truncated))
            }
            RequestBody::Image(bytes) => {
                if bytes.is_empty() {
                    return Err(AnalysisError::invalid_input("image payload is empty"));
                }
                if bytes.len() > self.max_image_bytes {
                    return Err(AnalysisError::invalid_input(format!(
                        "image exceeds {} bytes",
                        self.max_image_bytes
                    )));
                }
                let extracted = self.ocr.extract_text(bytes).await?;
                let (text, truncated) = canonicalize(&extracted, self.max_chars);
                if text.is_empty() {
                    return Err(AnalysisError::UnreadableImage(OcrError::EmptyResult));
                }
                debug!(chars = text.chars().count(), truncated, "image text extracted");
                Ok(NormalizedInput::new(text, true, truncated))
            }
        }
    }
}

/// Trim, collapse whitespace runs and cut to `max_chars` characters.
///
/// A run containing a line break collapses to `\n` so message layout survives;
/// any other run collapses to a single space.
pub fn canonicalize(raw: &str, max_chars: usize) -> (String, bool) {
    let collapsed = collapse_whitespace(raw.trim());
    if collapsed.chars().count() <= max_chars {
        return (collapsed, false);
    }
    (collapsed.chars().take(max_chars).collect(), true)
}

fn collapse_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending: Option<char> = None;
    for ch in input.chars() {
        if ch.is_whitespace() {
            pending = match (pending, ch) {
                (Some('\n'), _) | (_, '\n' | '\r') => Some('\n'),
                _ => Some(' '),
            };
            continue;
        }
        if let Some(sep) = pending.take() {
            out.push(sep);
        }
        out.push(ch);
    }
    out
}
