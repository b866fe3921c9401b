mod vision;

use async_trait::async_trait;

use crate::error::OcrError;

pub use vision::VisionOcr;

/// Extracts message text from a screenshot.
#[async_trait]
pub trait OcrAdapter: Send + Sync {
    /// Return the text visible in `image`. Never returns an empty string as
    /// success; an image without text is [`OcrError::EmptyResult`].
    async fn extract_text(&self, image: &[u8]) -> Result<String, OcrError>;
}

/// Image containers accepted for OCR, identified by magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
    Bmp,
}

impl ImageFormat {
    pub fn sniff(bytes: &[u8]) -> Result<Self, OcrError> {
        const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        if bytes.starts_with(PNG) {
            Ok(Self::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Ok(Self::Jpeg)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Ok(Self::Gif)
        } else if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
            Ok(Self::Webp)
        } else if bytes.starts_with(b"BM") && bytes.len() > 14 {
            Ok(Self::Bmp)
        } else {
            Err(OcrError::UnsupportedFormat)
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Bmp => "image/bmp",
        }
    }
}

/// Adapter used when no OCR provider is configured.
#[derive(Debug, Clone)]
pub struct UnavailableOcr {
    reason: String,
}

impl UnavailableOcr {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Default for UnavailableOcr {
    fn default() -> Self {
        Self::new("no OCR provider configured")
    }
}

#[async_trait]
impl OcrAdapter for UnavailableOcr {
    async fn extract_text(&self, image: &[u8]) -> Result<String, OcrError> {
        ImageFormat::sniff(image)?;
        Err(OcrError::Unavailable(self.reason.clone()))
    }
}
