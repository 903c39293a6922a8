//! OCR collaborator: image in, recognised text and positions out.
//!
//! The core only needs two things from OCR: the page's full text (to resolve
//! owners) and positioned text blocks (to render the hOCR layout). Backends
//! implement [`TextDetector`]; [`vlm::VlmTextDetector`] is the bundled one.

pub mod vlm;

pub use vlm::{VlmOcrConfig, VlmTextDetector};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pixel rectangle, origin top-left, as used by hOCR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }
}

/// One recognised line of text and where it sits on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextAnnotation {
    pub text: String,
    pub bbox: BoundingBox,
}

/// Everything OCR found on one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrResult {
    /// Full page text, lines separated by `\n`.
    pub full_text: String,
    pub width: u32,
    pub height: u32,
    pub annotations: Vec<TextAnnotation>,
}

impl OcrResult {
    /// Spread `text`'s lines evenly down a `width × height` page.
    ///
    /// For backends that return a transcription without coordinates; the
    /// resulting text layer is searchable though only roughly positioned.
    pub fn from_plain_text(text: &str, width: u32, height: u32) -> Self {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let n = lines.len().max(1) as u64;
        let annotations = lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                let i = i as u64;
                TextAnnotation {
                    text: line.to_string(),
                    bbox: BoundingBox {
                        x0: 0,
                        y0: (i * height as u64 / n) as u32,
                        x1: width,
                        y1: ((i + 1) * height as u64 / n) as u32,
                    },
                }
            })
            .collect();
        Self {
            full_text: lines.join("\n"),
            width,
            height,
            annotations,
        }
    }
}

/// Errors emitted by OCR backends.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("image could not be read: {0}")]
    InvalidImage(String),

    #[error("OCR provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("OCR request failed after {attempts} attempt(s): {detail}")]
    RequestFailed { attempts: u32, detail: String },
}

impl From<OcrError> for crate::error::PipelineError {
    fn from(e: OcrError) -> Self {
        crate::error::PipelineError::collaborator(crate::error::Collaborator::Ocr, e)
    }
}

/// Trait abstracting over OCR backends.
#[async_trait]
pub trait TextDetector: Send + Sync {
    /// Recognise text in `image` (stored at `locator`).
    ///
    /// Returns `Ok(None)` when the page carries no text at all.
    async fn detect_text(&self, locator: &str, image: &[u8]) -> Result<Option<OcrResult>, OcrError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_lines_tile_the_page() {
        let r = OcrResult::from_plain_text("Dear Sandy,\n\n  Invoice 42  \n", 1000, 900);
        assert_eq!(r.full_text, "Dear Sandy,\nInvoice 42");
        assert_eq!(r.annotations.len(), 2);
        assert_eq!(r.annotations[0].bbox, BoundingBox { x0: 0, y0: 0, x1: 1000, y1: 450 });
        assert_eq!(r.annotations[1].bbox.y0, 450);
        assert_eq!(r.annotations[1].bbox.y1, 900);
    }

    #[test]
    fn blank_text_has_no_annotations() {
        let r = OcrResult::from_plain_text("  \n", 10, 10);
        assert!(r.annotations.is_empty());
        assert!(r.full_text.is_empty());
    }
}
