//! Merge collaborator: page images + hOCR layouts → one searchable PDF.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is CPU-bound and not
//! async-aware. The whole merge runs on tokio's blocking pool so the worker
//! threads handling other storage events never stall behind it.
//!
//! ## Page geometry
//!
//! Each PDF page is sized to its image at one point per pixel, with the image
//! drawn full-page. hOCR word boxes are rescaled onto that page (the layout
//! may have been computed on a differently sized rendition) and placed as
//! invisible text, so the document looks like the scan and searches like text.

use crate::layout::{parse_hocr, HocrPage};
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

/// One page handed to the merger, already in page order.
#[derive(Debug, Clone)]
pub struct MergePage {
    pub page_number: u32,
    /// Raw image bytes as stored.
    pub image: Vec<u8>,
    /// Layout artifact content (hOCR).
    pub layout: String,
}

/// Errors emitted by document mergers.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Failed to bind to pdfium library: {0}")]
    Binding(String),

    #[error("Page {page}: image could not be decoded: {detail}")]
    InvalidImage { page: u32, detail: String },

    #[error("PDF assembly failed: {0}")]
    Pdf(String),
}

impl From<MergeError> for crate::error::PipelineError {
    fn from(e: MergeError) -> Self {
        crate::error::PipelineError::collaborator(crate::error::Collaborator::Merge, e)
    }
}

/// Trait abstracting over document merge backends.
#[async_trait]
pub trait DocumentMerger: Send + Sync {
    /// Merge `pages` (ascending page order) into one document titled `title`.
    async fn merge(&self, pages: Vec<MergePage>, title: &str) -> Result<Vec<u8>, MergeError>;
}

/// [`DocumentMerger`] producing searchable PDFs with pdfium.
#[derive(Debug, Clone, Default)]
pub struct PdfiumMerger {
    /// Path to a pdfium shared library; the system library when `None`.
    library_path: Option<PathBuf>,
}

impl PdfiumMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_library(path: impl Into<PathBuf>) -> Self {
        Self {
            library_path: Some(path.into()),
        }
    }
}

#[async_trait]
impl DocumentMerger for PdfiumMerger {
    async fn merge(&self, pages: Vec<MergePage>, title: &str) -> Result<Vec<u8>, MergeError> {
        let library_path = self.library_path.clone();
        let page_count = pages.len();
        let bytes = tokio::task::spawn_blocking(move || {
            let pdfium = bind_pdfium(library_path.as_ref())?;
            merge_blocking(&pdfium, &pages)
        })
        .await
        .map_err(|e| MergeError::Pdf(format!("merge task panicked: {e}")))??;

        info!("Merged {} pages into '{}' ({} bytes)", page_count, title, bytes.len());
        Ok(bytes)
    }
}

fn bind_pdfium(library_path: Option<&PathBuf>) -> Result<Pdfium, MergeError> {
    let bindings = match library_path {
        Some(path) => Pdfium::bind_to_library(path),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| MergeError::Binding(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

fn pdf_err(e: PdfiumError) -> MergeError {
    MergeError::Pdf(format!("{e:?}"))
}

/// Blocking implementation of the merge.
fn merge_blocking(pdfium: &Pdfium, pages: &[MergePage]) -> Result<Vec<u8>, MergeError> {
    let mut document = pdfium.create_new_pdf().map_err(pdf_err)?;
    let font = document.fonts_mut().helvetica();

    for page in pages {
        let image = image::load_from_memory(&page.image).map_err(|e| MergeError::InvalidImage {
            page: page.page_number,
            detail: e.to_string(),
        })?;
        let (width, height) = (image.width() as f32, image.height() as f32);
        let hocr = parse_hocr(&page.layout);

        let mut pdf_page = document
            .pages_mut()
            .create_page_at_end(PdfPagePaperSize::from_points(
                PdfPoints::new(width),
                PdfPoints::new(height),
            ))
            .map_err(pdf_err)?;

        pdf_page
            .objects_mut()
            .create_image_object(
                PdfPoints::ZERO,
                PdfPoints::ZERO,
                &image,
                Some(PdfPoints::new(width)),
                Some(PdfPoints::new(height)),
            )
            .map_err(pdf_err)?;

        for word in place_words(&hocr, width, height) {
            let mut text =
                PdfPageTextObject::new(&document, &word.text, font, PdfPoints::new(word.font_size))
                    .map_err(pdf_err)?;
            text.set_render_mode(PdfPageTextRenderMode::Invisible)
                .map_err(pdf_err)?;
            text.translate(PdfPoints::new(word.x), PdfPoints::new(word.y))
                .map_err(pdf_err)?;
            pdf_page.objects_mut().add_text_object(text).map_err(pdf_err)?;
        }

        debug!(
            "Page {}: {}x{} px, {} words",
            page.page_number,
            image.width(),
            image.height(),
            hocr.words.len()
        );
    }

    document.save_to_bytes().map_err(pdf_err)
}

/// An invisible word in PDF page space (origin bottom-left).
#[derive(Debug, Clone, PartialEq)]
struct PlacedWord {
    text: String,
    x: f32,
    y: f32,
    font_size: f32,
}

/// Map hOCR word boxes (origin top-left) onto a `width × height` page.
fn place_words(hocr: &HocrPage, width: f32, height: f32) -> Vec<PlacedWord> {
    let sx = if hocr.width > 0 { width / hocr.width as f32 } else { 1.0 };
    let sy = if hocr.height > 0 { height / hocr.height as f32 } else { 1.0 };

    hocr.words
        .iter()
        .map(|w| PlacedWord {
            text: w.text.clone(),
            x: w.bbox.x0 as f32 * sx,
            y: height - w.bbox.y1 as f32 * sy,
            font_size: (w.bbox.height() as f32 * sy).max(1.0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::HocrWord;
    use crate::ocr::BoundingBox;

    fn page_with_word(width: u32, height: u32, bbox: BoundingBox) -> HocrPage {
        HocrPage {
            width,
            height,
            words: vec![HocrWord {
                text: "Invoice".into(),
                bbox,
            }],
        }
    }

    #[test]
    fn flips_y_axis_to_pdf_space() {
        let hocr = page_with_word(100, 200, BoundingBox { x0: 10, y0: 20, x1: 60, y1: 40 });
        let placed = place_words(&hocr, 100.0, 200.0);
        assert_eq!(
            placed,
            vec![PlacedWord {
                text: "Invoice".into(),
                x: 10.0,
                y: 160.0,
                font_size: 20.0
            }]
        );
    }

    #[test]
    fn rescales_layout_from_a_smaller_rendition() {
        let hocr = page_with_word(50, 100, BoundingBox { x0: 5, y0: 10, x1: 30, y1: 20 });
        let placed = place_words(&hocr, 100.0, 200.0);
        assert_eq!(placed[0].x, 10.0);
        assert_eq!(placed[0].y, 160.0);
        assert_eq!(placed[0].font_size, 20.0);
    }

    #[test]
    fn placeholder_layout_places_nothing() {
        let placed = place_words(&HocrPage::default(), 100.0, 100.0);
        assert!(placed.is_empty());
    }
}
