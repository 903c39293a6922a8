//! hOCR layout artifacts: the searchable-text overlay for one page.
//!
//! [`HocrRenderer`] writes OCR output as hOCR (XHTML with `ocr_page`,
//! `ocr_line` and `ocrx_word` elements carrying `bbox` titles). A page with
//! no text still gets a layout artifact, an empty `ocr_page`, so the
//! document's fan-in group can complete.
//!
//! [`parse_hocr`] reads the word boxes back at merge time. It understands the
//! subset this module writes plus the usual attribute-order variations of
//! other hOCR producers; it is not a general HTML parser.

use crate::ocr::{BoundingBox, OcrResult, TextAnnotation};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Write as _;

/// Turns OCR output into layout bytes.
pub trait LayoutRenderer: Send + Sync {
    /// Render `ocr`, or the "no text" placeholder when `None`.
    fn render(&self, ocr: Option<&OcrResult>) -> Vec<u8>;
}

/// Renders hOCR 1.2.
#[derive(Debug, Clone, Default)]
pub struct HocrRenderer;

const HOCR_HEAD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Transitional//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-transitional.dtd">
<html xmlns="http://www.w3.org/1999/xhtml" xml:lang="en" lang="en">
<head>
<title></title>
<meta http-equiv="Content-Type" content="text/html;charset=utf-8" />
<meta name="ocr-system" content="scanit" />
<meta name="ocr-capabilities" content="ocr_page ocr_line ocrx_word" />
</head>
<body>
"#;

const HOCR_TAIL: &str = "</body>\n</html>\n";

impl LayoutRenderer for HocrRenderer {
    fn render(&self, ocr: Option<&OcrResult>) -> Vec<u8> {
        let mut out = String::from(HOCR_HEAD);
        let (width, height) = ocr.map(|o| (o.width, o.height)).unwrap_or((0, 0));
        let _ = writeln!(
            out,
            r#"<div class="ocr_page" id="page_1" title="bbox 0 0 {width} {height}">"#
        );

        let annotations: &[TextAnnotation] = ocr.map(|o| o.annotations.as_slice()).unwrap_or(&[]);
        for (li, annotation) in annotations.iter().enumerate() {
            let line_no = li + 1;
            let b = annotation.bbox;
            let _ = writeln!(
                out,
                r#"<span class="ocr_line" id="line_1_{line_no}" title="bbox {} {} {} {}">"#,
                b.x0, b.y0, b.x1, b.y1
            );
            for (wi, (word, wb)) in split_words(annotation).into_iter().enumerate() {
                let _ = writeln!(
                    out,
                    r#"<span class="ocrx_word" id="word_1_{line_no}_{}" title="bbox {} {} {} {}">{}</span>"#,
                    wi + 1,
                    wb.x0,
                    wb.y0,
                    wb.x1,
                    wb.y1,
                    escape_xml(word)
                );
            }
            out.push_str("</span>\n");
        }

        out.push_str("</div>\n");
        out.push_str(HOCR_TAIL);
        out.into_bytes()
    }
}

/// Split a line into words, giving each a share of the line's width
/// proportional to its position in the text.
fn split_words(annotation: &TextAnnotation) -> Vec<(&str, BoundingBox)> {
    let text = annotation.text.as_str();
    let total = text.chars().count().max(1) as u64;
    let line = annotation.bbox;

    let mut words = Vec::new();
    let mut char_pos = 0u64;
    let mut word_start: Option<(usize, u64)> = None;
    for (byte_idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some((start, c0)) = word_start.take() {
                words.push((&text[start..byte_idx], word_box(line, total, c0, char_pos)));
            }
        } else if word_start.is_none() {
            word_start = Some((byte_idx, char_pos));
        }
        char_pos += 1;
    }
    if let Some((start, c0)) = word_start {
        words.push((&text[start..], word_box(line, total, c0, char_pos)));
    }
    words
}

/// Box for characters `c0..c1` of a `total`-character line.
fn word_box(line: BoundingBox, total: u64, c0: u64, c1: u64) -> BoundingBox {
    let span = line.width() as u64;
    BoundingBox {
        x0: line.x0 + (c0 * span / total) as u32,
        y0: line.y0,
        x1: line.x0 + (c1 * span / total) as u32,
        y1: line.y1,
    }
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

// ── Reading ──────────────────────────────────────────────────────────────

/// A positioned word read from hOCR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HocrWord {
    pub text: String,
    pub bbox: BoundingBox,
}

/// The page size and words of one hOCR page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HocrPage {
    pub width: u32,
    pub height: u32,
    pub words: Vec<HocrWord>,
}

impl HocrPage {
    pub fn text(&self) -> String {
        self.words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

static PAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<div\b[^>]*\bclass=["']ocr_page["'][^>]*>"#).expect("valid regex")
});

static WORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<span\b([^>]*\bclass=["']ocrx_word["'][^>]*)>(.*?)</span>"#)
        .expect("valid regex")
});

static BBOX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\btitle=["'][^"']*?\bbbox\s+(\d+)\s+(\d+)\s+(\d+)\s+(\d+)"#).expect("valid regex")
});

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

fn bbox_in(attrs: &str) -> Option<BoundingBox> {
    let caps = BBOX_RE.captures(attrs)?;
    let n = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    Some(BoundingBox {
        x0: n(1)?,
        y0: n(2)?,
        x1: n(3)?,
        y1: n(4)?,
    })
}

/// Read the first page and its words from an hOCR document.
pub fn parse_hocr(hocr: &str) -> HocrPage {
    let (width, height) = PAGE_RE
        .find(hocr)
        .and_then(|m| bbox_in(m.as_str()))
        .map(|b| (b.width(), b.height()))
        .unwrap_or((0, 0));

    let words = WORD_RE
        .captures_iter(hocr)
        .filter_map(|caps| {
            let bbox = bbox_in(caps.get(1)?.as_str())?;
            let inner = TAG_RE.replace_all(caps.get(2)?.as_str(), "");
            let text = unescape_xml(inner.trim());
            if text.is_empty() {
                None
            } else {
                Some(HocrWord { text, bbox })
            }
        })
        .collect();

    HocrPage {
        width,
        height,
        words,
    }
}
