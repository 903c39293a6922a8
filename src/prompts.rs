//! System prompts for VLM-based page transcription.
//!
//! Kept in one place so the OCR backend's behaviour can be changed (and
//! regression-tested) without touching the call or error-handling code in
//! [`crate::ocr::vlm`].

/// Default system prompt for transcribing a scanned page.
///
/// Used when [`crate::ocr::VlmOcrConfig::system_prompt`] is `None`.
pub const DEFAULT_OCR_PROMPT: &str = r#"You are a meticulous OCR engine reading a scanned paper document.

Transcribe ALL visible text on the page exactly as printed:
- Keep the reading order a human would use, top to bottom
- Put each printed line on its own output line
- Keep names, addresses, numbers, dates and punctuation verbatim
- Do not translate, summarise, correct or explain anything
- Do not wrap the output in code fences or add commentary

If the page contains no readable text at all, reply with an empty message."#;

/// Instruction sent with the page image.
pub const PAGE_INSTRUCTION: &str = "Transcribe this page.";
