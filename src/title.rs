//! Human-readable document titles derived from the scan timestamp.
//!
//! The scanner names each session directory after its start time in Unix
//! seconds (UTC). The title shows that instant in the configured display
//! timezone, e.g. `Scanned Document - Tue 14 Nov 2023 at 17:13`.

use crate::config::PipelineConfig;
use chrono::{DateTime, Utc};
use std::fmt::Write;
use tracing::warn;

/// Scan-session start encoded in the last segment of `document_key`.
pub fn scan_timestamp(document_key: &str) -> Option<DateTime<Utc>> {
    let last = document_key.rsplit('/').next()?;
    let secs: i64 = last.parse().ok()?;
    DateTime::from_timestamp(secs, 0)
}

/// Title for a document; falls back to the raw key when it is not a timestamp.
pub fn document_title(document_key: &str, config: &PipelineConfig) -> String {
    match scan_timestamp(document_key) {
        Some(utc) => {
            let local = utc.with_timezone(&config.display_timezone);
            let mut title = String::new();
            match write!(title, "{}", local.format(&config.title_format)) {
                Ok(()) => title,
                Err(_) => {
                    warn!("Title format '{}' is invalid; using the key", config.title_format);
                    fallback_title(document_key)
                }
            }
        }
        None => {
            warn!("Document key '{document_key}' is not a Unix timestamp; using it as title");
            fallback_title(document_key)
        }
    }
}

fn fallback_title(document_key: &str) -> String {
    format!("Scanned Document - {document_key}")
}
