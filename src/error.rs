//! Error types for the scanit pipeline.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`]: **fatal for one stage invocation**. The triggering
//!   event cannot be turned into the next artifact (unparseable key, OCR or
//!   storage call failed). No artifact is written, so a redelivery of the
//!   same event retries the whole stage from scratch.
//!
//! * [`DeliveryError`]: **non-fatal**. One recipient could not receive the
//!   merged document. Stored inside [`crate::delivery::DeliveryReport`] so
//!   the remaining recipients are still attempted.
//!
//! "Not every page is there yet" is neither: it is the normal
//! [`crate::processor::StageOutcome::AwaitingSiblings`] outcome.

use std::fmt;
use thiserror::Error;

/// The external system a failed call was made to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collaborator {
    Ocr,
    Layout,
    Merge,
    Storage,
    Delivery,
    Credentials,
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Collaborator::Ocr => "ocr",
            Collaborator::Layout => "layout",
            Collaborator::Merge => "merge",
            Collaborator::Storage => "storage",
            Collaborator::Delivery => "delivery",
            Collaborator::Credentials => "credentials",
        };
        f.write_str(name)
    }
}

/// All fatal errors returned by a stage invocation.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Addressing ────────────────────────────────────────────────────────
    /// The storage key does not follow `<doc>/<nr>-<total>_<owners>.<ext>`.
    ///
    /// The event is dropped; retrying it cannot succeed.
    #[error("Malformed storage key '{key}': {reason}")]
    MalformedKey { key: String, reason: String },

    // ── Collaborators ─────────────────────────────────────────────────────
    /// An OCR, merge, storage or delivery call failed.
    #[error("{collaborator} call failed: {detail}")]
    Collaborator {
        collaborator: Collaborator,
        detail: String,
    },

    /// A layout page has no matching raw image under the document prefix.
    #[error("Document '{document}' has no raw image for page {page}")]
    MissingArtifact { document: String, page: u32 },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn malformed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::MalformedKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn collaborator(collaborator: Collaborator, detail: impl fmt::Display) -> Self {
        PipelineError::Collaborator {
            collaborator,
            detail: detail.to_string(),
        }
    }

    /// Whether redelivering the triggering event could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Collaborator { .. } | PipelineError::MissingArtifact { .. }
        )
    }
}

/// A non-fatal error for a single recipient.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum DeliveryError {
    /// The recipient's credential could not be loaded, refreshed or saved.
    #[error("Recipient '{recipient}': credentials unavailable: {detail}")]
    Credentials { recipient: String, detail: String },

    /// The destination rejected or failed the upload.
    #[error("Recipient '{recipient}': upload failed: {detail}")]
    UploadFailed { recipient: String, detail: String },
}

impl DeliveryError {
    pub fn recipient(&self) -> &str {
        match self {
            DeliveryError::Credentials { recipient, .. }
            | DeliveryError::UploadFailed { recipient, .. } => recipient,
        }
    }
}
