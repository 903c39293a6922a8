//! Content-derived ownership: map OCR text to the recipients it belongs to.
//!
//! The keyword table is data, not code. It changes far more often than the
//! pipeline does, so it is loaded from JSON and injected through
//! [`crate::config::PipelineConfig`]:
//!
//! ```json
//! { "sandy": ["sandy", "sandra"], "wouter": ["wouter", "w.p.m."] }
//! ```

use crate::address::{OwnerSet, UNKNOWN_OWNER};
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Recipient → keyword terms. Terms are matched as lower-case substrings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, Vec<String>>", into = "BTreeMap<String, Vec<String>>")]
pub struct KeywordTable {
    recipients: BTreeMap<String, Vec<String>>,
}

impl KeywordTable {
    /// Build a table, lower-casing every term.
    ///
    /// # Errors
    /// [`PipelineError::InvalidConfig`] if a recipient id is empty, is the
    /// `"unknown"` sentinel, or contains a character that cannot appear in a
    /// storage key's owner segment (`.`, `_`, `/`).
    pub fn new(recipients: BTreeMap<String, Vec<String>>) -> Result<Self, PipelineError> {
        let mut normalised = BTreeMap::new();
        for (recipient, terms) in recipients {
            validate_recipient_id(&recipient)?;
            let terms: Vec<String> = terms
                .into_iter()
                .map(|t| t.to_lowercase())
                .filter(|t| !t.is_empty())
                .collect();
            normalised.insert(recipient, terms);
        }
        Ok(Self {
            recipients: normalised,
        })
    }

    /// Parse a table from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(json)
            .map_err(|e| PipelineError::InvalidConfig(format!("keyword table: {e}")))
    }

    /// Read a JSON table from disk.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            PipelineError::InvalidConfig(format!("reading keyword table {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.recipients.keys().map(String::as_str)
    }

    pub fn terms(&self, recipient: &str) -> Option<&[String]> {
        self.recipients.get(recipient).map(Vec::as_slice)
    }

    /// Recipients whose terms occur in `text`, or `{"unknown"}` if none do.
    ///
    /// Pure and deterministic: a page can belong to several recipients.
    pub fn resolve(&self, text: &str) -> OwnerSet {
        let text = text.to_lowercase();
        let matched = self
            .recipients
            .iter()
            .filter(|(_, terms)| terms.iter().any(|term| text.contains(term.as_str())))
            .map(|(recipient, _)| recipient.clone());
        let owners = OwnerSet::new(matched).unwrap_or_else(|_| OwnerSet::unknown());
        debug!("Owners found in text: {}", owners);
        owners
    }
}

impl Default for KeywordTable {
    fn default() -> Self {
        let table = [
            ("sandy", &["sandy", "sandra", "bounds", "leiko"][..]),
            ("wouter", &["wouter", "wpm", "w.p.m.", "petrus", "maria", "bie"][..]),
        ];
        Self {
            recipients: table
                .iter()
                .map(|(r, terms)| (r.to_string(), terms.iter().map(|t| t.to_string()).collect()))
                .collect(),
        }
    }
}

impl TryFrom<BTreeMap<String, Vec<String>>> for KeywordTable {
    type Error = PipelineError;

    fn try_from(map: BTreeMap<String, Vec<String>>) -> Result<Self, Self::Error> {
        Self::new(map)
    }
}

impl From<KeywordTable> for BTreeMap<String, Vec<String>> {
    fn from(table: KeywordTable) -> Self {
        table.recipients
    }
}

/// Recipient ids end up inside storage keys, so they follow the owner grammar.
pub(crate) fn validate_recipient_id(id: &str) -> Result<(), PipelineError> {
    if id.is_empty() {
        return Err(PipelineError::InvalidConfig("empty recipient id".into()));
    }
    if id == UNKNOWN_OWNER {
        return Err(PipelineError::InvalidConfig(format!(
            "'{UNKNOWN_OWNER}' is reserved and cannot be a recipient"
        )));
    }
    if id.contains(['.', '_', '/']) {
        return Err(PipelineError::InvalidConfig(format!(
            "recipient id '{id}' must not contain '.', '_' or '/'"
        )));
    }
    Ok(())
}
