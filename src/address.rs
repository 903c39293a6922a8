//! Storage-key addressing: the identity of every artifact lives in its key.
//!
//! ```text
//! <documentKey>/<pageNumber>-<pageTotal>_<owner1>.<owner2>…<ext>
//! 1700000000   /3           -5          _sandy   .wouter  .hocr
//! ```
//!
//! A [`DocumentAddress`] is parsed once from the key of the object that
//! triggered a stage, possibly has its owners replaced after OCR, and is then
//! serialised to name the artifact that stage writes. Nothing else about a
//! document is persisted anywhere.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Owner sentinel meaning "ownership not determined yet".
pub const UNKNOWN_OWNER: &str = "unknown";

const OWNER_SEPARATOR: char = '.';

// ── Stage ────────────────────────────────────────────────────────────────

/// Pipeline stage of an artifact, serialised as its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Scanned page image (`jpg`).
    RawImage,
    /// hOCR text layout for one page (`hocr`).
    Layout,
    /// Merged searchable document (`pdf`).
    MergedDocument,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::RawImage, Stage::Layout, Stage::MergedDocument];

    pub fn extension(self) -> &'static str {
        match self {
            Stage::RawImage => "jpg",
            Stage::Layout => "hocr",
            Stage::MergedDocument => "pdf",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| s.extension() == ext)
    }

    /// Stage named by the trailing extension of `key`, if any.
    ///
    /// Used for dispatch before a full parse, so that objects the pipeline
    /// does not own are ignored rather than reported as malformed.
    pub fn of_key(key: &str) -> Option<Stage> {
        let file = key.rsplit('/').next().unwrap_or(key);
        file.rsplit_once('.')
            .and_then(|(_, ext)| Stage::from_extension(ext))
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

// ── OwnerSet ─────────────────────────────────────────────────────────────

/// A single owner must be non-empty and free of key separators.
pub fn validate_owner(owner: &str) -> Result<(), String> {
    if owner.is_empty() {
        return Err("empty owner".into());
    }
    if owner.contains([OWNER_SEPARATOR, '_', '/']) {
        return Err(format!("owner '{owner}' must not contain '.', '_' or '/'"));
    }
    Ok(())
}

/// Non-empty set of recipient identifiers.
///
/// Backed by a `BTreeSet` so the serialised form is sorted: equal sets always
/// produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct OwnerSet(BTreeSet<String>);

impl OwnerSet {
    /// `{"unknown"}`.
    pub fn unknown() -> Self {
        Self(BTreeSet::from([UNKNOWN_OWNER.to_string()]))
    }

    pub fn single(owner: impl Into<String>) -> Result<Self, String> {
        Self::new([owner])
    }

    /// Build a set from owners.
    ///
    /// Fails if `owners` is empty or a member cannot appear in a key's owner
    /// segment.
    pub fn new<I, S>(owners: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = BTreeSet::new();
        for owner in owners {
            let owner = owner.into();
            validate_owner(&owner)?;
            set.insert(owner);
        }
        if set.is_empty() {
            return Err("owner set must not be empty".into());
        }
        Ok(Self(set))
    }

    /// Parse the `<owner1>.<owner2>…` segment of a key.
    pub fn parse_segment(segment: &str) -> Result<Self, String> {
        if segment.is_empty() {
            return Err("owner segment is empty".into());
        }
        Self::new(segment.split(OWNER_SEPARATOR))
            .map_err(|e| format!("owner segment '{segment}': {e}"))
    }

    /// True when the set is exactly `{"unknown"}`.
    pub fn is_unknown(&self) -> bool {
        self.0.len() == 1 && self.0.contains(UNKNOWN_OWNER)
    }

    pub fn contains(&self, owner: &str) -> bool {
        self.0.contains(owner)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Add every member of `other`.
    pub fn extend_from(&mut self, other: &OwnerSet) {
        self.0.extend(other.0.iter().cloned());
    }

    /// The set with `"unknown"` removed, or `None` if nothing would remain.
    pub fn without_unknown(&self) -> Option<OwnerSet> {
        OwnerSet::new(self.iter().filter(|o| *o != UNKNOWN_OWNER)).ok()
    }
}

impl fmt::Display for OwnerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, owner) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "{OWNER_SEPARATOR}")?;
            }
            f.write_str(owner)?;
        }
        Ok(())
    }
}

impl TryFrom<Vec<String>> for OwnerSet {
    type Error = String;

    fn try_from(owners: Vec<String>) -> Result<Self, Self::Error> {
        OwnerSet::new(owners)
    }
}

impl From<OwnerSet> for Vec<String> {
    fn from(set: OwnerSet) -> Self {
        set.0.into_iter().collect()
    }
}

// ── DocumentAddress ──────────────────────────────────────────────────────

/// One artifact of one page of one document.
///
/// `document_key` + `page_number` identifies a page; `document_key` + `stage`
/// is a fan-in group whose expected size is `page_total`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentAddress {
    pub container: String,
    pub document_key: String,
    pub page_number: u32,
    pub page_total: u32,
    pub owners: OwnerSet,
    pub stage: Stage,
}

impl DocumentAddress {
    /// Parse a storage key into an address.
    ///
    /// # Errors
    /// [`PipelineError::MalformedKey`] when any separator is missing, the
    /// sequence fields are not decimal integers, the owner segment is empty
    /// or the extension is not a pipeline stage.
    pub fn parse(container: &str, key: &str) -> Result<Self, PipelineError> {
        let bad = |reason: &str| PipelineError::malformed(key, reason);

        let (document_key, file) = key
            .rsplit_once('/')
            .ok_or_else(|| bad("missing '/' between document key and file name"))?;
        if document_key.is_empty() {
            return Err(bad("document key is empty"));
        }

        let (seq, rest) = file
            .split_once('_')
            .ok_or_else(|| bad("missing '_' after page sequence"))?;
        if rest.contains('_') {
            return Err(bad("more than one '_' in file name"));
        }

        let (nr, total) = seq
            .split_once('-')
            .ok_or_else(|| bad("missing '-' in page sequence"))?;
        let page_number = parse_decimal(nr).ok_or_else(|| bad("page number is not an integer"))?;
        let page_total = parse_decimal(total).ok_or_else(|| bad("page total is not an integer"))?;
        if page_number == 0 || page_total == 0 {
            return Err(bad("page numbers are 1-based"));
        }
        if page_number > page_total {
            return Err(bad("page number exceeds page total"));
        }

        let (owners, ext) = rest
            .rsplit_once('.')
            .ok_or_else(|| bad("missing extension"))?;
        let stage =
            Stage::from_extension(ext).ok_or_else(|| bad(&format!("unknown extension '{ext}'")))?;
        let owners = OwnerSet::parse_segment(owners).map_err(|e| bad(&e))?;

        Ok(Self {
            container: container.to_string(),
            document_key: document_key.to_string(),
            page_number,
            page_total,
            owners,
            stage,
        })
    }

    /// Key of this address at its own stage.
    pub fn key(&self) -> String {
        self.key_for(self.stage)
    }

    /// Key of this page at `stage`, using the current owner set.
    pub fn key_for(&self, stage: Stage) -> String {
        format!(
            "{}/{}-{}_{}.{}",
            self.document_key,
            self.page_number,
            self.page_total,
            self.owners,
            stage.extension()
        )
    }

    /// The same page at another stage.
    pub fn at_stage(&self, stage: Stage) -> Self {
        Self {
            stage,
            ..self.clone()
        }
    }

    /// Listing prefix covering every artifact of this document.
    pub fn document_prefix(&self) -> String {
        format!("{}/", self.document_key)
    }

    /// `<container>/<key>`, for logs.
    pub fn locator(&self) -> String {
        format!("{}/{}", self.container, self.key())
    }
}

impl fmt::Display for DocumentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.locator())
    }
}

/// Decimal digits only: rejects signs, whitespace and empty strings that
/// `u32::from_str` would partly accept.
fn parse_decimal(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
