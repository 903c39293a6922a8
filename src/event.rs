//! Inbound trigger: "object `key` was created in `container`".
//!
//! Accepts the object-store notification shape used by GCS-style finalize
//! events (`bucket`/`name`) as well as the crate's own `container`/`key`.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageEvent {
    #[serde(alias = "bucket")]
    pub container: String,
    #[serde(alias = "name")]
    pub key: String,
}

impl StorageEvent {
    pub fn new(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            key: key.into(),
        }
    }

    /// Parse a JSON notification body. Unknown fields are ignored.
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(json)
            .map_err(|e| PipelineError::Internal(format!("invalid storage event: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_finalize_notification() {
        let e = StorageEvent::from_json(
            r#"{"bucket":"scans","name":"1700000000/1-2_unknown.jpg","size":"1024","contentType":"image/jpeg"}"#,
        )
        .unwrap();
        assert_eq!(e, StorageEvent::new("scans", "1700000000/1-2_unknown.jpg"));
    }

    #[test]
    fn reads_native_field_names() {
        let e = StorageEvent::from_json(r#"{"container":"scans","key":"T1/1-1_a.pdf"}"#).unwrap();
        assert_eq!(e.key, "T1/1-1_a.pdf");
    }

    #[test]
    fn rejects_missing_key() {
        assert!(StorageEvent::from_json(r#"{"bucket":"scans"}"#).is_err());
    }
}
