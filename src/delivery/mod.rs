//! Delivery: route a merged document to every recipient that owns it.
//!
//! Ownership is reconciled first ([`reconcile_owners`]), then each recipient
//! is delivered to independently and concurrently. One recipient failing
//! never stops the others; failures come back in the [`DeliveryReport`].
//!
//! Sinks:
//! * [`directory::DirectorySink`]: `<root>/<recipient>/<title>.pdf`
//! * [`drive::DriveSink`]: Google Drive upload with per-recipient OAuth
//!   credentials ([`credentials`])

pub mod credentials;
pub mod directory;
pub mod drive;

pub use credentials::{
    Credential, CredentialBroker, CredentialError, CredentialStore, OAuthRefresher,
    ObjectStoreCredentials, TokenRefresher,
};
pub use directory::DirectorySink;
pub use drive::DriveSink;

use crate::address::OwnerSet;
use crate::error::DeliveryError;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Trait abstracting over per-recipient destinations.
#[async_trait]
pub trait RecipientSink: Send + Sync {
    /// Deliver `document` to `recipient` under `title`.
    async fn deliver(&self, recipient: &str, document: &[u8], title: &str)
        -> Result<(), DeliveryError>;
}

/// Final recipients for a merged document.
///
/// * exactly `{"unknown"}` → the configured fallback set
/// * `"unknown"` plus real owners → the real owners
/// * otherwise unchanged
pub fn reconcile_owners(owners: &OwnerSet, fallback: &OwnerSet) -> OwnerSet {
    if owners.is_unknown() {
        return fallback.clone();
    }
    owners.without_unknown().unwrap_or_else(|| fallback.clone())
}

/// Outcome of delivering one document to all of its recipients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub title: String,
    /// Recipients that received the document, sorted.
    pub delivered: Vec<String>,
    /// Per-recipient failures, sorted by recipient.
    pub failed: Vec<DeliveryError>,
}

impl DeliveryReport {
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Fans a document out to its recipients through one sink.
#[derive(Clone)]
pub struct DeliveryRouter {
    sink: Arc<dyn RecipientSink>,
    concurrency: usize,
}

impl DeliveryRouter {
    pub fn new(sink: Arc<dyn RecipientSink>, concurrency: usize) -> Self {
        Self {
            sink,
            concurrency: concurrency.max(1),
        }
    }

    /// Deliver to every recipient; never fails as a whole.
    pub async fn deliver_all(
        &self,
        recipients: &OwnerSet,
        document: &[u8],
        title: &str,
    ) -> DeliveryReport {
        let results: Vec<(String, Result<(), DeliveryError>)> =
            stream::iter(recipients.iter().map(str::to_string).collect::<Vec<_>>())
                .map(|recipient| {
                    let sink = Arc::clone(&self.sink);
                    async move {
                        let result = sink.deliver(&recipient, document, title).await;
                        (recipient, result)
                    }
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        let mut report = DeliveryReport {
            title: title.to_string(),
            ..Default::default()
        };
        for (recipient, result) in results {
            match result {
                Ok(()) => {
                    info!("Delivered '{}' to {}", title, recipient);
                    report.delivered.push(recipient);
                }
                Err(e) => {
                    warn!("Delivery to {} failed: {}", recipient, e);
                    report.failed.push(e);
                }
            }
        }
        report.delivered.sort();
        report
            .failed
            .sort_by(|a, b| a.recipient().cmp(b.recipient()));
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn set(owners: &[&str]) -> OwnerSet {
        OwnerSet::new(owners.iter().copied()).unwrap()
    }

    #[test]
    fn unknown_alone_goes_to_fallback() {
        let fallback = set(&["sandy", "wouter"]);
        assert_eq!(reconcile_owners(&OwnerSet::unknown(), &fallback), fallback);
    }

    #[test]
    fn unknown_beside_real_owners_is_dropped() {
        let fallback = set(&["sandy", "wouter"]);
        assert_eq!(
            reconcile_owners(&set(&["unknown", "sandy"]), &fallback),
            set(&["sandy"])
        );
    }

    #[test]
    fn known_owners_are_kept() {
        let fallback = set(&["sandy", "wouter"]);
        assert_eq!(reconcile_owners(&set(&["wouter"]), &fallback), set(&["wouter"]));
    }

    struct FlakySink {
        fail_for: &'static str,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RecipientSink for FlakySink {
        async fn deliver(&self, recipient: &str, _doc: &[u8], _title: &str) -> Result<(), DeliveryError> {
            self.seen.lock().unwrap().push(recipient.to_string());
            if recipient == self.fail_for {
                return Err(DeliveryError::UploadFailed {
                    recipient: recipient.to_string(),
                    detail: "HTTP 503".into(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn one_failure_does_not_block_the_rest() {
        let sink = Arc::new(FlakySink {
            fail_for: "bob",
            seen: Mutex::new(Vec::new()),
        });
        let router = DeliveryRouter::new(sink.clone(), 2);
        let report = router
            .deliver_all(&set(&["alice", "bob", "carol"]), b"%PDF", "Doc")
            .await;

        assert_eq!(report.delivered, vec!["alice", "carol"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].recipient(), "bob");
        assert!(!report.is_complete_success());
        assert_eq!(sink.seen.lock().unwrap().len(), 3);
    }
}
