//! Fan-in detection: has every page of a document reached a stage?
//!
//! There is no counter to decrement and no lock to take. Each worker that
//! finishes a page re-lists the document prefix and counts the artifacts at
//! the stage it cares about; the group is complete iff that count equals the
//! document's `page_total` exactly.
//!
//! ## Known race
//!
//! When the last pages finish nearly together, more than one worker can see
//! the full count and proceed to the fan-in stage, producing duplicate merged
//! documents. Stage outputs are deterministic, so duplicates are equivalent
//! documents, not corrupt ones. [`settle_delay`] staggers the check to make
//! the race rarer; it does not remove it.
//!
//! A document that accumulates more artifacts than `page_total` (say, a page
//! re-scanned with a different owner suffix) is never judged complete.

use crate::address::{DocumentAddress, Stage};
use crate::store::{ObjectStore, StoreError};
use std::time::Duration;
use tracing::debug;

/// Snapshot of a fan-in group taken from one listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupStatus {
    pub found: usize,
    pub expected: u32,
}

impl GroupStatus {
    /// Exact equality: more artifacts than pages is not complete.
    pub fn is_complete(&self) -> bool {
        self.found == self.expected as usize
    }
}

/// Keys in `listing` that are `stage` artifacts of `address`'s document.
///
/// Only direct children of the document prefix count; `T1/sub/..` belongs to `T1/sub`.
pub fn matching_keys<'a>(
    listing: &'a [String],
    address: &DocumentAddress,
    stage: Stage,
) -> impl Iterator<Item = &'a String> + 'a {
    let prefix = address.document_prefix();
    listing
        .iter()
        .filter(move |key| {
            key.strip_prefix(&prefix)
                .is_some_and(|name| !name.contains('/'))
                && Stage::of_key(key) == Some(stage)
        })
}

/// Count `stage` artifacts of the document in a listing snapshot.
pub fn group_status(listing: &[String], address: &DocumentAddress, stage: Stage) -> GroupStatus {
    GroupStatus {
        found: matching_keys(listing, address, stage).count(),
        expected: address.page_total,
    }
}

/// Pure completion check over a listing snapshot.
pub fn is_group_complete(listing: &[String], address: &DocumentAddress, stage: Stage) -> bool {
    group_status(listing, address, stage).is_complete()
}

/// One listing of a document prefix and the group status it implies.
///
/// The fan-in stage works from the same listing it judged complete, so the
/// siblings it merges are exactly the ones it counted.
#[derive(Debug, Clone)]
pub struct GroupSnapshot {
    pub listing: Vec<String>,
    pub status: GroupStatus,
}

/// List the document prefix and evaluate the group at `stage`.
pub async fn check_group(
    store: &dyn ObjectStore,
    address: &DocumentAddress,
    stage: Stage,
) -> Result<GroupSnapshot, StoreError> {
    let listing = store
        .list_by_prefix(&address.container, &address.document_prefix())
        .await?;
    let status = group_status(&listing, address, stage);
    debug!(
        "{}: {}/{} {} artifacts",
        address.document_key, status.found, status.expected, stage
    );
    Ok(GroupSnapshot { listing, status })
}

/// Delay before the completion check: `min(step × (total − number), max)`.
///
/// Higher page numbers tend to finish last, so they wait least; early pages
/// give late ones a head start at claiming the fan-in.
pub fn settle_delay(address: &DocumentAddress, step: Duration, max: Duration) -> Duration {
    let remaining = address.page_total.saturating_sub(address.page_number);
    step.saturating_mul(remaining).min(max)
}
