//! Progress-callback trait for local runs.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::runner::LocalRunner::with_progress`] to hear about each storage
//! event as the runner queues and finishes it. The CLI forwards these to a
//! terminal progress bar; tests count them.
//!
//! # Example
//!
//! ```rust
//! use scanit::{RunProgressCallback, StageOutcome, StorageEvent};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     finished: AtomicUsize,
//! }
//!
//! impl RunProgressCallback for CountingCallback {
//!     fn on_event_complete(&self, event: &StorageEvent, _outcome: &StageOutcome) {
//!         let done = self.finished.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{done}: {}", event.key);
//!     }
//! }
//! ```

use crate::event::StorageEvent;
use crate::processor::StageOutcome;
use std::sync::Arc;

/// Called by [`crate::runner::LocalRunner`] as events move through the queue.
///
/// Events are processed concurrently, so every method may be called from
/// several tasks at once. All methods default to no-ops.
pub trait RunProgressCallback: Send + Sync {
    /// An event was taken off the queue and handed to a new invocation.
    fn on_event_queued(&self, event: &StorageEvent) {
        let _ = event;
    }

    /// An invocation finished without error.
    fn on_event_complete(&self, event: &StorageEvent, outcome: &StageOutcome) {
        let _ = (event, outcome);
    }

    /// An invocation failed.
    fn on_event_error(&self, event: &StorageEvent, error: &str) {
        let _ = (event, error);
    }

    /// The queue drained.
    ///
    /// # Arguments
    /// * `processed`: invocations run
    /// * `failed`:    invocations that returned an error
    fn on_run_complete(&self, processed: usize, failed: usize) {
        let _ = (processed, failed);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// Shared handle as stored by the runner.
pub type ProgressCallback = Arc<dyn RunProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TrackingCallback {
        queued: AtomicUsize,
        errors: AtomicUsize,
    }

    impl RunProgressCallback for TrackingCallback {
        fn on_event_queued(&self, _event: &StorageEvent) {
            self.queued.fetch_add(1, Ordering::SeqCst);
        }

        fn on_event_error(&self, _event: &StorageEvent, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn overridden_methods_fire_and_defaults_are_noops() {
        let cb = TrackingCallback {
            queued: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
        };
        let event = StorageEvent::new("scans", "T1/1-1_a.jpg");
        cb.on_event_queued(&event);
        cb.on_event_complete(&event, &StageOutcome::Ignored);
        cb.on_event_error(&event, "boom");
        cb.on_run_complete(1, 1);
        assert_eq!(cb.queued.load(Ordering::SeqCst), 1);
        assert_eq!(cb.errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn noop_is_object_safe() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_run_complete(0, 0);
    }
}
