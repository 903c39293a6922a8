//! Local event loop: the object store notifies, the pipeline reacts.
//!
//! In production each storage event invokes the pipeline from outside. For
//! local runs [`LocalRunner`] closes that loop itself: it wraps the store so
//! every successful `put` queues a [`StorageEvent`], and runs one independent
//! tokio task per event until nothing is left to do.
//!
//! Tasks share nothing but the store, so two layout events for the last pages
//! of a document can both see a complete group and both merge, exactly as
//! concurrent cloud invocations would.

use crate::error::PipelineError;
use crate::event::StorageEvent;
use crate::processor::{Pipeline, StageOutcome};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::store::{ObjectStore, StoreError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Store wrapper that queues a creation event after each write.
pub struct NotifyingStore {
    inner: Arc<dyn ObjectStore>,
    events: mpsc::UnboundedSender<StorageEvent>,
}

#[async_trait]
impl ObjectStore for NotifyingStore {
    async fn put(&self, container: &str, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.inner.put(container, key, bytes).await?;
        if self.events.send(StorageEvent::new(container, key)).is_err() {
            debug!("Runner gone; not queueing {}/{}", container, key);
        }
        Ok(())
    }

    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        self.inner.get(container, key).await
    }

    async fn list_by_prefix(&self, container: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.list_by_prefix(container, prefix).await
    }
}

/// One finished invocation.
#[derive(Debug)]
pub struct Invocation {
    pub event: StorageEvent,
    pub result: Result<StageOutcome, PipelineError>,
}

/// Drives a [`Pipeline`] from its own store's write events.
pub struct LocalRunner {
    pipeline: Pipeline,
    store: Arc<dyn ObjectStore>,
    sender: mpsc::UnboundedSender<StorageEvent>,
    events: mpsc::UnboundedReceiver<StorageEvent>,
    progress: ProgressCallback,
}

impl LocalRunner {
    /// Wrap `pipeline`'s store so its writes feed back in as events.
    pub fn new(pipeline: Pipeline) -> Self {
        let (sender, events) = mpsc::unbounded_channel();
        let store: Arc<dyn ObjectStore> = Arc::new(NotifyingStore {
            inner: Arc::clone(pipeline.store()),
            events: sender.clone(),
        });
        Self {
            pipeline: pipeline.with_store(Arc::clone(&store)),
            store,
            sender,
            events,
            progress: Arc::new(NoopProgressCallback),
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    /// The notifying store. Writing through it queues events.
    pub fn store(&self) -> Arc<dyn ObjectStore> {
        Arc::clone(&self.store)
    }

    /// Queue an event for an object that already exists.
    pub fn inject(&self, event: StorageEvent) {
        // The receiver lives in `self`, so the channel is open.
        let _ = self.sender.send(event);
    }

    /// Process queued events, and every event they cause, until idle.
    ///
    /// Invocations are returned in completion order.
    pub async fn run_until_idle(&mut self) -> Vec<Invocation> {
        let mut tasks = JoinSet::new();
        let mut finished = Vec::new();
        let mut failed = 0usize;

        loop {
            while let Ok(event) = self.events.try_recv() {
                self.progress.on_event_queued(&event);
                let pipeline = self.pipeline.clone();
                tasks.spawn(async move {
                    let result = pipeline.handle_event(&event).await;
                    Invocation { event, result }
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            match joined {
                Ok(invocation) => {
                    match &invocation.result {
                        Ok(outcome) => self.progress.on_event_complete(&invocation.event, outcome),
                        Err(e) => {
                            failed += 1;
                            warn!("{}/{} failed: {}", invocation.event.container, invocation.event.key, e);
                            self.progress.on_event_error(&invocation.event, &e.to_string());
                        }
                    }
                    finished.push(invocation);
                }
                Err(e) => {
                    failed += 1;
                    warn!("Invocation task aborted: {}", e);
                }
            }
        }

        info!("Runner idle after {} invocations ({} failed)", finished.len(), failed);
        self.progress.on_run_complete(finished.len(), failed);
        finished
    }
}
