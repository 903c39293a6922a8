//! Stage dispatch and the three stage handlers.
//!
//! ```text
//!  *.jpg ──OCR──▶ owners ──render──▶ *.hocr
//!                                      │ every page present?
//!                                      ├─ no  → AwaitingSiblings
//!                                      └─ yes → merge all pages ──▶ *.pdf
//!                                                                   │
//!                                             reconcile owners ◀────┘
//!                                             deliver to each recipient
//! ```
//!
//! Each call to [`Pipeline::handle_event`] is an independent invocation: it
//! reads only the object store and its own triggering key, and writes at most
//! one artifact. Many invocations may run at once for the same document.

use crate::address::{DocumentAddress, OwnerSet, Stage};
use crate::completion::{check_group, matching_keys, settle_delay};
use crate::config::PipelineConfig;
use crate::delivery::{reconcile_owners, DeliveryReport, DeliveryRouter, RecipientSink};
use crate::error::PipelineError;
use crate::event::StorageEvent;
use crate::layout::LayoutRenderer;
use crate::merge::{DocumentMerger, MergePage};
use crate::ocr::TextDetector;
use crate::store::ObjectStore;
use crate::title::document_title;
use futures::future::try_join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What one invocation did.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    /// The key is not a pipeline artifact.
    Ignored,
    /// The key looked like an artifact but could not be parsed.
    Dropped { key: String, reason: String },
    /// A layout artifact was written for one page.
    LayoutStored { key: String, owners: OwnerSet },
    /// Not every page has a layout yet.
    AwaitingSiblings { found: usize, expected: u32 },
    /// The merged document was written.
    MergedStored {
        key: String,
        owners: OwnerSet,
        pages: usize,
    },
    /// The merged document was routed to its recipients.
    Delivered(DeliveryReport),
}

/// The stateless stage processor with its collaborators.
#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn ObjectStore>,
    ocr: Arc<dyn TextDetector>,
    layout: Arc<dyn LayoutRenderer>,
    merger: Arc<dyn DocumentMerger>,
    router: DeliveryRouter,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        ocr: Arc<dyn TextDetector>,
        layout: Arc<dyn LayoutRenderer>,
        merger: Arc<dyn DocumentMerger>,
        sink: Arc<dyn RecipientSink>,
        config: PipelineConfig,
    ) -> Self {
        let router = DeliveryRouter::new(sink, config.delivery_concurrency);
        Self {
            store,
            ocr,
            layout,
            merger,
            router,
            config,
        }
    }

    /// The same pipeline reading and writing through another store.
    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = store;
        self
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Dispatch one storage event by the key's extension.
    ///
    /// Malformed keys are dropped with a warning rather than returned as
    /// errors: redelivering them cannot help.
    ///
    /// # Errors
    /// Any collaborator failure. No artifact has been written for this stage
    /// in that case, so redelivering the event retries the stage cleanly.
    pub async fn handle_event(&self, event: &StorageEvent) -> Result<StageOutcome, PipelineError> {
        let Some(stage) = Stage::of_key(&event.key) else {
            debug!("Ignoring {}/{}", event.container, event.key);
            return Ok(StageOutcome::Ignored);
        };

        let address = match DocumentAddress::parse(&event.container, &event.key) {
            Ok(address) => address,
            Err(e) => {
                warn!("Dropping event: {}", e);
                return Ok(StageOutcome::Dropped {
                    key: event.key.clone(),
                    reason: e.to_string(),
                });
            }
        };

        match stage {
            Stage::RawImage => self.process_raw_image(address).await,
            Stage::Layout => self.process_layout(address).await,
            Stage::MergedDocument => self.process_merged_document(address).await,
        }
    }

    // ── raw → layout ─────────────────────────────────────────────────────

    /// OCR one page, resolve its owners and store its layout.
    pub async fn process_raw_image(
        &self,
        address: DocumentAddress,
    ) -> Result<StageOutcome, PipelineError> {
        let image = self.store.get(&address.container, &address.key()).await?;
        let ocr = self.ocr.detect_text(&address.locator(), &image).await?;

        let mut layout_address = address.at_stage(Stage::Layout);
        let layout = match &ocr {
            Some(result) => {
                layout_address.owners = self.config.keywords.resolve(&result.full_text);
                debug!("{}: resolved owners {}", address, layout_address.owners);
                self.layout.render(Some(result))
            }
            None => {
                info!("{}: no text detected, storing placeholder layout", address);
                self.layout.render(None)
            }
        };

        let key = layout_address.key();
        self.store.put(&layout_address.container, &key, layout).await?;
        info!("Stored layout {}/{}", layout_address.container, key);
        Ok(StageOutcome::LayoutStored {
            key,
            owners: layout_address.owners,
        })
    }

    // ── layout → merged document ─────────────────────────────────────────

    /// Fan-in: merge the document once every page has a layout.
    pub async fn process_layout(
        &self,
        address: DocumentAddress,
    ) -> Result<StageOutcome, PipelineError> {
        let delay = settle_delay(&address, self.config.settle_step, self.config.settle_max);
        if !delay.is_zero() {
            debug!("{}: settling for {:?}", address, delay);
            tokio::time::sleep(delay).await;
        }

        let snapshot = check_group(self.store.as_ref(), &address, Stage::Layout).await?;
        if !snapshot.status.is_complete() {
            return Ok(StageOutcome::AwaitingSiblings {
                found: snapshot.status.found,
                expected: snapshot.status.expected,
            });
        }
        info!(
            "{}: all {} layouts present, merging",
            address.document_key, address.page_total
        );

        // Page order comes from re-parsing each sibling, never listing order.
        let mut layouts = matching_keys(&snapshot.listing, &address, Stage::Layout)
            .map(|key| DocumentAddress::parse(&address.container, key))
            .collect::<Result<Vec<_>, _>>()?;
        layouts.sort_by_key(|a| a.page_number);

        let mut owners: Option<OwnerSet> = None;
        for layout in &layouts {
            match owners.as_mut() {
                Some(union) => union.extend_from(&layout.owners),
                None => owners = Some(layout.owners.clone()),
            }
        }
        let owners = owners.ok_or_else(|| {
            PipelineError::Internal(format!("{}: complete group has no layouts", address))
        })?;

        let images = raw_images_by_page(&snapshot.listing, &address);
        let pages = try_join_all(layouts.iter().map(|layout| {
            let image_key = images.get(&layout.page_number).cloned();
            let layout_key = layout.key();
            async move {
                let image_key = image_key.ok_or_else(|| PipelineError::MissingArtifact {
                    document: layout.document_key.clone(),
                    page: layout.page_number,
                })?;
                let (image, hocr) = futures::try_join!(
                    self.store.get(&layout.container, &image_key),
                    self.store.get(&layout.container, &layout_key),
                )?;
                Ok::<_, PipelineError>(MergePage {
                    page_number: layout.page_number,
                    image,
                    layout: String::from_utf8_lossy(&hocr).into_owned(),
                })
            }
        }))
        .await?;

        let title = document_title(&address.document_key, &self.config);
        let page_count = pages.len();
        let merged = self.merger.merge(pages, &title).await?;

        let mut merged_address = address.at_stage(Stage::MergedDocument);
        merged_address.owners = owners;
        let key = merged_address.key();
        self.store.put(&merged_address.container, &key, merged).await?;
        info!(
            "Stored merged document {}/{} ({} pages)",
            merged_address.container, key, page_count
        );
        Ok(StageOutcome::MergedStored {
            key,
            owners: merged_address.owners,
            pages: page_count,
        })
    }

    // ── merged document → delivered ──────────────────────────────────────

    /// Reconcile ownership and deliver to every recipient.
    pub async fn process_merged_document(
        &self,
        address: DocumentAddress,
    ) -> Result<StageOutcome, PipelineError> {
        let document = self.store.get(&address.container, &address.key()).await?;
        let recipients = reconcile_owners(&address.owners, &self.config.fallback_recipients);
        let title = document_title(&address.document_key, &self.config);
        debug!("{}: delivering '{}' to {}", address, title, recipients);

        let report = self.router.deliver_all(&recipients, &document, &title).await;
        if !report.is_complete_success() {
            warn!(
                "{}: {}/{} deliveries failed",
                address,
                report.failed.len(),
                recipients.len()
            );
        }
        Ok(StageOutcome::Delivered(report))
    }
}

/// Raw-image key per page number; the first key in listing order wins.
fn raw_images_by_page(listing: &[String], address: &DocumentAddress) -> BTreeMap<u32, String> {
    let mut images = BTreeMap::new();
    for key in matching_keys(listing, address, Stage::RawImage) {
        match DocumentAddress::parse(&address.container, key) {
            Ok(raw) => {
                images.entry(raw.page_number).or_insert_with(|| key.clone());
            }
            Err(e) => warn!("Skipping raw image: {}", e),
        }
    }
    images
}
