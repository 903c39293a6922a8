//! # scanit
//!
//! Turn scanned pages into searchable PDFs and deliver each one to the people
//! it belongs to, coordinated through nothing but object-store keys.
//!
//! ## Pipeline Overview
//!
//! ```text
//! <doc>/<nr>-<total>_<owners>.jpg     scanner upload
//!  │
//!  ├─ 1. OCR      detect text, resolve owners from keywords
//!  ├─ 2. Layout   hOCR stored as <doc>/<nr>-<total>_<owners>.hocr
//!  ├─ 3. Fan-in   list <doc>/, proceed only when all <total> layouts exist
//!  ├─ 4. Merge    one searchable PDF, owners = union of every page's owners
//!  └─ 5. Deliver  reconcile "unknown", send to each recipient independently
//! ```
//!
//! Every stage is a stateless reaction to one "object created" event. The
//! key of each artifact carries everything the next stage needs: document
//! identity, page sequence, page count and owners. There is no job table and
//! no lock; the fan-in is a re-evaluated listing check that tolerates being
//! run by several workers at once (see [`completion`]).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scanit::{
//!     DirectorySink, HocrRenderer, LocalRunner, MemoryStore, ObjectStore, PdfiumMerger,
//!     Pipeline, PipelineConfig, VlmOcrConfig, VlmTextDetector,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let pipeline = Pipeline::new(
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(VlmTextDetector::new(VlmOcrConfig::default())?),
//!         Arc::new(HocrRenderer),
//!         Arc::new(PdfiumMerger::new()),
//!         Arc::new(DirectorySink::new("delivered")),
//!         PipelineConfig::default(),
//!     );
//!     let mut runner = LocalRunner::new(pipeline);
//!     let page = tokio::fs::read("page1.jpg").await?;
//!     runner.store().put("scans", "1700000000/1-1_unknown.jpg", page).await?;
//!     for invocation in runner.run_until_idle().await {
//!         println!("{}: {:?}", invocation.event.key, invocation.result);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `scanit` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! scanit = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod address;
pub mod completion;
pub mod config;
pub mod delivery;
pub mod error;
pub mod event;
pub mod layout;
pub mod merge;
pub mod ocr;
pub mod owners;
pub mod processor;
pub mod progress;
pub mod prompts;
pub mod runner;
pub mod store;
pub mod title;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use address::{DocumentAddress, OwnerSet, Stage, UNKNOWN_OWNER};
pub use completion::{check_group, is_group_complete, settle_delay, GroupSnapshot, GroupStatus};
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use delivery::{
    reconcile_owners, CredentialBroker, DeliveryReport, DeliveryRouter, DirectorySink, DriveSink,
    OAuthRefresher, ObjectStoreCredentials, RecipientSink,
};
pub use error::{Collaborator, DeliveryError, PipelineError};
pub use event::StorageEvent;
pub use layout::{parse_hocr, HocrRenderer, LayoutRenderer};
pub use merge::{DocumentMerger, MergePage, PdfiumMerger};
pub use ocr::{OcrResult, TextDetector, VlmOcrConfig, VlmTextDetector};
pub use owners::KeywordTable;
pub use processor::{Pipeline, StageOutcome};
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback};
pub use runner::{Invocation, LocalRunner};
pub use store::{FsStore, MemoryStore, ObjectStore, StoreError};
pub use title::document_title;
