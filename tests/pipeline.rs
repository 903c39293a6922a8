//! Integration tests for the scanit pipeline.
//!
//! Collaborators are in-memory fakes: OCR reads the "image" bytes as the
//! page's text, the merger writes a deterministic text rendition of its
//! input, and deliveries are recorded instead of sent. Everything else (key
//! codec, owner resolution, fan-in, reconciliation, titles) is the real code.
//!
//! The pdfium test at the bottom is gated behind `E2E_ENABLED`:
//!   E2E_ENABLED=1 PDFIUM_LIB_PATH=/path/to/libpdfium.so cargo test --test pipeline

use async_trait::async_trait;
use scanit::merge::MergeError;
use scanit::ocr::OcrError;
use scanit::{
    parse_hocr, DeliveryError, DirectorySink, DocumentMerger, FsStore, HocrRenderer, LocalRunner,
    MemoryStore, MergePage, ObjectStore, OcrResult, OwnerSet, PdfiumMerger, Pipeline,
    PipelineConfig, RecipientSink, StageOutcome, StorageEvent, TextDetector,
};
use std::sync::{Arc, Mutex};

// ── Test helpers ─────────────────────────────────────────────────────────────

const CONTAINER: &str = "scans";

struct EchoOcr;

#[async_trait]
impl TextDetector for EchoOcr {
    async fn detect_text(&self, _locator: &str, image: &[u8]) -> Result<Option<OcrResult>, OcrError> {
        let text = String::from_utf8_lossy(image);
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(OcrResult::from_plain_text(&text, 600, 800)))
    }
}

/// `title`, then `nr|image|layout text` per page.
struct TextMerger;

#[async_trait]
impl DocumentMerger for TextMerger {
    async fn merge(&self, pages: Vec<MergePage>, title: &str) -> Result<Vec<u8>, MergeError> {
        let mut out = format!("{title}\n");
        for page in pages {
            out.push_str(&format!(
                "{}|{}|{}\n",
                page.page_number,
                String::from_utf8_lossy(&page.image),
                parse_hocr(&page.layout).text()
            ));
        }
        Ok(out.into_bytes())
    }
}

#[derive(Default)]
struct RecordingSink {
    deliveries: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    fn recipients(&self) -> Vec<String> {
        let mut r: Vec<String> = self
            .deliveries
            .lock()
            .unwrap()
            .iter()
            .map(|(recipient, _)| recipient.clone())
            .collect();
        r.sort();
        r
    }
}

#[async_trait]
impl RecipientSink for RecordingSink {
    async fn deliver(&self, recipient: &str, _document: &[u8], title: &str) -> Result<(), DeliveryError> {
        self.deliveries
            .lock()
            .unwrap()
            .push((recipient.to_string(), title.to_string()));
        Ok(())
    }
}

fn pipeline_over(store: Arc<dyn ObjectStore>) -> (Pipeline, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let pipeline = Pipeline::new(
        store,
        Arc::new(EchoOcr),
        Arc::new(HocrRenderer),
        Arc::new(TextMerger),
        sink.clone(),
        PipelineConfig::default(),
    );
    (pipeline, sink)
}

fn event(key: &str) -> StorageEvent {
    StorageEvent::new(CONTAINER, key)
}

fn owners(list: &[&str]) -> OwnerSet {
    OwnerSet::new(list.iter().copied()).unwrap()
}

/// The three pages of document T1: one for sandy, one unresolvable, one for wouter.
async fn upload_t1(store: &dyn ObjectStore) {
    for (nr, text) in [(1, "Invoice for Sandra"), (2, "nothing here"), (3, "Dear Wouter")] {
        store
            .put(CONTAINER, &format!("T1/{nr}-3_unknown.jpg"), text.as_bytes().to_vec())
            .await
            .unwrap();
    }
}

async fn merged_keys(store: &dyn ObjectStore, document: &str) -> Vec<String> {
    store
        .list_by_prefix(CONTAINER, &format!("{document}/"))
        .await
        .unwrap()
        .into_iter()
        .filter(|k| k.ends_with(".pdf"))
        .collect()
}

// ── Scenario A: interleaved pages, one merge ─────────────────────────────────

#[tokio::test]
async fn scenario_a_fan_in_merges_once_with_owner_union() {
    let store = Arc::new(MemoryStore::new());
    upload_t1(&*store).await;
    let (pipeline, _) = pipeline_over(store.clone());

    let layout = |outcome: StageOutcome| match outcome {
        StageOutcome::LayoutStored { key, .. } => key,
        other => panic!("expected layout, got {other:?}"),
    };

    let l1 = layout(pipeline.handle_event(&event("T1/1-3_unknown.jpg")).await.unwrap());
    assert_eq!(l1, "T1/1-3_sandy.hocr");
    assert!(matches!(
        pipeline.handle_event(&event(&l1)).await.unwrap(),
        StageOutcome::AwaitingSiblings { found: 1, expected: 3 }
    ));

    let l2 = layout(pipeline.handle_event(&event("T1/2-3_unknown.jpg")).await.unwrap());
    assert_eq!(l2, "T1/2-3_unknown.hocr");
    let l3 = layout(pipeline.handle_event(&event("T1/3-3_unknown.jpg")).await.unwrap());
    assert_eq!(l3, "T1/3-3_wouter.hocr");

    assert!(matches!(
        pipeline.handle_event(&event(&l2)).await.unwrap(),
        StageOutcome::MergedStored { pages: 3, .. }
    ));
    let keys = merged_keys(&*store, "T1").await;
    assert_eq!(keys, vec!["T1/2-3_sandy.unknown.wouter.pdf"]);

    let merged = String::from_utf8(store.get(CONTAINER, &keys[0]).await.unwrap()).unwrap();
    assert_eq!(
        merged,
        "Scanned Document - T1\n\
         1|Invoice for Sandra|Invoice for Sandra\n\
         2|nothing here|nothing here\n\
         3|Dear Wouter|Dear Wouter\n"
    );
}

#[tokio::test]
async fn scenario_a_merged_document_reaches_every_resolved_owner() {
    let store = Arc::new(MemoryStore::new());
    upload_t1(&*store).await;
    let (pipeline, sink) = pipeline_over(store.clone());

    for nr in 1..=3 {
        pipeline
            .handle_event(&event(&format!("T1/{nr}-3_unknown.jpg")))
            .await
            .unwrap();
    }
    let outcome = pipeline.handle_event(&event("T1/3-3_wouter.hocr")).await.unwrap();
    let StageOutcome::MergedStored { key, owners: merged_owners, pages } = outcome else {
        panic!("expected a merge");
    };
    assert_eq!(pages, 3);
    assert_eq!(merged_owners, owners(&["sandy", "unknown", "wouter"]));

    pipeline.handle_event(&event(&key)).await.unwrap();
    assert_eq!(sink.recipients(), vec!["sandy", "wouter"]);
}

// ── Scenarios B and C: ownership reconciliation ──────────────────────────────

#[tokio::test]
async fn scenario_b_unknown_owner_goes_to_fallback_recipients() {
    let store = Arc::new(MemoryStore::new());
    store
        .put(CONTAINER, "1700000000/1-1_unknown.pdf", b"%PDF".to_vec())
        .await
        .unwrap();
    let (pipeline, sink) = pipeline_over(store);

    let outcome = pipeline
        .handle_event(&event("1700000000/1-1_unknown.pdf"))
        .await
        .unwrap();
    let StageOutcome::Delivered(report) = outcome else {
        panic!("expected delivery");
    };
    assert!(report.is_complete_success());
    assert_eq!(report.delivered, vec!["sandy", "wouter"]);
    assert_eq!(sink.recipients(), vec!["sandy", "wouter"]);
    assert!(sink
        .deliveries
        .lock()
        .unwrap()
        .iter()
        .all(|(_, title)| title == "Scanned Document - Tue 14 Nov 2023 at 17:13"));
}

#[tokio::test]
async fn scenario_c_unknown_beside_a_real_owner_is_dropped() {
    let store = Arc::new(MemoryStore::new());
    store
        .put(CONTAINER, "1700000000/1-1_sandy.unknown.pdf", b"%PDF".to_vec())
        .await
        .unwrap();
    let (pipeline, sink) = pipeline_over(store);

    pipeline
        .handle_event(&event("1700000000/1-1_sandy.unknown.pdf"))
        .await
        .unwrap();
    assert_eq!(sink.recipients(), vec!["sandy"]);
}

#[tokio::test]
async fn fallback_set_is_configurable() {
    let store = Arc::new(MemoryStore::new());
    store.put(CONTAINER, "T9/1-1_unknown.pdf", b"%PDF".to_vec()).await.unwrap();
    let sink = Arc::new(RecordingSink::default());
    let config = PipelineConfig::builder()
        .fallback_recipients(["archive"])
        .build()
        .unwrap();
    let pipeline = Pipeline::new(
        store,
        Arc::new(EchoOcr),
        Arc::new(HocrRenderer),
        Arc::new(TextMerger),
        sink.clone(),
        config,
    );

    pipeline.handle_event(&event("T9/1-1_unknown.pdf")).await.unwrap();
    assert_eq!(sink.recipients(), vec!["archive"]);
}

// ── Scenario D: the tolerated duplicate-merge race ───────────────────────────

#[tokio::test]
async fn scenario_d_concurrent_fan_in_produces_equivalent_duplicates() {
    let store = Arc::new(MemoryStore::new());
    upload_t1(&*store).await;
    let (pipeline, _) = pipeline_over(store.clone());
    for nr in 1..=3 {
        pipeline
            .handle_event(&event(&format!("T1/{nr}-3_unknown.jpg")))
            .await
            .unwrap();
    }

    // Both late layout events observe the complete group.
    let second = event("T1/2-3_unknown.hocr");
    let third = event("T1/3-3_wouter.hocr");
    let (a, b) = tokio::join!(pipeline.handle_event(&second), pipeline.handle_event(&third));
    let merged = |outcome: StageOutcome| match outcome {
        StageOutcome::MergedStored { key, owners, pages } => (key, owners, pages),
        other => panic!("expected merge, got {other:?}"),
    };
    let (key_a, owners_a, pages_a) = merged(a.unwrap());
    let (key_b, owners_b, pages_b) = merged(b.unwrap());

    assert_ne!(key_a, key_b);
    assert_eq!(owners_a, owners_b);
    assert_eq!(pages_a, pages_b);
    assert_eq!(
        store.get(CONTAINER, &key_a).await.unwrap(),
        store.get(CONTAINER, &key_b).await.unwrap()
    );
    assert_eq!(merged_keys(&*store, "T1").await.len(), 2);
}

// ── Fan-in edge cases ────────────────────────────────────────────────────────

#[tokio::test]
async fn extra_layout_for_a_page_blocks_the_merge() {
    let store = Arc::new(MemoryStore::new());
    for key in [
        "T1/1-3_sandy.hocr",
        "T1/2-3_unknown.hocr",
        "T1/2-3_sandy.hocr",
        "T1/3-3_wouter.hocr",
    ] {
        store.put(CONTAINER, key, Vec::new()).await.unwrap();
    }
    let (pipeline, _) = pipeline_over(store.clone());

    assert!(matches!(
        pipeline.handle_event(&event("T1/3-3_wouter.hocr")).await.unwrap(),
        StageOutcome::AwaitingSiblings { found: 4, expected: 3 }
    ));
    assert!(merged_keys(&*store, "T1").await.is_empty());
}

#[tokio::test]
async fn other_documents_sharing_a_prefix_do_not_count() {
    let store = Arc::new(MemoryStore::new());
    store.put(CONTAINER, "T1/1-2_a.hocr", Vec::new()).await.unwrap();
    store.put(CONTAINER, "T10/1-1_a.hocr", Vec::new()).await.unwrap();
    store.put(CONTAINER, "T10/1-1_a.jpg", Vec::new()).await.unwrap();
    let (pipeline, _) = pipeline_over(store);

    assert!(matches!(
        pipeline.handle_event(&event("T1/1-2_a.hocr")).await.unwrap(),
        StageOutcome::AwaitingSiblings { found: 1, expected: 2 }
    ));
}

#[tokio::test]
async fn malformed_and_foreign_keys_write_nothing() {
    let store = Arc::new(MemoryStore::new());
    let (pipeline, _) = pipeline_over(store.clone());

    for key in ["T1/a-3_sandy.jpg", "T1/1-3_.hocr", "T1/1-3sandy.pdf", "no-slash_1-1.jpg"] {
        assert!(
            matches!(
                pipeline.handle_event(&event(key)).await.unwrap(),
                StageOutcome::Dropped { .. }
            ),
            "{key}"
        );
    }
    for key in ["T1/readme.txt", "T1/1-3_sandy.png", "T1/"] {
        assert!(
            matches!(pipeline.handle_event(&event(key)).await.unwrap(), StageOutcome::Ignored),
            "{key}"
        );
    }
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn redelivered_raw_event_overwrites_the_same_layout() {
    let store = Arc::new(MemoryStore::new());
    upload_t1(&*store).await;
    let (pipeline, _) = pipeline_over(store.clone());

    pipeline.handle_event(&event("T1/1-3_unknown.jpg")).await.unwrap();
    pipeline.handle_event(&event("T1/1-3_unknown.jpg")).await.unwrap();
    let layouts: Vec<String> = store
        .list_by_prefix(CONTAINER, "T1/")
        .await
        .unwrap()
        .into_iter()
        .filter(|k| k.ends_with(".hocr"))
        .collect();
    assert_eq!(layouts, vec!["T1/1-3_sandy.hocr"]);
}

// ── Local runner ─────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_cascades_concurrently_to_equivalent_merges() {
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
    let (pipeline, sink) = pipeline_over(Arc::clone(&store));
    let mut runner = LocalRunner::new(pipeline);
    upload_t1(&*runner.store()).await;

    let invocations = runner.run_until_idle().await;
    assert!(invocations.iter().all(|i| i.result.is_ok()));

    let keys = merged_keys(&*store, "T1").await;
    assert!(!keys.is_empty());
    let first = store.get(CONTAINER, &keys[0]).await.unwrap();
    for key in &keys {
        assert!(key.ends_with("_sandy.unknown.wouter.pdf"), "{key}");
        assert_eq!(store.get(CONTAINER, key).await.unwrap(), first);
    }

    // Every merge is delivered to sandy and wouter, never to "unknown".
    let recipients = sink.recipients();
    assert_eq!(recipients.len(), 2 * keys.len());
    assert!(recipients.iter().all(|r| r == "sandy" || r == "wouter"));
}

#[tokio::test]
async fn runner_over_files_delivers_into_directories() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(FsStore::new(data.path()));
    store
        .put(CONTAINER, "1700000000/1-1_unknown.jpg", b"Attn: W.P.M. Petrus".to_vec())
        .await
        .unwrap();

    let pipeline = Pipeline::new(
        store,
        Arc::new(EchoOcr),
        Arc::new(HocrRenderer),
        Arc::new(TextMerger),
        Arc::new(DirectorySink::new(out.path())),
        PipelineConfig::default(),
    );
    let mut runner = LocalRunner::new(pipeline);
    runner.inject(StorageEvent::new(CONTAINER, "1700000000/1-1_unknown.jpg"));
    let invocations = runner.run_until_idle().await;
    assert_eq!(invocations.len(), 3);

    let delivered = out
        .path()
        .join("wouter")
        .join("Scanned Document - Tue 14 Nov 2023 at 17-13.pdf");
    let body = tokio::fs::read_to_string(delivered).await.unwrap();
    assert!(body.contains("1|Attn: W.P.M. Petrus|Attn: W.P.M. Petrus"));
    assert!(data
        .path()
        .join(CONTAINER)
        .join("1700000000")
        .join("1-1_wouter.pdf")
        .exists());
}

// ── pdfium (gated) ───────────────────────────────────────────────────────────

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([250, 250, 245]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut bytes, image::ImageFormat::Jpeg)
        .unwrap();
    bytes.into_inner()
}

#[tokio::test]
async fn pdfium_merge_produces_a_pdf() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP: set E2E_ENABLED=1 to run pdfium tests");
        return;
    }
    let merger = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) => PdfiumMerger::with_library(path),
        Err(_) => PdfiumMerger::new(),
    };
    let layout = String::from_utf8(scanit::LayoutRenderer::render(
        &HocrRenderer,
        Some(&OcrResult::from_plain_text("Invoice 42\nDear Sandra", 200, 300)),
    ))
    .unwrap();
    let pages = vec![
        MergePage {
            page_number: 1,
            image: jpeg(200, 300),
            layout,
        },
        MergePage {
            page_number: 2,
            image: jpeg(200, 300),
            layout: String::from_utf8(scanit::LayoutRenderer::render(&HocrRenderer, None)).unwrap(),
        },
    ];

    let pdf = merger.merge(pages, "Scanned Document - T1").await.unwrap();
    assert!(pdf.starts_with(b"%PDF"));
}
