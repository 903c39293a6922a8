//! CLI binary for scanit.
//!
//! A thin shim over the library crate: maps flags onto `PipelineConfig`,
//! wires the collaborators, injects the given keys as creation events and
//! runs the local event loop until every cascade has finished.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use scanit::{
    CredentialBroker, DirectorySink, DriveSink, FsStore, HocrRenderer, KeywordTable, LocalRunner,
    OAuthRefresher, ObjectStore, ObjectStoreCredentials, PdfiumMerger, Pipeline, PipelineConfig,
    ProgressCallback, RecipientSink, RunProgressCallback, StageOutcome, StorageEvent,
    VlmOcrConfig, VlmTextDetector,
};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner plus one log line per finished invocation. The total is unknown up
/// front: every stored artifact queues another event.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {pos} done  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Processing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

fn summarise(outcome: &StageOutcome) -> String {
    match outcome {
        StageOutcome::Ignored => "ignored".to_string(),
        StageOutcome::Dropped { reason, .. } => format!("dropped: {reason}"),
        StageOutcome::LayoutStored { key, .. } => format!("→ {key}"),
        StageOutcome::AwaitingSiblings { found, expected } => {
            format!("waiting ({found}/{expected} pages)")
        }
        StageOutcome::MergedStored { key, pages, .. } => format!("→ {key} ({pages} pages)"),
        StageOutcome::Delivered(report) => {
            let mut s = format!("delivered '{}' to {}", report.title, report.delivered.join(", "));
            if !report.failed.is_empty() {
                s.push_str(&format!(" ({} failed)", report.failed.len()));
            }
            s
        }
    }
}

impl RunProgressCallback for CliProgressCallback {
    fn on_event_queued(&self, event: &StorageEvent) {
        self.bar.set_message(event.key.clone());
    }

    fn on_event_complete(&self, event: &StorageEvent, outcome: &StageOutcome) {
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            event.key,
            dim(&summarise(outcome))
        ));
        self.bar.inc(1);
    }

    fn on_event_error(&self, event: &StorageEvent, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        // Truncate very long error messages to keep output tidy.
        let msg = match error.char_indices().nth(79) {
            Some((idx, _)) => format!("{}\u{2026}", &error[..idx]),
            None => error.to_string(),
        };
        self.bar
            .println(format!("  {} {}  {}", red("✗"), event.key, red(&msg)));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, processed: usize, failed: usize) {
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!("{} {} events processed", green("✔"), bold(&processed.to_string()));
        } else {
            eprintln!(
                "{} {} events processed  ({} failed)",
                red("✘"),
                bold(&processed.to_string()),
                red(&failed.to_string())
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Process a scanned page already stored under ./scanit-data/scans/
  scanit 1700000000/1-1_unknown.jpg

  # Three-page document, delivered to ./out/<recipient>/
  scanit --deliver-dir out 1700000000/1-3_unknown.jpg 1700000000/2-3_unknown.jpg 1700000000/3-3_unknown.jpg

  # Deliver to Google Drive using credentials in ./scanit-data/scanit-config/<recipient>.json
  scanit --drive 1700000000/1-1_unknown.jpg

  # Custom keyword table and fallback recipients
  scanit --keywords keywords.json --fallback alice,bob 1700000000/1-1_unknown.jpg

KEY FORMAT:
  <documentKey>/<pageNumber>-<pageTotal>_<owner1>.<owner2>….<jpg|hocr|pdf>

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_PROVIDER      Override OCR provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override OCR model ID
  PDFIUM_LIB_PATH         Path to libpdfium; the system library otherwise
  RUST_LOG                Log filter; overrides --verbose / --quiet
"#;

/// Run scanned pages through OCR, fan-in merge and delivery.
#[derive(Parser, Debug)]
#[command(
    name = "scanit",
    version,
    about = "Turn scanned pages into searchable PDFs and deliver them to their owners",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Storage keys of objects to treat as newly created.
    #[arg(required = true)]
    keys: Vec<String>,

    /// Root directory of the file-system object store.
    #[arg(long, env = "SCANIT_ROOT", default_value = "scanit-data")]
    root: PathBuf,

    /// Container the keys live in.
    #[arg(long, env = "SCANIT_CONTAINER", default_value = "scans")]
    container: String,

    /// Deliver into <dir>/<recipient>/<title>.pdf.
    #[arg(long, env = "SCANIT_DELIVER_DIR", default_value = "delivered", conflicts_with = "drive")]
    deliver_dir: PathBuf,

    /// Deliver to each recipient's Google Drive instead of a directory.
    #[arg(long, env = "SCANIT_DRIVE")]
    drive: bool,

    /// Container holding <recipient>.json OAuth credentials.
    #[arg(long, env = "SCANIT_CONFIG_CONTAINER", default_value = "scanit-config")]
    config_container: String,

    /// JSON keyword table: {"recipient": ["term", …], …}.
    #[arg(long, env = "SCANIT_KEYWORDS")]
    keywords: Option<PathBuf>,

    /// Recipients of documents with no resolved owner (comma-separated).
    #[arg(long, env = "SCANIT_FALLBACK", value_delimiter = ',')]
    fallback: Vec<String>,

    /// IANA timezone for document titles.
    #[arg(long, env = "SCANIT_TIMEZONE", default_value = "America/New_York")]
    timezone: String,

    /// strftime pattern for document titles.
    #[arg(long, env = "SCANIT_TITLE_FORMAT")]
    title_format: Option<String>,

    /// Concurrent deliveries per document.
    #[arg(long, env = "SCANIT_DELIVERY_CONCURRENCY", default_value_t = 4)]
    delivery_concurrency: usize,

    /// Per-remaining-page delay before the fan-in check, in ms (0 = off).
    #[arg(long, env = "SCANIT_SETTLE_STEP_MS", default_value_t = 0)]
    settle_step_ms: u64,

    /// Upper bound on the fan-in delay, in ms.
    #[arg(long, env = "SCANIT_SETTLE_MAX_MS", default_value_t = 5000)]
    settle_max_ms: u64,

    /// OCR model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// OCR provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Retries per OCR call.
    #[arg(long, env = "SCANIT_OCR_RETRIES", default_value_t = 0)]
    ocr_retries: u32,

    /// Path to the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Print invocation outcomes as JSON on stdout.
    #[arg(long, env = "SCANIT_JSON")]
    json: bool,

    /// Disable progress output.
    #[arg(long, env = "SCANIT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SCANIT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SCANIT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress lines cover what INFO logs would say.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build pipeline ───────────────────────────────────────────────────
    let config = build_config(&cli).await?;
    let store: Arc<dyn ObjectStore> = Arc::new(FsStore::new(&cli.root));

    let ocr = VlmTextDetector::new(VlmOcrConfig {
        model: cli.model.clone(),
        provider_name: cli.provider.clone(),
        max_retries: cli.ocr_retries,
        ..Default::default()
    })
    .context("Failed to set up OCR provider")?;

    let merger = match &cli.pdfium_lib {
        Some(path) => PdfiumMerger::with_library(path),
        None => PdfiumMerger::new(),
    };

    let sink: Arc<dyn RecipientSink> = if cli.drive {
        let credentials = ObjectStoreCredentials::new(Arc::clone(&store), &config.config_container);
        let client = reqwest::Client::new();
        let broker = CredentialBroker::new(
            Arc::new(credentials),
            Arc::new(OAuthRefresher::new(client.clone())),
        );
        Arc::new(DriveSink::new(broker, client))
    } else {
        Arc::new(DirectorySink::new(&cli.deliver_dir))
    };

    let pipeline = Pipeline::new(
        store,
        Arc::new(ocr),
        Arc::new(HocrRenderer),
        Arc::new(merger),
        sink,
        config,
    );

    let mut runner = LocalRunner::new(pipeline);
    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        runner = runner.with_progress(cb);
    }

    // ── Run ──────────────────────────────────────────────────────────────
    for key in &cli.keys {
        runner.inject(StorageEvent::new(&cli.container, key));
    }
    let invocations = runner.run_until_idle().await;
    let failed = invocations.iter().filter(|i| i.result.is_err()).count();

    if cli.json {
        let records: Vec<serde_json::Value> = invocations
            .iter()
            .map(|i| match &i.result {
                Ok(outcome) => serde_json::json!({
                    "container": i.event.container,
                    "key": i.event.key,
                    "result": outcome,
                }),
                Err(e) => serde_json::json!({
                    "container": i.event.container,
                    "key": i.event.key,
                    "error": e.to_string(),
                    "retryable": e.is_retryable(),
                }),
            })
            .collect();
        let json = serde_json::to_string_pretty(&records).context("Failed to serialise outcomes")?;
        println!("{json}");
    } else if !cli.quiet && !show_progress {
        eprintln!("Processed {} events, {} failed", invocations.len(), failed);
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} invocations failed", invocations.len());
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .display_timezone(&cli.timezone)
        .delivery_concurrency(cli.delivery_concurrency)
        .settle_step(Duration::from_millis(cli.settle_step_ms))
        .settle_max(Duration::from_millis(cli.settle_max_ms))
        .config_container(&cli.config_container);

    if !cli.fallback.is_empty() {
        builder = builder.fallback_recipients(cli.fallback.iter().map(|s| s.trim().to_string()));
    }
    if let Some(ref format) = cli.title_format {
        builder = builder.title_format(format);
    }
    if let Some(ref path) = cli.keywords {
        let table = KeywordTable::load(path)
            .await
            .with_context(|| format!("Failed to load keyword table from {:?}", path))?;
        builder = builder.keywords(table);
    }

    builder.build().context("Invalid configuration")
}
