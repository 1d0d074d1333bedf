//! CLI binary for examtract.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use examtract::{
    AnchorDetector, DocumentProcessor, ExtractionConfig, ExtractionMode, ExtractionPipeline,
    GeminiConfig, GeminiLlm, LlmPort, LocalStorage, MockOcr, OcrPort, ProcessedDocument,
    QuestionCropper, ReviewStatus,
};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Offline extraction of one exam sheet (PDF text layer / OCR)
  examtract exam.pdf

  # Full JSON records, written to a file
  examtract exam.pdf --json -o exam.json

  # Multimodal extraction with per-question crop images
  export EXAMTRACT_GEMINI_API_KEY=...
  examtract --mode gemini-full --crops ./crops exam.pdf

  # Batch a directory of scans, four documents at a time
  examtract ./scans --crops ./crops -c 4

EXTRACTION MODES:
  Mode          Text source                      API key  On failure
  ───────────   ──────────────────────────────   ───────  ─────────────────
  hybrid        PDF text layer → OCR → UTF-8     no       placeholder text
  gemini-full   multimodal model, page by page   yes      run fails

ENVIRONMENT VARIABLES:
  EXAMTRACT_GEMINI_API_KEY  Gemini API key (gemini-full mode, hybrid refinement)
  EXAMTRACT_GEMINI_MODEL    Override the model ID (default: gemini-2.5-flash)
  PDFIUM_LIB_PATH           Path to an existing libpdfium
  RUST_LOG                  Tracing filter; overrides -v/-q

SETUP:
  1. Optional: install tesseract with kor+eng data and build with
     `--features tesseract` for local OCR of scanned images.
  2. Optional: export EXAMTRACT_GEMINI_API_KEY=... to enable the LLM paths.
  3. examtract exam.pdf
"#;

/// Extract structured questions from exam documents.
#[derive(Parser, Debug)]
#[command(
    name = "examtract",
    version,
    about = "Extract per-question records and crop images from exam documents",
    long_about = "Extract per-question records (number, text, answer choices, confidence) and \
cropped question images from scanned exam documents. Runs fully offline in hybrid mode \
(PDF text layer / OCR chain) or page by page through a multimodal Gemini model.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Exam document (PDF/PNG/JPG) or a directory of them.
    input: PathBuf,

    /// Write JSON results to this file instead of stdout.
    #[arg(short, long, env = "EXAMTRACT_OUTPUT")]
    output: Option<PathBuf>,

    /// Extraction mode: hybrid or gemini-full.
    #[arg(long, env = "EXAMTRACT_MODE", default_value = "hybrid")]
    mode: String,

    /// Gemini API key (required for gemini-full mode).
    #[arg(long, env = "EXAMTRACT_GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    /// Gemini model ID.
    #[arg(long, env = "EXAMTRACT_GEMINI_MODEL")]
    model: Option<String>,

    /// OCR language string handed to tesseract.
    #[arg(long, env = "EXAMTRACT_OCR_LANG", default_value = "kor+eng")]
    lang: String,

    /// Directory for cropped question images; enables the cropper.
    #[arg(long, env = "EXAMTRACT_CROPS")]
    crops: Option<PathBuf>,

    /// Storage prefix for crop keys. Default: the input file stem.
    #[arg(long, env = "EXAMTRACT_SET_ID")]
    set_id: Option<String>,

    /// Documents processed concurrently in batch mode.
    #[arg(short, long, env = "EXAMTRACT_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Skip the hybrid LLM refinement pass even when a key is set.
    #[arg(long, env = "EXAMTRACT_NO_LLM")]
    no_llm: bool,

    /// Output full JSON records instead of the human summary.
    #[arg(long, env = "EXAMTRACT_JSON")]
    json: bool,

    /// Disable the batch progress bar.
    #[arg(long, env = "EXAMTRACT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "EXAMTRACT_VERBOSE")]
    verbose: bool,

    /// Suppress everything except errors and results.
    #[arg(short, long, env = "EXAMTRACT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let mode: ExtractionMode = cli.mode.parse().context("Invalid --mode")?;
    let processor = Arc::new(build_processor(&cli, mode).await?);

    if cli.input.is_dir() {
        run_batch(&cli, processor).await
    } else {
        run_single(&cli, processor).await
    }
}

/// Map CLI args to a ready-to-run `DocumentProcessor`.
async fn build_processor(cli: &Cli, mode: ExtractionMode) -> Result<DocumentProcessor> {
    let config = ExtractionConfig::builder()
        .mode(mode)
        .llm_enabled(!cli.no_llm)
        .ocr_lang(cli.lang.as_str())
        .build()
        .context("Invalid configuration")?;

    let ocr = build_ocr(&config);
    let llm = build_llm(cli, mode)?;

    let mut pipeline = ExtractionPipeline::new(Arc::clone(&ocr), config.clone());
    if let Some(llm) = llm {
        pipeline = pipeline.with_llm(llm);
    }

    let mut processor = DocumentProcessor::new(pipeline);
    if let Some(ref dir) = cli.crops {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create crop directory {:?}", dir))?;
        let storage = Arc::new(LocalStorage::new(dir));
        let detector = AnchorDetector::new(ocr, None, config.layout);
        processor = processor.with_cropper(QuestionCropper::new(storage, detector, config.layout));
    }
    Ok(processor)
}

/// Local tesseract when compiled in. Falling back to `MockOcr` keeps the
/// PDF-text-layer and multimodal paths usable without a local engine; OCR
/// strategies then degrade to the placeholder result instead of erroring.
#[cfg(feature = "tesseract")]
fn build_ocr(config: &ExtractionConfig) -> Arc<dyn OcrPort> {
    match examtract::ports::TesseractOcr::new(config.ocr_lang.as_str()) {
        Ok(ocr) => Arc::new(ocr),
        Err(e) => {
            tracing::warn!(error = %e, "tesseract unavailable, OCR strategies will degrade");
            Arc::new(MockOcr)
        }
    }
}

#[cfg(not(feature = "tesseract"))]
fn build_ocr(_config: &ExtractionConfig) -> Arc<dyn OcrPort> {
    Arc::new(MockOcr)
}

fn build_llm(cli: &Cli, mode: ExtractionMode) -> Result<Option<Arc<dyn LlmPort>>> {
    let key = cli
        .gemini_api_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty());

    match (key, mode) {
        (Some(key), _) => {
            let mut gemini = GeminiConfig::new(key);
            if let Some(ref model) = cli.model {
                gemini = gemini.model(model.as_str());
            }
            let llm = GeminiLlm::new(gemini).context("Failed to initialise the Gemini adapter")?;
            Ok(Some(Arc::new(llm)))
        }
        (None, ExtractionMode::GeminiFull) => anyhow::bail!(
            "gemini-full mode needs an API key: set EXAMTRACT_GEMINI_API_KEY or pass --gemini-api-key"
        ),
        (None, ExtractionMode::Hybrid) => Ok(None),
    }
}

// ── Single-document run ──────────────────────────────────────────────────────

async fn run_single(cli: &Cli, processor: Arc<DocumentProcessor>) -> Result<()> {
    let set_id = cli
        .set_id
        .clone()
        .unwrap_or_else(|| default_set_id(&cli.input));
    let doc = process_file(&processor, &cli.input, &set_id).await?;

    if cli.json || cli.output.is_some() {
        let value = serde_json::to_value(&doc).context("Failed to serialise result")?;
        emit_json(cli, &value)?;
    } else {
        print_document(&cli.input.display().to_string(), &doc);
    }
    Ok(())
}

// ── Batch run over a directory ───────────────────────────────────────────────

async fn run_batch(cli: &Cli, processor: Arc<DocumentProcessor>) -> Result<()> {
    let files = collect_documents(&cli.input)?;
    if files.is_empty() {
        anyhow::bail!("No PDF/PNG/JPG documents found in {:?}", cli.input);
    }

    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && cli.output.is_none();
    let bar = batch_bar(files.len(), show_progress);

    let mut tasks = stream::iter(files.into_iter().map(|path| {
        let processor = Arc::clone(&processor);
        let prefix = cli.set_id.clone();
        async move {
            // A shared --set-id becomes a prefix so crops from different
            // documents cannot overwrite each other.
            let stem = default_set_id(&path);
            let set_id = match prefix {
                Some(p) => format!("{p}/{stem}"),
                None => stem,
            };
            let outcome = process_file(&processor, &path, &set_id).await;
            (path, outcome)
        }
    }))
    .buffer_unordered(cli.concurrency.max(1));

    let mut results: Vec<(PathBuf, ProcessedDocument)> = Vec::new();
    let mut failures = 0usize;

    while let Some((path, outcome)) = tasks.next().await {
        match outcome {
            Ok(doc) => {
                let line = format!(
                    "  {} {}  {} questions  avg {:.2}  [{}]",
                    green("✓"),
                    path.display(),
                    doc.questions.len(),
                    doc.average_confidence,
                    doc.engine,
                );
                if show_progress {
                    bar.println(line);
                } else if !cli.quiet {
                    eprintln!("{line}");
                }
                results.push((path, doc));
            }
            Err(e) => {
                failures += 1;
                let line = format!("  {} {}  {:#}", red("✗"), path.display(), e);
                if show_progress {
                    bar.println(line);
                } else {
                    eprintln!("{line}");
                }
            }
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    // buffer_unordered completes out of order; restore a stable listing.
    results.sort_by(|a, b| a.0.cmp(&b.0));

    if cli.json || cli.output.is_some() {
        let map = results
            .iter()
            .map(|(path, doc)| {
                Ok((
                    path.display().to_string(),
                    serde_json::to_value(doc).context("Failed to serialise result")?,
                ))
            })
            .collect::<Result<serde_json::Map<String, serde_json::Value>>>()?;
        emit_json(cli, &serde_json::Value::Object(map))?;
    } else if !cli.quiet {
        for (path, doc) in &results {
            print_document(&path.display().to_string(), doc);
        }
    }

    let total = results.len() + failures;
    if failures > 0 {
        anyhow::bail!("{failures}/{total} documents failed");
    }
    if !cli.quiet {
        eprintln!(
            "{} {} documents processed",
            green("✔"),
            bold(&total.to_string())
        );
    }
    Ok(())
}

async fn process_file(
    processor: &DocumentProcessor,
    path: &Path,
    set_id: &str,
) -> Result<ProcessedDocument> {
    let payload = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))?;
    processor
        .process(
            set_id,
            &payload,
            guess_content_type(path),
            file_name(path).as_deref(),
        )
        .await
        .with_context(|| format!("Extraction failed for {:?}", path))
}

// ── Output ───────────────────────────────────────────────────────────────────

fn emit_json(cli: &Cli, value: &serde_json::Value) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialise output")?;
    if let Some(ref path) = cli.output {
        std::fs::write(path, format!("{json}\n"))
            .with_context(|| format!("Failed to write {:?}", path))?;
        if !cli.quiet {
            eprintln!("{}  →  {}", green("✔"), bold(&path.display().to_string()));
        }
    } else {
        println!("{json}");
    }
    Ok(())
}

/// Human-readable per-document summary.
fn print_document(label: &str, doc: &ProcessedDocument) {
    let readiness = if doc.ready {
        green("ready")
    } else {
        cyan("needs review")
    };
    println!(
        "{}  {}  [{}, {}]  avg {:.2}  {}",
        bold(label),
        readiness,
        doc.engine,
        doc.source_type.as_str(),
        doc.average_confidence,
        dim(&format!("{} questions", doc.questions.len())),
    );

    for q in &doc.questions {
        let tick = match q.review_status {
            ReviewStatus::AutoOk => green("✓"),
            ReviewStatus::AutoFlagged => cyan("⚠"),
        };
        let mut line = format!(
            "  {} {:>3}. [{} {:.2}] {}",
            tick,
            q.number_label,
            q.review_status.as_str(),
            q.confidence,
            preview(&q.text, 64),
        );
        if let Some(ref url) = q.metadata.cropped_image_url {
            line.push_str(&dim(&format!("  → {url}")));
        }
        println!("{line}");
    }
}

/// First `max` characters on one line. Multibyte-safe: question text is
/// mostly Korean, so byte slicing would split codepoints.
fn preview(text: &str, max: usize) -> String {
    let one_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if one_line.chars().count() <= max {
        one_line
    } else {
        let head: String = one_line.chars().take(max).collect();
        format!("{head}\u{2026}")
    }
}

// ── Input handling ───────────────────────────────────────────────────────────

fn collect_documents(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("Failed to read directory {:?}", dir))?
    {
        let path = entry?.path();
        if path.is_file() && guess_content_type(&path).is_some() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Extension-based MIME guess; `None` lets payload sniffing decide.
fn guess_content_type(path: &Path) -> Option<&'static str> {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("pdf") => Some("application/pdf"),
        Some("png") => Some("image/png"),
        Some("jpg") | Some("jpeg") => Some("image/jpeg"),
        _ => None,
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

fn default_set_id(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "document".to_string())
}

fn batch_bar(total: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
    );
    bar.set_prefix("Extracting");
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}
