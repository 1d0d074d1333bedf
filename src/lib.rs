//! # examtract
//!
//! Extract structured, per-question records (with cropped question images)
//! from scanned exam documents — PDFs or photographed pages.
//!
//! ## Why this crate?
//!
//! Exam papers are dense, two-column, numbered documents. Generic OCR gives
//! you a wall of garbled text; what graders and question banks need is one
//! record per question: its number, its text, its answer choices, a
//! confidence score, and a cropped image of just that question. `examtract`
//! does the whole journey: acquire text (native PDF layer, OCR, or a
//! multimodal model), segment it into questions, and reconcile crop regions
//! from whichever signal is available.
//!
//! ## Pipeline Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ 1. Acquire   bytes → text (pdf layer / OCR chain / vision)  │
//! │ 2. Segment   text → numbered questions + answer choices     │
//! │ 3. Refine    optional LLM pass corrects splits and labels   │
//! │ 4. Plan      crop hints → anchors → uniform split fallback  │
//! │ 5. Crop      page images → one PNG per question, stored     │
//! │ 6. Merge     records + crop URLs + review status → result   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use examtract::{ExtractionConfig, ExtractionPipeline, MockOcr};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = ExtractionPipeline::new(Arc::new(MockOcr), ExtractionConfig::default());
//!
//!     let payload = std::fs::read("exam.pdf")?;
//!     let result = pipeline
//!         .extract(&payload, Some("application/pdf"), Some("exam.pdf"))
//!         .await?;
//!
//!     for question in &result.questions {
//!         println!("[{}] {}", question.number_label, question.text);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature     | Default | Description                                      |
//! |-------------|---------|--------------------------------------------------|
//! | `cli`       | ✅      | `examtract` binary (clap, indicatif, anyhow)     |
//! | `tesseract` | ❌      | Local OCR via leptess (needs libtesseract)       |
//!
//! ## Extraction Modes
//!
//! | Mode          | Text source                     | Needs API key | Crop planning        |
//! |---------------|---------------------------------|---------------|----------------------|
//! | `Hybrid`      | PDF text layer / OCR chain      | No            | anchors → uniform    |
//! | `GeminiFull`  | Multimodal model, page by page  | Yes           | hints → anchors → …  |

// ── Modules ──

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod ports;
pub mod process;
pub mod prompts;

// ── Re-exports ──

pub use config::{ExtractionConfig, ExtractionConfigBuilder, ExtractionMode, GeminiConfig, LayoutTuning};
pub use error::{ExtractError, PortError};
pub use extract::ExtractionPipeline;
pub use output::{
    Choice, CropTrace, ExtractedQuestion, ExtractionResult, QuestionMetadata, QuestionStructure,
    ReviewStatus, SourceType,
};
pub use pipeline::anchors::AnchorDetector;
pub use pipeline::crop::QuestionCropper;
pub use pipeline::layout::{CropSource, RegionHint};
pub use ports::{
    GeminiLlm, LlmPort, LocalStorage, MemoryStorage, MockLlm, MockOcr, OcrExtraction, OcrPort,
    OcrToken, Provenance, StoragePort, TokenBox,
};
pub use process::{DocumentProcessor, ProcessedDocument, ProcessedQuestion};
