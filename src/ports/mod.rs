//! Adapter boundaries: OCR engines, structured-output LLMs, blob storage.
//!
//! The pipeline never talks to a provider SDK directly; it holds
//! `Arc<dyn …Port>` handles and decides strategy from each port's
//! [`Provenance`] and capability flags. Mock adapters are first-class — a
//! deployment with no credentials still extracts, it just lands on the
//! placeholder paths.

pub mod gemini;
pub mod llm;
pub mod ocr;
pub mod storage;
#[cfg(feature = "tesseract")]
pub mod tesseract;

pub use gemini::GeminiLlm;
pub use llm::{LlmPort, MockLlm};
pub use ocr::{MockOcr, OcrExtraction, OcrPort, OcrToken, TokenBox};
pub use storage::{LocalStorage, MemoryStorage, StoragePort};
#[cfg(feature = "tesseract")]
pub use tesseract::TesseractOcr;

/// Whether an adapter is a stand-in or talks to a real backend.
///
/// Strategy selection branches on this: mock adapters are never asked to
/// refine text or locate anchors, so their canned output cannot masquerade
/// as real extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Mock,
    Real,
}

impl Provenance {
    pub fn is_real(self) -> bool {
        matches!(self, Self::Real)
    }
}
