//! Error types for the examtract library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ExtractError`] — **Fatal**: the extraction run cannot produce a
//!   result (bad configuration, `gemini_full` without a multimodal backend,
//!   a page that defeated every multimodal attempt). Returned as
//!   `Err(ExtractError)` from the top-level pipeline entry points.
//!
//! * [`PortError`] — **Adapter-level**: one OCR/LLM/storage call failed
//!   (timeout, HTTP 5xx, unparseable response). Retryable variants are
//!   retried inside the adapter; whether an exhausted call is fatal depends
//!   on the active extraction mode, so the pipeline decides, not the port.
//!
//! Fallback-eligible conditions (insufficient hints, no anchors, missing
//! secondary OCR) are deliberately **not** errors anywhere in the crate —
//! they are `None`/empty-result sentinels that select the next tier.

use thiserror::Error;

/// All fatal errors returned by the examtract library.
///
/// The hybrid extraction mode never returns these for extraction itself;
/// they come from configuration, media handling, and the strict
/// `gemini_full` mode.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Multimodal-mode errors ────────────────────────────────────────────
    /// `gemini_full` was selected without a live multimodal LLM backend.
    #[error(
        "gemini_full mode needs a multimodal LLM backend.\n\
         Configure the Gemini adapter (API key + model) or switch to hybrid mode."
    )]
    MultimodalRequired,

    /// The payload is neither a PDF nor a raster image.
    #[error(
        "Unsupported media for multimodal extraction ('{content_type}', '{filename}').\n\
         Supply a PDF or a PNG/JPEG image, or switch to hybrid mode."
    )]
    UnsupportedMedia {
        content_type: String,
        filename: String,
    },

    /// No page of the document could be rasterised.
    #[error("Could not render any page from the document: {detail}")]
    RenderFailed { detail: String },

    /// One page defeated both the structured and the raw-text multimodal
    /// attempts; in `gemini_full` this fails the whole run.
    #[error("Page {page}: multimodal extraction failed: {detail}")]
    PageExtractFailed { page: usize, detail: String },

    /// Every page was processed yet nothing usable came back.
    #[error("Multimodal extraction produced no questions")]
    NoQuestions,

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (e.g. a panicked blocking task).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A failed OCR/LLM/storage adapter call.
///
/// Adapters retry [retryable](PortError::is_retryable) variants with capped
/// linear backoff before surfacing; everything that reaches the pipeline is
/// already past its retry budget.
#[derive(Debug, Error)]
pub enum PortError {
    /// The call exceeded the adapter's configured timeout.
    #[error("{provider} call timed out after {secs}s")]
    Timeout { provider: String, secs: u64 },

    /// The provider answered with a non-success HTTP status.
    #[error("{provider} returned HTTP {status}: {detail}")]
    Http {
        provider: String,
        status: u16,
        detail: String,
    },

    /// Transport-level failure (connection refused, TLS, DNS).
    #[error("{provider} request failed: {detail}")]
    Request { provider: String, detail: String },

    /// The provider answered 2xx but the body was not what the schema
    /// promised.
    #[error("{provider} returned an unusable response: {detail}")]
    InvalidResponse { provider: String, detail: String },

    /// A media payload was handed to a text-only backend.
    #[error("{provider} does not accept media payloads")]
    MediaUnsupported { provider: String },

    /// Storage adapter I/O failure.
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl PortError {
    /// Whether a bounded retry is worth attempting.
    ///
    /// Mirrors the usual transient set: request timeouts plus HTTP
    /// 408/429/500/502/503/504. Auth and schema errors are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Http { status, .. } => {
                matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
            }
            _ => false,
        }
    }
}
