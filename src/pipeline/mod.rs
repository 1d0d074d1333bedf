//! Pipeline stages for exam-document question extraction.
//!
//! Each submodule implements exactly one transformation step. Keeping stages
//! separate makes each independently testable and lets us swap an
//! implementation (e.g. a different anchor source) without touching the
//! others.
//!
//! ## Data Flow
//!
//! ```text
//! document ──▶ render ──▶ segment ──▶ hints ──▶ layout/anchors ──▶ crop
//! (bytes)      (pdfium)   (regex)    (ratios)     (planning)     (storage)
//! ```
//!
//! 1. [`chain`]   — ordered fallback strategies with per-strategy reasons
//! 2. [`render`]  — rasterise, preprocess, and encode page images; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 3. [`segment`] — split raw text into questions and parse answer choices
//! 4. [`hints`]   — normalise model-supplied crop ratios (widen, deconflict,
//!    column-order)
//! 5. [`layout`]  — three-tier planning from hints/anchors to pixel
//!    rectangles
//! 6. [`anchors`] — locate printed question numbers via OCR tokens
//! 7. [`crop`]    — cut the planned regions and persist them per question

pub mod anchors;
pub mod chain;
pub mod crop;
pub mod hints;
pub mod layout;
pub mod render;
pub mod segment;
