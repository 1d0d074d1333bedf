//! Prompts and response schemas for every LLM call the pipeline makes.
//!
//! Centralising them here serves two purposes:
//!
//! 1. **Single source of truth** — the extraction strategies and their tests
//!    reference the same constants, so a wording or schema change happens in
//!    exactly one place.
//!
//! 2. **Auditability** — what we ask a model, and the exact JSON shape we
//!    demand back, is reviewable without tracing through call sites.
//!
//! All structured calls run with `responseMimeType: application/json`
//! against these schemas; the adapters translate them to provider dialects.

use once_cell::sync::Lazy;
use serde_json::{json, Value};

// ── Hybrid refinement ────────────────────────────────────────────────────────

/// System prompt for the post-OCR refinement call.
pub const REFINEMENT_SYSTEM_PROMPT: &str = "You are a Korean exam document structuring assistant. \
     Given noisy OCR text, return corrected question-level JSON only.";

/// Longest OCR text embedded in a refinement prompt, in characters.
pub const REFINEMENT_TEXT_CHARS: usize = 12_000;

/// Longest per-question preview embedded in a refinement prompt, in
/// characters.
pub const PREVIEW_TEXT_CHARS: usize = 1_000;

/// User prompt for the refinement call.
///
/// `raw_text` must already be capped at [`REFINEMENT_TEXT_CHARS`];
/// `pre_split_json` is the JSON array of question previews.
pub fn refinement_prompt(
    source_type: &str,
    engine: &str,
    raw_text: &str,
    pre_split_json: &str,
) -> String {
    format!(
        "sourceType={source_type}\n\
         engine={engine}\n\
         ocrRawText={raw_text}\n\
         preSplitQuestions={pre_split_json}\n\
         Task:\n\
         1) Correct broken OCR text per question.\n\
         2) Keep question order and number labels where possible.\n\
         3) Fill metadata fields when inferable; otherwise use 'unknown'.\n"
    )
}

/// Response schema for the refinement call: corrected question records,
/// order preserved.
pub static REFINEMENT_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "required": ["questions"],
        "properties": {
            "questions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["orderIndex", "text"],
                    "properties": {
                        "orderIndex": {"type": "integer"},
                        "numberLabel": {"type": "string"},
                        "text": {"type": "string"},
                        "confidence": {"type": "number"},
                        "subject": {"type": "string"},
                        "unit": {"type": "string"},
                        "difficulty": {"type": "string"},
                        "questionType": {"type": "string"},
                        "answerFormat": {"type": "string"}
                    }
                }
            }
        }
    })
});

// ── Multimodal structured extraction ─────────────────────────────────────────

/// System prompt for the per-page structured extraction call.
pub const MEDIA_SYSTEM_PROMPT: &str = "You are an exam parsing engine. Read the attached document image and \
     return strict JSON only according to schema.";

const MEDIA_PROMPT_RULES: &str = "\
Parse this Korean exam sheet into per-question records.
Rules:
1) Detect the page layout: single-column or two-column.
2) For two-column layouts, process in reading order: left column top-to-bottom first, then right column top-to-bottom.
3) Keep numberLabel exactly as visible.
4) text must contain the full question body and all options.
5) confidence is 0~1.
6) cropTopRatio/cropBottomRatio are normalized vertical positions (0~1) on this single page image. They must tightly enclose only that question.
7) cropLeftRatio/cropRightRatio are normalized horizontal positions (0~1). Left-column questions: cropLeftRatio~0.0, cropRightRatio~0.5. Right-column questions: cropLeftRatio~0.5, cropRightRatio~1.0. Full-width questions (headers, single-column): cropLeftRatio=0.0, cropRightRatio=1.0.
8) Crop regions must NOT overlap between questions.
9) If any crop ratio is uncertain, return null for that field.
10) If metadata cannot be inferred, use 'unknown'.";

/// User prompt for the per-page structured extraction call.
pub fn media_prompt(page_index: usize) -> String {
    format!("pageIndex={page_index}\n{MEDIA_PROMPT_RULES}")
}

/// Response schema for the structured extraction call. Crop ratios are
/// nullable so the model can decline them per rule 9 instead of inventing
/// coordinates.
pub static MEDIA_EXTRACTION_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "required": ["questions"],
        "properties": {
            "questions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["orderIndex", "text"],
                    "properties": {
                        "orderIndex": {"type": "integer"},
                        "numberLabel": {"type": "string"},
                        "text": {"type": "string"},
                        "confidence": {"type": "number"},
                        "subject": {"type": "string"},
                        "unit": {"type": "string"},
                        "difficulty": {"type": "string"},
                        "questionType": {"type": "string"},
                        "answerFormat": {"type": "string"},
                        "cropTopRatio": {"type": ["number", "null"]},
                        "cropBottomRatio": {"type": ["number", "null"]},
                        "cropLeftRatio": {"type": ["number", "null"]},
                        "cropRightRatio": {"type": ["number", "null"]}
                    }
                }
            }
        }
    })
});

// ── Multimodal raw-text fallback ─────────────────────────────────────────────

/// System prompt for the raw-text retry after a failed structured call.
pub const RAW_TEXT_SYSTEM_PROMPT: &str = "You are a Korean exam OCR assistant. Read the attached document image \
     and return strict JSON only.";

/// User prompt for the raw-text retry.
pub const RAW_TEXT_PROMPT: &str = "Extract all visible text from the document preserving line breaks as much \
     as possible. Do not summarize.";

/// Response schema for the raw-text retry: the whole page as one string.
pub static RAW_TEXT_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "required": ["rawText"],
        "properties": {
            "rawText": {"type": "string"}
        }
    })
});
