//! Question records produced by an extraction run.
//!
//! Everything here serializes with camelCase field names because the records
//! round-trip through JSON metadata columns in the surrounding job store;
//! optional fields are omitted rather than serialized as `null`.

use crate::pipeline::layout::{CropSource, RegionHint};
use serde::{Deserialize, Serialize};

// ── Source classification ────────────────────────────────────────────────────

/// Broad class of the uploaded document, sniffed from MIME type and filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Pdf,
    Image,
    /// Raw text that decoded cleanly as UTF-8.
    Text,
    /// Anything unrecognized; handled by the last-resort OCR fallback.
    Binary,
}

impl SourceType {
    /// Classify from headers alone. `Text` is never sniffed here: it is only
    /// assigned after a successful UTF-8 decode of an unrecognized payload.
    pub fn sniff(content_type: Option<&str>, filename: Option<&str>) -> Self {
        let name = filename.unwrap_or_default().to_ascii_lowercase();
        let mime = content_type.unwrap_or_default().to_ascii_lowercase();
        if mime.starts_with("application/pdf") || name.ends_with(".pdf") {
            Self::Pdf
        } else if mime.starts_with("image/")
            || name.ends_with(".png")
            || name.ends_with(".jpg")
            || name.ends_with(".jpeg")
        {
            Self::Image
        } else {
            Self::Binary
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Image => "image",
            Self::Text => "text",
            Self::Binary => "binary",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Question structure ───────────────────────────────────────────────────────

/// One answer choice, labeled by position (`"1"`, `"2"`, …) regardless of the
/// marker symbol found in the text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub label: String,
    pub text: String,
}

/// Lightly parsed shape of a question: the full stem plus any recognized
/// answer choices.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuestionStructure {
    pub stem: String,
    pub choices: Vec<Choice>,
}

// ── Metadata ─────────────────────────────────────────────────────────────────

fn is_false(v: &bool) -> bool {
    !*v
}

/// Per-question metadata blob persisted alongside the question text.
///
/// The always-present keys (`subject` through `sourceType`) mirror the
/// legacy column layout of the review store; the rest appear only on the
/// paths that produce them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionMetadata {
    pub subject: String,
    pub unit: String,
    pub difficulty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_format: Option<String>,
    pub source: String,
    pub engine: String,
    pub source_type: SourceType,
    /// 1-based page the question was found on (multimodal per-page path).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_index: Option<usize>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub llm_refined: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_model: Option<String>,
    /// Crop ratios the model supplied for this question, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crop_hint: Option<RegionHint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cropped_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crop_source: Option<CropSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_mime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_confidence: Option<f64>,
}

impl QuestionMetadata {
    /// Seed metadata for the local (OCR / text-decode) extraction paths.
    pub fn local(engine: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            subject: "unknown".into(),
            unit: "unknown".into(),
            difficulty: "unknown".into(),
            question_type: None,
            answer_format: None,
            source: "uploaded".into(),
            engine: engine.into(),
            source_type,
            page_index: None,
            llm_refined: false,
            llm_model: None,
            crop_hint: None,
            cropped_image_url: None,
            crop_source: None,
            source_mime: None,
            source_filename: None,
            pipeline_version: None,
            average_confidence: None,
        }
    }

    /// Seed metadata for questions parsed by a multimodal model pass.
    pub fn multimodal(
        engine: impl Into<String>,
        source_type: SourceType,
        page_index: Option<usize>,
        model: &str,
    ) -> Self {
        let mut meta = Self::local(engine, source_type);
        meta.question_type = Some("unknown".into());
        meta.answer_format = Some("unknown".into());
        meta.page_index = page_index;
        meta.llm_refined = true;
        meta.llm_model = (!model.is_empty()).then(|| model.to_string());
        meta
    }
}

// ── Records ──────────────────────────────────────────────────────────────────

/// One extracted question, ready for the review store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedQuestion {
    /// 1-based, contiguous over the final ordering of the run.
    pub order_index: usize,
    pub number_label: String,
    pub text: String,
    /// Extraction confidence in `[0, 1]`.
    pub confidence: f64,
    pub metadata: QuestionMetadata,
    pub structure: QuestionStructure,
}

/// Result of one pipeline invocation. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub questions: Vec<ExtractedQuestion>,
    /// Tag naming the strategy that produced the questions
    /// (e.g. `"pdfium"`, `"gemini_vision_pages"`, `"tesseract_pdf+llm"`).
    pub engine: String,
    pub average_confidence: f64,
    pub raw_text: String,
    pub source_type: SourceType,
}

impl ExtractionResult {
    /// Mean question confidence; `0.0` for an empty list.
    pub fn average_of(questions: &[ExtractedQuestion]) -> f64 {
        let sum: f64 = questions.iter().map(|q| q.confidence).sum();
        sum / questions.len().max(1) as f64
    }
}

/// Crop provenance for one question, in question order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CropTrace {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub crop_source: CropSource,
    /// 1-based page the crop came from; absent for canvas-level crops.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_index: Option<usize>,
}

/// Reviewer triage state assigned when a run completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    AutoOk,
    AutoFlagged,
}

impl ReviewStatus {
    /// High-confidence questions skip the manual review queue.
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.9 {
            Self::AutoOk
        } else {
            Self::AutoFlagged
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AutoOk => "auto_ok",
            Self::AutoFlagged => "auto_flagged",
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_prefers_mime_then_extension() {
        assert_eq!(
            SourceType::sniff(Some("application/pdf"), None),
            SourceType::Pdf
        );
        assert_eq!(
            SourceType::sniff(None, Some("Scan.PDF")),
            SourceType::Pdf
        );
        assert_eq!(
            SourceType::sniff(Some("image/png"), Some("whatever.bin")),
            SourceType::Image
        );
        assert_eq!(
            SourceType::sniff(None, Some("page.jpeg")),
            SourceType::Image
        );
        assert_eq!(SourceType::sniff(None, None), SourceType::Binary);
        assert_eq!(
            SourceType::sniff(Some("text/plain"), Some("notes.txt")),
            SourceType::Binary
        );
    }

    #[test]
    fn test_metadata_serializes_camel_case_and_skips_absent() {
        let meta = QuestionMetadata::local("pdfium", SourceType::Pdf);
        let json = serde_json::to_value(&meta).expect("serialize");
        assert_eq!(json["sourceType"], "pdf");
        assert_eq!(json["subject"], "unknown");
        let obj = json.as_object().expect("object");
        assert!(!obj.contains_key("questionType"));
        assert!(!obj.contains_key("llmRefined"));
        assert!(!obj.contains_key("croppedImageUrl"));
    }

    #[test]
    fn test_multimodal_metadata_carries_model_and_page() {
        let meta =
            QuestionMetadata::multimodal("gemini_vision", SourceType::Pdf, Some(2), "gemini-2.5-flash");
        assert!(meta.llm_refined);
        assert_eq!(meta.page_index, Some(2));
        assert_eq!(meta.llm_model.as_deref(), Some("gemini-2.5-flash"));
        assert_eq!(meta.question_type.as_deref(), Some("unknown"));

        let json = serde_json::to_value(&meta).expect("serialize");
        assert_eq!(json["llmRefined"], true);
        assert_eq!(json["pageIndex"], 2);

        let blank = QuestionMetadata::multimodal("gemini_vision", SourceType::Pdf, None, "");
        assert_eq!(blank.llm_model, None);
    }

    #[test]
    fn test_review_status_threshold() {
        assert_eq!(ReviewStatus::from_confidence(0.9), ReviewStatus::AutoOk);
        assert_eq!(
            ReviewStatus::from_confidence(0.8999),
            ReviewStatus::AutoFlagged
        );
        assert_eq!(ReviewStatus::AutoOk.as_str(), "auto_ok");
    }

    #[test]
    fn test_average_of_empty_is_zero() {
        assert_eq!(ExtractionResult::average_of(&[]), 0.0);
    }

    #[test]
    fn test_crop_trace_round_trip() {
        let trace = CropTrace {
            url: Some("/uploads/set/questions/q_001.png".into()),
            crop_source: crate::pipeline::layout::CropSource::Gemini,
            page_index: Some(1),
        };
        let json = serde_json::to_string(&trace).expect("serialize");
        assert!(json.contains("\"cropSource\":\"gemini\""));
        let back: CropTrace = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, trace);
    }
}
