//! Configuration types for exam-document extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share configs across tasks, log them, and diff two runs to
//! understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! The layout thresholds alone are five fields; a flat constructor breaks on
//! every new knob. The builder lets callers set only what they care about and
//! rely on well-documented defaults for the rest.

use crate::error::ExtractError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Which extraction strategy drives a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractionMode {
    /// Format-specific text acquisition (PDF text layer, OCR, UTF-8 decode)
    /// followed by regex segmentation and optional LLM refinement. Never
    /// fails outright: total OCR failure still yields a placeholder question.
    #[default]
    Hybrid,
    /// Every page is parsed by a multimodal LLM call with a structured
    /// schema. Stronger output (per-question crop ratios, labels) but the
    /// whole run fails if any page yields nothing — it never silently
    /// degrades to [`ExtractionMode::Hybrid`].
    GeminiFull,
}

impl ExtractionMode {
    /// Stable string tag, matching the values accepted by [`FromStr`].
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hybrid => "hybrid",
            Self::GeminiFull => "gemini_full",
        }
    }
}

impl fmt::Display for ExtractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionMode {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hybrid" => Ok(Self::Hybrid),
            "gemini_full" | "gemini-full" => Ok(Self::GeminiFull),
            other => Err(ExtractError::InvalidConfig(format!(
                "unknown extraction mode '{}' (expected 'hybrid' or 'gemini_full')",
                other
            ))),
        }
    }
}

/// Empirical layout thresholds used by the region planner and anchor
/// detector.
///
/// The defaults were tuned on real two-column Korean exam sheets and have no
/// analytical derivation; they are exposed as fields so callers can adjust
/// them for unusual page geometries instead of re-deriving them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutTuning {
    /// Questions whose `leftRatio` falls below this are treated as
    /// left-column, at or above as right-column. Default: 0.4.
    pub column_split: f64,
    /// Two detected anchors closer than this vertically collapse into one
    /// (the first wins). Default: 18.
    pub anchor_dedup_px: u32,
    /// Anchor candidates right of this fraction of the page width are
    /// rejected; question numbers sit in the left margin. Default: 0.33.
    pub left_margin_ratio: f64,
    /// Minimum height of a planned crop in pixels; tighter hints are expanded
    /// symmetrically. Default: 60.
    pub min_crop_px: u32,
    /// Minimum vertical span of an LLM crop hint as a page-height ratio;
    /// smaller spans are widened around their midpoint during hint
    /// post-processing. Default: 0.05.
    pub min_hint_span: f64,
}

impl Default for LayoutTuning {
    fn default() -> Self {
        Self {
            column_split: 0.4,
            anchor_dedup_px: 18,
            left_margin_ratio: 0.33,
            min_crop_px: 60,
            min_hint_span: 0.05,
        }
    }
}

/// Configuration for one extraction pipeline instance.
///
/// Built via [`ExtractionConfig::builder()`] or [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use examtract::{ExtractionConfig, ExtractionMode};
///
/// let config = ExtractionConfig::builder()
///     .mode(ExtractionMode::GeminiFull)
///     .media_byte_cap(2_000_000)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionConfig {
    /// Extraction strategy. Default: [`ExtractionMode::Hybrid`].
    pub mode: ExtractionMode,

    /// Whether the hybrid path may call the LLM to refine its regex split.
    /// Default: true.
    ///
    /// Refinement corrects OCR mis-splits and enriches metadata, but costs
    /// one structured LLM call per document. Disabling it keeps the hybrid
    /// path fully offline.
    pub llm_enabled: bool,

    /// Language string handed to the local OCR engine. Default: `"kor+eng"`.
    ///
    /// Exam sheets mix Korean stems with Latin formulas and choice labels;
    /// a single-language model drops whichever script it wasn't given.
    pub ocr_lang: String,

    /// Upper bound on the encoded image payload of one multimodal LLM call,
    /// in bytes. Default: 3_500_000.
    ///
    /// Pages are re-encoded as JPEG with stepwise quality/size reduction
    /// until they fit. Provider request limits sit around 4 MB once base64
    /// overhead is added, so 3.5 MB of raw bytes is the practical ceiling.
    pub media_byte_cap: usize,

    /// Layout thresholds for region planning and anchor detection.
    pub layout: LayoutTuning,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            mode: ExtractionMode::Hybrid,
            llm_enabled: true,
            ocr_lang: "kor+eng".to_string(),
            media_byte_cap: 3_500_000,
            layout: LayoutTuning::default(),
        }
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn mode(mut self, mode: ExtractionMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn llm_enabled(mut self, v: bool) -> Self {
        self.config.llm_enabled = v;
        self
    }

    /// Blank or whitespace-only values fall back to the `"kor+eng"` default.
    pub fn ocr_lang(mut self, lang: impl Into<String>) -> Self {
        let lang = lang.into();
        let trimmed = lang.trim();
        if !trimmed.is_empty() {
            self.config.ocr_lang = trimmed.to_string();
        }
        self
    }

    pub fn media_byte_cap(mut self, bytes: usize) -> Self {
        self.config.media_byte_cap = bytes.max(200_000);
        self
    }

    pub fn layout(mut self, layout: LayoutTuning) -> Self {
        self.config.layout = layout;
        self
    }

    pub fn column_split(mut self, ratio: f64) -> Self {
        self.config.layout.column_split = ratio.clamp(0.05, 0.95);
        self
    }

    pub fn anchor_dedup_px(mut self, px: u32) -> Self {
        self.config.layout.anchor_dedup_px = px.max(1);
        self
    }

    pub fn left_margin_ratio(mut self, ratio: f64) -> Self {
        self.config.layout.left_margin_ratio = ratio.clamp(0.05, 0.95);
        self
    }

    pub fn min_crop_px(mut self, px: u32) -> Self {
        // 12 px is the floor the ratio-to-pixel step already enforces.
        self.config.layout.min_crop_px = px.max(12);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let layout = &self.config.layout;
        if !(layout.column_split > 0.0 && layout.column_split < 1.0) {
            return Err(ExtractError::InvalidConfig(format!(
                "column_split must be inside (0, 1), got {}",
                layout.column_split
            )));
        }
        if !(layout.left_margin_ratio > 0.0 && layout.left_margin_ratio < 1.0) {
            return Err(ExtractError::InvalidConfig(format!(
                "left_margin_ratio must be inside (0, 1), got {}",
                layout.left_margin_ratio
            )));
        }
        if layout.min_crop_px < 12 {
            return Err(ExtractError::InvalidConfig(format!(
                "min_crop_px must be at least 12, got {}",
                layout.min_crop_px
            )));
        }
        if !(0.0..=0.5).contains(&layout.min_hint_span) {
            return Err(ExtractError::InvalidConfig(format!(
                "min_hint_span must be within [0, 0.5], got {}",
                layout.min_hint_span
            )));
        }
        Ok(self.config)
    }
}

/// Connection settings for the bundled Gemini adapter.
///
/// Separate from [`ExtractionConfig`] because an adapter is constructed once
/// and shared across pipelines, while extraction configs are per-run.
#[derive(Debug, Clone, PartialEq)]
pub struct GeminiConfig {
    /// API key for the `generativelanguage.googleapis.com` endpoint.
    pub api_key: String,
    /// Model identifier. Default: `"gemini-2.5-flash"`.
    pub model: String,
    /// Per-call timeout. Default: 90 s — multimodal parses of dense pages
    /// regularly run past 60 s.
    pub timeout: Duration,
    /// Bounded retries on transient failures (408/429/5xx, timeouts) before
    /// the error surfaces to the pipeline. Default: 1.
    pub max_retries: u32,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "gemini-2.5-flash".to_string(),
            timeout: Duration::from_secs(90),
            max_retries: 1,
        }
    }

    /// Blank model names keep the default.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode_is_hybrid() {
        assert_eq!(ExtractionConfig::default().mode, ExtractionMode::Hybrid);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(
            "hybrid".parse::<ExtractionMode>().unwrap(),
            ExtractionMode::Hybrid
        );
        assert_eq!(
            "GEMINI_FULL".parse::<ExtractionMode>().unwrap(),
            ExtractionMode::GeminiFull
        );
        assert_eq!(
            "gemini-full".parse::<ExtractionMode>().unwrap(),
            ExtractionMode::GeminiFull
        );
        assert!("vision".parse::<ExtractionMode>().is_err());
    }

    #[test]
    fn test_builder_clamps() {
        let config = ExtractionConfig::builder()
            .column_split(2.0)
            .min_crop_px(1)
            .media_byte_cap(10)
            .build()
            .unwrap();
        assert_eq!(config.layout.column_split, 0.95);
        assert_eq!(config.layout.min_crop_px, 12);
        assert_eq!(config.media_byte_cap, 200_000);
    }

    #[test]
    fn test_blank_ocr_lang_keeps_default() {
        let config = ExtractionConfig::builder().ocr_lang("   ").build().unwrap();
        assert_eq!(config.ocr_lang, "kor+eng");
    }

    #[test]
    fn test_build_rejects_out_of_range_layout() {
        let layout = LayoutTuning {
            column_split: 1.5,
            ..LayoutTuning::default()
        };
        assert!(ExtractionConfig::builder().layout(layout).build().is_err());
    }
}
