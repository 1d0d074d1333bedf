//! The extraction pipeline: document bytes in, ordered question list out.
//!
//! [`ExtractionPipeline`] implements two mutually exclusive strategies,
//! selected by [`ExtractionMode`](crate::config::ExtractionMode):
//!
//! * **Hybrid** — acquire plain text as cheaply as possible (PDF text
//!   layer, OCR, UTF-8 decode), split it into questions by regex, then
//!   optionally let an LLM repair the split. This mode never fails: when
//!   every acquisition strategy is exhausted it produces a single question
//!   carrying a user-facing notice instead.
//!
//! * **Gemini full** — hand every page image to a multimodal structured
//!   call and trust its per-question records (including crop ratios). A
//!   failed page retries once through a raw-text call; two failures on any
//!   page fail the whole run. Deliberately never degrades to hybrid — the
//!   caller chose precision over resilience.
//!
//! Both strategies end in the same [`ExtractionResult`] shape so the crop
//! and merge stages downstream do not care which one ran.

use crate::config::{ExtractionConfig, ExtractionMode};
use crate::error::{ExtractError, PortError};
use crate::output::{ExtractedQuestion, ExtractionResult, QuestionMetadata, SourceType};
use crate::pipeline::chain::{run_chain, Strategy};
use crate::pipeline::hints::{postprocess_crop_hints, round_ratio};
use crate::pipeline::layout::RegionHint;
use crate::pipeline::render::{
    encode_compact_jpeg, encode_png, pdf_text_layer, preprocess_for_ocr, render_pages,
};
use crate::pipeline::segment::{build_structure, normalize_text, split_questions};
use crate::ports::{LlmPort, OcrPort};
use crate::prompts;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Shown instead of canned mock output when no real OCR engine ran.
const FALLBACK_NOTICE_MOCK: &str = "OCR 자동추출 결과를 확보하지 못해 임시 결과를 표시합니다. \
     Tesseract 설치/언어 설정 또는 문서 품질(해상도, 기울기)을 확인해 주세요.";

/// Shown when the last-resort OCR produced nothing at all.
const FALLBACK_NOTICE_EMPTY: &str = "OCR 텍스트를 추출하지 못했습니다. \
     지원 형식(PDF/PNG/JPG)인지 확인하고 다시 시도해 주세요.";

/// Raw text with provenance, produced by one acquisition strategy.
struct Acquired {
    text: String,
    confidence: f64,
    engine: String,
    source: SourceType,
}

/// Per-document extraction driver. Cheap to construct; ports are shared
/// handles.
pub struct ExtractionPipeline {
    ocr: Arc<dyn OcrPort>,
    local_ocr: Option<Arc<dyn OcrPort>>,
    llm: Option<Arc<dyn LlmPort>>,
    config: ExtractionConfig,
}

impl ExtractionPipeline {
    /// `ocr` doubles as the preferred engine (when its provenance is Real)
    /// and the last-resort fallback.
    pub fn new(ocr: Arc<dyn OcrPort>, config: ExtractionConfig) -> Self {
        Self {
            ocr,
            local_ocr: None,
            llm: None,
            config,
        }
    }

    /// Attach a machine-local OCR engine tried after the primary one.
    pub fn with_local_ocr(mut self, ocr: Arc<dyn OcrPort>) -> Self {
        self.local_ocr = Some(ocr);
        self
    }

    /// Attach the LLM used for hybrid refinement and multimodal extraction.
    pub fn with_llm(mut self, llm: Arc<dyn LlmPort>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    // ── Capability gates ──────────────────────────────────────────────────

    fn can_use_llm(&self) -> bool {
        self.config.llm_enabled
            && self
                .llm
                .as_ref()
                .is_some_and(|llm| llm.provenance().is_real())
    }

    fn can_use_multimodal(&self) -> bool {
        self.can_use_llm() && self.llm.as_ref().is_some_and(|llm| llm.supports_media())
    }

    fn can_use_secondary_ocr(&self) -> bool {
        self.ocr.provenance().is_real()
    }

    fn llm_model_tag(&self) -> String {
        self.llm
            .as_ref()
            .and_then(|llm| llm.model_name())
            .unwrap_or_default()
            .to_string()
    }

    // ── Entry point ───────────────────────────────────────────────────────

    /// Run the configured extraction strategy over one document.
    pub async fn extract(
        &self,
        payload: &[u8],
        content_type: Option<&str>,
        filename: Option<&str>,
    ) -> Result<ExtractionResult, ExtractError> {
        let result = match self.config.mode {
            ExtractionMode::GeminiFull => {
                self.extract_gemini_full(payload, content_type, filename)
                    .await?
            }
            ExtractionMode::Hybrid => self.extract_hybrid(payload, content_type, filename).await,
        };
        info!(
            engine = %result.engine,
            questions = result.questions.len(),
            avg_confidence = result.average_confidence,
            "extraction complete"
        );
        Ok(result)
    }

    /// Synchronous wrapper around [`ExtractionPipeline::extract`].
    ///
    /// Creates a temporary tokio runtime internally.
    pub fn extract_sync(
        &self,
        payload: &[u8],
        content_type: Option<&str>,
        filename: Option<&str>,
    ) -> Result<ExtractionResult, ExtractError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| ExtractError::Internal(format!("failed to create tokio runtime: {e}")))?
            .block_on(self.extract(payload, content_type, filename))
    }

    // ── Hybrid mode ───────────────────────────────────────────────────────

    async fn extract_hybrid(
        &self,
        payload: &[u8],
        content_type: Option<&str>,
        filename: Option<&str>,
    ) -> ExtractionResult {
        let sniffed = SourceType::sniff(content_type, filename);

        let mut strategies: Vec<Strategy<'_, Acquired, PortError>> = Vec::new();
        match sniffed {
            SourceType::Pdf => {
                strategies.push(Strategy::new(
                    "pdf-text-layer",
                    self.acquire_pdf_text_layer(payload),
                ));
                strategies.push(Strategy::new(
                    "pdf-page-ocr",
                    self.acquire_pdf_page_ocr(payload, content_type, filename),
                ));
            }
            SourceType::Image => {
                strategies.push(Strategy::new(
                    "secondary-ocr",
                    self.acquire_secondary_ocr(payload),
                ));
                strategies.push(Strategy::new("local-ocr", self.acquire_local_ocr(payload)));
            }
            SourceType::Text | SourceType::Binary => {}
        }
        strategies.push(Strategy::new("utf8-decode", acquire_utf8(payload)));

        let acquired = match run_chain("text-acquisition", strategies).await {
            Ok(acquired) => acquired,
            Err(exhausted) => {
                debug!(detail = %exhausted, "falling back to last-resort OCR");
                self.acquire_ocr_fallback(payload, sniffed).await
            }
        };
        let Acquired {
            text,
            confidence: base_confidence,
            engine,
            source,
        } = acquired;

        let mut split = split_questions(&text);
        if split.is_empty() {
            let body = if text.is_empty() {
                "[empty]".to_string()
            } else {
                text.clone()
            };
            split = vec![(None, body)];
        }

        let mut questions: Vec<ExtractedQuestion> = split
            .into_iter()
            .enumerate()
            .map(|(idx0, (label, chunk))| {
                let order = idx0 + 1;
                ExtractedQuestion {
                    order_index: order,
                    number_label: label.unwrap_or_else(|| order.to_string()),
                    confidence: (base_confidence - 0.01 * idx0 as f64).clamp(0.0, 1.0),
                    metadata: QuestionMetadata::local(&engine, source),
                    structure: build_structure(&chunk),
                    text: chunk,
                }
            })
            .collect();

        let mut engine = engine;
        if let Some(refined) = self.refine_with_llm(&text, source, &engine, &questions).await {
            questions = refined;
            engine = format!("{engine}+llm");
        }

        let average_confidence = ExtractionResult::average_of(&questions);
        ExtractionResult {
            questions,
            engine,
            average_confidence,
            raw_text: text,
            source_type: source,
        }
    }

    async fn acquire_pdf_text_layer(&self, payload: &[u8]) -> Result<Option<Acquired>, PortError> {
        Ok(pdf_text_layer(payload).await.map(|text| Acquired {
            text,
            confidence: 0.98,
            engine: "pdfium".to_string(),
            source: SourceType::Pdf,
        }))
    }

    /// OCR every rendered page of an image-only PDF and join the results.
    async fn acquire_pdf_page_ocr(
        &self,
        payload: &[u8],
        content_type: Option<&str>,
        filename: Option<&str>,
    ) -> Result<Option<Acquired>, PortError> {
        let pages = render_pages(payload, content_type, filename).await;
        if pages.is_empty() {
            return Ok(None);
        }

        let mut texts: Vec<String> = Vec::new();
        let mut engines: Vec<String> = Vec::new();
        for page in &pages {
            let Ok(png) = encode_png(page) else {
                continue;
            };
            if let Some((text, _, engine)) = self.ocr_image_bytes(&png).await {
                engines.push(engine);
                texts.push(text);
            }
        }

        let joined = normalize_text(&texts.join("\n\n"));
        if joined.is_empty() {
            return Ok(None);
        }
        let engine = engines
            .first()
            .cloned()
            .unwrap_or_else(|| "tesseract".to_string());
        let engine = if engine.ends_with("_pdf") {
            engine
        } else {
            format!("{engine}_pdf")
        };
        Ok(Some(Acquired {
            text: joined,
            confidence: 0.8,
            engine,
            source: SourceType::Pdf,
        }))
    }

    async fn acquire_secondary_ocr(&self, payload: &[u8]) -> Result<Option<Acquired>, PortError> {
        if !self.can_use_secondary_ocr() {
            return Ok(None);
        }
        let processed = preprocess_for_ocr(payload);
        let extraction = self.ocr.extract(&processed).await?;
        let text = normalize_text(&extraction.text);
        if text.is_empty() {
            return Ok(None);
        }
        Ok(Some(Acquired {
            text,
            confidence: effective_confidence(extraction.confidence, 0.75),
            engine: self.ocr.name().to_string(),
            source: SourceType::Image,
        }))
    }

    async fn acquire_local_ocr(&self, payload: &[u8]) -> Result<Option<Acquired>, PortError> {
        let Some(local) = &self.local_ocr else {
            return Ok(None);
        };
        let processed = preprocess_for_ocr(payload);
        let extraction = local.extract(&processed).await?;
        let text = normalize_text(&extraction.text);
        if text.is_empty() {
            return Ok(None);
        }
        Ok(Some(Acquired {
            text,
            confidence: 0.82,
            engine: local.name().to_string(),
            source: SourceType::Image,
        }))
    }

    /// Secondary-then-local OCR for one page image; errors demote to `None`
    /// because a single unreadable page must not sink the other pages.
    async fn ocr_image_bytes(&self, payload: &[u8]) -> Option<(String, f64, String)> {
        match self.acquire_secondary_ocr(payload).await {
            Ok(Some(acquired)) => {
                return Some((acquired.text, acquired.confidence, acquired.engine))
            }
            Ok(None) => {}
            Err(e) => debug!(error = %e, "secondary OCR failed on page"),
        }
        match self.acquire_local_ocr(payload).await {
            Ok(Some(acquired)) => Some((acquired.text, acquired.confidence, acquired.engine)),
            Ok(None) => None,
            Err(e) => {
                debug!(error = %e, "local OCR failed on page");
                None
            }
        }
    }

    /// Last resort: run the fallback OCR port on the raw payload and make
    /// the outcome presentable. Never fails.
    async fn acquire_ocr_fallback(&self, payload: &[u8], source: SourceType) -> Acquired {
        let (text, confidence) = match self.ocr.extract(payload).await {
            Ok(extraction) => {
                let mut text = normalize_text(&extraction.text);
                if text.starts_with("[mock]") {
                    text = FALLBACK_NOTICE_MOCK.to_string();
                }
                if text.is_empty() {
                    text = FALLBACK_NOTICE_EMPTY.to_string();
                }
                (text, effective_confidence(extraction.confidence, 0.5))
            }
            Err(e) => {
                debug!(error = %e, "fallback OCR errored");
                (FALLBACK_NOTICE_EMPTY.to_string(), 0.5)
            }
        };
        Acquired {
            text,
            confidence,
            engine: "ocr_fallback".to_string(),
            source,
        }
    }

    /// One structured LLM call that corrects the regex split. `None` keeps
    /// the split unchanged — refinement is an upgrade, never a gate.
    async fn refine_with_llm(
        &self,
        raw_text: &str,
        source: SourceType,
        engine: &str,
        questions: &[ExtractedQuestion],
    ) -> Option<Vec<ExtractedQuestion>> {
        if !self.can_use_llm() || raw_text.trim().is_empty() || questions.is_empty() {
            return None;
        }
        let llm = self.llm.as_ref()?;

        let preview: Vec<Value> = questions
            .iter()
            .map(|q| {
                json!({
                    "orderIndex": q.order_index,
                    "numberLabel": q.number_label,
                    "text": clip_chars(&q.text, prompts::PREVIEW_TEXT_CHARS),
                    "confidence": q.confidence,
                })
            })
            .collect();
        let prompt = prompts::refinement_prompt(
            source.as_str(),
            engine,
            clip_chars(raw_text, prompts::REFINEMENT_TEXT_CHARS),
            &Value::Array(preview).to_string(),
        );

        let data = match llm
            .generate_structured(
                &prompt,
                &prompts::REFINEMENT_SCHEMA,
                Some(prompts::REFINEMENT_SYSTEM_PROMPT),
            )
            .await
        {
            Ok(data) => data,
            Err(e) => {
                debug!(error = %e, "refinement call failed; keeping regex split");
                return None;
            }
        };

        let items = data.get("questions")?.as_array()?;
        if items.is_empty() {
            return None;
        }

        let model_tag = self.llm_model_tag();
        let mut refined: Vec<ExtractedQuestion> = Vec::new();
        for (idx0, item) in items.iter().enumerate() {
            let idx = idx0 + 1;
            if !item.is_object() {
                continue;
            }
            let text = normalize_text(item.get("text").and_then(Value::as_str).unwrap_or(""));
            if text.is_empty() {
                continue;
            }

            let seed = &questions[idx0.min(questions.len() - 1)];
            let order_index = to_index(item.get("orderIndex"), idx);
            let number_label = string_or_number(item.get("numberLabel"))
                .or_else(|| (!seed.number_label.is_empty()).then(|| seed.number_label.clone()))
                .unwrap_or_else(|| order_index.to_string());
            let confidence = to_confidence(item.get("confidence"), seed.confidence + 0.03);

            let mut metadata = seed.metadata.clone();
            metadata.subject = overlay_field(item, "subject", &metadata.subject);
            metadata.unit = overlay_field(item, "unit", &metadata.unit);
            metadata.difficulty = overlay_field(item, "difficulty", &metadata.difficulty);
            metadata.question_type = Some(overlay_field(
                item,
                "questionType",
                metadata.question_type.as_deref().unwrap_or(""),
            ));
            metadata.answer_format = Some(overlay_field(
                item,
                "answerFormat",
                metadata.answer_format.as_deref().unwrap_or(""),
            ));
            metadata.engine = format!("{engine}+llm");
            metadata.llm_refined = true;
            metadata.llm_model = (!model_tag.is_empty()).then(|| model_tag.clone());

            refined.push(ExtractedQuestion {
                order_index,
                number_label,
                structure: build_structure(&text),
                confidence,
                metadata,
                text,
            });
        }

        if refined.is_empty() {
            return None;
        }
        refined.sort_by(|a, b| {
            (a.order_index, a.number_label.as_str()).cmp(&(b.order_index, b.number_label.as_str()))
        });
        Some(refined)
    }

    // ── Gemini-full mode ──────────────────────────────────────────────────

    async fn extract_gemini_full(
        &self,
        payload: &[u8],
        content_type: Option<&str>,
        filename: Option<&str>,
    ) -> Result<ExtractionResult, ExtractError> {
        if !self.can_use_multimodal() {
            return Err(ExtractError::MultimodalRequired);
        }
        let llm = match &self.llm {
            Some(llm) => Arc::clone(llm),
            None => return Err(ExtractError::MultimodalRequired),
        };

        let source = SourceType::sniff(content_type, filename);
        let mut all_questions: Vec<ExtractedQuestion> = Vec::new();
        let mut raw_chunks: Vec<String> = Vec::new();

        match source {
            SourceType::Pdf => {
                let pages = render_pages(payload, content_type, filename).await;
                if pages.is_empty() {
                    return Err(ExtractError::RenderFailed {
                        detail: "no PDF page could be rasterised".to_string(),
                    });
                }
                for (idx0, page) in pages.iter().enumerate() {
                    let page_index = idx0 + 1;
                    let (media, mime) = encode_compact_jpeg(page, self.config.media_byte_cap)
                        .map_err(|e| ExtractError::PageExtractFailed {
                            page: page_index,
                            detail: e.to_string(),
                        })?;
                    let (questions, raw_text) = self
                        .extract_media_page(llm.as_ref(), &media, &mime, source, page_index)
                        .await
                        .map_err(|detail| ExtractError::PageExtractFailed {
                            page: page_index,
                            detail,
                        })?;
                    all_questions.extend(questions);
                    raw_chunks.push(raw_text);
                }
            }
            SourceType::Image => {
                let (media, mime) = self.prepare_image_media(payload).ok_or_else(|| {
                    ExtractError::PageExtractFailed {
                        page: 1,
                        detail: "could not prepare image payload".to_string(),
                    }
                })?;
                let (questions, raw_text) = self
                    .extract_media_page(llm.as_ref(), &media, &mime, source, 1)
                    .await
                    .map_err(|detail| ExtractError::PageExtractFailed { page: 1, detail })?;
                all_questions.extend(questions);
                raw_chunks.push(raw_text);
            }
            SourceType::Text | SourceType::Binary => {
                return Err(ExtractError::UnsupportedMedia {
                    content_type: content_type.unwrap_or_default().to_string(),
                    filename: filename.unwrap_or_default().to_string(),
                });
            }
        }

        if all_questions.is_empty() {
            return Err(ExtractError::NoQuestions);
        }

        all_questions.sort_by(|a, b| {
            let ka = (
                a.metadata.page_index.unwrap_or(0),
                a.order_index,
                a.number_label.as_str(),
            );
            let kb = (
                b.metadata.page_index.unwrap_or(0),
                b.order_index,
                b.number_label.as_str(),
            );
            ka.cmp(&kb)
        });
        for (idx0, question) in all_questions.iter_mut().enumerate() {
            question.order_index = idx0 + 1;
            if question.number_label.is_empty() {
                question.number_label = (idx0 + 1).to_string();
            }
        }

        let engine = combined_engine_tag(&all_questions, source);
        let joined: Vec<&str> = raw_chunks
            .iter()
            .map(String::as_str)
            .filter(|chunk| !chunk.is_empty())
            .collect();
        let raw_text = normalize_text(&joined.join("\n\n"));
        let average_confidence = ExtractionResult::average_of(&all_questions);
        Ok(ExtractionResult {
            questions: all_questions,
            engine,
            average_confidence,
            raw_text,
            source_type: source,
        })
    }

    /// Grayscale/denoise the upload and re-encode it under the media byte
    /// cap.
    fn prepare_image_media(&self, payload: &[u8]) -> Option<(Vec<u8>, String)> {
        let processed = preprocess_for_ocr(payload);
        let image = image::load_from_memory(&processed).ok()?;
        encode_compact_jpeg(&image, self.config.media_byte_cap).ok()
    }

    /// Structured multimodal parse of one page, retrying once through the
    /// raw-text call. The error is a human-readable detail; the caller owns
    /// the page number.
    async fn extract_media_page(
        &self,
        llm: &dyn LlmPort,
        media: &[u8],
        mime: &str,
        source: SourceType,
        page_index: usize,
    ) -> Result<(Vec<ExtractedQuestion>, String), String> {
        let prompt = prompts::media_prompt(page_index);
        let data = match llm
            .generate_structured_from_media(
                &prompt,
                &prompts::MEDIA_EXTRACTION_SCHEMA,
                media,
                mime,
                Some(prompts::MEDIA_SYSTEM_PROMPT),
            )
            .await
        {
            Ok(data) => data,
            Err(exc) => {
                debug!(page = page_index, error = %exc, "structured call failed; trying raw text");
                return self
                    .extract_media_raw_text(llm, media, mime, source, page_index)
                    .await
                    .map_err(|raw_exc| {
                        format!(
                            "structured extraction failed: {exc}; raw-text fallback failed: {raw_exc}"
                        )
                    });
            }
        };

        let items = match data.get("questions").and_then(Value::as_array) {
            Some(items) if !items.is_empty() => items,
            _ => {
                debug!(page = page_index, "structured response empty; trying raw text");
                return self
                    .extract_media_raw_text(llm, media, mime, source, page_index)
                    .await;
            }
        };

        let model_tag = self.llm_model_tag();
        let mut questions: Vec<ExtractedQuestion> = Vec::new();
        let mut raw_chunks: Vec<String> = Vec::new();
        for (idx0, item) in items.iter().enumerate() {
            let idx = idx0 + 1;
            if !item.is_object() {
                continue;
            }
            let text = normalize_text(item.get("text").and_then(Value::as_str).unwrap_or(""));
            if text.is_empty() {
                continue;
            }
            let order_index = to_index(item.get("orderIndex"), idx);
            let number_label = string_or_number(item.get("numberLabel"))
                .unwrap_or_else(|| order_index.to_string());
            let confidence = to_confidence(item.get("confidence"), 0.9);

            let mut metadata =
                QuestionMetadata::multimodal("gemini_vision", source, Some(page_index), &model_tag);
            metadata.subject = overlay_field(item, "subject", "");
            metadata.unit = overlay_field(item, "unit", "");
            metadata.difficulty = overlay_field(item, "difficulty", "");
            metadata.question_type = Some(overlay_field(item, "questionType", ""));
            metadata.answer_format = Some(overlay_field(item, "answerFormat", ""));
            metadata.crop_hint = crop_hint_from_item(item, page_index);

            raw_chunks.push(text.clone());
            questions.push(ExtractedQuestion {
                order_index,
                number_label,
                structure: build_structure(&text),
                confidence,
                metadata,
                text,
            });
        }

        if questions.is_empty() {
            return Err("structured extraction returned no valid question payloads".to_string());
        }

        let questions = postprocess_crop_hints(questions, &self.config.layout);
        let raw_text = normalize_text(&raw_chunks.join("\n\n"));
        Ok((questions, raw_text))
    }

    /// Raw-text retry: pull the whole page as text and re-split locally.
    async fn extract_media_raw_text(
        &self,
        llm: &dyn LlmPort,
        media: &[u8],
        mime: &str,
        source: SourceType,
        page_index: usize,
    ) -> Result<(Vec<ExtractedQuestion>, String), String> {
        let data = llm
            .generate_structured_from_media(
                prompts::RAW_TEXT_PROMPT,
                &prompts::RAW_TEXT_SCHEMA,
                media,
                mime,
                Some(prompts::RAW_TEXT_SYSTEM_PROMPT),
            )
            .await
            .map_err(|e| format!("raw-text extraction failed: {e}"))?;

        let raw_text = normalize_text(data.get("rawText").and_then(Value::as_str).unwrap_or(""));
        if raw_text.is_empty() {
            return Err("multimodal extraction returned empty questions and empty raw text"
                .to_string());
        }

        let mut split = split_questions(&raw_text);
        if split.is_empty() {
            split = vec![(None, raw_text.clone())];
        }

        let model_tag = self.llm_model_tag();
        let questions = split
            .into_iter()
            .enumerate()
            .map(|(idx0, (label, chunk))| {
                let order = idx0 + 1;
                ExtractedQuestion {
                    order_index: order,
                    number_label: label.unwrap_or_else(|| order.to_string()),
                    confidence: (0.85 - 0.02 * idx0 as f64).max(0.55),
                    metadata: QuestionMetadata::multimodal(
                        "gemini_vision_text",
                        source,
                        Some(page_index),
                        &model_tag,
                    ),
                    structure: build_structure(&chunk),
                    text: chunk,
                }
            })
            .collect();

        Ok((questions, raw_text))
    }
}

// ── Free helpers ─────────────────────────────────────────────────────────────

async fn acquire_utf8(payload: &[u8]) -> Result<Option<Acquired>, PortError> {
    if payload.is_empty() {
        return Ok(None);
    }
    let Ok(decoded) = std::str::from_utf8(payload) else {
        return Ok(None);
    };
    let text = normalize_text(decoded);
    if text.is_empty() {
        return Ok(None);
    }
    Ok(Some(Acquired {
        text,
        confidence: 0.7,
        engine: "utf8_decode".to_string(),
        source: SourceType::Text,
    }))
}

/// Zero and negative reported confidences mean "engine did not say"; use
/// the path default instead.
fn effective_confidence(reported: f64, default: f64) -> f64 {
    let confidence = if reported > 0.0 { reported } else { default };
    confidence.clamp(0.0, 1.0)
}

/// Truncate on a character boundary.
fn clip_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn to_index(value: Option<&Value>, default: usize) -> usize {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v > 0 => v as usize,
        _ => default,
    }
}

fn to_confidence(value: Option<&Value>, default: f64) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.unwrap_or(default).clamp(0.0, 1.0)
}

fn to_ratio(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Models sometimes return labels as bare numbers; accept both.
fn string_or_number(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Take the item's value, else keep the current one, else `"unknown"`.
fn overlay_field(item: &Value, key: &str, current: &str) -> String {
    match item.get(key).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ if !current.is_empty() => current.to_string(),
        _ => "unknown".to_string(),
    }
}

fn crop_hint_from_item(item: &Value, page_index: usize) -> Option<RegionHint> {
    let top = to_ratio(item.get("cropTopRatio"))?.clamp(0.0, 1.0);
    let bottom = to_ratio(item.get("cropBottomRatio"))?.clamp(0.0, 1.0);
    if bottom <= top {
        return None;
    }
    let mut hint = RegionHint {
        page_index: Some(page_index),
        top_ratio: Some(round_ratio(top)),
        bottom_ratio: Some(round_ratio(bottom)),
        left_ratio: None,
        right_ratio: None,
    };
    if let (Some(left), Some(right)) = (
        to_ratio(item.get("cropLeftRatio")),
        to_ratio(item.get("cropRightRatio")),
    ) {
        let left = left.clamp(0.0, 1.0);
        let right = right.clamp(0.0, 1.0);
        if right > left {
            hint.left_ratio = Some(round_ratio(left));
            hint.right_ratio = Some(round_ratio(right));
        }
    }
    Some(hint)
}

/// Collapse per-question engine tags into the run-level tag.
fn combined_engine_tag(questions: &[ExtractedQuestion], source: SourceType) -> String {
    let engines: HashSet<&str> = questions
        .iter()
        .map(|q| q.metadata.engine.as_str())
        .collect();
    let only = |tag: &str| engines.len() == 1 && engines.contains(tag);
    let tag = if source == SourceType::Pdf {
        if only("gemini_vision") {
            "gemini_vision_pages"
        } else if only("gemini_vision_text") {
            "gemini_vision_text_pages"
        } else {
            "gemini_vision_mixed"
        }
    } else if only("gemini_vision") {
        "gemini_vision"
    } else if only("gemini_vision_text") {
        "gemini_vision_text"
    } else {
        "gemini_vision_mixed"
    };
    tag.to_string()
}

// ── Tests ────────────────────────────────────────────────────────────────────
