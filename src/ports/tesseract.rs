//! Local Tesseract OCR behind the `tesseract` feature.
//!
//! Uses `leptess` with PSM 6 (single uniform text block), which handles the
//! dense column layout of exam scans better than full auto-segmentation.
//! Each call builds its own `LepTess` inside `spawn_blocking` — the handle
//! is not `Send`, and recognition of a full page blocks for seconds.

use crate::error::PortError;
use crate::ports::{OcrExtraction, OcrPort, OcrToken, Provenance, TokenBox};
use async_trait::async_trait;
use leptess::{LepTess, Variable};

const PROVIDER: &str = "tesseract";

fn engine_error(detail: impl std::fmt::Display) -> PortError {
    PortError::Request {
        provider: PROVIDER.into(),
        detail: detail.to_string(),
    }
}

/// Tesseract-backed [`OcrPort`] with word-level tokens.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    lang: String,
}

impl TesseractOcr {
    /// Probe-initializes Tesseract so a missing language pack fails here,
    /// not mid-extraction.
    pub fn new(lang: impl Into<String>) -> Result<Self, PortError> {
        let lang = lang.into();
        LepTess::new(None, &lang).map_err(|e| {
            engine_error(format!(
                "init with language {lang:?} failed: {e}. Install the tesseract language data and retry."
            ))
        })?;
        Ok(Self { lang })
    }

    fn recognize(lang: &str, image_bytes: &[u8]) -> Result<OcrExtraction, PortError> {
        let mut engine = LepTess::new(None, lang).map_err(engine_error)?;
        engine
            .set_variable(Variable::TesseditPagesegMode, "6")
            .map_err(engine_error)?;
        engine.set_image_from_mem(image_bytes).map_err(engine_error)?;

        let text = engine.get_utf8_text().map_err(engine_error)?.trim().to_string();
        let confidence = f64::from(engine.mean_text_conf()).clamp(0.0, 100.0) / 100.0;

        let mut tokens = Vec::new();
        if let Some(boxes) =
            engine.get_component_boxes(leptess::capi::TessPageIteratorLevel_RIL_WORD, true)
        {
            for word in &boxes {
                let geom = word.get_geometry();
                engine.set_rectangle(geom.x, geom.y, geom.w, geom.h);
                let word_text = engine.get_utf8_text().unwrap_or_default().trim().to_string();
                if word_text.is_empty() {
                    continue;
                }
                let word_conf = f64::from(engine.mean_text_conf()).clamp(0.0, 100.0) / 100.0;
                let x1 = geom.x.max(0) as u32;
                let y1 = geom.y.max(0) as u32;
                tokens.push(OcrToken {
                    text: word_text,
                    bbox: TokenBox {
                        x1,
                        y1,
                        x2: x1 + geom.w.max(0) as u32,
                        y2: y1 + geom.h.max(0) as u32,
                    },
                    confidence: word_conf,
                });
            }
        }

        Ok(OcrExtraction {
            text,
            confidence,
            tokens,
        })
    }
}

#[async_trait]
impl OcrPort for TesseractOcr {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn provenance(&self) -> Provenance {
        Provenance::Real
    }

    async fn extract(&self, image_bytes: &[u8]) -> Result<OcrExtraction, PortError> {
        let lang = self.lang.clone();
        let bytes = image_bytes.to_vec();
        tokio::task::spawn_blocking(move || Self::recognize(&lang, &bytes))
            .await
            .map_err(|e| engine_error(format!("OCR task failed: {e}")))?
    }
}
