//! OCR port: one image in, normalized text plus word tokens out.

use crate::error::PortError;
use crate::ports::Provenance;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Pixel-space bounding box of one recognized token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

/// One recognized word with its position and engine confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrToken {
    pub text: String,
    pub bbox: TokenBox,
    pub confidence: f64,
}

/// Normalized OCR payload for one image.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OcrExtraction {
    pub text: String,
    /// Engine-reported confidence in `[0, 1]`.
    pub confidence: f64,
    /// Word-level tokens; empty when the engine only does full-page text.
    pub tokens: Vec<OcrToken>,
}

/// Optical character recognition over a single raster image.
#[async_trait]
pub trait OcrPort: Send + Sync {
    fn name(&self) -> &str;
    fn provenance(&self) -> Provenance;
    async fn extract(&self, image_bytes: &[u8]) -> Result<OcrExtraction, PortError>;
}

/// Canned OCR used when no real engine is configured.
///
/// The fixed `"[mock] OCR text"` marker is load-bearing: the pipeline's
/// last-resort path detects it and swaps in user-facing guidance instead of
/// presenting mock output as extraction.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockOcr;

#[async_trait]
impl OcrPort for MockOcr {
    fn name(&self) -> &str {
        "mock"
    }

    fn provenance(&self) -> Provenance {
        Provenance::Mock
    }

    async fn extract(&self, image_bytes: &[u8]) -> Result<OcrExtraction, PortError> {
        let size_hint = (image_bytes.len() / 256).max(1) as u32;
        Ok(OcrExtraction {
            text: "[mock] OCR text".into(),
            confidence: 0.91,
            tokens: vec![OcrToken {
                text: "mock".into(),
                bbox: TokenBox {
                    x1: 0,
                    y1: 0,
                    x2: 20 * size_hint,
                    y2: 20,
                },
                confidence: 0.91,
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_ocr_is_marked_and_detectable() {
        let ocr = MockOcr;
        assert_eq!(ocr.provenance(), Provenance::Mock);
        let out = ocr.extract(&[0u8; 1024]).await.expect("mock extract");
        assert!(out.text.starts_with("[mock]"));
        assert_eq!(out.confidence, 0.91);
        assert_eq!(out.tokens.len(), 1);
    }
}
