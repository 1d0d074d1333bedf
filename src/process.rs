//! One-call driver over the full flow: extract, crop, merge, triage.
//!
//! [`DocumentProcessor`] is the convenience layer job runners embed: it runs
//! the extraction pipeline, hands the question list to the cropper, folds
//! each crop trace back into its question's metadata, and stamps the review
//! triage fields the downstream store keys on. Callers that want finer
//! control use [`ExtractionPipeline`] and
//! [`QuestionCropper`](crate::pipeline::crop::QuestionCropper) directly.

use crate::config::ExtractionMode;
use crate::error::ExtractError;
use crate::extract::ExtractionPipeline;
use crate::output::{
    ExtractionResult, QuestionMetadata, QuestionStructure, ReviewStatus, SourceType,
};
use crate::pipeline::crop::QuestionCropper;
use crate::pipeline::layout::RegionHint;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Stamped into every question's metadata so reviewers can tell which
/// pipeline generation produced a record.
const PIPELINE_VERSION_GEMINI: &str = "phaseA-gemini-pages-1";
const PIPELINE_VERSION_HYBRID: &str = "phaseA-mvp-1";

/// One question as the review store receives it.
///
/// Field names serialize snake_case to match the store's record layout;
/// the nested metadata stays camelCase (see
/// [`QuestionMetadata`](crate::output::QuestionMetadata)).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedQuestion {
    pub number_label: String,
    pub order_index: usize,
    pub review_status: ReviewStatus,
    pub confidence: f64,
    #[serde(rename = "ocr_text")]
    pub text: String,
    pub metadata: QuestionMetadata,
    pub structure: QuestionStructure,
}

/// Outcome of processing one document end to end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedDocument {
    pub questions: Vec<ProcessedQuestion>,
    pub engine: String,
    pub average_confidence: f64,
    pub raw_text: String,
    pub source_type: SourceType,
    /// True when at least one question exists and all cleared auto review.
    pub ready: bool,
}

/// Extraction pipeline plus optional cropper, driven as one unit.
pub struct DocumentProcessor {
    pipeline: ExtractionPipeline,
    cropper: Option<QuestionCropper>,
}

impl DocumentProcessor {
    pub fn new(pipeline: ExtractionPipeline) -> Self {
        Self {
            pipeline,
            cropper: None,
        }
    }

    /// Attach a cropper. Without one, processing skips crop generation and
    /// leaves the crop metadata fields unset.
    pub fn with_cropper(mut self, cropper: QuestionCropper) -> Self {
        self.cropper = Some(cropper);
        self
    }

    /// Extract questions from one document, store per-question crops under
    /// `set_id`, and return the merged records.
    ///
    /// Crop storage failures degrade to questions without a crop URL; only
    /// extraction itself can fail.
    pub async fn process(
        &self,
        set_id: &str,
        payload: &[u8],
        content_type: Option<&str>,
        filename: Option<&str>,
    ) -> Result<ProcessedDocument, ExtractError> {
        let result = self.pipeline.extract(payload, content_type, filename).await?;
        let version = match self.pipeline.config().mode {
            ExtractionMode::GeminiFull => PIPELINE_VERSION_GEMINI,
            ExtractionMode::Hybrid => PIPELINE_VERSION_HYBRID,
        };
        let stamped_average = round4(result.average_confidence);

        let ExtractionResult {
            questions,
            engine,
            average_confidence,
            raw_text,
            source_type,
        } = result;

        let mut processed: Vec<ProcessedQuestion> = questions
            .into_iter()
            .map(|q| {
                let mut metadata = q.metadata;
                metadata.source_mime = content_type.map(str::to_string);
                metadata.source_filename = filename.map(str::to_string);
                metadata.pipeline_version = Some(version.to_string());
                metadata.average_confidence = Some(stamped_average);
                ProcessedQuestion {
                    number_label: q.number_label,
                    order_index: q.order_index,
                    review_status: ReviewStatus::from_confidence(q.confidence),
                    confidence: q.confidence,
                    text: q.text,
                    metadata,
                    structure: q.structure,
                }
            })
            .collect();

        if let Some(cropper) = &self.cropper {
            let labels: Vec<Option<String>> = processed
                .iter()
                .map(|q| (!q.number_label.is_empty()).then(|| q.number_label.clone()))
                .collect();
            let hints: Vec<Option<RegionHint>> = processed
                .iter()
                .map(|q| q.metadata.crop_hint)
                .collect();
            let traces = cropper
                .create_and_store_with_trace(
                    set_id,
                    payload,
                    content_type,
                    filename,
                    processed.len(),
                    Some(&labels),
                    Some(&hints),
                )
                .await;
            for (question, trace) in processed.iter_mut().zip(traces) {
                if let Some(url) = trace.url {
                    question.metadata.cropped_image_url = Some(url);
                }
                question.metadata.crop_source = Some(trace.crop_source);
                if question.metadata.page_index.is_none() {
                    question.metadata.page_index = trace.page_index;
                }
            }
        }

        let ready = !processed.is_empty()
            && processed
                .iter()
                .all(|q| q.review_status == ReviewStatus::AutoOk);
        info!(
            set_id,
            questions = processed.len(),
            ready,
            "document processed"
        );
        Ok(ProcessedDocument {
            questions: processed,
            engine,
            average_confidence,
            raw_text,
            source_type,
            ready,
        })
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExtractionConfig, LayoutTuning};
    use crate::error::PortError;
    use crate::pipeline::anchors::AnchorDetector;
    use crate::pipeline::layout::CropSource;
    use crate::ports::{MemoryStorage, MockOcr, OcrExtraction, OcrPort, Provenance};
    use async_trait::async_trait;
    use image::RgbImage;
    use std::io::Cursor;
    use std::sync::Arc;

    struct TextOcr {
        text: &'static str,
        confidence: f64,
    }

    #[async_trait]
    impl OcrPort for TextOcr {
        fn name(&self) -> &str {
            "stubocr"
        }

        fn provenance(&self) -> Provenance {
            Provenance::Real
        }

        async fn extract(&self, _image_bytes: &[u8]) -> Result<OcrExtraction, PortError> {
            Ok(OcrExtraction {
                text: self.text.to_string(),
                confidence: self.confidence,
                tokens: Vec::new(),
            })
        }
    }

    fn png_payload(width: u32, height: u32) -> Vec<u8> {
        let image = image::DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            image::Rgb([250, 250, 250]),
        ));
        let mut buf = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[tokio::test]
    async fn process_merges_crop_traces_into_metadata() {
        let ocr = Arc::new(TextOcr {
            text: "1. 문제 하나\n2. 문제 둘",
            confidence: 0.95,
        });
        let pipeline = ExtractionPipeline::new(ocr, ExtractionConfig::default());
        let storage = Arc::new(MemoryStorage::new());
        let detector = AnchorDetector::new(Arc::new(MockOcr), None, LayoutTuning::default());
        let cropper = QuestionCropper::new(
            Arc::clone(&storage) as Arc<_>,
            detector,
            LayoutTuning::default(),
        );
        let processor = DocumentProcessor::new(pipeline).with_cropper(cropper);

        let doc = processor
            .process(
                "examset",
                &png_payload(200, 400),
                Some("image/png"),
                Some("scan.png"),
            )
            .await
            .unwrap();

        assert_eq!(doc.questions.len(), 2);
        assert!(doc.ready);
        assert_eq!(
            doc.questions[0].metadata.cropped_image_url.as_deref(),
            Some("/uploads/examset/questions/q_001.png")
        );
        assert_eq!(
            doc.questions[1].metadata.cropped_image_url.as_deref(),
            Some("/uploads/examset/questions/q_002.png")
        );
        assert_eq!(
            doc.questions[0].metadata.crop_source,
            Some(CropSource::Fallback)
        );
        assert_eq!(doc.questions[0].metadata.page_index, None);
        assert_eq!(storage.len().await, 2);

        let meta = &doc.questions[0].metadata;
        assert_eq!(meta.source_mime.as_deref(), Some("image/png"));
        assert_eq!(meta.source_filename.as_deref(), Some("scan.png"));
        assert_eq!(meta.pipeline_version.as_deref(), Some("phaseA-mvp-1"));
        assert_eq!(meta.average_confidence, Some(0.945));
    }

    #[tokio::test]
    async fn process_without_cropper_leaves_crop_fields_unset() {
        let pipeline = ExtractionPipeline::new(Arc::new(MockOcr), ExtractionConfig::default());
        let processor = DocumentProcessor::new(pipeline);

        let doc = processor
            .process(
                "examset",
                "1. 원본 문제".as_bytes(),
                Some("text/plain"),
                Some("questions.txt"),
            )
            .await
            .unwrap();

        assert!(!doc.ready);
        let q = &doc.questions[0];
        assert_eq!(q.review_status, ReviewStatus::AutoFlagged);
        assert_eq!(q.metadata.cropped_image_url, None);
        assert_eq!(q.metadata.crop_source, None);
        assert_eq!(q.metadata.source_mime.as_deref(), Some("text/plain"));
        assert_eq!(q.metadata.source_filename.as_deref(), Some("questions.txt"));
    }

    #[tokio::test]
    async fn processed_question_serializes_store_record_shape() {
        let pipeline = ExtractionPipeline::new(Arc::new(MockOcr), ExtractionConfig::default());
        let processor = DocumentProcessor::new(pipeline);

        let doc = processor
            .process("examset", "3. 단답형 문제".as_bytes(), None, None)
            .await
            .unwrap();

        let json = serde_json::to_value(&doc.questions[0]).unwrap();
        assert_eq!(json["number_label"], "3");
        assert_eq!(json["order_index"], 1);
        assert_eq!(json["review_status"], "auto_flagged");
        assert_eq!(json["ocr_text"], "3. 단답형 문제");
        assert_eq!(json["metadata"]["pipelineVersion"], "phaseA-mvp-1");
        assert_eq!(json["metadata"]["sourceType"], "text");
        assert!(json["metadata"].get("croppedImageUrl").is_none());
    }
}
