//! Per-question crop extraction and persistence.
//!
//! [`QuestionCropper`] is the last stage of a run: given the original
//! document bytes and the extracted question list, it produces one stored
//! PNG per question plus a [`CropTrace`] recording where the rectangle came
//! from. The planner tiers defined in [`layout`](crate::pipeline::layout)
//! are tried strongest-first:
//!
//! 1. per-page ratio hints → crops from individual page images,
//! 2. canvas ratio hints → crops from one stacked canvas,
//! 3. OCR anchors / uniform bands → canvas crops tagged `fallback`.
//!
//! This stage is decorative relative to the extracted text, so it never
//! fails the run: unrenderable documents and storage trouble degrade to
//! `url = None` traces.

use crate::config::LayoutTuning;
use crate::output::CropTrace;
use crate::pipeline::anchors::{labels_reliable, pick_anchor_ys, AnchorDetector};
use crate::pipeline::layout::{
    plan_canvas_ranges, plan_page_regions, uniform_ranges, CropSource, RegionHint,
};
use crate::pipeline::render::{encode_png, render_pages, stack_canvas};
use crate::ports::StoragePort;
use image::DynamicImage;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct QuestionCropper {
    storage: Arc<dyn StoragePort>,
    detector: AnchorDetector,
    tuning: LayoutTuning,
}

impl QuestionCropper {
    pub fn new(
        storage: Arc<dyn StoragePort>,
        detector: AnchorDetector,
        tuning: LayoutTuning,
    ) -> Self {
        Self {
            storage,
            detector,
            tuning,
        }
    }

    /// Crop, persist, and trace one image per question.
    ///
    /// Always returns exactly `question_count` traces (zero for a zero
    /// count). A trace with `url = None` means the question kept its text
    /// but no image could be produced for it.
    pub async fn create_and_store_with_trace(
        &self,
        set_id: &str,
        payload: &[u8],
        content_type: Option<&str>,
        filename: Option<&str>,
        question_count: usize,
        question_labels: Option<&[Option<String>]>,
        question_crop_hints: Option<&[Option<RegionHint>]>,
    ) -> Vec<CropTrace> {
        if question_count == 0 {
            return Vec::new();
        }

        let pages = render_pages(payload, content_type, filename).await;

        if !pages.is_empty() {
            let heights: Vec<u32> = pages.iter().map(|page| page.height()).collect();
            let widths: Vec<u32> = pages.iter().map(|page| page.width()).collect();
            if let Some(planned) = plan_page_regions(
                &heights,
                &widths,
                question_count,
                question_crop_hints,
                &self.tuning,
            ) {
                debug!(regions = planned.len(), "cropping hinted page regions");
                let mut traces = Vec::with_capacity(planned.len());
                for (idx, region) in planned.iter().enumerate() {
                    if region.y2 <= region.y1 {
                        traces.push(CropTrace {
                            url: None,
                            crop_source: region.source,
                            page_index: Some(region.page + 1),
                        });
                        continue;
                    }
                    let crop = pages[region.page].crop_imm(
                        region.x1,
                        region.y1,
                        region.x2 - region.x1,
                        region.y2 - region.y1,
                    );
                    traces.push(CropTrace {
                        url: self.store_crop(set_id, idx + 1, &crop).await,
                        crop_source: region.source,
                        page_index: Some(region.page + 1),
                    });
                }
                return traces;
            }
        }

        // Canvas tiers: every page stacked into one tall image, full-width
        // horizontal bands only.
        let Some(canvas) = stack_canvas(&pages) else {
            return fallback_traces(question_count);
        };
        let height = canvas.height();

        let ranges = match plan_canvas_ranges(height, question_count, question_crop_hints) {
            Some(ranges) => ranges,
            None => {
                let anchors = self.detector.detect(&canvas).await;
                let padded;
                let labels: &[Option<String>] = match question_labels {
                    Some(labels) if !labels.is_empty() => {
                        &labels[..labels.len().min(question_count)]
                    }
                    _ => {
                        padded = vec![None; question_count];
                        &padded
                    }
                };
                let starts = if labels_reliable(labels) {
                    pick_anchor_ys(height, labels, &anchors)
                } else {
                    anchors
                        .iter()
                        .take(question_count)
                        .map(|anchor| anchor.y)
                        .collect()
                };
                uniform_ranges(height, question_count, &starts)
            }
        };
        if ranges.is_empty() {
            return fallback_traces(question_count);
        }

        let mut traces = Vec::with_capacity(ranges.len());
        for (idx, &(y1, y2)) in ranges.iter().enumerate() {
            if y2 <= y1 {
                traces.push(CropTrace {
                    url: None,
                    crop_source: CropSource::Fallback,
                    page_index: None,
                });
                continue;
            }
            let crop = canvas.crop_imm(0, y1, canvas.width(), y2 - y1);
            traces.push(CropTrace {
                url: self.store_crop(set_id, idx + 1, &crop).await,
                crop_source: CropSource::Fallback,
                page_index: None,
            });
        }
        traces
    }

    /// Encode and persist one crop. Storage trouble downgrades the trace to
    /// `url = None` instead of failing the run.
    async fn store_crop(&self, set_id: &str, number: usize, crop: &DynamicImage) -> Option<String> {
        let key = format!("{set_id}/questions/q_{number:03}.png");
        let png = match encode_png(crop) {
            Ok(png) => png,
            Err(e) => {
                warn!(key = %key, error = %e, "crop encode failed");
                return None;
            }
        };
        match self.storage.save_bytes(&key, &png, Some("image/png")).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(key = %key, error = %e, "crop persist failed");
                None
            }
        }
    }
}

fn fallback_traces(question_count: usize) -> Vec<CropTrace> {
    (0..question_count)
        .map(|_| CropTrace {
            url: None,
            crop_source: CropSource::Fallback,
            page_index: None,
        })
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PortError;
    use crate::ports::{MemoryStorage, MockOcr, Provenance};
    use async_trait::async_trait;
    use image::{DynamicImage, RgbImage};
    use std::io::Cursor;

    struct FailingStorage;

    #[async_trait]
    impl StoragePort for FailingStorage {
        fn name(&self) -> &str {
            "failing"
        }

        fn provenance(&self) -> Provenance {
            Provenance::Mock
        }

        async fn save_bytes(
            &self,
            _key: &str,
            _data: &[u8],
            _content_type: Option<&str>,
        ) -> Result<String, PortError> {
            Err(PortError::Request {
                provider: "failing".into(),
                detail: "disk full".into(),
            })
        }

        fn build_url(&self, key: &str) -> String {
            format!("/uploads/{key}")
        }
    }

    fn png_payload(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            image::Rgb([230, 230, 230]),
        ));
        let mut buf = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn cropper(storage: Arc<dyn StoragePort>) -> QuestionCropper {
        let detector = AnchorDetector::new(
            Arc::new(MockOcr::default()),
            None,
            LayoutTuning::default(),
        );
        QuestionCropper::new(storage, detector, LayoutTuning::default())
    }

    fn hint(top: f64, bottom: f64) -> Option<RegionHint> {
        Some(RegionHint {
            page_index: Some(1),
            top_ratio: Some(top),
            bottom_ratio: Some(bottom),
            left_ratio: None,
            right_ratio: None,
        })
    }

    #[tokio::test]
    async fn hinted_image_crops_per_page() {
        let storage = Arc::new(MemoryStorage::new());
        let cropper = cropper(storage.clone());
        let hints = vec![hint(0.1, 0.5), hint(0.5, 0.9)];

        let traces = cropper
            .create_and_store_with_trace(
                "set-1",
                &png_payload(200, 400),
                Some("image/png"),
                Some("sheet.png"),
                2,
                None,
                Some(&hints),
            )
            .await;

        assert_eq!(traces.len(), 2);
        for trace in &traces {
            assert_eq!(trace.crop_source, CropSource::Gemini);
            assert_eq!(trace.page_index, Some(1));
        }
        assert_eq!(
            traces[0].url.as_deref(),
            Some("/uploads/set-1/questions/q_001.png")
        );

        let stored = storage.get("set-1/questions/q_001.png").await.unwrap();
        let crop = image::load_from_memory(&stored).unwrap();
        assert_eq!((crop.width(), crop.height()), (200, 160));
    }

    #[tokio::test]
    async fn unrenderable_payload_yields_null_traces() {
        let storage = Arc::new(MemoryStorage::new());
        let cropper = cropper(storage.clone());

        let traces = cropper
            .create_and_store_with_trace(
                "set-2",
                b"just words",
                Some("text/plain"),
                Some("notes.txt"),
                3,
                None,
                None,
            )
            .await;

        assert_eq!(traces.len(), 3);
        for trace in &traces {
            assert!(trace.url.is_none());
            assert_eq!(trace.crop_source, CropSource::Fallback);
            assert_eq!(trace.page_index, None);
        }
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn no_hints_uses_uniform_canvas_bands() {
        let storage = Arc::new(MemoryStorage::new());
        let cropper = cropper(storage.clone());

        let traces = cropper
            .create_and_store_with_trace(
                "set-3",
                &png_payload(100, 300),
                Some("image/png"),
                None,
                3,
                None,
                None,
            )
            .await;

        assert_eq!(traces.len(), 3);
        for trace in &traces {
            assert!(trace.url.is_some());
            assert_eq!(trace.crop_source, CropSource::Fallback);
            assert_eq!(trace.page_index, None);
        }
        assert_eq!(storage.len().await, 3);

        let stored = storage.get("set-3/questions/q_001.png").await.unwrap();
        let crop = image::load_from_memory(&stored).unwrap();
        assert_eq!((crop.width(), crop.height()), (100, 100));
    }

    #[tokio::test]
    async fn short_hint_list_degrades_to_fallback_source() {
        let storage = Arc::new(MemoryStorage::new());
        let cropper = cropper(storage.clone());
        let hints = vec![hint(0.0, 0.4)];

        let traces = cropper
            .create_and_store_with_trace(
                "set-4",
                &png_payload(100, 300),
                Some("image/png"),
                None,
                2,
                None,
                Some(&hints),
            )
            .await;

        assert_eq!(traces.len(), 2);
        for trace in &traces {
            assert_eq!(trace.crop_source, CropSource::Fallback);
            assert!(trace.url.is_some());
        }
    }

    #[tokio::test]
    async fn zero_questions_store_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        let cropper = cropper(storage.clone());

        let traces = cropper
            .create_and_store_with_trace(
                "set-5",
                &png_payload(100, 100),
                Some("image/png"),
                None,
                0,
                None,
                None,
            )
            .await;

        assert!(traces.is_empty());
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn storage_failure_keeps_trace_without_url() {
        let cropper = cropper(Arc::new(FailingStorage));
        let hints = vec![hint(0.0, 0.5), hint(0.5, 1.0)];

        let traces = cropper
            .create_and_store_with_trace(
                "set-6",
                &png_payload(200, 400),
                Some("image/png"),
                None,
                2,
                None,
                Some(&hints),
            )
            .await;

        assert_eq!(traces.len(), 2);
        for trace in &traces {
            assert!(trace.url.is_none());
            assert_eq!(trace.crop_source, CropSource::Gemini);
            assert_eq!(trace.page_index, Some(1));
        }
    }
}
