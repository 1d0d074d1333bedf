//! Document rasterisation and the image codecs the pipeline needs.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async
//! contexts. `tokio::task::spawn_blocking` moves rendering onto the
//! blocking thread pool so Tokio workers never stall on a multi-second
//! rasterisation.
//!
//! ## Failure posture
//!
//! Rendering is always best-effort: a missing pdfium library, a corrupt
//! document, or undecodable image bytes all come back as "no pages". The
//! caller decides whether that is fatal (multimodal page extraction) or
//! just drops to a cheaper strategy (cropping, OCR).

use crate::error::ExtractError;
use crate::output::SourceType;
use crate::pipeline::segment::normalize_text;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use pdfium_render::prelude::*;
use std::io::Cursor;
use tracing::{debug, warn};

/// PDF pages render at twice their point size; exam scans need the extra
/// resolution for OCR and legible crops.
const PDF_RENDER_SCALE: f32 = 2.0;

/// Rasterise a document into one image per page.
///
/// Image inputs decode to a single RGB page; PDFs render per page at
/// [`PDF_RENDER_SCALE`]. Unrecognized or unreadable inputs yield an empty
/// vector.
pub async fn render_pages(
    payload: &[u8],
    content_type: Option<&str>,
    filename: Option<&str>,
) -> Vec<DynamicImage> {
    let source = SourceType::sniff(content_type, filename);
    let bytes = payload.to_vec();
    match tokio::task::spawn_blocking(move || render_pages_blocking(&bytes, source)).await {
        Ok(pages) => pages,
        Err(e) => {
            warn!(error = %e, "render task failed");
            Vec::new()
        }
    }
}

fn render_pages_blocking(payload: &[u8], source: SourceType) -> Vec<DynamicImage> {
    match source {
        SourceType::Image => match image::load_from_memory(payload) {
            Ok(decoded) => vec![DynamicImage::ImageRgb8(decoded.to_rgb8())],
            Err(e) => {
                debug!(error = %e, "image decode failed");
                Vec::new()
            }
        },
        SourceType::Pdf => render_pdf_blocking(payload).unwrap_or_else(|e| {
            warn!(error = ?e, "PDF render failed");
            Vec::new()
        }),
        SourceType::Text | SourceType::Binary => Vec::new(),
    }
}

fn pdfium_instance() -> Result<Pdfium, PdfiumError> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())?;
    Ok(Pdfium::new(bindings))
}

fn render_pdf_blocking(payload: &[u8]) -> Result<Vec<DynamicImage>, PdfiumError> {
    let pdfium = pdfium_instance()?;
    let document = pdfium.load_pdf_from_byte_slice(payload, None)?;
    let pages = document.pages();
    debug!(pages = pages.len(), "PDF loaded");

    let mut rendered = Vec::with_capacity(pages.len() as usize);
    for page in pages.iter() {
        let width = ((page.width().value * PDF_RENDER_SCALE) as i32).max(1);
        let height = ((page.height().value * PDF_RENDER_SCALE) as i32).max(1);
        let render_config = PdfRenderConfig::new()
            .set_target_width(width)
            .set_target_height(height);
        let bitmap = page.render_with_config(&render_config)?;
        rendered.push(DynamicImage::ImageRgb8(bitmap.as_image().to_rgb8()));
    }
    Ok(rendered)
}

/// Embedded text layer of a PDF, non-empty pages joined by blank lines.
///
/// `None` when pdfium is unavailable, the bytes are not a loadable PDF, or
/// no page carries extractable text — scanned exams usually land here and
/// move on to OCR.
pub async fn pdf_text_layer(payload: &[u8]) -> Option<String> {
    let bytes = payload.to_vec();
    match tokio::task::spawn_blocking(move || pdf_text_layer_blocking(&bytes)).await {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "text layer task failed");
            None
        }
    }
}

fn pdf_text_layer_blocking(payload: &[u8]) -> Option<String> {
    let pdfium = pdfium_instance().ok()?;
    let document = pdfium.load_pdf_from_byte_slice(payload, None).ok()?;
    let mut chunks: Vec<String> = Vec::new();
    for page in document.pages().iter() {
        let Ok(text) = page.text() else {
            continue;
        };
        let page_text = normalize_text(&text.all());
        if !page_text.is_empty() {
            chunks.push(page_text);
        }
    }
    let joined = normalize_text(&chunks.join("\n\n"));
    (!joined.is_empty()).then_some(joined)
}

/// Stack pages into one vertical canvas on white, left-aligned.
///
/// `None` when there are no pages; a lone page passes through unchanged.
pub fn stack_canvas(pages: &[DynamicImage]) -> Option<DynamicImage> {
    match pages {
        [] => None,
        [single] => Some(single.clone()),
        _ => {
            let max_w = pages.iter().map(DynamicImage::width).max()?;
            let total_h: u32 = pages.iter().map(DynamicImage::height).sum();
            let mut canvas = RgbImage::from_pixel(max_w, total_h, Rgb([255, 255, 255]));
            let mut y = 0i64;
            for page in pages {
                image::imageops::replace(&mut canvas, &page.to_rgb8(), 0, y);
                y += i64::from(page.height());
            }
            Some(DynamicImage::ImageRgb8(canvas))
        }
    }
}

/// Encode an image as PNG bytes.
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, ExtractError> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| ExtractError::Internal(format!("PNG encode failed: {e}")))?;
    Ok(buf)
}

/// Encode an image as JPEG under a byte budget for multimodal upload.
///
/// Walks quality 85 → 55 (step 10) and longest side 2200 → 900 px
/// (factor 0.85) until the payload fits; at both floors the oversized
/// result is returned anyway and the API gets to reject it.
pub fn encode_compact_jpeg(
    image: &DynamicImage,
    byte_cap: usize,
) -> Result<(Vec<u8>, String), ExtractError> {
    let work = image.to_rgb8();
    let mut max_side = 2200u32;
    let mut quality = 85u8;

    loop {
        let longest = work.width().max(work.height());
        let resized_owned;
        let resized: &RgbImage = if longest > max_side {
            let ratio = f64::from(max_side) / f64::from(longest);
            let w = ((f64::from(work.width()) * ratio) as u32).max(1);
            let h = ((f64::from(work.height()) * ratio) as u32).max(1);
            resized_owned = image::imageops::resize(&work, w, h, FilterType::Lanczos3);
            &resized_owned
        } else {
            &work
        };

        let mut packed = Vec::new();
        JpegEncoder::new_with_quality(&mut packed, quality)
            .encode_image(resized)
            .map_err(|e| ExtractError::Internal(format!("JPEG encode failed: {e}")))?;

        if packed.len() <= byte_cap || (max_side <= 900 && quality <= 55) {
            if packed.len() > byte_cap {
                warn!(
                    bytes = packed.len(),
                    cap = byte_cap,
                    "compact encode still over budget at floor settings"
                );
            }
            return Ok((packed, "image/jpeg".to_string()));
        }
        max_side = ((f64::from(max_side) * 0.85) as u32).max(900);
        quality = quality.saturating_sub(10).max(55);
    }
}

/// Grayscale + 3×3 median denoise, re-encoded as PNG, for OCR input.
///
/// Anything that fails to decode or re-encode passes through untouched —
/// preprocessing is an optimization, never a gate.
pub fn preprocess_for_ocr(payload: &[u8]) -> Vec<u8> {
    let Ok(decoded) = image::load_from_memory(payload) else {
        return payload.to_vec();
    };
    let denoised = imageproc::filter::median_filter(&decoded.to_luma8(), 1, 1);
    let mut buf = Vec::new();
    match DynamicImage::ImageLuma8(denoised).write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
    {
        Ok(()) => buf,
        Err(_) => payload.to_vec(),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
