//! Question-number anchor detection from OCR word tokens.
//!
//! When no usable ratio hints exist, the cropper falls back to locating the
//! printed question numbers themselves: OCR tokens that look like `"12."`,
//! `"3)"` or `"7번"` sitting in the left margin of the page. Their Y
//! positions become band boundaries for the uniform-split tier.

use crate::config::LayoutTuning;
use crate::pipeline::render::encode_png;
use crate::ports::{OcrPort, OcrToken};
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Whole-token question-number marker; the trailing punctuation is optional
/// because OCR often drops it.
static RE_QNO_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,3})(?:[.)]|번)?$").unwrap());

/// Leading digits of a question label like `"12."` or `" 3) 이차방정식"`.
static RE_LABEL_NO: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\d{1,3})").unwrap());

/// One detected question-number marker on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    /// Top of the token's bounding box.
    pub y: u32,
    /// The question number the token spells.
    pub number: u32,
}

/// Extract anchors from OCR tokens.
///
/// A token qualifies when its spaces-stripped text is exactly a number
/// marker, its number is in `1..=200`, and its left edge sits inside the
/// left margin (first `left_margin_ratio` of the width). Qualifying anchors
/// are ordered by Y; anchors closer than `anchor_dedup_px` to the previous
/// kept one collapse (first wins).
pub fn anchors_from_tokens(tokens: &[OcrToken], width: u32, tuning: &LayoutTuning) -> Vec<Anchor> {
    if width == 0 || tokens.is_empty() {
        return Vec::new();
    }
    let left_gate = (f64::from(width) * tuning.left_margin_ratio) as i64;

    let mut starts: Vec<(i64, u32)> = Vec::new();
    for token in tokens {
        let text: String = token.text.trim().chars().filter(|c| *c != ' ').collect();
        if text.is_empty() {
            continue;
        }
        let Some(caps) = RE_QNO_TOKEN.captures(&text) else {
            continue;
        };
        let Some(number) = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) else {
            continue;
        };
        if number == 0 || number > 200 {
            continue;
        }
        if i64::from(token.bbox.x1) > left_gate {
            continue;
        }
        starts.push((i64::from(token.bbox.y1), number));
    }
    starts.sort_by_key(|&(y, _)| y);

    let dedup = i64::from(tuning.anchor_dedup_px);
    let mut filtered = Vec::with_capacity(starts.len());
    let mut last_y = -9999i64;
    for (y, number) in starts {
        if y - last_y < dedup {
            continue;
        }
        filtered.push(Anchor {
            y: y.max(0) as u32,
            number,
        });
        last_y = y;
    }
    filtered
}

/// Leading question number of a label, if it has one.
pub fn parse_question_no(label: Option<&str>) -> Option<u32> {
    let label = label?;
    RE_LABEL_NO
        .captures(label)?
        .get(1)?
        .as_str()
        .parse::<u32>()
        .ok()
}

/// Whether the question labels form a mostly-contiguous ascending sequence.
///
/// Anchor-to-label matching by number is only trustworthy when the labels
/// themselves look like a real exam numbering (strictly ascending, and at
/// least 60% of steps are `+1`). Anything else matches anchors by position
/// instead.
pub fn labels_reliable(question_labels: &[Option<String>]) -> bool {
    let parsed: Vec<u32> = question_labels
        .iter()
        .filter_map(|label| parse_question_no(label.as_deref()))
        .collect();
    if parsed.len() < 2 {
        return false;
    }
    let deltas: Vec<i64> = parsed
        .windows(2)
        .map(|pair| i64::from(pair[1]) - i64::from(pair[0]))
        .collect();
    if deltas.iter().any(|&d| d <= 0) {
        return false;
    }
    let contiguous = deltas.iter().filter(|&&d| d == 1).count();
    contiguous as f64 / deltas.len() as f64 >= 0.6
}

/// Choose one start Y per question label from the detected anchors.
///
/// Labels that spell a number claim the earliest unclaimed anchor with that
/// number; other labels take the next unclaimed anchor below the last pick.
/// A label with no viable anchor is skipped, so the result may be shorter
/// than the label list.
pub fn pick_anchor_ys(
    canvas_height: u32,
    question_labels: &[Option<String>],
    detected: &[Anchor],
) -> Vec<u32> {
    if detected.is_empty() {
        return Vec::new();
    }
    let max_y = i64::from(canvas_height) - 1;
    let mut ordered: Vec<(i64, u32)> = detected
        .iter()
        .map(|a| (i64::from(a.y).clamp(0, max_y), a.number))
        .collect();
    ordered.sort_unstable();

    let mut by_number: HashMap<u32, VecDeque<i64>> = HashMap::new();
    let mut y_list: Vec<i64> = Vec::with_capacity(ordered.len());
    for &(y, number) in &ordered {
        by_number.entry(number).or_default().push_back(y);
        y_list.push(y);
    }

    let mut picked: Vec<i64> = Vec::new();
    let mut cursor = 0usize;
    for label in question_labels {
        let target = parse_question_no(label.as_deref());
        let mut chosen = target.and_then(|n| by_number.get_mut(&n)?.pop_front());
        if chosen.is_none() {
            while cursor < y_list.len() {
                let candidate = y_list[cursor];
                cursor += 1;
                if picked.last().map_or(true, |&last| candidate > last) {
                    chosen = Some(candidate);
                    break;
                }
            }
        }
        if let Some(y) = chosen {
            picked.push(y);
        }
    }
    picked.into_iter().map(|y| y.max(0) as u32).collect()
}

/// Runs OCR over the stacked canvas and turns tokens into anchors.
///
/// Prefers the configured (real) OCR port; falls through to the local
/// engine when that yields nothing. Every failure degrades to "no anchors"
/// so the cropper can still uniform-split.
pub struct AnchorDetector {
    secondary: Arc<dyn OcrPort>,
    local: Option<Arc<dyn OcrPort>>,
    tuning: LayoutTuning,
}

impl AnchorDetector {
    pub fn new(
        secondary: Arc<dyn OcrPort>,
        local: Option<Arc<dyn OcrPort>>,
        tuning: LayoutTuning,
    ) -> Self {
        Self {
            secondary,
            local,
            tuning,
        }
    }

    pub async fn detect(&self, image: &DynamicImage) -> Vec<Anchor> {
        let width = image.width();
        let png = match encode_png(image) {
            Ok(png) => png,
            Err(e) => {
                debug!(error = %e, "canvas encode for anchor detection failed");
                return Vec::new();
            }
        };

        if self.secondary.provenance().is_real() {
            match self.secondary.extract(&png).await {
                Ok(extraction) => {
                    let anchors = anchors_from_tokens(&extraction.tokens, width, &self.tuning);
                    if !anchors.is_empty() {
                        return anchors;
                    }
                }
                Err(e) => {
                    debug!(provider = self.secondary.name(), error = %e, "anchor OCR failed");
                }
            }
        }

        let Some(local) = &self.local else {
            return Vec::new();
        };
        match local.extract(&png).await {
            Ok(extraction) => anchors_from_tokens(&extraction.tokens, width, &self.tuning),
            Err(e) => {
                debug!(provider = local.name(), error = %e, "local anchor OCR failed");
                Vec::new()
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
