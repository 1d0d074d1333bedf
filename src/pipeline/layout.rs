//! Region planning: per-question ratio hints → final pixel crop rectangles.
//!
//! ## Why three tiers?
//!
//! The signals available for locating a question on a page vary wildly in
//! quality. A multimodal model may return precise per-page bounding ratios,
//! loose ratios with broken page indices, or nothing at all. Each tier here
//! consumes a strictly weaker signal than the one above it:
//!
//! 1. [`plan_page_regions`] — per-page ratio hints with column grouping
//! 2. [`plan_canvas_ranges`] — ratio hints against one flattened canvas
//! 3. [`uniform_ranges`] — anchor positions or plain equal bands
//!
//! A tier either produces a complete plan for every question or rejects the
//! whole hint set (`None`) so the caller drops to the next tier. Tiers are
//! never mixed within a single region: a question's rectangle is either
//! fully hint-derived (`source = gemini`) or fully fallback-derived
//! (`source = fallback`), which keeps provenance meaningful for review
//! tooling and assertions.

use crate::config::LayoutTuning;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Normalized bounding ratios for one question on one page, as supplied by a
/// multimodal model pass.
///
/// Ratio fields are optional because models routinely omit or garble them;
/// an unusable span is treated as absent, never as an error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionHint {
    /// 1-based page the question sits on. Required by the per-page tier,
    /// ignored by the canvas tier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bottom_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_ratio: Option<f64>,
}

impl RegionHint {
    /// Vertical span clamped to `[0, 1]`, present only when `bottom > top`.
    pub fn vertical_span(&self) -> Option<(f64, f64)> {
        let top = self.top_ratio?.clamp(0.0, 1.0);
        let bottom = self.bottom_ratio?.clamp(0.0, 1.0);
        (bottom > top).then_some((top, bottom))
    }

    /// Horizontal span clamped to `[0, 1]`, present only when `right > left`.
    pub fn horizontal_span(&self) -> Option<(f64, f64)> {
        let left = self.left_ratio?.clamp(0.0, 1.0);
        let right = self.right_ratio?.clamp(0.0, 1.0);
        (right > left).then_some((left, right))
    }
}

/// Provenance tag recorded per planned (and later cropped) region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CropSource {
    /// Rectangle derived from model-supplied ratio hints.
    Gemini,
    /// Rectangle derived from interpolation, anchors, or uniform banding.
    Fallback,
}

impl CropSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for CropSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final pixel rectangle for one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedRegion {
    /// 0-based page the rectangle belongs to.
    pub page: usize,
    pub y1: u32,
    pub y2: u32,
    pub x1: u32,
    pub x2: u32,
    pub source: CropSource,
}

/// Horizontal grouping used for two-column exam layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Column {
    Full,
    Left,
    Right,
}

impl Column {
    /// Classify from a raw `leftRatio`; `None` means no horizontal hint.
    pub(crate) fn from_left_ratio(left: Option<f64>, split: f64) -> Self {
        match left {
            None => Self::Full,
            Some(l) if l < split => Self::Left,
            Some(_) => Self::Right,
        }
    }

    /// Output order: full-width questions first, then left, then right.
    pub(crate) fn rank(self) -> u8 {
        match self {
            Self::Full => 0,
            Self::Left => 1,
            Self::Right => 2,
        }
    }
}

/// One hint after validation, pinned to its question slot.
#[derive(Debug, Clone, Copy)]
struct ParsedHint {
    question: usize,
    page: usize,
    valid: bool,
    top: f64,
    bottom: f64,
    left: f64,
    right: f64,
    has_x: bool,
}

/// Top tier: per-page hints with column-aware overlap reconciliation.
///
/// Returns `None` (use the next tier) when hints are missing, shorter than
/// `question_count`, or any hint lacks an in-range page index. Hints with
/// unusable vertical spans do not reject the plan; their region is
/// interpolated between resolved neighbors and tagged
/// [`CropSource::Fallback`].
pub fn plan_page_regions(
    page_heights: &[u32],
    page_widths: &[u32],
    question_count: usize,
    hints: Option<&[Option<RegionHint>]>,
    tuning: &LayoutTuning,
) -> Option<Vec<PlannedRegion>> {
    if question_count == 0 {
        return Some(Vec::new());
    }
    let hints = hints?;
    if page_heights.is_empty() || hints.len() < question_count {
        return None;
    }
    let pages = page_heights.len();

    let mut parsed = Vec::with_capacity(question_count);
    for (question, slot) in hints.iter().take(question_count).enumerate() {
        let hint = (*slot)?;
        let page = match hint.page_index {
            Some(p) if (1..=pages).contains(&p) => p,
            _ => return None,
        };
        let (valid, top, bottom) = match hint.vertical_span() {
            Some((t, b)) => (true, t, b),
            None => (false, 0.0, 0.0),
        };
        let (has_x, left, right) = match hint.horizontal_span() {
            Some((l, r)) => (true, l, r),
            None => (false, 0.0, 1.0),
        };
        parsed.push(ParsedHint {
            question,
            page,
            valid,
            top,
            bottom,
            left,
            right,
            has_x,
        });
    }

    let mut assigned: HashMap<usize, PlannedRegion> = HashMap::new();
    for page in 1..=pages {
        let locals: Vec<ParsedHint> = parsed.iter().copied().filter(|h| h.page == page).collect();
        if locals.is_empty() {
            continue;
        }

        // Group by column so each column deconflicts its Y axis independently.
        let mut columns: HashMap<Column, Vec<usize>> = HashMap::new();
        for (local, item) in locals.iter().enumerate() {
            let column = if item.has_x {
                Column::from_left_ratio(Some(item.left), tuning.column_split)
            } else {
                Column::Full
            };
            columns.entry(column).or_default().push(local);
        }

        let mut ratios: Vec<Option<(f64, f64)>> = vec![None; locals.len()];
        let mut sources: Vec<CropSource> = vec![CropSource::Fallback; locals.len()];

        for members in columns.values() {
            let mut ordered = members.clone();
            ordered.sort_by(|&a, &b| locals[a].top.total_cmp(&locals[b].top));
            let mut prev_end = 0.0f64;
            for &local in &ordered {
                let item = locals[local];
                if !item.valid {
                    continue;
                }
                let top = item.top.max(prev_end);
                let bottom = item.bottom;
                if bottom <= top {
                    continue;
                }
                ratios[local] = Some((top, bottom));
                sources[local] = CropSource::Gemini;
                prev_end = bottom;
            }
        }

        // Fill unresolved runs by even division of the gap between resolved
        // neighbors (page edges at the extremes).
        let mut cursor = 0usize;
        while cursor < locals.len() {
            if ratios[cursor].is_some() {
                cursor += 1;
                continue;
            }
            let mut end = cursor;
            while end < locals.len() && ratios[end].is_none() {
                end += 1;
            }

            let left_bound = cursor
                .checked_sub(1)
                .and_then(|i| ratios[i])
                .map(|(_, bottom)| bottom)
                .unwrap_or(0.0);
            let mut right_bound = ratios
                .get(end)
                .copied()
                .flatten()
                .map(|(top, _)| top)
                .unwrap_or(1.0);
            let gap_len = end - cursor;
            if right_bound <= left_bound {
                right_bound = (left_bound + 0.08 * gap_len as f64).min(1.0);
            }
            let span = (right_bound - left_bound).max(0.001);
            let step = span / gap_len as f64;
            for (offset, slot) in (cursor..end).enumerate() {
                let top = left_bound + step * offset as f64;
                let bottom = left_bound + step * (offset + 1) as f64;
                ratios[slot] = Some((top, bottom));
            }
            cursor = end;
        }

        let page_height = i64::from(page_heights[page - 1].max(1));
        let page_width = i64::from(
            page_widths
                .get(page - 1)
                .copied()
                .unwrap_or_default()
                .max(1),
        );
        let min_px = i64::from(tuning.min_crop_px);
        for (local, item) in locals.iter().enumerate() {
            let (top, bottom) = ratios[local].unwrap_or((0.0, 1.0));
            let mut y1 = ((top * page_height as f64) as i64).clamp(0, page_height - 1);
            let mut y2 = ((bottom * page_height as f64) as i64)
                .min(page_height)
                .max(y1 + 12);
            if y2 - y1 < min_px {
                let expansion = (min_px - (y2 - y1)) / 2;
                y1 = (y1 - expansion).max(0);
                y2 = (y1 + min_px).min(page_height);
            }

            let (x1, x2) = if item.has_x {
                let x1 = ((item.left * page_width as f64) as i64).clamp(0, page_width - 1);
                let x2 = ((item.right * page_width as f64) as i64)
                    .min(page_width)
                    .max(x1 + 12);
                (x1, x2)
            } else {
                (0, page_width)
            };

            assigned.insert(
                item.question,
                PlannedRegion {
                    page: page - 1,
                    y1: y1 as u32,
                    y2: y2 as u32,
                    x1: x1 as u32,
                    x2: x2 as u32,
                    source: sources[local],
                },
            );
        }
    }

    if assigned.len() != question_count {
        return None;
    }
    let mut regions = Vec::with_capacity(question_count);
    for question in 0..question_count {
        regions.push(*assigned.get(&question)?);
    }
    Some(regions)
}

/// Mid tier: ratio hints against one flattened vertical canvas.
///
/// Stricter than the top tier: every hint must carry a usable vertical span
/// or the whole plan is rejected. Page indices are ignored — the canvas is
/// all pages stacked. Returns full-width `(y1, y2)` bands.
pub fn plan_canvas_ranges(
    canvas_height: u32,
    question_count: usize,
    hints: Option<&[Option<RegionHint>]>,
) -> Option<Vec<(u32, u32)>> {
    if canvas_height == 0 || question_count == 0 {
        return None;
    }
    let hints = hints?;
    let height = i64::from(canvas_height);
    let mut ranges = Vec::with_capacity(question_count);
    let mut last_end = 0i64;
    for idx in 0..question_count {
        let hint = hints.get(idx).copied().flatten()?;
        let (top, bottom) = hint.vertical_span()?;
        let y1 = ((top * height as f64) as i64).max(last_end);
        let mut y2 = (bottom * height as f64) as i64;
        if idx == question_count - 1 {
            y2 = y2.max(height);
        }
        if y2 <= y1 + 10 {
            y2 = (y1 + 30).min(height);
        }
        if y2 <= y1 {
            return None;
        }
        ranges.push((y1 as u32, y2 as u32));
        last_end = y2;
    }
    Some(ranges)
}

/// Bottom tier: full-width bands from anchor positions, or equal bands when
/// none were detected. Never fails for a non-empty canvas.
///
/// Partial anchor coverage extrapolates the missing tail boundaries with
/// constant spacing from the last known one. Each band is padded 12 px
/// upward (question numbers often sit above their stem baseline) and trimmed
/// 6 px at the bottom, with a 30 px floor.
pub fn uniform_ranges(canvas_height: u32, question_count: usize, starts: &[u32]) -> Vec<(u32, u32)> {
    if canvas_height == 0 || question_count == 0 {
        return Vec::new();
    }
    let height = i64::from(canvas_height);

    if starts.is_empty() {
        let step = (height / question_count as i64).max(1);
        let mut ranges = Vec::with_capacity(question_count);
        for idx in 0..question_count as i64 {
            let y1 = idx * step;
            let y2 = if idx == question_count as i64 - 1 {
                height
            } else {
                ((idx + 1) * step).min(height)
            };
            ranges.push((y1 as u32, y2 as u32));
        }
        return ranges;
    }

    let mut ordered: Vec<i64> = starts
        .iter()
        .map(|&s| i64::from(s).clamp(0, height - 1))
        .collect();
    ordered.sort_unstable();
    ordered.truncate(question_count);
    if ordered.len() < question_count {
        let remaining = question_count - ordered.len();
        let tail_base = ordered[ordered.len() - 1];
        let gap = ((height - tail_base) / (remaining as i64 + 1)).max(30);
        for i in 0..remaining as i64 {
            ordered.push((tail_base + gap * (i + 1)).min(height - 1));
        }
    }

    let mut ranges = Vec::with_capacity(question_count);
    for (idx, &start) in ordered.iter().enumerate() {
        let end = ordered.get(idx + 1).copied().unwrap_or(height);
        let y1 = (start - 12).max(0);
        let y2 = (end - 6).max(y1 + 30).min(height);
        ranges.push((y1 as u32, y2 as u32));
    }
    ranges
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn hint(
        page: usize,
        top: Option<f64>,
        bottom: Option<f64>,
        left: Option<f64>,
        right: Option<f64>,
    ) -> Option<RegionHint> {
        Some(RegionHint {
            page_index: Some(page),
            top_ratio: top,
            bottom_ratio: bottom,
            left_ratio: left,
            right_ratio: right,
        })
    }

    fn tuning() -> LayoutTuning {
        LayoutTuning::default()
    }

    #[test]
    fn test_vertical_span_requires_bottom_above_top() {
        let h = RegionHint {
            page_index: Some(1),
            top_ratio: Some(0.6),
            bottom_ratio: Some(0.4),
            left_ratio: None,
            right_ratio: None,
        };
        assert_eq!(h.vertical_span(), None);
        let h = RegionHint {
            page_index: Some(1),
            top_ratio: Some(-0.5),
            bottom_ratio: Some(1.7),
            left_ratio: None,
            right_ratio: None,
        };
        assert_eq!(h.vertical_span(), Some((0.0, 1.0)));
    }

    #[test]
    fn test_two_column_layout_maps_x_ranges() {
        let hints = vec![
            hint(1, Some(0.0), Some(0.45), Some(0.05), Some(0.45)),
            hint(1, Some(0.0), Some(0.45), Some(0.55), Some(0.95)),
            hint(1, Some(0.5), Some(0.95), Some(0.05), Some(0.45)),
            hint(1, Some(0.5), Some(0.95), Some(0.55), Some(0.95)),
        ];
        let regions =
            plan_page_regions(&[1000], &[800], 4, Some(&hints), &tuning()).expect("plan");
        assert_eq!(regions.len(), 4);
        assert!(regions.iter().all(|r| r.source == CropSource::Gemini));
        // Left column: 0.05..0.45 of 800 px.
        assert_eq!((regions[0].x1, regions[0].x2), (40, 360));
        // Right column: 0.55..0.95 of 800 px.
        assert_eq!((regions[1].x1, regions[1].x2), (440, 760));
        // Per-column verticals do not overlap.
        assert!(regions[0].y2 <= regions[2].y1);
        assert!(regions[1].y2 <= regions[3].y1);
    }

    #[test]
    fn test_valid_hints_yield_min_height_and_no_overlap() {
        let hints = vec![
            hint(1, Some(0.0), Some(0.6), None, None),
            hint(1, Some(0.4), Some(0.9), None, None),
        ];
        let regions =
            plan_page_regions(&[1000], &[600], 2, Some(&hints), &tuning()).expect("plan");
        assert_eq!(regions.len(), 2);
        for r in &regions {
            assert!(r.y2 > r.y1);
            assert!(r.y2 - r.y1 >= 60);
        }
        // Overlap resolved by clamping the second top to the first bottom.
        assert!(regions[0].y2 <= regions[1].y1);
    }

    #[test]
    fn test_tight_hint_expands_to_min_crop_height() {
        let hints = vec![hint(1, Some(0.50), Some(0.52), None, None)];
        let regions =
            plan_page_regions(&[1000], &[700], 1, Some(&hints), &tuning()).expect("plan");
        let r = regions[0];
        assert_eq!(r.y2 - r.y1, 60);
        assert_eq!((r.y1, r.y2), (480, 540));
    }

    #[test]
    fn test_short_hint_list_rejects_whole_plan() {
        let hints = vec![hint(1, Some(0.0), Some(0.5), None, None)];
        assert_eq!(
            plan_page_regions(&[1000], &[700], 2, Some(&hints), &tuning()),
            None
        );
        assert_eq!(plan_page_regions(&[1000], &[700], 2, None, &tuning()), None);
    }

    #[test]
    fn test_page_index_missing_or_out_of_range_rejects() {
        let hints = vec![hint(3, Some(0.0), Some(0.5), None, None)];
        assert_eq!(
            plan_page_regions(&[1000], &[700], 1, Some(&hints), &tuning()),
            None
        );
        let hints = vec![Some(RegionHint {
            page_index: None,
            top_ratio: Some(0.0),
            bottom_ratio: Some(0.5),
            left_ratio: None,
            right_ratio: None,
        })];
        assert_eq!(
            plan_page_regions(&[1000], &[700], 1, Some(&hints), &tuning()),
            None
        );
        let hints = vec![None];
        assert_eq!(
            plan_page_regions(&[1000], &[700], 1, Some(&hints), &tuning()),
            None
        );
    }

    #[test]
    fn test_invalid_vertical_interpolates_between_neighbors() {
        let hints = vec![
            hint(1, Some(0.0), Some(0.3), None, None),
            hint(1, None, None, None, None),
            hint(1, Some(0.7), Some(1.0), None, None),
        ];
        let regions =
            plan_page_regions(&[1000], &[700], 3, Some(&hints), &tuning()).expect("plan");
        assert_eq!(regions[0].source, CropSource::Gemini);
        assert_eq!(regions[1].source, CropSource::Fallback);
        assert_eq!(regions[2].source, CropSource::Gemini);
        // The gap member fills the band between its neighbors.
        assert_eq!((regions[1].y1, regions[1].y2), (300, 700));
    }

    #[test]
    fn test_zero_questions_is_empty_plan() {
        assert_eq!(
            plan_page_regions(&[1000], &[700], 0, None, &tuning()),
            Some(Vec::new())
        );
    }

    #[test]
    fn test_hints_on_second_page_keep_page_number() {
        let hints = vec![
            hint(1, Some(0.1), Some(0.9), None, None),
            hint(2, Some(0.1), Some(0.9), None, None),
        ];
        let regions =
            plan_page_regions(&[500, 600], &[400, 450], 2, Some(&hints), &tuning()).expect("plan");
        assert_eq!(regions[0].page, 0);
        assert_eq!(regions[1].page, 1);
        assert_eq!(regions[1].x2, 450);
    }

    #[test]
    fn test_canvas_ranges_extend_last_to_bottom() {
        let hints = vec![
            hint(1, Some(0.0), Some(0.3), None, None),
            hint(1, Some(0.3), Some(0.6), None, None),
            hint(1, Some(0.6), Some(0.85), None, None),
        ];
        let ranges = plan_canvas_ranges(1000, 3, Some(&hints)).expect("ranges");
        assert_eq!(ranges, vec![(0, 300), (300, 600), (600, 1000)]);
    }

    #[test]
    fn test_canvas_ranges_reject_missing_ratio() {
        let hints = vec![
            hint(1, Some(0.0), Some(0.5), None, None),
            hint(1, Some(0.5), None, None, None),
        ];
        assert_eq!(plan_canvas_ranges(1000, 2, Some(&hints)), None);
        assert_eq!(plan_canvas_ranges(0, 2, Some(&hints)), None);
    }

    #[test]
    fn test_canvas_ranges_pad_collapsed_band() {
        let hints = vec![
            hint(1, Some(0.1), Some(0.105), None, None),
            hint(1, Some(0.5), Some(0.9), None, None),
        ];
        let ranges = plan_canvas_ranges(1000, 2, Some(&hints)).expect("ranges");
        assert_eq!(ranges[0], (100, 130));
    }

    #[test]
    fn test_uniform_ranges_equal_bands() {
        let ranges = uniform_ranges(1000, 4, &[]);
        assert_eq!(
            ranges,
            vec![(0, 250), (250, 500), (500, 750), (750, 1000)]
        );
    }

    #[test]
    fn test_uniform_ranges_from_anchor_starts() {
        let ranges = uniform_ranges(1000, 3, &[100, 400, 550]);
        assert_eq!(ranges, vec![(88, 394), (388, 544), (538, 994)]);
    }

    #[test]
    fn test_uniform_ranges_extrapolate_missing_tail() {
        let ranges = uniform_ranges(1000, 3, &[100]);
        assert_eq!(ranges, vec![(88, 394), (388, 694), (688, 994)]);
    }

    #[test]
    fn test_uniform_ranges_empty_inputs() {
        assert!(uniform_ranges(0, 3, &[]).is_empty());
        assert!(uniform_ranges(100, 0, &[]).is_empty());
    }
}
