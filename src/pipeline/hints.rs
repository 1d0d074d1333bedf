//! Crop-hint normalisation for multimodal structured output.
//!
//! Model-supplied crop ratios are good but not clean: hairline spans that
//! would crop to a sliver, neighbours that overlap by a few percent, and a
//! question order that interleaves columns. This pass runs per page before
//! results are merged, so every published hint is printable as-is:
//!
//! 1. spans thinner than the minimum widen symmetrically around their
//!    midpoint,
//! 2. consecutive same-column spans that overlap split at the overlap's
//!    midpoint,
//! 3. questions reorder to full-width, then left column, then right column,
//!    each sorted by top ratio, and `order_index` is reassigned `1..=n`.

use crate::config::LayoutTuning;
use crate::output::ExtractedQuestion;
use crate::pipeline::layout::Column;

/// Round a normalized ratio to 5 decimal places for stable JSON output.
pub(crate) fn round_ratio(value: f64) -> f64 {
    (value * 100_000.0).round() / 100_000.0
}

fn column_of(question: &ExtractedQuestion, split: f64) -> Column {
    match &question.metadata.crop_hint {
        Some(hint) => Column::from_left_ratio(hint.left_ratio, split),
        None => Column::Full,
    }
}

fn top_of(question: &ExtractedQuestion) -> f64 {
    question
        .metadata
        .crop_hint
        .as_ref()
        .and_then(|hint| hint.top_ratio)
        .unwrap_or(0.0)
}

/// Normalize one page's crop hints and renumber `order_index`.
///
/// Questions without a hint count as full-width with top ratio 0, so they
/// lead the output in their arrival order.
pub fn postprocess_crop_hints(
    questions: Vec<ExtractedQuestion>,
    tuning: &LayoutTuning,
) -> Vec<ExtractedQuestion> {
    if questions.is_empty() {
        return questions;
    }

    let min_span = tuning.min_hint_span;
    let mut questions = questions;
    for question in &mut questions {
        let Some(hint) = question.metadata.crop_hint.as_mut() else {
            continue;
        };
        let top = hint.top_ratio.unwrap_or(0.0);
        let bottom = hint.bottom_ratio.unwrap_or(0.0);
        let height = bottom - top;
        if height > 0.0 && height < min_span {
            let mid = (top + bottom) / 2.0;
            hint.top_ratio = Some(round_ratio((mid - min_span / 2.0).max(0.0)));
            hint.bottom_ratio = Some(round_ratio((mid + min_span / 2.0).min(1.0)));
        }
    }

    let mut full = Vec::new();
    let mut left = Vec::new();
    let mut right = Vec::new();
    for question in questions {
        match column_of(&question, tuning.column_split) {
            Column::Full => full.push(question),
            Column::Left => left.push(question),
            Column::Right => right.push(question),
        }
    }

    let mut ordered = Vec::with_capacity(full.len() + left.len() + right.len());
    for mut group in [full, left, right] {
        group.sort_by(|a, b| top_of(a).total_cmp(&top_of(b)));
        split_overlapping_neighbours(&mut group);
        ordered.append(&mut group);
    }

    for (idx, question) in ordered.iter_mut().enumerate() {
        question.order_index = idx + 1;
    }
    ordered
}

/// Resolve vertical overlap between consecutive hints of one column, already
/// sorted by top ratio, by moving both edges to the overlap midpoint.
fn split_overlapping_neighbours(group: &mut [ExtractedQuestion]) {
    for i in 1..group.len() {
        let (head, tail) = group.split_at_mut(i);
        let (Some(prev), Some(curr)) = (
            head[i - 1].metadata.crop_hint.as_mut(),
            tail[0].metadata.crop_hint.as_mut(),
        ) else {
            continue;
        };
        let prev_bottom = prev.bottom_ratio.unwrap_or(0.0);
        let curr_top = curr.top_ratio.unwrap_or(0.0);
        if curr_top < prev_bottom {
            let mid = round_ratio((prev_bottom + curr_top) / 2.0);
            prev.bottom_ratio = Some(mid);
            curr.top_ratio = Some(mid);
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{QuestionMetadata, QuestionStructure, SourceType};
    use crate::pipeline::layout::RegionHint;

    fn hint(top: Option<f64>, bottom: Option<f64>, left: Option<f64>) -> RegionHint {
        RegionHint {
            page_index: Some(1),
            top_ratio: top,
            bottom_ratio: bottom,
            left_ratio: left,
            right_ratio: None,
        }
    }

    fn question(order: usize, crop: Option<RegionHint>) -> ExtractedQuestion {
        let mut metadata = QuestionMetadata::local("test", SourceType::Image);
        metadata.crop_hint = crop;
        ExtractedQuestion {
            order_index: order,
            number_label: order.to_string(),
            text: format!("question {order}"),
            confidence: 0.9,
            metadata,
            structure: QuestionStructure::default(),
        }
    }

    fn ratios(q: &ExtractedQuestion) -> (f64, f64) {
        let h = q.metadata.crop_hint.as_ref().unwrap();
        (h.top_ratio.unwrap(), h.bottom_ratio.unwrap())
    }

    #[test]
    fn thin_span_widens_around_midpoint() {
        let out = postprocess_crop_hints(
            vec![question(1, Some(hint(Some(0.5), Some(0.52), None)))],
            &LayoutTuning::default(),
        );
        assert_eq!(ratios(&out[0]), (0.485, 0.535));
    }

    #[test]
    fn widening_clamps_to_page_edges() {
        // Only a bottom edge: top defaults to 0, so the widened span pins
        // against the top of the page.
        let out = postprocess_crop_hints(
            vec![question(1, Some(hint(None, Some(0.03), None)))],
            &LayoutTuning::default(),
        );
        assert_eq!(ratios(&out[0]), (0.0, 0.04));
    }

    #[test]
    fn zero_height_and_missing_hints_untouched() {
        let out = postprocess_crop_hints(
            vec![
                question(1, Some(hint(Some(0.4), Some(0.4), None))),
                question(2, None),
            ],
            &LayoutTuning::default(),
        );
        assert_eq!(
            out[0].metadata.crop_hint,
            Some(hint(Some(0.4), Some(0.4), None))
        );
        assert!(out[1].metadata.crop_hint.is_none());
    }

    #[test]
    fn overlapping_neighbours_split_at_midpoint() {
        let out = postprocess_crop_hints(
            vec![
                question(1, Some(hint(Some(0.0), Some(0.6), Some(0.1)))),
                question(2, Some(hint(Some(0.4), Some(0.9), Some(0.1)))),
            ],
            &LayoutTuning::default(),
        );
        assert_eq!(ratios(&out[0]), (0.0, 0.5));
        assert_eq!(ratios(&out[1]), (0.5, 0.9));
    }

    #[test]
    fn overlap_only_resolved_within_a_column() {
        // Same vertical band but opposite columns: both spans survive.
        let out = postprocess_crop_hints(
            vec![
                question(1, Some(hint(Some(0.1), Some(0.5), Some(0.05)))),
                question(2, Some(hint(Some(0.1), Some(0.5), Some(0.55)))),
            ],
            &LayoutTuning::default(),
        );
        assert_eq!(ratios(&out[0]), (0.1, 0.5));
        assert_eq!(ratios(&out[1]), (0.1, 0.5));
    }

    #[test]
    fn columns_reorder_full_left_right() {
        let out = postprocess_crop_hints(
            vec![
                question(1, Some(hint(Some(0.1), Some(0.3), Some(0.55)))),
                question(2, Some(hint(Some(0.2), Some(0.4), Some(0.05)))),
                question(3, None),
            ],
            &LayoutTuning::default(),
        );
        let labels: Vec<&str> = out.iter().map(|q| q.number_label.as_str()).collect();
        assert_eq!(labels, ["3", "2", "1"]);
        let orders: Vec<usize> = out.iter().map(|q| q.order_index).collect();
        assert_eq!(orders, [1, 2, 3]);
    }

    #[test]
    fn within_column_sorted_by_top() {
        let out = postprocess_crop_hints(
            vec![
                question(1, Some(hint(Some(0.6), Some(0.8), Some(0.1)))),
                question(2, Some(hint(Some(0.1), Some(0.3), Some(0.1)))),
            ],
            &LayoutTuning::default(),
        );
        let labels: Vec<&str> = out.iter().map(|q| q.number_label.as_str()).collect();
        assert_eq!(labels, ["2", "1"]);
    }

    #[test]
    fn empty_input_passes_through() {
        assert!(postprocess_crop_hints(Vec::new(), &LayoutTuning::default()).is_empty());
    }
}
