//! Question segmentation over raw extracted text.
//!
//! Splits a page of OCR/decoded text into per-question chunks keyed by the
//! question-number markers Korean exam papers use (`12.`, `3)`, `7번`), and
//! parses answer choices out of a chunk. Both operations are best-effort:
//! text with no recognizable markers comes back as a single unlabeled chunk
//! rather than an error.

use crate::output::{Choice, QuestionStructure};
use once_cell::sync::Lazy;
use regex::Regex;

/// Question-number marker at line start: `"12."`, `"3)"`, `"7번"`.
static RE_QUESTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(\d{1,3})\s*(?:[.)]|번)\s+").unwrap());

/// Answer-choice marker at line start: circled digits, Hangul jamo,
/// latin letters, or plain `1`-`5`.
static RE_CHOICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:[①-⑤]|[ㄱ-ㅎ]|[A-Ea-e]|[1-5])(?:[.)]|\s)\s*(.+)$").unwrap());

/// Collapse CR/CRLF line endings and trim surrounding whitespace.
pub fn normalize_text(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}

/// Split text into `(number_label, chunk)` pairs, one per question.
///
/// Only markers whose number strictly increases over the previous kept
/// marker start a new chunk; this keeps choice lines like `"1) ..."` inside
/// the question that contains them. No markers at all yields the whole text
/// as one `(None, text)` chunk; blank input yields nothing.
pub fn split_questions(raw_text: &str) -> Vec<(Option<String>, String)> {
    let text = normalize_text(raw_text);
    if text.is_empty() {
        return Vec::new();
    }

    let candidates: Vec<(usize, &str, u32)> = RE_QUESTION
        .captures_iter(&text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let label = caps.get(1)?.as_str();
            let num = label.parse::<u32>().ok()?;
            Some((whole.start(), label, num))
        })
        .collect();
    if candidates.is_empty() {
        return vec![(None, text)];
    }

    let mut matches = vec![candidates[0]];
    let mut last_num = candidates[0].2;
    for &(start, label, num) in &candidates[1..] {
        if num > last_num {
            matches.push((start, label, num));
            last_num = num;
        }
    }

    let mut items = Vec::with_capacity(matches.len());
    for (idx, &(start, label, _)) in matches.iter().enumerate() {
        let end = matches
            .get(idx + 1)
            .map(|&(next_start, _, _)| next_start)
            .unwrap_or(text.len());
        let chunk = text[start..end].trim();
        if !chunk.is_empty() {
            items.push((Some(label.to_string()), chunk.to_string()));
        }
    }

    if items.is_empty() {
        return vec![(None, text)];
    }
    items
}

/// Parse the answer choices out of one question chunk.
///
/// Choice labels are synthetic positions (`"1"`, `"2"`, …) counted over all
/// marker matches, so a marker whose text turns out blank still consumes its
/// position. The stem is the chunk as-is; repeated application is a no-op.
pub fn build_structure(question_text: &str) -> QuestionStructure {
    let mut choices = Vec::new();
    for (idx, caps) in RE_CHOICE.captures_iter(question_text).enumerate() {
        if let Some(m) = caps.get(1) {
            let text = m.as_str().trim();
            if !text.is_empty() {
                choices.push(Choice {
                    label: (idx + 1).to_string(),
                    text: text.to_string(),
                });
            }
        }
    }
    QuestionStructure {
        stem: question_text.to_string(),
        choices,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_line_endings() {
        assert_eq!(normalize_text("  a\r\nb\rc\n  "), "a\nb\nc");
        assert_eq!(normalize_text("   \r\n "), "");
    }

    #[test]
    fn test_split_two_questions_with_korean_marker() {
        let text = "1. 다음 중 옳은 것은?\n내용\n2번 다음을 계산하시오.\n본문";
        let items = split_questions(text);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].0.as_deref(), Some("1"));
        assert!(items[0].1.starts_with("1. 다음"));
        assert_eq!(items[1].0.as_deref(), Some("2"));
        assert!(items[1].1.starts_with("2번"));
    }

    #[test]
    fn test_split_ignores_backward_numbers() {
        // The second "1)" line is a choice, not a new question.
        let text = "3. 질문 셋\n1) 보기 하나\n2) 보기 둘\n5. 질문 다섯\n본문";
        let items = split_questions(text);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].0.as_deref(), Some("3"));
        assert_eq!(items[1].0.as_deref(), Some("5"));
        assert!(items[0].1.contains("보기 둘"));
    }

    #[test]
    fn test_split_without_markers_returns_single_chunk() {
        let items = split_questions("마커 없는 평문 단락입니다.");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].0, None);
        assert_eq!(items[0].1, "마커 없는 평문 단락입니다.");
    }

    #[test]
    fn test_split_blank_input_is_empty() {
        assert!(split_questions("").is_empty());
        assert!(split_questions("  \r\n \n").is_empty());
    }

    #[test]
    fn test_split_marker_requires_trailing_space() {
        // "1.5" is a decimal, not a question marker.
        let items = split_questions("1.5배의 농도로 희석한다");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].0, None);
    }

    #[test]
    fn test_structure_parses_circled_choices() {
        let text = "7. 다음 중 옳은 것은?\n① 첫째 보기\n② 둘째 보기\n③ 셋째 보기";
        let s = build_structure(text);
        assert_eq!(s.stem, text);
        assert_eq!(s.choices.len(), 3);
        assert_eq!(s.choices[0].label, "1");
        assert_eq!(s.choices[0].text, "첫째 보기");
        assert_eq!(s.choices[2].text, "셋째 보기");
    }

    #[test]
    fn test_structure_counts_low_numbered_stem_line_as_choice() {
        // A "3." stem line is indistinguishable from a digit choice marker.
        let s = build_structure("3. 질문\n① 보기");
        assert_eq!(s.choices.len(), 2);
        assert_eq!(s.choices[0].text, "질문");
        assert_eq!(s.choices[1].label, "2");
    }

    #[test]
    fn test_structure_parses_latin_and_digit_markers() {
        let text = "Which?\nA) alpha\nb. beta\n3 gamma";
        let s = build_structure(text);
        let texts: Vec<&str> = s.choices.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["alpha", "beta", "gamma"]);
        assert_eq!(s.choices[1].label, "2");
    }

    #[test]
    fn test_structure_without_choices_is_stem_only() {
        let s = build_structure("서술형: 이유를 설명하시오.");
        assert!(s.choices.is_empty());
        assert_eq!(s.stem, "서술형: 이유를 설명하시오.");
    }

    #[test]
    fn test_structure_is_idempotent_on_stem() {
        let text = "2) 질문\n① 보기";
        let first = build_structure(text);
        let second = build_structure(&first.stem);
        assert_eq!(first, second);
    }
}
