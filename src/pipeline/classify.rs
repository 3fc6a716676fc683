//! Heuristic content classification of raw text spans.
//!
//! [`ContentClassifier::classify`] is a pure function: it always returns a
//! label and never fails. Unmatched spans are [`SpanClass::Text`].
//!
//! ## Rules (first match wins)
//!
//! 1. Caption lead ("Figure 3", "Fig. 2", "圖 1", "Table 4", "Tab. 1", "表 2") → `FigureCaption`
//! 2. LaTeX delimiter (`\begin{equation}`, `$$`, …) → `Formula`
//! 3. Short span with a math symbol (∫ ∑ √ ≤ …) → `Formula`
//! 4. Short span with enough distinct operators and little prose → `Formula`
//! 5. Two or more lines split into the same number (≥ 2) of columns → `Table`
//!
//! Every threshold comes from [`ClassifierConfig`].

use crate::config::ClassifierConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Label assigned to a raw span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpanClass {
    Text,
    Formula,
    Table,
    /// A figure or table caption line; see [`caption_target`].
    FigureCaption,
}

/// What a caption refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptionTarget {
    Figure,
    Table,
}

static RE_FIGURE_CAPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(figure|fig\.?|圖)\s*\d+").unwrap());

static RE_TABLE_CAPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(table|tab\.?|表)\s*\d+").unwrap());

static RE_COLUMN_GAP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\t+| {3,}").unwrap());

static RE_PROSE_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\p{L}{3,}").unwrap());

/// Spans with more prose words than this are not formulas by operator count.
const MAX_PROSE_WORDS: usize = 4;

/// Rule-based span labeller.
#[derive(Debug, Clone)]
pub struct ContentClassifier {
    config: ClassifierConfig,
}

impl Default for ContentClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

impl ContentClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, raw: &str) -> SpanClass {
        let text = raw.trim();
        if text.is_empty() {
            return SpanClass::Text;
        }
        if caption_target(text).is_some() {
            return SpanClass::FigureCaption;
        }
        if self.is_formula(text) {
            return SpanClass::Formula;
        }
        if is_tabular(text) {
            return SpanClass::Table;
        }
        SpanClass::Text
    }

    /// Formula test on its own, for callers that already know a span is not a caption.
    pub fn is_formula(&self, text: &str) -> bool {
        let c = &self.config;
        if c.latex_delimiters.iter().any(|d| text.contains(d.as_str())) {
            return true;
        }

        if text.chars().count() >= c.short_span_chars {
            return false;
        }

        if text.chars().any(|ch| c.math_symbols.contains(&ch)) {
            return true;
        }

        let distinct: HashSet<char> = text.chars().filter(|ch| c.operators.contains(ch)).collect();
        distinct.len() >= c.min_distinct_operators
            && RE_PROSE_WORD.find_iter(text).count() <= MAX_PROSE_WORDS
    }
}

/// Whether `text` opens with a figure or table caption label.
pub fn caption_target(text: &str) -> Option<CaptionTarget> {
    if RE_FIGURE_CAPTION.is_match(text) {
        Some(CaptionTarget::Figure)
    } else if RE_TABLE_CAPTION.is_match(text) {
        Some(CaptionTarget::Table)
    } else {
        None
    }
}

/// Two or more lines that all split into the same number (≥ 2) of columns.
pub fn is_tabular(text: &str) -> bool {
    let widths: Vec<usize> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| split_columns(l).len())
        .collect();
    widths.len() >= 2 && widths[0] >= 2 && widths.iter().all(|&w| w == widths[0])
}

/// Split a tabular span into a cell grid (one row per non-empty line).
pub fn split_tabular(text: &str) -> Vec<Vec<String>> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(split_columns)
        .collect()
}

fn split_columns(line: &str) -> Vec<String> {
    RE_COLUMN_GAP
        .split(line.trim())
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(s: &str) -> SpanClass {
        ContentClassifier::default().classify(s)
    }

    #[test]
    fn plain_prose_is_text() {
        assert_eq!(
            classify("Deep neural networks are trained with stochastic gradient descent."),
            SpanClass::Text
        );
        assert_eq!(classify(""), SpanClass::Text);
        assert_eq!(classify("   "), SpanClass::Text);
    }

    #[test]
    fn latex_delimiter_is_formula_even_when_long() {
        let long = format!(r"\begin{{equation}} {} \end{{equation}}", "x ".repeat(80));
        assert_eq!(classify(&long), SpanClass::Formula);
    }

    #[test]
    fn math_symbol_in_short_span_is_formula() {
        assert_eq!(classify("∑ x_i ≤ n"), SpanClass::Formula);
    }

    #[test]
    fn math_symbol_in_long_paragraph_is_text() {
        let para = format!("We note that the bound ≤ holds for {}", "every sample ".repeat(10));
        assert_eq!(classify(&para), SpanClass::Text);
    }

    #[test]
    fn operator_threshold() {
        assert_eq!(classify("y = (a + b) / 2"), SpanClass::Formula);
        // only two distinct operators
        assert_eq!(classify("E = mc^2"), SpanClass::Text);
    }

    #[test]
    fn prose_with_brackets_stays_text() {
        assert_eq!(
            classify("state-of-the-art (SOTA) results [1]"),
            SpanClass::Text
        );
    }

    #[test]
    fn captions_detected_in_both_languages() {
        assert_eq!(classify("Figure 3: Model architecture"), SpanClass::FigureCaption);
        assert_eq!(classify("Fig. 2 Loss curves"), SpanClass::FigureCaption);
        assert_eq!(classify("圖 1 系統架構"), SpanClass::FigureCaption);
        assert_eq!(classify("Table 2: Results"), SpanClass::FigureCaption);
        assert_eq!(caption_target("表 4 實驗結果"), Some(CaptionTarget::Table));
        assert_eq!(caption_target("Figure 1"), Some(CaptionTarget::Figure));
        assert_eq!(caption_target("as shown in Figure 1"), None);
    }

    #[test]
    fn aligned_columns_are_table() {
        let span = "Model     Accuracy     F1\nBERT     91.2     88.0\nGPT     89.7     86.1";
        assert_eq!(classify(span), SpanClass::Table);
        let grid = split_tabular(span);
        assert_eq!(grid.len(), 3);
        assert_eq!(grid[1], vec!["BERT", "91.2", "88.0"]);
    }

    #[test]
    fn ragged_columns_are_not_table() {
        assert!(!is_tabular("a   b\nc"));
    }

    #[test]
    fn thresholds_come_from_config() {
        let strict = ContentClassifier::new(ClassifierConfig {
            min_distinct_operators: 2,
            ..Default::default()
        });
        assert_eq!(strict.classify("E = mc^2"), SpanClass::Formula);
    }
}
