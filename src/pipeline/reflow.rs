//! Redistribute one translated blob across the source units it came from.
//!
//! Consecutive text blocks are joined with the paragraph separator and sent
//! as one request. The answer comes back as one string that has to be cut
//! into per-block pieces again:
//!
//! 1. **Exact path**: the blob splits on the separator into exactly as many
//!    paragraphs as the units held; each unit takes back as many consecutive
//!    paragraphs as it contained, usually one.
//! 2. **Proportional path**: otherwise each unit gets a share of the blob's
//!    characters proportional to its source length. Each cut snaps to the
//!    closest break character (whitespace or sentence/clause punctuation)
//!    within the look-ahead, preferring the following side, and the last
//!    unit takes whatever remains. Concatenating the pieces in order gives
//!    back the blob exactly.
//!
//! Lengths are counted in `char`s, never bytes, so CJK output is never cut
//! inside a code point.

use crate::config::ReflowConfig;

/// Which path produced a [`Reflowed`] result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflowPath {
    Exact,
    Proportional,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reflowed {
    pub pieces: Vec<String>,
    pub path: ReflowPath,
}

/// Characters a cut may land directly after.
const BREAK_CHARS: &[char] = &[
    '.', ',', '!', '?', ';', ':', '。', '，', '、', '！', '？', '；', '：', '）', ')',
];

fn is_break(c: char) -> bool {
    c.is_whitespace() || BREAK_CHARS.contains(&c)
}

#[derive(Debug, Clone)]
pub struct AlignmentReflow {
    separator: String,
    lookahead: usize,
}

impl AlignmentReflow {
    pub fn new(separator: impl Into<String>, lookahead: usize) -> Self {
        Self {
            separator: separator.into(),
            lookahead,
        }
    }

    pub fn from_config(separator: &str, config: &ReflowConfig) -> Self {
        Self::new(separator, config.lookahead)
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Split `blob` back into one piece per entry of `units`.
    pub fn reflow<S: AsRef<str>>(&self, blob: &str, units: &[S]) -> Reflowed {
        if units.is_empty() {
            return Reflowed {
                pieces: Vec::new(),
                path: ReflowPath::Exact,
            };
        }
        if blob.is_empty() {
            return Reflowed {
                pieces: vec![String::new(); units.len()],
                path: ReflowPath::Exact,
            };
        }

        if let Some(pieces) = self.exact(blob, units) {
            return Reflowed {
                pieces,
                path: ReflowPath::Exact,
            };
        }

        Reflowed {
            pieces: self.proportional(blob, units),
            path: ReflowPath::Proportional,
        }
    }

    /// Units may themselves hold separators (merged blocks), so each one
    /// claims as many paragraphs as it had in the source.
    fn exact<S: AsRef<str>>(&self, blob: &str, units: &[S]) -> Option<Vec<String>> {
        if self.separator.is_empty() {
            return None;
        }
        let sep = self.separator.as_str();
        let paragraphs: Vec<&str> = blob.split(sep).collect();
        let counts: Vec<usize> = units
            .iter()
            .map(|u| u.as_ref().matches(sep).count() + 1)
            .collect();
        if counts.iter().sum::<usize>() != paragraphs.len() {
            return None;
        }
        let mut rest = paragraphs.as_slice();
        let pieces = counts
            .into_iter()
            .map(|k| {
                let (head, tail) = rest.split_at(k);
                rest = tail;
                head.join(sep)
            })
            .collect();
        Some(pieces)
    }

    fn proportional<S: AsRef<str>>(&self, blob: &str, units: &[S]) -> Vec<String> {
        let chars: Vec<char> = blob.chars().collect();
        // byte offset of every char position, plus the end
        let offsets: Vec<usize> = blob
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(blob.len()))
            .collect();
        let n = chars.len();

        let mut weights: Vec<usize> = units.iter().map(|u| u.as_ref().chars().count()).collect();
        if weights.iter().all(|&w| w == 0) {
            weights.iter_mut().for_each(|w| *w = 1);
        }
        let total: usize = weights.iter().sum();

        let mut pieces = Vec::with_capacity(units.len());
        let mut cursor = 0usize;
        let last = units.len() - 1;
        for &weight in &weights[..last] {
            let share = (weight as f64 / total as f64 * n as f64).round() as usize;
            let target = (cursor + share).min(n);
            let cut = self.snap(&chars, cursor, target);
            pieces.push(blob[offsets[cursor]..offsets[cut]].to_string());
            cursor = cut;
        }
        pieces.push(blob[offsets[cursor]..].to_string());
        pieces
    }

    /// Move `target` to the nearest position right after a break character,
    /// at most `lookahead` chars away and strictly inside `(cursor, n)`.
    fn snap(&self, chars: &[char], cursor: usize, target: usize) -> usize {
        let n = chars.len();
        if target <= cursor || target >= n {
            return target;
        }
        let cuttable = |pos: usize| pos > cursor && pos < n && is_break(chars[pos - 1]);
        for d in 0..=self.lookahead {
            if cuttable(target + d) {
                return target + d;
            }
            if d <= target && cuttable(target - d) {
                return target - d;
            }
        }
        target
    }
}

impl Default for AlignmentReflow {
    fn default() -> Self {
        Self::new("\n\n", ReflowConfig::default().lookahead)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_path_assigns_paragraphs_in_order() {
        let r = AlignmentReflow::default();
        let out = r.reflow(
            "模型被訓練。\n\n它們收斂。",
            &["Models are trained.", "They converge."],
        );
        assert_eq!(out.path, ReflowPath::Exact);
        assert_eq!(out.pieces, vec!["模型被訓練。", "它們收斂。"]);
    }

    #[test]
    fn exact_path_regroups_units_holding_separators() {
        let r = AlignmentReflow::default();
        let units = [
            "We train the network with Adam\n\nand a cosine schedule.",
            "Results follow in section four.",
        ];
        let out = r.reflow("我們用 Adam 訓練網路\n\n並使用餘弦排程。\n\n結果見第四節。", &units);
        assert_eq!(out.path, ReflowPath::Exact);
        assert_eq!(
            out.pieces,
            vec!["我們用 Adam 訓練網路\n\n並使用餘弦排程。", "結果見第四節。"]
        );
    }

    #[test]
    fn paragraph_count_mismatch_with_merged_unit_goes_proportional() {
        let r = AlignmentReflow::default();
        let units = ["first\n\nsecond", "third"];
        let blob = "一\n\n二";
        let out = r.reflow(blob, &units);
        assert_eq!(out.path, ReflowPath::Proportional);
        assert_eq!(out.pieces.concat(), blob);
    }

    #[test]
    fn proportional_path_snaps_to_punctuation() {
        let r = AlignmentReflow::default();
        let blob = "所有模型被訓練得很好，它們最後都收斂了。";
        assert_eq!(blob.chars().count(), 20);

        let out = r.reflow(blob, &["Models are trained.", "They converge."]);
        assert_eq!(out.path, ReflowPath::Proportional);
        assert_eq!(out.pieces.len(), 2);
        assert_eq!(out.pieces[0], "所有模型被訓練得很好，");
        assert_eq!(out.pieces[1], "它們最後都收斂了。");
        let total: usize = out.pieces.iter().map(|p| p.chars().count()).sum();
        assert_eq!(total, 20);
    }

    #[test]
    fn proportional_path_snaps_to_whitespace() {
        let r = AlignmentReflow::new("\n\n", 20);
        let blob = "alpha beta gamma delta epsilon zeta";
        let out = r.reflow(blob, &["aaaa", "bbbb"]);
        assert_eq!(out.pieces.concat(), blob);
        assert!(out.pieces[0].ends_with(' '), "{:?}", out.pieces);
    }

    #[test]
    fn no_break_in_reach_cuts_at_ratio() {
        let r = AlignmentReflow::new("\n\n", 2);
        let blob = "abcdefghijklmnopqrst";
        let out = r.reflow(blob, &["xxxxxxxxxx", "yyyyyyyyyy"]);
        assert_eq!(out.pieces, vec!["abcdefghij", "klmnopqrst"]);
    }

    #[test]
    fn coverage_holds_for_many_shapes() {
        let r = AlignmentReflow::default();
        let blobs = [
            "短",
            "一個句子。",
            "The quick brown fox jumps over the lazy dog, twice.",
            "第一段。第二段，還有更多文字；最後一句！",
            "no-breaks-at-all-in-this-particular-string-of-text",
            "a\n\nb\n\nc\n\nd",
        ];
        let unit_sets: [&[&str]; 4] = [
            &["one"],
            &["a much longer first unit", "b"],
            &["x", "yy", "zzz"],
            &["", "", "", "", ""],
        ];
        for blob in blobs {
            for units in unit_sets {
                let out = r.reflow(blob, units);
                assert_eq!(out.pieces.len(), units.len());
                match out.path {
                    ReflowPath::Proportional => assert_eq!(out.pieces.concat(), blob),
                    ReflowPath::Exact => assert_eq!(out.pieces.join("\n\n"), blob),
                }
            }
        }
    }

    #[test]
    fn empty_inputs() {
        let r = AlignmentReflow::default();
        assert!(r.reflow::<&str>("anything", &[]).pieces.is_empty());
        assert_eq!(r.reflow("", &["a", "b", "c"]).pieces, vec!["", "", ""]);
    }

    #[test]
    fn zero_length_units_split_evenly() {
        let r = AlignmentReflow::new("\n\n", 0);
        let out = r.reflow("abcdef", &["", ""]);
        assert_eq!(out.pieces, vec!["abc", "def"]);
    }
}
