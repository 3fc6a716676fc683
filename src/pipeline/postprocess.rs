//! Post-processing: deterministic cleanup of LLM translation responses.
//!
//! Even well-prompted models wrap their answer in artefacts the prompt told
//! them to leave out:
//!
//! - a leading `Translation:` / `翻譯：` label
//! - ` ``` ` fences around plain prose
//! - `> ` block-quote markers or a pair of enclosing quotes
//! - invisible Unicode (zero-width spaces, BOM)
//!
//! [`clean_translation`] strips these with cheap, ordered rules. Table
//! responses go through [`parse_table_response`], which extracts the JSON
//! payload and runs a bounded repair loop before giving up and keeping the
//! source grid.
//!
//! ## Rule Order
//!
//! Fences are stripped before labels (the label may sit inside the fence),
//! and paragraph separators are normalised last so the reflow step sees a
//! canonical `\n\n` between paragraphs.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Apply all cleanup rules to a raw text/formula/image-text response.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip outer code fences
/// 3. Strip leading translation labels
/// 4. Strip block-quote markers when every line carries one
/// 5. Strip one pair of enclosing quotes
/// 6. Strip invisible Unicode
/// 7. Trim lines and collapse blank-line runs into one paragraph break
pub fn clean_translation(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = strip_code_fences(&s);
    let s = strip_labels(&s);
    let s = strip_quote_markers(&s);
    let s = strip_enclosing_quotes(&s);
    let s = remove_invisible_chars(&s);
    normalise_paragraphs(&s)
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z0-9_-]*[ \t]*\n(.*?)\n?```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 3: Strip leading labels ─────────────────────────────────────────────

static RE_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:\*\*)?(?:translation|translated text|traditional chinese|譯文|翻譯|翻译|中文翻譯|繁體中文)(?:\*\*)?\s*[:：]\s*(?:\*\*)?\s*",
    )
    .unwrap()
});

fn strip_labels(input: &str) -> String {
    RE_LABEL.replace(input, "").into_owned()
}

// ── Rule 4: Strip block-quote markers ────────────────────────────────────────

fn strip_quote_markers(input: &str) -> String {
    let quoted = input
        .lines()
        .filter(|l| !l.trim().is_empty())
        .all(|l| l.trim_start().starts_with('>'));
    if !quoted || input.trim().is_empty() {
        return input.to_string();
    }
    input
        .lines()
        .map(|l| {
            let l = l.trim_start();
            let l = l.strip_prefix('>').unwrap_or(l);
            l.strip_prefix(' ').unwrap_or(l)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Strip enclosing quotes ───────────────────────────────────────────

const QUOTE_PAIRS: &[(char, char)] = &[('"', '"'), ('“', '”'), ('「', '」'), ('『', '』')];

/// Only strips when the quote characters do not also occur inside, so a
/// sentence that merely starts and ends with separate quotations survives.
fn strip_enclosing_quotes(input: &str) -> String {
    let t = input.trim();
    for &(open, close) in QUOTE_PAIRS {
        if let Some(inner) = t.strip_prefix(open).and_then(|r| r.strip_suffix(close)) {
            if !inner.contains(open) && !inner.contains(close) {
                return inner.to_string();
            }
        }
    }
    input.to_string()
}

// ── Rule 6: Remove invisible Unicode characters ──────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

// ── Rule 7: Normalise paragraph breaks ───────────────────────────────────────

static RE_BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*(?:\n[ \t]*)+").unwrap());

fn normalise_paragraphs(input: &str) -> String {
    let trimmed: Vec<&str> = input.lines().map(str::trim_end).collect();
    let joined = trimmed.join("\n");
    RE_BLANK_RUNS
        .replace_all(joined.trim(), "\n\n")
        .into_owned()
}

// ── Table responses ──────────────────────────────────────────────────────────

/// Result of interpreting a table response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableOutcome {
    /// The response parsed into a grid, possibly after repair.
    Parsed(Vec<Vec<String>>),
    /// Nothing usable came back; carries the source grid unchanged.
    FallbackOriginal(Vec<Vec<String>>),
}

impl TableOutcome {
    pub fn is_parsed(&self) -> bool {
        matches!(self, TableOutcome::Parsed(_))
    }

    pub fn grid(&self) -> &[Vec<String>] {
        match self {
            TableOutcome::Parsed(g) | TableOutcome::FallbackOriginal(g) => g,
        }
    }

    pub fn into_grid(self) -> Vec<Vec<String>> {
        match self {
            TableOutcome::Parsed(g) | TableOutcome::FallbackOriginal(g) => g,
        }
    }
}

/// Upper bound on repair passes after the strict parse fails.
pub const MAX_REPAIR_ATTEMPTS: usize = 2;

static RE_JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\n?(.*?)```").unwrap());

/// The JSON payload of a response: the first fenced block if present, else
/// the trimmed response narrowed to its outermost `[...]`.
pub fn extract_json_block(raw: &str) -> String {
    if let Some(caps) = RE_JSON_FENCE.captures(raw) {
        return caps[1].trim().to_string();
    }
    let t = raw.trim();
    match (t.find('['), t.rfind(']')) {
        (Some(start), Some(end)) if start < end => t[start..=end].to_string(),
        _ => t.to_string(),
    }
}

static RE_TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*([\]}])").unwrap());

fn normalise_quotes(s: &str) -> String {
    s.replace(['“', '”', '„', '＂'], "\"")
        .replace(['‘', '’'], "'")
}

fn strip_trailing_commas(s: &str) -> String {
    RE_TRAILING_COMMA.replace_all(s, "$1").into_owned()
}

/// Repairs in the order they are tried; each applies on top of the last.
const REPAIRS: [fn(&str) -> String; MAX_REPAIR_ATTEMPTS] = [normalise_quotes, strip_trailing_commas];

/// Interpret a table response against the grid that was sent.
///
/// Returns the outcome and the number of repair passes that were needed
/// (0 when the strict parse succeeded or when nothing could be parsed).
pub fn parse_table_response(raw: &str, original: &[Vec<String>]) -> (TableOutcome, usize) {
    let mut candidate = extract_json_block(raw);
    if let Some(grid) = parse_grid(&candidate, original) {
        return (TableOutcome::Parsed(grid), 0);
    }
    for (attempt, repair) in REPAIRS.iter().enumerate() {
        candidate = repair(&candidate);
        tracing::debug!("Table response repair attempt {}", attempt + 1);
        if let Some(grid) = parse_grid(&candidate, original) {
            return (TableOutcome::Parsed(grid), attempt + 1);
        }
    }
    (TableOutcome::FallbackOriginal(original.to_vec()), 0)
}

/// Strict parse into an array of rows of scalar cells.
fn parse_grid(json: &str, original: &[Vec<String>]) -> Option<Vec<Vec<String>>> {
    let value: Value = serde_json::from_str(json).ok()?;
    let rows = value.as_array()?;
    if rows.is_empty() && !original.is_empty() {
        return None;
    }
    rows.iter()
        .map(|row| -> Option<Vec<String>> { row.as_array()?.iter().map(cell_text).collect() })
        .collect()
}

fn cell_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Null => Some(String::new()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Same row count and same cell count per row.
pub fn same_shape(a: &[Vec<String>], b: &[Vec<String>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.len() == y.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_strip_label() {
        assert_eq!(clean_translation("Translation: 你好"), "你好");
        assert_eq!(clean_translation("翻譯：你好"), "你好");
        assert_eq!(clean_translation("譯文: 你好"), "你好");
        assert_eq!(clean_translation("**Translation:** 你好"), "你好");
    }

    #[test]
    fn test_label_only_at_start() {
        assert_eq!(clean_translation("結果：翻譯：好"), "結果：翻譯：好");
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(clean_translation("```\n模型被訓練。\n```"), "模型被訓練。");
        assert_eq!(clean_translation("```text\n模型\n```\n"), "模型");
    }

    #[test]
    fn test_fences_then_label() {
        assert_eq!(clean_translation("```\nTranslation: 模型\n```"), "模型");
    }

    #[test]
    fn test_strip_quote_markers() {
        assert_eq!(clean_translation("> 第一段。\n>\n> 第二段。"), "第一段。\n\n第二段。");
        // a single quoted line among prose stays
        assert_eq!(clean_translation("說明\n> 引用"), "說明\n> 引用");
    }

    #[test]
    fn test_strip_enclosing_quotes() {
        assert_eq!(clean_translation("「模型收斂。」"), "模型收斂。");
        assert_eq!(clean_translation("\"hello\""), "hello");
        assert_eq!(clean_translation("「甲」與「乙」"), "「甲」與「乙」");
    }

    #[test]
    fn test_paragraphs_normalised() {
        assert_eq!(clean_translation("一。\r\n\r\n\r\n二。  \n"), "一。\n\n二。");
        assert_eq!(clean_translation("一。\n \n二。"), "一。\n\n二。");
    }

    #[test]
    fn test_remove_invisible() {
        assert_eq!(clean_translation("\u{FEFF}模\u{200B}型"), "模型");
    }

    #[test]
    fn test_extract_fenced_json() {
        let raw = "Here you go:\n```json\n[[\"a\"]]\n```\nDone.";
        assert_eq!(extract_json_block(raw), "[[\"a\"]]");
    }

    #[test]
    fn test_extract_bare_json() {
        assert_eq!(extract_json_block("  sure [[\"a\",\"b\"]] ok"), "[[\"a\",\"b\"]]");
    }

    #[test]
    fn test_parse_strict() {
        let orig = grid(&[&["Model", "Acc"]]);
        let (out, repairs) = parse_table_response(r#"[["模型", "準確率"]]"#, &orig);
        assert_eq!(out, TableOutcome::Parsed(grid(&[&["模型", "準確率"]])));
        assert_eq!(repairs, 0);
    }

    #[test]
    fn test_trailing_comma_repaired() {
        let orig = grid(&[&["Model", "Acc"], &["BERT", "91.2"]]);
        let raw = "```json\n[[\"模型\", \"準確率\"], [\"BERT\", \"91.2\"],]\n```";
        let (out, repairs) = parse_table_response(raw, &orig);
        assert_eq!(
            out,
            TableOutcome::Parsed(grid(&[&["模型", "準確率"], &["BERT", "91.2"]]))
        );
        assert_eq!(repairs, 2);
    }

    #[test]
    fn test_curly_quotes_repaired() {
        let orig = grid(&[&["a"]]);
        let (out, repairs) = parse_table_response("[[“甲”]]", &orig);
        assert_eq!(out, TableOutcome::Parsed(grid(&[&["甲"]])));
        assert_eq!(repairs, 1);
    }

    #[test]
    fn test_scalar_response_rejected() {
        let orig = grid(&[&["a", "b"]]);
        let (out, _) = parse_table_response("\"just a string\"", &orig);
        assert_eq!(out, TableOutcome::FallbackOriginal(orig.clone()));
        let (out, _) = parse_table_response("[\"flat\", \"row\"]", &orig);
        assert!(!out.is_parsed());
    }

    #[test]
    fn test_garbage_falls_back() {
        let orig = grid(&[&["x"]]);
        let (out, repairs) = parse_table_response("I cannot translate this table.", &orig);
        assert_eq!(out.into_grid(), orig);
        assert_eq!(repairs, 0);
    }

    #[test]
    fn test_scalar_cells_become_strings() {
        let orig = grid(&[&["a", "b", "c", "d"]]);
        let (out, _) = parse_table_response("[[1.5, null, true, \"x\"]]", &orig);
        assert_eq!(out.grid(), grid(&[&["1.5", "", "true", "x"]]).as_slice());
    }

    #[test]
    fn test_same_shape() {
        let a = grid(&[&["a", "b"], &["c"]]);
        assert!(same_shape(&a, &grid(&[&["1", "2"], &["3"]])));
        assert!(!same_shape(&a, &grid(&[&["1"], &["3"]])));
    }
}
