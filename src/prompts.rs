//! Prompt construction for every content type.
//!
//! [`PromptBuilder`] is pure: identical inputs give byte-identical prompts.
//! Terminology pairs are sorted by source term inside
//! [`TerminologyContext`], so the order in which terms were discovered never
//! leaks into the request.
//!
//! Each prompt is a system message (rules) plus a user message (payload).

use serde::{Deserialize, Serialize};

/// A source→target term pair offered to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermPair {
    pub source: String,
    pub target: String,
}

impl TermPair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Terms relevant to one request, deduplicated and sorted by source term.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminologyContext {
    pairs: Vec<TermPair>,
}

impl TerminologyContext {
    /// Sort case-insensitively by source term; the first pair seen for a
    /// source term wins.
    pub fn new(pairs: impl IntoIterator<Item = TermPair>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let mut pairs: Vec<TermPair> = pairs
            .into_iter()
            .filter(|p| !p.source.trim().is_empty() && !p.target.trim().is_empty())
            .filter(|p| seen.insert(p.source.trim().to_lowercase()))
            .collect();
        pairs.sort_by(|a, b| {
            a.source
                .to_lowercase()
                .cmp(&b.source.to_lowercase())
                .then_with(|| a.source.cmp(&b.source))
        });
        Self { pairs }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn pairs(&self) -> &[TermPair] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// System + user message pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Payload to translate, tagged by content type.
#[derive(Debug, Clone, Copy)]
pub enum PromptSource<'a> {
    Text(&'a str),
    Formula(&'a str),
    Table(&'a [Vec<String>]),
    ImageText(&'a str),
}

/// Builds prompts for one language pair.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    source_language: String,
    target_language: String,
    max_terms: usize,
}

impl PromptBuilder {
    pub fn new(
        source_language: impl Into<String>,
        target_language: impl Into<String>,
        max_terms: usize,
    ) -> Self {
        Self {
            source_language: source_language.into(),
            target_language: target_language.into(),
            max_terms,
        }
    }

    pub fn from_config(config: &crate::config::TranslationConfig) -> Self {
        Self::new(
            config.source_language.clone(),
            config.target_language.clone(),
            config.max_terms,
        )
    }

    /// Dispatch on content type. Terminology is only used for plain text.
    pub fn build(&self, source: PromptSource<'_>, terms: &TerminologyContext) -> Prompt {
        match source {
            PromptSource::Text(t) => self.text(t, terms),
            PromptSource::Formula(f) => self.formula(f),
            PromptSource::Table(g) => self.table(g),
            PromptSource::ImageText(t) => self.image_text(t),
        }
    }

    pub fn text(&self, text: &str, terms: &TerminologyContext) -> Prompt {
        let mut system = format!(
            "You are a professional translator of academic and technical documents. \
Translate the {src} text provided by the user into {tgt}.\n\n\
Rules:\n\
1. Keep an academic, precise register; the result must read naturally in {tgt}.\n\
2. Preserve the paragraph structure exactly: paragraphs are separated by one blank line, \
and the translation must keep the same separation.\n\
3. Keep numbers, units, citations such as [12], acronyms, and enumerations (A, B, C / i, ii) unchanged.\n\
4. Keep proper nouns in their original form unless a standard {tgt} rendering exists.\n\
5. Output only the translation. No preamble, no labels, no notes, no code fences.",
            src = self.source_language,
            tgt = self.target_language,
        );

        if !terms.is_empty() {
            system.push_str("\n\nUse these established term translations (source -> target):\n");
            for pair in terms.pairs().iter().take(self.max_terms) {
                system.push_str(&format!("- {} -> {}\n", pair.source, pair.target));
            }
            system.push_str("Always use the translations above for these terms.");
        }

        Prompt {
            system,
            user: text.to_string(),
        }
    }

    pub fn formula(&self, formula: &str) -> Prompt {
        let system = format!(
            "You translate mathematical formulas that appear in {src} documents into {tgt}.\n\n\
Rules:\n\
1. Reproduce every symbol, operator, variable, subscript, superscript, and LaTeX command exactly.\n\
2. Translate only natural-language fragments, such as the content of \\text{{...}}, \\mathrm{{...}} \
words, or short phrases like \"where\" and \"for all\".\n\
3. If the formula contains no natural language, return it unchanged.\n\
4. Output only the formula. No explanation, no code fences.",
            src = self.source_language,
            tgt = self.target_language,
        );
        Prompt {
            system,
            user: formula.to_string(),
        }
    }

    pub fn table(&self, grid: &[Vec<String>]) -> Prompt {
        let rows = grid.len();
        let cols = grid.iter().map(Vec::len).max().unwrap_or(0);
        let system = format!(
            "You translate table cells from {src} into {tgt}.\n\n\
The user sends the table as a JSON array of rows, each row an array of cell strings.\n\n\
Rules:\n\
1. Return a JSON array with exactly the same shape: {rows} rows, each row with the same \
number of cells as the input row (at most {cols}).\n\
2. Translate only natural-language cell text.\n\
3. Do NOT translate proper nouns, abbreviations, model or dataset names, numbers, units, \
or numeric values; copy them verbatim.\n\
4. Keep empty cells empty.\n\
5. Output only the JSON array, optionally inside a ```json fenced block. No commentary.",
            src = self.source_language,
            tgt = self.target_language,
        );
        let user = serde_json::to_string(grid).unwrap_or_else(|_| "[]".to_string());
        Prompt { system, user }
    }

    pub fn image_text(&self, text: &str) -> Prompt {
        let system = format!(
            "You translate short text found in figures and figure captions from {src} into {tgt}.\n\n\
Rules:\n\
1. The text may be fragmentary or contain recognition errors; translate what is legible \
and keep illegible fragments as they are.\n\
2. Keep labels such as \"Figure 3\", axis units, numbers, and variable names recognisable.\n\
3. Output only the translation. No explanation.",
            src = self.source_language,
            tgt = self.target_language,
        );
        Prompt {
            system,
            user: text.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> PromptBuilder {
        PromptBuilder::new("English", "Traditional Chinese", 20)
    }

    #[test]
    fn terminology_sorted_and_deduplicated() {
        let ctx = TerminologyContext::new(vec![
            TermPair::new("transformer", "變換器"),
            TermPair::new("Attention", "注意力"),
            TermPair::new("attention", "關注"),
            TermPair::new("", "空"),
        ]);
        let sources: Vec<_> = ctx.pairs().iter().map(|p| p.source.as_str()).collect();
        assert_eq!(sources, vec!["Attention", "transformer"]);
        assert_eq!(ctx.pairs()[0].target, "注意力");
    }

    #[test]
    fn text_prompt_is_order_independent() {
        let a = TerminologyContext::new(vec![
            TermPair::new("loss", "損失"),
            TermPair::new("epoch", "訓練週期"),
        ]);
        let b = TerminologyContext::new(vec![
            TermPair::new("epoch", "訓練週期"),
            TermPair::new("loss", "損失"),
        ]);
        assert_eq!(builder().text("x", &a), builder().text("x", &b));
        assert!(builder()
            .text("x", &a)
            .system
            .contains("- epoch -> 訓練週期\n- loss -> 損失"));
    }

    #[test]
    fn text_prompt_caps_terms() {
        let pairs = (0..30).map(|i| TermPair::new(format!("term{i:02}"), format!("詞{i}")));
        let ctx = TerminologyContext::new(pairs);
        let p = PromptBuilder::new("English", "Traditional Chinese", 20).text("body", &ctx);
        let listed = p.system.lines().filter(|l| l.starts_with("- ")).count();
        assert_eq!(listed, 20);
        assert!(p.system.contains("term19"));
        assert!(!p.system.contains("term20"));
    }

    #[test]
    fn text_prompt_without_terms_has_no_glossary() {
        let p = builder().text("Hello", &TerminologyContext::empty());
        assert!(!p.system.contains("established term"));
        assert_eq!(p.user, "Hello");
    }

    #[test]
    fn table_prompt_serialises_grid_and_forbids_numbers() {
        let grid = vec![
            vec!["Model".to_string(), "Accuracy".to_string()],
            vec!["BERT".to_string(), "91.2".to_string()],
        ];
        let p = builder().build(PromptSource::Table(&grid), &TerminologyContext::empty());
        assert_eq!(p.user, r#"[["Model","Accuracy"],["BERT","91.2"]]"#);
        assert!(p.system.contains("2 rows"));
        assert!(p.system.contains("Do NOT translate proper nouns"));
    }

    #[test]
    fn formula_prompt_ignores_terms() {
        let ctx = TerminologyContext::new(vec![TermPair::new("loss", "損失")]);
        let p = builder().build(PromptSource::Formula("L = -log p"), &ctx);
        assert!(!p.system.contains("損失"));
        assert!(p.system.contains("exactly"));
    }
}
