//! Domain terminology: loading, lookup, similarity search, and candidate
//! term extraction.
//!
//! A terminology directory holds one file per domain: `<domain>.csv` with
//! an `english,chinese[,definition]` header (or `source_term,target_term`),
//! or `<domain>.json` with an array of objects carrying the same fields.
//! Files whose name starts with `template` are examples and are skipped.
//!
//! [`TermResolver`] turns a piece of source text into the
//! [`TerminologyContext`] embedded in its prompt, drawing on the loaded store,
//! on short translations remembered by the [`TranslationCache`], and on an
//! optional [`TermSimilarity`] search for near matches.

use crate::error::TranslateError;
use crate::pipeline::cache::{normalise_term, TranslationCache, MAX_TERM_WORDS};
use crate::prompts::{TermPair, TerminologyContext};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One source→target term, immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminologyEntry {
    #[serde(alias = "english")]
    pub source_term: String,
    #[serde(alias = "chinese")]
    pub target_term: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Document the term was extracted from, for generated term lists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_pdf: Option<String>,
}

impl TerminologyEntry {
    pub fn new(source_term: impl Into<String>, target_term: impl Into<String>) -> Self {
        Self {
            source_term: source_term.into(),
            target_term: target_term.into(),
            definition: None,
            domain: None,
            source_pdf: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    fn is_usable(&self) -> bool {
        !self.source_term.trim().is_empty() && !self.target_term.trim().is_empty()
    }
}

// ── Store ────────────────────────────────────────────────────────────────────

/// All loaded terminology, with exact lookup by lowercased source term.
#[derive(Debug, Default, Clone)]
pub struct TerminologyStore {
    entries: Vec<TerminologyEntry>,
    exact: HashMap<String, usize>,
}

impl TerminologyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = TerminologyEntry>) -> Self {
        let mut store = Self::new();
        for e in entries {
            store.insert(e);
        }
        store
    }

    /// Add an entry. The first entry for a source term keeps the exact-lookup
    /// slot; later ones stay reachable through similarity search.
    pub fn insert(&mut self, mut entry: TerminologyEntry) {
        if !entry.is_usable() {
            return;
        }
        entry.source_term = entry.source_term.trim().to_string();
        entry.target_term = entry.target_term.trim().to_string();
        if entry.definition.as_deref().is_some_and(|d| d.trim().is_empty()) {
            entry.definition = None;
        }
        let key = normalise_term(&entry.source_term);
        let idx = self.entries.len();
        self.entries.push(entry);
        self.exact.entry(key).or_insert(idx);
    }

    /// Load every terminology file in `dir`.
    ///
    /// A missing directory yields an empty store. A file that cannot be
    /// parsed is a fatal error naming the file.
    pub async fn load_dir(dir: &Path) -> Result<Self, TranslateError> {
        let mut store = Self::new();
        if !dir.is_dir() {
            debug!("No terminology directory at {}", dir.display());
            return Ok(store);
        }

        let mut files: Vec<PathBuf> = Vec::new();
        let mut rd = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| TranslateError::ReadFailed {
                path: dir.to_path_buf(),
                source: e,
            })?;
        while let Ok(Some(entry)) = rd.next_entry().await {
            files.push(entry.path());
        }
        files.sort();

        for path in files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if name.starts_with("template") {
                continue;
            }
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if ext != "csv" && ext != "json" {
                continue;
            }
            let domain = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let loaded = store.load_file(&path, &domain).await?;
            info!("Loaded {} terms for domain '{}'", loaded, domain);
        }
        Ok(store)
    }

    /// Load one CSV or JSON file under `domain`. Returns the number of
    /// entries added.
    pub async fn load_file(&mut self, path: &Path, domain: &str) -> Result<usize, TranslateError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| TranslateError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
        let malformed = |detail: String| TranslateError::TerminologyMalformed {
            path: path.to_path_buf(),
            detail,
        };

        let is_csv = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        let parsed: Vec<TerminologyEntry> = if is_csv {
            let mut reader = csv::ReaderBuilder::new()
                .trim(csv::Trim::All)
                .flexible(true)
                .from_reader(bytes.as_slice());
            reader
                .deserialize()
                .collect::<Result<_, _>>()
                .map_err(|e| malformed(e.to_string()))?
        } else {
            // entries missing a required field are skipped, not fatal
            let raw: Vec<serde_json::Value> =
                serde_json::from_slice(&bytes).map_err(|e| malformed(e.to_string()))?;
            raw.into_iter()
                .filter_map(|v| match serde_json::from_value::<TerminologyEntry>(v) {
                    Ok(e) => Some(e),
                    Err(e) => {
                        warn!("Skipping terminology entry in {}: {}", path.display(), e);
                        None
                    }
                })
                .collect()
        };

        let before = self.entries.len();
        for mut entry in parsed {
            entry.domain = Some(domain.to_string());
            self.insert(entry);
        }
        Ok(self.entries.len() - before)
    }

    /// Exact, case-insensitive lookup.
    pub fn lookup(&self, term: &str) -> Option<&TerminologyEntry> {
        self.exact
            .get(&normalise_term(term))
            .map(|&i| &self.entries[i])
    }

    pub fn entries(&self) -> &[TerminologyEntry] {
        &self.entries
    }

    pub fn entries_for_domain<'a>(
        &'a self,
        domain: &'a str,
    ) -> impl Iterator<Item = &'a TerminologyEntry> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.domain.as_deref() == Some(domain))
    }

    pub fn domains(&self) -> Vec<&str> {
        let mut d: Vec<&str> = self
            .entries
            .iter()
            .filter_map(|e| e.domain.as_deref())
            .collect();
        d.sort_unstable();
        d.dedup();
        d
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

const TEMPLATE_ROWS: &[(&str, &str, &str)] = &[
    ("artificial intelligence", "人工智慧", "計算機系統模擬人類智能的能力"),
    ("machine learning", "機器學習", ""),
    ("deep learning", "深度學習", ""),
];

/// Create `template.csv` and `template.json` in `dir` (creating `dir`).
pub async fn write_template(dir: &Path) -> Result<(), TranslateError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let csv_err = |e: csv::Error| TranslateError::Internal(format!("CSV template: {e}"));
    writer
        .write_record(["english", "chinese", "definition"])
        .map_err(csv_err)?;
    for (en, zh, def) in TEMPLATE_ROWS {
        writer.write_record([*en, *zh, *def]).map_err(csv_err)?;
    }
    let csv_bytes = writer
        .into_inner()
        .map_err(|e| TranslateError::Internal(format!("CSV template: {e}")))?;

    let json: Vec<serde_json::Value> = TEMPLATE_ROWS
        .iter()
        .map(|(en, zh, def)| serde_json::json!({"english": en, "chinese": zh, "definition": def}))
        .collect();
    let json_bytes = serde_json::to_vec_pretty(&json)
        .map_err(|e| TranslateError::Internal(format!("JSON template: {e}")))?;

    crate::output::write_atomic(&dir.join("template.csv"), &csv_bytes).await?;
    crate::output::write_atomic(&dir.join("template.json"), &json_bytes).await?;
    info!("Created terminology templates in {}", dir.display());
    Ok(())
}

/// Write a term list as pretty JSON.
pub async fn save_terms(path: &Path, terms: &[TerminologyEntry]) -> Result<(), TranslateError> {
    let json = serde_json::to_vec_pretty(terms)
        .map_err(|e| TranslateError::Internal(format!("serialise terms: {e}")))?;
    crate::output::write_atomic(path, &json).await
}

// ── Similarity ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredTerm {
    pub entry: TerminologyEntry,
    pub similarity: f32,
}

/// Approximate term search. Results are ranked best first and all score
/// at least `threshold`.
pub trait TermSimilarity: Send + Sync {
    fn search(&self, query: &str, domain: Option<&str>, threshold: f32) -> Vec<ScoredTerm>;
}

/// Normalised Levenshtein similarity over lowercased source terms.
pub struct FuzzySimilarity {
    entries: Vec<(Vec<char>, TerminologyEntry)>,
    top_k: usize,
}

impl FuzzySimilarity {
    pub fn new(store: &TerminologyStore) -> Self {
        Self {
            entries: store
                .entries()
                .iter()
                .map(|e| (normalise_term(&e.source_term).chars().collect(), e.clone()))
                .collect(),
            top_k: 5,
        }
    }
}

impl TermSimilarity for FuzzySimilarity {
    fn search(&self, query: &str, domain: Option<&str>, threshold: f32) -> Vec<ScoredTerm> {
        let q: Vec<char> = normalise_term(query).chars().collect();
        if q.is_empty() {
            return Vec::new();
        }
        let mut hits: Vec<ScoredTerm> = self
            .entries
            .iter()
            .filter(|(_, e)| domain.is_none() || e.domain.as_deref() == domain)
            .filter_map(|(chars, e)| {
                let longest = q.len().max(chars.len());
                // the length gap alone bounds the best reachable score
                let gap = q.len().abs_diff(chars.len());
                if 1.0 - gap as f32 / (longest as f32) < threshold {
                    return None;
                }
                let sim = 1.0 - levenshtein(&q, chars) as f32 / (longest as f32);
                (sim >= threshold).then(|| ScoredTerm {
                    entry: e.clone(),
                    similarity: sim,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(self.top_k);
        hits
    }
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

// ── Resolver ─────────────────────────────────────────────────────────────────

/// Builds the terminology context for one request.
#[derive(Clone)]
pub struct TermResolver {
    store: Arc<TerminologyStore>,
    similarity: Option<Arc<dyn TermSimilarity>>,
    domain: Option<String>,
    threshold: f32,
    max_terms: usize,
}

impl TermResolver {
    pub fn new(store: Arc<TerminologyStore>, max_terms: usize) -> Self {
        Self {
            store,
            similarity: None,
            domain: None,
            threshold: 0.7,
            max_terms,
        }
    }

    /// A resolver with no store; only cache-remembered terms apply.
    pub fn empty(max_terms: usize) -> Self {
        Self::new(Arc::new(TerminologyStore::new()), max_terms)
    }

    pub fn with_similarity(mut self, similarity: Arc<dyn TermSimilarity>, threshold: f32) -> Self {
        self.similarity = Some(similarity);
        self.threshold = threshold;
        self
    }

    pub fn with_domain(mut self, domain: Option<String>) -> Self {
        self.domain = domain;
        self
    }

    pub fn store(&self) -> &TerminologyStore {
        &self.store
    }

    /// Terms relevant to `text`: every 1–4 word n-gram is checked against the
    /// store, then the cache's remembered terms, then (multi-word n-grams
    /// only) the similarity search. The first `max_terms` distinct source
    /// terms in text order are kept.
    pub fn context_for(&self, text: &str, cache: &TranslationCache) -> TerminologyContext {
        let words: Vec<&str> = text
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '-'))
            .filter(|w| !w.is_empty())
            .collect();

        let mut seen: HashSet<String> = HashSet::new();
        let mut pairs: Vec<TermPair> = Vec::new();

        'outer: for start in 0..words.len() {
            for n in (1..=MAX_TERM_WORDS).rev() {
                if start + n > words.len() {
                    continue;
                }
                let ngram = words[start..start + n].join(" ");
                let key = normalise_term(&ngram);
                if seen.contains(&key) {
                    continue;
                }
                if let Some(pair) = self.resolve(&ngram, n, cache) {
                    seen.insert(key);
                    seen.insert(normalise_term(&pair.source));
                    pairs.push(pair);
                    if pairs.len() >= self.max_terms {
                        break 'outer;
                    }
                }
            }
        }

        TerminologyContext::new(pairs)
    }

    fn resolve(&self, ngram: &str, words: usize, cache: &TranslationCache) -> Option<TermPair> {
        if let Some(entry) = self.store.lookup(ngram) {
            return Some(TermPair::new(&entry.source_term, &entry.target_term));
        }
        if let Some(target) = cache.recall_term(ngram) {
            return Some(TermPair::new(ngram, target));
        }
        if words < 2 {
            return None;
        }
        let similarity = self.similarity.as_ref()?;
        similarity
            .search(ngram, self.domain.as_deref(), self.threshold)
            .into_iter()
            .next()
            .map(|hit| TermPair::new(hit.entry.source_term, hit.entry.target_term))
    }
}

// ── Candidate extraction ─────────────────────────────────────────────────────

static RE_CAPITALISED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+)+)\b").unwrap());
static RE_ABBREVIATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Za-z][A-Za-z\- ]*?)\s+\(([A-Z]{2,})\)").unwrap());
static RE_HYPHENATED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Za-z]+(?:-[A-Za-z]+)+)\b").unwrap());

/// Sentence-initial words dropped from the front of capitalised phrases.
const LEADING_STOPWORDS: &[&str] = &["The", "A", "An", "This", "These", "Our", "We", "In", "On", "For"];

/// Count words, treating hyphen-joined parts as separate words.
fn word_count(term: &str) -> usize {
    term.split(|c: char| c.is_whitespace() || c == '-')
        .filter(|w| !w.is_empty())
        .count()
}

/// Likely domain terms in `text`, most frequent first (ties keep first
/// occurrence order), at most `top_n`.
///
/// Candidates are capitalised multi-word phrases (minus a leading article),
/// the long form in front of a parenthesised abbreviation (trimmed to as
/// many words as the abbreviation has letters), and hyphenated compounds. Only terms of two
/// or more words and more than five characters are kept.
pub fn extract_candidate_terms(text: &str, top_n: usize) -> Vec<(String, usize)> {
    let mut found: Vec<(usize, String)> = Vec::new();

    for m in RE_CAPITALISED.captures_iter(text) {
        if let Some(g) = m.get(1) {
            let words: Vec<&str> = g
                .as_str()
                .split_whitespace()
                .skip_while(|w| LEADING_STOPWORDS.contains(w))
                .collect();
            found.push((g.start(), words.join(" ")));
        }
    }
    for m in RE_ABBREVIATION.captures_iter(text) {
        if let (Some(long), Some(abbr)) = (m.get(1), m.get(2)) {
            let letters = abbr.as_str().len();
            let mut kept: Vec<&str> = Vec::new();
            let mut covered = 0;
            for w in long.as_str().split_whitespace().rev() {
                if covered >= letters {
                    break;
                }
                kept.push(w);
                covered += word_count(w);
            }
            kept.reverse();
            found.push((long.start(), kept.join(" ")));
        }
    }
    for m in RE_HYPHENATED.captures_iter(text) {
        if let Some(g) = m.get(1) {
            found.push((g.start(), g.as_str().to_string()));
        }
    }
    found.sort_by_key(|(pos, _)| *pos);

    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (order, (_, term)) in found.into_iter().enumerate() {
        let term = term.split_whitespace().collect::<Vec<_>>().join(" ");
        if word_count(&term) < 2 || term.chars().count() <= 5 {
            continue;
        }
        counts.entry(term).or_insert((0, order)).0 += 1;
    }

    let mut ranked: Vec<(String, usize, usize)> = counts
        .into_iter()
        .map(|(t, (count, first))| (t, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked
        .into_iter()
        .take(top_n)
        .map(|(t, c, _)| (t, c))
        .collect()
}
