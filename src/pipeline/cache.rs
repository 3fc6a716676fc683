//! Content-addressed translation memo.
//!
//! [`TranslationCache`] keeps three separate stores (plain text, formulas,
//! whole tables) so a formula can never be served a prose translation that
//! happens to share its key. Keys are [`Fingerprint`]s: SHA-256 over the
//! whitespace-normalised full source, so distinct inputs never collide the
//! way a truncated prefix would.
//!
//! Lookups are keyed by source content only. A hit is returned regardless
//! of the terminology context the new request would have carried.
//!
//! The cache also keeps a small term memory: short source strings (up to a
//! few words) and their translations, which the terminology resolver feeds
//! back into later prompts for consistent vocabulary.
//!
//! Entries are never evicted; one cache lives for one pipeline run.

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Stable cache key derived from source content.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Hash of `text` with runs of whitespace collapsed and ends trimmed.
    pub fn of_text(text: &str) -> Self {
        let mut hasher = Sha256::new();
        for (i, word) in text.split_whitespace().enumerate() {
            if i > 0 {
                hasher.update(b" ");
            }
            hasher.update(word.as_bytes());
        }
        Self(hasher.finalize().into())
    }

    /// Hash of a whole cell grid. Rows and cells are length-prefixed so
    /// `[["ab"]]` and `[["a","b"]]` differ.
    pub fn of_grid(grid: &[Vec<String>]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((grid.len() as u64).to_le_bytes());
        for row in grid {
            hasher.update((row.len() as u64).to_le_bytes());
            for cell in row {
                let cell = cell.trim();
                hasher.update((cell.len() as u64).to_le_bytes());
                hasher.update(cell.as_bytes());
            }
        }
        Self(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}

/// One key→value store with hit/miss counters.
pub struct MemoStore<K, V> {
    name: &'static str,
    entries: RwLock<HashMap<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K: Eq + Hash + fmt::Debug, V: Clone> MemoStore<K, V> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a value; counts a hit or a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let found = self.entries.read().get(key).cloned();
        match found {
            Some(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("{} cache hit {:?}", self.name, key);
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        found
    }

    /// Store a value. The first value stored under a key is kept, so
    /// concurrent misses on the same key settle on one answer.
    pub fn put(&self, key: K, value: V) {
        self.entries.write().entry(key).or_insert(value);
    }

    /// Look up without touching the counters.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.entries.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn clear(&self) {
        self.entries.write().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

/// Longest source string (in words) remembered as a term.
pub const MAX_TERM_WORDS: usize = 4;

/// Process-wide memo for one pipeline run.
pub struct TranslationCache {
    text: MemoStore<Fingerprint, String>,
    formula: MemoStore<Fingerprint, String>,
    table: MemoStore<Fingerprint, Vec<Vec<String>>>,
    terms: MemoStore<String, String>,
}

impl Default for TranslationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TranslationCache {
    pub fn new() -> Self {
        Self {
            text: MemoStore::new("text"),
            formula: MemoStore::new("formula"),
            table: MemoStore::new("table"),
            terms: MemoStore::new("term"),
        }
    }

    /// Prose and image-text translations.
    pub fn text(&self) -> &MemoStore<Fingerprint, String> {
        &self.text
    }

    pub fn formula(&self) -> &MemoStore<Fingerprint, String> {
        &self.formula
    }

    pub fn table(&self) -> &MemoStore<Fingerprint, Vec<Vec<String>>> {
        &self.table
    }

    /// Remember `source → target` as a term if `source` is short enough.
    pub fn remember_term(&self, source: &str, target: &str) {
        let source = source.trim();
        let target = target.trim();
        if source.is_empty() || target.is_empty() || source == target {
            return;
        }
        if source.split_whitespace().count() > MAX_TERM_WORDS {
            return;
        }
        self.terms.put(normalise_term(source), target.to_string());
    }

    /// Previously resolved translation of a short source string.
    pub fn recall_term(&self, source: &str) -> Option<String> {
        self.terms.peek(&normalise_term(source))
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    /// Hits across the three translation stores.
    pub fn hits(&self) -> u64 {
        self.text.hits() + self.formula.hits() + self.table.hits()
    }

    pub fn misses(&self) -> u64 {
        self.text.misses() + self.formula.misses() + self.table.misses()
    }

    /// Drop everything, e.g. between independent runs sharing a process.
    pub fn clear(&self) {
        self.text.clear();
        self.formula.clear();
        self.table.clear();
        self.terms.clear();
    }
}

/// Lower-cased, whitespace-collapsed key for term lookup.
pub fn normalise_term(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
