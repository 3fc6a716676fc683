//! Result types returned by the translation entry points.
//!
//! [`TranslationStats`] is the per-document summary that makes silent
//! degradation visible: every block that fell back to its original content
//! is counted, even though no error is raised for it.

use crate::document::{BlockKind, Document};
use crate::error::TranslateError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Per-content-type success/fallback counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounts {
    pub translated: usize,
    pub fallback: usize,
}

impl KindCounts {
    pub fn total(&self) -> usize {
        self.translated + self.fallback
    }

    pub(crate) fn record(&mut self, ok: bool) {
        if ok {
            self.translated += 1;
        } else {
            self.fallback += 1;
        }
    }

    fn absorb(&mut self, other: &KindCounts) {
        self.translated += other.translated;
        self.fallback += other.fallback;
    }
}

/// Per-document translation summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranslationStats {
    pub total_pages: usize,
    pub text_blocks: KindCounts,
    pub formulas: KindCounts,
    pub tables: KindCounts,
    pub images: KindCounts,
    pub captions: KindCounts,
    /// Merged text groups sent as one request.
    pub text_groups: usize,
    /// Groups whose answer needed proportional reflow.
    pub proportional_reflows: usize,
    pub extract_duration_ms: u64,
    pub translate_duration_ms: u64,
}

impl TranslationStats {
    /// Items that fell back to their original content.
    pub fn total_fallbacks(&self) -> usize {
        self.text_blocks.fallback
            + self.formulas.fallback
            + self.tables.fallback
            + self.images.fallback
            + self.captions.fallback
    }

    pub fn total_translated(&self) -> usize {
        self.text_blocks.translated
            + self.formulas.translated
            + self.tables.translated
            + self.images.translated
            + self.captions.translated
    }

    /// Recount a document translated by an earlier run. A payload whose
    /// translation equals its source counts as kept original; request
    /// grouping is not recorded in the checkpoint and stays zero.
    pub fn from_document(doc: &Document) -> Self {
        let mut stats = Self {
            total_pages: doc.pages.len(),
            ..Default::default()
        };
        for block in doc.blocks() {
            let counts = match block.kind() {
                BlockKind::Text => Some(&mut stats.text_blocks),
                BlockKind::Formula => Some(&mut stats.formulas),
                BlockKind::Image => Some(&mut stats.images),
                BlockKind::Table => None,
            };
            match counts {
                Some(counts) => {
                    if let Some(t) = block.translated_text() {
                        counts.record(Some(t) != block.source_text());
                    }
                }
                None => {
                    if let Some(cells) = block.translated_cells() {
                        stats.tables.record(Some(cells) != block.cells());
                    }
                }
            }
            if let Some(t) = block.translated_caption() {
                stats.captions.record(Some(t) != block.caption());
            }
        }
        stats
    }

    pub(crate) fn merge(&mut self, other: &TranslationStats) {
        self.text_blocks.absorb(&other.text_blocks);
        self.formulas.absorb(&other.formulas);
        self.tables.absorb(&other.tables);
        self.images.absorb(&other.images);
        self.captions.absorb(&other.captions);
        self.text_groups += other.text_groups;
        self.proportional_reflows += other.proportional_reflows;
    }
}

/// Outbound-call accounting for a whole run, shared by all documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    /// Requests actually sent to the provider (retries included).
    pub total_requests: u64,
    pub text_requests: u64,
    pub formula_requests: u64,
    pub table_requests: u64,
    pub image_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub failed_calls: u64,
    pub table_repairs: u64,
    pub input_chars: u64,
    pub output_chars: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One translated document plus where its artefacts were written.
#[derive(Debug, Clone)]
pub struct TranslationOutput {
    pub document: Document,
    pub stats: TranslationStats,
    pub checkpoint_path: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
}

/// Outcome of a batch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub completed: Vec<DocumentSummary>,
    pub failed: Vec<FailedDocument>,
    /// Documents never started because the batch was cancelled.
    pub skipped: Vec<PathBuf>,
    pub usage: UsageStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub source: PathBuf,
    pub title: String,
    pub stats: TranslationStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedDocument {
    pub source: PathBuf,
    pub error: String,
}

/// Write `bytes` to `path` via a sibling temp file and a rename, so readers
/// never observe a half-written file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), TranslateError> {
    let fail = |e| TranslateError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(fail)?;
        }
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, bytes).await.map_err(fail)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(fail)?;
    Ok(())
}
