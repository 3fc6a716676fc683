//! Public entry points: extract, translate, batch, and term extraction.
//!
//! A [`Translator`] owns one run's shared state: the dispatcher (and with
//! it the cache and the rate limiter), the terminology resolver, and the
//! extractor. Documents share that state, so a header translated in the
//! first PDF is a cache hit in the second.
//!
//! ## Document flow
//!
//! ```text
//! PDF ─▶ extract (spawn_blocking) ─▶ segment + merge per page ─▶ checkpoint
//!     ─▶ pages concurrently: text groups ─▶ reflow, formulas, tables,
//!        image text, captions ─▶ checkpoint ─▶ Markdown report
//! ```
//!
//! Only setup failures and whole-document failures surface as
//! [`TranslateError`]; everything per block degrades to the source content
//! and is counted in [`TranslationStats`].

use crate::config::TranslationConfig;
use crate::document::{load_checkpoint, save_checkpoint, Block, BlockKind, Document, Page, Stage};
use crate::error::TranslateError;
use crate::output::{
    write_atomic, BatchSummary, DocumentSummary, FailedDocument, TranslationOutput,
    TranslationStats, UsageStats,
};
use crate::pipeline::cache::TranslationCache;
use crate::pipeline::classify::ContentClassifier;
use crate::pipeline::dispatch::TranslationDispatcher;
use crate::pipeline::extract::{extract_pdf, PdfExtractor, PdfiumExtractor};
use crate::pipeline::input::{self, validate_pdf};
use crate::pipeline::llm::resolve_backend;
use crate::pipeline::reflow::{AlignmentReflow, ReflowPath};
use crate::pipeline::segment::BlockSegmenter;
use crate::prompts::TerminologyContext;
use crate::render;
use crate::terminology::{
    extract_candidate_terms, save_terms, FuzzySimilarity, TermResolver, TerminologyEntry,
    TerminologyStore,
};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Name of the per-batch summary written next to the reports.
pub const SUMMARY_FILE: &str = "translation_summary.json";

/// Name of the generated term list in extract-terms mode.
pub const EXTRACTED_TERMS_FILE: &str = "extracted_terms.json";

/// Cooperative cancellation for batches, checked between documents.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Paths of the files written for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub checkpoint: PathBuf,
    pub report: PathBuf,
    /// Directory name (relative to the output dir) holding extracted figures.
    pub image_dir: String,
}

impl ArtifactPaths {
    pub fn for_pdf(pdf: &Path, output_dir: &Path) -> Self {
        let stem = document_stem(pdf);
        Self {
            checkpoint: output_dir.join(format!("{stem}_translation_data.json")),
            report: output_dir.join(format!("{stem}_report.md")),
            image_dir: format!("{stem}_images"),
        }
    }
}

fn document_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "document".to_string())
}

/// One translation run.
pub struct Translator {
    config: TranslationConfig,
    dispatcher: Arc<TranslationDispatcher>,
    resolver: TermResolver,
    segmenter: BlockSegmenter,
    reflow: AlignmentReflow,
    extractor: Arc<dyn PdfExtractor>,
}

impl Translator {
    /// Resolve the backend and load terminology.
    ///
    /// # Errors
    /// Missing credentials, an invalid rate limit, or an unreadable
    /// terminology file. All are fatal before any document is touched.
    pub async fn from_config(config: TranslationConfig) -> Result<Self, TranslateError> {
        let backend = resolve_backend(&config)?;
        let cache = Arc::new(TranslationCache::new());
        let dispatcher = Arc::new(TranslationDispatcher::from_config(&config, backend, cache)?);

        let store = match config.terminology_dir {
            Some(ref dir) => TerminologyStore::load_dir(dir).await?,
            None => TerminologyStore::new(),
        };

        let segmenter = BlockSegmenter::new(
            ContentClassifier::new(config.classifier.clone()),
            config.segmenter.clone(),
        );
        let reflow = AlignmentReflow::from_config(&config.segmenter.separator, &config.reflow);
        let extractor: Arc<dyn PdfExtractor> = Arc::new(PdfiumExtractor::new(
            config.password.clone(),
            config.save_images,
        ));

        let mut translator = Self {
            resolver: TermResolver::empty(config.max_terms),
            config,
            dispatcher,
            segmenter,
            reflow,
            extractor,
        };
        translator.install_terminology(store);
        Ok(translator)
    }

    /// Replace the PDF extractor.
    pub fn with_extractor(mut self, extractor: Arc<dyn PdfExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Replace the terminology store.
    pub fn with_terminology(mut self, store: TerminologyStore) -> Self {
        self.install_terminology(store);
        self
    }

    fn install_terminology(&mut self, store: TerminologyStore) {
        let mut resolver = TermResolver::new(Arc::new(store.clone()), self.config.max_terms)
            .with_domain(self.config.domain.clone());
        if !store.is_empty() {
            info!(
                "Terminology: {} entries across {} domain(s)",
                store.len(),
                store.domains().len()
            );
            resolver = resolver.with_similarity(
                Arc::new(FuzzySimilarity::new(&store)),
                self.config.similarity_threshold,
            );
        }
        self.resolver = resolver;
    }

    pub fn config(&self) -> &TranslationConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &TranslationDispatcher {
        &self.dispatcher
    }

    /// Outbound-call accounting since this translator was created.
    pub fn usage(&self) -> UsageStats {
        self.dispatcher.usage()
    }

    // ── Extraction ───────────────────────────────────────────────────────

    /// Extract and segment a PDF.
    ///
    /// With `output_dir` set (and image saving enabled) figures are written
    /// as `<stem>_images/page{p}_img{i}.png` and their blocks reference that
    /// relative path.
    pub async fn extract(
        &self,
        pdf: &Path,
        output_dir: Option<&Path>,
    ) -> Result<Document, TranslateError> {
        let mut raw = extract_pdf(Arc::clone(&self.extractor), pdf).await?;

        if let (Some(out), true) = (output_dir, self.config.save_images) {
            let subdir = ArtifactPaths::for_pdf(pdf, out).image_dir;
            for page in &mut raw.pages {
                for (i, img) in page.images.iter_mut().enumerate() {
                    if img.bytes.is_empty() || img.image_path.is_some() {
                        continue;
                    }
                    let name = format!("page{}_img{}.png", img.page_number, i);
                    write_atomic(&out.join(&subdir).join(&name), &img.bytes).await?;
                    img.image_path = Some(format!("{subdir}/{name}"));
                }
            }
        }

        let pages: Vec<Page> = raw
            .pages
            .iter()
            .map(|p| {
                let blocks = self.segmenter.merge_adjacent(self.segmenter.segment(p));
                Page::new(p.page_number, blocks)
            })
            .collect();

        let title = raw
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| document_stem(pdf));
        let doc = Document::new(title, pages);
        debug!(
            "Extracted '{}': {} pages, {} text, {} formula, {} table, {} image blocks",
            doc.title,
            doc.pages.len(),
            doc.count(BlockKind::Text),
            doc.count(BlockKind::Formula),
            doc.count(BlockKind::Table),
            doc.count(BlockKind::Image)
        );
        Ok(doc)
    }

    // ── Translation ──────────────────────────────────────────────────────

    /// Translate every untranslated block of `doc`.
    ///
    /// Pages run concurrently (bounded by `config.concurrency`) and are
    /// put back in page order afterwards. Already-translated blocks are left
    /// alone, so a partially translated checkpoint resumes where it stopped.
    pub async fn translate_document(&self, mut doc: Document) -> (Document, TranslationStats) {
        let pages = std::mem::take(&mut doc.pages);
        let total_pages = pages.len();

        let mut done: Vec<(Page, TranslationStats)> = stream::iter(pages.into_iter().map(move |page| {
            async move {
                let (page, stats) = self.translate_page(page).await;
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_page_complete(page.page_num, total_pages, &stats);
                }
                (page, stats)
            }
        }))
        .buffer_unordered(self.config.concurrency)
        .collect()
        .await;
        done.sort_by_key(|(page, _)| page.page_num);

        let mut stats = TranslationStats {
            total_pages,
            ..Default::default()
        };
        doc.pages = done
            .into_iter()
            .map(|(page, page_stats)| {
                stats.merge(&page_stats);
                page
            })
            .collect();
        doc.sync_media();
        doc.stage = Stage::Translated;
        (doc, stats)
    }

    async fn translate_page(&self, mut page: Page) -> (Page, TranslationStats) {
        let mut stats = TranslationStats::default();

        for group in self.text_groups(&page.blocks) {
            self.translate_group(&mut page.blocks, &group, &mut stats)
                .await;
        }

        for block in page.blocks.iter_mut() {
            self.translate_block(block, &mut stats).await;
            self.translate_caption(block, &mut stats).await;
        }

        debug!(
            "Page {}: {} translated, {} fell back",
            page.page_num,
            stats.total_translated(),
            stats.total_fallbacks()
        );
        (page, stats)
    }

    /// Runs of consecutive untranslated text blocks, each run cut so one
    /// request stays within `max_group_chars` (a single oversized block
    /// still forms its own group).
    fn text_groups(&self, blocks: &[Block]) -> Vec<Vec<usize>> {
        let sep_len = self.reflow.separator().chars().count();
        let mut groups = Vec::new();
        let mut current: Vec<usize> = Vec::new();
        let mut size = 0;

        for (i, block) in blocks.iter().enumerate() {
            if block.kind() != BlockKind::Text || block.is_translated() {
                if !current.is_empty() {
                    groups.push(std::mem::take(&mut current));
                    size = 0;
                }
                continue;
            }
            let len = block.source_text().map_or(0, |t| t.chars().count());
            if !current.is_empty() && size + sep_len + len > self.config.max_group_chars {
                groups.push(std::mem::take(&mut current));
                size = 0;
            }
            if !current.is_empty() {
                size += sep_len;
            }
            size += len;
            current.push(i);
        }
        if !current.is_empty() {
            groups.push(current);
        }
        groups
    }

    /// One request for the whole group, then reflow the answer back.
    async fn translate_group(
        &self,
        blocks: &mut [Block],
        group: &[usize],
        stats: &mut TranslationStats,
    ) {
        let units: Vec<String> = group
            .iter()
            .map(|&i| blocks[i].source_text().unwrap_or_default().to_string())
            .collect();
        let joined = units.join(self.reflow.separator());
        let terms = self.resolver.context_for(&joined, self.dispatcher.cache());
        let translation = self.dispatcher.translate_text(&joined, &terms).await;
        stats.text_groups += 1;

        if translation.is_fallback() {
            for (&i, unit) in group.iter().zip(&units) {
                blocks[i].set_translation(unit.clone());
                stats.text_blocks.record(false);
            }
            return;
        }

        let reflowed = self.reflow.reflow(&translation.value, &units);
        if reflowed.path == ReflowPath::Proportional {
            debug!(
                "{} blocks realigned proportionally ({} chars)",
                units.len(),
                translation.value.chars().count()
            );
            stats.proportional_reflows += 1;
        }
        for (&i, piece) in group.iter().zip(reflowed.pieces) {
            blocks[i].set_translation(piece.trim());
            stats.text_blocks.record(true);
        }
    }

    async fn translate_block(&self, block: &mut Block, stats: &mut TranslationStats) {
        if block.is_translated() {
            return;
        }
        match block.kind() {
            // Handled in groups.
            BlockKind::Text => {}
            BlockKind::Formula => {
                let source = block.source_text().unwrap_or_default().to_string();
                let t = self.dispatcher.translate_formula(&source).await;
                stats.formulas.record(!t.is_fallback());
                block.set_translation(t.value);
            }
            BlockKind::Table => {
                let grid = block.cells().map(<[Vec<String>]>::to_vec).unwrap_or_default();
                let t = self.dispatcher.translate_table_data(&grid).await;
                stats.tables.record(!t.is_fallback());
                block.set_translated_cells(t.value);
            }
            BlockKind::Image => {
                let source = block.source_text().unwrap_or_default().to_string();
                if source.trim().is_empty() {
                    return;
                }
                let t = self.dispatcher.translate_image_text(&source).await;
                stats.images.record(!t.is_fallback());
                block.set_translation(t.value);
            }
        }
    }

    async fn translate_caption(&self, block: &mut Block, stats: &mut TranslationStats) {
        if block.translated_caption().is_some() {
            return;
        }
        let Some(caption) = block.caption().map(str::to_string) else {
            return;
        };
        let t = self.dispatcher.translate_image_text(&caption).await;
        stats.captions.record(!t.is_fallback());
        block.set_translated_caption(t.value);
    }

    // ── Files & batches ──────────────────────────────────────────────────

    /// Extract (or resume), translate, and write checkpoint and report for
    /// one PDF.
    pub async fn translate_file(
        &self,
        pdf: &Path,
        output_dir: &Path,
    ) -> Result<TranslationOutput, TranslateError> {
        let paths = ArtifactPaths::for_pdf(pdf, output_dir);
        let cb = self.config.progress_callback.as_ref();

        let extract_start = Instant::now();
        let doc = match self.resume_checkpoint(&paths.checkpoint).await {
            Some(doc) => doc,
            None => {
                validate_pdf(pdf)?;
                let doc = self.extract(pdf, Some(output_dir)).await?;
                save_checkpoint(&doc, &paths.checkpoint).await?;
                doc
            }
        };
        let extract_duration_ms = extract_start.elapsed().as_millis() as u64;

        if let Some(cb) = cb {
            cb.on_document_start(&doc.title, doc.pages.len());
        }

        let translate_start = Instant::now();
        let (doc, mut stats) = if doc.stage == Stage::Translated {
            info!("'{}' already translated, rewriting outputs only", doc.title);
            let stats = TranslationStats::from_document(&doc);
            (doc, stats)
        } else {
            self.translate_document(doc).await
        };
        stats.extract_duration_ms = extract_duration_ms;
        stats.translate_duration_ms = translate_start.elapsed().as_millis() as u64;

        save_checkpoint(&doc, &paths.checkpoint).await?;
        let report = render::render_report(&doc, &stats, self.config.include_metadata);
        write_atomic(&paths.report, report.as_bytes()).await?;

        if stats.total_fallbacks() > 0 {
            warn!(
                "'{}': {} item(s) kept their original text",
                doc.title,
                stats.total_fallbacks()
            );
        }
        info!(
            "Translated '{}': {} pages, {} items, {}ms",
            doc.title, stats.total_pages, stats.total_translated(), stats.translate_duration_ms
        );
        if let Some(cb) = cb {
            cb.on_document_complete(&doc.title, &stats);
        }

        Ok(TranslationOutput {
            document: doc,
            stats,
            checkpoint_path: Some(paths.checkpoint),
            report_path: Some(paths.report),
        })
    }

    async fn resume_checkpoint(&self, path: &Path) -> Option<Document> {
        if !self.config.resume || !path.exists() {
            return None;
        }
        match load_checkpoint(path).await {
            Ok(doc) => {
                info!("Resuming from {} (stage {:?})", path.display(), doc.stage);
                Some(doc)
            }
            Err(e) => {
                warn!("Ignoring checkpoint: {}", e);
                None
            }
        }
    }

    /// Translate each PDF in turn.
    ///
    /// A failing document is recorded and skipped; setup-level errors
    /// (see [`TranslateError::aborts_batch`]) stop the batch. Cancellation
    /// is checked before each document. The summary is also written to
    /// `output_dir/translation_summary.json`.
    pub async fn translate_batch(
        &self,
        pdfs: &[PathBuf],
        output_dir: &Path,
        cancel: &CancelFlag,
    ) -> Result<BatchSummary, TranslateError> {
        let mut summary = BatchSummary::default();

        for (i, pdf) in pdfs.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!("Cancelled: skipping {} remaining document(s)", pdfs.len() - i);
                summary.skipped.extend(pdfs[i..].iter().cloned());
                break;
            }
            info!("[{}/{}] {}", i + 1, pdfs.len(), pdf.display());

            match self.translate_file(pdf, output_dir).await {
                Ok(out) => summary.completed.push(DocumentSummary {
                    source: pdf.clone(),
                    title: out.document.title,
                    stats: out.stats,
                }),
                Err(e) if e.aborts_batch() => return Err(e),
                Err(e) => {
                    warn!("Skipping {}: {}", pdf.display(), e);
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_document_error(&document_stem(pdf), &e.to_string());
                    }
                    summary.failed.push(FailedDocument {
                        source: pdf.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        summary.usage = self.usage();
        let json = serde_json::to_vec_pretty(&summary)
            .map_err(|e| TranslateError::Internal(format!("summary serialisation: {e}")))?;
        write_atomic(&output_dir.join(SUMMARY_FILE), &json).await?;
        Ok(summary)
    }

    // ── Terminology extraction ───────────────────────────────────────────

    /// Collect candidate terms from each PDF, translate them, and save them
    /// to `<dir>/extracted_terms.json`.
    ///
    /// `dir` defaults to the configured terminology directory, else
    /// `output_dir`. Documents that fail to extract are skipped.
    pub async fn extract_terms(
        &self,
        pdfs: &[PathBuf],
        output_dir: &Path,
    ) -> Result<(PathBuf, Vec<TerminologyEntry>), TranslateError> {
        let mut entries: Vec<TerminologyEntry> = Vec::new();
        let none = TerminologyContext::empty();

        for pdf in pdfs {
            let name = pdf
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let doc = match validate_pdf(pdf) {
                Ok(()) => self.extract(pdf, None).await,
                Err(e) => Err(e),
            };
            let doc = match doc {
                Ok(doc) => doc,
                Err(e) if e.aborts_batch() => return Err(e),
                Err(e) => {
                    warn!("Skipping {}: {}", pdf.display(), e);
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_document_error(&name, &e.to_string());
                    }
                    continue;
                }
            };

            let text: Vec<&str> = doc
                .blocks()
                .filter(|b| b.kind() == BlockKind::Text)
                .filter_map(Block::source_text)
                .collect();
            let candidates = extract_candidate_terms(&text.join("\n"), self.config.extract_term_count);
            info!("{}: {} candidate terms", name, candidates.len());

            for (term, count) in candidates {
                let t = self.dispatcher.translate_text(&term, &none).await;
                if t.is_fallback() || t.value.trim().is_empty() {
                    debug!("No translation for '{}' ({} occurrences)", term, count);
                    continue;
                }
                let mut entry = TerminologyEntry::new(term, t.value);
                entry.source_pdf = Some(name.clone());
                entries.push(entry);
            }
        }

        let dir = self
            .config
            .terminology_dir
            .clone()
            .unwrap_or_else(|| output_dir.to_path_buf());
        let path = dir.join(EXTRACTED_TERMS_FILE);
        save_terms(&path, &entries).await?;
        info!("Saved {} terms to {}", entries.len(), path.display());
        Ok((path, entries))
    }
}

/// Translate a PDF file, directory, or URL into `output_dir`.
///
/// This is the one-call entry point: it resolves the input, builds a
/// [`Translator`] and runs the batch without cancellation.
pub async fn translate(
    input_str: impl AsRef<str>,
    output_dir: impl AsRef<Path>,
    config: TranslationConfig,
) -> Result<BatchSummary, TranslateError> {
    let input_str = input_str.as_ref();
    info!("Starting translation: {}", input_str);
    let resolved = input::resolve_input(input_str, None, config.download_timeout_secs).await?;
    let translator = Translator::from_config(config).await?;
    translator
        .translate_batch(resolved.pdfs(), output_dir.as_ref(), &CancelFlag::new())
        .await
}

/// Synchronous wrapper around [`translate`].
///
/// Creates a temporary tokio runtime internally.
pub fn translate_sync(
    input_str: impl AsRef<str>,
    output_dir: impl AsRef<Path>,
    config: TranslationConfig,
) -> Result<BatchSummary, TranslateError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| TranslateError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(translate(input_str, output_dir, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::BBox;
    use crate::error::CallError;
    use crate::pipeline::llm::{Completion, TranslationBackend};
    use crate::prompts::Prompt;
    use async_trait::async_trait;

    /// Answers every prompt with a fixed string.
    struct Fixed(&'static str);

    #[async_trait]
    impl TranslationBackend for Fixed {
        async fn complete(&self, _: &Prompt, _: usize) -> Result<Completion, CallError> {
            Ok(Completion::text(self.0))
        }
    }

    async fn translator(max_group_chars: usize) -> Translator {
        let config = TranslationConfig::builder()
            .backend(Arc::new(Fixed("譯")))
            .max_group_chars(max_group_chars)
            .build()
            .unwrap();
        Translator::from_config(config).await.unwrap()
    }

    fn text(s: &str) -> Block {
        Block::text(1, BBox::default(), s)
    }

    #[tokio::test]
    async fn groups_break_at_non_text_and_size() {
        let t = translator(12).await;
        let blocks = vec![
            text("aaaa"),
            text("bbbb"),
            text("cccc"),
            Block::formula(1, BBox::default(), "x=1"),
            text("dddddddddddddddd"),
            text("e"),
        ];
        // "aaaa\n\nbbbb" is 10 chars; adding "\n\ncccc" would reach 16.
        assert_eq!(t.text_groups(&blocks), vec![vec![0, 1], vec![2], vec![4], vec![5]]);
    }

    #[tokio::test]
    async fn translated_blocks_are_not_regrouped() {
        let t = translator(3000).await;
        let mut done = text("a");
        done.set_translation("甲");
        let blocks = vec![text("x"), done, text("y")];
        assert_eq!(t.text_groups(&blocks), vec![vec![0], vec![2]]);
    }

    #[test]
    fn artifact_paths_use_stem() {
        let p = ArtifactPaths::for_pdf(Path::new("/in/paper.pdf"), Path::new("/out"));
        assert_eq!(p.checkpoint, PathBuf::from("/out/paper_translation_data.json"));
        assert_eq!(p.report, PathBuf::from("/out/paper_report.md"));
        assert_eq!(p.image_dir, "paper_images");
    }

    #[test]
    fn cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());
    }
}
