//! # pdf-translate
//!
//! Translate PDF documents into bilingual reports with an LLM.
//!
//! ## Why this crate?
//!
//! Sending a whole PDF page to a model loses the structure that makes a
//! technical paper readable: formulas get "translated", tables come back as
//! prose, and paragraphs split by the layout engine are translated out of
//! context. This crate extracts positioned spans, classifies them into
//! text / formula / table / figure blocks, merges fragmented paragraphs,
//! and sends each kind through a prompt built for it. A term-aware cache
//! keeps repeated text and vocabulary consistent across a whole batch.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     resolve a file, a directory of PDFs, or a URL
//!  ├─ 2. Extract   spans, tables, figures via pdfium (spawn_blocking)
//!  ├─ 3. Segment   classify spans into blocks, attach captions, merge
//!  ├─ 4. Dispatch  cache → rate limit → LLM → clean / repair → fallback
//!  ├─ 5. Reflow    split a merged answer back across its source blocks
//!  └─ 6. Output    checkpoint JSON + bilingual Markdown report
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_translate::{translate, TranslationConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = TranslationConfig::builder()
//!         .terminology_dir("terminology")
//!         .domain("machine_learning")
//!         .build()?;
//!     let summary = translate("papers/", "output/", config).await?;
//!     for doc in &summary.completed {
//!         eprintln!("{}: {} translated, {} kept original",
//!             doc.title, doc.stats.total_translated(), doc.stats.total_fallbacks());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdftrans` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdf-translate = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod document;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod render;
pub mod terminology;
pub mod translate;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ClassifierConfig, FileConfig, RateLimitConfig, ReflowConfig, SegmenterConfig, TokenLimits,
    TranslationConfig, TranslationConfigBuilder,
};
pub use document::{load_checkpoint, save_checkpoint, BBox, Block, BlockContent, BlockKind, Document, Page, Stage};
pub use error::{CallError, TranslateError};
pub use output::{BatchSummary, KindCounts, TranslationOutput, TranslationStats, UsageStats};
pub use pipeline::dispatch::{Translation, TranslationDispatcher, TranslationStatus};
pub use pipeline::llm::{Completion, TranslationBackend};
pub use pipeline::reflow::AlignmentReflow;
pub use progress::{NoopProgressCallback, ProgressCallback, TranslationProgressCallback};
pub use terminology::{TerminologyEntry, TerminologyStore};
pub use translate::{translate, translate_sync, CancelFlag, Translator};
