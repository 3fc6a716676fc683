//! Progress-callback trait for per-document and per-page translation events.
//!
//! Inject an [`Arc<dyn TranslationProgressCallback>`] via
//! [`crate::config::TranslationConfigBuilder::progress_callback`] to follow a
//! run as it extracts and translates each document. The CLI uses this to
//! drive its progress bar; a service could forward the events to a channel.
//!
//! # Example
//!
//! ```rust
//! use pdf_translate::{TranslationConfig, TranslationProgressCallback, TranslationStats};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter(AtomicUsize);
//!
//! impl TranslationProgressCallback for PageCounter {
//!     fn on_page_complete(&self, _page: usize, _total: usize, _stats: &TranslationStats) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = TranslationConfig::builder()
//!     .progress_callback(Arc::new(PageCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::TranslationStats;
use std::sync::Arc;

/// Called by the pipeline as it works through documents and pages.
///
/// Pages are translated concurrently, so `on_page_complete` may be called
/// from several tasks at once and out of page order. All methods default to
/// no-ops.
pub trait TranslationProgressCallback: Send + Sync {
    /// Called once a document has been extracted, before translation starts.
    fn on_document_start(&self, name: &str, total_pages: usize) {
        let _ = (name, total_pages);
    }

    /// Called when every block of one page has been translated (or fell back).
    ///
    /// `stats` covers that page only.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, stats: &TranslationStats) {
        let _ = (page_num, total_pages, stats);
    }

    /// Called when a document is fully translated.
    fn on_document_complete(&self, name: &str, stats: &TranslationStats) {
        let _ = (name, stats);
    }

    /// Called when a document is skipped because of a fatal per-document error.
    fn on_document_error(&self, name: &str, error: &str) {
        let _ = (name, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl TranslationProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::TranslationConfig`].
pub type ProgressCallback = Arc<dyn TranslationProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        pages: AtomicUsize,
        events: Mutex<Vec<String>>,
    }

    impl TranslationProgressCallback for Recorder {
        fn on_document_start(&self, name: &str, total_pages: usize) {
            self.events
                .lock()
                .unwrap()
                .push(format!("start {name} {total_pages}"));
        }

        fn on_page_complete(&self, _page: usize, _total: usize, _stats: &TranslationStats) {
            self.pages.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_error(&self, name: &str, error: &str) {
            self.events
                .lock()
                .unwrap()
                .push(format!("error {name}: {error}"));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_document_start("a.pdf", 3);
        cb.on_page_complete(1, 3, &TranslationStats::default());
        cb.on_document_complete("a.pdf", &TranslationStats::default());
        cb.on_document_error("b.pdf", "corrupt");
    }

    #[test]
    fn recorder_receives_events_through_arc_dyn() {
        let rec = Arc::new(Recorder::default());
        let cb: ProgressCallback = rec.clone();

        cb.on_document_start("paper.pdf", 2);
        cb.on_page_complete(2, 2, &TranslationStats::default());
        cb.on_page_complete(1, 2, &TranslationStats::default());
        cb.on_document_error("broken.pdf", "not a PDF");

        assert_eq!(rec.pages.load(Ordering::SeqCst), 2);
        let events = rec.events.lock().unwrap();
        assert_eq!(events[0], "start paper.pdf 2");
        assert!(events[1].contains("broken.pdf"));
    }
}
