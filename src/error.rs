//! Error types for the pdf-translate library.
//!
//! Two error types for two failure modes:
//!
//! * [`TranslateError`]: **Fatal**: the document (or the whole run) cannot
//!   proceed. Bad input file, corrupt PDF, missing credentials, invalid
//!   configuration. Returned as `Err(TranslateError)` from the entry points
//!   in [`crate::translate`].
//!
//! * [`CallError`]: **Non-fatal**: a single outbound LLM call failed
//!   (provider error, timeout, empty answer). It never leaves the
//!   dispatcher: the affected block falls back to its original content and
//!   the failure is counted in [`crate::output::TranslationStats`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf-translate library.
#[derive(Debug, Error)]
pub enum TranslateError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a file, a directory, or an HTTP(S) URL.
    #[error("Invalid input '{input}': not a file path, directory, or HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// A directory input contained no PDF files (or not the selected one).
    #[error("No PDF files found in '{dir}'")]
    NoPdfFound { dir: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// pdfium failed while reading the content of one page.
    #[error("Extraction failed for page {page}: {detail}")]
    ExtractionFailed { page: usize, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Checkpoint & terminology ──────────────────────────────────────────
    /// A checkpoint or terminology file could not be read.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A checkpoint JSON file does not match the document schema.
    #[error("Checkpoint '{path}' is malformed: {source}")]
    CheckpointMalformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A terminology CSV/JSON file could not be parsed.
    #[error("Terminology file '{path}' is malformed: {detail}")]
    TerminologyMalformed { path: PathBuf, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or config-file validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium, place the library in the working\n\
directory, or install it system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Run control ───────────────────────────────────────────────────────
    /// The batch was cancelled before this document started.
    #[error("Translation cancelled")]
    Cancelled,

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TranslateError {
    /// Whether this error stops a whole batch rather than one document.
    pub fn aborts_batch(&self) -> bool {
        matches!(
            self,
            TranslateError::ProviderNotConfigured { .. }
                | TranslateError::InvalidConfig(_)
                | TranslateError::PdfiumBindingFailed(_)
                | TranslateError::Cancelled
        )
    }
}

/// A non-fatal failure of one outbound LLM call.
///
/// Converted to fallback-to-original by the dispatcher; callers only ever
/// see it through counters and logs.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum CallError {
    /// The provider returned an error (network, 4xx/5xx, content filter).
    #[error("provider error: {0}")]
    Provider(String),

    /// The call did not finish within the configured budget.
    #[error("call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The provider answered with nothing usable.
    #[error("empty response")]
    EmptyResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_config_display() {
        let e = TranslateError::InvalidConfig("rate limit must be ≥ 1".into());
        assert!(e.to_string().contains("rate limit"));
    }

    #[test]
    fn provider_not_configured_display() {
        let e = TranslateError::ProviderNotConfigured {
            provider: "anthropic".into(),
            hint: "set ANTHROPIC_API_KEY".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("anthropic"), "got: {msg}");
        assert!(msg.contains("ANTHROPIC_API_KEY"), "got: {msg}");
    }

    #[test]
    fn only_setup_errors_abort_a_batch() {
        assert!(TranslateError::PdfiumBindingFailed("missing".into()).aborts_batch());
        assert!(!TranslateError::CorruptPdf {
            path: "a.pdf".into(),
            detail: "bad xref".into(),
        }
        .aborts_batch());
    }

    #[test]
    fn call_error_timeout_display() {
        let e = CallError::Timeout { secs: 60 };
        assert!(e.to_string().contains("60s"));
    }

    #[test]
    fn call_error_roundtrips_through_json() {
        let e = CallError::Provider("HTTP 503".into());
        let json = serde_json::to_string(&e).unwrap();
        let back: CallError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
