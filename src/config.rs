//! Configuration types for PDF translation.
//!
//! Every knob lives in [`TranslationConfig`], built via
//! [`TranslationConfigBuilder`]. The config is constructed once at startup
//! and passed by reference into every component constructor; nothing in the
//! library reads ambient global settings.
//!
//! Heuristic constants (formula detection, merge windows, reflow look-ahead)
//! sit in small nested structs so they can be tuned without touching the
//! algorithms that use them.
//!
//! A JSON file ([`FileConfig`]) may supply any subset of fields; the CLI
//! merges it over the defaults and lets explicit flags win.

use crate::error::TranslateError;
use crate::pipeline::llm::TranslationBackend;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Upper bound on `max_retries`; the backoff doubles per retry.
pub const MAX_RETRIES: u32 = 10;

/// Configuration for a translation run.
///
/// # Example
/// ```rust
/// use pdf_translate::TranslationConfig;
///
/// let config = TranslationConfig::builder()
///     .rate_limit_per_minute(30)
///     .concurrency(2)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct TranslationConfig {
    /// Language of the source PDF. Default: "English".
    pub source_language: String,

    /// Language to translate into. Default: "Traditional Chinese".
    pub target_language: String,

    /// Pages translated concurrently. Default: 4.
    ///
    /// Requests from all pages still pass through one shared rate limiter,
    /// so raising this only helps while the limiter has headroom.
    pub concurrency: usize,

    /// LLM model identifier. If None, the provider default is used.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed edgequake provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed translation backend. Takes precedence over everything
    /// else; used by tests and by callers with their own transport.
    pub backend: Option<Arc<dyn TranslationBackend>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Per-content-type output budgets.
    pub max_tokens: TokenLimits,

    /// Retries per call after the first attempt. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in ms, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. A timeout counts as a failed call. Default: 60.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    pub rate_limit: RateLimitConfig,
    pub classifier: ClassifierConfig,
    pub segmenter: SegmenterConfig,
    pub reflow: ReflowConfig,

    /// Upper bound on the characters of one merged text request. Default: 3000.
    ///
    /// Consecutive text blocks of a page are joined until the next block
    /// would cross this bound.
    pub max_group_chars: usize,

    /// Maximum terminology pairs embedded in one prompt. Default: 20.
    pub max_terms: usize,

    /// Minimum similarity score for approximate term matches. Default: 0.7.
    pub similarity_threshold: f32,

    /// Terminology domain filter (a terminology file stem, e.g. "machine_learning").
    pub domain: Option<String>,

    /// Directory holding terminology CSV/JSON files.
    pub terminology_dir: Option<PathBuf>,

    /// Candidate terms kept per document in extract-terms mode. Default: 50.
    pub extract_term_count: usize,

    /// Write figures as PNG next to the report. Default: true.
    pub save_images: bool,

    /// Prepend YAML front-matter to the Markdown report. Default: false.
    pub include_metadata: bool,

    /// Continue from an existing `<stem>_translation_data.json` instead of
    /// re-extracting. Default: false.
    pub resume: bool,

    /// Receives per-document and per-page events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            source_language: "English".into(),
            target_language: "Traditional Chinese".into(),
            concurrency: 4,
            model: None,
            provider_name: None,
            provider: None,
            backend: None,
            temperature: 0.1,
            max_tokens: TokenLimits::default(),
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            download_timeout_secs: 120,
            password: None,
            rate_limit: RateLimitConfig::default(),
            classifier: ClassifierConfig::default(),
            segmenter: SegmenterConfig::default(),
            reflow: ReflowConfig::default(),
            max_group_chars: 3000,
            max_terms: 20,
            similarity_threshold: 0.7,
            domain: None,
            terminology_dir: None,
            extract_term_count: 50,
            save_images: true,
            include_metadata: false,
            resume: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for TranslationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslationConfig")
            .field("source_language", &self.source_language)
            .field("target_language", &self.target_language)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("backend", &self.backend.as_ref().map(|_| "<dyn TranslationBackend>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("rate_limit", &self.rate_limit)
            .field("max_group_chars", &self.max_group_chars)
            .field("max_terms", &self.max_terms)
            .field("domain", &self.domain)
            .field("terminology_dir", &self.terminology_dir)
            .field("resume", &self.resume)
            .finish()
    }
}

impl TranslationConfig {
    /// Create a new builder for `TranslationConfig`.
    pub fn builder() -> TranslationConfigBuilder {
        TranslationConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`TranslationConfig`].
#[derive(Debug)]
pub struct TranslationConfigBuilder {
    config: TranslationConfig,
}

impl TranslationConfigBuilder {
    pub fn source_language(mut self, lang: impl Into<String>) -> Self {
        self.config.source_language = lang.into();
        self
    }

    pub fn target_language(mut self, lang: impl Into<String>) -> Self {
        self.config.target_language = lang.into();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn TranslationBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, limits: TokenLimits) -> Self {
        self.config.max_tokens = limits;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    /// Requests allowed per 60-second window.
    pub fn rate_limit_per_minute(mut self, k: usize) -> Self {
        self.config.rate_limit = RateLimitConfig {
            max_requests: k,
            window_secs: 60,
        };
        self
    }

    pub fn rate_limit(mut self, rl: RateLimitConfig) -> Self {
        self.config.rate_limit = rl;
        self
    }

    pub fn classifier(mut self, c: ClassifierConfig) -> Self {
        self.config.classifier = c;
        self
    }

    pub fn segmenter(mut self, s: SegmenterConfig) -> Self {
        self.config.segmenter = s;
        self
    }

    pub fn reflow(mut self, r: ReflowConfig) -> Self {
        self.config.reflow = r;
        self
    }

    pub fn max_group_chars(mut self, n: usize) -> Self {
        self.config.max_group_chars = n;
        self
    }

    pub fn max_terms(mut self, n: usize) -> Self {
        self.config.max_terms = n;
        self
    }

    pub fn similarity_threshold(mut self, t: f32) -> Self {
        self.config.similarity_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.config.domain = Some(domain.into());
        self
    }

    pub fn terminology_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.terminology_dir = Some(dir.into());
        self
    }

    pub fn extract_term_count(mut self, n: usize) -> Self {
        self.config.extract_term_count = n.max(1);
        self
    }

    pub fn save_images(mut self, v: bool) -> Self {
        self.config.save_images = v;
        self
    }

    pub fn include_metadata(mut self, v: bool) -> Self {
        self.config.include_metadata = v;
        self
    }

    pub fn resume(mut self, v: bool) -> Self {
        self.config.resume = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Merge a config file over the current values. Fields absent from the
    /// file are left as they are.
    pub fn file_config(mut self, file: &FileConfig) -> Self {
        let c = &mut self.config;
        if let Some(ref m) = file.model {
            c.model = Some(m.clone());
        }
        if let Some(ref p) = file.provider {
            c.provider_name = Some(p.clone());
        }
        if let Some(ref d) = file.default_domain {
            c.domain = Some(d.clone());
        }
        if let Some(ref dir) = file.terminology_dir {
            c.terminology_dir = Some(dir.clone());
        }
        if let Some(ref lang) = file.target_language {
            c.target_language = lang.clone();
        }
        if let Some(ref lang) = file.source_language {
            c.source_language = lang.clone();
        }
        if let Some(k) = file.rate_limit_per_minute {
            c.rate_limit = RateLimitConfig {
                max_requests: k,
                window_secs: 60,
            };
        }
        if let Some(n) = file.concurrency {
            c.concurrency = n;
        }
        if let Some(t) = file.temperature {
            c.temperature = t.clamp(0.0, 2.0);
        }
        if let Some(n) = file.max_retries {
            c.max_retries = n;
        }
        if let Some(secs) = file.api_timeout_secs {
            c.api_timeout_secs = secs;
        }
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<TranslationConfig, TranslateError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(TranslateError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.rate_limit.max_requests == 0 {
            return Err(TranslateError::InvalidConfig(
                "Rate limit must allow at least 1 request per window".into(),
            ));
        }
        if c.rate_limit.window_secs == 0 {
            return Err(TranslateError::InvalidConfig(
                "Rate-limit window must be ≥ 1 second".into(),
            ));
        }
        if c.max_group_chars == 0 {
            return Err(TranslateError::InvalidConfig(
                "max_group_chars must be ≥ 1".into(),
            ));
        }
        if c.max_terms == 0 {
            return Err(TranslateError::InvalidConfig("max_terms must be ≥ 1".into()));
        }
        if c.max_retries > MAX_RETRIES {
            return Err(TranslateError::InvalidConfig(format!(
                "max_retries must be ≤ {MAX_RETRIES}, got {}",
                c.max_retries
            )));
        }
        if c.segmenter.min_overlap == 0 || c.segmenter.min_overlap > c.segmenter.overlap_window {
            return Err(TranslateError::InvalidConfig(format!(
                "Merge overlap must satisfy 1 ≤ min_overlap ≤ overlap_window, got {} / {}",
                c.segmenter.min_overlap, c.segmenter.overlap_window
            )));
        }
        if c.segmenter.separator.is_empty() {
            return Err(TranslateError::InvalidConfig(
                "Paragraph separator must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Nested configs ───────────────────────────────────────────────────────

/// Output-token budgets per content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenLimits {
    pub text: usize,
    pub formula: usize,
    pub table: usize,
    pub image_text: usize,
}

impl Default for TokenLimits {
    fn default() -> Self {
        Self {
            text: 4000,
            formula: 1000,
            table: 2000,
            image_text: 1000,
        }
    }
}

/// Sliding-window request limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window. Must be ≥ 1. Default: 50.
    pub max_requests: usize,
    /// Window length in seconds. Default: 60.
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 50,
            window_secs: 60,
        }
    }
}

/// Constants for the span classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Any one of these marks a span as a formula.
    pub math_symbols: Vec<char>,
    /// Plain operators; a formula needs several distinct ones.
    pub operators: Vec<char>,
    /// Distinct operators needed in a short span. Default: 4.
    pub min_distinct_operators: usize,
    /// Spans at least this long (chars) are never formulas by operator count. Default: 100.
    pub short_span_chars: usize,
    /// LaTeX environment/delimiter markers.
    pub latex_delimiters: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            math_symbols: "∫∑∏√≈≠≤≥±∞∂∇∆∈∉∩∪".chars().collect(),
            operators: "=+-*/^()[]{}".chars().collect(),
            min_distinct_operators: 4,
            short_span_chars: 100,
            latex_delimiters: vec![
                r"\begin{equation}".into(),
                r"\begin{align}".into(),
                r"\begin{eqnarray}".into(),
                "$$".into(),
                r"\[".into(),
            ],
        }
    }
}

/// Constants for block segmentation and merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmenterConfig {
    /// Characters examined at the tail/head of adjacent blocks. Default: 20.
    pub overlap_window: usize,
    /// Shortest tail/head overlap that counts as a continuation. Default: 8.
    pub min_overlap: usize,
    /// Prefix length (chars) of the dedup fingerprint. Default: 100.
    pub fingerprint_chars: usize,
    /// Paragraph separator used for merging and reflow. Default: "\n\n".
    pub separator: String,
    /// Max vertical distance (pt) between a caption and its figure/table. Default: 50.
    pub caption_distance: f32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            overlap_window: 20,
            min_overlap: 8,
            fingerprint_chars: 100,
            separator: "\n\n".into(),
            caption_distance: 50.0,
        }
    }
}

/// Constants for proportional reflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflowConfig {
    /// Max characters a cut may move to reach a break. Default: 20.
    pub lookahead: usize,
}

impl Default for ReflowConfig {
    fn default() -> Self {
        Self { lookahead: 20 }
    }
}

// ── Config file ──────────────────────────────────────────────────────────

/// On-disk JSON configuration. Every field is optional.
///
/// ```json
/// { "pdf_dir": "pdfs", "output_dir": "output",
///   "terminology_dir": "terminology", "model": "claude-3-5-sonnet-latest",
///   "default_domain": "machine_learning", "rate_limit_per_minute": 50 }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub pdf_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub terminology_dir: Option<PathBuf>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub default_domain: Option<String>,
    pub source_language: Option<String>,
    pub target_language: Option<String>,
    pub rate_limit_per_minute: Option<usize>,
    pub concurrency: Option<usize>,
    pub temperature: Option<f32>,
    pub max_retries: Option<u32>,
    pub api_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Read and parse a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TranslateError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| TranslateError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&text).map_err(|e| {
            TranslateError::InvalidConfig(format!("{}: {}", path.display(), e))
        })
    }
}
