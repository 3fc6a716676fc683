//! Per-content-type translation with cache, rate limit, retry and fallback.
//!
//! Every request follows the same path:
//!
//! ```text
//! PENDING ─▶ cache hit ───────────────────────────────▶ Cached
//!    │
//!    └─▶ rate wait ─▶ call (timeout, retries) ─▶ clean ─▶ Fresh
//!                              │
//!                              └─ error / unusable ───▶ Fallback(original)
//! ```
//!
//! Nothing is ever raised past this boundary: a failed call yields the
//! source content with [`TranslationStatus::Fallback`], which the caller
//! counts. Formulas in particular always fall back to the untouched source.

use crate::config::{TokenLimits, TranslationConfig};
use crate::error::{CallError, TranslateError};
use crate::output::UsageStats;
use crate::pipeline::cache::{Fingerprint, TranslationCache};
use crate::pipeline::llm::{call_with_retry, CallPolicy, TranslationBackend};
use crate::pipeline::postprocess::{clean_translation, parse_table_response, same_shape, TableOutcome};
use crate::pipeline::ratelimit::RateLimiter;
use crate::prompts::{Prompt, PromptBuilder, TerminologyContext};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// How a [`Translation`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationStatus {
    /// Served from the cache; no request issued.
    Cached,
    /// Returned by a successful call.
    Fresh,
    /// Nothing to translate; no request issued.
    Empty,
    /// The call failed or its answer was unusable; value is the source.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation<T = String> {
    pub value: T,
    pub status: TranslationStatus,
}

impl<T> Translation<T> {
    fn new(value: T, status: TranslationStatus) -> Self {
        Self { value, status }
    }

    pub fn is_fallback(&self) -> bool {
        self.status == TranslationStatus::Fallback
    }
}

#[derive(Debug, Clone, Copy)]
enum CallKind {
    Text,
    Formula,
    Table,
    ImageText,
}

impl CallKind {
    fn label(self) -> &'static str {
        match self {
            CallKind::Text => "text",
            CallKind::Formula => "formula",
            CallKind::Table => "table",
            CallKind::ImageText => "image text",
        }
    }
}

#[derive(Default)]
struct UsageCounters {
    total_requests: AtomicU64,
    text_requests: AtomicU64,
    formula_requests: AtomicU64,
    table_requests: AtomicU64,
    image_requests: AtomicU64,
    failed_calls: AtomicU64,
    table_repairs: AtomicU64,
    input_chars: AtomicU64,
    output_chars: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

/// Orchestrates prompt → call → cleanup for each content type.
pub struct TranslationDispatcher {
    backend: Arc<dyn TranslationBackend>,
    cache: Arc<TranslationCache>,
    limiter: Arc<RateLimiter>,
    prompts: PromptBuilder,
    policy: CallPolicy,
    limits: TokenLimits,
    usage: UsageCounters,
}

impl TranslationDispatcher {
    pub fn new(
        backend: Arc<dyn TranslationBackend>,
        cache: Arc<TranslationCache>,
        limiter: Arc<RateLimiter>,
        prompts: PromptBuilder,
        policy: CallPolicy,
        limits: TokenLimits,
    ) -> Self {
        Self {
            backend,
            cache,
            limiter,
            prompts,
            policy,
            limits,
            usage: UsageCounters::default(),
        }
    }

    /// Wire a dispatcher from the run configuration. Fails only on an
    /// invalid rate limit.
    pub fn from_config(
        config: &TranslationConfig,
        backend: Arc<dyn TranslationBackend>,
        cache: Arc<TranslationCache>,
    ) -> Result<Self, TranslateError> {
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit)?);
        Ok(Self::new(
            backend,
            cache,
            limiter,
            PromptBuilder::from_config(config),
            CallPolicy::from_config(config),
            config.max_tokens,
        ))
    }

    pub fn cache(&self) -> &Arc<TranslationCache> {
        &self.cache
    }

    pub fn prompts(&self) -> &PromptBuilder {
        &self.prompts
    }

    /// Translate prose. Successful short translations are also remembered
    /// as terms for later prompts.
    pub async fn translate_text(&self, text: &str, terms: &TerminologyContext) -> Translation {
        if text.trim().is_empty() {
            return Translation::new(String::new(), TranslationStatus::Empty);
        }
        let key = Fingerprint::of_text(text);
        if let Some(hit) = self.cache.text().get(&key) {
            return Translation::new(hit, TranslationStatus::Cached);
        }

        let prompt = self.prompts.text(text, terms);
        match self.call(CallKind::Text, &prompt, self.limits.text).await {
            Ok(raw) => match usable(clean_translation(&raw)) {
                Some(cleaned) => {
                    self.cache.text().put(key, cleaned.clone());
                    self.cache.remember_term(text, &cleaned);
                    Translation::new(cleaned, TranslationStatus::Fresh)
                }
                None => self.fallback_text(text, "text", &CallError::EmptyResponse),
            },
            Err(e) => self.fallback_text(text, "text", &e),
        }
    }

    /// Translate the natural-language parts of a formula. Any failure
    /// returns the formula unchanged.
    pub async fn translate_formula(&self, formula: &str) -> Translation {
        if formula.trim().is_empty() {
            return Translation::new(String::new(), TranslationStatus::Empty);
        }
        let key = Fingerprint::of_text(formula);
        if let Some(hit) = self.cache.formula().get(&key) {
            return Translation::new(hit, TranslationStatus::Cached);
        }

        let prompt = self.prompts.formula(formula);
        match self.call(CallKind::Formula, &prompt, self.limits.formula).await {
            Ok(raw) => match usable(clean_translation(&raw)) {
                Some(cleaned) => {
                    self.cache.formula().put(key, cleaned.clone());
                    Translation::new(cleaned, TranslationStatus::Fresh)
                }
                None => self.fallback_text(formula, "formula", &CallError::EmptyResponse),
            },
            Err(e) => self.fallback_text(formula, "formula", &e),
        }
    }

    /// Translate a table grid as JSON. Unparseable answers (after at most
    /// two repair passes) keep the original grid.
    pub async fn translate_table_data(&self, grid: &[Vec<String>]) -> Translation<Vec<Vec<String>>> {
        if grid.iter().flatten().all(|c| c.trim().is_empty()) {
            return Translation::new(grid.to_vec(), TranslationStatus::Empty);
        }
        let key = Fingerprint::of_grid(grid);
        if let Some(hit) = self.cache.table().get(&key) {
            return Translation::new(hit, TranslationStatus::Cached);
        }

        let prompt = self.prompts.table(grid);
        let raw = match self.call(CallKind::Table, &prompt, self.limits.table).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Table translation failed, keeping original: {}", e);
                return Translation::new(grid.to_vec(), TranslationStatus::Fallback);
            }
        };

        let (outcome, repairs) = parse_table_response(&raw, grid);
        if repairs > 0 {
            bump(&self.usage.table_repairs, 1);
            debug!("Table response parsed after {} repair pass(es)", repairs);
        }
        match outcome {
            TableOutcome::Parsed(parsed) => {
                if !same_shape(&parsed, grid) {
                    warn!(
                        "Translated table shape differs from source ({} rows vs {})",
                        parsed.len(),
                        grid.len()
                    );
                }
                self.cache.table().put(key, parsed.clone());
                Translation::new(parsed, TranslationStatus::Fresh)
            }
            TableOutcome::FallbackOriginal(original) => {
                warn!("Table response was not a valid grid, keeping original");
                Translation::new(original, TranslationStatus::Fallback)
            }
        }
    }

    /// Translate text found in or under a figure. No terminology context.
    pub async fn translate_image_text(&self, text: &str) -> Translation {
        if text.trim().is_empty() {
            return Translation::new(String::new(), TranslationStatus::Empty);
        }
        let key = Fingerprint::of_text(text);
        if let Some(hit) = self.cache.text().get(&key) {
            return Translation::new(hit, TranslationStatus::Cached);
        }

        let prompt = self.prompts.image_text(text);
        match self.call(CallKind::ImageText, &prompt, self.limits.image_text).await {
            Ok(raw) => match usable(clean_translation(&raw)) {
                Some(cleaned) => {
                    self.cache.text().put(key, cleaned.clone());
                    Translation::new(cleaned, TranslationStatus::Fresh)
                }
                None => self.fallback_text(text, "image text", &CallError::EmptyResponse),
            },
            Err(e) => self.fallback_text(text, "image text", &e),
        }
    }

    /// Snapshot of the outbound-call accounting so far.
    pub fn usage(&self) -> UsageStats {
        let u = &self.usage;
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        UsageStats {
            total_requests: get(&u.total_requests),
            text_requests: get(&u.text_requests),
            formula_requests: get(&u.formula_requests),
            table_requests: get(&u.table_requests),
            image_requests: get(&u.image_requests),
            cache_hits: self.cache.hits(),
            cache_misses: self.cache.misses(),
            failed_calls: get(&u.failed_calls),
            table_repairs: get(&u.table_repairs),
            input_chars: get(&u.input_chars),
            output_chars: get(&u.output_chars),
            input_tokens: get(&u.input_tokens),
            output_tokens: get(&u.output_tokens),
        }
    }

    async fn call(&self, kind: CallKind, prompt: &Prompt, max_tokens: usize) -> Result<String, CallError> {
        let report = call_with_retry(
            self.backend.as_ref(),
            &self.limiter,
            prompt,
            max_tokens,
            self.policy,
            kind.label(),
        )
        .await;

        let attempts = u64::from(report.attempts);
        bump(&self.usage.total_requests, attempts);
        let per_kind = match kind {
            CallKind::Text => &self.usage.text_requests,
            CallKind::Formula => &self.usage.formula_requests,
            CallKind::Table => &self.usage.table_requests,
            CallKind::ImageText => &self.usage.image_requests,
        };
        bump(per_kind, attempts);
        bump(&self.usage.input_chars, prompt.user.chars().count() as u64);

        match report.result {
            Ok(completion) => {
                bump(&self.usage.output_chars, completion.text.chars().count() as u64);
                bump(&self.usage.input_tokens, completion.input_tokens as u64);
                bump(&self.usage.output_tokens, completion.output_tokens as u64);
                Ok(completion.text)
            }
            Err(e) => {
                bump(&self.usage.failed_calls, 1);
                Err(e)
            }
        }
    }

    fn fallback_text(&self, original: &str, what: &str, err: &CallError) -> Translation {
        warn!("{} translation failed, keeping original: {}", what, err);
        Translation::new(original.to_string(), TranslationStatus::Fallback)
    }
}

fn usable(cleaned: String) -> Option<String> {
    (!cleaned.trim().is_empty()).then_some(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::pipeline::llm::Completion;
    use crate::prompts::TermPair;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::Duration;

    type Reply = Box<dyn Fn(&Prompt) -> Result<String, CallError> + Send + Sync>;

    struct Scripted {
        reply: Reply,
        calls: AtomicUsize,
        last_system: parking_lot::Mutex<String>,
    }

    impl Scripted {
        fn new(reply: impl Fn(&Prompt) -> Result<String, CallError> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                reply: Box::new(reply),
                calls: AtomicUsize::new(0),
                last_system: parking_lot::Mutex::new(String::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TranslationBackend for Scripted {
        async fn complete(&self, prompt: &Prompt, _: usize) -> Result<Completion, CallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_system.lock() = prompt.system.clone();
            (self.reply)(prompt).map(Completion::text)
        }
    }

    fn dispatcher(backend: Arc<Scripted>) -> TranslationDispatcher {
        TranslationDispatcher::new(
            backend,
            Arc::new(TranslationCache::new()),
            Arc::new(RateLimiter::new(&RateLimitConfig::default()).unwrap()),
            PromptBuilder::new("English", "Traditional Chinese", 20),
            CallPolicy {
                max_retries: 1,
                retry_backoff_ms: 1,
                timeout: Duration::from_secs(5),
            },
            TokenLimits::default(),
        )
    }

    fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[tokio::test]
    async fn second_identical_text_is_served_from_cache() {
        let stub = Scripted::new(|_| Ok("模型被訓練。".into()));
        let d = dispatcher(Arc::clone(&stub));
        let ctx = TerminologyContext::empty();

        let first = d.translate_text("Models are trained.", &ctx).await;
        let second = d.translate_text("Models are trained.", &ctx).await;
        assert_eq!(first.status, TranslationStatus::Fresh);
        assert_eq!(second.status, TranslationStatus::Cached);
        assert_eq!(first.value, second.value);
        assert_eq!(stub.calls(), 1);
        assert_eq!(d.usage().cache_hits, 1);
    }

    #[tokio::test]
    async fn cache_hit_ignores_terminology() {
        let stub = Scripted::new(|_| Ok("損失".into()));
        let d = dispatcher(Arc::clone(&stub));
        d.translate_text("loss", &TerminologyContext::empty()).await;
        let ctx = TerminologyContext::new(vec![TermPair::new("loss", "虧損")]);
        let again = d.translate_text("loss", &ctx).await;
        assert_eq!(again.value, "損失");
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn empty_text_issues_no_call() {
        let stub = Scripted::new(|_| Ok("x".into()));
        let d = dispatcher(Arc::clone(&stub));
        let t = d.translate_text("   ", &TerminologyContext::empty()).await;
        assert_eq!(t.value, "");
        assert_eq!(t.status, TranslationStatus::Empty);
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn response_is_cleaned_and_remembered_as_term() {
        let stub = Scripted::new(|_| Ok("```\nTranslation: 梯度下降\n```".into()));
        let d = dispatcher(Arc::clone(&stub));
        let t = d.translate_text("Gradient Descent", &TerminologyContext::empty()).await;
        assert_eq!(t.value, "梯度下降");
        assert_eq!(d.cache().recall_term("gradient descent").as_deref(), Some("梯度下降"));
    }

    #[tokio::test]
    async fn formula_failure_returns_original() {
        let stub = Scripted::new(|_| Err(CallError::Provider("HTTP 500".into())));
        let d = dispatcher(Arc::clone(&stub));
        let t = d.translate_formula("E=mc^2").await;
        assert_eq!(t.value, "E=mc^2");
        assert!(t.is_fallback());
        // one call plus one retry
        assert_eq!(stub.calls(), 2);
        assert_eq!(d.usage().failed_calls, 1);
        assert_eq!(d.usage().formula_requests, 2);
    }

    #[tokio::test]
    async fn text_failure_returns_original_and_is_not_cached() {
        let stub = Scripted::new(|_| Err(CallError::Timeout { secs: 60 }));
        let d = dispatcher(Arc::clone(&stub));
        let t = d.translate_text("They converge.", &TerminologyContext::empty()).await;
        assert_eq!(t.value, "They converge.");
        assert!(t.is_fallback());
        assert!(d.cache().text().is_empty());
    }

    #[tokio::test]
    async fn blank_answer_is_a_fallback() {
        let stub = Scripted::new(|_| Ok("```\n\n```".into()));
        let d = dispatcher(stub);
        let t = d.translate_image_text("Figure 1: Loss curve").await;
        assert!(t.is_fallback());
        assert_eq!(t.value, "Figure 1: Loss curve");
    }

    #[tokio::test]
    async fn table_with_trailing_comma_is_repaired() {
        let stub = Scripted::new(|_| {
            Ok("```json\n[[\"模型\", \"準確率\"], [\"BERT\", \"91.2\"],]\n```".into())
        });
        let d = dispatcher(Arc::clone(&stub));
        let source = grid(&[&["Model", "Accuracy"], &["BERT", "91.2"]]);
        let t = d.translate_table_data(&source).await;
        assert_eq!(t.status, TranslationStatus::Fresh);
        assert_eq!(t.value, grid(&[&["模型", "準確率"], &["BERT", "91.2"]]));
        assert_eq!(d.usage().table_repairs, 1);

        // identical table: no second call
        let again = d.translate_table_data(&source).await;
        assert_eq!(again.status, TranslationStatus::Cached);
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn unparseable_table_keeps_original() {
        let stub = Scripted::new(|_| Ok("Sorry, I can't do tables.".into()));
        let d = dispatcher(stub);
        let source = grid(&[&["a", "b"]]);
        let t = d.translate_table_data(&source).await;
        assert!(t.is_fallback());
        assert_eq!(t.value, source);
    }

    #[tokio::test]
    async fn terminology_reaches_the_prompt() {
        let stub = Scripted::new(|_| Ok("好".into()));
        let d = dispatcher(Arc::clone(&stub));
        let ctx = TerminologyContext::new(vec![TermPair::new("attention", "注意力")]);
        d.translate_text("Attention is all you need.", &ctx).await;
        assert!(stub.last_system.lock().contains("attention -> 注意力"));

        d.translate_image_text("attention map").await;
        assert!(!stub.last_system.lock().contains("注意力"));
    }

    #[tokio::test]
    async fn formula_and_text_caches_are_separate() {
        let stub = Scripted::new(|p| Ok(format!("T[{}]", p.user)));
        let d = dispatcher(Arc::clone(&stub));
        d.translate_text("x + y", &TerminologyContext::empty()).await;
        let f = d.translate_formula("x + y").await;
        assert_eq!(f.status, TranslationStatus::Fresh);
        assert_eq!(stub.calls(), 2);
    }
}
