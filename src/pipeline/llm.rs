//! LLM interaction: the backend seam, provider resolution and the retry loop.
//!
//! Everything above this module talks to a [`TranslationBackend`]: one
//! prompt in, one completion out. [`ProviderBackend`] adapts any
//! `edgequake_llm` provider to that trait; tests plug in scripted stubs.
//!
//! ## Retry Strategy
//!
//! Provider errors (429 / 5xx, network) are transient and frequent under
//! concurrent load. [`call_with_retry`] waits `retry_backoff_ms * 2^(n-1)`
//! before retry `n`: with 500 ms base and 2 retries the sequence is
//! 500 ms → 1 s. Every attempt passes through the rate limiter and runs
//! under `tokio::time::timeout`; a timeout counts as a failed attempt.

use crate::config::TranslationConfig;
use crate::error::{CallError, TranslateError};
use crate::pipeline::ratelimit::RateLimiter;
use crate::prompts::Prompt;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Model used when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// One successful completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// The LLM translation capability.
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    /// Send one prompt; `max_tokens` caps the answer length.
    async fn complete(&self, prompt: &Prompt, max_tokens: usize) -> Result<Completion, CallError>;

    /// Name shown in logs.
    fn name(&self) -> &str {
        "backend"
    }
}

/// [`TranslationBackend`] over an `edgequake_llm` chat provider.
pub struct ProviderBackend {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
}

impl ProviderBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, temperature: f32) -> Self {
        Self {
            provider,
            temperature,
        }
    }

    fn options(&self, max_tokens: usize) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl TranslationBackend for ProviderBackend {
    async fn complete(&self, prompt: &Prompt, max_tokens: usize) -> Result<Completion, CallError> {
        let messages = vec![
            ChatMessage::system(prompt.system.as_str()),
            ChatMessage::user(prompt.user.as_str()),
        ];
        let options = self.options(max_tokens);
        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| CallError::Provider(e.to_string()))?;
        if response.content.trim().is_empty() {
            return Err(CallError::EmptyResponse);
        }
        Ok(Completion {
            text: response.content,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }

    fn name(&self) -> &str {
        "edgequake-llm"
    }
}

/// Retry/timeout budget for one logical request.
#[derive(Debug, Clone, Copy)]
pub struct CallPolicy {
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub timeout: Duration,
}

impl CallPolicy {
    pub fn from_config(config: &TranslationConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }
}

/// Outcome of [`call_with_retry`] including how many attempts were made.
#[derive(Debug)]
pub struct CallReport {
    pub result: Result<Completion, CallError>,
    pub attempts: u32,
}

/// Run one request through the limiter with timeout and exponential backoff.
///
/// Never panics and never returns early on an error before the retry budget
/// is spent; the last error is reported.
pub async fn call_with_retry(
    backend: &dyn TranslationBackend,
    limiter: &RateLimiter,
    prompt: &Prompt,
    max_tokens: usize,
    policy: CallPolicy,
    label: &str,
) -> CallReport {
    let start = Instant::now();
    let mut last_err = CallError::EmptyResponse;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = backoff_ms(policy.retry_backoff_ms, attempt);
            warn!(
                "{}: retry {}/{} after {}ms",
                label, attempt, policy.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        limiter.acquire().await;

        let outcome = match timeout(policy.timeout, backend.complete(prompt, max_tokens)).await {
            Ok(r) => r,
            Err(_) => Err(CallError::Timeout {
                secs: policy.timeout.as_secs(),
            }),
        };

        match outcome {
            Ok(completion) => {
                debug!(
                    "{}: {} input tokens, {} output tokens, {:?}",
                    label,
                    completion.input_tokens,
                    completion.output_tokens,
                    start.elapsed()
                );
                return CallReport {
                    result: Ok(completion),
                    attempts: attempt + 1,
                };
            }
            Err(e) => {
                warn!("{}: attempt {} failed: {}", label, attempt + 1, e);
                last_err = e;
            }
        }
    }

    CallReport {
        result: Err(last_err),
        attempts: policy.max_retries + 1,
    }
}

// ── Provider resolution ──────────────────────────────────────────────────────

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, TranslateError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        TranslateError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the backend, from most-specific to least-specific:
///
/// 1. a pre-built [`TranslationBackend`] (`config.backend`)
/// 2. a pre-built provider (`config.provider`)
/// 3. a named provider + model (`config.provider_name`)
/// 4. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, both set
/// 5. OpenAI when `OPENAI_API_KEY` is present
/// 6. full auto-detection (`ProviderFactory::from_env`)
///
/// Failure at every level is a fatal configuration error: no document is
/// processed without credentials.
pub fn resolve_backend(
    config: &TranslationConfig,
) -> Result<Arc<dyn TranslationBackend>, TranslateError> {
    if let Some(ref backend) = config.backend {
        return Ok(Arc::clone(backend));
    }
    let provider = resolve_provider(config)?;
    Ok(Arc::new(ProviderBackend::new(provider, config.temperature)))
}

fn resolve_provider(config: &TranslationConfig) -> Result<Arc<dyn LLMProvider>, TranslateError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| TranslateError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

/// Doubling delay before retry `attempt` (1-based), saturating.
fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    2u64.checked_pow(attempt.saturating_sub(1))
        .map_or(u64::MAX, |factor| base_ms.saturating_mul(factor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then echoes the user message.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl TranslationBackend for Flaky {
        async fn complete(&self, prompt: &Prompt, _: usize) -> Result<Completion, CallError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(CallError::Provider("HTTP 503".into()))
            } else {
                Ok(Completion::text(prompt.user.clone()))
            }
        }
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        assert_eq!(backoff_ms(500, 1), 500);
        assert_eq!(backoff_ms(500, 3), 2000);
        assert_eq!(backoff_ms(500, 60), u64::MAX);
        assert_eq!(backoff_ms(1, 70), u64::MAX);
    }

    struct Hangs;

    #[async_trait]
    impl TranslationBackend for Hangs {
        async fn complete(&self, _: &Prompt, _: usize) -> Result<Completion, CallError> {
            sleep(Duration::from_secs(3600)).await;
            Ok(Completion::default())
        }
    }

    fn limiter() -> RateLimiter {
        RateLimiter::new(&RateLimitConfig::default()).unwrap()
    }

    fn policy(max_retries: u32) -> CallPolicy {
        CallPolicy {
            max_retries,
            retry_backoff_ms: 10,
            timeout: Duration::from_secs(5),
        }
    }

    fn prompt() -> Prompt {
        Prompt {
            system: "sys".into(),
            user: "hello".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let backend = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let report = call_with_retry(&backend, &limiter(), &prompt(), 100, policy(2), "t").await;
        assert_eq!(report.result.unwrap().text, "hello");
        assert_eq!(report.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_budget() {
        let backend = Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
        };
        let report = call_with_retry(&backend, &limiter(), &prompt(), 100, policy(1), "t").await;
        assert_eq!(report.result, Err(CallError::Provider("HTTP 503".into())));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_a_call_error() {
        let report = call_with_retry(&Hangs, &limiter(), &prompt(), 100, policy(0), "t").await;
        assert_eq!(report.result, Err(CallError::Timeout { secs: 5 }));
    }

    #[test]
    fn explicit_backend_wins() {
        let backend: Arc<dyn TranslationBackend> = Arc::new(Hangs);
        let config = TranslationConfig::builder()
            .backend(Arc::clone(&backend))
            .build()
            .unwrap();
        let resolved = resolve_backend(&config).unwrap();
        assert!(Arc::ptr_eq(&resolved, &backend));
    }
}
