//! Generative-text service: a narrow `generate(request) -> text` capability
//! plus the retry loop around it.
//!
//! The planner never sees an `LLMProvider`; it talks to a [`TextGenerator`].
//! [`LlmGenerator`] adapts any edgequake-llm provider, and tests plug in a
//! deterministic stub.
//!
//! ## Retry Strategy
//!
//! Errors the provider reports as recoverable (rate limits, network,
//! timeouts, 5xx answers) are retried with exponential backoff: the n-th
//! retry waits `backoff_ms * 2^(n-1)`, capped at [`MAX_BACKOFF_MS`]. With
//! the defaults the waits are 500 ms then 1 s across 3 attempts. Rejected
//! credentials and malformed requests are surfaced on the first failure.
//! At most [`MAX_ATTEMPTS`] attempts are made.

use crate::error::ExternalServiceError;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, LlmError};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// One prompt for the generative service.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// How a single generation attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// Worth retrying: rate limit, network, timeout, server error.
    Transient(String),
    /// Credentials rejected.
    Unauthorized(String),
    /// Any other failure that will not go away on retry.
    Permanent(String),
}

impl From<LlmError> for GenerationError {
    /// Rejected credentials are surfaced, errors the provider deems
    /// recoverable (network, timeout, rate limit, 5xx) are retried, the rest
    /// fail at once.
    fn from(e: LlmError) -> Self {
        let message = e.to_string();
        match e {
            LlmError::AuthError(_) => GenerationError::Unauthorized(message),
            LlmError::InvalidRequest(_)
            | LlmError::ModelNotFound(_)
            | LlmError::ConfigError(_)
            | LlmError::NotSupported(_)
            | LlmError::TokenLimitExceeded { .. } => GenerationError::Permanent(message),
            other if other.is_recoverable() => GenerationError::Transient(message),
            _ => GenerationError::Permanent(message),
        }
    }
}

/// Anything that turns a prompt into text.
pub trait TextGenerator: Send + Sync {
    /// Provider label used in error messages.
    fn name(&self) -> &str;

    fn generate<'a>(
        &'a self,
        request: &'a GenerationRequest,
    ) -> BoxFuture<'a, Result<String, GenerationError>>;
}

/// [`TextGenerator`] backed by an edgequake-llm chat provider.
pub struct LlmGenerator {
    name: String,
    provider: Arc<dyn LLMProvider>,
}

impl LlmGenerator {
    pub fn new(name: impl Into<String>, provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            name: name.into(),
            provider,
        }
    }
}

impl std::fmt::Debug for LlmGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmGenerator")
            .field("name", &self.name)
            .field("provider", &"<dyn LLMProvider>")
            .finish()
    }
}

impl TextGenerator for LlmGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate<'a>(
        &'a self,
        request: &'a GenerationRequest,
    ) -> BoxFuture<'a, Result<String, GenerationError>> {
        Box::pin(async move {
            let messages = vec![
                ChatMessage::system(request.system.as_str()),
                ChatMessage::user(request.user.as_str()),
            ];
            let options = CompletionOptions {
                temperature: Some(request.temperature),
                max_tokens: Some(request.max_tokens),
                ..Default::default()
            };
            let response = self
                .provider
                .chat(&messages, Some(&options))
                .await
                .map_err(GenerationError::from)?;
            debug!(
                "{}: {} input tokens, {} output tokens",
                self.name, response.prompt_tokens, response.completion_tokens
            );
            Ok(response.content)
        })
    }
}

/// Upper bound on attempts per generation call.
pub const MAX_ATTEMPTS: u32 = 10;

/// Upper bound on a single backoff wait.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Attempts, backoff and per-call timeout for generation calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub timeout_secs: u64,
}

impl RetryPolicy {
    /// Wait before `attempt` (1-based); zero for the first.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let factor = 2u64.checked_pow(attempt - 2).unwrap_or(u64::MAX);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor).min(MAX_BACKOFF_MS))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
            timeout_secs: 60,
        }
    }
}

/// Run one generation under `policy`.
pub async fn generate_with_retry(
    generator: &dyn TextGenerator,
    request: &GenerationRequest,
    policy: &RetryPolicy,
) -> Result<String, ExternalServiceError> {
    let start = Instant::now();
    let attempts = policy.max_attempts.clamp(1, MAX_ATTEMPTS);
    let mut last_err = String::from("no attempt made");

    for attempt in 1..=attempts {
        if attempt > 1 {
            let backoff = policy.delay_before(attempt);
            warn!(
                "{}: retry {}/{} after {}ms",
                generator.name(),
                attempt - 1,
                attempts - 1,
                backoff.as_millis()
            );
            sleep(backoff).await;
        }

        let call = timeout(
            Duration::from_secs(policy.timeout_secs),
            generator.generate(request),
        );
        match call.await {
            Ok(Ok(text)) => {
                debug!("{}: answered in {:?}", generator.name(), start.elapsed());
                return Ok(text);
            }
            Ok(Err(GenerationError::Transient(msg))) => {
                warn!("{}: attempt {} failed: {}", generator.name(), attempt, msg);
                last_err = msg;
            }
            Ok(Err(GenerationError::Unauthorized(detail))) => {
                return Err(ExternalServiceError::AuthFailed {
                    provider: generator.name().to_string(),
                    detail,
                });
            }
            Ok(Err(GenerationError::Permanent(detail))) => {
                return Err(ExternalServiceError::Rejected { detail });
            }
            Err(_) => {
                warn!(
                    "{}: attempt {} timed out after {}s",
                    generator.name(),
                    attempt,
                    policy.timeout_secs
                );
                last_err = format!("timed out after {}s", policy.timeout_secs);
            }
        }
    }

    Err(ExternalServiceError::RetriesExhausted {
        attempts,
        last_error: last_err,
    })
}
