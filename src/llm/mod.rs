//! LLM Gateway: isolates the core from LLM latency/unavailability behind a
//! uniform `generate(prompt, mode)` contract.
//!
//! Grounded on the teacher's `providers::ProviderExecutor` async-trait
//! abstraction, generalized from process-spawned providers to an HTTP
//! collaborator, plus a semaphore, circuit breaker, and jittered retry on
//! top (spec §4.3).

mod circuit_breaker;
mod retry;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{instrument, warn};

use crate::clock::CancelScope;
use crate::error::{CoreError, CoreResult, TransientKind};
use crate::model::Mode;

pub use circuit_breaker::CircuitBreaker;
pub use retry::{retry_with_backoff, RetryPolicy};

/// An error surfaced by a provider implementation; distinguishes network
/// failures (retryable) from provider-reported hard failures.
#[derive(Debug, Clone)]
pub enum ProviderError {
    Network(String),
    Http5xx(u16),
    Http4xx(u16),
    Other(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Network(msg) => write!(f, "network error: {msg}"),
            ProviderError::Http5xx(code) => write!(f, "server error: {code}"),
            ProviderError::Http4xx(code) => write!(f, "client error: {code}"),
            ProviderError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl ProviderError {
    fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Network(_) | ProviderError::Http5xx(_))
    }
}

/// A pluggable LLM backend. Implementations must not apply their own
/// timeout/retry policy -- the gateway owns that uniformly.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String, ProviderError>;

    /// Stable identity used to key the circuit breaker.
    fn endpoint_id(&self) -> &str;
}

/// HTTP-backed provider calling an OpenAI-compatible completion endpoint.
pub struct HttpLlmProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpLlmProvider {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    #[instrument(skip(self, prompt), fields(endpoint = %self.endpoint))]
    async fn generate(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": max_tokens,
            "temperature": temperature,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ProviderError::Http5xx(status.as_u16()));
        }
        if status.is_client_error() {
            return Err(ProviderError::Http4xx(status.as_u16()));
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Other(format!("malformed response body: {e}")))?;

        parsed
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ProviderError::Other("response missing choices[0].message.content".into()))
    }

    fn endpoint_id(&self) -> &str {
        &self.endpoint
    }
}

/// Concurrency-limited, timeout-bounded, circuit-broken wrapper over an
/// [`LlmProvider`].
pub struct LlmGateway {
    provider: Arc<dyn LlmProvider>,
    semaphore: Arc<Semaphore>,
    breaker: CircuitBreaker,
    retry_policy: RetryPolicy,
}

impl LlmGateway {
    pub fn new(provider: Arc<dyn LlmProvider>, max_concurrent: usize) -> Self {
        Self {
            provider,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            breaker: CircuitBreaker::new(5, Duration::from_secs(60), Duration::from_secs(30)),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Generates text for `prompt` under `mode`'s timeout/token/temperature
    /// defaults, bound to `scope` for cancellation.
    #[instrument(skip(self, prompt, scope), fields(mode = ?mode))]
    pub async fn generate(&self, prompt: &str, mode: Mode, scope: &CancelScope) -> CoreResult<String> {
        if !self.breaker.allow_call() {
            return Err(CoreError::LlmUnavailable(self.provider.endpoint_id().to_string()));
        }

        let (timeout, max_tokens, temperature) = mode.llm_defaults();

        let _permit = match scope.run(self.semaphore.clone().acquire_owned()).await {
            Some(Ok(permit)) => permit,
            Some(Err(_)) => return Err(CoreError::Internal("llm semaphore closed".into())),
            None => return Err(CoreError::Cancelled),
        };

        let attempt = || {
            let provider = self.provider.clone();
            let prompt = prompt.to_string();
            async move {
                tokio::time::timeout(timeout, provider.generate(&prompt, max_tokens, temperature))
                    .await
                    .map_err(|_| ProviderError::Network("timed out".into()))
                    .and_then(|inner| inner)
            }
        };

        let outcome = match scope.run(retry_with_backoff(attempt, &self.retry_policy, |e| e.is_retryable())).await {
            Some(outcome) => outcome,
            None => return Err(CoreError::Cancelled),
        };

        match outcome {
            Ok(text) => {
                self.breaker.record_success();
                Ok(text)
            }
            Err(ProviderError::Network(msg)) => {
                self.breaker.record_failure();
                if msg == "timed out" {
                    Err(CoreError::Timeout(timeout))
                } else {
                    Err(CoreError::TransientError { kind: TransientKind::Network })
                }
            }
            Err(ProviderError::Http5xx(_)) => {
                self.breaker.record_failure();
                Err(CoreError::TransientError { kind: TransientKind::Network })
            }
            Err(err @ (ProviderError::Http4xx(_) | ProviderError::Other(_))) => {
                warn!(error = %err, "llm provider returned a non-retryable error");
                Err(CoreError::LlmUnavailable(err.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyProvider {
        calls: AtomicUsize,
        fail_times: usize,
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        async fn generate(&self, _prompt: &str, _max_tokens: u32, _temperature: f32) -> Result<String, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(ProviderError::Network("boom".into()))
            } else {
                Ok("ok".into())
            }
        }

        fn endpoint_id(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn retries_transient_network_errors() {
        let provider = Arc::new(FlakyProvider {
            calls: AtomicUsize::new(0),
            fail_times: 2,
        });
        let gateway = LlmGateway::new(provider, 2);
        let scope = CancelScope::root();
        let out = gateway.generate("hi", Mode::Quick, &scope).await.unwrap();
        assert_eq!(out, "ok");
    }

    #[tokio::test]
    async fn opens_circuit_after_five_consecutive_failures() {
        let provider = Arc::new(FlakyProvider {
            calls: AtomicUsize::new(0),
            fail_times: 1000,
        });
        let gateway = LlmGateway::new(provider, 2);
        let scope = CancelScope::root();
        for _ in 0..5 {
            let _ = gateway.generate("hi", Mode::Quick, &scope).await;
        }
        let result = gateway.generate("hi", Mode::Quick, &scope).await;
        assert!(matches!(result, Err(CoreError::LlmUnavailable(_))));
    }
}
