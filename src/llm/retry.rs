//! Jittered exponential backoff retry, shared by the LLM Gateway (spec
//! §4.3) and the Orchestrator's task-level transient retry (spec §4.1).

use std::future::Future;
use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoffs: Vec<Duration>,
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoffs: vec![Duration::from_millis(250), Duration::from_secs(1)],
            jitter_fraction: 0.25,
        }
    }
}

impl RetryPolicy {
    /// The task-level transient retry policy from spec §4.1 (500ms/2s).
    pub fn task_level() -> Self {
        Self {
            max_retries: 2,
            backoffs: vec![Duration::from_millis(500), Duration::from_secs(2)],
            jitter_fraction: 0.0,
        }
    }

    /// The backoff duration to wait after the `attempt`-th failure (0-indexed).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let base = self
            .backoffs
            .get(attempt as usize)
            .copied()
            .unwrap_or_else(|| *self.backoffs.last().unwrap());
        if self.jitter_fraction <= 0.0 {
            return base;
        }
        let mut rng = rand::thread_rng();
        let jitter = rng.gen_range(-self.jitter_fraction..=self.jitter_fraction);
        let millis = (base.as_millis() as f64 * (1.0 + jitter)).max(0.0);
        Duration::from_millis(millis as u64)
    }
}

/// Runs `attempt` up to `policy.max_retries + 1` times total, retrying only
/// when `is_retryable` accepts the error, backing off between attempts.
pub async fn retry_with_backoff<F, Fut, T, E>(attempt: F, policy: &RetryPolicy, is_retryable: impl Fn(&E) -> bool) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_err = None;
    for n in 0..=policy.max_retries {
        match attempt().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if n == policy.max_retries || !is_retryable(&e) {
                    return Err(e);
                }
                last_err = Some(e);
                tokio::time::sleep(policy.backoff_for(n)).await;
            }
        }
    }
    Err(last_err.expect("loop always runs at least once"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn stops_retrying_on_non_retryable_error() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy {
            max_retries: 2,
            backoffs: vec![Duration::from_millis(1), Duration::from_millis(1)],
            jitter_fraction: 0.0,
        };
        let result: Result<(), &str> = retry_with_backoff(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal") }
            },
            &policy,
            |_| false,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_up_to_max_then_gives_up() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy {
            max_retries: 2,
            backoffs: vec![Duration::from_millis(1), Duration::from_millis(1)],
            jitter_fraction: 0.0,
        };
        let result: Result<(), &str> = retry_with_backoff(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("transient") }
            },
            &policy,
            |_| true,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
