//! Monotonic clock and hierarchical cancellation scopes.
//!
//! Every suspension point in the engine (LLM call, clarification wait,
//! subscriber poll) binds to a [`CancelScope`] so that cancelling a parent
//! (e.g. a whole session) cancels every descendant cooperatively.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// Abstracts time so tests can swap in a deterministic source later; the
/// production implementation is just `tokio::time` + `chrono::Utc`.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;

    /// Resolves once `duration` has elapsed.
    fn sleep(&self, duration: Duration) -> futures_sleep::SleepFuture;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> futures_sleep::SleepFuture {
        futures_sleep::SleepFuture::new(duration)
    }
}

/// Thin wrapper so `Clock::sleep` returns a boxed future without pulling in
/// an extra dependency just for that.
pub mod futures_sleep {
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    pub struct SleepFuture {
        inner: Pin<Box<tokio::time::Sleep>>,
    }

    impl SleepFuture {
        pub fn new(duration: Duration) -> Self {
            Self {
                inner: Box::pin(tokio::time::sleep(duration)),
            }
        }
    }

    impl Future for SleepFuture {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            self.inner.as_mut().poll(cx)
        }
    }
}

/// A node in the cancellation hierarchy. Cancelling a scope cancels every
/// child scope derived from it via [`CancelScope::child`].
#[derive(Debug, Clone)]
pub struct CancelScope {
    token: CancellationToken,
}

impl CancelScope {
    pub fn root() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Races `fut` against cancellation, returning `None` if the scope was
    /// cancelled first.
    pub async fn run<F, T>(&self, fut: F) -> Option<T>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::select! {
            _ = self.token.cancelled() => None,
            out = fut => Some(out),
        }
    }
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::root()
    }
}
