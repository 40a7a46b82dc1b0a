//! Circuit breaker protecting against cascading failures from a flaky LLM
//! provider endpoint (spec §4.3): closed -> open after N consecutive
//! failures within a window, half-open probe after a cooldown, closes on
//! success.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    window_start: Instant,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    failure_window: Duration,
    open_cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, failure_window: Duration, open_cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            failure_window,
            open_cooldown,
            inner: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
                opened_at: None,
                window_start: Instant::now(),
            }),
        }
    }

    /// Whether a new call may proceed. Transitions Open -> HalfOpen once the
    /// cooldown has elapsed, allowing exactly one probe through per call to
    /// `allow_call` while half-open.
    pub fn allow_call(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            State::Closed => true,
            State::HalfOpen => false,
            State::Open => {
                if inner.opened_at.map(|t| t.elapsed() >= self.open_cooldown).unwrap_or(false) {
                    inner.state = State::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = State::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.window_start = Instant::now();
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == State::HalfOpen {
            inner.state = State::Open;
            inner.opened_at = Some(Instant::now());
            return;
        }

        if inner.window_start.elapsed() > self.failure_window {
            inner.consecutive_failures = 0;
            inner.window_start = Instant::now();
        }
        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.failure_threshold {
            inner.state = State::Open;
            inner.opened_at = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_and_half_opens_after_cooldown() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60), Duration::from_millis(10));
        for _ in 0..3 {
            assert!(breaker.allow_call());
            breaker.record_failure();
        }
        assert!(!breaker.allow_call());
        std::thread::sleep(Duration::from_millis(15));
        assert!(breaker.allow_call());
    }

    #[test]
    fn success_closes_the_circuit() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60), Duration::from_millis(10));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert!(breaker.allow_call());
    }
}
