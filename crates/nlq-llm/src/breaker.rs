//! Circuit breaker for the completion provider
//!
//! State transitions:
//!     Closed -> Open: consecutive failures reach the threshold
//!     Open -> HalfOpen: cooldown elapses
//!     HalfOpen -> Closed: one success
//!     HalfOpen -> Open: one failure

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
        }
    }

    /// Whether a call may proceed. Transitions Open -> HalfOpen once the
    /// cooldown has elapsed.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock");
        Self::advance(&mut inner, self.cooldown);
        matches!(inner.state, BreakerState::Closed | BreakerState::HalfOpen)
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock");
        inner.failure_count = 0;
        inner.last_failure = None;
        if inner.state == BreakerState::HalfOpen {
            inner.state = BreakerState::Closed;
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock");
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            BreakerState::HalfOpen => inner.state = BreakerState::Open,
            BreakerState::Closed if inner.failure_count >= self.threshold => {
                inner.state = BreakerState::Open;
            }
            _ => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().expect("breaker lock");
        Self::advance(&mut inner, self.cooldown);
        inner.state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().expect("breaker lock").failure_count
    }

    /// Administrative override, mainly for tests.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("breaker lock");
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
    }

    fn advance(inner: &mut BreakerInner, cooldown: Duration) {
        if inner.state == BreakerState::Open {
            if let Some(last) = inner.last_failure {
                if last.elapsed() >= cooldown {
                    inner.state = BreakerState::HalfOpen;
                }
            }
        }
    }
}
