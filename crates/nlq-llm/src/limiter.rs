//! Token-bucket rate limiter
//!
//! Tokens refill continuously at the configured rate up to the burst size.
//! Exceeding the bucket fails fast; the retry layer above decides whether
//! to back off and try again.

use std::sync::Mutex;
use std::time::Instant;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

pub struct TokenBucket {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// `rate` is tokens per second; `burst` is the bucket capacity.
    pub fn new(rate: f64, burst: f64) -> Self {
        let burst = burst.max(1.0);
        Self {
            rate: rate.max(f64::MIN_POSITIVE),
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token if available. Never blocks.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().expect("token bucket lock");

        let elapsed = state.last_refill.elapsed().as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
        state.last_refill = Instant::now();

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Currently available tokens (diagnostics only).
    pub fn available(&self) -> f64 {
        let state = self.state.lock().expect("token bucket lock");
        let refilled = state.tokens + state.last_refill.elapsed().as_secs_f64() * self.rate;
        refilled.min(self.burst)
    }
}
