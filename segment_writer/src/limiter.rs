//! A token-bucket rate limiter for hedged uploads.

use std::time::Instant;

use parking_lot::Mutex;

#[derive(Debug)]
struct State {
    tokens: f64,
    last: Instant,
}

/// A token bucket holding up to `burst` tokens, refilled at `rate` tokens
/// per second. A rate of zero never refills: only the initial burst (if any)
/// is spendable, and `(rate = 0, burst = 0)` never grants.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(rate: f64, burst: usize) -> Self {
        Self {
            rate,
            burst: burst as f64,
            state: Mutex::new(State {
                tokens: burst as f64,
                last: Instant::now(),
            }),
        }
    }

    /// Take one token if available.
    pub fn allow(&self) -> bool {
        self.allow_n(1.0)
    }

    /// Take `n` tokens if all are available, e.g. to drain the burst.
    pub fn allow_n(&self, n: f64) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last).as_secs_f64();
        state.last = now;
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
        if state.tokens >= n {
            state.tokens -= n;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rate_zero_burst_never_grants() {
        let l = RateLimiter::new(0.0, 0);
        assert!(!l.allow());
        assert!(!l.allow());
    }

    #[test]
    fn burst_is_spendable_then_exhausted_at_low_rate() {
        let l = RateLimiter::new(0.0001, 10);
        assert!(l.allow_n(10.0));
        assert!(!l.allow());
    }

    #[test]
    fn high_rate_keeps_granting() {
        let l = RateLimiter::new(1000.0, 10);
        for _ in 0..10 {
            assert!(l.allow());
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(l.allow());
    }
}
