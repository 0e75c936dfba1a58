//! Exponential backoff between retries.

use std::time::Duration;

/// Backoff configuration.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub init_backoff: Duration,
    pub max_backoff: Duration,
    pub base: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            init_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(5),
            base: 2.0,
        }
    }
}

/// Sleeps for exponentially growing intervals, capped at `max_backoff`.
#[derive(Debug)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    base: f64,
}

impl Backoff {
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            next: config.init_backoff,
            max: config.max_backoff,
            base: config.base,
        }
    }

    /// Sleep for the current interval, then grow it.
    pub async fn sleep(&mut self) {
        tokio::time::sleep(self.next).await;
        self.next = self.next.mul_f64(self.base).min(self.max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn intervals_grow_and_cap() {
        let mut b = Backoff::new(&BackoffConfig {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            base: 2.0,
        });
        let t0 = tokio::time::Instant::now();
        b.sleep().await; // 100ms
        b.sleep().await; // 200ms
        b.sleep().await; // 350ms (capped from 400)
        b.sleep().await; // 350ms
        assert_eq!(t0.elapsed(), Duration::from_millis(1000));
    }
}
