//! The per-tenant shard allocation policy.

/// Configuration of a [`ShardAllocator`].
///
/// `burst_window` and `decay_window` share units with the `now` values passed
/// to [`ShardAllocator::observe`].
#[derive(Debug, Clone)]
pub struct ShardAllocatorConfig {
    /// Usage covered by a single shard.
    pub unit_size: u64,
    /// Lower bound on the shard count; the allocator never returns less.
    pub min: usize,
    /// Upper bound on the shard count.
    pub max: usize,
    /// How long the high watermark is held after the last scale-out.
    pub burst_window: i64,
    /// How long a full decay from the watermark to the target takes.
    pub decay_window: i64,
}

impl Default for ShardAllocatorConfig {
    fn default() -> Self {
        Self {
            unit_size: 128 << 10,
            min: 1,
            max: 64,
            burst_window: 17 * 60 * 1_000_000_000,
            decay_window: 2 * 60 * 60 * 1_000_000_000,
        }
    }
}

/// Maps a tenant's observed usage to a shard count in `[min, max]`.
///
/// The target carries one unit of headroom (`usage / unit_size + 1`).
/// Scale-out is immediate and multiplies the current allocation, so a tenant
/// that keeps outgrowing its fan-out is spread aggressively. Scale-in holds
/// the watermark for `burst_window` after the last scale-out, then decays
/// linearly toward the usage floor over `decay_window`, never dropping below
/// `min`.
#[derive(Debug)]
pub struct ShardAllocator {
    config: ShardAllocatorConfig,
    /// High watermark: the current allocation.
    hi: usize,
    /// Time of the last scale-out.
    last_burst: i64,
}

impl ShardAllocator {
    pub fn new(config: ShardAllocatorConfig) -> Self {
        Self {
            config,
            hi: 0,
            last_burst: 0,
        }
    }

    /// Observe `usage` at time `now` and return the shard count.
    ///
    /// Repeated calls with the same `(usage, now)` return the same value.
    pub fn observe(&mut self, usage: u64, now: i64) -> usize {
        let c = &self.config;
        // Floor of shards strictly needed, and the target with headroom.
        let floor = (usage / c.unit_size) as usize;
        let target = (floor + 1).clamp(c.min, c.max);

        if target > self.hi {
            self.hi = (target * self.hi.max(1)).min(c.max);
            self.last_burst = now;
        } else if target < self.hi {
            let elapsed = now - self.last_burst - c.burst_window;
            if elapsed >= c.decay_window {
                self.hi = floor.max(c.min);
            } else if elapsed > 0 {
                // Integer decay: the decrement is floored, so small
                // watermark-to-floor gaps shed slowly.
                let decrement = (self.hi - floor) as i64 * elapsed / c.decay_window;
                self.hi = self.hi.saturating_sub(decrement as usize).max(c.min);
            }
        }
        self.hi
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_trajectory() {
        let mut a = ShardAllocator::new(ShardAllocatorConfig {
            unit_size: 10,
            min: 1,
            max: 5,
            burst_window: 50,
            decay_window: 50,
        });

        for (i, (usage, now, want)) in [
            (0, 0, 1),
            (0, 1, 1),
            (5, 2, 1),
            (10, 3, 2),
            (10, 4, 2),
            (11, 5, 2),
            (20, 6, 5),
            (10, 7, 5),
            (5, 8, 5),
            (5, 9, 5),
            (5, 51, 5),
            (5, 101, 1),
            (100, 151, 5),
        ]
        .into_iter()
        .enumerate()
        {
            assert_eq!(a.observe(usage, now), want, "observation {i}");
        }
    }

    #[test]
    fn never_scales_in_while_usage_grows() {
        let mut a = ShardAllocator::new(ShardAllocatorConfig {
            unit_size: 128 << 10,
            min: 1,
            max: 10,
            burst_window: 1_000_000_000 * 10,
            decay_window: 1_000_000_000 * 10 * 5,
        });

        let mut now = 0;
        let mut hi = 0;
        for i in 0..100u64 {
            let old = hi;
            hi = a.observe(2 * (128 << 10) * i, now);
            assert!(hi >= old, "allocation dropped from {old} to {hi} at step {i}");
            now += 1_000_000_000 * 10;
        }
        assert_eq!(hi, 10);
    }

    #[test]
    fn observe_is_idempotent_at_fixed_time() {
        let mut a = ShardAllocator::new(ShardAllocatorConfig {
            unit_size: 10,
            min: 1,
            max: 5,
            burst_window: 50,
            decay_window: 50,
        });
        a.observe(20, 0);
        // Mid-decay observation repeated at the same instant.
        let first = a.observe(5, 95);
        assert_eq!(a.observe(5, 95), first);
        assert_eq!(a.observe(5, 95), first);
    }

    #[test]
    fn decay_never_drops_below_min() {
        let mut a = ShardAllocator::new(ShardAllocatorConfig {
            unit_size: 10,
            min: 2,
            max: 8,
            burst_window: 10,
            decay_window: 10,
        });
        a.observe(70, 0);
        assert_eq!(a.observe(0, 1_000_000), 2);
    }
}
