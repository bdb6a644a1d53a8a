use std::time::Duration;

/// Per-item exponential backoff: `base * 2^requeues`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self { base: Duration::from_secs(5), max: Duration::from_secs(60) }
    }
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the next delivery of an item that has already been requeued `requeues` times.
    pub fn delay(&self, requeues: u32) -> Duration {
        let factor = 1u32.checked_shl(requeues).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).map_or(self.max, |d| d.min(self.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_from_floor_to_ceiling() {
        let b = ExponentialBackoff::default();
        assert_eq!(b.delay(0), Duration::from_secs(5));
        assert_eq!(b.delay(1), Duration::from_secs(10));
        assert_eq!(b.delay(2), Duration::from_secs(20));
        assert_eq!(b.delay(3), Duration::from_secs(40));
        assert_eq!(b.delay(4), Duration::from_secs(60));
        assert_eq!(b.delay(31), Duration::from_secs(60));
        assert_eq!(b.delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn never_decreases() {
        let b = ExponentialBackoff::new(Duration::from_millis(7), Duration::from_secs(3));
        let mut prev = Duration::ZERO;
        for n in 0..64 {
            let d = b.delay(n);
            assert!(d >= prev, "delay({n}) = {d:?} < {prev:?}");
            assert!(d <= b.max);
            prev = d;
        }
    }

    #[test]
    fn floor_above_ceiling_clamps() {
        let b = ExponentialBackoff::new(Duration::from_secs(10), Duration::from_secs(2));
        assert_eq!(b.delay(0), Duration::from_secs(2));
    }
}
