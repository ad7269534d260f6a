//! Round-trip time estimation.
//!
//! A fixed ring of recent samples averaged by a running sum. Slots start
//! seeded with an optimistic LAN-scale value so the first retransmission
//! timeouts stay aggressive until real samples displace the seeds; the
//! [`MIN_RTO`](crate::core::constants::MIN_RTO) floor keeps that
//! aggressiveness from producing spurious retransmissions.

use std::time::Duration;

use crate::core::constants::{INITIAL_RTT_MICROS, RTT_WINDOW};

/// Sliding-window RTT estimator, one per peer.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// Recent samples in microseconds, oldest replaced first.
    samples: [u32; RTT_WINDOW],
    /// Running sum of `samples`; kept in step by [`push_sample`](Self::push_sample).
    sum: u64,
    /// Ring slot the next sample lands in.
    next: usize,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl RttEstimator {
    /// Create an estimator with every slot at the initial seed value.
    pub fn new() -> Self {
        Self {
            samples: [INITIAL_RTT_MICROS; RTT_WINDOW],
            sum: INITIAL_RTT_MICROS as u64 * RTT_WINDOW as u64,
            next: 0,
        }
    }

    /// Record one measured round trip, displacing the oldest sample.
    ///
    /// Samples beyond `u32::MAX` microseconds (over an hour) saturate.
    pub fn push_sample(&mut self, sample: Duration) {
        let micros = u32::try_from(sample.as_micros()).unwrap_or(u32::MAX);
        self.sum -= self.samples[self.next] as u64;
        self.sum += micros as u64;
        self.samples[self.next] = micros;
        self.next = (self.next + 1) % RTT_WINDOW;
    }

    /// Current estimate: the mean of the window.
    pub fn estimate(&self) -> Duration {
        // RTT_WINDOW is 16, so the shift is the exact mean.
        Duration::from_micros(self.sum >> 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_starts_at_seed() {
        let estimator = RttEstimator::new();
        assert_eq!(
            estimator.estimate(),
            Duration::from_micros(INITIAL_RTT_MICROS as u64)
        );
    }

    #[test]
    fn test_one_sample_shifts_the_mean() {
        let mut estimator = RttEstimator::new();
        estimator.push_sample(Duration::from_micros(850));

        // (15 * 50 + 850) / 16 = 100
        assert_eq!(estimator.estimate(), Duration::from_micros(100));
    }

    #[test]
    fn test_full_window_displaces_every_seed() {
        let mut estimator = RttEstimator::new();
        for _ in 0..RTT_WINDOW {
            estimator.push_sample(Duration::from_micros(200));
        }
        assert_eq!(estimator.estimate(), Duration::from_micros(200));
    }

    #[test]
    fn test_ring_replaces_oldest_first() {
        let mut estimator = RttEstimator::new();
        for _ in 0..RTT_WINDOW {
            estimator.push_sample(Duration::from_micros(100));
        }
        // The 17th sample must displace the first 100, not re-displace a seed.
        estimator.push_sample(Duration::from_micros(1700));
        assert_eq!(estimator.estimate(), Duration::from_micros(200));
    }

    #[test]
    fn test_huge_sample_saturates() {
        let mut estimator = RttEstimator::new();
        estimator.push_sample(Duration::from_secs(10_000));

        let expected = (15 * INITIAL_RTT_MICROS as u64 + u32::MAX as u64) >> 4;
        assert_eq!(estimator.estimate(), Duration::from_micros(expected));
    }
}
