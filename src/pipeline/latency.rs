//! Sliding window of capture-to-present latencies

use std::time::Duration;

use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

/// Keeps the most recent `capacity` samples, overwriting the oldest.
pub struct LatencyWindow {
    samples: HeapRb<u32>,
}

/// Summary of the samples currently in the window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencySummary {
    pub samples: usize,
    pub avg_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: HeapRb::new(capacity.max(1)),
        }
    }

    /// Record one latency, in microseconds resolution.
    pub fn record(&mut self, latency: Duration) {
        let micros = u32::try_from(latency.as_micros()).unwrap_or(u32::MAX);
        self.samples.push_overwrite(micros);
    }

    pub fn len(&self) -> usize {
        self.samples.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn summary(&self) -> LatencySummary {
        let mut sorted: Vec<u32> = self.samples.iter().copied().collect();
        if sorted.is_empty() {
            return LatencySummary::default();
        }
        sorted.sort_unstable();

        let total: u64 = sorted.iter().map(|&us| us as u64).sum();
        // nearest-rank percentile
        let rank = (sorted.len() * 99).div_ceil(100).max(1);
        let to_ms = |us: u64| us as f64 / 1000.0;

        LatencySummary {
            samples: sorted.len(),
            avg_ms: to_ms(total) / sorted.len() as f64,
            p99_ms: to_ms(sorted[rank - 1] as u64),
            max_ms: to_ms(*sorted.last().unwrap_or(&0) as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_summarises_to_zero() {
        let window = LatencyWindow::new(8);
        assert!(window.is_empty());
        assert_eq!(window.summary(), LatencySummary::default());
    }

    #[test]
    fn oldest_samples_are_overwritten() {
        let mut window = LatencyWindow::new(3);
        for ms in [100, 1, 2, 3] {
            window.record(Duration::from_millis(ms));
        }
        assert_eq!(window.len(), 3);
        let summary = window.summary();
        assert_eq!(summary.max_ms, 3.0);
        assert_eq!(summary.avg_ms, 2.0);
    }

    #[test]
    fn p99_picks_the_tail() {
        let mut window = LatencyWindow::new(100);
        for _ in 0..99 {
            window.record(Duration::from_millis(1));
        }
        window.record(Duration::from_millis(50));
        let summary = window.summary();
        assert_eq!(summary.samples, 100);
        assert_eq!(summary.p99_ms, 1.0);
        assert_eq!(summary.max_ms, 50.0);
    }
}
