use parking_lot::Mutex;
use std::collections::VecDeque;

/// Number of most recent latency samples kept for percentiles
pub const LATENCY_WINDOW: usize = 1000;

/// Counters of one pipeline run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStats {
    pub generated: u64,
    pub processed: u64,
    pub filtered: u64,
    /// Barrier arrivals summed over every stage
    pub barrier_arrivals: u64,
    /// Completed barrier cycles
    pub barrier_cycles: u64,
    pub total_latency_ms: f64,
}

impl PipelineStats {
    /// Mean end-to-end latency of filtered items, 0 when none passed
    pub fn average_latency_ms(&self) -> f64 {
        if self.filtered == 0 {
            0.0
        } else {
            self.total_latency_ms / self.filtered as f64
        }
    }
}

#[derive(Debug)]
struct StatsInner {
    stats: PipelineStats,
    latencies: VecDeque<f64>,
}

/// Serialized counters and latency samples shared by every stage
#[derive(Debug)]
pub struct StatsAggregator {
    inner: Mutex<StatsInner>,
    window_size: usize,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::with_window(LATENCY_WINDOW)
    }

    /// Create an aggregator keeping the last `window_size` latency samples
    pub fn with_window(window_size: usize) -> Self {
        Self {
            inner: Mutex::new(StatsInner {
                stats: PipelineStats::default(),
                latencies: VecDeque::with_capacity(window_size),
            }),
            window_size,
        }
    }

    pub fn record_generated(&self) {
        self.inner.lock().stats.generated += 1;
    }

    pub fn record_processed(&self) {
        self.inner.lock().stats.processed += 1;
    }

    /// Record an item accepted by the filter and its end-to-end latency
    pub fn record_filtered(&self, latency_ms: f64) {
        let mut inner = self.inner.lock();
        inner.stats.filtered += 1;
        inner.stats.total_latency_ms += latency_ms;
        if self.window_size == 0 {
            return;
        }
        if inner.latencies.len() >= self.window_size {
            inner.latencies.pop_front();
        }
        inner.latencies.push_back(latency_ms);
    }

    pub fn record_barrier_arrival(&self) {
        self.inner.lock().stats.barrier_arrivals += 1;
    }

    pub fn record_barrier_cycle(&self) {
        self.inner.lock().stats.barrier_cycles += 1;
    }

    pub fn snapshot(&self) -> PipelineStats {
        self.inner.lock().stats.clone()
    }

    /// Latency percentile over the sample window, `p` in `0.0..=1.0`
    pub fn latency_percentile_ms(&self, p: f64) -> f64 {
        let inner = self.inner.lock();
        if inner.latencies.is_empty() {
            return 0.0;
        }

        let mut sorted: Vec<f64> = inner.latencies.iter().copied().collect();
        drop(inner);
        sorted.sort_unstable_by(f64::total_cmp);

        let idx = ((sorted.len() as f64 * p).ceil() as usize)
            .saturating_sub(1)
            .min(sorted.len() - 1);
        sorted[idx]
    }

    pub fn latency_p50_ms(&self) -> f64 {
        self.latency_percentile_ms(0.50)
    }

    pub fn latency_p99_ms(&self) -> f64 {
        self.latency_percentile_ms(0.99)
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counters() {
        let stats = StatsAggregator::new();
        for _ in 0..3 {
            stats.record_generated();
            stats.record_processed();
            stats.record_barrier_arrival();
        }
        stats.record_barrier_cycle();
        stats.record_filtered(2.0);
        stats.record_filtered(4.0);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.generated, 3);
        assert_eq!(snapshot.processed, 3);
        assert_eq!(snapshot.filtered, 2);
        assert_eq!(snapshot.barrier_arrivals, 3);
        assert_eq!(snapshot.barrier_cycles, 1);
        assert_eq!(snapshot.average_latency_ms(), 3.0);
    }

    #[test]
    fn test_average_without_samples() {
        assert_eq!(StatsAggregator::new().snapshot().average_latency_ms(), 0.0);
    }

    #[test]
    fn test_latency_percentiles() {
        let stats = StatsAggregator::with_window(10);
        for i in 1..=10 {
            stats.record_filtered(i as f64);
        }
        assert_eq!(stats.latency_p50_ms(), 5.0);
        assert_eq!(stats.latency_p99_ms(), 10.0);

        // window slides, the total does not
        stats.record_filtered(100.0);
        assert_eq!(stats.latency_percentile_ms(0.0), 2.0);
        assert_eq!(stats.snapshot().filtered, 11);
    }

    #[test]
    fn test_concurrent_updates() {
        let stats = Arc::new(StatsAggregator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_generated();
                        stats.record_filtered(1.0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.generated, 4000);
        assert_eq!(snapshot.filtered, 4000);
        assert_eq!(snapshot.total_latency_ms, 4000.0);
    }
}
