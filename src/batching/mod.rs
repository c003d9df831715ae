//! Adaptive batch sizing (spec §4.3), grounded on
//! `_calculate_optimal_batch_size` in the original Python implementation.

use std::collections::VecDeque;
use std::time::Duration;

const LATENCY_RING_CAPACITY: usize = 10;
const SAMPLES_FOR_MEAN: usize = 5;
const MIN_SAMPLES_BEFORE_ADAPTING: usize = 3;

/// Adaptive batch-size configuration, owned exclusively by the
/// orchestrator per spec §3's ownership rule.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub min_batch: usize,
    pub max_batch: usize,
    pub target_latency: Duration,
    pub adaptive: bool,
    recent_latencies: VecDeque<Duration>,
}

impl BatchConfig {
    pub fn new(min_batch: usize, max_batch: usize, target_latency: Duration, adaptive: bool) -> Self {
        Self {
            min_batch,
            max_batch,
            target_latency,
            adaptive,
            recent_latencies: VecDeque::with_capacity(LATENCY_RING_CAPACITY),
        }
    }

    /// Record an observed sub-batch latency, evicting the oldest sample
    /// once the ring reaches its bound of 10.
    pub fn record_latency(&mut self, latency: Duration) {
        if self.recent_latencies.len() == LATENCY_RING_CAPACITY {
            self.recent_latencies.pop_front();
        }
        self.recent_latencies.push_back(latency);
    }

    pub fn recent_latencies(&self) -> &VecDeque<Duration> {
        &self.recent_latencies
    }

    /// Choose the batch size for the next sub-batch, clamped to the
    /// number of files actually remaining. Spec §4.3's exact rule:
    /// - adaptive disabled ⇒ `max_batch`
    /// - fewer than 3 samples ⇒ `min_batch`
    /// - mean of last 5 samples > target ⇒ `max(min, floor(0.8 * max))`
    /// - mean < 0.7 * target ⇒ `min(max, floor(1.1 * max))`
    /// - otherwise ⇒ `max_batch`
    pub fn next_batch_size(&self, remaining_files: usize) -> usize {
        let chosen = if !self.adaptive {
            self.max_batch
        } else if self.recent_latencies.len() < MIN_SAMPLES_BEFORE_ADAPTING {
            self.min_batch
        } else {
            let sample_count = self.recent_latencies.len().min(SAMPLES_FOR_MEAN);
            let window: Vec<Duration> = self
                .recent_latencies
                .iter()
                .rev()
                .take(sample_count)
                .copied()
                .collect();
            let mean_secs: f64 =
                window.iter().map(Duration::as_secs_f64).sum::<f64>() / window.len() as f64;
            let target_secs = self.target_latency.as_secs_f64();

            if mean_secs > target_secs {
                self.min_batch.max((0.8 * self.max_batch as f64).floor() as usize)
            } else if mean_secs < 0.7 * target_secs {
                self.max_batch.min((1.1 * self.max_batch as f64).floor() as usize)
            } else {
                self.max_batch
            }
        };

        chosen.min(remaining_files)
    }

    /// Split `total` files into ordered sub-batch sizes using the
    /// adaptive rule re-evaluated after each chunk (the last chunk may be
    /// smaller than the chosen size, never below 1).
    pub fn plan_sub_batches(&self, total: usize) -> Vec<usize> {
        if total == 0 {
            return Vec::new();
        }
        let mut remaining = total;
        let mut plan = Vec::new();
        while remaining > 0 {
            let size = self.next_batch_size(remaining);
            plan.push(size);
            remaining -= size;
        }
        plan
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::new(50, 100, Duration::from_secs_f64(3.0), true)
    }
}
