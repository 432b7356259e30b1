//! Fetch metrics collection and reporting
//!
//! Tracks latency histograms, success rates and trigger bookkeeping for one
//! sync instance.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Maximum number of samples to keep for metrics calculation
const MAX_SAMPLES: usize = 100;

/// Metrics for a single sync instance
#[derive(Debug, Clone)]
pub struct FetchMetrics {
    /// Entity the metrics belong to
    pub entity: String,
    /// 50th percentile latency in milliseconds
    pub latency_p50_ms: f64,
    /// 99th percentile latency in milliseconds
    pub latency_p99_ms: f64,
    /// Success rate (0.0 to 1.0)
    pub success_rate: f64,
    /// Fetches whose result was applied
    pub total_requests: u64,
    /// Applied fetches that failed
    pub failed_requests: u64,
    /// Fetches that resolved after the instance was destroyed
    pub discarded_results: u64,
    /// Triggers folded into an already scheduled cycle
    pub coalesced_triggers: u64,
}

impl FetchMetrics {
    /// Creates metrics with no data
    pub fn empty(entity: &str) -> Self {
        Self {
            entity: entity.to_string(),
            latency_p50_ms: 0.0,
            latency_p99_ms: 0.0,
            success_rate: 1.0,
            total_requests: 0,
            failed_requests: 0,
            discarded_results: 0,
            coalesced_triggers: 0,
        }
    }
}

/// Internal sample for latency tracking
#[derive(Debug, Clone)]
struct LatencySample {
    duration_ms: f64,
    success: bool,
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    failed: u64,
    discarded: u64,
    coalesced: u64,
}

/// Collects and computes metrics for one sync instance
pub struct MetricsCollector {
    /// Entity name
    entity: String,
    /// Rolling window of latency samples
    samples: Arc<RwLock<VecDeque<LatencySample>>>,
    /// Lifetime counters
    counters: Arc<RwLock<Counters>>,
}

impl MetricsCollector {
    /// Creates a new metrics collector for an entity
    pub fn new(entity: &str) -> Self {
        Self {
            entity: entity.to_string(),
            samples: Arc::new(RwLock::new(VecDeque::with_capacity(MAX_SAMPLES))),
            counters: Arc::new(RwLock::new(Counters::default())),
        }
    }

    /// Records an applied fetch with its duration and success status
    pub async fn record_request(&self, duration: Duration, success: bool) {
        let duration_ms = duration.as_secs_f64() * 1000.0;

        {
            let mut counters = self.counters.write().await;
            counters.total += 1;
            if !success {
                counters.failed += 1;
            }
        }

        let mut samples = self.samples.write().await;
        if samples.len() >= MAX_SAMPLES {
            samples.pop_front();
        }
        samples.push_back(LatencySample {
            duration_ms,
            success,
        });
    }

    /// Records a fetch result dropped because its instance was destroyed
    pub async fn record_discarded(&self) {
        self.counters.write().await.discarded += 1;
    }

    /// Records a trigger folded into a pending cycle
    pub async fn record_coalesced(&self) {
        self.counters.write().await.coalesced += 1;
    }

    /// Computes current metrics from collected samples
    pub async fn get_metrics(&self) -> FetchMetrics {
        let samples = self.samples.read().await;
        let counters = self.counters.read().await;

        let mut metrics = FetchMetrics::empty(&self.entity);
        metrics.discarded_results = counters.discarded;
        metrics.coalesced_triggers = counters.coalesced;

        if samples.is_empty() {
            return metrics;
        }

        // Extract successful latencies for percentile calculation
        let mut latencies: Vec<f64> = samples
            .iter()
            .filter(|s| s.success)
            .map(|s| s.duration_ms)
            .collect();

        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        metrics.latency_p50_ms = percentile(&latencies, 50.0);
        metrics.latency_p99_ms = percentile(&latencies, 99.0);
        metrics.total_requests = counters.total;
        metrics.failed_requests = counters.failed;
        if counters.total > 0 {
            metrics.success_rate = (counters.total - counters.failed) as f64 / counters.total as f64;
        }

        metrics
    }
}

/// Calculate percentile from sorted values
fn percentile(sorted_values: &[f64], p: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }

    let idx = (p / 100.0 * (sorted_values.len() - 1) as f64).round() as usize;
    sorted_values[idx.min(sorted_values.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_collector() {
        let collector = MetricsCollector::new("gold");

        collector.record_request(Duration::from_millis(100), true).await;
        collector.record_request(Duration::from_millis(200), true).await;
        collector.record_request(Duration::from_millis(150), false).await;
        collector.record_discarded().await;
        collector.record_coalesced().await;
        collector.record_coalesced().await;

        let metrics = collector.get_metrics().await;

        assert_eq!(metrics.entity, "gold");
        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.failed_requests, 1);
        assert_eq!(metrics.discarded_results, 1);
        assert_eq!(metrics.coalesced_triggers, 2);
        assert!(metrics.success_rate > 0.6 && metrics.success_rate < 0.7);
    }

    #[tokio::test]
    async fn test_empty_metrics_keep_trigger_counts() {
        let collector = MetricsCollector::new("silver");
        collector.record_discarded().await;

        let metrics = collector.get_metrics().await;
        assert_eq!(metrics.total_requests, 0);
        assert_eq!(metrics.discarded_results, 1);
        assert_eq!(metrics.success_rate, 1.0);
    }

    #[test]
    fn test_percentile() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        assert_eq!(percentile(&values, 50.0), 5.0);
        assert_eq!(percentile(&values, 99.0), 9.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }
}
