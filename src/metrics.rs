//! Request metrics and statistics for the scoring service

use crate::types::assessment::RiskLevel;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Latency samples kept for percentile estimates
const MAX_LATENCY_SAMPLES: usize = 10_000;

/// Metrics collector shared by all handlers
pub struct ServiceMetrics {
    /// Successful predictions
    pub predictions_served: AtomicU64,
    /// Predictions rejected or failed in the pipeline
    pub predictions_failed: AtomicU64,
    /// Prediction records that could not be stored
    pub persistence_failures: AtomicU64,
    by_level: RwLock<BTreeMap<&'static str, u64>>,
    /// Scoring latency in microseconds
    latencies: RwLock<Vec<u64>>,
    /// Paid-back probability histogram, ten equal-width buckets
    probability_buckets: RwLock<[u64; 10]>,
    start_time: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        let by_level = RiskLevel::ALL.iter().map(|level| (level.as_str(), 0)).collect();
        Self {
            predictions_served: AtomicU64::new(0),
            predictions_failed: AtomicU64::new(0),
            persistence_failures: AtomicU64::new(0),
            by_level: RwLock::new(by_level),
            latencies: RwLock::new(Vec::with_capacity(1000)),
            probability_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    /// Record a served prediction
    pub fn record_prediction(&self, latency: Duration, probability: f64, level: RiskLevel) {
        self.predictions_served.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut samples) = self.latencies.write() {
            samples.push(latency.as_micros() as u64);
            if samples.len() > MAX_LATENCY_SAMPLES {
                samples.drain(0..MAX_LATENCY_SAMPLES / 2);
            }
        }

        let bucket = (probability.clamp(0.0, 1.0) * 10.0).min(9.0) as usize;
        if let Ok(mut buckets) = self.probability_buckets.write() {
            buckets[bucket] += 1;
        }

        if let Ok(mut by_level) = self.by_level.write() {
            *by_level.entry(level.as_str()).or_insert(0) += 1;
        }
    }

    pub fn record_failure(&self) {
        self.predictions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Latency statistics over the retained samples
    pub fn latency_stats(&self) -> LatencyStats {
        let mut sorted = match self.latencies.read() {
            Ok(samples) => samples.clone(),
            Err(_) => return LatencyStats::default(),
        };
        if sorted.is_empty() {
            return LatencyStats::default();
        }
        sorted.sort_unstable();

        let count = sorted.len();
        let percentile = |p: f64| sorted[((count as f64 * p) as usize).min(count - 1)];
        LatencyStats {
            samples: count as u64,
            mean_us: sorted.iter().sum::<u64>() / count as u64,
            p50_us: percentile(0.50),
            p95_us: percentile(0.95),
            p99_us: percentile(0.99),
            max_us: sorted[count - 1],
        }
    }

    /// Predictions per second since startup
    pub fn throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.predictions_served.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn probability_distribution(&self) -> [u64; 10] {
        self.probability_buckets.read().map(|b| *b).unwrap_or([0; 10])
    }

    pub fn predictions_by_level(&self) -> BTreeMap<&'static str, u64> {
        self.by_level.read().map(|m| m.clone()).unwrap_or_default()
    }

    /// Point-in-time view for the metrics endpoint
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            predictions_served: self.predictions_served.load(Ordering::Relaxed),
            predictions_failed: self.predictions_failed.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            throughput_per_sec: self.throughput(),
            latency: self.latency_stats(),
            risk_levels: self.predictions_by_level(),
            probability_distribution: self.probability_distribution(),
        }
    }

    /// Log a summary of the current counters
    pub fn log_summary(&self) {
        let snapshot = self.snapshot();
        let total = snapshot.predictions_served + snapshot.predictions_failed;
        let failure_rate = if total > 0 {
            snapshot.predictions_failed as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        info!(
            served = snapshot.predictions_served,
            failed = snapshot.predictions_failed,
            failure_rate = format!("{:.1}%", failure_rate),
            persistence_failures = snapshot.persistence_failures,
            throughput = format!("{:.2} req/s", snapshot.throughput_per_sec),
            "Scoring summary"
        );
        info!(
            mean_us = snapshot.latency.mean_us,
            p50_us = snapshot.latency.p50_us,
            p95_us = snapshot.latency.p95_us,
            p99_us = snapshot.latency.p99_us,
            "Scoring latency"
        );
        for (level, count) in &snapshot.risk_levels {
            info!(risk_level = %level, count = count, "Predictions by risk level");
        }

        let served = snapshot.predictions_served;
        for (i, &count) in snapshot.probability_distribution.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let pct = count as f64 / served.max(1) as f64 * 100.0;
            let bar = "█".repeat(((pct / 5.0) as usize).min(20));
            info!(
                "  p(paid) {:.1}-{:.1}: {:>6} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                bar
            );
        }
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency statistics in microseconds
#[derive(Debug, Default, Clone, Serialize)]
pub struct LatencyStats {
    pub samples: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Serializable counters snapshot
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub predictions_served: u64,
    pub predictions_failed: u64,
    pub persistence_failures: u64,
    pub throughput_per_sec: f64,
    pub latency: LatencyStats,
    pub risk_levels: BTreeMap<&'static str, u64>,
    pub probability_distribution: [u64; 10],
}

/// Logs periodic summaries
pub struct MetricsReporter {
    metrics: Arc<ServiceMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<ServiceMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Run the reporting loop. Returns immediately when the interval is 0.
    pub async fn start(self) {
        if self.interval_secs == 0 {
            return;
        }
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        // First tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.log_summary();
        }
    }
}
