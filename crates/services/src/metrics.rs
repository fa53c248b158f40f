use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

const MAX_LATENCY_SAMPLES: usize = 1000;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineCounters {
    pub predictions_served: u64,
    pub prediction_failures: u64,
    pub model_failures: u64,
    pub events_processed: u64,
    pub duplicate_events: u64,
    pub malformed_records: u64,
    pub fetch_failures: u64,
    pub save_failures: u64,
    pub training_cycles: u64,
    pub forced_cycles: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub counters: EngineCounters,
    pub avg_prediction_ms: f64,
    pub avg_cycle_ms: f64,
}

/// Times one operation from creation until `finish`.
#[derive(Debug)]
pub struct LatencyTracker {
    start_time: Instant,
    operation: &'static str,
}

impl LatencyTracker {
    pub fn new(operation: &'static str) -> Self {
        Self {
            start_time: Instant::now(),
            operation,
        }
    }

    pub fn finish(self, metrics: &EngineMetrics) {
        metrics.record_operation_latency(self.operation, self.start_time.elapsed());
    }
}

/// Process-wide counters and latency samples.
#[derive(Debug)]
pub struct EngineMetrics {
    start_time: Instant,
    counters: RwLock<EngineCounters>,
    operation_times: RwLock<HashMap<&'static str, VecDeque<Duration>>>,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            counters: RwLock::new(EngineCounters::default()),
            operation_times: RwLock::new(HashMap::new()),
        }
    }

    pub fn increment_predictions_served(&self) {
        self.counters.write().predictions_served += 1;
    }

    pub fn increment_prediction_failures(&self) {
        self.counters.write().prediction_failures += 1;
    }

    pub fn increment_model_failures(&self) {
        self.counters.write().model_failures += 1;
    }

    pub fn increment_events_processed(&self) {
        self.counters.write().events_processed += 1;
    }

    pub fn increment_duplicate_events(&self) {
        self.counters.write().duplicate_events += 1;
    }

    pub fn increment_malformed_records(&self) {
        self.counters.write().malformed_records += 1;
    }

    pub fn increment_fetch_failures(&self) {
        self.counters.write().fetch_failures += 1;
    }

    pub fn add_save_failures(&self, count: u64) {
        self.counters.write().save_failures += count;
    }

    pub fn increment_training_cycles(&self, forced: bool) {
        let mut counters = self.counters.write();
        counters.training_cycles += 1;
        if forced {
            counters.forced_cycles += 1;
        }
    }

    pub fn record_operation_latency(&self, operation: &'static str, duration: Duration) {
        let mut times = self.operation_times.write();
        let samples = times.entry(operation).or_default();
        samples.push_back(duration);
        if samples.len() > MAX_LATENCY_SAMPLES {
            samples.pop_front();
        }
    }

    pub fn start_latency_tracking(&self, operation: &'static str) -> LatencyTracker {
        LatencyTracker::new(operation)
    }

    pub fn average_latency_ms(&self, operation: &str) -> f64 {
        self.operation_times
            .read()
            .get(operation)
            .filter(|times| !times.is_empty())
            .map(|times| {
                let sum: Duration = times.iter().sum();
                sum.as_secs_f64() * 1000.0 / times.len() as f64
            })
            .unwrap_or(0.0)
    }

    pub fn counters(&self) -> EngineCounters {
        self.counters.read().clone()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            uptime_seconds: self.uptime_seconds(),
            counters: self.counters(),
            avg_prediction_ms: self.average_latency_ms("prediction"),
            avg_cycle_ms: self.average_latency_ms("training_cycle"),
        }
    }

    pub fn log_summary(&self) {
        let snapshot = self.snapshot();
        let c = &snapshot.counters;
        info!("📈 Engine Summary:");
        info!("   Predictions served: {}", c.predictions_served);
        info!("   Prediction failures: {}", c.prediction_failures);
        info!("   Events processed: {}", c.events_processed);
        info!("   Malformed records skipped: {}", c.malformed_records);
        info!("   Training cycles: {} ({} forced)", c.training_cycles, c.forced_cycles);
        info!("   Save failures: {}", c.save_failures);
        info!("   Average prediction time: {:.2}ms", snapshot.avg_prediction_ms);
        info!("   Average cycle time: {:.2}ms", snapshot.avg_cycle_ms);
        info!("   Uptime: {} seconds", snapshot.uptime_seconds);
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[macro_export]
macro_rules! track_latency {
    ($metrics:expr, $operation:expr, $code:block) => {{
        let tracker = $metrics.start_latency_tracking($operation);
        let result = $code;
        tracker.finish(&$metrics);
        result
    }};
}
