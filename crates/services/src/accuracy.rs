use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use forecast_models::{
    AccuracyRecord, CompletedEventResult, EventId, ModelAccuracyStats, ModelId, ModelPrediction,
    PendingPrediction,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    pub recent_window: usize,
    pub calibration_buckets: usize,
    /// Oldest records are dropped past this many.
    pub max_records: usize,
    /// Oldest pending predictions are dropped past this many.
    pub max_pending: usize,
    /// Pending predictions whose event never resolves expire after this long.
    pub pending_ttl_hours: i64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            recent_window: 20,
            calibration_buckets: 10,
            max_records: 10_000,
            max_pending: 1_000,
            pending_ttl_hours: 14 * 24,
        }
    }
}

/// Grades served predictions once their events resolve, and holds the
/// ledger of predictions still waiting on a result.
#[derive(Debug, Default)]
pub struct AccuracyTracker {
    config: TrackerConfig,
    records: RwLock<VecDeque<AccuracyRecord>>,
    pending: DashMap<EventId, PendingPrediction>,
}

impl AccuracyTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            records: RwLock::new(VecDeque::new()),
            pending: DashMap::new(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Latest prediction per event wins. Past `max_pending` the oldest
    /// entries are dropped.
    pub fn register_pending(&self, pending: PendingPrediction) {
        debug!("📝 Pending prediction for event {}", pending.event_id);
        self.pending.insert(pending.event_id.clone(), pending);
        self.enforce_pending_cap();
    }

    fn enforce_pending_cap(&self) {
        let excess = self.pending.len().saturating_sub(self.config.max_pending);
        if excess == 0 {
            return;
        }
        let mut by_age: Vec<(DateTime<Utc>, EventId)> = self
            .pending
            .iter()
            .map(|p| (p.issued_at, p.event_id.clone()))
            .collect();
        by_age.sort();
        for (_, id) in by_age.into_iter().take(excess) {
            self.pending.remove(&id);
        }
        warn!("⚠️ Pending ledger full; dropped {} oldest predictions", excess);
    }

    /// Drops predictions issued more than `pending_ttl_hours` before `now`,
    /// typically for events that were postponed or cancelled.
    pub fn evict_stale_pending(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::hours(self.config.pending_ttl_hours.max(0));
        let before = self.pending.len();
        self.pending.retain(|_, p| p.issued_at >= cutoff);
        let evicted = before.saturating_sub(self.pending.len());
        if evicted > 0 {
            info!("🧹 Expired {} pending predictions that never resolved", evicted);
        }
        evicted
    }

    pub fn pending(&self, event_id: &EventId) -> Option<PendingPrediction> {
        self.pending.get(event_id).map(|p| p.value().clone())
    }

    pub fn take_pending(&self, event_id: &EventId) -> Option<PendingPrediction> {
        self.pending.remove(event_id).map(|(_, p)| p)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Grades one model's prediction against the result.
    pub fn record_prediction(&self, prediction: &ModelPrediction, result: &CompletedEventResult) -> AccuracyRecord {
        let record = AccuracyRecord::grade(prediction, result);
        self.push(vec![record.clone()]);
        record
    }

    /// Grades every member prediction plus the combined one.
    pub fn record(&self, pending: &PendingPrediction, result: &CompletedEventResult) -> Vec<AccuracyRecord> {
        let ensemble = &pending.prediction;
        let mut graded: Vec<AccuracyRecord> = ensemble
            .model_predictions
            .iter()
            .map(|p| AccuracyRecord::grade(p, result))
            .collect();
        graded.push(AccuracyRecord::grade(&ensemble.as_model_prediction(), result));

        let hits = graded.iter().filter(|r| r.correct).count();
        info!(
            "🎯 Graded event {}: {} won, {}/{} predictions correct",
            result.event_id,
            result.winner_code(),
            hits,
            graded.len()
        );
        self.push(graded.clone());
        graded
    }

    fn push(&self, graded: Vec<AccuracyRecord>) {
        let mut records = self.records.write();
        records.extend(graded);
        while records.len() > self.config.max_records {
            records.pop_front();
        }
    }

    pub fn stats(&self, model: ModelId) -> ModelAccuracyStats {
        let records = self.records.read();
        ModelAccuracyStats::from_records(
            model,
            records.iter(),
            self.config.recent_window,
            self.config.calibration_buckets,
        )
    }

    /// Stats for every model with at least one graded prediction.
    pub fn all_stats(&self) -> BTreeMap<ModelId, ModelAccuracyStats> {
        let records = self.records.read();
        let models: BTreeSet<ModelId> = records.iter().map(|r| r.model).collect();
        models
            .into_iter()
            .map(|m| {
                let stats = ModelAccuracyStats::from_records(
                    m,
                    records.iter(),
                    self.config.recent_window,
                    self.config.calibration_buckets,
                );
                (m, stats)
            })
            .collect()
    }

    /// Number of events graded at the ensemble level.
    pub fn resolved_count(&self) -> usize {
        self.records
            .read()
            .iter()
            .filter(|r| r.model == ModelId::Ensemble)
            .count()
    }

    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }

    pub fn history(&self) -> Vec<AccuracyRecord> {
        self.records.read().iter().cloned().collect()
    }

    pub fn restore_history(&self, history: Vec<AccuracyRecord>) {
        let mut records = self.records.write();
        *records = history.into();
        while records.len() > self.config.max_records {
            records.pop_front();
        }
    }

    pub fn pending_snapshot(&self) -> Vec<PendingPrediction> {
        let mut pending: Vec<PendingPrediction> = self.pending.iter().map(|p| p.value().clone()).collect();
        pending.sort_by(|a, b| a.event_id.cmp(&b.event_id));
        pending
    }

    pub fn restore_pending(&self, pending: Vec<PendingPrediction>) {
        self.pending.clear();
        for p in pending {
            self.pending.insert(p.event_id.clone(), p);
        }
        self.enforce_pending_cap();
    }
}
