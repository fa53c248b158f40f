use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use forecast_ml::{DynamicWeightCalculator, ModelRegistry, ModelsConfig, WeightingConfig};
use forecast_models::{
    AccuracyRecord, EventId, EventState, EventSummary, PendingPrediction, ProcessedEventIndex,
    WeightVector,
};
use forecast_store::{StateKey, StateStore};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::accuracy::{AccuracyTracker, TrackerConfig};
use crate::metrics::EngineMetrics;
use crate::persistence::{PersistReport, StateKeeper};
use crate::scheduler::{Clock, SystemClock};

/// Shared state every service reads from: the models, the live weights, the
/// processed-event index and the accuracy tracker.
pub struct EngineContext {
    pub registry: ModelRegistry,
    pub calculator: DynamicWeightCalculator,
    pub tracker: AccuracyTracker,
    pub metrics: EngineMetrics,
    pub keeper: StateKeeper,
    weights: RwLock<WeightVector>,
    index: RwLock<ProcessedEventIndex>,
    clock: Arc<dyn Clock>,
}

impl EngineContext {
    pub fn new(
        registry: ModelRegistry,
        weighting: WeightingConfig,
        tracker: TrackerConfig,
        store: Arc<dyn StateStore>,
    ) -> Result<Self> {
        let calculator = DynamicWeightCalculator::new(weighting, registry.base_weights());
        let weights = calculator
            .initial_weights()
            .context("base weights do not form a valid weight vector")?;

        Ok(Self {
            registry,
            calculator,
            tracker: AccuracyTracker::new(tracker),
            metrics: EngineMetrics::new(),
            keeper: StateKeeper::new(store),
            weights: RwLock::new(weights),
            index: RwLock::new(ProcessedEventIndex::new()),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn from_config(models: &ModelsConfig, tracker: TrackerConfig, store: Arc<dyn StateStore>) -> Result<Self> {
        Self::new(
            ModelRegistry::from_config(models),
            models.weighting.clone(),
            tracker,
            store,
        )
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn current_weights(&self) -> WeightVector {
        self.weights.read().clone()
    }

    pub fn set_weights(&self, weights: WeightVector) {
        *self.weights.write() = weights;
    }

    pub fn is_processed(&self, event_id: &EventId) -> bool {
        self.index.read().contains(event_id)
    }

    /// False when the id was already present.
    pub fn mark_processed(&self, event_id: EventId) -> bool {
        self.index.write().mark_processed(event_id)
    }

    pub fn processed_count(&self) -> usize {
        self.index.read().len()
    }

    pub fn event_state(&self, summary: &EventSummary) -> EventState {
        self.index.read().state_of(summary)
    }

    pub fn all_keys(&self) -> BTreeSet<StateKey> {
        StateKey::all(&self.registry.ids()).into_iter().collect()
    }

    /// Copies each requested piece of state under its own lock. Keys whose
    /// state cannot be serialized are marked failed and left out.
    pub fn snapshot_state(&self, keys: &BTreeSet<StateKey>) -> Vec<(StateKey, Value)> {
        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            let value = match key {
                StateKey::Model(id) => match self.registry.get(*id) {
                    Some(model) => model.snapshot().map_err(anyhow::Error::from),
                    None => {
                        warn!("⚠️ No registered model for state key {}", key);
                        continue;
                    }
                },
                StateKey::Weights => to_value(&self.current_weights()),
                StateKey::ProcessedIndex => {
                    let index = self.index.read().clone();
                    to_value(&index)
                }
                StateKey::AccuracyHistory => to_value(&self.tracker.history()),
                StateKey::PendingPredictions => to_value(&self.tracker.pending_snapshot()),
            };
            match value {
                Ok(v) => items.push((*key, v)),
                Err(e) => {
                    error!("❌ Could not snapshot {}: {}", key, e);
                    self.keeper.mark_failed([*key]);
                }
            }
        }
        items
    }

    /// Snapshots `keys` plus anything still awaiting a retry, then writes.
    pub async fn persist(&self, keys: BTreeSet<StateKey>) -> PersistReport {
        let mut keys = keys;
        keys.extend(self.keeper.failed_keys());
        let items = self.snapshot_state(&keys);
        let report = self.keeper.persist(items).await;
        self.metrics.add_save_failures(report.failed.len() as u64);
        report
    }

    pub async fn persist_all(&self) -> PersistReport {
        self.persist(self.all_keys()).await
    }

    /// Loads whatever state exists. Missing files leave the defaults in place;
    /// unreadable or newer-schema files abort startup.
    pub fn restore_state(&self) -> Result<usize> {
        let mut restored = 0;

        for slot in self.registry.iter() {
            let id = slot.model.id();
            if let Some(value) = self.load(StateKey::Model(id))? {
                slot.model
                    .restore(value)
                    .with_context(|| format!("restoring {id} state"))?;
                restored += 1;
            }
        }

        if let Some(value) = self.load(StateKey::Weights)? {
            let weights: WeightVector = serde_json::from_value(value).context("decoding weights")?;
            let expected: BTreeSet<_> = self.registry.ids().into_iter().collect();
            let found: BTreeSet<_> = weights.models().collect();
            let (min, max) = self.calculator.effective_bounds(expected.len());
            if found == expected && weights.validate(min, max).is_ok() {
                self.set_weights(weights);
                restored += 1;
            } else {
                warn!("⚠️ Saved weights do not match the configured models; starting from base weights");
            }
        }

        if let Some(value) = self.load(StateKey::ProcessedIndex)? {
            let index: ProcessedEventIndex = serde_json::from_value(value).context("decoding processed index")?;
            *self.index.write() = index;
            restored += 1;
        }

        if let Some(value) = self.load(StateKey::AccuracyHistory)? {
            let history: Vec<AccuracyRecord> = serde_json::from_value(value).context("decoding accuracy history")?;
            self.tracker.restore_history(history);
            restored += 1;
        }

        if let Some(value) = self.load(StateKey::PendingPredictions)? {
            let pending: Vec<PendingPrediction> =
                serde_json::from_value(value).context("decoding pending predictions")?;
            self.tracker.restore_pending(pending);
            restored += 1;
        }

        info!(
            "📂 Restored {} state files ({} events processed, {} predictions pending)",
            restored,
            self.processed_count(),
            self.tracker.pending_count()
        );
        Ok(restored)
    }

    fn load(&self, key: StateKey) -> Result<Option<Value>> {
        self.keeper
            .load(key)
            .with_context(|| format!("loading {key}"))
    }
}

fn to_value<T: serde::Serialize>(state: &T) -> Result<Value> {
    Ok(serde_json::to_value(state)?)
}
