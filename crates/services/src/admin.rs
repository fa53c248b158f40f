use std::sync::Arc;

use chrono::{DateTime, Utc};
use forecast_models::{ModelAccuracyStats, ModelId};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::context::EngineContext;
use crate::pipeline::{CycleReport, CycleTrigger, LearningPipeline};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelReport {
    pub model: ModelId,
    pub version: String,
    pub base_weight: f64,
    pub weight: f64,
    pub accuracy: ModelAccuracyStats,
    pub diagnostics: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightsReport {
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
    pub models: Vec<ModelReport>,
    pub ensemble: ModelAccuracyStats,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleHealth {
    pub status: HealthStatus,
    pub predictions_served: u64,
    pub resolved_predictions: usize,
    pub hit_rate: Option<f64>,
    pub recent_hit_rate: Option<f64>,
    pub events_processed: usize,
    pub pending_predictions: usize,
    pub model_failures: u64,
    pub save_failures: u64,
    pub unsaved_state: Vec<String>,
    pub store_healthy: bool,
    pub avg_prediction_ms: f64,
    pub uptime_seconds: u64,
    pub last_cycle: Option<CycleReport>,
}

/// Operator-facing view of the engine.
pub struct AdminService {
    ctx: Arc<EngineContext>,
    pipeline: Arc<LearningPipeline>,
}

impl AdminService {
    pub fn new(ctx: Arc<EngineContext>, pipeline: Arc<LearningPipeline>) -> Self {
        Self { ctx, pipeline }
    }

    /// Runs an out-of-cycle pass that also trains any buffered batches.
    pub async fn force_training(&self) -> CycleReport {
        info!("🛠️ Forced training pass requested");
        self.pipeline.run_cycle(CycleTrigger::Forced).await
    }

    pub fn weights_report(&self) -> WeightsReport {
        let weights = self.ctx.current_weights();
        let mut all_stats = self.ctx.tracker.all_stats();

        let models = self
            .ctx
            .registry
            .iter()
            .map(|slot| {
                let id = slot.model.id();
                ModelReport {
                    model: id,
                    version: slot.model.model_version().to_string(),
                    base_weight: slot.base_weight,
                    weight: weights.get(id),
                    accuracy: all_stats.remove(&id).unwrap_or_else(|| ModelAccuracyStats::empty(id)),
                    diagnostics: slot.model.diagnostics(),
                }
            })
            .collect();

        WeightsReport {
            revision: weights.revision,
            updated_at: weights.updated_at,
            models,
            ensemble: all_stats
                .remove(&ModelId::Ensemble)
                .unwrap_or_else(|| ModelAccuracyStats::empty(ModelId::Ensemble)),
        }
    }

    pub fn health(&self) -> EnsembleHealth {
        let counters = self.ctx.metrics.counters();
        let ensemble = self.ctx.tracker.stats(ModelId::Ensemble);
        let unsaved: Vec<String> = self.ctx.keeper.failed_keys().iter().map(|k| k.name()).collect();

        let store_healthy = match self.ctx.keeper.store().health_check() {
            Ok(()) => true,
            Err(e) => {
                warn!("⚠️ State store unhealthy: {}", e);
                false
            }
        };
        let status = if store_healthy && unsaved.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        EnsembleHealth {
            status,
            predictions_served: counters.predictions_served,
            resolved_predictions: ensemble.total,
            hit_rate: (ensemble.total > 0).then_some(ensemble.accuracy),
            recent_hit_rate: (ensemble.total > 0).then_some(ensemble.recent_accuracy),
            events_processed: self.ctx.processed_count(),
            pending_predictions: self.ctx.tracker.pending_count(),
            model_failures: counters.model_failures,
            save_failures: counters.save_failures,
            unsaved_state: unsaved,
            store_healthy,
            avg_prediction_ms: self.ctx.metrics.average_latency_ms("prediction"),
            uptime_seconds: self.ctx.metrics.uptime_seconds(),
            last_cycle: self.pipeline.last_report(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accuracy::TrackerConfig;
    use crate::feed::{FeedConfig, SimulatedResultSource};
    use crate::pipeline::PipelineConfig;
    use forecast_ml::ModelsConfig;
    use forecast_store::MemoryStore;

    fn admin(store: Arc<MemoryStore>) -> AdminService {
        let ctx = Arc::new(
            EngineContext::from_config(&ModelsConfig::default(), TrackerConfig::default(), store).unwrap(),
        );
        let source = Arc::new(SimulatedResultSource::new(FeedConfig {
            seed: Some(3),
            ..FeedConfig::default()
        }));
        let pipeline = Arc::new(LearningPipeline::new(ctx.clone(), source, PipelineConfig::default()));
        AdminService::new(ctx, pipeline)
    }

    #[test]
    fn test_weights_report_lists_every_model() {
        let admin = admin(Arc::new(MemoryStore::new()));
        let report = admin.weights_report();

        assert_eq!(report.models.len(), 7);
        let total: f64 = report.models.iter().map(|m| m.weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(report.ensemble.total, 0);
        assert!(report
            .models
            .iter()
            .find(|m| m.model == ModelId::Elo)
            .and_then(|m| m.diagnostics.as_ref())
            .is_some());
    }

    #[tokio::test]
    async fn test_forced_training_shows_in_health() {
        let admin = admin(Arc::new(MemoryStore::new()));
        for _ in 0..3 {
            admin.force_training().await;
        }

        let health = admin.health();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.events_processed, 3);
        assert_eq!(health.last_cycle.map(|c| c.trigger), Some(CycleTrigger::Forced));
        assert!(health.hit_rate.is_none());
    }

    #[tokio::test]
    async fn test_failing_store_degrades_health() {
        let store = Arc::new(MemoryStore::new());
        let admin = admin(store.clone());
        store.set_fail_writes(true);
        for _ in 0..3 {
            admin.force_training().await;
        }

        let health = admin.health();
        assert_eq!(health.status, HealthStatus::Degraded);
        assert!(!health.store_healthy);
        assert!(!health.unsaved_state.is_empty());
    }
}
