// Prediction service

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use forecast_ml::{EnsembleCombiner, EnsembleConfig};
use forecast_models::{EnsemblePrediction, EventId, Matchup, ModelPrediction, PendingPrediction, Result};
use tracing::{debug, error, info, warn};

use crate::context::EngineContext;
use crate::track_latency;

pub struct PredictorService {
    ctx: Arc<EngineContext>,
    combiner: EnsembleCombiner,
}

impl PredictorService {
    pub fn new(ctx: Arc<EngineContext>, config: EnsembleConfig) -> Self {
        Self {
            ctx,
            combiner: EnsembleCombiner::new(config),
        }
    }

    /// Asks every registered model. Errors and panics are logged and the
    /// model is left out of the result.
    pub fn model_predictions(&self, matchup: &Matchup) -> Vec<ModelPrediction> {
        let mut predictions = Vec::with_capacity(self.ctx.registry.len());
        for slot in self.ctx.registry.iter() {
            let model = &slot.model;
            match catch_unwind(AssertUnwindSafe(|| model.predict(matchup))) {
                Ok(Ok(prediction)) => predictions.push(prediction),
                Ok(Err(e)) => {
                    warn!("⚠️ {} failed to predict: {}", model.id(), e);
                    self.ctx.metrics.increment_model_failures();
                }
                Err(_) => {
                    error!("❌ {} panicked while predicting", model.id());
                    self.ctx.metrics.increment_model_failures();
                }
            }
        }
        predictions
    }

    pub fn predict(&self, matchup: &Matchup) -> Result<EnsemblePrediction> {
        let outcome = track_latency!(self.ctx.metrics, "prediction", {
            let predictions = self.model_predictions(matchup);
            let weights = self.ctx.current_weights();
            self.combiner
                .combine(matchup.home_team(), matchup.away_team(), predictions, &weights)
        });

        match &outcome {
            Ok(prediction) => {
                self.ctx.metrics.increment_predictions_served();
                debug!(
                    "🔮 {} vs {}: {:.1}% home, confidence {:.2}",
                    prediction.home_team,
                    prediction.away_team,
                    prediction.home_win_probability * 100.0,
                    prediction.confidence
                );
            }
            Err(e) => {
                self.ctx.metrics.increment_prediction_failures();
                error!(
                    "❌ No prediction for {} vs {}: {}",
                    matchup.home_team(),
                    matchup.away_team(),
                    e
                );
            }
        }
        outcome
    }

    /// Predicts a known event and keeps the result so it can be graded and
    /// trained on once the event is final.
    pub fn predict_event(&self, event_id: EventId, matchup: Matchup) -> Result<EnsemblePrediction> {
        let prediction = self.predict(&matchup)?.with_event_id(event_id.clone());
        if self.ctx.is_processed(&event_id) {
            debug!("Event {} already processed; prediction not tracked", event_id);
        } else if self.track(PendingPrediction::new(event_id.clone(), prediction.clone(), matchup)) {
            info!(
                "🎯 Prediction for {}: {} ({:.1}% home)",
                event_id,
                prediction.predicted_winner_code(),
                prediction.home_win_probability * 100.0
            );
        }
        Ok(prediction)
    }

    /// Registers the prediction, then backs it out if the pipeline finished
    /// the event in the meantime. The pipeline marks an event processed
    /// before it clears the ledger entry, so one of the two always removes it.
    fn track(&self, pending: PendingPrediction) -> bool {
        let event_id = pending.event_id.clone();
        self.ctx.tracker.register_pending(pending);
        if self.ctx.is_processed(&event_id) {
            self.ctx.tracker.take_pending(&event_id);
            debug!("Event {} finished while predicting; prediction not tracked", event_id);
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accuracy::TrackerConfig;
    use forecast_ml::{ModelRegistry, ModelsConfig, PredictionModel, TrainingExample, UpdateOutcome};
    use forecast_models::{keys, FeatureSnapshot, ForecastError, ModelId};
    use forecast_store::MemoryStore;

    struct PanickingModel;

    impl PredictionModel for PanickingModel {
        fn id(&self) -> ModelId {
            ModelId::Statistical
        }

        fn model_version(&self) -> &str {
            "broken"
        }

        fn predict(&self, _matchup: &Matchup) -> Result<ModelPrediction> {
            panic!("scorer exploded")
        }

        fn update(&self, _example: &TrainingExample) -> Result<UpdateOutcome> {
            Err(ForecastError::ModelFailed {
                model: ModelId::Statistical,
                reason: "broken".to_string(),
            })
        }

        fn snapshot(&self) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }

        fn restore(&self, _state: serde_json::Value) -> Result<()> {
            Ok(())
        }
    }

    fn matchup() -> Matchup {
        Matchup::new(
            FeatureSnapshot::builder("COL")
                .feature(keys::GOALS_FOR_PER_GAME, 3.6)
                .feature(keys::GOALS_AGAINST_PER_GAME, 2.6)
                .feature(keys::WIN_PCT, 0.65)
                .build(),
            FeatureSnapshot::builder("CHI")
                .feature(keys::GOALS_FOR_PER_GAME, 2.4)
                .feature(keys::GOALS_AGAINST_PER_GAME, 3.5)
                .feature(keys::WIN_PCT, 0.35)
                .build(),
        )
    }

    fn service(registry: ModelRegistry) -> PredictorService {
        let config = ModelsConfig::default();
        let ctx = EngineContext::new(
            registry,
            config.weighting.clone(),
            TrackerConfig::default(),
            Arc::new(MemoryStore::new()),
        )
        .unwrap();
        PredictorService::new(Arc::new(ctx), config.ensemble)
    }

    #[test]
    fn test_prediction_uses_every_model() {
        let predictor = service(ModelRegistry::from_config(&ModelsConfig::default()));
        let prediction = predictor.predict(&matchup()).unwrap();

        assert_eq!(prediction.model_predictions.len(), 7);
        assert!((0.0..=1.0).contains(&prediction.home_win_probability));
        assert_eq!(predictor.ctx.metrics.counters().predictions_served, 1);
    }

    #[test]
    fn test_panicking_model_is_excluded() {
        let mut registry = ModelRegistry::from_config(&ModelsConfig::default());
        registry.register(Arc::new(PanickingModel), 0.20);
        let predictor = service(registry);

        let prediction = predictor.predict(&matchup()).unwrap();
        assert_eq!(prediction.model_predictions.len(), 6);
        assert!(prediction.model(ModelId::Statistical).is_none());
        assert_eq!(predictor.ctx.metrics.counters().model_failures, 1);
    }

    #[test]
    fn test_predict_event_registers_pending() {
        let predictor = service(ModelRegistry::from_config(&ModelsConfig::default()));
        let prediction = predictor.predict_event(EventId::from("g7"), matchup()).unwrap();

        assert_eq!(prediction.event_id, Some(EventId::from("g7")));
        let pending = predictor.ctx.tracker.pending(&EventId::from("g7")).unwrap();
        assert_eq!(pending.matchup.home_team(), "COL");
    }

    #[test]
    fn test_event_finished_mid_prediction_leaves_no_pending() {
        let predictor = service(ModelRegistry::from_config(&ModelsConfig::default()));
        let id = EventId::from("g8");
        let prediction = predictor.predict(&matchup()).unwrap().with_event_id(id.clone());

        // The pipeline completes the event after the first processed check.
        predictor.ctx.mark_processed(id.clone());
        assert!(!predictor.track(PendingPrediction::new(id.clone(), prediction, matchup())));

        assert!(predictor.ctx.tracker.pending(&id).is_none());
        assert_eq!(predictor.ctx.tracker.pending_count(), 0);
    }

    #[test]
    fn test_processed_event_is_not_tracked() {
        let predictor = service(ModelRegistry::from_config(&ModelsConfig::default()));
        predictor.ctx.mark_processed(EventId::from("g9"));
        predictor.predict_event(EventId::from("g9"), matchup()).unwrap();
        assert_eq!(predictor.ctx.tracker.pending_count(), 0);
    }

    #[test]
    fn test_no_models_is_an_error() {
        let predictor = service_with_only_panics();
        let err = predictor.predict(&matchup()).unwrap_err();
        assert!(matches!(err, ForecastError::NoPredictions));
        assert_eq!(predictor.ctx.metrics.counters().prediction_failures, 1);
    }

    fn service_with_only_panics() -> PredictorService {
        let mut registry = ModelRegistry::new();
        registry.register(Arc::new(PanickingModel), 1.0);
        service(registry)
    }
}
