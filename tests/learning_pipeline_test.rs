use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use forecast_ml::ModelsConfig;
use forecast_models::{EventId, EventSummary, ExternalStatus, ModelId, RawEventResult, ResultType};
use forecast_services::{
    AdminService, CycleTrigger, EngineContext, FeedConfig, FeedError, LearningPipeline, ManualTicker,
    PipelineConfig, PredictorService, ResultSource, SimulatedResultSource, TrackerConfig,
};
use forecast_store::{JsonFileStore, StateKey, StateStore};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Feed whose contents the test controls.
#[derive(Default)]
struct StaticSource {
    events: Mutex<Vec<(EventSummary, RawEventResult)>>,
}

impl StaticSource {
    fn push_final(&self, id: &str, home: &str, away: &str, score: (i64, i64)) {
        let summary = EventSummary {
            event_id: EventId::from(id),
            status: ExternalStatus::Final,
            home_team: home.to_string(),
            away_team: away.to_string(),
            start_time: None,
        };
        let raw = RawEventResult {
            event_id: Some(id.to_string()),
            date: Some(Utc::now()),
            home_team: Some(home.to_string()),
            away_team: Some(away.to_string()),
            home_score: Some(score.0),
            away_score: Some(score.1),
            result_type: Some(ResultType::Regulation),
            ..RawEventResult::default()
        };
        self.events.lock().push((summary, raw));
    }
}

#[async_trait]
impl ResultSource for StaticSource {
    async fn poll_events(&self) -> Result<Vec<EventSummary>, FeedError> {
        Ok(self.events.lock().iter().map(|(s, _)| s.clone()).collect())
    }

    async fn fetch_result(&self, event_id: &EventId) -> Result<RawEventResult, FeedError> {
        self.events
            .lock()
            .iter()
            .find(|(s, _)| &s.event_id == event_id)
            .map(|(_, r)| r.clone())
            .ok_or_else(|| FeedError::NotAvailable(event_id.clone()))
    }
}

/// Never answers within the fetch timeout.
struct StalledSource;

#[async_trait]
impl ResultSource for StalledSource {
    async fn poll_events(&self) -> Result<Vec<EventSummary>, FeedError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }

    async fn fetch_result(&self, event_id: &EventId) -> Result<RawEventResult, FeedError> {
        Err(FeedError::NotAvailable(event_id.clone()))
    }
}

fn engine(store: Arc<dyn StateStore>) -> Arc<EngineContext> {
    Arc::new(EngineContext::from_config(&ModelsConfig::default(), TrackerConfig::default(), store).unwrap())
}

#[tokio::test]
async fn test_state_survives_restart_without_reprocessing() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(StaticSource::default());
    source.push_final("2024020001", "TOR", "MTL", (4, 1));
    source.push_final("2024020002", "BOS", "TOR", (2, 3));

    {
        let store: Arc<dyn StateStore> = Arc::new(JsonFileStore::new(dir.path()).unwrap());
        let ctx = engine(store);
        let pipeline = LearningPipeline::new(ctx.clone(), source.clone(), PipelineConfig::default());

        let report = pipeline.run_cycle(CycleTrigger::Scheduled).await;
        assert_eq!(report.processed.len(), 2);
        assert_eq!(report.save_failures, 0);

        let shutdown = pipeline.shutdown().await;
        assert!(shutdown.is_clean());
    }

    let store: Arc<dyn StateStore> = Arc::new(JsonFileStore::new(dir.path()).unwrap());
    assert!(store.keys().unwrap().contains(&StateKey::ProcessedIndex));
    let ctx = engine(store);
    assert!(ctx.restore_state().unwrap() > 0);
    assert_eq!(ctx.processed_count(), 2);
    let elo_after_restore = ctx.registry.get(ModelId::Elo).unwrap().snapshot().unwrap();

    let pipeline = LearningPipeline::new(ctx.clone(), source, PipelineConfig::default());
    let report = pipeline.run_cycle(CycleTrigger::Scheduled).await;
    assert!(report.processed.is_empty());
    assert_eq!(report.already_processed, 2);
    assert_eq!(
        ctx.registry.get(ModelId::Elo).unwrap().snapshot().unwrap(),
        elo_after_restore
    );
}

#[tokio::test]
async fn test_stalled_poll_times_out() {
    let ctx = engine(Arc::new(forecast_store::MemoryStore::new()));
    let pipeline = LearningPipeline::new(
        ctx.clone(),
        Arc::new(StalledSource),
        PipelineConfig {
            fetch_timeout_secs: 1,
            ..PipelineConfig::default()
        },
    );

    let report = tokio::time::timeout(Duration::from_secs(10), pipeline.run_cycle(CycleTrigger::Scheduled))
        .await
        .expect("cycle should finish once the poll times out");
    assert!(report.poll_failed);
    assert_eq!(ctx.metrics.counters().fetch_failures, 1);
}

#[tokio::test]
async fn test_simulated_season_grades_forecasts() {
    let ctx = engine(Arc::new(forecast_store::MemoryStore::new()));
    let feed = Arc::new(SimulatedResultSource::new(FeedConfig {
        seed: Some(2024),
        games_per_poll: 4,
        ..FeedConfig::default()
    }));
    let pipeline = Arc::new(LearningPipeline::new(ctx.clone(), feed.clone(), PipelineConfig::default()));
    let predictor = PredictorService::new(ctx.clone(), ModelsConfig::default().ensemble);
    let admin = AdminService::new(ctx.clone(), pipeline.clone());

    for _ in 0..12 {
        for (event_id, m) in feed.upcoming() {
            predictor.predict_event(event_id, m).unwrap();
        }
        pipeline.run_cycle(CycleTrigger::Scheduled).await;
    }

    let health = admin.health();
    assert!(health.resolved_predictions >= 30);
    assert!(health.hit_rate.is_some());
    assert_eq!(health.events_processed, 40);

    let report = admin.weights_report();
    let total: f64 = report.models.iter().map(|m| m.weight).sum();
    assert!((total - 1.0).abs() < 1e-6);
    for model in &report.models {
        assert!(model.weight >= 0.05 - 1e-6 && model.weight <= 0.40 + 1e-6);
        assert!(model.accuracy.total > 0);
    }
    assert!(report.revision >= 30);
}

#[tokio::test]
async fn test_manual_ticker_drives_background_cycles() {
    let source = Arc::new(StaticSource::default());
    source.push_final("g1", "EDM", "CGY", (5, 2));
    let ctx = engine(Arc::new(forecast_store::MemoryStore::new()));
    let pipeline = Arc::new(LearningPipeline::new(ctx.clone(), source.clone(), PipelineConfig::default()));

    let (ticker, trigger) = ManualTicker::new();
    let cancel = CancellationToken::new();
    let handle = pipeline.spawn(ticker, cancel.clone());

    assert!(trigger.fire().await);
    source.push_final("g2", "CGY", "EDM", (1, 4));
    assert!(trigger.fire().await);
    drop(trigger);
    handle.await.unwrap();

    assert_eq!(ctx.processed_count(), 2);
    assert_eq!(ctx.metrics.counters().training_cycles, 2);
}
