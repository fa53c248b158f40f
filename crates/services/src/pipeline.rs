//! Continuous learning: polls for completed events and turns each one into
//! exactly one round of model updates, accuracy grading and reweighting.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use forecast_ml::{PredictionModel, TrainingExample, UpdateOutcome};
use forecast_models::{CompletedEventResult, EventId, EventState, EventSummary, ModelId, Result as ForecastResult};
use forecast_store::StateKey;
use parking_lot::{Mutex as SyncMutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::EngineContext;
use crate::feed::ResultSource;
use crate::persistence::PersistReport;
use crate::scheduler::{spawn_periodic, Ticker};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub poll_interval_secs: u64,
    /// Applies to each poll and each result fetch.
    pub fetch_timeout_secs: u64,
    /// Rejected results remembered so they are not re-fetched every poll.
    pub max_rejected_events: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300,
            fetch_timeout_secs: 10,
            max_rejected_events: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CycleTrigger {
    Scheduled,
    Forced,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CycleReport {
    pub trigger: CycleTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub poll_failed: bool,
    pub polled: usize,
    pub final_events: usize,
    pub already_processed: usize,
    pub processed: Vec<EventId>,
    pub malformed: usize,
    /// Previously rejected events skipped because their summary is unchanged.
    pub rejected_skipped: usize,
    pub fetch_failures: usize,
    pub model_failures: usize,
    pub batches_flushed: usize,
    pub expired_pending: usize,
    pub saved: usize,
    pub save_failures: usize,
}

impl CycleReport {
    fn new(trigger: CycleTrigger, started_at: DateTime<Utc>) -> Self {
        Self {
            trigger,
            started_at,
            finished_at: started_at,
            poll_failed: false,
            polled: 0,
            final_events: 0,
            already_processed: 0,
            processed: Vec::new(),
            malformed: 0,
            rejected_skipped: 0,
            fetch_failures: 0,
            model_failures: 0,
            batches_flushed: 0,
            expired_pending: 0,
            saved: 0,
            save_failures: 0,
        }
    }

    fn absorb(&mut self, persist: PersistReport) {
        self.saved += persist.saved.len();
        self.save_failures += persist.failed.len();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    AlreadyProcessed,
    Processed {
        updated_models: Vec<ModelId>,
        graded: bool,
    },
}

/// Events whose result failed validation, keyed by the summary they were
/// rejected under. Oldest entries fall out first.
#[derive(Debug, Default)]
struct RejectedEvents {
    summaries: HashMap<EventId, EventSummary>,
    order: VecDeque<EventId>,
}

impl RejectedEvents {
    fn is_unchanged(&self, summary: &EventSummary) -> bool {
        self.summaries.get(&summary.event_id) == Some(summary)
    }

    fn insert(&mut self, summary: EventSummary, capacity: usize) {
        let id = summary.event_id.clone();
        if self.summaries.insert(id.clone(), summary).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.summaries.remove(&oldest);
            }
        }
    }

    fn remove(&mut self, id: &EventId) {
        if self.summaries.remove(id).is_some() {
            self.order.retain(|r| r != id);
        }
    }
}

pub struct LearningPipeline {
    ctx: Arc<EngineContext>,
    source: Arc<dyn ResultSource>,
    config: PipelineConfig,
    cycle_lock: Mutex<()>,
    last_report: RwLock<Option<CycleReport>>,
    rejected: SyncMutex<RejectedEvents>,
}

impl LearningPipeline {
    pub fn new(ctx: Arc<EngineContext>, source: Arc<dyn ResultSource>, config: PipelineConfig) -> Self {
        Self {
            ctx,
            source,
            config,
            cycle_lock: Mutex::new(()),
            last_report: RwLock::new(None),
            rejected: SyncMutex::new(RejectedEvents::default()),
        }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.config.poll_interval_secs.max(1))
    }

    fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.config.fetch_timeout_secs.max(1))
    }

    pub fn last_report(&self) -> Option<CycleReport> {
        self.last_report.read().clone()
    }

    /// Runs the cycle on every tick until cancelled.
    pub fn spawn<T: Ticker + 'static>(self: &Arc<Self>, ticker: T, cancel: CancellationToken) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        spawn_periodic("learning-pipeline", ticker, cancel, move || {
            let pipeline = pipeline.clone();
            async move {
                pipeline.run_cycle(CycleTrigger::Scheduled).await;
            }
        })
    }

    /// One poll-and-learn pass. Failures are counted in the report, never
    /// raised: a bad event or a failed fetch only affects itself.
    pub async fn run_cycle(&self, trigger: CycleTrigger) -> CycleReport {
        let _guard = self.cycle_lock.lock().await;
        let timer = self.ctx.metrics.start_latency_tracking("training_cycle");
        let mut report = CycleReport::new(trigger, self.ctx.clock().now());
        debug!("🔄 Learning cycle started ({:?})", trigger);

        match timeout(self.fetch_timeout(), self.source.poll_events()).await {
            Ok(Ok(events)) => {
                report.polled = events.len();
                for summary in events {
                    self.handle_event(&summary, &mut report).await;
                }
            }
            Ok(Err(e)) => {
                warn!("⚠️ Event poll failed, retrying next cycle: {}", e);
                report.poll_failed = true;
                self.ctx.metrics.increment_fetch_failures();
            }
            Err(_) => {
                warn!("⚠️ Event poll timed out after {:?}", self.fetch_timeout());
                report.poll_failed = true;
                self.ctx.metrics.increment_fetch_failures();
            }
        }

        let mut dirty = BTreeSet::new();
        if trigger == CycleTrigger::Forced {
            self.flush_models(&mut report, &mut dirty);
        }
        report.expired_pending = self.ctx.tracker.evict_stale_pending(self.ctx.clock().now());
        if report.expired_pending > 0 {
            dirty.insert(StateKey::PendingPredictions);
        }
        // Also retries anything that failed to save earlier.
        let persist = self.ctx.persist(dirty).await;
        report.absorb(persist);

        report.finished_at = self.ctx.clock().now();
        timer.finish(&self.ctx.metrics);
        self.ctx.metrics.increment_training_cycles(trigger == CycleTrigger::Forced);

        if report.processed.is_empty() && report.malformed == 0 && report.fetch_failures == 0 {
            debug!("💤 Learning cycle: nothing new ({} polled)", report.polled);
        } else {
            info!(
                "🔄 Learning cycle: {} processed, {} duplicates, {} malformed, {} fetch failures, {} save failures",
                report.processed.len(),
                report.already_processed,
                report.malformed,
                report.fetch_failures,
                report.save_failures
            );
        }
        *self.last_report.write() = Some(report.clone());
        report
    }

    async fn handle_event(&self, summary: &EventSummary, report: &mut CycleReport) {
        if summary.is_final() {
            report.final_events += 1;
        }
        match self.ctx.event_state(summary) {
            EventState::CompletedUnprocessed => {}
            EventState::CompletedProcessed => {
                report.already_processed += 1;
                return;
            }
            EventState::Scheduled | EventState::Live => return,
        }

        let id = &summary.event_id;
        {
            let mut rejected = self.rejected.lock();
            if rejected.is_unchanged(summary) {
                debug!("Skipping {}: result was rejected and the feed has not changed it", id);
                report.rejected_skipped += 1;
                return;
            }
            rejected.remove(id);
        }

        let raw = match timeout(self.fetch_timeout(), self.source.fetch_result(id)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!("⚠️ Fetching result for {} failed, retrying next cycle: {}", id, e);
                report.fetch_failures += 1;
                self.ctx.metrics.increment_fetch_failures();
                return;
            }
            Err(_) => {
                warn!("⚠️ Fetching result for {} timed out, retrying next cycle", id);
                report.fetch_failures += 1;
                self.ctx.metrics.increment_fetch_failures();
                return;
            }
        };

        let result = match raw.validate() {
            Ok(result) if &result.event_id == id => result,
            Ok(result) => {
                warn!("⚠️ Skipping result for {}: feed returned event {}", id, result.event_id);
                self.reject(summary, report);
                return;
            }
            Err(e) => {
                warn!("⚠️ Skipping malformed result for {}: {}", id, e);
                self.reject(summary, report);
                return;
            }
        };

        let (outcome, dirty) = self.process_result(&result, report);
        if matches!(outcome, ProcessOutcome::Processed { .. }) {
            report.processed.push(result.event_id.clone());
        }
        let persist = self.ctx.persist(dirty).await;
        report.absorb(persist);
    }

    fn reject(&self, summary: &EventSummary, report: &mut CycleReport) {
        report.malformed += 1;
        self.ctx.metrics.increment_malformed_records();
        self.rejected
            .lock()
            .insert(summary.clone(), self.config.max_rejected_events.max(1));
    }

    /// Applies one validated result outside the polling loop.
    pub async fn ingest(&self, result: CompletedEventResult) -> ProcessOutcome {
        let _guard = self.cycle_lock.lock().await;
        let mut report = CycleReport::new(CycleTrigger::Forced, self.ctx.clock().now());
        let (outcome, dirty) = self.process_result(&result, &mut report);
        self.ctx.persist(dirty).await;
        outcome
    }

    /// Models, then tracker, then weights, then the index. Returns the state
    /// keys that changed.
    fn process_result(
        &self,
        result: &CompletedEventResult,
        report: &mut CycleReport,
    ) -> (ProcessOutcome, BTreeSet<StateKey>) {
        let id = result.event_id.clone();
        let mut dirty = BTreeSet::new();
        if self.ctx.is_processed(&id) {
            debug!("Event {} already processed", id);
            self.ctx.metrics.increment_duplicate_events();
            return (ProcessOutcome::AlreadyProcessed, dirty);
        }

        let pending = self.ctx.tracker.pending(&id);
        let mut example = TrainingExample::new(result.clone());
        if let Some(p) = &pending {
            example = example.with_features(p.matchup.clone());
        }

        let mut updated_models = Vec::new();
        for slot in self.ctx.registry.iter() {
            let model = &slot.model;
            match guarded(model.as_ref(), |m| m.update(&example)) {
                Some(outcome) => {
                    if outcome.mutated_state() {
                        dirty.insert(StateKey::Model(model.id()));
                        updated_models.push(model.id());
                    }
                    debug!("{} update for {}: {:?}", model.id(), id, outcome);
                }
                None => {
                    report.model_failures += 1;
                    self.ctx.metrics.increment_model_failures();
                }
            }
        }

        let graded = match &pending {
            Some(p) => {
                self.ctx.tracker.record(p, result);
                dirty.insert(StateKey::AccuracyHistory);
                self.recompute_weights(&mut dirty);
                true
            }
            None => false,
        };

        self.ctx.mark_processed(id.clone());
        dirty.insert(StateKey::ProcessedIndex);
        if self.ctx.tracker.take_pending(&id).is_some() {
            dirty.insert(StateKey::PendingPredictions);
        }
        self.ctx.metrics.increment_events_processed();

        info!(
            "✅ Learned from {} ({} {}-{} {}): {} models updated{}",
            id,
            result.home_team,
            result.home_score,
            result.away_score,
            result.away_team,
            updated_models.len(),
            if graded { ", prediction graded" } else { "" }
        );
        (ProcessOutcome::Processed { updated_models, graded }, dirty)
    }

    fn recompute_weights(&self, dirty: &mut BTreeSet<StateKey>) {
        let stats = self.ctx.tracker.all_stats();
        let previous = self.ctx.current_weights();
        match self.ctx.calculator.recompute(&previous, &stats) {
            Ok(next) => {
                self.ctx.set_weights(next);
                dirty.insert(StateKey::Weights);
            }
            Err(e) => error!("❌ Weight recomputation failed, keeping previous weights: {}", e),
        }
    }

    fn flush_models(&self, report: &mut CycleReport, dirty: &mut BTreeSet<StateKey>) {
        for slot in self.ctx.registry.iter() {
            let model = &slot.model;
            match guarded(model.as_ref(), |m| m.flush()) {
                Some(outcome) if outcome.mutated_state() => {
                    report.batches_flushed += 1;
                    dirty.insert(StateKey::Model(model.id()));
                }
                Some(_) => {}
                None => report.model_failures += 1,
            }
        }
    }

    /// Waits for any running cycle, then writes every state file.
    pub async fn shutdown(&self) -> PersistReport {
        let _guard = self.cycle_lock.lock().await;
        info!("💾 Flushing state before shutdown");
        self.ctx.persist_all().await
    }
}

/// Runs a model call, turning errors and panics into a logged `None`.
fn guarded<F>(model: &dyn PredictionModel, call: F) -> Option<UpdateOutcome>
where
    F: FnOnce(&dyn PredictionModel) -> ForecastResult<UpdateOutcome>,
{
    match catch_unwind(AssertUnwindSafe(|| call(model))) {
        Ok(Ok(outcome)) => Some(outcome),
        Ok(Err(e)) => {
            warn!("⚠️ {} failed to learn: {}", model.id(), e);
            None
        }
        Err(_) => {
            error!("❌ {} panicked while learning", model.id());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accuracy::TrackerConfig;
    use crate::feed::FeedError;
    use crate::predictor::PredictorService;
    use async_trait::async_trait;
    use dashmap::DashMap;
    use forecast_ml::ModelsConfig;
    use forecast_models::{keys, ExternalStatus, FeatureSnapshot, Matchup, RawEventResult, ResultType};
    use forecast_store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct ScriptedSource {
        events: parking_lot::Mutex<Vec<EventSummary>>,
        results: DashMap<EventId, RawEventResult>,
        failing_fetches: AtomicUsize,
        fetch_calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn add_final(&self, id: &str, home: Option<i64>, away: i64) {
            self.add(id, ExternalStatus::Final);
            self.results.insert(
                EventId::from(id),
                RawEventResult {
                    event_id: Some(id.to_string()),
                    date: Some(Utc::now()),
                    home_team: Some("TOR".to_string()),
                    away_team: Some("MTL".to_string()),
                    home_score: home,
                    away_score: Some(away),
                    result_type: Some(ResultType::Regulation),
                    home_box: None,
                    away_box: None,
                },
            );
        }

        fn add(&self, id: &str, status: ExternalStatus) {
            self.events.lock().push(EventSummary {
                event_id: EventId::from(id),
                status,
                home_team: "TOR".to_string(),
                away_team: "MTL".to_string(),
                start_time: None,
            });
        }
    }

    #[async_trait]
    impl ResultSource for ScriptedSource {
        async fn poll_events(&self) -> std::result::Result<Vec<EventSummary>, FeedError> {
            Ok(self.events.lock().clone())
        }

        async fn fetch_result(&self, event_id: &EventId) -> std::result::Result<RawEventResult, FeedError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if self.failing_fetches.load(Ordering::SeqCst) > 0 {
                self.failing_fetches.fetch_sub(1, Ordering::SeqCst);
                return Err(FeedError::NotAvailable(event_id.clone()));
            }
            self.results
                .get(event_id)
                .map(|r| r.value().clone())
                .ok_or_else(|| FeedError::NotAvailable(event_id.clone()))
        }
    }

    fn pipeline(source: Arc<ScriptedSource>) -> (Arc<LearningPipeline>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let ctx = EngineContext::from_config(&ModelsConfig::default(), TrackerConfig::default(), store.clone()).unwrap();
        let pipeline = LearningPipeline::new(Arc::new(ctx), source, PipelineConfig::default());
        (Arc::new(pipeline), store)
    }

    fn elo_state(pipeline: &LearningPipeline) -> serde_json::Value {
        pipeline.ctx.registry.get(ModelId::Elo).unwrap().snapshot().unwrap()
    }

    #[tokio::test]
    async fn test_final_events_processed_once() {
        let source = Arc::new(ScriptedSource::default());
        source.add_final("g1", Some(4), 2);
        source.add_final("g2", Some(1), 3);
        source.add("g3", ExternalStatus::Live);
        let (pipeline, store) = pipeline(source);

        let first = pipeline.run_cycle(CycleTrigger::Scheduled).await;
        assert_eq!(first.processed, vec![EventId::from("g1"), EventId::from("g2")]);
        assert_eq!(first.final_events, 2);
        assert!(store.len() > 0);
        let after_first = elo_state(&pipeline);

        let second = pipeline.run_cycle(CycleTrigger::Scheduled).await;
        assert!(second.processed.is_empty());
        assert_eq!(second.already_processed, 2);
        assert_eq!(elo_state(&pipeline), after_first);
        assert_eq!(pipeline.ctx.processed_count(), 2);
    }

    #[tokio::test]
    async fn test_malformed_record_is_skipped() {
        let source = Arc::new(ScriptedSource::default());
        source.add_final("bad", None, 2);
        let (pipeline, _) = pipeline(source);
        let before = elo_state(&pipeline);

        let report = pipeline.run_cycle(CycleTrigger::Scheduled).await;
        assert_eq!(report.malformed, 1);
        assert!(report.processed.is_empty());
        assert_eq!(pipeline.ctx.processed_count(), 0);
        assert_eq!(elo_state(&pipeline), before);
    }

    #[tokio::test]
    async fn test_rejected_result_not_refetched_until_feed_changes() {
        let source = Arc::new(ScriptedSource::default());
        source.add_final("bad", None, 2);
        let (pipeline, _) = pipeline(source.clone());

        let first = pipeline.run_cycle(CycleTrigger::Scheduled).await;
        assert_eq!(first.malformed, 1);
        assert_eq!(source.fetch_calls.load(Ordering::SeqCst), 1);

        let second = pipeline.run_cycle(CycleTrigger::Scheduled).await;
        assert_eq!(second.malformed, 0);
        assert_eq!(second.rejected_skipped, 1);
        assert_eq!(source.fetch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.ctx.metrics.counters().malformed_records, 1);

        // A corrected record comes with an updated summary.
        if let Some(mut raw) = source.results.get_mut(&EventId::from("bad")) {
            raw.home_score = Some(4);
        }
        source.events.lock()[0].start_time = Some(Utc::now());

        let third = pipeline.run_cycle(CycleTrigger::Scheduled).await;
        assert_eq!(third.processed, vec![EventId::from("bad")]);
        assert_eq!(source.fetch_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_rejected_events_are_bounded() {
        let mut rejected = RejectedEvents::default();
        let summary = |id: &str| EventSummary {
            event_id: EventId::from(id),
            status: ExternalStatus::Final,
            home_team: "TOR".to_string(),
            away_team: "MTL".to_string(),
            start_time: None,
        };
        for id in ["a", "b", "c"] {
            rejected.insert(summary(id), 2);
        }
        assert!(!rejected.is_unchanged(&summary("a")));
        assert!(rejected.is_unchanged(&summary("b")));
        assert!(rejected.is_unchanged(&summary("c")));
        assert_eq!(rejected.order.len(), 2);
    }

    #[tokio::test]
    async fn test_cycle_expires_unresolved_predictions() {
        let source = Arc::new(ScriptedSource::default());
        let (pipeline, _) = pipeline(source);
        let predictor = PredictorService::new(pipeline.ctx.clone(), ModelsConfig::default().ensemble);
        let matchup = Matchup::new(
            FeatureSnapshot::builder("TOR").build(),
            FeatureSnapshot::builder("MTL").build(),
        );
        predictor.predict_event(EventId::from("postponed"), matchup).unwrap();
        let mut stale = pipeline.ctx.tracker.take_pending(&EventId::from("postponed")).unwrap();
        stale.issued_at = Utc::now() - chrono::Duration::days(30);
        pipeline.ctx.tracker.register_pending(stale);

        let report = pipeline.run_cycle(CycleTrigger::Scheduled).await;
        assert_eq!(report.expired_pending, 1);
        assert_eq!(pipeline.ctx.tracker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_fetch_retried_next_cycle() {
        let source = Arc::new(ScriptedSource::default());
        source.add_final("g1", Some(3), 2);
        source.failing_fetches.store(1, Ordering::SeqCst);
        let (pipeline, _) = pipeline(source);

        let first = pipeline.run_cycle(CycleTrigger::Scheduled).await;
        assert_eq!(first.fetch_failures, 1);
        assert!(!pipeline.ctx.is_processed(&EventId::from("g1")));

        let second = pipeline.run_cycle(CycleTrigger::Scheduled).await;
        assert_eq!(second.processed, vec![EventId::from("g1")]);
    }

    #[tokio::test]
    async fn test_served_prediction_is_graded_and_reweighted() {
        let source = Arc::new(ScriptedSource::default());
        source.add_final("g1", Some(5), 1);
        let (pipeline, _) = pipeline(source);
        let predictor = PredictorService::new(pipeline.ctx.clone(), ModelsConfig::default().ensemble);

        let matchup = Matchup::new(
            FeatureSnapshot::builder("TOR").feature(keys::WIN_PCT, 0.7).build(),
            FeatureSnapshot::builder("MTL").feature(keys::WIN_PCT, 0.3).build(),
        );
        predictor.predict_event(EventId::from("g1"), matchup).unwrap();
        let revision = pipeline.ctx.current_weights().revision;

        let report = pipeline.run_cycle(CycleTrigger::Scheduled).await;
        assert_eq!(report.processed.len(), 1);
        assert_eq!(pipeline.ctx.tracker.resolved_count(), 1);
        assert_eq!(pipeline.ctx.tracker.pending_count(), 0);
        assert_eq!(pipeline.ctx.current_weights().revision, revision + 1);
    }

    #[tokio::test]
    async fn test_forced_cycle_flushes_partial_batch() {
        let source = Arc::new(ScriptedSource::default());
        source.add_final("g1", Some(2), 1);
        let (pipeline, _) = pipeline(source);
        let predictor = PredictorService::new(pipeline.ctx.clone(), ModelsConfig::default().ensemble);
        let matchup = Matchup::new(
            FeatureSnapshot::builder("TOR").build(),
            FeatureSnapshot::builder("MTL").build(),
        );
        predictor.predict_event(EventId::from("g1"), matchup).unwrap();

        let report = pipeline.run_cycle(CycleTrigger::Forced).await;
        assert_eq!(report.processed.len(), 1);
        assert_eq!(report.batches_flushed, 1);
        assert_eq!(pipeline.ctx.metrics.counters().forced_cycles, 1);
    }

    #[tokio::test]
    async fn test_ingest_is_idempotent() {
        let (pipeline, _) = pipeline(Arc::new(ScriptedSource::default()));
        let result = RawEventResult {
            event_id: Some("g9".to_string()),
            date: Some(Utc::now()),
            home_team: Some("BOS".to_string()),
            away_team: Some("NYR".to_string()),
            home_score: Some(2),
            away_score: Some(3),
            result_type: Some(ResultType::Overtime),
            ..RawEventResult::default()
        }
        .validate()
        .unwrap();

        assert!(matches!(
            pipeline.ingest(result.clone()).await,
            ProcessOutcome::Processed { .. }
        ));
        let state = elo_state(&pipeline);
        assert_eq!(pipeline.ingest(result).await, ProcessOutcome::AlreadyProcessed);
        assert_eq!(elo_state(&pipeline), state);
    }
}
