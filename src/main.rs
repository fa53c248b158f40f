mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crate::config::AppConfig;
use forecast_api::{create_router, AppState};
use forecast_services::{
    spawn_periodic, AdminService, EngineContext, FeedMode, HttpResultSource, IntervalTicker, LearningPipeline,
    PredictorService, ResultSource, SimulatedResultSource,
};
use forecast_store::JsonFileStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "forecast_rs=info,forecast_services=info,forecast_ml=info,forecast_store=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting ensemble forecasting engine");

    let config = AppConfig::new().context("loading configuration")?;
    info!("✅ Configuration loaded successfully");
    info!("💾 State directory: {}", config.storage.state_dir.display());
    info!("🔄 Poll interval: {}s", config.pipeline.poll_interval_secs);
    info!("🌐 Server will bind to: {}", config.server_addr());

    let store = Arc::new(JsonFileStore::new(&config.storage.state_dir)?);
    let ctx = Arc::new(EngineContext::from_config(&config.models, config.tracker.clone(), store)?);
    ctx.restore_state().context("restoring persisted state")?;

    let simulator = match config.feed.mode {
        FeedMode::Simulated => Some(Arc::new(SimulatedResultSource::new(config.feed.clone()))),
        FeedMode::Http => None,
    };
    let source: Arc<dyn ResultSource> = match &simulator {
        Some(sim) => sim.clone(),
        None => Arc::new(HttpResultSource::new(&config.feed)?),
    };

    let predictor = Arc::new(PredictorService::new(ctx.clone(), config.models.ensemble.clone()));
    let pipeline = Arc::new(LearningPipeline::new(ctx.clone(), source, config.pipeline.clone()));
    let admin = Arc::new(AdminService::new(ctx.clone(), pipeline.clone()));

    let cancel = CancellationToken::new();
    let pipeline_handle = pipeline.spawn(IntervalTicker::new(pipeline.poll_interval()), cancel.clone());

    // In simulation mode, forecast each scheduled game so it gets graded later.
    // Runs twice per poll so every game is seen while still scheduled.
    let demo_handle = simulator.map(|sim| {
        let predictor = predictor.clone();
        let ctx = ctx.clone();
        spawn_periodic(
            "simulated-forecasts",
            IntervalTicker::new(Duration::from_secs((config.pipeline.poll_interval_secs / 2).max(1))),
            cancel.clone(),
            move || {
                let sim = sim.clone();
                let predictor = predictor.clone();
                let ctx = ctx.clone();
                async move {
                    for (event_id, matchup) in sim.upcoming() {
                        if ctx.tracker.pending(&event_id).is_some() {
                            continue;
                        }
                        if let Err(e) = predictor.predict_event(event_id.clone(), matchup) {
                            warn!("⚠️ Could not forecast {}: {}", event_id, e);
                        }
                    }
                    debug!("📋 {} forecasts awaiting results", ctx.tracker.pending_count());
                }
            },
        )
    });

    let app = create_router(AppState::new(predictor, admin));
    let listener = tokio::net::TcpListener::bind(config.server_addr())
        .await
        .with_context(|| format!("binding {}", config.server_addr()))?;
    info!("✅ All services started successfully");
    info!("⌨️  Press Ctrl+C to stop");

    let server_cancel = cancel.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("❌ Failed to listen for shutdown signal: {}", e);
        }
        server_cancel.cancel();
    });
    if let Err(e) = server.await {
        error!("❌ Server error: {}", e);
    }

    info!("👋 Shutting down gracefully");
    cancel.cancel();
    if let Err(e) = pipeline_handle.await {
        error!("❌ Learning pipeline task ended abnormally: {}", e);
    }
    if let Some(handle) = demo_handle {
        handle.await.ok();
    }

    let report = pipeline.shutdown().await;
    if !report.is_clean() {
        error!("❌ {} state files could not be saved: {:?}", report.failed.len(), report.failed);
    }
    ctx.metrics.log_summary();

    Ok(())
}
