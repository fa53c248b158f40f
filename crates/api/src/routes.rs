use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use forecast_models::{EnsemblePrediction, EventId, FeatureSnapshot, ForecastError, Matchup};
use forecast_services::{AdminService, CycleReport, EnsembleHealth, PredictorService, WeightsReport};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub predictor: Arc<PredictorService>,
    pub admin: Arc<AdminService>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(predictor: Arc<PredictorService>, admin: Arc<AdminService>) -> Self {
        Self {
            predictor,
            admin,
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            message: None,
        })
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<ForecastError> for ApiError {
    fn from(err: ForecastError) -> Self {
        match err {
            ForecastError::NoPredictions => Self {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message: err.to_string(),
            },
            other => Self::internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            message: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamFeatures {
    pub team: String,
    #[serde(default)]
    pub features: BTreeMap<String, f64>,
}

impl TeamFeatures {
    fn into_snapshot(self) -> FeatureSnapshot {
        FeatureSnapshot::new(self.team.trim().to_uppercase(), chrono::Utc::now(), self.features)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRequest {
    /// When set, the prediction is graded once this event is final.
    pub event_id: Option<String>,
    pub home: TeamFeatures,
    pub away: TeamFeatures,
}

pub fn create_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/predictions", post(create_prediction))
        .route("/api/v1/admin/weights", get(get_weights))
        .route("/api/v1/admin/health", get(get_ensemble_health))
        .route("/api/v1/admin/train", post(force_training))
}

pub fn create_router(state: AppState) -> Router {
    create_routes()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

async fn create_prediction(
    State(state): State<AppState>,
    Json(request): Json<PredictionRequest>,
) -> Result<Json<ApiResponse<EnsemblePrediction>>, ApiError> {
    if request.home.team.trim().is_empty() || request.away.team.trim().is_empty() {
        return Err(ApiError::bad_request("both team codes are required"));
    }
    if request.home.team.trim().eq_ignore_ascii_case(request.away.team.trim()) {
        return Err(ApiError::bad_request("home and away team must differ"));
    }
    let event_id = match request.event_id {
        Some(id) if id.trim().is_empty() => return Err(ApiError::bad_request("event_id cannot be blank")),
        Some(id) => Some(EventId::new(id.trim())),
        None => None,
    };

    let matchup = Matchup::new(request.home.into_snapshot(), request.away.into_snapshot());
    let predictor = state.predictor.clone();
    // Model inference is CPU bound.
    let prediction = tokio::task::spawn_blocking(move || match event_id {
        Some(id) => predictor.predict_event(id, matchup),
        None => predictor.predict(&matchup),
    })
    .await
    .map_err(|e| ApiError::internal(format!("prediction task failed: {e}")))??;

    Ok(ApiResponse::ok(prediction))
}

async fn get_weights(State(state): State<AppState>) -> Json<ApiResponse<WeightsReport>> {
    ApiResponse::ok(state.admin.weights_report())
}

async fn get_ensemble_health(State(state): State<AppState>) -> Json<ApiResponse<EnsembleHealth>> {
    ApiResponse::ok(state.admin.health())
}

async fn force_training(State(state): State<AppState>) -> Json<ApiResponse<CycleReport>> {
    ApiResponse::ok(state.admin.force_training().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use forecast_ml::ModelsConfig;
    use forecast_services::{
        EngineContext, FeedConfig, LearningPipeline, PipelineConfig, SimulatedResultSource, TrackerConfig,
    };
    use forecast_store::MemoryStore;
    use tower::ServiceExt;

    fn router() -> Router {
        let config = ModelsConfig::default();
        let ctx = Arc::new(
            EngineContext::from_config(&config, TrackerConfig::default(), Arc::new(MemoryStore::new())).unwrap(),
        );
        let source = Arc::new(SimulatedResultSource::new(FeedConfig {
            seed: Some(11),
            ..FeedConfig::default()
        }));
        let pipeline = Arc::new(LearningPipeline::new(ctx.clone(), source, PipelineConfig::default()));
        let predictor = Arc::new(PredictorService::new(ctx.clone(), config.ensemble));
        let admin = Arc::new(AdminService::new(ctx, pipeline));
        create_router(AppState::new(predictor, admin))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_prediction_endpoint() {
        let request = post_json(
            "/api/v1/predictions",
            serde_json::json!({
                "event_id": "2024020500",
                "home": {"team": "edm", "features": {"goals_for_per_game": 3.7, "win_pct": 0.62}},
                "away": {"team": "CHI", "features": {"goals_for_per_game": 2.5, "win_pct": 0.31}}
            }),
        );
        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["home_team"], "EDM");
        assert_eq!(body["data"]["event_id"], "2024020500");
        let p = body["data"]["home_win_probability"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&p));
    }

    #[tokio::test]
    async fn test_prediction_rejects_same_team() {
        let request = post_json(
            "/api/v1/predictions",
            serde_json::json!({"home": {"team": "BOS"}, "away": {"team": "bos"}}),
        );
        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["success"], false);
    }

    #[tokio::test]
    async fn test_admin_endpoints() {
        let app = router();

        let response = app
            .clone()
            .oneshot(post_json("/api/v1/admin/train", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["data"]["trigger"], "forced");

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/v1/admin/weights").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["data"]["models"].as_array().unwrap().len(), 7);

        let response = app
            .oneshot(Request::builder().uri("/api/v1/admin/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["data"]["status"], "healthy");
        assert_eq!(body["data"]["last_cycle"]["trigger"], "forced");
    }
}
