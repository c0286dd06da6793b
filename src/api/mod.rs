use axum::{
    extract::{Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Settings;
use crate::db::{create_pool, get_all_teams, get_recent_predictions, init_database_with_pool, query_matches};
use crate::error::{AppError, AppResult};
use crate::models::{
    ApiResponse, IngestSummary, MatchFilter, MatchResult, ModelRun, Prediction, Team, TeamForm, TeamId,
    TrainingMetrics,
};
use crate::services::{analytics, ingest, ArtifactStore, ModelRegistry, PredictionEngine, TrainingPipeline};

const DEFAULT_PREDICTION_LIMIT: i64 = 20;
const MAX_PREDICTION_LIMIT: i64 = 100;
const DEFAULT_FORM_WINDOW: usize = 5;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub settings: Arc<Settings>,
    pub registry: Arc<ModelRegistry>,
    pub trainer: Arc<TrainingPipeline>,
    pub engine: Arc<PredictionEngine>,
}

impl AppState {
    pub fn new(pool: SqlitePool, settings: Settings) -> Self {
        let artifacts = ArtifactStore::new(settings.model_dir.clone());
        let registry = Arc::new(ModelRegistry::new(artifacts.clone()));
        Self {
            pool,
            settings: Arc::new(settings),
            trainer: Arc::new(TrainingPipeline::new(artifacts)),
            engine: Arc::new(PredictionEngine::new(Arc::clone(&registry))),
            registry,
        }
    }
}

pub async fn serve(settings: Settings, port: u16) -> anyhow::Result<()> {
    let pool = create_pool(&settings.database_url).await?;
    init_database_with_pool(&pool).await?;

    let addr = format!("{}:{}", settings.api_host, port);
    let state = AppState::new(pool, settings);

    match state.registry.reload(&state.pool).await {
        Ok(Some(run)) => tracing::info!("Serving model run {}", run.id),
        Ok(None) => tracing::info!("No trained model yet; POST /train to create one"),
        Err(e) => tracing::warn!("Could not load latest model: {}", e),
    }

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("MatchMind API server listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/teams", get(list_teams_handler))
        .route("/matches", get(list_matches_handler))
        .route("/analytics/form", get(team_form_handler))
        .route("/predictions", get(recent_predictions_handler))
        .route("/ingest", post(ingest_handler))
        .route("/train", post(train_handler))
        .route("/predict", post(predict_handler))
        .route("/model/reload", post(reload_model_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn root() -> Json<ApiResponse<serde_json::Value>> {
    Json(ApiResponse::success(serde_json::json!({
        "name": "MatchMind API",
        "endpoints": [
            "GET /health",
            "GET /teams",
            "GET /matches",
            "GET /analytics/form",
            "GET /predictions",
            "POST /ingest",
            "POST /train",
            "POST /predict",
            "POST /model/reload",
        ],
    })))
}

async fn health_check() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::success("MatchMind API is running"))
}

// GET /teams
async fn list_teams_handler(State(state): State<AppState>) -> AppResult<Json<ApiResponse<Vec<Team>>>> {
    let teams = get_all_teams(&state.pool).await?;
    Ok(Json(ApiResponse::success(teams)))
}

// GET /matches?team_id=&season=&date_from=&date_to=
async fn list_matches_handler(
    State(state): State<AppState>,
    Query(filter): Query<MatchFilter>,
) -> AppResult<Json<ApiResponse<Vec<MatchResult>>>> {
    let matches = query_matches(&state.pool, &filter).await?;
    Ok(Json(ApiResponse::success(matches)))
}

#[derive(Deserialize)]
struct FormQuery {
    team_id: TeamId,
    n: Option<usize>,
}

// GET /analytics/form?team_id=&n=
async fn team_form_handler(
    State(state): State<AppState>,
    Query(params): Query<FormQuery>,
) -> AppResult<Json<ApiResponse<TeamForm>>> {
    let n = params.n.unwrap_or(DEFAULT_FORM_WINDOW);
    let form = analytics::team_form(&state.pool, params.team_id, n).await?;
    Ok(Json(ApiResponse::success(form)))
}

#[derive(Deserialize)]
struct PredictionsQuery {
    limit: Option<i64>,
}

// GET /predictions?limit=
async fn recent_predictions_handler(
    State(state): State<AppState>,
    Query(params): Query<PredictionsQuery>,
) -> AppResult<Json<ApiResponse<Vec<Prediction>>>> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_PREDICTION_LIMIT)
        .clamp(1, MAX_PREDICTION_LIMIT);
    let predictions = get_recent_predictions(&state.pool, limit).await?;
    Ok(Json(ApiResponse::success(predictions)))
}

#[derive(Deserialize)]
struct IngestQuery {
    csv_path: Option<PathBuf>,
}

// POST /ingest?csv_path=
async fn ingest_handler(
    State(state): State<AppState>,
    Query(params): Query<IngestQuery>,
) -> AppResult<Json<ApiResponse<IngestSummary>>> {
    let path = params.csv_path.unwrap_or_else(|| state.settings.csv_path.clone());
    let summary = ingest::ingest_csv(&state.pool, &path).await?;
    Ok(Json(ApiResponse::success(summary)))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrainResponse {
    pub message: String,
    pub model_run_id: String,
    pub model_path: String,
    pub metrics: TrainingMetrics,
}

// POST /train
async fn train_handler(State(state): State<AppState>) -> AppResult<Json<ApiResponse<TrainResponse>>> {
    let run = state.trainer.train(&state.pool).await?;

    // The run is already committed; a failed reload leaves the previous model serving
    if let Err(e) = state.registry.reload(&state.pool).await {
        tracing::error!("Trained model {} but failed to activate it: {}", run.id, e);
    }

    Ok(Json(ApiResponse::success(TrainResponse {
        message: "Model trained successfully".to_string(),
        model_run_id: run.id,
        model_path: run.model_path,
        metrics: run.metrics,
    })))
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub home_team_id: TeamId,
    pub away_team_id: TeamId,
    pub season: String,
}

// POST /predict
async fn predict_handler(
    State(state): State<AppState>,
    Json(request): Json<PredictRequest>,
) -> AppResult<Json<ApiResponse<Prediction>>> {
    let today = Utc::now().date_naive();
    let prediction = state
        .engine
        .predict(
            &state.pool,
            request.home_team_id,
            request.away_team_id,
            &request.season,
            today,
        )
        .await?;
    Ok(Json(ApiResponse::success(prediction)))
}

// POST /model/reload
async fn reload_model_handler(State(state): State<AppState>) -> AppResult<Json<ApiResponse<ModelRun>>> {
    let run = state.registry.reload(&state.pool).await?.ok_or(AppError::NoModel)?;
    Ok(Json(ApiResponse::success(run)))
}
