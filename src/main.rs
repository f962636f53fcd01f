use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

mod config;
mod db;
mod error;
mod knight;
mod progression;
mod quest;
mod scheduler;

use config::Config;
use db::Database;
use error::QuestError;
use knight::KnightClass;
use quest::{Category, NewQuest, QuestBoard, QuestScope, Recurrence};
use scheduler::ResetScheduler;

// ============================================================================
// App State
// ============================================================================

#[derive(Clone)]
struct AppState {
    board: Arc<QuestBoard>,
    scheduler: Arc<ResetScheduler>,
}

impl AppState {
    fn new(db: Arc<Database>, config: &Config, anchor: chrono::Weekday) -> Self {
        Self {
            board: Arc::new(
                QuestBoard::new(Arc::clone(&db), config.progression.completion_xp)
                    .with_overflow_policy(config.progression.overflow),
            ),
            scheduler: Arc::new(ResetScheduler::new(db, config.scheduler.interval(), anchor)),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Header carrying the id of the user a request acts for. Authentication is
/// done upstream; this service trusts the header.
const ACTOR_HEADER: &str = "X-Actor-Id";

enum ApiError {
    Unauthenticated,
    Quest(QuestError),
}

impl From<QuestError> for ApiError {
    fn from(e: QuestError) -> Self {
        ApiError::Quest(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                format!("Missing or invalid {} header", ACTOR_HEADER),
            ),
            ApiError::Quest(e) => match e {
                QuestError::Permission(_) => (StatusCode::FORBIDDEN, e.to_string()),
                QuestError::Irreversible(_) => (StatusCode::CONFLICT, e.to_string()),
                QuestError::NotFound { .. } => (StatusCode::NOT_FOUND, e.to_string()),
                QuestError::Validation(_) => (StatusCode::BAD_REQUEST, e.to_string()),
                QuestError::Storage(ref inner) => {
                    error!("Storage failure: {}", inner);
                    (StatusCode::INTERNAL_SERVER_ERROR, "Storage failure".to_string())
                }
            },
        };

        (
            status,
            Json(serde_json::json!({ "success": false, "error": message })),
        )
            .into_response()
    }
}

/// Helper to extract the acting user id from headers
fn extract_actor(headers: &HeaderMap) -> Result<i64, ApiError> {
    headers
        .get(ACTOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
        .ok_or(ApiError::Unauthenticated)
}

// ============================================================================
// HTTP Handlers - Users and Knights
// ============================================================================

#[derive(Deserialize)]
struct CreateUserRequest {
    name: String,
    #[serde(default)]
    master: bool,
}

#[derive(Deserialize)]
struct CreateKnightRequest {
    name: String,
    class: KnightClass,
    #[serde(default)]
    owner_id: Option<i64>,
}

async fn health_check() -> impl IntoResponse {
    "OK"
}

/// POST /api/users
async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = state.board.create_user(&req.name, req.master).await?;
    Ok((StatusCode::CREATED, Json(actor)))
}

/// POST /api/knights
async fn create_knight(
    State(state): State<AppState>,
    Json(req): Json<CreateKnightRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let knight = state
        .board
        .create_knight(req.owner_id, &req.name, req.class)
        .await?;
    Ok((StatusCode::CREATED, Json(knight)))
}

/// GET /api/knights - the caller's knights, or every knight for a guild master
async fn list_knights(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = extract_actor(&headers)?;
    Ok(Json(state.board.knights_for(actor_id).await?))
}

/// GET /api/knights/:id - knight, quests and achievements
async fn knight_profile(
    State(state): State<AppState>,
    Path(knight_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.board.knight_profile(knight_id).await?))
}

// ============================================================================
// HTTP Handlers - Quests
// ============================================================================

#[derive(Deserialize)]
struct KnightQuestRequest {
    title: String,
    #[serde(default)]
    description: Option<String>,
    category: Category,
    #[serde(default)]
    recurrence: Recurrence,
}

/// POST /api/knights/:id/quests - personal quest for a knight
async fn create_knight_quest(
    State(state): State<AppState>,
    Path(knight_id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<KnightQuestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = extract_actor(&headers)?;
    let quest = state
        .board
        .create_quest(
            actor_id,
            NewQuest {
                title: req.title,
                description: req.description,
                category: req.category,
                recurrence: req.recurrence,
                scope: QuestScope::Personal,
                knight_id: Some(knight_id),
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(quest)))
}

/// POST /api/quests - any scope, knight optional
async fn create_quest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NewQuest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = extract_actor(&headers)?;
    let quest = state.board.create_quest(actor_id, req).await?;
    Ok((StatusCode::CREATED, Json(quest)))
}

/// POST /api/quests/:id/toggle
async fn toggle_quest(
    State(state): State<AppState>,
    Path(quest_id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = extract_actor(&headers)?;
    match state.board.toggle(quest_id, actor_id).await {
        Ok(outcome) => Ok(Json(outcome)),
        Err(e) => {
            warn!("Toggle of quest {} by user {} failed: {}", quest_id, actor_id, e);
            Err(e.into())
        }
    }
}

/// GET /api/achievements/guild
async fn guild_achievements(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.board.guild_achievements().await?))
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/users", post(create_user))
        .route("/api/knights", get(list_knights).post(create_knight))
        .route("/api/knights/:id", get(knight_profile))
        .route("/api/knights/:id/quests", post(create_knight_quest))
        .route("/api/quests", post(create_quest))
        .route("/api/quests/:id/toggle", post(toggle_quest))
        .route("/api/achievements/guild", get(guild_achievements))
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers([
                    axum::http::header::CONTENT_TYPE,
                    axum::http::HeaderName::from_static("x-actor-id"),
                ]),
        )
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown requested");
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("questboard=info".parse()?),
        )
        .init();

    let config = Config::load()?;
    let anchor = config.scheduler.anchor_day()?;

    let db = Arc::new(Database::new(&config.database.url, config.database.max_connections).await?);
    let state = AppState::new(db, &config, anchor);

    state.scheduler.start();

    let addr: SocketAddr = config.server.bind.parse()?;
    info!("Quest board listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.scheduler.stop().await;
    Ok(())
}
