// mes-server main.rs
// HTTP API for the RFID tracking dashboard

mod db;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use db::{NewScanEvent, SqliteStore};
use mes_analytics::{
    CatalogSource, DetectorConfig, EventStore, ReportOptions, StatisticsAggregator,
};
use mes_core::{EngineError, ItemState, StepCatalog};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

// ============================================================================
// Application State
// ============================================================================

struct AppState {
    store: SqliteStore,
}

type SharedState = Arc<AppState>;

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }

    fn err(msg: &str) -> Json<Self> {
        Json(Self {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        })
    }
}

fn error_status(err: &EngineError) -> StatusCode {
    match err {
        EngineError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
        EngineError::SourceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::InconsistentCatalog(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Deserialize)]
struct StatisticsQuery {
    /// Snapshot instant (RFC 3339); defaults to now
    as_of: Option<DateTime<Utc>>,
    /// Idle threshold override in minutes
    idle_minutes: Option<i64>,
    /// Ranking cap for skip/duplicate lists
    top_n: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct InventoryQuery {
    step_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
    events: Vec<NewScanEvent>,
}

// ============================================================================
// Endpoints
// ============================================================================

async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    let db_ok = state.store.fetch_catalog().is_ok();
    ApiResponse::ok(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "db_ok": db_ok,
        "checked_at": Utc::now(),
    }))
}

async fn get_statistics(
    State(state): State<SharedState>,
    Query(query): Query<StatisticsQuery>,
) -> impl IntoResponse {
    let mut detector = DetectorConfig::default();
    if let Some(minutes) = query.idle_minutes {
        detector.idle_threshold = Duration::minutes(minutes);
    }
    if let Some(top_n) = query.top_n {
        detector.top_n = top_n;
    }
    let opts = ReportOptions {
        as_of: query.as_of,
        detector,
    };

    let aggregator = StatisticsAggregator::new(&state.store, &state.store);
    match aggregator.report(&opts) {
        Ok(report) => (StatusCode::OK, ApiResponse::ok(report)),
        Err(e) => (error_status(&e), ApiResponse::err(&e.to_string())),
    }
}

/// Dashboard view: every tracked item at its current step, newest activity
/// first
async fn get_items(State(state): State<SharedState>) -> impl IntoResponse {
    let aggregator = StatisticsAggregator::new(&state.store, &state.store);
    match aggregator.item_states(None) {
        Ok(states) => {
            let mut items: Vec<ItemState> = states.into_values().collect();
            items.sort_by(|a, b| {
                b.last_seen
                    .cmp(&a.last_seen)
                    .then_with(|| a.item_id.cmp(&b.item_id))
            });
            (
                StatusCode::OK,
                ApiResponse::ok(serde_json::json!({
                    "total": items.len(),
                    "items": items,
                })),
            )
        }
        Err(e) => (error_status(&e), ApiResponse::err(&e.to_string())),
    }
}

async fn get_item_history(
    State(state): State<SharedState>,
    Path(item_id): Path<String>,
) -> impl IntoResponse {
    match state.store.fetch_item_events(&item_id, Utc::now()) {
        Ok(events) if events.is_empty() => (
            StatusCode::NOT_FOUND,
            ApiResponse::err(&format!("no events recorded for item '{}'", item_id)),
        ),
        Ok(events) => (
            StatusCode::OK,
            ApiResponse::ok(serde_json::json!({
                "item_id": item_id,
                "events": events,
            })),
        ),
        Err(e) => (error_status(&e), ApiResponse::err(&e.to_string())),
    }
}

/// Latest state per item, optionally filtered to one step
async fn get_inventory(
    State(state): State<SharedState>,
    Query(query): Query<InventoryQuery>,
) -> impl IntoResponse {
    let catalog = match state.store.fetch_catalog() {
        Ok(c) => c,
        Err(e) => return (error_status(&e), ApiResponse::err(&e.to_string())),
    };
    if let Some(step_name) = &query.step_name {
        if !catalog.steps().iter().any(|s| &s.name == step_name) {
            return (
                StatusCode::BAD_REQUEST,
                ApiResponse::err(&format!("unknown step name '{}'", step_name)),
            );
        }
    }

    let aggregator = StatisticsAggregator::new(&state.store, &state.store);
    match aggregator.item_states(None) {
        Ok(states) => {
            let mut items: Vec<ItemState> = states
                .into_values()
                .filter(|s| match &query.step_name {
                    Some(step) => &s.current_step_name == step,
                    None => true,
                })
                .collect();
            items.sort_by(|a, b| a.item_id.cmp(&b.item_id));
            (
                StatusCode::OK,
                ApiResponse::ok(serde_json::json!({ "inventory": items })),
            )
        }
        Err(e) => (error_status(&e), ApiResponse::err(&e.to_string())),
    }
}

async fn get_steps(State(state): State<SharedState>) -> impl IntoResponse {
    match state.store.fetch_catalog() {
        Ok(catalog) => (
            StatusCode::OK,
            ApiResponse::ok(serde_json::json!({ "steps": catalog.steps() })),
        ),
        Err(e) => (error_status(&e), ApiResponse::err(&e.to_string())),
    }
}

/// Append a batch of scan events (the reader-facing write path)
async fn ingest_events(
    State(state): State<SharedState>,
    Json(req): Json<IngestRequest>,
) -> impl IntoResponse {
    if req.events.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            ApiResponse::err("event batch is empty"),
        );
    }

    let batch_id = uuid::Uuid::new_v4();
    match state.store.append_events(&req.events) {
        Ok(count) => {
            tracing::info!(%batch_id, count, "ingested scan events");
            (
                StatusCode::CREATED,
                ApiResponse::ok(serde_json::json!({
                    "batch_id": batch_id,
                    "ingested": count,
                })),
            )
        }
        Err(e) => (error_status(&e), ApiResponse::err(&e.to_string())),
    }
}

// ============================================================================
// Setup
// ============================================================================

fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/statistics", get(get_statistics))
        .route("/api/items", get(get_items))
        .route("/api/items/{item_id}/history", get(get_item_history))
        .route("/api/inventory", get(get_inventory))
        .route("/api/steps", get(get_steps))
        .route("/api/events", post(ingest_events))
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let data_dir = PathBuf::from(std::env::var("MES_DATA_DIR").unwrap_or_else(|_| "data".to_string()));
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("mes.db");

    let store = SqliteStore::open(&db_path)?;
    if store.seed_catalog_if_empty(&StepCatalog::textile_default())? {
        tracing::info!("seeded default textile step catalog");
    }

    let state = Arc::new(AppState { store });
    let app = router(state);

    let bind = std::env::var("MES_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(db = %db_path.display(), %bind, "mes-server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
