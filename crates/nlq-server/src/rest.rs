//! Request routing

use axum::{
    Router,
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use nlq_core::config::DatabaseConfig;
use nlq_core::error::Error;
use nlq_core::types::{QueryRequest, QueryResponse};
use nlq_db::pool::{PoolManager, PoolStatus};
use nlq_db::registry::DatabaseDescriptor;
use nlq_orchestrator::Orchestrator;
use nlq_telemetry::Metrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub pools: Arc<PoolManager>,
    pub metrics: Arc<Metrics>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/v1/query", post(query))
        .route("/api/v1/sql", post(execute_sql))
        .route("/api/v1/databases", get(list_databases).post(register_database))
        .route(
            "/api/v1/databases/:name/refresh-schema",
            post(refresh_schema),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
    pools: Vec<PoolStatus>,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let pools = state.pools.status().await;
    Json(HealthResponse {
        ok: !state.pools.is_closing(),
        pools,
    })
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render_prometheus()
}

async fn query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Json<QueryResponse> {
    Json(state.orchestrator.query(request).await)
}

#[derive(Debug, Deserialize)]
struct SqlRequest {
    #[serde(default)]
    database: Option<String>,
    sql: String,
}

async fn execute_sql(
    State(state): State<AppState>,
    Json(request): Json<SqlRequest>,
) -> Json<QueryResponse> {
    Json(
        state
            .orchestrator
            .execute_sql(request.database.as_deref(), &request.sql)
            .await,
    )
}

#[derive(Debug, Serialize)]
struct DatabaseEntry {
    name: String,
    dialect: String,
}

async fn list_databases(State(state): State<AppState>) -> impl IntoResponse {
    let databases: Vec<DatabaseEntry> = state
        .pools
        .registry()
        .list()
        .into_iter()
        .map(|(name, dialect)| DatabaseEntry {
            name,
            dialect: dialect.tag().to_string(),
        })
        .collect();
    Json(databases)
}

async fn register_database(
    State(state): State<AppState>,
    Json(config): Json<DatabaseConfig>,
) -> Result<Json<serde_json::Value>, AppError> {
    let descriptor = DatabaseDescriptor::from_config(&config)?;
    state.pools.registry().register(descriptor)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Serialize)]
struct RefreshResponse {
    ok: bool,
}

async fn refresh_schema(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<RefreshResponse>, AppError> {
    state.orchestrator.refresh_schema(&name).await?;
    Ok(Json(RefreshResponse { ok: true }))
}

// Error handling for the administrative endpoints; pipeline endpoints embed
// their errors in the response body instead.
pub struct AppError(Error);

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match kind {
            nlq_core::ErrorKind::UnknownDb => StatusCode::NOT_FOUND,
            nlq_core::ErrorKind::ConfigError | nlq_core::ErrorKind::InvalidRequest => {
                StatusCode::BAD_REQUEST
            }
            nlq_core::ErrorKind::PoolClosing => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({
            "error": {
                "kind": kind.as_str(),
                "message": self.0.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}
