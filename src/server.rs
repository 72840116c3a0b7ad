//! HTTP API over ingestion and retrieval.
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `GET`  | `/health` | none | Health check (returns version) |
//! | `POST` | `/rag/resources` | `X-API-Key` | Ingest the configured folder, `201` with the report |
//! | `POST` | `/rag/search` | `X-API-Key` | Ranked chunks plus an assembled prompt context |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unauthorized", "message": "missing X-API-Key header" } }
//! ```
//!
//! | Status | Code | When |
//! |--------|------|------|
//! | 400 | `bad_request` | invalid request parameters |
//! | 401 | `unauthorized` | `X-API-Key` header missing |
//! | 403 | `forbidden` | `X-API-Key` does not match the shared secret |
//! | 500 | `config_error` | no shared secret configured, missing resource folder, vector dimension mismatch |
//! | 503 | `unavailable` | store or embedding provider failure |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::ingest::{ingest_all, IngestOptions, IngestReport};
use crate::migrate;
use crate::models::ChunkMatch;
use crate::search::{build_context, search, RetrievalError};
use crate::store::sqlite::SqliteStore;
use crate::store::ResourceStore;

const API_KEY_HEADER: &str = "x-api-key";

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    store: Arc<dyn ResourceStore>,
    provider: Arc<dyn EmbeddingProvider>,
    /// Shared secret for `/rag/*`; `None` rejects every request with 500.
    api_key: Option<String>,
    /// Serializes ingestion runs; searches never wait on it.
    ingest_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn ResourceStore>,
        provider: Arc<dyn EmbeddingProvider>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            provider,
            api_key: api_key.filter(|k| !k.is_empty()),
            ingest_lock: Arc::new(Mutex::new(())),
        }
    }
}

/// Build the router with every route, the auth layer, and CORS.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let rag = Router::new()
        .route("/rag/resources", post(handle_ingest))
        .route("/rag/search", post(handle_search))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .merge(rag)
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Serve the API on an already-bound listener until the process stops.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Starts the HTTP server on `[server].bind`.
///
/// The shared secret is read from the environment variable named by
/// `[server].api_key_env`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::migrate(&pool).await?;

    let store: Arc<dyn ResourceStore> = Arc::new(SqliteStore::new(pool));
    let provider: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&config.embedding)?);

    if !config.embedding.is_enabled() {
        warn!("embedding provider is disabled; ingestion and search requests will fail");
    }

    let api_key = std::env::var(&config.server.api_key_env).ok();
    if api_key.as_deref().map_or(true, str::is_empty) {
        warn!(
            env = %config.server.api_key_env,
            "no API key configured; /rag routes will reject every request"
        );
    }

    let state = AppState::new(config.clone(), store, provider, api_key);
    let listener = TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "RAG server listening");

    serve(listener, state).await
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn config_error(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "config_error", message)
}

fn unavailable(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::SERVICE_UNAVAILABLE, "unavailable", message)
}

// ============ Auth ============

async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let expected = match state.api_key.as_deref() {
        Some(k) => k,
        None => return Err(config_error("API key is not configured on the server")),
    };

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    match provided {
        None => Err(AppError::new(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing X-API-Key header",
        )),
        Some(key) if !key_matches(key, expected) => Err(AppError::new(
            StatusCode::FORBIDDEN,
            "forbidden",
            "invalid API key",
        )),
        Some(_) => Ok(next.run(request).await),
    }
}

/// Constant-time comparison of the presented key with the configured one.
fn key_matches(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /rag/resources ============

async fn handle_ingest(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<IngestReport>), AppError> {
    let _guard = state.ingest_lock.lock().await;
    let folder = &state.config.ingest.folder;
    let opts = IngestOptions::from_config(&state.config);

    let report = ingest_all(state.store.as_ref(), state.provider.as_ref(), folder, &opts)
        .await
        .map_err(|e| {
            error!(error = %format!("{:#}", e), "ingestion run failed");
            config_error(format!("{:#}", e))
        })?;

    Ok((StatusCode::CREATED, Json(report)))
}

// ============ POST /rag/search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    resource_names: Option<Vec<String>>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<ChunkMatch>,
    context: String,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let top_k = req.top_k.unwrap_or(state.config.retrieval.top_k);
    if top_k == 0 {
        return Err(bad_request("top_k must be >= 1"));
    }

    let results = search(
        state.store.as_ref(),
        state.provider.as_ref(),
        &req.query,
        top_k,
        req.resource_names.as_deref(),
    )
    .await
    .map_err(|e| {
        if e.downcast_ref::<RetrievalError>().is_some() {
            config_error(e.to_string())
        } else {
            error!(error = %format!("{:#}", e), "search failed");
            unavailable(format!("{:#}", e))
        }
    })?;

    let context = build_context(&results);
    Ok(Json(SearchResponse { results, context }))
}
