//! REST surface over axum.
//!
//! Every response shares the `{success, data|error, requestId, durationMs}`
//! envelope; all request and response bodies use camelCase field names.
//! Validation failures map to 400 with the full `fieldErrors` array;
//! scheduler guards map to 409/503. Handlers run storage work on the
//! blocking pool and report foreground load to the consolidation scheduler's
//! gauge.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::config::{ConfigHandle, EngramConfig};
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::{MemoryError, MemoryResult};
use crate::memory::export::{ExportFilter, ImportMode, ImportOptions};
use crate::memory::scheduler::ConsolidationScheduler;
use crate::memory::search::SearchQuery;
use crate::memory::store::{CreateMemoryRequest, UpdateMemoryRequest};
use crate::memory::{consolidate, export, maintenance, search, store, CancelToken};
use crate::validation::FieldError;

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<rusqlite::Connection>>,
    pub embedding: Arc<dyn EmbeddingProvider>,
    pub config: Arc<ConfigHandle>,
    pub scheduler: Arc<ConsolidationScheduler>,
}

/// The shared response envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ApiError>,
    request_id: String,
    duration_ms: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiError {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field_errors: Option<Vec<FieldError>>,
}

fn http_status(error: &MemoryError) -> StatusCode {
    match error {
        MemoryError::Validation { .. }
        | MemoryError::InvalidCronExpression(_)
        | MemoryError::InvalidReinforcementType(_)
        | MemoryError::BoostRequired => StatusCode::BAD_REQUEST,
        MemoryError::NotFound { .. } => StatusCode::NOT_FOUND,
        MemoryError::JobInProgress | MemoryError::Cancelled => StatusCode::CONFLICT,
        MemoryError::LoadThresholdExceeded => StatusCode::SERVICE_UNAVAILABLE,
        MemoryError::StorageFailed(_) | MemoryError::EmbeddingFailed(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn respond<T: Serialize>(
    started: Instant,
    result: MemoryResult<T>,
) -> (StatusCode, Json<ApiResponse<T>>) {
    let request_id = uuid::Uuid::now_v7().to_string();
    let duration_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(data) => (
            StatusCode::OK,
            Json(ApiResponse {
                success: true,
                data: Some(data),
                error: None,
                request_id,
                duration_ms,
            }),
        ),
        Err(error) => {
            let status = http_status(&error);
            let field_errors = match &error {
                MemoryError::Validation { field_errors } => Some(field_errors.clone()),
                _ => None,
            };
            (
                status,
                Json(ApiResponse {
                    success: false,
                    data: None,
                    error: Some(ApiError {
                        code: error.code().to_string(),
                        message: error.to_string(),
                        field_errors,
                    }),
                    request_id,
                    duration_ms,
                }),
            )
        }
    }
}

/// Run a storage closure on the blocking pool, holding a load permit.
async fn run_blocking<T, F>(state: &AppState, work: F) -> MemoryResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut rusqlite::Connection, &dyn EmbeddingProvider, &EngramConfig) -> MemoryResult<T>
        + Send
        + 'static,
{
    let db = state.db.clone();
    let provider = state.embedding.clone();
    let config = state.config.snapshot();
    let permit = state.scheduler.load_gauge().enter();

    let result = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        let mut conn = db.lock().expect("db lock poisoned");
        work(&mut conn, provider.as_ref(), &config)
    })
    .await
    .map_err(|e| MemoryError::StorageFailed(format!("blocking task failed: {e}")))?;
    result
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn create_memory(
    State(state): State<AppState>,
    Json(request): Json<CreateMemoryRequest>,
) -> impl axum::response::IntoResponse {
    let started = Instant::now();
    let result = run_blocking(&state, move |conn, provider, config| {
        store::create_memory(conn, provider, &request, &config.decay, &config.storage.namespace)
    })
    .await;
    respond(started, result)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserParam {
    user_id: String,
}

async fn get_memory(
    State(state): State<AppState>,
    Path(memory_id): Path<String>,
    Query(params): Query<UserParam>,
) -> impl axum::response::IntoResponse {
    let started = Instant::now();
    let result = run_blocking(&state, move |conn, _, config| {
        store::get_memory(conn, &memory_id, &params.user_id, &config.decay)?.ok_or(
            MemoryError::NotFound { id: memory_id },
        )
    })
    .await;
    respond(started, result)
}

async fn update_memory(
    State(state): State<AppState>,
    Path(memory_id): Path<String>,
    Query(params): Query<UserParam>,
    Json(request): Json<UpdateMemoryRequest>,
) -> impl axum::response::IntoResponse {
    let started = Instant::now();
    let result = run_blocking(&state, move |conn, provider, config| {
        store::update_memory(
            conn,
            provider,
            &memory_id,
            &params.user_id,
            &request,
            &config.storage.namespace,
        )
    })
    .await;
    respond(started, result)
}

async fn search_memories(
    State(state): State<AppState>,
    Json(query): Json<SearchQuery>,
) -> impl axum::response::IntoResponse {
    let started = Instant::now();
    let result = run_blocking(&state, move |conn, provider, config| {
        search::search(conn, provider, &query, &config.search, &config.storage.namespace)
    })
    .await;
    respond(started, result)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsolidateRequest {
    user_id: String,
    similarity_threshold: Option<f64>,
    min_cluster_size: Option<usize>,
    batch_size: Option<usize>,
    strength_reduction_factor: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConsolidateResponse {
    results: Vec<consolidate::ConsolidationOutcome>,
    total_consolidated: usize,
    clusters_processed: usize,
    timestamp: String,
}

async fn trigger_consolidation(
    State(state): State<AppState>,
    Json(request): Json<ConsolidateRequest>,
) -> impl axum::response::IntoResponse {
    let started = Instant::now();
    let scheduler = state.scheduler.clone();

    let result = run_blocking(&state, move |conn, provider, config| {
        let value = serde_json::json!({
            "userId": request.user_id,
            "similarityThreshold": request.similarity_threshold,
            "minClusterSize": request.min_cluster_size,
            "batchSize": request.batch_size,
            "strengthReductionFactor": request.strength_reduction_factor,
        });
        crate::validation::check("consolidate.request", &value)
            .map_err(|field_errors| MemoryError::Validation { field_errors })?;

        let mut cfg = config.consolidation.clone();
        if let Some(v) = request.similarity_threshold {
            cfg.similarity_threshold = v;
        }
        if let Some(v) = request.min_cluster_size {
            cfg.min_cluster_size = v;
        }
        if let Some(v) = request.batch_size {
            cfg.batch_size = v;
        }
        if let Some(v) = request.strength_reduction_factor {
            cfg.strength_reduction_factor = v;
        }

        let report = scheduler.trigger_now(
            conn,
            provider,
            &request.user_id,
            &cfg,
            &config.decay,
            &config.storage.namespace,
        )?;
        Ok(ConsolidateResponse {
            total_consolidated: report.total_consolidated,
            clusters_processed: report.clusters_processed,
            results: report.results,
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
    })
    .await;
    respond(started, result)
}

async fn consolidation_status(
    State(state): State<AppState>,
) -> impl axum::response::IntoResponse {
    let started = Instant::now();
    let batch_size = state.config.snapshot().consolidation.batch_size;
    let status = state.scheduler.status(batch_size);
    respond(started, Ok(status))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportParams {
    user_id: String,
    #[serde(default)]
    created_after: Option<String>,
    #[serde(default)]
    created_before: Option<String>,
    #[serde(default)]
    min_strength: Option<f64>,
}

async fn export_memories(
    State(state): State<AppState>,
    Query(params): Query<ExportParams>,
) -> impl axum::response::IntoResponse {
    let started = Instant::now();
    let result = run_blocking(&state, move |conn, _, config| {
        let filter = ExportFilter {
            created_after: params.created_after.clone(),
            created_before: params.created_before.clone(),
            min_strength: params.min_strength,
            ..ExportFilter::default()
        };
        export::export_memories(conn, &params.user_id, &filter, &config.storage.namespace)
    })
    .await;
    respond(started, result)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportRequest {
    user_id: String,
    mode: ImportMode,
    #[serde(default)]
    regenerate_embeddings: bool,
    data: serde_json::Value,
}

async fn import_memories(
    State(state): State<AppState>,
    Json(request): Json<ImportRequest>,
) -> impl axum::response::IntoResponse {
    let started = Instant::now();
    let result = run_blocking(&state, move |conn, provider, config| {
        let value = serde_json::json!({
            "userId": request.user_id,
            "mode": request.mode.as_str(),
        });
        crate::validation::check("import.request", &value)
            .map_err(|field_errors| MemoryError::Validation { field_errors })?;

        export::import_memories(
            conn,
            provider,
            &request.user_id,
            &request.data,
            ImportOptions {
                mode: request.mode,
                regenerate_embeddings: request.regenerate_embeddings,
            },
            &config.decay,
            &config.storage.namespace,
        )
    })
    .await;
    respond(started, result)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateRequest {
    data: serde_json::Value,
    #[serde(default)]
    regenerate_embeddings: bool,
}

async fn validate_import(
    Json(request): Json<ValidateRequest>,
) -> impl axum::response::IntoResponse {
    let started = Instant::now();
    respond(
        started,
        Ok(export::validate_import(
            &request.data,
            request.regenerate_embeddings,
        )),
    )
}

// ── Wiring ───────────────────────────────────────────────────────────────────

/// Build the router for the given state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/memory", post(create_memory))
        .route("/api/v1/memory/search", post(search_memories))
        .route("/api/v1/memory/consolidate", post(trigger_consolidation))
        .route("/api/v1/memory/consolidate/status", get(consolidation_status))
        .route("/api/v1/memory/export", get(export_memories))
        .route("/api/v1/memory/import", post(import_memories))
        .route("/api/v1/memory/import/validate", post(validate_import))
        .route("/api/v1/memory/{id}", get(get_memory).put(update_memory))
        .with_state(state)
}

/// Open the database, create the embedding provider, and serve HTTP until
/// ctrl-c. Also wires the scheduled decay maintenance job.
pub async fn serve(config: EngramConfig) -> anyhow::Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    let conn = db::open_database(config.resolved_db_path())?;
    if let Ok(Some(stored_model)) = db::migrations::get_embedding_model(&conn) {
        if stored_model != config.embedding.model {
            tracing::warn!(
                stored = %stored_model,
                configured = %config.embedding.model,
                "embedding model changed — stored vectors may be stale"
            );
        }
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let schedule = maintenance::schedule_decay_job(&config.server.decay_schedule)?;

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        embedding: Arc::from(provider),
        config: Arc::new(ConfigHandle::new(config)),
        scheduler: Arc::new(ConsolidationScheduler::default()),
    };

    spawn_decay_job(state.clone(), schedule);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "engram listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to listen for ctrl-c");
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}

/// Periodic decay maintenance driven by the validated schedule.
fn spawn_decay_job(state: AppState, schedule: maintenance::DecaySchedule) {
    let interval = schedule.tick_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            let db = state.db.clone();
            let config = state.config.snapshot();
            let outcome = tokio::task::spawn_blocking(move || {
                let mut conn = db.lock().expect("db lock poisoned");
                maintenance::run_decay_maintenance(
                    &mut conn,
                    &config.decay,
                    &config.storage.namespace,
                    &CancelToken::new(),
                )
            })
            .await;
            match outcome {
                Ok(Ok(report)) => tracing::info!(
                    processed = report.processed_count,
                    pruned = report.pruned_count,
                    "scheduled decay maintenance done"
                ),
                Ok(Err(e)) => tracing::error!(error = %e, "scheduled decay maintenance failed"),
                Err(e) => tracing::error!(error = %e, "decay maintenance task panicked"),
            }
        }
    });
}
