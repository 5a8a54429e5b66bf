use axum::{
    body::Body,
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::{header, Request},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use anyhow::Context;

use crate::config::ServiceConfig;
use crate::error::{ApiError, ApiResult};
use crate::fallback::FallbackClassifier;
use crate::llm_service::LLMServiceClient;
use crate::orchestrator::{labels, Orchestrator};
use crate::rule_matcher::RuleMatcher;
use crate::table::{ensure_csv_filename, LogTable, LABEL_COLUMN};

const UPLOAD_FIELD: &str = "file";

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub output_path: PathBuf,
    pub max_upload_bytes: usize,
    /// Serializes writes of the shared output artifact
    output_lock: Mutex<()>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, output_path: PathBuf, max_upload_bytes: usize) -> Self {
        Self {
            orchestrator,
            output_path,
            max_upload_bytes,
            output_lock: Mutex::new(()),
        }
    }

    /// Wire rules, LLM backend, fallback and orchestrator from configuration
    pub fn from_config(config: &ServiceConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let rules = match &config.rules_file {
            Some(path) => RuleMatcher::from_json_file(path)
                .with_context(|| format!("Failed to load rules from {}", path.display()))?,
            None => RuleMatcher::with_default_rules(),
        };
        info!(
            "Rule matcher ready: {} rules for {} sources",
            rules.rule_count(),
            rules.sources().len()
        );

        let backend = LLMServiceClient::new(config.llm.clone(), config.fallback.taxonomy.clone())?;
        let fallback = FallbackClassifier::new(Arc::new(backend), config.fallback.clone())?;
        let orchestrator = Orchestrator::new(Arc::new(rules), fallback);

        Ok(Self::new(
            Arc::new(orchestrator),
            config.output_path.clone(),
            config.max_upload_bytes,
        ))
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    rules_loaded: usize,
    rule_sources: Vec<String>,
    fallback: String,
    timestamp: DateTime<Utc>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.max_upload_bytes;

    Router::new()
        .route("/health", get(health))
        .route("/classify/", post(classify_logs))
        .route("/classify", post(classify_logs))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(log_request_middleware))
}

/// Log method, URI and content type of each request and the response status
async fn log_request_middleware(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    info!("📥 {} {} ({})", method, uri, content_type);
    let response = next.run(req).await;
    info!("📤 {} {} -> {}", method, uri, response.status());

    response
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let rules = state.orchestrator.rules();
    Json(HealthResponse {
        status: "healthy".to_string(),
        rules_loaded: rules.rule_count(),
        rule_sources: rules.sources().into_iter().map(String::from).collect(),
        fallback: state.orchestrator.fallback().backend_name().to_string(),
        timestamp: Utc::now(),
    })
}

/// Upload a CSV, classify every row, return the table with `target_label`
async fn classify_logs(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Response> {
    let multipart = multipart.map_err(|err| {
        ApiError::BadRequest(format!("Expected a multipart upload: {}", err.body_text()))
    })?;

    let result = process_upload(&state, multipart).await;
    // The multipart stream has been consumed or dropped by now on every path
    info!("Closed uploaded file stream.");
    result
}

async fn process_upload(state: &AppState, mut multipart: Multipart) -> ApiResult<Response> {
    let (filename, bytes) = read_upload(&mut multipart).await?;
    info!("Received file: {} ({} bytes)", filename, bytes.len());

    let mut table = LogTable::from_csv_bytes(&bytes)?;
    info!("CSV loaded. Columns: {:?}", table.headers());

    let records = table.log_records()?;
    info!("Starting classification on {} logs.", records.len());

    let results = state.orchestrator.classify(&records).await;
    if results.len() != records.len() {
        return Err(ApiError::Internal(format!(
            "classifier returned {} results for {} records",
            results.len(),
            records.len()
        )));
    }
    table.set_column(LABEL_COLUMN, labels(&results))?;
    info!("Classification complete.");

    let csv_bytes = {
        let _guard = state.output_lock.lock().await;
        table.write_atomic(&state.output_path).await?
    };
    info!("Output file saved at: {}", state.output_path.display());

    let download_name = state
        .output_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("output.csv")
        .to_string();

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", download_name),
            ),
        ],
        csv_bytes,
    )
        .into_response())
}

/// Find the `file` field, check its name, then read it
async fn read_upload(multipart: &mut Multipart) -> ApiResult<(String, Vec<u8>)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart data: {}", e.body_text())))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        // Validate before reading the body so bad uploads do no work
        ensure_csv_filename(&filename)?;

        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e.body_text())))?;
        return Ok((filename, bytes.to_vec()));
    }

    Err(ApiError::BadRequest(format!(
        "No '{}' field in upload",
        UPLOAD_FIELD
    )))
}
