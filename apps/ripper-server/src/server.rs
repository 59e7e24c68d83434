//! HTTP status-polling surface

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use ripper_core::{
    AnalysisRequest, JobId, ModelSelection, Platform, ServerConfig, SourceRef, ValidationError,
};
use ripper_workflow::WorkflowError;

use crate::app::AppState;

const DEFAULT_LIST_LIMIT: usize = 20;

pub struct Server {
    addr: SocketAddr,
    state: AppState,
}

impl Server {
    pub fn new(config: &ServerConfig, state: AppState) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", config.host, config.port))?;
        Ok(Self { addr, state })
    }

    pub async fn run(self) -> Result<()> {
        let app = router(self.state);
        info!("HTTP server listening on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .context("Failed to bind HTTP server")?;
        axum::serve(listener, app.into_make_service())
            .await
            .context("HTTP server error")?;
        Ok(())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/api/providers", get(list_providers))
        .route("/api/jobs", post(create_job).get(list_jobs))
        .route("/api/jobs/:id", get(job_status))
        .route("/api/jobs/:id/result", get(job_result))
        .route("/api/jobs/:id/report", get(job_report))
        .route("/api/jobs/:id/abort", post(abort_job))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// Errors

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<WorkflowError> for ApiError {
    fn from(e: WorkflowError) -> Self {
        let status = match &e {
            WorkflowError::Validation(_) => StatusCode::BAD_REQUEST,
            WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
            WorkflowError::NotRunning(_) | WorkflowError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            WorkflowError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        Self::new(StatusCode::BAD_REQUEST, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn parse_id(raw: &str) -> ApiResult<JobId> {
    raw.parse()
        .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, format!("Invalid job id: {}", raw)))
}

// Request bodies

fn default_platform() -> String {
    "instagram".to_string()
}

fn default_videos_per_creator() -> u32 {
    3
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Deserialize)]
pub struct StartJobBody {
    pub usernames: Vec<String>,
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default = "default_videos_per_creator")]
    pub videos_per_creator: u32,
    #[serde(default = "default_provider")]
    pub llm_provider: String,
    #[serde(default = "default_model")]
    pub llm_model: String,
}

impl StartJobBody {
    fn into_request(self) -> std::result::Result<AnalysisRequest, ValidationError> {
        let platform: Platform = self.platform.parse()?;
        Ok(AnalysisRequest::new(
            self.usernames
                .into_iter()
                .map(|name| SourceRef::new(platform, name))
                .collect(),
            self.videos_per_creator,
            ModelSelection::new(self.llm_provider, self.llm_model),
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub state: Option<String>,
    pub limit: Option<usize>,
}

// Route handlers

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "service": "Content Skeleton Ripper",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

async fn list_providers(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.providers())
}

async fn create_job(
    State(state): State<AppState>,
    Json(body): Json<StartJobBody>,
) -> ApiResult<Response> {
    let request = body.into_request()?;
    let id = state.orchestrator.create(request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "job_id": id,
            "status": "pending",
            "message": "Job started"
        })),
    )
        .into_response())
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Response> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let jobs = match query.state.as_deref() {
        Some("active") => state.orchestrator.list_active().await,
        None | Some("recent") => state.orchestrator.list_recent(limit).await,
        Some(other) => {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                format!("Unknown state filter: {}", other),
            ))
        }
    };
    Ok(Json(jobs).into_response())
}

async fn job_status(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let snapshot = state.orchestrator.status(parse_id(&id)?).await?;
    Ok(Json(snapshot).into_response())
}

async fn job_result(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let record = state.orchestrator.result(parse_id(&id)?).await?;
    Ok(Json(record).into_response())
}

async fn job_report(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let record = state.orchestrator.result(parse_id(&id)?).await?;
    match record.outputs.report {
        Some(report) => Ok((
            [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
            report,
        )
            .into_response()),
        None => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("Job {} has no report (phase {})", record.id, record.phase),
        )),
    }
}

async fn abort_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let snapshot = state.orchestrator.abort(parse_id(&id)?).await?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use ripper_core::{AppConfig, StorageConfig};
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn app() -> (TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig {
            storage: StorageConfig::new(dir.path()),
            ..AppConfig::default()
        };
        config.retry.max_attempts = 1;
        config.fetch.scraper_base_url = "http://127.0.0.1:9".to_string();
        let state = AppState::new(config).await.unwrap();
        (dir, router(state))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_root_handler() {
        let response = root().await;
        assert_eq!(response.0["service"], "Content Skeleton Ripper");
    }

    #[tokio::test]
    async fn test_health_check_handler() {
        assert_eq!(health_check().await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_providers_report_availability() {
        let (_dir, app) = app().await;
        let (status, body) = send(&app, get("/api/providers")).await;

        assert_eq!(status, StatusCode::OK);
        let providers = body.as_array().unwrap();
        assert_eq!(providers.len(), 4);
        let openai = providers.iter().find(|p| p["id"] == "openai").unwrap();
        assert_eq!(openai["available"], false);
    }

    #[tokio::test]
    async fn test_create_job_validation() {
        let (_dir, app) = app().await;

        let (status, body) = send(&app, post_json("/api/jobs", json!({"usernames": []}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("At least one source"));

        let (status, _) = send(
            &app,
            post_json("/api/jobs", json!({"usernames": ["alice"], "platform": "myspace"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // No API key configured for the default provider.
        let (status, body) = send(&app, post_json("/api/jobs", json!({"usernames": ["alice"]}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("not available"));
    }

    #[tokio::test]
    async fn test_job_lifecycle_over_http() {
        let (_dir, app) = app().await;

        let (status, body) = send(
            &app,
            post_json(
                "/api/jobs",
                json!({"usernames": ["@alice"], "llm_provider": "local", "llm_model": "llama3"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let id = body["job_id"].as_str().unwrap().to_string();

        let (status, body) = send(&app, get(&format!("/api/jobs/{}", id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["request"]["sources"][0]["creator"], "alice");

        let (status, body) = send(&app, get("/api/jobs?limit=5")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, _) = send(&app, get(&format!("/api/jobs/{}/result", id))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_ids() {
        let (_dir, app) = app().await;

        let (status, _) = send(&app, get("/api/jobs/not-a-uuid")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, get(&format!("/api/jobs/{}", JobId::new()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let missing = JobId::new();
        let (status, _) = send(
            &app,
            Request::post(format!("/api/jobs/{}/abort", missing))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, get("/api/jobs?state=sideways")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
