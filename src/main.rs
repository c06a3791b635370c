mod audit;
mod http;
mod jobs;
mod market;
mod metrics;
mod models;
mod pipeline;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use models::{ApiError, AuditRequest, AuditResponse, Submission};
use pipeline::{Pipeline, PipelineError, PipelineErrorKind};
use serde::Serialize;
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

const REPORT_FILENAME: &str = "result.txt";

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target: "audit.api", "server crashed: {err}");
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let pipeline = Pipeline::from_env();
    info!(
        target: "audit.api",
        endpoint = %market::config::API_URL.as_str(),
        chunk_size = pipeline.config.chunk_size,
        delay_secs = pipeline.config.request_delay.as_secs(),
        report_dir = %pipeline.config.report_dir.display(),
        "pipeline configured"
    );
    let (queue, _worker) = jobs::JobQueue::spawn(pipeline.clone());
    let state = AppState {
        pipeline,
        queue,
        openapi: Arc::new(load_openapi()),
        docs_key: std::env::var("OPENAPI_KEY").ok().filter(|k| !k.is_empty()),
    };

    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let app = build_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target: "audit.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    queue: jobs::JobQueue,
    openapi: Arc<serde_json::Value>,
    docs_key: Option<String>,
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/usage", get(usage))
        .route("/openapi.json", get(openapi_json))
        .route("/reports", post(create_report))
        .route("/reports/file", post(create_report_from_file))
        .nest(
            "/jobs",
            Router::new()
                .route("/reports", post(enqueue_report_job))
                .route("/{id}", get(get_job_status))
                .route("/{id}/report", get(download_job_report)),
        )
        .with_state(state)
}

fn load_openapi() -> serde_json::Value {
    serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
        .unwrap_or(json!({"openapi": "3.0.3"}))
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "market-audit-rs",
    }))
}

async fn usage(State(state): State<AppState>) -> Json<serde_json::Value> {
    let limit = state.pipeline.config.max_text_lines;
    Json(json!({
        "message": format!(
            "Send item links as text, one per line, up to {limit} links per message. \
             Larger lists are better sent as a file."
        ),
        "max_text_lines": limit,
        "line_format": "https://lzt.market/<item id>/",
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Some(key) = state.docs_key.as_deref() {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(AppError::Unauthorized);
        }
    }
    Ok(Json((*state.openapi).clone()))
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(1024 * 1024)
}

/// Audit links pasted as text.
///
/// - Method: `POST`
/// - Path: `/reports`
/// - Body: `AuditRequest`
/// - Response: `AuditResponse` (summary, report text, per-stage transcript)
async fn create_report(
    State(state): State<AppState>,
    Json(payload): Json<AuditRequest>,
) -> Result<Json<AuditResponse>, AppError> {
    crate::metrics::inc_requests("/reports");
    let response = state.pipeline.run(Submission::Text(payload.text)).await?;
    state.pipeline.discard_report(&response).await;
    Ok(Json(response))
}

/// Audit an uploaded links file; responds with the report document.
///
/// - Method: `POST`
/// - Path: `/reports/file`
/// - Body: raw file content
async fn create_report_from_file(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, AppError> {
    crate::metrics::inc_requests("/reports/file");
    let response = state.pipeline.run(Submission::File(body.to_vec())).await?;
    state.pipeline.discard_report(&response).await;
    Ok(report_attachment(response.report))
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
}

async fn enqueue_report_job(
    State(state): State<AppState>,
    Json(payload): Json<AuditRequest>,
) -> Result<Json<EnqueueResponse>, AppError> {
    crate::metrics::inc_requests("/jobs/reports");
    let id = state
        .queue
        .enqueue(Submission::Text(payload.text))
        .await
        .map_err(|err| {
            AppError::Pipeline(PipelineError::internal(
                "enqueue",
                err.detail.unwrap_or(err.error),
            ))
        })?;
    Ok(Json(EnqueueResponse {
        job_id: id.to_string(),
    }))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let uuid = parse_job_id(&id)?;
    state
        .queue
        .get(uuid)
        .await
        .map(Json)
        .ok_or(AppError::NotFound("job_not_found"))
}

async fn download_job_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let uuid = parse_job_id(&id)?;
    let path = state
        .queue
        .report_path(uuid)
        .await
        .ok_or(AppError::NotFound("report_not_ready"))?;
    let body = tokio::fs::read_to_string(&path)
        .await
        .map_err(|err| AppError::Pipeline(PipelineError::internal("report", err.to_string())))?;
    state.queue.release(uuid).await;
    Ok(report_attachment(body))
}

fn parse_job_id(id: &str) -> Result<uuid::Uuid, AppError> {
    uuid::Uuid::parse_str(id)
        .map_err(|_| AppError::Pipeline(PipelineError::invalid_input("jobs", "invalid_job_id")))
}

fn report_attachment(body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{REPORT_FILENAME}\""),
            ),
        ],
        body,
    )
        .into_response()
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
    NotFound(&'static str),
    Unauthorized,
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    PipelineErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let payload = ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, Json(payload)).into_response()
            }
            AppError::NotFound(code) => {
                let payload = ApiError {
                    error: code.to_string(),
                    detail: None,
                };
                (StatusCode::NOT_FOUND, Json(payload)).into_response()
            }
            AppError::Unauthorized => {
                let payload = ApiError {
                    error: "unauthorized".into(),
                    detail: None,
                };
                (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{LookupClient, mock::MockMarket};
    use crate::pipeline::PipelineConfig;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(url: &str, dir: &std::path::Path) -> Router {
        app_with_docs_key(url, dir, None)
    }

    fn app_with_docs_key(url: &str, dir: &std::path::Path, docs_key: Option<&str>) -> Router {
        let config = PipelineConfig {
            request_delay: Duration::ZERO,
            report_dir: dir.to_path_buf(),
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::new(config, LookupClient::new(url, "t"));
        let (queue, _worker) = jobs::JobQueue::spawn(pipeline.clone());
        build_router(AppState {
            pipeline,
            queue,
            openapi: Arc::new(load_openapi()),
            docs_key: docs_key.map(str::to_string),
        })
    }

    async fn body_text(resp: Response) -> String {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn json_post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_and_openapi() {
        let dir = tempfile::tempdir().unwrap();
        let app = app("http://127.0.0.1:9/bulk-items", dir.path());

        let resp = app.clone().oneshot(get_req("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp).await.contains("market-audit-rs"));

        let resp = app.oneshot(get_req("/openapi.json")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let doc: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert!(doc["paths"].get("/reports").is_some());
    }

    #[tokio::test]
    async fn malformed_text_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = app("http://127.0.0.1:9/bulk-items", dir.path());
        let resp = app
            .oneshot(json_post("/reports", json!({"text": "https://lzt.market/abc/"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let payload: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(payload["error"], json!("normalize_ids"));
    }

    #[tokio::test]
    async fn file_upload_returns_report_document() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockMarket::spawn(|_, _| {
            (
                200,
                json!({"items": {"1001": {"item": {"item_state": "paid", "priceWithSellerFee": 500}}}}),
            )
        })
        .await;
        let app = app(mock.url(), dir.path());
        let req = Request::builder()
            .method("POST")
            .uri("/reports/file")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("https://lzt.market/1001/\n"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"result.txt\""
        );
        let text = body_text(resp).await;
        assert!(text.starts_with("📊 Sold accounts: 1\n"));
        assert!(text.contains("500 RUB (-30%: 350)"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn queued_job_report_can_be_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockMarket::spawn(|_, _| (200, json!({"items": {"7": "hidden"}}))).await;
        let app = app(mock.url(), dir.path());

        let resp = app
            .clone()
            .oneshot(json_post("/jobs/reports", json!({"text": "https://lzt.market/7/"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let payload: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        let job_id = payload["job_id"].as_str().unwrap().to_string();

        let mut state = String::new();
        for _ in 0..200 {
            let resp = app
                .clone()
                .oneshot(get_req(&format!("/jobs/{job_id}")))
                .await
                .unwrap();
            let info: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
            state = info["state"].as_str().unwrap_or_default().to_string();
            if state == "completed" || state == "failed" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(state, "completed");

        let resp = app
            .clone()
            .oneshot(get_req(&format!("/jobs/{job_id}/report")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp).await.contains("🗑️ Deleted / no access:\n- 7\n"));

        let resp = app
            .oneshot(get_req(&format!("/jobs/{job_id}/report")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn text_report_artifact_is_removed_after_response() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockMarket::spawn(|_, _| (200, json!({"items": {}}))).await;
        let app = app(mock.url(), dir.path());
        for id in 1..=3 {
            let resp = app
                .clone()
                .oneshot(json_post(
                    "/reports",
                    json!({"text": format!("https://lzt.market/{id}/")}),
                ))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn docs_require_matching_key() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with_docs_key("http://127.0.0.1:9/bulk-items", dir.path(), Some("k1"));

        let resp = app.clone().oneshot(get_req("/openapi.json")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .uri("/openapi.json")
            .header("X-Docs-Key", "k1")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_and_invalid_job_ids() {
        let dir = tempfile::tempdir().unwrap();
        let app = app("http://127.0.0.1:9/bulk-items", dir.path());

        let resp = app.clone().oneshot(get_req("/jobs/not-a-uuid")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .oneshot(get_req(&format!("/jobs/{}", uuid::Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
