use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use qgpt_core::{Pipeline, Settings};
use qgpt_receipts::ReceiptLog;
use qgpt_store::{Catalog, FixtureDir};
use qgpt_types::{PipelineResult, QueryRequest};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    receipts: Option<Arc<ReceiptLog>>,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    result: PipelineResult,
    /// Repair ran and its SQL still fails validation.
    still_invalid: bool,
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/query", post(query))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config_path = std::env::var("QGPT_CONFIG").unwrap_or_else(|_| "qgpt.yml".into());
    let settings = Settings::load_or_default(Some(PathBuf::from(config_path).as_path()))?;
    let fixtures = std::env::var("QGPT_FIXTURES").ok().map(PathBuf::from);
    let fixtures = settings.fixtures_dir(fixtures.as_deref());
    let catalog = Arc::new(Catalog::load(&FixtureDir::new(&fixtures))?);
    let pipeline = Arc::new(Pipeline::from_settings(&settings, catalog, env_flag("QGPT_DRY_RUN")));

    let receipts = match std::env::var("QGPT_RECEIPTS_FILE") {
        Ok(path) if !path.is_empty() => Some(Arc::new(ReceiptLog::open(path)?)),
        _ => None,
    };

    let addr: SocketAddr = std::env::var("QGPT_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:7070".into())
        .parse()?;
    info!(%addr, fixtures = %fixtures.display(), dry_run = pipeline.dry_run(), "qgpt HTTP server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(AppState { pipeline, receipts })).await?;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, (StatusCode, String)> {
    if req.question.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "question is required".into()));
    }

    let result = state
        .pipeline
        .run(&req)
        .await
        .map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))?;

    let still_invalid = result.repaired && !state.pipeline.recheck(&result).valid;
    if still_invalid {
        warn!("repaired SQL still fails validation");
    }
    if let Some(log) = &state.receipts {
        if let Err(e) = log.record(&result) {
            warn!(error = %e, "failed to append run receipt");
        }
    }

    Ok(Json(QueryResponse { result, still_invalid }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use qgpt_core::PipelineConfig;
    use qgpt_infer::OfflineClient;
    use tower::ServiceExt;

    const FIXTURES: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../fixtures");

    fn state(receipts: Option<Arc<ReceiptLog>>) -> AppState {
        let catalog = Arc::new(Catalog::load(&FixtureDir::new(FIXTURES)).unwrap());
        let pipeline = Pipeline::new(catalog, Arc::new(OfflineClient::new()), PipelineConfig::default());
        AppState {
            pipeline: Arc::new(pipeline),
            receipts,
        }
    }

    fn post_json(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/query")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let resp = app(state(None))
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn query_returns_result_and_writes_receipt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.jsonl");
        let log = Arc::new(ReceiptLog::open(&path).unwrap());

        let resp = app(state(Some(log)))
            .oneshot(post_json(r#"{"question":"How many trips were completed yesterday in Seattle?"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["result"]["selected_workspaces"][0], "Mobility");
        assert_eq!(body["still_invalid"], false);
        assert!(body["result"]["generated_sql"].as_str().unwrap().contains("SELECT"));
        assert_eq!(qgpt_receipts::verify_log(&path).unwrap(), 1);
    }

    #[tokio::test]
    async fn forced_tables_use_short_keys() {
        let resp = app(state(None))
            .oneshot(post_json(r#"{"question":"spend","workspace":"Ads","tables":["ads.impressions"]}"#))
            .await
            .unwrap();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["result"]["confirmed_tables"], serde_json::json!(["ads.impressions"]));
    }

    #[tokio::test]
    async fn blank_question_is_rejected() {
        let resp = app(state(None)).oneshot(post_json(r#"{"question":"  "}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
