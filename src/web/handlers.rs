//! HTTP request handlers.

use super::AppState;
use crate::catalog::{flatten, suggest, Server as CatalogServer};
use crate::db::{Analytics, DbError, RunDetail};
use crate::probe::{check_server, Target, SERVER_CHECK_TIMEOUT};
use crate::scheduler::{record_run, LogObserver};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Upper bound on URLs accepted by one `/api/test` request.
const MAX_TEST_URLS: usize = 500;

const DEFAULT_SPEED_TEST_BYTES: usize = 1_000_000;
const MAX_SPEED_TEST_BYTES: usize = 100 * 1024 * 1024;

const DEFAULT_HISTORY_LIMIT: usize = 10;
/// Never list more runs than the largest sensible history.
const MAX_HISTORY_LIMIT: usize = 1000;

// ============================================================================
// Health
// ============================================================================

pub async fn handle_health() -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, "no-store, max-age=0")],
        Json(json!({
            "status": "ok",
            "timestamp": Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

// ============================================================================
// API: Servers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServersQuery {
    #[serde(default)]
    pub q: String,
}

pub async fn handle_get_servers(
    State(state): State<AppState>,
    Query(query): Query<ServersQuery>,
) -> impl IntoResponse {
    let suggestions: Vec<CatalogServer> = suggest(&state.catalog, &query.q).into_iter().cloned().collect();
    (
        [(header::CACHE_CONTROL, "public, s-maxage=3600")],
        Json(suggestions),
    )
}

pub async fn handle_suggest_server(body: Bytes) -> impl IntoResponse {
    match serde_json::from_slice::<Value>(&body) {
        Ok(suggestion) => {
            tracing::info!("New server suggestion: {}", suggestion);
            Json(json!({
                "success": true,
                "message": "Server suggestion submitted successfully",
            }))
            .into_response()
        }
        Err(e) => {
            tracing::warn!("Rejected server suggestion: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "message": "Error processing suggestion",
                })),
            )
                .into_response()
        }
    }
}

// ============================================================================
// API: Batch checks
// ============================================================================

pub async fn handle_test_info() -> impl IntoResponse {
    Json(json!({
        "message": "BDIX Server Tester API",
        "endpoints": {
            "test": {
                "method": "POST",
                "description": "Test BDIX server connectivity",
                "requestBody": {
                    "urls": "Array of URLs to test"
                }
            }
        }
    }))
}

#[derive(Debug, Serialize)]
pub struct UrlResult {
    pub url: String,
    pub status: &'static str,
    #[serde(rename = "responseTime")]
    pub response_time: u64,
}

#[derive(Debug, Serialize)]
pub struct TestResponse {
    pub timestamp: DateTime<Utc>,
    pub results: Vec<UrlResult>,
}

fn invalid_urls() -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "Invalid request. Please provide an array of URLs." })),
    )
        .into_response()
}

pub async fn handle_test_urls(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let urls: Vec<String> = match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Object(mut obj)) => match obj.remove("urls") {
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect(),
            _ => return invalid_urls(),
        },
        _ => return invalid_urls(),
    };

    if urls.len() > MAX_TEST_URLS {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("At most {} URLs per request.", MAX_TEST_URLS) })),
        )
            .into_response();
    }

    let targets: Vec<Target> = urls
        .iter()
        .enumerate()
        .map(|(i, url)| Target::with_index(url.clone(), i, url.clone()))
        .collect();

    let cancel = state.shutdown.child_token();
    let run = match state.scheduler.run(targets, &mut LogObserver, &cancel).await {
        Ok(run) => run,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };
    record_run(&state.store, &run);

    let mut outcomes = run.outcomes;
    outcomes.sort_by_key(|o| o.target.index);

    let results = outcomes
        .into_iter()
        .map(|o| UrlResult {
            url: o.target.url,
            status: o.state.status_label(),
            response_time: o.elapsed_ms,
        })
        .collect();

    Json(TestResponse {
        timestamp: Utc::now(),
        results,
    })
    .into_response()
}

pub async fn handle_check_catalog(State(state): State<AppState>) -> impl IntoResponse {
    let cancel = state.shutdown.child_token();
    match state.scheduler.run(flatten(&state.catalog), &mut LogObserver, &cancel).await {
        Ok(run) => {
            record_run(&state.store, &run);
            Json(run).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckServerQuery {
    pub url: Option<String>,
}

pub async fn handle_check_server(
    State(state): State<AppState>,
    Query(query): Query<CheckServerQuery>,
) -> impl IntoResponse {
    let Some(url) = query.url.filter(|u| !u.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "URL parameter is missing" })),
        )
            .into_response();
    };

    let check = check_server(&state.http, &url, SERVER_CHECK_TIMEOUT).await;
    if !check.is_working() {
        tracing::debug!("Server {} not working: status {:?}, error {:?}", url, check.status_code, check.error);
    }
    Json(check).into_response()
}

// ============================================================================
// API: Speed test
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SpeedTestQuery {
    pub size: Option<String>,
}

pub async fn handle_speed_test(Query(query): Query<SpeedTestQuery>) -> impl IntoResponse {
    let size = query
        .size
        .and_then(|s| s.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_SPEED_TEST_BYTES)
        .min(MAX_SPEED_TEST_BYTES);

    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"dummy.txt\"".to_string()),
        ],
        vec![b'a'; size],
    )
}

// ============================================================================
// API: History
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

pub async fn handle_get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(MAX_HISTORY_LIMIT);
    match state.store.get_recent_runs(limit) {
        Ok(runs) => Json(runs).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_get_run(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let run = match state.store.get_run(&id) {
        Ok(run) => run,
        Err(DbError::NotFound) => return (StatusCode::NOT_FOUND, "Run not found").into_response(),
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    match state.store.get_run_outcomes(&id) {
        Ok(outcomes) => Json(RunDetail { run, outcomes }).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_analytics(State(state): State<AppState>) -> impl IntoResponse {
    let recent = match state.store.get_recent_runs(DEFAULT_HISTORY_LIMIT) {
        Ok(runs) => runs,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    let latest = match recent.first() {
        Some(run) => state.store.get_run_outcomes(&run.id).unwrap_or_default(),
        None => Vec::new(),
    };
    let total_tests = state.store.get_run_count().unwrap_or(0);

    Json(Analytics::from_history(&recent, &latest, total_tests)).into_response()
}

#[cfg(test)]
mod tests {
    use super::super::router;
    use super::*;
    use crate::db::Store;
    use crate::probe::testing::{Behavior, ScriptedTransport};
    use crate::probe::{ProbeConfig, ReachabilityPolicy};
    use crate::scheduler::{BatchOptions, BatchScheduler};
    use axum::body::Body;
    use axum::http::Request;
    use axum::Router;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::NamedTempFile;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn test_app(tmp: &NamedTempFile) -> (Router, Arc<Store>) {
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let transport = Arc::new(
            ScriptedTransport::new(Behavior::Succeed).with("10.0.0.2", Behavior::Hang),
        );
        let options = BatchOptions {
            concurrency_limit: 2,
            probe: ProbeConfig {
                timeout: Duration::from_millis(50),
                policy: ReachabilityPolicy::Opaque,
            },
        };
        let catalog = vec![
            CatalogServer {
                name: "SAMONLINE".to_string(),
                category: "FTP Servers".to_string(),
                description: String::new(),
                urls: vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()],
            },
            CatalogServer {
                name: "BDPLEX".to_string(),
                category: "Software Repositories".to_string(),
                description: String::new(),
                urls: vec!["bdplex.net".to_string()],
            },
        ];

        let state = AppState {
            store: store.clone(),
            scheduler: BatchScheduler::new(transport, options),
            catalog: Arc::new(catalog),
            http: reqwest::Client::new(),
            shutdown: CancellationToken::new(),
        };

        (router(state), store)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Bytes) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let tmp = NamedTempFile::new().unwrap();
        let (app, _) = test_app(&tmp);

        let response = app.clone().oneshot(get("/api/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store, max-age=0");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_test_urls_runs_batch_in_input_order() {
        let tmp = NamedTempFile::new().unwrap();
        let (app, store) = test_app(&tmp);

        let (status, body) = send(
            &app,
            post_json("/api/test", r#"{"urls": ["10.0.0.2", "bad-url", "http://10.0.0.1"]}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let json: Value = serde_json::from_slice(&body).unwrap();
        let results = json["results"].as_array().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0]["url"], "10.0.0.2");
        assert_eq!(results[0]["status"], "Offline");
        assert_eq!(results[1]["status"], "Offline");
        assert_eq!(results[2]["status"], "Online");

        let runs = store.get_recent_runs(10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].online, 1);
    }

    #[tokio::test]
    async fn test_test_urls_rejects_missing_urls() {
        let tmp = NamedTempFile::new().unwrap();
        let (app, _) = test_app(&tmp);

        let (status, _) = send(&app, post_json("/api/test", r#"{"servers": []}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, post_json("/api/test", r#"{"urls": "10.0.0.1"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_check_catalog_and_history() {
        let tmp = NamedTempFile::new().unwrap();
        let (app, _) = test_app(&tmp);

        let (status, body) = send(&app, get("/api/check")).await;
        assert_eq!(status, StatusCode::OK);
        let run: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(run["outcomes"].as_array().unwrap().len(), 3);
        let id = run["id"].as_str().unwrap().to_string();

        let (status, body) = send(&app, get("/api/history")).await;
        assert_eq!(status, StatusCode::OK);
        let history: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(history[0]["id"], id.as_str());
        assert_eq!(history[0]["online"], 2);
        assert_eq!(history[0]["offline"], 1);

        let (status, body) = send(&app, get(&format!("/api/history/{}", id))).await;
        assert_eq!(status, StatusCode::OK);
        let detail: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(detail["outcomes"].as_array().unwrap().len(), 3);

        let (status, body) = send(&app, get("/api/history?limit=18446744073709551615")).await;
        assert_eq!(status, StatusCode::OK);
        let history: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(history.as_array().unwrap().len(), 1);

        let (status, body) = send(&app, get("/api/history?limit=0")).await;
        assert_eq!(status, StatusCode::OK);
        let history: Value = serde_json::from_slice(&body).unwrap();
        assert!(history.as_array().unwrap().is_empty());

        let (status, _) = send(&app, get("/api/history/unknown")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, get("/api/analytics")).await;
        assert_eq!(status, StatusCode::OK);
        let analytics: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(analytics["online_servers"], 2);
        assert_eq!(analytics["total_tests"], 1);
    }

    #[tokio::test]
    async fn test_servers_suggestions() {
        let tmp = NamedTempFile::new().unwrap();
        let (app, _) = test_app(&tmp);

        let (status, body) = send(&app, get("/api/servers?q=ftp")).await;
        assert_eq!(status, StatusCode::OK);
        let servers: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(servers.as_array().unwrap().len(), 1);
        assert_eq!(servers[0]["name"], "SAMONLINE");

        let (status, body) = send(&app, get("/api/servers")).await;
        assert_eq!(status, StatusCode::OK);
        let servers: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(servers.as_array().unwrap().len(), 2);
        assert_eq!(servers[1]["name"], "BDPLEX");

        let (status, _) = send(&app, post_json("/api/servers", r#"{"name": "NEW FTP"}"#)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, post_json("/api/servers", "{not json")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_speed_test_payload() {
        let tmp = NamedTempFile::new().unwrap();
        let (app, _) = test_app(&tmp);

        let (status, body) = send(&app, get("/api/speed-test?size=2048")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.len(), 2048);
        assert!(body.iter().all(|b| *b == b'a'));

        let (_, body) = send(&app, get("/api/speed-test?size=abc")).await;
        assert_eq!(body.len(), DEFAULT_SPEED_TEST_BYTES);
    }

    #[tokio::test]
    async fn test_check_server_requires_url() {
        let tmp = NamedTempFile::new().unwrap();
        let (app, _) = test_app(&tmp);

        let (status, _) = send(&app, get("/api/check-server")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, get("/api/check-server?url=bad-url")).await;
        assert_eq!(status, StatusCode::OK);
        let check: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(check["status"], "Not Working");
    }
}
