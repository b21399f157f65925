//! A local stand-in for the scanning service and the result store, for tests.

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const PATH_INDEX_REPORT: &str = "/indexer/api/v1/index_report";
pub const PATH_INDEX_REPORT_BY_HASH: &str = "/indexer/api/v1/index_report/{hash}";
pub const PATH_VULNERABILITY_REPORT: &str = "/matcher/api/v1/vulnerability_report/{hash}";
pub const PATH_INDEX_STATE: &str = "/indexer/api/v1/index_state";
pub const PATH_STATUS: &str = "/status/{code}";
pub const PATH_DELAY: &str = "/delay/{ms}";
pub const PATH_DOCUMENTS: &str = "/{index}/_doc";

#[derive(Debug, Clone, Default)]
pub struct TestServerOptions {
    /// Added before every scanning-API response.
    pub delay: Duration,
    /// Hashes whose scanning-API requests answer 500.
    pub failing_hashes: HashSet<String>,
    /// Answer 503 to every document index request.
    pub reject_documents: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    saw_bearer_token: Arc<AtomicU64>,
    saw_json_content_type: Arc<AtomicU64>,
    by_route: Arc<Mutex<BTreeMap<String, u64>>>,
    documents: Arc<Mutex<Vec<Value>>>,
}

impl TestServerStats {
    fn observe(&self, route: &str, headers: &HeaderMap) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        *self.by_route.lock().entry(route.to_string()).or_insert(0) += 1;

        if headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("Bearer ") && v.len() > "Bearer ".len())
        {
            self.saw_bearer_token.fetch_add(1, Ordering::Relaxed);
        }
        if headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().starts_with("application/json"))
        {
            self.saw_json_content_type.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn saw_bearer_token(&self) -> u64 {
        self.saw_bearer_token.load(Ordering::Relaxed)
    }

    pub fn saw_json_content_type(&self) -> u64 {
        self.saw_json_content_type.load(Ordering::Relaxed)
    }

    /// Requests per route, keyed like `GET /indexer/api/v1/index_state`.
    pub fn by_route(&self) -> BTreeMap<String, u64> {
        self.by_route.lock().clone()
    }

    pub fn route_count(&self, route: &str) -> u64 {
        self.by_route.lock().get(route).copied().unwrap_or(0)
    }

    /// Documents accepted by the result-store endpoint, in arrival order.
    pub fn documents(&self) -> Vec<Value> {
        self.documents.lock().clone()
    }
}

#[derive(Debug, Clone)]
struct AppState {
    stats: TestServerStats,
    options: Arc<TestServerOptions>,
    reports: Arc<Mutex<HashSet<String>>>,
}

impl AppState {
    async fn scanner_delay(&self) {
        if !self.options.delay.is_zero() {
            sleep(self.options.delay).await;
        }
    }

    fn failing(&self, hash: &str) -> bool {
        self.options.failing_hashes.contains(hash)
    }
}

#[derive(Debug, Deserialize)]
struct ManifestHash {
    hash: String,
}

async fn handle_create_index_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    state.stats.observe("POST /indexer/api/v1/index_report", &headers);
    state.scanner_delay().await;

    let Ok(manifest) = serde_json::from_slice::<ManifestHash>(&body) else {
        return (StatusCode::BAD_REQUEST, "bad manifest".to_string());
    };
    if state.failing(&manifest.hash) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "indexer error".to_string());
    }

    state.reports.lock().insert(manifest.hash.clone());
    let report = json!({ "manifest_hash": manifest.hash, "state": "IndexFinished", "success": true });
    (StatusCode::CREATED, report.to_string())
}

async fn handle_get_index_report(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    headers: HeaderMap,
) -> (StatusCode, String) {
    state.stats.observe("GET /indexer/api/v1/index_report", &headers);
    state.scanner_delay().await;
    report_response(&state, &hash, json!({ "manifest_hash": hash, "state": "IndexFinished" }))
}

async fn handle_delete_index_report(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    headers: HeaderMap,
) -> StatusCode {
    state.stats.observe("DELETE /indexer/api/v1/index_report", &headers);
    state.scanner_delay().await;

    if state.failing(&hash) {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    state.reports.lock().remove(&hash);
    StatusCode::NO_CONTENT
}

async fn handle_vulnerability_report(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    headers: HeaderMap,
) -> (StatusCode, String) {
    state.stats.observe("GET /matcher/api/v1/vulnerability_report", &headers);
    state.scanner_delay().await;
    report_response(&state, &hash, json!({ "manifest_hash": hash, "vulnerabilities": {} }))
}

fn report_response(state: &AppState, hash: &str, body: Value) -> (StatusCode, String) {
    if state.failing(hash) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "matcher error".to_string());
    }
    if !state.reports.lock().contains(hash) {
        return (StatusCode::NOT_FOUND, "unknown manifest".to_string());
    }
    (StatusCode::OK, body.to_string())
}

async fn handle_index_state(State(state): State<AppState>, headers: HeaderMap) -> String {
    state.stats.observe("GET /indexer/api/v1/index_state", &headers);
    state.scanner_delay().await;
    json!({ "state": "c4a3f2b1" }).to_string()
}

async fn handle_status(
    State(state): State<AppState>,
    Path(code): Path<u16>,
    headers: HeaderMap,
) -> StatusCode {
    state.stats.observe("GET /status", &headers);
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

async fn handle_delay(
    State(state): State<AppState>,
    Path(ms): Path<u64>,
    headers: HeaderMap,
) -> &'static str {
    state.stats.observe("GET /delay", &headers);
    sleep(Duration::from_millis(ms)).await;
    "ok"
}

async fn handle_document(
    State(state): State<AppState>,
    Path(index): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    state.stats.observe("POST /_doc", &headers);

    if state.options.reject_documents {
        return (StatusCode::SERVICE_UNAVAILABLE, "index unavailable".to_string());
    }
    let Ok(doc) = serde_json::from_slice::<Value>(&body) else {
        return (StatusCode::BAD_REQUEST, "bad document".to_string());
    };

    state.stats.documents.lock().push(doc);
    (StatusCode::CREATED, json!({ "_index": index, "result": "created" }).to_string())
}

pub fn router(stats: TestServerStats, options: TestServerOptions) -> Router {
    let state = AppState {
        stats,
        options: Arc::new(options),
        reports: Arc::new(Mutex::new(HashSet::new())),
    };

    Router::new()
        .route(PATH_INDEX_REPORT, post(handle_create_index_report))
        .route(
            PATH_INDEX_REPORT_BY_HASH,
            get(handle_get_index_report).delete(handle_delete_index_report),
        )
        .route(PATH_VULNERABILITY_REPORT, get(handle_vulnerability_report))
        .route(PATH_INDEX_STATE, get(handle_index_state))
        .route(PATH_STATUS, get(handle_status))
        .route(PATH_DELAY, get(handle_delay))
        .route(PATH_DOCUMENTS, post(handle_document))
        .with_state(state)
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with(TestServerOptions::default()).await
    }

    pub async fn start_with(options: TestServerOptions) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(stats.clone(), options);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
