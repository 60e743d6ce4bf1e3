//! HTTP server for the offline proxy
//!
//! Worker control lives under /__worker, the wake-lock bridge under /bridge,
//! and every other request is handed to the fetch interceptor.

use crate::bridge::WakeLockBridge;
use crate::types::{
    CachesResponse, HealthResponse, MessageResponse, OpenClientRequest, OpenClientResponse,
    WakeLockResponse,
};
use axum::{
    body::Body,
    extract::{Path, Request as HttpRequest, State},
    http::{header::HeaderName, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, Utc};
use offline_cache::network::is_hop_by_hop;
use offline_cache::{
    CacheError, CacheStorage, FetchMode, FetchOutcome, Network, OfflineWorker, Request,
    ResponseSnapshot, ResponseSource,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};
use url::Url;

/// Shared state for the HTTP server
pub struct ServerState {
    pub worker: OfflineWorker,
    pub storage: Arc<dyn CacheStorage>,
    /// Used for requests the worker does not intercept
    pub network: Arc<dyn Network>,
    pub bridge: WakeLockBridge,
    pub scope: Url,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(
        worker: OfflineWorker,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
        scope: Url,
    ) -> Self {
        Self {
            worker,
            storage,
            network,
            bridge: WakeLockBridge::default(),
            scope,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/__worker/caches", get(list_caches))
        .route("/__worker/install", post(install))
        .route("/__worker/activate", post(activate))
        .route("/__worker/message", post(message))
        .route("/__worker/clients", post(open_client))
        .route("/__worker/clients/{id}", delete(close_client))
        .route("/bridge/wake-lock", get(wake_lock_status))
        .route("/bridge/wake-lock/start", post(wake_lock_start))
        .route("/bridge/wake-lock/stop", post(wake_lock_stop))
        .fallback(intercept)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds() as u64;
    let lifecycle = state.worker.lifecycle();

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        worker: lifecycle.state().await,
        current_bucket: lifecycle.current_bucket().get().await,
        storage: state.storage.stats().await,
    })
}

async fn list_caches(State(state): State<SharedState>) -> Json<CachesResponse> {
    Json(CachesResponse {
        caches: state.storage.keys().await,
        current: state.worker.lifecycle().current_bucket().get().await,
    })
}

async fn install(State(state): State<SharedState>) -> Response {
    match state.worker.install().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            error!(error = %e, "Install failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn activate(State(state): State<SharedState>) -> Response {
    match state.worker.activate().await {
        Ok(Some(report)) => Json(report).into_response(),
        Ok(None) => error_response(
            StatusCode::CONFLICT,
            "Waiting for pages controlled by the previous version to close",
        ),
        Err(e @ CacheError::Lifecycle(_)) => error_response(StatusCode::CONFLICT, e.to_string()),
        Err(e) => {
            error!(error = %e, "Activation failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn message(State(state): State<SharedState>, body: String) -> Json<MessageResponse> {
    Json(MessageResponse {
        force_activated: state.worker.message(body.trim()),
    })
}

async fn open_client(
    State(state): State<SharedState>,
    Json(request): Json<OpenClientRequest>,
) -> Json<OpenClientResponse> {
    let id = state
        .worker
        .lifecycle()
        .clients()
        .open(&request.url, request.controlled)
        .await;
    Json(OpenClientResponse { id })
}

async fn close_client(State(state): State<SharedState>, Path(id): Path<u64>) -> Response {
    if state.worker.lifecycle().clients().close(id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, "Client not found")
    }
}

async fn wake_lock_status(State(state): State<SharedState>) -> Json<WakeLockResponse> {
    let id = state.bridge.active();
    Json(WakeLockResponse {
        active: id.is_some(),
        id,
    })
}

async fn wake_lock_start(State(state): State<SharedState>) -> Json<WakeLockResponse> {
    let id = state.bridge.start();
    Json(WakeLockResponse {
        active: true,
        id: Some(id),
    })
}

async fn wake_lock_stop(State(state): State<SharedState>) -> Json<WakeLockResponse> {
    state.bridge.stop();
    Json(WakeLockResponse {
        active: false,
        id: None,
    })
}

/// Everything outside the control routes goes through the worker
async fn intercept(State(state): State<SharedState>, request: HttpRequest) -> Response {
    let url = match resolve_url(&state.scope, request.uri()) {
        Ok(url) => url,
        Err(e) => {
            warn!(uri = %request.uri(), error = %e, "Unresolvable request URI");
            return error_response(StatusCode::BAD_REQUEST, "Invalid request URI");
        }
    };

    let mut outgoing = Request::new(request.method().as_str(), url);
    for (name, value) in request.headers() {
        if let Ok(value) = value.to_str() {
            outgoing = outgoing.with_header(name.as_str(), value);
        }
    }

    match state.worker.fetch(&outgoing).await {
        FetchOutcome::Respond(Some(served)) => {
            let cache_header = match served.source {
                ResponseSource::Network => "MISS",
                ResponseSource::Cache => "HIT",
                ResponseSource::Fallback => "FALLBACK",
            };
            snapshot_response(served.response, Some(cache_header))
        }
        FetchOutcome::Respond(None) => {
            debug!(url = %outgoing.url, "Offline and not cached");
            error_response(StatusCode::GATEWAY_TIMEOUT, "Offline and not cached")
        }
        FetchOutcome::Passthrough => {
            match state.network.fetch(&outgoing, FetchMode::Default).await {
                Ok(response) => snapshot_response(response, None),
                Err(e) => {
                    warn!(url = %outgoing.url, error = %e, "Passthrough fetch failed");
                    error_response(StatusCode::BAD_GATEWAY, "Upstream unavailable")
                }
            }
        }
    }
}

/// Absolute-form URIs are taken as-is; paths are resolved inside the scope
fn resolve_url(scope: &Url, uri: &Uri) -> Result<Url, url::ParseError> {
    if uri.scheme().is_some() {
        return Url::parse(&uri.to_string());
    }
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    scope.join(path_and_query.trim_start_matches('/'))
}

fn snapshot_response(snapshot: ResponseSnapshot, cache_header: Option<&'static str>) -> Response {
    let status = match StatusCode::from_u16(snapshot.status) {
        Ok(status) => status,
        Err(_) if snapshot.is_opaque() => StatusCode::OK,
        Err(_) => StatusCode::BAD_GATEWAY,
    };

    let mut response = Response::new(Body::from(snapshot.body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    for (name, value) in &snapshot.headers {
        if is_hop_by_hop(name) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.append(name, value);
        }
    }
    if let Some(cache_header) = cache_header {
        headers.insert("X-Cache", HeaderValue::from_static(cache_header));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::http::Request as TestRequest;
    use offline_cache::{BucketId, CacheManifest, MemoryStorage, ResponseKind};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tower::ServiceExt;

    const SCOPE: &str = "http://localhost:8080/";

    /// Serves fixed bodies by URL until switched offline
    struct StaticNetwork {
        bodies: HashMap<String, &'static str>,
        offline: AtomicBool,
    }

    impl StaticNetwork {
        fn new(routes: &[(&str, &'static str)]) -> Self {
            Self {
                bodies: routes
                    .iter()
                    .map(|(path, body)| (format!("{}{}", SCOPE, path), *body))
                    .collect(),
                offline: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Network for StaticNetwork {
        async fn fetch(
            &self,
            request: &Request,
            _mode: FetchMode,
        ) -> offline_cache::Result<ResponseSnapshot> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(CacheError::Network("offline".to_string()));
            }
            match self.bodies.get(request.url.as_str()) {
                Some(body) => Ok(ResponseSnapshot::new(request.url.as_str(), 200, *body)
                    .with_header("content-type", "text/plain")
                    .with_kind(ResponseKind::Basic)),
                None => Ok(ResponseSnapshot::new(request.url.as_str(), 404, "not found")),
            }
        }
    }

    fn manifest(skip_waiting: bool) -> CacheManifest {
        CacheManifest {
            app_name: "boxing-timer".to_string(),
            version: "v5".to_string(),
            root_document: "./index.html".to_string(),
            assets: vec![
                "./".to_string(),
                "./index.html".to_string(),
                "./app.js".to_string(),
            ],
            skip_waiting,
            asset_match: Default::default(),
        }
    }

    fn create_test_state(skip_waiting: bool) -> (SharedState, Arc<StaticNetwork>) {
        let scope = Url::parse(SCOPE).unwrap();
        let storage: Arc<dyn CacheStorage> = Arc::new(MemoryStorage::new());
        let network = Arc::new(StaticNetwork::new(&[
            ("", "root"),
            ("index.html", "index-page"),
            ("app.js", "console.log('round')"),
        ]));
        let worker = OfflineWorker::new(
            storage.clone(),
            network.clone(),
            manifest(skip_waiting),
            scope.clone(),
        )
        .unwrap();
        let state = Arc::new(ServerState::new(worker, storage, network.clone(), scope));
        (state, network)
    }

    fn get(uri: &str) -> TestRequest<Body> {
        TestRequest::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str, body: &str) -> TestRequest<Body> {
        TestRequest::builder()
            .method("POST")
            .uri(uri)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (state, _) = create_test_state(true);
        let router = create_router(state);

        let response = router.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["worker"], "parsed");
        assert!(json["current_bucket"].is_null());
        assert!(json["uptime_secs"].as_u64().is_some());
        assert_eq!(json["storage"]["buckets"], 0);
    }

    #[tokio::test]
    async fn test_install_then_list_caches() {
        let (state, _) = create_test_state(true);
        let router = create_router(state);

        let response = router
            .clone()
            .oneshot(post("/__worker/install", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let report = body_json(response).await;
        assert_eq!(report["bucket"], "boxing-timer-v5");
        assert_eq!(report["stored"].as_array().unwrap().len(), 3);

        let response = router.oneshot(get("/__worker/caches")).await.unwrap();
        let json = body_json(response).await;
        assert_eq!(json["caches"], serde_json::json!(["boxing-timer-v5"]));
    }

    #[tokio::test]
    async fn test_passthrough_before_activation() {
        let (state, _) = create_test_state(true);
        let router = create_router(state);

        let response = router.oneshot(get("/app.js")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("X-Cache").is_none());
        assert_eq!(body_text(response).await, "console.log('round')");
    }

    #[tokio::test]
    async fn test_cached_asset_is_a_hit() {
        let (state, network) = create_test_state(true);
        state.worker.install_and_activate().await.unwrap();
        network.offline.store(true, Ordering::SeqCst);
        let router = create_router(state);

        let response = router.oneshot(get("/app.js")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["X-Cache"], "HIT");
        assert_eq!(response.headers()["content-type"], "text/plain");
        assert_eq!(body_text(response).await, "console.log('round')");
    }

    #[tokio::test]
    async fn test_online_document_is_a_miss() {
        let (state, _) = create_test_state(true);
        state.worker.install_and_activate().await.unwrap();
        let router = create_router(state.clone());

        let response = router.oneshot(get("/index.html")).await.unwrap();

        assert_eq!(response.headers()["X-Cache"], "MISS");
        assert_eq!(body_text(response).await, "index-page");
        state.worker.interceptor().writes().flush().await;
    }

    #[tokio::test]
    async fn test_offline_document_falls_back_to_root_document() {
        let (state, network) = create_test_state(true);
        state.worker.install_and_activate().await.unwrap();
        network.offline.store(true, Ordering::SeqCst);
        let router = create_router(state);

        let request = TestRequest::builder()
            .uri("/rounds/settings")
            .header("accept", "text/html")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["X-Cache"], "FALLBACK");
        assert_eq!(body_text(response).await, "index-page");
    }

    #[tokio::test]
    async fn test_offline_with_empty_bucket_is_gateway_timeout() {
        let (state, network) = create_test_state(true);
        state
            .worker
            .lifecycle()
            .current_bucket()
            .set(BucketId::from("boxing-timer-v5"))
            .await;
        network.offline.store(true, Ordering::SeqCst);
        let router = create_router(state);

        let response = router.oneshot(get("/sounds/bell.mp3")).await.unwrap();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Offline and not cached");
    }

    #[tokio::test]
    async fn test_activation_waits_for_controlled_client() {
        let (state, _) = create_test_state(false);
        state
            .worker
            .lifecycle()
            .current_bucket()
            .set(BucketId::from("boxing-timer-v4"))
            .await;
        let router = create_router(state);

        let response = router
            .clone()
            .oneshot(
                TestRequest::builder()
                    .method("POST")
                    .uri("/__worker/clients")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"url":"http://localhost:8080/","controlled":true}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        router
            .clone()
            .oneshot(post("/__worker/install", ""))
            .await
            .unwrap();

        let response = router
            .clone()
            .oneshot(post("/__worker/activate", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = router
            .clone()
            .oneshot(post("/__worker/message", "SKIP_WAITING"))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["force_activated"], true);

        let response = router
            .oneshot(post("/__worker/activate", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let report = body_json(response).await;
        assert_eq!(report["current"], "boxing-timer-v5");
        assert_eq!(report["claimed_clients"], 1);
    }

    #[tokio::test]
    async fn test_activate_before_install_is_conflict() {
        let (state, _) = create_test_state(true);
        let router = create_router(state);

        let response = router
            .oneshot(post("/__worker/activate", ""))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_close_unknown_client_is_not_found() {
        let (state, _) = create_test_state(true);
        let router = create_router(state);

        let response = router
            .oneshot(
                TestRequest::builder()
                    .method("DELETE")
                    .uri("/__worker/clients/42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_wake_lock_start_is_idempotent() {
        let (state, _) = create_test_state(true);
        let router = create_router(state.clone());

        let first = body_json(
            router
                .clone()
                .oneshot(post("/bridge/wake-lock/start", ""))
                .await
                .unwrap(),
        )
        .await;
        let second = body_json(
            router
                .clone()
                .oneshot(post("/bridge/wake-lock/start", ""))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(first["id"], second["id"]);

        let stopped = body_json(
            router
                .oneshot(post("/bridge/wake-lock/stop", ""))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(stopped["active"], false);
        assert_eq!(state.bridge.active(), None);

        let router = create_router(state);
        let status = body_json(router.oneshot(get("/bridge/wake-lock")).await.unwrap()).await;
        assert_eq!(status["active"], false);
    }

    #[test]
    fn test_resolve_url_joins_paths_to_scope() {
        let scope = Url::parse("http://localhost:8080/timer/").unwrap();

        let uri: Uri = "/index.html?round=3".parse().unwrap();
        assert_eq!(
            resolve_url(&scope, &uri).unwrap().as_str(),
            "http://localhost:8080/timer/index.html?round=3"
        );

        let uri: Uri = "https://unpkg.com/react@18/umd/react.production.min.js"
            .parse()
            .unwrap();
        assert_eq!(
            resolve_url(&scope, &uri).unwrap().as_str(),
            "https://unpkg.com/react@18/umd/react.production.min.js"
        );
    }

    #[test]
    fn test_snapshot_response_drops_hop_by_hop_headers() {
        let snapshot = ResponseSnapshot::new("http://localhost:8080/app.js", 200, "x")
            .with_header("Connection", "keep-alive")
            .with_header("Content-Type", "application/javascript");

        let response = snapshot_response(snapshot, Some("HIT"));

        assert!(response.headers().get("connection").is_none());
        assert_eq!(response.headers()["content-type"], "application/javascript");
        assert_eq!(response.headers()["x-cache"], "HIT");
    }

    #[test]
    fn test_server_state_new() {
        let (state, _) = create_test_state(true);
        let diff = (Utc::now() - state.started_at).num_seconds();
        assert!(diff >= 0 && diff < 5);
    }
}
