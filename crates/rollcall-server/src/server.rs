//! `RollcallServer`: axum router, shared state and the listen loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use rollcall_engine::Coordinator;
use rollcall_telemetry::IncidentLog;

use crate::auth::SharedIdentity;
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics;
use crate::routes;
use crate::shutdown::{ShutdownCoordinator, ShutdownReport};

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Every session operation goes through here.
    pub coordinator: Arc<Coordinator>,
    /// Resolves bearer tokens to administrators.
    pub identity: SharedIdentity,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Prometheus handle for `/metrics`.
    pub metrics: PrometheusHandle,
    /// Persisted warnings, when the incident log is on.
    pub incidents: Option<Arc<IncidentLog>>,
    /// When the server started.
    pub start_time: Instant,
}

/// The rollcall HTTP + WebSocket server.
pub struct RollcallServer {
    state: AppState,
}

impl RollcallServer {
    /// Create a new server.
    pub fn new(
        config: ServerConfig,
        coordinator: Arc<Coordinator>,
        identity: SharedIdentity,
        metrics: PrometheusHandle,
    ) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new(Arc::clone(coordinator.hub())));
        Self {
            state: AppState {
                coordinator,
                identity,
                config: Arc::new(config),
                shutdown,
                metrics,
                incidents: None,
                start_time: Instant::now(),
            },
        }
    }

    /// Serve `log` on `/incidents`.
    #[must_use]
    pub fn with_incidents(mut self, log: Arc<IncidentLog>) -> Self {
        self.state.incidents = Some(log);
        self
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/incidents", get(routes::incidents))
            .route("/committees/{committee_id}/poll", get(routes::poll_status))
            .route("/{kind}", get(routes::live))
            .route("/{kind}/start", post(routes::start))
            .route("/{kind}/end", post(routes::end))
            .route("/{kind}/closed", get(routes::history))
            .route("/{kind}/delegation", get(routes::most_recent))
            .route("/{kind}/entries", get(routes::entry_history))
            .route("/{kind}/submit", post(routes::submit))
            .route("/{kind}/override", post(routes::override_entry))
            .route("/{kind}/markabsent", post(routes::mark_absent))
            .route("/{kind}/{committee_id}/ws", get(routes::observe))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve in a background task until shutdown.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "rollcall server listening");

        let router = self.router();
        let token = self.state.shutdown.token();
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "server terminated");
            }
        });
        Ok((local_addr, handle))
    }

    /// Stop accepting requests, close observers and wait for both.
    pub async fn stop(&self, handle: JoinHandle<()>) -> ShutdownReport {
        let timeout = Duration::from_secs(self.state.config.shutdown_timeout_secs);
        self.state.shutdown.drain(handle, timeout).await
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Get the coordinator.
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.state.coordinator
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let observers = state.coordinator.hub().total_observers();
    Json(health::health_check(state.start_time, observers))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    metrics::render(&state.metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use rollcall_core::SessionStore;
    use rollcall_engine::BroadcastHub;
    use rollcall_store::{Database, SqliteSessionStore};
    use rollcall_telemetry::NewIncident;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::auth::JwtIdentity;

    const SECRET: &[u8] = b"router-test";

    fn make_server() -> RollcallServer {
        let store: Arc<dyn SessionStore> =
            Arc::new(SqliteSessionStore::new(Database::in_memory().unwrap()));
        let coordinator = Arc::new(Coordinator::new(store, Arc::new(BroadcastHub::new())));
        let identity: SharedIdentity = Arc::new(JwtIdentity::new(SECRET, "rollcall", 1));
        let metrics = PrometheusBuilder::new().build_recorder().handle();
        RollcallServer::new(ServerConfig::default(), coordinator, identity, metrics)
    }

    fn admin_token() -> String {
        JwtIdentity::new(SECRET, "rollcall", 1).issue_token("chair").unwrap()
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 1_000_000).await.unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::Null)
        };
        (status, json)
    }

    fn post_req(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri(uri);
        if let Some(t) = token {
            builder = builder.header("authorization", format!("Bearer {t}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (status, json) = send(make_server().router(), get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["observers"], 0);
    }

    #[tokio::test]
    async fn metrics_endpoint_is_text() {
        let resp = make_server().router().oneshot(get_req("/metrics")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn live_is_null_when_nothing_open() {
        let (status, json) = send(make_server().router(), get_req("/attendance?committee_id=7")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json.is_null());
    }

    #[tokio::test]
    async fn start_requires_admin() {
        let (status, json) =
            send(make_server().router(), post_req("/attendance/start?committee_id=7", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn invalid_token_is_anonymous() {
        let (status, _) = send(
            make_server().router(),
            post_req("/voting/start?committee_id=7", Some("garbage")),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn start_submit_and_read_back() {
        let server = make_server();
        let token = admin_token();

        let (status, json) = send(
            server.router(),
            post_req("/attendance/start?committee_id=7", Some(&token)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["live"], true);
        assert_eq!(json["kind"], "attendance");
        assert_eq!(json["entries"], serde_json::json!([]));

        let (status, json) = send(
            server.router(),
            post_req("/attendance/submit?committee_id=7&delegation_id=3&value=1", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["entries"][0]["delegationId"], 3);
        assert_eq!(json["entries"][0]["value"], 1);

        let (status, json) = send(
            server.router(),
            post_req("/attendance/submit?committee_id=7&delegation_id=3&value=2", None),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error"]["code"], "DUPLICATE_SUBMISSION");

        let (status, json) = send(server.router(), get_req("/attendance?committee_id=7")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["entries"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn submit_without_live_session_conflicts() {
        let (status, json) = send(
            make_server().router(),
            post_req("/voting/submit?committee_id=7&delegation_id=3&value=1", None),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error"]["code"], "NO_LIVE_SESSION");
    }

    #[tokio::test]
    async fn bad_query_is_invalid_input() {
        let (status, json) = send(
            make_server().router(),
            post_req("/voting/submit?committee_id=seven", None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "INVALID_INPUT");
    }

    #[tokio::test]
    async fn unknown_kind_is_not_found() {
        let (status, json) = send(make_server().router(), get_req("/quorum?committee_id=7")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn poll_status_reflects_live_sessions() {
        let server = make_server();
        let token = admin_token();
        let (_, json) = send(server.router(), get_req("/committees/7/poll")).await;
        assert_eq!(json["poll"], "NONE");

        let _ = send(server.router(), post_req("/voting/start?committee_id=7", Some(&token))).await;
        let (status, json) = send(server.router(), get_req("/committees/7/poll")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["committeeId"], 7);
        assert_eq!(json["poll"], "VOTING");
    }

    fn get_admin(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("authorization", format!("Bearer {}", admin_token()))
            .body(Body::empty())
            .unwrap()
    }

    fn incident(message: &str, committee_id: i64, kind: &str) -> NewIncident {
        NewIncident {
            at: chrono::Utc::now(),
            level: tracing::Level::WARN,
            target: "rollcall_engine::hub".into(),
            message: message.into(),
            committee_id: Some(committee_id),
            kind: Some(kind.into()),
            fields: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn incidents_require_admin() {
        let log = Arc::new(IncidentLog::in_memory(10).unwrap());
        let server = make_server().with_incidents(log);
        let (status, json) = send(server.router(), get_req("/incidents")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn incidents_disabled_is_not_found() {
        let (status, json) = send(make_server().router(), get_admin("/incidents")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn incidents_filter_by_committee_and_kind() {
        let log = Arc::new(IncidentLog::in_memory(10).unwrap());
        let _ = log.record(&incident("queue full", 7, "voting")).unwrap();
        let _ = log.record(&incident("roster miss", 7, "attendance")).unwrap();
        let _ = log.record(&incident("queue full", 8, "voting")).unwrap();
        let server = make_server().with_incidents(log);

        let (status, json) = send(
            server.router(),
            get_admin("/incidents?committee_id=7&kind=voting"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let rows = json.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["message"], "queue full");
        assert_eq!(rows[0]["committeeId"], 7);

        let (_, json) = send(server.router(), get_admin("/incidents?limit=2")).await;
        assert_eq!(json.as_array().unwrap().len(), 2);

        let (status, _) = send(server.router(), get_admin("/incidents?kind=quorum")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn shutdown_propagates() {
        let server = make_server();
        assert!(!server.shutdown().is_shutting_down());
        server.shutdown().cancel();
        assert!(server.shutdown().is_shutting_down());
    }
}
