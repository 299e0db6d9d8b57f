//! End-to-end tests against a real listener, driven over HTTP and
//! WebSocket clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use metrics_exporter_prometheus::PrometheusBuilder;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use rollcall_core::SessionStore;
use rollcall_engine::{BroadcastHub, Coordinator};
use rollcall_server::{JwtIdentity, RollcallServer, ServerConfig};
use rollcall_store::{Database, SqliteSessionStore};

const TIMEOUT: Duration = Duration::from_secs(5);
const SECRET: &[u8] = b"integration-secret";

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    server: RollcallServer,
    addr: SocketAddr,
    handle: JoinHandle<()>,
    http: reqwest::Client,
    token: String,
}

impl TestServer {
    async fn boot(config: ServerConfig) -> Self {
        let store: Arc<dyn SessionStore> =
            Arc::new(SqliteSessionStore::new(Database::in_memory().unwrap()));
        let coordinator = Arc::new(Coordinator::new(store, Arc::new(BroadcastHub::new())));
        let identity = JwtIdentity::new(SECRET, "rollcall", 1);
        let token = identity.issue_token("chair").unwrap();
        let metrics = PrometheusBuilder::new().build_recorder().handle();
        let server = RollcallServer::new(config, coordinator, Arc::new(identity), metrics);
        let (addr, handle) = server.listen().await.unwrap();
        Self {
            server,
            addr,
            handle,
            http: reqwest::Client::new(),
            token,
        }
    }

    async fn default() -> Self {
        Self::boot(ServerConfig::default()).await
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let resp = self.http.get(self.url(path)).send().await.unwrap();
        (resp.status(), resp.json().await.unwrap())
    }

    async fn get_admin(&self, path: &str) -> (StatusCode, Value) {
        let resp = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await
            .unwrap();
        (resp.status(), resp.json().await.unwrap())
    }

    async fn post(&self, path: &str) -> (StatusCode, Value) {
        let resp = self.http.post(self.url(path)).send().await.unwrap();
        (resp.status(), resp.json().await.unwrap())
    }

    async fn post_admin(&self, path: &str) -> (StatusCode, Value) {
        let resp = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await
            .unwrap();
        (resp.status(), resp.json().await.unwrap())
    }

    async fn observe(&self, path: &str) -> WsStream {
        let (ws, _) = connect_async(format!("ws://{}{path}", self.addr))
            .await
            .unwrap();
        ws
    }

    async fn observers(&self) -> u64 {
        self.get("/health").await.1["observers"].as_u64().unwrap()
    }
}

/// Next text frame as JSON, skipping control frames.
async fn next_snapshot(ws: &mut WsStream) -> Value {
    loop {
        let frame = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a snapshot")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Assert nothing but control frames arrive within `window`.
async fn assert_quiet(ws: &mut WsStream, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Text(text)))) => panic!("unexpected snapshot: {text}"),
            Ok(Some(Ok(_))) => {}
            Ok(other) => panic!("stream ended: {other:?}"),
        }
    }
}

async fn wait_for_observers(server: &TestServer, expected: u64) {
    let result = timeout(TIMEOUT, async {
        while server.observers().await != expected {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "observer count never reached {expected}");
}

#[tokio::test]
async fn attendance_call_end_to_end() {
    let server = TestServer::default().await;
    let mut ws = server.observe("/attendance/7/ws").await;
    wait_for_observers(&server, 1).await;

    let (status, started) = server.post_admin("/attendance/start?committee_id=7").await;
    assert_eq!(status, StatusCode::OK);
    let pushed = next_snapshot(&mut ws).await;
    assert_eq!(pushed, started);
    assert_eq!(pushed["entries"], serde_json::json!([]));

    let (status, _) = server
        .post("/attendance/submit?committee_id=7&delegation_id=3&value=1")
        .await;
    assert_eq!(status, StatusCode::OK);
    let pushed = next_snapshot(&mut ws).await;
    assert_eq!(pushed["entries"][0]["delegationId"], 3);
    assert_eq!(pushed["entries"][0]["value"], 1);

    let (status, body) = server
        .post("/attendance/submit?committee_id=7&delegation_id=3&value=2")
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "DUPLICATE_SUBMISSION");

    let (status, _) = server
        .post_admin("/attendance/override?committee_id=7&delegation_id=3&value=2")
        .await;
    assert_eq!(status, StatusCode::OK);
    let pushed = next_snapshot(&mut ws).await;
    assert_eq!(pushed["entries"].as_array().unwrap().len(), 1);
    assert_eq!(pushed["entries"][0]["value"], 2);

    let (status, audit) = server.get_admin("/attendance/entries?committee_id=7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(audit.as_array().unwrap().len(), 2);
    assert_eq!(audit[0]["active"], false);

    let (status, _) = server
        .post_admin("/attendance/markabsent?committee_id=7&delegation_id=3")
        .await;
    assert_eq!(status, StatusCode::OK);
    let pushed = next_snapshot(&mut ws).await;
    assert_eq!(pushed["entries"], serde_json::json!([]));

    let (status, ended) = server.post_admin("/attendance/end?committee_id=7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ended["live"], false);
    let pushed = next_snapshot(&mut ws).await;
    assert_eq!(pushed["live"], false);

    let (_, live) = server.get("/attendance?committee_id=7").await;
    assert!(live.is_null());
    let (status, closed) = server.get_admin("/attendance/closed?committee_id=7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(closed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn observers_are_scoped_to_committee_and_kind() {
    let server = TestServer::default().await;
    let mut voting_7 = server.observe("/voting/7/ws").await;
    let mut attendance_7 = server.observe("/attendance/7/ws").await;
    let mut voting_8 = server.observe("/voting/8/ws").await;
    wait_for_observers(&server, 3).await;

    let _ = server.post_admin("/voting/start?committee_id=7").await;
    let pushed = next_snapshot(&mut voting_7).await;
    assert_eq!(pushed["kind"], "voting");
    assert_eq!(pushed["committeeId"], 7);

    assert_quiet(&mut attendance_7, Duration::from_millis(200)).await;
    assert_quiet(&mut voting_8, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn snapshots_arrive_in_mutation_order() {
    let server = TestServer::default().await;
    let mut ws = server.observe("/voting/7/ws").await;
    wait_for_observers(&server, 1).await;

    let _ = server.post_admin("/voting/start?committee_id=7").await;
    for d in 1..=5 {
        let (status, _) = server
            .post(&format!("/voting/submit?committee_id=7&delegation_id={d}&value=1"))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let _ = next_snapshot(&mut ws).await;
    for expected in 1..=5 {
        let pushed = next_snapshot(&mut ws).await;
        assert_eq!(pushed["entries"].as_array().unwrap().len(), expected);
    }
}

#[tokio::test]
async fn closing_the_socket_unregisters() {
    let server = TestServer::default().await;
    let mut ws = server.observe("/attendance/7/ws").await;
    wait_for_observers(&server, 1).await;

    ws.close(None).await.unwrap();
    wait_for_observers(&server, 0).await;
}

#[tokio::test]
async fn silent_observer_times_out() {
    let config = ServerConfig {
        heartbeat_interval_secs: 1,
        heartbeat_timeout_secs: 1,
        ..ServerConfig::default()
    };
    let server = TestServer::boot(config).await;
    // Never polled, so pings go unanswered.
    let _ws = server.observe("/attendance/7/ws").await;
    wait_for_observers(&server, 1).await;
    wait_for_observers(&server, 0).await;
}

#[tokio::test]
async fn client_frames_keep_observer_alive() {
    let config = ServerConfig {
        heartbeat_interval_secs: 1,
        heartbeat_timeout_secs: 1,
        ..ServerConfig::default()
    };
    let server = TestServer::boot(config).await;
    let mut ws = server.observe("/attendance/7/ws").await;
    wait_for_observers(&server, 1).await;

    // Pings are never read, so only these frames vouch for the client.
    for _ in 0..10 {
        ws.send(Message::Text("heartbeat".into())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(server.observers().await, 1);
    }

    let (status, started) = server.post_admin("/attendance/start?committee_id=7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(next_snapshot(&mut ws).await, started);
}

#[tokio::test]
async fn observer_for_unknown_kind_is_refused() {
    let server = TestServer::default().await;
    let result = connect_async(format!("ws://{}/quorum/7/ws", server.addr)).await;
    assert!(result.is_err());
    assert_eq!(server.observers().await, 0);
}

#[tokio::test]
async fn admin_routes_reject_anonymous_callers() {
    let server = TestServer::default().await;
    for path in [
        "/attendance/start?committee_id=7",
        "/attendance/end?committee_id=7",
        "/voting/override?committee_id=7&delegation_id=3&value=1",
        "/voting/markabsent?committee_id=7&delegation_id=3",
    ] {
        let (status, body) = server.post(path).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{path}");
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }
    for path in ["/voting/closed?committee_id=7", "/voting/entries?committee_id=7"] {
        let (status, _) = server.get(path).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{path}");
    }
}

#[tokio::test]
async fn most_recent_submission_survives_session_close() {
    let server = TestServer::default().await;
    let _ = server.post_admin("/voting/start?committee_id=7").await;
    let _ = server
        .post("/voting/submit?committee_id=7&delegation_id=3&value=3")
        .await;
    let _ = server.post_admin("/voting/end?committee_id=7").await;

    let (status, entry) = server
        .get("/voting/delegation?committee_id=7&delegation_id=3")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(entry["value"], 3);

    let (_, none) = server
        .get("/voting/delegation?committee_id=7&delegation_id=4")
        .await;
    assert!(none.is_null());
}

#[tokio::test]
async fn shutdown_closes_observers() {
    let server = TestServer::default().await;
    let mut ws = server.observe("/attendance/7/ws").await;
    wait_for_observers(&server, 1).await;

    let stopping = tokio::spawn(async move {
        let report = server.server.stop(server.handle).await;
        (server.server, report)
    });

    let ended = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "observer was not closed on shutdown");

    let (stopped, report) = stopping.await.unwrap();
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(stopped.coordinator().hub().total_observers(), 0);
}
