use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chatdesk_bootstrap::{BootstrapConfig, BootstrapDeps, BootstrapOrchestrator};
use chatdesk_client_core::{ClientStore, HeadlessPage};
use chatdesk_control_client::ControlClient;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const HOME_WORKSPACE_ID: &str = "ws-1";
pub const EXCHANGED_TOKEN: &str = "tok1";

/// Knobs for the stub control backend.
#[derive(Debug, Clone)]
pub struct StubBehavior {
    pub bridge_status: Option<u16>,
    pub profile_missing: bool,
    /// Home workspace shows up on this probe; `None` never provisions it.
    pub home_ready_after: Option<u32>,
}

impl Default for StubBehavior {
    fn default() -> Self {
        Self {
            bridge_status: None,
            profile_missing: false,
            home_ready_after: Some(1),
        }
    }
}

#[derive(Clone, Default)]
pub struct StubBackend {
    pub behavior: Arc<Mutex<StubBehavior>>,
    pub calls: Arc<Mutex<Vec<String>>>,
    pub directory_authorizations: Arc<Mutex<Vec<Option<String>>>>,
    pub home_probes: Arc<AtomicU32>,
}

impl StubBackend {
    pub fn with_behavior(behavior: StubBehavior) -> Self {
        Self {
            behavior: Arc::new(Mutex::new(behavior)),
            ..Self::default()
        }
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    pub async fn count_calls(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub fn home_probes(&self) -> u32 {
        self.home_probes.load(Ordering::SeqCst)
    }
}

/// Native user id the stub derives from a bearer token. Same token, same user.
pub fn identity_for(token: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, format!("{token}.chatdesk.test").as_bytes()).to_string()
}

pub async fn start_control_stub(backend: StubBackend) -> Result<(SocketAddr, JoinHandle<()>)> {
    let app = Router::new()
        .route(
            "/auth/external/init",
            get(
                |State(backend): State<StubBackend>,
                 Query(query): Query<HashMap<String, String>>| async move {
                    let return_to = query.get("redirect_uri").cloned().unwrap_or_default();
                    backend.calls.lock().await.push(format!("init:{return_to}"));
                    Json(json!({
                        "authorizationUrl": format!("https://id.example.com/authorize?return={return_to}")
                    }))
                },
            ),
        )
        .route(
            "/auth/external/callback",
            get(
                |State(backend): State<StubBackend>,
                 Query(query): Query<HashMap<String, String>>| async move {
                    let code = query.get("code").cloned().unwrap_or_default();
                    let link = query.get("v").cloned().unwrap_or_default();
                    backend
                        .calls
                        .lock()
                        .await
                        .push(format!("callback:{code}:{link}"));
                    if code == "expired" {
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(json!({"error": "invalid_grant"})),
                        );
                    }
                    (StatusCode::OK, Json(json!({"token": EXCHANGED_TOKEN})))
                },
            ),
        )
        .route(
            "/auth/bridge",
            post(
                |State(backend): State<StubBackend>, Json(payload): Json<Value>| async move {
                    let token = payload
                        .get("bearerToken")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    backend.calls.lock().await.push(format!("bridge:{token}"));
                    if let Some(status) = backend.behavior.lock().await.bridge_status {
                        return (
                            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                            Json(json!({"error": "bridge unavailable"})),
                        );
                    }
                    let user_id = identity_for(&token);
                    (
                        StatusCode::OK,
                        Json(json!({
                            "session": {
                                "accessToken": format!("native-{user_id}"),
                                "refreshToken": "native-refresh"
                            },
                            "user": {"id": user_id}
                        })),
                    )
                },
            ),
        )
        .route(
            "/workspaces",
            get(
                |State(backend): State<StubBackend>,
                 headers: HeaderMap,
                 Query(query): Query<HashMap<String, String>>| async move {
                    backend.directory_authorizations.lock().await.push(
                        headers
                            .get("authorization")
                            .and_then(|value| value.to_str().ok())
                            .map(ToString::to_string),
                    );
                    let user_id = query.get("userId").cloned().unwrap_or_default();
                    let home = json!({
                        "id": HOME_WORKSPACE_ID,
                        "userId": user_id,
                        "isHome": true,
                        "name": "Home"
                    });
                    if query.get("isHome").map(String::as_str) == Some("true") {
                        backend.calls.lock().await.push("home".to_string());
                        let probe = backend.home_probes.fetch_add(1, Ordering::SeqCst) + 1;
                        let ready = backend
                            .behavior
                            .lock()
                            .await
                            .home_ready_after
                            .is_some_and(|after| probe >= after);
                        return Json(if ready { json!([home]) } else { json!([]) });
                    }
                    backend.calls.lock().await.push("workspaces".to_string());
                    Json(json!([
                        home,
                        {"id": "ws-2", "userId": user_id, "isHome": false, "name": "Shared"}
                    ]))
                },
            ),
        )
        .route(
            "/profiles",
            get(
                |State(backend): State<StubBackend>,
                 Query(query): Query<HashMap<String, String>>| async move {
                    backend.calls.lock().await.push("profile".to_string());
                    let user_id = query.get("userId").cloned().unwrap_or_default();
                    if backend.behavior.lock().await.profile_missing {
                        return Json(Value::Null);
                    }
                    Json(json!({
                        "id": format!("profile-{user_id}"),
                        "userId": user_id,
                        "username": "ada",
                        "hasOnboarded": true
                    }))
                },
            ),
        )
        .with_state(backend);

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .await
            .expect("control stub server failed");
    });
    Ok((addr, handle))
}

/// Orchestrator wired to a real control client pointed at the stub.
pub fn orchestrator_for(
    addr: SocketAddr,
    page: Arc<HeadlessPage>,
    store: Arc<dyn ClientStore>,
) -> Result<Arc<BootstrapOrchestrator>> {
    let config = BootstrapConfig::for_tests().with_control_base_url(&format!("http://{addr}"))?;
    let client = Arc::new(ControlClient::new(config.control_client_config())?);
    Ok(Arc::new(BootstrapOrchestrator::new(
        &config,
        BootstrapDeps::with_control_client(client, page, store),
    )))
}
