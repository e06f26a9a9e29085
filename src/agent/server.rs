//! Edge agent HTTP server
//!
//! Serves `/agent/v1` on top of the node's own [`TunnelController`]. Every
//! route sits behind the shared-secret token check.

use crate::agent::api::{
    ErrorBody, LogEvent, RevokeRequest, RevokeResponse, StatusAck, StatusQuery, StatusResponse,
    SyncRequest, SyncResponse, BASE_PATH, SYNC_HASH_FILE, TOKEN_HEADER,
};
use crate::agent::logs::{heartbeat_events, LogBus, LOG_EVENT_NAME};
use crate::error::{ArmorError, Result};
use crate::fingerprint::fingerprint;
use crate::models::{FirewallRule, DEFAULT_INTERFACE};
use crate::wireguard::TunnelController;
use axum::{
    extract::{rejection::JsonRejection, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

/// Shared state of the agent server
#[derive(Clone)]
pub struct AgentState {
    /// Local tunnel controller
    pub controller: Arc<TunnelController>,
    /// Expected `X-ARMOR-TOKEN` value
    pub token: Arc<str>,
    /// Directory holding the sync fingerprint file
    pub state_dir: PathBuf,
    /// Log event bus
    pub logs: LogBus,
    /// Log stream heartbeat period
    pub heartbeat: Duration,
    /// Held for a whole `/sync` batch
    sync_lock: Arc<Mutex<()>>,
}

impl AgentState {
    /// Create the server state
    pub fn new(
        controller: Arc<TunnelController>,
        token: impl Into<Arc<str>>,
        state_dir: PathBuf,
        logs: LogBus,
        heartbeat: Duration,
    ) -> Self {
        Self {
            controller,
            token: token.into(),
            state_dir,
            logs,
            heartbeat,
            sync_lock: Arc::new(Mutex::new(())),
        }
    }

    fn hash_path(&self) -> PathBuf {
        self.state_dir.join(SYNC_HASH_FILE)
    }

    async fn store_hash(&self, hash: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.state_dir).await?;
        tokio::fs::write(self.hash_path(), hash).await?;
        Ok(())
    }

    async fn load_hash(&self) -> Result<String> {
        match tokio::fs::read_to_string(self.hash_path()).await {
            Ok(hash) => Ok(hash.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Error response of the agent API
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<ArmorError> for ApiError {
    fn from(err: ArmorError) -> Self {
        match err {
            ArmorError::Validation(_) => Self::bad_request(err.to_string()),
            _ => Self::internal(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

/// Build the agent router
pub fn router(state: AgentState) -> Router {
    let api = Router::new()
        .route("/sync", post(handle_sync))
        .route("/firewall", post(handle_firewall))
        .route("/status", get(handle_status))
        .route("/revoke", post(handle_revoke))
        .route("/logs", get(handle_logs))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new().nest(BASE_PATH, api).with_state(state)
}

/// Serve the agent API until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: AgentState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(%addr, "Agent API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn require_token(State(state): State<AgentState>, request: Request, next: Next) -> Response {
    let presented = request
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !constant_time_eq(presented.as_bytes(), state.token.as_bytes()) {
        warn!(path = %request.uri().path(), "Rejected request with invalid agent token");
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody {
                error: "Unauthorized".to_string(),
            }),
        )
            .into_response();
    }

    next.run(request).await
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

async fn handle_sync(
    State(state): State<AgentState>,
    payload: std::result::Result<Json<SyncRequest>, JsonRejection>,
) -> std::result::Result<Json<SyncResponse>, ApiError> {
    let Json(request) = payload?;

    // One batch at a time: the persisted hash and the device must describe
    // the same request.
    let _batch = state.sync_lock.lock().await;
    let hash = fingerprint(&request.peers)?;
    state.store_hash(&hash).await?;

    let mut count = 0;
    for peer in request.peers.iter().filter(|p| p.status == crate::models::PeerStatus::Active) {
        state
            .controller
            .sync_peer(&request.interface, &peer.public_key, &peer.device_allowed_ips())
            .await
            .map_err(|e| ApiError::internal(format!("Failed to sync peer {}: {}", peer.public_key, e)))?;
        count += 1;
    }

    info!(interface = %request.interface, count, hash = %hash, "Peer set synchronized");
    Ok(Json(SyncResponse {
        status: "synchronized".to_string(),
        count,
        hash,
    }))
}

async fn handle_firewall(
    State(state): State<AgentState>,
    payload: std::result::Result<Json<Vec<FirewallRule>>, JsonRejection>,
) -> std::result::Result<Json<StatusAck>, ApiError> {
    let Json(rules) = payload?;
    state.controller.set_firewall_rules(&rules).await?;
    Ok(Json(StatusAck {
        status: "firewall_updated".to_string(),
    }))
}

async fn handle_status(
    State(state): State<AgentState>,
    Query(query): Query<StatusQuery>,
) -> std::result::Result<Json<StatusResponse>, ApiError> {
    let interface = query
        .interface
        .filter(|i| !i.is_empty())
        .unwrap_or_else(|| DEFAULT_INTERFACE.to_string());

    let peers = state.controller.device_peers(&interface).await?;
    let public_key = match state.controller.public_key(&interface).await {
        Ok(key) => Some(key),
        Err(e) => {
            debug!(interface = %interface, error = %e, "Device public key unavailable");
            None
        }
    };

    Ok(Json(StatusResponse {
        interface,
        peers,
        online: true,
        last_sync_hash: state.load_hash().await?,
        public_key,
    }))
}

async fn handle_revoke(
    State(state): State<AgentState>,
    payload: std::result::Result<Json<RevokeRequest>, JsonRejection>,
) -> std::result::Result<Json<RevokeResponse>, ApiError> {
    let Json(request) = payload?;
    let report = state
        .controller
        .revoke_peer(&request.interface, &request.public_key, request.assigned_ip)
        .await?;

    Ok(Json(RevokeResponse {
        status: "revoked".to_string(),
        drop_rule_applied: report.drop_rule_applied,
    }))
}

async fn handle_logs(State(state): State<AgentState>) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let live = BroadcastStream::new(state.logs.subscribe()).filter_map(|item| async move { item.ok() });
    let heartbeat = heartbeat_events(state.logs.node().to_string(), state.heartbeat);

    let events = futures::stream::select(live, heartbeat).filter_map(|event: LogEvent| async move {
        Event::default()
            .event(LOG_EVENT_NAME)
            .json_data(&event)
            .ok()
            .map(Ok::<_, Infallible>)
    });

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
