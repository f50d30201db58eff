//! Shared HTTP + WebSocket server for protocol instances.
//!
//! One TCP listener serves every instance. Each instance mounts its path and
//! the router dispatches requests dynamically:
//!
//! ```text
//! 0.0.0.0:5700
//! ├── GET  /qq/10001/onebot/v11           → forward WebSocket (upgrade)
//! ├── POST /qq/10001/onebot/v11/send_msg  → HTTP action call
//! └── GET  /qq/10001/onebot/v12/get_self_info?access_token=...
//! ```
//!
//! Access tokens are read from `Authorization: Bearer|Token <t>` or the
//! `access_token` query parameter. HTTP calls answer 401/403 on a missing or
//! wrong token; WebSocket upgrades complete and are closed with code 1002.
//! Every response carries permissive CORS headers.
//!
//! An HTTP call that outlives [`MountOptions::call_timeout`] is answered with
//! a failure envelope. An `echo` field in the query or body is not a
//! parameter; it is copied into the response.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use onegate_core::{ActionEndpoint, EventSink, TransportError, TransportResult};

use crate::auth::parse_authorization;

#[cfg(feature = "http-server")]
use {
    crate::auth::authorize,
    axum::{
        Json,
        body::{Body, to_bytes},
    },
    onegate_core::{ActionError, ActionRequest},
    serde_json::Map,
};

#[cfg(feature = "ws-server")]
use {
    crate::frame::{encode_response, handle_frame},
    axum::extract::{
        FromRequestParts,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    futures::{SinkExt, StreamExt},
};

const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
const OUTBOUND_CAPACITY: usize = 256;

/// Close code for a rejected access token.
pub const CLOSE_UNAUTHORIZED: u16 = 1002;
/// Close code used when an instance stops.
pub const CLOSE_GOING_AWAY: u16 = 1001;

// ─── Forward WebSocket connections ────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Frame {
    Text(Arc<str>),
    Close(u16, String),
}

/// The open forward WebSocket connections of one instance.
///
/// Acts as the instance's event sink for the forward WebSocket transport:
/// every pushed payload is broadcast to all open sockets.
pub struct SocketSet {
    path: String,
    sockets: Mutex<HashMap<u64, mpsc::Sender<Frame>>>,
    next_id: AtomicU64,
}

impl SocketSet {
    fn new(path: String) -> Self {
        Self {
            path,
            sockets: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    #[cfg_attr(not(feature = "ws-server"), allow(dead_code))]
    fn insert(&self, tx: mpsc::Sender<Frame>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sockets.lock().insert(id, tx);
        id
    }

    #[cfg_attr(not(feature = "ws-server"), allow(dead_code))]
    fn remove(&self, id: u64) {
        self.sockets.lock().remove(&id);
    }

    /// Number of open sockets.
    pub fn len(&self) -> usize {
        self.sockets.lock().len()
    }

    /// Returns `true` if no socket is open.
    pub fn is_empty(&self) -> bool {
        self.sockets.lock().is_empty()
    }

    /// Closes every open socket.
    pub fn close_all(&self, code: u16, reason: &str) {
        for (id, tx) in self.sockets.lock().drain() {
            if tx.try_send(Frame::Close(code, reason.to_string())).is_err() {
                debug!(path = %self.path, socket = id, "Socket already gone while closing");
            }
        }
    }
}

#[async_trait]
impl EventSink for SocketSet {
    fn describe(&self) -> String {
        format!("ws-server {}", self.path)
    }

    async fn push(&self, payload: Arc<str>) -> Option<Value> {
        let targets: Vec<_> = self
            .sockets
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();
        for (id, tx) in targets {
            // A slow consumer loses frames rather than stalling the others.
            if let Err(e) = tx.try_send(Frame::Text(payload.clone())) {
                warn!(path = %self.path, socket = id, error = %e, "Dropped event for WebSocket consumer");
            }
        }
        None
    }
}

// ─── Mounts ───────────────────────────────────────────────────────────────────

/// What an instance exposes on its path.
pub struct MountOptions {
    /// Handles inbound action calls.
    pub endpoint: Arc<dyn ActionEndpoint>,
    /// Token consumers must present.
    pub access_token: Option<String>,
    /// Serve `<path>/<action>` over HTTP.
    pub http: bool,
    /// Accept forward WebSocket connections on `<path>`.
    pub ws: bool,
    /// Upper bound for one HTTP action call.
    pub call_timeout: Duration,
}

struct Mount {
    options: MountOptions,
    sockets: Arc<SocketSet>,
}

/// Keeps a path mounted; dropping it unmounts the path and closes its sockets.
pub struct MountHandle {
    path: String,
    state: Weak<SharedState>,
    sockets: Arc<SocketSet>,
}

impl MountHandle {
    /// The mounted path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The forward WebSocket connections of this mount.
    pub fn sockets(&self) -> Arc<SocketSet> {
        self.sockets.clone()
    }
}

impl Drop for MountHandle {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.mounts.write().remove(&self.path);
        }
        self.sockets.close_all(CLOSE_GOING_AWAY, "instance stopped");
        info!(path = %self.path, "Unmounted instance path");
    }
}

#[derive(Default)]
struct SharedState {
    mounts: RwLock<HashMap<String, Arc<Mount>>>,
}

impl SharedState {
    fn mount(&self, path: &str) -> Option<Arc<Mount>> {
        self.mounts.read().get(path).cloned()
    }

    #[cfg_attr(not(feature = "http-server"), allow(dead_code))]
    fn action_route(&self, path: &str) -> Option<(Arc<Mount>, String)> {
        let (prefix, action) = path.rsplit_once('/')?;
        if action.is_empty() {
            return None;
        }
        let prefix = if prefix.is_empty() { "/" } else { prefix };
        self.mount(prefix).map(|mount| (mount, action.to_string()))
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    format!("/{trimmed}")
}

// ─── Server ───────────────────────────────────────────────────────────────────

/// The shared listener.
///
/// Stops serving when [`shutdown`](Self::shutdown) is called or the value is
/// dropped.
pub struct GatewayServer {
    local_addr: SocketAddr,
    state: Arc<SharedState>,
    shutdown_token: CancellationToken,
}

impl GatewayServer {
    /// Binds `addr` and starts serving.
    pub async fn bind(addr: &str) -> TransportResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed {
                url: addr.to_string(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr()?;

        let state = Arc::new(SharedState::default());
        let router = Router::new().fallback(dispatch).with_state(state.clone());
        let shutdown_token = CancellationToken::new();
        let token = shutdown_token.clone();

        tokio::spawn(async move {
            let server = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            );
            tokio::select! {
                result = server => {
                    if let Err(e) = result {
                        error!(error = %e, "Gateway server error");
                    }
                }
                () = token.cancelled() => {
                    info!(addr = %local_addr, "Gateway server shutting down");
                }
            }
        });

        info!(addr = %local_addr, "Gateway server listening");
        Ok(Self {
            local_addr,
            state,
            shutdown_token,
        })
    }

    /// The address actually bound (includes an ephemeral port).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Mounts an instance on `path`.
    pub fn mount(&self, path: &str, options: MountOptions) -> TransportResult<MountHandle> {
        let path = normalize_path(path);
        let sockets = Arc::new(SocketSet::new(path.clone()));

        let mut mounts = self.state.mounts.write();
        if mounts.contains_key(&path) {
            return Err(TransportError::InvalidConfig(format!(
                "path '{path}' is already mounted"
            )));
        }
        info!(path = %path, http = options.http, ws = options.ws, "Mounted instance path");
        mounts.insert(
            path.clone(),
            Arc::new(Mount {
                options,
                sockets: sockets.clone(),
            }),
        );

        Ok(MountHandle {
            path,
            state: Arc::downgrade(&self.state),
            sockets,
        })
    }

    /// Number of mounted paths.
    pub fn mount_count(&self) -> usize {
        self.state.mounts.read().len()
    }

    /// Stops accepting connections.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }
}

impl Drop for GatewayServer {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

// ─── Dispatch ─────────────────────────────────────────────────────────────────

fn with_cors(mut response: Response) -> Response {
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

fn preflight() -> Response {
    let mut response = with_cors(StatusCode::NO_CONTENT.into_response());
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Authorization, Content-Type"),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static("86400"),
    );
    response
}

fn not_found(path: &str) -> Response {
    with_cors((StatusCode::NOT_FOUND, format!("No handler for path: {path}")).into_response())
}

fn provided_token(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_authorization)
        .map(str::to_string)
        .or_else(|| query.get("access_token").cloned())
}

#[cfg_attr(not(feature = "ws-server"), allow(dead_code))]
fn is_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

async fn dispatch(
    State(state): State<Arc<SharedState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    if request.method() == Method::OPTIONS {
        return preflight();
    }

    #[cfg_attr(not(feature = "ws-server"), allow(unused_mut))]
    let (mut parts, body) = request.into_parts();
    let path = normalize_path(parts.uri.path());
    let query: HashMap<String, String> = Query::try_from_uri(&parts.uri)
        .map(|Query(q)| q)
        .unwrap_or_default();
    let token = provided_token(&parts.headers, &query);

    #[cfg(feature = "ws-server")]
    {
        if is_upgrade(&parts.headers) {
            let Some(mount) = state.mount(&path).filter(|m| m.options.ws) else {
                return not_found(&path);
            };
            let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
                Ok(upgrade) => upgrade,
                Err(rejection) => return with_cors(rejection.into_response()),
            };
            let verdict = crate::auth::authorize(
                mount.options.access_token.as_deref(),
                token.as_deref(),
            );
            debug!(remote = %remote, path = %path, "WebSocket upgrade request");
            return upgrade.on_upgrade(move |socket| async move {
                match verdict {
                    Ok(()) => serve_socket(mount, socket, remote).await,
                    Err(e) => reject_socket(socket, remote, &e.to_string()).await,
                }
            });
        }
    }

    #[cfg(feature = "http-server")]
    {
        if let Some((mount, action)) = state.action_route(&path).filter(|(m, _)| m.options.http) {
            debug!(remote = %remote, path = %path, action = %action, "HTTP action call");
            let method = parts.method.clone();
            return with_cors(handle_http(mount, action, method, query, token, body).await);
        }
    }

    let _ = (body, token, remote);
    not_found(&path)
}

// ─── HTTP actions ─────────────────────────────────────────────────────────────

#[cfg(feature = "http-server")]
async fn handle_http(
    mount: Arc<Mount>,
    action: String,
    method: Method,
    query: HashMap<String, String>,
    token: Option<String>,
    body: Body,
) -> Response {
    let endpoint = &mount.options.endpoint;
    if let Err(e) = authorize(mount.options.access_token.as_deref(), token.as_deref()) {
        let status = match e {
            ActionError::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::FORBIDDEN,
        };
        return (status, Json(endpoint.reject(&e, None))).into_response();
    }

    let mut params: Map<String, Value> = query
        .into_iter()
        .filter(|(key, _)| key != "access_token")
        .map(|(key, value)| (key, Value::String(value)))
        .collect();

    if method == Method::POST {
        let bad_request = |reason: String| {
            (
                StatusCode::BAD_REQUEST,
                Json(endpoint.reject(&ActionError::BadRequest(reason), None)),
            )
                .into_response()
        };
        let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => return bad_request(e.to_string()),
        };
        if !bytes.iter().all(u8::is_ascii_whitespace) {
            match serde_json::from_slice::<Value>(&bytes) {
                Ok(Value::Object(body)) => params.extend(body),
                Ok(_) => return bad_request("body must be a JSON object".into()),
                Err(e) => return bad_request(e.to_string()),
            }
        }
    } else if method != Method::GET {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let echo = params.remove("echo");
    let request = ActionRequest {
        action: action.clone(),
        params: Value::Object(params),
        echo: echo.clone(),
    };
    let response = match tokio::time::timeout(mount.options.call_timeout, endpoint.call(request))
        .await
    {
        Ok(response) => response,
        Err(_) => {
            warn!(
                path = %mount.sockets.path,
                action = %action,
                timeout = ?mount.options.call_timeout,
                "HTTP action call timed out"
            );
            endpoint.reject(&ActionError::Handler("timeout".into()), echo)
        }
    };
    let unsupported = endpoint
        .reject(&ActionError::UnsupportedAction(action), None)
        .retcode;
    let status = if !response.is_success() && response.retcode == unsupported {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::OK
    };
    (status, Json(response)).into_response()
}

// ─── Forward WebSocket ────────────────────────────────────────────────────────

#[cfg(feature = "ws-server")]
async fn reject_socket(mut socket: WebSocket, remote: SocketAddr, reason: &str) {
    warn!(remote = %remote, reason = %reason, "Rejected WebSocket consumer");
    let frame = CloseFrame {
        code: CLOSE_UNAUTHORIZED,
        reason: reason.to_string().into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

#[cfg(feature = "ws-server")]
async fn serve_socket(mount: Arc<Mount>, socket: WebSocket, remote: SocketAddr) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Frame>(OUTBOUND_CAPACITY);
    let id = mount.sockets.insert(tx.clone());
    let path = mount.sockets.path.clone();
    info!(path = %path, remote = %remote, socket = id, "WebSocket consumer connected");

    for frame in mount.options.endpoint.greeting_frames() {
        let _ = tx.send(Frame::Text(frame.into())).await;
    }

    // ── Send task: forwards outgoing frames to the WebSocket write half ───────
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let message = match frame {
                Frame::Text(text) => Message::Text(text.to_string().into()),
                Frame::Close(code, reason) => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    let _ = ws_tx.send(Message::Close(Some(frame))).await;
                    break;
                }
            };
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    // ── Receive loop: each inbound frame is an action call ────────────────────
    while let Some(result) = ws_rx.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    debug!(path = %path, socket = id, "Ignoring non-UTF-8 binary frame");
                    continue;
                }
            },
            Ok(Message::Close(_)) => {
                info!(path = %path, socket = id, "WebSocket consumer closed the connection");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(path = %path, socket = id, error = %e, "WebSocket error");
                break;
            }
        };

        let endpoint = mount.options.endpoint.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let response = handle_frame(endpoint.as_ref(), &text).await;
            if let Some(json) = encode_response(&response) {
                let _ = tx.send(Frame::Text(json.into())).await;
            }
        });
    }

    // ── Cleanup ───────────────────────────────────────────────────────────────
    mount.sockets.remove(id);
    send_task.abort();
    info!(path = %path, socket = id, "WebSocket consumer disconnected");
}
