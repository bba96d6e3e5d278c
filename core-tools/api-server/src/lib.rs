//! API Server
//!
//! REST and WebSocket surface over [`SessionHandle`]. The server holds no
//! session state of its own; every request is forwarded to the handle.
//!
//! # Endpoints
//!
//! - GET /sessions?owner=&status= - List sessions
//! - GET /sessions/:id - Current session state
//! - DELETE /sessions/:id - Delete a session
//! - POST /sessions/:id/resume - Answer a parked human-approval step
//! - POST /sessions/:id/dispatch - Continue a session from its cursor
//! - GET /sessions/:id/checkpoints - Checkpoint listing
//! - GET /sessions/:id/history?limit=N - Last N history entries
//! - GET /sessions/:id/render?format= - Render a finished session
//! - GET /ws/chat/:id?owner= - Event stream and turn input
//! - GET /api/status - Server status

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use sdk::handle::{SessionHandle, TurnOutcome, TurnRequest};
use sdk::{
    CheckpointInfo, EngineError, EngineErrorExt, ExecutionEvent, HistoryPage, OutputFormat,
    RenderedOutput, ResumeInput, Session, SessionFilter, SessionState, SessionStatus,
    DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::{SocketAddr, TcpListener};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

/// Error returned by a handler, rendered as `{"error", "hint"}`
#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    BadRequest(String),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError::Engine(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Engine(EngineError::SessionNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Engine(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Engine(e) => {
                if status.is_server_error() {
                    tracing::error!("Request failed: {}", e);
                }
                json!({"error": e.to_string(), "hint": e.user_hint()})
            }
            ApiError::BadRequest(message) => {
                json!({"error": message, "hint": "Check the request parameters"})
            }
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
struct ListQuery {
    owner: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RenderQuery {
    format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    owner: Option<String>,
}

/// Body of `POST /sessions/:id/resume`
#[derive(Debug, Deserialize)]
struct ResumeBody {
    #[serde(default)]
    approve: bool,
    response: Option<String>,
    /// Defaults to the session's outstanding token
    token: Option<String>,
}

/// Message a WebSocket client sends to start or continue a turn
#[derive(Debug, Deserialize)]
struct ClientMessage {
    message: String,
    output_format: Option<String>,
}

/// API server
pub struct ApiServer {
    addr: Option<SocketAddr>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl ApiServer {
    pub fn new() -> Self {
        Self {
            addr: None,
            shutdown_tx: None,
        }
    }

    /// Routes over a session handle
    pub fn router(handle: SessionHandle) -> Router {
        Router::new()
            .route("/sessions", get(list_sessions_handler))
            .route(
                "/sessions/:id",
                get(get_session_handler).delete(delete_session_handler),
            )
            .route("/sessions/:id/resume", post(resume_handler))
            .route("/sessions/:id/dispatch", post(dispatch_handler))
            .route("/sessions/:id/checkpoints", get(checkpoints_handler))
            .route("/sessions/:id/history", get(history_handler))
            .route("/sessions/:id/render", get(render_handler))
            .route("/ws/chat/:id", get(websocket_handler))
            .route("/api/status", get(status_handler))
            .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
            .with_state(handle)
    }

    /// Bind to `bind` (port 0 picks a free port) and serve in the background
    pub async fn start(
        &mut self,
        handle: SessionHandle,
        bind: &str,
    ) -> Result<SocketAddr, EngineError> {
        let listener = TcpListener::bind(bind)
            .map_err(|e| EngineError::Network(format!("Failed to bind to {}: {}", bind, e)))?;

        let addr = listener
            .local_addr()
            .map_err(|e| EngineError::Network(format!("Failed to get local address: {}", e)))?;

        listener
            .set_nonblocking(true)
            .map_err(|e| EngineError::Network(format!("Failed to set non-blocking: {}", e)))?;
        let tokio_listener = tokio::net::TcpListener::from_std(listener)
            .map_err(|e| EngineError::Network(format!("Failed to convert listener: {}", e)))?;

        let app = Self::router(handle);
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            tracing::info!("API server listening on http://{}", addr);

            axum::serve(tokio_listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_rx.await.ok();
                    tracing::info!("API server shutting down gracefully");
                })
                .await
                .unwrap_or_else(|e| {
                    tracing::error!("API server error: {}", e);
                });
        });

        self.addr = Some(addr);
        self.shutdown_tx = Some(shutdown_tx);
        Ok(addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            shutdown_tx.send(()).ok();
            tracing::info!("API server stopped");
        }
    }
}

impl Default for ApiServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn list_sessions_handler(
    State(handle): State<SessionHandle>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Value> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<SessionStatus>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let sessions: Vec<Session> = handle
        .list_sessions(SessionFilter {
            owner: query.owner,
            status,
        })
        .await?;

    Ok(Json(json!({
        "count": sessions.len(),
        "sessions": sessions,
    })))
}

async fn get_session_handler(
    State(handle): State<SessionHandle>,
    Path(id): Path<String>,
) -> ApiResult<SessionState> {
    Ok(Json(handle.get_session(&id).await?))
}

async fn delete_session_handler(
    State(handle): State<SessionHandle>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let deleted = handle.delete_session(&id).await?;
    Ok(Json(json!({
        "session_id": id,
        "deleted": deleted,
        "message": if deleted { "deleted" } else { "already absent" },
    })))
}

async fn resume_handler(
    State(handle): State<SessionHandle>,
    Path(id): Path<String>,
    Json(body): Json<ResumeBody>,
) -> ApiResult<TurnOutcome> {
    let input = ResumeInput::from_request(body.approve, body.response)?;
    Ok(Json(handle.resume(&id, body.token, input).await?))
}

async fn dispatch_handler(
    State(handle): State<SessionHandle>,
    Path(id): Path<String>,
) -> ApiResult<TurnOutcome> {
    Ok(Json(handle.dispatch(&id).await?))
}

async fn checkpoints_handler(
    State(handle): State<SessionHandle>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let checkpoints: Vec<CheckpointInfo> = handle.checkpoints(&id).await?;
    Ok(Json(json!({
        "session_id": id,
        "checkpoints": checkpoints,
    })))
}

async fn history_handler(
    State(handle): State<SessionHandle>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<HistoryPage> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    if !(1..=MAX_HISTORY_LIMIT).contains(&limit) {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_HISTORY_LIMIT
        )));
    }
    Ok(Json(handle.history(&id, limit).await?))
}

async fn render_handler(
    State(handle): State<SessionHandle>,
    Path(id): Path<String>,
    Query(query): Query<RenderQuery>,
) -> ApiResult<RenderedOutput> {
    let format = OutputFormat::parse(query.format.as_deref());
    Ok(Json(handle.render(&id, format).await?))
}

/// Server status API endpoint
async fn status_handler() -> Json<Value> {
    Json(json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(handle): State<SessionHandle>,
    Path(id): Path<String>,
    Query(query): Query<WsQuery>,
) -> Response {
    let owner = query.owner.unwrap_or_default();
    ws.on_upgrade(move |socket| handle_websocket(socket, handle, id, owner))
}

/// Wire frame for an event: `{type, data, session_id}`
pub fn frame(session_id: &str, event: &ExecutionEvent) -> String {
    let mut value = serde_json::to_value(event)
        .unwrap_or_else(|_| json!({"type": event.name(), "data": null}));
    if let Some(object) = value.as_object_mut() {
        object.insert("session_id".to_string(), json!(session_id));
    }
    value.to_string()
}

async fn handle_websocket(
    mut socket: WebSocket,
    handle: SessionHandle,
    session_id: String,
    owner: String,
) {
    tracing::info!("WebSocket connected for session {}", session_id);

    let mut events = handle.subscribe(&session_id).await;
    let connected = ExecutionEvent::Connected {
        message: format!("Connected to session {}", session_id),
    };
    if socket
        .send(Message::Text(frame(&session_id, &connected)))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client) => {
                                let request = TurnRequest {
                                    session_id: session_id.clone(),
                                    owner: owner.clone(),
                                    message: client.message,
                                    output_format: OutputFormat::parse(client.output_format.as_deref()),
                                };
                                // Progress and failures arrive as events on the bus
                                let handle = handle.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = handle.start_turn(request).await {
                                        tracing::debug!("Turn ended with error: {}", e);
                                    }
                                });
                            }
                            Err(e) => {
                                let error = ExecutionEvent::Error {
                                    error: format!("Malformed message: {}", e),
                                    hint: "Send {\"message\": \"...\", \"output_format\": \"chat\"}".to_string(),
                                };
                                if socket.send(Message::Text(frame(&session_id, &error))).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("WebSocket closed by client");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            event = events.recv() => {
                match event {
                    Some(event) => {
                        if socket.send(Message::Text(frame(&session_id, &event))).await.is_err() {
                            break;
                        }
                    }
                    // The session was deleted
                    None => break,
                }
            }
        }
    }

    tracing::info!("WebSocket connection for session {} closed", session_id);
}
