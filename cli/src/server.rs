use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::Serialize;
use switchboard_core::{AgentError, ConversationContext, Outbound, Session, SessionManager};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
}

#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

pub enum AppError {
    NotFound(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            AppError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", msg)
            }
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };

        (
            status,
            Json(ApiError {
                error: message,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<AgentError> for AppError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::SessionNotFound(_) => AppError::NotFound(err.to_string()),
            AgentError::SessionLimit(_) => AppError::Unavailable(err.to_string()),
            other => {
                tracing::error!("Internal error: {:?}", other);
                AppError::Internal(other.to_string())
            }
        }
    }
}

#[derive(Serialize)]
struct SessionCreated {
    session_id: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    sessions: usize,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/session", post(create_session))
        .route("/api/session/:id", delete(close_session))
        .route("/api/session/:id/transcript", get(transcript))
        .route("/ws/:session_id", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.manager.len(),
    })
}

async fn create_session(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<SessionCreated>), AppError> {
    let session_id = state.manager.create_session()?;
    Ok((StatusCode::CREATED, Json(SessionCreated { session_id })))
}

async fn close_session(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    state.manager.close_session(&id).await;
    StatusCode::NO_CONTENT
}

async fn transcript(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationContext>, AppError> {
    let session = state.manager.get_session(&id)?;
    Ok(Json(session.transcript()))
}

/// Unknown sessions are refused before the upgrade.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Response, AppError> {
    let session = state.manager.get_session(&session_id)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, session)))
}

enum Event {
    Client(Option<Result<Message, axum::Error>>),
    Agent(Option<Outbound>),
}

async fn handle_socket(mut socket: WebSocket, state: AppState, session: Arc<Session>) {
    tracing::info!(session = %session.id(), "WebSocket connected");

    loop {
        let event = tokio::select! {
            frame = socket.recv() => Event::Client(frame),
            outbound = session.recv() => Event::Agent(outbound),
        };

        match event {
            Event::Client(Some(Ok(Message::Text(text)))) => {
                if text.trim().is_empty() {
                    continue;
                }
                if let Err(e) = session.send(text).await {
                    tracing::warn!(session = %session.id(), "Dropping input: {}", e);
                    break;
                }
            }
            Event::Client(Some(Ok(Message::Close(_)))) | Event::Client(None) => break,
            Event::Client(Some(Ok(_))) => {}
            Event::Client(Some(Err(e))) => {
                tracing::debug!(session = %session.id(), "WebSocket error: {}", e);
                break;
            }
            Event::Agent(Some(outbound)) => {
                let payload = match serde_json::to_string(&outbound) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::error!("Failed to encode reply: {}", e);
                        continue;
                    }
                };
                if socket.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            Event::Agent(None) => break,
        }
    }

    state.manager.close_session(session.id()).await;
    tracing::info!(session = %session.id(), "WebSocket disconnected");
}
