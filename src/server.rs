use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::config::AppConfig;
use crate::conversation::{TurnReducer, TurnState, TurnUpdate};
use crate::normalized::{CanonicalEvent, sse_event, sse_frame};
use crate::session::SessionSummary;
use crate::upstream::{Upstream, start_turn};

/// How often idle sessions are swept.
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let state = AppState::from_config(Arc::clone(&config))?;

    info!(
        name: "upstream.configured",
        upstream = ?state.upstream,
        reveal_delay_ms = config.pacing.reveal_delay_ms,
        "Upstream configured"
    );

    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            let removed = sessions.cleanup_expired();
            if removed > 0 {
                info!(name: "session.swept", removed = removed, "Expired sessions removed");
            }
        }
    });

    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/stream", post(api_stream))
        .route("/api/chat", post(api_chat))
        .route("/api/chat/stream", get(api_chat_stream))
        .route("/api/sessions", get(api_list_sessions))
        .route(
            "/api/sessions/{id}",
            get(api_get_session).delete(api_delete_session),
        )
        .route("/api/sessions/{id}/turns", get(api_get_turns))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Request body naming a question.
#[derive(Debug, Deserialize)]
struct QuestionRequest {
    question: String,
}

/// POST /api/stream - Inbound wire stream from the in-process producer.
async fn api_stream(
    State(state): State<AppState>,
    Json(req): Json<QuestionRequest>,
) -> Result<Response, (StatusCode, String)> {
    if req.question.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Question is required".to_string()));
    }

    let bytes = state.producer.open(&req.question).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to open producer stream");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    Ok(build_sse_response(Body::from_stream(bytes)))
}

/// Request body for chat API.
#[derive(Debug, Deserialize)]
struct ChatRequest {
    /// The question to answer.
    question: String,
    /// Optional session ID (creates new if not provided).
    #[serde(default)]
    session_id: Option<String>,
}

/// Response from chat API.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Session ID for this conversation.
    pub session_id: String,
    /// The turn just started.
    pub turn_id: String,
    /// URL for the SSE stream.
    pub stream_url: String,
}

/// POST /api/chat - Start a turn and get its stream URL.
async fn api_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Question is required".to_string()));
    }

    let session = match req.session_id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => state.sessions.get_or_create(id),
        None => state.sessions.create(),
    };
    let turn = session.begin_turn(question);

    info!(
        name: "chat.turn.created",
        session_id = %session.id(),
        turn_id = %turn.id,
        "Received chat request"
    );

    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("session_id", session.id())
        .append_pair("turn_id", &turn.id)
        .finish();

    Ok(Json(ChatResponse {
        session_id: session.id().to_string(),
        turn_id: turn.id,
        stream_url: format!("/api/chat/stream?{query}"),
    }))
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    session_id: String,
    turn_id: String,
}

/// GET /api/chat/stream - Run a turn and stream its canonical events.
async fn api_chat_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Response {
    let Some(session) = state.sessions.get(&query.session_id) else {
        return single_error_sse("Session not found");
    };
    let Some((snapshot, cancel)) = session.claim_turn(&query.turn_id) else {
        return single_error_sse("Turn not found or already streaming");
    };

    let upstream = Arc::clone(&state.upstream);
    let reveal_delay = state.config.pacing.reveal_delay();

    let sse_stream = async_stream::stream! {
        let reducer = TurnReducer::from_state(snapshot);
        let mut run = start_turn(upstream.as_ref(), reducer, reveal_delay, cancel).await;

        while let Some(update) = run.next().await {
            if should_publish(&update) {
                session.publish(run.state());
            }
            match update {
                TurnUpdate::Applied { event, changed } => {
                    tracing::trace!(
                        turn_id = %run.state().id,
                        kind = event.kind(),
                        changed = changed,
                        "Event applied"
                    );
                    yield Ok::<String, Infallible>(sse_event(&event));
                }
                TurnUpdate::Failed { reason } => {
                    yield Ok::<String, Infallible>(error_frame(&reason));
                }
            }
        }

        let cancelled = run.is_cancelled();
        let outcome = run.into_outcome();
        let final_state = outcome.state();
        session.publish(final_state);
        session.end_turn(&final_state.id);

        info!(
            name: "turn.completed",
            session_id = %session.id(),
            turn_id = %final_state.id,
            cancelled = cancelled,
            failed = final_state.is_failed(),
            "Turn completed"
        );

        if !cancelled {
            yield Ok::<String, Infallible>(snapshot_frame(final_state));
        }
    };

    build_sse_response(Body::from_stream(sse_stream))
}

/// GET /api/sessions - List all sessions.
async fn api_list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.sessions.summaries())
}

/// GET /api/sessions/:id - Get session details.
async fn api_get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSummary>, StatusCode> {
    state
        .sessions
        .get(&id)
        .map(|s| Json(s.summary()))
        .ok_or(StatusCode::NOT_FOUND)
}

/// DELETE /api/sessions/:id - Delete a session.
async fn api_delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> StatusCode {
    match state.sessions.remove(&id) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

/// GET /api/sessions/:id/turns - Read-only turn snapshots.
async fn api_get_turns(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TurnState>>, StatusCode> {
    state
        .sessions
        .get(&id)
        .map(|s| Json(s.turns()))
        .ok_or(StatusCode::NOT_FOUND)
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Whether an update should refresh the stored snapshot.
///
/// Text deltas are left to the final publish after the run ends.
fn should_publish(update: &TurnUpdate) -> bool {
    match update {
        TurnUpdate::Applied {
            event: CanonicalEvent::TextChunk { .. },
            ..
        } => false,
        TurnUpdate::Applied { changed, .. } => *changed,
        TurnUpdate::Failed { .. } => true,
    }
}

fn error_frame(message: &str) -> String {
    let json = serde_json::json!({ "message": message }).to_string();
    sse_frame("turn.error", &json)
}

fn snapshot_frame(state: &TurnState) -> String {
    let json = serde_json::to_string(state).unwrap_or_else(|_| "{}".to_string());
    sse_frame("turn.snapshot", &json)
}

fn single_error_sse(message: &str) -> Response {
    build_sse_response(Body::from(error_frame(message)))
}

fn build_sse_response(body: Body) -> Response {
    let mut resp = Response::new(body);
    let h = resp.headers_mut();
    h.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    h.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    h.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    h.insert("X-Accel-Buffering", HeaderValue::from_static("no"));
    resp
}
