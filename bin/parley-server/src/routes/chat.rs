//! Chat routes.
//!
//! Every exchange persists the user turn first, replays the most recent
//! turns of the session to the completion provider, then persists the
//! assistant's answer. A user turn saved before a later failure is kept.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderValue;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use tracing::{debug, error, info, warn};
use utoipa::OpenApi;
use uuid::Uuid;

use crate::completion::{ChatTurn, CompletionError};
use crate::entities::{ConversationTurn, NewTurn, TurnStore};
use crate::error::{client_message_for, FieldViolation, ServerError};
use crate::extract::ValidatedJson;
use crate::schemas::chat::{ChatRequest, ChatResponse, TestQuery, TurnResponse};
use crate::state::AppState;

/// Number of most recent turns replayed to the provider.
pub const HISTORY_WINDOW: i64 = 10;

/// Terminal frame of a successful stream.
pub const DONE_FRAME: &str = "[DONE]";

/// Response header carrying the session id of a streamed exchange.
pub static X_SESSION_ID: &str = "x-session-id";

#[derive(OpenApi)]
#[openapi(
    paths(chat, chat_stream, chat_history, test_completion),
    components(schemas(ChatRequest, ChatResponse, TurnResponse, FieldViolation))
)]
pub struct ChatApi;

/// Register chat routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
        .route("/chat/history/", get(chat_history_without_session))
        .route("/chat/history/{session_id}", get(chat_history))
        .route("/test", get(test_completion))
}

/// Session id plus the context window for one exchange.
struct Exchange {
    session_id: String,
    window: Vec<ChatTurn>,
}

/// Assign the session, persist the user turn and load the context window.
async fn open_exchange(state: &AppState, req: ChatRequest) -> Result<Exchange, ServerError> {
    let session_id = req
        .supplied_session_id()
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    state
        .store
        .append(NewTurn::user(&session_id, req.message))
        .await?;

    let recent = state.store.load_recent(&session_id, HISTORY_WINDOW).await?;
    let window = build_window(&recent)?;
    debug!(session_id = %session_id, window = window.len(), "exchange opened");

    Ok(Exchange { session_id, window })
}

/// Map newest-first stored turns into the chronological window.
///
/// Fails on the first turn whose role is not understood by the provider.
pub fn build_window(recent: &[ConversationTurn]) -> Result<Vec<ChatTurn>, CompletionError> {
    recent.iter().rev().map(ChatTurn::try_from).collect()
}

// ── Blocking chat ─────────────────────────────────────────────────────────────

/// Send a message and wait for the full reply (`POST /chat`).
#[utoipa::path(
    post,
    path = "/chat",
    tag = "chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Reply generated", body = ChatResponse),
        (status = 400, description = "Bad request"),
        (status = 500, description = "Persistence or AI service error"),
    )
)]
pub async fn chat(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<ChatRequest>,
) -> Result<Json<ChatResponse>, ServerError> {
    let Exchange { session_id, window } = open_exchange(&state, req).await?;

    let reply = state.completion.complete(&window).await?;

    state
        .store
        .append(NewTurn::assistant(&session_id, reply.clone()))
        .await?;

    info!(session_id = %session_id, reply_len = reply.len(), "chat exchange done");
    Ok(Json(ChatResponse { session_id, message: reply }))
}

// ── Streaming chat ────────────────────────────────────────────────────────────

/// Send a message and stream the reply as server-sent events (`POST /chat/stream`).
///
/// Each chunk is one `data:` frame; a successful stream ends with
/// `data: [DONE]`, a failed one with a single `data: {"error": ...}` frame.
#[utoipa::path(
    post,
    path = "/chat/stream",
    tag = "chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Reply streamed as text/event-stream", content_type = "text/event-stream", body = String),
        (status = 400, description = "Bad request"),
        (status = 500, description = "Persistence error"),
    )
)]
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<ChatRequest>,
) -> Result<Response, ServerError> {
    let Exchange { session_id, window } = open_exchange(&state, req).await?;
    let header = HeaderValue::from_str(&session_id).ok();

    let mut response = Sse::new(reply_frames(state, session_id, window)).into_response();
    if let Some(value) = header {
        response.headers_mut().insert(X_SESSION_ID, value);
    }
    Ok(response)
}

/// Frames for one streamed reply.
///
/// Chunks are written and accumulated on the same path, so a slow reader
/// stalls consumption of the upstream stream. Once the upstream ends cleanly
/// the write of the accumulated text is started before `[DONE]` is yielded,
/// so a client that hangs up on `[DONE]` still gets its reply stored.
/// Dropping the stream earlier (client gone mid-reply) persists nothing.
fn reply_frames(
    state: Arc<AppState>,
    session_id: String,
    window: Vec<ChatTurn>,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    async_stream::stream! {
        let mut full_response = String::new();
        let mut failure = None;

        match state.completion.complete_streaming(&window).await {
            Ok(mut chunks) => {
                while let Some(item) = chunks.next().await {
                    match item {
                        Ok(chunk) => {
                            let chunk = normalize_newlines(chunk);
                            full_response.push_str(&chunk);
                            yield Ok(Event::default().data(chunk));
                        }
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
            }
            Err(e) => failure = Some(e),
        }

        if let Some(e) = failure {
            warn!(session_id = %session_id, error = %e, emitted = full_response.len(), "reply stream failed");
            yield Ok(error_frame(&e));
        } else {
            if full_response.is_empty() {
                warn!(session_id = %session_id, "reply stream produced no text; nothing persisted");
            } else {
                tokio::spawn(persist_reply(state.clone(), session_id.clone(), full_response));
            }
            yield Ok(Event::default().data(DONE_FRAME));
        }
    }
}

/// Store a completed streamed reply. The client already has its frames, so a
/// failure is only logged.
async fn persist_reply(state: Arc<AppState>, session_id: String, reply: String) {
    let reply_len = reply.len();
    match state.store.append(NewTurn::assistant(&session_id, reply)).await {
        Ok(_) => info!(session_id = %session_id, reply_len, "streamed exchange done"),
        Err(e) => error!(session_id = %session_id, error = %e, "failed to persist streamed reply"),
    }
}

/// SSE field values cannot carry carriage returns; `data:` lines are split
/// on `\n` only.
fn normalize_newlines(chunk: String) -> String {
    if chunk.contains('\r') {
        chunk.replace("\r\n", "\n").replace('\r', "\n")
    } else {
        chunk
    }
}

fn error_frame(e: &CompletionError) -> Event {
    let body = serde_json::json!({ "error": client_message_for(e) });
    Event::default().data(body.to_string())
}

// ── History ───────────────────────────────────────────────────────────────────

/// Full chronological history of a session (`GET /chat/history/{session_id}`).
///
/// Unknown sessions yield an empty array. Any non-empty id is looked up
/// verbatim, the same rule `POST /chat` applies when it reuses a session.
#[utoipa::path(
    get,
    path = "/chat/history/{session_id}",
    tag = "chat",
    params(("session_id" = String, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Turns in chronological order", body = Vec<TurnResponse>),
        (status = 400, description = "Empty session id"),
        (status = 500, description = "Persistence error"),
    )
)]
pub async fn chat_history(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<TurnResponse>>, ServerError> {
    if session_id.is_empty() {
        return Err(empty_session_id());
    }
    let turns = state.store.load_all(&session_id).await?;
    Ok(Json(turns.iter().map(ConversationTurn::to_response).collect()))
}

async fn chat_history_without_session() -> ServerError {
    empty_session_id()
}

fn empty_session_id() -> ServerError {
    ServerError::BadRequest("session_id must not be empty".into())
}

// ── Diagnostics ───────────────────────────────────────────────────────────────

/// One round-trip to the provider with `msg` as a single user turn (`GET /test`).
///
/// Nothing is persisted.
#[utoipa::path(
    get,
    path = "/test",
    tag = "diagnostics",
    params(TestQuery),
    responses(
        (status = 200, description = "Raw completion text", body = String),
        (status = 500, description = "AI service error"),
    )
)]
pub async fn test_completion(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TestQuery>,
) -> Result<Json<String>, ServerError> {
    let text = state.completion.complete(&[ChatTurn::user(query.msg)]).await?;
    Ok(Json(text))
}

// ── Tests ──────────────────────────────────────────────────────────────────────
