use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::json;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{info, warn};

use cproxy_common::{CompletionDefaults, CorsConfig};
use cproxy_core::{
    ChatResponse, ChunkStream, CopilotClient, HandlerError, SessionStore, for_each_chunk,
    new_completion_id,
};
use cproxy_protocol::chat::request::{ChatRequestBody, CompletionRequest};
use cproxy_protocol::chat::stream::ChatCompletionChunk;
use cproxy_protocol::error::ErrorEnvelope;
use cproxy_protocol::sse::{encode_data, encode_done};
use cproxy_transform::{ChunkTranslator, CompletionContext, aggregate_completion};

use crate::cors::cors_layer;

#[derive(Clone)]
pub struct GatewayState {
    pub client: CopilotClient,
    pub session: Arc<SessionStore>,
    pub defaults: Arc<CompletionDefaults>,
}

pub fn gateway_router(state: GatewayState, cors: &CorsConfig) -> Router {
    Router::new()
        .route("/chat", post(chat_completions))
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(state)
        .layer(cors_layer(cors))
}

/// Fills every field the caller left out from the configured defaults.
pub fn build_completion_request(
    body: ChatRequestBody,
    defaults: &CompletionDefaults,
) -> CompletionRequest {
    CompletionRequest {
        model: body
            .model
            .filter(|model| !model.trim().is_empty())
            .unwrap_or_else(|| defaults.model.clone()),
        messages: body.messages,
        stream: body.stream.unwrap_or(defaults.stream),
        temperature: body.temperature.unwrap_or(defaults.temperature),
        top_p: body.top_p.unwrap_or(defaults.top_p),
        n: body.n.unwrap_or(defaults.n),
    }
}

async fn chat_completions(State(state): State<GatewayState>, body: Bytes) -> Response {
    let body: ChatRequestBody = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(err) => {
            warn!(event = "chat_request_rejected", error = %err);
            return error_response("Invalid request payload".to_string());
        }
    };

    let request = build_completion_request(body, &state.defaults);
    let id = new_completion_id();
    let created = OffsetDateTime::now_utc().unix_timestamp();
    info!(
        event = "chat_request",
        completion_id = %id,
        model = %request.model,
        messages = request.messages.len(),
        is_stream = request.stream
    );

    let session = state.session.current();
    if session.is_expired() {
        warn!(
            event = "session_token_stale",
            completion_id = %id,
            expires_at = session.expires_at
        );
    }
    let response = match state.client.chat(&session.token, &request).await {
        Ok(response) => response,
        Err(err) if request.stream => return event_stream(Body::from(error_frame(&id, &err))),
        Err(err) => return chat_failure(&id, err),
    };

    match response {
        ChatResponse::Stream(bytes) => {
            let translator = ChunkTranslator::new(id, created, request.model);
            sse_response(ChunkStream::new(bytes, translator))
        }
        ChatResponse::Json(body) => {
            let ctx = CompletionContext {
                id: &id,
                created,
                model: &request.model,
                messages: &request.messages,
            };
            match aggregate_completion(&body, ctx) {
                Ok(completion) => Json(completion).into_response(),
                Err(err) => chat_failure(&id, err),
            }
        }
    }
}

fn sse_response(chunks: ChunkStream) -> Response {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(pump_chunks(chunks, tx));
    let frames = futures_util::stream::unfold(rx, |mut rx| async move {
        let frame = rx.recv().await?;
        Some((Ok::<Bytes, Infallible>(frame), rx))
    });
    event_stream(Body::from_stream(frames))
}

/// Writes one frame per chunk, then `[DONE]` or a single error event.
/// Stops reading upstream as soon as the client goes away.
async fn pump_chunks(chunks: ChunkStream, tx: mpsc::UnboundedSender<Bytes>) {
    let id = chunks.id().to_string();
    let frames = tx.clone();
    let write_frame = move |chunk: ChatCompletionChunk| -> Result<(), HandlerError> {
        let json = serde_json::to_string(&chunk)
            .map_err(|err| HandlerError::new(format!("encode chunk: {err}")))?;
        frames
            .send(encode_data(&json))
            .map_err(|_| HandlerError::new("client disconnected"))
    };

    let outcome = tokio::select! {
        outcome = for_each_chunk(chunks, write_frame) => outcome,
        _ = tx.closed() => {
            info!(event = "chat_stream_cancelled", completion_id = %id);
            return;
        }
    };
    let last = match outcome {
        Ok(delivered) => {
            info!(event = "chat_stream_finished", completion_id = %id, chunks = delivered);
            encode_done()
        }
        Err(err) => error_frame(&id, &err),
    };
    let _ = tx.send(last);
}

fn event_stream(body: Body) -> Response {
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response
}

/// In-band error event. The stream ends after it, without `[DONE]`.
fn error_frame(completion_id: &str, err: &dyn std::fmt::Display) -> Bytes {
    warn!(
        event = "chat_stream_failed",
        completion_id = %completion_id,
        error = %err
    );
    let envelope = ErrorEnvelope::new(
        format!("Failed to process chat request: {err}"),
        "server_error",
    );
    let json = serde_json::to_string(&envelope).unwrap_or_else(|_| {
        r#"{"error":{"message":"stream failed","type":"server_error"}}"#.to_string()
    });
    encode_data(&json)
}

fn chat_failure(completion_id: &str, err: impl std::fmt::Display) -> Response {
    warn!(
        event = "chat_request_failed",
        completion_id = %completion_id,
        error = %err
    );
    error_response(format!("Failed to process chat request: {err}"))
}

fn error_response(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}
