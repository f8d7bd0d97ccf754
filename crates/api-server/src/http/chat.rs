use std::convert::Infallible;

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use shared::chat::ChatStreamEvent;
use shared::models::{
    ChatRequest, DoneEventData, ErrorBody, MessageEventData, RequestMeta, SessionEventData,
};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use super::errors::{bad_request_response, chat_error_response};
use super::{AppState, AuthUser};

pub(super) async fn chat(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Extension(meta): Extension<RequestMeta>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let request = match parse_payload(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    run_blocking(state, user, meta, request).await
}

pub(super) async fn chat_in_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Extension(meta): Extension<RequestMeta>,
    session_id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let request = match with_path_session(session_id, payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    run_blocking(state, user, meta, request).await
}

pub(super) async fn chat_stream(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Extension(meta): Extension<RequestMeta>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let request = match parse_payload(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    run_streaming(state, user, meta, request)
}

pub(super) async fn chat_stream_in_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Extension(meta): Extension<RequestMeta>,
    session_id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let request = match with_path_session(session_id, payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    run_streaming(state, user, meta, request)
}

async fn run_blocking(
    state: AppState,
    user: AuthUser,
    meta: RequestMeta,
    request: ChatRequest,
) -> Response {
    match state.orchestrator.chat(user.user_id, request, meta).await {
        Ok(response) => {
            info!(
                user_id = %user.user_id,
                session_id = %response.session_id,
                model = %response.model,
                new_session = response.is_new_session,
                "chat turn completed"
            );
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(err) => chat_error_response(err),
    }
}

/// Admission failures are answered as plain JSON errors; once the stream is
/// open every later failure travels as an `error` event.
fn run_streaming(
    state: AppState,
    user: AuthUser,
    meta: RequestMeta,
    request: ChatRequest,
) -> Response {
    let receiver = match state.orchestrator.chat_stream(user.user_id, request, meta) {
        Ok(receiver) => receiver,
        Err(err) => return chat_error_response(err),
    };

    let events = ReceiverStream::new(receiver).map(|event| Ok::<Event, Infallible>(sse_event(event)));
    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn sse_event(event: ChatStreamEvent) -> Event {
    let encoded = match event {
        ChatStreamEvent::Session {
            session_id,
            user_message_id,
        } => Event::default().event("session").json_data(SessionEventData {
            session_id,
            user_message_id,
        }),
        ChatStreamEvent::Message(content) => Event::default()
            .event("message")
            .json_data(MessageEventData { content }),
        ChatStreamEvent::Done {
            assistant_message_id,
            replacement,
        } => Event::default().event("done").json_data(DoneEventData {
            assistant_message_id,
            replacement,
        }),
        ChatStreamEvent::Error { code, message } => Event::default()
            .event("error")
            .json_data(ErrorBody { code, message }),
    };

    encoded.unwrap_or_else(|err| {
        warn!("failed to encode stream event: {err}");
        Event::default()
            .event("error")
            .data(r#"{"code":"internal_error","message":"Unexpected server error"}"#)
    })
}

fn parse_payload(payload: Result<Json<ChatRequest>, JsonRejection>) -> Result<ChatRequest, Response> {
    match payload {
        Ok(Json(request)) => Ok(request),
        Err(rejection) => {
            warn!("chat payload rejected: {}", rejection.body_text());
            Err(bad_request_response(
                "invalid_request",
                "Request body must be a JSON chat request",
            ))
        }
    }
}

fn with_path_session(
    session_id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<ChatRequest, Response> {
    let Ok(Path(session_id)) = session_id else {
        return Err(bad_request_response(
            "invalid_request",
            "session_id must be a UUID",
        ));
    };
    let mut request = parse_payload(payload)?;
    request.session_id = Some(session_id);
    Ok(request)
}

