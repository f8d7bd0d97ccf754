use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use shared::chat::ChatError;
use shared::models::{ErrorBody, ErrorResponse};
use tracing::error;

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: message.to_string(),
            },
        }),
    )
        .into_response()
}

pub(super) fn bad_request_response(code: &str, message: &str) -> Response {
    error_response(StatusCode::BAD_REQUEST, code, message)
}

pub(super) fn unauthorized_response() -> Response {
    error_response(
        StatusCode::UNAUTHORIZED,
        "unauthorized",
        "Missing or invalid bearer token",
    )
}

pub(super) fn too_many_requests_response(retry_after_seconds: u64) -> Response {
    let mut response = error_response(
        StatusCode::TOO_MANY_REQUESTS,
        "rate_limited",
        "Too many requests; retry later",
    );

    if let Ok(retry_after_value) = HeaderValue::from_str(&retry_after_seconds.to_string()) {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, retry_after_value);
    }

    response
}

pub(super) fn chat_error_status(err: &ChatError) -> StatusCode {
    match err {
        ChatError::InvalidRequest(_) | ChatError::Rejected { .. } => StatusCode::BAD_REQUEST,
        ChatError::SessionNotFound => StatusCode::NOT_FOUND,
        ChatError::SessionForbidden => StatusCode::FORBIDDEN,
        ChatError::Provider(_) => StatusCode::BAD_GATEWAY,
        ChatError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(super) fn chat_error_response(err: ChatError) -> Response {
    if let ChatError::Store(inner) = &err {
        error!("database operation failed: {inner}");
    }
    error_response(chat_error_status(&err), err.code(), &err.public_message())
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use shared::chat::{ChatError, ChatRequestError};
    use shared::llm::ModelClientError;
    use shared::repos::StoreError;

    use super::chat_error_status;

    #[test]
    fn chat_errors_map_to_http_statuses() {
        let cases = [
            (
                ChatError::from(ChatRequestError::EmptyMessage),
                StatusCode::BAD_REQUEST,
            ),
            (
                ChatError::Rejected {
                    category: "role_switch".to_string(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (ChatError::SessionNotFound, StatusCode::NOT_FOUND),
            (ChatError::SessionForbidden, StatusCode::FORBIDDEN),
            (
                ChatError::Provider(ModelClientError::Timeout),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ChatError::Store(StoreError::InvalidData("bad row".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(chat_error_status(&err), expected, "{err:?}");
        }
    }
}
