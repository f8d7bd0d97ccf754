use crate::models::ChatRequest;

use super::errors::ChatRequestError;

pub const MAX_MESSAGE_CHARS: usize = 10_000;
pub const MAX_MODEL_CHARS: usize = 50;
pub const MAX_SESSION_TITLE_CHARS: usize = 255;

pub fn validate_chat_request(request: &ChatRequest) -> Result<(), ChatRequestError> {
    if request.message.trim().is_empty() {
        return Err(ChatRequestError::EmptyMessage);
    }
    if request.message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ChatRequestError::MessageTooLong {
            max: MAX_MESSAGE_CHARS,
        });
    }
    if request
        .model
        .as_deref()
        .is_some_and(|model| model.chars().count() > MAX_MODEL_CHARS)
    {
        return Err(ChatRequestError::ModelTooLong {
            max: MAX_MODEL_CHARS,
        });
    }
    if request
        .session_title
        .as_deref()
        .is_some_and(|title| title.chars().count() > MAX_SESSION_TITLE_CHARS)
    {
        return Err(ChatRequestError::TitleTooLong {
            max: MAX_SESSION_TITLE_CHARS,
        });
    }
    Ok(())
}

/// Rough token estimate used for accounting: one token per four characters.
pub fn estimate_tokens(text: &str) -> i32 {
    i32::try_from(text.chars().count() / 4).unwrap_or(i32::MAX)
}

/// Trimmed, non-empty optional field.
pub(crate) fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}
