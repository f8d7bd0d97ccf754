use thiserror::Error;

use crate::llm::ModelClientError;
use crate::repos::StoreError;
use crate::security::INPUT_REJECTION_MESSAGE;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatRequestError {
    #[error("message must not be blank")]
    EmptyMessage,
    #[error("message must be at most {max} characters")]
    MessageTooLong { max: usize },
    #[error("model must be at most {max} characters")]
    ModelTooLong { max: usize },
    #[error("session_title must be at most {max} characters")]
    TitleTooLong { max: usize },
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid chat request: {0}")]
    InvalidRequest(#[from] ChatRequestError),
    #[error("message rejected by input screening ({category})")]
    Rejected { category: String },
    #[error("chat session not found")]
    SessionNotFound,
    #[error("chat session belongs to another user")]
    SessionForbidden,
    #[error("model provider failure: {0}")]
    Provider(#[from] ModelClientError),
    #[error("chat persistence failed: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::SessionNotFound,
            StoreError::Forbidden => Self::SessionForbidden,
            other => Self::Store(other),
        }
    }
}

impl ChatError {
    /// Stable machine-readable code shared by HTTP bodies and stream events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Rejected { .. } => "security_violation",
            Self::SessionNotFound => "not_found",
            Self::SessionForbidden => "forbidden",
            Self::Provider(_) => "model_unavailable",
            Self::Store(_) => "internal_error",
        }
    }

    /// Caller-facing text. Never includes detector categories or provider detail.
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidRequest(err) => err.to_string(),
            Self::Rejected { .. } => INPUT_REJECTION_MESSAGE.to_string(),
            Self::SessionNotFound => "Chat session not found".to_string(),
            Self::SessionForbidden => "Chat session does not belong to the caller".to_string(),
            Self::Provider(_) => {
                "The assistant is temporarily unavailable; please retry later".to_string()
            }
            Self::Store(_) => "Unexpected server error".to_string(),
        }
    }
}
