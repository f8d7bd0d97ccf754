use std::future::Future;
use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One entry of the ordered context sent to a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: String,
    pub content: String,
}

impl ContextMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ModelClientError {
    #[error("model provider request timed out")]
    Timeout,
    #[error("model provider request failed: {0}")]
    Transport(String),
    #[error("model provider returned status {status}")]
    ProviderStatus { status: u16 },
    #[error("model provider reported an error: {0}")]
    Provider(String),
    #[error("model provider returned an invalid payload: {0}")]
    InvalidPayload(String),
    #[error("model provider stream ended before completion")]
    StreamTruncated,
}

pub type ModelReplyFuture<'a> =
    Pin<Box<dyn Future<Output = Result<String, ModelClientError>> + Send + 'a>>;

/// Text deltas in arrival order. The stream ends after the provider's
/// completion marker; any failure is yielded as a final `Err` item.
pub type ModelDeltaStream = Pin<Box<dyn Stream<Item = Result<String, ModelClientError>> + Send>>;

pub type ModelStreamFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ModelDeltaStream, ModelClientError>> + Send + 'a>>;

pub trait ModelClient: Send + Sync {
    fn chat<'a>(&'a self, model: &'a str, context: &'a [ContextMessage]) -> ModelReplyFuture<'a>;

    fn chat_stream<'a>(
        &'a self,
        model: &'a str,
        context: &'a [ContextMessage],
    ) -> ModelStreamFuture<'a>;
}
