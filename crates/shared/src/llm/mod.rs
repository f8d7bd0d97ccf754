pub mod client;
pub mod context;
pub mod frames;
pub mod ollama;

pub use client::{
    ContextMessage, ModelClient, ModelClientError, ModelDeltaStream, ModelReplyFuture,
    ModelStreamFuture,
};
pub use context::ConversationAssembler;
pub use ollama::{OllamaClientError, OllamaModelClient};
