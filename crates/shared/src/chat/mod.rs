pub mod errors;
pub mod orchestrator;
pub mod request;
pub mod streaming;

pub use errors::{ChatError, ChatRequestError};
pub use orchestrator::{ChatDependencies, ChatOrchestrator, ChatSettings, TurnState};
pub use request::{estimate_tokens, validate_chat_request};
pub use streaming::ChatStreamEvent;
