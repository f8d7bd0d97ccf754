use uuid::Uuid;

use crate::models::{ChatSession, Message, NewSecurityIncident};

use super::StoreFuture;

/// Inputs for the first persistence phase of a turn: resolve or create the
/// session, load history and record the user message.
#[derive(Debug, Clone)]
pub struct PrepareTurn {
    pub user_id: Uuid,
    pub session_id: Option<Uuid>,
    pub session_title: Option<String>,
    pub requested_model: Option<String>,
    pub default_model: String,
    pub user_text: String,
    pub user_token_count: i32,
    pub history_limit: usize,
}

#[derive(Debug, Clone)]
pub struct PreparedTurn {
    pub session: ChatSession,
    pub is_new_session: bool,
    /// Prior messages, oldest first, excluding the new user message.
    pub history: Vec<Message>,
    pub user_message: Message,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct CommitTurn {
    pub session_id: Uuid,
    pub assistant_text: String,
    pub token_count: i32,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct CommittedTurn {
    pub assistant_message: Message,
    pub message_count: i32,
    pub token_usage: i64,
}

/// Persistence used by the chat pipeline. Each call is one atomic unit; no
/// implementation may hold a transaction across the model call in between.
pub trait ChatStore: Send + Sync {
    fn prepare_turn<'a>(&'a self, turn: PrepareTurn) -> StoreFuture<'a, PreparedTurn>;
    fn commit_turn<'a>(&'a self, turn: CommitTurn) -> StoreFuture<'a, CommittedTurn>;
}

pub trait IncidentStore: Send + Sync {
    fn insert_incident<'a>(&'a self, incident: NewSecurityIncident) -> StoreFuture<'a, i64>;
    fn mark_alert_sent<'a>(&'a self, incident_id: i64) -> StoreFuture<'a, ()>;
}
