use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use crate::models::{IncidentSeverity, IncidentSource, MessageRole, SessionStatus};

mod chat_sessions;
mod contracts;
mod messages;
mod security_incidents;

pub use contracts::{ChatStore, CommitTurn, CommittedTurn, IncidentStore, PrepareTurn, PreparedTurn};

pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("chat session not found")]
    NotFound,
    #[error("chat session belongs to another user")]
    Forbidden,
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
}

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let _: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

/// Postgres TEXT cannot hold NUL; replace it before binding user or model text.
fn pg_text(value: &str) -> Cow<'_, str> {
    if value.contains('\0') {
        Cow::Owned(value.replace('\0', "\u{FFFD}"))
    } else {
        Cow::Borrowed(value)
    }
}

fn session_status_from_db(value: &str) -> Result<SessionStatus, StoreError> {
    match value {
        "ACTIVE" => Ok(SessionStatus::Active),
        "PAUSED" => Ok(SessionStatus::Paused),
        "ARCHIVED" => Ok(SessionStatus::Archived),
        "DELETED" => Ok(SessionStatus::Deleted),
        _ => Err(StoreError::InvalidData(format!(
            "unknown session status persisted: {value}"
        ))),
    }
}

fn message_role_from_db(value: &str) -> Result<MessageRole, StoreError> {
    match value {
        "USER" => Ok(MessageRole::User),
        "ASSISTANT" => Ok(MessageRole::Assistant),
        "SYSTEM" => Ok(MessageRole::System),
        _ => Err(StoreError::InvalidData(format!(
            "unknown message role persisted: {value}"
        ))),
    }
}

fn incident_severity_from_db(value: &str) -> Result<IncidentSeverity, StoreError> {
    match value {
        "LOW" => Ok(IncidentSeverity::Low),
        "MEDIUM" => Ok(IncidentSeverity::Medium),
        "HIGH" => Ok(IncidentSeverity::High),
        "CRITICAL" => Ok(IncidentSeverity::Critical),
        _ => Err(StoreError::InvalidData(format!(
            "unknown incident severity persisted: {value}"
        ))),
    }
}

fn incident_source_from_db(value: &str) -> Result<IncidentSource, StoreError> {
    match value {
        "INPUT" => Ok(IncidentSource::Input),
        "OUTPUT" => Ok(IncidentSource::Output),
        _ => Err(StoreError::InvalidData(format!(
            "unknown incident source persisted: {value}"
        ))),
    }
}
