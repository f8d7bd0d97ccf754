use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};
use uuid::Uuid;

use crate::models::{ChatSession, MessageRole, SessionStatus};

use super::contracts::{ChatStore, CommitTurn, CommittedTurn, PrepareTurn, PreparedTurn};
use super::messages::{NewMessage, insert_message, load_recent_messages};
use super::{DEFAULT_SESSION_TITLE, Store, StoreError, StoreFuture, session_status_from_db};

const SESSION_COLUMNS: &str = "session_id, user_id, title, model, status, message_count, \
     token_usage, is_public, created_at, updated_at, last_accessed_at";

impl Store {
    pub async fn get_chat_session(&self, session_id: Uuid) -> Result<Option<ChatSession>, StoreError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE session_id = $1");
        let row = sqlx::query(&sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    pub async fn set_chat_session_status(
        &self,
        session_id: Uuid,
        status: SessionStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE chat_sessions
             SET status = $2,
                 updated_at = NOW()
             WHERE session_id = $1",
        )
        .bind(session_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn prepare_turn_tx(&self, turn: PrepareTurn) -> Result<PreparedTurn, StoreError> {
        let mut tx = self.pool.begin().await?;

        let (session, is_new_session) = match turn.session_id {
            Some(session_id) => (
                resolve_owned_session(&mut tx, session_id, turn.user_id).await?,
                false,
            ),
            None => {
                let title = turn
                    .session_title
                    .as_deref()
                    .map(str::trim)
                    .filter(|title| !title.is_empty())
                    .unwrap_or(DEFAULT_SESSION_TITLE);
                let model = turn
                    .requested_model
                    .as_deref()
                    .unwrap_or(turn.default_model.as_str());
                (insert_session(&mut tx, turn.user_id, title, model).await?, true)
            }
        };

        let model = turn
            .requested_model
            .clone()
            .unwrap_or_else(|| session.model.clone());
        let history = load_recent_messages(&mut tx, session.session_id, turn.history_limit).await?;
        let user_message = insert_message(
            &mut tx,
            NewMessage {
                session_id: session.session_id,
                role: MessageRole::User,
                content: &turn.user_text,
                token_count: turn.user_token_count,
                model: Some(&model),
            },
        )
        .await?;
        let session = refresh_session(&mut tx, session.session_id).await?;

        tx.commit().await?;

        Ok(PreparedTurn {
            session,
            is_new_session,
            history,
            user_message,
            model,
        })
    }

    async fn commit_turn_tx(&self, turn: CommitTurn) -> Result<CommittedTurn, StoreError> {
        let mut tx = self.pool.begin().await?;

        let assistant_message = insert_message(
            &mut tx,
            NewMessage {
                session_id: turn.session_id,
                role: MessageRole::Assistant,
                content: &turn.assistant_text,
                token_count: turn.token_count,
                model: Some(&turn.model),
            },
        )
        .await?;

        let session = refresh_session(&mut tx, turn.session_id).await?;

        tx.commit().await?;

        Ok(CommittedTurn {
            assistant_message,
            message_count: session.message_count,
            token_usage: session.token_usage,
        })
    }
}

impl ChatStore for Store {
    fn prepare_turn<'a>(&'a self, turn: PrepareTurn) -> StoreFuture<'a, PreparedTurn> {
        Box::pin(self.prepare_turn_tx(turn))
    }

    fn commit_turn<'a>(&'a self, turn: CommitTurn) -> StoreFuture<'a, CommittedTurn> {
        Box::pin(self.commit_turn_tx(turn))
    }
}

async fn resolve_owned_session(
    conn: &mut PgConnection,
    session_id: Uuid,
    user_id: Uuid,
) -> Result<ChatSession, StoreError> {
    let sql = format!(
        "SELECT {SESSION_COLUMNS}
         FROM chat_sessions
         WHERE session_id = $1
           AND status <> 'DELETED'"
    );
    let row = sqlx::query(&sql)
        .bind(session_id)
        .fetch_optional(conn)
        .await?;
    let Some(row) = row else {
        return Err(StoreError::NotFound);
    };

    let session = session_from_row(&row)?;
    if session.user_id != user_id {
        return Err(StoreError::Forbidden);
    }
    Ok(session)
}

async fn insert_session(
    conn: &mut PgConnection,
    user_id: Uuid,
    title: &str,
    model: &str,
) -> Result<ChatSession, StoreError> {
    let sql = format!(
        "INSERT INTO chat_sessions (session_id, user_id, title, model, status, is_public)
         VALUES ($1, $2, $3, $4, 'ACTIVE', FALSE)
         RETURNING {SESSION_COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(title)
        .bind(model)
        .fetch_one(conn)
        .await?;

    session_from_row(&row)
}

/// Recomputes `message_count` and `token_usage` from the stored messages and
/// bumps the access timestamps.
async fn refresh_session(conn: &mut PgConnection, session_id: Uuid) -> Result<ChatSession, StoreError> {
    let sql = format!(
        "UPDATE chat_sessions
         SET message_count = (
                 SELECT COUNT(*)::INT FROM messages WHERE session_id = $1
             ),
             token_usage = (
                 SELECT COALESCE(SUM(token_count), 0)::BIGINT FROM messages WHERE session_id = $1
             ),
             last_accessed_at = NOW(),
             updated_at = NOW()
         WHERE session_id = $1
         RETURNING {SESSION_COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(session_id)
        .fetch_optional(conn)
        .await?;
    let Some(row) = row else {
        return Err(StoreError::NotFound);
    };

    session_from_row(&row)
}

fn session_from_row(row: &PgRow) -> Result<ChatSession, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(ChatSession {
        session_id: row.try_get("session_id")?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        model: row.try_get("model")?,
        status: session_status_from_db(&status)?,
        message_count: row.try_get("message_count")?,
        token_usage: row.try_get("token_usage")?,
        is_public: row.try_get("is_public")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        last_accessed_at: row.try_get("last_accessed_at")?,
    })
}
