use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};
use uuid::Uuid;

use crate::models::{Message, MessageRole};

use super::{Store, StoreError, message_role_from_db, pg_text};

const MESSAGE_COLUMNS: &str = "id, session_id, role, content, token_count, model, created_at";

pub(super) struct NewMessage<'a> {
    pub session_id: Uuid,
    pub role: MessageRole,
    pub content: &'a str,
    pub token_count: i32,
    pub model: Option<&'a str>,
}

impl Store {
    /// Full transcript of a session, oldest first.
    pub async fn list_session_messages(&self, session_id: Uuid) -> Result<Vec<Message>, StoreError> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE session_id = $1
             ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(message_from_row).collect()
    }

    pub async fn count_session_messages(&self, session_id: Uuid) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE session_id = $1")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

pub(super) async fn insert_message(
    conn: &mut PgConnection,
    message: NewMessage<'_>,
) -> Result<Message, StoreError> {
    let sql = format!(
        "INSERT INTO messages (session_id, role, content, token_count, model)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING {MESSAGE_COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(message.session_id)
        .bind(message.role.as_str())
        .bind(pg_text(message.content))
        .bind(message.token_count)
        .bind(message.model.map(pg_text))
        .fetch_one(conn)
        .await?;

    message_from_row(&row)
}

/// Most recent `limit` messages of a session, returned oldest first.
pub(super) async fn load_recent_messages(
    conn: &mut PgConnection,
    session_id: Uuid,
    limit: usize,
) -> Result<Vec<Message>, StoreError> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}
         FROM (
             SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE session_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2
         ) recent
         ORDER BY created_at ASC, id ASC"
    );
    let rows = sqlx::query(&sql)
        .bind(session_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(conn)
        .await?;

    rows.iter().map(message_from_row).collect()
}

fn message_from_row(row: &PgRow) -> Result<Message, StoreError> {
    let role: String = row.try_get("role")?;
    Ok(Message {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        role: message_role_from_db(&role)?,
        content: row.try_get("content")?,
        token_count: row.try_get("token_count")?,
        model: row.try_get("model")?,
        created_at: row.try_get("created_at")?,
    })
}
