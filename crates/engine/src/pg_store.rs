//! PostgreSQL-backed message store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{Message, MessagePayload, MessageStatus};

use crate::store::MessageStore;

/// Message store writing to the `messages` table.
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

/// Raw `messages` row.
#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    status: String,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    retry_count: i32,
    max_retries: i32,
    payload: serde_json::Value,
}

impl TryFrom<MessageRow> for Message {
    type Error = AppError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let status: MessageStatus = row.status.parse().map_err(AppError::Persistence)?;
        let payload: MessagePayload = serde_json::from_value(row.payload).map_err(|e| {
            AppError::Persistence(format!("unreadable payload for message {}: {}", row.id, e))
        })?;

        Ok(Message {
            id: row.id,
            status,
            created_at: row.created_at,
            processed_at: row.processed_at,
            last_error: row.last_error,
            retry_count: column_to_count(row.id, "retry_count", row.retry_count)?,
            max_retries: column_to_count(row.id, "max_retries", row.max_retries)?,
            payload,
        })
    }
}

fn column_to_count(id: Uuid, column: &str, value: i32) -> Result<u32, AppError> {
    u32::try_from(value).map_err(|_| {
        AppError::Persistence(format!("negative {} {} for message {}", column, value, id))
    })
}

fn count_to_column(id: Uuid, field: &str, value: u32) -> Result<i32, AppError> {
    i32::try_from(value).map_err(|_| {
        AppError::Persistence(format!("{} {} of message {} does not fit the column", field, value, id))
    })
}

/// Convert recovered rows, failing on the first unreadable one so recovery
/// never silently drops a message.
fn rows_into_messages(rows: Vec<MessageRow>) -> Result<Vec<Message>, AppError> {
    rows.into_iter().map(Message::try_from).collect()
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn insert(&self, message: &Message) -> Result<(), AppError> {
        let payload = serde_json::to_value(&message.payload)?;
        let retry_count = count_to_column(message.id, "retry_count", message.retry_count)?;
        let max_retries = count_to_column(message.id, "max_retries", message.max_retries)?;

        sqlx::query(
            r#"
            INSERT INTO messages (id, kind, status, created_at, processed_at, last_error, retry_count, max_retries, payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(message.id)
        .bind(message.kind().to_string())
        .bind(message.status.to_string())
        .bind(message.created_at)
        .bind(message.processed_at)
        .bind(message.last_error.as_deref())
        .bind(retry_count)
        .bind(max_retries)
        .bind(&payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_status(&self, message: &Message) -> Result<(), AppError> {
        let retry_count = count_to_column(message.id, "retry_count", message.retry_count)?;

        let result = sqlx::query(
            r#"
            UPDATE messages
            SET status = $1, processed_at = $2, last_error = $3, retry_count = $4
            WHERE id = $5
            "#,
        )
        .bind(message.status.to_string())
        .bind(message.processed_at)
        .bind(message.last_error.as_deref())
        .bind(retry_count)
        .bind(message.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Persistence(format!(
                "message {} has no stored record",
                message.id
            )));
        }

        Ok(())
    }

    async fn load_pending_or_processing(&self) -> Result<Vec<Message>, AppError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, status, created_at, processed_at, last_error, retry_count, max_retries, payload
            FROM messages
            WHERE status IN ('pending', 'processing')
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows_into_messages(rows).inspect_err(|e| {
            tracing::error!(error = %e, "Unreadable message record, refusing to recover");
        })
    }
}
