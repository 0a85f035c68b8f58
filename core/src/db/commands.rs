use crate::db::Db;
use crate::error::PersistError;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    Pending,
    Sent,
    Acknowledged,
    Failed,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Sent => "sent",
            CommandStatus::Acknowledged => "acknowledged",
            CommandStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "sent" => CommandStatus::Sent,
            "acknowledged" => CommandStatus::Acknowledged,
            "failed" => CommandStatus::Failed,
            _ => CommandStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CommandRow {
    pub id: Uuid,
    pub device_id: Uuid,
    pub kind: String,
    pub raw: String,
    pub status: String,
    pub command_key: Option<String>,
    pub retries_remaining: i32,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub response: Option<String>,
}

pub async fn enqueue(db: &Db, device_id: Uuid, kind: &str, raw: &str) -> Result<CommandRow, PersistError> {
    sqlx::query_as::<_, CommandRow>(
        "INSERT INTO commands (device_id, kind, raw) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(device_id)
    .bind(kind)
    .bind(raw)
    .fetch_one(db)
    .await
    .map_err(PersistError::Db)
}

pub async fn mark_sent(db: &Db, id: Uuid, command_key: Option<&str>, at: DateTime<Utc>) -> Result<(), PersistError> {
    sqlx::query("UPDATE commands SET status = 'sent', command_key = $1, sent_at = $2 WHERE id = $3")
        .bind(command_key)
        .bind(at)
        .bind(id)
        .execute(db)
        .await
        .map_err(PersistError::Db)?;
    Ok(())
}

pub async fn mark_acknowledged(db: &Db, id: Uuid, at: DateTime<Utc>, response: &str) -> Result<(), PersistError> {
    sqlx::query("UPDATE commands SET status = 'acknowledged', acknowledged_at = $1, response = $2 WHERE id = $3")
        .bind(at)
        .bind(response)
        .bind(id)
        .execute(db)
        .await
        .map_err(PersistError::Db)?;
    Ok(())
}

pub async fn decrement_retry_or_fail(db: &Db, id: Uuid) -> Result<CommandRow, PersistError> {
    sqlx::query_as::<_, CommandRow>(
        "UPDATE commands SET \
            retries_remaining = retries_remaining - 1, \
            status = CASE WHEN retries_remaining - 1 <= 0 THEN 'failed' ELSE 'pending' END \
         WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .fetch_one(db)
    .await
    .map_err(PersistError::Db)
}

pub async fn sent_awaiting_ack(db: &Db, older_than: DateTime<Utc>) -> Result<Vec<CommandRow>, PersistError> {
    sqlx::query_as::<_, CommandRow>("SELECT * FROM commands WHERE status = 'sent' AND sent_at < $1")
        .bind(older_than)
        .fetch_all(db)
        .await
        .map_err(PersistError::Db)
}

pub async fn oldest_sent_for_device(db: &Db, device_id: Uuid) -> Result<Option<CommandRow>, PersistError> {
    sqlx::query_as::<_, CommandRow>(
        "SELECT * FROM commands WHERE device_id = $1 AND status = 'sent' ORDER BY sent_at ASC LIMIT 1",
    )
    .bind(device_id)
    .fetch_optional(db)
    .await
    .map_err(PersistError::Db)
}

pub async fn find_by_key(db: &Db, device_id: Uuid, command_key: &str) -> Result<Option<CommandRow>, PersistError> {
    sqlx::query_as::<_, CommandRow>(
        "SELECT * FROM commands WHERE device_id = $1 AND command_key = $2 AND status = 'sent'",
    )
    .bind(device_id)
    .bind(command_key)
    .fetch_optional(db)
    .await
    .map_err(PersistError::Db)
}

pub async fn pending_for_device(db: &Db, device_id: Uuid) -> Result<Vec<CommandRow>, PersistError> {
    sqlx::query_as::<_, CommandRow>(
        "SELECT * FROM commands WHERE device_id = $1 AND status = 'pending' ORDER BY created_at",
    )
    .bind(device_id)
    .fetch_all(db)
    .await
    .map_err(PersistError::Db)
}
