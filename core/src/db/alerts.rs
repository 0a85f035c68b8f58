use crate::db::Db;
use crate::error::PersistError;
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AlertRow {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub device_id: Uuid,
    pub triggered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub severity: String,
    pub message: String,
    pub context: Json,
}

pub struct NewAlert {
    pub rule_id: Uuid,
    pub device_id: Uuid,
    pub triggered_at: DateTime<Utc>,
    pub severity: String,
    pub message: String,
    pub context: Json,
}

pub async fn insert(db: &Db, a: NewAlert) -> Result<AlertRow, PersistError> {
    sqlx::query_as::<_, AlertRow>(
        "INSERT INTO alerts (rule_id, device_id, triggered_at, severity, message, context) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
    )
    .bind(a.rule_id)
    .bind(a.device_id)
    .bind(a.triggered_at)
    .bind(a.severity)
    .bind(a.message)
    .bind(a.context)
    .fetch_one(db)
    .await
    .map_err(PersistError::Db)
}

/// An episode for `rule_id` on `device_id` is "open" while this is `Some` —
/// used to implement fire-once-per-continuous-violation debounce.
pub async fn open_for_rule(db: &Db, rule_id: Uuid, device_id: Uuid) -> Result<Option<AlertRow>, PersistError> {
    sqlx::query_as::<_, AlertRow>(
        "SELECT * FROM alerts WHERE rule_id = $1 AND device_id = $2 AND resolved_at IS NULL \
         ORDER BY triggered_at DESC LIMIT 1",
    )
    .bind(rule_id)
    .bind(device_id)
    .fetch_optional(db)
    .await
    .map_err(PersistError::Db)
}

pub async fn resolve(db: &Db, alert_id: Uuid, at: DateTime<Utc>) -> Result<(), PersistError> {
    sqlx::query("UPDATE alerts SET resolved_at = $1 WHERE id = $2")
        .bind(at)
        .bind(alert_id)
        .execute(db)
        .await
        .map_err(PersistError::Db)?;
    Ok(())
}
