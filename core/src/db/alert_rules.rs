use crate::db::Db;
use crate::error::PersistError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    /// 0 = Sunday .. 6 = Saturday, device-local time.
    pub weekdays: Vec<u8>,
    pub start_hour: u8,
    pub end_hour: u8,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AlertRuleRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub device_id: Option<Uuid>,
    pub kind: String,
    pub params: serde_json::Value,
    pub enabled: bool,
    pub schedule: Option<serde_json::Value>,
}

pub async fn list_enabled_for_device(db: &Db, device_id: Uuid) -> Result<Vec<AlertRuleRow>, PersistError> {
    sqlx::query_as::<_, AlertRuleRow>(
        "SELECT * FROM alert_rules WHERE enabled AND (device_id = $1 OR device_id IS NULL)",
    )
    .bind(device_id)
    .fetch_all(db)
    .await
    .map_err(PersistError::Db)
}

pub async fn list_enabled(db: &Db) -> Result<Vec<AlertRuleRow>, PersistError> {
    sqlx::query_as::<_, AlertRuleRow>("SELECT * FROM alert_rules WHERE enabled")
        .fetch_all(db)
        .await
        .map_err(PersistError::Db)
}

/// The rule's channel list: every notification channel a firing should
/// dispatch through, resolved against the owning user's channels.
pub async fn channel_ids(db: &Db, rule_id: Uuid) -> Result<Vec<Uuid>, PersistError> {
    sqlx::query_scalar::<_, Uuid>("SELECT channel_id FROM alert_rule_channels WHERE rule_id = $1")
        .bind(rule_id)
        .fetch_all(db)
        .await
        .map_err(PersistError::Db)
}
