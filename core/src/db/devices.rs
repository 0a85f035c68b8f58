use crate::db::Db;
use crate::error::PersistError;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Device {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub identifier: String,
    pub protocol: String,
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub last_position_id: Option<Uuid>,
}

pub async fn find_by_identifier(db: &Db, identifier: &str, protocol: &str) -> Result<Option<Device>, PersistError> {
    sqlx::query_as::<_, Device>(
        "SELECT * FROM devices WHERE identifier = $1 AND protocol = $2",
    )
    .bind(identifier)
    .bind(protocol)
    .fetch_optional(db)
    .await
    .map_err(PersistError::Db)
}

pub async fn touch_last_seen(db: &Db, device_id: Uuid, at: DateTime<Utc>) -> Result<(), PersistError> {
    sqlx::query("UPDATE devices SET last_seen_at = $1 WHERE id = $2")
        .bind(at)
        .bind(device_id)
        .execute(db)
        .await
        .map_err(PersistError::Db)?;
    Ok(())
}

pub async fn set_last_position(db: &Db, device_id: Uuid, position_id: Uuid) -> Result<(), PersistError> {
    sqlx::query("UPDATE devices SET last_position_id = $1 WHERE id = $2")
        .bind(position_id)
        .bind(device_id)
        .execute(db)
        .await
        .map_err(PersistError::Db)?;
    Ok(())
}

pub async fn list_for_owner(db: &Db, owner_id: Uuid) -> Result<Vec<Device>, PersistError> {
    sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE owner_id = $1 ORDER BY name")
        .bind(owner_id)
        .fetch_all(db)
        .await
        .map_err(PersistError::Db)
}

pub async fn get(db: &Db, id: Uuid) -> Result<Option<Device>, PersistError> {
    sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await
        .map_err(PersistError::Db)
}

pub async fn all_devices(db: &Db) -> Result<Vec<Device>, PersistError> {
    sqlx::query_as::<_, Device>("SELECT * FROM devices")
        .fetch_all(db)
        .await
        .map_err(PersistError::Db)
}
