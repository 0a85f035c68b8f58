use crate::db::Db;
use crate::error::PersistError;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NotificationChannel {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub dispatch_url: String,
}

pub async fn get(db: &Db, id: Uuid) -> Result<Option<NotificationChannel>, PersistError> {
    sqlx::query_as::<_, NotificationChannel>("SELECT * FROM notification_channels WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await
        .map_err(PersistError::Db)
}
