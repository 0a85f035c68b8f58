use crate::db::Db;
use crate::error::PersistError;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub admin: bool,
    pub created_at: DateTime<Utc>,
}

pub async fn find_by_email(db: &Db, email: &str) -> Result<Option<User>, PersistError> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(db)
        .await
        .map_err(PersistError::Db)
}

pub async fn create(db: &Db, email: &str, password_hash: &str) -> Result<User, PersistError> {
    sqlx::query_as::<_, User>(
        "INSERT INTO users (email, password_hash) VALUES ($1, $2) RETURNING *",
    )
    .bind(email)
    .bind(password_hash)
    .fetch_one(db)
    .await
    .map_err(PersistError::Db)
}
