use crate::db::Db;
use crate::error::PersistError;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Trip {
    pub id: Uuid,
    pub device_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub start_position_id: Uuid,
    pub end_position_id: Option<Uuid>,
    pub distance_m: f64,
    pub max_speed_kmh: f64,
}

pub async fn open_trip(db: &Db, device_id: Uuid) -> Result<Option<Trip>, PersistError> {
    sqlx::query_as::<_, Trip>("SELECT * FROM trips WHERE device_id = $1 AND ended_at IS NULL")
        .bind(device_id)
        .fetch_optional(db)
        .await
        .map_err(PersistError::Db)
}

pub async fn start(db: &Db, device_id: Uuid, started_at: DateTime<Utc>, start_position_id: Uuid) -> Result<Trip, PersistError> {
    sqlx::query_as::<_, Trip>(
        "INSERT INTO trips (device_id, started_at, start_position_id) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(device_id)
    .bind(started_at)
    .bind(start_position_id)
    .fetch_one(db)
    .await
    .map_err(PersistError::Db)
}

pub async fn accumulate(
    db: &Db,
    trip_id: Uuid,
    extra_distance_m: f64,
    speed_kmh: f64,
) -> Result<(), PersistError> {
    sqlx::query(
        "UPDATE trips SET distance_m = distance_m + $1, max_speed_kmh = GREATEST(max_speed_kmh, $2) WHERE id = $3",
    )
    .bind(extra_distance_m)
    .bind(speed_kmh)
    .bind(trip_id)
    .execute(db)
    .await
    .map_err(PersistError::Db)?;
    Ok(())
}

pub async fn close(db: &Db, trip_id: Uuid, ended_at: DateTime<Utc>, end_position_id: Uuid) -> Result<(), PersistError> {
    sqlx::query("UPDATE trips SET ended_at = $1, end_position_id = $2 WHERE id = $3")
        .bind(ended_at)
        .bind(end_position_id)
        .bind(trip_id)
        .execute(db)
        .await
        .map_err(PersistError::Db)?;
    Ok(())
}
