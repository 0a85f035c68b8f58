use crate::db::Db;
use crate::error::PersistError;
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use telemetry_types::Sensors;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PositionRow {
    pub id: Uuid,
    pub device_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: f64,
    pub course_deg: f64,
    pub altitude_m: f64,
    pub satellites: i32,
    pub ignition: Option<bool>,
    pub odometer_m: f64,
    pub sensors: Json,
    pub trip_id: Option<Uuid>,
}

pub struct NewPosition {
    pub device_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: f64,
    pub course_deg: f64,
    pub altitude_m: f64,
    pub satellites: i32,
    pub ignition: Option<bool>,
    pub odometer_m: f64,
    pub sensors: Sensors,
}

pub async fn insert(db: &Db, p: NewPosition) -> Result<PositionRow, PersistError> {
    sqlx::query_as::<_, PositionRow>(
        "INSERT INTO positions \
            (device_id, recorded_at, latitude, longitude, speed_kmh, course_deg, altitude_m, \
             satellites, ignition, odometer_m, sensors) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
         RETURNING *",
    )
    .bind(p.device_id)
    .bind(p.recorded_at)
    .bind(p.latitude)
    .bind(p.longitude)
    .bind(p.speed_kmh)
    .bind(p.course_deg)
    .bind(p.altitude_m)
    .bind(p.satellites)
    .bind(p.ignition)
    .bind(p.odometer_m)
    .bind(serde_json::to_value(&p.sensors).unwrap_or(Json::Null))
    .fetch_one(db)
    .await
    .map_err(PersistError::Db)
}

/// Attaches a position to the trip open (or closed) around it, or clears
/// the reference when the device is between trips. Done as a follow-up
/// update rather than at insert time since the trip that owns a position
/// is only known once trip segmentation has run on it.
pub async fn set_trip_id(db: &Db, position_id: Uuid, trip_id: Option<Uuid>) -> Result<(), PersistError> {
    sqlx::query("UPDATE positions SET trip_id = $1 WHERE id = $2")
        .bind(trip_id)
        .bind(position_id)
        .execute(db)
        .await
        .map_err(PersistError::Db)?;
    Ok(())
}

pub async fn latest_for_device(db: &Db, device_id: Uuid) -> Result<Option<PositionRow>, PersistError> {
    sqlx::query_as::<_, PositionRow>(
        "SELECT * FROM positions WHERE device_id = $1 ORDER BY recorded_at DESC LIMIT 1",
    )
    .bind(device_id)
    .fetch_optional(db)
    .await
    .map_err(PersistError::Db)
}

pub async fn exists_at(db: &Db, device_id: Uuid, recorded_at: DateTime<Utc>) -> Result<bool, PersistError> {
    let row: Option<(i32,)> =
        sqlx::query_as("SELECT 1 FROM positions WHERE device_id = $1 AND recorded_at = $2")
            .bind(device_id)
            .bind(recorded_at)
            .fetch_optional(db)
            .await
            .map_err(PersistError::Db)?;
    Ok(row.is_some())
}

/// The position immediately preceding `recorded_at` for a device — used to
/// compute instantaneous speed deltas (harsh braking/acceleration) without
/// re-deriving them from the full history.
pub async fn before(db: &Db, device_id: Uuid, recorded_at: DateTime<Utc>) -> Result<Option<PositionRow>, PersistError> {
    sqlx::query_as::<_, PositionRow>(
        "SELECT * FROM positions WHERE device_id = $1 AND recorded_at < $2 ORDER BY recorded_at DESC LIMIT 1",
    )
    .bind(device_id)
    .bind(recorded_at)
    .fetch_optional(db)
    .await
    .map_err(PersistError::Db)
}

pub async fn history(
    db: &Db,
    device_id: Uuid,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Vec<PositionRow>, PersistError> {
    sqlx::query_as::<_, PositionRow>(
        "SELECT * FROM positions WHERE device_id = $1 AND recorded_at BETWEEN $2 AND $3 ORDER BY recorded_at",
    )
    .bind(device_id)
    .bind(since)
    .bind(until)
    .fetch_all(db)
    .await
    .map_err(PersistError::Db)
}
