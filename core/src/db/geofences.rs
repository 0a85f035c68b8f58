use crate::db::Db;
use crate::error::PersistError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GeofenceRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub kind: String,
    pub polygon: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeofenceShape {
    Polygon,
    Polyline,
}

#[derive(Debug, Clone)]
pub struct Geofence {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub shape: GeofenceShape,
    pub polygon: Vec<LatLon>,
}

impl TryFrom<GeofenceRow> for Geofence {
    type Error = PersistError;

    fn try_from(row: GeofenceRow) -> Result<Self, Self::Error> {
        let polygon: Vec<LatLon> = serde_json::from_value(row.polygon)
            .map_err(|e| PersistError::Db(sqlx::Error::Decode(Box::new(e))))?;
        let shape = if row.kind == "polyline" { GeofenceShape::Polyline } else { GeofenceShape::Polygon };
        Ok(Geofence { id: row.id, owner_id: row.owner_id, name: row.name, shape, polygon })
    }
}

pub async fn list_for_owner(db: &Db, owner_id: Uuid) -> Result<Vec<Geofence>, PersistError> {
    let rows = sqlx::query_as::<_, GeofenceRow>("SELECT * FROM geofences WHERE owner_id = $1")
        .bind(owner_id)
        .fetch_all(db)
        .await
        .map_err(PersistError::Db)?;
    rows.into_iter().map(Geofence::try_from).collect()
}

pub async fn get(db: &Db, id: Uuid) -> Result<Option<Geofence>, PersistError> {
    let row = sqlx::query_as::<_, GeofenceRow>("SELECT * FROM geofences WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await
        .map_err(PersistError::Db)?;
    row.map(Geofence::try_from).transpose()
}
