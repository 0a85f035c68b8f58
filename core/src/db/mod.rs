//! Persistence layer. Hand-written SQL against Postgres via `sqlx`, no ORM,
//! no PostGIS — geometry (geofence polygons) is stored as plain JSON and
//! evaluated in Rust by the alert engine rather than pushed down to the
//! database.
//!
//! Queries are built with `sqlx::query_as` against runtime SQL strings
//! rather than the `query!`/`query_as!` macros, since those require a live
//! database reachable at compile time — this crate is never built with one
//! available.

pub mod alert_rules;
pub mod alerts;
pub mod commands;
pub mod devices;
pub mod geofences;
pub mod notification_channels;
pub mod positions;
pub mod trips;
pub mod users;

use crate::error::PersistError;
use sqlx::postgres::{PgPool, PgPoolOptions};

pub type Db = PgPool;

pub async fn connect(database_url: &str) -> Result<Db, PersistError> {
    PgPoolOptions::new()
        .max_connections(16)
        .connect(database_url)
        .await
        .map_err(PersistError::Db)
}
