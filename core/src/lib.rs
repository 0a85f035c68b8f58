//! Library root for `telemetry-core`. `main.rs` is a thin shell that wires
//! these modules together and starts the process; everything the gateway,
//! pipeline, and alert engine actually do lives here so integration tests
//! under `tests/` can drive it directly, in-process, without a socket.

pub mod alerts;
pub mod auth;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod hub;
pub mod logging;
pub mod pipeline;
pub mod protocols;
pub mod pubsub;
