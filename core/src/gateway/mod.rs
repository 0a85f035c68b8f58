//! Protocol gateway: one TCP (or UDP, for H02) listener per configured
//! port, each bound to exactly one [`telemetry_types::ProtocolKind`] and
//! feeding decoded positions into the [`crate::pipeline::Pipeline`].
//!
//! A listener's accept/recv loop never exits on a per-connection or
//! per-datagram error, it logs and keeps serving everyone else.

mod session;
mod tcp;
mod udp;

pub use session::{Session, SessionRegistry};

use crate::alerts::AlertEngine;
use crate::config::{Config, ListenerConfig};
use crate::dispatch::Dispatcher;
use crate::pipeline::Pipeline;
use std::sync::Arc;
use tracing::{error, info};

/// Spawns one background task per configured listener. Each task owns its
/// own bind/accept loop and runs for the lifetime of the process; a bind
/// failure is logged but does not take down the others.
pub fn spawn_listeners(
    config: &Config,
    pipeline: Arc<Pipeline>,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<SessionRegistry>,
) {
    for listener in &config.listeners {
        let listener = *listener;
        let bind_address = config.bind_address;
        let pipeline = pipeline.clone();
        let dispatcher = dispatcher.clone();
        let registry = registry.clone();
        let cap = config.max_connection_buffer_bytes;

        if listener.protocol.is_udp() {
            tokio::spawn(async move {
                udp::run(bind_address, listener, pipeline, cap).await;
            });
        } else {
            tokio::spawn(async move {
                tcp::run(bind_address, listener, pipeline, dispatcher, registry, cap).await;
            });
        }
    }
}

/// Registers the dispatcher's `sent`-ack-timeout sweep and the alert
/// engine's offline sweep as their own periodic background tasks.
pub fn spawn_background_sweeps(config: &Config, dispatcher: Arc<Dispatcher>, alert_engine: Arc<AlertEngine>) {
    let offline_interval = config.offline_sweep_secs;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(offline_interval));
        loop {
            ticker.tick().await;
            alert_engine.sweep_offline().await;
        }
    });

    let ack_timeout = config.command_ack_timeout_secs;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(ack_timeout.max(1)));
        loop {
            ticker.tick().await;
            dispatcher.sweep_timed_out_acks().await;
        }
    });

    info!("gateway: background sweeps scheduled (offline every {offline_interval}s, command ack timeout {ack_timeout}s)");
}

fn log_bind_failure(listener: ListenerConfig, err: impl std::fmt::Display) {
    error!("gateway: failed to bind {} listener on port {}: {err}", listener.protocol, listener.port);
}
