//! Command dispatcher: queues outbound instructions per device and pushes
//! them out the moment a live session exists, reconciling device
//! acknowledgements against the `commands` table's pending→sent→
//! (acknowledged|failed) lifecycle.
//!
//! A command built here uses a protocol-default codec rather than the
//! connection's own live codec instance — the one piece of per-connection
//! state that matters for this (GT06's running serial counter) only needs
//! to be unique enough for the device to echo back, not contiguous with its
//! uplink traffic, so a fresh codec per dispatch is sufficient. Noted as a
//! simplification in DESIGN.md.

use crate::db::{self, commands::CommandRow, Db};
use crate::error::{DispatchError, PersistError};
use crate::gateway::SessionRegistry;
use crate::protocols::Codec;
use chrono::Utc;
use std::sync::Arc;
use telemetry_types::{CommandPayload, ProtocolKind};
use tracing::{debug, warn};
use uuid::Uuid;

pub struct Dispatcher {
    db: Db,
    registry: Arc<SessionRegistry>,
    ack_timeout_secs: i64,
}

impl Dispatcher {
    pub fn new(db: Db, registry: Arc<SessionRegistry>, ack_timeout_secs: u64) -> Arc<Self> {
        Arc::new(Self { db, registry, ack_timeout_secs: ack_timeout_secs as i64 })
    }

    pub async fn enqueue(&self, device_id: Uuid, kind: &str, raw: &str) -> Result<CommandRow, DispatchError> {
        let row = db::commands::enqueue(&self.db, device_id, kind, raw).await?;
        self.try_flush_device(device_id).await;
        Ok(row)
    }

    /// Called the moment a device logs in — any commands that were queued
    /// while it was offline go out immediately instead of waiting for the
    /// next ack-timeout sweep.
    pub async fn on_session_live(&self, identifier: &str) {
        let Ok(Some(protocol)) = self.resolve_protocol(identifier).await else { return };
        let Ok(Some(device)) = db::devices::find_by_identifier(&self.db, identifier, protocol.as_str()).await else { return };
        self.try_flush_device(device.id).await;
    }

    async fn try_flush_device(&self, device_id: Uuid) {
        let Ok(Some(device)) = db::devices::get(&self.db, device_id).await else { return };
        let Some(session) = self.registry.get(&device.identifier).await else { return };
        if !Codec::new(session.protocol).supports_commands() {
            return;
        }
        let pending = match db::commands::pending_for_device(&self.db, device_id).await {
            Ok(p) => p,
            Err(e) => {
                warn!("dispatcher: failed to load pending commands for device {device_id}: {e}");
                return;
            }
        };
        // Only the oldest pending command is sent at a time — a device gets
        // one outstanding instruction to ack before the next goes out, so a
        // flood of queued commands doesn't show up as one unintelligible burst.
        let Some(command) = pending.into_iter().next() else { return };
        self.send_one(&device, &session, command).await;
    }

    async fn send_one(&self, device: &db::devices::Device, session: &crate::gateway::Session, command: CommandRow) {
        let codec = Codec::new(session.protocol);
        let payload = CommandPayload { kind: command.kind.clone(), raw: command.raw.clone() };
        let (bytes, correlation_key) = match codec.encode_command(&payload) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("dispatcher: failed to encode command {} for device {}: {e}", command.id, device.id);
                return;
            }
        };
        if !session.send(bytes) {
            debug!("dispatcher: session for device {} has no room, command {} stays pending", device.id, command.id);
            return;
        }
        if let Err(e) = db::commands::mark_sent(&self.db, command.id, correlation_key.as_deref(), Utc::now()).await {
            warn!("dispatcher: failed to mark command {} sent: {e}", command.id);
        }
    }

    /// Reconciles a device-reported ack against the `sent` queue: a keyed
    /// match if the protocol supports correlation, otherwise the oldest
    /// outstanding command for that device.
    pub async fn handle_ack(&self, identifier: &str, command_key: Option<String>, ok: bool, response: String) {
        let Ok(Some(protocol)) = self.resolve_protocol(identifier).await else { return };
        let Ok(Some(device)) = db::devices::find_by_identifier(&self.db, identifier, protocol.as_str()).await else { return };

        let matched = match &command_key {
            Some(key) => db::commands::find_by_key(&self.db, device.id, key).await,
            None => db::commands::oldest_sent_for_device(&self.db, device.id).await,
        };
        let Ok(Some(command)) = matched else {
            debug!("dispatcher: ack from device {} matched no outstanding command", device.id);
            return;
        };

        let result = if ok {
            db::commands::mark_acknowledged(&self.db, command.id, Utc::now(), &response).await
        } else {
            db::commands::decrement_retry_or_fail(&self.db, command.id).await.map(|_| ())
        };
        if let Err(e) = result {
            warn!("dispatcher: failed to reconcile ack for command {}: {e}", command.id);
        }
        self.try_flush_device(device.id).await;
    }

    async fn resolve_protocol(&self, identifier: &str) -> Result<Option<ProtocolKind>, PersistError> {
        for protocol in ProtocolKind::ALL {
            if db::devices::find_by_identifier(&self.db, identifier, protocol.as_str()).await?.is_some() {
                return Ok(Some(protocol));
            }
        }
        Ok(None)
    }

    /// Periodic sweep: a `sent` command that has waited longer than the
    /// configured timeout without an ack gets a retry (or is failed outright
    /// once its retry budget is exhausted).
    pub async fn sweep_timed_out_acks(&self) {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.ack_timeout_secs);
        let overdue = match db::commands::sent_awaiting_ack(&self.db, cutoff).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("dispatcher: ack-timeout sweep failed to load overdue commands: {e}");
                return;
            }
        };
        for command in overdue {
            match db::commands::decrement_retry_or_fail(&self.db, command.id).await {
                Ok(updated) if updated.status == "pending" => {
                    self.try_flush_device(command.device_id).await;
                }
                Ok(_) => {} // now failed, nothing more to do
                Err(e) => warn!("dispatcher: failed to age out command {}: {e}", command.id),
            }
        }
    }
}
