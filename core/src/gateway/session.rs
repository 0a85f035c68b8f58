//! Live-connection registry: maps a device identifier to the channel that
//! feeds bytes out to its socket. A second login from the same device
//! atomically evicts whatever session was there before — one physical
//! tracker, one live session, no stale writers lingering after a reconnect.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use telemetry_types::ProtocolKind;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

#[derive(Clone)]
pub struct Session {
    pub protocol: ProtocolKind,
    outbound: mpsc::Sender<Bytes>,
}

impl Session {
    pub fn send(&self, bytes: Bytes) -> bool {
        self.outbound.try_send(bytes).is_ok()
    }

    pub fn sender(&self) -> mpsc::Sender<Bytes> {
        self.outbound.clone()
    }
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { sessions: RwLock::new(HashMap::new()) })
    }

    /// Registers a newly logged-in device, returning the receiver half the
    /// connection's writer task should drain. Replaces (and silently drops)
    /// any prior session for the same identifier.
    pub async fn register(&self, device_identifier: String, protocol: ProtocolKind) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(32);
        let mut sessions = self.sessions.write().await;
        if sessions.insert(device_identifier.clone(), Session { protocol, outbound: tx }).is_some() {
            debug!("gateway: evicted a prior live session for device {device_identifier}");
        }
        rx
    }

    pub async fn get(&self, device_identifier: &str) -> Option<Session> {
        self.sessions.read().await.get(device_identifier).cloned()
    }

    /// Removes a session only if it's still the one that was registered —
    /// guards against a reconnect's registration being clobbered by the old
    /// connection's own teardown running slightly later.
    pub async fn remove_if_current(&self, device_identifier: &str, outbound: &mpsc::Sender<Bytes>) {
        let mut sessions = self.sessions.write().await;
        if let Some(current) = sessions.get(device_identifier) {
            if current.outbound.same_channel(outbound) {
                sessions.remove(device_identifier);
            }
        }
    }
}
