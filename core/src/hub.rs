//! Broadcast hub. Fans position updates and alerts out to dashboard
//! WebSocket subscribers, one registry entry per connected user.
//!
//! Follows a "never let one bad consumer stall everyone else" discipline:
//! a bounded per-subscriber channel with drop-on-overflow `try_send`
//! rather than an unbounded or blocking send, so one slow dashboard tab
//! cannot back-pressure the whole pipeline.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

const SUBSCRIBER_BUFFER: usize = 64;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum HubMessage {
    PositionUpdate(telemetry_types::NormalizedPosition),
    Alert { device_id: Uuid, rule_kind: String, severity: String, message: String },
}

pub struct Hub {
    subscribers: RwLock<HashMap<Uuid, Vec<(Uuid, mpsc::Sender<HubMessage>)>>>,
    /// Cross-process fan-out seam (§4.6) — `None` until/unless a pub/sub
    /// backend is configured and connects successfully, in which case every
    /// local publish is also relayed so other processes' dashboards see it.
    pubsub: RwLock<Option<Arc<crate::pubsub::PubSub>>>,
}

impl Hub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { subscribers: RwLock::new(HashMap::new()), pubsub: RwLock::new(None) })
    }

    pub async fn attach_pubsub(&self, pubsub: Arc<crate::pubsub::PubSub>) {
        *self.pubsub.write().await = Some(pubsub);
    }

    /// Registers a new subscriber and returns its receiver plus a
    /// subscription id the caller must hand back to [`Self::unsubscribe`] on
    /// disconnect — a user may have more than one dashboard tab open at
    /// once, and one tab closing must not sever the others.
    pub async fn subscribe(&self, user_id: Uuid) -> (Uuid, mpsc::Receiver<HubMessage>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let subscription_id = Uuid::new_v4();
        let mut subs = self.subscribers.write().await;
        subs.entry(user_id).or_default().push((subscription_id, tx));
        (subscription_id, rx)
    }

    pub async fn unsubscribe(&self, user_id: Uuid, subscription_id: Uuid) {
        let mut subs = self.subscribers.write().await;
        if let Some(list) = subs.get_mut(&user_id) {
            list.retain(|(id, _)| *id != subscription_id);
            if list.is_empty() {
                subs.remove(&user_id);
            }
        }
    }

    /// Publishes to this process's own subscribers only — no pub/sub relay.
    /// Used both by [`Self::publish`] and by the pub/sub subscriber loop
    /// rebroadcasting a message that originated on another process, which
    /// must not be relayed right back out or every process would echo it
    /// forever.
    pub async fn publish_local(&self, user_id: Uuid, message: HubMessage) {
        let subs = self.subscribers.read().await;
        let Some(senders) = subs.get(&user_id) else { return };
        for (_, tx) in senders {
            if tx.try_send(message.clone()).is_err() {
                debug!("hub: dropped message for a lagging subscriber of user {user_id}");
            }
        }
    }

    /// Best-effort local fan-out, plus a relay to the cross-process
    /// pub/sub seam (if attached) so other processes' locally-connected
    /// dashboards see this user's events too. Call this for events that
    /// originate on this process; use [`Self::publish_local`] for events
    /// already received from another process.
    pub async fn publish(&self, user_id: Uuid, message: HubMessage) {
        self.publish_local(user_id, message.clone()).await;
        if let Some(pubsub) = self.pubsub.read().await.clone() {
            pubsub.publish(user_id, message).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemetry_types::{NormalizedPosition, ProtocolKind};

    fn sample_position() -> NormalizedPosition {
        NormalizedPosition {
            device_identifier: "dev".into(),
            protocol: ProtocolKind::Teltonika,
            timestamp: chrono::Utc::now(),
            latitude: 0.0,
            longitude: 0.0,
            speed_kmh: 0.0,
            course_deg: 0.0,
            altitude_m: 0.0,
            satellites: 0,
            ignition: None,
            sensors: Default::default(),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_message() {
        let hub = Hub::new();
        let user_id = Uuid::new_v4();
        let (_sub_id, mut rx) = hub.subscribe(user_id).await;
        hub.publish(user_id, HubMessage::PositionUpdate(sample_position())).await;
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn unsubscribing_one_tab_leaves_the_others_of_the_same_user_live() {
        let hub = Hub::new();
        let user_id = Uuid::new_v4();
        let (sub_a, mut rx_a) = hub.subscribe(user_id).await;
        let (_sub_b, mut rx_b) = hub.subscribe(user_id).await;
        hub.unsubscribe(user_id, sub_a).await;
        hub.publish(user_id, HubMessage::PositionUpdate(sample_position())).await;
        assert!(rx_b.recv().await.is_some());
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_to_unknown_user_is_a_no_op() {
        let hub = Hub::new();
        hub.publish(Uuid::new_v4(), HubMessage::PositionUpdate(sample_position())).await;
    }

    #[tokio::test]
    async fn overflowing_a_subscriber_buffer_drops_silently_instead_of_blocking() {
        let hub = Hub::new();
        let user_id = Uuid::new_v4();
        let (_sub_id, _rx) = hub.subscribe(user_id).await; // never drained
        for _ in 0..(SUBSCRIBER_BUFFER + 10) {
            hub.publish(user_id, HubMessage::PositionUpdate(sample_position())).await;
        }
    }
}
