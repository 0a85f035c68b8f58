//! Cross-process pub/sub seam over Redis. Optional — when `PUBSUB_URL` is
//! unset the hub only fans out to subscribers on this process, which is
//! fine for a single-instance deployment. One topic per user id, carrying
//! the same JSON envelope the hub already uses internally, so a second
//! process subscribed to the same channel can rebroadcast to its own
//! locally-connected dashboards.

use crate::hub::{Hub, HubMessage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    user_id: Uuid,
    message: HubMessageWire,
}

/// `HubMessage` itself already derives `Serialize`; `Deserialize` needs its
/// own mirror since the hub's internal type carries `NormalizedPosition`
/// by value and is otherwise only ever constructed locally.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum HubMessageWire {
    PositionUpdate(telemetry_types::NormalizedPosition),
    Alert { device_id: Uuid, rule_kind: String, severity: String, message: String },
}

impl From<HubMessage> for HubMessageWire {
    fn from(m: HubMessage) -> Self {
        match m {
            HubMessage::PositionUpdate(p) => HubMessageWire::PositionUpdate(p),
            HubMessage::Alert { device_id, rule_kind, severity, message } => {
                HubMessageWire::Alert { device_id, rule_kind, severity, message }
            }
        }
    }
}

impl From<HubMessageWire> for HubMessage {
    fn from(m: HubMessageWire) -> Self {
        match m {
            HubMessageWire::PositionUpdate(p) => HubMessage::PositionUpdate(p),
            HubMessageWire::Alert { device_id, rule_kind, severity, message } => {
                HubMessage::Alert { device_id, rule_kind, severity, message }
            }
        }
    }
}

const CHANNEL: &str = "telemetry:broadcast";

pub struct PubSub {
    client: redis::Client,
}

impl PubSub {
    pub fn connect(url: &str) -> Result<Self, redis::RedisError> {
        Ok(Self { client: redis::Client::open(url)? })
    }

    pub async fn publish(&self, user_id: Uuid, message: HubMessage) {
        let envelope = Envelope { user_id, message: message.into() };
        let Ok(payload) = serde_json::to_string(&envelope) else { return };
        match self.client.get_multiplexed_async_connection().await {
            Ok(mut conn) => {
                use redis::AsyncCommands;
                if let Err(e) = conn.publish::<_, _, ()>(CHANNEL, payload).await {
                    warn!("pubsub publish failed: {e}");
                }
            }
            Err(e) => warn!("pubsub connection failed: {e}"),
        }
    }

    /// Runs forever, rebroadcasting every message received on the shared
    /// channel into this process's local hub. Intended to be spawned once
    /// at startup; reconnects with a fixed backoff on subscribe failure
    /// rather than giving up.
    pub async fn run_subscriber(self: Arc<Self>, hub: Arc<Hub>) {
        loop {
            match self.client.get_async_pubsub().await {
                Ok(mut pubsub) => {
                    if let Err(e) = pubsub.subscribe(CHANNEL).await {
                        error!("pubsub subscribe failed: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                    let mut stream = pubsub.on_message();
                    use futures_util::StreamExt;
                    while let Some(msg) = stream.next().await {
                        let Ok(payload): Result<String, _> = msg.get_payload() else { continue };
                        let Ok(envelope) = serde_json::from_str::<Envelope>(&payload) else { continue };
                        hub.publish_local(envelope.user_id, envelope.message.into()).await;
                    }
                }
                Err(e) => {
                    error!("pubsub connection failed: {e}");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                }
            }
        }
    }
}
