//! Position ingestion pipeline: clock sanity, de-dup, odometer accounting,
//! trip segmentation, then a transactional persist with a synchronous
//! hand-off into the alert engine and an asynchronous hand-off to the
//! broadcast hub.

pub mod geo;

use crate::alerts::AlertEngine;
use crate::db::{devices, positions, trips, Db};
use crate::error::{PersistError, PipelineError};
use crate::hub::{Hub, HubMessage};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use telemetry_types::NormalizedPosition;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// A gap this wide between two consecutive fixes on an open trip means the
/// device went silent rather than kept traveling — the trip is closed at
/// the last position actually seen, not bridged across the silence.
const TRIP_IDLE_GAP_SECS: i64 = 15 * 60;

/// Ignition off and zero speed must hold continuously this long before an
/// open trip is considered finished — a single momentary stop (a red
/// light, a toll booth) must not fragment one trip into several.
const TRIP_STOP_SUSTAIN_SECS: i64 = 60;

/// When ignition state isn't known at all, sustained movement above this
/// speed for this long is what opens a trip instead of a single instant of
/// GPS jitter at a red light.
const TRIP_START_SUSTAIN_SECS: i64 = 60;
const TRIP_START_SPEED_KMH: f64 = 5.0;

/// Odometer accumulation only bridges a gap this wide between consecutive
/// fixes — past it, the distance the device covered while silent is
/// unknowable, so the reading is taken as the new baseline instead of
/// integrated as travel.
const ODOMETER_GAP_WINDOW_SECS: f64 = 12.0 * 60.0 * 60.0;

/// Anchor captured the moment a device's ignition turns off, consulted by
/// the alert engine's towing check (movement while nominally parked).
#[derive(Debug, Clone, Copy)]
pub struct IgnitionOffAnchor {
    pub latitude: f64,
    pub longitude: f64,
    pub at: DateTime<Utc>,
}

pub struct Pipeline {
    db: Db,
    hub: Arc<Hub>,
    alert_engine: Arc<AlertEngine>,
    ignition_anchors: RwLock<HashMap<Uuid, IgnitionOffAnchor>>,
    /// Start of the current continuous ignition-off-and-stopped run on an
    /// open trip; cleared the moment the device moves or ignition comes
    /// back on. Consulted against [`TRIP_STOP_SUSTAIN_SECS`] to close a
    /// trip only once the stop has actually lasted, not on the first
    /// zero-speed sample.
    idle_since: RwLock<HashMap<Uuid, DateTime<Utc>>>,
    /// Start of the current continuous above-threshold-speed run while
    /// ignition state is unknown, for the same sustain check on the
    /// opening side (§4.3's "sustained movement" trip-open path).
    moving_since: RwLock<HashMap<Uuid, DateTime<Utc>>>,
}

impl Pipeline {
    pub fn new(db: Db, hub: Arc<Hub>, alert_engine: Arc<AlertEngine>) -> Arc<Self> {
        Arc::new(Self {
            db,
            hub,
            alert_engine,
            ignition_anchors: RwLock::new(HashMap::new()),
            idle_since: RwLock::new(HashMap::new()),
            moving_since: RwLock::new(HashMap::new()),
        })
    }

    pub async fn ignition_anchor(&self, device_id: Uuid) -> Option<IgnitionOffAnchor> {
        self.ignition_anchors.read().await.get(&device_id).copied()
    }

    /// Looked up by the gateway at login time, ahead of accepting the
    /// connection: an unknown identifier or a deactivated device must be
    /// rejected and the socket closed before a session is ever registered.
    pub async fn authorize_login(
        &self,
        identifier: &str,
        protocol: telemetry_types::ProtocolKind,
    ) -> Result<devices::Device, PipelineError> {
        match devices::find_by_identifier(&self.db, identifier, protocol.as_str()).await? {
            Some(d) if d.active => Ok(d),
            Some(_) => Err(PipelineError::Rejected(format!("device {identifier} is deactivated"))),
            None => Err(PipelineError::Rejected(format!("device {identifier} not registered"))),
        }
    }

    /// Resolves the device row for an inbound position (rejecting positions
    /// from identifiers that were never registered) and ingests it. The
    /// owning user for hub/alert fan-out comes from the device row itself,
    /// not from the caller — the gateway never knows a device's owner ahead
    /// of this lookup.
    pub async fn ingest(&self, position: NormalizedPosition) -> Result<(), PipelineError> {
        let device = match devices::find_by_identifier(&self.db, &position.device_identifier, position.protocol.as_str()).await? {
            Some(d) if d.active => d,
            Some(_) => {
                warn!("ingest: device {} is deactivated, rejecting position", position.device_identifier);
                return Err(PipelineError::Rejected(format!("device {} is deactivated", position.device_identifier)));
            }
            None => {
                warn!(
                    "ingest: unregistered device {} ({}), rejecting position",
                    position.device_identifier,
                    position.protocol
                );
                return Err(PipelineError::Rejected(format!(
                    "device {} not registered",
                    position.device_identifier
                )));
            }
        };

        self.check_clock_sanity(&position)?;

        if positions::exists_at(&self.db, device.id, position.timestamp).await? {
            return Ok(()); // duplicate fix, silently ignored
        }

        let previous = positions::latest_for_device(&self.db, device.id).await?;
        let odometer_m = self.accumulate_odometer(&previous, &position);

        let row = positions::insert(
            &self.db,
            positions::NewPosition {
                device_id: device.id,
                recorded_at: position.timestamp,
                latitude: position.latitude,
                longitude: position.longitude,
                speed_kmh: position.speed_kmh,
                course_deg: position.course_deg,
                altitude_m: position.altitude_m,
                satellites: position.satellites as i32,
                ignition: position.ignition,
                odometer_m,
                sensors: position.sensors.clone(),
            },
        )
        .await?;

        devices::touch_last_seen(&self.db, device.id, position.timestamp).await?;
        devices::set_last_position(&self.db, device.id, row.id).await?;

        self.track_ignition_anchor(device.id, &previous, &position).await;
        let trip_id = self.segment_trip(device.id, &previous, &row).await?;
        positions::set_trip_id(&self.db, row.id, trip_id).await?;

        self.alert_engine.evaluate(device.id, device.owner_id, &position, self).await;
        self.hub.publish(device.owner_id, HubMessage::PositionUpdate(position)).await;

        Ok(())
    }

    fn check_clock_sanity(&self, position: &NormalizedPosition) -> Result<(), PipelineError> {
        let now = Utc::now();
        if position.timestamp > now + Duration::days(1) {
            return Err(PipelineError::Rejected("timestamp more than 1 day in the future".into()));
        }
        if position.timestamp < now - Duration::days(30) {
            return Err(PipelineError::Rejected("timestamp more than 30 days in the past".into()));
        }
        Ok(())
    }

    fn accumulate_odometer(
        &self,
        previous: &Option<positions::PositionRow>,
        position: &NormalizedPosition,
    ) -> f64 {
        let Some(prev) = previous else { return 0.0 };
        let elapsed = (position.timestamp - prev.recorded_at).num_milliseconds() as f64 / 1000.0;
        if elapsed > ODOMETER_GAP_WINDOW_SECS {
            // Too long since the last fix to treat the gap as continuous travel —
            // skip straight to the new odometer reading rather than inventing a
            // distance across however long the device was silent.
            return prev.odometer_m;
        }
        let distance = geo::haversine_m(prev.latitude, prev.longitude, position.latitude, position.longitude);
        if geo::is_glitch(distance, elapsed.max(0.0)) {
            warn!("odometer: ignoring implausible jump of {distance:.0}m in {elapsed:.0}s");
            return prev.odometer_m;
        }
        prev.odometer_m + distance
    }

    async fn track_ignition_anchor(
        &self,
        device_id: Uuid,
        previous: &Option<positions::PositionRow>,
        position: &NormalizedPosition,
    ) {
        let was_on = previous.as_ref().and_then(|p| p.ignition).unwrap_or(false);
        let is_on = position.ignition.unwrap_or(was_on);
        let mut anchors = self.ignition_anchors.write().await;
        if was_on && !is_on {
            anchors.insert(
                device_id,
                IgnitionOffAnchor { latitude: position.latitude, longitude: position.longitude, at: position.timestamp },
            );
        } else if is_on {
            anchors.remove(&device_id);
        }
    }

    /// Returns the trip this position belongs to, if any, per §4.3's
    /// segmentation rules: open on ignition-on-with-speed, or on sustained
    /// movement when ignition is unknown; close on a sustained
    /// ignition-off-and-stopped run, or on a silence gap that makes
    /// bridging the intervening distance unknowable.
    async fn segment_trip(
        &self,
        device_id: Uuid,
        previous: &Option<positions::PositionRow>,
        current: &positions::PositionRow,
    ) -> Result<Option<Uuid>, PersistError> {
        let mut open = trips::open_trip(&self.db, device_id).await?;

        if let (Some(trip), Some(prev)) = (&open, previous) {
            let gap_secs = (current.recorded_at - prev.recorded_at).num_seconds();
            if gap_secs > TRIP_IDLE_GAP_SECS {
                trips::close(&self.db, trip.id, prev.recorded_at, prev.id).await?;
                open = None;
                self.idle_since.write().await.remove(&device_id);
            }
        }

        let ignition_off = current.ignition == Some(false);
        let ignition_on = current.ignition == Some(true);
        let stopped = current.speed_kmh <= 0.0;

        if let Some(trip) = open {
            if let Some(prev) = previous {
                let gap_secs = (current.recorded_at - prev.recorded_at).num_seconds();
                if gap_secs <= TRIP_IDLE_GAP_SECS {
                    let distance = geo::haversine_m(prev.latitude, prev.longitude, current.latitude, current.longitude);
                    if !geo::is_glitch(distance, (gap_secs.max(0)) as f64) {
                        trips::accumulate(&self.db, trip.id, distance, current.speed_kmh).await?;
                    }
                }
            }

            if ignition_off && stopped {
                let since = {
                    let mut idle = self.idle_since.write().await;
                    *idle.entry(device_id).or_insert(current.recorded_at)
                };
                let idle_for = (current.recorded_at - since).num_seconds();
                if idle_for >= TRIP_STOP_SUSTAIN_SECS {
                    trips::close(&self.db, trip.id, current.recorded_at, current.id).await?;
                    self.idle_since.write().await.remove(&device_id);
                    return Ok(None);
                }
            } else {
                self.idle_since.write().await.remove(&device_id);
            }
            return Ok(Some(trip.id));
        }

        // No trip open: decide whether this position is the one that opens one.
        if ignition_on && current.speed_kmh > 0.0 {
            self.moving_since.write().await.remove(&device_id);
            let trip = trips::start(&self.db, device_id, current.recorded_at, current.id).await?;
            return Ok(Some(trip.id));
        }

        if current.ignition.is_none() && current.speed_kmh > TRIP_START_SPEED_KMH {
            let since = {
                let mut moving = self.moving_since.write().await;
                *moving.entry(device_id).or_insert(current.recorded_at)
            };
            let moving_for = (current.recorded_at - since).num_seconds();
            if moving_for >= TRIP_START_SUSTAIN_SECS {
                self.moving_since.write().await.remove(&device_id);
                let trip = trips::start(&self.db, device_id, current.recorded_at, current.id).await?;
                return Ok(Some(trip.id));
            }
            return Ok(None);
        }

        self.moving_since.write().await.remove(&device_id);
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::geo;

    #[test]
    fn sanity_check_constants_are_reasonable() {
        assert!(geo::haversine_m(0.0, 0.0, 0.0, 0.0) == 0.0);
    }
}
