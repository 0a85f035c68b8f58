//! Pluggable alert rule engine. Each enabled rule is evaluated against
//! every inbound position (except `offline`, which is swept periodically
//! instead — there being no inbound position from a device that has gone
//! silent is the whole point). Debounce is "fire once per continuous
//! violation": a rule's episode stays open (tracked as an unresolved
//! `alerts` row) for as long as the condition holds, and is resolved the
//! moment it stops.

pub mod expr;
pub mod geofence;

use crate::db::{self, alert_rules::AlertRuleRow, Db};
use crate::hub::{Hub, HubMessage};
use crate::pipeline::Pipeline;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use telemetry_types::NormalizedPosition;
use tokio::sync::RwLock;
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct SpeedingParams {
    max_speed_kmh: f64,
    #[serde(default)]
    duration_s: i64,
}

#[derive(Debug, Deserialize)]
struct IdlingParams {
    #[serde(default = "default_idling_duration_s")]
    duration_s: i64,
}

fn default_idling_duration_s() -> i64 {
    300
}

const IDLING_SPEED_THRESHOLD_KMH: f64 = 3.0;

#[derive(Debug, Deserialize)]
struct GeofenceParams {
    geofence_id: Uuid,
    #[serde(default = "default_corridor_width_m")]
    corridor_width_m: f64,
}

fn default_corridor_width_m() -> f64 {
    50.0
}

#[derive(Debug, Deserialize)]
struct TowingParams {
    #[serde(default = "default_towing_threshold_m")]
    distance_threshold_m: f64,
}

fn default_towing_threshold_m() -> f64 {
    100.0
}

#[derive(Debug, Deserialize)]
struct LowBatteryParams {
    min_voltage_v: f64,
    #[serde(default)]
    duration_s: i64,
}

#[derive(Debug, Deserialize)]
struct HarshChangeParams {
    threshold_kmh_per_s: f64,
}

#[derive(Debug, Deserialize)]
struct MaintenanceParams {
    /// Odometer reading (km) at which the next service is due. Bumped by
    /// the rule's configured `interval_km` once the resulting alert is
    /// acknowledged — that rewrite happens in the config surface that owns
    /// rule CRUD, not here; the engine only ever compares against it.
    next_service_km: f64,
}

#[derive(Debug, Deserialize)]
struct CustomParams {
    expression: String,
    #[serde(default)]
    duration_s: i64,
}

#[derive(Debug, Deserialize)]
struct OfflineParams {
    max_silence_secs: i64,
}

/// Severity isn't a field a rule carries — §4.4 specifies it as "kind-
/// specific default" computed at firing time, not user-configurable per
/// rule like `params` or `schedule` are.
fn default_severity(kind: &str) -> &'static str {
    match kind {
        "towing" | "harsh_braking" | "harsh_acceleration" => "critical",
        "maintenance" | "custom" => "info",
        _ => "warning",
    }
}

pub struct AlertEngine {
    db: Db,
    hub: Arc<Hub>,
    http: reqwest::Client,
    /// Endpoint of the external notification dispatcher. The core treats it
    /// as opaque: every channel's `target` URL is forwarded verbatim along
    /// with the rendered subject/body/severity, and the dispatcher (not this
    /// engine) is responsible for routing by URL scheme and for its own
    /// retries.
    dispatch_url: String,
    /// Debounce clocks for kinds whose condition must hold continuously for
    /// `duration_s` before firing (speeding, low battery), keyed by
    /// (device, rule) since a device can carry more than one such rule.
    condition_since: RwLock<HashMap<(Uuid, Uuid), DateTime<Utc>>>,
    /// Last-observed containment for every (device, geofence rule) pair —
    /// the in-memory edge detector a `geofence_enter`/`geofence_exit` rule
    /// fires on. Restarting the process drops this map, which is exactly
    /// the "prime on first evaluation" behavior the engine requires: the
    /// first position after a restart records membership without firing.
    geofence_state: RwLock<HashMap<(Uuid, Uuid), bool>>,
}

impl AlertEngine {
    pub fn new(db: Db, hub: Arc<Hub>, dispatch_url: String) -> Arc<Self> {
        Arc::new(Self {
            db,
            hub,
            http: reqwest::Client::new(),
            dispatch_url,
            condition_since: RwLock::new(HashMap::new()),
            geofence_state: RwLock::new(HashMap::new()),
        })
    }

    pub async fn evaluate(&self, device_id: Uuid, owner_id: Uuid, position: &NormalizedPosition, pipeline: &Pipeline) {
        let rules = match db::alert_rules::list_enabled_for_device(&self.db, device_id).await {
            Ok(r) => r,
            Err(e) => {
                error!("alert engine: failed to load rules for device {device_id}: {e}");
                return;
            }
        };

        for rule in rules {
            if !self.schedule_allows(&rule, position.timestamp) {
                continue;
            }
            // Geofence rules fire on the membership transition itself, not on a
            // sustained-condition episode — they get their own edge detector
            // (with its own "prime the first reading, don't fire" rule) rather
            // than going through the debounced open/resolve path below.
            if matches!(rule.kind.as_str(), "geofence_enter" | "geofence_exit") {
                self.evaluate_geofence(&rule, device_id, owner_id, position).await;
                continue;
            }
            let violated = self.check(&rule, position, device_id, pipeline).await;
            self.apply_episode(&rule, device_id, owner_id, position, violated).await;
        }
    }

    fn schedule_allows(&self, rule: &AlertRuleRow, at: DateTime<Utc>) -> bool {
        #[derive(Deserialize)]
        struct Schedule {
            weekdays: Vec<u8>,
            start_hour: u8,
            end_hour: u8,
        }
        let Some(raw) = &rule.schedule else { return true };
        let Ok(schedule) = serde_json::from_value::<Schedule>(raw.clone()) else { return true };
        let weekday = at.weekday().num_days_from_sunday() as u8;
        if !schedule.weekdays.is_empty() && !schedule.weekdays.contains(&weekday) {
            return false;
        }
        let hour = at.hour() as u8;
        if schedule.start_hour <= schedule.end_hour {
            hour >= schedule.start_hour && hour <= schedule.end_hour
        } else {
            // wraps past midnight, e.g. 22 .. 6
            hour >= schedule.start_hour || hour <= schedule.end_hour
        }
    }

    async fn check(&self, rule: &AlertRuleRow, position: &NormalizedPosition, device_id: Uuid, pipeline: &Pipeline) -> bool {
        match rule.kind.as_str() {
            "speeding" => {
                let Some(params) = self.parse_params::<SpeedingParams>(rule) else { return false };
                let raw = position.speed_kmh > params.max_speed_kmh;
                self.debounced(device_id, rule.id, raw, position.timestamp, params.duration_s).await
            }
            "idling" => {
                let Some(params) = self.parse_params::<IdlingParams>(rule) else { return false };
                let raw = position.ignition == Some(true) && position.speed_kmh < IDLING_SPEED_THRESHOLD_KMH;
                self.debounced(device_id, rule.id, raw, position.timestamp, params.duration_s).await
            }
            "towing" => self.check_towing(rule, position, device_id, pipeline).await,
            "low_battery" => {
                let Some(params) = self.parse_params::<LowBatteryParams>(rule) else { return false };
                let raw = position
                    .sensors
                    .get("battery_voltage")
                    .and_then(|v| v.as_f64())
                    .map(|v| v < params.min_voltage_v)
                    .unwrap_or(false);
                self.debounced(device_id, rule.id, raw, position.timestamp, params.duration_s).await
            }
            "harsh_braking" | "harsh_acceleration" => self.check_harsh_change(rule, position, device_id).await,
            "maintenance" => self.check_maintenance(rule, device_id).await,
            "custom" => self.check_custom(rule, position, device_id).await,
            "offline" => false, // handled exclusively by the periodic sweep
            other => {
                warn!("alert engine: unknown rule kind '{other}'");
                false
            }
        }
    }

    fn parse_params<T: for<'de> Deserialize<'de>>(&self, rule: &AlertRuleRow) -> Option<T> {
        serde_json::from_value(rule.params.clone()).ok()
    }

    /// Shared continuous-hold debounce: a condition must evaluate true for
    /// `duration_secs` straight before it counts as violated. The clock
    /// resets the instant the raw condition clears, so a new fire requires
    /// a fresh, uninterrupted run — the "fire once per episode" rule this
    /// guards happens one level up in [`Self::apply_episode`].
    async fn debounced(&self, device_id: Uuid, rule_id: Uuid, raw: bool, at: DateTime<Utc>, duration_secs: i64) -> bool {
        let key = (device_id, rule_id);
        if !raw {
            self.condition_since.write().await.remove(&key);
            return false;
        }
        let since = {
            let mut map = self.condition_since.write().await;
            *map.entry(key).or_insert(at)
        };
        (at - since).num_seconds() >= duration_secs
    }

    /// Edge-triggered membership check for `geofence_enter`/`geofence_exit`.
    /// The first evaluation for a given (device, rule) only records which
    /// side of the fence the device is currently on — per the engine's
    /// "prime on first reading" rule, it cannot fire before it has seen at
    /// least one prior reading to compare against.
    async fn evaluate_geofence(&self, rule: &AlertRuleRow, device_id: Uuid, owner_id: Uuid, position: &NormalizedPosition) {
        let Some(params) = self.parse_params::<GeofenceParams>(rule) else { return };
        let Ok(Some(fence)) = db::geofences::get(&self.db, params.geofence_id).await else { return };
        let inside = match fence.shape {
            db::geofences::GeofenceShape::Polygon => {
                geofence::point_in_polygon(position.latitude, position.longitude, &fence.polygon)
            }
            db::geofences::GeofenceShape::Polyline => {
                geofence::distance_to_polyline_m(position.latitude, position.longitude, &fence.polygon)
                    <= params.corridor_width_m
            }
        };

        let key = (device_id, rule.id);
        let previous = {
            let mut state = self.geofence_state.write().await;
            state.insert(key, inside)
        };
        let Some(previous) = previous else { return }; // prime: state recorded, no fire

        let transitioned = match rule.kind.as_str() {
            "geofence_enter" => !previous && inside,
            "geofence_exit" => previous && !inside,
            _ => false,
        };
        if transitioned {
            self.fire(rule, device_id, owner_id, position).await;
        }
    }

    async fn check_towing(&self, rule: &AlertRuleRow, position: &NormalizedPosition, device_id: Uuid, pipeline: &Pipeline) -> bool {
        let Some(params) = self.parse_params::<TowingParams>(rule) else { return false };
        if position.ignition != Some(false) {
            return false;
        }
        let Some(anchor) = pipeline.ignition_anchor(device_id).await else { return false };
        let distance = crate::pipeline::geo::haversine_m(anchor.latitude, anchor.longitude, position.latitude, position.longitude);
        distance > params.distance_threshold_m
    }

    async fn check_harsh_change(&self, rule: &AlertRuleRow, position: &NormalizedPosition, device_id: Uuid) -> bool {
        let Some(params) = self.parse_params::<HarshChangeParams>(rule) else { return false };
        let Ok(Some(prev)) = db::positions::before(&self.db, device_id, position.timestamp).await else { return false };
        let elapsed_secs = (position.timestamp - prev.recorded_at).num_milliseconds() as f64 / 1000.0;
        if elapsed_secs <= 0.0 || elapsed_secs >= 30.0 {
            return false; // needs two valid positions less than 30s apart
        }
        let delta_kmh_per_s = (position.speed_kmh - prev.speed_kmh) / elapsed_secs;
        match rule.kind.as_str() {
            "harsh_braking" => delta_kmh_per_s < -params.threshold_kmh_per_s,
            "harsh_acceleration" => delta_kmh_per_s > params.threshold_kmh_per_s,
            _ => false,
        }
    }

    async fn check_maintenance(&self, rule: &AlertRuleRow, device_id: Uuid) -> bool {
        let Some(params) = self.parse_params::<MaintenanceParams>(rule) else { return false };
        let Ok(Some(latest)) = db::positions::latest_for_device(&self.db, device_id).await else { return false };
        (latest.odometer_m / 1000.0) >= params.next_service_km
    }

    async fn check_custom(&self, rule: &AlertRuleRow, position: &NormalizedPosition, device_id: Uuid) -> bool {
        let Some(params) = self.parse_params::<CustomParams>(rule) else { return false };
        let raw = match expr::parse(&params.expression) {
            Ok(parsed) => expr::evaluate(&parsed, position),
            Err(e) => {
                warn!("alert engine: rule {} has an invalid custom expression: {e}", rule.id);
                false
            }
        };
        if params.duration_s > 0 {
            self.debounced(device_id, rule.id, raw, position.timestamp, params.duration_s).await
        } else {
            raw
        }
    }

    async fn apply_episode(&self, rule: &AlertRuleRow, device_id: Uuid, owner_id: Uuid, position: &NormalizedPosition, violated: bool) {
        let open = db::alerts::open_for_rule(&self.db, rule.id, device_id).await.ok().flatten();
        match (open, violated) {
            (None, true) => self.fire(rule, device_id, owner_id, position).await,
            (Some(open_alert), false) => {
                if let Err(e) = db::alerts::resolve(&self.db, open_alert.id, position.timestamp).await {
                    error!("alert engine: failed to resolve alert {}: {e}", open_alert.id);
                }
            }
            _ => {} // still violating (already open) or still fine (nothing open)
        }
    }

    /// Persists a new alert, pushes it to the broadcast hub, and hands it to
    /// the notification seam. Shared by the debounced open/resolve episode
    /// path and the geofence edge detector, which fires an instant without
    /// ever opening a corresponding "episode".
    async fn fire(&self, rule: &AlertRuleRow, device_id: Uuid, owner_id: Uuid, position: &NormalizedPosition) {
        let severity = default_severity(&rule.kind);
        let message = format!("{} rule triggered for device", rule.kind);
        let alert = match db::alerts::insert(
            &self.db,
            db::alerts::NewAlert {
                rule_id: rule.id,
                device_id,
                triggered_at: position.timestamp,
                severity: severity.to_string(),
                message: message.clone(),
                context: serde_json::json!({ "latitude": position.latitude, "longitude": position.longitude }),
            },
        )
        .await
        {
            Ok(a) => a,
            Err(e) => {
                error!("alert engine: failed to persist alert for rule {}: {e}", rule.id);
                return;
            }
        };
        self.hub
            .publish(owner_id, HubMessage::Alert { device_id, rule_kind: rule.kind.clone(), severity: severity.to_string(), message })
            .await;
        self.dispatch_notification(rule, severity, &alert.message).await;
    }

    /// Run periodically (there is no inbound position to react to for a
    /// device that has gone silent). Walks every enabled `offline` rule and
    /// opens or resolves its episode based on how long ago each relevant
    /// device was last heard from.
    pub async fn sweep_offline(&self) {
        let rules = match db::alert_rules::list_enabled(&self.db).await {
            Ok(r) => r,
            Err(e) => {
                error!("alert engine: offline sweep failed to load rules: {e}");
                return;
            }
        };
        let now = Utc::now();
        for rule in rules.iter().filter(|r| r.kind == "offline") {
            let Some(params) = self.parse_params::<OfflineParams>(rule) else { continue };
            let all_owned = match db::devices::list_for_owner(&self.db, rule.owner_id).await {
                Ok(all) => all,
                Err(e) => {
                    error!("alert engine: offline sweep failed to load devices for owner {}: {e}", rule.owner_id);
                    continue;
                }
            };
            let devices: Vec<_> = match rule.device_id {
                Some(id) => all_owned.into_iter().filter(|d| d.id == id).collect(),
                None => all_owned,
            };
            for device in devices {
                let silent_for = device.last_seen_at.map(|seen| (now - seen).num_seconds());
                let violated = match silent_for {
                    Some(secs) => secs >= params.max_silence_secs,
                    None => false, // never seen at all isn't "gone offline"
                };
                let synthetic = NormalizedPosition {
                    device_identifier: device.identifier.clone(),
                    protocol: telemetry_types::ProtocolKind::Teltonika,
                    timestamp: now,
                    latitude: 0.0,
                    longitude: 0.0,
                    speed_kmh: 0.0,
                    course_deg: 0.0,
                    altitude_m: 0.0,
                    satellites: 0,
                    ignition: None,
                    sensors: Default::default(),
                };
                self.apply_episode(rule, device.id, rule.owner_id, &synthetic, violated).await;
            }
        }
    }

    /// Forwards a firing to every channel in the rule's channel list. The
    /// dispatcher interface is `dispatch(channel_url, subject, body,
    /// severity)`: this engine never interprets `target`'s URL scheme
    /// (`telegram://`, `mailto:`, `https://`, ...) itself, it just relays to
    /// the external dispatcher and logs failures without retrying — retry
    /// policy for notification delivery belongs to that external seam.
    async fn dispatch_notification(&self, rule: &AlertRuleRow, severity: &str, message: &str) {
        let channel_ids = match db::alert_rules::channel_ids(&self.db, rule.id).await {
            Ok(ids) => ids,
            Err(e) => {
                error!("alert engine: failed to load channel list for rule {}: {e}", rule.id);
                return;
            }
        };
        for channel_id in channel_ids {
            let channel = match db::notification_channels::get(&self.db, channel_id).await {
                Ok(Some(c)) => c,
                Ok(None) => continue,
                Err(e) => {
                    error!("alert engine: failed to load notification channel {channel_id}: {e}");
                    continue;
                }
            };
            let body = serde_json::json!({
                "channel_url": channel.dispatch_url,
                "subject": format!("{} alert", rule.kind),
                "body": message,
                "severity": severity,
            });
            if let Err(e) = self.http.post(&self.dispatch_url).json(&body).send().await {
                warn!("alert engine: dispatch to channel {channel_id} failed: {e}");
            }
        }
    }
}
