//! Synthetic position generator.
//!
//! Given a scenario, walks a simulated device along a course at a
//! scenario-appropriate speed, producing one [`Tick`] per simulated
//! second. Scenarios are an injectable, named condition a caller can drop
//! a device into rather than hand-tuning speed/ignition by hand.

use std::f64::consts::PI;

use rand::Rng;
use telemetry_types::SensorValue;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioKind {
    /// Steady legal-speed driving along a straight course.
    SteadyDrive,
    /// Ignition on, parked, under the idling alert's speed threshold.
    Idling,
    /// Sustained speed past a typical speed-limit rule.
    Speeding,
    /// A sharp deceleration mid-drive (harsh-braking alert bait).
    HarshBraking,
    /// Ignition off and stationary, then displaced without it turning back
    /// on (towing alert bait).
    Towing,
    /// Drives a straight line that crosses a point partway through, for
    /// exercising geofence enter/exit transitions.
    GeofenceCrossing,
}

impl ScenarioKind {
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "steady" => ScenarioKind::SteadyDrive,
            "idling" => ScenarioKind::Idling,
            "speeding" => ScenarioKind::Speeding,
            "harsh-braking" => ScenarioKind::HarshBraking,
            "towing" => ScenarioKind::Towing,
            "geofence-crossing" => ScenarioKind::GeofenceCrossing,
            _ => return None,
        })
    }

    pub const ALL: [&'static str; 6] =
        ["steady", "idling", "speeding", "harsh-braking", "towing", "geofence-crossing"];
}

/// One simulated sample, independent of protocol and absolute timestamp —
/// `main` stamps each tick with `device_identifier`/`protocol`/wall-clock
/// time right before handing it to a codec encoder.
#[derive(Debug, Clone)]
pub struct Tick {
    pub offset_s: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: f64,
    pub course_deg: f64,
    pub altitude_m: f64,
    pub satellites: u32,
    pub ignition: Option<bool>,
    pub sensors: Vec<(&'static str, SensorValue)>,
}

pub struct RouteConfig {
    pub scenario: ScenarioKind,
    pub start_lat: f64,
    pub start_lon: f64,
    pub heading_deg: f64,
    pub ticks: usize,
}

/// Walks the scenario forward one second at a time and returns the full
/// tick list up front — the caller paces delivery against wall-clock time,
/// the generator itself is not async.
pub fn generate(cfg: &RouteConfig) -> Vec<Tick> {
    let mut rng = rand::thread_rng();
    let mut lat = cfg.start_lat;
    let mut lon = cfg.start_lon;
    let mut ticks = Vec::with_capacity(cfg.ticks);

    for offset_s in 0..cfg.ticks as i64 {
        let (speed_kmh, ignition, sensors) = match cfg.scenario {
            ScenarioKind::SteadyDrive => (50.0 + rng.gen_range(-2.0..2.0), Some(true), vec![]),
            ScenarioKind::Idling => (0.0, Some(true), vec![]),
            ScenarioKind::Speeding => (110.0 + rng.gen_range(-3.0..3.0), Some(true), vec![]),
            ScenarioKind::HarshBraking => {
                // cruises, then sheds most of its speed in a couple of ticks
                if offset_s < cfg.ticks as i64 / 2 {
                    (70.0, Some(true), vec![])
                } else if offset_s < cfg.ticks as i64 / 2 + 2 {
                    (15.0, Some(true), vec![])
                } else {
                    (0.0, Some(true), vec![])
                }
            }
            ScenarioKind::Towing => (
                if offset_s < cfg.ticks as i64 / 2 { 0.0 } else { 25.0 },
                Some(false),
                vec![],
            ),
            ScenarioKind::GeofenceCrossing => (40.0, Some(true), vec![]),
        };

        if speed_kmh > 0.0 {
            let meters = speed_kmh * 1000.0 / 3600.0;
            let heading_rad = cfg.heading_deg.to_radians();
            let d_lat = meters * heading_rad.cos() / EARTH_RADIUS_M;
            let d_lon =
                meters * heading_rad.sin() / (EARTH_RADIUS_M * lat.to_radians().cos().max(1e-6));
            lat += d_lat * 180.0 / PI;
            lon += d_lon * 180.0 / PI;
        }

        ticks.push(Tick {
            offset_s,
            latitude: lat,
            longitude: lon,
            speed_kmh,
            course_deg: cfg.heading_deg,
            altitude_m: 100.0,
            satellites: 9,
            ignition,
            sensors,
        });
    }

    ticks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_drive_advances_position_every_tick() {
        let cfg = RouteConfig {
            scenario: ScenarioKind::SteadyDrive,
            start_lat: 45.5,
            start_lon: 14.5,
            heading_deg: 0.0,
            ticks: 10,
        };
        let ticks = generate(&cfg);
        assert_eq!(ticks.len(), 10);
        assert!(ticks.last().unwrap().latitude > ticks.first().unwrap().latitude);
    }

    #[test]
    fn idling_never_moves() {
        let cfg = RouteConfig {
            scenario: ScenarioKind::Idling,
            start_lat: 45.5,
            start_lon: 14.5,
            heading_deg: 90.0,
            ticks: 20,
        };
        let ticks = generate(&cfg);
        for t in &ticks {
            assert!((t.latitude - 45.5).abs() < 1e-12);
            assert!((t.longitude - 14.5).abs() < 1e-12);
            assert_eq!(t.speed_kmh, 0.0);
        }
    }

    #[test]
    fn towing_displaces_without_ignition() {
        let cfg = RouteConfig {
            scenario: ScenarioKind::Towing,
            start_lat: 45.5,
            start_lon: 14.5,
            heading_deg: 45.0,
            ticks: 10,
        };
        let ticks = generate(&cfg);
        assert_eq!(ticks.last().unwrap().ignition, Some(false));
        assert!(ticks.last().unwrap().latitude != ticks.first().unwrap().latitude);
    }

    #[test]
    fn scenario_names_round_trip() {
        for name in ScenarioKind::ALL {
            assert!(ScenarioKind::from_str(name).is_some());
        }
        assert!(ScenarioKind::from_str("not-a-scenario").is_none());
    }
}
