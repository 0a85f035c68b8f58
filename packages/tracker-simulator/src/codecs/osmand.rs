//! OsmAnd encoder: the same newline-delimited query string shape
//! `telemetry_core::protocols::osmand` decodes.

use chrono::{DateTime, Utc};

use crate::route::Tick;

pub fn encode_position(id: &str, tick: &Tick, timestamp: DateTime<Utc>) -> Vec<u8> {
    let frame = format!(
        "id={id}&timestamp={}&lat={:.6}&lon={:.6}&speed={:.1}&bearing={:.0}&altitude={:.0}\n",
        timestamp.timestamp(),
        tick.latitude,
        tick.longitude,
        tick.speed_kmh,
        tick.course_deg,
        tick.altitude_m,
    );
    frame.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_is_newline_terminated_query_string() {
        let tick = Tick {
            offset_s: 0,
            latitude: 45.5,
            longitude: 14.5,
            speed_kmh: 10.0,
            course_deg: 90.0,
            altitude_m: 50.0,
            satellites: 0,
            ignition: None,
            sensors: vec![],
        };
        let raw = encode_position("device-1", &tick, Utc::now());
        let text = String::from_utf8(raw).unwrap();
        assert!(text.starts_with("id=device-1&"));
        assert!(text.ends_with('\n'));
    }
}
