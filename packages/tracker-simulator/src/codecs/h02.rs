//! H02 ASCII encoder. Field order and coordinate encoding grounded on
//! `telemetry_core::protocols::h02`'s decoder, run in reverse. H02 devices
//! are fire-and-forget over UDP, so there is no ack to read back.

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::route::Tick;

/// `ddmm.mmmm` (NMEA-style degrees+minutes), the inverse of the decoder's
/// `parse_coord`.
fn encode_coord(value: f64) -> f64 {
    let value = value.abs();
    let degrees = value.floor();
    let minutes = (value - degrees) * 60.0;
    degrees * 100.0 + minutes
}

pub fn encode_position(id: &str, tick: &Tick, timestamp: DateTime<Utc>) -> Vec<u8> {
    let ns = if tick.latitude < 0.0 { "S" } else { "N" };
    let ew = if tick.longitude < 0.0 { "W" } else { "E" };
    let frame = format!(
        "*HQ,{id},V1,{:02}{:02}{:02},A,{:.4},{ns},{:.4},{ew},{:.1},{:.0},{:02}{:02}{:02},#",
        timestamp.hour(),
        timestamp.minute(),
        timestamp.second(),
        encode_coord(tick.latitude),
        encode_coord(tick.longitude),
        tick.speed_kmh,
        tick.course_deg,
        timestamp.day(),
        timestamp.month(),
        timestamp.year() % 100,
    );
    frame.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_starts_and_ends_with_markers() {
        let tick = Tick {
            offset_s: 0,
            latitude: 22.5786,
            longitude: 114.0836,
            speed_kmh: 42.5,
            course_deg: 180.0,
            altitude_m: 0.0,
            satellites: 0,
            ignition: None,
            sensors: vec![],
        };
        let raw = encode_position("3512345678", &tick, Utc::now());
        let text = String::from_utf8(raw).unwrap();
        assert!(text.starts_with("*HQ,3512345678,V1,"));
        assert!(text.ends_with("#"));
    }
}
