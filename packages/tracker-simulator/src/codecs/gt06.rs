//! GT06/Concox encoder. Frame shape and CRC grounded on
//! `telemetry_core::protocols::gt06`'s decoder and its own `build_frame`
//! helper, reproduced here so the two sides of the CRC agree.

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::crc::crc_itu;
use crate::route::Tick;

const START: [u8; 2] = [0x78, 0x78];
const STOP: [u8; 2] = [0x0d, 0x0a];
const PROTO_LOGIN: u8 = 0x01;
const PROTO_GPS: u8 = 0x12;

fn build_frame(protocol: u8, payload: &[u8], serial: u16) -> Vec<u8> {
    let length = 1 + payload.len() + 2;
    let mut crc_input = Vec::with_capacity(1 + length);
    crc_input.push(length as u8);
    crc_input.push(protocol);
    crc_input.extend_from_slice(payload);
    crc_input.extend_from_slice(&serial.to_be_bytes());
    let crc = crc_itu(&crc_input);

    let mut out = BytesMut::with_capacity(2 + crc_input.len() + 2 + 2);
    out.put_slice(&START);
    out.extend_from_slice(&crc_input);
    out.put_u16(crc);
    out.put_slice(&STOP);
    out.to_vec()
}

/// Packs an up-to-15-digit decimal IMEI into 8 BCD bytes, left-padded with
/// a zero nibble the way real GT06 devices do (and the gateway trims back
/// off on decode).
fn imei_to_bcd(imei: &str) -> [u8; 8] {
    let mut digits: Vec<u8> = imei.bytes().map(|b| b - b'0').collect();
    while digits.len() < 16 {
        digits.insert(0, 0);
    }
    let mut bcd = [0u8; 8];
    for i in 0..8 {
        bcd[i] = (digits[i * 2] << 4) | digits[i * 2 + 1];
    }
    bcd
}

pub fn encode_login(imei: &str, serial: u16) -> Vec<u8> {
    build_frame(PROTO_LOGIN, &imei_to_bcd(imei), serial)
}

pub fn encode_gps(tick: &Tick, timestamp: DateTime<Utc>, serial: u16) -> Vec<u8> {
    let mut payload = BytesMut::new();
    payload.put_u8((timestamp.year() - 2000) as u8);
    payload.put_u8(timestamp.month() as u8);
    payload.put_u8(timestamp.day() as u8);
    payload.put_u8(timestamp.hour() as u8);
    payload.put_u8(timestamp.minute() as u8);
    payload.put_u8(timestamp.second() as u8);
    payload.put_u8((tick.satellites as u8 & 0x0f) << 4);
    let lat_raw = (tick.latitude * 30000.0 * 60.0) as i32;
    let lon_raw = (tick.longitude * 30000.0 * 60.0) as i32;
    payload.put_i32(lat_raw);
    payload.put_i32(lon_raw);
    payload.put_u8(tick.speed_kmh as u8);
    let course_status = (tick.course_deg as u16) & 0x03ff;
    payload.put_u16(course_status);

    build_frame(PROTO_GPS, &payload, serial)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_bcd_round_trips_a_15_digit_imei() {
        let bcd = imei_to_bcd("123456789012345");
        let nibbles: String = bcd.iter().map(|b| format!("{:02x}", b)).collect();
        assert_eq!(nibbles.trim_start_matches('0'), "123456789012345");
    }

    #[test]
    fn gps_frame_passes_its_own_crc() {
        let tick = Tick {
            offset_s: 0,
            latitude: 45.5,
            longitude: 14.5,
            speed_kmh: 40.0,
            course_deg: 10.0,
            altitude_m: 0.0,
            satellites: 6,
            ignition: None,
            sensors: vec![],
        };
        let raw = encode_gps(&tick, Utc::now(), 7);
        assert_eq!(&raw[0..2], &START);
        assert_eq!(&raw[raw.len() - 2..], &STOP);
    }
}
