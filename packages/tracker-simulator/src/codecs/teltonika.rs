//! Teltonika Codec 8 encoder. Wire shapes grounded on
//! `telemetry_core::protocols::teltonika`'s decoder, run in reverse.

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Utc};

use crate::route::Tick;

const CODEC_8: u8 = 0x08;

/// Handshake frame: 2-byte big-endian IMEI length, then the IMEI digits.
pub fn encode_handshake(imei: &str) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(2 + imei.len());
    out.put_u16(imei.len() as u16);
    out.put_slice(imei.as_bytes());
    out.to_vec()
}

/// One AVL data packet carrying a single position record.
pub fn encode_avl_packet(tick: &Tick, timestamp: DateTime<Utc>) -> Vec<u8> {
    let mut record = BytesMut::new();
    record.put_u64(timestamp.timestamp_millis() as u64);
    record.put_u8(1); // priority
    record.put_i32((tick.longitude * 1e7) as i32);
    record.put_i32((tick.latitude * 1e7) as i32);
    record.put_i16(tick.altitude_m as i16);
    record.put_u16(tick.course_deg as u16);
    record.put_u8(tick.satellites as u8);
    record.put_u16(tick.speed_kmh as u16);

    record.put_u8(0); // event io id
    record.put_u8(1); // total io count (ignition only)
    record.put_u8(1); // 1-byte io group count
    record.put_u8(239); // ignition element id
    record.put_u8(tick.ignition.unwrap_or(false) as u8);
    record.put_u8(0); // 2-byte io group count
    record.put_u8(0); // 4-byte io group count
    record.put_u8(0); // 8-byte io group count

    let mut payload = BytesMut::new();
    payload.put_u8(CODEC_8);
    payload.put_u8(1); // record count
    payload.extend_from_slice(&record);
    payload.put_u8(1); // record count repeated

    let mut packet = BytesMut::new();
    packet.put_u32(0); // zero preamble
    packet.put_u32(payload.len() as u32);
    packet.extend_from_slice(&payload);
    packet.put_u32(0); // CRC, left unchecked by the gateway's decoder

    packet.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_carries_length_prefixed_imei() {
        let raw = encode_handshake("123456789012345");
        assert_eq!(u16::from_be_bytes([raw[0], raw[1]]), 15);
        assert_eq!(&raw[2..], b"123456789012345");
    }

    #[test]
    fn avl_packet_has_expected_header_shape() {
        let tick = Tick {
            offset_s: 0,
            latitude: 45.5,
            longitude: 14.5,
            speed_kmh: 60.0,
            course_deg: 90.0,
            altitude_m: 120.0,
            satellites: 8,
            ignition: Some(true),
            sensors: vec![],
        };
        let raw = encode_avl_packet(&tick, Utc::now());
        assert_eq!(&raw[0..4], &[0, 0, 0, 0]);
        let data_len = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]) as usize;
        assert_eq!(raw.len(), 8 + data_len + 4);
        assert_eq!(raw[8], CODEC_8);
    }
}
