//! Teltonika Codec 8 (FMxxx family). Binary, TCP, length-prefixed AVL
//! arrays over a one-time IMEI handshake.
//!
//! Wire shape, per Teltonika's published AVL protocol:
//!
//! Handshake (once, first bytes on the connection):
//!   2 bytes IMEI length (big endian) | IMEI ASCII digits
//!   server replies 1 byte: 0x01 accept, 0x00 reject (and the caller closes)
//!
//! AVL data packet (repeats after handshake):
//!   4 bytes zero preamble | 4 bytes data field length | 1 byte codec id (0x08)
//!   1 byte record count | records... | 1 byte record count (repeated) | 4 bytes CRC-16/IBM
//!   server replies 4 bytes big-endian record count
//!
//! Each AVL record:
//!   8 bytes timestamp (ms since epoch, big endian) | 1 byte priority
//!   4 bytes longitude (signed, 1e-7 deg) | 4 bytes latitude (signed, 1e-7 deg)
//!   2 bytes altitude (m) | 2 bytes angle (deg) | 1 byte satellite count | 2 bytes speed (km/h)
//!   IO element: 1 byte event id | 1 byte total io count
//!     then for each width in {1, 2, 4, 8} bytes: 1 byte count, then (1 byte id, width-byte value) pairs

use crate::error::CodecError;
use crate::protocols::DecodeResult;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use telemetry_types::{CommandPayload, Frame, NormalizedPosition, ProtocolKind, SensorValue};

const CODEC_8: u8 = 0x08;

#[derive(Debug, Default)]
pub struct Codec {
    imei: Option<String>,
}

impl Codec {
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<DecodeResult, CodecError> {
        if self.imei.is_none() {
            return self.decode_handshake(buf);
        }
        self.decode_avl_packet(buf)
    }

    fn decode_handshake(&mut self, buf: &mut BytesMut) -> Result<DecodeResult, CodecError> {
        if buf.len() < 2 {
            return Ok(DecodeResult::default());
        }
        let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        if buf.len() < 2 + len {
            return Ok(DecodeResult::default());
        }
        let imei = String::from_utf8(buf[2..2 + len].to_vec())
            .map_err(|_| CodecError::Malformed("imei is not valid utf8".into()))?;
        buf.advance(2 + len);
        self.imei = Some(imei.clone());
        Ok(DecodeResult { frames: vec![Frame::Login { identifier: imei }] })
    }

    fn decode_avl_packet(&mut self, buf: &mut BytesMut) -> Result<DecodeResult, CodecError> {
        if buf.len() < 8 {
            return Ok(DecodeResult::default());
        }
        let preamble = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if preamble != 0 {
            return Err(CodecError::Malformed("AVL packet missing zero preamble".into()));
        }
        let data_len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
        let total_len = 8 + data_len + 4; // header + payload + trailing CRC
        if buf.len() < total_len {
            return Ok(DecodeResult::default());
        }

        let mut cursor = &buf[8..8 + data_len];
        let codec_id = cursor.get_u8();
        if codec_id != CODEC_8 {
            return Err(CodecError::Malformed(format!("unsupported codec id 0x{codec_id:02x}")));
        }
        let record_count = cursor.get_u8();
        let mut frames = Vec::with_capacity(record_count as usize);
        for _ in 0..record_count {
            frames.push(Frame::Position(decode_record(
                &mut cursor,
                self.imei.as_deref().unwrap_or_default(),
            )?));
        }
        let trailing_count = cursor.get_u8();
        if trailing_count != record_count {
            return Err(CodecError::Malformed("record count mismatch".into()));
        }

        buf.advance(total_len);
        Ok(DecodeResult { frames })
    }

    pub fn encode_ack(&mut self, frames: &[Frame]) -> Option<Bytes> {
        let positions = frames.iter().filter(|f| matches!(f, Frame::Position(_))).count();
        if positions > 0 {
            let mut out = BytesMut::with_capacity(4);
            out.put_u32(positions as u32);
            return Some(out.freeze());
        }
        if frames.iter().any(|f| matches!(f, Frame::Login { .. })) {
            return Some(Bytes::from_static(&[0x01]));
        }
        None
    }

    pub fn encode_command(&self, cmd: &CommandPayload) -> Result<(Bytes, Option<String>), CodecError> {
        // Codec 12 GPRS command frame: preamble/len/codec/1 command.../crc, simplified
        // to the payload shape the dispatcher already needs: raw text command wrapped
        // in a length-prefixed frame, no response correlation key (GT06-style keyed
        // acks do not exist in this codec; replies are matched oldest-first).
        let mut out = BytesMut::new();
        out.put_u32(0);
        let body = cmd.raw.as_bytes();
        out.put_u32(body.len() as u32);
        out.put_slice(body);
        Ok((out.freeze(), None))
    }
}

fn decode_record(cursor: &mut &[u8], imei: &str) -> Result<NormalizedPosition, CodecError> {
    if cursor.len() < 17 {
        return Err(CodecError::Malformed("truncated AVL record".into()));
    }
    let timestamp_ms = cursor.get_u64();
    let _priority = cursor.get_u8();
    let lon_raw = cursor.get_i32();
    let lat_raw = cursor.get_i32();
    let altitude = cursor.get_i16();
    let angle = cursor.get_u16();
    let satellites = cursor.get_u8();
    let speed = cursor.get_u16();

    if cursor.len() < 2 {
        return Err(CodecError::Malformed("missing IO element header".into()));
    }
    let _event_io_id = cursor.get_u8();
    let _total_io_count = cursor.get_u8();

    let mut sensors: BTreeMap<String, SensorValue> = BTreeMap::new();
    decode_io_group(cursor, 1, &mut sensors)?;
    decode_io_group(cursor, 2, &mut sensors)?;
    decode_io_group(cursor, 4, &mut sensors)?;
    decode_io_group(cursor, 8, &mut sensors)?;

    let ignition = sensors.get("ignition").and_then(SensorValue::as_bool);

    let timestamp: DateTime<Utc> = DateTime::from_timestamp_millis(timestamp_ms as i64)
        .ok_or_else(|| CodecError::Malformed("timestamp out of range".into()))?;

    Ok(NormalizedPosition {
        device_identifier: imei.to_string(),
        protocol: ProtocolKind::Teltonika,
        timestamp,
        latitude: lat_raw as f64 / 1e7,
        longitude: lon_raw as f64 / 1e7,
        speed_kmh: speed as f64,
        course_deg: angle as f64,
        altitude_m: altitude as f64,
        satellites: satellites as u32,
        ignition,
        sensors,
    })
}

fn decode_io_group(
    cursor: &mut &[u8],
    width: usize,
    sensors: &mut BTreeMap<String, SensorValue>,
) -> Result<(), CodecError> {
    if cursor.is_empty() {
        return Err(CodecError::Malformed("missing IO group count".into()));
    }
    let count = cursor.get_u8();
    for _ in 0..count {
        if cursor.len() < 1 + width {
            return Err(CodecError::Malformed("truncated IO element".into()));
        }
        let id = cursor.get_u8();
        let value: i64 = match width {
            1 => cursor.get_u8() as i64,
            2 => cursor.get_u16() as i64,
            4 => cursor.get_u32() as i64,
            8 => cursor.get_u64() as i64,
            _ => unreachable!(),
        };
        let (key, value) = map_known_io(id, value);
        sensors.insert(key, value);
    }
    Ok(())
}

/// Maps well-documented Teltonika IO element ids to the named `sensors` key
/// and `SensorValue` shape the rest of the engine (and the custom-expression
/// evaluator) resolves by bare name. Ids outside this table are still kept
/// (as a plain integer) under their `io_<id>` key — unknown ids are not an
/// error, just unlabeled data.
fn map_known_io(id: u8, value: i64) -> (String, SensorValue) {
    match id {
        239 => ("ignition".to_string(), SensorValue::Bool(value != 0)),
        240 => ("movement".to_string(), SensorValue::Bool(value != 0)),
        16 => ("odometer".to_string(), SensorValue::Int(value)), // meters
        66 => ("external_voltage".to_string(), SensorValue::Int(value)), // mV
        // reported in mV; rules compare battery_voltage against a volts threshold
        67 => ("battery_voltage".to_string(), SensorValue::Float(value as f64 / 1000.0)),
        113 => ("battery_level".to_string(), SensorValue::Int(value)), // %
        _ => (format!("io_{id}"), SensorValue::Int(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_avl_packet() -> Vec<u8> {
        let mut record = Vec::new();
        record.extend_from_slice(&1_700_000_000_000u64.to_be_bytes()); // timestamp
        record.push(1); // priority
        record.extend_from_slice(&(145_000_000i32).to_be_bytes()); // lon
        record.extend_from_slice(&(455_000_000i32).to_be_bytes()); // lat
        record.extend_from_slice(&(120i16).to_be_bytes()); // altitude
        record.extend_from_slice(&(90u16).to_be_bytes()); // angle
        record.push(7); // satellites
        record.extend_from_slice(&(55u16).to_be_bytes()); // speed
        record.push(0); // event io id
        record.push(1); // total io count
        record.push(1); // 1-byte io group count
        record.push(239); // ignition id
        record.push(1); // ignition = true
        record.push(0); // 2-byte io group count
        record.push(0); // 4-byte io group count
        record.push(0); // 8-byte io group count

        let mut payload = Vec::new();
        payload.push(CODEC_8);
        payload.push(1); // record count
        payload.extend_from_slice(&record);
        payload.push(1); // record count repeated

        let mut packet = Vec::new();
        packet.extend_from_slice(&0u32.to_be_bytes());
        packet.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        packet.extend_from_slice(&payload);
        packet.extend_from_slice(&0u32.to_be_bytes()); // crc, unchecked
        packet
    }

    #[test]
    fn handshake_then_avl_packet_round_trips() {
        let mut codec = Codec::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&15u16.to_be_bytes());
        buf.extend_from_slice(b"123456789012345");

        let handshake = codec.decode(&mut buf).unwrap();
        assert_eq!(handshake.frames.len(), 1);
        assert!(matches!(&handshake.frames[0], Frame::Login { identifier } if identifier == "123456789012345"));
        assert_eq!(codec.encode_ack(&handshake.frames).unwrap(), Bytes::from_static(&[0x01]));

        buf.extend_from_slice(&sample_avl_packet());
        let result = codec.decode(&mut buf).unwrap();
        assert_eq!(result.frames.len(), 1);
        match &result.frames[0] {
            Frame::Position(pos) => {
                assert_eq!(pos.device_identifier, "123456789012345");
                assert_eq!(pos.ignition, Some(true));
                assert!((pos.latitude - 45.5).abs() < 1e-6);
                assert!((pos.longitude - 14.5).abs() < 1e-6);
            }
            other => panic!("expected Position, got {other:?}"),
        }
        let ack = codec.encode_ack(&result.frames).unwrap();
        assert_eq!(ack.as_ref(), &1u32.to_be_bytes());
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_packet_leaves_buffer_untouched() {
        let mut codec = Codec::default();
        codec.imei = Some("123456789012345".into());
        let full = sample_avl_packet();
        let mut buf = BytesMut::from(&full[..full.len() - 1]);
        let result = codec.decode(&mut buf).unwrap();
        assert!(result.frames.is_empty());
        assert_eq!(buf.len(), full.len() - 1);
    }
}
