//! Totem AVL1 ASCII protocol. TCP, `$$`-prefixed, length-prefixed,
//! comma-separated body, trailing checksum byte before `\r\n`.
//!
//! `$$<2-digit hex length><imei>,<cmd>,<ddmmyy>,<hhmmss>,<A|V>,<lat>,<N|S>,
//! <lon>,<E|W>,<speed>,<course>*<2-digit hex checksum>\r\n`
//! Checksum is the XOR of every byte between `$$` and `*`.

use crate::error::CodecError;
use crate::protocols::DecodeResult;
use bytes::{Buf, Bytes, BytesMut};
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use telemetry_types::{CommandPayload, Frame, NormalizedPosition, ProtocolKind};

#[derive(Debug, Default)]
pub struct Codec;

impl Codec {
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<DecodeResult, CodecError> {
        let Some(end) = find(buf, b"\r\n") else {
            return Ok(DecodeResult::default());
        };
        let frame_bytes = buf[..end].to_vec();
        buf.advance(end + 2);

        if !frame_bytes.starts_with(b"$$") {
            return Err(CodecError::Malformed("Totem frame missing $$ prefix".into()));
        }
        let Some(star) = frame_bytes.iter().position(|&b| b == b'*') else {
            return Err(CodecError::Malformed("Totem frame missing checksum delimiter".into()));
        };
        let body = &frame_bytes[2..star];
        let checksum_hex = std::str::from_utf8(&frame_bytes[star + 1..])
            .map_err(|_| CodecError::Malformed("bad checksum encoding".into()))?;
        let expected = u8::from_str_radix(checksum_hex.trim(), 16)
            .map_err(|_| CodecError::Malformed("bad checksum hex".into()))?;
        let computed = body.iter().fold(0u8, |acc, &b| acc ^ b);
        if computed != expected {
            return Err(CodecError::Malformed(format!(
                "Totem checksum mismatch: got {expected:02x}, want {computed:02x}"
            )));
        }

        // body[0..2] is the ASCII hex length prefix; the remaining bytes are
        // the comma-separated report, matching the wire shape above.
        if body.len() < 3 {
            return Err(CodecError::Malformed("Totem body too short".into()));
        }
        let text = std::str::from_utf8(&body[2..])
            .map_err(|_| CodecError::Malformed("Totem body is not valid utf8".into()))?;
        let fields: Vec<&str> = text.split(',').collect();
        if fields.len() < 10 {
            return Err(CodecError::Malformed("Totem report too short".into()));
        }

        let imei = fields[0].to_string();
        if fields[4] != "A" {
            return Ok(DecodeResult { frames: vec![Frame::Heartbeat] });
        }
        let date = parse_ddmmyy(fields[2])?;
        let time = parse_hhmmss(fields[3])?;
        let lat = parse_coord(fields[5], fields[6] == "S")?;
        let lon = parse_coord(fields[7], fields[8] == "W")?;
        let speed: f64 = fields[9].parse().unwrap_or(0.0);
        let course: f64 = fields.get(10).and_then(|s| s.parse().ok()).unwrap_or(0.0);

        Ok(DecodeResult {
            frames: vec![Frame::Position(NormalizedPosition {
                device_identifier: imei,
                protocol: ProtocolKind::Totem,
                timestamp: Utc.from_utc_datetime(&date.and_time(time)),
                latitude: lat,
                longitude: lon,
                speed_kmh: speed,
                course_deg: course,
                altitude_m: 0.0,
                satellites: 0,
                ignition: None,
                sensors: Default::default(),
            })],
        })
    }

    pub fn encode_ack(&mut self, _frames: &[Frame]) -> Option<Bytes> {
        None
    }

    pub fn encode_command(&self, _cmd: &CommandPayload) -> Result<(Bytes, Option<String>), CodecError> {
        Err(CodecError::UnsupportedCommand)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_hhmmss(s: &str) -> Result<NaiveTime, CodecError> {
    if s.len() < 6 {
        return Err(CodecError::Malformed("bad hhmmss".into()));
    }
    let h: u32 = s[0..2].parse().map_err(|_| CodecError::Malformed("bad hhmmss".into()))?;
    let m: u32 = s[2..4].parse().map_err(|_| CodecError::Malformed("bad hhmmss".into()))?;
    let sec: u32 = s[4..6].parse().map_err(|_| CodecError::Malformed("bad hhmmss".into()))?;
    NaiveTime::from_hms_opt(h, m, sec).ok_or_else(|| CodecError::Malformed("bad hhmmss".into()))
}

fn parse_ddmmyy(s: &str) -> Result<NaiveDate, CodecError> {
    if s.len() < 6 {
        return Err(CodecError::Malformed("bad ddmmyy".into()));
    }
    let d: u32 = s[0..2].parse().map_err(|_| CodecError::Malformed("bad ddmmyy".into()))?;
    let m: u32 = s[2..4].parse().map_err(|_| CodecError::Malformed("bad ddmmyy".into()))?;
    let y: i32 = 2000 + s[4..6].parse::<i32>().map_err(|_| CodecError::Malformed("bad ddmmyy".into()))?;
    NaiveDate::from_ymd_opt(y, m, d).ok_or_else(|| CodecError::Malformed("bad ddmmyy".into()))
}

fn parse_coord(s: &str, negative: bool) -> Result<f64, CodecError> {
    let raw: f64 = s.parse().map_err(|_| CodecError::Malformed("bad coordinate".into()))?;
    let degrees = (raw / 100.0).floor();
    let minutes = raw - degrees * 100.0;
    let value = degrees + minutes / 60.0;
    Ok(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(body: &str) -> Vec<u8> {
        let checksum = body.as_bytes().iter().fold(0u8, |acc, &b| acc ^ b);
        format!("$${body}*{checksum:02X}\r\n").into_bytes()
    }

    #[test]
    fn decodes_checksum_valid_frame() {
        let mut codec = Codec::default();
        let body = "07135790246811220,AA,150124,120830,A,2234.7514,N,11405.0978,E,33.0,90";
        let raw = build(body);
        let mut buf = BytesMut::from(&raw[..]);
        let result = codec.decode(&mut buf).unwrap();
        assert!(matches!(&result.frames[0], Frame::Position(_)));
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_bad_checksum() {
        let mut codec = Codec::default();
        let body = "07135790246811220,AA,150124,120830,A,2234.7514,N,11405.0978,E,33.0,90";
        let mut raw = build(body);
        let star = raw.iter().position(|&b| b == b'*').unwrap();
        raw[star + 1] = b'F';
        raw[star + 2] = b'F';
        let mut buf = BytesMut::from(&raw[..]);
        assert!(codec.decode(&mut buf).is_err());
    }
}
