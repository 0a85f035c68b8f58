//! H02 (a common cheap-tracker ASCII dialect). UDP, one frame per
//! datagram, no framing beyond the datagram boundary itself.
//!
//! `*HQ,<id>,V1,<hhmmss>,<A|V>,<lat>,<N|S>,<lon>,<E|W>,<speed>,<course>,<ddmmyy>,...#`
//! `A` means a valid GPS fix; `V` void. No ack is expected by these devices.

use crate::error::CodecError;
use crate::protocols::DecodeResult;
use bytes::{Buf, Bytes, BytesMut};
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use telemetry_types::{CommandPayload, Frame, NormalizedPosition, ProtocolKind};

#[derive(Debug, Default)]
pub struct Codec;

impl Codec {
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<DecodeResult, CodecError> {
        let Some(end) = buf.iter().position(|&b| b == b'#') else {
            return Ok(DecodeResult::default());
        };
        let frame_bytes = buf[..=end].to_vec();
        buf.advance(end + 1);

        let text = String::from_utf8_lossy(&frame_bytes);
        let text = text.trim_end_matches('#').trim_start_matches('*');
        let fields: Vec<&str> = text.split(',').collect();
        if fields.len() < 11 || fields[0] != "HQ" {
            return Err(CodecError::Malformed(format!("unrecognized H02 frame: {text}")));
        }

        let id = fields[1].to_string();
        let valid = fields[3] == "A";
        if !valid {
            return Ok(DecodeResult { frames: vec![Frame::Heartbeat] });
        }

        let time = parse_hhmmss(fields[2])?;
        let lat = parse_coord(fields[4], fields[5] == "S")?;
        let lon = parse_coord(fields[6], fields[7] == "W")?;
        let speed: f64 = fields[8].parse().map_err(|_| CodecError::Malformed("bad speed".into()))?;
        let course: f64 = fields[9].parse().map_err(|_| CodecError::Malformed("bad course".into()))?;
        let date = parse_ddmmyy(fields[10])?;
        let timestamp = Utc.from_utc_datetime(&date.and_time(time));

        Ok(DecodeResult {
            frames: vec![Frame::Position(NormalizedPosition {
                device_identifier: id,
                protocol: ProtocolKind::H02,
                timestamp,
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

/// `ddmm.mmmm` (NMEA-style degrees+minutes) into signed decimal degrees.
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

    #[test]
    fn decodes_a_valid_fix_frame() {
        let mut codec = Codec::default();
        let mut buf = BytesMut::from(
            &b"*HQ,3512345678,V1,120830,A,2234.7514,N,11405.0978,E,42.5,180,150124,#"[..],
        );
        let result = codec.decode(&mut buf).unwrap();
        assert_eq!(result.frames.len(), 1);
        match &result.frames[0] {
            Frame::Position(pos) => {
                assert_eq!(pos.device_identifier, "3512345678");
                assert!((pos.speed_kmh - 42.5).abs() < 1e-9);
                assert!(pos.latitude > 22.0 && pos.latitude < 23.0);
            }
            other => panic!("expected Position, got {other:?}"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn void_fix_becomes_heartbeat() {
        let mut codec = Codec::default();
        let mut buf = BytesMut::from(&b"*HQ,3512345678,V1,120830,V,0,N,0,E,0,0,150124,#"[..]);
        let result = codec.decode(&mut buf).unwrap();
        assert!(matches!(result.frames[0], Frame::Heartbeat));
    }
}
