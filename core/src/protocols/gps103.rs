//! GPS103/TK102-family ASCII protocol. TCP, `;`-terminated frames.
//!
//! `imei:<imei>,tracker,<ddmmyyhhmmss>,,<F|L>,<hhmmss.sss>,<A|V>,<lat>,<N|S>,
//! <lon>,<E|W>,<speed>,<course>;`

use crate::error::CodecError;
use crate::protocols::DecodeResult;
use bytes::{Buf, Bytes, BytesMut};
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use telemetry_types::{CommandPayload, Frame, NormalizedPosition, ProtocolKind};

#[derive(Debug, Default)]
pub struct Codec {
    imei: Option<String>,
}

impl Codec {
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<DecodeResult, CodecError> {
        let Some(end) = buf.iter().position(|&b| b == b';') else {
            return Ok(DecodeResult::default());
        };
        let frame_bytes = buf[..end].to_vec();
        buf.advance(end + 1);
        let text = String::from_utf8_lossy(&frame_bytes);
        let text = text.trim();

        let Some(rest) = text.strip_prefix("imei:") else {
            return Err(CodecError::Malformed(format!("unrecognized GPS103 frame: {text}")));
        };
        let fields: Vec<&str> = rest.split(',').collect();
        if fields.len() < 11 {
            return Err(CodecError::Malformed("GPS103 frame too short".into()));
        }
        let imei = fields[0].to_string();
        self.imei = Some(imei.clone());

        if fields[6] != "A" {
            return Ok(DecodeResult { frames: vec![Frame::Heartbeat] });
        }

        let time = NaiveTime::parse_from_str(&fields[5][..6], "%H%M%S")
            .map_err(|_| CodecError::Malformed("bad time".into()))?;
        let date = parse_ddmmyy(fields[2].get(0..6).unwrap_or(""))?;
        let lat = parse_coord(fields[7], fields[8] == "S")?;
        let lon = parse_coord(fields[9], fields[10] == "W")?;
        let speed: f64 = fields.get(11).and_then(|s| s.parse().ok()).unwrap_or(0.0);
        let course: f64 = fields.get(12).and_then(|s| s.parse().ok()).unwrap_or(0.0);

        let timestamp = Utc.from_utc_datetime(&date.and_time(time));

        Ok(DecodeResult {
            frames: vec![Frame::Position(NormalizedPosition {
                device_identifier: imei,
                protocol: ProtocolKind::Gps103,
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

fn parse_coord(s: &str, negative: bool) -> Result<f64, CodecError> {
    let raw: f64 = s.parse().map_err(|_| CodecError::Malformed("bad coordinate".into()))?;
    let degrees = (raw / 100.0).floor();
    let minutes = raw - degrees * 100.0;
    let value = degrees + minutes / 60.0;
    Ok(if negative { -value } else { value })
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_valid_fix() {
        let mut codec = Codec::default();
        let mut buf = BytesMut::from(
            &b"imei:135790246811220,tracker,150124120830,,F,120830.000,A,2234.7514,N,11405.0978,E,12.3,88;"[..],
        );
        let result = codec.decode(&mut buf).unwrap();
        assert!(matches!(&result.frames[0], Frame::Position(_)));
        assert!(buf.is_empty());
    }
}
