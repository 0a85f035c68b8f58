//! TK103 bracket-delimited ASCII dialect. TCP, frames wrapped in `(` `)`,
//! comma-separated fields inside.
//!
//! `(<imei>,BR00,<ddmmyy>,<A|V>,<lat>,<N|S>,<lon>,<E|W>,<speed>,<course>,<hhmmss>)`

use crate::error::CodecError;
use crate::protocols::DecodeResult;
use bytes::{Buf, Bytes, BytesMut};
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use telemetry_types::{CommandPayload, Frame, NormalizedPosition, ProtocolKind};

#[derive(Debug, Default)]
pub struct Codec;

impl Codec {
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<DecodeResult, CodecError> {
        let Some(open) = buf.iter().position(|&b| b == b'(') else {
            return Ok(DecodeResult::default());
        };
        let Some(close) = buf.iter().position(|&b| b == b')') else {
            return Ok(DecodeResult::default());
        };
        if close < open {
            buf.advance(close + 1);
            return Ok(DecodeResult::default());
        }
        let inner = buf[open + 1..close].to_vec();
        buf.advance(close + 1);

        let text = String::from_utf8_lossy(&inner);
        let fields: Vec<&str> = text.split(',').collect();
        if fields.len() < 11 {
            return Err(CodecError::Malformed(format!("TK103 frame too short: {text}")));
        }
        let imei = fields[0].to_string();
        if fields[3] != "A" {
            return Ok(DecodeResult { frames: vec![Frame::Heartbeat] });
        }
        let date = parse_ddmmyy(fields[2])?;
        let time = parse_hhmmss(fields[10])?;
        let lat = parse_coord(fields[4], fields[5] == "S")?;
        let lon = parse_coord(fields[6], fields[7] == "W")?;
        let speed: f64 = fields[8].parse().map_err(|_| CodecError::Malformed("bad speed".into()))?;
        let course: f64 = fields[9].parse().map_err(|_| CodecError::Malformed("bad course".into()))?;

        Ok(DecodeResult {
            frames: vec![Frame::Position(NormalizedPosition {
                device_identifier: imei,
                protocol: ProtocolKind::Tk103,
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

    #[test]
    fn decodes_bracketed_frame() {
        let mut codec = Codec::default();
        let mut buf = BytesMut::from(&b"(135790246811220,BR00,150124,A,2234.7514,N,11405.0978,E,35.0,90,120830)"[..]);
        let result = codec.decode(&mut buf).unwrap();
        assert!(matches!(&result.frames[0], Frame::Position(_)));
        assert!(buf.is_empty());
    }
}
