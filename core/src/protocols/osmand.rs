//! OsmAnd personal-tracker protocol. Normally carried over HTTP GET query
//! strings; this gateway accepts the same key=value shape newline-delimited
//! over a raw TCP/UDP socket, which is how most self-hosted OsmAnd relays
//! actually deploy it.
//!
//! `id=<id>&timestamp=<unix_secs>&lat=<lat>&lon=<lon>&speed=<kmh>&bearing=<deg>&altitude=<m>\n`

use crate::error::CodecError;
use crate::protocols::DecodeResult;
use bytes::{Buf, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use telemetry_types::{CommandPayload, Frame, NormalizedPosition, ProtocolKind};

#[derive(Debug, Default)]
pub struct Codec;

impl Codec {
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<DecodeResult, CodecError> {
        let Some(end) = buf.iter().position(|&b| b == b'\n') else {
            return Ok(DecodeResult::default());
        };
        let frame_bytes = buf[..end].to_vec();
        buf.advance(end + 1);
        let text = String::from_utf8_lossy(&frame_bytes);
        let text = text.trim().trim_start_matches('?');
        if text.is_empty() {
            return Ok(DecodeResult::default());
        }

        let mut id = None;
        let mut lat = None;
        let mut lon = None;
        let mut timestamp = None;
        let mut speed = 0.0f64;
        let mut course = 0.0f64;
        let mut altitude = 0.0f64;

        for pair in text.split('&') {
            let Some((key, value)) = pair.split_once('=') else { continue };
            match key {
                "id" => id = Some(value.to_string()),
                "lat" => lat = value.parse().ok(),
                "lon" => lon = value.parse().ok(),
                "timestamp" => {
                    timestamp = value.parse::<i64>().ok().and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
                }
                "speed" => speed = value.parse().unwrap_or(0.0),
                "bearing" => course = value.parse().unwrap_or(0.0),
                "altitude" => altitude = value.parse().unwrap_or(0.0),
                _ => {}
            }
        }

        let id = id.ok_or_else(|| CodecError::Malformed("OsmAnd frame missing id".into()))?;
        let lat = lat.ok_or_else(|| CodecError::Malformed("OsmAnd frame missing lat".into()))?;
        let lon = lon.ok_or_else(|| CodecError::Malformed("OsmAnd frame missing lon".into()))?;
        let timestamp = timestamp.unwrap_or_else(chrono::Utc::now);

        Ok(DecodeResult {
            frames: vec![Frame::Position(NormalizedPosition {
                device_identifier: id,
                protocol: ProtocolKind::Osmand,
                timestamp,
                latitude: lat,
                longitude: lon,
                speed_kmh: speed,
                course_deg: course,
                altitude_m: altitude,
                satellites: 0,
                ignition: None,
                sensors: Default::default(),
            })],
        })
    }

    pub fn encode_ack(&mut self, frames: &[Frame]) -> Option<Bytes> {
        if frames.is_empty() {
            None
        } else {
            Some(Bytes::from_static(b"OK\n"))
        }
    }

    pub fn encode_command(&self, _cmd: &CommandPayload) -> Result<(Bytes, Option<String>), CodecError> {
        Err(CodecError::UnsupportedCommand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_query_string_frame() {
        let mut codec = Codec::default();
        let mut buf =
            BytesMut::from(&b"id=device-1&timestamp=1700000000&lat=45.5&lon=14.5&speed=10&bearing=90\n"[..]);
        let result = codec.decode(&mut buf).unwrap();
        match &result.frames[0] {
            Frame::Position(pos) => {
                assert_eq!(pos.device_identifier, "device-1");
                assert!((pos.latitude - 45.5).abs() < 1e-9);
            }
            other => panic!("expected Position, got {other:?}"),
        }
        assert!(buf.is_empty());
    }
}
