//! Flespi-compatible JSON-line protocol.
//!
//! Open Question from the distilled spec: Flespi's real wire protocol is a
//! MQTT-backed cloud API, not something a single TCP/UDP listener can
//! terminate directly. This gateway instead accepts the flattened JSON
//! object Flespi's own device-to-platform webhooks emit, one object per
//! line, over a plain socket — this is the shape self-hosted relays that
//! sit in front of Flespi actually forward, so it is the natural thing to
//! terminate here. Framing is therefore newline-delimited regardless of
//! whether the listener is bound as TCP or UDP.
//!
//! `{"ident":"<id>","timestamp":<unix_secs>,"position.latitude":<f64>,
//! "position.longitude":<f64>,"position.speed":<f64>,"position.direction":<f64>}\n`

use crate::error::CodecError;
use crate::protocols::DecodeResult;
use bytes::{Buf, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use telemetry_types::{CommandPayload, Frame, NormalizedPosition, ProtocolKind};

#[derive(Debug, Default)]
pub struct Codec;

#[derive(Debug, Deserialize)]
struct FlespiRecord {
    ident: String,
    timestamp: i64,
    #[serde(rename = "position.latitude")]
    latitude: f64,
    #[serde(rename = "position.longitude")]
    longitude: f64,
    #[serde(rename = "position.speed", default)]
    speed: f64,
    #[serde(rename = "position.direction", default)]
    direction: f64,
    #[serde(rename = "position.altitude", default)]
    altitude: f64,
    #[serde(rename = "position.satellites", default)]
    satellites: u32,
}

impl Codec {
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<DecodeResult, CodecError> {
        let Some(end) = buf.iter().position(|&b| b == b'\n') else {
            return Ok(DecodeResult::default());
        };
        let frame_bytes = buf[..end].to_vec();
        buf.advance(end + 1);
        let text = std::str::from_utf8(&frame_bytes)
            .map_err(|_| CodecError::Malformed("Flespi line is not valid utf8".into()))?
            .trim();
        if text.is_empty() {
            return Ok(DecodeResult::default());
        }

        let record: FlespiRecord =
            serde_json::from_str(text).map_err(|e| CodecError::Malformed(format!("bad Flespi JSON: {e}")))?;
        let timestamp = DateTime::<Utc>::from_timestamp(record.timestamp, 0)
            .ok_or_else(|| CodecError::Malformed("timestamp out of range".into()))?;

        Ok(DecodeResult {
            frames: vec![Frame::Position(NormalizedPosition {
                device_identifier: record.ident,
                protocol: ProtocolKind::Flespi,
                timestamp,
                latitude: record.latitude,
                longitude: record.longitude,
                speed_kmh: record.speed,
                course_deg: record.direction,
                altitude_m: record.altitude,
                satellites: record.satellites,
                ignition: None,
                sensors: Default::default(),
            })],
        })
    }

    pub fn encode_ack(&mut self, frames: &[Frame]) -> Option<Bytes> {
        if frames.is_empty() {
            None
        } else {
            Some(Bytes::from_static(b"{\"ack\":true}\n"))
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
    fn decodes_flattened_json_line() {
        let mut codec = Codec::default();
        let line = b"{\"ident\":\"dev-1\",\"timestamp\":1700000000,\"position.latitude\":45.5,\"position.longitude\":14.5,\"position.speed\":12.0,\"position.direction\":90.0}\n";
        let mut buf = BytesMut::from(&line[..]);
        let result = codec.decode(&mut buf).unwrap();
        assert!(matches!(&result.frames[0], Frame::Position(_)));
        assert!(buf.is_empty());
    }
}
