//! Queclink GV-series ASCII protocol. TCP, `$`-terminated comma-separated
//! reports; commands and their acks are correlated by a device-assigned
//! message key instead of position, so this codec does support commands.
//!
//! Report: `+RESP:GTFRI,<protocol version>,<imei>,...,<lat>,<lon>,<speed>,
//! <course>,...,<yyyymmddhhmmss>,...,<count>$`
//! Command ack: `+ACK:GT<cmd>,<protocol version>,<imei>,<message key>,...$`

use crate::error::CodecError;
use crate::protocols::DecodeResult;
use bytes::{Buf, Bytes, BytesMut};
use chrono::{NaiveDateTime, TimeZone, Utc};
use telemetry_types::{AckStatus, CommandPayload, Frame, NormalizedPosition, ProtocolKind};

#[derive(Debug, Default)]
pub struct Codec {
    imei: Option<String>,
    next_message_key: u32,
}

impl Codec {
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<DecodeResult, CodecError> {
        let Some(end) = buf.iter().position(|&b| b == b'$') else {
            return Ok(DecodeResult::default());
        };
        let frame_bytes = buf[..end].to_vec();
        buf.advance(end + 1);
        let text = String::from_utf8_lossy(&frame_bytes);
        let text = text.trim();

        if let Some(rest) = text.strip_prefix("+RESP:GTFRI,") {
            self.decode_position_report(rest)
        } else if let Some(rest) = text.strip_prefix("+ACK:") {
            self.decode_ack(rest)
        } else {
            Err(CodecError::Malformed(format!("unrecognized Queclink frame: {text}")))
        }
    }

    fn decode_position_report(&mut self, rest: &str) -> Result<DecodeResult, CodecError> {
        let fields: Vec<&str> = rest.split(',').collect();
        if fields.len() < 15 {
            return Err(CodecError::Malformed("GTFRI report too short".into()));
        }
        let imei = fields[1].to_string();
        self.imei = Some(imei.clone());
        let lat: f64 = fields[8].parse().map_err(|_| CodecError::Malformed("bad lat".into()))?;
        let lon: f64 = fields[9].parse().map_err(|_| CodecError::Malformed("bad lon".into()))?;
        let speed: f64 = fields[6].parse().map_err(|_| CodecError::Malformed("bad speed".into()))?;
        let course: f64 = fields[7].parse().map_err(|_| CodecError::Malformed("bad course".into()))?;
        let timestamp = NaiveDateTime::parse_from_str(fields[11], "%Y%m%d%H%M%S")
            .map_err(|_| CodecError::Malformed("bad timestamp".into()))?;

        Ok(DecodeResult {
            frames: vec![Frame::Position(NormalizedPosition {
                device_identifier: imei,
                protocol: ProtocolKind::Queclink,
                timestamp: Utc.from_utc_datetime(&timestamp),
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

    fn decode_ack(&mut self, rest: &str) -> Result<DecodeResult, CodecError> {
        let fields: Vec<&str> = rest.split(',').collect();
        let message_key = fields.get(3).map(|s| s.to_string());
        Ok(DecodeResult {
            frames: vec![Frame::CommandAck { command_key: message_key, status: AckStatus::Ok, response: rest.to_string() }],
        })
    }

    pub fn encode_ack(&mut self, _frames: &[Frame]) -> Option<Bytes> {
        None
    }

    pub fn encode_command(&self, cmd: &CommandPayload) -> Result<(Bytes, Option<String>), CodecError> {
        let imei = self.imei.clone().unwrap_or_default();
        let key = self.next_message_key;
        let text = format!("+SRESP:{kind},{imei},{key:04}${raw}", kind = cmd.kind, raw = cmd.raw);
        Ok((Bytes::from(text.into_bytes()), Some(key.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_position_report() {
        let mut codec = Codec::default();
        let mut buf = BytesMut::from(
            &b"+RESP:GTFRI,020203,135790246811220,,0,0,0.0,0,22.5,45.5,14.5,20240115123000,0460,0000,18d8,6141,00,2000.0,11F0$"[..],
        );
        let result = codec.decode(&mut buf).unwrap();
        assert_eq!(result.frames.len(), 1);
        assert!(matches!(&result.frames[0], Frame::Position(_)));
        assert!(buf.is_empty());
    }

    #[test]
    fn decodes_command_ack_with_message_key() {
        let mut codec = Codec::default();
        let mut buf = BytesMut::from(&b"+ACK:GTOUT,020203,135790246811220,0042,11F0$"[..]);
        let result = codec.decode(&mut buf).unwrap();
        match &result.frames[0] {
            Frame::CommandAck { command_key, .. } => assert_eq!(command_key.as_deref(), Some("0042")),
            other => panic!("expected CommandAck, got {other:?}"),
        }
    }
}
