//! # telemetry-types
//!
//! Wire-adjacent types shared between `telemetry-core` (the gateway, pipeline,
//! alert engine and dispatcher) and `tracker-simulator` (a test/dev tool that
//! emulates hardware trackers against the gateway over real sockets).
//!
//! Keeping these in their own crate means the simulator can construct and
//! serialize the exact same `NormalizedPosition` / `ProtocolKind` /
//! `CommandKind` values the core decodes, without depending on the core's
//! database or alert-engine internals.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ── Protocols ──────────────────────────────────────────────────────────────

/// The closed set of vendor wire protocols the gateway understands. Each
/// variant is bound to exactly one listener port (see `telemetry_core::config`)
/// and one codec — a listener never auto-detects protocol across records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    Teltonika,
    Gt06,
    H02,
    Queclink,
    Tk103,
    Gps103,
    Osmand,
    Flespi,
    Totem,
}

impl ProtocolKind {
    pub const ALL: [ProtocolKind; 9] = [
        ProtocolKind::Teltonika,
        ProtocolKind::Gt06,
        ProtocolKind::H02,
        ProtocolKind::Queclink,
        ProtocolKind::Tk103,
        ProtocolKind::Gps103,
        ProtocolKind::Osmand,
        ProtocolKind::Flespi,
        ProtocolKind::Totem,
    ];

    /// Whether this protocol's canonical transport is UDP (each datagram is
    /// a complete frame, no session buffer) rather than TCP.
    pub fn is_udp(self) -> bool {
        matches!(self, ProtocolKind::H02)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolKind::Teltonika => "teltonika",
            ProtocolKind::Gt06 => "gt06",
            ProtocolKind::H02 => "h02",
            ProtocolKind::Queclink => "queclink",
            ProtocolKind::Tk103 => "tk103",
            ProtocolKind::Gps103 => "gps103",
            ProtocolKind::Osmand => "osmand",
            ProtocolKind::Flespi => "flespi",
            ProtocolKind::Totem => "totem",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "teltonika" => ProtocolKind::Teltonika,
            "gt06" => ProtocolKind::Gt06,
            "h02" => ProtocolKind::H02,
            "queclink" => ProtocolKind::Queclink,
            "tk103" => ProtocolKind::Tk103,
            "gps103" => ProtocolKind::Gps103,
            "osmand" => ProtocolKind::Osmand,
            "flespi" => ProtocolKind::Flespi,
            "totem" => ProtocolKind::Totem,
            _ => return None,
        })
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Sensor values ──────────────────────────────────────────────────────────

/// A scalar value pulled from a protocol-specific numbered I/O element (e.g.
/// Teltonika AVL IDs) or an ASCII protocol's named field. Kept as an untagged
/// scalar rather than always-f64 so boolean I/O elements (ignition, movement)
/// round-trip without lossy numeric coercion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl SensorValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SensorValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            SensorValue::Int(i) => Some(*i as f64),
            SensorValue::Float(f) => Some(*f),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SensorValue::Bool(b) => Some(*b),
            SensorValue::Int(i) => Some(*i != 0),
            SensorValue::Float(f) => Some(*f != 0.0),
        }
    }
}

/// Arbitrary protocol-specific scalar readings, keyed by a stable name (e.g.
/// `battery_voltage`, `external_voltage`, `gsm_signal`). `BTreeMap` keeps
/// serialized output and test fixtures deterministically ordered.
pub type Sensors = BTreeMap<String, SensorValue>;

// ── Normalized position ───────────────────────────────────────────────────

/// One decoded geolocation sample, already normalized to the unit used
/// throughout the pipeline regardless of source protocol: km/h for speed,
/// degrees for course, meters for altitude, UTC for the timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPosition {
    pub device_identifier: String,
    pub protocol: ProtocolKind,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: f64,
    pub course_deg: f64,
    pub altitude_m: f64,
    pub satellites: u32,
    pub ignition: Option<bool>,
    pub sensors: Sensors,
}

// ── Decoded frames ─────────────────────────────────────────────────────────

/// Command acknowledgement status as reported by the device, prior to being
/// reconciled against the dispatcher's `sent` queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Ok,
    Error,
}

/// One unit of decoded protocol traffic. A single `decode` call may return
/// zero or more frames; decoders never guess about partial data — partial
/// frames yield zero frames and zero bytes consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// First frame on a new session, carrying the device's protocol-level
    /// identifier (IMEI or equivalent). The gateway resolves this against
    /// `(identifier, protocol)` before anything else is processed.
    Login { identifier: String },
    Position(NormalizedPosition),
    Heartbeat,
    CommandAck {
        /// Correlation key if the protocol supports keyed acks, otherwise
        /// `None` — the dispatcher then matches the oldest `sent` command.
        command_key: Option<String>,
        status: AckStatus,
        response: String,
    },
    /// A frame the decoder recognized as malformed but can still skip.
    Error { reason: String },
}

// ── Commands ───────────────────────────────────────────────────────────────

/// Outbound instruction payload. Kept untyped (`raw`) at the wire boundary —
/// individual codecs interpret `kind` to build their protocol-specific
/// encoding in `encode_command`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandPayload {
    pub kind: String,
    pub raw: String,
}

/// Hex + ASCII preview of an encoded command, for UI display without
/// dispatching it over a live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandPreview {
    pub hex: String,
    pub ascii: String,
}

pub fn preview_bytes(bytes: &[u8]) -> CommandPreview {
    let hex = bytes.iter().map(|b| format!("{b:02x}")).collect::<String>();
    let ascii = bytes
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect::<String>();
    CommandPreview { hex, ascii }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_value_coercions() {
        assert_eq!(SensorValue::Bool(true).as_f64(), Some(1.0));
        assert_eq!(SensorValue::Int(42).as_bool(), Some(true));
        assert_eq!(SensorValue::Float(0.0).as_bool(), Some(false));
    }

    #[test]
    fn preview_bytes_escapes_non_printable() {
        let preview = preview_bytes(&[0x01, b'A', b' ', 0xff]);
        assert_eq!(preview.hex, "014120ff");
        assert_eq!(preview.ascii, ".A .");
    }

    #[test]
    fn protocol_kind_round_trips_through_str() {
        for p in ProtocolKind::ALL {
            assert_eq!(p.as_str(), p.to_string());
            assert_eq!(ProtocolKind::from_str(p.as_str()), Some(p));
        }
        assert_eq!(ProtocolKind::from_str("not-a-protocol"), None);
    }
}
