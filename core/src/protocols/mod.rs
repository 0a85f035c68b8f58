//! Protocol codecs.
//!
//! Each codec is a stateless decoder paired with a small stateful
//! per-connection session. Polymorphism is a closed tag dispatch (per the
//! "polymorphism over codecs" design note) rather than `dyn Trait` — a
//! listener is bound to exactly one [`telemetry_types::ProtocolKind`] for
//! its lifetime, so there is never a need to pick a codec at the per-frame
//! level.
//!
//! ## Ack semantics
//!
//! The distilled contract describes `encode_ack(frame, session_context)` as
//! if one ack followed one frame. In the wire protocols that actually
//! require acks (Teltonika, GT06), the ack is a property of the *packet*
//! (how many records it held / what serial it carried), not of each decoded
//! frame individually — a Teltonika AVL packet with three position records
//! gets exactly one ack, not three. This module resolves that by having
//! `decode` return every frame produced by one `decode` call together, and
//! `encode_ack` take that whole batch at once. This is documented as an
//! Open Question resolution in DESIGN.md.

pub mod crc;
pub mod flespi;
pub mod gps103;
pub mod gt06;
pub mod h02;
pub mod osmand;
pub mod queclink;
pub mod teltonika;
pub mod tk103;
pub mod totem;

use crate::error::CodecError;
use bytes::BytesMut;
use telemetry_types::{CommandPayload, CommandPreview, Frame, ProtocolKind};

/// Everything one `decode` call produced from the front of the buffer.
#[derive(Debug, Default)]
pub struct DecodeResult {
    pub frames: Vec<Frame>,
}

/// Per-connection codec state, one variant per supported protocol. Created
/// fresh for every new TCP connection (or, for UDP, conceptually fresh per
/// datagram — see [`telemetry_types::ProtocolKind::is_udp`]).
pub enum Codec {
    Teltonika(teltonika::Codec),
    Gt06(gt06::Codec),
    H02(h02::Codec),
    Queclink(queclink::Codec),
    Tk103(tk103::Codec),
    Gps103(gps103::Codec),
    Osmand(osmand::Codec),
    Flespi(flespi::Codec),
    Totem(totem::Codec),
}

impl Codec {
    pub fn new(kind: ProtocolKind) -> Self {
        match kind {
            ProtocolKind::Teltonika => Codec::Teltonika(teltonika::Codec::default()),
            ProtocolKind::Gt06 => Codec::Gt06(gt06::Codec::default()),
            ProtocolKind::H02 => Codec::H02(h02::Codec::default()),
            ProtocolKind::Queclink => Codec::Queclink(queclink::Codec::default()),
            ProtocolKind::Tk103 => Codec::Tk103(tk103::Codec::default()),
            ProtocolKind::Gps103 => Codec::Gps103(gps103::Codec::default()),
            ProtocolKind::Osmand => Codec::Osmand(osmand::Codec::default()),
            ProtocolKind::Flespi => Codec::Flespi(flespi::Codec::default()),
            ProtocolKind::Totem => Codec::Totem(totem::Codec::default()),
        }
    }

    /// Decode as many frames as are currently available at the front of
    /// `buf`, advancing it past whatever was consumed. Partial frames leave
    /// `buf` untouched and return an empty result.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<DecodeResult, CodecError> {
        match self {
            Codec::Teltonika(c) => c.decode(buf),
            Codec::Gt06(c) => c.decode(buf),
            Codec::H02(c) => c.decode(buf),
            Codec::Queclink(c) => c.decode(buf),
            Codec::Tk103(c) => c.decode(buf),
            Codec::Gps103(c) => c.decode(buf),
            Codec::Osmand(c) => c.decode(buf),
            Codec::Flespi(c) => c.decode(buf),
            Codec::Totem(c) => c.decode(buf),
        }
    }

    pub fn encode_ack(&mut self, frames: &[Frame]) -> Option<bytes::Bytes> {
        match self {
            Codec::Teltonika(c) => c.encode_ack(frames),
            Codec::Gt06(c) => c.encode_ack(frames),
            Codec::H02(c) => c.encode_ack(frames),
            Codec::Queclink(c) => c.encode_ack(frames),
            Codec::Tk103(c) => c.encode_ack(frames),
            Codec::Gps103(c) => c.encode_ack(frames),
            Codec::Osmand(c) => c.encode_ack(frames),
            Codec::Flespi(c) => c.encode_ack(frames),
            Codec::Totem(c) => c.encode_ack(frames),
        }
    }

    /// Protocol-specific rejection sent at login when the device turns out
    /// to be unknown or deactivated. Only the handshake-based binary
    /// protocols define an explicit reject byte (Teltonika's `0x00`); the
    /// others have no such wire-level nay, so the caller just closes the
    /// socket without writing anything.
    pub fn login_rejection_ack(&self) -> Option<bytes::Bytes> {
        match self {
            Codec::Teltonika(_) => Some(bytes::Bytes::from_static(&[0x00])),
            _ => None,
        }
    }

    pub fn supports_commands(&self) -> bool {
        match self {
            Codec::Teltonika(_) | Codec::Gt06(_) | Codec::Queclink(_) => true,
            _ => false,
        }
    }

    pub fn encode_command(&self, cmd: &CommandPayload) -> Result<(bytes::Bytes, Option<String>), CodecError> {
        match self {
            Codec::Teltonika(c) => c.encode_command(cmd),
            Codec::Gt06(c) => c.encode_command(cmd),
            Codec::Queclink(c) => c.encode_command(cmd),
            _ => Err(CodecError::UnsupportedCommand),
        }
    }

    pub fn preview(&self, cmd: &CommandPayload) -> Result<CommandPreview, CodecError> {
        let (bytes, _) = self.encode_command(cmd)?;
        Ok(telemetry_types::preview_bytes(&bytes))
    }
}

/// Oversized, never-going-to-frame buffer guard shared by every codec.
/// Called by the gateway after every failed decode attempt.
pub fn buffer_within_cap(buf: &BytesMut, cap: usize) -> Result<(), CodecError> {
    if buf.len() > cap {
        Err(CodecError::BufferOverflow(buf.len()))
    } else {
        Ok(())
    }
}
