//! Encode-only counterparts of `telemetry_core`'s protocol codecs. Each
//! submodule builds exactly the bytes the matching `telemetry_core::protocols`
//! decoder expects, so this tool can drive the real gateway over a real
//! socket instead of calling into the gateway's own code.

pub mod gt06;
pub mod h02;
pub mod osmand;
pub mod teltonika;
