//! Port trailer used in tag mode.
//!
//! With tag mode on, every frame crossing the host boundary carries its switch port in a
//! 4-byte trailer: `[0x80, port, 0x10, 0x00]`. Received frames get the trailer in place of
//! their FCS; transmitted frames may carry one to pick the egress port.

use crate::regmap::PortId;

pub const TRAILER_LEN: usize = 4;

const MAGIC: u8 = 0x80;
const MARKER: u8 = 0x10;

pub fn encode_trailer(port: PortId) -> [u8; TRAILER_LEN] {
    [MAGIC, port, MARKER, 0x00]
}

/// Egress port from a frame's trailer, if it has a valid one for a switch with `ports` front
/// ports.
pub fn parse_trailer(frame: &[u8], ports: PortId) -> Option<PortId> {
    let start = frame.len().checked_sub(TRAILER_LEN)?;
    match frame[start..] {
        [MAGIC, port, MARKER, 0x00] if port < ports => Some(port),
        _ => None,
    }
}
