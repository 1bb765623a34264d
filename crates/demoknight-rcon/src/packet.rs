//! Source RCON packet framing.
//!
//! Every packet on the wire is laid out as:
//!
//! ```text
//! size: i32 LE | id: i32 LE | type: i32 LE | body: [u8] | 0x00 | 0x00
//! ```
//!
//! `size` counts every byte after the size field itself, so the smallest
//! legal packet (empty body) has `size == 10`. This module is I/O-free.

use crate::error::{RconError, RconResult};

/// Bytes used by the leading size field.
pub const SIZE_FIELD_LEN: usize = 4;
/// Bytes of `id` + `type` + the two trailing NULs.
pub const HEADER_AND_TERMINATORS_LEN: usize = 10;
/// Largest `size` value a peer is allowed to announce.
pub const MAX_PACKET_SIZE: usize = 4096;
/// Longest command body that still fits in a single packet.
pub const MAX_BODY_LEN: usize = MAX_PACKET_SIZE - HEADER_AND_TERMINATORS_LEN;

/// Packet type carried in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// `SERVERDATA_AUTH` (3).
    Auth,
    /// `SERVERDATA_AUTH_RESPONSE` / `SERVERDATA_EXECCOMMAND` (2).
    ///
    /// The protocol reuses the same value for both directions.
    AuthResponseOrExec,
    /// `SERVERDATA_RESPONSE_VALUE` (0).
    ResponseValue,
    /// Any value this client does not understand.
    Unknown(i32),
}

impl PacketKind {
    /// Convert from the raw wire value.
    #[must_use]
    pub fn from_raw(value: i32) -> Self {
        match value {
            3 => Self::Auth,
            2 => Self::AuthResponseOrExec,
            0 => Self::ResponseValue,
            other => Self::Unknown(other),
        }
    }

    /// Convert to the raw wire value.
    #[must_use]
    pub fn to_raw(self) -> i32 {
        match self {
            Self::Auth => 3,
            Self::AuthResponseOrExec => 2,
            Self::ResponseValue => 0,
            Self::Unknown(other) => other,
        }
    }
}

/// A single decoded RCON packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconPacket {
    /// Request id chosen by the client and echoed by the server.
    pub id: i32,
    /// Packet type.
    pub kind: PacketKind,
    /// Body text without the trailing NUL bytes.
    pub body: String,
}

impl RconPacket {
    /// Build a packet.
    #[must_use]
    pub fn new(id: i32, kind: PacketKind, body: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            body: body.into(),
        }
    }
}

/// Encode a packet into its wire representation.
///
/// # Errors
///
/// Returns [`RconError::CommandTooLong`] when the body does not fit into a
/// single packet.
pub fn encode_packet(packet: &RconPacket) -> RconResult<Vec<u8>> {
    let body = packet.body.as_bytes();
    if body.len() > MAX_BODY_LEN {
        return Err(RconError::CommandTooLong {
            len: body.len(),
            max: MAX_BODY_LEN,
        });
    }

    let size = body.len() + HEADER_AND_TERMINATORS_LEN;
    let size_field = i32::try_from(size).map_err(|err| RconError::protocol(err.to_string()))?;

    let mut out = Vec::with_capacity(SIZE_FIELD_LEN + size);
    out.extend_from_slice(&size_field.to_le_bytes());
    out.extend_from_slice(&packet.id.to_le_bytes());
    out.extend_from_slice(&packet.kind.to_raw().to_le_bytes());
    out.extend_from_slice(body);
    out.extend_from_slice(&[0, 0]);
    Ok(out)
}

fn read_i32(buf: &[u8], start: usize) -> Option<i32> {
    let bytes = buf.get(start..start.checked_add(4)?)?;
    let array: [u8; 4] = bytes.try_into().ok()?;
    Some(i32::from_le_bytes(array))
}

/// Decode one packet from the front of `buf`.
///
/// Returns `Ok(None)` while `buf` does not yet hold a complete packet, and
/// `Ok(Some((packet, consumed)))` once it does.
///
/// # Errors
///
/// Returns [`RconError::Protocol`] if the announced size is outside the
/// legal range.
pub fn decode_packet(buf: &[u8]) -> RconResult<Option<(RconPacket, usize)>> {
    let Some(raw_size) = read_i32(buf, 0) else {
        return Ok(None);
    };

    let size = usize::try_from(raw_size)
        .map_err(|err| RconError::protocol(format!("packet size {raw_size}: {err}")))?;
    if !(HEADER_AND_TERMINATORS_LEN..=MAX_PACKET_SIZE).contains(&size) {
        return Err(RconError::protocol(format!(
            "packet size {size} outside {HEADER_AND_TERMINATORS_LEN}..={MAX_PACKET_SIZE}"
        )));
    }

    let total = SIZE_FIELD_LEN + size;
    let Some(frame) = buf.get(SIZE_FIELD_LEN..total) else {
        return Ok(None);
    };

    let id = read_i32(frame, 0).ok_or_else(|| RconError::protocol("truncated id"))?;
    let kind = read_i32(frame, 4).ok_or_else(|| RconError::protocol("truncated type"))?;
    let body_bytes = frame
        .get(8..size - 2)
        .ok_or_else(|| RconError::protocol("truncated body"))?;

    // Some servers pad with more than one NUL; stop at the first.
    let body_end = body_bytes
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(body_bytes.len());
    let body = String::from_utf8_lossy(body_bytes.get(..body_end).unwrap_or_default()).into_owned();

    Ok(Some((
        RconPacket {
            id,
            kind: PacketKind::from_raw(kind),
            body,
        },
        total,
    )))
}
