//! Binary wire format between clients and the server
//!
//! Inbound (client -> server), one packet per transport message:
//!
//! ```text
//! byte 0      client id
//! byte 1      packet type (1 = input)
//! bytes 2..4  reserved
//! bytes 5..8  sequence number, u32 little-endian
//! bytes 9..   input bit indices, one byte each (0 = left, 1 = right, 2 = jump)
//! ```
//!
//! Outbound (server -> client), one message per tick with at least one
//! changed player: a concatenation of 13-byte [`SnapshotRecord`]s.
//!
//! Fixed-width fields map directly onto bincode's default little-endian,
//! fixed-int encoding, so headers and records are plain serde structs.

use crate::physics::InputSnapshot;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PACKET_TYPE_INPUT: u8 = 1;
pub const INPUT_HEADER_LEN: usize = 9;
pub const SNAPSHOT_RECORD_LEN: usize = 13;

pub const INPUT_BIT_MOVE_LEFT: u8 = 0;
pub const INPUT_BIT_MOVE_RIGHT: u8 = 1;
pub const INPUT_BIT_JUMP: u8 = 2;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("packet too short: {len} bytes, need at least {expected}")]
    TooShort { len: usize, expected: usize },
    #[error("unknown input bit index {0}")]
    InvalidInputBit(u8),
    #[error("malformed packet: {0}")]
    Malformed(#[from] bincode::Error),
}

#[derive(Debug, Error)]
#[error("failed to encode packet: {0}")]
pub struct EncodeError(#[from] bincode::Error);

#[derive(Debug, Serialize, Deserialize)]
struct InputHeader {
    client_id: u8,
    packet_type: u8,
    reserved: [u8; 3],
    sequence: u32,
}

/// A decoded input packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputPacket {
    pub client_id: u8,
    pub sequence: u32,
    pub input: InputSnapshot,
}

/// Anything a client can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPacket {
    Input(InputPacket),
    /// Packet types without a handler. Callers ignore these.
    Unsupported { client_id: u8, packet_type: u8 },
}

impl InputSnapshot {
    /// Sets the key named by a wire bit index.
    pub fn set_bit(&mut self, index: u8) -> Result<(), DecodeError> {
        match index {
            INPUT_BIT_MOVE_LEFT => self.move_left = true,
            INPUT_BIT_MOVE_RIGHT => self.move_right = true,
            INPUT_BIT_JUMP => self.jump = true,
            other => return Err(DecodeError::InvalidInputBit(other)),
        }
        Ok(())
    }

    /// Wire bit indices of every held key, in ascending order.
    pub fn bits(&self) -> Vec<u8> {
        let mut bits = Vec::with_capacity(3);
        if self.move_left {
            bits.push(INPUT_BIT_MOVE_LEFT);
        }
        if self.move_right {
            bits.push(INPUT_BIT_MOVE_RIGHT);
        }
        if self.jump {
            bits.push(INPUT_BIT_JUMP);
        }
        bits
    }
}

impl InputPacket {
    /// Serializes the packet the way a client sends it: header, then one
    /// byte per held key.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let header = InputHeader {
            client_id: self.client_id,
            packet_type: PACKET_TYPE_INPUT,
            reserved: [0; 3],
            sequence: self.sequence,
        };

        let mut data = bincode::serialize(&header)?;
        data.extend(self.input.bits());
        Ok(data)
    }
}

/// Parses one raw inbound message.
///
/// Packets that are not input packets only need the two-byte prefix and
/// come back as [`ClientPacket::Unsupported`].
pub fn decode_client_packet(data: &[u8]) -> Result<ClientPacket, DecodeError> {
    if data.len() < 2 {
        return Err(DecodeError::TooShort {
            len: data.len(),
            expected: 2,
        });
    }

    let client_id = data[0];
    let packet_type = data[1];
    if packet_type != PACKET_TYPE_INPUT {
        return Ok(ClientPacket::Unsupported {
            client_id,
            packet_type,
        });
    }

    if data.len() < INPUT_HEADER_LEN {
        return Err(DecodeError::TooShort {
            len: data.len(),
            expected: INPUT_HEADER_LEN,
        });
    }

    let header: InputHeader = bincode::deserialize(&data[..INPUT_HEADER_LEN])?;

    let mut input = InputSnapshot::EMPTY;
    for &bit in &data[INPUT_HEADER_LEN..] {
        input.set_bit(bit)?;
    }

    Ok(ClientPacket::Input(InputPacket {
        client_id: header.client_id,
        sequence: header.sequence,
        input,
    }))
}

/// One changed player in an outbound snapshot.
///
/// Positions travel as 32-bit two's complement, so a client reading them as
/// unsigned sees the same bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub client_id: u8,
    pub last_received_sequence: u32,
    pub position_x: i32,
    pub position_y: i32,
}

/// Concatenates records into one outbound message.
pub fn encode_snapshot(records: &[SnapshotRecord]) -> Result<Vec<u8>, EncodeError> {
    let mut data = Vec::with_capacity(records.len() * SNAPSHOT_RECORD_LEN);
    for record in records {
        bincode::serialize_into(&mut data, record)?;
    }
    Ok(data)
}

/// Splits an outbound message back into its records.
///
/// Fails if the length is not a whole number of records.
pub fn decode_snapshot(data: &[u8]) -> Result<Vec<SnapshotRecord>, DecodeError> {
    if data.len() % SNAPSHOT_RECORD_LEN != 0 {
        return Err(DecodeError::TooShort {
            len: data.len(),
            expected: (data.len() / SNAPSHOT_RECORD_LEN + 1) * SNAPSHOT_RECORD_LEN,
        });
    }

    data.chunks_exact(SNAPSHOT_RECORD_LEN)
        .map(|chunk| bincode::deserialize(chunk).map_err(DecodeError::from))
        .collect()
}
