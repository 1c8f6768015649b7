//! Code shared by the server and any client of the tick server: the player
//! movement state machine and the binary wire protocol.

pub mod physics;
pub mod protocol;

pub use physics::{advance, InputSnapshot, PhysicsConstants, PlayerState, MAX_JUMP_INPUTS};
pub use protocol::{
    decode_client_packet, decode_snapshot, encode_snapshot, ClientPacket, DecodeError,
    EncodeError, InputPacket, SnapshotRecord,
};

/// Number of tick slots in the circular state buffer.
pub const BUFFER_SIZE: usize = 100;

/// Client ids are a single byte on the wire.
pub const MAX_CLIENTS: usize = 256;

/// Input steps a client is expected to send per server tick.
pub const STEPS_PER_TICK: u32 = 3;

/// Default tick rate of the server, in ticks per second.
pub const DEFAULT_TICK_RATE: u32 = 20;
