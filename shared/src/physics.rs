//! Per-player movement state machine
//!
//! `advance` is the only place player state changes. It is a pure function of
//! the previous state, one input snapshot and a time step, so the server can
//! replay any buffered sequence of inputs and a predicting client can run the
//! exact same code.

use serde::{Deserialize, Serialize};

/// How many jump impulses may stack before the player has to touch the ground.
pub const MAX_JUMP_INPUTS: u8 = 3;

/// Keys held by a client for one input step.
///
/// A missing snapshot for a sequence number is not the same thing as an
/// all-false snapshot; the world synthesizes `InputSnapshot::EMPTY` to fill
/// sequence gaps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSnapshot {
    pub move_left: bool,
    pub move_right: bool,
    pub jump: bool,
}

impl InputSnapshot {
    pub const EMPTY: InputSnapshot = InputSnapshot {
        move_left: false,
        move_right: false,
        jump: false,
    };
}

/// Authoritative state of a single player as of the start of a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerState {
    /// World units, positive to the right.
    pub position_x: i32,
    /// World units, positive up. Never below zero.
    pub position_y: i32,
    /// Units per second.
    pub velocity_x: f64,
    /// Units per second.
    pub velocity_y: f64,
    /// Highest sequence number received from the network
    pub last_received_sequence: u32,
    /// Highest sequence number consumed by `advance`
    pub last_processed_sequence: u32,
    pub num_jump_inputs: u8,
    pub on_ground: bool,
    pub jumping: bool,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            position_x: 0,
            position_y: 0,
            velocity_x: 0.0,
            velocity_y: 0.0,
            last_received_sequence: 0,
            last_processed_sequence: 0,
            num_jump_inputs: 0,
            on_ground: true,
            jumping: false,
        }
    }
}

impl PlayerState {
    /// A grounded player at the origin that has not sent anything yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Integer position, the part of the state that is diffed and broadcast.
    pub fn position(&self) -> (i32, i32) {
        (self.position_x, self.position_y)
    }
}

/// Movement tuning, expressed per second.
///
/// The values scale with the server tick rate, so changing the tick rate
/// changes how the game feels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsConstants {
    pub player_speed: f64,
    pub gravity: f64,
    pub jump_speed: f64,
}

impl PhysicsConstants {
    /// Speed and gravity are `4 * tick_rate`, jump speed is `12 * tick_rate`.
    pub fn for_tick_rate(tick_rate: u32) -> Self {
        let rate = f64::from(tick_rate);
        Self {
            player_speed: 4.0 * rate,
            gravity: 4.0 * rate,
            jump_speed: 12.0 * rate,
        }
    }
}

/// Advances one player by one input step of `dt` seconds.
pub fn advance(
    state: &PlayerState,
    input: InputSnapshot,
    dt: f64,
    constants: &PhysicsConstants,
) -> PlayerState {
    let mut next = *state;

    // Landing only restores the jump budget once the key is released
    if next.on_ground && !input.jump {
        next.num_jump_inputs = 0;
        next.jumping = false;
    }

    if input.move_left {
        next.velocity_x -= constants.player_speed;
    } else if input.move_right {
        next.velocity_x += constants.player_speed;
    }

    if input.jump && (!next.jumping || next.num_jump_inputs < MAX_JUMP_INPUTS) {
        next.velocity_y += constants.jump_speed;
        next.num_jump_inputs += 1;
        next.on_ground = false;
        next.jumping = true;
    }

    if !next.on_ground {
        next.velocity_y -= constants.gravity;
    }

    let dx = (next.velocity_x * dt).round() as i32;
    let dy = (next.velocity_y * dt).round() as i32;

    next.position_x = next.position_x.saturating_add(dx);
    next.velocity_x = 0.0;

    let landed_y = next.position_y.saturating_add(dy);
    if landed_y < 0 {
        next.position_y = 0;
        next.velocity_y = 0.0;
        next.on_ground = true;
    } else {
        next.position_y = landed_y;
    }

    next
}
