use crate::error::InputError;
use crate::tick_buffer::{PlayerSlot, TickBuffer};
use log::{debug, info};
use shared::{
    advance, InputPacket, InputSnapshot, PhysicsConstants, PlayerState, SnapshotRecord,
    STEPS_PER_TICK,
};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Upper bound on buffered inputs per player per tick. Keeps the tick
/// critical section bounded when a client floods the server.
pub const MAX_PENDING_INPUTS: usize = 32;

/// What happened during one tick update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Tick that was simulated.
    pub tick: u16,
    pub players: usize,
    /// Input steps applied, synthesized ones included.
    pub processed: usize,
    pub synthesized: usize,
    /// Players whose integer position changed, in client id order.
    pub changed: Vec<SnapshotRecord>,
}

/// Authoritative world: the tick counter plus the tick buffer.
#[derive(Debug)]
pub struct GameWorld {
    tick: u16,
    buffer: TickBuffer,
    constants: PhysicsConstants,
}

impl GameWorld {
    /// Creates an empty world at tick 0.
    pub fn new(constants: PhysicsConstants) -> Self {
        Self::starting_at(constants, 0)
    }

    /// Creates an empty world whose counter starts at `tick`.
    pub fn starting_at(constants: PhysicsConstants, tick: u16) -> Self {
        Self {
            tick,
            buffer: TickBuffer::new(),
            constants,
        }
    }

    /// The tick the next [`update`](Self::update) will simulate.
    pub fn tick(&self) -> u16 {
        self.tick
    }

    /// Adds a player at the origin, replacing any previous record for the id.
    pub fn add_player(&mut self, client_id: u8) {
        self.buffer
            .slot_mut(self.tick)
            .insert(client_id, PlayerState::new());
        info!("Added player {} at tick {}", client_id, self.tick);
    }

    /// Removes a player from the current tick, so it is not carried into the
    /// next one. Returns false if the player was not present.
    pub fn remove_player(&mut self, client_id: u8) -> bool {
        let removed = self.buffer.slot_mut(self.tick).remove(client_id);
        if removed {
            info!("Removed player {}", client_id);
        }
        removed
    }

    /// Current state of a player, as of the start of the current tick.
    pub fn player(&self, client_id: u8) -> Option<&PlayerState> {
        self.slot_player(self.tick, client_id)
            .map(|player| &player.state)
    }

    /// State recorded for a player at the start of `tick`, if still buffered.
    pub fn recorded_state(&self, tick: u16, client_id: u8) -> Option<&PlayerState> {
        self.slot_player(tick, client_id).map(|player| &player.state)
    }

    /// Number of inputs buffered for a player in the current tick.
    pub fn pending_inputs(&self, client_id: u8) -> usize {
        self.slot_player(self.tick, client_id)
            .map_or(0, |player| player.pending.len())
    }

    /// Number of players in the current tick.
    pub fn player_count(&self) -> usize {
        self.buffer.slot(self.tick).map_or(0, |slot| slot.len())
    }

    fn slot_player(&self, tick: u16, client_id: u8) -> Option<&PlayerSlot> {
        self.buffer
            .slot(tick)
            .and_then(|slot| slot.player(client_id))
    }

    /// Buffers a decoded input for the current tick.
    ///
    /// Sequence numbers at or below the last processed one are still
    /// buffered. They run in sequence order with the rest of the tick's
    /// inputs and never move `last_processed_sequence` backwards.
    ///
    /// Fails if the player does not exist or already has
    /// [`MAX_PENDING_INPUTS`] inputs queued for this tick.
    pub fn apply_input(&mut self, packet: InputPacket) -> Result<(), InputError> {
        let client_id = packet.client_id;
        let player = self
            .buffer
            .slot_mut(self.tick)
            .player_mut(client_id)
            .ok_or(InputError::UnknownClient(client_id))?;

        if player.pending.len() >= MAX_PENDING_INPUTS
            && !player.pending.contains_key(&packet.sequence)
        {
            return Err(InputError::TooManyPending { client_id });
        }

        player.pending.insert(packet.sequence, packet.input);
        player.state.last_received_sequence =
            player.state.last_received_sequence.max(packet.sequence);
        Ok(())
    }

    /// Simulates the current tick and moves the counter forward.
    ///
    /// `dt` is the tick length in seconds; every input step covers a third of it.
    pub fn update(&mut self, dt: f64) -> TickReport {
        let tick = self.tick;
        let next_tick = tick.wrapping_add(1);
        let step_dt = dt / f64::from(STEPS_PER_TICK);
        let constants = self.constants;

        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };

        let (current, next) = self.buffer.slot_pair_mut(tick, next_tick);
        // The slot last held tick - 99
        next.reset();

        for (client_id, player) in current.iter_occupied_mut() {
            report.players += 1;
            report.synthesized += fill_gaps(&mut player.pending, player.state.last_processed_sequence);

            let mut sequences: Vec<u32> = player.pending.keys().copied().collect();
            sequences.sort_unstable();

            let mut state = player.state;
            for sequence in sequences {
                state = advance(&state, player.pending[&sequence], step_dt, &constants);
                state.last_processed_sequence = state.last_processed_sequence.max(sequence);
                report.processed += 1;
            }

            if state.position() != player.state.position() {
                report.changed.push(SnapshotRecord {
                    client_id,
                    last_received_sequence: state.last_received_sequence,
                    position_x: state.position_x,
                    position_y: state.position_y,
                });
            }

            next.insert(client_id, state);
        }

        if !next.is_empty() {
            debug!(
                "Tick {}: {} players, {} steps ({} synthesized), {} changed",
                tick,
                report.players,
                report.processed,
                report.synthesized,
                report.changed.len()
            );
        }

        self.tick = next_tick;
        report
    }
}

/// Inserts all-false inputs for missing sequence numbers right after
/// `last_processed` until `STEPS_PER_TICK` inputs are pending.
fn fill_gaps(pending: &mut HashMap<u32, InputSnapshot>, last_processed: u32) -> usize {
    let mut added = 0;
    for offset in 1..=STEPS_PER_TICK {
        if pending.len() >= STEPS_PER_TICK as usize {
            break;
        }
        let Some(sequence) = last_processed.checked_add(offset) else {
            break;
        };
        if let Entry::Vacant(entry) = pending.entry(sequence) {
            entry.insert(InputSnapshot::EMPTY);
            added += 1;
        }
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::BUFFER_SIZE;

    const TICK_RATE: u32 = 20;
    const DT: f64 = 1.0 / TICK_RATE as f64;

    fn world() -> GameWorld {
        GameWorld::new(PhysicsConstants::for_tick_rate(TICK_RATE))
    }

    fn input(client_id: u8, sequence: u32, input: InputSnapshot) -> InputPacket {
        InputPacket {
            client_id,
            sequence,
            input,
        }
    }

    fn right() -> InputSnapshot {
        InputSnapshot {
            move_right: true,
            ..InputSnapshot::EMPTY
        }
    }

    fn jump() -> InputSnapshot {
        InputSnapshot {
            jump: true,
            ..InputSnapshot::EMPTY
        }
    }

    #[test]
    fn test_tick_advances_by_one() {
        let mut world = world();
        for expected in 0..250u16 {
            assert_eq!(world.tick(), expected);
            let report = world.update(DT);
            assert_eq!(report.tick, expected);
        }
        assert_eq!(world.tick(), 250);
    }

    #[test]
    fn test_tick_counter_wraps_without_losing_players() {
        let mut world = GameWorld::starting_at(PhysicsConstants::for_tick_rate(TICK_RATE), u16::MAX - 1);
        world.add_player(4);

        world.update(DT);
        world.update(DT);
        assert_eq!(world.tick(), 0);
        assert!(world.player(4).is_some());

        world.apply_input(input(4, 7, right())).unwrap();
        let report = world.update(DT);
        assert_eq!(report.changed.len(), 1);
        assert_eq!(world.tick(), 1);
    }

    #[test]
    fn test_idle_player_produces_no_changes() {
        let mut world = world();
        world.add_player(0);

        for _ in 0..5 {
            let report = world.update(DT);
            assert!(report.changed.is_empty());
        }
        assert_eq!(world.player(0).unwrap().position(), (0, 0));
    }

    #[test]
    fn test_gap_fill_synthesizes_missing_steps() {
        let mut world = world();
        world.add_player(0);

        let report = world.update(DT);
        assert_eq!(report.synthesized, 3);
        assert_eq!(report.processed, 3);
        assert_eq!(world.player(0).unwrap().last_processed_sequence, 3);

        world.apply_input(input(0, 5, right())).unwrap();
        let report = world.update(DT);
        assert_eq!(report.synthesized, 2);
        assert_eq!(report.processed, 3);
        assert_eq!(world.player(0).unwrap().last_processed_sequence, 6);
    }

    #[test]
    fn test_gap_fill_counts_real_inputs_outside_window() {
        let mut pending = HashMap::new();
        pending.insert(10, right());
        pending.insert(11, right());

        assert_eq!(fill_gaps(&mut pending, 0), 1);
        assert!(pending.contains_key(&1));
        assert_eq!(pending.len(), 3);

        let mut full = HashMap::new();
        for sequence in 1..=4 {
            full.insert(sequence, right());
        }
        assert_eq!(fill_gaps(&mut full, 0), 0);
        assert_eq!(full.len(), 4);
    }

    #[test]
    fn test_gap_fill_stops_at_sequence_limit() {
        let mut pending = HashMap::new();
        assert_eq!(fill_gaps(&mut pending, u32::MAX - 1), 1);
        assert!(pending.contains_key(&u32::MAX));
    }

    #[test]
    fn test_inputs_processed_in_sequence_order() {
        let constants = PhysicsConstants::for_tick_rate(TICK_RATE);
        let mut world = world();
        world.add_player(0);

        world.apply_input(input(0, 3, jump())).unwrap();
        world.apply_input(input(0, 1, InputSnapshot::EMPTY)).unwrap();
        world.apply_input(input(0, 2, right())).unwrap();
        world.update(DT);

        let step = DT / 3.0;
        let mut expected = PlayerState::new();
        expected = advance(&expected, InputSnapshot::EMPTY, step, &constants);
        expected = advance(&expected, right(), step, &constants);
        expected = advance(&expected, jump(), step, &constants);

        let state = world.player(0).unwrap();
        assert_eq!(state.position(), expected.position());
        assert_eq!(state.position(), (1, 3));
        assert_eq!(state.num_jump_inputs, 1);
        assert_eq!(state.last_processed_sequence, 3);
    }

    #[test]
    fn test_last_processed_sequence_never_decreases() {
        let mut world = world();
        world.add_player(0);
        let mut previous = 0;

        for tick in 0..20u32 {
            if tick % 3 == 0 {
                world.apply_input(input(0, previous + 2, right())).unwrap();
            }
            world.update(DT);
            let processed = world.player(0).unwrap().last_processed_sequence;
            assert!(processed >= previous);
            previous = processed;
        }
    }

    #[test]
    fn test_late_and_duplicate_inputs_are_buffered() {
        let mut world = world();
        world.add_player(0);
        world.update(DT);
        assert_eq!(world.player(0).unwrap().last_processed_sequence, 3);

        world.apply_input(input(0, 2, right())).unwrap();
        world.apply_input(input(0, 9, right())).unwrap();
        world.apply_input(input(0, 4, right())).unwrap();
        world.apply_input(input(0, 4, jump())).unwrap();
        assert_eq!(world.player(0).unwrap().last_received_sequence, 9);
        assert_eq!(world.pending_inputs(0), 3);

        world.update(DT);
        assert_eq!(world.player(0).unwrap().last_processed_sequence, 9);
    }

    #[test]
    fn test_client_starting_at_one_after_idle_ticks_moves() {
        let mut world = world();
        world.add_player(0);
        for _ in 0..5 {
            world.update(DT);
        }
        let synthesized = world.player(0).unwrap().last_processed_sequence;
        assert_eq!(synthesized, 15);

        let mut sequence = 1;
        let mut moved_ticks = 0;
        for _ in 0..50 {
            for _ in 0..3 {
                world.apply_input(input(0, sequence, right())).unwrap();
                sequence += 1;
            }
            if !world.update(DT).changed.is_empty() {
                moved_ticks += 1;
            }
        }

        let state = world.player(0).unwrap();
        assert_eq!(moved_ticks, 50);
        assert_eq!(state.position_x, 150);
        assert_eq!(state.last_received_sequence, 150);
        assert_eq!(state.last_processed_sequence, 150);
    }

    #[test]
    fn test_pending_input_limit() {
        let mut world = world();
        world.add_player(0);

        for sequence in 1..=MAX_PENDING_INPUTS as u32 {
            world.apply_input(input(0, sequence, right())).unwrap();
        }
        let overflow = world.apply_input(input(0, 100, right()));
        assert!(matches!(
            overflow,
            Err(InputError::TooManyPending { client_id: 0 })
        ));
        // Rewriting an already buffered sequence is still allowed
        world.apply_input(input(0, 1, jump())).unwrap();
    }

    #[test]
    fn test_diff_contains_only_moved_players() {
        let mut world = world();
        world.add_player(1);
        world.add_player(2);

        world.apply_input(input(1, 1, right())).unwrap();
        world.apply_input(input(1, 2, right())).unwrap();
        world.apply_input(input(1, 3, right())).unwrap();
        let report = world.update(DT);

        assert_eq!(report.players, 2);
        assert_eq!(
            report.changed,
            vec![SnapshotRecord {
                client_id: 1,
                last_received_sequence: 3,
                position_x: 3,
                position_y: 0,
            }]
        );
    }

    #[test]
    fn test_recorded_state_is_not_mutated_by_later_ticks() {
        let mut world = world();
        world.add_player(0);
        world.apply_input(input(0, 1, right())).unwrap();
        world.update(DT);

        assert_eq!(world.recorded_state(0, 0).unwrap().position_x, 0);
        assert_eq!(world.recorded_state(1, 0).unwrap().position_x, 1);

        world.apply_input(input(0, 4, right())).unwrap();
        world.update(DT);
        assert_eq!(world.recorded_state(0, 0).unwrap().position_x, 0);
        assert_eq!(world.recorded_state(1, 0).unwrap().position_x, 1);
        assert_eq!(world.recorded_state(2, 0).unwrap().position_x, 2);
    }

    #[test]
    fn test_unknown_client_input_is_rejected_then_accepted() {
        let mut world = world();

        let result = world.apply_input(input(9, 1, right()));
        assert!(matches!(result, Err(InputError::UnknownClient(9))));
        world.update(DT);

        world.add_player(9);
        world.apply_input(input(9, 1, right())).unwrap();
        let report = world.update(DT);
        assert_eq!(report.changed.len(), 1);
        assert_eq!(report.changed[0].client_id, 9);
    }

    #[test]
    fn test_removed_player_does_not_return_from_stale_slots() {
        let mut world = world();
        world.add_player(3);
        world.update(DT);
        assert!(world.remove_player(3));
        assert!(!world.remove_player(3));

        for _ in 0..(BUFFER_SIZE * 2) {
            let report = world.update(DT);
            assert_eq!(report.players, 0);
        }
        assert_eq!(world.player_count(), 0);
    }

    #[test]
    fn test_add_player_resets_existing_record() {
        let mut world = world();
        world.add_player(0);
        world.apply_input(input(0, 1, right())).unwrap();
        world.update(DT);
        assert_eq!(world.player(0).unwrap().position_x, 1);

        world.add_player(0);
        assert_eq!(world.player(0).unwrap().position(), (0, 0));
        assert_eq!(world.player(0).unwrap().last_processed_sequence, 0);
    }
}
